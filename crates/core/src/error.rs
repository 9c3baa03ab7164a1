use axum::http::StatusCode;

/// Failures of the review pipeline, on both the webhook and the worker side.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Missing or invalid signature on an inbound webhook or job delivery.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Malformed or incomplete payload.
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    /// GitHub or language model request failed.
    #[error("upstream request failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error("store unavailable: {0:#}")]
    Persistence(anyhow::Error),
}

impl ReviewError {
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self { Self::Upstream(err.into()) }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self { Self::Persistence(err.into()) }

    /// Status code for errors that reject the request outright. Upstream and
    /// persistence failures return `None` and surface as server errors so that
    /// the broker redelivers.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Authentication(_) => Some(StatusCode::UNAUTHORIZED),
            Self::Validation(_) => Some(StatusCode::BAD_REQUEST),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Self::Upstream(_) | Self::Persistence(_) => None,
        }
    }
}
