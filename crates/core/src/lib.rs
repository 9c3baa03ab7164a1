pub mod config;
pub mod error;
pub mod models;
pub mod util;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub use crate::error::ReviewError;

/// Handler error. Client-facing categories of [`ReviewError`] keep their status code, anything
/// else becomes a 500.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Self(err) = self;
        let status = err.downcast_ref::<ReviewError>().and_then(ReviewError::status);
        if let Some(status) = status {
            tracing::warn!("Rejecting request: {:#}", err);
            return (status, Json(json!({ "error": format!("{:#}", err) }))).into_response();
        }
        tracing::error!("{:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Something went wrong: {}", err) })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self(err.into()) }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use axum::{http::StatusCode, response::IntoResponse};

    use super::{AppError, ReviewError};

    #[test]
    fn test_review_error_status() {
        let cases = vec![
            (ReviewError::Authentication("bad".into()), StatusCode::UNAUTHORIZED),
            (ReviewError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ReviewError::NotFound("installation 1".into()), StatusCode::NOT_FOUND),
            (ReviewError::Upstream(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ReviewError::Persistence(anyhow::anyhow!("locked")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_review_error_through_context() {
        let result: anyhow::Result<()> =
            Err(ReviewError::NotFound("installation 42".into())).context("Failed to trigger");
        let response = AppError::from(result.unwrap_err()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
