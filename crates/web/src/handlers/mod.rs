use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::timeout::TimeoutLayer;

use crate::AppState;

mod auth;
mod callback;
mod common;
mod jobs;
mod review;
#[cfg(test)]
mod testing;
mod webhook;

/// Where the broker delivers review jobs.
pub const JOB_ROUTE: &str = "/api/jobs/review-pr";

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(common::healthz))
        .route("/api/webhook/github", post(webhook::webhook))
        .route("/github/callback", get(callback::github_callback))
        .route("/api/review", post(review::review_snippet))
        .route_layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        // Added after the timeout: a review job is never cut off partway through
        .route(JOB_ROUTE, post(jobs::review_pr))
}
