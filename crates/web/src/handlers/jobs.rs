use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use reviewbot_core::{AppError, ReviewError};
use reviewbot_jobs::{JobContext, JobVerifier, ReviewJob, process_review_job, verify};
use serde_json::{Value, json};

/// Broker delivery of a review job. Anything but a 2xx makes the broker retry.
pub async fn review_pr(
    State(verifier): State<Arc<JobVerifier>>,
    State(ctx): State<JobContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers.get(verify::SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    verifier.verify(signature, &body)?;
    let job: ReviewJob = serde_json::from_slice(&body)
        .map_err(|e| ReviewError::Validation(format!("malformed review job: {e}")))?;
    let status = process_review_job(&job, &ctx).await?;
    Ok(Json(json!({ "ok": true, "status": status, "reviewId": job.review_id })))
}
