use axum::{Json, extract::State};
use reviewbot_core::AppError;
use serde_json::{Value, json};

use crate::AppState;

pub async fn healthz(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({ "ok": true, "model": state.llm.name() })))
}
