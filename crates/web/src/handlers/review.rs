use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use reviewbot_core::{
    AppError, ReviewError,
    models::{Provider, ReviewType},
};
use reviewbot_review::{
    Providers,
    prompts::{is_supported_language, snippet_prompt, system_prompt},
};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub review_type: String,
    /// `openai` unless given.
    #[serde(default)]
    pub provider: Option<String>,
}

/// Review a pasted code snippet outside of any pull request.
pub async fn review_snippet(
    State(providers): State<Arc<Providers>>,
    request: Result<Json<SnippetRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = request.map_err(|e| ReviewError::Validation(e.body_text()))?;
    let missing = request.code.trim().is_empty()
        || request.language.is_empty()
        || request.review_type.is_empty();
    if missing {
        return Err(ReviewError::Validation("Missing required fields".into()).into());
    }
    let language = request.language.to_ascii_lowercase();
    if !is_supported_language(&language) {
        return Err(ReviewError::Validation(format!("unsupported language {language:?}")).into());
    }
    let review_type = request
        .review_type
        .parse::<ReviewType>()
        .map_err(|e| ReviewError::Validation(e.to_string()))?;
    let provider = match request.provider.as_deref() {
        None | Some("") => Provider::default(),
        Some(provider) => {
            provider.parse::<Provider>().map_err(|e| ReviewError::Validation(e.to_string()))?
        }
    };
    let llm = providers.get(provider).ok_or_else(|| {
        ReviewError::Validation(format!("provider {} is not configured", provider.as_str()))
    })?;

    let review = llm
        .complete(&system_prompt(review_type), &snippet_prompt(&request.code, &language))
        .await
        .map_err(ReviewError::upstream)?;
    tracing::info!(
        "Reviewed {} chars of {} ({}) with {}",
        request.code.chars().count(),
        language,
        review_type.as_str(),
        llm.name()
    );
    Ok(Json(json!({ "review": review })))
}
