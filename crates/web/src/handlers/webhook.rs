use std::sync::Arc;

use axum::{Json, extract::State};
use reviewbot_core::{
    AppError, ReviewError,
    models::{AccountType, NewInstallation},
};
use reviewbot_db::Database;
use reviewbot_github::{
    events::{InstallationAction, InstallationEvent, WebhookEvent},
    webhook::GitHubEvent,
};
use reviewbot_jobs::{Enqueued, JobDispatcher, enqueue_review};
use serde_json::{Value, json};

pub async fn webhook(
    State(db): State<Arc<Database>>,
    State(dispatcher): State<Arc<dyn JobDispatcher>>,
    GitHubEvent { delivery, event }: GitHubEvent,
) -> Result<Json<Value>, AppError> {
    let delivery = delivery.as_deref().unwrap_or("-");
    match event {
        WebhookEvent::Installation(event) => {
            handle_installation(&db, &event).await?;
            Ok(Json(json!({ "ok": true })))
        }
        WebhookEvent::PullRequest(event) => {
            tracing::info!("Delivery {}: {:?} {}", delivery, event.action, event.key());
            let body = match enqueue_review(&db, &*dispatcher, &event).await? {
                Enqueued::Created { review_id } => json!({ "ok": true, "reviewId": review_id }),
                Enqueued::Existing { review_id } => {
                    json!({ "ok": true, "skipped": true, "reviewId": review_id })
                }
            };
            Ok(Json(body))
        }
        WebhookEvent::Ignored { kind, action } => {
            tracing::debug!("Delivery {}: ignoring {} ({:?})", delivery, kind, action);
            Ok(Json(json!({ "ok": true })))
        }
    }
}

async fn handle_installation(db: &Database, event: &InstallationEvent) -> Result<(), ReviewError> {
    let Some(installation_id) = event.installation_id() else {
        tracing::warn!("Ignoring installation {:?} event without an id", event.action);
        return Ok(());
    };
    match event.action {
        InstallationAction::Created => {
            let account = event.installation.as_ref().and_then(|i| i.account.as_ref());
            let installation = db
                .upsert_installation(&NewInstallation {
                    installation_id,
                    user_id: None,
                    account_login: account.map(|a| a.login.clone()).unwrap_or_default(),
                    account_type: AccountType::from_github(
                        account.and_then(|a| a.kind.as_deref()),
                    ),
                })
                .await
                .map_err(ReviewError::persistence)?;
            tracing::info!(
                "Installation {} created for {}",
                installation_id,
                installation.account_login
            );
        }
        InstallationAction::Deleted | InstallationAction::Suspend => {
            let count =
                db.suspend_installation(installation_id).await.map_err(ReviewError::persistence)?;
            tracing::info!(
                "Installation {} {:?}: suspended {} row(s)",
                installation_id,
                event.action,
                count
            );
        }
        InstallationAction::Unsuspend => {
            let count = db
                .unsuspend_installation(installation_id)
                .await
                .map_err(ReviewError::persistence)?;
            tracing::info!("Installation {} unsuspended ({} row(s))", installation_id, count);
        }
        InstallationAction::Other => {
            tracing::debug!("Ignoring installation event for {}", installation_id);
        }
    }
    Ok(())
}
