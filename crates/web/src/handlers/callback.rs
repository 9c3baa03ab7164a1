use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use reviewbot_core::{
    AppError, ReviewError,
    models::{AccountType, NewInstallation},
};
use reviewbot_db::Database;
use reviewbot_github::SourceControl;
use serde::Deserialize;

use crate::handlers::auth::CurrentUser;

const INSTALL_PAGE: &str = "/github/install";

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub installation_id: Option<String>,
    pub setup_action: Option<String>,
}

/// GitHub redirects here after the user installs the App.
pub async fn github_callback(
    State(db): State<Arc<Database>>,
    State(github): State<Arc<dyn SourceControl>>,
    user: CurrentUser,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, AppError> {
    let raw_id = query.installation_id.as_deref().filter(|id| !id.is_empty());
    let (Some(raw_id), Some("install")) = (raw_id, query.setup_action.as_deref()) else {
        return Ok(Redirect::to(&format!("{INSTALL_PAGE}?error=invalid_callback")));
    };
    let Ok(installation_id) = raw_id.parse::<u64>() else {
        return Ok(Redirect::to(&format!("{INSTALL_PAGE}?error=invalid_installation_id")));
    };

    // The installation webhook fills in the account later if this lookup fails
    let account = match github.installation_account(installation_id).await {
        Ok(account) => Some(account),
        Err(e) => {
            tracing::warn!("Failed to fetch installation {}: {:#}", installation_id, e);
            None
        }
    };
    let installation = db
        .upsert_installation(&NewInstallation {
            installation_id,
            user_id: Some(user.id),
            account_login: account.as_ref().map(|a| a.login.clone()).unwrap_or_default(),
            account_type: AccountType::from_github(account.and_then(|a| a.kind).as_deref()),
        })
        .await
        .map_err(ReviewError::persistence)?;
    tracing::info!(
        "Installation {} ({}) claimed by {:?}",
        installation_id,
        installation.account_login,
        installation.user_id
    );
    Ok(Redirect::to(&format!("{INSTALL_PAGE}?success=installed")))
}
