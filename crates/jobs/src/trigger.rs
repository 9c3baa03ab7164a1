use reviewbot_core::{ReviewError, models::NewReview};
use reviewbot_db::Database;
use reviewbot_github::events::PullRequestEvent;

use crate::{dispatch::JobDispatcher, message::ReviewJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new PENDING review was created and its job dispatched.
    Created { review_id: i64 },
    /// A review for this commit already exists; nothing was dispatched.
    Existing { review_id: i64 },
}

impl Enqueued {
    pub fn review_id(self) -> i64 {
        match self {
            Self::Created { review_id } | Self::Existing { review_id } => review_id,
        }
    }
}

/// Create the review for a pull request commit and hand it to the broker, once.
///
/// If dispatch fails the review stays PENDING and the error is returned, so GitHub's
/// own redelivery of the webhook finds the existing row.
pub async fn enqueue_review(
    db: &Database,
    dispatcher: &dyn JobDispatcher,
    event: &PullRequestEvent,
) -> Result<Enqueued, ReviewError> {
    let installation_id = event
        .installation_id()
        .ok_or_else(|| ReviewError::Validation("pull_request event has no installation".into()))?;
    let installation = db
        .get_installation(installation_id)
        .await
        .map_err(ReviewError::persistence)?
        .filter(|i| i.is_active())
        .ok_or_else(|| ReviewError::NotFound(format!("installation {installation_id}")))?;

    let key = event.key();
    if let Some(existing) = db.find_review(&key).await.map_err(ReviewError::persistence)? {
        tracing::info!("Review {} already exists for {}", existing.id, key);
        return Ok(Enqueued::Existing { review_id: existing.id });
    }
    let new = NewReview {
        installation_id: installation.id,
        key,
        pr_title: event.pull_request.title.clone(),
        pr_url: event.pull_request.html_url.clone(),
    };
    let (review_id, created) = db.create_review(&new).await.map_err(ReviewError::persistence)?;
    if !created {
        // A concurrent delivery won the insert
        return Ok(Enqueued::Existing { review_id });
    }

    let job = ReviewJob::new(review_id, installation_id, &new.key);
    dispatcher.dispatch(&job).await.map_err(ReviewError::upstream)?;
    tracing::info!("Enqueued review {} for {}", review_id, new.key);
    Ok(Enqueued::Created { review_id })
}
