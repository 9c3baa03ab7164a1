use anyhow::{Context, Result, anyhow};
use reviewbot_core::{
    ReviewError,
    models::{ReviewOutcome, ReviewStatus},
};
use reviewbot_db::Claim;
use reviewbot_github::files::{ChangedFile, FetchedFiles, fetch_changed_files};
use reviewbot_review::{
    chunk::chunk_diffs,
    comment::{NO_REVIEWABLE_FILES, review_body, summarize, too_large_body, too_large_summary},
    synthesize_review,
};

use crate::{JobContext, message::ReviewJob};

/// Process a delivered review job.
///
/// The review is moved to PROCESSING before any external call. Any failure after
/// that records FAILED with the error message and is returned, so the broker
/// redelivers. Reviews that already reached COMPLETED or SKIPPED are acknowledged
/// with their status and nothing is redone.
///
/// Once claimed, the review runs in its own task: dropping the returned future does
/// not cancel it, and the outcome is still recorded.
pub async fn process_review_job(job: &ReviewJob, ctx: &JobContext) -> Result<ReviewStatus> {
    let claim = ctx.db.claim_review(job.review_id).await.map_err(ReviewError::persistence)?;
    let review = match claim {
        Claim::Claimed(review) => review,
        Claim::Final(review) => {
            tracing::info!("Review {} already {}, acknowledging", review.id, review.status);
            return Ok(review.status);
        }
        Claim::Missing => {
            return Err(ReviewError::NotFound(format!("review {}", job.review_id)).into());
        }
    };
    tracing::info!("Processing review {} ({})", review.id, review.key);

    let task = tokio::spawn(run_claimed(job.clone(), ctx.clone(), review.id));
    match task.await {
        Ok(result) => result,
        Err(e) => {
            let err = anyhow!("Review worker stopped: {e}");
            fail_review(ctx, review.id, err).await
        }
    }
}

async fn run_claimed(job: ReviewJob, ctx: JobContext, review_id: i64) -> Result<ReviewStatus> {
    match run_review(&job, &ctx).await {
        Ok(outcome) => {
            let status = record_outcome(&ctx, review_id, &outcome).await?;
            tracing::info!("Review {} {}", review_id, status);
            Ok(status)
        }
        Err(e) => fail_review(&ctx, review_id, e).await,
    }
}

/// Record FAILED and hand the error back for redelivery. A concurrent delivery that
/// already finished the review wins, and its status is returned instead.
async fn fail_review(
    ctx: &JobContext,
    review_id: i64,
    err: anyhow::Error,
) -> Result<ReviewStatus> {
    tracing::error!("Review {} failed: {:?}", review_id, err);
    let outcome = ReviewOutcome::Failed { message: format!("{err:#}") };
    match record_outcome(ctx, review_id, &outcome).await {
        Ok(ReviewStatus::Failed) => Err(err),
        Ok(status) => Ok(status),
        Err(db_err) => {
            tracing::error!("Failed to mark review {} FAILED: {:?}", review_id, db_err);
            Err(err)
        }
    }
}

/// Write `outcome`, or read back the final state a concurrent delivery wrote first.
async fn record_outcome(
    ctx: &JobContext,
    review_id: i64,
    outcome: &ReviewOutcome,
) -> Result<ReviewStatus> {
    let written = ctx
        .db
        .finish_review(review_id, outcome)
        .await
        .context("Failed to record review outcome")
        .map_err(ReviewError::persistence)?;
    if written {
        return Ok(outcome.status());
    }
    let review = ctx
        .db
        .get_review(review_id)
        .await
        .map_err(ReviewError::persistence)?
        .ok_or_else(|| ReviewError::NotFound(format!("review {review_id}")))?;
    tracing::info!("Review {} was already finished as {}", review_id, review.status);
    Ok(review.status)
}

async fn run_review(job: &ReviewJob, ctx: &JobContext) -> Result<ReviewOutcome> {
    let key = job.key();
    let installation_id = job.github_installation_id;
    let fetched = fetch_changed_files(&*ctx.github, installation_id, &key, &ctx.review)
        .await
        .map_err(ReviewError::upstream)?;
    let files = match fetched {
        FetchedFiles::TooLarge { count } => {
            // Comment first so a failed post leaves the review retryable
            ctx.github
                .create_advisory_review(installation_id, &key, &too_large_body(count))
                .await
                .map_err(ReviewError::upstream)?;
            return Ok(ReviewOutcome::Skipped { summary: too_large_summary(count) });
        }
        FetchedFiles::Files(files) => files,
    };

    let total = files.len();
    let files = files.into_iter().filter(ChangedFile::is_reviewable).collect::<Vec<_>>();
    if files.is_empty() {
        tracing::info!("No reviewable files in {} ({} changed)", key, total);
        return Ok(ReviewOutcome::Skipped { summary: NO_REVIEWABLE_FILES.to_string() });
    }

    let chunks = chunk_diffs(
        files.iter().map(|f| (f.filename.as_str(), f.patch.as_deref().unwrap_or_default())),
        ctx.review.max_diff_chars,
    );
    tracing::info!(
        "Reviewing {} of {} files in {} as {} chunk(s)",
        files.len(),
        total,
        key,
        chunks.len()
    );
    let review = synthesize_review(
        &*ctx.llm,
        ctx.review.review_type,
        &chunks,
        ctx.review.chunk_concurrency,
    )
    .await
    .map_err(ReviewError::upstream)?;

    let body = review_body(&review, files.len(), ctx.llm.name());
    let comment_id = ctx
        .github
        .create_advisory_review(installation_id, &key, &body)
        .await
        .map_err(ReviewError::upstream)?;
    Ok(ReviewOutcome::Completed {
        summary: summarize(&review, ctx.review.summary_length),
        content: review,
        files_reviewed: files.len() as u32,
        comment_id,
    })
}
