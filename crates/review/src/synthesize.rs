use anyhow::{Context, Result, bail};
use futures_util::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture, stream};
use reviewbot_core::models::ReviewType;

use crate::{
    model::LanguageModel,
    prompts::{SYNTHESIS_SYSTEM_PROMPT, chunk_prompt, synthesis_prompt, system_prompt},
};

/// Review every chunk and merge the results into one review.
///
/// Chunk reviews are collected in input order regardless of `concurrency`. A single
/// chunk's review is returned verbatim; several are merged by one more model call.
pub async fn synthesize_review(
    llm: &dyn LanguageModel,
    review_type: ReviewType,
    chunks: &[String],
    concurrency: usize,
) -> Result<String> {
    if chunks.is_empty() {
        bail!("Nothing to review");
    }
    let system = system_prompt(review_type);
    let total = chunks.len();
    let requests: Vec<BoxFuture<'_, Result<String>>> = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let system = system.clone();
            let prompt = chunk_prompt(chunk, index, total);
            async move {
                llm.complete(&system, &prompt)
                    .await
                    .with_context(|| format!("Failed to review chunk {} of {}", index + 1, total))
            }
            .boxed()
        })
        .collect();
    let mut reviews = stream::iter(requests)
        .buffered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;
    tracing::debug!("Reviewed {} chunk(s) with {}", total, llm.name());
    if reviews.len() == 1 {
        return Ok(reviews.swap_remove(0));
    }
    llm.complete(SYNTHESIS_SYSTEM_PROMPT, &synthesis_prompt(&reviews))
        .await
        .context("Failed to synthesize chunk reviews")
}
