use reviewbot_core::util::truncate_chars;

pub const NO_REVIEWABLE_FILES: &str = "No reviewable source files changed.";

/// Body of the advisory review posted on the pull request.
pub fn review_body(review: &str, files_reviewed: usize, model: &str) -> String {
    format!(
        "## AI Code Review 🤖\n\n{review}\n\n---\n*Reviewed {files_reviewed} file(s) · Powered by {model}*"
    )
}

pub fn too_large_body(count: usize) -> String {
    format!(
        "## AI Code Review\n\n⚠️ This PR has too many changed files ({count}+) for automated \
         review. Consider breaking it into smaller PRs."
    )
}

pub fn too_large_summary(count: usize) -> String {
    format!("PR has {count}+ changed files — too large for automated review.")
}

/// Stored preview of a review.
pub fn summarize(review: &str, max_chars: usize) -> String { truncate_chars(review, max_chars) }
