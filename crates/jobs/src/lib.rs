pub mod dispatch;
mod jobs;
pub mod local;
pub mod message;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod trigger;
pub mod verify;

use std::sync::Arc;

pub use dispatch::{Broker, JobDispatcher, create_broker};
pub use jobs::process_review_job;
pub use message::ReviewJob;
use reviewbot_core::config::ReviewConfig;
use reviewbot_db::Database;
use reviewbot_github::SourceControl;
use reviewbot_review::LanguageModel;
pub use trigger::{Enqueued, enqueue_review};
pub use verify::JobVerifier;

/// Shared context available to the review worker.
#[derive(Clone)]
pub struct JobContext {
    pub db: Arc<Database>,
    pub github: Arc<dyn SourceControl>,
    pub llm: Arc<dyn LanguageModel>,
    pub review: Arc<ReviewConfig>,
}
