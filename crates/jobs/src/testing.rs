//! Recording [`JobDispatcher`] for tests in this and dependent crates.

use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::{dispatch::JobDispatcher, message::ReviewJob};

#[derive(Default)]
pub struct RecordingDispatcher {
    fail: bool,
    jobs: Mutex<Vec<ReviewJob>>,
}

impl RecordingDispatcher {
    pub fn failing() -> Self { Self { fail: true, ..Default::default() } }

    pub fn jobs(&self) -> Vec<ReviewJob> { self.jobs.lock().unwrap().clone() }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job: &ReviewJob) -> Result<()> {
        if self.fail {
            bail!("broker unavailable");
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}
