//! In-process broker for running without QStash.
//!
//! Jobs wait in a SQLite queue until a worker delivers them to the job endpoint, signed
//! the way QStash signs them. Undelivered jobs survive a restart.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use apalis::{
    layers::retry::{
        HasherRng, RetryPolicy,
        backoff::{ExponentialBackoffMaker, MakeBackoff},
    },
    prelude::*,
};
use apalis_codec::json::JsonCodec;
use apalis_sqlite::{CompactType, SqliteStorage, fetcher::SqliteFetcher};
use async_trait::async_trait;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use reviewbot_core::config::BrokerConfig;
use sqlx::{Sqlite, migrate::MigrateDatabase, sqlite::SqlitePool};

use crate::{
    dispatch::JobDispatcher,
    message::ReviewJob,
    verify::{SIGNATURE_HEADER, sign_delivery},
};

/// Type alias for the default codec used by SqliteStorage.
type DefaultCodec = JsonCodec<CompactType>;

/// Queue of review jobs awaiting delivery.
pub type DeliveryStorage = SqliteStorage<ReviewJob, DefaultCodec, SqliteFetcher>;

/// Open (creating if needed) the job queue database.
pub async fn setup_storage(jobs_url: &str) -> Result<DeliveryStorage> {
    if !Sqlite::database_exists(jobs_url).await.unwrap_or(false) {
        tracing::info!(url = %jobs_url, "Creating database");
        Sqlite::create_database(jobs_url).await.context("Failed to create database")?;
        tracing::info!("Database created");
    }
    let pool = SqlitePool::connect(jobs_url).await.context("Failed to connect to database")?;
    SqliteStorage::setup(&pool).await.context("Failed to set up job storage")?;
    let poll = StrategyBuilder::new()
        .apply(
            IntervalStrategy::new(Duration::from_millis(100))
                .with_backoff(BackoffConfig::new(Duration::from_secs(1))),
        )
        .build();
    let config =
        apalis_sqlite::Config::new(std::any::type_name::<ReviewJob>()).with_poll_interval(poll);
    Ok(SqliteStorage::new_with_config(&pool, &config))
}

/// Queues jobs for the delivery worker started by [`create_monitor`].
pub struct LocalDispatcher {
    storage: DeliveryStorage,
}

impl LocalDispatcher {
    pub fn new(storage: DeliveryStorage) -> Self { Self { storage } }
}

#[async_trait]
impl JobDispatcher for LocalDispatcher {
    async fn dispatch(&self, job: &ReviewJob) -> Result<()> {
        let mut storage = self.storage.clone();
        storage.push(job.clone()).await.context("Failed to enqueue review job")?;
        tracing::info!("Queued review {} for local delivery", job.review_id);
        Ok(())
    }
}

/// Where and how the worker delivers jobs.
#[derive(Clone)]
pub struct Delivery {
    client: reqwest::Client,
    destination: String,
    signing_key: String,
}

impl Delivery {
    pub fn new(config: &BrokerConfig, destination: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            destination: destination.to_string(),
            signing_key: config.current_signing_key.clone(),
        }
    }

    async fn send(&self, job: &ReviewJob) -> Result<(StatusCode, String)> {
        let body = serde_json::to_vec(job)?;
        let signature = sign_delivery(&self.signing_key, &self.destination, &body)?;
        let response = self
            .client
            .post(&self.destination)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to deliver review {}", job.review_id))?;
        let status = response.status();
        Ok((status, response.text().await.unwrap_or_default()))
    }
}

/// The job endpoint rejected the delivery outright; retrying cannot help.
fn is_final_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND)
}

/// Deliver one queued job. Errors are retried by the worker's retry policy.
pub async fn deliver_review_job(
    job: ReviewJob,
    delivery: Data<Delivery>,
) -> Result<(), BoxDynError> {
    let (status, body) = delivery.send(&job).await?;
    if status.is_success() {
        tracing::debug!("Delivered review {} ({})", job.review_id, status);
        return Ok(());
    }
    let err = anyhow!("Delivery of review {} failed with {}: {}", job.review_id, status, body);
    if is_final_rejection(status) {
        tracing::error!("{:#}, not retrying", err);
        return Err(Box::new(AbortError::new(err)));
    }
    tracing::warn!("{:#}", err);
    Err(err.into())
}

/// Create the job monitor running the delivery worker.
pub fn create_monitor(
    storage: DeliveryStorage,
    delivery: Delivery,
    config: &BrokerConfig,
) -> Result<Monitor> {
    let backoff = ExponentialBackoffMaker::new(
        Duration::from_secs(1),
        Duration::from_secs(120),
        1.25,
        HasherRng::default(),
    )
    .context("Invalid delivery backoff")?
    .make_backoff();
    let retry_policy = RetryPolicy::retries(config.retries as usize)
        .with_backoff(backoff)
        .retry_if(|e: &BoxDynError| e.downcast_ref::<AbortError>().is_none());
    let concurrency = config.local.concurrency.max(1);

    Ok(Monitor::new()
        .register(move |_| {
            WorkerBuilder::new("review-delivery-worker")
                .backend(storage.clone())
                .retry(retry_policy.clone())
                .enable_tracing()
                .catch_panic()
                .concurrency(concurrency)
                .data(delivery.clone())
                .build(deliver_review_job)
        })
        .shutdown_timeout(Duration::from_secs(30)))
}
