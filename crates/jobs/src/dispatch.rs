use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use apalis::prelude::Monitor;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reviewbot_core::config::{BrokerConfig, BrokerKind};
use serde::Deserialize;

use crate::{
    local::{Delivery, LocalDispatcher, create_monitor, setup_storage},
    message::ReviewJob,
};

/// Hands review jobs to a broker for at-least-once delivery to the worker endpoint.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &ReviewJob) -> Result<()>;
}

/// The configured broker: a dispatcher for request handlers, plus the delivery worker when
/// jobs are delivered in-process.
pub struct Broker {
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub monitor: Option<Monitor>,
}

pub async fn create_broker(
    config: &BrokerConfig,
    destination: &str,
    client: reqwest::Client,
) -> Result<Broker> {
    Ok(match config.kind {
        BrokerKind::Qstash => Broker {
            dispatcher: Arc::new(QstashDispatcher::new(config, destination, client)?),
            monitor: None,
        },
        BrokerKind::Local => {
            let storage = setup_storage(&config.local.jobs_url).await?;
            let delivery = Delivery::new(config, destination, client);
            Broker {
                dispatcher: Arc::new(LocalDispatcher::new(storage.clone())),
                monitor: Some(create_monitor(storage, delivery, config)?),
            }
        }
    })
}

/// Publishes jobs through QStash's HTTP API.
pub struct QstashDispatcher {
    client: reqwest::Client,
    publish_url: String,
    token: String,
    retries: u32,
}

impl QstashDispatcher {
    pub fn new(config: &BrokerConfig, destination: &str, client: reqwest::Client) -> Result<Self> {
        let qstash = config
            .qstash
            .as_ref()
            .context("broker.qstash must be configured when broker.kind is qstash")?;
        Ok(Self {
            client,
            publish_url: format!(
                "{}/v2/publish/{}",
                qstash.url.as_str().trim_end_matches('/'),
                destination
            ),
            token: qstash.token.clone(),
            retries: config.retries,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

#[async_trait]
impl JobDispatcher for QstashDispatcher {
    async fn dispatch(&self, job: &ReviewJob) -> Result<()> {
        let response = self
            .client
            .post(&self.publish_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header("Upstash-Retries", self.retries.to_string())
            .json(job)
            .send()
            .await
            .context("Failed to publish review job")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Broker rejected review job with {status}: {body}"));
        }
        let published: PublishResponse =
            response.json().await.context("Failed to parse broker response")?;
        tracing::info!("Published review {} as message {}", job.review_id, published.message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode, Uri},
        routing::post,
    };
    use reviewbot_core::config::{BrokerConfig, BrokerKind, QstashConfig};
    use url::Url;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(String, HeaderMap, Bytes)>>>,
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn job() -> ReviewJob {
        ReviewJob {
            review_id: 5,
            github_installation_id: 42,
            repo_owner: "octo-org".to_string(),
            repo_name: "widgets".to_string(),
            pr_number: 7,
            head_sha: "abc123".to_string(),
        }
    }

    fn broker_config(kind: BrokerKind, qstash_url: Option<&str>) -> BrokerConfig {
        BrokerConfig {
            kind,
            qstash: qstash_url.map(|url| QstashConfig {
                url: Url::parse(url).unwrap(),
                token: "qstash-token".to_string(),
            }),
            current_signing_key: "sig_current".to_string(),
            next_signing_key: "sig_next".to_string(),
            retries: 2,
            local: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_qstash_publish() {
        let captured = Captured::default();
        async fn publish(
            State(c): State<Captured>,
            uri: Uri,
            headers: HeaderMap,
            body: Bytes,
        ) -> axum::Json<serde_json::Value> {
            c.requests.lock().unwrap().push((uri.path().to_string(), headers, body));
            axum::Json(serde_json::json!({ "messageId": "msg_1" }))
        }
        let router = Router::new()
            .route("/v2/publish/{*destination}", post(publish))
            .with_state(captured.clone());
        let base = serve(router).await;
        let destination = "https://reviews.example.com/api/jobs/review-pr";
        let config = broker_config(BrokerKind::Qstash, Some(&base));
        let broker = create_broker(&config, destination, reqwest::Client::new()).await.unwrap();
        assert!(broker.monitor.is_none());
        broker.dispatcher.dispatch(&job()).await.unwrap();

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (path, headers, body) = &requests[0];
        assert_eq!(path, &format!("/v2/publish/{destination}"));
        assert_eq!(headers["authorization"], "Bearer qstash-token");
        assert_eq!(headers["upstash-retries"], "2");
        let sent: ReviewJob = serde_json::from_slice(body).unwrap();
        assert_eq!(sent, job());
    }

    #[tokio::test]
    async fn test_qstash_rejection() {
        let router = Router::new()
            .route("/v2/publish/{*destination}", post(|| async { StatusCode::UNAUTHORIZED }));
        let base = serve(router).await;
        let config = broker_config(BrokerKind::Qstash, Some(&base));
        let dispatcher =
            QstashDispatcher::new(&config, "https://x.example.com/", reqwest::Client::new())
                .unwrap();
        let err = dispatcher.dispatch(&job()).await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
    }

    #[tokio::test]
    async fn test_qstash_requires_config() {
        let config = broker_config(BrokerKind::Qstash, None);
        let result =
            create_broker(&config, "https://x.example.com/", reqwest::Client::new()).await;
        assert!(result.is_err());
    }
}
