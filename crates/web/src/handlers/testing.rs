//! Router harness backed by in-memory fakes.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use reviewbot_core::config::Config;
use reviewbot_db::Database;
use reviewbot_github::{testing::FakeSourceControl, webhook};
use reviewbot_jobs::{JobVerifier, testing::RecordingDispatcher, verify};
use reviewbot_review::{LanguageModel, Providers, testing::ScriptedModel};
use serde_json::Value;
use tower::ServiceExt;

use crate::{AppState, app, job_destination};

pub const WEBHOOK_SECRET: &str = "It's a Secret to Everybody";
pub const CURRENT_KEY: &str = "sig_current";
pub const NEXT_KEY: &str = "sig_next";

const CONFIG: &str = r#"
server:
  port: 3000
  public_url: https://reviews.example.com
db:
  url: "sqlite::memory:"
github:
  app:
    id: 1234
    webhook_secret: "It's a Secret to Everybody"
    private_key: unused
openai:
  api_key: sk-test
broker:
  kind: local
  current_signing_key: sig_current
  next_signing_key: sig_next
"#;

pub struct TestApp {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub github: Arc<FakeSourceControl>,
    /// The OpenAI slot, also used for pull request reviews.
    pub llm: Arc<ScriptedModel>,
    pub anthropic: Arc<ScriptedModel>,
    pub dispatcher: Arc<RecordingDispatcher>,
    router: Router,
}

impl TestApp {
    pub async fn new(github: FakeSourceControl) -> Self { Self::build(github, true).await }

    pub async fn without_anthropic(github: FakeSourceControl) -> Self {
        Self::build(github, false).await
    }

    async fn build(github: FakeSourceControl, with_anthropic: bool) -> Self {
        let config: Arc<Config> = Arc::new(serde_yaml::from_str(CONFIG).unwrap());
        let db = Arc::new(Database::in_memory().await.unwrap());
        let github = Arc::new(github);
        let llm = Arc::new(ScriptedModel::echo());
        let anthropic = Arc::new(ScriptedModel::echo());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let providers = Providers::new(
            llm.clone(),
            with_anthropic.then(|| anthropic.clone() as Arc<dyn LanguageModel>),
        );
        let state = AppState {
            config: config.clone(),
            db: db.clone(),
            github: github.clone(),
            llm: llm.clone(),
            providers: Arc::new(providers),
            dispatcher: dispatcher.clone(),
            verifier: Arc::new(JobVerifier::new(&config.broker, job_destination(&config))),
            review: Arc::new(config.review.clone()),
        };
        Self { config, db, github, llm, anthropic, dispatcher, router: app(state) }
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and decode the JSON response body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.request(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        if bytes.is_empty() {
            return (status, Value::Null);
        }
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// A webhook delivery signed with the app's secret.
    pub fn webhook(&self, event: &str, body: &Value) -> Request<Body> {
        let body = body.to_string();
        let signature = webhook::sign(WEBHOOK_SECRET.as_bytes(), body.as_bytes());
        Request::post("/api/webhook/github")
            .header(header::CONTENT_TYPE, "application/json")
            .header(webhook::EVENT_HEADER, event)
            .header(webhook::DELIVERY_HEADER, "72d3162e-cc78-11e3-81ab-4c9367dc0958")
            .header(webhook::SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap()
    }

    /// A broker delivery of `body` signed with `key`.
    pub fn delivery(&self, key: &str, body: &Value) -> Request<Body> {
        let body = body.to_string();
        let destination = job_destination(&self.config);
        let signature = verify::sign_delivery(key, &destination, body.as_bytes()).unwrap();
        Request::post("/api/jobs/review-pr")
            .header(header::CONTENT_TYPE, "application/json")
            .header(verify::SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap()
    }
}
