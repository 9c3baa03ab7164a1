mod handlers;

use std::{
    env,
    fs::File,
    io::BufReader,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{HeaderName, Request, header},
};
use reviewbot_core::{
    config::{Config, ReviewConfig},
    util::UrlExt,
};
use reviewbot_db::Database;
use reviewbot_github::{GitHub, SourceControl};
use reviewbot_jobs::{Broker, JobContext, JobDispatcher, JobVerifier, create_broker};
use reviewbot_review::{LanguageModel, Providers, anthropic::Anthropic, openai::OpenAi};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::{JOB_ROUTE, build_router};

const CONFIG_ENV: &str = "REVIEWBOT_CONFIG";

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    db: Arc<Database>,
    github: Arc<dyn SourceControl>,
    llm: Arc<dyn LanguageModel>,
    providers: Arc<Providers>,
    dispatcher: Arc<dyn JobDispatcher>,
    verifier: Arc<JobVerifier>,
    review: Arc<ReviewConfig>,
}

impl FromRef<AppState> for JobContext {
    fn from_ref(state: &AppState) -> Self {
        JobContext {
            db: state.db.clone(),
            github: state.github.clone(),
            llm: state.llm.clone(),
            review: state.review.clone(),
        }
    }
}

/// URL the broker delivers review jobs to.
fn job_destination(config: &Config) -> String {
    config.server.public_url.with_path(JOB_ROUTE).to_string()
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config: Arc<Config> = {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yml".to_string());
        let file = BufReader::new(File::open(&path).expect("Failed to open config file"));
        serde_yaml::from_reader(file).expect("Failed to parse config file")
    };
    let db = Arc::new(Database::new(&config.db).await.expect("Failed to open database"));
    let github = GitHub::new(&config.github).await.expect("Failed to create GitHub client");
    let llm: Arc<dyn LanguageModel> = Arc::new(OpenAi::new(&config.openai));
    tracing::info!("Reviewing with {}", llm.name());
    let client = reqwest::Client::new();
    let anthropic = config.anthropic.as_ref().map(|anthropic| {
        let model: Arc<dyn LanguageModel> = Arc::new(Anthropic::new(anthropic, client.clone()));
        tracing::info!("Snippet reviews can also use {}", model.name());
        model
    });
    let providers = Providers::new(llm.clone(), anthropic);

    let destination = job_destination(&config);
    let Broker { dispatcher, monitor } = create_broker(&config.broker, &destination, client)
        .await
        .expect("Failed to create job broker");
    tracing::info!("Jobs: {:?} broker delivering to {}", config.broker.kind, destination);
    let verifier = JobVerifier::new(&config.broker, destination);

    let state = AppState {
        config: config.clone(),
        db: db.clone(),
        github,
        llm,
        providers: Arc::new(providers),
        dispatcher,
        verifier: Arc::new(verifier),
        review: Arc::new(config.review.clone()),
    };

    let port = config.server.port;
    let router = app(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Web server: Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.expect("bind error");

    // Run both the web server and job monitor concurrently, with graceful shutdown
    let web_server = async {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Web server error");
        tracing::info!("Web server stopped");
        result
    };
    let job_monitor = async {
        let Some(monitor) = monitor else {
            return Ok(());
        };
        let result =
            monitor.run_with_signal(shutdown_signal_io()).await.context("Job monitor error");
        tracing::info!("Job monitor stopped");
        result
    };
    if let Err(e) = tokio::try_join!(web_server, job_monitor) {
        tracing::error!("{e}");
    }

    db.close().await;
    tracing::info!("Shut down gracefully");
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> = vec![
        header::AUTHORIZATION,
        header::COOKIE,
        HeaderName::from_static("x-hub-signature-256"),
        HeaderName::from_static("upstash-signature"),
    ]
    .into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .sensitive_response_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(MyMakeSpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(NormalizePathLayer::trim_trailing_slash())
        .compression();
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() { shutdown_signal_io().await.unwrap() }

/// Shutdown signal that returns io::Result for apalis compatibility.
async fn shutdown_signal_io() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

#[derive(Debug, Clone)]
pub struct MyMakeSpan {
    level: Level,
}

impl<B> MakeSpan<B> for MyMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let cf_connecting_ip = request.headers().get("CF-Connecting-IP");
        let ip = if let Some(v) = cf_connecting_ip {
            str::from_utf8(v.as_bytes()).ok().and_then(|s| IpAddr::from_str(s).ok())
        } else if let Some(ConnectInfo(socket_addr)) =
            request.extensions().get::<ConnectInfo<SocketAddr>>()
        {
            Some(socket_addr.ip())
        } else {
            None
        };
        let ip = ip.unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]");
        let delivery = request
            .headers()
            .get("X-GitHub-Delivery")
            .or_else(|| request.headers().get("Upstash-Message-Id"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    user_agent = %user_agent,
                    delivery = %delivery,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
