// src/main.rs

use std::sync::Arc;

use exam_gate::client::LmsClient;
use exam_gate::config::Config;
use exam_gate::routes;
use exam_gate::session::{ExamSession, SessionSettings};
use exam_gate::state::AppState;
use exam_gate::timer::SystemClock;
use exam_gate::worker::HttpWorkerChannel;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env included)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily("logs", "exam-gate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!("Using LMS at {}", config.lms_base_url);

    let api = Arc::new(LmsClient::new(
        config.lms_base_url.clone(),
        config.lms_auth_token.clone(),
    ));
    let session = ExamSession::new(
        api,
        Arc::new(HttpWorkerChannel::default()),
        Arc::new(SystemClock),
        SessionSettings::from(&config),
    );

    // Create AppState
    let state = AppState {
        session,
        config: config.clone(),
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = match tokio::net::TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {}", config.listen_addr);

    // Start the server
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
