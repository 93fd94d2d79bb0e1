//! Eagle Eye - exam supervision server
//!
//! Main entry point.

use eagle_eye::{
    capture::FfmpegSource,
    detectors::{audio::FfmpegAudioSource, null, AudioSource},
    realtime_hub::RealtimeHub,
    session_manager::SessionManager,
    session_worker::WorkerDeps,
    state::{AppConfig, AppState},
    violation_ledger::{self, EvidenceStore, ViolationLedger},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eagle_eye=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Eagle Eye v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        evidence_dir = %config.evidence_dir.display(),
        attendance_dir = %config.attendance_dir.display(),
        capture_input = %config.capture_input,
        frame_interval_ms = config.frame_interval_ms,
        alert_cooldown_sec = config.alert_cooldown_sec,
        admin_enabled = config.admin_token.is_some(),
        "Configuration loaded"
    );

    // Database + ledger
    let pool = violation_ledger::open_pool(&config.database_url).await?;
    let ledger = Arc::new(ViolationLedger::new(pool.clone()));
    ledger.init_schema().await?;
    tracing::info!("Violation ledger ready");

    tokio::fs::create_dir_all(&config.evidence_dir).await?;
    tokio::fs::create_dir_all(&config.attendance_dir).await?;

    // No perception backend ships with the server; detectors report nothing
    tracing::warn!("Using null detectors; plug in real adapters for live supervision");

    let audio: Arc<dyn AudioSource> = match config.audio_config() {
        Some(audio_config) => {
            tracing::info!(input = %audio_config.input, "Audio monitoring enabled");
            Arc::new(FfmpegAudioSource::new(audio_config))
        }
        None => Arc::new(null::NullDetector),
    };

    let deps = WorkerDeps {
        capture: Arc::new(FfmpegSource::new(config.ffmpeg_config())),
        detectors: null::detectors(),
        audio,
        ledger,
        evidence: Arc::new(EvidenceStore::new(config.evidence_dir.clone())),
        hub: Arc::new(RealtimeHub::new()),
        attendance_dir: config.attendance_dir.clone(),
        config: config.worker_config(),
    };
    let sessions = Arc::new(SessionManager::new(Arc::new(deps)));

    let state = AppState {
        pool,
        config: config.clone(),
        sessions: sessions.clone(),
        started_at: chrono::Utc::now(),
    };

    let mut app = web_api::create_router(state);
    if let Some(static_dir) = &config.static_dir {
        let serve_dir = ServeDir::new(static_dir)
            .not_found_service(ServeFile::new(static_dir.join("index.html")));
        app = app.fallback_service(serve_dir);
        tracing::info!(static_dir = %static_dir.display(), "Static file serving enabled");
    }
    let app = app
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping sessions");
    sessions.shutdown_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
