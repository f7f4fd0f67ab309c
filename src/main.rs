use feedback_api::app::build_router;
use feedback_api::config::Config;
use feedback_api::db::Database;
use feedback_api::db_storage::PgStore;
use feedback_api::handlers::AppState;
use feedback_api::object_store::{AudioStore, HttpObjectStore};
use feedback_api::services::OpenAiClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Longest we wait for in-flight enrichment jobs after the listener closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool (running
/// migrations), the provider client and the optional audio store, then
/// serves HTTP until Ctrl-C or SIGTERM and drains the enrichment runner.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedback_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let provider = Arc::new(OpenAiClient::new(&config)?);
    tracing::info!(
        "✓ Provider client initialized: {} / {}",
        config.analysis_model,
        config.transcription_model
    );

    let audio_store: Option<Arc<dyn AudioStore>> =
        match (&config.storage_url, &config.storage_service_key) {
            (Some(url), Some(key)) => {
                let store =
                    HttpObjectStore::new(url.clone(), key.clone(), config.storage_bucket.clone())?;
                tracing::info!("✓ Audio storage initialized: bucket {}", config.storage_bucket);
                Some(Arc::new(store) as Arc<dyn AudioStore>)
            }
            _ => None,
        };

    let state = Arc::new(AppState::new(
        Arc::new(PgStore::new(db.pool.clone())),
        provider.clone(),
        provider,
        audio_store,
        config.enrichment_timeout(),
        config.survey_cache_ttl(),
    ));
    let runner = state.runner.clone();

    let app = build_router(state)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Listener closed, draining enrichment jobs");
    match tokio::time::timeout(DRAIN_TIMEOUT, runner.wait_idle()).await {
        Ok(()) => tracing::info!("✓ Enrichment runner idle: {:?}", runner.stats()),
        Err(_) => tracing::warn!(
            "Shutdown with {} enrichment jobs still running",
            runner.stats().in_flight
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
