//! LesionScope: skin-lesion classification service
//!
//! Main entry point for the HTTP server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lesionscope::adapters::sanitize::SanitizingMakeWriter;
use lesionscope::adapters::tract::InputDims;
use lesionscope::adapters::{OnnxClassifier, SqliteStore};
use lesionscope::api::{self, ApiSettings, AppContext};
use lesionscope::config::ServerConfig;
use lesionscope::ports::LesionClassifier;
use lesionscope::PreprocessArtifact;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env().context("Invalid configuration")?;

    // Log output always passes through the sanitizer, whichever sink is used.
    let (writer, _guard) = match config.log.target_file() {
        Some(log_file) => {
            if let Some(parent) = log_file.parent() {
                // Best-effort: the open below reports the real failure.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .with_context(|| format!("Failed to open log file {log_file:?}"))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    tracing::info!("Starting LesionScope...");

    // A missing model or artifact leaves the service up but degraded.
    let artifact = match PreprocessArtifact::load(&config.artifact_path) {
        Ok(artifact) => {
            tracing::info!(
                "Preprocessing artifact loaded: {} classes, image size {:?}",
                artifact.num_classes(),
                artifact.img_size
            );
            Some(Arc::new(artifact))
        }
        Err(e) => {
            tracing::error!(
                "Preprocessing artifact failed to load from {:?}: {e}",
                config.artifact_path
            );
            None
        }
    };

    // Input sizes come from the artifact; without it the plan keeps the
    // model's declared facts.
    let dims = artifact.as_deref().map(InputDims::from);
    let classifier: Option<Arc<dyn LesionClassifier>> =
        match OnnxClassifier::load(&config.model_dir, config.require_manifest, dims.as_ref()) {
            Ok(classifier) => {
                tracing::info!("Model loaded: {}", classifier.describe());
                Some(Arc::new(classifier))
            }
            Err(e) => {
                tracing::error!("Model failed to load from {:?}: {e}", config.model_dir);
                None
            }
        };

    let store = SqliteStore::new(&config.db_path, config.db_pool_size)
        .with_context(|| format!("Failed to open database {:?}", config.db_path))?;
    tracing::info!("Database ready at {:?}", config.db_path);

    let ctx = Arc::new(AppContext::new(
        classifier,
        artifact,
        Arc::new(store),
        ApiSettings::from(&config),
    ));
    let app = api::router(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("LesionScope shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
