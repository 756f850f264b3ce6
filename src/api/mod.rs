//! HTTP surface: axum router over an immutable application context.

mod error;
mod handlers;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::SqliteStore;
use crate::application::{ImageLimits, InferenceService, RecordsService};
use crate::config::ServerConfig;
use crate::domain::PreprocessArtifact;
use crate::ports::LesionClassifier;

pub use error::ApiError;
pub use worker::{run_blocking, InferenceWorker};

/// Request-handling limits.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub inference_timeout: Duration,
    pub max_concurrent_inferences: usize,
    pub static_dir: PathBuf,
}

impl From<&ServerConfig> for ApiSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            max_image_dimension: config.max_image_dimension,
            inference_timeout: config.inference_timeout,
            max_concurrent_inferences: config.max_concurrent_inferences,
            static_dir: config.static_dir.clone(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Everything a request needs, built once at startup and never mutated.
///
/// The classifier and artifact are optional so the service can start and
/// report itself degraded when either fails to load.
pub struct AppContext {
    classifier: Option<Arc<dyn LesionClassifier>>,
    artifact: Option<Arc<PreprocessArtifact>>,
    inference: Option<Arc<InferenceService<dyn LesionClassifier>>>,
    records: RecordsService<SqliteStore>,
    worker: InferenceWorker,
    settings: ApiSettings,
}

impl AppContext {
    pub fn new(
        classifier: Option<Arc<dyn LesionClassifier>>,
        artifact: Option<Arc<PreprocessArtifact>>,
        store: Arc<SqliteStore>,
        settings: ApiSettings,
    ) -> Self {
        let inference = match (&classifier, &artifact) {
            (Some(classifier), Some(artifact)) => Some(Arc::new(InferenceService::new(
                Arc::clone(classifier),
                Arc::clone(artifact),
                ImageLimits::for_dimension(settings.max_image_dimension),
            ))),
            _ => None,
        };

        Self {
            classifier,
            artifact,
            inference,
            records: RecordsService::new(store),
            worker: InferenceWorker::new(settings.max_concurrent_inferences, settings.inference_timeout),
            settings,
        }
    }

    #[must_use]
    pub fn model_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    #[must_use]
    pub fn artifacts_loaded(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Build the application router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.settings.max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/predict", post(handlers::predict))
        .route("/api/health", get(handlers::health))
        .route("/api/model/info", get(handlers::model_info))
        .route("/api/anatomic-sites", get(handlers::anatomic_sites))
        .route("/api/disease-classes", get(handlers::disease_classes))
        .route("/api/login", post(handlers::login))
        .route("/api/save-analysis", post(handlers::save_analysis))
        .route("/api/search-patients", get(handlers::search_patients))
        .route("/api/patient-history/:ci", get(handlers::patient_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
