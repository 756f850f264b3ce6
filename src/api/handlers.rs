//! Request handlers.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::ApiError;
use super::worker::run_blocking;
use super::AppContext;
use crate::application::records::{PatientHistoryView, SaveAnalysisResponse};
use crate::application::{AuthenticatedUser, SaveAnalysisRequest};
use crate::domain::prediction::{disease_name, is_malignant};
use crate::domain::{PatientMetadata, PatientSummary, PredictionResult, PreprocessArtifact};
use crate::LesionError;

type Ctx = State<Arc<AppContext>>;

const FRONTEND_MISSING: &str = "<h3>Frontend not available</h3>";

/// Fields collected from the `/predict` multipart body.
#[derive(Default)]
struct PredictForm {
    file: Option<Vec<u8>>,
    age: Option<String>,
    sex: Option<String>,
    site: Option<String>,
}

impl PredictForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("file") => form.file = Some(field.bytes().await?.to_vec()),
                Some("age") => form.age = Some(field.text().await?),
                Some("sex") => form.sex = Some(field.text().await?),
                Some("site") => form.site = Some(field.text().await?),
                // Unknown fields are drained and ignored.
                _ => {
                    field.bytes().await?;
                }
            }
        }
        Ok(form)
    }

    fn into_parts(self) -> Result<(Vec<u8>, PatientMetadata), ApiError> {
        let missing = |name: &str| ApiError::bad_request(format!("Missing form field '{name}'"));

        let file = self.file.filter(|f| !f.is_empty()).ok_or_else(|| missing("file"))?;
        let age_raw = self.age.ok_or_else(|| missing("age"))?;
        let age = age_raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ApiError::bad_request(format!("Age must be an integer, got {age_raw:?}")))?;
        let sex = self.sex.ok_or_else(|| missing("sex"))?;
        let site = self.site.ok_or_else(|| missing("site"))?;

        Ok((file, PatientMetadata::new(age, sex, site)))
    }
}

/// `POST /predict`
pub async fn predict(
    State(ctx): Ctx,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Some(service) = ctx.inference.clone() else {
        return Err(LesionError::ModelNotLoaded(
            "model or preprocessing artifact failed to load at startup".into(),
        )
        .into());
    };

    let mut multipart =
        multipart.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (bytes, metadata) = PredictForm::read(&mut multipart).await?.into_parts()?;
    tracing::debug!("Received {} byte upload", bytes.len());

    let result = ctx
        .worker
        .run(move || service.predict(&bytes, &metadata))
        .await?;
    Ok(Json(result))
}

/// `GET /api/health`
pub async fn health(State(ctx): Ctx) -> Response {
    let healthy = ctx.model_loaded() && ctx.artifacts_loaded();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "model_loaded": ctx.model_loaded(),
        "artifacts_loaded": ctx.artifacts_loaded(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body)).into_response()
}

fn loaded_artifact(ctx: &AppContext) -> Result<&PreprocessArtifact, ApiError> {
    ctx.artifact.as_deref().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Preprocessing artifact not loaded",
        )
    })
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub image_size: [u32; 2],
    pub num_classes: usize,
    pub classes: Vec<String>,
    pub sex_categories: Vec<String>,
    pub anatomic_sites: Vec<String>,
}

/// `GET /api/model/info`
pub async fn model_info(State(ctx): Ctx) -> Result<Json<ModelInfo>, ApiError> {
    let classifier = ctx.classifier.as_ref().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Model not loaded")
    })?;
    let artifact = loaded_artifact(&ctx)?;

    Ok(Json(ModelInfo {
        model: classifier.describe(),
        image_size: artifact.img_size,
        num_classes: artifact.num_classes(),
        classes: artifact.class_codes(),
        sex_categories: artifact.sex_categories.clone(),
        anatomic_sites: artifact.known_sites(),
    }))
}

/// `GET /api/anatomic-sites`
pub async fn anatomic_sites(State(ctx): Ctx) -> Result<Json<serde_json::Value>, ApiError> {
    let artifact = loaded_artifact(&ctx)?;
    Ok(Json(json!({ "sites": artifact.known_sites() })))
}

#[derive(Debug, Serialize)]
pub struct DiseaseClass {
    pub code: String,
    pub name: String,
    pub malignant: bool,
}

/// `GET /api/disease-classes`
pub async fn disease_classes(State(ctx): Ctx) -> Result<Json<Vec<DiseaseClass>>, ApiError> {
    let artifact = loaded_artifact(&ctx)?;
    let classes = artifact
        .class_codes()
        .into_iter()
        .map(|code| DiseaseClass {
            name: disease_name(&code).to_string(),
            malignant: is_malignant(&code),
            code,
        })
        .collect();
    Ok(Json(classes))
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: AuthenticatedUser,
}

/// `POST /api/login`
pub async fn login(
    State(ctx): Ctx,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = body?;
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let records = ctx.records.clone();
    let user = run_blocking(move || records.authenticate(&request.username, &request.password))
        .await?;

    Ok(Json(LoginResponse {
        success: true,
        user,
    }))
}

/// `POST /api/save-analysis`
pub async fn save_analysis(
    State(ctx): Ctx,
    body: Result<Json<SaveAnalysisRequest>, JsonRejection>,
) -> Result<Json<SaveAnalysisResponse>, ApiError> {
    let Json(request) = body?;
    let records = ctx.records.clone();
    let response = run_blocking(move || records.save_analysis(request)).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    ci: String,
    user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<PatientSummary>,
}

/// `GET /api/search-patients?ci=&user_id=`
pub async fn search_patients(
    State(ctx): Ctx,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(query) = query?;
    let records = ctx.records.clone();
    let results = run_blocking(move || records.search_patients(&query.ci, query.user_id)).await?;
    Ok(Json(SearchResponse {
        success: true,
        results,
    }))
}

/// `GET /api/patient-history/:ci`
pub async fn patient_history(
    State(ctx): Ctx,
    ci: Result<Path<String>, PathRejection>,
) -> Result<Json<PatientHistoryView>, ApiError> {
    let Path(ci) = ci?;
    let records = ctx.records.clone();
    let view = run_blocking(move || records.patient_history(&ci)).await?;
    Ok(Json(view))
}

/// `GET /`
pub async fn index(State(ctx): Ctx) -> Html<String> {
    let path = ctx.settings.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html),
        Err(e) => {
            tracing::debug!("Frontend not served from {:?}: {e}", path);
            Html(FRONTEND_MISSING.to_string())
        }
    }
}
