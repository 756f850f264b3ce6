//! End-to-end tests for the HTTP surface, run against the real router with
//! a fixed-output classifier and an in-memory database.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use lesionscope::adapters::SqliteStore;
use lesionscope::api::{self, ApiSettings, AppContext};
use lesionscope::domain::password::hash_password;
use lesionscope::domain::{EncodedMetadata, ImageTensor};
use lesionscope::ports::{ClassifierError, LesionClassifier, RecordStore};
use lesionscope::PreprocessArtifact;

const ARTIFACT: &str = r#"{
    "img_size": [224, 224],
    "sex_categories": ["female", "male", "unknown"],
    "site2idx": {
        "anterior torso": 0,
        "head/neck": 1,
        "lower extremity": 2,
        "upper extremity": 3,
        "unknown": 4
    },
    "age_normalization": {"kind": "zscore", "mean": 50.0, "std": 20.0},
    "idx2class": {"0": "MEL", "1": "NV", "2": "BCC", "3": "BKL"}
}"#;

const BOUNDARY: &str = "lesionscope-test-boundary";

struct FixedClassifier(Vec<f64>);

impl LesionClassifier for FixedClassifier {
    fn predict(
        &self,
        image: &ImageTensor,
        _metadata: &EncodedMetadata,
    ) -> Result<Vec<f64>, ClassifierError> {
        if (image.width, image.height) != (224, 224) {
            return Err(ClassifierError::InputMismatch(format!(
                "expected 224x224, got {}x{}",
                image.width, image.height
            )));
        }
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed (test)".to_string()
    }
}

struct TestApp {
    router: Router,
    store: Arc<SqliteStore>,
}

fn build_app(loaded: bool, static_dir: &Path) -> TestApp {
    build_app_with(
        loaded,
        ApiSettings {
            static_dir: static_dir.to_path_buf(),
            ..ApiSettings::default()
        },
    )
}

fn build_app_with(loaded: bool, settings: ApiSettings) -> TestApp {
    let store = Arc::new(SqliteStore::in_memory().expect("Should create store"));
    let (classifier, artifact) = if loaded {
        let classifier: Arc<dyn LesionClassifier> =
            Arc::new(FixedClassifier(vec![0.7, 0.2, 0.05, 0.05]));
        (
            Some(classifier),
            Some(Arc::new(
                PreprocessArtifact::from_json(ARTIFACT).expect("Artifact should parse"),
            )),
        )
    } else {
        (None, None)
    };

    let ctx = Arc::new(AppContext::new(
        classifier,
        artifact,
        Arc::clone(&store),
        settings,
    ));
    TestApp {
        router: api::router(ctx),
        store,
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Should encode PNG");
    out.into_inner()
}

fn multipart_body(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(bytes) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"lesion.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("Should build request")
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Should build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Should build request")
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("Router should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Should read body")
        .to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = serde_json::from_slice(&bytes).expect("Body should be JSON");
    (status, value)
}

fn create_user(app: &TestApp, username: &str, password: &str) -> i64 {
    let hash = hash_password(password).expect("Should hash");
    app.store
        .insert_user(username, &hash)
        .expect("Should insert user")
}

fn save_body(user_id: i64, ci: &str) -> Value {
    json!({
        "patient_name": "Ana Pereira",
        "age": 70,
        "ci": ci,
        "complement": "1A",
        "phone": "+598 99 123 456",
        "sex": "female",
        "site": "head/neck",
        "user_id": user_id,
        "top3": [
            {"disease": "MEL", "probability": 0.7},
            {"disease": "NV", "probability": 0.2},
            {"disease": "BCC", "probability": 0.05}
        ]
    })
}

#[tokio::test]
async fn test_predict_ranks_classes() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());

    let body = multipart_body(
        Some(png_bytes(300, 200).as_slice()),
        &[("age", "70"), ("sex", "male"), ("site", "head/neck")],
    );
    let (status, value) = send_json(&app, predict_request(body)).await;

    assert_eq!(status, StatusCode::OK, "body: {value}");
    assert_eq!(value["prediction"], "Melanoma");
    assert_eq!(value["prediction_full"], "Melanoma (MEL)");
    assert_eq!(value["confidence"], 0.7);
    assert_eq!(value["uncertain"], false);

    let top = value["top_predictions"]
        .as_array()
        .expect("top_predictions should be an array");
    assert_eq!(top.len(), 3);
    assert_eq!(top[0]["disease"], "MEL");
    assert_eq!(top[1]["disease"], "NV");
    assert_eq!(value["all_probabilities"]["BKL"], 0.05);
    assert!(value["inference_time_ms"].as_f64().is_some());
}

#[tokio::test]
async fn test_predict_rejects_non_image() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());

    let body = multipart_body(
        Some(b"definitely not an image".as_slice()),
        &[("age", "40"), ("sex", "female"), ("site", "anterior torso")],
    );
    let (status, value) = send_json(&app, predict_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["detail"].as_str().is_some());
}

#[tokio::test]
async fn test_predict_rejects_oversized_upload() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app_with(
        true,
        ApiSettings {
            max_upload_bytes: 1024,
            static_dir: dir.path().to_path_buf(),
            ..ApiSettings::default()
        },
    );

    let body = multipart_body(
        Some(vec![0x42_u8; 4096].as_slice()),
        &[("age", "40"), ("sex", "female"), ("site", "anterior torso")],
    );
    let (status, value) = send_json(&app, predict_request(body)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "body: {value}");
    assert!(value["detail"].as_str().is_some());
}

#[tokio::test]
async fn test_predict_missing_field_is_bad_request() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());

    let body = multipart_body(Some(png_bytes(32, 32).as_slice()), &[("age", "40"), ("sex", "male")]);
    let (status, value) = send_json(&app, predict_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["detail"]
        .as_str()
        .is_some_and(|d| d.contains("site")));
}

#[tokio::test]
async fn test_predict_bad_age() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());

    for age in ["forty", "200"] {
        let body = multipart_body(
            Some(png_bytes(32, 32).as_slice()),
            &[("age", age), ("sex", "male"), ("site", "head/neck")],
        );
        let (status, _) = send_json(&app, predict_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "age {age:?}");
    }
}

#[tokio::test]
async fn test_predict_without_model_is_server_error() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(false, dir.path());

    let body = multipart_body(
        Some(png_bytes(32, 32).as_slice()),
        &[("age", "40"), ("sex", "male"), ("site", "head/neck")],
    );
    let (status, value) = send_json(&app, predict_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(value["detail"], "Internal server error");
}

#[tokio::test]
async fn test_health_reflects_load_state() {
    let dir = tempfile::tempdir().expect("Should create temp dir");

    let (status, value) = send_json(&build_app(true, dir.path()), get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "healthy");
    assert_eq!(value["model_loaded"], true);

    let (status, value) = send_json(&build_app(false, dir.path()), get("/api/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(value["model_loaded"], false);
    assert_eq!(value["artifacts_loaded"], false);
}

#[tokio::test]
async fn test_vocabulary_endpoints() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());

    let (status, value) = send_json(&app, get("/api/disease-classes")).await;
    assert_eq!(status, StatusCode::OK);
    let classes = value.as_array().expect("Should be an array");
    assert_eq!(classes.len(), 4);
    assert_eq!(classes[0]["code"], "MEL");
    assert_eq!(classes[0]["malignant"], true);
    assert_eq!(classes[1]["malignant"], false);

    let (status, value) = send_json(&app, get("/api/anatomic-sites")).await;
    assert_eq!(status, StatusCode::OK);
    let sites = value["sites"].as_array().expect("Should be an array");
    assert_eq!(sites.len(), 4);
    assert!(!sites.iter().any(|s| s == "unknown"));

    let (status, value) = send_json(&app, get("/api/model/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["num_classes"], 4);
    assert_eq!(value["model"], "fixed (test)");

    let unloaded = build_app(false, dir.path());
    let (status, _) = send_json(&unloaded, get("/api/model/info")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_login() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());
    let id = create_user(&app, "drsilva", "correct horse battery");

    let (status, value) = send_json(
        &app,
        json_request(
            "POST",
            "/api/login",
            &json!({"username": "drsilva", "password": "correct horse battery"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], true);
    assert_eq!(value["user"]["id"], id);

    let (status, _) = send_json(
        &app,
        json_request(
            "POST",
            "/api/login",
            &json!({"username": "drsilva", "password": "wrong password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_json(
        &app,
        json_request(
            "POST",
            "/api/login",
            &json!({"username": "nobody", "password": "whatever123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_save_history_and_search_flow() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());
    let user_id = create_user(&app, "drsilva", "correct horse battery");
    let other_id = create_user(&app, "drgomez", "another long password");

    let (status, value) = send_json(&app, get("/api/patient-history/1234567")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["patient"].is_null());
    assert_eq!(value["history"].as_array().map(Vec::len), Some(0));

    for _ in 0..2 {
        let (status, value) = send_json(
            &app,
            json_request("POST", "/api/save-analysis", &save_body(user_id, "1234567")),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {value}");
        assert_eq!(value["success"], true);
    }

    let (status, value) = send_json(&app, get("/api/patient-history/1234567")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["patient"]["name"], "Ana Pereira");
    let history = value["history"].as_array().expect("Should be an array");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["user"], "drsilva");
    assert_eq!(history[0]["top3"][0]["status"], "malignant");
    assert_eq!(history[0]["top3"][1]["status"], "benign");

    let (status, value) = send_json(
        &app,
        get(&format!("/api/search-patients?ci=234&user_id={user_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = value["results"].as_array().expect("Should be an array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["ci"], "1234567-1A");

    // Search is scoped to the requesting clinician's own analyses.
    let (_, value) = send_json(
        &app,
        get(&format!("/api/search-patients?ci=234&user_id={other_id}")),
    )
    .await;
    assert_eq!(value["results"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_save_analysis_rejections() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(true, dir.path());
    let user_id = create_user(&app, "drsilva", "correct horse battery");

    let mut body = save_body(user_id, "7654321");
    body["top3"] = json!([{"disease": "MEL", "probability": 0.9}]);
    let (status, _) = send_json(&app, json_request("POST", "/api/save-analysis", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &app,
        json_request("POST", "/api/save-analysis", &save_body(user_id + 100, "7654321")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Neither rejection left a patient behind.
    let (_, value) = send_json(&app, get("/api/patient-history/7654321")).await;
    assert!(value["patient"].is_null());

    let request = Request::builder()
        .method("POST")
        .uri("/api/save-analysis")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("Should build request");
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_index_serves_frontend_or_fallback() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let app = build_app(false, dir.path());

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body).expect("Should be UTF-8"),
        "<h3>Frontend not available</h3>"
    );

    std::fs::write(dir.path().join("index.html"), "<h1>LesionScope</h1>")
        .expect("Should write index");
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body).expect("Should be UTF-8"),
        "<h1>LesionScope</h1>"
    );
}
