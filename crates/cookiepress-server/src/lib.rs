use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use cookiepress_convert::Converter;
use cookiepress_imagen::{Design, GENERATED_URL_PREFIX, ImageGenerator};
use cookiepress_jobs::{Job, JobStatus, JobStore};

mod config;

pub use config::{ConfigError, ServerConfig};

/// Public path prefix the STL output directory is served under.
pub const OUTPUT_URL_PREFIX: &str = "/output";

/// Everything a request handler needs: the job store and the two
/// orchestrators. Built once in `main` and shared across requests.
pub struct AppState {
    pub store: JobStore,
    pub generator: ImageGenerator,
    pub converter: Converter,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate-image", post(generate_image))
        .route("/api/run", post(run_conversion))
        .route("/api/job/{id}", get(get_job))
        .nest_service(
            GENERATED_URL_PREFIX,
            ServeDir::new(state.generator.generated_dir()),
        )
        .nest_service(OUTPUT_URL_PREFIX, ServeDir::new(state.converter.output_dir()))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct GenerateImageRequest {
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateImageResponse {
    success: bool,
    job_id: String,
    designs: Vec<Design>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    success: bool,
    cutter_stl_url: String,
    stamp_stl_url: String,
    status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct FailureResponse {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
struct NotFoundResponse {
    error: String,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                Json(FailureResponse {
                    success: false,
                    error,
                }),
            )
                .into_response(),
            ApiError::NotFound(error) => {
                (StatusCode::NOT_FOUND, Json(NotFoundResponse { error })).into_response()
            }
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(FailureResponse {
                    success: false,
                    error,
                }),
            )
                .into_response(),
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn generate_image(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let request: GenerateImageRequest = parse_json(&body)?;
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }

    let job = state.store.create_job(prompt);
    info!(job_id = %job.id, "starting image generation batch");

    let designs = state
        .generator
        .generate_designs(prompt)
        .await
        .map_err(|err| {
            error!(job_id = %job.id, error = %err, "image generation failed");
            ApiError::internal(err.to_string())
        })?;

    state.store.update_job_status(&job.id, JobStatus::Selecting);
    Ok(Json(GenerateImageResponse {
        success: true,
        job_id: job.id,
        designs,
    }))
}

async fn run_conversion(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RunResponse>, ApiError> {
    let request: RunRequest = parse_json(&body)?;
    let image_url = request.image_url.trim();
    if image_url.is_empty() {
        return Err(ApiError::bad_request("imageUrl is required"));
    }

    let file = generated_file_name(image_url)?;
    let image_path = state.generator.generated_dir().join(file);
    if !tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
        return Err(ApiError::internal(format!(
            "selected image not found: {image_url}"
        )));
    }

    let result = state.converter.convert(&image_path).await.map_err(|err| {
        error!(error = %err, "failed to write conversion output");
        ApiError::internal("failed to write conversion output".to_string())
    })?;

    let cutter_stl_url = format!("{OUTPUT_URL_PREFIX}/{}", result.cutter_stl);
    let stamp_stl_url = format!("{OUTPUT_URL_PREFIX}/{}", result.stamp_stl);

    if let Some(job_id) = request.job_id.as_deref() {
        if state.store.update_job_image(job_id, image_url).is_some() {
            state.store.update_job_status(job_id, JobStatus::Processing);
            state
                .store
                .update_job_stls(job_id, &cutter_stl_url, &stamp_stl_url);
        }
    }

    Ok(Json(RunResponse {
        success: true,
        cutter_stl_url,
        stamp_stl_url,
        status: JobStatus::Ready,
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .store
        .get_job(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Maps an `imageUrl` from a generate-image response back to a bare filename
/// under the generated-images directory. Anything that is not a single plain
/// filename is rejected.
fn generated_file_name(image_url: &str) -> Result<&str, ApiError> {
    let trimmed = image_url.trim_start_matches('/');
    let file = trimmed.strip_prefix("generated/").unwrap_or(trimmed);
    if file.is_empty() || file.contains('/') || file.contains("..") {
        return Err(ApiError::bad_request(format!(
            "invalid imageUrl: {image_url}"
        )));
    }
    Ok(file)
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body is required"));
    }

    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}
