use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::JobService;
use crate::domain::Job;
use crate::error::FormataError;
use crate::observability;
use crate::pipeline::processing::filter::FilterSet;
use crate::pipeline::{OutputFormat, ProcessingConfig};

/// Error body: `{"error": code, "message": text}` with the error's HTTP status.
pub struct ApiError(FormataError);

impl From<FormataError> for ApiError {
    fn from(err: FormataError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Empty bodies decode to the default value.
fn json_body<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body).map_err(FormataError::from)?)
}

fn status_body(job: &Job) -> serde_json::Value {
    json!({
        "job_id": job.id,
        "status": job.status,
        "progress": job.progress,
        "errors": job.errors,
        "failure": job.failure,
        "result": job.result,
    })
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "formata",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Deserialize)]
struct IngestParams {
    filename: String,
}

async fn ingest(
    Extension(service): Extension<Arc<JobService>>,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let receipt = service.ingest(&params.filename, &body).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn process(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let config: ProcessingConfig = json_body(&body)?;
    let job = service.start_processing(&id, config).await?;
    Ok((StatusCode::ACCEPTED, Json(status_body(&job))))
}

async fn status(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = service.status(&id).await?;
    Ok(Json(status_body(&job)))
}

async fn result(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let (job, result) = service.result(&id).await?;
    Ok(Json(json!({
        "job_id": job.id,
        "data": result.after.to_records(),
        "before": result.before,
        "metadata": {
            "filename": job.filename,
            "format": job.format,
            "rows_before": result.rows_before,
            "rows_after": result.rows_after,
            "columns": result.after.columns,
            "transformations": result.transformations,
            "outliers": result.outliers,
            "quality": result.quality,
            "processed_at": result.processed_at,
            "ingest": job.metadata,
        },
        "errors": job.errors,
    })))
}

async fn download_result(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (format, bytes) = service.download_output(&id).await?;
    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}_clean.{}\"", id, format.extension()),
        ),
    ];
    Ok((headers, bytes))
}

async fn download_errors(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = service.error_report(&id).await?;
    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}_errors.txt\"", id),
        ),
    ];
    Ok((headers, bytes))
}

async fn preview(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let filters: FilterSet = json_body(&body)?;
    let preview = service.preview(&id, &filters).await?;
    Ok(Json(json!({
        "job_id": id,
        "total_rows": preview.total_rows,
        "matched_rows": preview.matched_rows,
        "columns": preview.dataset.columns,
        "data": preview.dataset.to_records(),
        "issues": preview.issues,
    })))
}

async fn cancel(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = service.cancel(&id).await?;
    Ok(Json(status_body(&job)))
}

async fn list_jobs(Extension(service): Extension<Arc<JobService>>) -> ApiResult<impl IntoResponse> {
    let jobs: Vec<serde_json::Value> = service
        .list()
        .await?
        .iter()
        .map(|job| {
            json!({
                "job_id": job.id,
                "filename": job.filename,
                "format": job.format,
                "status": job.status,
                "progress": job.progress,
                "created_at": job.created_at,
                "updated_at": job.updated_at,
                "error_count": job.errors.len(),
            })
        })
        .collect();
    Ok(Json(json!({ "jobs": jobs, "count": jobs.len() })))
}

async fn job_details(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(service.status(&id).await?))
}

async fn delete_job(
    Extension(service): Extension<Arc<JobService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = service.delete(&id).await?;
    Ok(Json(json!({ "job_id": job.id, "deleted": true })))
}

async fn summary(Extension(service): Extension<Arc<JobService>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.summary().await?))
}

#[derive(Deserialize)]
struct ConvertParams {
    to: String,
    filename: String,
}

async fn convert(
    Extension(service): Extension<Arc<JobService>>,
    Query(params): Query<ConvertParams>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let to: OutputFormat = params.to.parse()?;
    let bytes = service.convert(&params.filename, &body, to)?;
    Ok(([(header::CONTENT_TYPE, to.content_type())], bytes))
}

async fn metrics() -> Response {
    match observability::render() {
        Some(text) => text.into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Create the HTTP router with all routes
pub fn create_server(service: Arc<JobService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ingest", post(ingest))
        .route("/convert", post(convert))
        .route("/process/:id", post(process))
        .route("/status/:id", get(status))
        .route("/result/:id", get(result))
        .route("/result/:id/download", get(download_result))
        .route("/errors/:id/download", get(download_errors))
        .route("/preview/:id", post(preview))
        .route("/jobs", get(list_jobs))
        .route("/jobs/status/summary", get(summary))
        .route("/jobs/:id", get(job_details).delete(delete_job))
        .route("/jobs/:id/cancel", post(cancel))
        .layer(Extension(service))
        // Upload size is enforced by the service so oversized files get a JSON 413
        .layer(DefaultBodyLimit::disable())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Start the HTTP server on the specified address
pub async fn start_server(service: Arc<JobService>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_server(service);

    info!("HTTP server listening on http://{}", addr);
    println!("🚀 Formata API running on http://{addr}");
    println!("💚 Health check: http://{addr}/health");

    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

/// Serve only `GET /metrics` on a separate address.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics));
    info!("Metrics listening on http://{}/metrics", addr);
    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pipeline::storage::InMemoryJobStore;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let settings = Settings::rooted_at(dir.path());
        let service = Arc::new(JobService::new(&settings, Arc::new(InMemoryJobStore::new())));
        create_server(service)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(&app(&dir), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404_json() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(&app(&dir), "GET", "/status/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_ingest_and_status() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (status, body) = call(&app, "POST", "/ingest?filename=people.csv", "name,age\nAnn,30\n").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["rows"], 1);
        let id = body["job_id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, "GET", &format!("/status/{}", id), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["progress"], 0.0);

        let (status, body) = call(&app, "GET", &format!("/result/{}", id), "").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_ready");
    }

    #[tokio::test]
    async fn test_ingest_parse_error_is_400() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (status, body) = call(&app, "POST", "/ingest?filename=bad.json", "[1,").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "parse_error");

        let (_, summary) = call(&app, "GET", "/jobs/status/summary", "").await;
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["total"], 1);
    }

    #[tokio::test]
    async fn test_invalid_process_body_is_400() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (_, body) = call(&app, "POST", "/ingest?filename=a.csv", "a\n1\n").await;
        let id = body["job_id"].as_str().unwrap().to_string();
        let (status, body) = call(&app, "POST", &format!("/process/{}", id), "{\"filters\": 3}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "json_error");
    }

    #[tokio::test]
    async fn test_convert() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(&app(&dir), "POST", "/convert?to=json&filename=a.csv", "a,b\n1,2\n").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["row_count"], 1);
    }
}
