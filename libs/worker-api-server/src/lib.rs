use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use bench_api::{ConsumerAssignment, ProducerWorkAssignment, TopicsInfo};
use bench_worker::{Worker, WorkerError};

#[derive(Clone)]
struct AppState {
    worker: Arc<dyn Worker>,
}

/// Ошибка команды → 500 с текстом ошибки. Клиент считает любой
/// не-200 ответ фатальным для вызова.
struct ApiError(WorkerError);

impl From<WorkerError> for ApiError {
    fn from(e: WorkerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "worker command failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {}", self.0)).into_response()
    }
}

type ApiResult<T = StatusCode> = Result<T, ApiError>;

/// Все маршруты worker RPC поверх данного worker'а.
pub fn router(worker: Arc<dyn Worker>) -> Router {
    Router::new()
        .route("/initialize-driver", post(handle_initialize_driver))
        .route("/create-topics", post(handle_create_topics))
        .route("/create-producers", post(handle_create_producers))
        .route("/probe-producers", post(handle_probe_producers))
        .route("/create-consumers", post(handle_create_consumers))
        .route("/pause-consumers", post(handle_pause_consumers))
        .route("/resume-consumers", post(handle_resume_consumers))
        .route("/start-load", post(handle_start_load))
        .route("/adjust-publish-rate", post(handle_adjust_publish_rate))
        .route("/stop-all", post(handle_stop_all))
        .route("/reset-stats", post(handle_reset_stats))
        .route("/period-stats", get(handle_period_stats))
        .route("/cumulative-latencies", get(handle_cumulative_latencies))
        .route("/counters-stats", get(handle_counters_stats))
        .with_state(AppState { worker })
}

/// Обслуживать worker на уже открытом listener'е до отмены `shutdown`.
pub async fn serve(listener: TcpListener, worker: Arc<dyn Worker>, shutdown: CancellationToken) -> Result<(), String> {
    axum::serve(listener, router(worker))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))
}

/// Worker HTTP сервер на `0.0.0.0:port`.
pub async fn run(port: u16, worker: Arc<dyn Worker>, shutdown: CancellationToken) -> Result<(), String> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind worker api :{port}: {e}"))?;
    tracing::info!(port, "worker api listening");
    serve(listener, worker, shutdown).await
}

// --- commands ---

async fn handle_initialize_driver(State(state): State<AppState>, body: Bytes) -> ApiResult {
    state.worker.initialize_driver(&body).await?;
    Ok(StatusCode::OK)
}

async fn handle_create_topics(
    State(state): State<AppState>,
    Json(topics): Json<TopicsInfo>,
) -> ApiResult<Json<Vec<String>>> {
    let names = state.worker.create_or_validate_topics(&topics).await?;
    Ok(Json(names))
}

async fn handle_create_producers(State(state): State<AppState>, Json(topics): Json<Vec<String>>) -> ApiResult {
    state.worker.create_producers(&topics).await?;
    Ok(StatusCode::OK)
}

async fn handle_probe_producers(State(state): State<AppState>) -> ApiResult {
    state.worker.probe_producers().await?;
    Ok(StatusCode::OK)
}

async fn handle_create_consumers(
    State(state): State<AppState>,
    Json(assignment): Json<ConsumerAssignment>,
) -> ApiResult {
    state.worker.create_consumers(&assignment).await?;
    Ok(StatusCode::OK)
}

async fn handle_pause_consumers(State(state): State<AppState>) -> ApiResult {
    state.worker.pause_consumers().await?;
    Ok(StatusCode::OK)
}

async fn handle_resume_consumers(State(state): State<AppState>) -> ApiResult {
    state.worker.resume_consumers().await?;
    Ok(StatusCode::OK)
}

async fn handle_start_load(
    State(state): State<AppState>,
    Json(assignment): Json<ProducerWorkAssignment>,
) -> ApiResult {
    state.worker.start_load(&assignment).await?;
    Ok(StatusCode::OK)
}

/// Тело — голое число (JSON number).
async fn handle_adjust_publish_rate(State(state): State<AppState>, body: Bytes) -> Response {
    let rate: f64 = match serde_json::from_slice(&body) {
        Ok(rate) => rate,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("error: rate: {e}")).into_response(),
    };
    match state.worker.adjust_publish_rate(rate).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_stop_all(State(state): State<AppState>) -> StatusCode {
    state.worker.stop_all().await;
    StatusCode::OK
}

async fn handle_reset_stats(State(state): State<AppState>) -> ApiResult {
    state.worker.reset_stats().await?;
    Ok(StatusCode::OK)
}

// --- queries ---

async fn handle_period_stats(State(state): State<AppState>) -> ApiResult<Response> {
    let stats = state.worker.get_period_stats().await?;
    Ok(Json(stats).into_response())
}

async fn handle_cumulative_latencies(State(state): State<AppState>) -> ApiResult<Response> {
    let latencies = state.worker.get_cumulative_latencies().await?;
    Ok(Json(latencies).into_response())
}

async fn handle_counters_stats(State(state): State<AppState>) -> ApiResult<Response> {
    let counters = state.worker.get_counters_stats().await?;
    Ok(Json(counters).into_response())
}
