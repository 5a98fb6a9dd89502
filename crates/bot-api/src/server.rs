//! HTTP facade over [`BotApi`].
//!
//! One run is live per server. All mutating routes funnel through a single
//! mutex around the facade; the tick loop itself stays synchronous.

use std::fmt;
use std::net::SocketAddr;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, BotConfig, BotStatus, ErrorCode, JournalEntry, StrategyRequest, SCHEMA_VERSION_V1,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::{BotApi, PersistenceError};

const DEFAULT_SQLITE_PATH: &str = "gridbot_runs.sqlite";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn run_not_found(requested_run_id: &str, active_run_id: Option<&str>) -> Self {
        let details = active_run_id
            .map(|active| format!("requested_run_id={requested_run_id} active_run_id={active}"));
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::RunNotFound,
                "run_id does not match an active run",
                details,
            ),
        }
    }

    fn invalid_command(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidCommand, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_api(error: ApiError) -> Self {
        let status = match error.code {
            ErrorCode::RunNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RunStateConflict => StatusCode::CONFLICT,
            ErrorCode::InvalidQuery | ErrorCode::InvalidCommand => StatusCode::BAD_REQUEST,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }

    fn from_persistence(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotAttached => {
                Self::invalid_command("persistence store is not attached", None)
            }
            PersistenceError::RunAlreadyExists(run_id) => Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(
                    ErrorCode::RunStateConflict,
                    "run_id already exists; pass replace_existing=true to replace",
                    Some(format!("run_id={run_id}")),
                ),
            },
            other => Self::internal("persistence operation failed", Some(other.to_string())),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<ServerInner>>,
}

impl AppState {
    fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(ServerInner::default())),
        }
    }
}

#[derive(Default)]
struct ServerInner {
    api: Option<BotApi>,
}

fn require_run<'a>(inner: &'a ServerInner, run_id: &str) -> Result<&'a BotApi, HttpApiError> {
    let Some(api) = inner.api.as_ref() else {
        return Err(HttpApiError::run_not_found(run_id, None));
    };
    if api.run_id() != run_id {
        return Err(HttpApiError::run_not_found(run_id, Some(api.run_id())));
    }
    Ok(api)
}

fn require_run_mut<'a>(
    inner: &'a mut ServerInner,
    run_id: &str,
) -> Result<&'a mut BotApi, HttpApiError> {
    let active_run_id = inner.api.as_ref().map(|api| api.run_id().to_string());
    let Some(api) = inner.api.as_mut() else {
        return Err(HttpApiError::run_not_found(run_id, None));
    };
    if api.run_id() != run_id {
        return Err(HttpApiError::run_not_found(run_id, active_run_id.as_deref()));
    }
    Ok(api)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateRunBody {
    #[serde(default)]
    config: Option<BotConfig>,
    #[serde(default)]
    replace_existing: bool,
    #[serde(default)]
    sqlite_path: Option<String>,
    /// Skip the SQLite store entirely (ephemeral run).
    #[serde(default)]
    ephemeral: bool,
}

#[derive(Debug, Serialize)]
struct CreateRunResponse {
    schema_version: String,
    status: BotStatus,
}

#[derive(Debug, Deserialize)]
struct StepBody {
    #[serde(default = "default_steps")]
    ticks: u64,
}

fn default_steps() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct RunToBody {
    tick: u64,
}

#[derive(Debug, Serialize)]
struct StepResponse {
    status: BotStatus,
    committed_ticks: u64,
}

#[derive(Debug, Deserialize)]
struct JournalQuery {
    #[serde(default)]
    from_tick: u64,
    to_tick: Option<u64>,
}

// ---------------------------------------------------------------------------
// Serve
// ---------------------------------------------------------------------------

pub async fn serve(addr: SocketAddr) -> Result<(), ServerError> {
    let state = AppState::new();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/runs", post(create_run))
        .route("/api/v1/runs/{run_id}/halt", post(halt_run))
        .route("/api/v1/runs/{run_id}/resume", post(resume_run))
        .route("/api/v1/runs/{run_id}/step", post(step_run))
        .route("/api/v1/runs/{run_id}/run_to_tick", post(run_to_tick))
        .route("/api/v1/runs/{run_id}/request", post(submit_request))
        .route("/api/v1/runs/{run_id}/status", get(get_status))
        .route("/api/v1/runs/{run_id}/journal", get(get_journal))
        .route("/api/v1/runs/{run_id}/description", get(get_description))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("content-type"),
    );
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<CreateRunBody>,
) -> Result<(StatusCode, Json<CreateRunResponse>), HttpApiError> {
    let config = body.config.unwrap_or_default();
    if config.schema_version != SCHEMA_VERSION_V1 {
        return Err(HttpApiError::invalid_command(
            "unsupported schema_version",
            Some(format!(
                "got={} expected={}",
                config.schema_version, SCHEMA_VERSION_V1
            )),
        ));
    }

    let mut api = BotApi::from_config(config);
    if !body.ephemeral {
        let path = body
            .sqlite_path
            .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
        api.attach_sqlite_store(&path)
            .map_err(HttpApiError::from_persistence)?;
        api.initialize_run_storage(body.replace_existing)
            .map_err(HttpApiError::from_persistence)?;
    }

    let status = api.status();
    let mut inner = state.inner.lock().await;
    inner.api = Some(api);

    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            status,
        }),
    ))
}

async fn halt_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<BotStatus>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_run_mut(&mut inner, &run_id)?;
    Ok(Json(api.halt()))
}

async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<BotStatus>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_run_mut(&mut inner, &run_id)?;
    Ok(Json(api.resume()))
}

async fn step_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<StepBody>,
) -> Result<Json<StepResponse>, HttpApiError> {
    if body.ticks == 0 {
        return Err(HttpApiError::invalid_command("step requires ticks >= 1", None));
    }
    let mut inner = state.inner.lock().await;
    let api = require_run_mut(&mut inner, &run_id)?;
    let (status, committed_ticks) = api.step(body.ticks);
    Ok(Json(StepResponse {
        status,
        committed_ticks,
    }))
}

async fn run_to_tick(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<RunToBody>,
) -> Result<Json<StepResponse>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_run_mut(&mut inner, &run_id)?;
    let (status, committed_ticks) = api.run_to_tick(body.tick);
    Ok(Json(StepResponse {
        status,
        committed_ticks,
    }))
}

async fn submit_request(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<StrategyRequest>,
) -> Result<(StatusCode, Json<BotStatus>), HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_run_mut(&mut inner, &run_id)?;
    let status = api.request(request).map_err(HttpApiError::from_api)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn get_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_run(&inner, &run_id)?;
    let status = api.status();
    Ok(Json(json!({
        "status": status,
        "description": api.description(),
        "progress": api.progress(),
        "last_persistence_error": api.last_persistence_error(),
    })))
}

async fn get_journal(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<JournalQuery>,
) -> Result<Json<Vec<JournalEntry>>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_run(&inner, &run_id)?;
    let to_tick = query.to_tick.unwrap_or(u64::MAX);
    let entries = api
        .journal()
        .iter()
        .filter(|entry| entry.tick >= query.from_tick && entry.tick <= to_tick)
        .cloned()
        .collect();
    Ok(Json(entries))
}

async fn get_description(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_run(&inner, &run_id)?;
    Ok(Json(json!({
        "description": api.description(),
        "progress": api.progress(),
    })))
}
