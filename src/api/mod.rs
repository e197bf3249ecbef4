pub mod activity;
pub mod auth;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agents::{Agent, AgentSummary, NewAgent};
use crate::config::Config;
use crate::dispatcher::Reply;
use crate::error::{DispatchError, Result};
use crate::history::Turn;
use crate::llm::{ModelSettings, SettingsUpdate};
use crate::service::{AgentHub, TaskPayload};
use crate::tools::ToolSummary;

pub struct AppState {
    pub hub: Arc<AgentHub>,
    pub config: Arc<Config>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Whether repeating the same request may succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            retryable: None,
        }
    }

    pub fn error(kind: &str, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            error_kind: Some(kind.to_string()),
            retryable: Some(false),
        }
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

/// A [`DispatchError`] rendered as a status code plus an error envelope.
pub struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::AgentNotFound(_) | DispatchError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::AlreadyExists(_) => StatusCode::CONFLICT,
            DispatchError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
            DispatchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::DecisionProcedure(_) | DispatchError::TurnFailed { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Config(_) | DispatchError::Storage(_) | DispatchError::Browser(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ApiResponse::<()>::error(self.0.kind(), message).retryable(self.0.is_retryable());
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/message", post(send_message))
        .route("/agents", post(create_agent))
        .route("/agents/:id/tasks", post(run_agent_task))
        .route("/settings", patch(update_settings))
        .route("/log-exports", get(export_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware));

    Router::new()
        .route("/status", get(get_status))
        .route("/agents", get(list_agents))
        .route("/agents/:id", get(get_agent))
        .route("/agents/:id/history", get(get_history))
        .route("/tools", get(list_tools))
        .route("/settings", get(view_settings))
        .merge(protected)
        .nest_service("/output", ServeDir::new(&state.config.output.directory))
        .layer(middleware::from_fn(activity::activity_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_api_server(hub: Arc<AgentHub>, config: Arc<Config>) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = router(Arc::new(AppState { hub, config }));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DispatchError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| DispatchError::Storage(format!("API server stopped: {}", e)))?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub agents: usize,
    pub tools: usize,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::success(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agents: state.hub.list_agents().await.len(),
        tools: state.hub.list_tools().await.len(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageRequest {
    pub agent_id: String,
    pub message: String,
}

async fn send_message(State(state): State<Arc<AppState>>, Json(payload): Json<MessageRequest>) -> ApiResult<Reply> {
    let reply = state.hub.send_message(&payload.agent_id, &payload.message).await?;
    Ok(Json(ApiResponse::success(reply)))
}

async fn run_agent_task(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(task): Json<TaskPayload>,
) -> ApiResult<Reply> {
    let reply = state.hub.run_agent_task(&agent_id, task).await?;
    Ok(Json(ApiResponse::success(reply)))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<AgentSummary>>> {
    Json(ApiResponse::success(state.hub.list_agents().await))
}

async fn create_agent(State(state): State<Arc<AppState>>, Json(payload): Json<NewAgent>) -> ApiResult<Agent> {
    let agent = state.hub.create_agent(payload).await?;
    Ok(Json(ApiResponse::success(agent)))
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> ApiResult<Agent> {
    let agent = state.hub.get_agent(&agent_id).await?;
    Ok(Json(ApiResponse::success(agent)))
}

async fn get_history(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> ApiResult<Vec<Turn>> {
    let turns = state.hub.get_history(&agent_id).await?;
    Ok(Json(ApiResponse::success(turns)))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<ToolSummary>>> {
    Json(ApiResponse::success(state.hub.list_tools().await))
}

async fn view_settings(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ModelSettings>> {
    Json(ApiResponse::success(state.hub.view_settings().await))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<ModelSettings> {
    let settings = state.hub.update_settings(update).await?;
    Ok(Json(ApiResponse::success(settings)))
}

#[derive(Debug, Deserialize)]
pub struct LogExportQuery {
    #[serde(default = "default_export_type")]
    pub export_type: String,
}

fn default_export_type() -> String {
    "txt".to_string()
}

async fn export_logs(State(state): State<Arc<AppState>>, Query(query): Query<LogExportQuery>) -> Response {
    if query.export_type != "txt" {
        let message = format!("export_type '{}' is not available", query.export_type);
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::error("invalid_arguments", message))).into_response();
    }

    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("not_found", "log file not found".to_string())),
        )
            .into_response()
    };
    let Some(path) = &state.config.logging.file else {
        return not_found();
    };

    match tokio::fs::read(path).await {
        Ok(content) => {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "server.log".to_string());
            (
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
                ],
                content,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(e) => ApiError(DispatchError::Storage(format!("reading log file: {}", e))).into_response(),
    }
}
