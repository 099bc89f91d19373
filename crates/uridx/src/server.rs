//! HTTP tool API.
//!
//! Serves the [`ToolRegistry`] over plain JSON with permissive CORS so
//! local web UIs and scripts can call it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness check with version |
//! | `GET` | `/tools/list` | Tool names, descriptions and parameter schemas |
//! | `POST` | `/tools/{name}` | Invoke a tool; body is the parameter object |
//!
//! Successful calls answer `{"result": ...}`. Failures answer
//! `{"error": {"code": "...", "message": "..."}}` with a status derived
//! from the underlying error:
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | unknown tool, missing source | 404 | `not_found` |
//! | bad parameters, invalid request | 400 | `bad_request` |
//! | dimension mismatch | 409 | `dimension_mismatch` |
//! | embedding timeout | 504 | `timeout` |
//! | embedding service down | 503 | `embedding_unavailable` |
//! | anything else | 500 | `tool_error` |

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use uridx_core::Error;

use crate::index::Index;
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: ToolContext,
    tools: Arc<ToolRegistry>,
}

/// Build the router without binding a socket.
pub fn router(index: Arc<Index>, tools: Arc<ToolRegistry>) -> Router {
    let state = AppState {
        ctx: ToolContext::new(index),
        tools,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `server.bind` and serve until the process is stopped.
pub async fn run_server(index: Arc<Index>) -> anyhow::Result<()> {
    let bind_addr = index.config().server.bind.clone();
    let tools = Arc::new(ToolRegistry::with_builtins());
    for t in tools.tools() {
        info!(tool = t.name(), "registered POST /tools/{}", t.name());
    }

    let app = router(index, tools);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    eprintln!("uridx tool API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Map a tool failure onto a status by its root [`Error`] variant.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let message = format!("{}: {}", tool_name, err);
    let Some(root) = err.downcast_ref::<Error>().map(Error::root) else {
        return AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", message);
    };
    match root {
        Error::NotFound(_) => not_found(message),
        Error::InvalidArgument(_) | Error::InvalidIngestRequest(_) => bad_request(message),
        Error::DimensionMismatch { .. } => {
            AppError::new(StatusCode::CONFLICT, "dimension_mismatch", message)
        }
        Error::EmbeddingTimeout(_) => AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
        Error::EmbeddingUnavailable(_) => {
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "embedding_unavailable", message)
        }
        _ => AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", message),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo::of(t.as_ref()))
        .collect();
    Json(ToolListResponse { tools })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn errors_are_classified_by_root_variant() {
        let nested = Error::Ingest {
            uri: "note://a".into(),
            stage: "chunk 0".into(),
            source: Box::new(Error::EmbeddingTimeout(Duration::from_secs(30))),
        };
        let e = classify_tool_error("ingest", nested.into());
        assert_eq!(e.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(e.code, "timeout");
        assert!(e.message.starts_with("ingest: "));

        let e = classify_tool_error("get", Error::NotFound("source x".into()).into());
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e = classify_tool_error("search", Error::InvalidArgument("limit".into()).into());
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let mismatch = Error::DimensionMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            classify_tool_error("search", mismatch.into()).status,
            StatusCode::CONFLICT
        );

        let e = classify_tool_error("x", anyhow::anyhow!("boom"));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "tool_error");
    }
}
