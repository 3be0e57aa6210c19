use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use pt_core::config::{default_allowed_origins, Config};
use pt_core::history::{CommandHistory, CommandHistoryStore};
use pt_core::shutdown::ShutdownSignal;
use pt_session::{SessionDefaults, SessionInfo, SessionRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::bridge::BridgeSettings;
use crate::origin_validation;
use crate::terminal_ws;

/// Shared state behind every route.
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub history: Arc<CommandHistoryStore>,
    pub bridge: BridgeSettings,
    pub shutdown: ShutdownSignal,
    /// Origins allowed to open `/ws/terminal` and make CORS requests.
    pub allowed_origins: Vec<String>,
}

impl ApiState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        history: Arc<CommandHistoryStore>,
        bridge: BridgeSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            history,
            bridge,
            shutdown,
            allowed_origins: default_allowed_origins(),
        }
    }

    pub fn with_allowed_origins(mut self, allowed_origins: Vec<String>) -> Self {
        self.allowed_origins = allowed_origins;
        self
    }

    pub fn from_config(config: &Config, shutdown: ShutdownSignal) -> Self {
        let registry = SessionRegistry::new(SessionDefaults::from_config(&config.terminal));
        let history = CommandHistoryStore::with_capacity(
            config.history.resolved_path(),
            config.history.max_entries,
        );
        Self::new(
            Arc::new(registry),
            Arc::new(history),
            BridgeSettings::from(&config.bridge),
            shutdown,
        )
        .with_allowed_origins(config.server.allowed_origins.clone())
    }
}

pub fn api_router(state: Arc<ApiState>) -> Router {
    let cors = origin_validation::cors_layer(state.allowed_origins.clone());
    Router::new()
        .route("/health", get(health))
        .route("/ws/terminal", get(terminal_ws::terminal_ws))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/history", get(get_history).post(append_history))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/sessions
async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}

/// DELETE /api/sessions/{id}: stop a session; an attached client sees it end.
async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid session id: {id}")))?;
    let session = state
        .registry
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))?;
    // Stopping waits on the child process.
    if let Err(e) = tokio::task::spawn_blocking(move || session.stop()).await {
        warn!(session_id = %id, error = %e, "session stop task failed");
    }
    info!(session_id = %id, "terminal session deleted via API");
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

/// GET /api/history
async fn get_history(State(state): State<Arc<ApiState>>) -> Result<Json<CommandHistory>, ApiError> {
    Ok(Json(state.history.load().await?))
}

#[derive(Debug, Deserialize)]
struct AppendHistoryRequest {
    command: String,
}

/// POST /api/history
async fn append_history(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<AppendHistoryRequest>,
) -> Result<Json<CommandHistory>, ApiError> {
    Ok(Json(state.history.append(&req.command).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pt_session::SpawnOptions;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> Arc<ApiState> {
        let registry = SessionRegistry::new(SessionDefaults {
            shell: PathBuf::from("/bin/sh"),
            rows: 24,
            cols: 80,
            options: SpawnOptions::default(),
            max_sessions: 4,
        });
        Arc::new(ApiState::new(
            Arc::new(registry),
            Arc::new(CommandHistoryStore::new(dir.join("history.json"))),
            BridgeSettings::default(),
            ShutdownSignal::new(),
        ))
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = api_router(test_state(dir.path()));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = api_router(test_state(dir.path()));
        let req = Request::builder()
            .uri("/api/sessions")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));
    }

    #[tokio::test]
    async fn test_delete_session_invalid_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/sessions/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let resp = api_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/sessions/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = api_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_list_delete_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let session = state.registry.create().unwrap();

        let req = Request::builder()
            .uri("/api/sessions")
            .body(Body::empty())
            .unwrap();
        let resp = api_router(state.clone()).oneshot(req).await.unwrap();
        let list = body_json(resp).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["id"], session.id().to_string());
        assert_eq!(list[0]["state"], "running");

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/sessions/{}", session.id()))
            .body(Body::empty())
            .unwrap();
        let resp = api_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "deleted");
        assert!(state.registry.is_empty());
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_history_append_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        for cmd in ["ls", "pwd", "ls"] {
            let req = Request::builder()
                .method("POST")
                .uri("/api/history")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "command": cmd }).to_string()))
                .unwrap();
            let resp = api_router(state.clone()).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = Request::builder()
            .uri("/api/history")
            .body(Body::empty())
            .unwrap();
        let resp = api_router(state).oneshot(req).await.unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["commands"], json!(["ls", "pwd"]));
        assert!(body["last_updated"].is_string());
    }

    #[tokio::test]
    async fn test_history_empty_command_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/api/history")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"command":"   "}"#))
            .unwrap();
        let resp = api_router(test_state(dir.path())).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_history_missing_file_is_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .uri("/api/history")
            .body(Body::empty())
            .unwrap();
        let resp = api_router(test_state(dir.path())).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({"commands": [], "last_updated": null})
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_from_foreign_origin_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let preflight = |origin: &str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/history")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap()
        };

        let resp = api_router(state.clone())
            .oneshot(preflight("http://evil.example"))
            .await
            .unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());

        let resp = api_router(state)
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }
}
