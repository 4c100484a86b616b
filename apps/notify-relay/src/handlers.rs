use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::protocol::NotificationPayload;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    uptime_secs: u64,
    connected_users: usize,
    store_backend: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationAccepted {
    pub status: String,
    pub delivery: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub username: String,
    pub pending: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeParams {
    pub username: Option<String>,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        connected_users: state.registry().len(),
        store_backend: state.store().backend().as_str(),
    })
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// POST /notifications/:username - body is forwarded to the user verbatim.
pub async fn post_notification(
    State(state): State<AppState>,
    Path(username): Path<String>,
    body: Bytes,
) -> ApiResult<NotificationAccepted> {
    let username = require_username(Some(&username))?;
    if !state.directory().exists(&username) {
        return Err(ApiError::NotFound(format!("unknown user {username}")));
    }
    let payload = NotificationPayload::from_json_bytes(&body)?;
    info!(user = %username, bytes = payload.len(), "received notification");

    let outcome = state.router().route(&username, payload).await?;
    Ok(Json(NotificationAccepted {
        status: "notification processed".into(),
        delivery: outcome.as_str().into(),
    }))
}

/// GET /notifications/:username/pending - queue depth without draining.
pub async fn pending_count(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<PendingResponse> {
    let username = require_username(Some(&username))?;
    let pending = state.store().pending_len(&username).await?;
    Ok(Json(PendingResponse { username, pending }))
}

/// GET /ws/:username
pub async fn websocket_by_path(
    State(state): State<AppState>,
    Path(username): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let username = require_username(Some(&username))?;
    upgrade(state, username, ws)
}

/// GET /ws?username=<name>, also mounted at /ws/ so an empty path
/// segment is a client error rather than a miss.
pub async fn websocket_by_query(
    State(state): State<AppState>,
    Query(params): Query<UpgradeParams>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let username = require_username(params.username.as_deref())?;
    upgrade(state, username, ws)
}

fn upgrade(
    state: AppState,
    username: String,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let ws = ws.ok_or_else(|| ApiError::BadRequest("expected a websocket upgrade request".into()))?;
    let failed_user = username.clone();
    let lifecycle = state.lifecycle();
    Ok(ws
        .on_failed_upgrade(move |err| {
            metrics::UPGRADE_FAILURES.inc();
            warn!(user = %failed_user, error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| lifecycle.serve(socket, username)))
}

fn require_username(raw: Option<&str>) -> Result<String, ApiError> {
    let name = raw.unwrap_or_default();
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }
    if name.trim() != name {
        return Err(ApiError::BadRequest(
            "username must not start or end with whitespace".into(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    use super::*;
    use crate::connection::testing::RecordingSink;
    use crate::connection::ConnectionHandle;
    use crate::directory::StaticDirectory;
    use crate::heartbeat::HeartbeatConfig;
    use crate::routes::router;
    use crate::store::InMemoryPendingStore;

    async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn offline_notification_is_queued() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let app = router(state.clone());

        let (status, body) = send(
            app.clone(),
            post("/notifications/alice", r#"{"type":"like"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "notification processed");
        assert_eq!(body["delivery"], "offline");

        let (status, body) = send(app, get("/notifications/alice/pending")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 1);
    }

    #[tokio::test]
    async fn online_notification_is_written_through() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let sink = RecordingSink::new();
        state
            .registry()
            .register("bob", ConnectionHandle::new("bob", sink.clone()));

        let (status, body) = send(
            router(state.clone()),
            post("/notifications/bob", r#"{"type":"follow"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivery"], "online");
        assert_eq!(sink.data(), [r#"{"type":"follow"}"#]);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_side_effects() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let (status, body) = send(
            router(state.clone()),
            post("/notifications/alice", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
        assert_eq!(state.store().pending_len("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected_when_directory_is_configured() {
        let state = AppState::new(
            std::sync::Arc::new(InMemoryPendingStore::new()),
            std::sync::Arc::new(StaticDirectory::new(["player1"])),
            HeartbeatConfig::default(),
        );
        let app = router(state.clone());

        let (status, _) = send(app.clone(), post("/notifications/mallory", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(state.store().pending_len("mallory").await.unwrap(), 0);

        let (status, _) = send(app, post("/notifications/player1", "{}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn upgrade_without_username_is_a_client_error() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let app = router(state.clone());

        for uri in ["/ws", "/ws?username=", "/ws?username=%20%20"] {
            let (status, body) = send(app.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["message"], "username is required");
        }
        assert!(state.registry().is_empty());
    }

    #[tokio::test]
    async fn plain_get_on_upgrade_endpoint_is_rejected() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let (status, body) = send(router(state.clone()), get("/ws/alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "expected a websocket upgrade request");
        assert!(state.registry().is_empty());
    }

    #[tokio::test]
    async fn ready_reports_connections_and_backend() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        state
            .registry()
            .register("bob", ConnectionHandle::new("bob", RecordingSink::new()));
        let (status, body) = send(router(state), get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected_users"], 1);
        assert_eq!(body["store_backend"], "memory");
    }

    #[tokio::test]
    async fn empty_path_segment_is_a_missing_username() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let (status, body) = send(router(state.clone()), get("/ws/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "username is required");
        assert!(state.registry().is_empty());
    }

    #[tokio::test]
    async fn padded_username_is_not_folded_into_another_identity() {
        let state = AppState::in_memory(HeartbeatConfig::default());
        let app = router(state.clone());

        let (status, body) = send(app.clone(), post("/notifications/alice%20", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "username must not start or end with whitespace"
        );
        let (status, _) = send(app, get("/ws?username=%20alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.store().pending_len("alice").await.unwrap(), 0);
        assert_eq!(state.store().pending_len("alice ").await.unwrap(), 0);
    }
}
