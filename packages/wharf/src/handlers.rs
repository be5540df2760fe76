//! Stateless HTTP surface mirroring the gateway's session semantics:
//! create/list/get/delete with the same validation and error taxonomy,
//! mapped to HTTP statuses.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::SessionError;
use crate::state::AppState;
use crate::ws::ws_handler;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .with_state(state)
}

fn status_for(e: &SessionError) -> StatusCode {
    match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Terminated(_) => StatusCode::CONFLICT,
        SessionError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        SessionError::InvalidWorkDir(_) | SessionError::UnknownAgentType(_) => {
            StatusCode::BAD_REQUEST
        }
        SessionError::SpawnFailed(_) | SessionError::Pty(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: SessionError) -> Response {
    let status = status_for(&e);
    let body = json!({
        "error": { "code": e.wire_code(), "message": e.to_string() }
    });
    (status, Json(body)).into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    work_dir: String,
    #[serde(default)]
    label: Option<String>,
    agent_type: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let agent: crate::agent::AgentType = match req.agent_type.parse() {
        Ok(agent) => agent,
        Err(()) => {
            return error_response(SessionError::UnknownAgentType(req.agent_type));
        }
    };
    let label = req.label.unwrap_or_else(|| agent.as_str().to_string());

    match state.create_session(&req.work_dir, &label, agent).await {
        Ok(meta) => (StatusCode::CREATED, Json(meta)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let sessions = if query.all {
        state.sessions.list_all().await
    } else {
        state.sessions.list().await
    };
    Json(sessions)
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.get(&id).await {
        Some(meta) => Json(meta).into_response(),
        None => error_response(SessionError::NotFound(id)),
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    // kill reports existence itself, so there is no window for a session
    // purged mid-request to turn into a spurious 204.
    if state.sessions.kill(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(SessionError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _tmp) = test_state();
        let app = app_router(state);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_with_bad_work_dir_is_400() {
        let (state, _tmp) = test_state();
        let app = app_router(state);
        let response = app
            .oneshot(post_json(
                "/api/sessions",
                serde_json::json!({
                    "workDir": "/definitely/not/a/dir",
                    "agentType": "claude"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_path");
    }

    #[tokio::test]
    async fn create_with_unknown_agent_is_400() {
        let (state, _tmp) = test_state();
        let app = app_router(state);
        let response = app
            .oneshot(post_json(
                "/api/sessions",
                serde_json::json!({ "workDir": "/tmp", "agentType": "hal9000" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "unknown_agent_type"
        );
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let (state, _tmp) = test_state();
        let app = app_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/api/sessions/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::delete("/api/sessions/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_list_get_delete_lifecycle() {
        let (state, tmp) = test_state();
        let app = app_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/sessions",
                serde_json::json!({
                    "workDir": tmp.path().to_str().unwrap(),
                    "label": "lifecycle",
                    "agentType": "claude"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["state"], "active");
        assert_eq!(created["label"], "lifecycle");

        let response = app
            .clone()
            .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        state.sessions.shutdown().await;
    }

    #[tokio::test]
    async fn delete_after_purge_is_404() {
        let (state, tmp) = test_state();
        let app = app_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/sessions",
                serde_json::json!({
                    "workDir": tmp.path().to_str().unwrap(),
                    "agentType": "claude"
                }),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Wait out the grace window so the record is gone, not just
        // terminated.
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while state.sessions.get(&id).await.is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("session never purged");

        let response = app
            .oneshot(
                Request::delete(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn quota_exhaustion_is_429() {
        let (state, tmp) = test_state();
        let app = app_router(state.clone());
        let dir = tmp.path().to_str().unwrap();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/sessions",
                    serde_json::json!({ "workDir": dir, "agentType": "claude" }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .oneshot(post_json(
                "/api/sessions",
                serde_json::json!({ "workDir": dir, "agentType": "claude" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["error"]["code"], "quota_exceeded");

        state.sessions.shutdown().await;
    }
}
