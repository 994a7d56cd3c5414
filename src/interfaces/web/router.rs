use axum::{
    Json, Router,
    http::Method,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::handlers::{mcp, monitoring, results, sessions, sessions_v2};

fn build_cors() -> CorsLayer {
    // Spoke clusters and the dashboard push from other origins.
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/sessions/{id}/logs", get(sessions::get_session_logs))
        .route(
            "/api/sessions/{id}/result",
            get(sessions::get_session_result),
        )
        .route("/api/sessions/{id}/file", get(sessions::get_session_file))
        .route(
            "/api/v2/sessions",
            get(sessions::list_sessions).post(sessions_v2::create_session_v2),
        )
        .route(
            "/api/v2/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/v2/sessions/{id}/results",
            get(sessions::get_session_result),
        )
        .route(
            "/api/webhooks/result/{id}",
            get(results::get_pushed_result).post(results::push_result),
        )
        .route("/api/monitoring/clusters", get(monitoring::get_clusters))
        .route("/api/monitoring/heartbeat", post(monitoring::push_heartbeat))
        .route("/api/mcp/test", post(mcp::test_mcp_servers))
        .layer(build_cors())
        .with_state(state)
}

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch::{DispatcherConfig, JobDispatcher};
    use crate::core::heartbeat::ClusterHeartbeatMonitor;
    use crate::core::runtime::mock::MockRuntime;
    use crate::core::session::JobStatus;
    use crate::core::store::SessionStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_state() -> (AppState, Arc<MockRuntime>) {
        let store = SessionStore::open_in_memory().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let dispatcher = Arc::new(JobDispatcher::new(
            store.clone(),
            runtime.clone(),
            DispatcherConfig {
                poll_interval: Duration::from_millis(10),
                retry_budget: 3,
            },
        ));
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        let state = AppState::new(
            store,
            dispatcher,
            runtime.clone(),
            Arc::new(ClusterHeartbeatMonitor::new()),
            log_tx,
        );
        (state, runtime)
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (state, _) = test_state();
        let app = build_api_router(state);
        let (status, json) = json_request(app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn create_session_requires_prompt() {
        let (state, _) = test_state();
        let app = build_api_router(state);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t1", "prompt": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn scenario_a_simple_session_lifecycle() {
        let (state, runtime) = test_state();
        let app = build_api_router(state.clone());

        let (status, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t1", "prompt": "ping host" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        let id = created["id"].as_str().unwrap().to_string();

        let job = format!("{}-step-0", id);
        runtime.set_status(&job, JobStatus::Succeeded);
        runtime.set_logs(&job, "resolving host...\nreply from host");
        runtime.set_output(&job, r#"{"kind":"generic","status":"succeeded"}"#);
        state.dispatcher.poll_once().await.unwrap();

        let (status, detail) =
            json_request(app.clone(), Method::GET, &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "completed");
        assert_eq!(detail["completed_steps"], 1);

        let (status, logs) = json_request(
            app,
            Method::GET,
            &format!("/api/sessions/{}/logs", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(logs["logs"].as_str().unwrap().contains("reply from host"));
    }

    #[tokio::test]
    async fn scenario_b_parallel_session_over_http() {
        let (state, runtime) = test_state();
        let app = build_api_router(state.clone());

        let (status, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/v2/sessions",
            Some(serde_json::json!({
                "name": "adv",
                "prompt": "audit the target",
                "agent_types": ["recon", "exploit", "report"],
                "mode": "parallel"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["mode"], "parallel");
        assert_eq!(created["total_steps"], 3);
        assert_eq!(created["job_names"].as_array().unwrap().len(), 3);
        let id = created["id"].as_str().unwrap().to_string();

        runtime.set_status(&format!("{}-step-0", id), JobStatus::Succeeded);
        runtime.set_status(&format!("{}-step-1", id), JobStatus::Succeeded);
        runtime.set_status(&format!("{}-step-2", id), JobStatus::Failed);
        state.dispatcher.poll_once().await.unwrap();

        let (_, detail) =
            json_request(app, Method::GET, &format!("/api/v2/sessions/{}", id), None).await;
        assert_eq!(detail["status"], "failed");
        assert_eq!(detail["completed_steps"], 3);
    }

    #[tokio::test]
    async fn scenario_c_sequential_fail_fast_over_http() {
        let (state, runtime) = test_state();
        let app = build_api_router(state.clone());

        let (_, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/v2/sessions",
            Some(serde_json::json!({
                "name": "adv",
                "prompt": "audit the target",
                "agent_types": ["recon", "exploit", "report"],
                "mode": "sequential"
            })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["total_steps"], 3);

        runtime.set_status(&format!("{}-step-0", id), JobStatus::Failed);
        state.dispatcher.poll_once().await.unwrap();
        state.dispatcher.poll_once().await.unwrap();

        assert_eq!(runtime.submitted_jobs().len(), 1);
        let (_, detail) =
            json_request(app, Method::GET, &format!("/api/v2/sessions/{}", id), None).await;
        assert_eq!(detail["status"], "failed");
        assert_eq!(detail["total_steps"], 3);
        assert_eq!(detail["completed_steps"], 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_over_http() {
        let (state, _) = test_state();
        let app = build_api_router(state.clone());

        let (_, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t", "prompt": "p" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let (status, json) = json_request(
                app.clone(),
                Method::DELETE,
                &format!("/api/sessions/{}", id),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["success"], true);
        }

        // Never-existing id is also success.
        let (status, _) = json_request(
            app.clone(),
            Method::DELETE,
            "/api/sessions/no-such-session",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, detail) =
            json_request(app, Method::GET, &format!("/api/sessions/{}", id), None).await;
        assert_eq!(detail["status"], "deleted");
    }

    #[tokio::test]
    async fn result_is_pending_then_not_found_rules() {
        let (state, _) = test_state();
        let app = build_api_router(state.clone());

        let (_, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t", "prompt": "p" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        // No result yet on a live session -> 202 with current status.
        let (status, _) = json_request(
            app.clone(),
            Method::GET,
            &format!("/api/sessions/{}/result", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = json_request(
            app,
            Method::GET,
            "/api/sessions/no-such-session/result",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_push_roundtrip_and_conflict() {
        let (state, runtime) = test_state();
        let app = build_api_router(state.clone());

        let (_, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t", "prompt": "p" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let pushed = serde_json::json!({
            "kind": "generic",
            "status": "succeeded",
            "flags_found": ["FLAG{pushed}"],
            "vulnerabilities": [],
            "outputs": { "recon": "done" }
        });
        let (status, _) = json_request(
            app.clone(),
            Method::POST,
            &format!("/api/webhooks/result/{}", id),
            Some(pushed.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Returned field-for-field by the result endpoints.
        let (status, got) = json_request(
            app.clone(),
            Method::GET,
            &format!("/api/sessions/{}/result", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(got, pushed);

        // Finalize the session, then a duplicate webhook write conflicts.
        runtime.set_status(&format!("{}-step-0", id), JobStatus::Succeeded);
        state.dispatcher.poll_once().await.unwrap();
        let (status, _) = json_request(
            app,
            Method::POST,
            &format!("/api/webhooks/result/{}", id),
            Some(pushed),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn file_endpoint_formats() {
        let (state, runtime) = test_state();
        let app = build_api_router(state.clone());

        let (_, created) = json_request(
            app.clone(),
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({ "name": "t", "prompt": "p" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        let job = format!("{}-step-0", id);
        runtime.set_status(&job, JobStatus::Succeeded);
        runtime.set_output(
            &job,
            r#"{"kind":"generic","status":"succeeded","flags_found":["FLAG{f}"]}"#,
        );
        state.dispatcher.poll_once().await.unwrap();

        let (status, json) = json_request(
            app.clone(),
            Method::GET,
            &format!("/api/sessions/{}/file?format=json", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["kind"], "generic");

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("/api/sessions/{}/file?format=raw", id))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("FLAG{f}"));

        let (status, _) = json_request(
            app,
            Method::GET,
            &format!("/api/sessions/{}/file?format=xml", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn monitoring_ingest_and_snapshot() {
        let (state, _) = test_state();
        let app = build_api_router(state);

        let (status, _) = json_request(
            app.clone(),
            Method::POST,
            "/api/monitoring/heartbeat",
            Some(serde_json::json!({
                "cluster_name": "spoke-a",
                "cpu_usage": 37.5,
                "memory_usage": 61.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, snap) =
            json_request(app, Method::GET, "/api/monitoring/clusters", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(snap["server_time"].is_string());
        assert_eq!(snap["clusters"]["spoke-a"]["status"], "online");
        assert_eq!(snap["clusters"]["spoke-a"]["cpu_usage"], 37.5);
    }

    #[tokio::test]
    async fn heartbeat_rejects_out_of_range_usage() {
        let (state, _) = test_state();
        let app = build_api_router(state);
        let (status, _) = json_request(
            app,
            Method::POST,
            "/api/monitoring/heartbeat",
            Some(serde_json::json!({
                "cluster_name": "spoke-a",
                "cpu_usage": 250.0,
                "memory_usage": 10.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mcp_test_always_returns_entries() {
        let (state, _) = test_state();
        let app = build_api_router(state);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/mcp/test",
            Some(serde_json::json!({
                "timeout": 1,
                "servers": [
                    { "name": "bad-transport", "transport": "websocket" },
                    { "name": "no-url", "transport": "sse" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "bad-transport");
        assert_eq!(entries[0]["reachable"], false);
        assert!(entries[1]["detail"].as_str().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn api_route_contract_has_all_expected_paths() {
        let paths = [
            "/api/health",
            "/api/logs",
            "/api/sessions",
            "/api/sessions/some-id",
            "/api/sessions/some-id/logs",
            "/api/sessions/some-id/result",
            "/api/sessions/some-id/file",
            "/api/v2/sessions",
            "/api/v2/sessions/some-id",
            "/api/v2/sessions/some-id/results",
            "/api/webhooks/result/some-id",
            "/api/monitoring/clusters",
            "/api/monitoring/heartbeat",
            "/api/mcp/test",
        ];

        let unique: HashSet<&str> = paths.iter().copied().collect();
        assert_eq!(unique.len(), paths.len(), "duplicate routes in contract");

        let (state, _) = test_state();
        let app = build_api_router(state);
        for path in paths {
            let req = Request::builder()
                .method(Method::PUT)
                .uri(path)
                .body(Body::empty())
                .expect("request should build");
            let resp = app
                .clone()
                .oneshot(req)
                .await
                .expect("router oneshot should succeed");
            assert_ne!(
                resp.status(),
                StatusCode::NOT_FOUND,
                "route missing from router: {}",
                path
            );
        }
    }
}
