use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use bay_config::AuthSettings;
use bay_orchestrator::Bay;
use tower_http::trace::TraceLayer;

use crate::auth::require_owner;
use crate::handlers::{admin, capabilities, cargos, history, profiles, sandboxes, skills};
use crate::state::AppState;

pub fn build_app(bay: Arc<Bay>, auth: AuthSettings) -> Router {
    let state = AppState { bay, auth: Arc::new(auth) };

    Router::new()
        // Sandboxes
        .route("/v1/sandboxes", post(sandboxes::create).get(sandboxes::list))
        .route("/v1/sandboxes/:id", get(sandboxes::get).delete(sandboxes::delete))
        .route("/v1/sandboxes/:id/keepalive", post(sandboxes::keepalive))
        .route("/v1/sandboxes/:id/stop", post(sandboxes::stop))
        .route("/v1/sandboxes/:id/extend_ttl", post(sandboxes::extend_ttl))
        // Capabilities
        .route("/v1/sandboxes/:id/python/exec", post(capabilities::exec_python))
        .route("/v1/sandboxes/:id/shell/exec", post(capabilities::exec_shell))
        .route(
            "/v1/sandboxes/:id/filesystem/files",
            get(capabilities::read_file)
                .put(capabilities::write_file)
                .delete(capabilities::delete_file),
        )
        .route(
            "/v1/sandboxes/:id/filesystem/directories",
            get(capabilities::list_directory),
        )
        .route("/v1/sandboxes/:id/filesystem/upload", post(capabilities::upload))
        .route("/v1/sandboxes/:id/filesystem/download", get(capabilities::download))
        .route("/v1/sandboxes/:id/browser/exec", post(capabilities::browser_exec))
        .route("/v1/sandboxes/:id/browser/exec_batch", post(capabilities::browser_batch))
        // Execution history
        .route("/v1/executions", get(history::list))
        .route("/v1/executions/:id", get(history::get).patch(history::annotate))
        .route("/v1/sandboxes/:id/executions/last", get(history::last_for_sandbox))
        // Skills
        .route(
            "/v1/skills/candidates",
            post(skills::create_candidate).get(skills::list_candidates),
        )
        .route("/v1/skills/candidates/:id", get(skills::get_candidate))
        .route("/v1/skills/candidates/:id/evaluate", post(skills::evaluate))
        .route("/v1/skills/candidates/:id/promote", post(skills::promote))
        .route("/v1/skills/releases", get(skills::list_releases))
        .route("/v1/skills/releases/:id/rollback", post(skills::rollback))
        // Cargos
        .route("/v1/cargos", post(cargos::create).get(cargos::list))
        .route("/v1/cargos/:id", get(cargos::get).delete(cargos::delete))
        // Profiles
        .route("/v1/profiles", get(profiles::list))
        // Admin
        .route("/v1/admin/gc", post(admin::trigger_gc))
        // Auth middleware applies to all routes above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_owner))
        // Health stays public for load-balancer probes
        .route("/v1/admin/health", get(admin::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use bay_config::{BaySettings, ProfileCatalog, RuntimeSettings};
    use bay_driver::StubDriver;
    use bay_store::InMemoryStore;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_TOKEN: &str = "test-token";

    fn test_settings(dev_mode: bool) -> BaySettings {
        let mut settings = BaySettings::default();
        settings.auth.dev_mode = dev_mode;
        settings.auth.token = Some(TEST_TOKEN.to_string());
        settings.runtime = RuntimeSettings {
            readiness_deadline_secs: 2,
            readiness_initial_backoff_ms: 20,
            call_timeout_secs: 5,
            max_call_timeout_secs: 30,
        };
        settings.instance = "inst-test".into();
        settings
    }

    fn test_app_with(settings: BaySettings) -> (Router, Arc<StubDriver>) {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(StubDriver::new());
        let bay = Arc::new(Bay::new(
            store,
            driver.clone(),
            ProfileCatalog::builtin(settings.defaults.idle_timeout_secs),
            &settings,
        ));
        (build_app(bay, settings.auth.clone()), driver)
    }

    /// Dev-mode app wired to a mock ship runtime that is ready and answers
    /// python execs with "42".
    async fn ready_app() -> (Router, Arc<StubDriver>, MockServer) {
        let (app, driver) = test_app_with(test_settings(true));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mount_path": "/workspace",
                "capabilities": ["python", "shell", "filesystem"],
                "runtime_kind": "ship",
                "api_version": "1.0",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/exec/python"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": "42\n", "stdout": "42\n", "stderr": "",
                "exit_code": 0, "success": true, "duration_ms": 11,
            })))
            .mount(&server)
            .await;
        driver.set_endpoint(server.uri());
        (app, driver, server)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_token_returns_401() {
        let (app, _driver) = test_app_with(test_settings(false));
        let resp = app
            .oneshot(Request::builder().uri("/v1/sandboxes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let (app, _driver) = test_app_with(test_settings(false));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/sandboxes")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_token_lists_sandboxes() {
        let (app, _driver) = test_app_with(test_settings(false));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/sandboxes")
                    .header("Authorization", format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _driver) = test_app_with(test_settings(false));
        let resp = app
            .oneshot(Request::builder().uri("/v1/admin/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // ── Lazy start, exec, delete (S1) ─────────────────────────────────────────

    #[tokio::test]
    async fn create_exec_delete_lifecycle() {
        let (app, _driver, _server) = ready_app().await;

        let (status, created) = send(
            &app,
            post_json("/v1/sandboxes", json!({ "profile": "python-default" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "idle");
        assert!(created["current_session_id"].is_null());
        let id = created["id"].as_str().unwrap().to_string();

        // One call, no client retry: lazy start converges inside it.
        let (status, outcome) = send(
            &app,
            post_json(
                &format!("/v1/sandboxes/{id}/python/exec"),
                json!({ "code": "print(2*21)" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(outcome["output"].as_str().unwrap().contains("42"));

        let (status, _) = send(
            &app,
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/v1/sandboxes/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &app,
            Request::builder()
                .uri(format!("/v1/sandboxes/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");

        // History survives the sandbox.
        let (status, rows) = send(
            &app,
            Request::builder().uri("/v1/executions").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["type"], "python");
    }

    // ── Idempotent create (S5) ────────────────────────────────────────────────

    #[tokio::test]
    async fn idempotency_key_replays_and_conflicts() {
        let (app, _driver, _server) = ready_app().await;
        let body = json!({ "profile": "python-default", "ttl_seconds": 600 });

        let with_key = |body: Value| {
            Request::builder()
                .method(Method::POST)
                .uri("/v1/sandboxes")
                .header("content-type", "application/json")
                .header("Idempotency-Key", "K1")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, first) = send(&app, with_key(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, second) = send(&app, with_key(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first, second, "replay must be byte-identical");

        // Same key, different body.
        let (status, body) = send(
            &app,
            with_key(json!({ "profile": "python-default", "ttl_seconds": 601 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");
    }

    // ── Client contract violations ────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_paths_rejected() {
        let (app, _driver, _server) = ready_app().await;
        let (_, created) = send(
            &app,
            post_json("/v1/sandboxes", json!({ "profile": "python-default" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        for bad in ["/etc/passwd", "a/../../b"] {
            let (status, body) = send(
                &app,
                Request::builder()
                    .uri(format!(
                        "/v1/sandboxes/{id}/filesystem/files?path={}",
                        urlencode(bad)
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "path: {bad}");
            assert_eq!(body["error"]["code"], "invalid_path");
        }
    }

    #[tokio::test]
    async fn undeclared_capability_rejected() {
        let (app, _driver, _server) = ready_app().await;
        let (_, created) = send(
            &app,
            post_json("/v1/sandboxes", json!({ "profile": "python-default" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(
            &app,
            post_json(
                &format!("/v1/sandboxes/{id}/browser/exec"),
                json!({ "command": "open https://example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "capability_not_supported");
    }

    #[tokio::test]
    async fn extend_ttl_on_infinite_sandbox_conflicts() {
        let (app, _driver, _server) = ready_app().await;
        let (_, created) = send(
            &app,
            post_json("/v1/sandboxes", json!({ "profile": "python-default" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(
            &app,
            post_json(
                &format!("/v1/sandboxes/{id}/extend_ttl"),
                json!({ "ttl_seconds": 600 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "sandbox_ttl_infinite");
    }

    // ── Retry hints ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn not_ready_carries_retry_after_headers() {
        let (app, driver) = test_app_with(test_settings(true));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({ "error": "warming up" })),
            )
            .mount(&server)
            .await;
        driver.set_endpoint(server.uri());

        let (_, created) = send(
            &app,
            post_json("/v1/sandboxes", json!({ "profile": "python-default" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let resp = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/sandboxes/{id}/python/exec"),
                json!({ "code": "1" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().contains_key("Retry-After-Ms"));
        assert!(resp.headers().contains_key("Retry-After"));
    }

    // ── Owner scoping over HTTP ───────────────────────────────────────────────

    #[tokio::test]
    async fn owners_cannot_see_each_other() {
        let (app, _driver, _server) = ready_app().await;

        let mut req = post_json("/v1/sandboxes", json!({ "profile": "python-default" }));
        req.headers_mut().insert("x-bay-owner", "alice".parse().unwrap());
        let (_, created) = send(&app, req).await;
        let id = created["id"].as_str().unwrap();

        let mut req = Request::builder()
            .uri(format!("/v1/sandboxes/{id}"))
            .body(Body::empty())
            .unwrap();
        req.headers_mut().insert("x-bay-owner", "bob".parse().unwrap());
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── Profiles ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn profiles_are_listed() {
        let (app, _driver) = test_app_with(test_settings(true));
        let (status, body) = send(
            &app,
            Request::builder().uri("/v1/profiles").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"python-default"));
        assert!(ids.contains(&"python-browser"));
    }

    fn urlencode(s: &str) -> String {
        s.replace('/', "%2F").replace("..", "%2E%2E")
    }
}
