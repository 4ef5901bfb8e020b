//! Adapter protocol over HTTP

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use trafficlight_common::{Result, ServerType, TestStatus};
use trafficlight_daemon::{
    config::OrchestratorConfig,
    homerunner::{HomeServer, ServerProvisioner},
    http,
    scenario::{Scenario, ScenarioContext, TestDefinition},
    Orchestrator,
};

struct LocalServer;

#[async_trait]
impl ServerProvisioner for LocalServer {
    async fn create(&self, _test_case_id: &str, _server_type: ServerType) -> Result<Vec<HomeServer>> {
        Ok(vec![HomeServer::new("hs1", "http://localhost:8008")])
    }
}

/// alice registers, then the test ends
struct RegisterOnly;

#[async_trait]
impl Scenario for RegisterOnly {
    fn name(&self) -> &str {
        "register_only"
    }

    fn definition(&self) -> TestDefinition {
        TestDefinition::new()
            .client("alice", [trafficlight_common::CapabilityType::ElementWeb])
            .servers(ServerType::SynapseDevelop, &["server"])
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let server = ctx.server("server")?;
        ctx.client("alice")?.register(&server).await
    }
}

fn app(config: OrchestratorConfig) -> (Router, Orchestrator) {
    let orchestrator = Orchestrator::new(config, Arc::new(LocalServer));
    (http::router(orchestrator.clone()), orchestrator)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register(router: &Router, handle: &str) {
    let (status, body) = send(
        router,
        Method::POST,
        &format!("/client/{}/register", handle),
        Some(json!({"type": "element-web", "version": "1.11"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

async fn poll(router: &Router, handle: &str) -> Value {
    let (status, body) = send(router, Method::GET, &format!("/client/{}/poll", handle), None).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_unknown_handle_is_told_to_exit() {
    let (router, orchestrator) = app(OrchestratorConfig::default());

    let body = poll(&router, "ghost").await;
    assert_eq!(body["action"], "exit");
    assert!(body["data"]["reason"].is_string());
    assert!(orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_unbound_adapter_idles_and_rejects_responses() {
    let (router, _) = app(OrchestratorConfig::default());
    register(&router, "a1").await;
    register(&router, "a1").await;

    assert_eq!(poll(&router, "a1").await, json!({"action": "idle", "data": {"delay": 30000}}));

    let (status, body) = send(
        &router,
        Method::POST,
        "/client/a1/respond",
        Some(json!({"response": "registered", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("a1"));

    let (status, _) = send(
        &router,
        Method::POST,
        "/client/nobody/respond",
        Some(json!({"response": "registered"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        Method::POST,
        "/client/nobody/error",
        Some(json!({"error": {"type": "action", "path": "x", "details": "y"}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_a_client_error() {
    let (router, _) = app(OrchestratorConfig::default());
    register(&router, "a1").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/client/a1/respond")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_full_exchange_over_http() {
    let (router, orchestrator) = app(OrchestratorConfig::default());
    orchestrator.add_scenario(Arc::new(RegisterOnly));
    register(&router, "a1").await;
    let id = orchestrator.promote_next().unwrap();

    // Re-registering while bound is refused
    let (status, _) = send(
        &router,
        Method::POST,
        "/client/a1/register",
        Some(json!({"type": "element-web"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let action = loop {
        let action = poll(&router, "a1").await;
        if action["action"] != "idle" {
            break action;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(action["action"], "register");
    assert_eq!(action["data"]["username"], "user_alice");
    assert_eq!(action["data"]["homeserver_url"]["local"], "http://localhost:8008");
    assert_eq!(action["data"]["homeserver_url"]["local_docker"], "http://10.0.2.2:8008");

    let (status, body) = send(
        &router,
        Method::POST,
        "/client/a1/respond",
        Some(json!({"response": "registered", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    // A second answer has nothing to resolve
    let (status, _) = send(
        &router,
        Method::POST,
        "/client/a1/respond",
        Some(json!({"response": "registered", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let case = orchestrator.test_case(&id).unwrap();
    while !case.status().is_terminal() {
        tokio::task::yield_now().await;
    }
    assert_eq!(case.status(), TestStatus::Success);
    let exit = poll(&router, "a1").await;
    assert_eq!(exit["action"], "exit");
    assert_eq!(exit["data"]["reason"], "test case finished");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_upload_is_indexed_by_role() {
    let dir = tempfile::tempdir().unwrap();
    let (router, orchestrator) = app(OrchestratorConfig {
        upload_folder: dir.path().to_path_buf(),
        ..Default::default()
    });
    orchestrator.add_scenario(Arc::new(RegisterOnly));
    register(&router, "a1").await;

    let multipart = |filename: &str| {
        let body = format!(
            "--XBOUNDARYX\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fakepng\r\n\
             --XBOUNDARYX--\r\n",
            filename
        );
        Request::builder()
            .method(Method::POST)
            .uri("/client/a1/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARYX")
            .body(Body::from(body))
            .unwrap()
    };

    // Not bound yet
    let response = router.clone().oneshot(multipart("shot.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let id = orchestrator.promote_next().unwrap();
    let response = router.clone().oneshot(multipart("shot.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = dir.path().join("a1shot.png");
    assert_eq!(std::fs::read(&stored).unwrap(), b"fakepng");

    let (status, detail) = send(&router, Method::GET, &format!("/status/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["files"]["alice_shot.png"], stored.display().to_string());
    assert_ne!(detail["status"], "waiting");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_status_routes() {
    let (router, orchestrator) = app(OrchestratorConfig::default());
    orchestrator.add_scenario(Arc::new(RegisterOnly));
    register(&router, "a1").await;

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()[header::LOCATION], "/status");

    let (status, body) = send(&router, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["adapters"][0]["handle"], "a1");
    assert_eq!(body["suites"][0]["scenario"], "register_only");
    assert_eq!(body["suites"][0]["counts"]["skipped"], 1);
    assert_eq!(body["suites"][0]["test_cases"][0]["status"], "waiting");

    let suite_id = body["suites"][0]["id"].as_str().unwrap().to_string();
    let (status, suite) = send(&router, Method::GET, &format!("/status/suite/{}", suite_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(suite["id"], suite_id.as_str());
    assert_eq!(suite["scenario"], "register_only");
    assert_eq!(suite["counts"]["total"], 1);
    let (status, _) = send(&router, Method::GET, "/status/suite/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/status/junit.xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("register_only"));

    let (status, body) = send(&router, Method::GET, "/status/0000", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}
