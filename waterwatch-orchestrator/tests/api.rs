use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use waterwatch_orchestrator::{
    api::create_router,
    broker::LocalBroker,
    config::Config,
    context::Orchestrator,
    source::{SourceSet, StaticSource},
    storage::{MemoryStorage, Storage},
};

struct TestApp {
    router: Router,
    orchestrator: Arc<Orchestrator>,
    dws: Arc<StaticSource>,
}

impl TestApp {
    async fn new() -> Self {
        let dws = Arc::new(StaticSource::default());
        let sources = SourceSet {
            dws: dws.clone(),
            treasury: Arc::new(StaticSource::default()),
            correlation: Arc::new(StaticSource::default()),
        };
        let config = Config {
            scheduler_autostart: false,
            worker_count: 2,
            ..Config::new()
        };
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            storage,
            Arc::new(LocalBroker::default()),
            sources,
        ));
        orchestrator.start().await;
        Self {
            router: create_router(orchestrator.clone()),
            orchestrator,
            dws,
        }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn wait_for_job(&self, id: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (_, job) = self.request(Method::GET, &format!("/job/{}", id), None).await;
                if matches!(job["status"].as_str(), Some("succeeded" | "failed" | "cancelled")) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not finish")
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["scheduler_running"], false);
    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_submit_and_fetch_job() {
    let app = TestApp::new().await;
    let (status, job) = app
        .request(
            Method::POST,
            "/job/submit",
            Some(json!({"kind": "treasury_sync", "priority": 3})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["source"], "treasury");
    assert_eq!(job["priority"], 3);

    let id = job["id"].as_str().unwrap().to_string();
    let done = app.wait_for_job(&id).await;
    assert_eq!(done["status"], "succeeded");
    assert_eq!(done["progress"], 100);

    let (status, jobs) = app.request(Method::GET, "/job/list?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    let (_, metrics) = app.request(Method::GET, "/job/metrics", None).await;
    assert_eq!(metrics["succeeded"], 1);
    assert_eq!(metrics["worker_count"], 2);
    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_job_errors() {
    let app = TestApp::new().await;
    let missing = uuid::Uuid::new_v4();
    let (status, body) = app
        .request(Method::GET, &format!("/job/{}", missing), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (_, job) = app
        .request(Method::POST, "/job/submit", Some(json!({"kind": "dws_sync"})))
        .await;
    let id = job["id"].as_str().unwrap().to_string();
    app.wait_for_job(&id).await;

    let (status, _) = app
        .request(Method::POST, &format!("/job/{}/retry", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .request(Method::POST, &format!("/job/{}/cancel", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(Method::POST, "/job/submit", Some(json!({"kind": "weather_sync"})))
        .await;
    assert!(status.is_client_error());
    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_trigger_sync_persists_records() {
    let app = TestApp::new().await;
    app.dws.set_records(vec![
        json!({"project_name": "Dam A", "status": "planning", "municipality": "Giyani"})
            .as_object()
            .cloned()
            .unwrap(),
    ]);

    let (status, body) = app
        .request(Method::POST, "/sync/trigger", Some(json!({"source": "dws"})))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["source"], "dws");
    let ids = body["job_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 1);

    let job = app.wait_for_job(ids[0].as_str().unwrap()).await;
    assert_eq!(job["status"], "succeeded");
    assert_eq!(job["result"]["created"], 1);

    let stored = app.orchestrator.storage().list("project").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].entity_id, "Dam A");
    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_trigger_all_submits_three_jobs() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/sync/trigger",
            Some(json!({"source": "all", "priority": 2})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["job_ids"].as_array().unwrap().len(), 3);

    let (status, _) = app
        .request(Method::POST, "/sync/trigger", Some(json!({"source": "rainfall"})))
        .await;
    assert!(status.is_client_error());
    app.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_scheduler_lifecycle_and_config() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::POST, "/scheduler/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    let (_, body) = app.request(Method::POST, "/scheduler/start", None).await;
    assert_eq!(body["changed"], false);

    let (_, status_body) = app.request(Method::GET, "/scheduler/status", None).await;
    assert_eq!(status_body["running"], true);
    assert_eq!(status_body["sources"].as_array().unwrap().len(), 3);

    let (status, settings) = app
        .request(Method::PUT, "/scheduler/config", Some(json!({"dws_interval": 600})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["dws_interval"], 600);

    let (status, body) = app
        .request(
            Method::PUT,
            "/scheduler/config",
            Some(json!({"backoff_base": 10_000})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());

    let (status, _) = app
        .request(Method::PUT, "/scheduler/config", Some(json!({"polling": 5})))
        .await;
    assert!(status.is_client_error());

    let (_, body) = app.request(Method::POST, "/scheduler/stop", None).await;
    assert_eq!(body["changed"], true);
    let (_, status_body) = app.request(Method::GET, "/scheduler/status", None).await;
    assert_eq!(status_body["running"], false);
    assert_eq!(status_body["config"]["dws_interval"], 600);
    app.orchestrator.shutdown().await;
}
