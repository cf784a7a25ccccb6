use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use gateway_api::{create_routes, AppState};
use gateway_core::config::{HealthCheckConfig, JobEngineConfig};
use gateway_core::models::{JobStatus, TestJob};
use gateway_core::traits::TestResultRepository;
use gateway_dispatcher::{
    launch_queue, ContinuousHealthLoop, JobDispatcher, JobRunner, RemediationService,
    ResultReporter, SweepGuard,
};
use gateway_infrastructure::observability::MetricsCollector;
use gateway_testing_utils::{
    wait_for_terminal, ChannelBuilder, MockChannelDirectory, MockTestJobRepository,
    MockTestResultRepository, ScriptedTester, TestJobBuilder, TestResultBuilder,
};
use gateway_worker::{CancellationRegistry, RetryCoordinator, WorkerPool};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    jobs: Arc<MockTestJobRepository>,
    results: Arc<MockTestResultRepository>,
    _shutdown_tx: broadcast::Sender<()>,
}

/// 创建测试用的应用状态
fn create_test_app(tester: ScriptedTester) -> TestApp {
    create_test_app_with_timeout(tester, Duration::from_secs(30))
}

fn create_test_app_with_timeout(tester: ScriptedTester, request_timeout: Duration) -> TestApp {
    let results = Arc::new(MockTestResultRepository::new());
    let jobs = Arc::new(MockTestJobRepository::with_results(results.clone()));
    let directory = Arc::new(MockChannelDirectory::with_channels(vec![
        ChannelBuilder::new(1).with_models(&["gpt-4o", "gpt-4o-mini"]).build(),
        ChannelBuilder::new(2).with_models(&["m1", "m2"]).build(),
    ]));
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(CancellationRegistry::new());
    let engine_config = JobEngineConfig::default();
    let coordinator = Arc::new(RetryCoordinator::new(
        Arc::new(tester),
        engine_config.backoff.clone(),
        Duration::from_secs(1),
    ));

    let pool = Arc::new(WorkerPool::new(
        jobs.clone(),
        results.clone(),
        directory.clone(),
        coordinator.clone(),
        metrics.clone(),
    ));
    let (launch_tx, launch_rx) = launch_queue(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(JobRunner::new(pool, jobs.clone(), registry.clone(), launch_rx).run(shutdown_rx));

    let health_config = HealthCheckConfig {
        channel_delay_ms: 0,
        ..HealthCheckConfig::default()
    };
    let state = AppState {
        dispatcher: Arc::new(JobDispatcher::new(
            jobs.clone(),
            registry,
            launch_tx,
            engine_config,
            metrics.clone(),
        )),
        reporter: Arc::new(ResultReporter::new(jobs.clone(), results.clone(), 500)),
        remediation: Arc::new(RemediationService::new(
            jobs.clone(),
            results.clone(),
            directory.clone(),
            coordinator.clone(),
        )),
        health_loop: Arc::new(ContinuousHealthLoop::new(
            directory,
            coordinator,
            SweepGuard::new(),
            health_config,
            metrics,
        )),
        metrics_handle: None,
    };

    TestApp {
        router: create_routes(state, request_timeout),
        jobs,
        results,
        _shutdown_tx: shutdown_tx,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, String) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, String) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, String) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn post_empty(app: &TestApp, uri: &str) -> (StatusCode, String) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

fn finished_job(app: &TestApp, status: JobStatus) -> TestJob {
    let mut job = TestJobBuilder::new().build();
    job.status = status;
    app.jobs.insert(job)
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(ScriptedTester::new());
    let (status, body) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["status"], "ok");
}

#[tokio::test]
async fn test_submit_job_and_poll_progress() {
    let app = create_test_app(ScriptedTester::new());

    let (status, body) = post_json(
        &app,
        "/api/channel-tests/jobs",
        json!({
            "requested_by": "ops",
            "options": { "channel_ids": [1, 2] },
            "concurrency": 2
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = parse(&body)["data"]["job_id"].as_i64().unwrap();

    wait_for_terminal(app.jobs.as_ref(), job_id, Duration::from_secs(2))
        .await
        .expect("job should finish");

    let (status, body) = get(&app, &format!("/api/channel-tests/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let data = &parse(&body)["data"];
    assert_eq!(data["status"], "succeeded");
    assert_eq!(data["total_models"], 4);
    assert_eq!(data["progress"], 1.0);
    assert_eq!(data["requested_by"], "ops");

    let (status, body) = get(&app, "/api/channel-tests/jobs?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_without_scope_is_rejected() {
    let app = create_test_app(ScriptedTester::new());

    let (status, body) = post_json(&app, "/api/channel-tests/jobs", json!({ "options": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = &parse(&body)["error"];
    assert_eq!(error["type"], "INVALID_JOB_REQUEST");
    assert_eq!(error["code"], 400);
    assert!(error["timestamp"].is_string());
    assert_eq!(app.jobs.count(), 0);
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let app = create_test_app(ScriptedTester::new());

    let (status, body) = get(&app, "/api/channel-tests/jobs/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse(&body)["error"]["type"], "JOB_NOT_FOUND");

    let (status, _) = get(&app, "/api/channel-tests/jobs/999/export").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_finished_job_conflicts() {
    let app = create_test_app(ScriptedTester::new());
    let job = finished_job(&app, JobStatus::Succeeded);

    let (status, body) = post_empty(&app, &format!("/api/channel-tests/jobs/{}/cancel", job.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse(&body)["error"]["type"], "JOB_ALREADY_FINISHED");
}

#[tokio::test]
async fn test_list_and_export_results() {
    let app = create_test_app(ScriptedTester::new());
    let job = finished_job(&app, JobStatus::Succeeded);
    for model in ["gpt-4o", "gpt-4o-mini", "o1"] {
        app.results
            .append(&TestResultBuilder::new(job.id, 1, model).build())
            .await
            .unwrap();
    }

    let (status, body) = get(
        &app,
        &format!("/api/channel-tests/jobs/{}/results?page=2&page_size=2", job.id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = &parse(&body)["data"];
    assert_eq!(data["total"], 3);
    assert_eq!(data["page"], 2);
    assert_eq!(data["items"].as_array().unwrap().len(), 1);
    assert_eq!(data["items"][0]["model_name"], "o1");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/channel-tests/jobs/{}/export", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("JobID,ChannelID,ChannelName,Model"));
}

#[tokio::test]
async fn test_retry_result_requires_terminal_job() {
    let app = create_test_app(ScriptedTester::new());
    let running = finished_job(&app, JobStatus::Running);
    let result = app
        .results
        .append(&TestResultBuilder::new(running.id, 1, "gpt-4o").failed("timeout").build())
        .await
        .unwrap();

    let uri = format!(
        "/api/channel-tests/jobs/{}/results/{}/retry",
        running.id, result.id
    );
    let (status, body) = post_empty(&app, &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse(&body)["error"]["type"], "JOB_STILL_ACTIVE");

    let done = finished_job(&app, JobStatus::Succeeded);
    let result = app
        .results
        .append(&TestResultBuilder::new(done.id, 1, "gpt-4o").failed("timeout").build())
        .await
        .unwrap();
    let uri = format!("/api/channel-tests/jobs/{}/results/{}/retry", done.id, result.id);
    let (status, body) = post_empty(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let data = &parse(&body)["data"];
    assert_eq!(data["result"]["success"], true);
    assert_eq!(data["result"]["retry_count"], 1);
    assert_eq!(data["counters"]["success_count"], 1);
}

#[tokio::test]
async fn test_slow_request_times_out_but_export_does_not() {
    let app = create_test_app_with_timeout(
        ScriptedTester::new().with_delay(Duration::from_millis(300)),
        Duration::from_millis(100),
    );
    let done = finished_job(&app, JobStatus::Succeeded);
    let result = app
        .results
        .append(&TestResultBuilder::new(done.id, 1, "gpt-4o").failed("timeout").build())
        .await
        .unwrap();

    let uri = format!("/api/channel-tests/jobs/{}/results/{}/retry", done.id, result.id);
    let (status, _) = post_empty(&app, &uri).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let (status, body) = get(&app, &format!("/api/channel-tests/jobs/{}/export", done.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.lines().count(), 2);
}

#[tokio::test]
async fn test_delete_failed_models_dry_run() {
    let app = create_test_app(ScriptedTester::new());
    let job = finished_job(&app, JobStatus::Succeeded);
    app.results
        .append(&TestResultBuilder::new(job.id, 2, "m2").failed("model not found").build())
        .await
        .unwrap();

    let (status, body) = post_json(
        &app,
        &format!("/api/channel-tests/jobs/{}/delete-failed-models", job.id),
        json!({ "dry_run": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = &parse(&body)["data"];
    assert_eq!(data["dry_run"], true);
    assert_eq!(data["channels"][0]["channel_id"], 2);
    assert_eq!(data["channels"][0]["removed"], json!(["m2"]));
    assert_eq!(data["channels"][0]["remaining"], json!(["m1"]));
}

#[tokio::test]
async fn test_trigger_sweep_conflicts_while_running() {
    let app = create_test_app(ScriptedTester::new().with_delay(Duration::from_millis(100)));

    let (status, _) = post_empty(&app, "/api/channels/test").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = post_empty(&app, "/api/channels/test").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse(&body)["error"]["type"], "SWEEP_IN_PROGRESS");
}

#[tokio::test]
async fn test_metrics_disabled_returns_404() {
    let app = create_test_app(ScriptedTester::new());
    let (status, _) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
