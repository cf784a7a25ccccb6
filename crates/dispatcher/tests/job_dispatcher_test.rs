use std::sync::Arc;
use std::time::Duration;

use gateway_core::config::{BackoffConfig, JobEngineConfig};
use gateway_core::models::{JobOptions, JobStatus, SubmitJobRequest, TestMode};
use gateway_core::GatewayError;
use gateway_dispatcher::{launch_queue, JobDispatcher, JobRunner, LaunchRequest};
use gateway_infrastructure::observability::MetricsCollector;
use gateway_testing_utils::{
    wait_for_terminal, ChannelBuilder, MockChannelDirectory, MockTestJobRepository,
    MockTestResultRepository, ScriptedTester, TestJobBuilder,
};
use gateway_worker::{CancellationRegistry, RetryCoordinator, WorkerPool};
use tokio::sync::{broadcast, mpsc};

fn engine_config() -> JobEngineConfig {
    JobEngineConfig {
        default_concurrency: 2,
        max_concurrency: 8,
        default_interval_ms: 0,
        default_retry_limit: 0,
        max_retry_limit: 3,
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..JobEngineConfig::default()
    }
}

fn request(channel_ids: Vec<i64>) -> SubmitJobRequest {
    SubmitJobRequest {
        requested_by: "admin".to_string(),
        options: JobOptions {
            channel_ids,
            ..Default::default()
        },
        concurrency: None,
        interval_ms: None,
        retry_limit: None,
    }
}

fn dispatcher(
    jobs: Arc<MockTestJobRepository>,
    registry: Arc<CancellationRegistry>,
    launch_tx: mpsc::Sender<LaunchRequest>,
) -> JobDispatcher {
    JobDispatcher::new(
        jobs,
        registry,
        launch_tx,
        engine_config(),
        Arc::new(MetricsCollector::new()),
    )
}

/// 完整的 分发器 → 启动队列 → Worker Pool 链路
struct Engine {
    jobs: Arc<MockTestJobRepository>,
    results: Arc<MockTestResultRepository>,
    registry: Arc<CancellationRegistry>,
    dispatcher: JobDispatcher,
    _shutdown_tx: broadcast::Sender<()>,
}

fn engine(directory: MockChannelDirectory, tester: ScriptedTester) -> Engine {
    let results = Arc::new(MockTestResultRepository::new());
    let jobs = Arc::new(MockTestJobRepository::with_results(results.clone()));
    let registry = Arc::new(CancellationRegistry::new());
    let metrics = Arc::new(MetricsCollector::new());
    let coordinator = Arc::new(RetryCoordinator::new(
        Arc::new(tester),
        engine_config().backoff,
        Duration::from_secs(1),
    ));
    let pool = Arc::new(WorkerPool::new(
        jobs.clone(),
        results.clone(),
        Arc::new(directory),
        coordinator,
        metrics.clone(),
    ));

    let (launch_tx, launch_rx) = launch_queue(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = JobRunner::new(pool, jobs.clone(), registry.clone(), launch_rx);
    tokio::spawn(runner.run(shutdown_rx));

    let dispatcher = JobDispatcher::new(
        jobs.clone(),
        registry.clone(),
        launch_tx,
        engine_config(),
        metrics,
    );
    Engine {
        jobs,
        results,
        registry,
        dispatcher,
        _shutdown_tx: shutdown_tx,
    }
}

#[tokio::test]
async fn test_validation_errors_create_no_job() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let (tx, _rx) = launch_queue(4);
    let dispatcher = dispatcher(jobs.clone(), Arc::new(CancellationRegistry::new()), tx);

    let no_scope = dispatcher.submit(request(vec![])).await;
    assert!(matches!(no_scope, Err(GatewayError::InvalidJobRequest(_))));

    let mut selected = request(vec![1]);
    selected.options.test_mode = TestMode::Selected;
    let empty_targets = dispatcher.submit(selected).await;
    assert!(matches!(empty_targets, Err(GatewayError::InvalidJobRequest(_))));

    let mut zero = request(vec![1]);
    zero.concurrency = Some(0);
    let zero_concurrency = dispatcher.submit(zero).await;
    assert!(matches!(zero_concurrency, Err(GatewayError::InvalidJobRequest(_))));

    assert_eq!(jobs.count(), 0);
}

#[tokio::test]
async fn test_validate_applies_defaults_and_caps() {
    let (tx, _rx) = launch_queue(4);
    let dispatcher = dispatcher(
        Arc::new(MockTestJobRepository::new()),
        Arc::new(CancellationRegistry::new()),
        tx,
    );

    let defaults = dispatcher.validate(&request(vec![1])).unwrap();
    assert_eq!(defaults.concurrency, 2);
    assert_eq!(defaults.retry_limit, 0);

    let mut large = request(vec![1]);
    large.concurrency = Some(500);
    large.retry_limit = Some(99);
    large.interval_ms = Some(250);
    let capped = dispatcher.validate(&large).unwrap();
    assert_eq!(capped.concurrency, 8);
    assert_eq!(capped.retry_limit, 3);
    assert_eq!(capped.interval_ms, 250);
}

#[tokio::test]
async fn test_persistence_failure_aborts_before_dispatch() {
    let jobs = Arc::new(MockTestJobRepository::new());
    jobs.fail_on_create(true);
    let registry = Arc::new(CancellationRegistry::new());
    let (tx, mut rx) = launch_queue(4);
    let dispatcher = dispatcher(jobs.clone(), registry.clone(), tx);

    let result = dispatcher.submit(request(vec![1])).await;
    assert!(matches!(result, Err(GatewayError::DatabaseOperation(_))));
    assert_eq!(jobs.count(), 0);
    assert!(registry.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_closed_queue_finalizes_job_as_failed() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let registry = Arc::new(CancellationRegistry::new());
    let (tx, rx) = launch_queue(4);
    drop(rx);
    let dispatcher = dispatcher(jobs.clone(), registry.clone(), tx);

    let job_id = dispatcher.submit(request(vec![1])).await.unwrap();

    let job = jobs.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .contains("job runner is not running"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_full_queue_finalizes_job_as_failed() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let registry = Arc::new(CancellationRegistry::new());
    let (tx, _rx) = launch_queue(1);
    let dispatcher = dispatcher(jobs.clone(), registry.clone(), tx);

    let accepted = dispatcher.submit(request(vec![1])).await.unwrap();
    let rejected = dispatcher.submit(request(vec![1])).await.unwrap();

    assert_eq!(jobs.get(accepted).unwrap().status, JobStatus::Pending);
    let failed = jobs.get(rejected).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("launch queue is full"));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_submitted_job_runs_to_completion() {
    let directory = MockChannelDirectory::with_channels(vec![
        ChannelBuilder::new(1).with_models(&["gpt-4o", "gpt-4o-mini"]).build(),
        ChannelBuilder::new(2).with_models(&["claude-3-haiku"]).build(),
    ]);
    let engine = engine(directory, ScriptedTester::new());

    let job_id = engine.dispatcher.submit(request(vec![1, 2])).await.unwrap();
    let job = wait_for_terminal(engine.jobs.as_ref(), job_id, Duration::from_secs(2))
        .await
        .expect("job should finish");

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.total_models, 3);
    assert_eq!(job.completed_count, 3);
    assert_eq!(job.success_count, 3);
    assert_eq!(engine.results.results_for_job(job_id).len(), 3);

    let view = engine.dispatcher.get_job(job_id).await.unwrap();
    assert_eq!(view.progress, 1.0);

    // 执行结束后注册表中的取消标志被移除
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.registry.get(job_id).is_none());
}

#[tokio::test]
async fn test_cancel_freezes_progress() {
    let directory = MockChannelDirectory::with_channels(vec![ChannelBuilder::new(1)
        .with_models(&["m1", "m2", "m3", "m4", "m5"])
        .build()]);
    let engine = engine(
        directory,
        ScriptedTester::new().with_delay(Duration::from_millis(40)),
    );

    let mut submit = request(vec![1]);
    submit.concurrency = Some(1);
    let job_id = engine.dispatcher.submit(submit).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.dispatcher.cancel(job_id).await.unwrap();

    let job = wait_for_terminal(engine.jobs.as_ref(), job_id, Duration::from_secs(2))
        .await
        .expect("job should stop");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_count < 5);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = engine.jobs.get(job_id).unwrap();
    assert_eq!(later.completed_count, job.completed_count);
    assert_eq!(
        engine.results.results_for_job(job_id).len() as i64,
        job.completed_count
    );
    assert_eq!(engine.jobs.finalize_count(job_id), 1);

    let again = engine.dispatcher.cancel(job_id).await;
    assert!(matches!(
        again,
        Err(GatewayError::JobAlreadyFinished {
            status: JobStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_without_executor_finalizes_directly() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let (tx, _rx) = launch_queue(4);
    let dispatcher = dispatcher(jobs.clone(), Arc::new(CancellationRegistry::new()), tx);
    let orphan = jobs.insert(TestJobBuilder::new().build());

    let view = dispatcher.cancel(orphan.id).await.unwrap();
    assert_eq!(view.job.status, JobStatus::Cancelled);

    let missing = dispatcher.cancel(999).await;
    assert!(matches!(missing, Err(GatewayError::JobNotFound { id: 999 })));
}

#[tokio::test]
async fn test_list_jobs_newest_first_with_limit() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let (tx, _rx) = launch_queue(4);
    let dispatcher = dispatcher(jobs.clone(), Arc::new(CancellationRegistry::new()), tx);
    for _ in 0..30 {
        jobs.insert(TestJobBuilder::new().build());
    }

    let default_page = dispatcher.list_jobs(None).await.unwrap();
    assert_eq!(default_page.len(), 20);
    assert_eq!(default_page[0].job.id, 30);

    let clamped = dispatcher.list_jobs(Some(0)).await.unwrap();
    assert_eq!(clamped.len(), 1);
}

#[tokio::test]
async fn test_recover_interrupted_jobs() {
    let jobs = Arc::new(MockTestJobRepository::new());
    let registry = Arc::new(CancellationRegistry::new());
    let (tx, _rx) = launch_queue(4);
    let dispatcher = dispatcher(jobs.clone(), registry.clone(), tx);

    let pending = jobs.insert(TestJobBuilder::new().build());
    let mut running = TestJobBuilder::new().build();
    running.status = JobStatus::Running;
    let running = jobs.insert(running);
    let mut finished = TestJobBuilder::new().build();
    finished.status = JobStatus::Succeeded;
    let finished = jobs.insert(finished);
    let active = jobs.insert(TestJobBuilder::new().build());
    registry.register(active.id);

    let recovered = dispatcher.recover_interrupted_jobs().await.unwrap();
    assert_eq!(recovered, 2);

    for id in [pending.id, running.id] {
        let job = jobs.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("interrupted by restart"));
    }
    assert_eq!(jobs.get(finished.id).unwrap().status, JobStatus::Succeeded);
    assert_eq!(jobs.get(active.id).unwrap().status, JobStatus::Pending);
}
