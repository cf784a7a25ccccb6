use std::sync::Arc;

use anyhow::{Context, Result};
use gateway_api::{create_app, AppState};
use gateway_core::config::AppConfig;
use gateway_core::traits::{ChannelDirectory, ChannelTester, TestJobRepository, TestResultRepository};
use gateway_dispatcher::{
    launch_queue, ContinuousHealthLoop, JobDispatcher, JobRunner, RemediationService,
    ResultReporter, SweepGuard,
};
use gateway_infrastructure::{
    install_prometheus_recorder, DatabaseManager, MetricsCollector, SqliteChannelRepository,
    SqliteTestJobRepository, SqliteTestResultRepository,
};
use gateway_worker::{CancellationRegistry, HttpChannelTester, RetryCoordinator, WorkerPool};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 网关进程：存储、测试执行器、任务引擎、健康巡检与 HTTP 服务
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    dispatcher: Arc<JobDispatcher>,
    runner: JobRunner,
    health_loop: Arc<ContinuousHealthLoop>,
    reporter: Arc<ResultReporter>,
    remediation: Arc<RemediationService>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化渠道测试引擎");

        let metrics_handle = if config.observability.metrics_enabled {
            Some(install_prometheus_recorder()?)
        } else {
            None
        };

        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await.context("数据库建表失败")?;

        let pool = database.pool().clone();
        let job_repo: Arc<dyn TestJobRepository> =
            Arc::new(SqliteTestJobRepository::new(pool.clone()));
        let result_repo: Arc<dyn TestResultRepository> =
            Arc::new(SqliteTestResultRepository::new(pool.clone()));
        let directory: Arc<dyn ChannelDirectory> = Arc::new(SqliteChannelRepository::new(pool));

        let request_timeout = config.job.request_timeout();
        let tester: Arc<dyn ChannelTester> = Arc::new(HttpChannelTester::new(request_timeout));
        let coordinator = Arc::new(RetryCoordinator::new(
            tester,
            config.job.backoff.clone(),
            request_timeout,
        ));
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(CancellationRegistry::new());

        let worker_pool = Arc::new(WorkerPool::new(
            job_repo.clone(),
            result_repo.clone(),
            directory.clone(),
            coordinator.clone(),
            metrics.clone(),
        ));

        let (launch_tx, launch_rx) = launch_queue(config.job.launch_queue_capacity);
        let dispatcher = Arc::new(JobDispatcher::new(
            job_repo.clone(),
            registry.clone(),
            launch_tx,
            config.job.clone(),
            metrics.clone(),
        ));
        let runner = JobRunner::new(worker_pool, job_repo.clone(), registry, launch_rx);

        let health_loop = Arc::new(ContinuousHealthLoop::new(
            directory.clone(),
            coordinator.clone(),
            SweepGuard::new(),
            config.health.clone(),
            metrics,
        ));

        let reporter = Arc::new(ResultReporter::new(
            job_repo.clone(),
            result_repo.clone(),
            config.job.export_batch_size,
        ));
        let remediation = Arc::new(RemediationService::new(
            job_repo,
            result_repo,
            directory,
            coordinator,
        ));

        Ok(Self {
            config,
            database,
            dispatcher,
            runner,
            health_loop,
            reporter,
            remediation,
            metrics_handle,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn run(self, shutdown: ShutdownManager) -> Result<()> {
        let Self {
            config,
            database,
            dispatcher,
            runner,
            health_loop,
            reporter,
            remediation,
            metrics_handle,
        } = self;

        match dispatcher.recover_interrupted_jobs().await {
            Ok(0) => {}
            Ok(count) => warn!("{} 个测试任务因进程重启被标记为失败", count),
            Err(e) => error!("恢复未完成任务失败: {}", e),
        }

        let runner_handle = tokio::spawn(runner.run(shutdown.subscribe().await));
        let health_handle = tokio::spawn(health_loop.clone().run(shutdown.subscribe().await));

        if config.api.enabled {
            let state = AppState {
                dispatcher,
                reporter,
                remediation,
                health_loop,
                metrics_handle,
            };
            let app = create_app(state, &config.api);

            let listener = TcpListener::bind(&config.api.bind_address)
                .await
                .with_context(|| format!("绑定地址失败: {}", config.api.bind_address))?;
            info!("HTTP 服务监听于 {}", config.api.bind_address);

            let mut shutdown_rx = shutdown.subscribe().await;
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("HTTP 服务开始关闭");
                })
                .await
                .context("HTTP 服务运行失败")?;
        } else {
            info!("HTTP 接口未启用");
            let mut shutdown_rx = shutdown.subscribe().await;
            let _ = shutdown_rx.recv().await;
        }

        if let Err(e) = runner_handle.await {
            error!("任务执行器异常退出: {}", e);
        }
        if let Err(e) = health_handle.await {
            error!("健康巡检循环异常退出: {}", e);
        }

        database.close().await;
        info!("渠道测试引擎已停止");
        Ok(())
    }
}
