use std::sync::Arc;

use gateway_core::config::JobEngineConfig;
use gateway_core::models::{JobConfig, JobStatus, JobView, SubmitJobRequest, TestJob, TestMode};
use gateway_core::traits::TestJobRepository;
use gateway_core::{GatewayError, GatewayResult};
use gateway_infrastructure::observability::MetricsCollector;
use gateway_worker::{CancellationFlag, CancellationRegistry, WorkerPool};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;
const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// 交给 [`JobRunner`] 启动的任务
#[derive(Debug)]
pub struct LaunchRequest {
    pub job: TestJob,
    pub flag: Arc<CancellationFlag>,
}

/// 创建有界的任务启动队列
pub fn launch_queue(capacity: usize) -> (mpsc::Sender<LaunchRequest>, mpsc::Receiver<LaunchRequest>) {
    mpsc::channel(capacity.max(1))
}

/// 任务分发器
///
/// 校验请求、持久化 Pending 任务，然后异步交给 Worker Pool。
/// 提交立即返回任务ID，不等待执行。
pub struct JobDispatcher {
    job_repo: Arc<dyn TestJobRepository>,
    registry: Arc<CancellationRegistry>,
    launch_tx: mpsc::Sender<LaunchRequest>,
    config: JobEngineConfig,
    metrics: Arc<MetricsCollector>,
}

impl JobDispatcher {
    pub fn new(
        job_repo: Arc<dyn TestJobRepository>,
        registry: Arc<CancellationRegistry>,
        launch_tx: mpsc::Sender<LaunchRequest>,
        config: JobEngineConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            registry,
            launch_tx,
            config,
            metrics,
        }
    }

    /// 校验请求并补齐默认执行参数
    pub fn validate(&self, request: &SubmitJobRequest) -> GatewayResult<JobConfig> {
        let options = &request.options;
        if !options.has_scope() {
            return Err(GatewayError::InvalidJobRequest(
                "no channel scope selected: provide channel_ids or include_all".to_string(),
            ));
        }
        if options.test_mode == TestMode::Selected && options.target_models.is_empty() {
            return Err(GatewayError::InvalidJobRequest(
                "selected test mode requires a non-empty target model list".to_string(),
            ));
        }

        let concurrency = request
            .concurrency
            .unwrap_or(self.config.default_concurrency);
        if concurrency == 0 {
            return Err(GatewayError::InvalidJobRequest(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if concurrency > self.config.max_concurrency {
            warn!(
                "并发数 {} 超过上限，按 {} 执行",
                concurrency, self.config.max_concurrency
            );
        }

        let retry_limit = request
            .retry_limit
            .unwrap_or(self.config.default_retry_limit);
        if retry_limit > self.config.max_retry_limit {
            warn!(
                "重试次数 {} 超过上限，按 {} 执行",
                retry_limit, self.config.max_retry_limit
            );
        }

        Ok(JobConfig {
            concurrency: concurrency.min(self.config.max_concurrency),
            interval_ms: request
                .interval_ms
                .unwrap_or(self.config.default_interval_ms),
            retry_limit: retry_limit.min(self.config.max_retry_limit),
        })
    }

    #[instrument(skip(self, request), fields(requested_by = %request.requested_by))]
    pub async fn submit(&self, request: SubmitJobRequest) -> GatewayResult<i64> {
        let config = self.validate(&request)?;
        let job = TestJob::new(request.requested_by, request.options, config);

        // 持久化失败直接返回，不会留下孤儿任务
        let job = self.job_repo.create(&job).await?;
        let job_id = job.id;
        let flag = self.registry.register(job_id);

        match self.launch_tx.try_send(LaunchRequest { job, flag }) {
            Ok(()) => {
                info!("测试任务 {} 已提交", job_id);
            }
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "launch queue is full",
                    mpsc::error::TrySendError::Closed(_) => "job runner is not running",
                };
                let dispatch_error = GatewayError::DispatchFailed(reason.to_string());
                error!("测试任务 {} 分发失败: {}", job_id, dispatch_error);

                self.registry.remove(job_id);
                self.metrics.record_dispatch_failure(reason);
                self.job_repo
                    .finalize(job_id, JobStatus::Failed, Some(&dispatch_error.to_string()))
                    .await?;
            }
        }

        Ok(job_id)
    }

    pub async fn list_jobs(&self, limit: Option<i64>) -> GatewayResult<Vec<JobView>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let jobs = self.job_repo.list_recent(limit).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    pub async fn get_job(&self, id: i64) -> GatewayResult<JobView> {
        self.job_repo
            .get_by_id(id)
            .await?
            .map(JobView::from)
            .ok_or(GatewayError::JobNotFound { id })
    }

    /// 请求取消任务
    ///
    /// 只设置取消标志，执行中的调用跑完当前请求，之后不再启动新的单元或重试。
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: i64) -> GatewayResult<JobView> {
        let job = self
            .job_repo
            .get_by_id(id)
            .await?
            .ok_or(GatewayError::JobNotFound { id })?;
        if job.status.is_terminal() {
            return Err(GatewayError::JobAlreadyFinished {
                id,
                status: job.status,
            });
        }

        if self.registry.cancel(id) {
            info!("已请求取消测试任务 {}", id);
        } else {
            // 没有执行者的任务直接终结
            warn!("测试任务 {} 没有对应的执行者，直接标记为已取消", id);
            self.job_repo.finalize(id, JobStatus::Cancelled, None).await?;
        }

        self.get_job(id).await
    }

    /// 启动时终结上次进程遗留的未完成任务
    pub async fn recover_interrupted_jobs(&self) -> GatewayResult<usize> {
        let unfinished = self.job_repo.list_unfinished().await?;
        let mut recovered = 0;
        for job in unfinished {
            if self.registry.get(job.id).is_some() {
                continue;
            }
            if self
                .job_repo
                .finalize(job.id, JobStatus::Failed, Some(INTERRUPTED_MESSAGE))
                .await?
            {
                warn!("测试任务 {} 因进程重启中断，已标记为失败", job.id);
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!("恢复了 {} 个中断的测试任务", recovered);
        }
        Ok(recovered)
    }
}

/// 消费启动队列，为每个任务启动独立的 Worker Pool
pub struct JobRunner {
    pool: Arc<WorkerPool>,
    job_repo: Arc<dyn TestJobRepository>,
    registry: Arc<CancellationRegistry>,
    launch_rx: mpsc::Receiver<LaunchRequest>,
}

impl JobRunner {
    pub fn new(
        pool: Arc<WorkerPool>,
        job_repo: Arc<dyn TestJobRepository>,
        registry: Arc<CancellationRegistry>,
        launch_rx: mpsc::Receiver<LaunchRequest>,
    ) -> Self {
        Self {
            pool,
            job_repo,
            registry,
            launch_rx,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("测试任务执行器已启动");
        loop {
            tokio::select! {
                request = self.launch_rx.recv() => match request {
                    Some(request) => self.launch(request),
                    None => {
                        info!("任务启动队列已关闭");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止接收新的测试任务");
                    break;
                }
            }
        }
    }

    fn launch(&self, request: LaunchRequest) {
        let pool = self.pool.clone();
        let job_repo = self.job_repo.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let job_id = request.job.id;
            debug!("启动测试任务 {}", job_id);

            if let Err(e) = pool.run_job(request.job, request.flag).await {
                error!("测试任务 {} 执行出错: {}", job_id, e);
                if let Err(e) = job_repo
                    .finalize(job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    error!("终结测试任务 {} 失败: {}", job_id, e);
                }
            }
            registry.remove(job_id);
        });
    }
}
