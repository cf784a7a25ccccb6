use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use gateway_core::models::{JobStatus, TestJob, TestResult, TestUnit};
use gateway_core::traits::{ChannelDirectory, TestJobRepository, TestResultRepository};
use gateway_core::{GatewayError, GatewayResult};
use gateway_infrastructure::observability::MetricsCollector;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::cancellation::CancellationFlag;
use crate::retry::RetryCoordinator;
use crate::scope::UnitResolver;

const RESULT_WRITE_ATTEMPTS: u32 = 3;
const RESULT_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// 单个任务的 Worker Pool
///
/// 两个独立的节流：`concurrency` 限制同时执行的单元数，`interval_ms` 控制相邻两次派发的间隔。
/// 单元失败只记录在结果里，任务本身以 `succeeded` 或 `cancelled` 结束，
/// `failed` 只用于范围展开等分发错误，以及测试结果最终无法写入的情况。
/// 只有结果已经落库的单元才会计入进度。
pub struct WorkerPool {
    job_repo: Arc<dyn TestJobRepository>,
    result_repo: Arc<dyn TestResultRepository>,
    resolver: UnitResolver,
    coordinator: Arc<RetryCoordinator>,
    metrics: Arc<MetricsCollector>,
}

/// 单元执行所需的共享句柄
#[derive(Clone)]
struct UnitContext {
    job_id: i64,
    retry_limit: u32,
    job_repo: Arc<dyn TestJobRepository>,
    result_repo: Arc<dyn TestResultRepository>,
    coordinator: Arc<RetryCoordinator>,
    metrics: Arc<MetricsCollector>,
    flag: Arc<CancellationFlag>,
    unsaved_results: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(
        job_repo: Arc<dyn TestJobRepository>,
        result_repo: Arc<dyn TestResultRepository>,
        directory: Arc<dyn ChannelDirectory>,
        coordinator: Arc<RetryCoordinator>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            result_repo,
            resolver: UnitResolver::new(directory),
            coordinator,
            metrics,
        }
    }

    /// 执行任务直到终态，返回最终状态
    #[instrument(skip(self, job, flag), fields(job_id = job.id))]
    pub async fn run_job(
        &self,
        job: TestJob,
        flag: Arc<CancellationFlag>,
    ) -> GatewayResult<JobStatus> {
        let job_id = job.id;
        let started = Instant::now();

        if flag.is_cancelled() {
            info!("任务 {} 在开始前已被取消", job_id);
            return self.finish(job_id, JobStatus::Cancelled, None, started).await;
        }

        let units = match self.resolver.resolve(&job.options).await {
            Ok(units) => units,
            Err(e) => {
                error!("任务 {} 展开测试范围失败: {}", job_id, e);
                let message = GatewayError::DispatchFailed(format!("unit resolution failed: {e}"));
                return self
                    .finish(job_id, JobStatus::Failed, Some(&message.to_string()), started)
                    .await;
            }
        };

        let total = units.len();
        if !self.job_repo.mark_running(job_id, total as i64).await? {
            warn!("任务 {} 已不处于 pending 状态，放弃执行", job_id);
            return Ok(self
                .job_repo
                .get_by_id(job_id)
                .await?
                .map(|j| j.status)
                .unwrap_or(JobStatus::Failed));
        }

        let config = job.config();
        info!(
            "任务 {} 开始执行: {} 个单元, concurrency={}, interval={}ms, retry_limit={}",
            job_id, total, config.concurrency, config.interval_ms, config.retry_limit
        );

        let context = UnitContext {
            job_id,
            retry_limit: config.retry_limit,
            job_repo: self.job_repo.clone(),
            result_repo: self.result_repo.clone(),
            coordinator: self.coordinator.clone(),
            metrics: self.metrics.clone(),
            flag: flag.clone(),
            unsaved_results: Arc::new(AtomicUsize::new(0)),
        };
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1) as usize));
        let interval = Duration::from_millis(config.interval_ms);
        let mut handles = Vec::with_capacity(total);

        for (index, unit) in units.into_iter().enumerate() {
            if flag.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| GatewayError::Internal(format!("worker semaphore closed: {e}")))?,
                _ = flag.cancelled() => break,
            };
            if flag.is_cancelled() {
                break;
            }

            let context = context.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                context.execute(unit).await;
            }));

            if !interval.is_zero() && index + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = flag.cancelled() => break,
                }
            }
        }

        let dispatched = handles.len();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("任务 {} 的单元执行异常退出: {}", job_id, e);
            }
        }

        let unsaved = context.unsaved_results.load(Ordering::SeqCst);
        let unsaved_message = (unsaved > 0)
            .then(|| format!("{unsaved} of {total} test results could not be persisted"));

        let status = if flag.is_cancelled() {
            info!("任务 {} 已取消: 已派发 {}/{} 个单元", job_id, dispatched, total);
            JobStatus::Cancelled
        } else if unsaved > 0 {
            error!("任务 {} 有 {} 条测试结果未能保存", job_id, unsaved);
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        self.finish(job_id, status, unsaved_message.as_deref(), started)
            .await
    }

    async fn finish(
        &self,
        job_id: i64,
        status: JobStatus,
        error_message: Option<&str>,
        started: Instant,
    ) -> GatewayResult<JobStatus> {
        if self.job_repo.finalize(job_id, status, error_message).await? {
            self.metrics
                .record_job_finished(status.as_str(), started.elapsed().as_secs_f64());
            info!(
                "任务 {} 结束: status={}, 用时 {}ms",
                job_id,
                status,
                started.elapsed().as_millis()
            );
            Ok(status)
        } else {
            // 已被其他路径终结
            let current = self
                .job_repo
                .get_by_id(job_id)
                .await?
                .map(|j| j.status)
                .unwrap_or(status);
            warn!("任务 {} 已处于终态 {}，忽略 {}", job_id, current, status);
            Ok(current)
        }
    }
}

impl UnitContext {
    async fn execute(&self, unit: TestUnit) {
        let report = self
            .coordinator
            .run(&unit, self.retry_limit, &self.flag)
            .await;
        let result = TestResult::new(self.job_id, &unit, &report.outcome, report.retry_count);

        self.metrics.record_unit_tested(
            result.success,
            report.outcome.elapsed.as_secs_f64(),
            report.outcome.error_kind().map(|k| format!("{k:?}")).as_deref(),
        );
        if report.retry_count > 0 {
            self.metrics.record_unit_retries(report.retry_count);
        }

        if let Err(e) = self.persist(&result).await {
            error!(
                "保存测试结果失败，单元不计入进度: job_id={}, channel_id={}, model={}: {}",
                self.job_id, unit.channel.id, unit.model, e
            );
            self.unsaved_results.fetch_add(1, Ordering::SeqCst);
            return;
        }

        match self
            .job_repo
            .record_unit_completed(self.job_id, result.success)
            .await
        {
            Ok(counters) => debug!(
                "任务 {} 进度: completed={}, success={}, failure={}",
                self.job_id, counters.completed_count, counters.success_count, counters.failure_count
            ),
            Err(e) => error!("更新任务 {} 进度失败: {}", self.job_id, e),
        }
    }

    async fn persist(&self, result: &TestResult) -> GatewayResult<()> {
        let mut attempt = 1;
        loop {
            match self.result_repo.append(result).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < RESULT_WRITE_ATTEMPTS => {
                    warn!(
                        "保存测试结果失败 (第 {} 次): job_id={}, model={}: {}",
                        attempt, self.job_id, result.model_name, e
                    );
                    tokio::time::sleep(RESULT_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
