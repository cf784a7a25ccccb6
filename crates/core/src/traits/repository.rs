//! 测试任务与测试结果的持久化接口
//!
//! 计数器的更新必须是存储层的原子操作（单条 UPDATE 或互斥锁内完成），
//! 不允许读出再写回的派生计数。

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{JobStatus, TestJob, TestResult};
use crate::GatewayResult;

/// 任务聚合计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobCounters {
    pub completed_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
}

/// 测试任务仓储接口
#[async_trait]
pub trait TestJobRepository: Send + Sync {
    /// 创建 Pending 状态的任务，返回带数据库ID的任务
    async fn create(&self, job: &TestJob) -> GatewayResult<TestJob>;

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestJob>>;

    /// 按创建时间倒序列出最近的任务
    async fn list_recent(&self, limit: i64) -> GatewayResult<Vec<TestJob>>;

    /// Pending → Running，同时写入解析出的单元总数。
    /// 任务已不处于 Pending 时返回 false。
    async fn mark_running(&self, id: i64, total_models: i64) -> GatewayResult<bool>;

    /// 原子地记录一个单元完成，`completed_count` 不会超过 `total_models`
    async fn record_unit_completed(&self, id: i64, success: bool) -> GatewayResult<JobCounters>;

    /// 进入终态。只有非终态的任务会被更新，返回是否真正发生了状态变更
    async fn finalize(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> GatewayResult<bool>;

    /// 根据全部结果重新计算聚合计数
    async fn recompute_counters(&self, id: i64) -> GatewayResult<JobCounters>;

    /// 列出非终态任务（用于进程重启后的恢复）
    async fn list_unfinished(&self) -> GatewayResult<Vec<TestJob>>;
}

/// 测试结果仓储接口
#[async_trait]
pub trait TestResultRepository: Send + Sync {
    /// 追加一条结果
    async fn append(&self, result: &TestResult) -> GatewayResult<TestResult>;

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestResult>>;

    /// 原地更新（单条重试），不会新增记录
    async fn update(&self, result: &TestResult) -> GatewayResult<()>;

    /// 按插入顺序分页
    async fn list_by_job(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> GatewayResult<Vec<TestResult>>;

    async fn count_by_job(&self, job_id: i64) -> GatewayResult<i64>;

    /// 任务中所有失败的结果，按插入顺序
    async fn list_failed(&self, job_id: i64) -> GatewayResult<Vec<TestResult>>;
}
