//! 测试任务的分发与执行编排
//!
//! - [`JobDispatcher`] 校验并持久化批量测试任务，通过启动队列交给 [`JobRunner`]
//! - [`ContinuousHealthLoop`] 定时巡检渠道并自动禁用/启用
//! - [`RemediationService`] 单条结果重试与失败模型删除
//! - [`ResultReporter`] 结果分页与 CSV 导出

pub mod health_loop;
pub mod job_dispatcher;
pub mod remediation;
pub mod reporting;

pub use health_loop::{ChannelAction, ContinuousHealthLoop, SweepGuard, SweepPermit, SweepReport};
pub use job_dispatcher::{launch_queue, JobDispatcher, JobRunner, LaunchRequest};
pub use remediation::{
    partition_catalog, ChannelRemoval, ChannelRemovalError, DeleteFailedModelsReport,
    DeleteFailedModelsRequest, RemediationService, RetryResultReport,
};
pub use reporting::{ResultReporter, CSV_COLUMNS};
