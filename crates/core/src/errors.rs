use thiserror::Error;

use crate::models::JobStatus;

/// 网关错误类型定义
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("测试任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("测试结果未找到: {id}")]
    TestResultNotFound { id: i64 },

    #[error("渠道未找到: {id}")]
    ChannelNotFound { id: i64 },

    #[error("无效的测试任务请求: {0}")]
    InvalidJobRequest(String),

    #[error("测试任务 {id} 仍在执行中 (状态: {status})")]
    JobStillActive { id: i64, status: JobStatus },

    #[error("测试任务 {id} 已结束 (状态: {status})")]
    JobAlreadyFinished { id: i64, status: JobStatus },

    #[error("任务分发失败: {0}")]
    DispatchFailed(String),

    #[error("no usable models remain for channel {channel_id}")]
    NoUsableModels { channel_id: i64 },

    #[error("健康巡检正在进行中")]
    SweepInProgress,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
