use async_trait::async_trait;

use crate::models::{Channel, TestOutcome};

/// 测试执行器（外部协作者）
///
/// 对一个 (渠道, 模型) 执行一次真实的测试调用。失败通过 [`TestOutcome`] 返回，
/// 不使用 `Err`：所有错误都要被分类、重试并落库。
#[async_trait]
pub trait ChannelTester: Send + Sync {
    async fn test(&self, channel: &Channel, model: &str) -> TestOutcome;
}
