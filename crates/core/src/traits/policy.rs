//! 健康巡检的可插拔策略

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Channel, ChannelStatus, ProviderError, TestOutcome};

/// 封禁判定：把上游结构化错误映射为是否应自动禁用
pub trait BanPolicy: Send + Sync {
    fn should_ban(&self, error: &ProviderError) -> bool;
}

/// 解禁判定：已禁用的渠道在本次测试后是否可以恢复
pub trait ReenablePolicy: Send + Sync {
    fn should_reenable(&self, channel: &Channel, outcome: &TestOutcome) -> bool;
}

/// 运维通知
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// 按状态码与错误类型判定封禁
#[derive(Debug, Clone, Default)]
pub struct StatusCodeBanPolicy;

impl BanPolicy for StatusCodeBanPolicy {
    fn should_ban(&self, error: &ProviderError) -> bool {
        if matches!(error.status_code, 401 | 403) {
            return true;
        }

        let markers = [
            "invalid_api_key",
            "account_deactivated",
            "insufficient_quota",
            "billing_not_active",
            "permission_denied",
        ];
        let code = error.code.as_deref().unwrap_or_default();
        if markers.iter().any(|m| error.error_type == *m || code == *m) {
            return true;
        }

        let message = error.message.to_lowercase();
        message.contains("credit balance is too low")
            || message.contains("api key not valid")
            || message.contains("organization has been disabled")
    }
}

/// 只恢复自动禁用、且本次测试成功并满足延迟阈值的渠道
#[derive(Debug, Clone)]
pub struct RecoveredReenablePolicy {
    pub latency_threshold: Option<Duration>,
}

impl ReenablePolicy for RecoveredReenablePolicy {
    fn should_reenable(&self, channel: &Channel, outcome: &TestOutcome) -> bool {
        if channel.status != ChannelStatus::AutoDisabled || !outcome.is_success() {
            return false;
        }
        match self.latency_threshold {
            Some(threshold) => outcome.elapsed <= threshold,
            None => true,
        }
    }
}

/// 基于 tracing 的通知实现
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        tracing::warn!(subject = subject, "{}", body);
    }
}
