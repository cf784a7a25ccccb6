use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Channel;

/// 测试调用失败的分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    RateLimited,
    /// 上游 5xx
    Upstream,
    Auth,
    InvalidModel,
    BadRequest,
}

impl ErrorKind {
    /// 传输层/超时/限流/上游故障可以重试，鉴权与模型错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Upstream
        )
    }

    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::InvalidModel,
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Upstream,
            _ => ErrorKind::BadRequest,
        }
    }
}

/// 通用测试错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// 上游返回的结构化错误，用于封禁策略判定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderError {
    pub status_code: u16,
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "status {} ({}): {}",
            self.status_code, self.error_type, self.message
        )
    }
}

/// 一次测试调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub elapsed: Duration,
    pub error: Option<TestError>,
    pub provider_error: Option<ProviderError>,
}

impl TestOutcome {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            elapsed,
            error: None,
            provider_error: None,
        }
    }

    pub fn failure(elapsed: Duration, error: TestError) -> Self {
        Self {
            elapsed,
            error: Some(error),
            provider_error: None,
        }
    }

    pub fn provider_failure(elapsed: Duration, provider_error: ProviderError) -> Self {
        let kind = ErrorKind::from_status(provider_error.status_code);
        Self {
            elapsed,
            error: Some(TestError::new(kind, provider_error.message.clone())),
            provider_error: Some(provider_error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.provider_error.is_none()
    }

    /// 错误分类：优先使用通用错误的分类，其次按上游状态码推断
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error
            .as_ref()
            .map(|e| e.kind)
            .or_else(|| {
                self.provider_error
                    .as_ref()
                    .map(|p| ErrorKind::from_status(p.status_code))
            })
    }

    pub fn is_retryable(&self) -> bool {
        self.error_kind().is_some_and(|k| k.is_retryable())
    }

    pub fn error_message(&self) -> Option<String> {
        match (&self.error, &self.provider_error) {
            (_, Some(p)) => Some(p.to_string()),
            (Some(e), None) => Some(e.message.clone()),
            (None, None) => None,
        }
    }

    pub fn elapsed_millis(&self) -> i64 {
        self.elapsed.as_millis() as i64
    }
}

/// 测试单元：一个 (渠道, 模型) 组合
#[derive(Debug, Clone)]
pub struct TestUnit {
    pub channel: Channel,
    pub model: String,
}

/// 单元测试结果记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub id: i64,
    pub job_id: i64,
    pub channel_id: i64,
    /// 测试时刻的渠道名快照
    pub channel_name: String,
    pub model_name: String,
    pub success: bool,
    pub duration_millis: i64,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(job_id: i64, unit: &TestUnit, outcome: &TestOutcome, retry_count: u32) -> Self {
        Self {
            id: 0, // 将由数据库生成
            job_id,
            channel_id: unit.channel.id,
            channel_name: unit.channel.name.clone(),
            model_name: unit.model.clone(),
            success: outcome.is_success(),
            duration_millis: outcome.elapsed_millis(),
            retry_count: retry_count as i64,
            error_message: outcome.error_message(),
            created_at: Utc::now(),
        }
    }

    /// 原地覆盖一次重试的结果，重试次数加一
    pub fn apply_retry(&mut self, outcome: &TestOutcome) {
        self.retry_count += 1;
        self.success = outcome.is_success();
        self.duration_millis = outcome.elapsed_millis();
        self.error_message = outcome.error_message();
    }
}

/// 分页查询结果
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub items: Vec<TestResult>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}
