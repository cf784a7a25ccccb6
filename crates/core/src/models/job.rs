use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 模型测试范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    /// 测试渠道目录中的全部模型（再经过白名单/黑名单过滤）
    #[default]
    All,
    /// 只测试 `target_models` 中列出的模型
    Selected,
}

/// 批量测试选项
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct JobOptions {
    /// 显式指定的渠道ID
    pub channel_ids: Vec<i64>,
    /// 测试全部渠道，忽略 `channel_ids`
    pub include_all: bool,
    /// 是否包含已禁用的渠道
    pub include_disabled: bool,
    /// 模型范围描述（仅用于展示）
    pub model_scope: Option<String>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub test_mode: TestMode,
    pub target_models: Vec<String>,
    /// 每个渠道只测试其默认测试模型
    pub use_channel_default: bool,
}

impl JobOptions {
    pub fn has_scope(&self) -> bool {
        self.include_all || !self.channel_ids.is_empty()
    }
}

/// 执行参数：并发宽度、派发间隔、重试次数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    pub concurrency: u32,
    pub interval_ms: u64,
    pub retry_limit: u32,
}

/// 测试任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<JobStatus>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 批量渠道测试任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJob {
    pub id: i64,
    pub requested_by: String,
    pub options: JobOptions,
    pub concurrency: u32,
    pub interval_ms: u64,
    pub retry_limit: u32,
    pub status: JobStatus,
    pub total_models: i64,
    pub completed_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TestJob {
    pub fn new(requested_by: impl Into<String>, options: JobOptions, config: JobConfig) -> Self {
        Self {
            id: 0, // 将由数据库生成
            requested_by: requested_by.into(),
            options,
            concurrency: config.concurrency,
            interval_ms: config.interval_ms,
            retry_limit: config.retry_limit,
            status: JobStatus::Pending,
            total_models: 0,
            completed_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: Utc::now(),
            finished_at: None,
            error_message: None,
        }
    }

    pub fn config(&self) -> JobConfig {
        JobConfig {
            concurrency: self.concurrency,
            interval_ms: self.interval_ms,
            retry_limit: self.retry_limit,
        }
    }

    /// 进度 = completed_count / total_models，空任务视为已完成
    pub fn progress(&self) -> f64 {
        if self.total_models <= 0 {
            if self.status.is_terminal() {
                1.0
            } else {
                0.0
            }
        } else {
            self.completed_count as f64 / self.total_models as f64
        }
    }
}

/// 提交批量测试的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub requested_by: String,
    pub options: JobOptions,
    pub concurrency: Option<u32>,
    pub interval_ms: Option<u64>,
    pub retry_limit: Option<u32>,
}

/// 带进度的任务视图
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: TestJob,
    pub progress: f64,
}

impl From<TestJob> for JobView {
    fn from(job: TestJob) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_ratio() {
        let mut job = TestJob::new(
            "admin",
            JobOptions::default(),
            JobConfig {
                concurrency: 1,
                interval_ms: 0,
                retry_limit: 0,
            },
        );
        assert_eq!(job.progress(), 0.0);

        job.total_models = 4;
        job.completed_count = 1;
        assert_eq!(job.progress(), 0.25);

        job.total_models = 0;
        job.status = JobStatus::Succeeded;
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: JobOptions =
            serde_json::from_str(r#"{"channel_ids":[3],"test_mode":"selected"}"#).unwrap();
        assert_eq!(options.channel_ids, vec![3]);
        assert_eq!(options.test_mode, TestMode::Selected);
        assert!(options.whitelist.is_empty());
        assert!(options.has_scope());
    }
}
