//! Test data builders for creating test entities

use chrono::Utc;
use gateway_core::models::{
    Channel, ChannelStatus, ChannelType, JobConfig, JobOptions, TestJob, TestResult,
};

/// Builder for creating test Channel entities
pub struct ChannelBuilder {
    channel: Channel,
}

impl ChannelBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            channel: Channel {
                id,
                name: format!("channel-{id}"),
                channel_type: ChannelType::OpenAi,
                base_url: "https://api.example.com".to_string(),
                key: Some(format!("sk-test-{id}")),
                models: vec!["gpt-4o-mini".to_string()],
                test_model: None,
                status: ChannelStatus::Enabled,
                auto_ban: true,
                response_time_ms: 0,
                test_time: None,
                status_reason: None,
                status_time: None,
                retested_at: None,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.channel.name = name.to_string();
        self
    }

    pub fn with_type(mut self, channel_type: ChannelType) -> Self {
        self.channel.channel_type = channel_type;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.channel.base_url = base_url.to_string();
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.channel.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_test_model(mut self, model: &str) -> Self {
        self.channel.test_model = Some(model.to_string());
        self
    }

    pub fn with_status(mut self, status: ChannelStatus) -> Self {
        self.channel.status = status;
        self
    }

    pub fn disabled(self) -> Self {
        self.with_status(ChannelStatus::Disabled)
    }

    pub fn auto_disabled(self) -> Self {
        self.with_status(ChannelStatus::AutoDisabled)
    }

    pub fn with_auto_ban(mut self, auto_ban: bool) -> Self {
        self.channel.auto_ban = auto_ban;
        self
    }

    pub fn build(self) -> Channel {
        self.channel
    }
}

/// Builder for creating test TestJob entities
pub struct TestJobBuilder {
    job: TestJob,
}

impl TestJobBuilder {
    pub fn new() -> Self {
        Self {
            job: TestJob::new(
                "tester",
                JobOptions::default(),
                JobConfig {
                    concurrency: 1,
                    interval_ms: 0,
                    retry_limit: 0,
                },
            ),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.job.options = options;
        self
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.job.concurrency = config.concurrency;
        self.job.interval_ms = config.interval_ms;
        self.job.retry_limit = config.retry_limit;
        self
    }

    pub fn build(self) -> TestJob {
        self.job
    }
}

impl Default for TestJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test TestResult entities
pub struct TestResultBuilder {
    result: TestResult,
}

impl TestResultBuilder {
    pub fn new(job_id: i64, channel_id: i64, model: &str) -> Self {
        Self {
            result: TestResult {
                id: 0,
                job_id,
                channel_id,
                channel_name: format!("channel-{channel_id}"),
                model_name: model.to_string(),
                success: true,
                duration_millis: 100,
                retry_count: 0,
                error_message: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.result.success = false;
        self.result.error_message = Some(message.to_string());
        self
    }

    pub fn with_retry_count(mut self, retry_count: i64) -> Self {
        self.result.retry_count = retry_count;
        self
    }

    pub fn build(self) -> TestResult {
        self.result
    }
}
