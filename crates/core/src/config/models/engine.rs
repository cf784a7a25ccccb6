use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 重试退避配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// 基础退避间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// 批量测试任务引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEngineConfig {
    pub default_concurrency: u32,
    pub max_concurrency: u32,
    pub default_interval_ms: u64,
    pub default_retry_limit: u32,
    pub max_retry_limit: u32,
    /// 单次测试调用的超时时间，与重试次数无关
    pub request_timeout_seconds: u64,
    /// 任务启动队列容量
    pub launch_queue_capacity: usize,
    /// 导出时每批读取的结果数
    pub export_batch_size: i64,
    pub backoff: BackoffConfig,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 5,
            max_concurrency: 50,
            default_interval_ms: 0,
            default_retry_limit: 1,
            max_retry_limit: 10,
            request_timeout_seconds: 30,
            launch_queue_capacity: 64,
            export_batch_size: 500,
            backoff: BackoffConfig::default(),
        }
    }
}

impl JobEngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_concurrency == 0 || self.max_concurrency == 0 {
            return Err(anyhow::anyhow!("并发数必须大于0"));
        }

        if self.default_concurrency > self.max_concurrency {
            return Err(anyhow::anyhow!("默认并发数不能大于最大并发数"));
        }

        if self.default_retry_limit > self.max_retry_limit {
            return Err(anyhow::anyhow!("默认重试次数不能大于最大重试次数"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("测试请求超时时间必须大于0"));
        }

        if self.launch_queue_capacity == 0 {
            return Err(anyhow::anyhow!("任务启动队列容量必须大于0"));
        }

        if self.export_batch_size <= 0 {
            return Err(anyhow::anyhow!("导出批大小必须大于0"));
        }

        if self.backoff.multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }

        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(anyhow::anyhow!("抖动范围必须在0.0到1.0之间"));
        }

        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(anyhow::anyhow!("基础退避间隔不能大于最大退避间隔"));
        }

        Ok(())
    }
}

/// 持续健康巡检配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// 相邻渠道之间的固定间隔
    pub channel_delay_ms: u64,
    /// 响应时间超过该阈值即视为需要禁用，0 表示不检查
    pub disable_threshold_seconds: u64,
    pub auto_disable_enabled: bool,
    pub auto_enable_enabled: bool,
    pub notify_on_sweep: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 600,
            channel_delay_ms: 1000,
            disable_threshold_seconds: 30,
            auto_disable_enabled: true,
            auto_enable_enabled: false,
            notify_on_sweep: false,
        }
    }
}

impl HealthCheckConfig {
    pub fn disable_threshold(&self) -> Option<Duration> {
        (self.disable_threshold_seconds > 0)
            .then(|| Duration::from_secs(self.disable_threshold_seconds))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("巡检间隔必须大于0"));
        }

        Ok(())
    }
}
