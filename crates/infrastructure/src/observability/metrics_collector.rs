//! Metrics collector for the channel test engine
//!
//! 计数器与直方图通过 `metrics` 门面上报，
//! 进程启动时安装 Prometheus recorder，由 HTTP 层的 `/metrics` 渲染。

use anyhow::Result;
use metrics::{counter, histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// Metrics collector for the channel test engine
pub struct MetricsCollector {
    // 单元测试
    units_tested_total: Counter,
    unit_failures_total: Counter,
    unit_retries_total: Counter,
    unit_duration: Histogram,

    // 任务
    job_duration: Histogram,
    dispatch_failures_total: Counter,

    // 健康巡检
    channels_auto_disabled_total: Counter,
    channels_auto_enabled_total: Counter,
    sweeps_total: Counter,
    sweep_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            units_tested_total: counter!("gateway_channel_test_units_total"),
            unit_failures_total: counter!("gateway_channel_test_unit_failures_total"),
            unit_retries_total: counter!("gateway_channel_test_unit_retries_total"),
            unit_duration: histogram!("gateway_channel_test_unit_duration_seconds"),
            job_duration: histogram!("gateway_channel_test_job_duration_seconds"),
            dispatch_failures_total: counter!("gateway_channel_test_dispatch_failures_total"),
            channels_auto_disabled_total: counter!("gateway_channels_auto_disabled_total"),
            channels_auto_enabled_total: counter!("gateway_channels_auto_enabled_total"),
            sweeps_total: counter!("gateway_health_sweeps_total"),
            sweep_duration: histogram!("gateway_health_sweep_duration_seconds"),
        }
    }

    /// Record one finished test unit
    pub fn record_unit_tested(&self, success: bool, duration_seconds: f64, error_kind: Option<&str>) {
        self.units_tested_total.increment(1);
        self.unit_duration.record(duration_seconds);
        if !success {
            self.unit_failures_total.increment(1);
            if let Some(kind) = error_kind {
                counter!("gateway_channel_test_unit_errors_total", "kind" => kind.to_string())
                    .increment(1);
            }
        }
    }

    pub fn record_unit_retries(&self, retries: u32) {
        self.unit_retries_total.increment(retries as u64);
    }

    /// Record a job reaching its terminal status
    pub fn record_job_finished(&self, status: &str, duration_seconds: f64) {
        counter!("gateway_channel_test_jobs_finished_total", "status" => status.to_string())
            .increment(1);
        self.job_duration.record(duration_seconds);

        info!(
            status = status,
            duration_seconds = duration_seconds,
            "Channel test job finished"
        );
    }

    pub fn record_dispatch_failure(&self, reason: &str) {
        self.dispatch_failures_total.increment(1);
        warn!(reason = reason, "Channel test job dispatch failed");
    }

    pub fn record_channel_auto_disabled(&self, channel_id: i64, reason: &str) {
        self.channels_auto_disabled_total.increment(1);
        warn!(channel_id = channel_id, reason = reason, "Channel auto-disabled");
    }

    pub fn record_channel_auto_enabled(&self, channel_id: i64) {
        self.channels_auto_enabled_total.increment(1);
        info!(channel_id = channel_id, "Channel auto-enabled");
    }

    pub fn record_sweep(&self, tested: usize, duration_seconds: f64) {
        self.sweeps_total.increment(1);
        self.sweep_duration.record(duration_seconds);

        info!(
            tested = tested,
            duration_seconds = duration_seconds,
            "Health sweep completed"
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// 安装全局 Prometheus recorder，返回用于渲染的句柄
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::new();
        collector.record_unit_tested(true, 0.2, None);
        collector.record_unit_tested(false, 1.5, Some("Timeout"));
        collector.record_unit_retries(2);
        collector.record_job_finished("succeeded", 3.0);
        collector.record_dispatch_failure("queue full");
        collector.record_channel_auto_disabled(1, "invalid key");
        collector.record_channel_auto_enabled(1);
        collector.record_sweep(10, 12.5);
    }
}
