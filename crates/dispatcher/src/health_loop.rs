use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gateway_core::config::HealthCheckConfig;
use gateway_core::models::{Channel, ChannelHealthUpdate, ChannelStatus, TestOutcome};
use gateway_core::traits::{
    list_all_channels, BanPolicy, ChannelDirectory, LogNotifier, Notifier, RecoveredReenablePolicy,
    ReenablePolicy, StatusCodeBanPolicy,
};
use gateway_core::{GatewayError, GatewayResult};
use gateway_infrastructure::observability::MetricsCollector;
use gateway_worker::RetryCoordinator;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const CHANNEL_PAGE_SIZE: i64 = 100;

/// 巡检运行标志：idle → sweeping → idle
///
/// 定时巡检与手动触发共用同一个实例，保证同一时间只有一次巡检。
#[derive(Debug, Default)]
pub struct SweepGuard {
    running: AtomicBool,
}

/// 持有期间巡检处于运行状态，释放时自动复位
#[derive(Debug)]
pub struct SweepPermit {
    guard: Arc<SweepGuard>,
}

impl SweepGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<SweepPermit> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SweepPermit {
                guard: self.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::SeqCst);
    }
}

/// 单个渠道的处理决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    Keep,
    Disable { reason: String },
    Enable,
}

/// 一次完整巡检的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub tested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub disabled: Vec<i64>,
    pub enabled: Vec<i64>,
    pub duration_ms: u64,
}

impl SweepReport {
    fn summary(&self) -> String {
        format!(
            "tested={}, succeeded={}, failed={}, skipped={}, disabled={:?}, enabled={:?}, duration={}ms",
            self.tested,
            self.succeeded,
            self.failed,
            self.skipped,
            self.disabled,
            self.enabled,
            self.duration_ms
        )
    }
}

/// 持续健康巡检
///
/// 按固定间隔顺序测试每个启用的渠道（渠道之间固定等待，不并发），
/// 根据封禁策略和响应时间阈值自动禁用渠道，根据恢复策略重新启用渠道。
pub struct ContinuousHealthLoop {
    directory: Arc<dyn ChannelDirectory>,
    coordinator: Arc<RetryCoordinator>,
    ban_policy: Arc<dyn BanPolicy>,
    reenable_policy: Arc<dyn ReenablePolicy>,
    notifier: Arc<dyn Notifier>,
    guard: Arc<SweepGuard>,
    config: HealthCheckConfig,
    metrics: Arc<MetricsCollector>,
}

impl ContinuousHealthLoop {
    pub fn new(
        directory: Arc<dyn ChannelDirectory>,
        coordinator: Arc<RetryCoordinator>,
        guard: Arc<SweepGuard>,
        config: HealthCheckConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let reenable_policy = RecoveredReenablePolicy {
            latency_threshold: config.disable_threshold(),
        };
        Self {
            directory,
            coordinator,
            ban_policy: Arc::new(StatusCodeBanPolicy),
            reenable_policy: Arc::new(reenable_policy),
            notifier: Arc::new(LogNotifier),
            guard,
            config,
            metrics,
        }
    }

    pub fn with_ban_policy(mut self, policy: Arc<dyn BanPolicy>) -> Self {
        self.ban_policy = policy;
        self
    }

    pub fn with_reenable_policy(mut self, policy: Arc<dyn ReenablePolicy>) -> Self {
        self.reenable_policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn is_sweeping(&self) -> bool {
        self.guard.is_running()
    }

    /// 定时巡检循环，收到关闭信号后退出
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("持续健康巡检未启用");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!("启动持续健康巡检，间隔 {} 秒", self.config.interval_seconds);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出健康巡检循环");
                    break;
                }
            }

            tokio::select! {
                result = self.sweep() => match result {
                    Ok(report) => debug!("定时巡检完成: {}", report.summary()),
                    Err(GatewayError::SweepInProgress) => {
                        debug!("已有巡检在运行，跳过本轮");
                    }
                    Err(e) => error!("定时巡检失败: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，中断当前巡检");
                    break;
                }
            }
        }
    }

    /// 在后台启动一次巡检，已有巡检运行时返回 [`GatewayError::SweepInProgress`]
    pub fn trigger_sweep(self: &Arc<Self>) -> GatewayResult<()> {
        let permit = self
            .guard
            .try_acquire()
            .ok_or(GatewayError::SweepInProgress)?;
        let this = self.clone();

        tokio::spawn(async move {
            match this.sweep_with_permit(permit).await {
                Ok(report) => info!("手动巡检完成: {}", report.summary()),
                Err(e) => error!("手动巡检失败: {}", e),
            }
        });
        Ok(())
    }

    /// 同步执行一次巡检
    pub async fn sweep(&self) -> GatewayResult<SweepReport> {
        let permit = self
            .guard
            .try_acquire()
            .ok_or(GatewayError::SweepInProgress)?;
        self.sweep_with_permit(permit).await
    }

    async fn sweep_with_permit(&self, _permit: SweepPermit) -> GatewayResult<SweepReport> {
        let started = Instant::now();
        let channels = self.sweep_targets().await?;
        let delay = Duration::from_millis(self.config.channel_delay_ms);
        let mut report = SweepReport::default();

        info!("开始健康巡检: {} 个渠道", channels.len());

        for (index, channel) in channels.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.check_channel(channel, &mut report).await;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record_sweep(report.tested, started.elapsed().as_secs_f64());
        if self.config.notify_on_sweep {
            self.notifier
                .notify("渠道健康巡检完成", &report.summary())
                .await;
        }
        Ok(report)
    }

    /// 启用的渠道；开启自动恢复时也包括未启用的渠道
    async fn sweep_targets(&self) -> GatewayResult<Vec<Channel>> {
        let enabled_only = !self.config.auto_enable_enabled;
        list_all_channels(self.directory.as_ref(), enabled_only, CHANNEL_PAGE_SIZE).await
    }

    async fn check_channel(&self, channel: &Channel, report: &mut SweepReport) {
        let Some(model) = channel.default_test_model().map(str::to_string) else {
            debug!("渠道 {} 没有可测试的模型，跳过", channel.id);
            report.skipped += 1;
            return;
        };

        let outcome = self.coordinator.attempt_once(channel, &model).await;
        report.tested += 1;
        if outcome.is_success() {
            report.succeeded += 1;
        } else {
            report.failed += 1;
            debug!(
                "渠道 {} 测试失败: {}",
                channel.id,
                outcome.error_message().unwrap_or_default()
            );
        }

        let update = ChannelHealthUpdate {
            response_time_ms: outcome.elapsed_millis(),
            test_time: Utc::now(),
        };
        if let Err(e) = self.directory.update_health(channel.id, &update).await {
            warn!("写回渠道 {} 测速信息失败: {}", channel.id, e);
        }

        match self.evaluate(channel, &outcome) {
            ChannelAction::Keep => {}
            ChannelAction::Disable { reason } => {
                match self
                    .directory
                    .update_status(channel.id, ChannelStatus::AutoDisabled, Some(&reason))
                    .await
                {
                    Ok(()) => {
                        report.disabled.push(channel.id);
                        self.metrics.record_channel_auto_disabled(channel.id, &reason);
                        self.notifier
                            .notify(
                                "渠道已被自动禁用",
                                &format!("渠道 {} (#{}) 已被禁用，原因: {}", channel.name, channel.id, reason),
                            )
                            .await;
                    }
                    Err(e) => error!("禁用渠道 {} 失败: {}", channel.id, e),
                }
            }
            ChannelAction::Enable => {
                match self
                    .directory
                    .update_status(channel.id, ChannelStatus::Enabled, None)
                    .await
                {
                    Ok(()) => {
                        report.enabled.push(channel.id);
                        self.metrics.record_channel_auto_enabled(channel.id);
                        self.notifier
                            .notify(
                                "渠道已被自动启用",
                                &format!("渠道 {} (#{}) 测试恢复正常，已重新启用", channel.name, channel.id),
                            )
                            .await;
                    }
                    Err(e) => error!("启用渠道 {} 失败: {}", channel.id, e),
                }
            }
        }
    }

    /// 根据测试结果决定渠道状态变更
    pub fn evaluate(&self, channel: &Channel, outcome: &TestOutcome) -> ChannelAction {
        if channel.is_enabled() {
            let Some(reason) = self.ban_reason(outcome) else {
                return ChannelAction::Keep;
            };
            if channel.auto_ban && self.config.auto_disable_enabled {
                return ChannelAction::Disable { reason };
            }
            debug!("渠道 {} 满足禁用条件但未开启自动禁用: {}", channel.id, reason);
            return ChannelAction::Keep;
        }

        if self.config.auto_enable_enabled && self.reenable_policy.should_reenable(channel, outcome)
        {
            return ChannelAction::Enable;
        }
        ChannelAction::Keep
    }

    fn ban_reason(&self, outcome: &TestOutcome) -> Option<String> {
        if let Some(provider_error) = &outcome.provider_error {
            if self.ban_policy.should_ban(provider_error) {
                return Some(provider_error.to_string());
            }
        }

        let threshold = self.config.disable_threshold()?;
        (outcome.elapsed > threshold).then(|| {
            format!(
                "response time {}ms exceeds threshold {}ms",
                outcome.elapsed.as_millis(),
                threshold.as_millis()
            )
        })
    }
}
