use std::sync::Arc;
use std::time::Duration;

use gateway_core::config::BackoffConfig;
use gateway_core::models::{Channel, TestError, TestOutcome, TestUnit};
use gateway_core::traits::ChannelTester;
use tracing::{debug, warn};

use crate::cancellation::CancellationFlag;

/// 一个测试单元的最终执行情况
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// 最后一次调用的结果
    pub outcome: TestOutcome,
    /// 首次调用之后额外进行的次数
    pub retry_count: u32,
    /// 是否因取消而提前停止重试
    pub cancelled: bool,
}

/// 重试协调器
///
/// 包装一次测试执行器调用：每次调用都带固定超时，可重试错误按封顶指数退避重试，
/// 退避等待期间响应取消。
pub struct RetryCoordinator {
    tester: Arc<dyn ChannelTester>,
    backoff: BackoffConfig,
    request_timeout: Duration,
}

impl RetryCoordinator {
    pub fn new(
        tester: Arc<dyn ChannelTester>,
        backoff: BackoffConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            tester,
            backoff,
            request_timeout,
        }
    }

    /// 单次调用，超时记为 timeout 错误
    pub async fn attempt_once(&self, channel: &Channel, model: &str) -> TestOutcome {
        match tokio::time::timeout(self.request_timeout, self.tester.test(channel, model)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    channel_id = channel.id,
                    model = model,
                    "测试调用超时: {}ms",
                    self.request_timeout.as_millis()
                );
                TestOutcome::failure(
                    self.request_timeout,
                    TestError::timeout(format!(
                        "request timed out after {}ms",
                        self.request_timeout.as_millis()
                    )),
                )
            }
        }
    }

    /// 执行一个单元，最多额外重试 `retry_limit` 次
    pub async fn run(
        &self,
        unit: &TestUnit,
        retry_limit: u32,
        flag: &CancellationFlag,
    ) -> UnitReport {
        let mut retry_count = 0;
        let mut outcome = self.attempt_once(&unit.channel, &unit.model).await;

        while !outcome.is_success() && outcome.is_retryable() && retry_count < retry_limit {
            if flag.is_cancelled() {
                return UnitReport {
                    outcome,
                    retry_count,
                    cancelled: true,
                };
            }

            let delay = self.backoff_delay(retry_count + 1);
            debug!(
                channel_id = unit.channel.id,
                model = %unit.model,
                "第 {} 次重试前等待 {}ms: {}",
                retry_count + 1,
                delay.as_millis(),
                outcome.error_message().unwrap_or_default()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = flag.cancelled() => {
                    return UnitReport {
                        outcome,
                        retry_count,
                        cancelled: true,
                    };
                }
            }

            retry_count += 1;
            outcome = self.attempt_once(&unit.channel, &unit.model).await;
        }

        UnitReport {
            outcome,
            retry_count,
            cancelled: false,
        }
    }

    /// 第 `attempt` 次重试前的等待时间（从1开始）
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.base_delay_ms as f64;
        let max = (self.backoff.max_delay_ms as f64).max(base);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        // 计算指数退避间隔并封顶
        let capped = (base * self.backoff.multiplier.powi(exponent)).min(max);

        // 添加随机抖动
        let jitter = capped * self.backoff.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_delay = (capped + jitter).clamp(base, max);

        Duration::from_millis(final_delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::models::ErrorKind;
    use gateway_testing_utils::{ChannelBuilder, ScriptedTester};

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    fn unit() -> TestUnit {
        TestUnit {
            channel: ChannelBuilder::new(1).build(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    fn transport_failure() -> TestOutcome {
        TestOutcome::failure(Duration::from_millis(3), TestError::transport("connection reset"))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let tester = Arc::new(ScriptedTester::new());
        tester.sequence(
            1,
            "gpt-4o-mini",
            vec![
                transport_failure(),
                transport_failure(),
                TestOutcome::success(Duration::from_millis(20)),
            ],
        );
        let coordinator =
            RetryCoordinator::new(tester.clone(), fast_backoff(), Duration::from_secs(1));

        let report = coordinator.run(&unit(), 3, &CancellationFlag::new()).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.retry_count, 2);
        assert!(!report.cancelled);
        assert_eq!(tester.calls_for(1, "gpt-4o-mini"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_last_failure() {
        let tester = Arc::new(ScriptedTester::new());
        tester.always(1, "gpt-4o-mini", transport_failure());
        let coordinator =
            RetryCoordinator::new(tester.clone(), fast_backoff(), Duration::from_secs(1));

        let report = coordinator.run(&unit(), 2, &CancellationFlag::new()).await;

        assert!(!report.outcome.is_success());
        assert_eq!(report.retry_count, 2);
        assert_eq!(tester.calls_for(1, "gpt-4o-mini"), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let tester = Arc::new(ScriptedTester::new());
        tester.always(
            1,
            "gpt-4o-mini",
            TestOutcome::failure(
                Duration::from_millis(3),
                TestError::new(ErrorKind::Auth, "invalid key"),
            ),
        );
        let coordinator =
            RetryCoordinator::new(tester.clone(), fast_backoff(), Duration::from_secs(1));

        let report = coordinator.run(&unit(), 5, &CancellationFlag::new()).await;

        assert_eq!(report.retry_count, 0);
        assert_eq!(tester.calls_for(1, "gpt-4o-mini"), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_classified_and_retried() {
        let tester = Arc::new(ScriptedTester::new().with_delay(Duration::from_millis(200)));
        let coordinator =
            RetryCoordinator::new(tester.clone(), fast_backoff(), Duration::from_millis(20));

        let report = coordinator.run(&unit(), 1, &CancellationFlag::new()).await;

        assert_eq!(report.outcome.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(report.retry_count, 1);
        assert_eq!(tester.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let tester = Arc::new(ScriptedTester::new());
        tester.always(1, "gpt-4o-mini", transport_failure());
        let backoff = BackoffConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 10_000,
            multiplier: 1.0,
            jitter_factor: 0.0,
        };
        let coordinator = RetryCoordinator::new(tester.clone(), backoff, Duration::from_secs(1));
        let flag = Arc::new(CancellationFlag::new());

        let canceller = {
            let flag = flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.cancel();
            })
        };

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.run(&unit(), 3, &flag),
        )
        .await
        .expect("backoff should be interrupted by cancel");
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.retry_count, 0);
        assert_eq!(tester.total_calls(), 1);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let coordinator = RetryCoordinator::new(
            Arc::new(ScriptedTester::new()),
            BackoffConfig {
                base_delay_ms: 100,
                max_delay_ms: 1000,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
            Duration::from_secs(1),
        );

        assert_eq!(coordinator.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(coordinator.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(coordinator.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(coordinator.backoff_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let coordinator = RetryCoordinator::new(
            Arc::new(ScriptedTester::new()),
            BackoffConfig {
                base_delay_ms: 100,
                max_delay_ms: 1000,
                multiplier: 2.0,
                jitter_factor: 0.5,
            },
            Duration::from_secs(1),
        );

        for _ in 0..50 {
            let delay = coordinator.backoff_delay(3);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(1000));
        }
    }
}
