//! Common helpers for async engine tests

use std::time::Duration;

use gateway_core::models::TestJob;
use gateway_core::traits::TestJobRepository;

/// 轮询直到任务进入终态，超时返回 None
pub async fn wait_for_terminal(
    repo: &dyn TestJobRepository,
    job_id: i64,
    timeout: Duration,
) -> Option<TestJob> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(job)) = repo.get_by_id(job_id).await {
            if job.status.is_terminal() {
                return Some(job);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
