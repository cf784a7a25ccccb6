use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use gateway_core::models::TestResult;
use gateway_core::traits::{ChannelDirectory, JobCounters, TestJobRepository, TestResultRepository};
use gateway_core::{GatewayError, GatewayResult};
use gateway_worker::RetryCoordinator;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// 批量删除失败模型的请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeleteFailedModelsRequest {
    /// 只处理这些渠道，空表示任务涉及的全部渠道
    pub channel_ids: Option<Vec<i64>>,
    pub dry_run: bool,
}

/// 单个渠道的模型删除结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelRemoval {
    pub channel_id: i64,
    pub channel_name: String,
    pub removed: Vec<String>,
    pub remaining: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelRemovalError {
    pub channel_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFailedModelsReport {
    pub job_id: i64,
    pub dry_run: bool,
    pub channels: Vec<ChannelRemoval>,
    pub errors: Vec<ChannelRemovalError>,
}

/// 单条结果重试之后的状态
#[derive(Debug, Clone, Serialize)]
pub struct RetryResultReport {
    pub result: TestResult,
    pub counters: JobCounters,
}

/// 修复操作：单条重试、删除失败模型
pub struct RemediationService {
    job_repo: Arc<dyn TestJobRepository>,
    result_repo: Arc<dyn TestResultRepository>,
    directory: Arc<dyn ChannelDirectory>,
    coordinator: Arc<RetryCoordinator>,
}

impl RemediationService {
    pub fn new(
        job_repo: Arc<dyn TestJobRepository>,
        result_repo: Arc<dyn TestResultRepository>,
        directory: Arc<dyn ChannelDirectory>,
        coordinator: Arc<RetryCoordinator>,
    ) -> Self {
        Self {
            job_repo,
            result_repo,
            directory,
            coordinator,
        }
    }

    /// 在原 Worker Pool 之外重新测试一条结果，原地更新后重算任务统计
    #[instrument(skip(self))]
    pub async fn retry_result(&self, job_id: i64, result_id: i64) -> GatewayResult<RetryResultReport> {
        let job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(GatewayError::JobNotFound { id: job_id })?;
        if !job.status.is_terminal() {
            return Err(GatewayError::JobStillActive {
                id: job_id,
                status: job.status,
            });
        }

        let mut result = self
            .result_repo
            .get_by_id(result_id)
            .await?
            .filter(|r| r.job_id == job_id)
            .ok_or(GatewayError::TestResultNotFound { id: result_id })?;
        let channel = self
            .directory
            .get_channel(result.channel_id, true)
            .await?
            .ok_or(GatewayError::ChannelNotFound {
                id: result.channel_id,
            })?;

        let outcome = self
            .coordinator
            .attempt_once(&channel, &result.model_name)
            .await;
        result.apply_retry(&outcome);
        self.result_repo.update(&result).await?;
        let counters = self.job_repo.recompute_counters(job_id).await?;

        info!(
            "重试测试结果 {} 完成: success={}, retry_count={}",
            result_id, result.success, result.retry_count
        );
        Ok(RetryResultReport { result, counters })
    }

    /// 从渠道模型目录中移除本任务中失败的模型
    ///
    /// 每个渠道独立处理，单个渠道出错只记录在报告中。
    #[instrument(skip(self, request), fields(dry_run = request.dry_run))]
    pub async fn delete_failed_models(
        &self,
        job_id: i64,
        request: DeleteFailedModelsRequest,
    ) -> GatewayResult<DeleteFailedModelsReport> {
        let job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(GatewayError::JobNotFound { id: job_id })?;
        if !job.status.is_terminal() {
            return Err(GatewayError::JobStillActive {
                id: job_id,
                status: job.status,
            });
        }

        let filter: Option<HashSet<i64>> = request
            .channel_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());

        let mut failed_by_channel: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for result in self.result_repo.list_failed(job_id).await? {
            if filter.as_ref().is_some_and(|f| !f.contains(&result.channel_id)) {
                continue;
            }
            failed_by_channel
                .entry(result.channel_id)
                .or_default()
                .push(result.model_name);
        }

        let mut report = DeleteFailedModelsReport {
            job_id,
            dry_run: request.dry_run,
            channels: Vec::new(),
            errors: Vec::new(),
        };

        for (channel_id, failed) in failed_by_channel {
            match self
                .remove_from_channel(channel_id, &failed, request.dry_run)
                .await
            {
                Ok(removal) => report.channels.push(removal),
                Err(e) => {
                    warn!("渠道 {} 删除失败模型出错: {}", channel_id, e);
                    report.errors.push(ChannelRemovalError {
                        channel_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "任务 {} 删除失败模型完成: {} 个渠道成功, {} 个渠道出错",
            job_id,
            report.channels.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn remove_from_channel(
        &self,
        channel_id: i64,
        failed: &[String],
        dry_run: bool,
    ) -> GatewayResult<ChannelRemoval> {
        let channel = self
            .directory
            .get_channel(channel_id, false)
            .await?
            .ok_or(GatewayError::ChannelNotFound { id: channel_id })?;

        let (removed, remaining) = partition_catalog(&channel.models, failed);
        if remaining.is_empty() {
            return Err(GatewayError::NoUsableModels { channel_id });
        }

        if !dry_run && !removed.is_empty() {
            self.directory
                .update_models(channel_id, &remaining, Utc::now())
                .await?;
            info!("渠道 {} 已移除模型: {:?}", channel_id, removed);
        }

        Ok(ChannelRemoval {
            channel_id,
            channel_name: channel.name,
            removed,
            remaining,
        })
    }
}

/// 将模型目录分成 (删除, 保留) 两部分，保持原顺序并去重
pub fn partition_catalog(catalog: &[String], failed: &[String]) -> (Vec<String>, Vec<String>) {
    let failed: HashSet<&str> = failed.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut removed = Vec::new();
    let mut remaining = Vec::new();

    for model in catalog {
        if !seen.insert(model.as_str()) {
            continue;
        }
        if failed.contains(model.as_str()) {
            removed.push(model.clone());
        } else {
            remaining.push(model.clone());
        }
    }
    (removed, remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partition_preserves_order_and_dedups() {
        let (removed, remaining) = partition_catalog(
            &strings(&["a", "b", "c", "a", "d", "b"]),
            &strings(&["b", "b", "x"]),
        );
        assert_eq!(removed, strings(&["b"]));
        assert_eq!(remaining, strings(&["a", "c", "d"]));
    }

    #[test]
    fn test_partition_everything_failed() {
        let (removed, remaining) = partition_catalog(&strings(&["a", "b"]), &strings(&["a", "b"]));
        assert_eq!(removed.len(), 2);
        assert!(remaining.is_empty());
    }
}
