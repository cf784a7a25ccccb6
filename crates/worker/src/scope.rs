use std::collections::HashSet;
use std::sync::Arc;

use gateway_core::models::{Channel, JobOptions, TestMode, TestUnit};
use gateway_core::traits::{list_all_channels, ChannelDirectory};
use gateway_core::GatewayResult;
use tracing::{debug, warn};

const CHANNEL_PAGE_SIZE: i64 = 100;

/// 将任务的渠道范围与模型过滤条件展开为具体测试单元
pub struct UnitResolver {
    directory: Arc<dyn ChannelDirectory>,
}

impl UnitResolver {
    pub fn new(directory: Arc<dyn ChannelDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, options: &JobOptions) -> GatewayResult<Vec<TestUnit>> {
        let channels = self.resolve_channels(options).await?;

        let units: Vec<TestUnit> = channels
            .into_iter()
            .flat_map(|channel| {
                select_models(&channel, options)
                    .into_iter()
                    .map(move |model| TestUnit {
                        channel: channel.clone(),
                        model,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        debug!("测试范围展开完成: {} 个测试单元", units.len());
        Ok(units)
    }

    async fn resolve_channels(&self, options: &JobOptions) -> GatewayResult<Vec<Channel>> {
        if options.include_all {
            return list_all_channels(
                self.directory.as_ref(),
                !options.include_disabled,
                CHANNEL_PAGE_SIZE,
            )
            .await;
        }

        let mut seen = HashSet::new();
        let mut channels = Vec::new();
        for &id in &options.channel_ids {
            if !seen.insert(id) {
                continue;
            }
            match self.directory.get_channel(id, true).await? {
                Some(channel) if channel.is_enabled() || options.include_disabled => {
                    channels.push(channel)
                }
                Some(channel) => {
                    debug!("跳过未启用的渠道: id={}, status={}", id, channel.status)
                }
                None => warn!("渠道不存在，跳过: id={}", id),
            }
        }
        Ok(channels)
    }
}

/// 按过滤条件选出一个渠道要测试的模型，保持目录顺序并去重
pub fn select_models(channel: &Channel, options: &JobOptions) -> Vec<String> {
    if options.use_channel_default {
        return channel
            .default_test_model()
            .map(|m| vec![m.to_string()])
            .unwrap_or_default();
    }

    let mut seen = HashSet::new();
    channel
        .models
        .iter()
        .filter(|m| options.whitelist.is_empty() || options.whitelist.contains(m))
        .filter(|m| !options.blacklist.contains(m))
        .filter(|m| match options.test_mode {
            TestMode::All => true,
            TestMode::Selected => options.target_models.contains(m),
        })
        .filter(|m| seen.insert(m.as_str()))
        .cloned()
        .collect()
}
