use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Channel, ChannelHealthUpdate, ChannelStatus};
use crate::GatewayResult;

/// 渠道目录（外部协作者）
///
/// 渠道的增删改由管理后台负责，测试引擎只读取快照，
/// 并在修复动作中更新模型目录与状态。每次修改之后实现方需要发出缓存失效信号。
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// 获取渠道。`with_secret` 为 false 时不返回凭证
    async fn get_channel(&self, id: i64, with_secret: bool) -> GatewayResult<Option<Channel>>;

    /// 分页列出渠道（按ID升序，带凭证）
    async fn list_channels(
        &self,
        offset: i64,
        limit: i64,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Channel>>;

    /// 覆盖模型目录并记录重测时间
    async fn update_models(
        &self,
        id: i64,
        models: &[String],
        retested_at: DateTime<Utc>,
    ) -> GatewayResult<()>;

    /// 变更渠道状态并记录原因
    async fn update_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<&str>,
    ) -> GatewayResult<()>;

    /// 写回测速信息
    async fn update_health(&self, id: i64, update: &ChannelHealthUpdate) -> GatewayResult<()>;
}

/// 分页遍历整个渠道目录
pub async fn list_all_channels(
    directory: &dyn ChannelDirectory,
    enabled_only: bool,
    page_size: i64,
) -> GatewayResult<Vec<Channel>> {
    let page_size = page_size.max(1);
    let mut channels = Vec::new();
    let mut offset = 0;
    loop {
        let page = directory
            .list_channels(offset, page_size, enabled_only)
            .await?;
        let fetched = page.len() as i64;
        channels.extend(page);
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    Ok(channels)
}
