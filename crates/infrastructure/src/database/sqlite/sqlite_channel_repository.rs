use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::models::{Channel, ChannelEvent, ChannelHealthUpdate, ChannelStatus};
use gateway_core::traits::ChannelDirectory;
use gateway_core::{GatewayError, GatewayResult};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

const CHANNEL_COLUMNS: &str = "id, name, channel_type, base_url, key, models, test_model, status, \
     auto_ban, response_time_ms, test_time, status_reason, status_time, retested_at";

const EVENT_CAPACITY: usize = 256;

/// SQLite 渠道目录
///
/// 每次修改之后在广播通道上发布 [`ChannelEvent`]，路由缓存通过 [`subscribe`](Self::subscribe) 失效。
/// 列表查询返回的渠道带密钥，仅供引擎内部使用。
pub struct SqliteChannelRepository {
    pool: SqlitePool,
    events: broadcast::Sender<ChannelEvent>,
}

impl SqliteChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { pool, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// 新增渠道，渠道的增删改由管理端负责，这里只用于初始化与测试
    pub async fn insert(&self, channel: &Channel) -> GatewayResult<Channel> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO channels (name, channel_type, base_url, key, models, test_model, status,
                                  auto_ban, response_time_ms, test_time, status_reason, status_time,
                                  retested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {CHANNEL_COLUMNS}
            "#
        ))
        .bind(&channel.name)
        .bind(channel.channel_type)
        .bind(&channel.base_url)
        .bind(&channel.key)
        .bind(Channel::join_models(&channel.models))
        .bind(&channel.test_model)
        .bind(channel.status)
        .bind(channel.auto_ban)
        .bind(channel.response_time_ms)
        .bind(channel.test_time)
        .bind(&channel.status_reason)
        .bind(channel.status_time)
        .bind(channel.retested_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_channel(&row, true)
    }

    fn row_to_channel(row: &sqlx::sqlite::SqliteRow, with_secret: bool) -> GatewayResult<Channel> {
        let models: String = row.try_get("models")?;
        let key: Option<String> = if with_secret {
            row.try_get("key")?
        } else {
            None
        };

        Ok(Channel {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            channel_type: row.try_get("channel_type")?,
            base_url: row.try_get("base_url")?,
            key,
            models: Channel::parse_models(&models),
            test_model: row.try_get("test_model")?,
            status: row.try_get("status")?,
            auto_ban: row.try_get("auto_ban")?,
            response_time_ms: row.try_get("response_time_ms")?,
            test_time: row.try_get("test_time")?,
            status_reason: row.try_get("status_reason")?,
            status_time: row.try_get("status_time")?,
            retested_at: row.try_get("retested_at")?,
        })
    }

    fn publish(&self, event: ChannelEvent) {
        // 没有订阅者时发送失败，可忽略
        if self.events.send(event.clone()).is_err() {
            debug!("没有渠道事件订阅者: {:?}", event);
        }
    }

    fn ensure_updated(rows_affected: u64, id: i64) -> GatewayResult<()> {
        if rows_affected == 0 {
            return Err(GatewayError::ChannelNotFound { id });
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for SqliteChannelRepository {
    async fn get_channel(&self, id: i64, with_secret: bool) -> GatewayResult<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_channel(&row, with_secret)?)),
            None => Ok(None),
        }
    }

    async fn list_channels(
        &self,
        offset: i64,
        limit: i64,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Channel>> {
        let rows = if enabled_only {
            sqlx::query(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels WHERE status = $1 ORDER BY id LIMIT $2 OFFSET $3"
            ))
            .bind(ChannelStatus::Enabled)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter()
            .map(|row| Self::row_to_channel(row, true))
            .collect()
    }

    #[instrument(skip(self, models), fields(models = models.len()))]
    async fn update_models(
        &self,
        id: i64,
        models: &[String],
        retested_at: DateTime<Utc>,
    ) -> GatewayResult<()> {
        let result = sqlx::query("UPDATE channels SET models = $1, retested_at = $2 WHERE id = $3")
            .bind(Channel::join_models(models))
            .bind(retested_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected(), id)?;

        self.publish(ChannelEvent::ModelsUpdated { channel_id: id });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<&str>,
    ) -> GatewayResult<()> {
        let result = sqlx::query(
            "UPDATE channels SET status = $1, status_reason = $2, status_time = $3 WHERE id = $4",
        )
        .bind(status)
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)?;

        self.publish(ChannelEvent::StatusChanged {
            channel_id: id,
            status,
        });
        Ok(())
    }

    async fn update_health(&self, id: i64, update: &ChannelHealthUpdate) -> GatewayResult<()> {
        let result =
            sqlx::query("UPDATE channels SET response_time_ms = $1, test_time = $2 WHERE id = $3")
                .bind(update.response_time_ms)
                .bind(update.test_time)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Self::ensure_updated(result.rows_affected(), id)?;

        self.publish(ChannelEvent::HealthUpdated { channel_id: id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::DatabaseManager;
    use gateway_core::models::ChannelType;
    use gateway_core::traits::list_all_channels;

    fn channel(name: &str, status: ChannelStatus) -> Channel {
        Channel {
            id: 0,
            name: name.to_string(),
            channel_type: ChannelType::Gemini,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            key: Some("secret".to_string()),
            models: vec!["gemini-1.5-pro".to_string(), "gemini-1.5-flash".to_string()],
            test_model: None,
            status,
            auto_ban: true,
            response_time_ms: 0,
            test_time: None,
            status_reason: None,
            status_time: None,
            retested_at: None,
        }
    }

    async fn repository() -> (DatabaseManager, SqliteChannelRepository) {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteChannelRepository::new(db.pool().clone());
        (db, repo)
    }

    #[tokio::test]
    async fn test_get_channel_hides_secret_on_request() {
        let (_db, repo) = repository().await;
        let created = repo
            .insert(&channel("gemini", ChannelStatus::Enabled))
            .await
            .unwrap();

        let public = repo.get_channel(created.id, false).await.unwrap().unwrap();
        assert!(public.key.is_none());
        assert_eq!(public.models.len(), 2);
        assert_eq!(public.channel_type, ChannelType::Gemini);

        let private = repo.get_channel(created.id, true).await.unwrap().unwrap();
        assert_eq!(private.key.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_list_enabled_only_with_paging() {
        let (_db, repo) = repository().await;
        for i in 0..5 {
            repo.insert(&channel(&format!("c{i}"), ChannelStatus::Enabled))
                .await
                .unwrap();
        }
        repo.insert(&channel("off", ChannelStatus::AutoDisabled))
            .await
            .unwrap();

        let enabled = list_all_channels(&repo, true, 2).await.unwrap();
        assert_eq!(enabled.len(), 5);
        let all = list_all_channels(&repo, false, 2).await.unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let (_db, repo) = repository().await;
        let created = repo
            .insert(&channel("gemini", ChannelStatus::Enabled))
            .await
            .unwrap();
        let mut events = repo.subscribe();

        repo.update_models(created.id, &["gemini-1.5-pro".to_string()], Utc::now())
            .await
            .unwrap();
        repo.update_status(created.id, ChannelStatus::AutoDisabled, Some("invalid key"))
            .await
            .unwrap();
        repo.update_health(
            created.id,
            &ChannelHealthUpdate {
                response_time_ms: 321,
                test_time: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::ModelsUpdated {
                channel_id: created.id
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::StatusChanged {
                channel_id: created.id,
                status: ChannelStatus::AutoDisabled
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::HealthUpdated {
                channel_id: created.id
            }
        );

        let stored = repo.get_channel(created.id, false).await.unwrap().unwrap();
        assert_eq!(stored.models, vec!["gemini-1.5-pro".to_string()]);
        assert!(stored.retested_at.is_some());
        assert_eq!(stored.status, ChannelStatus::AutoDisabled);
        assert_eq!(stored.status_reason.as_deref(), Some("invalid key"));
        assert_eq!(stored.response_time_ms, 321);
    }

    #[tokio::test]
    async fn test_update_missing_channel() {
        let (_db, repo) = repository().await;
        let result = repo
            .update_status(42, ChannelStatus::Enabled, None)
            .await;
        assert!(matches!(result, Err(GatewayError::ChannelNotFound { id: 42 })));
    }
}
