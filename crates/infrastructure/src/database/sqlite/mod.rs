pub mod sqlite_channel_repository;
pub mod sqlite_job_repository;
pub mod sqlite_result_repository;

pub use sqlite_channel_repository::SqliteChannelRepository;
pub use sqlite_job_repository::SqliteTestJobRepository;
pub use sqlite_result_repository::SqliteTestResultRepository;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use gateway_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true);

        let in_memory = config.url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = connect_options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("创建数据库目录失败: {}", parent.display()))?;
                }
            }
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        if in_memory {
            // 内存库随连接关闭而消失，只能使用单个常驻连接
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context("连接数据库失败")?;

        info!("数据库连接成功: {}", config.url);
        Ok(Self { pool })
    }

    /// 用于测试的内存数据库，已完成建表
    pub async fn in_memory() -> Result<Self> {
        let manager = Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connection_timeout_seconds: 5,
        })
        .await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 幂等建表
    pub async fn migrate(&self) -> Result<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                channel_type TEXT NOT NULL DEFAULT 'open_ai',
                base_url TEXT NOT NULL DEFAULT '',
                key TEXT,
                models TEXT NOT NULL DEFAULT '',
                test_model TEXT,
                status TEXT NOT NULL DEFAULT 'enabled',
                auto_ban INTEGER NOT NULL DEFAULT 1,
                response_time_ms INTEGER NOT NULL DEFAULT 0,
                test_time DATETIME,
                status_reason TEXT,
                status_time DATETIME,
                retested_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建 channels 表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS test_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requested_by TEXT NOT NULL,
                options TEXT NOT NULL DEFAULT '{}',
                concurrency INTEGER NOT NULL,
                interval_ms INTEGER NOT NULL DEFAULT 0,
                retry_limit INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                total_models INTEGER NOT NULL DEFAULT 0,
                completed_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                finished_at DATETIME,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建 test_jobs 表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS test_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                model_name TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_millis INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建 test_results 表失败")?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_test_jobs_status ON test_jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_test_results_job_id ON test_results(job_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_test_results_failed ON test_results(job_id, success)",
            "CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status)",
        ];
        for index in indexes {
            sqlx::query(index)
                .execute(&self.pool)
                .await
                .with_context(|| format!("创建索引失败: {index}"))?;
        }

        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(manager.pool())
        .await
        .unwrap();
        assert_eq!(tables, vec!["channels", "test_jobs", "test_results"]);
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gateway.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        };

        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager.close().await;

        assert!(path.exists());
    }
}
