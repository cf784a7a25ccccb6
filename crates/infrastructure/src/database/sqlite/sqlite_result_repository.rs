use async_trait::async_trait;
use gateway_core::models::TestResult;
use gateway_core::traits::TestResultRepository;
use gateway_core::{GatewayError, GatewayResult};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

const RESULT_COLUMNS: &str = "id, job_id, channel_id, channel_name, model_name, success, \
     duration_millis, retry_count, error_message, created_at";

pub struct SqliteTestResultRepository {
    pool: SqlitePool,
}

impl SqliteTestResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<TestResult> {
        Ok(TestResult {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            channel_id: row.try_get("channel_id")?,
            channel_name: row.try_get("channel_name")?,
            model_name: row.try_get("model_name")?,
            success: row.try_get("success")?,
            duration_millis: row.try_get("duration_millis")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TestResultRepository for SqliteTestResultRepository {
    #[instrument(skip(self, result), fields(
        job_id = result.job_id,
        channel_id = result.channel_id,
        model = %result.model_name,
    ))]
    async fn append(&self, result: &TestResult) -> GatewayResult<TestResult> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO test_results (job_id, channel_id, channel_name, model_name, success,
                                      duration_millis, retry_count, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {RESULT_COLUMNS}
            "#
        ))
        .bind(result.job_id)
        .bind(result.channel_id)
        .bind(&result.channel_name)
        .bind(&result.model_name)
        .bind(result.success)
        .bind(result.duration_millis)
        .bind(result.retry_count)
        .bind(&result.error_message)
        .bind(result.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_result(&row)
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestResult>> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM test_results WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_result(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, result: &TestResult) -> GatewayResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE test_results
            SET success = $1, duration_millis = $2, retry_count = $3, error_message = $4
            WHERE id = $5
            "#,
        )
        .bind(result.success)
        .bind(result.duration_millis)
        .bind(result.retry_count)
        .bind(&result.error_message)
        .bind(result.id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(GatewayError::TestResultNotFound { id: result.id });
        }
        Ok(())
    }

    async fn list_by_job(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> GatewayResult<Vec<TestResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM test_results WHERE job_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_result).collect()
    }

    async fn count_by_job(&self, job_id: i64) -> GatewayResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_results WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_failed(&self, job_id: i64) -> GatewayResult<Vec<TestResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM test_results WHERE job_id = $1 AND success = 0 ORDER BY id"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::DatabaseManager;
    use chrono::Utc;

    fn result(job_id: i64, model: &str, success: bool) -> TestResult {
        TestResult {
            id: 0,
            job_id,
            channel_id: 3,
            channel_name: "backup".to_string(),
            model_name: model.to_string(),
            success,
            duration_millis: 120,
            retry_count: 0,
            error_message: (!success).then(|| "status 401 (auth): bad key".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_pagination_is_stable_insertion_order() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTestResultRepository::new(db.pool().clone());
        for i in 0..7 {
            repo.append(&result(1, &format!("m{i}"), true)).await.unwrap();
        }
        repo.append(&result(2, "other", true)).await.unwrap();

        assert_eq!(repo.count_by_job(1).await.unwrap(), 7);
        let page = repo.list_by_job(1, 3, 3).await.unwrap();
        let models: Vec<_> = page.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(models, vec!["m3", "m4", "m5"]);
        assert_eq!(repo.list_by_job(1, 6, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTestResultRepository::new(db.pool().clone());
        let mut stored = repo.append(&result(1, "gpt-4o", false)).await.unwrap();

        stored.success = true;
        stored.retry_count = 1;
        stored.error_message = None;
        repo.update(&stored).await.unwrap();

        assert_eq!(repo.count_by_job(1).await.unwrap(), 1);
        let loaded = repo.get_by_id(stored.id).await.unwrap().unwrap();
        assert!(loaded.success);
        assert_eq!(loaded.retry_count, 1);
        assert!(loaded.error_message.is_none());

        stored.id = 9999;
        assert!(matches!(
            repo.update(&stored).await,
            Err(GatewayError::TestResultNotFound { id: 9999 })
        ));
    }

    #[tokio::test]
    async fn test_list_failed() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteTestResultRepository::new(db.pool().clone());
        repo.append(&result(1, "a", true)).await.unwrap();
        repo.append(&result(1, "b", false)).await.unwrap();
        repo.append(&result(1, "c", false)).await.unwrap();

        let failed = repo.list_failed(1).await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| !r.success));
    }
}
