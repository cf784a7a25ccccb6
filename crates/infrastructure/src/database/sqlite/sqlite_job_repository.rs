use async_trait::async_trait;
use chrono::Utc;
use gateway_core::models::{JobOptions, JobStatus, TestJob};
use gateway_core::traits::{JobCounters, TestJobRepository};
use gateway_core::{GatewayError, GatewayResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

const JOB_COLUMNS: &str = "id, requested_by, options, concurrency, interval_ms, retry_limit, status, \
     total_models, completed_count, success_count, failure_count, created_at, finished_at, error_message";

pub struct SqliteTestJobRepository {
    pool: SqlitePool,
}

impl SqliteTestJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<TestJob> {
        let options: String = row.try_get("options")?;
        let options: JobOptions = serde_json::from_str(&options)?;
        let interval_ms: i64 = row.try_get("interval_ms")?;

        Ok(TestJob {
            id: row.try_get("id")?,
            requested_by: row.try_get("requested_by")?,
            options,
            concurrency: row.try_get("concurrency")?,
            interval_ms: interval_ms.max(0) as u64,
            retry_limit: row.try_get("retry_limit")?,
            status: row.try_get("status")?,
            total_models: row.try_get("total_models")?,
            completed_count: row.try_get("completed_count")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
            error_message: row.try_get("error_message")?,
        })
    }

    fn row_to_counters(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<JobCounters> {
        Ok(JobCounters {
            completed_count: row.try_get("completed_count")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
        })
    }

    async fn current_counters(&self, id: i64) -> GatewayResult<JobCounters> {
        let row = sqlx::query(
            "SELECT completed_count, success_count, failure_count FROM test_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(GatewayError::JobNotFound { id })?;
        Self::row_to_counters(&row)
    }
}

#[async_trait]
impl TestJobRepository for SqliteTestJobRepository {
    #[instrument(skip(self, job), fields(requested_by = %job.requested_by))]
    async fn create(&self, job: &TestJob) -> GatewayResult<TestJob> {
        let options = serde_json::to_string(&job.options)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO test_jobs (requested_by, options, concurrency, interval_ms, retry_limit, status,
                                   total_models, completed_count, success_count, failure_count,
                                   created_at, finished_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.requested_by)
        .bind(options)
        .bind(job.concurrency)
        .bind(job.interval_ms as i64)
        .bind(job.retry_limit)
        .bind(job.status)
        .bind(job.total_models)
        .bind(job.completed_count)
        .bind(job.success_count)
        .bind(job.failure_count)
        .bind(job.created_at)
        .bind(job.finished_at)
        .bind(&job.error_message)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_job(&row)?;
        debug!("测试任务已创建: id={}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM test_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: i64) -> GatewayResult<Vec<TestJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM test_jobs ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, id: i64, total_models: i64) -> GatewayResult<bool> {
        let result = sqlx::query(
            "UPDATE test_jobs SET status = $1, total_models = $2 WHERE id = $3 AND status = $4",
        )
        .bind(JobStatus::Running)
        .bind(total_models)
        .bind(id)
        .bind(JobStatus::Pending)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.get_by_id(id).await?.is_none() {
                return Err(GatewayError::JobNotFound { id });
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn record_unit_completed(&self, id: i64, success: bool) -> GatewayResult<JobCounters> {
        let row = sqlx::query(
            r#"
            UPDATE test_jobs
            SET completed_count = completed_count + 1,
                success_count = success_count + CASE WHEN $1 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $1 THEN 0 ELSE 1 END
            WHERE id = $2 AND completed_count < total_models
            RETURNING completed_count, success_count, failure_count
            "#,
        )
        .bind(success)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_counters(&row),
            None => {
                warn!("任务 {} 的完成数已达到总数，忽略本次计数", id);
                self.current_counters(id).await
            }
        }
    }

    #[instrument(skip(self))]
    async fn finalize(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> GatewayResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE test_jobs
            SET status = $1, finished_at = $2, error_message = $3
            WHERE id = $4 AND status IN ('pending', 'running')
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.get_by_id(id).await?.is_none() {
                return Err(GatewayError::JobNotFound { id });
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn recompute_counters(&self, id: i64) -> GatewayResult<JobCounters> {
        let row = sqlx::query(
            r#"
            UPDATE test_jobs
            SET completed_count = (SELECT COUNT(*) FROM test_results WHERE job_id = $1),
                success_count = (SELECT COUNT(*) FROM test_results WHERE job_id = $1 AND success = 1),
                failure_count = (SELECT COUNT(*) FROM test_results WHERE job_id = $1 AND success = 0)
            WHERE id = $1
            RETURNING completed_count, success_count, failure_count
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(GatewayError::JobNotFound { id })?;

        Self::row_to_counters(&row)
    }

    async fn list_unfinished(&self) -> GatewayResult<Vec<TestJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM test_jobs WHERE status IN ('pending', 'running') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
