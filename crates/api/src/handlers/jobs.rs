use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use gateway_core::models::{JobOptions, SubmitJobRequest};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

const DEFAULT_REQUESTER: &str = "api";

/// 提交批量测试的请求体，执行参数缺省时使用引擎默认值
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    pub requested_by: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
    pub concurrency: Option<u32>,
    pub interval_ms: Option<u64>,
    pub retry_limit: Option<u32>,
}

impl From<SubmitJobBody> for SubmitJobRequest {
    fn from(body: SubmitJobBody) -> Self {
        SubmitJobRequest {
            requested_by: body
                .requested_by
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REQUESTER.to_string()),
            options: body.options,
            concurrency: body.concurrency,
            interval_ms: body.interval_ms,
            retry_limit: body.retry_limit,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub limit: Option<i64>,
}

/// 提交批量测试任务，立即返回任务ID
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobBody>,
) -> ApiResult<impl IntoResponse> {
    let job_id = state.dispatcher.submit(body.into()).await?;
    Ok(created(SubmitJobResponse { job_id }))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<impl IntoResponse> {
    let jobs = state.dispatcher.list_jobs(params.limit).await?;
    Ok(success(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let job = state.dispatcher.get_job(id).await?;
    Ok(success(job))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let job = state.dispatcher.cancel(id).await?;
    Ok(success(job))
}
