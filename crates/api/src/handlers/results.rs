use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use gateway_dispatcher::DeleteFailedModelsRequest;
use serde::Deserialize;
use tracing::info;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Deserialize)]
pub struct ResultQueryParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<ResultQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .reporter
        .list_results(id, params.page, params.page_size)
        .await?;
    Ok(success(page))
}

/// 以附件形式流式导出 CSV
///
/// 任务不存在时在开始输出之前返回 404；输出过程中的读取错误会中断连接。
pub async fn export_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let stream = state.reporter.export_csv(id).await?;
    info!("开始导出测试任务 {} 的结果", id);

    let disposition = format!("attachment; filename=\"channel-test-{id}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    ))
}

pub async fn retry_result(
    State(state): State<AppState>,
    Path((id, result_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let report = state.remediation.retry_result(id, result_id).await?;
    Ok(success(report))
}

pub async fn delete_failed_models(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<DeleteFailedModelsRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state.remediation.delete_failed_models(id, request).await?;
    Ok(success(report))
}
