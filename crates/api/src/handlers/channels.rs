use axum::{extract::State, response::IntoResponse};
use tracing::info;

use crate::{error::ApiResult, response::accepted, routes::AppState};

/// 在后台触发一次全量渠道巡检，已有巡检运行时返回 409
pub async fn trigger_health_sweep(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.health_loop.trigger_sweep()?;
    info!("已通过 API 触发渠道健康巡检");
    Ok(accepted("渠道健康巡检已启动"))
}
