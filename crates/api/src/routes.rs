use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use gateway_dispatcher::{ContinuousHealthLoop, JobDispatcher, RemediationService, ResultReporter};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    channels::trigger_health_sweep,
    health::health_check,
    jobs::{cancel_job, get_job, list_jobs, submit_job},
    metrics::render_metrics,
    results::{delete_failed_models, export_results, list_results, retry_result},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<JobDispatcher>,
    pub reporter: Arc<ResultReporter>,
    pub remediation: Arc<RemediationService>,
    pub health_loop: Arc<ContinuousHealthLoop>,
    /// 未启用指标时为 None
    pub metrics_handle: Option<PrometheusHandle>,
}

/// 创建API路由
///
/// 除 CSV 导出外的接口都受 `request_timeout` 限制，超时返回 408。
pub fn create_routes(state: AppState, request_timeout: Duration) -> Router {
    let bounded = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 批量测试任务
        .route("/api/channel-tests/jobs", get(list_jobs).post(submit_job))
        .route("/api/channel-tests/jobs/{id}", get(get_job))
        .route("/api/channel-tests/jobs/{id}/cancel", post(cancel_job))
        .route("/api/channel-tests/jobs/{id}/results", get(list_results))
        .route(
            "/api/channel-tests/jobs/{id}/results/{result_id}/retry",
            post(retry_result),
        )
        .route(
            "/api/channel-tests/jobs/{id}/delete-failed-models",
            post(delete_failed_models),
        )
        // 渠道健康巡检
        .route("/api/channels/test", post(trigger_health_sweep))
        .layer(TimeoutLayer::new(request_timeout));

    // 导出按批次持续输出，时长与结果数量成正比
    let streaming = Router::new().route("/api/channel-tests/jobs/{id}/export", get(export_results));

    bounded.merge(streaming).with_state(state)
}
