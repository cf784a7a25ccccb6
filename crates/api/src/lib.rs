//! # Gateway API
//!
//! 渠道测试引擎的 HTTP 接口，基于 Axum 构建。
//!
//! ## API 端点
//!
//! ### 批量测试任务
//! - `POST /api/channel-tests/jobs` - 提交任务
//! - `GET /api/channel-tests/jobs?limit=` - 最近的任务
//! - `GET /api/channel-tests/jobs/{id}` - 任务详情与进度
//! - `GET /api/channel-tests/jobs/{id}/results?page=&page_size=` - 分页结果
//! - `POST /api/channel-tests/jobs/{id}/cancel` - 取消任务
//! - `GET /api/channel-tests/jobs/{id}/export` - 导出 CSV
//! - `POST /api/channel-tests/jobs/{id}/results/{result_id}/retry` - 重试单条结果
//! - `POST /api/channel-tests/jobs/{id}/delete-failed-models` - 删除失败模型
//!
//! ### 渠道巡检与运维
//! - `POST /api/channels/test` - 触发全量健康巡检
//! - `GET /health` - 存活检查
//! - `GET /metrics` - Prometheus 指标
//!
//! 除导出外的接口受 `api.request_timeout_seconds` 限制，超时返回 408。
//!
//! 成功响应统一包装为 [`response::ApiResponse`]，错误响应格式为
//! `{"error": {"message", "type", "code", "timestamp"}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use gateway_core::config::ApiConfig;
use tower::ServiceBuilder;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};

use middleware::{cors_layer, request_logging, trace_layer};

/// 创建带中间件的完整应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state, api_config.request_timeout()).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer(api_config))
    } else {
        router
    }
}
