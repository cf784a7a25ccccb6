use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::GatewayError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("网关错误: {0}")]
    Gateway(#[from] GatewayError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Gateway(err) => match err {
                GatewayError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                GatewayError::TestResultNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "RESULT_NOT_FOUND")
                }
                GatewayError::ChannelNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "CHANNEL_NOT_FOUND")
                }
                GatewayError::InvalidJobRequest(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_JOB_REQUEST")
                }
                GatewayError::JobStillActive { .. } => (StatusCode::CONFLICT, "JOB_STILL_ACTIVE"),
                GatewayError::JobAlreadyFinished { .. } => {
                    (StatusCode::CONFLICT, "JOB_ALREADY_FINISHED")
                }
                GatewayError::SweepInProgress => (StatusCode::CONFLICT, "SWEEP_IN_PROGRESS"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        // 内部错误不向调用方暴露细节
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            match &self {
                ApiError::Gateway(err) => err.to_string(),
                other => other.to_string(),
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
