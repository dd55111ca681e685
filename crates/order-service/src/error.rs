//! 订单受理服务错误类型
//!
//! 统一映射为 JSON 错误响应：`{success, code, message, data}`。

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orderflow_shared::error::FlowError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("请求体格式错误: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Shared(#[from] FlowError),
}

impl OrderServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Shared(e) => match e {
                FlowError::Validation(_)
                | FlowError::InvalidEventId(_)
                | FlowError::Serialization(_) => StatusCode::BAD_REQUEST,
                FlowError::Kafka(_) | FlowError::Timeout { .. } | FlowError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                FlowError::Database(_) | FlowError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::Shared(e) => e.code(),
        }
    }
}

impl IntoResponse for OrderServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 5xx 只返回通用提示，细节进日志
        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for OrderServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 缺字段、类型不符、Content-Type 错误等都归为请求体格式错误
impl From<JsonRejection> for OrderServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, OrderServiceError>;
