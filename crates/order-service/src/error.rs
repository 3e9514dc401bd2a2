//! 订单服务 HTTP 错误
//!
//! Broker 侧的故障细节只写入日志，响应体中只保留订单 ID 与通用提示。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_shared::error::MessagingError;
use serde_json::json;

use crate::dto::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("消息代理不可用: orderId={order_id}")]
    BrokerUnavailable {
        order_id: String,
        #[source]
        source: MessagingError,
    },

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("内部错误: orderId={order_id}")]
    Internal {
        order_id: String,
        #[source]
        source: MessagingError,
    },
}

impl ApiError {
    /// 按发布错误的种类区分 503 / 400 / 500
    pub fn from_publish(order_id: &str, err: MessagingError) -> Self {
        match err {
            MessagingError::Publish { .. } => Self::BrokerUnavailable {
                order_id: order_id.to_string(),
                source: err,
            },
            MessagingError::Validation(msg) => Self::Validation(msg),
            other => Self::Internal {
                order_id: order_id.to_string(),
                source: other,
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BrokerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BrokerUnavailable { .. } => "BROKER_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let (message, data) = match &self {
            Self::BrokerUnavailable { order_id, source } => {
                tracing::error!(order_id = %order_id, error = %source, "订单发布失败");
                (
                    "消息服务暂不可用，请稍后重试".to_string(),
                    Some(json!({ "orderId": order_id })),
                )
            }
            Self::Internal { order_id, source } => {
                tracing::error!(order_id = %order_id, error = %source, "创建订单时发生意外错误");
                (
                    "服务内部错误，请稍后重试".to_string(),
                    Some(json!({ "orderId": order_id })),
                )
            }
            Self::Validation(_) => (self.to_string(), None),
        };

        (status, Json(ApiResponse::failure(code, message, data))).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_error() -> MessagingError {
        MessagingError::Publish {
            topic: "orders".to_string(),
            key: "o1".to_string(),
            reason: "Local: Message timed out".to_string(),
        }
    }

    #[test]
    fn test_publish_error_maps_to_503() {
        let err = ApiError::from_publish("o1", publish_error());
        assert!(matches!(err, ApiError::BrokerUnavailable { .. }));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validation_error_maps_to_400() {
        let err = ApiError::from_publish("o1", MessagingError::Validation("key 不能为空".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_other_errors_map_to_500() {
        let err = ApiError::from_publish("o1", MessagingError::Internal("boom".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_into_response_uses_status_code() {
        let response = ApiError::from_publish("o1", publish_error()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
