//! 请求与响应 DTO

use serde::{Deserialize, Serialize};
use validator::Validate;

/// 创建订单请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderCommand {
    #[validate(length(min = 1, max = 64, message = "订单 ID 长度必须在1-64个字符之间"))]
    pub id: String,
    #[validate(length(min = 1, max = 64, message = "客户 ID 长度必须在1-64个字符之间"))]
    pub customer_id: String,
    #[validate(nested)]
    pub items: Vec<OrderItemDto>,
}

/// 订单行项目
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDto {
    #[validate(length(min = 1, message = "商品 ID 不能为空"))]
    pub product_id: String,
    pub quantity: i32,
}

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
            data,
        }
    }
}
