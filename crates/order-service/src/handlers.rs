//! HTTP 处理器

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

use crate::dto::{ApiResponse, CreateOrderCommand};
use crate::error::ApiError;
use crate::models::OrderResult;
use crate::state::AppState;

/// 创建订单
///
/// POST /api/orders
///
/// 订单发布成功即返回，实际处理由 `orders` 消费者异步完成。
pub async fn create_order(
    State(state): State<AppState>,
    Json(command): Json<CreateOrderCommand>,
) -> Result<Json<ApiResponse<OrderResult>>, ApiError> {
    command.validate()?;

    let order_id = command.id.clone();
    let result = state
        .order_service
        .create_order(command)
        .await
        .map_err(|e| ApiError::from_publish(&order_id, e))?;

    info!(order_id = %result.order_id, item_count = result.item_count, "订单已受理");
    Ok(Json(ApiResponse::success(result)))
}

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "order-service"
    }))
}
