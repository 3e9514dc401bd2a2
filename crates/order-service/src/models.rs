//! 订单领域模型
//!
//! 线上格式为 camelCase JSON，与 HTTP 请求体和 Kafka 消息体保持一致。

use order_shared::kafka::MessagePayload;
use serde::{Deserialize, Serialize};

use crate::dto::{CreateOrderCommand, OrderItemDto};

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
}

/// 订单行项目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
}

impl MessagePayload for Order {}

impl From<CreateOrderCommand> for Order {
    fn from(command: CreateOrderCommand) -> Self {
        Self {
            id: command.id,
            customer_id: command.customer_id,
            items: command.items.into_iter().map(OrderItem::from).collect(),
        }
    }
}

impl From<OrderItemDto> for OrderItem {
    fn from(item: OrderItemDto) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
        }
    }
}

/// 创建订单的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub order_id: String,
    pub message: String,
    pub item_count: usize,
}

impl OrderResult {
    pub const QUEUED_MESSAGE: &'static str = "Order created and queued for processing";

    /// 订单已发布、等待异步处理
    pub fn queued(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            message: Self::QUEUED_MESSAGE.to_string(),
            item_count: order.items.len(),
        }
    }
}
