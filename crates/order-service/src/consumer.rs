//! `orders` topic 的消费端处理器

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::config::ConsumerSettings;
use order_shared::kafka::{ConsumerOptions, MessageConsumer, MessageHandler, MessageSource};
use tokio::sync::watch;
use tracing::info;

use crate::models::Order;
use crate::processor::OrderProcessor;
use crate::service::ORDERS_TOPIC;

/// 订单消费组
pub const ORDER_CONSUMER_GROUP: &str = "order-consumer-group";

/// 订单消息处理器
///
/// 记录订单与每个行项目，然后交给 `OrderProcessor`。
pub struct OrderMessageHandler {
    processor: Arc<dyn OrderProcessor>,
}

impl OrderMessageHandler {
    pub fn new(processor: Arc<dyn OrderProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler<Order> for OrderMessageHandler {
    async fn handle(
        &self,
        order: Order,
        key: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            item_count = order.items.len(),
            key,
            "收到订单"
        );
        for item in &order.items {
            info!(product_id = %item.product_id, quantity = item.quantity, "  订单行项目");
        }

        self.processor.process(&order, shutdown).await
    }
}

/// 订单消费循环的配置：topic 与消费组固定，其余取自基础配置
pub fn order_consumer_options(settings: &ConsumerSettings) -> ConsumerOptions {
    ConsumerOptions::from_settings(settings, ORDERS_TOPIC, ORDER_CONSUMER_GROUP)
}

/// 构造订单消费循环
pub fn order_consumer<S: MessageSource>(
    source: S,
    processor: Arc<dyn OrderProcessor>,
    settings: &ConsumerSettings,
) -> MessageConsumer<Order, OrderMessageHandler, S> {
    MessageConsumer::new(
        source,
        OrderMessageHandler::new(processor),
        order_consumer_options(settings),
    )
}
