//! 创建订单

use order_shared::error::MessagingError;
use order_shared::kafka::MessagePublisher;
use tracing::info;

use crate::dto::CreateOrderCommand;
use crate::models::{Order, OrderResult};

/// 订单 topic
pub const ORDERS_TOPIC: &str = "orders";

/// 订单服务
///
/// 将请求映射为订单并以订单 ID 为 key 发布，同一订单的消息落在同一分区。
#[derive(Clone)]
pub struct OrderService {
    publisher: MessagePublisher,
}

impl OrderService {
    pub fn new(publisher: MessagePublisher) -> Self {
        Self { publisher }
    }

    pub async fn create_order(
        &self,
        command: CreateOrderCommand,
    ) -> Result<OrderResult, MessagingError> {
        info!(
            order_id = %command.id,
            customer_id = %command.customer_id,
            item_count = command.items.len(),
            "创建订单"
        );

        let order = Order::from(command);
        let receipt = self
            .publisher
            .publish(ORDERS_TOPIC, &order.id, &order)
            .await?;

        info!(
            order_id = %order.id,
            partition = receipt.partition,
            offset = receipt.offset,
            "订单已发布"
        );

        Ok(OrderResult::queued(&order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::OrderItemDto;
    use order_shared::kafka::codec;
    use order_shared::test_utils::MemoryBroker;
    use std::sync::Arc;

    fn command() -> CreateOrderCommand {
        CreateOrderCommand {
            id: "o1".to_string(),
            customer_id: "c1".to_string(),
            items: vec![OrderItemDto {
                product_id: "p1".to_string(),
                quantity: 2,
            }],
        }
    }

    #[tokio::test]
    async fn test_create_order_publishes_keyed_by_order_id() {
        let broker = MemoryBroker::new();
        let service = OrderService::new(MessagePublisher::new(Arc::new(broker.clone())));

        let result = service.create_order(command()).await.unwrap();
        assert_eq!(result, OrderResult::queued(&Order::from(command())));

        let messages = broker.messages(ORDERS_TOPIC);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key_str(), "o1");
        assert_eq!(messages[0].header_str("message-type"), Some("Order"));

        let published: Order = codec::decode(&messages[0].payload).unwrap().unwrap();
        assert_eq!(published, Order::from(command()));
    }

    #[tokio::test]
    async fn test_broker_failure_surfaces_publish_error() {
        let broker = MemoryBroker::new();
        broker.fail_next_sends(1, "Local: Message timed out");
        let service = OrderService::new(MessagePublisher::new(Arc::new(broker.clone())));

        let err = service.create_order(command()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Publish { .. }));
        assert!(broker.messages(ORDERS_TOPIC).is_empty());
    }
}
