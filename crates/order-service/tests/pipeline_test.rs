//! 订单端到端流程测试
//!
//! HTTP 创建订单 -> 内存 Broker -> 订单消费循环 -> 处理器。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use order_service::consumer::{ORDER_CONSUMER_GROUP, order_consumer};
use order_service::{
    AppState, ORDERS_TOPIC, Order, OrderItem, OrderProcessor, OrderService,
    SimulatedOrderProcessor, routes,
};
use order_shared::config::ConsumerSettings;
use order_shared::kafka::MessagePublisher;
use order_shared::test_utils::{MemoryBroker, wait_until};
use parking_lot::Mutex;
use tokio::sync::watch;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct RecordingProcessor {
    orders: Mutex<Vec<Order>>,
}

#[async_trait]
impl OrderProcessor for RecordingProcessor {
    async fn process(&self, order: &Order, _shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.orders.lock().push(order.clone());
        Ok(())
    }
}

fn settings() -> ConsumerSettings {
    ConsumerSettings {
        auto_commit_enabled: false,
        poll_timeout_ms: 20,
        ..Default::default()
    }
}

fn expected_order() -> Order {
    Order {
        id: "o1".to_string(),
        customer_id: "c1".to_string(),
        items: vec![OrderItem {
            product_id: "p1".to_string(),
            quantity: 2,
        }],
    }
}

#[tokio::test]
async fn test_created_order_is_consumed_and_committed_once() {
    let broker = MemoryBroker::new();
    let service = OrderService::new(MessagePublisher::new(Arc::new(broker.clone())));
    let app = routes::app(AppState::new(service));

    let processor = Arc::new(RecordingProcessor::default());
    let (tx, rx) = watch::channel(false);
    let consumer = order_consumer(
        broker.subscriber(ORDER_CONSUMER_GROUP),
        processor.clone(),
        &settings(),
    );
    let task = tokio::spawn(consumer.run(rx));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/orders")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"id":"o1","customerId":"c1","items":[{"productId":"p1","quantity":2}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(wait_until(WAIT, || processor.orders.lock().len() == 1).await);
    tx.send(true).unwrap();
    let stats = tokio::time::timeout(WAIT, task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(*processor.orders.lock(), vec![expected_order()]);
    assert_eq!(stats.handled, 1);

    let commits = broker.commits(ORDER_CONSUMER_GROUP);
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].topic, ORDERS_TOPIC);
    assert_eq!(commits[0].partition, broker.partition_for("o1"));
}

#[tokio::test]
async fn test_shutdown_during_processing_leaves_order_uncommitted() {
    let broker = MemoryBroker::new();
    let publisher = MessagePublisher::new(Arc::new(broker.clone()));

    let (tx, rx) = watch::channel(false);
    let consumer = order_consumer(
        broker.subscriber(ORDER_CONSUMER_GROUP),
        Arc::new(SimulatedOrderProcessor::with_delay(Duration::from_secs(30))),
        &settings(),
    );
    let task = tokio::spawn(consumer.run(rx));

    publisher
        .publish(ORDERS_TOPIC, "o1", &expected_order())
        .await
        .unwrap();

    // 等待消费循环取走消息并进入处理
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    let stats = tokio::time::timeout(WAIT, task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert!(broker.commits(ORDER_CONSUMER_GROUP).is_empty());
}
