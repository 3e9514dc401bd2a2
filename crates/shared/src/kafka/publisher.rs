//! 消息发布
//!
//! 将类型化负载编码、附加投递元数据后交给 Broker，返回分区与偏移量。
//! Broker 侧的任何失败都统一包装为 `MessagingError::Publish`，
//! 其他错误原样向上传播，便于边界层区分 "Broker 故障" 与 "程序缺陷"。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::codec::{self, MessagePayload};
use super::message::{DeliveryMetadata, MessageHeaders, OutgoingMessage};
use crate::error::MessagingError;
use crate::observability::metrics;

/// Broker 发送端抽象
///
/// 返回 Broker 分配的 (partition, offset)。实现方只产生
/// `Transport` 错误来表示 Broker 侧故障。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(i32, i64), MessagingError>;
}

/// 发布回执
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub correlation_id: Uuid,
    /// 仅用于观测，不参与正确性判断
    pub latency: Duration,
}

/// 类型化消息发布器
///
/// 内部持有共享的发送端，可以在多个请求处理任务间克隆使用。
#[derive(Clone)]
pub struct MessagePublisher {
    sink: Arc<dyn MessageSink>,
}

impl MessagePublisher {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// 发布消息
    pub async fn publish<T: MessagePayload>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<DeliveryReceipt, MessagingError> {
        self.publish_with_headers(topic, key, payload, Vec::new())
            .await
    }

    /// 发布消息并附带调用方自定义的消息头
    ///
    /// 参数校验在任何网络调用之前完成；`message-type`、`published-at`、
    /// `correlation-id` 三个元数据头每次调用都重新生成。
    pub async fn publish_with_headers<T: MessagePayload>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
        headers: MessageHeaders,
    ) -> Result<DeliveryReceipt, MessagingError> {
        validate(topic, key)?;

        let message_type = T::message_type();
        let started = Instant::now();

        debug!(message_type, topic, key, "Publishing message");

        let result = self.send(topic, key, payload, headers, message_type).await;
        let latency = started.elapsed();

        match result {
            Ok((metadata, partition, offset)) => {
                metrics::record_publish(topic, "success", latency.as_secs_f64());
                info!(
                    message_type,
                    topic,
                    key,
                    partition,
                    offset,
                    correlation_id = %metadata.correlation_id,
                    latency_ms = latency.as_millis() as u64,
                    "消息已发布"
                );
                Ok(DeliveryReceipt {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    correlation_id: metadata.correlation_id,
                    latency,
                })
            }
            Err(e) => {
                metrics::record_publish(topic, "failure", latency.as_secs_f64());
                let wrapped = wrap_broker_failure(topic, key, e);
                error!(
                    message_type,
                    topic,
                    key,
                    error = %wrapped,
                    code = wrapped.code(),
                    latency_ms = latency.as_millis() as u64,
                    "消息发布失败"
                );
                Err(wrapped)
            }
        }
    }

    async fn send<T: MessagePayload>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
        headers: MessageHeaders,
        message_type: &str,
    ) -> Result<(DeliveryMetadata, i32, i64), MessagingError> {
        let body = codec::encode(payload)?;
        let metadata = DeliveryMetadata::generate(message_type);

        let message = OutgoingMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: body,
            headers: metadata.merge_into(headers),
        };

        let (partition, offset) = self.sink.send(message).await?;
        Ok((metadata, partition, offset))
    }
}

/// 发布前置校验：topic 与 key 不能为空或全为空白
fn validate(topic: &str, key: &str) -> Result<(), MessagingError> {
    if topic.trim().is_empty() {
        return Err(MessagingError::Validation("topic 不能为空".to_string()));
    }
    if key.trim().is_empty() {
        return Err(MessagingError::Validation("key 不能为空".to_string()));
    }
    Ok(())
}

/// 序列化失败与 Broker 通信失败包装为 `Publish`，其余错误保持原样
fn wrap_broker_failure(topic: &str, key: &str, err: MessagingError) -> MessagingError {
    match err {
        MessagingError::Transport(reason) | MessagingError::Encode(reason) => {
            MessagingError::Publish {
                topic: topic.to_string(),
                key: key.to_string(),
                reason,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::message::headers;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Shipment {
        shipment_id: String,
        weight_grams: u32,
    }

    impl MessagePayload for Shipment {}

    fn shipment() -> Shipment {
        Shipment {
            shipment_id: "s-1".to_string(),
            weight_grams: 1200,
        }
    }

    #[tokio::test]
    async fn test_publish_returns_receipt_from_sink() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .withf(|msg| msg.topic == "shipments" && msg.key == "s-1")
            .times(1)
            .returning(|_| Ok((2, 17)));

        let publisher = MessagePublisher::new(Arc::new(sink));
        let receipt = publisher
            .publish("shipments", "s-1", &shipment())
            .await
            .unwrap();

        assert_eq!(receipt.topic, "shipments");
        assert_eq!(receipt.partition, 2);
        assert_eq!(receipt.offset, 17);
    }

    #[tokio::test]
    async fn test_publish_injects_metadata_headers() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .withf(|msg| {
                let by_name: HashMap<_, _> = msg.headers.iter().cloned().collect();
                let body: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
                by_name.get(headers::MESSAGE_TYPE).map(Vec::as_slice) == Some(b"Shipment".as_slice())
                    && by_name.contains_key(headers::PUBLISHED_AT)
                    && by_name
                        .get(headers::CORRELATION_ID)
                        .and_then(|v| std::str::from_utf8(v).ok())
                        .is_some_and(|v| Uuid::parse_str(v).is_ok())
                    && by_name.get("trace").map(Vec::as_slice) == Some(b"t-1".as_slice())
                    && body["shipmentId"] == "s-1"
                    && body["weightGrams"] == 1200
            })
            .times(1)
            .returning(|_| Ok((0, 0)));

        let publisher = MessagePublisher::new(Arc::new(sink));
        publisher
            .publish_with_headers(
                "shipments",
                "s-1",
                &shipment(),
                vec![("trace".to_string(), b"t-1".to_vec())],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_correlation_id_is_fresh_per_publish() {
        let mut sink = MockMessageSink::new();
        sink.expect_send().times(2).returning(|_| Ok((0, 1)));

        let publisher = MessagePublisher::new(Arc::new(sink));
        let first = publisher.publish("shipments", "s-1", &shipment()).await.unwrap();
        let second = publisher.publish("shipments", "s-1", &shipment()).await.unwrap();

        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[tokio::test]
    async fn test_empty_topic_fails_before_any_send() {
        let mut sink = MockMessageSink::new();
        sink.expect_send().never();

        let publisher = MessagePublisher::new(Arc::new(sink));
        let result = publisher.publish("", "s-1", &shipment()).await;
        assert!(matches!(result, Err(MessagingError::Validation(_))));

        let result = publisher.publish("shipments", "   ", &shipment()).await;
        assert!(matches!(result, Err(MessagingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_broker_timeout_is_wrapped_as_publish_error() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .returning(|_| Err(MessagingError::Transport("Message timed out".to_string())));

        let publisher = MessagePublisher::new(Arc::new(sink));
        let err = publisher
            .publish("shipments", "s-1", &shipment())
            .await
            .unwrap_err();

        match err {
            MessagingError::Publish { topic, key, reason } => {
                assert_eq!(topic, "shipments");
                assert_eq!(key, "s-1");
                assert_eq!(reason, "Message timed out");
            }
            other => panic!("expected Publish error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_error_propagates_unwrapped() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .returning(|_| Err(MessagingError::Internal("sink poisoned".to_string())));

        let publisher = MessagePublisher::new(Arc::new(sink));
        let err = publisher
            .publish("shipments", "s-1", &shipment())
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::Internal(_)));
    }
}
