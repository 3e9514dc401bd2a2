//! Kafka 消息可靠性核心
//!
//! - `codec`: JSON 编解码（camelCase 输出，大小写不敏感输入）
//! - `message`: 出站与入站消息信封、投递元数据头
//! - `publisher`: 类型化发布器，返回分区与偏移量回执
//! - `consumer`: 泛型消费循环与提交策略
//! - `client`: 基于 rdkafka 的发送端与拉取端

pub mod client;
pub mod codec;
pub mod consumer;
pub mod message;
pub mod publisher;

pub use client::{KafkaSink, KafkaSource};
pub use codec::MessagePayload;
pub use consumer::{
    ConsumerOptions, ConsumerStats, MessageConsumer, MessageHandler, MessageSource, ProcessOutcome,
};
pub use message::{ConsumerMessage, DeliveryMetadata, MessageHeaders, OutgoingMessage, headers};
pub use publisher::{DeliveryReceipt, MessagePublisher, MessageSink};
