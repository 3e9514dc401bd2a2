//! rdkafka 客户端适配
//!
//! `KafkaSink` 与 `KafkaSource` 分别实现发送端与拉取端抽象，
//! 将 rdkafka 的错误统一映射为 `MessagingError::Transport` / `Commit`。

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{error, info, warn};

use super::consumer::{ConsumerOptions, MessageSource};
use super::message::{ConsumerMessage, OutgoingMessage};
use super::publisher::MessageSink;
use crate::config::KafkaConfig;
use crate::error::MessagingError;

/// seek 调用的最长等待时间
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// BrokerContext
// ---------------------------------------------------------------------------

/// 客户端上下文
///
/// 只记录 Broker 级别的错误，不中断消费循环或发送流程。
#[derive(Debug, Clone)]
pub struct BrokerContext {
    client: String,
}

impl BrokerContext {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }
}

impl ClientContext for BrokerContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                error!(client = %self.client, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Warning => {
                warn!(client = %self.client, facility = fac, "{}", log_message)
            }
            _ => {
                tracing::debug!(client = %self.client, facility = fac, "{}", log_message)
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(client = %self.client, error = %error, reason, "Broker 错误");
    }
}

impl ConsumerContext for BrokerContext {}

// ---------------------------------------------------------------------------
// 客户端配置
// ---------------------------------------------------------------------------

/// 生产者客户端配置
pub fn producer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set(
            "message.timeout.ms",
            config.producer.message_timeout_ms.to_string(),
        )
        .set("acks", &config.producer.acks);
    client
}

/// 消费者客户端配置
///
/// 以消费组基础配置为底，group id 与自动提交开关取自单个循环的配置。
pub fn consumer_client_config(config: &KafkaConfig, options: &ConsumerOptions) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &options.group_id)
        .set("auto.offset.reset", &config.consumer.auto_offset_reset)
        .set(
            "enable.auto.commit",
            options.auto_commit_enabled.to_string(),
        )
        .set(
            "session.timeout.ms",
            config.consumer.session_timeout_ms.to_string(),
        )
        .set("enable.partition.eof", "false");
    client
}

// ---------------------------------------------------------------------------
// KafkaSink
// ---------------------------------------------------------------------------

/// 基于 `FutureProducer` 的发送端
///
/// `FutureProducer` 内部是 Arc 包装的，可安全地被并发调用，
/// 进程内只需要持有一个长期实例。
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<BrokerContext>,
    queue_timeout: Duration,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, MessagingError> {
        let producer: FutureProducer<BrokerContext> = producer_client_config(config)
            .create_with_context(BrokerContext::new("producer"))
            .map_err(|e| MessagingError::Transport(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            queue_timeout: config.producer.message_timeout(),
        })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, message: OutgoingMessage) -> Result<(i32, i64), MessagingError> {
        let headers = message.headers.iter().fold(
            OwnedHeaders::new_with_capacity(message.headers.len()),
            |acc, (key, value)| {
                acc.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_slice()),
                })
            },
        );

        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(headers);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.queue_timeout)
            .await
            .map_err(|(e, _)| MessagingError::Transport(e.to_string()))?;

        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// KafkaSource
// ---------------------------------------------------------------------------

/// 基于 `StreamConsumer` 的拉取端，由单个消费循环独占
///
/// 同步提交与 seek 会阻塞到协调者应答，通过 `block_in_place` 执行，
/// 因此必须运行在多线程 runtime 上。
pub struct KafkaSource {
    consumer: StreamConsumer<BrokerContext>,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig, options: &ConsumerOptions) -> Result<Self, MessagingError> {
        let consumer: StreamConsumer<BrokerContext> = consumer_client_config(config, options)
            .create_with_context(BrokerContext::new(format!("consumer:{}", options.topic)))
            .map_err(|e| MessagingError::Transport(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %options.group_id,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    fn subscribe(&mut self, topic: &str) -> Result<(), MessagingError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| MessagingError::Transport(format!("订阅 topic 失败: {e}")))?;

        info!(topic, "已订阅 Kafka topic");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>, MessagingError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(borrowed)) => Ok(Some(ConsumerMessage::from_borrowed(&borrowed))),
            Ok(Err(e)) => Err(MessagingError::Transport(e.to_string())),
        }
    }

    fn commit(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| MessagingError::Commit(e.to_string()))?;

        tokio::task::block_in_place(|| self.consumer.commit(&offsets, CommitMode::Sync))
            .map_err(|e| MessagingError::Commit(e.to_string()))
    }

    fn rewind(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError> {
        tokio::task::block_in_place(|| {
            self.consumer.seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                SEEK_TIMEOUT,
            )
        })
        .map_err(|e| MessagingError::Transport(e.to_string()))
    }

    fn close(&mut self) -> Result<(), MessagingError> {
        // 客户端本身在 drop 时关闭
        self.consumer.unsubscribe();
        Ok(())
    }
}
