//! 消息信封
//!
//! 发布端构造的 `OutgoingMessage` 与消费端拿到的 `ConsumerMessage`。
//! 信封一经发送即不可变，消费循环只读取而不修改。

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use uuid::Uuid;

/// 每次发布都会注入的元数据头
pub mod headers {
    pub const MESSAGE_TYPE: &str = "message-type";
    pub const PUBLISHED_AT: &str = "published-at";
    pub const CORRELATION_ID: &str = "correlation-id";
}

/// 有序的消息头列表，值为原始字节
pub type MessageHeaders = Vec<(String, Vec<u8>)>;

// ---------------------------------------------------------------------------
// DeliveryMetadata
// ---------------------------------------------------------------------------

/// 投递元数据
///
/// 每次调用发布都重新生成，correlation id 不会在两次发布之间复用。
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryMetadata {
    pub message_type: String,
    pub published_at: DateTime<Utc>,
    pub correlation_id: Uuid,
}

impl DeliveryMetadata {
    pub fn generate(message_type: &str) -> Self {
        Self {
            message_type: message_type.to_string(),
            published_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// ISO-8601 UTC 格式，例如 `2026-10-18T08:30:00.123456Z`
    pub fn published_at_string(&self) -> String {
        self.published_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// 与调用方的消息头合并，同名头以生成的元数据为准
    pub fn merge_into(&self, mut extra: MessageHeaders) -> MessageHeaders {
        extra.retain(|(name, _)| {
            !matches!(
                name.as_str(),
                headers::MESSAGE_TYPE | headers::PUBLISHED_AT | headers::CORRELATION_ID
            )
        });
        extra.push((
            headers::MESSAGE_TYPE.to_string(),
            self.message_type.as_bytes().to_vec(),
        ));
        extra.push((
            headers::PUBLISHED_AT.to_string(),
            self.published_at_string().into_bytes(),
        ));
        extra.push((
            headers::CORRELATION_ID.to_string(),
            self.correlation_id.to_string().into_bytes(),
        ));
        extra
    }
}

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// 待发送的消息
///
/// key 决定分区归属，同一 key 的消息保持发送顺序。
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
}

impl OutgoingMessage {
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_slice())
    }
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, Vec<u8>>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    pub(crate) fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for header in h.iter() {
                if let Some(raw) = header.value {
                    headers.insert(header.key.to_string(), raw.to_vec());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            headers,
        }
    }

    /// 消息 key，缺失时为空字符串
    pub fn key_str(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }

    /// 以 UTF-8 读取指定消息头
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|raw| std::str::from_utf8(raw).ok())
    }

    /// 发布端生成的关联 ID，用于跨服务串联日志
    pub fn correlation_id(&self) -> Option<&str> {
        self.header_str(headers::CORRELATION_ID)
    }
}
