//! 统一错误处理模块
//!
//! 消息投递链路上的所有错误分类。发布端与消费端依据错误种类决定
//! 是向调用方抛出、跳过消息、撤回提交还是延迟后重新拉取。

use thiserror::Error;

/// 消息链路错误类型
#[derive(Debug, Error)]
pub enum MessagingError {
    // ==================== 发布端 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("消息发布失败: topic={topic}, key={key}, 原因={reason}")]
    Publish {
        topic: String,
        key: String,
        reason: String,
    },

    // ==================== 编解码 ====================
    #[error("消息序列化失败: {0}")]
    Encode(String),

    #[error("消息反序列化失败: {0}")]
    Decode(String),

    // ==================== 消费端 ====================
    #[error("消息处理失败: {0}")]
    Handler(String),

    #[error("Broker 通信错误: {0}")]
    Transport(String),

    #[error("偏移量提交失败: {0}")]
    Commit(String),

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MessagingError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Publish { .. } => "PUBLISH_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Handler(_) => "HANDLER_ERROR",
            Self::Transport(_) => "BROKER_TRANSPORT_ERROR",
            Self::Commit(_) => "COMMIT_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为 Broker 侧的暂时性故障，调用方可稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Publish { .. } | Self::Transport(_))
    }
}
