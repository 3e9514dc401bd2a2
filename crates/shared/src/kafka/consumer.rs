//! 泛型消费循环
//!
//! 每个实例绑定一个 topic、一个消费组和一个处理器，在独立任务中串行地
//! 拉取 -> 解码 -> 处理 -> 决定是否提交，直到收到关闭信号。
//!
//! 提交策略：
//! - 解码失败：记录日志后跳过（视为已处理），毒消息不会永久阻塞分区
//! - 空负载：记录警告后跳过
//! - 处理器返回错误：不提交，并把分区回退到该偏移量，下一次拉取重新投递
//! - 拉取时 Broker 错误：固定等待后继续拉取，永不终止循环
//! - 提交失败：记录日志后继续，重启后可能出现重复投递（至少一次语义）

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::codec::{self, MessagePayload};
use super::message::ConsumerMessage;
use crate::config::ConsumerSettings;
use crate::error::MessagingError;
use crate::observability::metrics;

// ---------------------------------------------------------------------------
// 抽象
// ---------------------------------------------------------------------------

/// Broker 拉取端抽象
///
/// 由消费循环独占，不跨任务共享。
#[async_trait]
pub trait MessageSource: Send {
    /// 订阅唯一的 topic
    fn subscribe(&mut self, topic: &str) -> Result<(), MessagingError>;

    /// 拉取下一条消息，超时返回 `Ok(None)`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>, MessagingError>;

    /// 提交该消息（提交位置为 offset + 1）
    fn commit(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError>;

    /// 将该消息所在分区回退到它的偏移量，使下一次拉取重新投递
    fn rewind(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError>;

    /// 取消订阅并关闭底层客户端
    fn close(&mut self) -> Result<(), MessagingError>;
}

/// 按 topic 注入的业务处理器
///
/// 处理器收到关闭信号的副本，长时间运行的处理应当响应取消。
/// 返回错误即表示本次处理失败，消息会被重新投递。
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(
        &self,
        payload: T,
        key: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// 配置与结果
// ---------------------------------------------------------------------------

/// 单个消费循环的配置
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub topic: String,
    /// topic 专属的消费组，覆盖基础配置中的 group_id
    pub group_id: String,
    pub auto_commit_enabled: bool,
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl ConsumerOptions {
    /// 由消费组基础配置派生，仅替换 topic 与 group id
    pub fn from_settings(settings: &ConsumerSettings, topic: &str, group_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            auto_commit_enabled: settings.auto_commit_enabled,
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            error_backoff: Duration::from_secs(settings.error_backoff_secs),
        }
    }
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// 处理器成功返回
    Handled,
    /// 负载为空或为 null
    Empty,
    /// 解码失败，消息被跳过
    Skipped { reason: String },
    /// 处理器返回错误
    Failed { reason: String },
}

impl ProcessOutcome {
    /// 仅处理器失败时保留偏移量
    pub fn should_commit(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::Empty => "empty",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// 消费循环停止时返回的计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub handled: u64,
    pub empty: u64,
    pub skipped: u64,
    pub failed: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub transport_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        self.received += 1;
        match outcome {
            ProcessOutcome::Handled => self.handled += 1,
            ProcessOutcome::Empty => self.empty += 1,
            ProcessOutcome::Skipped { .. } => self.skipped += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageConsumer
// ---------------------------------------------------------------------------

/// 泛型消费循环
///
/// 每个 topic 使用独立的配置与处理器实例化一次，不依赖继承。
pub struct MessageConsumer<T, H, S> {
    source: S,
    handler: H,
    options: ConsumerOptions,
    stats: ConsumerStats,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H, S> MessageConsumer<T, H, S>
where
    T: MessagePayload,
    H: MessageHandler<T>,
    S: MessageSource,
{
    pub fn new(source: S, handler: H, options: ConsumerOptions) -> Self {
        Self {
            source,
            handler,
            options,
            stats: ConsumerStats::default(),
            _payload: PhantomData,
        }
    }

    /// 启动消费循环，直到关闭信号变为 `true`
    ///
    /// 仅订阅失败会返回错误；循环内部的所有错误都在本地恢复。
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerStats, MessagingError> {
        self.source.subscribe(&self.options.topic)?;

        info!(
            topic = %self.options.topic,
            group_id = %self.options.group_id,
            auto_commit = self.options.auto_commit_enabled,
            "消费者已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                Ok(()) = stop_requested(&mut shutdown) => break,

                polled = self.source.poll(self.options.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    let outcome = Self::process(
                        &self.handler,
                        &self.options.topic,
                        &message,
                        shutdown.clone(),
                    )
                    .await;
                    self.settle(&message, &outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.transport_errors += 1;
                    metrics::record_transport_error(&self.options.topic);
                    error!(
                        topic = %self.options.topic,
                        error = %e,
                        backoff_secs = self.options.error_backoff.as_secs_f64(),
                        "拉取消息出错，稍后重试"
                    );

                    tokio::select! {
                        biased;
                        Ok(()) = stop_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.options.error_backoff) => {}
                    }
                }
            }
        }

        self.shutdown();
        Ok(self.stats)
    }

    /// 解码并分发单条消息，返回显式的处理结果
    async fn process(
        handler: &H,
        topic: &str,
        message: &ConsumerMessage,
        shutdown: watch::Receiver<bool>,
    ) -> ProcessOutcome {
        let key = message.key_str();

        let payload = match codec::decode::<T>(&message.payload) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(
                    topic,
                    key,
                    offset = message.offset,
                    "反序列化结果为空，跳过该消息"
                );
                return ProcessOutcome::Empty;
            }
            Err(e) => {
                error!(
                    topic,
                    key,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "消息反序列化失败"
                );
                warn!(topic, key, "因反序列化失败跳过该消息");
                return ProcessOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        match handler.handle(payload, key, shutdown).await {
            Ok(()) => {
                info!(
                    topic,
                    key,
                    partition = message.partition,
                    offset = message.offset,
                    correlation_id = message.correlation_id().unwrap_or_default(),
                    "消息处理成功"
                );
                ProcessOutcome::Handled
            }
            Err(e) => {
                let err = MessagingError::Handler(format!("{e:#}"));
                error!(
                    topic,
                    key,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    code = err.code(),
                    "消息处理失败"
                );
                ProcessOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// 依据处理结果提交或回退
    fn settle(&mut self, message: &ConsumerMessage, outcome: &ProcessOutcome) {
        self.stats.record(outcome);
        metrics::record_consumed(&self.options.topic, outcome.label());

        if !outcome.should_commit() {
            if let Err(e) = self.source.rewind(message) {
                warn!(
                    topic = %self.options.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "回退偏移量失败，该消息将在重启后重新投递"
                );
            }
            return;
        }

        // 自动提交模式下偏移量由客户端推进
        if self.options.auto_commit_enabled {
            return;
        }

        match self.source.commit(message) {
            Ok(()) => {
                self.stats.commits += 1;
                metrics::record_commit(&self.options.topic, true);
                debug!(
                    topic = %self.options.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "偏移量已提交"
                );
            }
            Err(e) => {
                self.stats.commit_failures += 1;
                metrics::record_commit(&self.options.topic, false);
                error!(
                    topic = %self.options.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "偏移量提交失败"
                );
            }
        }
    }

    /// 释放订阅并关闭客户端，错误只记录不抛出
    fn shutdown(&mut self) {
        if let Err(e) = self.source.close() {
            error!(topic = %self.options.topic, error = %e, "关闭消费者出错");
        }
        info!(
            topic = %self.options.topic,
            received = self.stats.received,
            handled = self.stats.handled,
            failed = self.stats.failed,
            "消费者已停止"
        );
    }
}

/// 等待关闭信号变为 `true`，发送端被丢弃时返回错误
async fn stop_requested(
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), watch::error::RecvError> {
    shutdown.wait_for(|stop| *stop).await.map(|_| ())
}
