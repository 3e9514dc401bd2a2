//! 测试工具模块
//!
//! 提供不依赖真实 Kafka 的内存 Broker、可编排失败的记录型处理器，
//! 以及异步断言辅助函数，供单元测试与集成测试共用。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use crate::error::MessagingError;
use crate::kafka::consumer::{MessageHandler, MessageSource};
use crate::kafka::message::{ConsumerMessage, MessageHeaders, OutgoingMessage};
use crate::kafka::publisher::MessageSink;

const DEFAULT_PARTITIONS: i32 = 3;

// ==================== 内存 Broker ====================

/// 一次成功的偏移量提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    /// 被提交的消息偏移量（消费组位置为 offset + 1）
    pub offset: i64,
}

#[derive(Default)]
struct BrokerState {
    /// topic -> 分区 -> 日志
    logs: HashMap<String, Vec<Vec<ConsumerMessage>>>,
    /// (group, topic, partition) -> 下一条待消费的偏移量
    committed: HashMap<(String, String, i32), i64>,
    commits: Vec<CommitRecord>,
    closed: HashSet<String>,
    send_failures: VecDeque<String>,
    poll_failures: VecDeque<String>,
    commit_failures: VecDeque<String>,
}

/// 内存 Broker
///
/// 按 key 哈希分区，分区内严格有序；按消费组记录已提交偏移量，
/// 新的订阅者从已提交位置开始消费，用于模拟重启后的重新投递。
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    arrivals: Arc<Notify>,
    partitions: i32,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            arrivals: Arc::new(Notify::new()),
            partitions: partitions.max(1),
        }
    }

    /// key 对应的分区
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }

    /// 直接写入原始字节，用于构造非法或空负载
    pub fn publish_raw(&self, topic: &str, key: &str, payload: &[u8]) -> (i32, i64) {
        self.append(topic, key, payload.to_vec(), Vec::new())
    }

    fn append(&self, topic: &str, key: &str, payload: Vec<u8>, headers: MessageHeaders) -> (i32, i64) {
        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.state.lock();
            let log = state
                .logs
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
            let entries = &mut log[partition as usize];
            let offset = entries.len() as i64;
            entries.push(ConsumerMessage {
                topic: topic.to_string(),
                partition,
                offset,
                key: Some(key.to_string()),
                payload,
                headers: headers.into_iter().collect(),
            });
            offset
        };
        self.arrivals.notify_waiters();
        (partition, offset)
    }

    /// 创建属于指定消费组的拉取端
    pub fn subscriber(&self, group: &str) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            group: group.to_string(),
            topic: None,
            positions: HashMap::new(),
        }
    }

    /// topic 中的全部消息，按分区、偏移量排列
    pub fn messages(&self, topic: &str) -> Vec<ConsumerMessage> {
        self.state
            .lock()
            .logs
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// 指定消费组的提交记录，按发生顺序
    pub fn commits(&self, group: &str) -> Vec<CommitRecord> {
        self.state
            .lock()
            .commits
            .iter()
            .filter(|c| c.group == group)
            .cloned()
            .collect()
    }

    /// 消费组的拉取端是否已关闭
    pub fn is_closed(&self, group: &str) -> bool {
        self.state.lock().closed.contains(group)
    }

    /// 接下来的 `count` 次发送返回 `Transport` 错误
    pub fn fail_next_sends(&self, count: usize, reason: &str) {
        let mut state = self.state.lock();
        state
            .send_failures
            .extend(std::iter::repeat_n(reason.to_string(), count));
    }

    /// 接下来的 `count` 次拉取返回 `Transport` 错误
    pub fn fail_next_polls(&self, count: usize, reason: &str) {
        let mut state = self.state.lock();
        state
            .poll_failures
            .extend(std::iter::repeat_n(reason.to_string(), count));
    }

    /// 接下来的 `count` 次提交返回 `Commit` 错误
    pub fn fail_next_commits(&self, count: usize, reason: &str) {
        let mut state = self.state.lock();
        state
            .commit_failures
            .extend(std::iter::repeat_n(reason.to_string(), count));
    }
}

#[async_trait]
impl MessageSink for MemoryBroker {
    async fn send(&self, message: OutgoingMessage) -> Result<(i32, i64), MessagingError> {
        if let Some(reason) = self.state.lock().send_failures.pop_front() {
            return Err(MessagingError::Transport(reason));
        }
        Ok(self.append(
            &message.topic,
            &message.key,
            message.payload,
            message.headers,
        ))
    }
}

/// 内存拉取端
///
/// 每个分区维护独立的读取位置，首次读取时从消费组已提交的偏移量开始。
pub struct MemorySource {
    broker: MemoryBroker,
    group: String,
    topic: Option<String>,
    positions: HashMap<i32, i64>,
}

impl MemorySource {
    fn next_record(&mut self) -> Result<Option<ConsumerMessage>, MessagingError> {
        let mut state = self.broker.state.lock();
        if let Some(reason) = state.poll_failures.pop_front() {
            return Err(MessagingError::Transport(reason));
        }

        let topic = self
            .topic
            .as_deref()
            .ok_or_else(|| MessagingError::Internal("拉取前未订阅 topic".to_string()))?;
        let Some(partitions) = state.logs.get(topic) else {
            return Ok(None);
        };

        for (partition, entries) in partitions.iter().enumerate() {
            let partition = partition as i32;
            let position = *self.positions.entry(partition).or_insert_with(|| {
                state
                    .committed
                    .get(&(self.group.clone(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            if let Some(message) = entries.get(position as usize) {
                self.positions.insert(partition, position + 1);
                return Ok(Some(message.clone()));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn subscribe(&mut self, topic: &str) -> Result<(), MessagingError> {
        self.topic = Some(topic.to_string());
        self.positions.clear();
        self.broker.state.lock().closed.remove(&self.group);
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>, MessagingError> {
        let deadline = Instant::now() + timeout;
        let arrivals = self.broker.arrivals.clone();

        loop {
            let notified = arrivals.notified();
            tokio::pin!(notified);
            // 先登记等待再检查日志，避免错过检查与等待之间到达的消息
            notified.as_mut().enable();

            if let Some(message) = self.next_record()? {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn commit(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock();
        if let Some(reason) = state.commit_failures.pop_front() {
            return Err(MessagingError::Commit(reason));
        }

        state.committed.insert(
            (self.group.clone(), message.topic.clone(), message.partition),
            message.offset + 1,
        );
        state.commits.push(CommitRecord {
            group: self.group.clone(),
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        });
        Ok(())
    }

    fn rewind(&mut self, message: &ConsumerMessage) -> Result<(), MessagingError> {
        self.positions.insert(message.partition, message.offset);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MessagingError> {
        self.broker.state.lock().closed.insert(self.group.clone());
        Ok(())
    }
}

// ==================== 记录型处理器 ====================

/// 处理器的一次调用
#[derive(Debug, Clone)]
pub struct HandledCall<T> {
    pub payload: T,
    pub key: String,
    pub succeeded: bool,
}

/// 记录每次调用的处理器，可以让前 N 次调用失败
pub struct RecordingHandler<T> {
    calls: Arc<Mutex<Vec<HandledCall<T>>>>,
    failures_left: Arc<AtomicUsize>,
}

impl<T> Clone for RecordingHandler<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            failures_left: Arc::clone(&self.failures_left),
        }
    }
}

impl<T: Clone> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RecordingHandler<T> {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(AtomicUsize::new(failures)),
        }
    }

    pub fn calls(&self) -> Vec<HandledCall<T>> {
        self.calls.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.calls.lock().len()
    }

    /// 成功处理的负载，按处理顺序
    pub fn handled(&self) -> Vec<T> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded)
            .map(|c| c.payload.clone())
            .collect()
    }
}

#[async_trait]
impl<T> MessageHandler<T> for RecordingHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn handle(
        &self,
        payload: T,
        key: &str,
        _shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        self.calls.lock().push(HandledCall {
            payload,
            key: key.to_string(),
            succeeded: !fail,
        });

        if fail {
            anyhow::bail!("模拟处理失败: key={key}");
        }
        Ok(())
    }
}

// ==================== 异步断言辅助 ====================

/// 在超时前反复检查条件，条件成立返回 `true`
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(topic: &str, key: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: body.as_bytes().to_vec(),
            headers: vec![("h".to_string(), b"v".to_vec())],
        }
    }

    #[tokio::test]
    async fn test_same_key_lands_on_same_partition_in_order() {
        let broker = MemoryBroker::new();
        let (p1, o1) = broker.send(outgoing("orders", "k", "1")).await.unwrap();
        let (p2, o2) = broker.send(outgoing("orders", "k", "2")).await.unwrap();

        assert_eq!(p1, p2);
        assert_eq!(o2, o1 + 1);
        assert_eq!(p1, broker.partition_for("k"));
    }

    #[tokio::test]
    async fn test_subscriber_resumes_from_committed_offset() {
        let broker = MemoryBroker::with_partitions(1);
        broker.publish_raw("orders", "k", b"1");
        broker.publish_raw("orders", "k", b"2");

        let mut first = broker.subscriber("g");
        first.subscribe("orders").unwrap();
        let msg = first.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        first.commit(&msg).unwrap();

        let mut restarted = broker.subscriber("g");
        restarted.subscribe("orders").unwrap();
        let next = restarted
            .poll(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.payload, b"2");
        assert_eq!(broker.committed_offset("g", "orders", 0), Some(1));
    }

    #[tokio::test]
    async fn test_rewind_redelivers_message() {
        let broker = MemoryBroker::with_partitions(1);
        broker.publish_raw("orders", "k", b"1");

        let mut source = broker.subscriber("g");
        source.subscribe("orders").unwrap();
        let msg = source.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        source.rewind(&msg).unwrap();

        let again = source.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.offset, msg.offset);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_new_message() {
        let broker = MemoryBroker::new();
        let mut source = broker.subscriber("g");
        source.subscribe("orders").unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish_raw("orders", "k", b"late");
        });

        let msg = source.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(msg.map(|m| m.payload), Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let broker = MemoryBroker::new();
        broker.fail_next_sends(1, "broker down");

        let err = broker.send(outgoing("orders", "k", "1")).await.unwrap_err();
        assert!(matches!(err, MessagingError::Transport(_)));
        assert!(broker.send(outgoing("orders", "k", "1")).await.is_ok());

        let mut source = broker.subscriber("g");
        source.subscribe("orders").unwrap();
        broker.fail_next_polls(1, "connection reset");
        assert!(source.poll(Duration::from_millis(10)).await.is_err());
        let msg = source.poll(Duration::from_millis(10)).await.unwrap().unwrap();

        broker.fail_next_commits(1, "coordinator moved");
        assert!(matches!(
            source.commit(&msg),
            Err(MessagingError::Commit(_))
        ));
        assert!(broker.commits("g").is_empty());
    }

    #[tokio::test]
    async fn test_recording_handler_fails_first_calls() {
        let handler = RecordingHandler::<u32>::failing_first(1);
        let (_tx, rx) = watch::channel(false);

        assert!(handler.handle(1, "k", rx.clone()).await.is_err());
        assert!(handler.handle(1, "k", rx).await.is_ok());
        assert_eq!(handler.attempts(), 2);
        assert_eq!(handler.handled(), vec![1]);
    }
}
