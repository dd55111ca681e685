//! 事件发送抽象
//!
//! `EventSink` 把"把一条带 key 的消息写到某个 topic"抽象出来，
//! 生产环境由 `KafkaProducer` 实现，测试与本地运行使用 `MemoryTopic`。

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{FlowError, Result};
use crate::events::DeliveryReceipt;
use crate::partition::partition_for;

/// 消息发送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// 发送一条消息并等待 broker 确认
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt>;
}

/// 内存 topic 中的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// 带分区的内存 topic
///
/// 分区选择与生产者的 murmur2 分区器一致，每个分区内 offset 从 0 递增。
/// 可注入若干次发送失败，用于验证生产端的重试与死信兜底。
pub struct MemoryTopic {
    partition_count: u32,
    partitions: DashMap<(String, i32), Vec<StoredRecord>>,
    pending_failures: AtomicU32,
}

impl MemoryTopic {
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count: partition_count.max(1),
            partitions: DashMap::new(),
            pending_failures: AtomicU32::new(0),
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// 让接下来的 n 次发送失败（可重试的 Kafka 错误）
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// 读取某个分区内的全部记录，按 offset 排序
    pub fn records(&self, topic: &str, partition: i32) -> Vec<StoredRecord> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// 读取 topic 下所有分区的记录
    pub fn all_records(&self, topic: &str) -> Vec<StoredRecord> {
        let mut all: Vec<StoredRecord> = self
            .partitions
            .iter()
            .filter(|entry| entry.key().0 == topic)
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|r| (r.partition, r.offset));
        all
    }

    pub fn len(&self, topic: &str) -> usize {
        self.partitions
            .iter()
            .filter(|entry| entry.key().0 == topic)
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventSink for MemoryTopic {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt> {
        if self.take_failure() {
            return Err(FlowError::Kafka("注入的发送失败".to_string()));
        }

        let partition = partition_for(key.as_bytes(), self.partition_count);
        let mut log = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        let offset = log.len() as i64;
        log.push(StoredRecord {
            partition,
            offset,
            key: key.to_string(),
            payload: payload.to_vec(),
        });

        Ok(DeliveryReceipt { partition, offset })
    }
}
