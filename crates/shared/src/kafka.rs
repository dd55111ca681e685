//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 Producer/Consumer 抽象。
//! 消费端关闭自动提交：只有 handler 返回 `Ok` 的记录才提交 offset，
//! 失败的记录通过 seek 回退由 broker 重新投递，超过上限后进入死信队列。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::dlq::DlqProducer;
use crate::error::{FlowError, Result};
use crate::events::DeliveryReceipt;
use crate::observability::metrics as flow_metrics;
use crate::redelivery::{DeliveryTracker, Settlement, settle};
use crate::topic::EventSink;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

pub mod topics {
    pub const ORDERS: &str = "orders";
    pub const DEAD_LETTER_QUEUE: &str = "orders.dlq";
}

/// seek 回退的超时时间
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
/// seek 回退的最大尝试次数
const SEEK_ATTEMPTS: u32 = 3;
const SEEK_RETRY_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息
///
/// 从 `BorrowedMessage` 复制出所有字段，使消息可以跨 await 点传递。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for header in h.iter() {
                if let Some(value) = header.value.and_then(|raw| std::str::from_utf8(raw).ok()) {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| FlowError::Serialization(format!("负载非 UTF-8 编码: {e}")))
    }

    /// 将 JSON 负载反序列化为事件
    ///
    /// 解析失败是毒事件，返回不可重试的 `Serialization` 错误。
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| FlowError::Serialization(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// Kafka 生产者
///
/// 分区器固定为 `murmur2_random`：与 Java 客户端一致，
/// 带 key 的消息按 murmur2(key) 选择分区，同一订单号总是落在同一分区。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.producer_timeout_ms.to_string())
            .set("partitioner", "murmur2_random")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| FlowError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.producer_timeout_ms),
        })
    }

    /// 等待本地队列中的消息全部送达 broker
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| FlowError::Kafka(format!("刷新生产者队列失败: {e}")))?;

        info!("Kafka 生产者队列已刷新");
        Ok(())
    }

    /// 本地队列中尚未送达的消息数
    pub fn in_flight_count(&self) -> i32 {
        self.producer.in_flight_count()
    }
}

#[async_trait]
impl EventSink for KafkaProducer {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| FlowError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok(DeliveryReceipt {
            partition: delivery.partition,
            offset: delivery.offset,
        })
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// Kafka 消费者（手动提交 offset）
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id` 为空时使用配置中的 `kafka.consumer_group`。
    pub fn new(config: &KafkaConfig, group_id: Option<&str>) -> Result<Self> {
        let group_id = group_id
            .map(String::from)
            .unwrap_or_else(|| config.consumer_group.clone());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| FlowError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer, group_id })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| FlowError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 提交 offset：提交的是下一条要读取的位置
    fn commit(&self, msg: &ConsumerMessage) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| FlowError::Kafka(format!("构造提交列表失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| FlowError::Kafka(format!("提交 offset 失败: {e}")))
    }

    /// 把分区位置退回到失败的记录，下一次 poll 会重新拿到它
    ///
    /// seek 最多尝试 [`SEEK_ATTEMPTS`] 次。全部失败时返回错误：此时分区位置已越过
    /// 未提交的记录，继续消费会让后续记录的提交把它一并确认掉。
    async fn rewind(&self, msg: &ConsumerMessage) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.consumer.seek(
                &msg.topic,
                msg.partition,
                Offset::Offset(msg.offset),
                SEEK_TIMEOUT,
            ) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SEEK_ATTEMPTS => {
                    warn!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        attempt,
                        error = %e,
                        "seek 回退失败，稍后重试"
                    );
                    tokio::time::sleep(SEEK_RETRY_DELAY * attempt).await;
                }
                Err(e) => {
                    error!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        attempts = attempt,
                        error = %e,
                        "seek 回退失败，停止消费"
                    );
                    return Err(FlowError::Kafka(format!(
                        "seek {}[{}]@{} 失败: {e}",
                        msg.topic, msg.partition, msg.offset
                    )));
                }
            }
        }
    }

    /// 启动消费循环
    ///
    /// 每条记录的结果交给 [`settle`] 决定：
    /// - 成功，或已写入死信队列：提交 offset
    /// - 可重试错误，或死信写入失败：按退避等待后 seek 回退，由 broker 重投递
    ///
    /// 同一分区内的记录串行处理。关闭信号只在两条记录之间生效，
    /// 正在执行的 handler 总能完成。seek 回退彻底失败时返回错误，
    /// 进程重启后从最后提交的位置继续。
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut tracker: DeliveryTracker,
        dlq: DlqProducer,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        info!(group_id = %self.group_id, "收到关闭信号，Kafka 消费循环退出");
                        return Ok(());
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        return Ok(());
                    };

                    let msg = match msg_result {
                        Ok(borrowed) => ConsumerMessage::from_borrowed(&borrowed),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    let outcome = handler(msg.clone()).await;
                    match settle(outcome, &msg, &mut tracker, &dlq).await {
                        Settlement::Commit | Settlement::DeadLettered { .. } => {
                            if let Err(e) = self.commit(&msg) {
                                error!(offset = msg.offset, error = %e, "offset 提交失败");
                            }
                        }
                        Settlement::Rewind { delay } => {
                            flow_metrics::record_redelivery(&self.group_id);
                            tokio::time::sleep(delay).await;
                            self.rewind(&msg).await?;
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
