//! 死信队列
//!
//! 无法处理的记录不会被丢弃，而是连同失败原因写入死信 topic（默认 `orders.dlq`），
//! 等待人工排查。两类来源：
//! - 消费端：毒事件，或重投递次数超过上限的记录
//! - 生产端：重试耗尽仍无法发送的订单事件

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FlowError, Result};
use crate::events::{DeliveryReceipt, OrderCreatedEvent};
use crate::kafka::ConsumerMessage;
use crate::observability::metrics as flow_metrics;
use crate::topic::EventSink;

/// 死信消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始事件 ID，负载无法解析时为空
    pub event_id: String,
    /// 原始消息 key（订单号）
    pub key: Option<String>,
    pub source_topic: String,
    /// 生产端失败时没有分区与 offset
    pub source_partition: Option<i32>,
    pub source_offset: Option<i64>,
    /// 原始负载（非 UTF-8 字节按替换字符转换）
    pub payload: String,
    pub error: String,
    pub error_code: String,
    /// 进入死信前的处理次数
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 由消费到的记录构造
    pub fn from_record(
        record: &ConsumerMessage,
        error: &FlowError,
        attempts: u32,
        source_service: &str,
    ) -> Self {
        // 尽力提取 eventId，毒事件可能根本不是 JSON
        let event_id = serde_json::from_slice::<serde_json::Value>(&record.payload)
            .ok()
            .and_then(|v| v.get("eventId").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or_default();

        Self {
            event_id,
            key: record.key.clone(),
            source_topic: record.topic.clone(),
            source_partition: Some(record.partition),
            source_offset: Some(record.offset),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
            error: error.to_string(),
            error_code: error.code().to_string(),
            attempts,
            failed_at: Utc::now(),
            source_service: source_service.to_string(),
        }
    }

    /// 由发送失败的订单事件构造
    pub fn from_unsent_event(
        event: &OrderCreatedEvent,
        source_topic: &str,
        error: &FlowError,
        attempts: u32,
        source_service: &str,
    ) -> Result<Self> {
        Ok(Self {
            event_id: event.event_id.clone(),
            key: Some(event.order_id.clone()),
            source_topic: source_topic.to_string(),
            source_partition: None,
            source_offset: None,
            payload: serde_json::to_string(event)?,
            error: error.to_string(),
            error_code: error.code().to_string(),
            attempts,
            failed_at: Utc::now(),
            source_service: source_service.to_string(),
        })
    }

    /// 死信消息的 key：沿用原始 key，保证同一订单的死信仍在同一分区
    fn routing_key(&self) -> &str {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ if !self.event_id.is_empty() => &self.event_id,
            _ => "unknown",
        }
    }
}

/// 死信生产者
pub struct DlqProducer {
    sink: Arc<dyn EventSink>,
    dlq_topic: String,
    source_service: String,
}

impl DlqProducer {
    pub fn new(sink: Arc<dyn EventSink>, dlq_topic: &str, source_service: &str) -> Self {
        Self {
            sink,
            dlq_topic: dlq_topic.to_string(),
            source_service: source_service.to_string(),
        }
    }

    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    /// 写入一条死信
    ///
    /// 失败时返回错误，调用方据此决定是否提交原记录的 offset。
    pub async fn send(&self, message: &DeadLetterMessage) -> Result<DeliveryReceipt> {
        let payload = serde_json::to_vec(message)?;
        let receipt = self
            .sink
            .send(&self.dlq_topic, message.routing_key(), &payload)
            .await?;

        flow_metrics::record_dead_letter(&self.source_service, &message.error_code);
        warn!(
            event_id = %message.event_id,
            source_topic = %message.source_topic,
            source_partition = ?message.source_partition,
            source_offset = ?message.source_offset,
            attempts = message.attempts,
            error = %message.error,
            "消息已写入死信队列"
        );

        Ok(receipt)
    }

    /// 隔离一条消费失败的记录
    pub async fn quarantine_record(
        &self,
        record: &ConsumerMessage,
        error: &FlowError,
        attempts: u32,
    ) -> Result<DeliveryReceipt> {
        let message = DeadLetterMessage::from_record(record, error, attempts, &self.source_service);
        self.send(&message).await
    }

    /// 隔离一条发送失败的订单事件
    pub async fn quarantine_event(
        &self,
        event: &OrderCreatedEvent,
        source_topic: &str,
        error: &FlowError,
        attempts: u32,
    ) -> Result<DeliveryReceipt> {
        let message = DeadLetterMessage::from_unsent_event(
            event,
            source_topic,
            error,
            attempts,
            &self.source_service,
        )?;
        self.send(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::{MemoryTopic, MockEventSink};
    use std::collections::HashMap;

    fn record(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: "orders".to_string(),
            partition: 3,
            offset: 17,
            key: Some("ORD-1".to_string()),
            payload: payload.to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_from_record_extracts_event_id() {
        let raw = br#"{"eventId":"evt-9","orderId":"ORD-1","userId":"u","totalAmount":1.0,"timestamp":1}"#;
        let error = FlowError::StoreUnavailable("down".to_string());
        let msg = DeadLetterMessage::from_record(&record(raw), &error, 5, "payment-service");

        assert_eq!(msg.event_id, "evt-9");
        assert_eq!(msg.source_partition, Some(3));
        assert_eq!(msg.source_offset, Some(17));
        assert_eq!(msg.error_code, "STORE_UNAVAILABLE");
        assert_eq!(msg.attempts, 5);
    }

    #[test]
    fn test_from_record_tolerates_garbage_payload() {
        let error = FlowError::Serialization("bad".to_string());
        let msg = DeadLetterMessage::from_record(&record(&[0xff, 0x00]), &error, 1, "svc");

        assert!(msg.event_id.is_empty());
        assert_eq!(msg.routing_key(), "ORD-1");
        assert!(!msg.payload.is_empty());
    }

    #[test]
    fn test_routing_key_fallbacks() {
        let error = FlowError::Serialization("bad".to_string());
        let mut msg = DeadLetterMessage::from_record(&record(b"{}"), &error, 1, "svc");
        msg.key = None;
        assert_eq!(msg.routing_key(), "unknown");

        msg.event_id = "evt-1".to_string();
        assert_eq!(msg.routing_key(), "evt-1");
    }

    #[tokio::test]
    async fn test_quarantine_record_writes_to_dlq_topic() {
        let topic = Arc::new(MemoryTopic::new(3));
        let dlq = DlqProducer::new(topic.clone(), "orders.dlq", "notification-worker");

        let error = FlowError::InvalidEventId("事件 ID 不能为空".to_string());
        dlq.quarantine_record(&record(b"{\"eventId\":\"\"}"), &error, 1)
            .await
            .unwrap();

        let stored = topic.all_records("orders.dlq");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "ORD-1");

        let parsed: DeadLetterMessage = serde_json::from_slice(&stored[0].payload).unwrap();
        assert_eq!(parsed.error_code, "INVALID_EVENT_ID");
        assert_eq!(parsed.source_service, "notification-worker");
    }

    #[tokio::test]
    async fn test_quarantine_event_from_producer() {
        let topic = Arc::new(MemoryTopic::new(1));
        let dlq = DlqProducer::new(topic.clone(), "orders.dlq", "order-service");
        let event = OrderCreatedEvent::new("ORD-7", "user-7", 30.0);

        let error = FlowError::Kafka("Message timed out".to_string());
        dlq.quarantine_event(&event, "orders", &error, 4).await.unwrap();

        let stored = topic.all_records("orders.dlq");
        let parsed: DeadLetterMessage = serde_json::from_slice(&stored[0].payload).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.source_partition, None);
        let original: OrderCreatedEvent = serde_json::from_str(&parsed.payload).unwrap();
        assert_eq!(original, event);
    }

    #[tokio::test]
    async fn test_send_failure_is_propagated() {
        let mut sink = MockEventSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_, _, _| Err(FlowError::Kafka("broker down".to_string())));

        let dlq = DlqProducer::new(Arc::new(sink), "orders.dlq", "payment-service");
        let error = FlowError::Serialization("bad".to_string());
        let result = dlq.quarantine_record(&record(b"x"), &error, 1).await;

        assert!(matches!(result, Err(FlowError::Kafka(_))));
    }
}
