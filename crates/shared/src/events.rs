//! 事件信封定义
//!
//! 订单事件在生产端创建一次，之后在 Kafka 中可能被投递多次。
//! `event_id` 是唯一的去重键：创建时生成，重试和重投递都不会重新生成。

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// 事件 ID 的最大字节长度，与账本表 event_id 列的约束一致
pub const MAX_EVENT_ID_LEN: usize = 255;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// 可被幂等消费的事件信封
///
/// 幂等消费者只依赖这三个访问器，与具体业务负载无关。
pub trait Envelope: DeserializeOwned + Send + Sync {
    /// 全局唯一的去重键
    fn event_id(&self) -> &str;

    /// 业务实体 ID，同时是生产端的分区键
    fn entity_id(&self) -> &str;

    /// 生产时间（epoch 毫秒）
    fn produced_at(&self) -> i64;
}

/// 校验事件 ID
///
/// 空 ID 或超长 ID 无法写入账本，属于毒事件，不应重试。
pub fn validate_event_id(event_id: &str) -> Result<()> {
    if event_id.trim().is_empty() {
        return Err(FlowError::InvalidEventId("事件 ID 不能为空".to_string()));
    }
    if event_id.len() > MAX_EVENT_ID_LEN {
        return Err(FlowError::InvalidEventId(format!(
            "事件 ID 长度 {} 超过上限 {}",
            event_id.len(),
            MAX_EVENT_ID_LEN
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OrderCreatedEvent
// ---------------------------------------------------------------------------

/// 订单创建事件
///
/// 线上格式为 camelCase JSON：
/// `{"eventId", "orderId", "userId", "totalAmount", "timestamp"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub event_id: String,
    pub order_id: String,
    pub user_id: String,
    pub total_amount: f64,
    pub timestamp: i64,
}

impl OrderCreatedEvent {
    /// 创建新事件，分配一次性的事件 ID
    pub fn new(order_id: impl Into<String>, user_id: impl Into<String>, total_amount: f64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            user_id: user_id.into(),
            total_amount,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// 生成订单号：`ORD-` 加 UUID 的前 8 个字符
    pub fn generate_order_id() -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("ORD-{}", &uuid[..8])
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Envelope for OrderCreatedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn entity_id(&self) -> &str {
        &self.order_id
    }

    fn produced_at(&self) -> i64 {
        self.timestamp
    }
}

// ---------------------------------------------------------------------------
// DeliveryReceipt
// ---------------------------------------------------------------------------

/// broker 确认的投递位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_assigns_unique_ids() {
        let a = OrderCreatedEvent::new("ORD-1", "user-1", 10.0);
        let b = OrderCreatedEvent::new("ORD-1", "user-1", 10.0);

        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.entity_id(), "ORD-1");
        assert!(a.produced_at() > 0);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let event = OrderCreatedEvent {
            event_id: "evt-1".to_string(),
            order_id: "ORD-abcd1234".to_string(),
            user_id: "u-9".to_string(),
            total_amount: 99.5,
            timestamp: 1_700_000_000_000,
        };

        let json: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["eventId"], "evt-1");
        assert_eq!(json["orderId"], "ORD-abcd1234");
        assert_eq!(json["userId"], "u-9");
        assert_eq!(json["totalAmount"], 99.5);
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_parse_producer_payload() {
        let raw = r#"{"eventId":"e-1","orderId":"ORD-1","userId":"u","totalAmount":12,"timestamp":5}"#;
        let event: OrderCreatedEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(event.event_id(), "e-1");
        assert_eq!(event.total_amount, 12.0);
    }

    #[test]
    fn test_generate_order_id_format() {
        let order_id = OrderCreatedEvent::generate_order_id();
        assert!(order_id.starts_with("ORD-"));
        assert_eq!(order_id.len(), 12);
    }

    #[test]
    fn test_validate_event_id() {
        assert!(validate_event_id("evt-1").is_ok());
        assert!(validate_event_id(&"x".repeat(MAX_EVENT_ID_LEN)).is_ok());

        let err = validate_event_id("").unwrap_err();
        assert_eq!(err.code(), "INVALID_EVENT_ID");
        assert!(validate_event_id("   ").is_err());
        assert!(validate_event_id(&"x".repeat(MAX_EVENT_ID_LEN + 1)).is_err());
    }
}
