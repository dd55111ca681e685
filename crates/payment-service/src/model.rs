//! 支付记录
//!
//! 每个订单事件推导出一条支付记录，与账本条目在同一事务内写入 `payments`。

use async_trait::async_trait;
use orderflow_shared::error::Result;
use orderflow_shared::events::OrderCreatedEvent;
use orderflow_shared::idempotency::PgRecord;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::PaymentError;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: String,
    pub amount: f64,
}

impl Payment {
    /// 由订单事件推导支付记录，每次调用生成新的主键
    pub fn from_event(event: &OrderCreatedEvent) -> std::result::Result<Self, PaymentError> {
        if !event.total_amount.is_finite() {
            return Err(PaymentError::InvalidAmount {
                order_id: event.order_id.clone(),
                amount: event.total_amount,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id: event.order_id.clone(),
            amount: event.total_amount,
        })
    }

    /// 某个订单的全部支付记录
    pub async fn find_by_order(pool: &PgPool, order_id: &str) -> Result<Vec<Self>> {
        let payments = sqlx::query_as::<_, Self>(
            "SELECT id, order_id, amount FROM payments WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;
        Ok(payments)
    }
}

/// 幂等消费者使用的推导函数
pub fn derive_payment(event: &OrderCreatedEvent) -> Result<Payment> {
    Ok(Payment::from_event(event)?)
}

#[async_trait]
impl PgRecord for Payment {
    async fn insert(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("INSERT INTO payments (id, order_id, amount) VALUES ($1, $2, $3)")
            .bind(self.id)
            .bind(&self.order_id)
            .bind(self.amount)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_shared::error::FlowError;

    fn event(amount: f64) -> OrderCreatedEvent {
        OrderCreatedEvent::new("ORD-1", "u-1", amount)
    }

    #[test]
    fn test_payment_copies_order_and_amount() {
        let payment = Payment::from_event(&event(42.5)).unwrap();
        assert_eq!(payment.order_id, "ORD-1");
        assert_eq!(payment.amount, 42.5);
    }

    #[test]
    fn test_each_derivation_gets_new_id() {
        let e = event(1.0);
        let a = derive_payment(&e).unwrap();
        let b = derive_payment(&e).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_non_finite_amount_is_validation_error() {
        let err = derive_payment(&event(f64::NAN)).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }
}
