//! 通知记录

use async_trait::async_trait;
use orderflow_shared::error::Result;
use orderflow_shared::events::OrderCreatedEvent;
use orderflow_shared::idempotency::PgRecord;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::NotificationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub order_id: String,
}

impl Notification {
    pub fn from_event(event: &OrderCreatedEvent) -> std::result::Result<Self, NotificationError> {
        if event.order_id.trim().is_empty() {
            return Err(NotificationError::MissingOrderId {
                event_id: event.event_id.clone(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id: event.order_id.clone(),
        })
    }

    pub async fn find_by_order(pool: &PgPool, order_id: &str) -> Result<Vec<Self>> {
        let notifications = sqlx::query_as::<_, Self>(
            "SELECT id, order_id FROM notifications WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;
        Ok(notifications)
    }
}

pub fn derive_notification(event: &OrderCreatedEvent) -> Result<Notification> {
    Ok(Notification::from_event(event)?)
}

#[async_trait]
impl PgRecord for Notification {
    async fn insert(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("INSERT INTO notifications (id, order_id) VALUES ($1, $2)")
            .bind(self.id)
            .bind(&self.order_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_for_order() {
        let event = OrderCreatedEvent::new("ORD-7", "u", 1.0);
        let notification = derive_notification(&event).unwrap();
        assert_eq!(notification.order_id, "ORD-7");
    }

    #[test]
    fn test_blank_order_id_is_rejected() {
        let event = OrderCreatedEvent::new(" ", "u", 1.0);
        assert!(derive_notification(&event).is_err());
    }
}
