//! 通知工作者服务
//!
//! 以消费组 `notification-group-idempotent` 消费订单事件，每个事件恰好产生一条
//! `notifications` 记录。账本与支付服务共用一张表，但按消费方分区，互不影响。

pub mod consumer;
pub mod error;
pub mod model;

pub use consumer::{NotificationConsumer, NotificationWorker, build_consumer};
pub use error::NotificationError;
pub use model::Notification;

pub const SERVICE_NAME: &str = "notification-worker";
