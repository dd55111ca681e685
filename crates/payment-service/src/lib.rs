//! 支付服务
//!
//! 以消费组 `payment-group-idempotent` 消费订单事件，每个事件恰好产生一条
//! `payments` 记录。重复投递由幂等账本吸收。

pub mod consumer;
pub mod error;
pub mod model;

pub use consumer::{PaymentConsumer, PaymentWorker, build_consumer};
pub use error::PaymentError;
pub use model::Payment;

pub const SERVICE_NAME: &str = "payment-service";
