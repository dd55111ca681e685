//! 订单受理服务
//!
//! 接收 HTTP 下单请求，立即应答，并把订单事件按订单号作为分区键异步发布到 Kafka。
//! 发送结果只体现在日志和指标中，调用方从不等待 broker 确认。

pub mod error;
pub mod publisher;
pub mod routes;

pub use error::OrderServiceError;
pub use publisher::{OrderEventPublisher, PublishHandle};
pub use routes::{AppState, ORDER_ACCEPTED, router};

pub const SERVICE_NAME: &str = "order-service";
