//! 共享库
//!
//! 订单事件管道中所有服务共用的基础设施：事件信封、分区键路由、Kafka 封装、
//! 幂等消费核心、死信队列、重试策略、配置、错误处理、数据库连接与可观测性。

pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod events;
pub mod health;
pub mod idempotency;
pub mod kafka;
pub mod observability;
pub mod partition;
pub mod redelivery;
pub mod retry;
pub mod shutdown;
pub mod test_utils;
pub mod topic;
