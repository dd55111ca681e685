//! 幂等消费核心
//!
//! broker 只保证至少一次投递，同一个事件可能到达多次。幂等消费者保证每个
//! `event_id` 在每个服务中只产生一条效果记录：
//!
//! 1. 校验 event_id，非法即毒事件
//! 2. 快速路径：账本中已存在则跳过
//! 3. 在同一事务内写入效果记录与账本条目，然后提交
//! 4. 账本唯一约束冲突说明并发的另一次投递已经赢了，回滚并视为成功
//! 5. 其他失败回滚并原样返回，调用方不得提交 offset
//!
//! 快速路径只是优化，正确性完全由账本的唯一约束保证，进程内不加锁。

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{FlowError, Result};
use crate::events::{Envelope, validate_event_id};
use crate::kafka::ConsumerMessage;
use crate::observability::metrics as flow_metrics;

pub use memory::MemoryEffectStore;
pub use postgres::{PgEffectStore, PgRecord};

/// 账本写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 效果记录与账本条目都已提交
    Created,
    /// 账本中已有该事件，本次写入已回滚
    AlreadyProcessed,
}

/// 一次投递的处理结果
///
/// 三种结果都意味着可以提交 offset；失败以 `Err` 返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// 首次处理，效果已提交
    Committed,
    /// 快速路径命中，未做任何写入
    Skipped,
    /// 通过了快速路径但在写入时输给了并发的另一次投递
    ConflictSwallowed,
}

impl ProcessingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Skipped => "skipped",
            Self::ConflictSwallowed => "conflict_swallowed",
        }
    }
}

/// 效果存储：账本与效果记录的组合
///
/// `apply` 必须是原子的：要么效果记录和账本条目都可见，要么都不可见。
#[async_trait]
pub trait EffectStore<R: Send + Sync>: Send + Sync {
    /// 账本中是否已有该事件（仅用于快速路径）
    async fn is_processed(&self, event_id: &str) -> Result<bool>;

    /// 在一个事务内写入效果记录与账本条目
    async fn apply(&self, event_id: &str, record: &R) -> Result<InsertOutcome>;
}

/// 由事件推导效果记录
pub type DeriveFn<E, R> = Box<dyn Fn(&E) -> Result<R> + Send + Sync>;

/// 通用幂等消费者
///
/// 各服务只需提供效果记录类型、推导函数和对应的 `EffectStore`。
pub struct IdempotentConsumer<E, R: Send + Sync> {
    service: String,
    store: Arc<dyn EffectStore<R>>,
    derive: DeriveFn<E, R>,
    handler_timeout: Duration,
}

impl<E, R> IdempotentConsumer<E, R>
where
    E: Envelope,
    R: Send + Sync,
{
    pub fn new(
        service: &str,
        store: Arc<dyn EffectStore<R>>,
        derive: impl Fn(&E) -> Result<R> + Send + Sync + 'static,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            service: service.to_string(),
            store,
            derive: Box::new(derive),
            handler_timeout,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// 处理一次投递
    ///
    /// 整个处理过程受 `handler_timeout` 约束；超时返回可重试的 `Timeout`，
    /// 未完成的事务随 future 一起被丢弃并回滚。
    pub async fn handle(&self, event: &E) -> Result<ProcessingOutcome> {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.handler_timeout, self.process(event)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::Timeout {
                operation: format!("{} handle", self.service),
                timeout_ms: self.handler_timeout.as_millis() as u64,
            }),
        };

        let elapsed = started.elapsed().as_secs_f64();
        flow_metrics::record_handler_duration(&self.service, elapsed);

        match &result {
            Ok(outcome) => {
                flow_metrics::record_event_consumed(&self.service, outcome.as_str());
                match outcome {
                    ProcessingOutcome::Committed => info!(
                        service = %self.service,
                        event_id = %event.event_id(),
                        entity_id = %event.entity_id(),
                        outcome = outcome.as_str(),
                        "事件已处理"
                    ),
                    _ => info!(
                        service = %self.service,
                        event_id = %event.event_id(),
                        entity_id = %event.entity_id(),
                        outcome = outcome.as_str(),
                        "重复事件已忽略"
                    ),
                }
            }
            Err(err) => {
                flow_metrics::record_event_consumed(&self.service, "failed");
                warn!(
                    service = %self.service,
                    event_id = %event.event_id(),
                    entity_id = %event.entity_id(),
                    outcome = "failed",
                    code = err.code(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "事件处理失败"
                );
            }
        }

        result
    }

    /// 解析一条 Kafka 记录并处理
    ///
    /// 负载无法解析时返回不可重试的 `Serialization` 错误。
    pub async fn handle_message(&self, msg: &ConsumerMessage) -> Result<ProcessingOutcome> {
        let event: E = match msg.deserialize_payload() {
            Ok(event) => event,
            Err(err) => {
                flow_metrics::record_event_consumed(&self.service, "failed");
                warn!(
                    service = %self.service,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "无法解析的事件"
                );
                return Err(err);
            }
        };

        self.handle(&event).await
    }

    async fn process(&self, event: &E) -> Result<ProcessingOutcome> {
        let event_id = event.event_id();
        validate_event_id(event_id)?;

        if self.store.is_processed(event_id).await? {
            debug!(service = %self.service, event_id, "账本命中，跳过");
            return Ok(ProcessingOutcome::Skipped);
        }

        let record = (self.derive)(event)?;

        match self.store.apply(event_id, &record).await? {
            InsertOutcome::Created => Ok(ProcessingOutcome::Committed),
            InsertOutcome::AlreadyProcessed => Ok(ProcessingOutcome::ConflictSwallowed),
        }
    }
}
