//! 重投递计数与 offset 结算
//!
//! 消费者失败时不提交 offset，而是把分区 seek 回失败的位置，让 broker 重新投递。
//! 为避免一条毒事件无限阻塞分区，按 (topic, partition) 记录当前卡住的 offset
//! 及其失败次数，超过上限或遇到不可重试的错误时转入死信队列。
//!
//! 同一分区在任意时刻最多只有一条记录在重投递，所以计数表的大小以分区数为上限，
//! 分区被回收后残留的条目会在下一次该分区推进时被覆盖或清除。

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::ConsumerConfig;
use crate::dlq::DlqProducer;
use crate::error::{FlowError, Result};
use crate::kafka::ConsumerMessage;
use crate::retry::RetryPolicy;

/// 一次失败之后的处置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 等待 delay 后重投递，attempt 为已失败次数
    Redeliver { attempt: u32, delay: Duration },
    /// 写入死信队列；写入失败时等待 retry_delay 再重投递
    DeadLetter { attempts: u32, retry_delay: Duration },
}

type PartitionKey = (String, i32);

/// 分区上卡住的记录
#[derive(Debug, Clone, Copy)]
struct Stuck {
    offset: i64,
    failures: u32,
}

/// 按分区统计当前记录的失败次数
///
/// 只在单个消费循环内使用，不需要并发保护。
#[derive(Debug)]
pub struct DeliveryTracker {
    max_attempts: u32,
    backoff: RetryPolicy,
    failures: HashMap<PartitionKey, Stuck>,
}

impl DeliveryTracker {
    pub fn new(max_attempts: u32, backoff: RetryPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            failures: HashMap::new(),
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(config.max_attempts, config.retry_policy())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 记录一次失败并给出处置
    ///
    /// 进入死信时计数保留，直到 [`record_success`](Self::record_success) 确认死信写入成功。
    pub fn record_failure(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        error: &FlowError,
    ) -> Disposition {
        let stuck = self
            .failures
            .entry((topic.to_string(), partition))
            .or_insert(Stuck { offset, failures: 0 });

        // 分区已推进到别的记录（例如重平衡后重新分配），旧计数作废
        if stuck.offset != offset {
            *stuck = Stuck { offset, failures: 0 };
        }
        stuck.failures = stuck.failures.saturating_add(1);
        let attempts = stuck.failures;
        let delay = self.backoff.delay_for_attempt(attempts - 1);

        if !error.is_retryable() || attempts >= self.max_attempts {
            return Disposition::DeadLetter {
                attempts,
                retry_delay: delay,
            };
        }

        Disposition::Redeliver {
            attempt: attempts,
            delay,
        }
    }

    /// 记录已结算（处理成功或死信写入成功），清除该分区不晚于此 offset 的计数
    pub fn record_success(&mut self, topic: &str, partition: i32, offset: i64) {
        let key = (topic.to_string(), partition);
        if self
            .failures
            .get(&key)
            .is_some_and(|stuck| stuck.offset <= offset)
        {
            self.failures.remove(&key);
        }
    }

    /// 某位置已失败的次数
    pub fn failures(&self, topic: &str, partition: i32, offset: i64) -> u32 {
        self.failures
            .get(&(topic.to_string(), partition))
            .filter(|stuck| stuck.offset == offset)
            .map(|stuck| stuck.failures)
            .unwrap_or(0)
    }

    /// 正在等待重投递的记录数
    pub fn pending(&self) -> usize {
        self.failures.len()
    }
}

// ---------------------------------------------------------------------------
// 结算
// ---------------------------------------------------------------------------

/// 一条记录处理完之后对 offset 的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// 处理成功，提交 offset
    Commit,
    /// 已写入死信队列，提交 offset
    DeadLettered { attempts: u32 },
    /// 不提交，等待 delay 后 seek 回该记录
    Rewind { delay: Duration },
}

impl Settlement {
    /// 是否应提交该记录的 offset
    pub fn commits(&self) -> bool {
        !matches!(self, Settlement::Rewind { .. })
    }
}

/// 根据 handler 的结果决定提交、死信还是回退
///
/// 死信写入失败时绝不提交，按当前次数的退避时间回退，计数保留到下一轮。
pub async fn settle(
    outcome: Result<()>,
    msg: &ConsumerMessage,
    tracker: &mut DeliveryTracker,
    dlq: &DlqProducer,
) -> Settlement {
    let err = match outcome {
        Ok(()) => {
            tracker.record_success(&msg.topic, msg.partition, msg.offset);
            return Settlement::Commit;
        }
        Err(err) => err,
    };

    match tracker.record_failure(&msg.topic, msg.partition, msg.offset, &err) {
        Disposition::Redeliver { attempt, delay } => {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                attempt,
                max_attempts = tracker.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "处理失败，等待重投递"
            );
            Settlement::Rewind { delay }
        }
        Disposition::DeadLetter {
            attempts,
            retry_delay,
        } => match dlq.quarantine_record(msg, &err, attempts).await {
            Ok(_) => {
                tracker.record_success(&msg.topic, msg.partition, msg.offset);
                Settlement::DeadLettered { attempts }
            }
            Err(dlq_err) => {
                error!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    attempts,
                    delay_ms = retry_delay.as_millis() as u64,
                    error = %err,
                    dlq_error = %dlq_err,
                    "写入死信队列失败，记录将被重投递"
                );
                Settlement::Rewind { delay: retry_delay }
            }
        },
    }
}
