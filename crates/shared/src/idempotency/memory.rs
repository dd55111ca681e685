//! 进程内效果存储
//!
//! 与 PostgreSQL 实现遵循同一契约：账本是一个集合，效果记录与账本条目在
//! 同一把锁内一起写入。用于测试和本地运行，进程退出后状态丢失。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EffectStore, InsertOutcome};
use crate::error::{FlowError, Result};

struct MemoryState<R> {
    ledger: HashSet<String>,
    records: Vec<R>,
}

/// 内存版效果存储
///
/// 可注入写入失败：失败发生在效果记录暂存之后、提交之前，
/// 用于验证失败时不会留下半条状态。
pub struct MemoryEffectStore<R> {
    state: Mutex<MemoryState<R>>,
    pending_failures: AtomicU32,
}

impl<R: Clone> MemoryEffectStore<R> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                ledger: HashSet::new(),
                records: Vec::new(),
            }),
            pending_failures: AtomicU32::new(0),
        }
    }

    /// 让接下来的 n 次 `apply` 失败
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    pub fn ledger_size(&self) -> usize {
        self.state.lock().ledger.len()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn records(&self) -> Vec<R> {
        self.state.lock().records.clone()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.state.lock().ledger.contains(event_id)
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<R: Clone> Default for MemoryEffectStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> EffectStore<R> for MemoryEffectStore<R>
where
    R: Clone + Send + Sync,
{
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.contains(event_id))
    }

    async fn apply(&self, event_id: &str, record: &R) -> Result<InsertOutcome> {
        let mut state = self.state.lock();

        if state.ledger.contains(event_id) {
            return Ok(InsertOutcome::AlreadyProcessed);
        }

        // 先暂存，确认账本可写后再一起提交
        let staged = record.clone();
        if self.take_failure() {
            return Err(FlowError::StoreUnavailable("注入的写入失败".to_string()));
        }

        state.records.push(staged);
        state.ledger.insert(event_id.to_string());
        Ok(InsertOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_once_then_conflict() {
        let store = MemoryEffectStore::new();

        assert_eq!(store.apply("evt-1", &"a").await.unwrap(), InsertOutcome::Created);
        assert_eq!(
            store.apply("evt-1", &"b").await.unwrap(),
            InsertOutcome::AlreadyProcessed
        );

        assert_eq!(store.records(), vec!["a"]);
        assert!(store.is_processed("evt-1").await.unwrap());
        assert!(!store.is_processed("evt-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_leaves_no_partial_state() {
        let store = MemoryEffectStore::new();
        store.fail_next(1);

        assert!(store.apply("evt-1", &1_u32).await.is_err());
        assert_eq!(store.ledger_size(), 0);
        assert_eq!(store.record_count(), 0);

        assert_eq!(store.apply("evt-1", &1_u32).await.unwrap(), InsertOutcome::Created);
        assert_eq!(store.ledger_size(), 1);
        assert_eq!(store.record_count(), 1);
    }
}
