//! PostgreSQL 效果存储
//!
//! 账本表 `processed_events` 以 `(consumer, event_id)` 为主键。
//! 写入流程：开启事务 → 插入效果记录 → 插入账本条目（ON CONFLICT DO NOTHING）→ 提交。
//! 在 read committed 下，并发的同键插入会阻塞到对方提交，随后影响 0 行，
//! 由此判定输给了另一次投递。

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use super::{EffectStore, InsertOutcome};
use crate::error::Result;

/// 账本主键约束名，用于识别 23505 是否来自账本
const LEDGER_PKEY: &str = "processed_events_pkey";

/// 可以写入 PostgreSQL 的效果记录
///
/// `insert` 在调用方的事务连接上执行，必须恰好插入一行或返回错误。
#[async_trait]
pub trait PgRecord: Send + Sync {
    async fn insert(&self, conn: &mut PgConnection) -> Result<()>;
}

/// PostgreSQL 版效果存储
pub struct PgEffectStore<R> {
    pool: PgPool,
    consumer: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> PgEffectStore<R> {
    /// `consumer` 是账本分区名，每个服务使用自己的名字
    pub fn new(pool: PgPool, consumer: &str) -> Self {
        Self {
            pool,
            consumer: consumer.to_string(),
            _record: PhantomData,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// 本服务账本中的条目数
    pub async fn ledger_size(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM processed_events WHERE consumer = $1")
                .bind(&self.consumer)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// 唯一约束冲突（23505）且发生在账本主键上
fn is_ledger_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(LEDGER_PKEY)
        }
        _ => false,
    }
}

#[async_trait]
impl<R: PgRecord> EffectStore<R> for PgEffectStore<R> {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE consumer = $1 AND event_id = $2)",
        )
        .bind(&self.consumer)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, record), fields(consumer = %self.consumer))]
    async fn apply(&self, event_id: &str, record: &R) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        // 出错时 tx 被丢弃，sqlx 自动回滚
        record.insert(&mut *tx).await?;

        let ledger = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, event_id)
            VALUES ($1, $2)
            ON CONFLICT (consumer, event_id) DO NOTHING
            "#,
        )
        .bind(&self.consumer)
        .bind(event_id)
        .execute(&mut *tx)
        .await;

        match ledger {
            Ok(done) if done.rows_affected() == 1 => {
                tx.commit().await?;
                Ok(InsertOutcome::Created)
            }
            Ok(_) => {
                debug!(event_id, "账本已有该事件，回滚效果记录");
                tx.rollback().await?;
                Ok(InsertOutcome::AlreadyProcessed)
            }
            Err(err) if is_ledger_conflict(&err) => {
                debug!(event_id, "账本主键冲突，回滚效果记录");
                tx.rollback().await?;
                Ok(InsertOutcome::AlreadyProcessed)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_error_is_not_conflict() {
        assert!(!is_ledger_conflict(&sqlx::Error::PoolTimedOut));
        assert!(!is_ledger_conflict(&sqlx::Error::RowNotFound));
    }
}
