//! 通知消费者测试
//!
//! 用 mockall 模拟效果存储，验证消费者如何对待存储返回的各种结果；
//! 带 `#[ignore]` 的用例需要 PostgreSQL。

use std::sync::Arc;

use async_trait::async_trait;
use mockall::{Sequence, mock};
use notification_worker::{Notification, build_consumer};
use orderflow_shared::config::ConsumerConfig;
use orderflow_shared::database::Database;
use orderflow_shared::error::{FlowError, Result};
use orderflow_shared::events::OrderCreatedEvent;
use orderflow_shared::idempotency::{
    EffectStore, InsertOutcome, MemoryEffectStore, PgEffectStore, ProcessingOutcome,
};
use orderflow_shared::test_utils::{
    order_message, sample_order_event, test_consumer_name, test_database_config,
};

mock! {
    Store {}

    #[async_trait]
    impl EffectStore<Notification> for Store {
        async fn is_processed(&self, event_id: &str) -> Result<bool>;
        async fn apply(&self, event_id: &str, record: &Notification) -> Result<InsertOutcome>;
    }
}

// ==================== 存储结果的处理 ====================

#[tokio::test]
async fn ledger_hit_skips_without_writing() {
    let mut store = MockStore::new();
    store.expect_is_processed().times(1).returning(|_| Ok(true));
    store.expect_apply().never();

    let consumer = build_consumer(Arc::new(store), &ConsumerConfig::default());
    let outcome = consumer.handle(&sample_order_event()).await.unwrap();

    assert_eq!(outcome, ProcessingOutcome::Skipped);
}

#[tokio::test]
async fn lost_race_is_swallowed() {
    let mut store = MockStore::new();
    store.expect_is_processed().returning(|_| Ok(false));
    store
        .expect_apply()
        .times(1)
        .returning(|_, _| Ok(InsertOutcome::AlreadyProcessed));

    let consumer = build_consumer(Arc::new(store), &ConsumerConfig::default());
    let outcome = consumer.handle(&sample_order_event()).await.unwrap();

    assert_eq!(outcome, ProcessingOutcome::ConflictSwallowed);
}

#[tokio::test]
async fn apply_receives_record_for_the_event_order() {
    let event = sample_order_event();
    let expected_event_id = event.event_id.clone();
    let expected_order = event.order_id.clone();

    let mut store = MockStore::new();
    store.expect_is_processed().returning(|_| Ok(false));
    store
        .expect_apply()
        .withf(move |event_id, record| {
            event_id.to_string() == expected_event_id && record.order_id == expected_order
        })
        .times(1)
        .returning(|_, _| Ok(InsertOutcome::Created));

    let consumer = build_consumer(Arc::new(store), &ConsumerConfig::default());

    assert_eq!(
        consumer.handle(&event).await.unwrap(),
        ProcessingOutcome::Committed
    );
}

#[tokio::test]
async fn store_failure_propagates_then_redelivery_commits() {
    let mut seq = Sequence::new();
    let mut store = MockStore::new();
    store.expect_is_processed().returning(|_| Ok(false));
    store
        .expect_apply()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(FlowError::StoreUnavailable("connection reset".into())));
    store
        .expect_apply()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(InsertOutcome::Created));

    let consumer = build_consumer(Arc::new(store), &ConsumerConfig::default());
    let event = sample_order_event();

    let err = consumer.handle(&event).await.unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(
        consumer.handle(&event).await.unwrap(),
        ProcessingOutcome::Committed
    );
}

#[tokio::test]
async fn blank_order_id_is_poison() {
    let store: Arc<MemoryEffectStore<Notification>> = Arc::new(MemoryEffectStore::new());
    let consumer = build_consumer(store.clone(), &ConsumerConfig::default());
    let event = OrderCreatedEvent::new("", "u", 1.0);

    let err = consumer.handle(&event).await.unwrap_err();

    assert!(matches!(err, FlowError::Validation(_)));
    assert!(!err.is_retryable());
    assert_eq!(store.ledger_size(), 0);
}

#[tokio::test]
async fn repeated_messages_notify_once() {
    let store: Arc<MemoryEffectStore<Notification>> = Arc::new(MemoryEffectStore::new());
    let consumer = build_consumer(store.clone(), &ConsumerConfig::default());
    let event = sample_order_event();

    let mut outcomes = Vec::new();
    for offset in 0..4 {
        outcomes.push(
            consumer
                .handle_message(&order_message(&event, 1, offset))
                .await
                .unwrap(),
        );
    }

    assert_eq!(outcomes[0], ProcessingOutcome::Committed);
    assert!(outcomes[1..].iter().all(|o| *o == ProcessingOutcome::Skipped));
    assert_eq!(store.record_count(), 1);
}

// ==================== PostgreSQL ====================

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn pg_ledgers_are_independent_per_consumer() {
    let db = Database::connect(&test_database_config()).await.unwrap();
    let first = Arc::new(PgEffectStore::<Notification>::new(
        db.pool().clone(),
        &test_consumer_name("notify-a"),
    ));
    let second = Arc::new(PgEffectStore::<Notification>::new(
        db.pool().clone(),
        &test_consumer_name("notify-b"),
    ));
    let event = sample_order_event();

    let a = build_consumer(first.clone(), &ConsumerConfig::default());
    let b = build_consumer(second.clone(), &ConsumerConfig::default());

    assert_eq!(a.handle(&event).await.unwrap(), ProcessingOutcome::Committed);
    // 另一个消费方的账本不会让本方跳过
    assert_eq!(b.handle(&event).await.unwrap(), ProcessingOutcome::Committed);
    assert_eq!(a.handle(&event).await.unwrap(), ProcessingOutcome::Skipped);

    let rows = Notification::find_by_order(db.pool(), &event.order_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(first.ledger_size().await.unwrap(), 1);
    assert_eq!(second.ledger_size().await.unwrap(), 1);
}
