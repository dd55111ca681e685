//! 通知消费者
//!
//! 从 Kafka 消费订单事件，经幂等消费者写入通知记录。
//! offset 只在处理成功或死信写入成功后提交。

use std::sync::Arc;

use orderflow_shared::config::{AppConfig, ConsumerConfig};
use orderflow_shared::database::Database;
use orderflow_shared::dlq::DlqProducer;
use orderflow_shared::events::OrderCreatedEvent;
use orderflow_shared::idempotency::{EffectStore, IdempotentConsumer, PgEffectStore};
use orderflow_shared::kafka::{KafkaConsumer, KafkaProducer};
use orderflow_shared::redelivery::DeliveryTracker;
use tokio::sync::watch;
use tracing::info;

use crate::SERVICE_NAME;
use crate::error::NotificationError;
use crate::model::{Notification, derive_notification};

pub type NotificationConsumer = IdempotentConsumer<OrderCreatedEvent, Notification>;

pub fn build_consumer(
    store: Arc<dyn EffectStore<Notification>>,
    config: &ConsumerConfig,
) -> NotificationConsumer {
    IdempotentConsumer::new(SERVICE_NAME, store, derive_notification, config.handler_timeout())
}

/// 通知消费工作者
pub struct NotificationWorker {
    kafka: KafkaConsumer,
    consumer: Arc<NotificationConsumer>,
    tracker: DeliveryTracker,
    dlq: DlqProducer,
    topic: String,
}

impl NotificationWorker {
    pub fn new(config: &AppConfig, db: &Database) -> Result<Self, NotificationError> {
        let store = Arc::new(PgEffectStore::<Notification>::new(
            db.pool().clone(),
            SERVICE_NAME,
        ));

        Ok(Self {
            kafka: KafkaConsumer::new(&config.kafka, None)?,
            consumer: Arc::new(build_consumer(store, &config.consumer)),
            tracker: DeliveryTracker::from_config(&config.consumer),
            dlq: DlqProducer::new(
                Arc::new(KafkaProducer::new(&config.kafka)?),
                &config.kafka.dlq_topic,
                SERVICE_NAME,
            ),
            topic: config.kafka.topic.clone(),
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.kafka.subscribe(&[self.topic.as_str()])?;

        info!(
            topic = %self.topic,
            group_id = %self.kafka.group_id(),
            "通知消费者已启动"
        );

        let consumer = self.consumer;
        self.kafka
            .start(shutdown, self.tracker, self.dlq, |msg| {
                let consumer = consumer.clone();
                async move {
                    consumer.handle_message(&msg).await?;
                    Ok(())
                }
            })
            .await?;

        info!("通知消费者已停止");
        Ok(())
    }
}
