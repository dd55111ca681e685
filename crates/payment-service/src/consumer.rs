//! 支付消费者
//!
//! 把 Kafka 消费循环与共享的幂等消费者连接起来：
//! 处理成功提交 offset，失败交给重投递与死信策略。

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
use crate::error::PaymentError;
use crate::model::{Payment, derive_payment};

pub type PaymentConsumer = IdempotentConsumer<OrderCreatedEvent, Payment>;

/// 在给定的效果存储上构造支付幂等消费者
pub fn build_consumer(store: Arc<dyn EffectStore<Payment>>, config: &ConsumerConfig) -> PaymentConsumer {
    IdempotentConsumer::new(SERVICE_NAME, store, derive_payment, config.handler_timeout())
}

/// 支付消费工作者
pub struct PaymentWorker {
    kafka: KafkaConsumer,
    consumer: Arc<PaymentConsumer>,
    tracker: DeliveryTracker,
    dlq: DlqProducer,
    topic: String,
}

impl PaymentWorker {
    pub fn new(config: &AppConfig, db: &Database) -> Result<Self, PaymentError> {
        let kafka = KafkaConsumer::new(&config.kafka, None)?;

        // 账本分区名与服务名一致
        let store: Arc<dyn EffectStore<Payment>> =
            Arc::new(PgEffectStore::<Payment>::new(db.pool().clone(), SERVICE_NAME));
        let consumer = Arc::new(build_consumer(store, &config.consumer));

        let dlq_sink = Arc::new(KafkaProducer::new(&config.kafka)?);
        let dlq = DlqProducer::new(dlq_sink, &config.kafka.dlq_topic, SERVICE_NAME);

        Ok(Self {
            kafka,
            consumer,
            tracker: DeliveryTracker::from_config(&config.consumer),
            dlq,
            topic: config.kafka.topic.clone(),
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), PaymentError> {
        self.kafka.subscribe(&[self.topic.as_str()])?;

        info!(
            topic = %self.topic,
            group_id = %self.kafka.group_id(),
            max_attempts = self.tracker.max_attempts(),
            "支付消费者已启动"
        );

        let consumer = self.consumer;
        self.kafka
            .start(shutdown, self.tracker, self.dlq, |msg| {
                let consumer = consumer.clone();
                async move { consumer.handle_message(&msg).await.map(|_| ()) }
            })
            .await?;

        info!("支付消费者已停止");
        Ok(())
    }
}
