//! 分区键发布器
//!
//! 以订单号作为 Kafka 消息 key 发布 `OrderCreatedEvent`，同一订单的所有事件
//! 落在同一分区并保持顺序。`publish` 立即返回一个 join handle，
//! 重试、死信与日志都在后台任务中完成。
//!
//! 后台任务都登记在发布器上，关闭时用 [`OrderEventPublisher::drain`] 等待它们结束。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use orderflow_shared::dlq::DlqProducer;
use orderflow_shared::error::Result;
use orderflow_shared::events::{DeliveryReceipt, OrderCreatedEvent};
use orderflow_shared::observability::metrics as flow_metrics;
use orderflow_shared::retry::{RetryPolicy, retry_with_policy};
use orderflow_shared::topic::EventSink;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 一次发布的完成句柄，解析为 broker 分配的分区与 offset
pub type PublishHandle = JoinHandle<Result<DeliveryReceipt>>;

/// 在途发布任务计数
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 先登记等待再检查计数，避免漏掉两者之间的唤醒
            notified.as_mut().enable();
            if self.len() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 任务结束（包括被取消）时递减计数
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// 订单事件发布器
pub struct OrderEventPublisher {
    sink: Arc<dyn EventSink>,
    dlq: Arc<DlqProducer>,
    topic: String,
    retry_policy: RetryPolicy,
    in_flight: Arc<InFlight>,
}

impl OrderEventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, dlq: DlqProducer, topic: &str) -> Self {
        Self {
            sink,
            dlq: Arc::new(dlq),
            topic: topic.to_string(),
            retry_policy: RetryPolicy::default(),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 为订单生成新事件并异步发布
    ///
    /// 每次调用都会分配新的事件 ID；key 固定为 `order_id`。
    pub fn publish(&self, order_id: &str, user_id: &str, total_amount: f64) -> PublishHandle {
        self.publish_event(OrderCreatedEvent::new(order_id, user_id, total_amount))
    }

    /// 异步发布一个已构造的事件
    pub fn publish_event(&self, event: OrderCreatedEvent) -> PublishHandle {
        let sink = self.sink.clone();
        let dlq = self.dlq.clone();
        let topic = self.topic.clone();
        let policy = self.retry_policy.clone();
        let guard = self.in_flight.enter();

        tokio::spawn(async move {
            let _guard = guard;
            deliver(sink, dlq, topic, policy, event).await
        })
    }

    /// 尚未完成的发布任务数
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// 等待所有在途发布完成，最多等待 `deadline`
    ///
    /// 全部完成返回 `true`。超时后仍未完成的事件记为 `lost` 并返回 `false`，
    /// 进程退出时这些任务会被取消。
    pub async fn drain(&self, deadline: Duration) -> bool {
        let pending = self.in_flight();
        if pending == 0 {
            return true;
        }

        info!(pending, deadline_ms = deadline.as_millis() as u64, "等待在途订单事件发布完成");
        if tokio::time::timeout(deadline, self.in_flight.wait_idle())
            .await
            .is_ok()
        {
            info!("在途订单事件已全部发布");
            return true;
        }

        let remaining = self.in_flight();
        for _ in 0..remaining {
            flow_metrics::record_event_published(&self.topic, "lost");
        }
        warn!(
            remaining,
            topic = %self.topic,
            "关闭等待超时，未完成的订单事件将丢失"
        );
        false
    }
}

async fn deliver(
    sink: Arc<dyn EventSink>,
    dlq: Arc<DlqProducer>,
    topic: String,
    policy: RetryPolicy,
    event: OrderCreatedEvent,
) -> Result<DeliveryReceipt> {
    let payload = match event.to_json() {
        Ok(payload) => payload,
        Err(err) => {
            flow_metrics::record_event_published(&topic, "lost");
            error!(event_id = %event.event_id, order_id = %event.order_id, error = %err, "事件序列化失败");
            return Err(err);
        }
    };

    let attempts = AtomicU32::new(0);
    let result = {
        let sink = sink.as_ref();
        let topic = topic.as_str();
        let key = event.order_id.as_str();
        let payload = payload.as_slice();
        let attempts = &attempts;

        retry_with_policy(&policy, "publish order event", move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            sink.send(topic, key, payload)
        })
        .await
    };
    let attempts = attempts.load(Ordering::SeqCst);

    match result {
        Ok(receipt) => {
            let status = if attempts > 1 { "retried_ok" } else { "ok" };
            flow_metrics::record_event_published(&topic, status);
            info!(
                event_id = %event.event_id,
                order_id = %event.order_id,
                topic = %topic,
                partition = receipt.partition,
                offset = receipt.offset,
                attempts,
                "订单事件已发布"
            );
            Ok(receipt)
        }
        Err(err) => {
            error!(
                event_id = %event.event_id,
                order_id = %event.order_id,
                topic = %topic,
                attempts,
                error = %err,
                "订单事件发布失败，转入死信队列"
            );

            match dlq.quarantine_event(&event, &topic, &err, attempts).await {
                Ok(_) => flow_metrics::record_event_published(&topic, "dead_lettered"),
                Err(dlq_err) => {
                    flow_metrics::record_event_published(&topic, "lost");
                    error!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        error = %dlq_err,
                        "死信写入失败，事件丢失"
                    );
                }
            }

            Err(err)
        }
    }
}
