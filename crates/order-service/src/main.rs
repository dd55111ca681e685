//! 订单受理服务入口
//!
//! HTTP 接收订单请求，把 `OrderCreatedEvent` 按订单号发布到 Kafka。

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use order_service::{AppState, OrderEventPublisher, SERVICE_NAME, router};
use orderflow_shared::config::AppConfig;
use orderflow_shared::dlq::DlqProducer;
use orderflow_shared::kafka::KafkaProducer;
use orderflow_shared::observability;
use orderflow_shared::shutdown::shutdown_signal;
use orderflow_shared::topic::EventSink;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard =
        observability::init(&config.observability.clone().with_service_name(SERVICE_NAME)).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        "Starting order-service..."
    );

    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let sink: Arc<dyn EventSink> = producer.clone();
    let dlq = DlqProducer::new(sink.clone(), &config.kafka.dlq_topic, SERVICE_NAME);
    let state = AppState::new(OrderEventPublisher::new(sink, dlq, &config.kafka.topic));
    let publisher = state.publisher.clone();

    // 通过 ORDERFLOW_CORS_ORIGINS 限定来源，未设置时放开
    let cors = match std::env::var("ORDERFLOW_CORS_ORIGINS") {
        Ok(origins) if origins != "*" => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state).layer(cors);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP 已停止受理，等待后台发布任务并把生产者队列刷到 broker
    let drain_deadline = Duration::from_millis(config.kafka.producer_drain_ms);
    if !publisher.drain(drain_deadline).await {
        warn!(in_flight = publisher.in_flight(), "部分订单事件未能在关闭前发布");
    }
    if let Err(e) = producer.flush(drain_deadline) {
        error!(
            error = %e,
            queued = producer.in_flight_count(),
            "关闭时刷新生产者队列失败"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}
