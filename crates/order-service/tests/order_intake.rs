//! 订单受理接口测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动路由，broker 由内存 topic 替代。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use order_service::{AppState, ORDER_ACCEPTED, OrderEventPublisher, router};
use orderflow_shared::dlq::DlqProducer;
use orderflow_shared::error::Result;
use orderflow_shared::events::{DeliveryReceipt, OrderCreatedEvent};
use orderflow_shared::kafka::topics;
use orderflow_shared::observability::middleware::REQUEST_ID_HEADER;
use orderflow_shared::partition::partition_for;
use orderflow_shared::topic::{EventSink, MemoryTopic};
use tower::ServiceExt;

// ==================== 辅助函数 ====================

/// 永远等不到 broker 确认的 sink
struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    async fn send(&self, _topic: &str, _key: &str, _payload: &[u8]) -> Result<DeliveryReceipt> {
        std::future::pending::<()>().await;
        Ok(DeliveryReceipt { partition: 0, offset: 0 })
    }
}

fn app_over(sink: Arc<dyn EventSink>) -> Router {
    let dlq = DlqProducer::new(sink.clone(), topics::DEAD_LETTER_QUEUE, "order-service");
    router(AppState::new(OrderEventPublisher::new(sink, dlq, topics::ORDERS)))
}

fn post_order(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/orders")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// 等待后台发布任务把记录写入 topic
async fn wait_for_records(topic: &MemoryTopic, expected: usize) {
    for _ in 0..200 {
        if topic.len(topics::ORDERS) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} records in topic");
}

// ==================== 测试用例 ====================

#[tokio::test]
async fn accepted_order_is_published_keyed_by_order_id() {
    let topic = Arc::new(MemoryTopic::new(6));
    let app = app_over(topic.clone());

    let response = app
        .oneshot(post_order(r#"{"userId":"user-1","totalAmount":99.9}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, ORDER_ACCEPTED);

    wait_for_records(&topic, 1).await;
    let records = topic.all_records(topics::ORDERS);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    let event: OrderCreatedEvent = serde_json::from_slice(&record.payload).unwrap();
    assert!(event.order_id.starts_with("ORD-"));
    assert_eq!(event.order_id.len(), 12);
    assert_eq!(event.user_id, "user-1");
    assert_eq!(event.total_amount, 99.9);
    assert!(!event.event_id.is_empty());
    assert_eq!(record.key, event.order_id);
    assert_eq!(record.partition, partition_for(event.order_id.as_bytes(), 6));
}

#[tokio::test]
async fn client_supplied_ids_are_replaced() {
    let topic = Arc::new(MemoryTopic::new(3));
    let app = app_over(topic.clone());

    let response = app
        .oneshot(post_order(
            r#"{"eventId":"evt-client","orderId":"ORD-CLIENT","userId":"u","totalAmount":1.5,"timestamp":1}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    wait_for_records(&topic, 1).await;
    let records = topic.all_records(topics::ORDERS);
    let event: OrderCreatedEvent = serde_json::from_slice(&records[0].payload).unwrap();
    assert_ne!(event.event_id, "evt-client");
    assert_ne!(event.order_id, "ORD-CLIENT");
    assert_ne!(event.timestamp, 1);
}

#[tokio::test]
async fn acknowledgement_does_not_wait_for_broker() {
    let app = app_over(Arc::new(StalledSink));

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        app.oneshot(post_order(r#"{"userId":"user-2","totalAmount":10}"#)),
    )
    .await
    .expect("intake must answer without broker confirmation")
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, ORDER_ACCEPTED);
}

#[tokio::test]
async fn missing_user_id_is_bad_request() {
    let topic = Arc::new(MemoryTopic::new(3));
    let app = app_over(topic.clone());

    let response = app
        .oneshot(post_order(r#"{"totalAmount":10}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "INVALID_BODY");
    assert!(topic.is_empty(topics::ORDERS));
}

#[tokio::test]
async fn blank_user_id_is_bad_request() {
    let topic = Arc::new(MemoryTopic::new(3));
    let app = app_over(topic.clone());

    let response = app
        .oneshot(post_order(r#"{"userId":"  ","totalAmount":10}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(topic.is_empty(topics::ORDERS));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = app_over(Arc::new(MemoryTopic::new(3)));

    let response = app.oneshot(post_order("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_returns_ok_with_request_id() {
    let app = app_over(Arc::new(MemoryTopic::new(1)));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(body_text(response).await, "OK");
}
