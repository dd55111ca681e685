//! 订单受理路由
//!
//! `POST /api/orders` 只做结构校验，生成订单号后交给发布器，
//! 不等待 broker 确认即返回。

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    routing::{get, post},
};
use orderflow_shared::events::OrderCreatedEvent;
use orderflow_shared::observability::middleware as obs_middleware;
use serde::Deserialize;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::error::Result;
use crate::publisher::OrderEventPublisher;

/// 受理成功的固定应答
pub const ORDER_ACCEPTED: &str = "Order received and being processed.";

// ============================================================================
// 状态与 DTO
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<OrderEventPublisher>,
}

impl AppState {
    pub fn new(publisher: OrderEventPublisher) -> Self {
        Self {
            publisher: Arc::new(publisher),
        }
    }
}

/// 下单请求
///
/// 客户端可能附带 `eventId`、`orderId`、`timestamp`，这些字段一律忽略，
/// 由服务端重新生成。
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(
        length(min = 1, max = 128, message = "userId 长度必须在1-128个字符之间"),
        custom(function = "validate_not_blank")
    )]
    pub user_id: String,

    #[validate(custom(function = "validate_finite"))]
    pub total_amount: f64,
}

fn validate_not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("userId 不能为空白".into());
        return Err(err);
    }
    Ok(())
}

fn validate_finite(value: f64) -> std::result::Result<(), ValidationError> {
    if !value.is_finite() {
        let mut err = ValidationError::new("not_finite");
        err.message = Some("totalAmount 必须是有限数值".into());
        return Err(err);
    }
    Ok(())
}

// ============================================================================
// 路由
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/health", get(health))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

async fn create_order(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<&'static str> {
    let Json(request) = payload?;
    request.validate()?;

    let order_id = OrderCreatedEvent::generate_order_id();
    // 发布结果只进日志和指标
    let _handle = state
        .publisher
        .publish(&order_id, &request.user_id, request.total_amount);

    info!(
        order_id = %order_id,
        user_id = %request.user_id,
        total_amount = request.total_amount,
        "订单已受理"
    );

    Ok(ORDER_ACCEPTED)
}

async fn health() -> &'static str {
    "OK"
}
