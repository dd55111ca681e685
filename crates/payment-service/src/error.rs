//! 支付服务错误类型
//!
//! 事件内容导致的错误在进入共享消费流程前被转换成不可重试的 `FlowError`。

use orderflow_shared::error::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("支付金额无效: 订单={order_id}, 金额={amount}")]
    InvalidAmount { order_id: String, amount: f64 },

    #[error(transparent)]
    Shared(#[from] FlowError),
}

impl From<PaymentError> for FlowError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidAmount { .. } => FlowError::Validation(err.to_string()),
            PaymentError::Shared(inner) => inner,
        }
    }
}
