//! 通知服务错误类型
//!
//! 定义通知记录推导与消费循环中的错误分类，
//! 事件内容导致的错误统一转换为不可重试的 `FlowError`。

use orderflow_shared::error::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知缺少订单号: 事件={event_id}")]
    MissingOrderId { event_id: String },

    #[error(transparent)]
    Shared(#[from] FlowError),
}

impl From<NotificationError> for FlowError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::MissingOrderId { .. } => FlowError::Validation(err.to_string()),
            NotificationError::Shared(inner) => inner,
        }
    }
}
