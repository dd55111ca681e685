//! 统一错误处理模块
//!
//! 定义订单事件管道中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 重复事件不是错误：它们以 `ProcessingOutcome` 的形式在消费者内部被消化，
//! 永远不会以 `FlowError` 的形式出现。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum FlowError {
    // ==================== 存储错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 事件错误 ====================
    #[error("事件反序列化失败: {0}")]
    Serialization(String),

    #[error("无效的事件 ID: {0}")]
    InvalidEventId(String),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 超时 ====================
    #[error("处理超时: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidEventId(_) => "INVALID_EVENT_ID",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 可重试的错误通过 broker 重投递恢复；不可重试的错误（毒事件）
    /// 重投多少次结果都一样，应直接进入死信队列。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::StoreUnavailable(_) | Self::Kafka(_) | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
