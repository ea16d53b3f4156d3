//! 事件层统一错误定义
//!
//! 仅覆盖订阅配置、投递模式与序列化等同步可见的错误；
//! 传输层错误（`EventReceiver::send_event`）只记录日志，不在此处建模。
//!
use thiserror::Error;

use crate::config::DeliveryMode;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DispatchError {
    // --- 订阅配置 ---
    #[error("invalid filter: filter={filter}, reason={reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("subscribing events requires an event receiver: client={client_id}")]
    MissingReceiver { client_id: String },
    #[error("client already registered by another user: client={client_id}, user={user_id}")]
    ClientUserMismatch { client_id: String, user_id: String },

    // --- 投递模式 ---
    #[error("invalid operation for delivery mode: operation={operation}, mode={mode:?}")]
    InvalidMode {
        operation: &'static str,
        mode: DeliveryMode,
    },
    #[error("event dispatcher already started")]
    AlreadyStarted,
    #[error("dispatch channel error: {reason}")]
    Channel { reason: String },

    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

impl DispatchError {
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        DispatchError::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;
