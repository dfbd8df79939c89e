use domain::DomainError;
use thiserror::Error;

use crate::store::StoreError;

/// 实时消息中心的错误分类
///
/// 除 `Store` 外，所有错误都在任何存储写入之前产生；
/// 它们只会以本地 error 帧的形式回复给发起连接，不会广播；`ConnectionClosed` 不回复。
#[derive(Debug, Error)]
pub enum HubError {
    #[error("authentication rejected")]
    AuthRejected,
    #[error("rate limit exceeded for {action}")]
    RateLimited { action: &'static str },
    #[error("malformed frame: {0}")]
    BadFrame(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not allowed: {0}")]
    AuthorizationDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store failure: {0}")]
    Store(StoreError),
    #[error("connection is closed")]
    ConnectionClosed,
}

impl HubError {
    pub fn validation(message: impl Into<String>) -> Self {
        HubError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HubError::AuthorizationDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HubError::NotFound(message.into())
    }

    /// error 帧中使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            HubError::AuthRejected => "UNAUTHORIZED",
            HubError::RateLimited { .. } => "RATE_LIMITED",
            HubError::BadFrame(_) => "BAD_FRAME",
            HubError::Validation(_) => "VALIDATION_FAILED",
            HubError::AuthorizationDenied(_) => "FORBIDDEN",
            HubError::NotFound(_) => "NOT_FOUND",
            HubError::Store(_) => "STORE_FAILURE",
            HubError::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }
}

impl From<DomainError> for HubError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::ValidationError { .. } => HubError::Validation(error.to_string()),
            DomainError::PermissionDenied { .. } | DomainError::BusinessRuleViolation { .. } => {
                HubError::AuthorizationDenied(error.to_string())
            }
            DomainError::ResourceNotFound { .. } => HubError::NotFound(error.to_string()),
        }
    }
}

impl From<StoreError> for HubError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => HubError::NotFound(what),
            StoreError::Rejected(rule) => HubError::from(rule),
            other => HubError::Store(other),
        }
    }
}
