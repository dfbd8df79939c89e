use application::{HubError, RateLimitError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// HTTP 层错误
///
/// 握手阶段的拒绝只返回状态码，不带响应体，不向对端泄露原因。
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Option<ErrorBody>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn bare(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    pub fn unauthorized() -> Self {
        Self::bare(StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::bare(StatusCode::FORBIDDEN)
    }

    pub fn too_many_requests() -> Self {
        Self::bare(StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn service_unavailable() -> Self {
        Self::bare(StatusCode::SERVICE_UNAVAILABLE)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        match error {
            HubError::AuthRejected => ApiError::unauthorized(),
            HubError::RateLimited { .. } => ApiError::too_many_requests(),
            HubError::Store(_) => ApiError::service_unavailable(),
            HubError::AuthorizationDenied(_) => ApiError::forbidden(),
            other => ApiError::new(StatusCode::BAD_REQUEST, other.code(), other.to_string()),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(_: RateLimitError) -> Self {
        ApiError::too_many_requests()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}
