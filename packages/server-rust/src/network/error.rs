//! HTTP error responses.
//!
//! Every failure leaves the server as a JSON body of the form
//! `{"error": "<code>", "message": "<detail>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tenantflow_core::ContextError;

use crate::messaging::{BrokerError, MessagingError};

/// Errors surfaced by the tenant layer and the API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The serving unit still carried a tenant from an earlier request.
    #[error("tenant context leaked into request: {0}")]
    TenantLeak(#[from] ContextError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TenantLeak(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Messaging(MessagingError::ReplyTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Messaging(MessagingError::Broker(BrokerError::Timeout { .. })) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Messaging(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable code for the JSON body.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TenantLeak(_) => "tenant_context_leak",
            Self::Messaging(MessagingError::ReplyTimeout { .. }) => "reply_timeout",
            Self::Messaging(_) => "messaging_error",
        }
    }
}

/// Body written for every [`ApiError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
