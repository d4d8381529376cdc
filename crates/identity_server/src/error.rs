//! HTTP error mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use identity_core::ReconcileError;
use serde_json::json;
use thiserror::Error;

pub const MISSING_IDENTITY_MESSAGE: &str = "At least one of email or phoneNumber is required.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Payload(#[from] JsonRejection),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Payload(rejection) => rejection.status(),
            Self::Reconcile(err) => StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Payload(rejection) => rejection.body_text(),
            Self::Reconcile(ReconcileError::InvalidAssertion(_)) => {
                MISSING_IDENTITY_MESSAGE.to_string()
            }
            Self::Reconcile(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
