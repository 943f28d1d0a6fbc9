// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::audit::AuditError;
use crate::store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::bad_request(msg),
            StoreError::NotFound(what) => Self::not_found(format!("Not found: {what}")),
            StoreError::AccessDenied(reason) => Self::forbidden(format!("Access denied: {reason}")),
            StoreError::Conflict(_) => {
                Self::conflict("The record was modified concurrently; reload and retry")
            }
            StoreError::Cancelled => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "The request deadline was exceeded",
            ),
            StoreError::Persistence { detail, .. } => {
                tracing::error!(error = %detail, "Persistence failure");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Storage temporarily unavailable")
            }
            StoreError::Integrity(record_id) => {
                tracing::error!(record_id = %record_id, "Returning integrity failure to caller");
                Self::internal("The record failed its integrity check")
            }
            StoreError::KeyNotFound(key_id) => {
                tracing::error!(key_id = %key_id, "Encryption key unavailable");
                Self::internal("The record cannot be decrypted")
            }
            StoreError::AuditWriteFailed { detail, retryable: true } => {
                tracing::error!(error = %detail, "Audit write failed");
                Self::internal("The read could not be audited; retry or contact support")
            }
            StoreError::AuditWriteFailed { detail, retryable: false } => {
                tracing::error!(error = %detail, "Change persisted without audit entry");
                Self::internal("The change was saved but could not be audited; do not resubmit, contact support")
            }
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Invalid(msg) => Self::bad_request(msg),
            other => {
                tracing::error!(error = %other, "Audit query failed");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Audit log temporarily unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
