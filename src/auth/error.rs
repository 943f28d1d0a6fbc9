// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rejections produced while resolving the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Bearer token required")]
    MissingCredentials,

    #[error("Authorization header must be 'Bearer <token>'")]
    MalformedCredentials,

    #[error("Token is not recognized")]
    UnknownToken,

    /// The identity provider itself failed. The detail is logged, never returned.
    #[error("identity provider failure: {0}")]
    Provider(String),

    #[error("Role does not permit this operation")]
    Forbidden,
}

#[derive(Serialize)]
struct Rejection {
    error: String,
    code: &'static str,
}

impl AuthError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedCredentials => "malformed_credentials",
            AuthError::UnknownToken => "unknown_token",
            AuthError::Provider(_) => "identity_unavailable",
            AuthError::Forbidden => "forbidden",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Provider(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Rejection {
            code: self.code(),
            error: match &self {
                AuthError::Provider(detail) => {
                    tracing::error!(error = %detail, "Identity lookup failed");
                    "Identity service unavailable".to_string()
                }
                other => other.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
