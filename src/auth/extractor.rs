// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the caller's identity and request origin.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(actor): Auth, meta: RequestMeta) -> impl IntoResponse {
//!     // actor is the resolved Actor, meta carries ip / user agent
//! }
//! ```

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, header::USER_AGENT, request::Parts, HeaderMap},
};

use super::{Actor, AuthError, Role};
use crate::state::AppState;

/// Extractor for authenticated actors.
///
/// Reads `Authorization: Bearer <token>` and resolves it through the
/// configured identity provider. Inactive actors are still returned; the
/// access policy denies them per operation so the denial is logged.
pub struct Auth(pub Actor);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(actor) = parts.extensions.get::<Actor>().cloned() {
            return Ok(Auth(actor));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?
            .to_str()
            .map_err(|_| AuthError::MalformedCredentials)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedCredentials)?;

        let actor = state
            .identity
            .get_actor(token)?
            .ok_or(AuthError::UnknownToken)?;

        parts.extensions.insert(actor.clone());
        Ok(Auth(actor))
    }
}

/// Extractor that requires the auditor (or admin) role.
pub struct AuditorOnly(pub Actor);

impl FromRequestParts<AppState> for AuditorOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(actor) = Auth::from_request_parts(parts, state).await?;

        if !actor.is_active || !actor.role.can_read_audit() {
            tracing::warn!(actor_id = %actor.id, role = %actor.role, "Audit query refused");
            return Err(AuthError::Forbidden);
        }

        Ok(AuditorOnly(actor))
    }
}

/// Extractor for key administration. Admin role, active accounts only.
pub struct AdminOnly(pub Actor);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(actor) = Auth::from_request_parts(parts, state).await?;

        if !actor.is_active || actor.role != Role::Admin {
            tracing::warn!(actor_id = %actor.id, role = %actor.role, "Key administration refused");
            return Err(AuthError::Forbidden);
        }

        Ok(AdminOnly(actor))
    }
}

/// Origin of the request, recorded on audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        // First hop of X-Forwarded-For is the client
        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header("x-real-ip"))
            .map(str::to_string);

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self { ip, user_agent }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
