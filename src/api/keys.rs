// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only key ring endpoints.
//!
//! Rotation installs a key in the running key ring only. Operators must also
//! add it to `NOTE_KEYS` (and `NOTE_ACTIVE_KEY`) before the next restart.
//! Both rotation and revocation are written to the audit trail as admin
//! actions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::notes::{detached, request_context};
use crate::{
    auth::{AdminOnly, RequestMeta},
    crypto::KeyStatus,
    error::ApiError,
    state::AppState,
    store::StoreError,
};

/// A key ring entry with the number of notes it still protects.
#[derive(Debug, Serialize, ToSchema)]
pub struct KeyUsage {
    pub key_id: String,
    pub status: KeyStatus,
    pub installed_at: chrono::DateTime<chrono::Utc>,
    pub records: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RotateKeyRequest {
    pub key_id: String,
    /// Base64 encoded 32-byte root key.
    pub material: String,
}

fn key_error(key_id: &str, err: StoreError) -> ApiError {
    match err {
        StoreError::KeyNotFound(_) => ApiError::not_found(format!("Unknown key: {key_id}")),
        other => other.into(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/keys",
    tag = "Keys",
    security(("bearer" = [])),
    responses(
        (status = 200, body = [KeyUsage]),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn list_keys(
    State(state): State<AppState>,
    AdminOnly(_admin): AdminOnly,
) -> Result<Json<Vec<KeyUsage>>, ApiError> {
    let mut keys = Vec::new();
    for info in state.store.describe_keys()? {
        let records = state.store.key_usage(&info.key_id).await?;
        keys.push(KeyUsage {
            key_id: info.key_id,
            status: info.status,
            installed_at: info.installed_at,
            records,
        });
    }
    Ok(Json(keys))
}

#[utoipa::path(
    post,
    path = "/v1/admin/keys",
    request_body = RotateKeyRequest,
    tag = "Keys",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Key installed as the active key"),
        (status = 400, description = "Malformed material or duplicate key id"),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn rotate_key(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    meta: RequestMeta,
    Json(request): Json<RotateKeyRequest>,
) -> Result<StatusCode, ApiError> {
    let material = Base64::decode_vec(request.material.trim())
        .map_err(|_| ApiError::bad_request("material must be base64"))?;
    let ctx = request_context(&state, admin, meta);
    let store = state.store.clone();
    detached(&state.tasks, async move {
        store.rotate_key(&ctx, &request.key_id, &material).await
    })
    .await?;

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    post,
    path = "/v1/admin/keys/{key_id}/revoke",
    params(("key_id" = String, Path, description = "Key identifier")),
    tag = "Keys",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 400, description = "The active key cannot be revoked"),
        (status = 404, description = "Unknown key"),
        (status = 409, description = "Notes are still sealed under the key")
    )
)]
pub async fn revoke_key(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    meta: RequestMeta,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ctx = request_context(&state, admin, meta);
    let store = state.store.clone();
    detached(&state.tasks, async move {
        store
            .revoke_key(&ctx, &key_id)
            .await
            .map_err(|e| key_error(&key_id, e))
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::audit::ResourceType;
    use crate::crypto::ROOT_KEY_LEN;
    use crate::storage::AuditStore;
    use crate::state::test_state_for;
    use crate::testing::{ctx, doctor, fixture, NOTE, REASON};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use base64ct::{Base64, Encoding};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn rotate_then_revoke_once_unused() {
        let fx = fixture();
        let id = fx
            .store
            .create(&ctx(doctor()), "appt-1", NOTE, REASON)
            .await
            .unwrap();
        let app = router(test_state_for(&fx));

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/admin/keys",
            "tok-admin",
            Some(json!({ "key_id": "k2", "material": Base64::encode_string(&[9u8; ROOT_KEY_LEN]) })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, keys) = call(&app, Method::GET, "/v1/admin/keys", "tok-admin", None).await;
        assert_eq!(status, StatusCode::OK);
        let k1 = keys.as_array().unwrap().iter().find(|k| k["key_id"] == "k1").unwrap();
        assert_eq!(k1["records"], 1);
        assert!(!k1.to_string().contains("material"));

        let (status, _) = call(&app, Method::POST, "/v1/admin/keys/k1/revoke", "tok-admin", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Updating re-seals the note under the new active key.
        fx.store
            .update(&ctx(doctor()), &id, "Re-sealed.", "key rotation sweep")
            .await
            .unwrap();

        let (status, _) = call(&app, Method::POST, "/v1/admin/keys/k1/revoke", "tok-admin", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::POST, "/v1/admin/keys/k2/revoke", "tok-admin", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::POST, "/v1/admin/keys/k9/revoke", "tok-admin", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let details: Vec<_> = fx
            .backend
            .entries_for_actor("admin-1")
            .unwrap()
            .into_iter()
            .filter(|e| e.resource_type == ResourceType::AdminAction)
            .map(|e| (e.resource_id, e.detail.unwrap_or_default()))
            .collect();
        assert_eq!(
            details,
            vec![
                ("k2".to_string(), "key_rotated".to_string()),
                ("k1".to_string(), "key_revoked".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn bad_material_and_non_admins_are_refused() {
        let fx = fixture();
        let app = router(test_state_for(&fx));

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/admin/keys",
            "tok-admin",
            Some(json!({ "key_id": "k2", "material": "%%%" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/admin/keys",
            "tok-admin",
            Some(json!({ "key_id": "k1", "material": Base64::encode_string(&[3u8; ROOT_KEY_LEN]) })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // No notes exist, but the active key still cannot be revoked.
        let (status, _) = call(&app, Method::POST, "/v1/admin/keys/k1/revoke", "tok-admin", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for token in ["tok-auditor", "tok-doctor"] {
            let (status, _) = call(&app, Method::GET, "/v1/admin/keys", token, None).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }
}
