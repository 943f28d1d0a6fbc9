// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    audit::{query::DEFAULT_PAGE_SIZE, AuditAction, AuditPage, AuditQuery, AuditTarget},
    auth::AuditorOnly,
    error::ApiError,
    models::AuditQueryParams,
    state::AppState,
};

fn build_query(target: AuditTarget, params: AuditQueryParams) -> Result<AuditQuery, ApiError> {
    let mut query = AuditQuery::new(target)
        .between(params.from, params.to)
        .page(
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );
    if let Some(raw) = params.action {
        let action: AuditAction = raw.parse().map_err(ApiError::bad_request)?;
        query = query.with_action(action);
    }
    Ok(query)
}

async fn list(
    state: &AppState,
    auditor: &str,
    target: AuditTarget,
    params: AuditQueryParams,
) -> Result<Json<AuditPage>, ApiError> {
    let query = build_query(target, params)?;
    tracing::info!(auditor_id = %auditor, target = ?query.target, page = query.page, "Audit log queried");
    Ok(Json(state.audit.list(query).await?))
}

#[utoipa::path(
    get,
    path = "/v1/audit/records/{record_id}",
    params(
        ("record_id" = String, Path, description = "Note identifier"),
        AuditQueryParams
    ),
    tag = "Audit",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Audit trail of one note", body = AuditPage),
        (status = 403, description = "Auditor role required")
    )
)]
pub async fn record_trail(
    State(state): State<AppState>,
    AuditorOnly(auditor): AuditorOnly,
    Path(record_id): Path<String>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditPage>, ApiError> {
    list(&state, &auditor.id, AuditTarget::record(record_id), params).await
}

#[utoipa::path(
    get,
    path = "/v1/audit/actors/{actor_id}",
    params(
        ("actor_id" = String, Path, description = "Actor identifier"),
        AuditQueryParams
    ),
    tag = "Audit",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Everything one actor did", body = AuditPage),
        (status = 403, description = "Auditor role required")
    )
)]
pub async fn actor_trail(
    State(state): State<AppState>,
    AuditorOnly(auditor): AuditorOnly,
    Path(actor_id): Path<String>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditPage>, ApiError> {
    list(&state, &auditor.id, AuditTarget::Actor(actor_id), params).await
}

#[utoipa::path(
    get,
    path = "/v1/audit/security",
    params(AuditQueryParams),
    tag = "Audit",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Denied access attempts", body = AuditPage),
        (status = 403, description = "Auditor role required")
    )
)]
pub async fn security_log(
    State(state): State<AppState>,
    AuditorOnly(auditor): AuditorOnly,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditPage>, ApiError> {
    list(&state, &auditor.id, AuditTarget::SecurityLog, params).await
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::state::test_state_for;
    use crate::testing::{ctx, doctor, fixture, stranger, NOTE, REASON};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn auditor_reads_masked_trail() {
        let fx = fixture();
        let id = fx
            .store
            .create(&ctx(doctor()), "appt-1", NOTE, REASON)
            .await
            .unwrap();
        fx.store
            .get(&ctx(doctor()), &id, "follow-up review")
            .await
            .unwrap();
        let app = router(test_state_for(&fx));

        let (status, body) = get(&app, &format!("/v1/audit/records/{id}"), "tok-auditor").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["entries"][0]["action"], "created");
        assert_eq!(body["entries"][1]["action"], "accessed");
        assert!(!body.to_string().contains(NOTE));

        let (status, body) = get(
            &app,
            &format!("/v1/audit/records/{id}?action=accessed"),
            "tok-admin",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn actor_and_security_views() {
        let fx = fixture();
        let id = fx
            .store
            .create(&ctx(doctor()), "appt-1", NOTE, REASON)
            .await
            .unwrap();
        assert!(fx
            .store
            .get(&ctx(stranger()), &id, "just browsing")
            .await
            .is_err());
        let app = router(test_state_for(&fx));

        let (status, body) = get(&app, "/v1/audit/actors/doctor-1", "tok-auditor").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = get(&app, "/v1/audit/security?page=1&page_size=10", "tok-auditor").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["entries"][0]["actor_id"], "user-9");
        assert_eq!(body["entries"][0]["detail"], "not_participant");
    }

    #[tokio::test]
    async fn non_auditors_are_refused() {
        let fx = fixture();
        let app = router(test_state_for(&fx));
        for token in ["tok-doctor", "tok-patient"] {
            let (status, _) = get(&app, "/v1/audit/security", token).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn invalid_query_is_bad_request() {
        let fx = fixture();
        let app = router(test_state_for(&fx));
        for uri in [
            "/v1/audit/security?page=0",
            "/v1/audit/security?page_size=501",
            "/v1/audit/security?action=deleted",
            "/v1/audit/security?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
        ] {
            let (status, _) = get(&app, uri, "tok-auditor").await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }
}
