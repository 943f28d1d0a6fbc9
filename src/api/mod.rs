// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    audit::{AuditAction, AuditEntry, AuditPage, MaskedValue, ResourceType},
    crypto::KeyStatus,
    models::{
        ArchiveNoteRequest, ArchiveNoteResponse, CreateNoteRequest, CreateNoteResponse,
        NoteListResponse, NoteResponse, UpdateNoteRequest,
    },
    state::AppState,
};

pub mod audit;
pub mod health;
pub mod keys;
pub mod notes;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/notes", post(notes::create_note))
        .route(
            "/notes/{record_id}",
            get(notes::get_note).put(notes::update_note),
        )
        .route("/notes/{record_id}/archive", post(notes::archive_note))
        .route(
            "/contexts/{context_ref}/notes",
            get(notes::list_context_notes),
        )
        .route(
            "/subjects/{subject_id}/notes",
            get(notes::list_subject_notes),
        )
        .route("/audit/records/{record_id}", get(audit::record_trail))
        .route("/audit/actors/{actor_id}", get(audit::actor_trail))
        .route("/audit/security", get(audit::security_log))
        .route("/admin/keys", get(keys::list_keys).post(keys::rotate_key))
        .route("/admin/keys/{key_id}/revoke", post(keys::revoke_key));

    let app = Router::new()
        .nest("/v1", v1_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .with_state(state);

    // Outermost first: the id is assigned before tracing and echoed on the way out.
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id());

    app.merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(middleware)
        .layer(CorsLayer::permissive())
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        notes::create_note,
        notes::get_note,
        notes::update_note,
        notes::archive_note,
        notes::list_context_notes,
        notes::list_subject_notes,
        audit::record_trail,
        audit::actor_trail,
        audit::security_log,
        keys::list_keys,
        keys::rotate_key,
        keys::revoke_key,
        health::health,
        health::liveness
    ),
    components(
        schemas(
            CreateNoteRequest,
            CreateNoteResponse,
            UpdateNoteRequest,
            ArchiveNoteRequest,
            ArchiveNoteResponse,
            NoteResponse,
            NoteListResponse,
            AuditPage,
            AuditEntry,
            AuditAction,
            ResourceType,
            MaskedValue,
            KeyStatus,
            keys::KeyUsage,
            keys::RotateKeyRequest,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Notes", description = "Encrypted clinical notes"),
        (name = "Audit", description = "Audit trail and security log (auditors only)"),
        (name = "Keys", description = "Note key ring administration (admins only)"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(test_state());
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = router(test_state())
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn openapi_document_lists_note_routes() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/v1/notes/{record_id}"].is_object());
        assert!(doc["components"]["securitySchemes"]["bearer"].is_object());
    }
}
