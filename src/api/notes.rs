// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Clinical note endpoints.
//!
//! Store operations run on a detached task: a client that disconnects
//! mid-write cannot abort the write between the record update and its audit
//! entry. The tasks are tracked so shutdown waits for them. Reads are additionally tied to the connection and are cancelled
//! when the handler is dropped.

use std::future::Future;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tokio_util::task::TaskTracker;

use crate::{
    auth::{Actor, Auth, RequestMeta},
    error::ApiError,
    models::{
        ArchiveNoteRequest, ArchiveNoteResponse, CreateNoteRequest, CreateNoteResponse,
        NoteListResponse, NoteResponse, ReasonQuery, SubjectNotesQuery, UpdateNoteRequest,
    },
    state::AppState,
    store::{ArchiveOutcome, RequestContext},
};

/// Default page size for subject listings.
const DEFAULT_SUBJECT_LIMIT: usize = 50;

pub(super) fn request_context(state: &AppState, actor: Actor, meta: RequestMeta) -> RequestContext {
    RequestContext::new(actor)
        .with_origin(meta.ip, meta.user_agent)
        .with_timeout(state.request_timeout)
}

/// Run an operation on a tracked task so shutdown can wait for it.
pub(super) async fn detached<T, E, F>(tasks: &TaskTracker, operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    match tasks.spawn(operation).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => {
            tracing::error!(error = %e, "Store operation task failed");
            Err(ApiError::internal("Internal error"))
        }
    }
}

fn note_list(notes: Vec<crate::store::DecryptedNote>) -> NoteListResponse {
    let notes: Vec<NoteResponse> = notes.into_iter().map(NoteResponse::from).collect();
    NoteListResponse {
        total: notes.len(),
        notes,
    }
}

#[utoipa::path(
    post,
    path = "/v1/notes",
    request_body = CreateNoteRequest,
    tag = "Notes",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Note created", body = CreateNoteResponse),
        (status = 400, description = "Invalid content, reason or context"),
        (status = 403, description = "Caller may not write notes")
    )
)]
pub async fn create_note(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<CreateNoteResponse>), ApiError> {
    let ctx = request_context(&state, actor, meta);
    let store = state.store.clone();
    let record_id = detached(&state.tasks, async move {
        store
            .create(&ctx, &request.context_ref, &request.content, &request.reason)
            .await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(CreateNoteResponse { record_id })))
}

#[utoipa::path(
    get,
    path = "/v1/notes/{record_id}",
    params(
        ("record_id" = String, Path, description = "Note identifier"),
        ReasonQuery
    ),
    tag = "Notes",
    security(("bearer" = [])),
    responses(
        (status = 200, body = NoteResponse),
        (status = 403, description = "Access denied"),
        (status = 404, description = "Note not found")
    )
)]
pub async fn get_note(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Path(record_id): Path<String>,
    Query(params): Query<ReasonQuery>,
) -> Result<Json<NoteResponse>, ApiError> {
    let ctx = request_context(&state, actor, meta);
    let _disconnect = ctx.cancel.clone().drop_guard();
    let store = state.store.clone();
    let note = detached(&state.tasks, async move { store.get(&ctx, &record_id, &params.reason).await }).await?;

    Ok(Json(note.into()))
}

#[utoipa::path(
    put,
    path = "/v1/notes/{record_id}",
    params(("record_id" = String, Path, description = "Note identifier")),
    request_body = UpdateNoteRequest,
    tag = "Notes",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Note updated"),
        (status = 403, description = "Only the author may update an active note"),
        (status = 409, description = "Concurrent modification")
    )
)]
pub async fn update_note(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Path(record_id): Path<String>,
    Json(request): Json<UpdateNoteRequest>,
) -> Result<StatusCode, ApiError> {
    let ctx = request_context(&state, actor, meta);
    let store = state.store.clone();
    detached(&state.tasks, async move {
        store
            .update(&ctx, &record_id, &request.content, &request.reason)
            .await
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/notes/{record_id}/archive",
    params(("record_id" = String, Path, description = "Note identifier")),
    request_body = ArchiveNoteRequest,
    tag = "Notes",
    security(("bearer" = [])),
    responses(
        (status = 200, body = ArchiveNoteResponse),
        (status = 403, description = "Only the author may archive a note")
    )
)]
pub async fn archive_note(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Path(record_id): Path<String>,
    Json(request): Json<ArchiveNoteRequest>,
) -> Result<Json<ArchiveNoteResponse>, ApiError> {
    let ctx = request_context(&state, actor, meta);
    let store = state.store.clone();
    let id = record_id.clone();
    let outcome =
        detached(&state.tasks, async move { store.archive(&ctx, &id, &request.reason).await }).await?;

    Ok(Json(ArchiveNoteResponse {
        record_id,
        changed: outcome == ArchiveOutcome::Archived,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/contexts/{context_ref}/notes",
    params(
        ("context_ref" = String, Path, description = "Appointment identifier"),
        ReasonQuery
    ),
    tag = "Notes",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Readable notes of the context", body = NoteListResponse),
        (status = 404, description = "Unknown context")
    )
)]
pub async fn list_context_notes(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Path(context_ref): Path<String>,
    Query(params): Query<ReasonQuery>,
) -> Result<Json<NoteListResponse>, ApiError> {
    let ctx = request_context(&state, actor, meta);
    let _disconnect = ctx.cancel.clone().drop_guard();
    let store = state.store.clone();
    let notes = detached(&state.tasks, async move {
        store
            .batch_get_by_context(&ctx, &context_ref, &params.reason)
            .await
    })
    .await?;

    Ok(Json(note_list(notes)))
}

#[utoipa::path(
    get,
    path = "/v1/subjects/{subject_id}/notes",
    params(
        ("subject_id" = String, Path, description = "Patient identifier"),
        SubjectNotesQuery
    ),
    tag = "Notes",
    security(("bearer" = [])),
    responses((status = 200, description = "Readable notes of the patient", body = NoteListResponse))
)]
pub async fn list_subject_notes(
    State(state): State<AppState>,
    Auth(actor): Auth,
    meta: RequestMeta,
    Path(subject_id): Path<String>,
    Query(params): Query<SubjectNotesQuery>,
) -> Result<Json<NoteListResponse>, ApiError> {
    let ctx = request_context(&state, actor, meta);
    let _disconnect = ctx.cancel.clone().drop_guard();
    let store = state.store.clone();
    let limit = params.limit.unwrap_or(DEFAULT_SUBJECT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let notes = detached(&state.tasks, async move {
        store
            .batch_get_by_subject(&ctx, &subject_id, &params.reason, limit, offset)
            .await
    })
    .await?;

    Ok(Json(note_list(notes)))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::audit::{AuditAction, AuditQuery, AuditTarget};
    use crate::state::test_state_for;
    use crate::testing::{fixture, Fixture};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(fx: &Fixture) -> Router {
        router(test_state_for(fx))
    }

    fn request(method: Method, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::USER_AGENT, "clinic-app/2.1")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn create(app: &Router, content: &str) -> String {
        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/v1/notes",
                "tok-doctor",
                Some(json!({
                    "context_ref": "appt-1",
                    "content": content,
                    "reason": "initial consultation"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["record_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_then_read_as_participants() {
        let fx = fixture();
        let app = app(&fx);
        let id = create(&app, "Blood pressure normal.").await;

        for token in ["tok-doctor", "tok-patient"] {
            let (status, body) = send(
                &app,
                request(
                    Method::GET,
                    &format!("/v1/notes/{id}?reason=follow-up%20review"),
                    token,
                    None,
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["content"], "Blood pressure normal.");
            assert_eq!(body["subject_id"], "patient-1");
        }

        let page = fx
            .audit
            .list(AuditQuery::new(AuditTarget::record(id.as_str())).with_action(AuditAction::Accessed))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(page.entries[0].user_agent.as_deref(), Some("clinic-app/2.1"));
    }

    #[tokio::test]
    async fn stranger_is_forbidden() {
        let fx = fixture();
        let app = app(&fx);
        let id = create(&app, "Private.").await;

        let (status, body) = send(
            &app,
            request(
                Method::GET,
                &format!("/v1/notes/{id}?reason=curiosity%20check"),
                "tok-stranger",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Access denied: not_participant");
        assert!(!body.to_string().contains("Private."));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let fx = fixture();
        let req = Request::builder()
            .uri("/v1/notes/anything?reason=checking")
            .body(Body::empty())
            .unwrap();
        let response = app(&fx).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn short_reason_is_bad_request() {
        let fx = fixture();
        let app = app(&fx);
        let id = create(&app, "Body.").await;

        let (status, _) = send(
            &app,
            request(Method::GET, &format!("/v1/notes/{id}?reason=ok"), "tok-doctor", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_archive_flow() {
        let fx = fixture();
        let app = app(&fx);
        let id = create(&app, "Draft.").await;

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/v1/notes/{id}"),
                "tok-patient",
                Some(json!({ "content": "Edited.", "reason": "correction request" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/v1/notes/{id}"),
                "tok-doctor",
                Some(json!({ "content": "Final.", "reason": "amend findings" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        for expected in [true, false] {
            let (status, body) = send(
                &app,
                request(
                    Method::POST,
                    &format!("/v1/notes/{id}/archive"),
                    "tok-doctor",
                    Some(json!({ "reason": "episode closed" })),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["changed"], expected);
        }

        let (status, body) = send(
            &app,
            request(
                Method::PUT,
                &format!("/v1/notes/{id}"),
                "tok-doctor",
                Some(json!({ "content": "Too late.", "reason": "late amendment" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Access denied: archived");
    }

    #[tokio::test]
    async fn context_and_subject_listings() {
        let fx = fixture();
        let app = app(&fx);
        create(&app, "First.").await;
        create(&app, "Second.").await;

        let (status, body) = send(
            &app,
            request(
                Method::GET,
                "/v1/contexts/appt-1/notes?reason=chart%20review",
                "tok-patient",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);

        let mut seen = Vec::new();
        for offset in [0, 1] {
            let (status, body) = send(
                &app,
                request(
                    Method::GET,
                    &format!("/v1/subjects/patient-1/notes?reason=chart%20review&limit=1&offset={offset}"),
                    "tok-doctor",
                    None,
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 1);
            seen.push(body["notes"][0]["content"].as_str().unwrap().to_string());
        }
        seen.sort();
        assert_eq!(seen, ["First.", "Second."]);

        let (status, _) = send(
            &app,
            request(
                Method::GET,
                "/v1/contexts/appt-404/notes?reason=chart%20review",
                "tok-doctor",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dropped_handler_leaves_tracked_operation_running() {
        use super::detached;
        use crate::store::StoreError;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;
        use tokio_util::task::TaskTracker;

        let tasks = TaskTracker::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let call = detached(&tasks, async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, StoreError>(())
        });

        // The caller gives up, the operation does not
        assert!(tokio::time::timeout(Duration::from_millis(1), call).await.is_err());
        assert!(!finished.load(Ordering::SeqCst));

        tasks.close();
        tasks.wait().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
