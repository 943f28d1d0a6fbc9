// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies for the REST API. All types derive `ToSchema`
//! for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Notes**: create / update / archive requests and decrypted note views
//! - **Listings**: batch reads by context or subject
//! - **Audit**: query parameters for audit and security log pages
//!
//! Ciphertext and content hashes never leave the service; a [`NoteResponse`]
//! carries the plaintext for the one caller that was allowed to read it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::store::DecryptedNote;

// =============================================================================
// Note Models
// =============================================================================

/// Request to write a new clinical note.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateNoteRequest {
    /// Appointment (context) the note belongs to.
    pub context_ref: String,
    /// Note body.
    pub content: String,
    /// Why the note is being written (audited).
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateNoteResponse {
    pub record_id: String,
}

/// Request to replace a note body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateNoteRequest {
    pub content: String,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ArchiveNoteRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArchiveNoteResponse {
    pub record_id: String,
    /// False when the note was already archived.
    pub changed: bool,
}

/// A decrypted note.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NoteResponse {
    pub record_id: String,
    pub subject_id: String,
    pub author_id: String,
    pub context_id: String,
    pub content: String,
    pub is_archived: bool,
    pub version: u64,
    /// Key the note is currently sealed under.
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DecryptedNote> for NoteResponse {
    fn from(note: DecryptedNote) -> Self {
        let DecryptedNote { record, plaintext } = note;
        Self {
            record_id: record.record_id,
            subject_id: record.subject_id,
            author_id: record.author_id,
            context_id: record.context_id,
            content: plaintext,
            is_archived: record.is_archived,
            version: record.version,
            key_id: record.payload.key_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NoteListResponse {
    pub notes: Vec<NoteResponse>,
    /// Number of notes returned (denied or unreadable notes are omitted).
    pub total: usize,
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Access reason for reads.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ReasonQuery {
    /// Why the note is being read (audited, min 5 characters).
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SubjectNotesQuery {
    pub reason: String,
    /// Page size (default 50).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Audit log query parameters.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// 1-based page number (default 1).
    pub page: Option<usize>,
    /// Entries per page (default 50, max 500).
    pub page_size: Option<usize>,
    /// Filter by action (`created`, `accessed`, `updated`, `archived`, `access_denied`).
    pub action: Option<String>,
    /// Only entries at or after this instant (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this instant (RFC 3339).
    pub to: Option<DateTime<Utc>>,
}
