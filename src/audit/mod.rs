// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Audit Trail
//!
//! Every touch of protected health information produces exactly one
//! immutable [`AuditEntry`]. The [`AuditTrailRecorder`] is the only writer;
//! the [`AuditQueryService`] is read-only and never sees plaintext, because
//! entries carry [`MaskedValue`]s instead of note bodies.
//!
//! Denied access attempts go to a separate security log so that the
//! per-resource trail only lists actions that actually happened.

pub mod entry;
pub mod masking;
pub mod query;
pub mod recorder;

pub use entry::{AuditAction, AuditEntry, Auditable, ResourceType};
pub use masking::{MaskedValue, Masker};
pub use query::{AuditPage, AuditQuery, AuditQueryService, AuditTarget};
pub use recorder::AuditTrailRecorder;

use crate::storage::StorageError;

/// Errors raised while writing or reading the audit log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The entry or query is malformed.
    #[error("invalid audit request: {0}")]
    Invalid(String),

    /// The audit store failed.
    #[error("audit storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A blocking audit task panicked or was aborted.
    #[error("audit task failed: {0}")]
    Task(String),
}
