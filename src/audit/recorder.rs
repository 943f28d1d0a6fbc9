// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The single writer of the audit log.

use std::sync::Arc;

use super::{AuditAction, AuditEntry, AuditError, MaskedValue, Masker};
use crate::storage::AuditStore;

/// Appends audit entries. There is no update or delete operation.
pub struct AuditTrailRecorder {
    store: Arc<dyn AuditStore>,
    masker: Masker,
}

impl AuditTrailRecorder {
    pub fn new(store: Arc<dyn AuditStore>, masker: Masker) -> Self {
        Self { store, masker }
    }

    /// Append an entry to the per-resource trail.
    ///
    /// Returns the sequence number the store assigned. Denied attempts are
    /// rejected here; they belong in [`Self::record_security`].
    pub fn record(&self, entry: &AuditEntry) -> Result<u64, AuditError> {
        if entry.action == AuditAction::AccessDenied {
            return Err(AuditError::Invalid(
                "access_denied entries go to the security log".to_string(),
            ));
        }
        let has_reason = entry
            .access_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if entry.action.requires_reason() && !has_reason {
            return Err(AuditError::Invalid(format!(
                "{} entry requires an access reason",
                entry.action
            )));
        }

        let sequence = self.store.append(entry)?;
        tracing::debug!(
            sequence,
            action = %entry.action,
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            actor_id = %entry.actor_id,
            "Audit entry recorded"
        );
        Ok(sequence)
    }

    /// Append an entry to the security log.
    ///
    /// Failures are logged and swallowed: the caller is already returning an
    /// error to the actor and has nothing further to report.
    pub fn record_security(&self, entry: &AuditEntry) {
        match self.store.append_security(entry) {
            Ok(sequence) => tracing::debug!(
                sequence,
                resource_id = %entry.resource_id,
                actor_id = %entry.actor_id,
                "Security log entry recorded"
            ),
            Err(e) => tracing::error!(
                error = %e,
                resource_id = %entry.resource_id,
                actor_id = %entry.actor_id,
                "Failed to write security log entry"
            ),
        }
    }

    pub fn mask_content(&self, value: &str) -> MaskedValue {
        self.masker.mask(value)
    }

    pub fn masker(&self) -> &Masker {
        &self.masker
    }
}
