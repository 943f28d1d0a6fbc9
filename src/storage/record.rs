// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed clinical note as persisted by the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{Auditable, ResourceType};
use crate::crypto::EncryptedPayload;

/// One clinical note. The body only exists as an [`EncryptedPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveRecord {
    /// Unique record identifier (UUID)
    pub record_id: String,
    /// Patient the note is about
    pub subject_id: String,
    /// Doctor who wrote the note
    pub author_id: String,
    /// Appointment (or other binding) the note belongs to
    pub context_id: String,
    /// Sealed note body
    pub payload: EncryptedPayload,
    /// Archived notes stay readable but can no longer be updated
    pub is_archived: bool,
    /// Incremented on every successful write; used for compare-and-swap
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SensitiveRecord {
    /// Build a fresh, unarchived record at version 1.
    pub fn new(
        record_id: impl Into<String>,
        subject_id: impl Into<String>,
        author_id: impl Into<String>,
        context_id: impl Into<String>,
        payload: EncryptedPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: record_id.into(),
            subject_id: subject_id.into(),
            author_id: author_id.into(),
            context_id: context_id.into(),
            payload,
            is_archived: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_author(&self, actor_id: &str) -> bool {
        self.author_id == actor_id
    }

    /// Subject or author.
    pub fn is_participant(&self, actor_id: &str) -> bool {
        self.subject_id == actor_id || self.author_id == actor_id
    }

    /// Copy with a new payload and the next version.
    pub fn with_payload(&self, payload: EncryptedPayload) -> Self {
        Self {
            payload,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Archived copy with the next version.
    pub fn archived(&self) -> Self {
        Self {
            is_archived: true,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl Auditable for SensitiveRecord {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ClinicalNote
    }

    fn resource_id(&self) -> &str {
        &self.record_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SensitiveRecord {
        SensitiveRecord::new(
            "rec-1",
            "patient-1",
            "doctor-1",
            "appt-1",
            EncryptedPayload {
                ciphertext: vec![1, 2, 3],
                content_hash: vec![4, 5, 6],
                key_id: "k1".to_string(),
            },
        )
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = record();
        assert_eq!(record.version, 1);
        assert!(!record.is_archived);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn participants_are_subject_and_author() {
        let record = record();
        assert!(record.is_participant("patient-1"));
        assert!(record.is_participant("doctor-1"));
        assert!(!record.is_participant("someone-else"));
        assert!(record.is_author("doctor-1"));
        assert!(!record.is_author("patient-1"));
    }

    #[test]
    fn transitions_bump_version() {
        let record = record();
        let archived = record.archived();
        assert!(archived.is_archived);
        assert_eq!(archived.version, 2);

        let replaced = record.with_payload(EncryptedPayload {
            ciphertext: vec![9],
            content_hash: vec![9],
            key_id: "k2".to_string(),
        });
        assert_eq!(replaced.version, 2);
        assert_eq!(replaced.payload.key_id, "k2");
        assert_eq!(replaced.created_at, record.created_at);
    }

    #[test]
    fn record_is_auditable_as_clinical_note() {
        let record = record();
        assert_eq!(record.resource_type(), ResourceType::ClinicalNote);
        assert_eq!(record.resource_id(), "rec-1");
    }
}
