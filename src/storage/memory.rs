// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-local storage backend.
//!
//! Used by tests and by `STORAGE_BACKEND=memory` deployments where nothing
//! needs to survive a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{AuditStore, RecordStore, SensitiveRecord, StorageError, StorageResult};
use crate::audit::{AuditEntry, ResourceType};

#[derive(Default)]
struct AuditLog {
    trail: Vec<AuditEntry>,
    security: Vec<AuditEntry>,
}

/// In-memory [`RecordStore`] and [`AuditStore`].
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, SensitiveRecord>>,
    audit: RwLock<AuditLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record without any version check.
    ///
    /// Simulates out-of-band tampering with the persisted ciphertext.
    #[cfg(test)]
    pub(crate) fn overwrite_unchecked(&self, record: SensitiveRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.record_id.clone(), record);
        }
    }

    fn sorted(mut records: Vec<SensitiveRecord>) -> Vec<SensitiveRecord> {
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        records
    }
}

impl RecordStore for MemoryBackend {
    fn insert(&self, record: &SensitiveRecord) -> StorageResult<()> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        if records.contains_key(&record.record_id) {
            return Err(StorageError::AlreadyExists(format!(
                "Record {}",
                record.record_id
            )));
        }
        records.insert(record.record_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, record_id: &str) -> StorageResult<Option<SensitiveRecord>> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        Ok(records.get(record_id).cloned())
    }

    fn compare_and_swap(&self, record: &SensitiveRecord, expected_version: u64) -> StorageResult<()> {
        let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
        let current = records
            .get_mut(&record.record_id)
            .ok_or_else(|| StorageError::NotFound(format!("Record {}", record.record_id)))?;

        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                record_id: record.record_id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }

        *current = record.clone();
        Ok(())
    }

    fn list_by_context(&self, context_id: &str) -> StorageResult<Vec<SensitiveRecord>> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        Ok(Self::sorted(
            records
                .values()
                .filter(|r| r.context_id == context_id)
                .cloned()
                .collect(),
        ))
    }

    fn list_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<SensitiveRecord>> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        let matching = Self::sorted(
            records
                .values()
                .filter(|r| r.subject_id == subject_id)
                .cloned()
                .collect(),
        );
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    fn count_by_key(&self, key_id: &str) -> StorageResult<usize> {
        let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
        Ok(records.values().filter(|r| r.payload.key_id == key_id).count())
    }
}

impl AuditStore for MemoryBackend {
    fn append(&self, entry: &AuditEntry) -> StorageResult<u64> {
        let mut log = self.audit.write().map_err(|_| StorageError::Poisoned)?;
        let sequence = log.trail.len() as u64 + 1;
        let mut stored = entry.clone();
        stored.sequence = sequence;
        log.trail.push(stored);
        Ok(sequence)
    }

    fn append_security(&self, entry: &AuditEntry) -> StorageResult<u64> {
        let mut log = self.audit.write().map_err(|_| StorageError::Poisoned)?;
        let sequence = log.security.len() as u64 + 1;
        let mut stored = entry.clone();
        stored.sequence = sequence;
        log.security.push(stored);
        Ok(sequence)
    }

    fn entries_for_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StorageResult<Vec<AuditEntry>> {
        let log = self.audit.read().map_err(|_| StorageError::Poisoned)?;
        Ok(log
            .trail
            .iter()
            .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
            .cloned()
            .collect())
    }

    fn entries_for_actor(&self, actor_id: &str) -> StorageResult<Vec<AuditEntry>> {
        let log = self.audit.read().map_err(|_| StorageError::Poisoned)?;
        Ok(log
            .trail
            .iter()
            .filter(|e| e.actor_id == actor_id)
            .cloned()
            .collect())
    }

    fn security_entries(&self) -> StorageResult<Vec<AuditEntry>> {
        let log = self.audit.read().map_err(|_| StorageError::Poisoned)?;
        Ok(log.security.clone())
    }
}
