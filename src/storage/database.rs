// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record and audit database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `records`: record_id → serialized SensitiveRecord
//! - `records_by_context`: composite key (context|created_at|record_id) → record_id
//! - `records_by_subject`: composite key (subject|created_at|record_id) → record_id
//! - `audit_trail`: sequence → serialized AuditEntry
//! - `audit_by_resource`: composite key (resource|sequence) → sequence
//! - `audit_by_actor`: composite key (actor|sequence) → sequence
//! - `security_log`: sequence → serialized AuditEntry
//!
//! Audit tables are only ever inserted into at a fresh sequence number.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{AuditStore, RecordStore, SensitiveRecord, StorageError, StorageResult};
use crate::audit::{AuditEntry, ResourceType};

// =============================================================================
// Table Definitions
// =============================================================================

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

const RECORDS_BY_CONTEXT: TableDefinition<&[u8], &str> = TableDefinition::new("records_by_context");

const RECORDS_BY_SUBJECT: TableDefinition<&[u8], &str> = TableDefinition::new("records_by_subject");

const AUDIT_TRAIL: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_trail");

const AUDIT_BY_RESOURCE: TableDefinition<&[u8], u64> = TableDefinition::new("audit_by_resource");

const AUDIT_BY_ACTOR: TableDefinition<&[u8], u64> = TableDefinition::new("audit_by_actor");

const SECURITY_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("security_log");

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Length-prefixed owner segment so `ab` never prefixes `abc`.
fn make_prefix(owner: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + owner.len());
    prefix.extend_from_slice(&(owner.len() as u32).to_be_bytes());
    prefix.extend_from_slice(owner.as_bytes());
    prefix
}

/// Sign-flipped big-endian micros so byte order equals time order.
fn time_bytes(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

fn record_index_key(owner: &str, created_at: DateTime<Utc>, record_id: &str) -> Vec<u8> {
    let mut key = make_prefix(owner);
    key.extend_from_slice(&time_bytes(created_at));
    key.extend_from_slice(record_id.as_bytes());
    key
}

fn resource_owner(resource_type: ResourceType, resource_id: &str) -> String {
    format!("{}:{resource_id}", resource_type.as_str())
}

fn audit_index_key(owner: &str, sequence: u64) -> Vec<u8> {
    let mut key = make_prefix(owner);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

// =============================================================================
// DatabaseBackend
// =============================================================================

/// redb-backed [`RecordStore`] and [`AuditStore`].
pub struct DatabaseBackend {
    db: Database,
}

impl DatabaseBackend {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS)?;
            let _ = write_txn.open_table(RECORDS_BY_CONTEXT)?;
            let _ = write_txn.open_table(RECORDS_BY_SUBJECT)?;
            let _ = write_txn.open_table(AUDIT_TRAIL)?;
            let _ = write_txn.open_table(AUDIT_BY_RESOURCE)?;
            let _ = write_txn.open_table(AUDIT_BY_ACTOR)?;
            let _ = write_txn.open_table(SECURITY_LOG)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Record database opened");
        Ok(Self { db })
    }

    /// Resolve record ids from an index range to records.
    fn records_from_index(
        &self,
        index: TableDefinition<&[u8], &str>,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<SensitiveRecord>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(index)?;
        let records = read_txn.open_table(RECORDS)?;

        let prefix = make_prefix(owner);
        let mut results = Vec::new();
        let mut skipped = 0usize;

        for entry in idx_table.range(prefix.as_slice()..)? {
            let (key, record_id) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if results.len() >= limit {
                break;
            }
            if let Some(value) = records.get(record_id.value())? {
                results.push(serde_json::from_slice(value.value())?);
            }
        }

        Ok(results)
    }

    fn audit_from_index(
        &self,
        index: TableDefinition<&[u8], u64>,
        owner: &str,
    ) -> StorageResult<Vec<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(index)?;
        let trail = read_txn.open_table(AUDIT_TRAIL)?;

        let prefix = make_prefix(owner);
        let mut entries = Vec::new();
        for entry in idx_table.range(prefix.as_slice()..)? {
            let (key, sequence) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            if let Some(value) = trail.get(sequence.value())? {
                entries.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(entries)
    }
}

impl RecordStore for DatabaseBackend {
    fn insert(&self, record: &SensitiveRecord) -> StorageResult<()> {
        let json = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;
            if table.get(record.record_id.as_str())?.is_some() {
                return Err(StorageError::AlreadyExists(format!(
                    "Record {}",
                    record.record_id
                )));
            }
            table.insert(record.record_id.as_str(), json.as_slice())?;

            let mut by_context = write_txn.open_table(RECORDS_BY_CONTEXT)?;
            let key = record_index_key(&record.context_id, record.created_at, &record.record_id);
            by_context.insert(key.as_slice(), record.record_id.as_str())?;

            let mut by_subject = write_txn.open_table(RECORDS_BY_SUBJECT)?;
            let key = record_index_key(&record.subject_id, record.created_at, &record.record_id);
            by_subject.insert(key.as_slice(), record.record_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, record_id: &str) -> StorageResult<Option<SensitiveRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        match table.get(record_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(&self, record: &SensitiveRecord, expected_version: u64) -> StorageResult<()> {
        let json = serde_json::to_vec(record)?;

        // redb serializes write transactions, so read-compare-write is atomic
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;

            let existing_bytes = {
                let existing = table
                    .get(record.record_id.as_str())?
                    .ok_or_else(|| StorageError::NotFound(format!("Record {}", record.record_id)))?;
                existing.value().to_vec()
            };
            let current: SensitiveRecord = serde_json::from_slice(&existing_bytes)?;

            if current.version != expected_version {
                return Err(StorageError::VersionConflict {
                    record_id: record.record_id.clone(),
                    expected: expected_version,
                    found: current.version,
                });
            }

            table.insert(record.record_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_by_context(&self, context_id: &str) -> StorageResult<Vec<SensitiveRecord>> {
        self.records_from_index(RECORDS_BY_CONTEXT, context_id, usize::MAX, 0)
    }

    fn list_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<SensitiveRecord>> {
        self.records_from_index(RECORDS_BY_SUBJECT, subject_id, limit, offset)
    }

    fn count_by_key(&self, key_id: &str) -> StorageResult<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let mut count = 0;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let record: SensitiveRecord = serde_json::from_slice(value.value())?;
            if record.payload.key_id == key_id {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl AuditStore for DatabaseBackend {
    fn append(&self, entry: &AuditEntry) -> StorageResult<u64> {
        let write_txn = self.db.begin_write()?;
        let sequence = {
            let mut trail = write_txn.open_table(AUDIT_TRAIL)?;
            let sequence = match trail.last()? {
                Some((last, _)) => last.value() + 1,
                None => 1,
            };

            let mut stored = entry.clone();
            stored.sequence = sequence;
            let json = serde_json::to_vec(&stored)?;
            trail.insert(sequence, json.as_slice())?;

            let mut by_resource = write_txn.open_table(AUDIT_BY_RESOURCE)?;
            let owner = resource_owner(entry.resource_type, &entry.resource_id);
            by_resource.insert(audit_index_key(&owner, sequence).as_slice(), sequence)?;

            let mut by_actor = write_txn.open_table(AUDIT_BY_ACTOR)?;
            by_actor.insert(audit_index_key(&entry.actor_id, sequence).as_slice(), sequence)?;

            sequence
        };
        write_txn.commit()?;
        Ok(sequence)
    }

    fn append_security(&self, entry: &AuditEntry) -> StorageResult<u64> {
        let write_txn = self.db.begin_write()?;
        let sequence = {
            let mut log = write_txn.open_table(SECURITY_LOG)?;
            let sequence = match log.last()? {
                Some((last, _)) => last.value() + 1,
                None => 1,
            };

            let mut stored = entry.clone();
            stored.sequence = sequence;
            let json = serde_json::to_vec(&stored)?;
            log.insert(sequence, json.as_slice())?;
            sequence
        };
        write_txn.commit()?;
        Ok(sequence)
    }

    fn entries_for_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StorageResult<Vec<AuditEntry>> {
        self.audit_from_index(AUDIT_BY_RESOURCE, &resource_owner(resource_type, resource_id))
    }

    fn entries_for_actor(&self, actor_id: &str) -> StorageResult<Vec<AuditEntry>> {
        self.audit_from_index(AUDIT_BY_ACTOR, actor_id)
    }

    fn security_entries(&self) -> StorageResult<Vec<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(SECURITY_LOG)?;
        let mut entries = Vec::new();
        for entry in log.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::crypto::EncryptedPayload;

    fn temp_db() -> (DatabaseBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseBackend::open(&dir.path().join("notes.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault").join("data").join("notes.redb");
        DatabaseBackend::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_reports_unusable_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = DatabaseBackend::open(&blocker.join("notes.redb")).err().unwrap();
        assert!(matches!(err, StorageError::Io(_)));
    }

    fn sample_record(id: &str, subject: &str, context: &str) -> SensitiveRecord {
        SensitiveRecord::new(
            id,
            subject,
            "doctor-1",
            context,
            EncryptedPayload {
                ciphertext: vec![7; 40],
                content_hash: vec![8; 32],
                key_id: "k1".to_string(),
            },
        )
    }

    #[test]
    fn insert_and_get_record() {
        let (db, _dir) = temp_db();
        let record = sample_record("r1", "p1", "c1");
        db.insert(&record).unwrap();

        let loaded = db.get("r1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (db, _dir) = temp_db();
        db.insert(&sample_record("r1", "p1", "c1")).unwrap();
        let err = db.insert(&sample_record("r1", "p1", "c1")).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn compare_and_swap_checks_version() {
        let (db, _dir) = temp_db();
        let record = sample_record("r1", "p1", "c1");
        db.insert(&record).unwrap();

        db.compare_and_swap(&record.archived(), 1).unwrap();
        assert!(db.get("r1").unwrap().unwrap().is_archived);

        let err = db.compare_and_swap(&record.archived(), 1).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { found: 2, .. }));
    }

    #[test]
    fn subject_listing_is_ordered_and_paged() {
        let (db, _dir) = temp_db();
        for i in 0..5 {
            let mut record = sample_record(&format!("r{i}"), "p1", "c1");
            record.created_at = Utc::now() - chrono::Duration::seconds(10 - i);
            db.insert(&record).unwrap();
        }
        // Same-length prefix collision guard
        db.insert(&sample_record("x", "p10", "c10")).unwrap();

        let page1 = db.list_by_subject("p1", 2, 0).unwrap();
        let ids: Vec<&str> = page1.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1"]);

        let page3 = db.list_by_subject("p1", 2, 4).unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(page3[0].record_id, "r4");

        assert_eq!(db.list_by_context("c1").unwrap().len(), 5);
        assert_eq!(db.list_by_context("c10").unwrap().len(), 1);
    }

    #[test]
    fn count_by_key_scans_records() {
        let (db, _dir) = temp_db();
        db.insert(&sample_record("r1", "p1", "c1")).unwrap();
        let mut other = sample_record("r2", "p1", "c1");
        other.payload.key_id = "k2".to_string();
        db.insert(&other).unwrap();

        assert_eq!(db.count_by_key("k1").unwrap(), 1);
        assert_eq!(db.count_by_key("k2").unwrap(), 1);
        assert_eq!(db.count_by_key("k3").unwrap(), 0);
    }

    #[test]
    fn audit_trail_is_indexed_by_resource_and_actor() {
        let (db, _dir) = temp_db();
        let created = AuditEntry::new(AuditAction::Created, ResourceType::ClinicalNote, "r1", "d1")
            .with_reason("initial consult");
        let accessed = AuditEntry::new(AuditAction::Accessed, ResourceType::ClinicalNote, "r1", "p1")
            .with_reason("reviewing my care plan");
        let other = AuditEntry::new(AuditAction::Created, ResourceType::ClinicalNote, "r2", "d1")
            .with_reason("initial consult");

        assert_eq!(db.append(&created).unwrap(), 1);
        assert_eq!(db.append(&accessed).unwrap(), 2);
        assert_eq!(db.append(&other).unwrap(), 3);

        let trail = db.entries_for_resource(ResourceType::ClinicalNote, "r1").unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].action, AuditAction::Created);
        assert_eq!(trail[1].sequence, 2);

        let by_doctor = db.entries_for_actor("d1").unwrap();
        assert_eq!(by_doctor.len(), 2);
    }

    #[test]
    fn security_log_is_separate_from_trail() {
        let (db, _dir) = temp_db();
        let denied = AuditEntry::new(AuditAction::AccessDenied, ResourceType::ClinicalNote, "r1", "u1")
            .with_detail("not_participant");
        db.append_security(&denied).unwrap();

        assert!(db
            .entries_for_resource(ResourceType::ClinicalNote, "r1")
            .unwrap()
            .is_empty());
        let security = db.security_entries().unwrap();
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].sequence, 1);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.redb");
        {
            let db = DatabaseBackend::open(&path).unwrap();
            db.insert(&sample_record("r1", "p1", "c1")).unwrap();
            db.append(
                &AuditEntry::new(AuditAction::Created, ResourceType::ClinicalNote, "r1", "d1")
                    .with_reason("initial consult"),
            )
            .unwrap();
        }
        let db = DatabaseBackend::open(&path).unwrap();
        assert!(db.get("r1").unwrap().is_some());
        assert_eq!(
            db.entries_for_resource(ResourceType::ClinicalNote, "r1")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn time_bytes_preserve_order() {
        let earlier = Utc::now() - chrono::Duration::days(1);
        let later = Utc::now();
        assert!(time_bytes(earlier) < time_bytes(later));
    }
}
