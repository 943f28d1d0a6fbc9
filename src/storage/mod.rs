// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Backends
//!
//! Persistence for sealed records and the audit trail, behind two narrow
//! traits so the engine can be swapped without touching the record store.
//!
//! ## Backends
//!
//! - [`MemoryBackend`] - process-local maps, for tests and ephemeral runs
//! - [`DatabaseBackend`] - embedded redb database (pure Rust, ACID)
//!
//! ## Rules Every Backend Upholds
//!
//! - Records are only replaced through [`RecordStore::compare_and_swap`],
//!   which rejects stale versions with [`StorageError::VersionConflict`].
//! - Audit entries are append-only: there is no update or delete path, and
//!   each append is assigned the next sequence number.
//! - Security-log entries (denied access) live apart from the per-resource
//!   trail and never show up in resource queries.

pub mod database;
pub mod memory;
pub mod record;

pub use database::DatabaseBackend;
pub use memory::MemoryBackend;
pub use record::SensitiveRecord;

use crate::audit::{AuditEntry, ResourceType};

/// Error type for storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {record_id}: expected {expected}, found {found}")]
    VersionConflict {
        record_id: String,
        expected: u64,
        found: u64,
    },

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for sealed records.
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    fn insert(&self, record: &SensitiveRecord) -> StorageResult<()>;

    /// Load a record by id.
    fn get(&self, record_id: &str) -> StorageResult<Option<SensitiveRecord>>;

    /// Replace a record if its stored version still equals `expected_version`.
    fn compare_and_swap(&self, record: &SensitiveRecord, expected_version: u64) -> StorageResult<()>;

    /// All records bound to a context, oldest first.
    fn list_by_context(&self, context_id: &str) -> StorageResult<Vec<SensitiveRecord>>;

    /// One page of a subject's records, oldest first.
    fn list_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<SensitiveRecord>>;

    /// Number of records sealed under `key_id`.
    fn count_by_key(&self, key_id: &str) -> StorageResult<usize>;
}

/// Append-only persistence for audit entries.
pub trait AuditStore: Send + Sync {
    /// Append to the per-resource trail. Returns the assigned sequence.
    fn append(&self, entry: &AuditEntry) -> StorageResult<u64>;

    /// Append to the security log. Returns the assigned sequence.
    fn append_security(&self, entry: &AuditEntry) -> StorageResult<u64>;

    /// Trail entries for one resource, in append order.
    fn entries_for_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StorageResult<Vec<AuditEntry>>;

    /// Trail entries written by one actor, in append order.
    fn entries_for_actor(&self, actor_id: &str) -> StorageResult<Vec<AuditEntry>>;

    /// Every security-log entry, in append order.
    fn security_entries(&self) -> StorageResult<Vec<AuditEntry>>;
}
