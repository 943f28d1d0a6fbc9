// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secure Record Store
//!
//! The public contract for clinical notes. Every operation runs in the same
//! order:
//!
//! 1. validate input (the access reason is mandatory everywhere)
//! 2. ask the [`AccessPolicy`]; a denial is written to the security log,
//!    emitted to telemetry, and returned as [`StoreError::AccessDenied`]
//! 3. encrypt / decrypt and read / write the storage backend
//! 4. append exactly one audit entry before returning
//!
//! ## Cancellation
//!
//! Backends are synchronous and run on the blocking pool. Reads race the
//! request's cancellation token and deadline. A record write is never raced:
//! once started it runs to completion so its outcome is always known. The
//! audit write is only attempted while the request is still live; when a
//! mutation has been persisted but cannot be audited the caller gets
//! [`StoreError::AuditWriteFailed`] and telemetry gets an
//! `unaudited_mutation` event.
//!
//! ## Audit Retries
//!
//! A failed mutation audit write is retried here a bounded number of times.
//! Once those attempts are spent the error is escalated and is not
//! retryable: the record change already landed, and replaying a create or
//! an archive would mint a second record or skip the `Archived` entry.
//!
//! ## Key Revocation
//!
//! Writes hold the sealing gate from the moment they pick the active key
//! until their record is persisted. Revocation takes the gate exclusively,
//! so its usage count always sees every record sealed under the key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditTrailRecorder, Auditable, ResourceType};
use crate::auth::Actor;
use crate::context::ContextResolver;
use crate::crypto::{CryptoError, EncryptionService, KeyInfo, KeyRing};
use crate::policy::{AccessPolicy, Decision, DenyReason, NoteAction};
use crate::storage::{RecordStore, SensitiveRecord, StorageError};
use crate::telemetry::{SecurityEvent, SecurityTelemetry};

/// Default minimum length of an access reason.
pub const DEFAULT_MIN_REASON_LEN: usize = 5;

/// Maximum page size for subject listings.
pub const MAX_BATCH_LIMIT: usize = 200;

/// Attempts at appending a mutation's audit entry before escalating.
const AUDIT_WRITE_ATTEMPTS: u32 = 3;

/// Pause before the next audit attempt, multiplied by the attempt number.
const AUDIT_RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Access reason recorded on key ring administration entries.
const KEY_ADMIN_REASON: &str = "key ring administration";

/// Record id looked up by the storage health probe. Never written.
const STORAGE_PROBE_ID: &str = "__storage_probe__";

// =============================================================================
// Errors
// =============================================================================

/// Error taxonomy of the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity check failed for {0}")]
    Integrity(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The audit entry could not be written. For mutations the change was
    /// persisted anyway and the call must not be replayed.
    #[error("audit write failed: {detail}")]
    AuditWriteFailed { detail: String, retryable: bool },

    #[error("persistence failure: {detail}")]
    Persistence { detail: String, retryable: bool },

    #[error("request cancelled or deadline exceeded")]
    Cancelled,
}

impl StoreError {
    /// Whether the same call may be retried as-is.
    ///
    /// Create persistence failures are not retryable: the write may have
    /// landed and a retry would mint a second record. Mutation audit
    /// failures are not retryable either; only reads may be re-issued.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict(_) | StoreError::Cancelled => true,
            StoreError::AuditWriteFailed { retryable, .. }
            | StoreError::Persistence { retryable, .. } => *retryable,
            StoreError::Validation(_)
            | StoreError::NotFound(_)
            | StoreError::AccessDenied(_)
            | StoreError::Integrity(_)
            | StoreError::KeyNotFound(_) => false,
        }
    }

    fn persistence(e: impl std::fmt::Display, retryable: bool) -> Self {
        StoreError::Persistence {
            detail: e.to_string(),
            retryable,
        }
    }

    fn from_storage(e: StorageError, retryable: bool) -> Self {
        match e {
            StorageError::NotFound(what) => StoreError::NotFound(what),
            StorageError::AlreadyExists(what) => StoreError::Conflict(format!("{what} already exists")),
            StorageError::VersionConflict {
                record_id,
                expected,
                found,
            } => StoreError::Conflict(format!(
                "record {record_id} changed concurrently (expected version {expected}, found {found})"
            )),
            other => StoreError::persistence(other, retryable),
        }
    }

    fn from_crypto(e: CryptoError, record_id: &str) -> Self {
        match e {
            CryptoError::KeyNotFound(key_id) => StoreError::KeyNotFound(key_id),
            CryptoError::NoActiveKey => StoreError::KeyNotFound("no active key".to_string()),
            CryptoError::Integrity(_) => StoreError::Integrity(record_id.to_string()),
            CryptoError::InvalidKeyMaterial(msg) | CryptoError::Rejected(msg) => {
                StoreError::Validation(msg)
            }
            CryptoError::Crypto(msg) => StoreError::persistence(msg, false),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Request Context
// =============================================================================

/// Per-request caller identity, origin and lifetime.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: Actor,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            ip: None,
            user_agent: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_origin(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Neither cancelled nor past the deadline.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.deadline.is_none_or(|d| Instant::now() < d)
    }

    /// Resolves once the request is cancelled or its deadline passes.
    async fn interrupted(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => self.cancel.cancelled().await,
        }
    }

    fn entry(&self, action: AuditAction, resource: &impl Auditable) -> AuditEntry {
        AuditEntry::for_resource(action, resource, self.actor.id.clone())
            .with_origin(self.ip.clone(), self.user_agent.clone())
    }
}

// =============================================================================
// Results
// =============================================================================

/// A note opened for one caller. Never persisted.
#[derive(Clone)]
pub struct DecryptedNote {
    pub record: SensitiveRecord,
    pub plaintext: String,
}

impl std::fmt::Debug for DecryptedNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedNote")
            .field("record_id", &self.record.record_id)
            .field("plaintext", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of an archive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The record went from active to archived.
    Archived,
    /// The record was already archived; nothing was written.
    AlreadyArchived,
}

// =============================================================================
// SecureRecordStore
// =============================================================================

/// Orchestrates policy, encryption, persistence and audit for notes.
pub struct SecureRecordStore {
    records: Arc<dyn RecordStore>,
    crypto: Arc<EncryptionService>,
    recorder: Arc<AuditTrailRecorder>,
    contexts: Arc<dyn ContextResolver>,
    telemetry: Arc<dyn SecurityTelemetry>,
    policy: AccessPolicy,
    min_reason_len: usize,
    /// Shared by sealing writes, exclusive for key revocation.
    sealing: RwLock<()>,
}

impl SecureRecordStore {
    pub fn new(
        records: Arc<dyn RecordStore>,
        crypto: Arc<EncryptionService>,
        recorder: Arc<AuditTrailRecorder>,
        contexts: Arc<dyn ContextResolver>,
        telemetry: Arc<dyn SecurityTelemetry>,
    ) -> Self {
        Self {
            records,
            crypto,
            recorder,
            contexts,
            telemetry,
            policy: AccessPolicy,
            min_reason_len: DEFAULT_MIN_REASON_LEN,
            sealing: RwLock::new(()),
        }
    }

    pub fn with_min_reason_len(mut self, min_reason_len: usize) -> Self {
        self.min_reason_len = min_reason_len.max(1);
        self
    }

    pub fn key_ring(&self) -> &Arc<KeyRing> {
        self.crypto.key_ring()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Write a new note for a context. Returns the new record id.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        context_ref: &str,
        plaintext: &str,
        reason: &str,
    ) -> StoreResult<String> {
        let reason = self.check_reason(reason)?;
        if plaintext.is_empty() {
            return Err(StoreError::Validation("note content must not be empty".to_string()));
        }

        if let Decision::Deny(why) = self.policy.evaluate_create(&ctx.actor) {
            let entry = AuditEntry::new(
                AuditAction::AccessDenied,
                ResourceType::ClinicalNote,
                context_ref,
                ctx.actor.id.clone(),
            )
            .with_origin(ctx.ip.clone(), ctx.user_agent.clone())
            .with_reason(reason);
            return Err(self.deny(ctx, entry, why).await);
        }

        let binding = self
            .contexts
            .resolve_context(context_ref)
            .ok_or_else(|| StoreError::Validation(format!("unknown context {context_ref}")))?;
        if binding.author_id != ctx.actor.id {
            return Err(StoreError::Validation(format!(
                "caller is not the author bound to context {context_ref}"
            )));
        }

        let sealing = self.sealing.read().await;
        let payload = self
            .crypto
            .encrypt(plaintext)
            .map_err(|e| StoreError::from_crypto(e, context_ref))?;
        let record = SensitiveRecord::new(
            Uuid::new_v4().to_string(),
            binding.subject_id,
            ctx.actor.id.clone(),
            context_ref,
            payload,
        );

        let records = self.records.clone();
        let to_insert = record.clone();
        self.write(ctx, move || records.insert(&to_insert))
            .await?
            .map_err(|e| StoreError::from_storage(e, false))?;
        drop(sealing);

        let entry = ctx
            .entry(AuditAction::Created, &record)
            .with_reason(reason)
            .with_values(None, Some(self.recorder.mask_content(plaintext)));
        self.audit_mutation(ctx, entry).await?;

        info!(
            record_id = %record.record_id,
            context_id = %record.context_id,
            actor_id = %ctx.actor.id,
            key_id = %record.payload.key_id,
            "Clinical note created"
        );
        Ok(record.record_id)
    }

    /// Open one note. Every successful call is audited.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        record_id: &str,
        reason: &str,
    ) -> StoreResult<DecryptedNote> {
        let reason = self.check_reason(reason)?;
        let record = self.load(ctx, record_id).await?;

        if let Decision::Deny(why) = self.policy.evaluate(&ctx.actor, &record, NoteAction::Get) {
            let entry = ctx.entry(AuditAction::AccessDenied, &record).with_reason(reason);
            return Err(self.deny(ctx, entry, why).await);
        }

        let plaintext = self.open(&record)?;
        if !ctx.is_live() {
            return Err(StoreError::Cancelled);
        }

        let entry = ctx.entry(AuditAction::Accessed, &record).with_reason(reason);
        self.audit_access(vec![entry]).await?;

        Ok(DecryptedNote { record, plaintext })
    }

    /// Replace a note body, re-encrypting under the current active key.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        record_id: &str,
        new_plaintext: &str,
        reason: &str,
    ) -> StoreResult<()> {
        let reason = self.check_reason(reason)?;
        if new_plaintext.is_empty() {
            return Err(StoreError::Validation("note content must not be empty".to_string()));
        }

        let current = self.load(ctx, record_id).await?;
        if let Decision::Deny(why) = self.policy.evaluate(&ctx.actor, &current, NoteAction::Update) {
            let entry = ctx.entry(AuditAction::AccessDenied, &current).with_reason(reason);
            return Err(self.deny(ctx, entry, why).await);
        }

        // Old plaintext is only needed for the masked audit value
        let old_plaintext = self.open(&current)?;
        let sealing = self.sealing.read().await;
        let payload = self
            .crypto
            .encrypt(new_plaintext)
            .map_err(|e| StoreError::from_crypto(e, record_id))?;
        let next = current.with_payload(payload);

        let records = self.records.clone();
        let expected = current.version;
        let to_write = next.clone();
        self.write(ctx, move || records.compare_and_swap(&to_write, expected))
            .await?
            .map_err(|e| {
                if matches!(e, StorageError::VersionConflict { .. }) {
                    warn!(record_id = %record_id, actor_id = %ctx.actor.id, "Concurrent update lost");
                }
                StoreError::from_storage(e, true)
            })?;
        drop(sealing);

        let entry = ctx.entry(AuditAction::Updated, &next).with_reason(reason).with_values(
            Some(self.recorder.mask_content(&old_plaintext)),
            Some(self.recorder.mask_content(new_plaintext)),
        );
        self.audit_mutation(ctx, entry).await?;

        info!(
            record_id = %record_id,
            actor_id = %ctx.actor.id,
            version = next.version,
            key_id = %next.payload.key_id,
            "Clinical note updated"
        );
        Ok(())
    }

    /// Archive a note. Archiving an archived note is a no-op.
    pub async fn archive(
        &self,
        ctx: &RequestContext,
        record_id: &str,
        reason: &str,
    ) -> StoreResult<ArchiveOutcome> {
        let reason = self.check_reason(reason)?;
        let current = self.load(ctx, record_id).await?;

        if let Decision::Deny(why) = self.policy.evaluate(&ctx.actor, &current, NoteAction::Archive) {
            let entry = ctx.entry(AuditAction::AccessDenied, &current).with_reason(reason);
            return Err(self.deny(ctx, entry, why).await);
        }
        if current.is_archived {
            return Ok(ArchiveOutcome::AlreadyArchived);
        }

        let next = current.archived();
        let records = self.records.clone();
        let expected = current.version;
        let to_write = next.clone();
        let written = self
            .write(ctx, move || records.compare_and_swap(&to_write, expected))
            .await?;

        match written {
            Ok(()) => {}
            Err(StorageError::VersionConflict { .. }) => {
                // A concurrent archive makes this call the idempotent no-op
                let latest = self.load(ctx, record_id).await?;
                if latest.is_archived {
                    return Ok(ArchiveOutcome::AlreadyArchived);
                }
                return Err(StoreError::Conflict(format!(
                    "record {record_id} changed concurrently"
                )));
            }
            Err(e) => return Err(StoreError::from_storage(e, true)),
        }

        let entry = ctx.entry(AuditAction::Archived, &next).with_reason(reason);
        self.audit_mutation(ctx, entry).await?;

        info!(record_id = %record_id, actor_id = %ctx.actor.id, "Clinical note archived");
        Ok(ArchiveOutcome::Archived)
    }

    /// Open every note of a context the caller may read.
    ///
    /// Denied records are security-logged and omitted; records that fail to
    /// decrypt are reported to telemetry and omitted.
    pub async fn batch_get_by_context(
        &self,
        ctx: &RequestContext,
        context_ref: &str,
        reason: &str,
    ) -> StoreResult<Vec<DecryptedNote>> {
        let reason = self.check_reason(reason)?;
        if self.contexts.resolve_context(context_ref).is_none() {
            return Err(StoreError::NotFound(format!("context {context_ref}")));
        }

        let records = self.records.clone();
        let context = context_ref.to_string();
        let found = self
            .read(ctx, move || records.list_by_context(&context))
            .await?;
        self.open_batch(ctx, found, reason).await
    }

    /// Open one page of a subject's notes the caller may read.
    pub async fn batch_get_by_subject(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        reason: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<DecryptedNote>> {
        let reason = self.check_reason(reason)?;
        if limit == 0 || limit > MAX_BATCH_LIMIT {
            return Err(StoreError::Validation(format!(
                "limit must be between 1 and {MAX_BATCH_LIMIT}"
            )));
        }

        let records = self.records.clone();
        let subject = subject_id.to_string();
        let found = self
            .read(ctx, move || records.list_by_subject(&subject, limit, offset))
            .await?;
        self.open_batch(ctx, found, reason).await
    }

    // -------------------------------------------------------------------------
    // Key administration
    // -------------------------------------------------------------------------

    /// Number of records still sealed under `key_id`.
    pub async fn key_usage(&self, key_id: &str) -> StoreResult<usize> {
        let records = self.records.clone();
        let key_id = key_id.to_string();
        run_blocking(move || records.count_by_key(&key_id))
            .await?
            .map_err(|e| StoreError::from_storage(e, true))
    }

    /// Install a new active key; the previous one is retired.
    pub async fn rotate_key(
        &self,
        ctx: &RequestContext,
        key_id: &str,
        material: &[u8],
    ) -> StoreResult<()> {
        self.key_ring()
            .rotate(key_id, material)
            .map_err(|e| StoreError::from_crypto(e, key_id))?;

        warn!(actor_id = %ctx.actor.id, key_id = %key_id, "Active note key rotated");
        self.audit_mutation(ctx, key_admin_entry(ctx, AuditAction::Created, key_id, "key_rotated"))
            .await
    }

    /// Revoke a retired key that no record references any more.
    pub async fn revoke_key(&self, ctx: &RequestContext, key_id: &str) -> StoreResult<()> {
        // Waits out every write that may still seal under this key
        let _sealing = self.sealing.write().await;
        let in_use = self.key_usage(key_id).await?;
        if in_use > 0 {
            return Err(StoreError::Conflict(format!(
                "key {key_id} still protects {in_use} record(s)"
            )));
        }
        self.key_ring()
            .revoke(key_id)
            .map_err(|e| StoreError::from_crypto(e, key_id))?;

        warn!(actor_id = %ctx.actor.id, key_id = %key_id, "Note key revoked");
        self.audit_mutation(ctx, key_admin_entry(ctx, AuditAction::Archived, key_id, "key_revoked"))
            .await
    }

    pub fn describe_keys(&self) -> StoreResult<Vec<KeyInfo>> {
        self.key_ring()
            .describe()
            .map_err(|e| StoreError::from_crypto(e, "key ring"))
    }

    /// Point lookup that proves the record store answers.
    pub async fn ping_storage(&self) -> StoreResult<()> {
        let records = self.records.clone();
        run_blocking(move || records.get(STORAGE_PROBE_ID))
            .await?
            .map(|_| ())
            .map_err(|e| StoreError::from_storage(e, true))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn check_reason<'a>(&self, reason: &'a str) -> StoreResult<&'a str> {
        let reason = reason.trim();
        if reason.chars().count() < self.min_reason_len {
            return Err(StoreError::Validation(format!(
                "access reason must be at least {} characters",
                self.min_reason_len
            )));
        }
        Ok(reason)
    }

    async fn load(&self, ctx: &RequestContext, record_id: &str) -> StoreResult<SensitiveRecord> {
        let records = self.records.clone();
        let id = record_id.to_string();
        self.read(ctx, move || records.get(&id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))
    }

    /// Blocking read that gives up when the request is interrupted.
    async fn read<T, F>(&self, ctx: &RequestContext, f: F) -> StoreResult<T>
    where
        F: FnOnce() -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        if !ctx.is_live() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = ctx.interrupted() => Err(StoreError::Cancelled),
            result = run_blocking(f) => result?.map_err(|e| StoreError::from_storage(e, true)),
        }
    }

    /// Blocking write. Refuses to start on a dead request, never abandoned once started.
    async fn write<F>(&self, ctx: &RequestContext, f: F) -> StoreResult<Result<(), StorageError>>
    where
        F: FnOnce() -> Result<(), StorageError> + Send + 'static,
    {
        if !ctx.is_live() {
            return Err(StoreError::Cancelled);
        }
        run_blocking(f).await
    }

    fn open(&self, record: &SensitiveRecord) -> StoreResult<String> {
        self.crypto.decrypt(&record.payload).map_err(|e| {
            match &e {
                CryptoError::Integrity(detail) => {
                    error!(
                        record_id = %record.record_id,
                        key_id = %record.payload.key_id,
                        detail = %detail,
                        "Stored note failed integrity check"
                    );
                    self.telemetry.emit(SecurityEvent::integrity_failure(
                        &record.record_id,
                        &record.payload.key_id,
                        detail,
                    ));
                }
                CryptoError::KeyNotFound(key_id) => {
                    error!(record_id = %record.record_id, key_id = %key_id, "Note key unavailable");
                    self.telemetry.emit(SecurityEvent::integrity_failure(
                        &record.record_id,
                        key_id,
                        "key not found",
                    ));
                }
                _ => {}
            }
            StoreError::from_crypto(e, &record.record_id)
        })
    }

    async fn open_batch(
        &self,
        ctx: &RequestContext,
        records: Vec<SensitiveRecord>,
        reason: &str,
    ) -> StoreResult<Vec<DecryptedNote>> {
        let mut opened = Vec::with_capacity(records.len());
        for record in records {
            if let Decision::Deny(why) = self.policy.evaluate(&ctx.actor, &record, NoteAction::Get) {
                let entry = ctx.entry(AuditAction::AccessDenied, &record).with_reason(reason);
                self.deny(ctx, entry, why).await;
                continue;
            }
            match self.open(&record) {
                Ok(plaintext) => opened.push(DecryptedNote { record, plaintext }),
                Err(e) => {
                    warn!(record_id = %record.record_id, error = %e, "Omitting unreadable note from batch");
                }
            }
        }

        if !ctx.is_live() {
            return Err(StoreError::Cancelled);
        }

        let entries = opened
            .iter()
            .map(|note| {
                ctx.entry(AuditAction::Accessed, &note.record)
                    .with_reason(reason)
                    .with_detail("batch")
            })
            .collect();
        self.audit_access(entries).await?;
        Ok(opened)
    }

    /// Security-log a denial, report it, and build the caller's error.
    async fn deny(&self, ctx: &RequestContext, entry: AuditEntry, why: DenyReason) -> StoreError {
        warn!(
            actor_id = %ctx.actor.id,
            resource_id = %entry.resource_id,
            reason = %why,
            "Access denied"
        );
        self.telemetry
            .emit(SecurityEvent::access_denied(&ctx.actor.id, &entry.resource_id, why.as_str()));

        let recorder = self.recorder.clone();
        let entry = entry.with_detail(why.as_str());
        if let Err(e) = run_blocking(move || recorder.record_security(&entry)).await {
            error!(error = %e, "Security log task failed");
        }
        StoreError::AccessDenied(why)
    }

    /// Audit reads. Nothing is returned to the caller unless every entry lands.
    async fn audit_access(&self, entries: Vec<AuditEntry>) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let recorder = self.recorder.clone();
        run_blocking(move || {
            for entry in &entries {
                recorder.record(entry)?;
            }
            Ok::<_, crate::audit::AuditError>(())
        })
        .await
        .map_err(|e| StoreError::AuditWriteFailed {
            detail: e.to_string(),
            retryable: true,
        })?
        .map_err(|e| {
            error!(error = %e, "Audit write failed; withholding plaintext");
            StoreError::AuditWriteFailed {
                detail: e.to_string(),
                retryable: true,
            }
        })
    }

    /// Audit a persisted mutation, retrying the append while the request is live.
    async fn audit_mutation(&self, ctx: &RequestContext, entry: AuditEntry) -> StoreResult<()> {
        let mut outcome = "request ended before the audit write".to_string();

        for attempt in 1..=AUDIT_WRITE_ATTEMPTS {
            if !ctx.is_live() {
                break;
            }
            let recorder = self.recorder.clone();
            let pending = entry.clone();
            outcome = match run_blocking(move || recorder.record(&pending)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            if attempt < AUDIT_WRITE_ATTEMPTS {
                warn!(
                    resource_id = %entry.resource_id,
                    action = %entry.action,
                    attempt,
                    error = %outcome,
                    "Audit write failed; retrying"
                );
                tokio::time::sleep(AUDIT_RETRY_BACKOFF * attempt).await;
            }
        }

        error!(
            resource_id = %entry.resource_id,
            actor_id = %ctx.actor.id,
            action = %entry.action,
            error = %outcome,
            "Mutation persisted without audit entry"
        );
        self.telemetry.emit(SecurityEvent::unaudited_mutation(
            &ctx.actor.id,
            &entry.resource_id,
            entry.action.to_string(),
        ));
        Err(StoreError::AuditWriteFailed {
            detail: outcome,
            retryable: false,
        })
    }
}

fn key_admin_entry(ctx: &RequestContext, action: AuditAction, key_id: &str, what: &str) -> AuditEntry {
    AuditEntry::new(action, ResourceType::AdminAction, key_id, ctx.actor.id.clone())
        .with_origin(ctx.ip.clone(), ctx.user_agent.clone())
        .with_reason(KEY_ADMIN_REASON)
        .with_detail(what)
}

/// Run a blocking closure on the blocking pool.
async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::persistence(format!("blocking task failed: {e}"), true))
}
