// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::audit::{AuditQueryService, AuditTrailRecorder, Masker};
use crate::auth::{Actor, Role};
use crate::context::StaticContextResolver;
use crate::crypto::{EncryptionService, KeyRing, ROOT_KEY_LEN};
use crate::storage::{AuditStore, MemoryBackend, RecordStore};
use crate::store::{RequestContext, SecureRecordStore};
use crate::telemetry::MemoryTelemetry;

pub const NOTE: &str = "Patient reports improved mood.";
pub const REASON: &str = "initial consultation";

pub struct Fixture {
    pub store: Arc<SecureRecordStore>,
    pub backend: Arc<MemoryBackend>,
    pub telemetry: Arc<MemoryTelemetry>,
    pub audit: AuditQueryService,
}

pub fn key_ring() -> Arc<KeyRing> {
    let keys = KeyRing::new();
    keys.rotate("k1", &[7u8; ROOT_KEY_LEN])
        .expect("install test key");
    Arc::new(keys)
}

pub fn contexts() -> StaticContextResolver {
    StaticContextResolver::new()
        .with_binding("appt-1", "patient-1", "doctor-1")
        .with_binding("appt-2", "patient-2", "doctor-2")
        .with_binding("appt-3", "patient-1", "doctor-1")
}

/// Store wired to explicit backends.
pub fn build_store(
    records: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditStore>,
    telemetry: Arc<MemoryTelemetry>,
) -> SecureRecordStore {
    let masker = Masker::new(&[5u8; 32]).expect("masking key");
    SecureRecordStore::new(
        records,
        Arc::new(EncryptionService::new(key_ring())),
        Arc::new(AuditTrailRecorder::new(audit, masker)),
        Arc::new(contexts()),
        telemetry,
    )
}

pub fn fixture() -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    let telemetry = Arc::new(MemoryTelemetry::new());
    let store = build_store(backend.clone(), backend.clone(), telemetry.clone());
    Fixture {
        store: Arc::new(store),
        audit: AuditQueryService::new(backend.clone()),
        backend,
        telemetry,
    }
}

pub fn doctor() -> Actor {
    Actor::new("doctor-1", Role::Doctor)
}

pub fn patient() -> Actor {
    Actor::new("patient-1", Role::Patient)
}

pub fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

pub fn stranger() -> Actor {
    Actor::new("user-9", Role::Patient)
}

pub fn ctx(actor: Actor) -> RequestContext {
    RequestContext::new(actor).with_origin(
        Some("203.0.113.7".to_string()),
        Some("clinic-app/2.1".to_string()),
    )
}
