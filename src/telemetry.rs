// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security telemetry sinks.
//!
//! Denied access and integrity failures are always reported here in
//! addition to whatever the caller sees. Emitting must never block a
//! request, so every sink is fire-and-forget.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// A security-relevant event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecurityEvent {
    AccessDenied {
        actor_id: String,
        record_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    IntegrityFailure {
        record_id: String,
        key_id: String,
        detail: String,
        at: DateTime<Utc>,
    },
    /// A mutation was persisted but its audit entry could not be written.
    UnauditedMutation {
        actor_id: String,
        record_id: String,
        action: String,
        at: DateTime<Utc>,
    },
}

impl SecurityEvent {
    pub fn access_denied(
        actor_id: impl Into<String>,
        record_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::AccessDenied {
            actor_id: actor_id.into(),
            record_id: record_id.into(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn integrity_failure(
        record_id: impl Into<String>,
        key_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::IntegrityFailure {
            record_id: record_id.into(),
            key_id: key_id.into(),
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn unaudited_mutation(
        actor_id: impl Into<String>,
        record_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::UnauditedMutation {
            actor_id: actor_id.into(),
            record_id: record_id.into(),
            action: action.into(),
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget security event sink.
pub trait SecurityTelemetry: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Writes events to the `security` tracing target.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl SecurityTelemetry for TracingTelemetry {
    fn emit(&self, event: SecurityEvent) {
        match &event {
            SecurityEvent::AccessDenied {
                actor_id,
                record_id,
                reason,
                ..
            } => tracing::warn!(
                target: "security",
                actor_id = %actor_id,
                record_id = %record_id,
                reason = %reason,
                "Access denied"
            ),
            SecurityEvent::IntegrityFailure {
                record_id,
                key_id,
                detail,
                ..
            } => tracing::error!(
                target: "security",
                record_id = %record_id,
                key_id = %key_id,
                detail = %detail,
                "Integrity check failed"
            ),
            SecurityEvent::UnauditedMutation {
                actor_id,
                record_id,
                action,
                ..
            } => tracing::error!(
                target: "security",
                actor_id = %actor_id,
                record_id = %record_id,
                action = %action,
                "Mutation persisted without audit entry"
            ),
        }
    }
}

/// Forwards events to a bounded channel; drops them when it is full.
pub struct ChannelTelemetry {
    tx: mpsc::Sender<SecurityEvent>,
}

impl ChannelTelemetry {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SecurityTelemetry for ChannelTelemetry {
    fn emit(&self, event: SecurityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "Security telemetry event dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl SecurityTelemetry for MemoryTelemetry {
    fn emit(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
