// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::audit::AuditQueryService;
use crate::auth::IdentityProvider;
use crate::store::SecureRecordStore;

/// Default per-operation deadline for HTTP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SecureRecordStore>,
    pub audit: AuditQueryService,
    pub identity: Arc<dyn IdentityProvider>,
    pub request_timeout: Duration,
    /// Store operations still running, awaited on shutdown.
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        store: Arc<SecureRecordStore>,
        audit: AuditQueryService,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            audit,
            identity,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// State over the shared test fixture, with one token per test actor.
#[cfg(test)]
pub fn test_state_for(fx: &crate::testing::Fixture) -> AppState {
    use crate::auth::{Actor, Role, StaticIdentityProvider};
    use crate::testing::{admin, doctor, patient, stranger};

    let identity = StaticIdentityProvider::default()
        .with_token("tok-doctor", doctor())
        .with_token("tok-patient", patient())
        .with_token("tok-stranger", stranger())
        .with_token("tok-auditor", Actor::new("auditor-1", Role::Auditor))
        .with_token("tok-admin", admin());

    AppState::new(fx.store.clone(), fx.audit.clone(), Arc::new(identity))
}

#[cfg(test)]
pub fn test_state() -> AppState {
    test_state_for(&crate::testing::fixture())
}
