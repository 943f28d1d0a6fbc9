// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only, paginated access to the audit log.
//!
//! Never touches the encryption service: entries only ever hold masked values.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{AuditAction, AuditEntry, AuditError, ResourceType};
use crate::storage::AuditStore;

/// Default number of entries per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Maximum number of entries per page.
pub const MAX_PAGE_SIZE: usize = 500;

/// Which slice of the log to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditTarget {
    /// Trail of one resource.
    Resource {
        resource_type: ResourceType,
        resource_id: String,
    },
    /// Everything one actor did.
    Actor(String),
    /// Denied access attempts.
    SecurityLog,
}

impl AuditTarget {
    /// Trail of one clinical note.
    pub fn record(record_id: impl Into<String>) -> Self {
        Self::Resource {
            resource_type: ResourceType::ClinicalNote,
            resource_id: record_id.into(),
        }
    }
}

/// A list request. Pages are 1-based.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub target: AuditTarget,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub page_size: usize,
}

impl AuditQuery {
    pub fn new(target: AuditTarget) -> Self {
        Self {
            target,
            action: None,
            from: None,
            to: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn validate(&self) -> Result<(), AuditError> {
        if self.page == 0 {
            return Err(AuditError::Invalid("page starts at 1".to_string()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(AuditError::Invalid(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AuditError::Invalid("from must not be after to".to_string()));
            }
        }
        Ok(())
    }

    fn admits(&self, entry: &AuditEntry) -> bool {
        self.action.is_none_or(|a| entry.action == a)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}

/// One page of results, oldest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Matching entries across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// Paginated audit log reader.
#[derive(Clone)]
pub struct AuditQueryService {
    store: Arc<dyn AuditStore>,
}

impl AuditQueryService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: AuditQuery) -> Result<AuditPage, AuditError> {
        query.validate()?;

        let store = self.store.clone();
        let target = query.target.clone();
        let entries = tokio::task::spawn_blocking(move || match target {
            AuditTarget::Resource {
                resource_type,
                resource_id,
            } => store.entries_for_resource(resource_type, &resource_id),
            AuditTarget::Actor(actor_id) => store.entries_for_actor(&actor_id),
            AuditTarget::SecurityLog => store.security_entries(),
        })
        .await
        .map_err(|e| AuditError::Task(e.to_string()))??;

        let matching: Vec<AuditEntry> = entries.into_iter().filter(|e| query.admits(e)).collect();
        let total = matching.len();
        let offset = (query.page - 1).saturating_mul(query.page_size);
        let has_more = offset.saturating_add(query.page_size) < total;
        let entries = matching
            .into_iter()
            .skip(offset)
            .take(query.page_size)
            .collect();

        Ok(AuditPage {
            entries,
            total,
            page: query.page,
            page_size: query.page_size,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn seeded() -> AuditQueryService {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..7 {
            let action = if i == 0 {
                AuditAction::Created
            } else {
                AuditAction::Accessed
            };
            backend
                .append(
                    &AuditEntry::new(action, ResourceType::ClinicalNote, "r1", "p1")
                        .with_reason("routine review"),
                )
                .unwrap();
        }
        backend
            .append(
                &AuditEntry::new(AuditAction::Created, ResourceType::ClinicalNote, "r2", "d1")
                    .with_reason("initial consult"),
            )
            .unwrap();
        backend
            .append_security(
                &AuditEntry::new(AuditAction::AccessDenied, ResourceType::ClinicalNote, "r1", "x")
                    .with_detail("not_participant"),
            )
            .unwrap();
        AuditQueryService::new(backend)
    }

    #[tokio::test]
    async fn lists_record_trail_in_pages() {
        let service = seeded();

        let first = service
            .list(AuditQuery::new(AuditTarget::record("r1")).page(1, 3))
            .await
            .unwrap();
        assert_eq!(first.total, 7);
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.entries[0].action, AuditAction::Created);

        let last = service
            .list(AuditQuery::new(AuditTarget::record("r1")).page(3, 3))
            .await
            .unwrap();
        assert_eq!(last.entries.len(), 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn filters_by_action() {
        let service = seeded();
        let page = service
            .list(AuditQuery::new(AuditTarget::record("r1")).with_action(AuditAction::Accessed))
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert!(page.entries.iter().all(|e| e.action == AuditAction::Accessed));
    }

    #[tokio::test]
    async fn filters_by_date_range() {
        let service = seeded();
        let future = Utc::now() + chrono::Duration::hours(1);
        let page = service
            .list(AuditQuery::new(AuditTarget::Actor("p1".into())).between(Some(future), None))
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        let past = Utc::now() - chrono::Duration::hours(1);
        let page = service
            .list(AuditQuery::new(AuditTarget::Actor("p1".into())).between(Some(past), Some(future)))
            .await
            .unwrap();
        assert_eq!(page.total, 7);
    }

    #[tokio::test]
    async fn security_log_is_its_own_target() {
        let service = seeded();
        let page = service
            .list(AuditQuery::new(AuditTarget::SecurityLog))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].action, AuditAction::AccessDenied);
    }

    #[tokio::test]
    async fn rejects_bad_paging() {
        let service = seeded();
        for query in [
            AuditQuery::new(AuditTarget::record("r1")).page(0, 10),
            AuditQuery::new(AuditTarget::record("r1")).page(1, 0),
            AuditQuery::new(AuditTarget::record("r1")).page(1, MAX_PAGE_SIZE + 1),
            AuditQuery::new(AuditTarget::record("r1"))
                .between(Some(Utc::now()), Some(Utc::now() - chrono::Duration::days(1))),
        ] {
            assert!(matches!(service.list(query).await, Err(AuditError::Invalid(_))));
        }
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let service = seeded();
        let page = service
            .list(AuditQuery::new(AuditTarget::record("r2")).page(5, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.entries.is_empty());
        assert!(!page.has_more);
    }
}
