// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::MaskedValue;

/// What happened to the resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Accessed,
    Updated,
    Archived,
    AccessDenied,
}

impl AuditAction {
    /// Every action except `AccessDenied` must carry an access reason.
    pub fn requires_reason(self) -> bool {
        !matches!(self, AuditAction::AccessDenied)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Created => "created",
            AuditAction::Accessed => "accessed",
            AuditAction::Updated => "updated",
            AuditAction::Archived => "archived",
            AuditAction::AccessDenied => "access_denied",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(AuditAction::Created),
            "accessed" => Ok(AuditAction::Accessed),
            "updated" => Ok(AuditAction::Updated),
            "archived" => Ok(AuditAction::Archived),
            "access_denied" => Ok(AuditAction::AccessDenied),
            _ => Err(format!("Unknown audit action: {s}")),
        }
    }
}

/// Kind of resource an entry refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    ClinicalNote,
    Appointment,
    Payment,
    VideoSession,
    AdminAction,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::ClinicalNote => "clinical_note",
            ResourceType::Appointment => "appointment",
            ResourceType::Payment => "payment",
            ResourceType::VideoSession => "video_session",
            ResourceType::AdminAction => "admin_action",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the audit trail can point at.
pub trait Auditable {
    fn resource_type(&self) -> ResourceType;
    fn resource_id(&self) -> &str;
}

/// One immutable record of one action.
///
/// Entries are built once, appended once, and never touched again. The
/// `sequence` field is assigned by the audit store at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    /// Unique entry ID (UUID v4).
    pub entry_id: String,
    /// Position in the log, assigned on append.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub actor_id: String,
    /// Why the actor touched the resource.
    pub access_reason: Option<String>,
    pub old_value_masked: Option<MaskedValue>,
    pub new_value_masked: Option<MaskedValue>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Free-form detail, e.g. the deny reason on security-log entries.
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            timestamp: Utc::now(),
            action,
            resource_type,
            resource_id: resource_id.into(),
            actor_id: actor_id.into(),
            access_reason: None,
            old_value_masked: None,
            new_value_masked: None,
            ip: None,
            user_agent: None,
            detail: None,
        }
    }

    /// Entry pointing at an [`Auditable`] resource.
    pub fn for_resource(
        action: AuditAction,
        resource: &impl Auditable,
        actor_id: impl Into<String>,
    ) -> Self {
        Self::new(action, resource.resource_type(), resource.resource_id(), actor_id)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.access_reason = Some(reason.into());
        self
    }

    /// Set the request origin.
    pub fn with_origin(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn with_values(mut self, old: Option<MaskedValue>, new: Option<MaskedValue>) -> Self {
        self.old_value_masked = old;
        self.new_value_masked = new;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
