// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Actor roles for authorization.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Actor roles.
///
/// ## Role Hierarchy
///
/// - `Admin` - Operator access, including audit queries and key administration
/// - `Doctor` - Writes notes for their own appointments
/// - `Patient` - Reads notes written about them
/// - `Auditor` - Read-only access to audit logs
///
/// Roles never grant access to a note body on their own. Note access is
/// decided per record by the access policy from authorship and subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
    Auditor,
}

impl Role {
    /// Check if this role has at least the privileges of the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (a, b) => *a == b,
        }
    }

    /// Whether this role may read the audit and security logs.
    pub fn can_read_audit(&self) -> bool {
        self.has_privilege(Role::Auditor)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::Patient => write!(f, "patient"),
            Role::Auditor => write!(f, "auditor"),
        }
    }
}
