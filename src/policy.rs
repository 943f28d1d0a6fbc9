// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access policy for clinical notes.
//!
//! Pure decision logic with no I/O. Rules are evaluated in order and the
//! first match wins:
//!
//! | # | Condition                                        | Result                  |
//! |---|--------------------------------------------------|-------------------------|
//! | a | actor is inactive                                | Deny(`actor_inactive`)  |
//! | b | Update / Archive and actor is not the author     | Deny(`not_author`)      |
//! | c | Get and actor is neither subject nor author      | Deny(`not_participant`) |
//! | d | Update on an archived record                     | Deny(`archived`)        |
//! | - | otherwise                                        | Allow                   |

use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::Actor;
use crate::storage::SensitiveRecord;

/// Operation being attempted on an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    Get,
    Update,
    Archive,
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    ActorInactive,
    NotAuthor,
    NotParticipant,
    Archived,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::ActorInactive => "actor_inactive",
            DenyReason::NotAuthor => "not_author",
            DenyReason::NotParticipant => "not_participant",
            DenyReason::Archived => "archived",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decides whether an actor may perform an action on a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn evaluate(&self, actor: &Actor, record: &SensitiveRecord, action: NoteAction) -> Decision {
        if !actor.is_active {
            return Decision::Deny(DenyReason::ActorInactive);
        }

        match action {
            NoteAction::Update | NoteAction::Archive if !record.is_author(&actor.id) => {
                Decision::Deny(DenyReason::NotAuthor)
            }
            NoteAction::Get if !record.is_participant(&actor.id) => {
                Decision::Deny(DenyReason::NotParticipant)
            }
            NoteAction::Update if record.is_archived => Decision::Deny(DenyReason::Archived),
            _ => Decision::Allow,
        }
    }

    /// Create has no record yet; only the actor's own state matters.
    pub fn evaluate_create(&self, actor: &Actor) -> Decision {
        if actor.is_active {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::ActorInactive)
        }
    }
}
