// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Resolves the caller of every `/v1` request to an [`Actor`].
//!
//! ## Auth Flow
//!
//! 1. The client sends `Authorization: Bearer <token>`
//! 2. The [`Auth`] extractor hands the token to the configured
//!    [`IdentityProvider`], which returns `{id, role, is_active}`
//! 3. Handlers pass the actor to the record store, where the access policy
//!    makes the per-record decision
//!
//! Role checks here are coarse (audit endpoints need `auditor` or `admin`,
//! key administration needs `admin`).
//! Note access never depends on role alone.

pub mod actor;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod roles;

pub use actor::Actor;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, AuditorOnly, RequestMeta};
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use roles::Role;
