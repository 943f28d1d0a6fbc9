// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Notes Vault - Encrypted Clinical Note Service
//!
//! Stores clinical notes encrypted at rest and records an append-only audit
//! entry for every access. A note is only ever returned in plaintext after
//! the access policy allowed it and its audit entry was written.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `audit` - Audit trail, masking and audit queries
//! - `auth` - Bearer token resolution and roles
//! - `crypto` - Key ring and AES-256-GCM note encryption
//! - `policy` - Access decisions for note operations
//! - `storage` - Record and audit persistence (memory, redb)
//! - `store` - The secure record store tying the above together

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod models;
pub mod policy;
pub mod state;
pub mod storage;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;
