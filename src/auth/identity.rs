// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity collaborator: bearer token → actor.
//!
//! The service does not manage sessions itself. Deployments without an
//! identity service can use [`StaticIdentityProvider`], loaded from a JSON
//! file mapping opaque tokens to actors:
//!
//! ```json
//! {
//!   "tok-doctor-1": { "id": "doctor-1", "role": "doctor" },
//!   "tok-patient-1": { "id": "patient-1", "role": "patient", "is_active": true }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use super::{Actor, AuthError};

/// Resolves bearer tokens to actors.
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for unknown tokens.
    fn get_actor(&self, token: &str) -> Result<Option<Actor>, AuthError>;
}

/// Fixed token table.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    actors: HashMap<String, Actor>,
}

impl StaticIdentityProvider {
    pub fn new(actors: HashMap<String, Actor>) -> Self {
        Self { actors }
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let actors: HashMap<String, Actor> = serde_json::from_str(json)
            .map_err(|e| AuthError::Provider(format!("Invalid identity file: {e}")))?;
        Ok(Self::new(actors))
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Provider(format!("Failed to read {}: {e}", path.display()))
        })?;
        let provider = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            actors = provider.actors.len(),
            "Identity table loaded"
        );
        Ok(provider)
    }

    /// Register a token (test and bootstrap helper).
    pub fn with_token(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.actors.insert(token.into(), actor);
        self
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn get_actor(&self, token: &str) -> Result<Option<Actor>, AuthError> {
        Ok(self.actors.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn loads_json_table() {
        let provider = StaticIdentityProvider::from_json(
            r#"{
                "tok-d": {"id": "doctor-1", "role": "doctor"},
                "tok-p": {"id": "patient-1", "role": "patient", "is_active": false}
            }"#,
        )
        .unwrap();

        let doctor = provider.get_actor("tok-d").unwrap().unwrap();
        assert_eq!(doctor.id, "doctor-1");
        assert_eq!(doctor.role, Role::Doctor);

        let patient = provider.get_actor("tok-p").unwrap().unwrap();
        assert!(!patient.is_active);

        assert!(provider.get_actor("nope").unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_roles() {
        let result = StaticIdentityProvider::from_json(r#"{"t": {"id": "x", "role": "nurse"}}"#);
        assert!(matches!(result, Err(AuthError::Provider(_))));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = StaticIdentityProvider::from_file(Path::new("/nonexistent/identities.json"));
        assert!(result.is_err());
    }
}
