// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Context binding collaborator.
//!
//! A note is always written for a context (an appointment). The binding says
//! who the note is about and which doctor may author it. The static resolver
//! reads a JSON file of the form:
//!
//! ```json
//! { "appt-1": { "subject_id": "patient-1", "author_id": "doctor-1" } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Parties bound to a context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextBinding {
    pub subject_id: String,
    pub author_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to load context bindings: {0}")]
    Load(String),
}

/// Resolves a context reference to its binding. `None` when unknown.
pub trait ContextResolver: Send + Sync {
    fn resolve_context(&self, context_ref: &str) -> Option<ContextBinding>;
}

/// Fixed context table.
#[derive(Debug, Default)]
pub struct StaticContextResolver {
    bindings: HashMap<String, ContextBinding>,
}

impl StaticContextResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ContextError> {
        let bindings = serde_json::from_str(json).map_err(|e| ContextError::Load(e.to_string()))?;
        Ok(Self { bindings })
    }

    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ContextError::Load(format!("{}: {e}", path.display())))?;
        let resolver = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            contexts = resolver.bindings.len(),
            "Context bindings loaded"
        );
        Ok(resolver)
    }

    pub fn with_binding(
        mut self,
        context_ref: impl Into<String>,
        subject_id: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        self.bindings.insert(
            context_ref.into(),
            ContextBinding {
                subject_id: subject_id.into(),
                author_id: author_id.into(),
            },
        );
        self
    }
}

impl ContextResolver for StaticContextResolver {
    fn resolve_context(&self, context_ref: &str) -> Option<ContextBinding> {
        self.bindings.get(context_ref).cloned()
    }
}
