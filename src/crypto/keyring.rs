// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key ring holding every note encryption key the service can still use.
//!
//! Exactly one key is `Active` and used for new encryptions. Rotation retires
//! the current key; retired keys keep decrypting the records that still
//! reference them until those records are updated. Revoked keys resolve to
//! [`CryptoError::KeyNotFound`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use ring::aead::{LessSafeKey, UnboundKey, AES_256_GCM};
use ring::hkdf::{Salt, HKDF_SHA256};
use ring::hmac;
use serde::Serialize;
use utoipa::ToSchema;

use super::{CryptoError, CryptoResult};

/// Length of a root key in bytes.
pub const ROOT_KEY_LEN: usize = 32;

/// Fixed HKDF salt; root keys are already uniformly random.
const KDF_SALT: &[u8] = b"relational-notes-vault/v1";

const ENCRYPTION_INFO: &[u8] = b"note-encryption";
const CONTENT_HASH_INFO: &[u8] = b"note-content-hash";

/// Lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Used for new encryptions (exactly one at a time).
    Active,
    /// Decrypt-only.
    Retired,
    /// Unusable.
    Revoked,
}

/// Derived key material for one key id.
pub struct NoteKey {
    id: String,
    cipher: LessSafeKey,
    hasher: hmac::Key,
}

impl NoteKey {
    /// Derive the encryption and content-hash subkeys from a root secret.
    pub fn derive(id: impl Into<String>, material: &[u8]) -> CryptoResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CryptoError::InvalidKeyMaterial("key id must not be empty".to_string()));
        }
        if material.len() != ROOT_KEY_LEN {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "key {id} must be {ROOT_KEY_LEN} bytes, got {}",
                material.len()
            )));
        }

        let prk = Salt::new(HKDF_SHA256, KDF_SALT).extract(material);

        let encryption_info = [ENCRYPTION_INFO];
        let unbound: UnboundKey = prk
            .expand(&encryption_info, &AES_256_GCM)
            .map_err(|_| CryptoError::Crypto("HKDF expand failed".to_string()))?
            .into();

        let hash_info = [CONTENT_HASH_INFO];
        let hasher: hmac::Key = prk
            .expand(&hash_info, hmac::HMAC_SHA256)
            .map_err(|_| CryptoError::Crypto("HKDF expand failed".to_string()))?
            .into();

        Ok(Self {
            id,
            cipher: LessSafeKey::new(unbound),
            hasher,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn cipher(&self) -> &LessSafeKey {
        &self.cipher
    }

    pub(crate) fn hasher(&self) -> &hmac::Key {
        &self.hasher
    }
}

impl std::fmt::Debug for NoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NoteKey({}, [REDACTED])", self.id)
    }
}

/// Operator-facing description of a key (never includes material).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KeyInfo {
    pub key_id: String,
    pub status: KeyStatus,
    pub installed_at: DateTime<Utc>,
}

struct KeyEntry {
    key: Arc<NoteKey>,
    status: KeyStatus,
    installed_at: DateTime<Utc>,
}

#[derive(Default)]
struct KeyRingState {
    keys: HashMap<String, KeyEntry>,
    active: Option<String>,
}

/// Thread-safe set of note keys.
#[derive(Default)]
pub struct KeyRing {
    state: RwLock<KeyRingState>,
}

impl KeyRing {
    /// Create an empty ring. [`KeyRing::rotate`] installs the first active key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from configured `(key_id, material)` pairs.
    ///
    /// `active_id` becomes the active key; every other key is retired.
    pub fn from_material(keys: &[(String, Vec<u8>)], active_id: &str) -> CryptoResult<Self> {
        if !keys.iter().any(|(id, _)| id == active_id) {
            return Err(CryptoError::KeyNotFound(active_id.to_string()));
        }

        let ring = Self::new();
        {
            let mut state = ring.write()?;
            for (id, material) in keys {
                if state.keys.contains_key(id) {
                    return Err(CryptoError::Rejected(format!("duplicate key id {id}")));
                }
                let status = if id == active_id {
                    KeyStatus::Active
                } else {
                    KeyStatus::Retired
                };
                state.keys.insert(
                    id.clone(),
                    KeyEntry {
                        key: Arc::new(NoteKey::derive(id.clone(), material)?),
                        status,
                        installed_at: Utc::now(),
                    },
                );
            }
            state.active = Some(active_id.to_string());
        }
        Ok(ring)
    }

    /// Resolve a key for decryption. Active and retired keys resolve.
    pub fn resolve(&self, key_id: &str) -> CryptoResult<Arc<NoteKey>> {
        let state = self.read()?;
        match state.keys.get(key_id) {
            Some(entry) if entry.status != KeyStatus::Revoked => Ok(Arc::clone(&entry.key)),
            _ => Err(CryptoError::KeyNotFound(key_id.to_string())),
        }
    }

    /// The key used for new encryptions.
    pub fn active_key(&self) -> CryptoResult<(String, Arc<NoteKey>)> {
        let state = self.read()?;
        let active_id = state.active.as_ref().ok_or(CryptoError::NoActiveKey)?;
        let entry = state
            .keys
            .get(active_id)
            .ok_or_else(|| CryptoError::KeyNotFound(active_id.clone()))?;
        Ok((active_id.clone(), Arc::clone(&entry.key)))
    }

    /// Install a new active key and retire the previous one.
    ///
    /// Existing records are not re-encrypted; they move to the new key the
    /// next time they are updated.
    pub fn rotate(&self, new_key_id: &str, material: &[u8]) -> CryptoResult<()> {
        let key = NoteKey::derive(new_key_id, material)?;
        let mut state = self.write()?;

        if state.keys.contains_key(new_key_id) {
            return Err(CryptoError::Rejected(format!(
                "key id {new_key_id} already exists"
            )));
        }

        let previous = state.active.take();
        if let Some(previous_id) = &previous {
            if let Some(entry) = state.keys.get_mut(previous_id) {
                entry.status = KeyStatus::Retired;
            }
        }

        state.keys.insert(
            new_key_id.to_string(),
            KeyEntry {
                key: Arc::new(key),
                status: KeyStatus::Active,
                installed_at: Utc::now(),
            },
        );
        state.active = Some(new_key_id.to_string());

        tracing::info!(
            key_id = %new_key_id,
            retired = ?previous,
            "Note encryption key rotated"
        );
        Ok(())
    }

    /// Mark a retired key as revoked.
    ///
    /// Callers must ensure no stored record still references the key; see
    /// `SecureRecordStore::revoke_key`.
    pub fn revoke(&self, key_id: &str) -> CryptoResult<()> {
        let mut state = self.write()?;
        if state.active.as_deref() == Some(key_id) {
            return Err(CryptoError::Rejected(format!(
                "key {key_id} is active; rotate before revoking"
            )));
        }
        let entry = state
            .keys
            .get_mut(key_id)
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        entry.status = KeyStatus::Revoked;
        tracing::warn!(key_id = %key_id, "Note encryption key revoked");
        Ok(())
    }

    /// List every key with its status, oldest first.
    pub fn describe(&self) -> CryptoResult<Vec<KeyInfo>> {
        let state = self.read()?;
        let mut keys: Vec<KeyInfo> = state
            .keys
            .iter()
            .map(|(id, entry)| KeyInfo {
                key_id: id.clone(),
                status: entry.status,
                installed_at: entry.installed_at,
            })
            .collect();
        keys.sort_by(|a, b| a.installed_at.cmp(&b.installed_at).then(a.key_id.cmp(&b.key_id)));
        Ok(keys)
    }

    fn read(&self) -> CryptoResult<std::sync::RwLockReadGuard<'_, KeyRingState>> {
        self.state
            .read()
            .map_err(|_| CryptoError::Crypto("key ring lock poisoned".to_string()))
    }

    fn write(&self) -> CryptoResult<std::sync::RwLockWriteGuard<'_, KeyRingState>> {
        self.state
            .write()
            .map_err(|_| CryptoError::Crypto("key ring lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(byte: u8) -> Vec<u8> {
        vec![byte; ROOT_KEY_LEN]
    }

    #[test]
    fn empty_ring_has_no_active_key() {
        let ring = KeyRing::new();
        assert!(matches!(ring.active_key(), Err(CryptoError::NoActiveKey)));
    }

    #[test]
    fn rotate_retires_previous_key() {
        let ring = KeyRing::new();
        ring.rotate("k1", &material(1)).unwrap();
        ring.rotate("k2", &material(2)).unwrap();

        let (active_id, _) = ring.active_key().unwrap();
        assert_eq!(active_id, "k2");

        // Retired keys still resolve for decryption
        assert!(ring.resolve("k1").is_ok());

        let statuses: HashMap<String, KeyStatus> = ring
            .describe()
            .unwrap()
            .into_iter()
            .map(|k| (k.key_id, k.status))
            .collect();
        assert_eq!(statuses["k1"], KeyStatus::Retired);
        assert_eq!(statuses["k2"], KeyStatus::Active);
    }

    #[test]
    fn rotate_rejects_duplicate_id() {
        let ring = KeyRing::new();
        ring.rotate("k1", &material(1)).unwrap();
        let err = ring.rotate("k1", &material(9)).unwrap_err();
        assert!(matches!(err, CryptoError::Rejected(_)));
    }

    #[test]
    fn unknown_key_is_not_found() {
        let ring = KeyRing::new();
        assert!(matches!(ring.resolve("nope"), Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn revoke_refuses_active_key() {
        let ring = KeyRing::new();
        ring.rotate("k1", &material(1)).unwrap();
        assert!(matches!(ring.revoke("k1"), Err(CryptoError::Rejected(_))));
    }

    #[test]
    fn revoked_key_no_longer_resolves() {
        let ring = KeyRing::new();
        ring.rotate("k1", &material(1)).unwrap();
        ring.rotate("k2", &material(2)).unwrap();
        ring.revoke("k1").unwrap();
        assert!(matches!(ring.resolve("k1"), Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn wrong_material_length_is_rejected() {
        let ring = KeyRing::new();
        let err = ring.rotate("short", &[0u8; 16]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn from_material_marks_only_selected_key_active() {
        let keys = vec![
            ("2025-q4".to_string(), material(1)),
            ("2026-q1".to_string(), material(2)),
        ];
        let ring = KeyRing::from_material(&keys, "2026-q1").unwrap();
        assert_eq!(ring.active_key().unwrap().0, "2026-q1");
        assert!(ring.resolve("2025-q4").is_ok());

        let missing = KeyRing::from_material(&keys, "2027-q1");
        assert!(matches!(missing, Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn debug_output_redacts_material() {
        let key = NoteKey::derive("k1", &material(7)).unwrap();
        assert_eq!(format!("{key:?}"), "NoteKey(k1, [REDACTED])");
    }
}
