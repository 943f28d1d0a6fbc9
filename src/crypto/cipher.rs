// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Integrity-checked note envelopes.

use std::sync::Arc;

use ring::aead::{Aad, Nonce, NONCE_LEN};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::{serde_b64, CryptoError, CryptoResult, KeyRing};

/// Ciphertext envelope persisted with every record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// `nonce || ciphertext || tag`
    #[serde(with = "serde_b64")]
    pub ciphertext: Vec<u8>,
    /// Keyed hash of the plaintext at encryption time.
    #[serde(with = "serde_b64")]
    pub content_hash: Vec<u8>,
    /// Key ring id of the key that produced this envelope.
    pub key_id: String,
}

impl std::fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPayload")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Encrypts and decrypts note bodies using keys from a [`KeyRing`].
///
/// Owns no business rules; access decisions happen before it is called.
pub struct EncryptionService {
    keys: Arc<KeyRing>,
    rng: SystemRandom,
}

impl EncryptionService {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self {
            keys,
            rng: SystemRandom::new(),
        }
    }

    pub fn key_ring(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Encrypt under the current active key.
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<EncryptedPayload> {
        let (key_id, key) = self.keys.active_key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Crypto("system RNG unavailable".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        key.cipher()
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(key_id.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Crypto("AEAD seal failed".to_string()))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + in_out.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&in_out);

        let content_hash = hmac::sign(key.hasher(), plaintext.as_bytes())
            .as_ref()
            .to_vec();

        Ok(EncryptedPayload {
            ciphertext,
            content_hash,
            key_id,
        })
    }

    /// Decrypt and verify an envelope.
    ///
    /// Fails with [`CryptoError::KeyNotFound`] for unknown or revoked keys and
    /// with [`CryptoError::Integrity`] when authentication or the content hash
    /// check fails. Never returns partial plaintext.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> CryptoResult<String> {
        let key = self.keys.resolve(&payload.key_id)?;

        if payload.ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::Integrity("ciphertext truncated".to_string()));
        }
        let (nonce_bytes, sealed) = payload.ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::Integrity("malformed nonce".to_string()))?;

        let mut in_out = sealed.to_vec();
        let opened = key
            .cipher()
            .open_in_place(nonce, Aad::from(payload.key_id.as_bytes()), &mut in_out)
            .map_err(|_| CryptoError::Integrity("ciphertext authentication failed".to_string()))?;

        hmac::verify(key.hasher(), opened, &payload.content_hash)
            .map_err(|_| CryptoError::Integrity("content hash mismatch".to_string()))?;

        String::from_utf8(opened.to_vec())
            .map_err(|_| CryptoError::Integrity("plaintext is not valid UTF-8".to_string()))
    }
}
