// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the record database | `/data` |
//! | `STORAGE_BACKEND` | `redb` or `memory` | `redb` |
//! | `NOTE_KEYS` | Encryption keys, `id:base64key,...` (32-byte keys) | Required |
//! | `NOTE_ACTIVE_KEY` | Key id used for new encryptions | Last entry of `NOTE_KEYS` |
//! | `AUDIT_MASK_KEY` | Base64 HMAC key for audit masking (≥16 bytes) | Required |
//! | `IDENTITY_FILE` | JSON map of bearer token → actor | Required |
//! | `CONTEXT_FILE` | JSON map of context → subject/author | Required |
//! | `MIN_REASON_LEN` | Minimum access reason length | `5` |
//! | `REQUEST_TIMEOUT_SECS` | Per-operation deadline | `10` |
//! | `TLS_CERT_PATH` | PEM certificate chain; HTTPS when set with the key | Unset |
//! | `TLS_KEY_PATH` | PEM private key | Unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

use base64ct::{Base64, Encoding};

use crate::crypto::ROOT_KEY_LEN;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory for the redb file (`notes.redb`).
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const STORAGE_BACKEND_ENV: &str = "STORAGE_BACKEND";
pub const NOTE_KEYS_ENV: &str = "NOTE_KEYS";
pub const NOTE_ACTIVE_KEY_ENV: &str = "NOTE_ACTIVE_KEY";
pub const AUDIT_MASK_KEY_ENV: &str = "AUDIT_MASK_KEY";
pub const IDENTITY_FILE_ENV: &str = "IDENTITY_FILE";
pub const CONTEXT_FILE_ENV: &str = "CONTEXT_FILE";
pub const MIN_REASON_LEN_ENV: &str = "MIN_REASON_LEN";
pub const REQUEST_TIMEOUT_SECS_ENV: &str = "REQUEST_TIMEOUT_SECS";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Database file name inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "notes.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    Redb,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Read before the rest of the configuration so startup errors are logged.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Key material as loaded from `NOTE_KEYS`.
#[derive(Clone)]
pub struct KeyMaterial {
    pub key_id: String,
    pub material: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial({}, [REDACTED])", self.key_id)
    }
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub backend: StorageBackendKind,
    pub note_keys: Vec<KeyMaterial>,
    pub active_key: String,
    pub audit_mask_key: Vec<u8>,
    pub identity_file: PathBuf,
    pub context_file: PathBuf,
    pub min_reason_len: usize,
    pub request_timeout: Duration,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| get(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let host = var(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_number(PORT_ENV, var(PORT_ENV), 8080u16)?;

        let backend = match var(STORAGE_BACKEND_ENV).as_deref() {
            None | Some("redb") => StorageBackendKind::Redb,
            Some("memory") => StorageBackendKind::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: STORAGE_BACKEND_ENV,
                    reason: format!("unknown backend {other:?} (expected redb or memory)"),
                })
            }
        };

        let note_keys = parse_note_keys(&required(NOTE_KEYS_ENV)?)?;
        let active_key = match var(NOTE_ACTIVE_KEY_ENV) {
            Some(id) => id,
            None => note_keys
                .last()
                .map(|k| k.key_id.clone())
                .ok_or(ConfigError::Missing(NOTE_KEYS_ENV))?,
        };
        if !note_keys.iter().any(|k| k.key_id == active_key) {
            return Err(ConfigError::Invalid {
                var: NOTE_ACTIVE_KEY_ENV,
                reason: format!("{active_key} is not listed in {NOTE_KEYS_ENV}"),
            });
        }

        let audit_mask_key = Base64::decode_vec(required(AUDIT_MASK_KEY_ENV)?.trim()).map_err(|e| {
            ConfigError::Invalid {
                var: AUDIT_MASK_KEY_ENV,
                reason: e.to_string(),
            }
        })?;

        let tls = match (var(TLS_CERT_PATH_ENV), var(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: TLS_CERT_PATH_ENV,
                    reason: format!("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"),
                })
            }
        };

        let log_format = LogFormat::parse(var(LOG_FORMAT_ENV).as_deref());

        Ok(Self {
            host,
            port,
            data_dir: var(DATA_DIR_ENV)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
                .into(),
            backend,
            note_keys,
            active_key,
            audit_mask_key,
            identity_file: required(IDENTITY_FILE_ENV)?.into(),
            context_file: required(CONTEXT_FILE_ENV)?.into(),
            min_reason_len: parse_number(MIN_REASON_LEN_ENV, var(MIN_REASON_LEN_ENV), 5usize)?,
            request_timeout: Duration::from_secs(parse_number(
                REQUEST_TIMEOUT_SECS_ENV,
                var(REQUEST_TIMEOUT_SECS_ENV),
                10u64,
            )?),
            tls,
            log_format,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_number<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

/// Parse `id:base64,id:base64,...`.
fn parse_note_keys(raw: &str) -> Result<Vec<KeyMaterial>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: NOTE_KEYS_ENV,
        reason,
    };

    let mut keys = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key_id, encoded) = item
            .split_once(':')
            .ok_or_else(|| invalid("expected id:base64key".to_string()))?;
        let key_id = key_id.trim();
        if key_id.is_empty() {
            return Err(invalid("empty key id".to_string()));
        }
        if keys.iter().any(|k: &KeyMaterial| k.key_id == key_id) {
            return Err(invalid(format!("duplicate key id {key_id}")));
        }
        let material = Base64::decode_vec(encoded.trim())
            .map_err(|e| invalid(format!("key {key_id}: {e}")))?;
        if material.len() != ROOT_KEY_LEN {
            return Err(invalid(format!(
                "key {key_id} must be {ROOT_KEY_LEN} bytes, got {}",
                material.len()
            )));
        }
        keys.push(KeyMaterial {
            key_id: key_id.to_string(),
            material,
        });
    }

    if keys.is_empty() {
        return Err(ConfigError::Missing(NOTE_KEYS_ENV));
    }
    Ok(keys)
}
