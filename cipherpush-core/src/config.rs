//! Core configuration: crypto defaults, upstream endpoint and dispatch limits.
//!
//! Built once at process start and handed to component constructors.

use crate::crypto::{is_valid_key_length, BLOCK_SIZE};
use crate::{PushError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub crypto: CryptoConfig,
    pub upstream: UpstreamConfig,
    pub dispatch: DispatchConfig,
}

impl CoreConfig {
    /// Reject settings that would make every generated credential unusable.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_key_length(self.crypto.key_bytes) {
            return Err(PushError::Validation(format!(
                "crypto.key_bytes must be 16, 24 or 32, got {}",
                self.crypto.key_bytes
            )));
        }
        if self.crypto.iv_bytes != BLOCK_SIZE {
            return Err(PushError::Validation(format!(
                "crypto.iv_bytes must be {}, got {}",
                BLOCK_SIZE, self.crypto.iv_bytes
            )));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(PushError::Validation(
                "upstream.base_url is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defaults applied to device records that omit cipher parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub default_algorithm: String,
    pub default_mode: String,
    pub default_padding: String,
    pub key_bytes: usize,
    pub iv_bytes: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "AES".to_string(),
            default_mode: "CBC".to_string(),
            default_padding: "PKCS7Padding".to_string(),
            key_bytes: 32,
            iv_bytes: BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Sent as the `API-TOKEN` header when present.
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token: None,
            request_timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on concurrently running per-device deliveries.
    /// Zero disables the bound.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 64 }
    }
}
