//! Upstream push-delivery service boundary.
//!
//! The relay only ever talks to the upstream through [`PushGateway`], so the
//! registry and dispatcher can be driven by a scripted gateway in tests.

mod client;

pub use client::HttpPushGateway;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only upstream `code` value that means success.
pub const SUCCESS_CODE: i64 = 200;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} http status {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Standard `{code, message, timestamp, data}` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned + Default"))]
pub struct UpstreamResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: T,
}

impl<T> UpstreamResponse<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// Payload of a registration response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterData {
    pub key: String,
    pub device_key: String,
    pub device_token: String,
}

/// Request body of a push call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPush {
    pub ciphertext: String,
    pub iv: String,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Health probe.
    async fn ping(&self) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError>;

    /// Register a platform token, optionally re-using a previously issued key.
    async fn register(
        &self,
        device_token: &str,
        legacy_key: Option<&str>,
    ) -> Result<UpstreamResponse<RegisterData>, UpstreamError>;

    /// Submit ciphertext for one delivery key.
    async fn push(
        &self,
        device_key: &str,
        ciphertext: &str,
        iv: &str,
    ) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError>;

    /// Push URL for a delivery key, recorded in delivery logs.
    fn device_endpoint(&self, device_key: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_tolerates_missing_fields() {
        let resp: UpstreamResponse<RegisterData> =
            serde_json::from_str(r#"{"code": 200}"#).unwrap();
        assert!(resp.is_success());
        assert!(resp.data.device_key.is_empty());
        assert!(resp.message.is_empty());
    }

    #[test]
    fn register_data_uses_snake_case() {
        let resp: UpstreamResponse<RegisterData> = serde_json::from_str(
            r#"{"code": 200, "message": "success", "timestamp": 1,
                "data": {"key": "k", "device_key": "dk", "device_token": "tok"}}"#,
        )
        .unwrap();
        assert_eq!(resp.data.device_key, "dk");
        assert_eq!(resp.data.device_token, "tok");
    }

    #[test]
    fn non_200_code_is_not_success() {
        let resp: UpstreamResponse<serde_json::Value> =
            serde_json::from_str(r#"{"code": 400, "message": "bad key"}"#).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.message, "bad key");
    }
}
