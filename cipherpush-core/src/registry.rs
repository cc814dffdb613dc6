//! Device record lifecycle: upsert, activation and upstream registration.
//!
//! The registry is the only component that mutates devices. Secrets and IVs
//! are generated once and preserved across upserts unless a request
//! explicitly supplies replacements.

use crate::config::CryptoConfig;
use crate::crypto::{generate_secret, is_valid_key_length};
use crate::models::{Device, DeviceStatus, DeviceView, StatusReport};
use crate::storage::{CredentialStore, StorageError};
use crate::upstream::{PushGateway, RegisterData, UpstreamResponse};
use crate::{PushError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Upsert payload. Empty strings mean "not supplied".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceRequest {
    pub device_token: String,
    pub device_key: String,
    pub name: String,
    pub algorithm: String,
    pub mode: String,
    pub padding: String,
    #[serde(rename = "encodeKey")]
    pub secret: String,
    pub iv: String,
    pub status: String,
    /// Previously issued key to hand the upstream on registration.
    pub register_key: String,
}

pub struct DeviceRegistry {
    store: Arc<dyn CredentialStore>,
    crypto: CryptoConfig,
    gateway: Option<Arc<dyn PushGateway>>,
    /// Serializes read-merge-write cycles, including the registration await
    /// in between, so concurrent upserts of one token cannot both generate.
    writes: Mutex<()>,
}

fn first_non_empty(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

impl DeviceRegistry {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        crypto: CryptoConfig,
        gateway: Option<Arc<dyn PushGateway>>,
    ) -> Self {
        Self {
            store,
            crypto,
            gateway,
            writes: Mutex::new(()),
        }
    }

    /// Create or merge a device record and persist it.
    ///
    /// Validation of the final secret/IV happens before any upstream call or
    /// write. A device without a delivery key is registered upstream first.
    pub async fn upsert(&self, req: DeviceRequest) -> Result<Device> {
        let token = req.device_token.trim();
        if token.is_empty() {
            return Err(PushError::Validation("deviceToken is required".to_string()));
        }

        let _guard = self.writes.lock().await;
        let mut device = match self.store.get_device(token) {
            Ok(existing) => existing,
            Err(StorageError::NotFound(_)) => Device::new(token),
            Err(e) => return Err(e.into()),
        };

        if !req.name.trim().is_empty() {
            device.name = req.name.clone();
        }
        device.status = DeviceStatus::parse(&req.status);
        device.algorithm = first_non_empty(&req.algorithm, &self.crypto.default_algorithm);
        device.mode = first_non_empty(&req.mode, &self.crypto.default_mode);
        device.padding = first_non_empty(&req.padding, &self.crypto.default_padding);

        if !req.secret.is_empty() {
            device.secret = req.secret.clone();
        } else if device.secret.is_empty() {
            device.secret = generate_secret(self.crypto.key_bytes)?;
        }

        if !req.iv.is_empty() {
            device.iv = req.iv.clone();
        } else if device.iv.is_empty() {
            device.iv = generate_secret(self.crypto.iv_bytes)?;
        }

        if !req.device_key.trim().is_empty() {
            device.device_key = req.device_key.trim().to_string();
        }

        if !is_valid_key_length(device.secret.len()) {
            return Err(PushError::InvalidCredential(format!(
                "encodeKey must be 16, 24 or 32 characters, got {}",
                device.secret.len()
            )));
        }
        if device.iv.len() != self.crypto.iv_bytes {
            return Err(PushError::InvalidCredential(format!(
                "iv must be {} characters, got {}",
                self.crypto.iv_bytes,
                device.iv.len()
            )));
        }

        if device.device_key.is_empty() {
            let legacy = Some(req.register_key.as_str()).filter(|k| !k.is_empty());
            device.device_key = self.obtain_delivery_key(token, legacy).await?;
        }

        let stored = self.store.upsert_device(device)?;
        info!(
            device_key = %stored.device_key,
            status = stored.status.as_str(),
            "Device upserted"
        );
        Ok(stored)
    }

    /// Upsert variant used by the device generator: name and key are mandatory.
    pub async fn generate_config(&self, req: DeviceRequest) -> Result<Device> {
        if req.name.trim().is_empty() {
            return Err(PushError::Validation("device name is required".to_string()));
        }
        if req.device_key.trim().is_empty() {
            return Err(PushError::Validation("device key is required".to_string()));
        }
        self.upsert(req).await
    }

    pub fn update_status(&self, token: &str, status: &str) -> Result<Device> {
        let mut device = self.store.get_device(token)?;
        device.status = DeviceStatus::parse(status);
        let stored = self.store.upsert_device(device)?;
        info!(
            device_key = %stored.device_key,
            status = stored.status.as_str(),
            "Device status changed"
        );
        Ok(stored)
    }

    /// Pass an upstream-announced token through to registration and cache
    /// the returned key. An empty key in the response is not an error.
    pub async fn register_from_upstream(
        &self,
        device_token: &str,
        legacy_key: Option<&str>,
    ) -> Result<UpstreamResponse<RegisterData>> {
        let gateway = self.gateway.as_ref().ok_or(PushError::UpstreamUnavailable)?;
        if device_token.trim().is_empty() {
            return Err(PushError::Validation("deviceToken is required".to_string()));
        }

        let resp = gateway
            .register(device_token, legacy_key)
            .await
            .map_err(|e| PushError::RegistrationFailed(e.to_string()))?;

        if resp.data.device_key.is_empty() {
            debug!("Upstream registration returned no device key");
            return Ok(resp);
        }

        let token = if resp.data.device_token.is_empty() {
            device_token
        } else {
            resp.data.device_token.as_str()
        };
        let _guard = self.writes.lock().await;
        let mut device = match self.store.get_device(token) {
            Ok(existing) => existing,
            Err(StorageError::NotFound(_)) => Device::new(token),
            Err(e) => return Err(e.into()),
        };
        device.device_key = resp.data.device_key.clone();
        self.store.upsert_device(device)?;
        info!(device_key = %resp.data.device_key, "Cached upstream registration");

        Ok(resp)
    }

    pub fn get(&self, token: &str) -> Result<Device> {
        Ok(self.store.get_device(token)?)
    }

    pub fn list(&self) -> Result<Vec<Device>> {
        Ok(self.store.list_devices()?)
    }

    pub fn list_views(&self) -> Result<Vec<DeviceView>> {
        Ok(self.list()?.iter().map(Device::to_view).collect())
    }

    /// Device counts with the given upstream reachability label.
    pub fn status_report(&self, upstream_up: bool) -> Result<StatusReport> {
        let devices = self.list()?;
        Ok(StatusReport {
            status: if upstream_up { "online" } else { "offline" }.to_string(),
            active_device_num: devices.iter().filter(|d| d.is_active()).count(),
            all_device_num: devices.len(),
        })
    }

    async fn obtain_delivery_key(&self, token: &str, legacy: Option<&str>) -> Result<String> {
        let gateway = self.gateway.as_ref().ok_or(PushError::UpstreamUnavailable)?;
        let resp = gateway
            .register(token, legacy)
            .await
            .map_err(|e| PushError::RegistrationFailed(e.to_string()))?;
        if resp.data.device_key.is_empty() {
            return Err(PushError::RegistrationFailed(
                "empty device key".to_string(),
            ));
        }
        Ok(resp.data.device_key)
    }
}
