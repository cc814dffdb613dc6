//! In-memory storage backend.

use crate::models::{Device, NoticeLog};
use crate::storage::{CredentialStore, Result, StorageError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Inner {
    devices: BTreeMap<String, Device>,
    logs: Vec<NoticeLog>,
    next_log_id: u64,
    closed: bool,
}

/// Map-backed store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        if guard.closed {
            return Err(StorageError::Closed);
        }
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        if guard.closed {
            return Err(StorageError::Closed);
        }
        f(&mut guard)
    }
}

impl CredentialStore for MemoryStore {
    fn upsert_device(&self, mut device: Device) -> Result<Device> {
        self.write(|inner| {
            if !device.device_key.is_empty() {
                let taken = inner.devices.values().any(|d| {
                    d.device_key == device.device_key && d.device_token != device.device_token
                });
                if taken {
                    return Err(StorageError::Conflict(format!(
                        "device key {} already assigned to another device",
                        device.device_key
                    )));
                }
            }

            let now = Utc::now();
            if device.created_at.is_none() {
                device.created_at = inner
                    .devices
                    .get(&device.device_token)
                    .and_then(|existing| existing.created_at)
                    .or(Some(now));
            }
            device.updated_at = Some(now);

            inner
                .devices
                .insert(device.device_token.clone(), device.clone());
            Ok(device)
        })
    }

    fn get_device(&self, token: &str) -> Result<Device> {
        self.read(|inner| {
            inner
                .devices
                .get(token)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("device token {}", token)))
        })
    }

    fn get_device_by_key(&self, key: &str) -> Result<Device> {
        self.read(|inner| {
            inner
                .devices
                .values()
                .find(|d| !key.is_empty() && d.device_key == key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("device key {}", key)))
        })
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        self.read(|inner| Ok(inner.devices.values().cloned().collect()))
    }

    fn list_active_devices(&self) -> Result<Vec<Device>> {
        self.read(|inner| {
            Ok(inner
                .devices
                .values()
                .filter(|d| d.is_active())
                .cloned()
                .collect())
        })
    }

    fn append_log(&self, mut entry: NoticeLog) -> Result<NoticeLog> {
        self.write(|inner| {
            inner.next_log_id += 1;
            entry.id = inner.next_log_id;
            entry.updated_at = Utc::now();
            inner.logs.push(entry.clone());
            Ok(entry)
        })
    }

    fn list_logs(&self) -> Result<Vec<NoticeLog>> {
        self.read(|inner| Ok(inner.logs.clone()))
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        guard.closed = true;
        Ok(())
    }
}
