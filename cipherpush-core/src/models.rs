//! Relay data models: devices, notice requests, results and delivery logs.

use crate::crypto::{is_valid_key_length, BLOCK_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activation state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    #[default]
    Active,
    #[serde(alias = "STOP")]
    Stopped,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Stopped => "STOPPED",
        }
    }

    /// Normalize a caller-supplied status. Matching is case-insensitive;
    /// empty or unknown values fall back to `Active`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "STOPPED" | "STOP" => Self::Stopped,
            _ => Self::Active,
        }
    }
}

/// A registered recipient with its own symmetric key material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Platform-issued token; primary key.
    pub device_token: String,
    /// Upstream-assigned delivery key; empty until registered.
    pub device_key: String,
    pub name: String,
    pub algorithm: String,
    pub mode: String,
    pub padding: String,
    #[serde(rename = "encodeKey")]
    pub secret: String,
    pub iv: String,
    pub status: DeviceStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(device_token: impl Into<String>) -> Self {
        Self {
            device_token: device_token.into(),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    /// Secret and IV are present with lengths the cipher accepts.
    pub fn is_encryption_ready(&self) -> bool {
        is_valid_key_length(self.secret.len()) && self.iv.len() == BLOCK_SIZE
    }

    /// Display label used by reports; falls back to the delivery key.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.device_key
        } else {
            &self.name
        }
    }

    pub fn to_view(&self) -> DeviceView {
        DeviceView {
            device_token: mask_value(&self.device_token),
            name: self.name.clone(),
            device_key: mask_value(&self.device_key),
            algorithm: self.algorithm.clone(),
            mode: self.mode.clone(),
            padding: self.padding.clone(),
            secret: mask_value(&self.secret),
            iv: mask_value(&self.iv),
            status: self.status,
        }
    }
}

/// Device listing with credentials masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device_token: String,
    pub name: String,
    pub device_key: String,
    pub algorithm: String,
    pub mode: String,
    pub padding: String,
    #[serde(rename = "encodeKey")]
    pub secret: String,
    pub iv: String,
    pub status: DeviceStatus,
}

/// Keep the first four characters and star out the rest.
pub fn mask_value(value: &str) -> String {
    let value = value.trim();
    let count = value.chars().count();
    if count <= 4 {
        return value.to_string();
    }
    let head: String = value.chars().take(4).collect();
    format!("{}{}", head, "*".repeat(count - 4))
}

/// Plaintext notification submitted by a caller. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoticeRequest {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub group: String,
    pub url: String,
    pub icon: String,
    pub image: String,
    /// Explicit targets; empty means every active device.
    pub device_keys: Vec<String>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NoticeStatus {
    Success,
    Failed,
}

impl NoticeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeResult {
    pub device_key: String,
    pub status: NoticeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NoticeResult {
    pub fn success(device_key: impl Into<String>, message: Option<String>) -> Self {
        Self {
            device_key: device_key.into(),
            status: NoticeStatus::Success,
            message,
        }
    }

    pub fn failed(device_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device_key: device_key.into(),
            status: NoticeStatus::Failed,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NoticeStatus::Success
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeSummary {
    /// Resolved targets; lookup failures are not counted.
    pub send_num: usize,
    pub success_num: usize,
}

/// Append-only audit record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeLog {
    /// Assigned by the store on append; strictly increasing.
    pub id: u64,
    pub device_key: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub group: String,
    pub result: String,
    pub status: NoticeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoticeLog {
    /// Build an unsaved entry; the store assigns `id` and touches `updated_at`.
    pub fn new(
        device_key: &str,
        url: String,
        request: &NoticeRequest,
        status: NoticeStatus,
        result: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            device_key: device_key.to_string(),
            url,
            title: request.title.clone(),
            body: request.body.clone(),
            group: request.group.clone(),
            result,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filters and paging for log queries. Empty strings disable a filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoticeLogFilter {
    pub device_key: String,
    pub group: String,
    pub status: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeLogPage {
    pub data: Vec<NoticeLog>,
    pub total: usize,
    pub pages: usize,
    pub page_num: usize,
    pub page_size: usize,
}

/// Device counts plus upstream reachability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: String,
    pub active_device_num: usize,
    pub all_device_num: usize,
}
