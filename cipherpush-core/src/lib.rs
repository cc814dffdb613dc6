//! CipherPush Core Library
//!
//! Per-device credential management, payload encryption and concurrent
//! fan-out to an upstream push-delivery service. The relay binary is a thin
//! HTTP surface over the components exported here.

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod log_query;
pub mod models;
pub mod registry;
pub mod storage;
pub mod upstream;

pub use config::{CoreConfig, CryptoConfig, DispatchConfig, UpstreamConfig};
pub use crypto::{decrypt_from_base64, encrypt_to_base64, generate_secret, CryptoError};
pub use dispatch::{BroadcastFailure, BroadcastReport, DispatchEngine};
pub use log_query::{CountEntry, DateUnit, LogDashboard, LogQueryEngine, TimeRange};
pub use models::{
    Device, DeviceStatus, DeviceView, NoticeLog, NoticeLogFilter, NoticeLogPage, NoticeRequest,
    NoticeResult, NoticeStatus, NoticeSummary, StatusReport,
};
pub use registry::{DeviceRegistry, DeviceRequest};
pub use storage::{CredentialStore, MemoryStore, SqliteStore, StorageError};
pub use upstream::{HttpPushGateway, PushGateway, RegisterData, UpstreamError, UpstreamResponse};

use thiserror::Error;

/// Result type for relay core operations
pub type Result<T> = std::result::Result<T, PushError>;

/// Error taxonomy shared by the registry and dispatch components
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Upstream push client not configured")]
    UpstreamUnavailable,

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Entropy failure: {0}")]
    Entropy(String),

    #[error("No target devices resolved")]
    NoTargetsResolved,

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("IO failure: {0}")]
    Io(String),
}

impl From<StorageError> for PushError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Conflict(what) => Self::Validation(what),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<CryptoError> for PushError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Entropy(msg) => Self::Entropy(msg),
            CryptoError::InvalidKeyLength(_) | CryptoError::InvalidIvLength { .. } => {
                Self::InvalidCredential(e.to_string())
            }
            other => Self::Crypto(other),
        }
    }
}

impl From<UpstreamError> for PushError {
    fn from(e: UpstreamError) -> Self {
        Self::Transport(e.to_string())
    }
}
