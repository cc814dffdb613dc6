//! Credential and delivery-log persistence.
//!
//! The dispatch core only needs lookups by unique id, full scans and an
//! append with an auto-incremented id, so the trait stays at that level.
//! Two backends ship with the crate: SQLite for deployments and an
//! in-memory store for tests and ephemeral runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::models::{Device, NoticeLog};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage capability used by the registry, dispatcher and log queries.
///
/// Implementations must be safe to call from many tasks at once. List
/// methods return snapshots: later writes are not reflected in a list that
/// has already been returned.
pub trait CredentialStore: Send + Sync {
    /// Insert or replace a device keyed by its token.
    ///
    /// Sets `created_at` when absent and always refreshes `updated_at`.
    /// Returns the stored record.
    ///
    /// # Errors
    ///
    /// `Conflict` if a non-empty `device_key` already belongs to another token.
    fn upsert_device(&self, device: Device) -> Result<Device>;

    fn get_device(&self, token: &str) -> Result<Device>;

    fn get_device_by_key(&self, key: &str) -> Result<Device>;

    fn list_devices(&self) -> Result<Vec<Device>>;

    /// Devices whose status is `Active`.
    fn list_active_devices(&self) -> Result<Vec<Device>>;

    /// Append a log entry, assigning the next id and touching `updated_at`.
    fn append_log(&self, entry: NoticeLog) -> Result<NoticeLog>;

    /// All log entries in id order.
    fn list_logs(&self) -> Result<Vec<NoticeLog>>;

    /// Release backend resources. Further calls fail with `Closed`.
    fn close(&self) -> Result<()>;
}
