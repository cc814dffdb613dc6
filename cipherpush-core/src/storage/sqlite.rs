//! SQLite storage backend.

use crate::models::{Device, DeviceStatus, NoticeLog, NoticeStatus};
use crate::storage::{CredentialStore, Result, StorageError};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const DEVICE_COLUMNS: &str = "device_token, device_key, name, algorithm, mode, padding,
     secret, iv, status, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, device_key, url, title, body, grp, result, status, created_at, updated_at";

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Serialization(format!(
                        "Failed to create storage directory: {}",
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS devices (
                    device_token TEXT PRIMARY KEY,
                    device_key TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL DEFAULT '',
                    algorithm TEXT NOT NULL DEFAULT '',
                    mode TEXT NOT NULL DEFAULT '',
                    padding TEXT NOT NULL DEFAULT '',
                    secret TEXT NOT NULL DEFAULT '',
                    iv TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notice_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    device_key TEXT NOT NULL,
                    url TEXT NOT NULL,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    grp TEXT NOT NULL,
                    result TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_key
                    ON devices(device_key) WHERE device_key != '';
                CREATE INDEX IF NOT EXISTS idx_notice_logs_created
                    ON notice_logs(created_at);",
            )?;
            Ok(())
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }

    fn query_devices(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Device>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM devices {} ORDER BY created_at, device_token",
                DEVICE_COLUMNS, where_clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let devices = stmt
                .query_map(args, device_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(devices)
        })
    }

    fn query_device(&self, column: &str, value: &str) -> Result<Device> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM devices WHERE {} = ?1", DEVICE_COLUMNS, column);
            conn.query_row(&sql, [value], device_from_row)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("device {} {}", column, value)))
        })
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("invalid timestamp {}", ms).into(),
        )
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let status: String = row.get(8)?;
    Ok(Device {
        device_token: row.get(0)?,
        device_key: row.get(1)?,
        name: row.get(2)?,
        algorithm: row.get(3)?,
        mode: row.get(4)?,
        padding: row.get(5)?,
        secret: row.get(6)?,
        iv: row.get(7)?,
        status: DeviceStatus::parse(&status),
        created_at: Some(from_millis(row.get(9)?)?),
        updated_at: Some(from_millis(row.get(10)?)?),
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<NoticeLog> {
    let id: i64 = row.get(0)?;
    let status: String = row.get(7)?;
    Ok(NoticeLog {
        id: id as u64,
        device_key: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        group: row.get(5)?,
        result: row.get(6)?,
        status: NoticeStatus::parse(&status).unwrap_or(NoticeStatus::Failed),
        created_at: from_millis(row.get(8)?)?,
        updated_at: from_millis(row.get(9)?)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl CredentialStore for SqliteStore {
    fn upsert_device(&self, mut device: Device) -> Result<Device> {
        let now = Utc::now();
        device.updated_at = Some(now);

        let created_at = self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO devices (device_token, device_key, name, algorithm, mode, padding,
                                      secret, iv, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(device_token) DO UPDATE SET
                    device_key = excluded.device_key,
                    name = excluded.name,
                    algorithm = excluded.algorithm,
                    mode = excluded.mode,
                    padding = excluded.padding,
                    secret = excluded.secret,
                    iv = excluded.iv,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                 RETURNING created_at",
                params![
                    device.device_token,
                    device.device_key,
                    device.name,
                    device.algorithm,
                    device.mode,
                    device.padding,
                    device.secret,
                    device.iv,
                    device.status.as_str(),
                    to_millis(device.created_at.unwrap_or(now)),
                    to_millis(now),
                ],
                |row| from_millis(row.get(0)?),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Conflict(format!(
                        "device key {} already assigned to another device",
                        device.device_key
                    ))
                } else {
                    StorageError::Sqlite(e)
                }
            })
        })?;

        // An existing row keeps its original creation time.
        device.created_at = Some(created_at);
        Ok(device)
    }

    fn get_device(&self, token: &str) -> Result<Device> {
        self.query_device("device_token", token)
    }

    fn get_device_by_key(&self, key: &str) -> Result<Device> {
        if key.is_empty() {
            return Err(StorageError::NotFound("device key is empty".to_string()));
        }
        self.query_device("device_key", key)
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        self.query_devices("", &[])
    }

    fn list_active_devices(&self) -> Result<Vec<Device>> {
        self.query_devices(
            "WHERE UPPER(TRIM(status)) = ?1 OR TRIM(status) = ''",
            &[&DeviceStatus::Active.as_str()],
        )
    }

    fn append_log(&self, mut entry: NoticeLog) -> Result<NoticeLog> {
        entry.updated_at = Utc::now();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notice_logs (device_key, url, title, body, grp, result, status,
                                          created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.device_key,
                    entry.url,
                    entry.title,
                    entry.body,
                    entry.group,
                    entry.result,
                    entry.status.as_str(),
                    to_millis(entry.created_at),
                    to_millis(entry.updated_at),
                ],
            )?;
            entry.id = conn.last_insert_rowid() as u64;
            Ok(())
        })?;

        Ok(entry)
    }

    fn list_logs(&self) -> Result<Vec<NoticeLog>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM notice_logs ORDER BY id", LOG_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let logs = stmt
                .query_map([], log_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(logs)
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        }
        Ok(())
    }
}
