//! Durable notification store
//!
//! One store per region. The write is the durability boundary of a flush:
//! once `upsert_notification_if_absent` returns, the bucket's information is
//! permanently recorded.
//!
//! Tables written (see `/sql/` directory):
//! - `notifications` - INSERT ... ON CONFLICT(natural key) DO NOTHING

use super::error::{Error, Result};
use super::types::{
    EventType, NaturalKey, Notification, NotificationPayload, NotificationStatus,
};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = include_str!("../../sql/01_notifications.sql");

/// Result of an idempotent notification write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was written with this id
    Created(i64),
    /// A row with the same natural key already existed; nothing written
    AlreadyExists,
}

/// Contract for a region's durable store
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert the notification unless one with the same natural key exists
    ///
    /// Operation: INSERT ... ON CONFLICT(region, subject_id, event_type, window_start) DO NOTHING
    async fn upsert_notification_if_absent(
        &self,
        key: &NaturalKey,
        payload: &NotificationPayload,
    ) -> Result<UpsertOutcome>;

    /// Notifications for one subject, newest first
    async fn notifications_for_subject(&self, subject_id: &str) -> Result<Vec<Notification>>;
}

/// SQLite implementation of NotificationStore
pub struct SqliteNotificationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNotificationStore {
    /// Open (or create) the database file and apply the schema
    ///
    /// Enables WAL mode. Schema statements use IF NOT EXISTS, so reopening an
    /// existing database is safe.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::durable_store("connection lock poisoned"))
    }

    /// Total rows, all subjects
    pub fn count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn upsert_notification_if_absent(
        &self,
        key: &NaturalKey,
        payload: &NotificationPayload,
    ) -> Result<UpsertOutcome> {
        let sample_json = serde_json::to_string(&payload.sample_actor_ids)?;
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            INSERT INTO notifications (
                region, subject_id, event_type, window_start,
                aggregated_count, sample_actor_ids, message, created_at, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(region, subject_id, event_type, window_start) DO NOTHING
            "#,
            params![
                key.region,
                key.subject_id,
                key.event_type.as_str(),
                key.window_start,
                payload.aggregated_count as i64,
                sample_json,
                payload.message,
                payload.created_at,
                NotificationStatus::Unread.as_str(),
            ],
        )?;

        if changed == 0 {
            Ok(UpsertOutcome::AlreadyExists)
        } else {
            Ok(UpsertOutcome::Created(conn.last_insert_rowid()))
        }
    }

    async fn notifications_for_subject(&self, subject_id: &str) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, region, subject_id, event_type, window_start,
                   aggregated_count, sample_actor_ids, message, created_at, status
            FROM notifications
            WHERE subject_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )?;

        let rows = stmt.query_map(params![subject_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut notifications = Vec::new();
        for row in rows {
            let (
                id,
                region,
                subject_id,
                event_type,
                window_start,
                count,
                sample,
                message,
                created_at,
                status,
            ) = row?;
            let event_type = EventType::from_str(&event_type).ok_or_else(|| {
                Error::durable_store(format!("unknown event_type in row {}: {}", id, event_type))
            })?;
            let status = NotificationStatus::from_str(&status).ok_or_else(|| {
                Error::durable_store(format!("unknown status in row {}: {}", id, status))
            })?;

            notifications.push(Notification {
                id,
                region,
                subject_id,
                event_type,
                window_start,
                aggregated_count: count.max(0) as u64,
                sample_actor_ids: serde_json::from_str(&sample)?,
                message,
                created_at,
                status,
            });
        }

        Ok(notifications)
    }
}
