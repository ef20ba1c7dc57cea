//! libSQL backend for the cursor store and contact memory.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::draft::style::{ContactProfile, ReplyLength, StyleHints, Tone};
use crate::error::DatabaseError;
use crate::pipeline::types::ChangeCursor;
use crate::store::migrations;
use crate::store::traits::{ContactMemory, CursorStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Delete contact profiles past their expiry. Returns the number removed.
    pub async fn prune_expired_contacts(&self) -> Result<u64, DatabaseError> {
        let cutoff =
            (Utc::now() - chrono::Duration::days(crate::draft::style::CONTACT_TTL_DAYS)).to_rfc3339();
        let removed = self
            .conn
            .execute(
                "DELETE FROM contact_profiles WHERE updated_at < ?1",
                params![cutoff],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_expired_contacts: {e}")))?;
        if removed > 0 {
            info!(removed, "Pruned expired contact profiles");
        }
        Ok(removed)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn cursor_to_db(cursor: ChangeCursor) -> Result<i64, DatabaseError> {
    i64::try_from(cursor.value())
        .map_err(|_| DatabaseError::Serialization(format!("cursor {cursor} exceeds i64")))
}

fn str_to_tone(s: &str) -> Tone {
    match s {
        "formal" => Tone::Formal,
        "casual" => Tone::Casual,
        _ => Tone::Mixed,
    }
}

fn str_to_length(s: &str) -> ReplyLength {
    match s {
        "short" => ReplyLength::Short,
        "long" => ReplyLength::Long,
        _ => ReplyLength::Medium,
    }
}

const PROFILE_COLUMNS: &str =
    "email, tone, greeting, formality, typical_length, sample_count, updated_at";

fn row_to_profile(row: &libsql::Row) -> Result<ContactProfile, libsql::Error> {
    let tone: String = row.get(1)?;
    let length: String = row.get(4)?;
    let sample_count: i64 = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(ContactProfile {
        email: row.get(0)?,
        style: StyleHints {
            tone: str_to_tone(&tone),
            greeting: row.get::<String>(2).ok(),
            formality: row.get(3)?,
            typical_length: str_to_length(&length),
            sample_count: u32::try_from(sample_count).unwrap_or(u32::MAX),
        },
        updated_at: parse_datetime(&updated),
    })
}

// ── CursorStore ─────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for LibSqlBackend {
    async fn read(&self) -> Result<Option<ChangeCursor>, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT value FROM change_cursor WHERE id = 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("read_cursor: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("read_cursor row parse: {e}")))?;
                let value = u64::try_from(value).map_err(|_| {
                    DatabaseError::Serialization(format!("negative cursor in store: {value}"))
                })?;
                Ok(Some(ChangeCursor(value)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("read_cursor: {e}"))),
        }
    }

    async fn compare_and_swap(
        &self,
        expected: Option<ChangeCursor>,
        new: ChangeCursor,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let new_value = cursor_to_db(new)?;
        let changed = match expected {
            None => self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO change_cursor (id, value, updated_at) VALUES (1, ?1, ?2)",
                    params![new_value, now],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("cas_cursor insert: {e}")))?,
            Some(expected) => self
                .conn
                .execute(
                    "UPDATE change_cursor SET value = ?1, updated_at = ?2 WHERE id = 1 AND value = ?3",
                    params![new_value, now, cursor_to_db(expected)?],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("cas_cursor update: {e}")))?,
        };
        debug!(?expected, new = %new, applied = changed == 1, "Cursor compare-and-swap");
        Ok(changed == 1)
    }
}

// ── ContactMemory ───────────────────────────────────────────────────

#[async_trait]
impl ContactMemory for LibSqlBackend {
    async fn load(&self, email: &str) -> Result<Option<ContactProfile>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM contact_profiles WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_contact: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => match row_to_profile(&row) {
                Ok(profile) => Ok(Some(profile)),
                Err(e) => {
                    warn!("Skipping unreadable contact row: {e}");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("load_contact: {e}"))),
        }
    }

    async fn save(&self, profile: &ContactProfile) -> Result<(), DatabaseError> {
        let style = &profile.style;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO contact_profiles ({PROFILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(email) DO UPDATE SET
                        tone = excluded.tone,
                        greeting = excluded.greeting,
                        formality = excluded.formality,
                        typical_length = excluded.typical_length,
                        sample_count = excluded.sample_count,
                        updated_at = excluded.updated_at"
                ),
                params![
                    profile.email.as_str(),
                    style.tone.as_str(),
                    style.greeting.clone(),
                    style.formality,
                    style.typical_length.as_str(),
                    i64::from(style.sample_count),
                    profile.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_contact: {e}")))?;
        Ok(())
    }
}
