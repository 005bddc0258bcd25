//! SQLite buffer backend.

use super::{BufferedRecord, NewRecord, UploadLimit};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use fieldlink_types::{DataError, DataKind, SettingValue, SettingsSnapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite-backed buffer file.
///
/// Holds no open handle: every operation opens its own connection and closes
/// it before returning, so several processes can share the file. WAL mode and
/// a busy timeout let SQLite's own locking serialize concurrent writers.
#[derive(Debug, Clone)]
pub struct BufferStore {
    options: SqliteConnectOptions,
    path: PathBuf,
}

impl BufferStore {
    /// Open (creating if missing) the buffer file at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let store = Self {
            options,
            path: path.to_path_buf(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Path of the buffer file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> StoreResult<SqliteConnection> {
        SqliteConnection::connect_with(&self.options)
            .await
            .map_err(StoreError::Database)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        let mut conn = self.connect().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                data_kind INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                payload TEXT NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_observations_pending ON observations(uploaded, id)",
        )
        .execute(&mut conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_observations_timestamp ON observations(timestamp_ms)",
        )
        .execute(&mut conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings_snapshot (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                mid TEXT NOT NULL,
                fetched_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings_values (
                position INTEGER PRIMARY KEY,
                setting_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                data_kind INTEGER NOT NULL,
                is_default INTEGER NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut conn)
        .await?;

        conn.close().await?;
        Ok(())
    }

    // =======================================================================
    // Observations
    // =======================================================================

    /// Append one record and return its id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Data`] if the kind is not bufferable; nothing is written.
    pub async fn append(&self, record: &NewRecord) -> StoreResult<i64> {
        check_bufferable(record.data_kind)?;

        let mut conn = self.connect().await?;
        let id = insert_record(&mut conn, record).await?;
        conn.close().await?;
        Ok(id)
    }

    /// Append records in order over one connection.
    ///
    /// Each insert commits on its own, so a crash part way keeps the prefix.
    /// Kinds are checked before anything is written.
    pub async fn append_all(&self, records: &[NewRecord]) -> StoreResult<Vec<i64>> {
        for record in records {
            check_bufferable(record.data_kind)?;
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connect().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_record(&mut conn, record).await?);
        }
        conn.close().await?;

        tracing::debug!("Buffered {} records", ids.len());
        Ok(ids)
    }

    /// Pending records in ascending id order, at most `limit` of them.
    pub async fn scan_pending(&self, limit: UploadLimit) -> StoreResult<Vec<BufferedRecord>> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, subject_id, data_kind, timestamp_ms, payload, uploaded
            FROM observations
            WHERE uploaded = 0
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit.as_sql())
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;

        rows.into_iter().map(BufferedRecord::try_from).collect()
    }

    /// Mark every pending record with `id <= max_id` as uploaded.
    ///
    /// Returns the number of records changed. Repeating it is a no-op.
    pub async fn mark_uploaded_up_to(&self, max_id: i64) -> StoreResult<u64> {
        let mut conn = self.connect().await?;
        let result =
            sqlx::query("UPDATE observations SET uploaded = 1 WHERE uploaded = 0 AND id <= ?1")
                .bind(max_id)
                .execute(&mut conn)
                .await?;
        conn.close().await?;
        Ok(result.rows_affected())
    }

    /// Mark pending records observed within `[from, to]` as uploaded.
    pub async fn mark_uploaded_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(
            r#"
            UPDATE observations SET uploaded = 1
            WHERE uploaded = 0 AND timestamp_ms >= ?1 AND timestamp_ms <= ?2
            "#,
        )
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .execute(&mut conn)
        .await?;
        conn.close().await?;
        Ok(result.rows_affected())
    }

    /// Mark the whole backlog as uploaded.
    pub async fn mark_all_uploaded(&self) -> StoreResult<u64> {
        let mut conn = self.connect().await?;
        let result = sqlx::query("UPDATE observations SET uploaded = 1 WHERE uploaded = 0")
            .execute(&mut conn)
            .await?;
        conn.close().await?;
        Ok(result.rows_affected())
    }

    /// Physically delete every observation record, pending or not.
    ///
    /// Ids are not reused afterwards.
    pub async fn purge(&self) -> StoreResult<u64> {
        let mut conn = self.connect().await?;
        let result = sqlx::query("DELETE FROM observations")
            .execute(&mut conn)
            .await?;
        conn.close().await?;
        Ok(result.rows_affected())
    }

    /// Number of pending records.
    pub async fn count_pending(&self) -> StoreResult<u64> {
        let mut conn = self.connect().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM observations WHERE uploaded = 0")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(count as u64)
    }

    // =======================================================================
    // Settings
    // =======================================================================

    /// Replace the durable settings copy with `snapshot` in one transaction.
    pub async fn replace_settings(&self, snapshot: &SettingsSnapshot) -> StoreResult<()> {
        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM settings_values")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM settings_snapshot")
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO settings_snapshot (slot, mid, fetched_at_ms) VALUES (0, ?1, ?2)")
            .bind(&snapshot.mid)
            .bind(snapshot.fetched_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;

        for (position, value) in snapshot.values.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO settings_values (position, setting_id, name, data_kind, is_default, value)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(position as i64)
            .bind(value.id)
            .bind(&value.name)
            .bind(value.data_kind.code())
            .bind(value.is_default)
            .bind(&value.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        conn.close().await?;
        Ok(())
    }

    /// The durable settings copy, if one was ever written.
    pub async fn load_settings(&self) -> StoreResult<Option<SettingsSnapshot>> {
        let mut conn = self.connect().await?;

        let header: Option<(String, i64)> =
            sqlx::query_as("SELECT mid, fetched_at_ms FROM settings_snapshot WHERE slot = 0")
                .fetch_optional(&mut conn)
                .await?;
        let Some((mid, fetched_at_ms)) = header else {
            conn.close().await?;
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, SettingRow>(
            r#"
            SELECT setting_id, name, data_kind, is_default, value
            FROM settings_values
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;

        let values = rows
            .into_iter()
            .map(SettingValue::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(SettingsSnapshot {
            mid,
            fetched_at: from_millis(fetched_at_ms)?,
            values,
        }))
    }
}

fn check_bufferable(kind: DataKind) -> StoreResult<()> {
    if kind.is_bufferable() {
        Ok(())
    } else {
        Err(StoreError::Data(DataError::UnsupportedKind(kind)))
    }
}

async fn insert_record(conn: &mut SqliteConnection, record: &NewRecord) -> StoreResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO observations (subject_id, data_kind, timestamp_ms, payload, uploaded)
        VALUES (?1, ?2, ?3, ?4, 0)
        "#,
    )
    .bind(record.subject_id)
    .bind(record.data_kind.code())
    .bind(record.timestamp.timestamp_millis())
    .bind(&record.payload)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}

/// Internal row type for buffered observations.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    subject_id: i32,
    data_kind: i64,
    timestamp_ms: i64,
    payload: String,
    uploaded: bool,
}

impl TryFrom<RecordRow> for BufferedRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let data_kind = DataKind::from_code(row.data_kind)?;
        check_bufferable(data_kind)?;

        Ok(BufferedRecord {
            id: row.id,
            subject_id: row.subject_id,
            data_kind,
            timestamp: from_millis(row.timestamp_ms)?,
            payload: row.payload,
            uploaded: row.uploaded,
        })
    }
}

/// Internal row type for buffered settings.
#[derive(sqlx::FromRow)]
struct SettingRow {
    setting_id: i32,
    name: String,
    data_kind: i64,
    is_default: bool,
    value: String,
}

impl TryFrom<SettingRow> for SettingValue {
    type Error = StoreError;

    fn try_from(row: SettingRow) -> Result<Self, Self::Error> {
        Ok(SettingValue {
            id: row.setting_id,
            name: row.name,
            data_kind: DataKind::from_code(row.data_kind)?,
            is_default: row.is_default,
            value: row.value,
        })
    }
}
