use crate::StorageError;
use cockpit_core::MetricsEntry;
use cockpit_safety::{GuardedFs, OpenMode};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const METRICS_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed metrics history. Every call opens its own short-lived
/// connection and runs the idempotent migration first.
#[derive(Debug, Clone)]
pub struct MetricsDb {
    path: PathBuf,
    fs: GuardedFs,
}

impl MetricsDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fs: GuardedFs::unguarded(),
        }
    }

    /// Routes directory creation and write checks through `fs`.
    pub fn with_fs(mut self, fs: GuardedFs) -> Self {
        self.fs = fs;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        migrate(&conn)?;
        Ok(conn)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.connect()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Inserts all entries in one transaction; returns the number written.
    pub fn insert_entries(&self, entries: &[MetricsEntry]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.fs.safety().check_write(&self.path, OpenMode::ReadWriteCreate)?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO metrics (
                    timestamp,
                    script_path,
                    score,
                    runtime_ms,
                    component,
                    metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for entry in entries {
                let metadata = serde_json::to_string(&entry.metadata)
                    .map_err(|err| StorageError::Serialization(err.to_string()))?;
                stmt.execute(params![
                    entry.timestamp,
                    entry.script_path,
                    entry.score,
                    entry.runtime_ms,
                    entry.component,
                    metadata,
                ])?;
            }
        }
        tx.commit()?;
        debug!(path = %self.path.display(), rows = entries.len(), "metrics_stored");
        Ok(entries.len())
    }

    pub fn row_count(&self) -> Result<u64, StorageError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn latest_for_script(&self, script_path: &str) -> Result<Option<MetricsEntry>, StorageError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "
                SELECT timestamp, script_path, score, runtime_ms, component, metadata
                FROM metrics
                WHERE script_path = ?1
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
                ",
                [script_path],
                read_row,
            )
            .optional()?;
        row.map(decode_entry).transpose()
    }

    /// Newest first, at most `limit` rows.
    pub fn history(&self, script_path: &str, limit: usize) -> Result<Vec<MetricsEntry>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "
            SELECT timestamp, script_path, score, runtime_ms, component, metadata
            FROM metrics
            WHERE script_path = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            ",
        )?;
        let rows = stmt.query_map(params![script_path, limit as i64], read_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_entry(row?)?);
        }
        Ok(entries)
    }
}

type RawRow = (f64, String, Option<f64>, Option<f64>, Option<String>, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_entry(raw: RawRow) -> Result<MetricsEntry, StorageError> {
    let (timestamp, script_path, score, runtime_ms, component, metadata) = raw;
    let metadata = match metadata {
        Some(text) if !text.is_empty() => serde_json::from_str(&text)
            .map_err(|err| StorageError::Serialization(err.to_string()))?,
        _ => Value::Null,
    };
    Ok(MetricsEntry {
        timestamp,
        script_path,
        score: score.unwrap_or(0.0),
        runtime_ms,
        component,
        metadata,
    })
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > METRICS_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: METRICS_SCHEMA_VERSION,
        });
    }
    if current < 1 {
        conn.execute_batch(include_str!("../migrations/0001_metrics.sql"))?;
        conn.execute_batch("PRAGMA user_version = 1")?;
    }
    Ok(())
}
