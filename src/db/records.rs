use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid updated_at '{value}'"))
}

fn row_to_record(row: &Row) -> Result<StoredRecord> {
    let updated_at: String = row.get("updated_at")?;
    Ok(StoredRecord {
        key: row.get("key")?,
        value: row.get("value")?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

impl Database {
    pub async fn get_record(&self, key: String) -> Result<Option<StoredRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, updated_at
                 FROM records
                 WHERE key = ?1",
            )?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_record(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Last write wins: concurrent writers to one key simply overwrite.
    pub async fn upsert_record(&self, key: String, value: String) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO records (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| "failed to upsert record")?;
            Ok(())
        })
        .await
    }

    /// Returns whether a row was deleted.
    pub async fn delete_record(&self, key: String) -> Result<bool> {
        self.execute(move |conn| {
            let deleted = conn
                .execute("DELETE FROM records WHERE key = ?1", params![key])
                .with_context(|| "failed to delete record")?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Records whose key starts with `prefix`, most recently updated first.
    pub async fn list_records(&self, prefix: String) -> Result<Vec<StoredRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, updated_at
                 FROM records
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query(params![prefix])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn record_exists(&self, key: String) -> Result<bool> {
        self.execute(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM records WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}
