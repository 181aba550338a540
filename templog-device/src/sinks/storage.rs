//! SQLite reading store
//!
//! One row per reading in a configurable table:
//! `source, timestamp, temperature, pressure, humidity, wind (nullable)`.
//! Timestamps are stored as fixed-width UTC text so range queries compare
//! lexically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use templog_common::config::{is_valid_identifier, StorageConfig};
use templog_common::time::{format_timestamp, parse_timestamp};
use templog_common::{HourBucket, Reading};
use tracing::{debug, info};

use super::{ReadingStore, SaveOutcome};
use crate::error::{Error, Result};

/// Wall-clock source used to pick the current hour bucket
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type ReadingRow = (String, String, f64, f64, f64, Option<f64>);

pub struct SqliteReadingStore {
    pool: SqlitePool,
    table: String,
    clock: Clock,
}

impl SqliteReadingStore {
    /// Connect and make sure the readings table exists
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;

        let store = Self::from_pool(pool, table).await?;
        info!("Connected to reading store (table '{}')", table);
        Ok(store)
    }

    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::connect(&config.url, &config.collection, config.max_connections).await
    }

    /// Wrap an existing pool, creating the table and index if missing
    pub async fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        if !is_valid_identifier(table) {
            return Err(Error::Config(format!("invalid table name '{}'", table)));
        }

        let store = Self {
            pool,
            table: table.to_string(),
            clock: Arc::new(Utc::now),
        };
        store.init_table().await?;
        Ok(store)
    }

    /// Replace the wall clock (tests pin the current hour with this)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    async fn init_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                temperature REAL NOT NULL,
                pressure REAL NOT NULL,
                humidity REAL NOT NULL,
                wind REAL
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_source_timestamp ON {table} (source, timestamp)",
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether any record for `source` falls inside `bucket`
    pub async fn exists_in_bucket(&self, source: &str, bucket: &HourBucket) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE source = ? AND timestamp >= ? AND timestamp < ?)",
            self.table
        ))
        .bind(source)
        .bind(format_timestamp(&bucket.start()))
        .bind(format_timestamp(&bucket.end()))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Whether the hour being saved in, or the hour the reading was captured
    /// in, already holds a record for this source. The two differ when a
    /// reading captured just before the top of the hour is saved just after.
    async fn hour_already_recorded(&self, reading: &Reading) -> Result<bool> {
        let current = HourBucket::containing((self.clock)());
        if self.exists_in_bucket(&reading.source, &current).await? {
            return Ok(true);
        }
        if current.contains(reading.timestamp) {
            return Ok(false);
        }

        let captured = HourBucket::containing(reading.timestamp);
        self.exists_in_bucket(&reading.source, &captured).await
    }

    async fn insert(&self, reading: &Reading) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (source, timestamp, temperature, pressure, humidity, wind) VALUES (?, ?, ?, ?, ?, ?)",
            self.table
        ))
        .bind(&reading.source)
        .bind(format_timestamp(&reading.timestamp))
        .bind(reading.temperature)
        .bind(reading.pressure)
        .bind(reading.humidity)
        .bind(reading.wind)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of stored records for a source
    pub async fn count_for_source(&self, source: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE source = ?",
            self.table
        ))
        .bind(source)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Records for a source inside an hour bucket, oldest first
    pub async fn find_in_bucket(&self, source: &str, bucket: &HourBucket) -> Result<Vec<Reading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT source, timestamp, temperature, pressure, humidity, wind FROM {} \
             WHERE source = ? AND timestamp >= ? AND timestamp < ? ORDER BY timestamp",
            self.table
        ))
        .bind(source)
        .bind(format_timestamp(&bucket.start()))
        .bind(format_timestamp(&bucket.end()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_reading).collect()
    }

    /// Records for a source captured at exactly `timestamp`
    pub async fn find_at(&self, source: &str, timestamp: &DateTime<Utc>) -> Result<Vec<Reading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT source, timestamp, temperature, pressure, humidity, wind FROM {} \
             WHERE source = ? AND timestamp = ?",
            self.table
        ))
        .bind(source)
        .bind(format_timestamp(timestamp))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_reading).collect()
    }
}

fn row_to_reading(row: ReadingRow) -> Result<Reading> {
    let (source, timestamp, temperature, pressure, humidity, wind) = row;
    let timestamp = parse_timestamp(&timestamp).ok_or_else(|| {
        Error::Storage(sqlx::Error::Decode(
            format!("invalid stored timestamp '{}'", timestamp).into(),
        ))
    })?;

    Ok(Reading {
        source,
        timestamp,
        temperature,
        pressure,
        humidity,
        wind,
    })
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn save(&self, reading: &Reading, dedup_by_hour: bool) -> Result<SaveOutcome> {
        if dedup_by_hour && self.hour_already_recorded(reading).await? {
            debug!(
                "Skipping save for device ({}), record already exists for the current hour",
                reading.source
            );
            return Ok(SaveOutcome::SkippedDuplicate);
        }

        self.insert(reading).await?;
        Ok(SaveOutcome::Inserted)
    }
}
