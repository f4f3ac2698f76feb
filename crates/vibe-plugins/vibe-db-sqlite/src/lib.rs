//! # vibe-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `vibe-core` domain models. One pool backs both the rate limiter and
//! the vibe gallery.
//!
//! Timestamps are stored as Unix milliseconds so that ordering in SQL matches
//! ordering in Rust.

use std::str::FromStr;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;
use vibe_core::models::{Mode, RateLimitRecord, VibeResult};
use vibe_core::traits::{RateLimitStore, VibeRepo};

/// Idempotent schema; safe to run on every start.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rate_limits (
        key TEXT PRIMARY KEY,
        request_timestamps TEXT NOT NULL,
        count INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        version INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_rate_limits_updated_at ON rate_limits (updated_at)",
    "CREATE TABLE IF NOT EXISTS vibe_results (
        id BLOB PRIMARY KEY,
        seo_id TEXT NOT NULL,
        store_url TEXT NOT NULL,
        mode TEXT NOT NULL,
        vibe_prompt TEXT NOT NULL,
        image_url TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        is_public INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_vibe_results_seo_id ON vibe_results (seo_id)",
    "CREATE INDEX IF NOT EXISTS idx_vibe_results_mode ON vibe_results (mode)",
    "CREATE INDEX IF NOT EXISTS idx_vibe_results_created_at ON vibe_results (created_at DESC)",
];

const VIBE_COLUMNS: &str = "id, seo_id, store_url, mode, vibe_prompt, image_url, ip_address, is_public, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

// Helpers for UUID and timestamp conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn millis_to_datetime(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

fn row_to_vibe(row: &SqliteRow) -> anyhow::Result<VibeResult> {
    let id: Vec<u8> = row.try_get("id")?;
    let mode: String = row.try_get("mode")?;
    Ok(VibeResult {
        id: Uuid::from_slice(&id).context("malformed vibe id")?,
        seo_id: row.try_get("seo_id")?,
        store_url: row.try_get("store_url")?,
        mode: mode.parse::<Mode>()?,
        vibe_prompt: row.try_get("vibe_prompt")?,
        image_url: row.try_get("image_url")?,
        ip_address: row.try_get("ip_address")?,
        is_public: row.try_get("is_public")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
    })
}

fn row_to_rate_limit(row: &SqliteRow) -> anyhow::Result<RateLimitRecord> {
    let raw: String = row.try_get("request_timestamps")?;
    let timestamps = serde_json::from_str::<Vec<i64>>(&raw)
        .context("malformed request_timestamps")?
        .into_iter()
        .map(millis_to_datetime)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(RateLimitRecord::with_timestamps(
        row.try_get("key")?,
        timestamps,
        millis_to_datetime(row.try_get("updated_at")?)?,
        row.try_get("version")?,
    ))
}

fn encode_timestamps(record: &RateLimitRecord) -> anyhow::Result<String> {
    let millis: Vec<i64> = record.request_timestamps.iter().map(DateTime::timestamp_millis).collect();
    Ok(serde_json::to_string(&millis)?)
}

impl SqliteStore {
    /// Opens (creating if missing) the database and ensures the schema exists.
    ///
    /// Call once at startup and share the store; the pool is the long-lived handle.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().max_connections(8).connect_with(options).await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!(%url, "sqlite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<RateLimitRecord>> {
        let row = sqlx::query(
            "SELECT key, request_timestamps, count, updated_at, version FROM rate_limits WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_rate_limit).transpose()
    }

    async fn insert(&self, record: &RateLimitRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO rate_limits (key, request_timestamps, count, updated_at, version)
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(&record.key)
        .bind(encode_timestamps(record)?)
        .bind(i64::from(record.count))
        .bind(record.updated_at.timestamp_millis())
        .bind(record.version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap on `version`.
    async fn replace(&self, record: &RateLimitRecord, expected_version: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE rate_limits SET request_timestamps = ?, count = ?, updated_at = ?, version = ?
             WHERE key = ? AND version = ?",
        )
        .bind(encode_timestamps(record)?)
        .bind(i64::from(record.count))
        .bind(record.updated_at.timestamp_millis())
        .bind(record.version)
        .bind(&record.key)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE updated_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VibeRepo for SqliteStore {
    /// The unique index on `seo_id` turns a taken slug into a no-op insert.
    async fn insert(&self, vibe: &VibeResult) -> anyhow::Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO vibe_results ({VIBE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(seo_id) DO NOTHING"
        ))
        .bind(uuid_to_blob(vibe.id))
        .bind(&vibe.seo_id)
        .bind(&vibe.store_url)
        .bind(vibe.mode.as_str())
        .bind(&vibe.vibe_prompt)
        .bind(&vibe.image_url)
        .bind(&vibe.ip_address)
        .bind(vibe.is_public)
        .bind(vibe.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_public(&self, mode: Option<Mode>, offset: u64, limit: u64) -> anyhow::Result<(Vec<VibeResult>, u64)> {
        let mode = mode.map(Mode::as_str);

        let total: i64 = sqlx::query("SELECT COUNT(*) FROM vibe_results WHERE is_public = 1 AND (?1 IS NULL OR mode = ?1)")
            .bind(mode)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        let rows = sqlx::query(&format!(
            "SELECT {VIBE_COLUMNS} FROM vibe_results
             WHERE is_public = 1 AND (?1 IS NULL OR mode = ?1)
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
        ))
        .bind(mode)
        .bind(i64::try_from(limit)?)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let vibes = rows.iter().map(row_to_vibe).collect::<anyhow::Result<Vec<_>>>()?;
        Ok((vibes, u64::try_from(total)?))
    }

    async fn find_by_seo_id(&self, seo_id: &str) -> anyhow::Result<Option<VibeResult>> {
        let row = sqlx::query(&format!("SELECT {VIBE_COLUMNS} FROM vibe_results WHERE seo_id = ?"))
            .bind(seo_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_vibe).transpose()
    }

    async fn find_related(&self, mode: Mode, exclude_id: Uuid, limit: u64) -> anyhow::Result<Vec<VibeResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {VIBE_COLUMNS} FROM vibe_results
             WHERE is_public = 1 AND mode = ? AND id != ?
             ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(mode.as_str())
        .bind(uuid_to_blob(exclude_id))
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_vibe).collect()
    }
}
