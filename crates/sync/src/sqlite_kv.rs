//! SQLite-backed [`KeyValueStore`] for offline desktop use.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::kv::{KeyValueStore, KvError};

/// Durable key/value store in a single `kv_store` table.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    url: String,
    /// Opened on first use.
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteKeyValueStore {
    /// Store at an explicit SQLite URL (`sqlite://…` or `sqlite::memory:`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Store under the platform data directory (`…/tradeflow/sync.db`).
    pub fn at_default_path() -> anyhow::Result<Self> {
        let path = default_db_path().context("failed to determine sync DB path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create sync directory at {:?}", parent))?;
        }
        Ok(Self::new(format!("sqlite://{}", path.to_string_lossy())))
    }

    async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::from_str(&self.url)
            .with_context(|| format!("invalid SQLite url {:?}", self.url))?
            .create_if_missing(true);
        // One connection: an in-memory database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite store at {:?}", self.url))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv_store table")?;

        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .with_context(|| format!("failed to read key {key:?}"))?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn write(&self, key: &str, value: String) -> anyhow::Result<()> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .with_context(|| format!("failed to write key {key:?}"))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.read(key).await.map_err(|err| {
            tracing::error!("kv get failed: {err:?}");
            KvError::Backend(format!("{err:#}"))
        })
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        self.write(key, value).await.map_err(|err| {
            tracing::error!("kv set failed: {err:?}");
            KvError::Backend(format!("{err:#}"))
        })
    }
}

fn default_db_path() -> Option<PathBuf> {
    let mut dir = dirs::data_dir()?;
    dir.push("tradeflow");
    dir.push("sync.db");
    Some(dir)
}
