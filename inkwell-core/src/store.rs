//! Transcript store — durable key → JSON record mapping
//!
//! Provides a `TranscriptStore` trait with implementations for:
//! - **Memory** — process-local map, used by tests and single-node dev runs
//! - **Postgres** — one `JSONB` row per key in `inkwell_records`
//!
//! Backends only move raw JSON. Typed records go through [`load`] / [`save`],
//! which reject payloads that do not match the expected record shape.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::StoreConfig;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No record stored under key {0:?}")]
    NotFound(String),

    #[error("Record under key {key:?} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Abstraction over the key-value backend holding session records.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Insert or replace the record under `key`.
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Fetch the record under `key`, failing with `NotFound` when absent.
    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Backend detail for health reporting.
    async fn health(&self) -> Result<String, StoreError> {
        Ok("ok".to_string())
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

pub fn story_key(session_id: &str) -> String {
    session_id.to_string()
}

pub fn website_key(session_id: &str) -> String {
    format!("{}:website", session_id)
}

pub fn interaction_key(session_id: &str) -> String {
    format!("{}:interaction", session_id)
}

/// Load and validate a typed record.
pub async fn load<T, S>(store: &S, key: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned,
    S: TranscriptStore + ?Sized,
{
    let value = store.get(key).await?;
    serde_json::from_value(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

pub async fn save<T, S>(store: &S, key: &str, record: &T) -> Result<(), StoreError>
where
    T: Serialize,
    S: TranscriptStore + ?Sized,
{
    let value = serde_json::to_value(record)?;
    store.put(key, value).await
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(key))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// PgStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `[store]` config and make sure the table exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = crate::db::create_pool(config).await?;
        crate::db::ensure_schema(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "Postgres transcript store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl TranscriptStore for PgStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inkwell_records (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT value FROM inkwell_records WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.0)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM inkwell_records WHERE key = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// TESTS
// ============================================================================
