use async_trait::async_trait;
use serde_json::Value;
use shared::RelayError;
use sqlx::{PgPool, Row};

use super::ObjectStore;

/// Postgres-backed object store: one `relay_objects` table keyed by string,
/// JSONB bodies.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing table if it does not exist.
    ///
    /// # Errors
    /// Returns [`RelayError::Storage`] if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), RelayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relay_objects (
                key TEXT PRIMARY KEY,
                body JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(err: sqlx::Error) -> RelayError {
    RelayError::Storage(err.to_string())
}

#[async_trait]
impl ObjectStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RelayError> {
        let row = sqlx::query("SELECT body FROM relay_objects WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.map(|row| row.get::<Value, _>("body")))
    }

    async fn put(&self, key: &str, body: &Value) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO relay_objects (key, body, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
        )
        .bind(key)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, RelayError> {
        // LIKE with the wildcard appended; the prefix itself never contains
        // pattern metacharacters given the key layout in `store::keys`.
        let rows = sqlx::query(
            "SELECT key, body FROM relay_objects WHERE key LIKE $1 || '%' ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("key"), row.get::<Value, _>("body")))
            .collect())
    }
}
