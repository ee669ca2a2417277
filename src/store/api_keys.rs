use super::Store;
use crate::error::Result;
use crate::models::{ApiKey, NewApiKey};
use chrono::{DateTime, Utc};

impl Store {
    pub async fn insert_api_key(&self, key: &NewApiKey) -> Result<ApiKey> {
        let stored = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (name, description, key_hash, key_prefix, is_active, created_at, expires_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&key.name)
        .bind(key.description.as_deref())
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(key.created_at)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Active keys whose display prefix matches; the candidates a presented key is verified against
    pub async fn active_api_keys_with_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE key_prefix = ? AND is_active = 1 ORDER BY id",
        )
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    pub async fn get_api_key(&self, id: i64) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(key)
    }

    pub async fn list_api_keys(&self, include_inactive: bool) -> Result<Vec<ApiKey>> {
        let query = if include_inactive {
            "SELECT * FROM api_keys ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT * FROM api_keys WHERE is_active = 1 ORDER BY created_at DESC, id DESC"
        };

        let keys = sqlx::query_as::<_, ApiKey>(query)
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    /// Flip the active flag; `None` when no key has this id
    pub async fn set_api_key_active(&self, id: i64, active: bool) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            "UPDATE api_keys SET is_active = ? WHERE id = ? RETURNING *",
        )
        .bind(active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Count one use of the key in a single statement, so concurrent uses never lose an increment
    ///
    /// Only an active, unexpired key is counted; `None` means the key is unknown
    /// or stopped being usable since it was looked up.
    pub async fn record_api_key_use(&self, id: i64, at: DateTime<Utc>) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys
            SET request_count = request_count + 1, last_used_at = ?
            WHERE id = ?
              AND is_active = 1
              AND (expires_at IS NULL OR expires_at > ?)
            RETURNING *
            "#,
        )
        .bind(at)
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }
}
