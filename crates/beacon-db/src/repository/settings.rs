//! # Settings Repository
//!
//! Durable key-value storage for small pieces of client state. Absent keys
//! read as `None`; callers supply their own defaults.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Well-known setting keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// Last computed device profile.
    CurrentProfile,
    /// Last device profile the collector accepted.
    AcknowledgedProfile,
    /// Cumulative retry wake counter.
    RetryAttempts,
    /// Set once the first retry wake has been registered.
    RetryScheduled,
    /// Collector endpoint supplied by the host.
    CollectorEndpoint,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::CurrentProfile => "profile.current",
            SettingKey::AcknowledgedProfile => "profile.acknowledged",
            SettingKey::RetryAttempts => "retry.attempts",
            SettingKey::RetryScheduled => "retry.scheduled",
            SettingKey::CollectorEndpoint => "collector.endpoint",
        }
    }
}

impl AsRef<str> for SettingKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    pub async fn get(&self, key: impl AsRef<str>) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(key.as_ref())
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    pub async fn put(&self, key: impl AsRef<str>, value: &str) -> DbResult<()> {
        let key = key.as_ref();

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(key, "Setting stored");
        Ok(())
    }

    pub async fn delete(&self, key: impl AsRef<str>) -> DbResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reads and parses a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> DbResult<Option<T>> {
        let key = key.as_ref();
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DbError::CorruptValue {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: impl AsRef<str>, value: &T) -> DbResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| DbError::Internal(e.to_string()))?;
        self.put(key, &raw).await
    }

    pub async fn get_i64(&self, key: impl AsRef<str>) -> DbResult<Option<i64>> {
        let key = key.as_ref();
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| DbError::CorruptValue {
                    key: key.to_string(),
                    message: format!("not an integer: {raw}"),
                }),
            None => Ok(None),
        }
    }

    pub async fn get_flag(&self, key: impl AsRef<str>) -> DbResult<bool> {
        Ok(self.get(key).await?.as_deref() == Some("true"))
    }

    pub async fn set_flag(&self, key: impl AsRef<str>, value: bool) -> DbResult<()> {
        self.put(key, if value { "true" } else { "false" }).await
    }

    /// Atomically adds one to an integer setting (absent counts as 0).
    ///
    /// ## Returns
    /// The value after the increment.
    pub async fn increment(&self, key: impl AsRef<str>) -> DbResult<i64> {
        let value: String = sqlx::query_scalar(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, '1', ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(CAST(settings.value AS INTEGER) + 1 AS TEXT),
                updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(key.as_ref())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        value.parse().map_err(|_| DbError::CorruptValue {
            key: key.as_ref().to_string(),
            message: format!("not an integer: {value}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde::Deserialize;

    async fn repo() -> SettingsRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().settings()
    }

    #[tokio::test]
    async fn test_absent_key_reads_none() {
        let repo = repo().await;
        assert_eq!(repo.get("missing").await.unwrap(), None);
        assert_eq!(repo.get_i64(SettingKey::RetryAttempts).await.unwrap(), None);
        assert!(!repo.get_flag(SettingKey::RetryScheduled).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let repo = repo().await;
        repo.put("k", "a").await.unwrap();
        repo.put("k", "b").await.unwrap();
        assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("b"));

        repo.delete("k").await.unwrap();
        assert_eq!(repo.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Snapshot {
            geo: String,
        }

        let repo = repo().await;
        let snapshot = Snapshot { geo: "DE".into() };
        repo.put_json(SettingKey::CurrentProfile, &snapshot).await.unwrap();

        let loaded: Option<Snapshot> = repo.get_json(SettingKey::CurrentProfile).await.unwrap();
        assert_eq!(loaded, Some(snapshot));

        repo.put(SettingKey::CurrentProfile, "{broken").await.unwrap();
        let err = repo.get_json::<Snapshot>(SettingKey::CurrentProfile).await.unwrap_err();
        assert!(matches!(err, DbError::CorruptValue { .. }));
    }

    #[tokio::test]
    async fn test_increment_counts_from_zero() {
        let repo = repo().await;
        assert_eq!(repo.increment(SettingKey::RetryAttempts).await.unwrap(), 1);
        assert_eq!(repo.increment(SettingKey::RetryAttempts).await.unwrap(), 2);
        assert_eq!(repo.get_i64(SettingKey::RetryAttempts).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_flags() {
        let repo = repo().await;
        repo.set_flag(SettingKey::RetryScheduled, true).await.unwrap();
        assert!(repo.get_flag(SettingKey::RetryScheduled).await.unwrap());
    }
}
