//! # Event Store Repository
//!
//! Durable set of pending events keyed by identifier.
//!
//! ## Lifecycle of a Row
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  append(event, limit)                                                  │
//! │     INSERT ... SELECT ... WHERE (SELECT COUNT(*) FROM events) < limit  │
//! │       │   (one statement: the capacity check and insert are atomic)    │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  events                                                         │   │
//! │  │  id | timestamp | name | parameters (JSON)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  drain_oldest(n)  ← read-only, ORDER BY timestamp ASC                  │
//! │       │                                                                 │
//! │       ▼  (batch delivered)                                              │
//! │  remove(ids)      ← DELETE ... WHERE id IN (...)                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use beacon_core::{Event, EventParams, StoreStats};

/// SQLite caps bound parameters per statement; stay well under it.
const REMOVE_CHUNK: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    timestamp: i64,
    name: String,
    parameters: String,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let parameters = serde_json::from_str::<EventParams>(&row.parameters).unwrap_or_else(|e| {
            warn!(id = %row.id, error = %e, "Dropping unreadable event parameters");
            EventParams::new()
        });

        Event {
            id: row.id,
            timestamp: row.timestamp,
            name: row.name,
            parameters,
        }
    }
}

/// Repository for the pending event store.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EventRepository { pool }
    }

    /// Appends an event unless the store already holds `limit` events.
    ///
    /// ## Returns
    /// * `Err(DbError::CapacityExceeded)` - store full, nothing written
    /// * `Err(DbError::UniqueViolation)` - id already present
    pub async fn append(&self, event: &Event, limit: i64) -> DbResult<()> {
        let parameters = serde_json::to_string(&event.parameters)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (id, timestamp, name, parameters)
            SELECT ?1, ?2, ?3, ?4
            WHERE (SELECT COUNT(*) FROM events) < ?5
            "#,
        )
        .bind(&event.id)
        .bind(event.timestamp)
        .bind(&event.name)
        .bind(&parameters)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CapacityExceeded { limit });
        }

        debug!(id = %event.id, name = %event.name, "Event stored");
        Ok(())
    }

    /// Returns up to `limit` events, oldest first. Does not modify the store.
    pub async fn drain_oldest(&self, limit: u32) -> DbResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, timestamp, name, parameters
            FROM events
            ORDER BY timestamp ASC, id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    /// Deletes exactly the given events. Unknown ids are ignored.
    ///
    /// ## Returns
    /// Number of rows removed.
    pub async fn remove(&self, events: &[Event]) -> DbResult<u64> {
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        self.remove_ids(&ids).await
    }

    pub async fn remove_ids(&self, ids: &[&str]) -> DbResult<u64> {
        let mut removed = 0;

        for chunk in ids.chunks(REMOVE_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM events WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            removed += builder.build().execute(&self.pool).await?.rows_affected();
        }

        debug!(requested = ids.len(), removed, "Events removed");
        Ok(removed)
    }

    /// Count and oldest timestamp, read in a single statement.
    pub async fn stats(&self) -> DbResult<StoreStats> {
        let stats: StoreStats = sqlx::query_as(
            "SELECT COUNT(*) AS count, MIN(timestamp) AS oldest_timestamp FROM events",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    pub async fn count(&self) -> DbResult<i64> {
        Ok(self.stats().await?.count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use beacon_core::ParamValue;

    async fn repo() -> EventRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().events()
    }

    #[tokio::test]
    async fn test_empty_store_stats() {
        let repo = repo().await;
        let stats = repo.stats().await.unwrap();

        assert_eq!(stats.count, 0);
        assert_eq!(stats.oldest_timestamp, None);
    }

    #[tokio::test]
    async fn test_stats_track_min_timestamp() {
        let repo = repo().await;
        for ts in [300, 100, 200] {
            repo.append(&Event::new("e", ts), 100).await.unwrap();
        }

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.oldest_timestamp, Some(100));
    }

    #[tokio::test]
    async fn test_append_beyond_capacity_is_rejected() {
        let repo = repo().await;
        repo.append(&Event::new("a", 1), 2).await.unwrap();
        repo.append(&Event::new("b", 2), 2).await.unwrap();

        let err = repo.append(&Event::new("c", 0), 2).await.unwrap_err();
        assert!(err.is_capacity_exceeded());

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.oldest_timestamp, Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let repo = repo().await;
        let event = Event::new("a", 1);
        repo.append(&event, 10).await.unwrap();

        let err = repo.append(&event, 10).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_oldest_is_ordered_and_read_only() {
        let repo = repo().await;
        for ts in [50, 10, 40, 20, 30] {
            repo.append(&Event::new(format!("e{ts}"), ts), 100).await.unwrap();
        }

        let batch = repo.drain_oldest(3).await.unwrap();
        let timestamps: Vec<i64> = batch.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert_eq!(repo.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_parameters_survive_storage() {
        let repo = repo().await;
        let event = Event::new("purchase", 7)
            .with_param("sku", "gold")
            .with_param("qty", 2)
            .with_param("gift", false);
        repo.append(&event, 10).await.unwrap();

        let stored = repo.drain_oldest(1).await.unwrap().remove(0);
        assert_eq!(stored, event);
        assert_eq!(stored.parameters["qty"], ParamValue::Int(2));
    }

    #[tokio::test]
    async fn test_remove_exact_batch() {
        let repo = repo().await;
        for ts in 1..=4 {
            repo.append(&Event::new("e", ts), 100).await.unwrap();
        }

        let batch = repo.drain_oldest(2).await.unwrap();
        assert_eq!(repo.remove(&batch).await.unwrap(), 2);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.oldest_timestamp, Some(3));
    }

    #[tokio::test]
    async fn test_remove_unknown_ids_is_noop() {
        let repo = repo().await;
        repo.append(&Event::new("e", 1), 10).await.unwrap();

        assert_eq!(repo.remove(&[Event::new("ghost", 1)]).await.unwrap(), 0);
        assert_eq!(repo.remove(&[]).await.unwrap(), 0);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_parameters_read_as_empty() {
        let repo = repo().await;
        sqlx::query("INSERT INTO events (id, timestamp, name, parameters) VALUES ('x', 1, 'n', 'not json')")
            .execute(&repo.pool)
            .await
            .unwrap();

        let events = repo.drain_oldest(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].parameters.is_empty());
    }
}
