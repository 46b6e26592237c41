//! SQLite storage backend.
//!
//! Timestamps are stored as microseconds since the Unix epoch so that
//! ordering in SQL matches ordering in Rust.

use super::{IncidentStore, ResultStore, StoreError, TargetStore};
use crate::types::{CheckOutcome, Incident, OutcomeCounts, ProbeResult, Target, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS targets (
        id INTEGER PRIMARY KEY,
        url TEXT NOT NULL,
        check_interval INTEGER NOT NULL DEFAULT 60,
        is_active INTEGER NOT NULL DEFAULT 1,
        last_checked_us INTEGER NULL
    )",
    "CREATE TABLE IF NOT EXISTS check_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        response_time_ms REAL NULL,
        error_message TEXT NULL,
        checked_us INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_check_results_target_time
        ON check_results (target_id, checked_us)",
    "CREATE TABLE IF NOT EXISTS incidents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        start_us INTEGER NOT NULL,
        end_us INTEGER NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_one_open
        ON incidents (target_id) WHERE end_us IS NULL",
];

/// Storage backed by a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://uptime.db` or `sqlite::memory:`)
    /// and create the schema if needed.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to an in-memory database sees a different database.
        let max_connections = if in_memory { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert or replace a target
    pub async fn upsert_target(&self, target: &Target) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO targets (id, url, check_interval, is_active, last_checked_us)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                check_interval = excluded.check_interval,
                is_active = excluded.is_active",
        )
        .bind(target.id)
        .bind(&target.url)
        .bind(target.check_interval)
        .bind(target.is_active)
        .bind(target.last_checked_at.map(to_micros))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", us)))
}

fn target_from_row(row: &SqliteRow) -> Result<Target, StoreError> {
    let last_checked: Option<i64> = row.try_get("last_checked_us")?;
    Ok(Target {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        check_interval: row.try_get("check_interval")?,
        is_active: row.try_get("is_active")?,
        last_checked_at: last_checked.map(from_micros).transpose()?,
    })
}

fn outcome_from_row(row: &SqliteRow) -> Result<CheckOutcome, StoreError> {
    let status: String = row.try_get("status")?;
    let result = match status.as_str() {
        "UP" => ProbeResult::Up {
            latency_ms: row
                .try_get::<Option<f64>, _>("response_time_ms")?
                .unwrap_or_default(),
        },
        "DOWN" => ProbeResult::Down {
            error: row
                .try_get::<Option<String>, _>("error_message")?
                .unwrap_or_default(),
        },
        other => return Err(StoreError::Corrupt(format!("unknown status: {}", other))),
    };

    Ok(CheckOutcome {
        target_id: row.try_get("target_id")?,
        checked_at: from_micros(row.try_get("checked_us")?)?,
        result,
    })
}

fn incident_from_row(row: &SqliteRow) -> Result<Incident, StoreError> {
    let end: Option<i64> = row.try_get("end_us")?;
    Ok(Incident {
        target_id: row.try_get("target_id")?,
        start: from_micros(row.try_get("start_us")?)?,
        end: end.map(from_micros).transpose()?,
    })
}

fn collect<T>(
    rows: Vec<SqliteRow>,
    f: fn(&SqliteRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(f).collect()
}

#[async_trait]
impl TargetStore for SqliteStore {
    async fn list_active_targets(&self) -> Result<Vec<Target>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, url, check_interval, is_active, last_checked_us
             FROM targets WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows, target_from_row)
    }

    async fn mark_checked(
        &self,
        target_id: TargetId,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE targets SET last_checked_us = ? WHERE id = ?")
            .bind(to_micros(checked_at))
            .bind(target_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!(target_id, "Ignoring check mark for unknown target");
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn append_outcome(&self, outcome: &CheckOutcome) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO check_results
                (target_id, status, response_time_ms, error_message, checked_us)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(outcome.target_id)
        .bind(outcome.status().as_str())
        .bind(outcome.latency_ms())
        .bind(outcome.error())
        .bind(to_micros(outcome.checked_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_outcomes(
        &self,
        target_id: TargetId,
        limit: usize,
    ) -> Result<Vec<CheckOutcome>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, status, response_time_ms, error_message, checked_us
             FROM check_results WHERE target_id = ?
             ORDER BY checked_us DESC, id DESC LIMIT ?",
        )
        .bind(target_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        collect(rows, outcome_from_row)
    }

    async fn outcome_history(&self, target_id: TargetId) -> Result<Vec<CheckOutcome>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, status, response_time_ms, error_message, checked_us
             FROM check_results WHERE target_id = ?
             ORDER BY checked_us ASC, id ASC",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, outcome_from_row)
    }

    async fn outcomes_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckOutcome>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, status, response_time_ms, error_message, checked_us
             FROM check_results
             WHERE target_id = ? AND checked_us >= ? AND checked_us <= ?
             ORDER BY checked_us ASC, id ASC",
        )
        .bind(target_id)
        .bind(to_micros(from))
        .bind(to_micros(to))
        .fetch_all(&self.pool)
        .await?;
        collect(rows, outcome_from_row)
    }

    async fn outcome_counts(&self, target_ids: &[TargetId]) -> Result<OutcomeCounts, StoreError> {
        if target_ids.is_empty() {
            return Ok(OutcomeCounts::default());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN status = 'DOWN' THEN 1 ELSE 0 END), 0) AS down
             FROM check_results WHERE target_id IN (",
        );
        let mut ids = query.separated(", ");
        for id in target_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let row = query.build().fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        let down: i64 = row.try_get("down")?;
        Ok(OutcomeCounts {
            total: total.max(0) as u64,
            down: down.max(0) as u64,
        })
    }

    async fn average_latency(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            "SELECT AVG(response_time_ms) AS avg_ms FROM check_results
             WHERE target_id = ? AND status = 'UP' AND checked_us >= ? AND checked_us <= ?",
        )
        .bind(target_id)
        .bind(to_micros(from))
        .bind(to_micros(to))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("avg_ms")?)
    }
}

#[async_trait]
impl IncidentStore for SqliteStore {
    async fn open_incident(
        &self,
        target_id: TargetId,
        start: DateTime<Utc>,
    ) -> Result<Incident, StoreError> {
        // One statement, so no read-to-write lock upgrade under WAL.
        // `idx_incidents_one_open` rejects a second open row.
        let inserted = sqlx::query("INSERT INTO incidents (target_id, start_us) VALUES (?, ?)")
            .bind(target_id)
            .bind(to_micros(start))
            .execute(&self.pool)
            .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::IncidentAlreadyOpen { target_id });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Incident::open(target_id, start))
    }

    async fn close_open_incident(
        &self,
        target_id: TargetId,
        end: DateTime<Utc>,
    ) -> Result<Option<Incident>, StoreError> {
        let row = sqlx::query(
            "UPDATE incidents SET end_us = ?
             WHERE target_id = ? AND end_us IS NULL
             RETURNING target_id, start_us, end_us",
        )
        .bind(to_micros(end))
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn get_open_incident(&self, target_id: TargetId) -> Result<Option<Incident>, StoreError> {
        let row = sqlx::query(
            "SELECT target_id, start_us, end_us FROM incidents
             WHERE target_id = ? AND end_us IS NULL",
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn incidents_for(&self, target_id: TargetId) -> Result<Vec<Incident>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, start_us, end_us FROM incidents
             WHERE target_id = ? ORDER BY start_us ASC, id ASC",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, incident_from_row)
    }

    async fn incidents_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, start_us, end_us FROM incidents
             WHERE target_id = ? AND start_us >= ? AND start_us <= ?
             ORDER BY start_us DESC, id DESC",
        )
        .bind(target_id)
        .bind(to_micros(from))
        .bind(to_micros(to))
        .fetch_all(&self.pool)
        .await?;
        collect(rows, incident_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_outcome_queries() {
        conformance::outcome_queries(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_incident_lifecycle() {
        conformance::incident_lifecycle(&memory_store().await).await;
    }

    #[tokio::test]
    async fn test_target_bookkeeping() {
        let store = memory_store().await;
        for target in conformance::seed_targets() {
            store.upsert_target(&target).await.unwrap();
        }
        conformance::target_bookkeeping(&store).await;
    }

    #[tokio::test]
    async fn test_data_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("uptime.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.upsert_target(&Target::new(1, "http://one.test", 60)).await.unwrap();
        store
            .append_outcome(&CheckOutcome::down(1, conformance::at(0), "Connection error"))
            .await
            .unwrap();
        store.open_incident(1, conformance::at(0)).await.unwrap();
        store.close().await;

        let store = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(store.list_active_targets().await.unwrap().len(), 1);
        assert_eq!(store.outcome_history(1).await.unwrap().len(), 1);
        assert_eq!(
            store.get_open_incident(1).await.unwrap(),
            Some(Incident::open(1, conformance::at(0)))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("uptime.db").display());
        let store = std::sync::Arc::new(SqliteStore::connect(&url).await.unwrap());

        let mut handles = Vec::new();
        for target_id in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..5 {
                    let down_at = conformance::at(round * 10);
                    let up_at = conformance::at(round * 10 + 5);
                    store
                        .append_outcome(&CheckOutcome::down(target_id, down_at, "Connection error"))
                        .await
                        .unwrap();
                    store.open_incident(target_id, down_at).await.unwrap();
                    store
                        .append_outcome(&CheckOutcome::up(target_id, up_at, 10.0))
                        .await
                        .unwrap();
                    store.close_open_incident(target_id, up_at).await.unwrap().unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for target_id in 0..64 {
            assert_eq!(store.outcome_history(target_id).await.unwrap().len(), 10);
            let incidents = store.incidents_for(target_id).await.unwrap();
            assert_eq!(incidents.len(), 5);
            assert!(incidents.iter().all(|i| !i.is_open()));
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_last_checked() {
        let store = memory_store().await;
        let target = Target::new(1, "http://one.test", 60);
        store.upsert_target(&target).await.unwrap();
        store.mark_checked(1, conformance::at(10)).await.unwrap();

        let mut updated = target.clone();
        updated.url = "http://moved.test".to_string();
        store.upsert_target(&updated).await.unwrap();

        let active = store.list_active_targets().await.unwrap();
        assert_eq!(active[0].url, "http://moved.test");
        assert_eq!(active[0].last_checked_at, Some(conformance::at(10)));
    }
}
