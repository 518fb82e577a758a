use crate::db::db_pool::DuckDbPool;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// One processed question as persisted in `query_history`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub query: String,
    pub generated_query: Option<String>,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Audit log of every question answered (or refused) by the service.
#[derive(Clone)]
pub struct HistoryStore {
    pool: DuckDbPool,
}

impl HistoryStore {
    pub async fn open(pool: DuckDbPool) -> Result<Self, BoxError> {
        let store = Self { pool };
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE SEQUENCE IF NOT EXISTS query_history_id_seq;
                     CREATE TABLE IF NOT EXISTS query_history (
                         id BIGINT PRIMARY KEY DEFAULT nextval('query_history_id_seq'),
                         query VARCHAR NOT NULL,
                         generated_query VARCHAR,
                         response VARCHAR NOT NULL,
                         created_at VARCHAR NOT NULL
                     );",
                )?;
                Ok(())
            })
            .await?;
        info!("Query history table ready");
        Ok(store)
    }

    pub async fn record(
        &self,
        query: &str,
        generated_query: Option<&str>,
        response: &str,
    ) -> Result<AuditRecord, BoxError> {
        let timestamp = Utc::now();
        let query = query.to_string();
        let generated_query = generated_query.map(str::to_string);
        let response = response.to_string();

        let mut record = AuditRecord {
            id: 0,
            query,
            generated_query,
            response,
            timestamp,
        };

        let row = record.clone();
        record.id = self
            .with_conn(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO query_history (query, generated_query, response, created_at)
                     VALUES (?, ?, ?, ?) RETURNING id",
                    duckdb::params![
                        row.query,
                        row.generated_query,
                        row.response,
                        row.timestamp.to_rfc3339()
                    ],
                    |r| r.get::<_, i64>(0),
                )?;
                Ok(id)
            })
            .await?;

        debug!("Recorded query history item {}", record.id);
        Ok(record)
    }

    /// Most recent records first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, BoxError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, query, generated_query, response, created_at
                 FROM query_history ORDER BY id DESC LIMIT ?",
            )?;
            let rows = stmt.query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, query, generated_query, response, created_at) = row?;
                records.push(AuditRecord {
                    id,
                    query,
                    generated_query,
                    response,
                    timestamp: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                });
            }
            Ok(records)
        })
        .await
    }

    pub async fn count(&self) -> Result<usize, BoxError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM query_history", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, BoxError>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T, BoxError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_pool::{build_pool, DuckDBConnectionManager};

    async fn memory_store() -> HistoryStore {
        let pool = build_pool(DuckDBConnectionManager::memory().unwrap(), 1).unwrap();
        HistoryStore::open(pool).await.unwrap()
    }

    #[tokio::test]
    async fn records_get_increasing_ids_and_list_newest_first() {
        let store = memory_store().await;

        let first = store
            .record("List all employees", Some("SELECT * FROM employees"), "2 rows")
            .await
            .unwrap();
        let second = store
            .record("Drop everything", None, "disallowed statement type")
            .await
            .unwrap();
        assert!(second.id > first.id);

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[0].generated_query, None);
        assert_eq!(recent[1].generated_query.as_deref(), Some("SELECT * FROM employees"));
        assert_eq!(recent[1].timestamp, first.timestamp);

        assert_eq!(store.recent(1).await.unwrap().len(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_limit_returns_everything() {
        let store = memory_store().await;
        store.record("first", None, "generation failed").await.unwrap();
        store.record("second", Some("SELECT 1"), "ok").await.unwrap();

        let all = store.recent(usize::MAX).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].query, "second");
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.duckdb");
        let path = path.to_str().unwrap();

        {
            let pool = build_pool(DuckDBConnectionManager::file(path).unwrap(), 1).unwrap();
            let store = HistoryStore::open(pool).await.unwrap();
            store.record("q", Some("SELECT 1"), "ok").await.unwrap();
        }

        let pool = build_pool(DuckDBConnectionManager::file(path).unwrap(), 1).unwrap();
        let store = HistoryStore::open(pool).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
