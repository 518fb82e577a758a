use crate::db::db_pool::DuckDbPool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One column of a table as recorded in the snapshot.
///
/// Snapshots written by older tooling use MySQL `DESCRIBE` rows
/// (`Field`, `Type`, `Null`, `Key`, ...); those keys are accepted and
/// anything beyond name and type is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    #[serde(alias = "Field")]
    pub name: String,
    #[serde(rename = "type", alias = "Type")]
    pub data_type: String,
}

/// Table name to ordered column list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl Schema {
    pub fn new(tables: BTreeMap<String, Vec<ColumnInfo>>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[ColumnInfo])> {
        self.tables
            .iter()
            .map(|(name, columns)| (name.as_str(), columns.as_slice()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema snapshot at {0}; connect a database first")]
    NotFound(PathBuf),
    #[error("schema snapshot {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema extraction failed: {0}")]
    Extraction(String),
}

impl From<duckdb::Error> for SchemaError {
    fn from(err: duckdb::Error) -> Self {
        SchemaError::Extraction(err.to_string())
    }
}

impl From<r2d2::Error> for SchemaError {
    fn from(err: r2d2::Error) -> Self {
        SchemaError::Extraction(err.to_string())
    }
}

/// Caches the schema snapshot read from disk and rewrites it when the
/// live database is re-inspected.
pub struct SchemaStore {
    snapshot_path: PathBuf,
    cache: RwLock<Option<Arc<Schema>>>,
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaStore")
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl SchemaStore {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Returns the cached snapshot, reading it from disk on first use.
    pub async fn load(&self) -> Result<Arc<Schema>, SchemaError> {
        if let Some(schema) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let mut cache = self.cache.write().await;
        // Another caller may have filled it while we waited for the lock
        if let Some(schema) = cache.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let raw = match tokio::fs::read_to_string(&self.snapshot_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound(self.snapshot_path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let schema: Schema = serde_json::from_str(&raw).map_err(|source| SchemaError::Corrupt {
            path: self.snapshot_path.clone(),
            source,
        })?;

        info!(
            "Loaded schema snapshot from {} ({} tables)",
            self.snapshot_path.display(),
            schema.len()
        );

        let schema = Arc::new(schema);
        *cache = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Like `load`, but a missing snapshot is not an error.
    pub async fn load_optional(&self) -> Result<Option<Arc<Schema>>, SchemaError> {
        match self.load().await {
            Ok(schema) => Ok(Some(schema)),
            Err(SchemaError::NotFound(path)) => {
                debug!("No schema snapshot at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads table and column metadata from the live database, overwrites the
    /// snapshot file with it and replaces the cached copy.
    pub async fn extract(&self, pool: &DuckDbPool) -> Result<Arc<Schema>, SchemaError> {
        info!("Extracting schema from live database");

        let pool = pool.clone();
        let schema = tokio::task::spawn_blocking(move || -> Result<Schema, SchemaError> {
            let conn = pool.get()?;
            read_live_schema(&conn)
        })
        .await
        .map_err(|e| SchemaError::Extraction(format!("extraction task failed: {}", e)))??;

        if schema.is_empty() {
            warn!("Live database has no tables; snapshot will be empty");
        }

        self.persist(&schema).await?;

        let schema = Arc::new(schema);
        *self.cache.write().await = Some(Arc::clone(&schema));

        info!("Schema snapshot refreshed ({} tables)", schema.len());
        Ok(schema)
    }

    async fn persist(&self, schema: &Schema) -> Result<(), SchemaError> {
        let body = serde_json::to_string_pretty(schema).map_err(|source| SchemaError::Corrupt {
            path: self.snapshot_path.clone(),
            source,
        })?;

        if let Some(parent) = self.snapshot_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Replace wholesale: readers never observe a half-written file
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;

        debug!("Wrote schema snapshot to {}", self.snapshot_path.display());
        Ok(())
    }
}

fn read_live_schema(conn: &duckdb::Connection) -> Result<Schema, SchemaError> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type
         FROM information_schema.columns
         WHERE table_schema = current_schema()
         ORDER BY table_name, ordinal_position",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?, // table_name
            row.get::<_, String>(1)?, // column_name
            row.get::<_, String>(2)?, // data_type
        ))
    })?;

    let mut tables: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
    for row in rows {
        let (table, name, data_type) = row?;
        tables
            .entry(table)
            .or_default()
            .push(ColumnInfo { name, data_type });
    }

    debug!("Found {} tables in live database", tables.len());
    Ok(Schema::new(tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_pool::{build_pool, DuckDBConnectionManager};

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path().join("db_schema.json"));

        assert!(matches!(store.load().await, Err(SchemaError::NotFound(_))));
        assert!(store.load_optional().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_legacy_describe_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db_schema.json");
        std::fs::write(
            &path,
            r#"{
                "employees": [
                    {"Field": "id", "Type": "int", "Null": "NO", "Key": "PRI", "Default": null, "Extra": "auto_increment"},
                    {"Field": "name", "Type": "varchar(255)", "Null": "YES", "Key": "", "Default": null, "Extra": ""}
                ],
                "departments": [{"name": "id", "type": "INTEGER"}]
            }"#,
        )
        .unwrap();

        let schema = SchemaStore::new(&path).load().await.unwrap();

        let names: Vec<&str> = schema.table_names().collect();
        assert_eq!(names, vec!["departments", "employees"]);
        let (_, employees) = schema.tables().find(|(t, _)| *t == "employees").unwrap();
        assert_eq!(
            employees,
            &[
                ColumnInfo { name: "id".into(), data_type: "int".into() },
                ColumnInfo { name: "name".into(), data_type: "varchar(255)".into() },
            ]
        );
    }

    #[tokio::test]
    async fn garbage_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db_schema.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            SchemaStore::new(&path).load().await,
            Err(SchemaError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn extract_persists_and_replaces_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots").join("db_schema.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"stale": [{"name": "x", "type": "INTEGER"}]}"#).unwrap();

        let pool = build_pool(DuckDBConnectionManager::memory().unwrap(), 1).unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TABLE employees (id INTEGER, name VARCHAR, joined_date DATE);
                 CREATE TABLE departments (id INTEGER, title VARCHAR);",
            )
            .unwrap();

        let store = SchemaStore::new(&path);
        assert!(store.load().await.unwrap().table_names().any(|t| t == "stale"));

        let extracted = store.extract(&pool).await.unwrap();
        let (_, columns) = extracted.tables().find(|(t, _)| *t == "employees").unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "joined_date"]);
        assert_eq!(columns[2].data_type, "DATE");

        // Cache now reflects the live database
        let cached = store.load().await.unwrap();
        assert!(!cached.table_names().any(|t| t == "stale"));

        // And a fresh store reads the same thing back from disk
        let reread = SchemaStore::new(&path).load().await.unwrap();
        assert_eq!(*reread, *extracted);
    }
}
