use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::{Arc, Mutex};

pub type DuckDbPool = r2d2::Pool<DuckDBConnectionManager>;

/// Hands out connections to one opened DuckDB database.
///
/// DuckDB allows a single database instance per file in a process, so every
/// pooled connection is a clone of the same root connection rather than a
/// fresh `Connection::open`.
pub struct DuckDBConnectionManager {
    root: Arc<Mutex<Connection>>,
}

impl DuckDBConnectionManager {
    pub fn file(connection_string: &str) -> Result<Self, duckdb::Error> {
        Ok(Self::from_connection(Connection::open(connection_string)?))
    }

    #[cfg(test)]
    pub fn memory() -> Result<Self, duckdb::Error> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            root: Arc::new(Mutex::new(conn)),
        }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Builds a pool that validates connections on checkout, so a connection
/// that stopped answering is replaced on the next lease.
pub fn build_pool(manager: DuckDBConnectionManager, size: usize) -> Result<DuckDbPool, r2d2::Error> {
    r2d2::Pool::builder()
        .max_size(size.max(1) as u32)
        .test_on_check_out(true)
        .build(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_connections_share_one_database() {
        let pool = build_pool(DuckDBConnectionManager::memory().unwrap(), 2).unwrap();

        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")
                .unwrap();
        }

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        let a: i64 = first.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        let b: i64 = second.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!((a, b), (2, 2));
    }

    #[test]
    fn zero_pool_size_still_yields_a_connection() {
        let pool = build_pool(DuckDBConnectionManager::memory().unwrap(), 0).unwrap();
        assert!(pool.get().is_ok());
    }
}
