//! Small `DuckDB` connection pool.
//!
//! The database file is opened exactly once; every pooled connection is a
//! [`Connection::try_clone`] of that root so all of them share one database instance
//! and see each other's committed writes. Connections return to an idle list on drop.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolShared {
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// Construct-once pool of `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    shared: Arc<PoolShared>,
}

impl DuckDbConnectionManager {
    /// Open the database at `path` and keep at most `max_pool_size` idle connections.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        tracing::debug!(path = %db_path.display(), "opening duckdb database");
        let root = Connection::open(db_path.as_path())?;
        root.execute_batch("PRAGMA disable_progress_bar;")?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                max_idle: max_pool_size.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Check out a connection, cloning the root when no idle connection exists.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be created.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle list mutex poisoned")
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => self
                .shared
                .root
                .lock()
                .expect("duckdb root connection mutex poisoned")
                .try_clone()?,
        };

        Ok(PooledConnection {
            shared: Arc::clone(&self.shared),
            connection: Some(connection),
        })
    }
}

/// Connection checked out of [`DuckDbConnectionManager`]; returns itself on drop.
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle list mutex poisoned");
        if idle.len() < self.shared.max_idle {
            idle.push(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn returned_connections_are_reused_and_share_writes() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::open(temp.path().join("pool.duckdb"), 1)
            .expect("open pool");

        {
            let connection = manager.acquire().expect("acquire");
            connection
                .execute_batch("CREATE TABLE marker (id INTEGER); INSERT INTO marker VALUES (7);")
                .expect("create");
        }
        assert_eq!(manager.shared.idle.lock().expect("lock").len(), 1);

        let first = manager.acquire().expect("reacquire");
        let second = manager.acquire().expect("fresh clone");
        for connection in [&first, &second] {
            let value: i32 = connection
                .query_row("SELECT id FROM marker", [], |row| row.get(0))
                .expect("select");
            assert_eq!(value, 7);
        }
    }
}
