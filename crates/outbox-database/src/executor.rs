//! Async SQLite executor using a dedicated background thread.
//!
//! All statements run on one thread owned by `tokio_rusqlite`. Callers send
//! closures over a channel and await the result, so the Tokio runtime is
//! never blocked on SQLite.
//!
//! Only SQL and light row mapping belong inside `call()` or `transaction()`.
//! Anything slower (network, broker sends) starves every other query.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//!
//! let events = db.call(move |conn| {
//!     queries::find_new_and_not_reserved(conn, 10, Utc::now())
//! }).await?;
//! ```

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection closed".to_string()),
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; every clone talks to the same executor thread, so
/// queries run in FIFO order.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file and its parent directory if missing, enables WAL,
    /// and runs pending migrations.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };

        db.call_sqlite(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )
        })
        .await?;

        db.migrate().await?;

        info!(path = %db.path, "Async database initialized with WAL mode");
        Ok(db)
    }

    /// Open a private in-memory database with migrations applied.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.migrate().await?;

        debug!("In-memory database initialized");
        Ok(db)
    }

    async fn migrate(&self) -> DatabaseResult<()> {
        self.call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(|e| match e {
                DatabaseError::Migration(_) => e,
                other => DatabaseError::Migration(other.to_string()),
            })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The inner DatabaseResult rides inside tokio_rusqlite's Ok variant
        // so domain errors such as UpdateMismatch survive the round trip.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Run a closure inside one SQLite transaction.
    ///
    /// Commits when the closure returns `Ok`; any `Err` rolls back every
    /// statement the closure executed.
    pub async fn transaction<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                // Dropping an uncommitted transaction rolls it back.
                let inner = match f(&tx) {
                    Ok(value) => tx.commit().map(|_| value).map_err(DatabaseError::from),
                    Err(e) => Err(e),
                };
                Ok(inner)
            })
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection.
    ///
    /// Waits for queued operations, then shuts down the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}
