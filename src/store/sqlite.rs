//! Shared sqlite connection handling.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::StoreError;

/// Opens (creating if missing) a read-write connection with the common pragmas applied.
pub fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(path, flags).map_err(|source| {
        StoreError::OpenDatabase {
            path: path.to_path_buf(),
            source,
        }
    })?;
    configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(conn)
}

/// Applies WAL journaling and a busy timeout so concurrent writers wait instead of failing.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

/// Runs a synchronous store call on tokio's blocking pool.
///
/// Store queries may wait out `busy_timeout`; async code calls them through this.
pub async fn run_blocking<T, F>(call: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
}

/// Ensures the parent directory of a database file exists.
pub fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}
