//! Low-level storage operations: the SQLite metadata database and git
//! plumbing over bare repositories.
//!
//! Two kinds of state live side by side:
//! 1. **SQLite database** — users, grants, repository/workspace/action
//!    metadata, access tokens, events. Configured for high-concurrency
//!    access the same way a multi-tenant server needs: WAL mode, a
//!    generous busy timeout, and a larger page cache.
//! 2. **Bare git repositories on disk** — the actual content being
//!    hosted, manipulated exclusively through [`git_cli`] subprocess
//!    calls rather than an in-process git implementation.

use crate::Result;
use libsql::{Builder, Connection};
use std::path::{Path, PathBuf};

/// Type alias for database connections.
pub type Db = Connection;

/// Subprocess-based git plumbing over bare repositories.
pub mod git_cli;

/// Per-resource (repo/workspace/action-run) write serialization.
pub mod resource_lock;

const MIGRATIONS: &[&str] = &[
    include_str!("../../../../../migrations/001_initial_schema.sql"),
    include_str!("../../../../../migrations/002_access_tokens.sql"),
    include_str!("../../../../../migrations/003_actions.sql"),
    include_str!("../../../../../migrations/004_events.sql"),
];

/// Open the SQLite database at `db_path`, creating it (and any parent
/// directories) if it doesn't exist, and apply every migration.
pub async fn new_db_pool(db_path: &Path) -> Result<Db> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    // WAL mode: concurrent readers alongside a writer.
    conn.execute("PRAGMA journal_mode=WAL;", ()).await?;
    // Wait rather than fail immediately under lock contention from
    // concurrent pushes/action runs.
    conn.execute("PRAGMA busy_timeout=30000;", ()).await?;
    conn.execute("PRAGMA synchronous=NORMAL;", ()).await?;
    conn.execute("PRAGMA cache_size=-64000;", ()).await?;
    conn.execute("PRAGMA foreign_keys=ON;", ()).await?;

    for migration in MIGRATIONS {
        conn.execute_batch(migration).await?;
    }

    Ok(conn)
}

/// Open an in-memory database with migrations applied, for tests.
pub async fn new_test_db_pool() -> Result<Db> {
    let db = Builder::new_local(":memory:").build().await?;
    let conn = db.connect()?;
    conn.execute("PRAGMA foreign_keys=ON;", ()).await?;
    for migration in MIGRATIONS {
        conn.execute_batch(migration).await?;
    }
    Ok(conn)
}

/// Default path for the platform's SQLite database under a data directory.
pub fn default_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("platform.db")
}

/// Default path for the directory holding bare repositories under a data
/// directory.
pub fn repos_root(data_dir: &Path) -> PathBuf {
    data_dir.join("repos")
}

/// Default path for workspace persistent volumes under a data directory.
pub fn workspaces_root(data_dir: &Path) -> PathBuf {
    data_dir.join("workspaces")
}

/// Default path for action run artifacts under a data directory.
pub fn artifacts_root(data_dir: &Path) -> PathBuf {
    data_dir.join("artifacts")
}
