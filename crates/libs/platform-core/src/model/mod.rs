//! # Model Layer - BMC Pattern Implementation
//!
//! Every entity has:
//! - **Data struct** — serializable model (e.g. `Repository`, `ActionRun`)
//! - **ForCreate struct** — input for creation operations, where creation
//!   takes more than one or two scalar args
//! - **Bmc struct** — stateless controller with async CRUD methods taking
//!   `&Ctx` then `&ModelManager`
//!
//! ## Available Controllers
//!
//! | BMC | Description |
//! |-----|-------------|
//! | `user::UserBmc` | Accounts and credentials |
//! | `grant::GrantBmc` | Per-repository role grants |
//! | `repository::RepositoryBmc` | Repository metadata (not content — see [`crate::repository_store`]) |
//! | `access_token::AccessTokenBmc` | Bearer tokens for git-over-HTTP and the API |
//! | `workspace::WorkspaceBmc` | Containerized IDE workspace records |
//! | `action::ActionBmc` | CI/CD job definitions |
//! | `action_run::ActionRunBmc` | Individual executions of an action |
//! | `action_artifact::ActionArtifactBmc` | Captured output files from a run |
//! | `event::EventBmc` | Durable event log backing the event bus |
//! | `comment::CommentBmc` | Commit comments |
//!
//! ## ModelManager
//!
//! [`ModelManager`] is the central handle every BMC method receives: the
//! database connection, the data directory layout, and the per-resource
//! lock registry used to serialize git writes and sandbox runs.

pub mod access_token;
pub mod action;
pub mod action_artifact;
pub mod action_run;
pub mod comment;
pub mod event;
pub mod grant;
pub mod repository;
pub mod user;
pub mod workspace;

use crate::store::resource_lock::ResourceLocks;
use crate::store::{self, Db};
use crate::Result;
use platform_common::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    pub data_dir: PathBuf,
    /// Serializes git writes per repository and sandbox operations per
    /// workspace/action run. See [`crate::store::resource_lock`].
    pub locks: Arc<ResourceLocks>,
    pub app_config: Arc<AppConfig>,
}

impl ModelManager {
    /// Construct against the real data directory, applying migrations and
    /// ensuring the on-disk layout (repos/, workspaces/, artifacts/)
    /// exists.
    pub async fn new(app_config: Arc<AppConfig>) -> Result<Self> {
        let data_dir = app_config.server.data_dir.clone();
        let db = store::new_db_pool(&store::default_db_path(&data_dir)).await?;

        tokio::fs::create_dir_all(store::repos_root(&data_dir)).await?;
        tokio::fs::create_dir_all(store::workspaces_root(&data_dir)).await?;
        tokio::fs::create_dir_all(store::artifacts_root(&data_dir)).await?;

        Ok(ModelManager {
            db,
            data_dir,
            locks: Arc::new(ResourceLocks::new()),
            app_config,
        })
    }

    /// Construct with an already-open database and an arbitrary data
    /// directory. Used by integration tests to get an isolated,
    /// migrations-applied instance without touching the filesystem
    /// outside a temp dir.
    pub fn new_for_test(db: Db, data_dir: PathBuf, app_config: Arc<AppConfig>) -> Self {
        ModelManager {
            db,
            data_dir,
            locks: Arc::new(ResourceLocks::new()),
            app_config,
        }
    }

    pub(in crate::model) fn db(&self) -> &Db {
        &self.db
    }

    /// Exposed for integration tests that need to run raw queries.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    pub fn repo_path(&self, slug: &str) -> PathBuf {
        store::repos_root(&self.data_dir).join(format!("{slug}.git"))
    }

    pub fn artifact_storage_path(&self, action_run_id: i64, relative: &str) -> PathBuf {
        store::artifacts_root(&self.data_dir)
            .join(action_run_id.to_string())
            .join(relative)
    }

    /// Health check — verify database connectivity.
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}
