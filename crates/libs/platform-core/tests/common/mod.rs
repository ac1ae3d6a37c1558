//! Shared test fixtures for `platform-core` integration tests.
//!
//! Each test gets an isolated in-memory database and its own temp data
//! directory (for bare repositories, workspace volumes, artifacts) so
//! concurrent test runs never contend on the same files.

#![allow(dead_code)]

use platform_common::AppConfig;
use platform_core::{Ctx, ModelManager, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Test context bundling a `ModelManager`, a root `Ctx`, and the temp
/// directory backing its data root (kept alive for the test's duration).
pub struct TestContext {
    pub mm: ModelManager,
    pub ctx: Ctx,
    temp_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(AppConfig::default()).await
    }

    pub async fn new_with_config(config: AppConfig) -> Result<Self> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir)?;

        let db = platform_core::store::new_test_db_pool().await?;
        let app_config = Arc::new(config);
        let mm = ModelManager::new_for_test(db, data_dir, app_config);
        let ctx = Ctx::root_ctx();

        Ok(Self { mm, ctx, temp_dir })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.mm.data_dir.clone()
    }

    /// Explain the query plan for a given SQL string — used by tests that
    /// assert a hot-path query hits the index it's meant to.
    pub async fn explain_query_plan(&self, sql: &str) -> Result<Vec<String>> {
        let db = self.mm.db_for_test();
        let explain_sql = format!("EXPLAIN QUERY PLAN {sql}");
        let mut rows = db.query(&explain_sql, ()).await?;
        let mut plans = Vec::new();
        while let Some(row) = rows.next().await? {
            let detail: String = row.get(3)?;
            plans.push(detail);
        }
        Ok(plans)
    }
}
