//! Captured output files from a completed [`crate::model::action_run::ActionRun`].
//! The row records where the bytes live under
//! `ModelManager::artifact_storage_path`; the sandbox runner writes the
//! bytes, this module only indexes them.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionArtifact {
    pub id: i64,
    pub action_run_id: i64,
    pub path: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub created_at: NaiveDateTime,
}

pub struct ActionArtifactBmc;

impl ActionArtifactBmc {
    pub async fn record(
        _ctx: &Ctx,
        mm: &ModelManager,
        action_run_id: i64,
        path: &str,
        size_bytes: u64,
        storage_path: &str,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO action_artifacts (action_run_id, path, size_bytes, storage_path) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((action_run_id, path, size_bytes as i64, storage_path))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into action_artifacts returned no row".into()))
        }
    }

    pub async fn list_for_run(_ctx: &Ctx, mm: &ModelManager, action_run_id: i64) -> Result<Vec<ActionArtifact>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, action_run_id, path, size_bytes, storage_path, created_at FROM action_artifacts
             WHERE action_run_id = ? ORDER BY path",
        ).await?;
        let mut rows = stmt.query([action_run_id]).await?;

        let mut artifacts = Vec::new();
        while let Some(row) = rows.next().await? {
            artifacts.push(row_to_artifact(&row)?);
        }
        Ok(artifacts)
    }

    pub async fn get_by_run_and_path(
        _ctx: &Ctx,
        mm: &ModelManager,
        action_run_id: i64,
        path: &str,
    ) -> Result<ActionArtifact> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, action_run_id, path, size_bytes, storage_path, created_at FROM action_artifacts
             WHERE action_run_id = ? AND path = ?",
        ).await?;
        let mut rows = stmt.query((action_run_id, path)).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_artifact(&row)?),
            None => Err(crate::Error::NotFound(format!("artifact {path} for run {action_run_id}"))),
        }
    }
}

fn row_to_artifact(row: &libsql::Row) -> Result<ActionArtifact> {
    let created_at_str: String = row.get(5)?;
    Ok(ActionArtifact {
        id: row.get(0)?,
        action_run_id: row.get(1)?,
        path: row.get(2)?,
        size_bytes: row.get::<i64>(3)? as u64,
        storage_path: row.get(4)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
