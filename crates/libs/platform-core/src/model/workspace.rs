//! Per-user containerized IDE workspace records. Container lifecycle
//! itself is owned by `platform_runtime::supervisor`; this module only
//! tracks the row the supervisor reads and updates.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Starting => "starting",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopping => "stopping",
            WorkspaceStatus::Failed => "failed",
        }
    }
}

impl FromStr for WorkspaceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "stopped" => WorkspaceStatus::Stopped,
            "starting" => WorkspaceStatus::Starting,
            "running" => WorkspaceStatus::Running,
            "stopping" => WorkspaceStatus::Stopping,
            "failed" => WorkspaceStatus::Failed,
            other => return Err(crate::Error::Internal(format!("unknown workspace status: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub owner_id: i64,
    pub repository_id: Option<i64>,
    pub name: String,
    pub image: String,
    pub status: WorkspaceStatus,
    pub container_id: Option<String>,
    pub proxy_port: Option<u16>,
    pub created_at: NaiveDateTime,
    pub last_started_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceForCreate {
    pub owner_id: i64,
    pub repository_id: Option<i64>,
    pub name: String,
    pub image: String,
}

pub struct WorkspaceBmc;

impl WorkspaceBmc {
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, ws_c: WorkspaceForCreate) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO workspaces (owner_id, repository_id, name, image) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((ws_c.owner_id, ws_c.repository_id, ws_c.name.as_str(), ws_c.image.as_str()))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into workspaces returned no row".into()))
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Workspace> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, owner_id, repository_id, name, image, status, container_id, proxy_port, created_at, last_started_at
             FROM workspaces WHERE id = ?",
        ).await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_workspace(&row)?),
            None => Err(crate::Error::WorkspaceNotFound(id.to_string())),
        }
    }

    pub async fn list_for_owner(_ctx: &Ctx, mm: &ModelManager, owner_id: i64) -> Result<Vec<Workspace>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, owner_id, repository_id, name, image, status, container_id, proxy_port, created_at, last_started_at
             FROM workspaces WHERE owner_id = ? ORDER BY created_at DESC",
        ).await?;
        let mut rows = stmt.query([owner_id]).await?;

        let mut workspaces = Vec::new();
        while let Some(row) = rows.next().await? {
            workspaces.push(row_to_workspace(&row)?);
        }
        Ok(workspaces)
    }

    /// Transition status with an expected-current-status guard, so two
    /// concurrent start requests for the same workspace can't both win.
    pub async fn transition_status(
        _ctx: &Ctx,
        mm: &ModelManager,
        id: i64,
        expected: WorkspaceStatus,
        next: WorkspaceStatus,
    ) -> Result<bool> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE workspaces SET status = ? WHERE id = ? AND status = ?")
            .await?;
        let affected = stmt
            .execute((next.as_str(), id, expected.as_str()))
            .await?;
        Ok(affected > 0)
    }

    pub async fn set_running(
        _ctx: &Ctx,
        mm: &ModelManager,
        id: i64,
        container_id: &str,
        proxy_port: u16,
    ) -> Result<()> {
        let db = mm.db();
        let now = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let stmt = db
            .prepare(
                "UPDATE workspaces SET status = 'running', container_id = ?, proxy_port = ?, last_started_at = ? WHERE id = ?",
            )
            .await?;
        stmt.execute((container_id, proxy_port as i64, now.as_str(), id)).await?;
        Ok(())
    }

    pub async fn set_stopped(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE workspaces SET status = 'stopped', container_id = NULL, proxy_port = NULL WHERE id = ?")
            .await?;
        stmt.execute([id]).await?;
        Ok(())
    }

    pub async fn delete(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db.prepare("DELETE FROM workspaces WHERE id = ?").await?;
        stmt.execute([id]).await?;
        Ok(())
    }
}

fn row_to_workspace(row: &libsql::Row) -> Result<Workspace> {
    let status_str: String = row.get(5)?;
    let created_at_str: String = row.get(8)?;
    let last_started_str: Option<String> = row.get(9)?;

    Ok(Workspace {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        repository_id: row.get(2)?,
        name: row.get(3)?,
        image: row.get(4)?,
        status: status_str.parse()?,
        container_id: row.get(6)?,
        proxy_port: row.get::<Option<i64>>(7)?.map(|p| p as u16),
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
        last_started_at: last_started_str
            .as_deref()
            .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap_or_default()),
    })
}
