//! Individual executions of an [`crate::model::action::Action`].
//!
//! Status transitions use a compare-and-swap `UPDATE ... WHERE status = ?`
//! the same way `WorkspaceBmc::transition_status` does, so the sandbox
//! runner's completion callback can't race a concurrent cancellation.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionRunStatus::Queued => "queued",
            ActionRunStatus::Running => "running",
            ActionRunStatus::Succeeded => "succeeded",
            ActionRunStatus::Failed => "failed",
            ActionRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionRunStatus::Succeeded | ActionRunStatus::Failed | ActionRunStatus::Cancelled
        )
    }
}

impl FromStr for ActionRunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "queued" => ActionRunStatus::Queued,
            "running" => ActionRunStatus::Running,
            "succeeded" => ActionRunStatus::Succeeded,
            "failed" => ActionRunStatus::Failed,
            "cancelled" => ActionRunStatus::Cancelled,
            other => return Err(crate::Error::Internal(format!("unknown action run status: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    pub id: i64,
    pub action_id: i64,
    pub commit_sha: String,
    pub branch: String,
    pub status: ActionRunStatus,
    pub output: String,
    pub exit_code: Option<i32>,
    pub queued_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

pub struct ActionRunBmc;

impl ActionRunBmc {
    /// Queue a run for `action_id`, unless it already has a non-terminal
    /// run (queued or running) — an action with status `running` has
    /// exactly one non-terminal run at a time. The check and insert are a
    /// single statement so two concurrent callers (a manual dispatch
    /// racing a push trigger, or two manual dispatches) can't both pass
    /// the check before either has inserted its row.
    pub async fn enqueue(
        _ctx: &Ctx,
        mm: &ModelManager,
        action_id: i64,
        commit_sha: &str,
        branch: &str,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO action_runs (action_id, commit_sha, branch)
                 SELECT ?, ?, ?
                 WHERE NOT EXISTS (
                     SELECT 1 FROM action_runs WHERE action_id = ? AND status IN ('queued', 'running')
                 )
                 RETURNING id",
            )
            .await?;
        let mut rows = stmt.query((action_id, commit_sha, branch, action_id)).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Err(crate::Error::AlreadyRunning(format!(
                "action {action_id} already has a queued or running run"
            ))),
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<ActionRun> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, action_id, commit_sha, branch, status, output, exit_code, queued_at, started_at, finished_at
             FROM action_runs WHERE id = ?",
        ).await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_run(&row)?),
            None => Err(crate::Error::ActionRunNotFound(id)),
        }
    }

    pub async fn list_for_action(_ctx: &Ctx, mm: &ModelManager, action_id: i64) -> Result<Vec<ActionRun>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, action_id, commit_sha, branch, status, output, exit_code, queued_at, started_at, finished_at
             FROM action_runs WHERE action_id = ? ORDER BY queued_at DESC",
        ).await?;
        let mut rows = stmt.query([action_id]).await?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await? {
            runs.push(row_to_run(&row)?);
        }
        Ok(runs)
    }

    /// Fetch and claim the oldest queued run for processing, atomically
    /// transitioning it to `running` so two orchestrator workers can't
    /// both pick it up.
    pub async fn claim_next_queued(_ctx: &Ctx, mm: &ModelManager) -> Result<Option<ActionRun>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id FROM action_runs WHERE status = 'queued' ORDER BY queued_at LIMIT 1")
            .await?;
        let mut rows = stmt.query(()).await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let id: i64 = row.get(0)?;

        let started_at = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let update_stmt = db
            .prepare("UPDATE action_runs SET status = 'running', started_at = ? WHERE id = ? AND status = 'queued'")
            .await?;
        let affected = update_stmt.execute((started_at.as_str(), id)).await?;

        if affected == 0 {
            // Lost the race to another worker; caller should try again.
            return Ok(None);
        }

        Ok(Some(Self::get_by_id(_ctx, mm, id).await?))
    }

    pub async fn finish(
        _ctx: &Ctx,
        mm: &ModelManager,
        id: i64,
        status: ActionRunStatus,
        output: &str,
        exit_code: Option<i32>,
    ) -> Result<()> {
        let db = mm.db();
        let finished_at = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let stmt = db
            .prepare(
                "UPDATE action_runs SET status = ?, output = ?, exit_code = ?, finished_at = ?
                 WHERE id = ? AND status = 'running'",
            )
            .await?;
        stmt.execute((status.as_str(), output, exit_code, finished_at.as_str(), id))
            .await?;
        Ok(())
    }

    pub async fn cancel(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<bool> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE action_runs SET status = 'cancelled' WHERE id = ? AND status IN ('queued', 'running')")
            .await?;
        let affected = stmt.execute([id]).await?;
        Ok(affected > 0)
    }
}

fn row_to_run(row: &libsql::Row) -> Result<ActionRun> {
    let status_str: String = row.get(4)?;
    let queued_at_str: String = row.get(7)?;
    let started_at_str: Option<String> = row.get(8)?;
    let finished_at_str: Option<String> = row.get(9)?;

    Ok(ActionRun {
        id: row.get(0)?,
        action_id: row.get(1)?,
        commit_sha: row.get(2)?,
        branch: row.get(3)?,
        status: status_str.parse()?,
        output: row.get(5)?,
        exit_code: row.get::<Option<i64>>(6)?.map(|c| c as i32),
        queued_at: NaiveDateTime::parse_from_str(&queued_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
        started_at: started_at_str
            .as_deref()
            .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap_or_default()),
        finished_at: finished_at_str
            .as_deref()
            .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap_or_default()),
    })
}
