//! CI/CD job definitions: what to run, which image, and which pushed
//! branches should trigger it.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub branch_filters: Vec<String>,
    pub image: String,
    pub command: String,
    pub artifact_patterns: Vec<String>,
    pub is_enabled: bool,
    pub created_at: NaiveDateTime,
}

impl Action {
    /// True when `branch` should trigger this action: an empty filter
    /// list matches every branch, otherwise `branch` must match one of
    /// the glob patterns.
    pub fn matches_branch(&self, branch: &str) -> bool {
        if self.branch_filters.is_empty() {
            return true;
        }
        self.branch_filters.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(branch))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone)]
pub struct ActionForCreate {
    pub repository_id: i64,
    pub name: String,
    pub branch_filters: Vec<String>,
    pub image: String,
    pub command: String,
    pub artifact_patterns: Vec<String>,
}

pub struct ActionBmc;

impl ActionBmc {
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, action_c: ActionForCreate) -> Result<i64> {
        let db = mm.db();
        let branch_filters_json = serde_json::to_string(&action_c.branch_filters)?;
        let artifact_patterns_json = serde_json::to_string(&action_c.artifact_patterns)?;

        let stmt = db
            .prepare(
                "INSERT INTO actions (repository_id, name, branch_filters, image, command, artifact_patterns)
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((
                action_c.repository_id,
                action_c.name.as_str(),
                branch_filters_json.as_str(),
                action_c.image.as_str(),
                action_c.command.as_str(),
                artifact_patterns_json.as_str(),
            ))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into actions returned no row".into()))
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Action> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, repository_id, name, branch_filters, image, command, artifact_patterns, is_enabled, created_at
             FROM actions WHERE id = ?",
        ).await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_action(&row)?),
            None => Err(crate::Error::ActionNotFound(id)),
        }
    }

    /// All enabled actions for a repository whose branch filter matches
    /// `branch`, used by the orchestrator on every push.
    pub async fn list_triggered_by_push(
        _ctx: &Ctx,
        mm: &ModelManager,
        repository_id: i64,
        branch: &str,
    ) -> Result<Vec<Action>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, repository_id, name, branch_filters, image, command, artifact_patterns, is_enabled, created_at
             FROM actions WHERE repository_id = ? AND is_enabled = 1",
        ).await?;
        let mut rows = stmt.query([repository_id]).await?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            let action = row_to_action(&row)?;
            if action.matches_branch(branch) {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    pub async fn list_for_repository(_ctx: &Ctx, mm: &ModelManager, repository_id: i64) -> Result<Vec<Action>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, repository_id, name, branch_filters, image, command, artifact_patterns, is_enabled, created_at
             FROM actions WHERE repository_id = ? ORDER BY name",
        ).await?;
        let mut rows = stmt.query([repository_id]).await?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(row_to_action(&row)?);
        }
        Ok(actions)
    }

    pub async fn set_enabled(_ctx: &Ctx, mm: &ModelManager, id: i64, is_enabled: bool) -> Result<()> {
        let db = mm.db();
        let stmt = db.prepare("UPDATE actions SET is_enabled = ? WHERE id = ?").await?;
        stmt.execute((is_enabled as i64, id)).await?;
        Ok(())
    }
}

fn row_to_action(row: &libsql::Row) -> Result<Action> {
    let branch_filters_json: String = row.get(3)?;
    let artifact_patterns_json: String = row.get(6)?;
    let created_at_str: String = row.get(8)?;

    Ok(Action {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        name: row.get(2)?,
        branch_filters: serde_json::from_str(&branch_filters_json)?,
        image: row.get(4)?,
        command: row.get(5)?,
        artifact_patterns: serde_json::from_str(&artifact_patterns_json)?,
        is_enabled: row.get::<i64>(7)? != 0,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action(branch_filters: Vec<String>) -> Action {
        Action {
            id: 1,
            repository_id: 1,
            name: "ci".into(),
            branch_filters,
            image: "rust:1".into(),
            command: "cargo test".into(),
            artifact_patterns: vec!["target/release/*".into()],
            is_enabled: true,
            created_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn empty_filter_matches_every_branch() {
        let action = sample_action(vec![]);
        assert!(action.matches_branch("main"));
        assert!(action.matches_branch("feature/x"));
    }

    #[test]
    fn glob_filter_matches_selectively() {
        let action = sample_action(vec!["release/*".into()]);
        assert!(action.matches_branch("release/1.0"));
        assert!(!action.matches_branch("main"));
    }
}
