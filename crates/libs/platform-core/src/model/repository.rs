//! Repository metadata. The actual git content lives on disk as a bare
//! repository under `ModelManager::repo_path`, manipulated through
//! [`crate::repository_store`] — this module only owns the SQLite row.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub slug: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub default_branch: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct RepositoryForCreate {
    pub owner_id: i64,
    pub slug: String,
    pub description: Option<String>,
    pub is_private: bool,
}

pub struct RepositoryBmc;

impl RepositoryBmc {
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, repo_c: RepositoryForCreate) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO repositories (owner_id, slug, description, is_private) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((
                repo_c.owner_id,
                repo_c.slug.as_str(),
                repo_c.description.as_deref(),
                repo_c.is_private as i64,
            ))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into repositories returned no row".into()))
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Repository> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, owner_id, slug, description, is_private, default_branch, created_at FROM repositories WHERE id = ?",
        ).await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_repository(&row)?),
            None => Err(crate::Error::RepositoryNotFound(id.to_string())),
        }
    }

    /// Slugs are globally unique (see the `repositories.slug` schema
    /// constraint), so this resolves a repository independent of who
    /// owns it — the same way the git transport and the JSON API both
    /// address a repository by slug alone.
    pub async fn get_by_slug(_ctx: &Ctx, mm: &ModelManager, slug: &str) -> Result<Repository> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, owner_id, slug, description, is_private, default_branch, created_at FROM repositories WHERE slug = ?",
            )
            .await?;
        let mut rows = stmt.query([slug]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_repository(&row)?),
            None => Err(crate::Error::RepositoryNotFound(slug.to_string())),
        }
    }

    pub async fn list_for_owner(_ctx: &Ctx, mm: &ModelManager, owner_id: i64) -> Result<Vec<Repository>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, owner_id, slug, description, is_private, default_branch, created_at FROM repositories WHERE owner_id = ? ORDER BY slug",
        ).await?;
        let mut rows = stmt.query([owner_id]).await?;

        let mut repos = Vec::new();
        while let Some(row) = rows.next().await? {
            repos.push(row_to_repository(&row)?);
        }
        Ok(repos)
    }

    pub async fn delete(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db.prepare("DELETE FROM repositories WHERE id = ?").await?;
        stmt.execute([id]).await?;
        Ok(())
    }

    pub async fn set_default_branch(
        _ctx: &Ctx,
        mm: &ModelManager,
        id: i64,
        branch: &str,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE repositories SET default_branch = ? WHERE id = ?")
            .await?;
        stmt.execute((branch, id)).await?;
        Ok(())
    }
}

fn row_to_repository(row: &libsql::Row) -> Result<Repository> {
    let created_at_str: String = row.get(6)?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_default();

    Ok(Repository {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        is_private: row.get::<i64>(4)? != 0,
        default_branch: row.get(5)?,
        created_at,
    })
}
