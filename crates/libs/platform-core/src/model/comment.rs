//! Commit-level discussion. A comment is always anchored to a specific
//! commit SHA within a repository rather than a line range.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub repository_id: i64,
    pub commit_sha: String,
    pub author_id: i64,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CommentForCreate {
    pub repository_id: i64,
    pub commit_sha: String,
    pub author_id: i64,
    pub body: String,
}

pub struct CommentBmc;

impl CommentBmc {
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, comment_c: CommentForCreate) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO comments (repository_id, commit_sha, author_id, body) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((
                comment_c.repository_id,
                comment_c.commit_sha.as_str(),
                comment_c.author_id,
                comment_c.body.as_str(),
            ))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into comments returned no row".into()))
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Comment> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, repository_id, commit_sha, author_id, body, created_at FROM comments WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_comment(&row)?),
            None => Err(crate::Error::NotFound(format!("comment {id}"))),
        }
    }

    pub async fn list_for_commit(
        _ctx: &Ctx,
        mm: &ModelManager,
        repository_id: i64,
        commit_sha: &str,
    ) -> Result<Vec<Comment>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, repository_id, commit_sha, author_id, body, created_at FROM comments
             WHERE repository_id = ? AND commit_sha = ? ORDER BY created_at",
        ).await?;
        let mut rows = stmt.query((repository_id, commit_sha)).await?;

        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    pub async fn delete(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db.prepare("DELETE FROM comments WHERE id = ?").await?;
        stmt.execute([id]).await?;
        Ok(())
    }
}

fn row_to_comment(row: &libsql::Row) -> Result<Comment> {
    let created_at_str: String = row.get(5)?;
    Ok(Comment {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        commit_sha: row.get(2)?,
        author_id: row.get(3)?,
        body: row.get(4)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
