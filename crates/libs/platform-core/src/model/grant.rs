//! Per-repository role grants.
//!
//! A repository's owner always has implicit `Admin` access; `grants`
//! extends access to other users. [`Role`] orders numerically so the
//! authorization engine can compare grants with `>=` rather than
//! matching variants.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
#[repr(i64)]
pub enum Role {
    Read = 1,
    Write = 2,
    Admin = 3,
}

impl Role {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Role::Read),
            2 => Some(Role::Write),
            3 => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: i64,
    pub repository_id: i64,
    pub user_id: i64,
    pub role: Role,
}

pub struct GrantBmc;

impl GrantBmc {
    /// Insert or update (upsert) a user's role on a repository.
    pub async fn upsert(
        _ctx: &Ctx,
        mm: &ModelManager,
        repository_id: i64,
        user_id: i64,
        role: Role,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO grants (repository_id, user_id, role) VALUES (?, ?, ?)
                 ON CONFLICT (repository_id, user_id) DO UPDATE SET role = excluded.role
                 RETURNING id",
            )
            .await?;
        let mut rows = stmt.query((repository_id, user_id, role as i64)).await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("upsert into grants returned no row".into()))
        }
    }

    pub async fn revoke(_ctx: &Ctx, mm: &ModelManager, repository_id: i64, user_id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("DELETE FROM grants WHERE repository_id = ? AND user_id = ?")
            .await?;
        stmt.execute((repository_id, user_id)).await?;
        Ok(())
    }

    pub async fn get_for_user(
        _ctx: &Ctx,
        mm: &ModelManager,
        repository_id: i64,
        user_id: i64,
    ) -> Result<Option<Grant>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, repository_id, user_id, role FROM grants WHERE repository_id = ? AND user_id = ?")
            .await?;
        let mut rows = stmt.query((repository_id, user_id)).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_grant(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_for_repository(_ctx: &Ctx, mm: &ModelManager, repository_id: i64) -> Result<Vec<Grant>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, repository_id, user_id, role FROM grants WHERE repository_id = ?")
            .await?;
        let mut rows = stmt.query([repository_id]).await?;

        let mut grants = Vec::new();
        while let Some(row) = rows.next().await? {
            grants.push(row_to_grant(&row)?);
        }
        Ok(grants)
    }
}

fn row_to_grant(row: &libsql::Row) -> Result<Grant> {
    let role_raw: i64 = row.get(3)?;
    let role = Role::from_i64(role_raw)
        .ok_or_else(|| crate::Error::Internal(format!("invalid role value in database: {role_raw}")))?;

    Ok(Grant {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        user_id: row.get(2)?,
        role,
    })
}
