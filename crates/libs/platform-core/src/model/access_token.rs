//! Bearer tokens used for git-over-HTTP basic auth and the API. Only the
//! SHA-256 hash of the token is stored; validation happens in
//! [`crate::credential_registry`].

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_used_at: Option<NaiveDateTime>,
    pub revoked_at: Option<NaiveDateTime>,
}

impl AccessToken {
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

pub struct AccessTokenBmc;

impl AccessTokenBmc {
    /// Create a token valid for `ttl_seconds` from now. Per the platform's
    /// session-lifetime design, the server layer clamps this to at most
    /// 24 hours and re-issues on each git-over-HTTP `Start` exchange
    /// rather than minting long-lived tokens up front.
    pub async fn create(
        _ctx: &Ctx,
        mm: &ModelManager,
        user_id: i64,
        name: &str,
        token_hash: &str,
        ttl_seconds: i64,
    ) -> Result<i64> {
        let db = mm.db();
        let expires_at = (Utc::now() + Duration::seconds(ttl_seconds))
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let stmt = db
            .prepare(
                "INSERT INTO access_tokens (user_id, name, token_hash, expires_at) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((user_id, name, token_hash, expires_at.as_str()))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into access_tokens returned no row".into()))
        }
    }

    pub async fn get_by_hash(_ctx: &Ctx, mm: &ModelManager, token_hash: &str) -> Result<AccessToken> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, user_id, name, token_hash, created_at, expires_at, last_used_at, revoked_at
             FROM access_tokens WHERE token_hash = ?",
        ).await?;
        let mut rows = stmt.query([token_hash]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_token(&row)?),
            None => Err(crate::Error::AccessTokenNotFound("unknown token".into())),
        }
    }

    pub async fn touch_last_used(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let now = Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string();
        let stmt = db
            .prepare("UPDATE access_tokens SET last_used_at = ? WHERE id = ?")
            .await?;
        stmt.execute((now.as_str(), id)).await?;
        Ok(())
    }

    pub async fn revoke(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let db = mm.db();
        let now = Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string();
        let stmt = db
            .prepare("UPDATE access_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .await?;
        stmt.execute((now.as_str(), id)).await?;
        Ok(())
    }

    pub async fn list_for_user(_ctx: &Ctx, mm: &ModelManager, user_id: i64) -> Result<Vec<AccessToken>> {
        let db = mm.db();
        let stmt = db.prepare(
            "SELECT id, user_id, name, token_hash, created_at, expires_at, last_used_at, revoked_at
             FROM access_tokens WHERE user_id = ? ORDER BY created_at DESC",
        ).await?;
        let mut rows = stmt.query([user_id]).await?;

        let mut tokens = Vec::new();
        while let Some(row) = rows.next().await? {
            tokens.push(row_to_token(&row)?);
        }
        Ok(tokens)
    }
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap_or_default()
}

fn row_to_token(row: &libsql::Row) -> Result<AccessToken> {
    let created_at: String = row.get(4)?;
    let expires_at: String = row.get(5)?;
    let last_used_at: Option<String> = row.get(6)?;
    let revoked_at: Option<String> = row.get(7)?;

    Ok(AccessToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        token_hash: row.get(3)?,
        created_at: parse_dt(&created_at),
        expires_at: parse_dt(&expires_at),
        last_used_at: last_used_at.as_deref().map(parse_dt),
        revoked_at: revoked_at.as_deref().map(parse_dt),
    })
}
