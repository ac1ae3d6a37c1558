use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct UserForCreate {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

pub struct UserBmc;

impl UserBmc {
    /// The very first account on a fresh instance is granted admin so
    /// there is always at least one user who can create repositories
    /// and grant roles to everyone else.
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, user_c: UserForCreate) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO users (username, email, password_hash, is_admin)
                 VALUES (?, ?, ?, (SELECT COUNT(*) = 0 FROM users)) RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((
                user_c.username.as_str(),
                user_c.email.as_str(),
                user_c.password_hash.as_str(),
            ))
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Err(crate::Error::Internal("insert into users returned no row".into()))
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<User> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, username, email, password_hash, is_admin, created_at FROM users WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_user(&row)?),
            None => Err(crate::Error::UserNotFound(id.to_string())),
        }
    }

    pub async fn get_by_username(_ctx: &Ctx, mm: &ModelManager, username: &str) -> Result<User> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, username, email, password_hash, is_admin, created_at FROM users WHERE username = ?",
            )
            .await?;
        let mut rows = stmt.query([username]).await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_user(&row)?),
            None => Err(crate::Error::UserNotFound(username.to_string())),
        }
    }

    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<User>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, username, email, password_hash, is_admin, created_at FROM users ORDER BY username",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &libsql::Row) -> Result<User> {
    let created_at_str: String = row.get(5)?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_default();

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        is_admin: row.get::<i64>(4)? != 0,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_test_db_pool;
    use platform_common::AppConfig;
    use std::sync::Arc;

    async fn test_mm() -> ModelManager {
        let db = new_test_db_pool().await.unwrap();
        ModelManager::new_for_test(db, std::env::temp_dir(), Arc::new(AppConfig::default()))
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();

        let id = UserBmc::create(
            &ctx,
            &mm,
            UserForCreate {
                username: "octocat".into(),
                email: "octocat@example.com".into(),
                password_hash: "hash".into(),
            },
        )
        .await
        .unwrap();

        let by_id = UserBmc::get_by_id(&ctx, &mm, id).await.unwrap();
        assert_eq!(by_id.username, "octocat");

        let by_name = UserBmc::get_by_username(&ctx, &mm, "octocat").await.unwrap();
        assert_eq!(by_name.id, id);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let mm = test_mm().await;
        let ctx = Ctx::root_ctx();
        let err = UserBmc::get_by_username(&ctx, &mm, "nobody").await.unwrap_err();
        assert!(matches!(err, crate::Error::UserNotFound(_)));
    }
}
