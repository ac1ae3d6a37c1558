//! JSON API surface: repositories, CI actions, workspaces, and accounts.
//!
//! `spec.md` describes this surface as hypermedia/HTML; no templating
//! crate is grounded anywhere in the example pack, so every route here
//! returns JSON over the same paths instead.

pub mod actions;
pub mod repos;
pub mod users;
pub mod workspaces;

use axum::Router;

use crate::AppState;
use platform_core::model::grant::Grant;
use platform_core::model::repository::{Repository, RepositoryBmc};
use platform_core::model::user::{User, UserBmc};
use platform_core::{Ctx, ModelManager};

use crate::error::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(repos::routes())
        .merge(actions::routes())
        .merge(workspaces::routes())
        .merge(users::routes())
}

/// Resolve the repository plus the requesting actor (if any) and their
/// grant, so a handler can make one [`platform_core::authz`] call
/// without repeating the three lookups everywhere. Repositories are
/// addressed by their URL-safe slug, not the internal row id — the slug
/// is globally unique and is what both the git transport and every
/// `/repos/{slug}` route take from the request path.
pub(crate) async fn load_repo_and_actor(
    mm: &ModelManager,
    user_id: Option<i64>,
    slug: &str,
) -> Result<(Repository, Option<User>, Vec<Grant>)> {
    let ctx = Ctx::root_ctx();
    let repo = RepositoryBmc::get_by_slug(&ctx, mm, slug).await?;

    let actor = match user_id {
        Some(uid) => Some(UserBmc::get_by_id(&ctx, mm, uid).await?),
        None => None,
    };

    let grants = match user_id {
        Some(uid) => platform_core::model::grant::GrantBmc::get_for_user(&ctx, mm, repo.id, uid)
            .await?
            .into_iter()
            .collect(),
        None => Vec::new(),
    };

    Ok((repo, actor, grants))
}

pub(crate) fn ctx_for(user_id: Option<i64>) -> Ctx {
    match user_id {
        Some(uid) => Ctx::new(uid),
        None => Ctx::root_ctx(),
    }
}
