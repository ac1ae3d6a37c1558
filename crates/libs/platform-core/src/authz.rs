//! Pure authorization decisions over users, repositories, and grants.
//!
//! No hidden state: every function takes exactly the records it needs to
//! decide and returns a `bool`. Callers look up the `Vec<Grant>` once
//! (via [`crate::model::grant::GrantBmc::get_for_user`]) and pass it in
//! rather than this module querying the database itself.

use crate::model::grant::{Grant, Role};
use crate::model::repository::Repository;
use crate::model::user::User;

fn grant_role(grants: &[Grant], repository_id: i64, user_id: i64) -> Option<Role> {
    grants
        .iter()
        .find(|g| g.repository_id == repository_id && g.user_id == user_id)
        .map(|g| g.role)
}

/// Can `actor` read `repo`'s content (clone, browse files, view history)?
/// Safe to call with `actor = None` — an absent actor can still read a
/// public repository.
pub fn can_read(actor: Option<&User>, repo: &Repository, grants: &[Grant]) -> bool {
    if !repo.is_private {
        return true;
    }
    let Some(actor) = actor else {
        return false;
    };
    actor.is_admin
        || actor.id == repo.owner_id
        || grant_role(grants, repo.id, actor.id).is_some_and(|r| r >= Role::Read)
}

/// Can `actor` push to `repo`?
pub fn can_write(actor: Option<&User>, repo: &Repository, grants: &[Grant]) -> bool {
    let Some(actor) = actor else {
        return false;
    };
    actor.is_admin
        || actor.id == repo.owner_id
        || grant_role(grants, repo.id, actor.id).is_some_and(|r| r >= Role::Write)
}

/// Platform policy: only admins may create repositories at all.
pub fn can_create_repo(actor: Option<&User>) -> bool {
    actor.is_some_and(|a| a.is_admin)
}

pub fn can_delete_repo(actor: Option<&User>, repo: &Repository) -> bool {
    let Some(actor) = actor else {
        return false;
    };
    actor.is_admin || actor.id == repo.owner_id
}

/// Can `actor` comment/administer discussion on `repo`? Modeled after the
/// `CanUpdateIssue` decision in the platform's authorization contract:
/// admin, repo owner, or a write-grant holder.
pub fn can_moderate_repo(actor: Option<&User>, repo: &Repository, grants: &[Grant]) -> bool {
    can_write(actor, repo, grants)
}

/// Push-authorization platform policy (distinct from per-repo `CanWrite`):
/// admin-only by default, widened by an explicit write-or-higher grant.
/// Applied by Git Transport in addition to, not instead of, `can_write`.
pub fn can_push(actor: Option<&User>, repo: &Repository, grants: &[Grant]) -> bool {
    let Some(actor) = actor else {
        return false;
    };
    if actor.is_admin {
        return true;
    }
    grant_role(grants, repo.id, actor.id).is_some_and(|r| r >= Role::Write)
}
