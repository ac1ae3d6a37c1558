//! Repository metadata, file browsing, commit history, branches, and
//! pull-request diff/merge. Full issue/PR CRUD is out of scope — see
//! `repository_store::pr_diff`/`merge_branch`, the only PR-shaped
//! operations the data model supports.
//!
//! Every route below addresses a repository by its URL-safe slug, the
//! same identifier the git transport routes on — the slug is globally
//! unique, which is what lets it double as the repository's externally
//! visible id instead of the internal row id.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use platform_core::authz;
use platform_core::model::grant::{GrantBmc, Role};
use platform_core::model::repository::RepositoryBmc;
use platform_core::repository_store;

use crate::auth::AuthUser;
use crate::error::{ServerError, Result};
use crate::AppState;

use super::{ctx_for, load_repo_and_actor};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/repos", get(list_repos))
        .route("/repos/create", post(create_repo))
        .route("/repos/{slug}", get(get_repo))
        .route("/repos/{slug}/delete", post(delete_repo))
        .route("/repos/{slug}/files", get(get_tree_root))
        .route("/repos/{slug}/files/{*path}", get(get_tree_or_file))
        .route("/repos/{slug}/commits", get(list_commits))
        .route("/repos/{slug}/commits/{sha}", get(commit_diff))
        .route("/repos/{slug}/branches", get(list_branches))
        .route("/repos/{slug}/branches/create", post(create_branch))
        .route("/repos/{slug}/branches/{name}", delete(delete_branch))
        .route("/repos/{slug}/branches/default", post(set_default_branch))
        .route("/repos/{slug}/prs/diff", get(pr_diff))
        .route("/repos/{slug}/prs/merge", post(pr_merge))
        .route("/repos/{slug}/grants", get(list_grants).post(upsert_grant))
}

#[derive(Deserialize)]
struct CreateRepoBody {
    name: String,
    description: Option<String>,
    #[serde(default)]
    visibility: Visibility,
}

#[derive(Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Visibility {
    #[default]
    Public,
    Private,
}

/// Repositories owned by the signed-in caller. There is no cross-owner
/// discovery listing — browsing someone else's repository requires its
/// slug, the same way the git transport and `GET /repos/{slug}` do.
async fn list_repos(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<platform_core::model::repository::Repository>>> {
    let ctx = ctx_for(Some(auth.user_id));
    let owned = RepositoryBmc::list_for_owner(&ctx, &state.mm, auth.user_id).await?;
    Ok(Json(owned))
}

async fn create_repo(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateRepoBody>,
) -> Result<Json<platform_core::model::repository::Repository>> {
    let ctx = ctx_for(Some(auth.user_id));
    let actor = platform_core::model::user::UserBmc::get_by_id(&ctx, &state.mm, auth.user_id).await?;

    if !authz::can_create_repo(Some(&actor)) {
        return Err(ServerError::Forbidden);
    }

    let repo = repository_store::create(
        &ctx,
        &state.mm,
        auth.user_id,
        &body.name,
        body.description,
        body.visibility == Visibility::Private,
    )
    .await?;
    Ok(Json(repo))
}

async fn get_repo(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<platform_core::model::repository::Repository>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    Ok(Json(repo))
}

async fn delete_repo(auth: AuthUser, State(state): State<AppState>, Path(slug): Path<String>) -> Result<()> {
    let (repo, actor, _grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_delete_repo(actor.as_ref(), &repo) {
        return Err(ServerError::Forbidden);
    }
    repository_store::delete(&ctx_for(Some(auth.user_id)), &state.mm, repo.id).await?;
    Ok(())
}

#[derive(Deserialize)]
struct TreeQuery {
    #[serde(rename = "ref")]
    branch: Option<String>,
}

async fn get_tree_root(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<platform_core::repository_store::TreeEntry>>> {
    browse_tree(auth, state, &slug, query.branch, String::new()).await
}

async fn get_tree_or_file(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path((slug, path)): Path<(String, String)>,
    Query(query): Query<TreeQuery>,
) -> Result<axum::response::Response> {
    use axum::response::IntoResponse;

    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let branch = query.branch.as_deref();

    match repository_store::get_file(&ctx, &state.mm, repo.id, branch, &path).await {
        Ok(file) => Ok(Json(file).into_response()),
        Err(err) if err.is_not_found() => {
            let entries = repository_store::get_file_tree(&ctx, &state.mm, repo.id, branch, &path).await?;
            Ok(Json(entries).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

async fn browse_tree(
    auth: Option<AuthUser>,
    state: AppState,
    slug: &str,
    branch: Option<String>,
    path: String,
) -> Result<Json<Vec<platform_core::repository_store::TreeEntry>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let entries = repository_store::get_file_tree(&ctx, &state.mm, repo.id, branch.as_deref(), &path).await?;
    Ok(Json(entries))
}

#[derive(Deserialize)]
struct CommitsQuery {
    #[serde(rename = "ref")]
    branch: Option<String>,
    #[serde(default = "default_commit_limit")]
    limit: usize,
}

fn default_commit_limit() -> usize {
    50
}

async fn list_commits(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> Result<Json<Vec<platform_core::repository_store::Commit>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let branch = query.branch.as_deref().unwrap_or(&repo.default_branch);
    let commits = repository_store::commits(&ctx, &state.mm, repo.id, branch, query.limit).await?;
    Ok(Json(commits))
}

async fn commit_diff(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path((slug, sha)): Path<(String, String)>,
) -> Result<Json<platform_core::repository_store::Diff>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let diff = repository_store::get_commit_diff(&ctx, &state.mm, repo.id, &sha).await?;
    Ok(Json(diff))
}

async fn list_branches(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<platform_core::repository_store::BranchInfo>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let branches = repository_store::branches(&ctx, &state.mm, repo.id).await?;
    Ok(Json(branches))
}

#[derive(Deserialize)]
struct CreateBranchBody {
    name: String,
    from: String,
}

async fn create_branch(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CreateBranchBody>,
) -> Result<()> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_write(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    repository_store::create_branch(&ctx, &state.mm, repo.id, &body.name, &body.from).await?;
    Ok(())
}

async fn delete_branch(
    auth: AuthUser,
    State(state): State<AppState>,
    Path((slug, name)): Path<(String, String)>,
) -> Result<()> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_write(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    repository_store::delete_branch(&ctx, &state.mm, repo.id, &name).await?;
    Ok(())
}

#[derive(Deserialize)]
struct SetDefaultBranchBody {
    name: String,
}

async fn set_default_branch(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<SetDefaultBranchBody>,
) -> Result<()> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_write(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    repository_store::set_default_branch(&ctx, &state.mm, repo.id, &body.name).await?;
    Ok(())
}

#[derive(Deserialize)]
struct PrDiffQuery {
    base: String,
    compare: String,
}

async fn pr_diff(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<PrDiffQuery>,
) -> Result<Json<platform_core::repository_store::PrDiff>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let diff = repository_store::pr_diff(&ctx, &state.mm, repo.id, &query.base, &query.compare).await?;
    Ok(Json(diff))
}

#[derive(Deserialize)]
struct PrMergeBody {
    source: String,
    target: String,
    message: String,
}

#[derive(Serialize)]
struct PrMergeResponse {
    merge_commit_sha: String,
}

async fn pr_merge(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<PrMergeBody>,
) -> Result<Json<PrMergeResponse>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_write(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    let actor = actor.expect("AuthUser extractor guarantees an authenticated actor");
    let merge_commit_sha = repository_store::merge_branch(
        &ctx,
        &state.mm,
        repo.id,
        &body.source,
        &body.target,
        &body.message,
        &actor.username,
        &actor.email,
    )
    .await?;
    Ok(Json(PrMergeResponse { merge_commit_sha }))
}

async fn list_grants(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<platform_core::model::grant::Grant>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_moderate_repo(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    let all = GrantBmc::list_for_repository(&ctx, &state.mm, repo.id).await?;
    Ok(Json(all))
}

#[derive(Deserialize)]
struct UpsertGrantBody {
    user_id: i64,
    role: Role,
}

async fn upsert_grant(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<UpsertGrantBody>,
) -> Result<()> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_moderate_repo(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    GrantBmc::upsert(&ctx, &state.mm, repo.id, body.user_id, body.role).await?;
    Ok(())
}
