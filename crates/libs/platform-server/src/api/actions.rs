//! CI action definitions, manual dispatch, run history, logs, and
//! artifact download. The sandbox itself is driven out-of-process by
//! `platform_runtime::ActionOrchestrator`; these handlers only manage
//! the queue and read back results recorded in the database.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use platform_core::authz;
use platform_core::model::action::{Action, ActionBmc, ActionForCreate};
use platform_core::model::action_artifact::ActionArtifactBmc;
use platform_core::model::action_run::{ActionRun, ActionRunBmc};
use platform_core::model::repository::RepositoryBmc;
use platform_core::store::git_cli;

use crate::error::{ServerError, Result};
use crate::AppState;

use super::{ctx_for, load_repo_and_actor};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/repos/{slug}/actions", get(list_actions).post(create_action))
        .route("/repos/{slug}/actions/{action_id}/run", post(run_action))
        .route("/repos/{slug}/actions/{action_id}/history", get(run_history))
        .route("/repos/{slug}/actions/{action_id}/logs", get(latest_logs))
        .route("/repos/{slug}/actions/{action_id}/artifacts", get(list_artifacts))
        .route(
            "/repos/{slug}/actions/{action_id}/artifacts/{artifact_path}",
            get(download_artifact),
        )
}

async fn list_actions(
    auth: Option<crate::auth::AuthUser>,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Action>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let actions = ActionBmc::list_for_repository(&ctx, &state.mm, repo.id).await?;
    Ok(Json(actions))
}

#[derive(Deserialize)]
struct CreateActionBody {
    name: String,
    #[serde(default)]
    branch_filters: Vec<String>,
    image: String,
    command: String,
    #[serde(default)]
    artifact_patterns: Vec<String>,
}

async fn create_action(
    auth: crate::auth::AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CreateActionBody>,
) -> Result<Json<Action>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_moderate_repo(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));
    let action_id = ActionBmc::create(
        &ctx,
        &state.mm,
        ActionForCreate {
            repository_id: repo.id,
            name: body.name,
            branch_filters: body.branch_filters,
            image: body.image,
            command: body.command,
            artifact_patterns: body.artifact_patterns,
        },
    )
    .await?;
    let action = ActionBmc::get_by_id(&ctx, &state.mm, action_id).await?;
    Ok(Json(action))
}

#[derive(Deserialize)]
struct RunActionBody {
    #[serde(default)]
    branch: Option<String>,
}

async fn run_action(
    auth: crate::auth::AuthUser,
    State(state): State<AppState>,
    Path((slug, action_id)): Path<(String, i64)>,
    Json(body): Json<RunActionBody>,
) -> Result<Json<ActionRun>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, Some(auth.user_id), &slug).await?;
    if !authz::can_write(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(Some(auth.user_id));

    let action = ActionBmc::get_by_id(&ctx, &state.mm, action_id).await?;
    if action.repository_id != repo.id {
        return Err(ServerError::BadRequest("action does not belong to this repository".into()));
    }

    let branch = body.branch.unwrap_or_else(|| repo.default_branch.clone());
    let repo_path = state.mm.repo_path(&repo.slug);
    let commit_sha = git_cli::resolve_rev(&repo_path, &format!("refs/heads/{branch}")).await?;

    let run_id = ActionRunBmc::enqueue(&ctx, &state.mm, action_id, &commit_sha, &branch).await?;
    let run = ActionRunBmc::get_by_id(&ctx, &state.mm, run_id).await?;
    Ok(Json(run))
}

async fn run_history(
    auth: Option<crate::auth::AuthUser>,
    State(state): State<AppState>,
    Path((slug, action_id)): Path<(String, i64)>,
) -> Result<Json<Vec<ActionRun>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let runs = ActionRunBmc::list_for_action(&ctx, &state.mm, action_id).await?;
    Ok(Json(runs))
}

async fn latest_logs(
    auth: Option<crate::auth::AuthUser>,
    State(state): State<AppState>,
    Path((slug, action_id)): Path<(String, i64)>,
) -> Result<Json<Option<ActionRun>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let runs = ActionRunBmc::list_for_action(&ctx, &state.mm, action_id).await?;
    Ok(Json(runs.into_iter().next()))
}

async fn list_artifacts(
    auth: Option<crate::auth::AuthUser>,
    State(state): State<AppState>,
    Path((slug, action_id)): Path<(String, i64)>,
) -> Result<Json<Vec<platform_core::model::action_artifact::ActionArtifact>>> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let runs = ActionRunBmc::list_for_action(&ctx, &state.mm, action_id).await?;
    let Some(latest) = runs.into_iter().next() else {
        return Ok(Json(Vec::new()));
    };
    let artifacts = ActionArtifactBmc::list_for_run(&ctx, &state.mm, latest.id).await?;
    Ok(Json(artifacts))
}

async fn download_artifact(
    auth: Option<crate::auth::AuthUser>,
    State(state): State<AppState>,
    Path((slug, action_id, artifact_path)): Path<(String, i64, String)>,
) -> Result<Response> {
    let (repo, actor, grants) = load_repo_and_actor(&state.mm, auth.map(|a| a.user_id), &slug).await?;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return Err(ServerError::Forbidden);
    }
    let ctx = ctx_for(auth.map(|a| a.user_id));
    let runs = ActionRunBmc::list_for_action(&ctx, &state.mm, action_id).await?;
    let Some(latest) = runs.into_iter().next() else {
        return Err(ServerError::BadRequest("no runs for this action".into()));
    };

    let artifact = ActionArtifactBmc::get_by_run_and_path(&ctx, &state.mm, latest.id, &artifact_path).await?;
    let file = tokio::fs::File::open(&artifact.storage_path).await.map_err(ServerError::Io)?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.path.replace('"', "")),
            ),
        ],
        body,
    )
        .into_response())
}
