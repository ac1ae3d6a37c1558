//! Workspace CRUD and lifecycle control. Start/stop delegate to
//! `platform_runtime::WorkspaceSupervisor`, which owns the container and
//! port allocation; this module only authorizes the request and updates
//! the row the supervisor itself doesn't touch (creation, deletion).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use platform_core::model::workspace::{Workspace, WorkspaceBmc, WorkspaceForCreate, WorkspaceStatus};
use platform_core::Ctx;

use crate::auth::AuthUser;
use crate::error::{ServerError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workspaces", get(list_workspaces).post(create_workspace))
        .route("/workspaces/{id}", get(get_workspace).delete(delete_workspace))
        .route("/workspaces/{id}/start", post(start_workspace))
        .route("/workspaces/{id}/stop", post(stop_workspace))
}

async fn require_owner(mm: &platform_core::ModelManager, user_id: i64, workspace_id: i64) -> Result<Workspace> {
    let ctx = Ctx::root_ctx();
    let ws = WorkspaceBmc::get_by_id(&ctx, mm, workspace_id).await?;
    if ws.owner_id != user_id {
        return Err(ServerError::Forbidden);
    }
    Ok(ws)
}

async fn list_workspaces(auth: AuthUser, State(state): State<AppState>) -> Result<Json<Vec<Workspace>>> {
    let ctx = Ctx::root_ctx();
    let workspaces = WorkspaceBmc::list_for_owner(&ctx, &state.mm, auth.user_id).await?;
    Ok(Json(workspaces))
}

#[derive(Deserialize)]
struct CreateWorkspaceBody {
    name: String,
    image: String,
    repository_id: Option<i64>,
}

async fn create_workspace(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateWorkspaceBody>,
) -> Result<Json<Workspace>> {
    let ctx = Ctx::root_ctx();
    let id = WorkspaceBmc::create(
        &ctx,
        &state.mm,
        WorkspaceForCreate {
            owner_id: auth.user_id,
            repository_id: body.repository_id,
            name: body.name,
            image: body.image,
        },
    )
    .await?;
    let ws = WorkspaceBmc::get_by_id(&ctx, &state.mm, id).await?;
    Ok(Json(ws))
}

async fn get_workspace(auth: AuthUser, State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Workspace>> {
    let ws = require_owner(&state.mm, auth.user_id, id).await?;
    Ok(Json(ws))
}

async fn delete_workspace(auth: AuthUser, State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
    let ws = require_owner(&state.mm, auth.user_id, id).await?;
    if ws.status != WorkspaceStatus::Stopped {
        state.supervisor.stop(&Ctx::root_ctx(), id).await?;
    }
    WorkspaceBmc::delete(&Ctx::root_ctx(), &state.mm, id).await?;
    Ok(())
}

async fn start_workspace(auth: AuthUser, State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
    require_owner(&state.mm, auth.user_id, id).await?;
    state.supervisor.start(&Ctx::root_ctx(), id).await?;
    Ok(())
}

async fn stop_workspace(auth: AuthUser, State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
    require_owner(&state.mm, auth.user_id, id).await?;
    state.supervisor.stop(&Ctx::root_ctx(), id).await?;
    Ok(())
}
