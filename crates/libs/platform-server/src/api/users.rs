//! Account registration/login and access-token management.
//!
//! `spec.md`'s documented route list starts at repository creation and
//! is silent on how a caller obtains a session in the first place; these
//! routes exist so the cookie- and token-based auth this server actually
//! enforces has somewhere to originate from.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use platform_core::credential_registry;
use platform_core::model::access_token::{AccessToken, AccessTokenBmc};
use platform_core::model::user::{User, UserBmc, UserForCreate};
use platform_core::Ctx;

use crate::auth::{issue_session_cookie, AuthUser, SESSION_COOKIE_NAME};
use crate::error::{ServerError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/users/me", get(me))
        .route("/users/me/tokens", get(list_tokens).post(create_token))
        .route("/users/me/tokens/{id}/revoke", post(revoke_token))
}

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    email: String,
    password: String,
}

async fn register(State(state): State<AppState>, Json(body): Json<RegisterBody>) -> Result<Json<User>> {
    let ctx = Ctx::root_ctx();
    let password_hash = credential_registry::hash_password(&body.password)?;
    let user_id = UserBmc::create(
        &ctx,
        &state.mm,
        UserForCreate {
            username: body.username,
            email: body.email,
            password_hash,
        },
    )
    .await?;
    let user = UserBmc::get_by_id(&ctx, &state.mm, user_id).await?;
    Ok(Json(user))
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginBody>) -> Result<Response> {
    let ctx = Ctx::root_ctx();
    let user = credential_registry::authenticate(&ctx, &state.mm, &body.username, &body.password).await?;
    let secret = state.auth_secret.as_deref().unwrap_or("");
    let cookie = issue_session_cookie(secret, user.id);

    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE_NAME}={cookie}; Path=/; HttpOnly; SameSite=Lax"),
        )],
        Json(user),
    )
        .into_response())
}

async fn logout() -> Response {
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
        )],
    )
        .into_response()
}

async fn me(auth: AuthUser, State(state): State<AppState>) -> Result<Json<User>> {
    let ctx = Ctx::root_ctx();
    let user = UserBmc::get_by_id(&ctx, &state.mm, auth.user_id).await?;
    Ok(Json(user))
}

async fn list_tokens(auth: AuthUser, State(state): State<AppState>) -> Result<Json<Vec<AccessToken>>> {
    let ctx = Ctx::root_ctx();
    let tokens = AccessTokenBmc::list_for_user(&ctx, &state.mm, auth.user_id).await?;
    Ok(Json(tokens))
}

#[derive(Deserialize)]
struct CreateTokenBody {
    name: String,
    #[serde(default = "default_token_ttl")]
    ttl_seconds: i64,
}

fn default_token_ttl() -> i64 {
    credential_registry::DEFAULT_TOKEN_TTL_SECS
}

#[derive(Serialize)]
struct CreateTokenResponse {
    id: i64,
    secret: String,
}

async fn create_token(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateTokenBody>,
) -> Result<Json<CreateTokenResponse>> {
    let ctx = Ctx::root_ctx();
    let (id, secret) = credential_registry::issue_token(&ctx, &state.mm, auth.user_id, &body.name, body.ttl_seconds).await?;
    Ok(Json(CreateTokenResponse { id, secret }))
}

async fn revoke_token(auth: AuthUser, State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
    let ctx = Ctx::root_ctx();
    let owned = AccessTokenBmc::list_for_user(&ctx, &state.mm, auth.user_id)
        .await?
        .into_iter()
        .any(|t| t.id == id);
    if !owned {
        return Err(ServerError::Forbidden);
    }
    AccessTokenBmc::revoke(&ctx, &state.mm, id).await?;
    Ok(())
}
