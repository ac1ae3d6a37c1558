//! The git-smart-http transport: `info/refs` service advertisement plus
//! `git-upload-pack`/`git-receive-pack`, all three shelling straight out
//! to the system `git` binary rather than reimplementing the pkt-line
//! protocol. Advertisement output is small and buffered through
//! [`git_cli::run_git`]; pack data is not — `git-upload-pack`'s response
//! and `git-receive-pack`'s request body are streamed directly between
//! the HTTP body and the child process's pipes so neither direction ever
//! holds a full pack in memory.
//!
//! A successful push snapshots refs before and after `receive-pack` runs
//! rather than parsing the client's ref-update commands out of the
//! request: the repository's post-push ref state is what determines which
//! actions should fire either way, and diffing it keeps both the request
//! and response bodies fully streamed with nothing inspected in between.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::TryStreamExt;
use tokio::process::Command;
use tokio_util::io::{ReaderStream, StreamReader};

use platform_core::authz;
use platform_core::model::action::ActionBmc;
use platform_core::model::action_run::ActionRunBmc;
use platform_core::model::grant::GrantBmc;
use platform_core::model::repository::{Repository, RepositoryBmc};
use platform_core::model::user::User;
use platform_core::store::git_cli::{self, RefEntry};
use platform_core::{Ctx, ModelManager};

use crate::auth::basic_credentials;
use crate::error::ServerError;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/git/{repo}/info/refs", get(info_refs))
        .route("/git/{repo}/git-upload-pack", post(upload_pack))
        .route("/git/{repo}/git-receive-pack", post(receive_pack))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"platform\"")],
    )
        .into_response()
}

/// Resolve the repository slug out of a `{slug}.git` path segment. The
/// slug is the same URL-safe identifier `RepositoryBmc::get_by_slug`
/// resolves elsewhere in the JSON API — it is globally unique, so it
/// addresses a repository on its own without an owner prefix.
fn parse_repo_segment(segment: &str) -> Result<String, Response> {
    let slug = segment.strip_suffix(".git").unwrap_or(segment);
    platform_core::utils::validation::validate_repo_slug(slug)
        .map(|()| slug.to_string())
        .map_err(|_| ServerError::BadRequest("malformed repository path".into()).into_response())
}

async fn authenticate(headers: &HeaderMap, mm: &ModelManager) -> Option<User> {
    let (username, password) = basic_credentials(headers)?;
    platform_core::credential_registry::authenticate(&Ctx::root_ctx(), mm, &username, &password)
        .await
        .ok()
}

async fn load_repo_by_slug(mm: &ModelManager, slug: &str) -> Result<Repository, Response> {
    RepositoryBmc::get_by_slug(&Ctx::root_ctx(), mm, slug)
        .await
        .map_err(|e| ServerError::Core(e).into_response())
}

async fn grants_for(mm: &ModelManager, repo_id: i64, actor: Option<&User>) -> Vec<platform_core::model::grant::Grant> {
    let Some(actor) = actor else { return Vec::new() };
    GrantBmc::get_for_user(&Ctx::root_ctx(), mm, repo_id, actor.id)
        .await
        .ok()
        .flatten()
        .into_iter()
        .collect()
}

#[derive(serde::Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

async fn info_refs(
    State(state): State<AppState>,
    AxumPath(repo): AxumPath<String>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let slug = match parse_repo_segment(&repo) {
        Ok(slug) => slug,
        Err(resp) => return resp,
    };
    let repo = match load_repo_by_slug(&state.mm, &slug).await {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };

    let Some(service) = query.service.as_deref() else {
        return ServerError::BadRequest("missing service parameter".into()).into_response();
    };
    if service != "git-upload-pack" && service != "git-receive-pack" {
        return ServerError::BadRequest(format!("unsupported service: {service}")).into_response();
    }

    let actor = authenticate(&headers, &state.mm).await;
    let grants = grants_for(&state.mm, repo.id, actor.as_ref()).await;
    let authorized = if service == "git-upload-pack" {
        authz::can_read(actor.as_ref(), &repo, &grants)
    } else {
        authz::can_push(actor.as_ref(), &repo, &grants) && authz::can_write(actor.as_ref(), &repo, &grants)
    };
    if !authorized {
        return if actor.is_none() { unauthorized() } else { ServerError::Forbidden.into_response() };
    }

    let repo_path = state.mm.repo_path(&repo.slug);
    let service_cmd = &service["git-".len()..];
    let advertisement = match git_cli::run_git(&repo_path, &[service_cmd, "--stateless-rpc", "--advertise-refs", "."]).await {
        Ok(out) => out,
        Err(e) => return ServerError::Core(e).into_response(),
    };

    let mut body = service_announcement(service);
    body.extend_from_slice(&advertisement);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, format!("application/x-{service}-advertisement"))],
        body,
    )
        .into_response()
}

fn service_announcement(service: &str) -> Vec<u8> {
    let line = format!("# service={service}\n");
    let mut out = format!("{:04x}{line}", line.len() + 4).into_bytes();
    out.extend_from_slice(b"0000");
    out
}

async fn upload_pack(State(state): State<AppState>, AxumPath(repo): AxumPath<String>, headers: HeaderMap, body: Body) -> Response {
    let slug = match parse_repo_segment(&repo) {
        Ok(slug) => slug,
        Err(resp) => return resp,
    };
    let repo = match load_repo_by_slug(&state.mm, &slug).await {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };

    let actor = authenticate(&headers, &state.mm).await;
    let grants = grants_for(&state.mm, repo.id, actor.as_ref()).await;
    if !authz::can_read(actor.as_ref(), &repo, &grants) {
        return if actor.is_none() { unauthorized() } else { ServerError::Forbidden.into_response() };
    }

    let repo_path = state.mm.repo_path(&repo.slug);
    match run_streamed(&repo_path, "upload-pack", body).await {
        Ok(stream_body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-git-upload-pack-result")],
            stream_body,
        )
            .into_response(),
        Err(e) => ServerError::Io(e).into_response(),
    }
}

/// Spawn `git <subcommand> --stateless-rpc .` in `repo_path`, stream the
/// request body into its stdin, and return its stdout as a streaming
/// response body. The child's exit is reaped by a detached task; a
/// nonzero exit only surfaces as a truncated response, the same failure
/// mode a real network hiccup mid-clone would produce.
async fn run_streamed(repo_path: &Path, subcommand: &str, body: Body) -> std::io::Result<Body> {
    let mut child = Command::new("git")
        .current_dir(repo_path)
        .args([subcommand, "--stateless-rpc", "."])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin piped");
    let stdout = child.stdout.take().expect("stdout piped");

    tokio::spawn(async move {
        let mut reader = StreamReader::new(
            body.into_data_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let _ = tokio::io::copy(&mut reader, &mut stdin).await;
        drop(stdin);
        if let Err(err) = child.wait().await {
            tracing::warn!(error = %err, subcommand, "git subprocess exited with error");
        }
    });

    Ok(Body::from_stream(ReaderStream::new(stdout)))
}

async fn receive_pack(State(state): State<AppState>, AxumPath(repo): AxumPath<String>, headers: HeaderMap, body: Body) -> Response {
    let slug = match parse_repo_segment(&repo) {
        Ok(slug) => slug,
        Err(resp) => return resp,
    };
    let repo = match load_repo_by_slug(&state.mm, &slug).await {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };

    let actor = authenticate(&headers, &state.mm).await;
    let grants = grants_for(&state.mm, repo.id, actor.as_ref()).await;
    if !authz::can_push(actor.as_ref(), &repo, &grants) || !authz::can_write(actor.as_ref(), &repo, &grants) {
        return if actor.is_none() { unauthorized() } else { ServerError::Forbidden.into_response() };
    }

    let repo_path = state.mm.repo_path(&repo.slug);
    let before = git_cli::list_refs(&repo_path).await.unwrap_or_default();

    let output = match run_buffered(&repo_path, "receive-pack", body).await {
        Ok(output) => output,
        Err(e) => return ServerError::Io(e).into_response(),
    };

    if output.status.success() {
        if let Err(err) = trigger_actions_for_push(&state, &repo, &repo_path, &before).await {
            tracing::warn!(error = %err, repository_id = repo.id, "failed to trigger actions for push");
        }
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-git-receive-pack-result")], output.stdout).into_response()
}

/// Like [`run_streamed`], but for `receive-pack`: the request body (pack
/// data) is streamed in, while the response (a short report-status) is
/// collected in full before returning, since the caller needs the exit
/// status to decide whether to trigger actions.
async fn run_buffered(repo_path: &Path, subcommand: &str, body: Body) -> std::io::Result<std::process::Output> {
    let mut child = Command::new("git")
        .current_dir(repo_path)
        .args([subcommand, "--stateless-rpc", "."])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin piped");
    let mut reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );
    tokio::io::copy(&mut reader, &mut stdin).await?;
    drop(stdin);

    child.wait_with_output().await
}

async fn trigger_actions_for_push(state: &AppState, repo: &Repository, repo_path: &PathBuf, before: &[RefEntry]) -> platform_core::Result<()> {
    let ctx = Ctx::root_ctx();
    let after = git_cli::list_refs(repo_path).await?;

    for entry in &after {
        let Some(branch) = entry.name.strip_prefix("refs/heads/") else { continue };
        let changed = before
            .iter()
            .find(|b| b.name == entry.name)
            .map_or(true, |b| b.oid != entry.oid);
        if !changed {
            continue;
        }

        let actions = ActionBmc::list_triggered_by_push(&ctx, &state.mm, repo.id, branch).await?;
        for action in actions {
            // A busy action (already queued/running) must not block the
            // rest of this push's fan-out; skip it and move on.
            if let Err(err) = ActionRunBmc::enqueue(&ctx, &state.mm, action.id, &entry.oid, branch).await {
                tracing::warn!(error = %err, action_id = action.id, "skipping push-triggered run");
            }
        }

        state
            .event_bus
            .publish(
                &ctx,
                "push",
                0,
                &entry.oid,
                vec![
                    ("repository_id".to_string(), repo.id.to_string()),
                    ("branch".to_string(), branch.to_string()),
                ],
            )
            .await?;
    }

    Ok(())
}
