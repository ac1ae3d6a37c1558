//! Reverse proxy from `/coder/{workspace_id}/...` to the per-workspace
//! IDE container listening on `127.0.0.1:{workspace.proxy_port}`.
//!
//! Ordinary HTTP traffic is forwarded with [`reqwest`], the same way the
//! teacher forwards outbound HTTP elsewhere; the IDE's live connection is
//! a WebSocket, which `reqwest` can't carry, so that one upgrade case is
//! handled separately: axum terminates the client handshake with
//! [`WebSocketUpgrade`] and [`tokio_tungstenite`] opens the matching
//! connection to the container, then messages are pumped between the two
//! until either side closes.
//!
//! A workspace that isn't running yet is started on first request rather
//! than rejected — the caller sees a `202` telling it to retry, the same
//! shape a cold-starting container naturally produces.

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite;

use platform_core::model::user::UserBmc;
use platform_core::model::workspace::{Workspace, WorkspaceBmc, WorkspaceStatus};
use platform_core::Ctx;

use crate::auth::AuthUser;
use crate::error::{Result, ServerError};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/coder/{workspace_id}", any(proxy_root))
        .route("/coder/{workspace_id}/{*path}", any(proxy_subpath))
}

async fn require_access(mm: &platform_core::ModelManager, user_id: i64, workspace_id: i64) -> Result<Workspace> {
    let ctx = Ctx::root_ctx();
    let ws = WorkspaceBmc::get_by_id(&ctx, mm, workspace_id).await?;
    if ws.owner_id == user_id {
        return Ok(ws);
    }
    let actor = UserBmc::get_by_id(&ctx, mm, user_id).await?;
    if actor.is_admin {
        return Ok(ws);
    }
    Err(ServerError::Forbidden)
}

#[derive(Serialize)]
struct StartingResponse {
    status: &'static str,
    message: &'static str,
}

fn starting_response() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(StartingResponse { status: "starting", message: "workspace is starting, retry shortly" }),
    )
        .into_response()
}

async fn proxy_root(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(workspace_id): Path<i64>,
    req: Request,
) -> Response {
    proxy(auth, state, workspace_id, String::new(), req).await
}

async fn proxy_subpath(
    auth: AuthUser,
    State(state): State<AppState>,
    Path((workspace_id, path)): Path<(i64, String)>,
    req: Request,
) -> Response {
    proxy(auth, state, workspace_id, path, req).await
}

async fn proxy(auth: AuthUser, state: AppState, workspace_id: i64, path: String, req: Request) -> Response {
    let ws = match require_access(&state.mm, auth.user_id, workspace_id).await {
        Ok(ws) => ws,
        Err(e) => return e.into_response(),
    };

    if ws.status != WorkspaceStatus::Running {
        if let Err(err) = state.supervisor.start(&Ctx::root_ctx(), workspace_id).await {
            tracing::warn!(error = %err, workspace_id, "failed to start workspace on demand");
        }
        return starting_response();
    }
    let Some(port) = ws.proxy_port else {
        tracing::warn!(workspace_id, "workspace marked running with no proxy port");
        return starting_response();
    };

    let (mut parts, body) = req.into_parts();
    let target = rewrite_target(&path, parts.uri.query());

    if is_upgrade_request(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => {
                let upstream_url = format!("ws://127.0.0.1:{port}{target}");
                upgrade.on_upgrade(move |socket| bridge_websocket(socket, upstream_url))
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    let upstream_url = format!("http://127.0.0.1:{port}{target}");
    forward_http(parts.method, upstream_url, parts.headers, body).await
}

/// Strip the `/coder/{workspace_id}` prefix the router already consumed
/// and reassemble the path the container's own HTTP server expects.
fn rewrite_target(path: &str, query: Option<&str>) -> String {
    let mut target = format!("/{path}");
    if let Some(q) = query {
        target.push('?');
        target.push_str(q);
    }
    target
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection_upgrade = headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade && connection_upgrade
}

async fn forward_http(method: axum::http::Method, url: String, mut headers: HeaderMap, body: axum::body::Body) -> Response {
    headers.remove(axum::http::header::HOST);
    headers.remove(axum::http::header::CONTENT_LENGTH);

    let client = reqwest::Client::new();
    let req_builder = client
        .request(method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let upstream = match req_builder.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(error = %err, url, "workspace proxy upstream request failed");
            return ServerError::BadRequest("workspace is not reachable".into()).into_response();
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let stream = upstream.bytes_stream();
    let mut response = axum::body::Body::from_stream(stream).into_response();
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Pump messages between the client's WebSocket and the matching
/// connection to the workspace container until either side closes.
/// Message payloads are copied across as-is; only the close-frame
/// reason is dropped, since `axum` and `tungstenite` model it with
/// slightly different string types and neither side inspects it.
async fn bridge_websocket(client: WebSocket, upstream_url: String) {
    let upstream = match tokio_tungstenite::connect_async(&upstream_url).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            tracing::warn!(error = %err, upstream_url, "failed to connect to workspace websocket upstream");
            return;
        }
    };

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let Some(msg) = to_tungstenite(msg) else { continue };
            if upstream_tx.send(msg).await.is_err() {
                break;
            }
        }
    };
    let to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(msg) = to_axum(msg) else { continue };
            if client_tx.send(msg).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
    }
}

fn to_tungstenite(msg: AxumMessage) -> Option<tungstenite::Message> {
    Some(match msg {
        AxumMessage::Text(t) => tungstenite::Message::Text(t.to_string().into()),
        AxumMessage::Binary(b) => tungstenite::Message::Binary(b.to_vec().into()),
        AxumMessage::Ping(p) => tungstenite::Message::Ping(p.to_vec().into()),
        AxumMessage::Pong(p) => tungstenite::Message::Pong(p.to_vec().into()),
        AxumMessage::Close(_) => tungstenite::Message::Close(None),
    })
}

fn to_axum(msg: tungstenite::Message) -> Option<AxumMessage> {
    Some(match msg {
        tungstenite::Message::Text(t) => AxumMessage::Text(t.to_string().into()),
        tungstenite::Message::Binary(b) => AxumMessage::Binary(b.to_vec().into()),
        tungstenite::Message::Ping(p) => AxumMessage::Ping(p.to_vec().into()),
        tungstenite::Message::Pong(p) => AxumMessage::Pong(p.to_vec().into()),
        tungstenite::Message::Close(frame) => {
            AxumMessage::Close(frame.map(|f| CloseFrame { code: f.code.into(), reason: f.reason.to_string().into() }))
        }
        tungstenite::Message::Frame(_) => return None,
    })
}

