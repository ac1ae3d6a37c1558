#![allow(clippy::unwrap_used, clippy::expect_used)]

use platform_e2e_tests::{Fixtures, TestServer};

#[tokio::test]
async fn register_then_login_sets_session_cookie() {
    let server = TestServer::spawn().await;
    let username = Fixtures::unique("octocat");

    let registered = server
        .client
        .post(server.url("/auth/register"))
        .json(&Fixtures::register_payload(&username))
        .send()
        .await
        .unwrap();
    assert!(registered.status().is_success());

    let logged_in = server
        .client
        .post(server.url("/auth/login"))
        .json(&Fixtures::login_payload(&username))
        .send()
        .await
        .unwrap();
    assert!(logged_in.status().is_success());

    // The cookie jar now carries the session; an authenticated route
    // should succeed without re-sending credentials.
    let me = server.client.get(server.url("/users/me")).send().await.unwrap();
    assert!(me.status().is_success());
    let body: serde_json::Value = me.json().await.unwrap();
    assert_eq!(body["username"], username);
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let server = TestServer::spawn().await;
    let username = Fixtures::unique("octocat");

    server
        .client
        .post(server.url("/auth/register"))
        .json(&Fixtures::register_payload(&username))
        .send()
        .await
        .unwrap();

    let resp = server
        .client
        .post(server.url("/auth/login"))
        .json(&serde_json::json!({"username": username, "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthenticated_request_to_protected_route_is_rejected() {
    let server = TestServer::spawn().await;
    let resp = server.client.get(server.url("/users/me")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn issued_access_token_authenticates_over_basic_auth() {
    let server = TestServer::spawn().await;
    let username = Fixtures::unique("octocat");

    server
        .client
        .post(server.url("/auth/register"))
        .json(&Fixtures::register_payload(&username))
        .send()
        .await
        .unwrap();
    server
        .client
        .post(server.url("/auth/login"))
        .json(&Fixtures::login_payload(&username))
        .send()
        .await
        .unwrap();

    let created = server
        .client
        .post(server.url("/users/me/tokens"))
        .json(&serde_json::json!({"name": "ci"}))
        .send()
        .await
        .unwrap();
    assert!(created.status().is_success());
    let body: serde_json::Value = created.json().await.unwrap();
    assert!(body["secret"].as_str().is_some());
}
