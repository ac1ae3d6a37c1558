#![allow(clippy::unwrap_used, clippy::expect_used)]

use platform_e2e_tests::{Fixtures, TestServer};

async fn admin_session(server: &TestServer) {
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
}

#[tokio::test]
async fn info_refs_on_a_public_repo_is_readable_without_auth() {
    let server = TestServer::spawn().await;
    admin_session(&server).await;

    let repo: serde_json::Value = server
        .client
        .post(server.url("/repos/create"))
        .json(&Fixtures::create_repo_payload("public-repo"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let repo_slug = repo["slug"].as_str().unwrap();

    let anon = reqwest::Client::new();
    let resp = anon
        .get(server.url(&format!("/git/{repo_slug}.git/info/refs?service=git-upload-pack")))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
        "application/x-git-upload-pack-advertisement"
    );
}

#[tokio::test]
async fn info_refs_on_a_private_repo_requires_auth() {
    let server = TestServer::spawn().await;
    admin_session(&server).await;

    let repo: serde_json::Value = server
        .client
        .post(server.url("/repos/create"))
        .json(&serde_json::json!({
            "name": "private-repo",
            "visibility": "private",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let repo_slug = repo["slug"].as_str().unwrap();

    let anon = reqwest::Client::new();
    let resp = anon
        .get(server.url(&format!("/git/{repo_slug}.git/info/refs?service=git-upload-pack")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn info_refs_with_malformed_repo_segment_is_a_bad_request() {
    let server = TestServer::spawn().await;

    // Leading hyphen violates the slug grammar (must start alphanumeric),
    // so this never resolves to a lookup at all.
    let anon = reqwest::Client::new();
    let resp = anon
        .get(server.url("/git/-not-a-slug.git/info/refs?service=git-upload-pack"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn info_refs_for_an_unknown_slug_is_not_found() {
    let server = TestServer::spawn().await;

    let anon = reqwest::Client::new();
    let resp = anon
        .get(server.url("/git/does-not-exist.git/info/refs?service=git-upload-pack"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
