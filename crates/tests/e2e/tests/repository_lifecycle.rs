#![allow(clippy::unwrap_used, clippy::expect_used)]

use platform_e2e_tests::{Fixtures, TestServer};

async fn registered_and_logged_in(server: &TestServer) -> String {
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
    username
}

#[tokio::test]
async fn create_list_get_and_delete_repository() {
    let server = TestServer::spawn().await;
    registered_and_logged_in(&server).await;

    let created = server
        .client
        .post(server.url("/repos/create"))
        .json(&Fixtures::create_repo_payload("hello-world"))
        .send()
        .await
        .unwrap();
    assert!(created.status().is_success());
    let repo: serde_json::Value = created.json().await.unwrap();
    let repo_slug = repo["slug"].as_str().unwrap().to_string();
    assert_eq!(repo["name"], "hello-world");

    let listed = server.client.get(server.url("/repos")).send().await.unwrap();
    assert!(listed.status().is_success());
    let repos: Vec<serde_json::Value> = listed.json().await.unwrap();
    assert!(repos.iter().any(|r| r["slug"] == repo_slug));

    let fetched = server.client.get(server.url(&format!("/repos/{repo_slug}"))).send().await.unwrap();
    assert!(fetched.status().is_success());

    let deleted = server
        .client
        .post(server.url(&format!("/repos/{repo_slug}/delete")))
        .send()
        .await
        .unwrap();
    assert!(deleted.status().is_success());

    let gone = server.client.get(server.url(&format!("/repos/{repo_slug}"))).send().await.unwrap();
    assert_eq!(gone.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn getting_unknown_repository_is_not_found() {
    let server = TestServer::spawn().await;
    registered_and_logged_in(&server).await;

    let resp = server.client.get(server.url("/repos/does-not-exist")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_second_user_cannot_delete_someone_elses_repository() {
    let server = TestServer::spawn().await;
    registered_and_logged_in(&server).await;

    let created = server
        .client
        .post(server.url("/repos/create"))
        .json(&Fixtures::create_repo_payload("owned-by-first-user"))
        .send()
        .await
        .unwrap();
    let repo: serde_json::Value = created.json().await.unwrap();
    let repo_slug = repo["slug"].as_str().unwrap();

    // A fresh client with its own cookie jar, logged in as a second user.
    let other_client = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let username = Fixtures::unique("second-user");
    other_client
        .post(server.url("/auth/register"))
        .json(&Fixtures::register_payload(&username))
        .send()
        .await
        .unwrap();
    other_client
        .post(server.url("/auth/login"))
        .json(&Fixtures::login_payload(&username))
        .send()
        .await
        .unwrap();

    let resp = other_client
        .post(server.url(&format!("/repos/{repo_slug}/delete")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
}
