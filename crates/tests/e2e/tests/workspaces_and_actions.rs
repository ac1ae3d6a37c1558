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
async fn create_list_and_delete_workspace() {
    let server = TestServer::spawn().await;
    admin_session(&server).await;

    let created = server
        .client
        .post(server.url("/workspaces"))
        .json(&serde_json::json!({"name": "dev", "image": "platform/ide:latest"}))
        .send()
        .await
        .unwrap();
    assert!(created.status().is_success());
    let workspace: serde_json::Value = created.json().await.unwrap();
    let workspace_id = workspace["id"].as_i64().unwrap();
    assert_eq!(workspace["status"], "stopped");

    let listed = server.client.get(server.url("/workspaces")).send().await.unwrap();
    assert!(listed.status().is_success());
    let workspaces: Vec<serde_json::Value> = listed.json().await.unwrap();
    assert!(workspaces.iter().any(|w| w["id"] == workspace_id));

    let deleted = server
        .client
        .delete(server.url(&format!("/workspaces/{workspace_id}")))
        .send()
        .await
        .unwrap();
    assert!(deleted.status().is_success());

    let gone = server.client.get(server.url(&format!("/workspaces/{workspace_id}"))).send().await.unwrap();
    assert_eq!(gone.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_action_and_list_it_for_a_repository() {
    let server = TestServer::spawn().await;
    admin_session(&server).await;

    let repo = server
        .client
        .post(server.url("/repos/create"))
        .json(&Fixtures::create_repo_payload("ci-demo"))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let repo_slug = repo["slug"].as_str().unwrap();

    let created = server
        .client
        .post(server.url(&format!("/repos/{repo_slug}/actions")))
        .json(&serde_json::json!({
            "name": "test",
            "branch_filters": ["main"],
            "image": "platform/ci:latest",
            "command": "cargo test",
        }))
        .send()
        .await
        .unwrap();
    assert!(created.status().is_success());

    let listed = server
        .client
        .get(server.url(&format!("/repos/{repo_slug}/actions")))
        .send()
        .await
        .unwrap();
    assert!(listed.status().is_success());
    let actions: Vec<serde_json::Value> = listed.json().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["name"], "test");
}

#[tokio::test]
async fn accessing_someone_elses_workspace_is_forbidden() {
    let server = TestServer::spawn().await;
    admin_session(&server).await;

    let created = server
        .client
        .post(server.url("/workspaces"))
        .json(&serde_json::json!({"name": "dev", "image": "platform/ide:latest"}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let workspace_id = created["id"].as_i64().unwrap();

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
        .get(server.url(&format!("/workspaces/{workspace_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
}
