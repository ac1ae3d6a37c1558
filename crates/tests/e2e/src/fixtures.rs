use serde_json::{json, Value};

pub struct Fixtures;

impl Fixtures {
    pub fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
    }

    pub fn register_payload(username: &str) -> Value {
        json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "correct horse battery staple",
        })
    }

    pub fn login_payload(username: &str) -> Value {
        json!({
            "username": username,
            "password": "correct horse battery staple",
        })
    }

    pub fn create_repo_payload(name: &str) -> Value {
        json!({
            "name": name,
            "description": "created by the e2e suite",
            "visibility": "public",
        })
    }
}
