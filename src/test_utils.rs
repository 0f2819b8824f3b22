use axum::http::StatusCode;
use axum_test::{
    multipart::{MultipartForm, Part},
    TestServer,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use crate::chat::Assistant;
use crate::config::Config;
use crate::crypto::random_id;
use crate::database::Database;
use crate::events::EventBus;
use crate::models::{AuthPayload, Envelope, FileOwner, FilePayload, FileRecord, User};
use crate::storage::Storage;
use crate::{router, AppState};

pub fn test_config() -> Config {
    Config {
        address: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        upload_dir: PathBuf::from("uploads"),
        jwt_secret: "test-secret".to_string(),
        jwt_expiry: Duration::days(1),
        company_domain: "techcorp.com".to_string(),
        max_upload_bytes: 64 * 1024,
        allowed_origins: Vec::new(),
        gemini_api_key: None,
        gemini_model: "gemini-2.0-flash".to_string(),
    }
}

pub fn file_record(owner_id: &str, is_public: bool) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: random_id(),
        filename: "1700000000000-abcd.mp4".to_string(),
        original_name: "clip.mp4".to_string(),
        path: PathBuf::from("/nonexistent/clip.mp4"),
        mimetype: "video/mp4".to_string(),
        size: 10,
        owner: FileOwner {
            id: owner_id.to_string(),
            username: owner_id.to_string(),
            email: format!("{owner_id}@techcorp.com"),
        },
        is_public,
        description: String::new(),
        tags: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    _dir: TempDir,
}

pub async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.upload_dir = dir.path().join("uploads");

    let state = AppState {
        db: Database::open(":memory:").await.unwrap(),
        storage: Storage::new(&config.upload_dir).await.unwrap(),
        events: EventBus::default(),
        assistant: Arc::new(Assistant::new(None)),
        config: Arc::new(config),
    };
    let server = TestServer::new(router(state.clone()).unwrap()).unwrap();
    TestApp {
        server,
        state,
        _dir: dir,
    }
}

/// Registers `name@techcorp.com` and returns the user with a session token.
pub async fn register(app: &TestApp, name: &str) -> (User, String) {
    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({
            "username": name,
            "email": format!("{name}@techcorp.com"),
            "password": "hunter22",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Envelope<AuthPayload> = response.json();
    (body.data.user, body.data.token)
}

pub async fn upload(
    app: &TestApp,
    token: &str,
    name: &str,
    mimetype: &str,
    bytes: &[u8],
    is_public: bool,
) -> FileRecord {
    let form = MultipartForm::new()
        .add_text("isPublic", is_public.to_string())
        .add_part(
            "file",
            Part::bytes(bytes.to_vec()).file_name(name).mime_type(mimetype),
        );
    let response = app
        .server
        .post("/api/files/upload")
        .authorization_bearer(token)
        .multipart(form)
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Envelope<FilePayload> = response.json();
    body.data.file
}
