pub mod auth;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod database;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod range;
pub mod storage;
pub mod streaming;

#[cfg(test)]
mod test_utils;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::chat::Assistant;
use crate::config::Config;
use crate::database::Database;
use crate::events::{events_handler, EventBus};
use crate::handlers::{auth as auth_routes, chat as chat_routes, files};
use crate::storage::Storage;

/// Room for the non-file multipart fields on top of the file itself.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Storage,
    pub events: EventBus,
    pub assistant: Arc<Assistant>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        Ok(AppState {
            db: Database::open(&config.database_path).await?,
            storage: Storage::new(&config.upload_dir).await?,
            events: EventBus::default(),
            assistant: Arc::new(Assistant::from_config(&config)),
            config: Arc::new(config),
        })
    }
}

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid allowed origin {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::RANGE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_LENGTH,
            header::CONTENT_DISPOSITION,
        ]))
}

pub fn router(state: AppState) -> Result<Router> {
    let body_limit = state.config.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    let cors = cors_layer(&state.config)?;

    let api = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/auth/register", post(auth_routes::register_handler))
        .route("/auth/login", post(auth_routes::login_handler))
        .route("/auth/me", get(auth_routes::me_handler))
        .route("/files", get(files::list_handler))
        .route("/files/upload", post(files::upload_handler))
        .route(
            "/files/{id}",
            get(files::get_handler)
                .put(files::update_handler)
                .delete(files::delete_handler),
        )
        .route("/files/download/{id}", get(files::download_handler))
        .route("/files/stream/{id}", get(files::stream_handler))
        .route("/events", get(events_handler))
        .route("/chat", post(chat_routes::chat_handler));

    Ok(Router::new()
        .nest("/api", api)
        .fallback(handlers::fallback_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
