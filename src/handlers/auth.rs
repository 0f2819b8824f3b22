use anyhow::Context;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tokio::task;
use tracing::info;

use crate::auth::{is_company_email, session, CurrentUser};
use crate::crypto::{hash_password, random_id, verify_password};
use crate::errors::{AppError, Result};
use crate::models::{AuthPayload, Envelope, LoginRequest, RegisterRequest, User, UserPayload};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 6;

pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Envelope<AuthPayload>>)> {
    let username = request.username.trim().to_string();
    let email = request.email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(AppError::bad_request("Please provide all required fields"));
    }

    let domain = &state.config.company_domain;
    if !is_company_email(&email, domain) {
        return Err(AppError::forbidden(format!(
            "Only company email addresses (@{domain}) are allowed to register"
        )));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let user = User {
        id: random_id(),
        username,
        email,
        department: request.department.unwrap_or_default().trim().to_string(),
        job_title: request.job_title.unwrap_or_default().trim().to_string(),
        created_at: Utc::now(),
    };
    let password = request.password;
    let password_hash = task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task")??;

    if !state.db.insert_user(&user, &password_hash).await? {
        return Err(AppError::bad_request(
            "User already exists with this email or username",
        ));
    }

    let token = session::create_token(&user.id, &state.config)?;
    info!(user = %user.id, "employee registered");
    Ok((
        StatusCode::CREATED,
        Json(Envelope::with_message(
            "Employee registered successfully",
            AuthPayload { user, token },
        )),
    ))
}

pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Envelope<AuthPayload>>> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || request.password.is_empty() {
        return Err(AppError::bad_request("Please provide email and password"));
    }

    let domain = &state.config.company_domain;
    if !is_company_email(&email, domain) {
        return Err(AppError::forbidden(format!("Only {domain} employees can log in")));
    }

    let credentials = state
        .db
        .find_credentials(&email)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid credentials"))?;

    let password = request.password;
    let stored = credentials.password_hash;
    let matches = task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .context("password verification task")??;
    if !matches {
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    let user = credentials.user;
    let token = session::create_token(&user.id, &state.config)?;
    info!(user = %user.id, "employee logged in");
    Ok(Json(Envelope::with_message(
        "Login successful",
        AuthPayload { user, token },
    )))
}

pub async fn me_handler(user: CurrentUser) -> Json<Envelope<UserPayload>> {
    Json(Envelope::data(UserPayload { user: user.0 }))
}
