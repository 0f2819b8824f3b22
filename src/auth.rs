//! Request authentication.
//!
//! Handlers take a [`CurrentUser`] argument to require a valid session. The
//! token is read from `Authorization: Bearer` and, failing that, from the
//! `token` query parameter so media elements can authenticate through a URL.

pub mod session;

use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap, Uri},
};
use serde::Deserialize;
use std::ops::Deref;
use tracing::trace;

use crate::errors::AppError;
use crate::models::User;
use crate::AppState;

#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| query_token(&parts.uri))
            .ok_or_else(|| AppError::unauthorized("Not authorized, no token provided"))?;

        let user_id = session::verify_token(&token, &state.config)?;
        let user = state
            .db
            .find_user(&user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("User not found"))?;
        trace!(user = %user.id, "authenticated request");
        Ok(CurrentUser(user))
    }
}

/// True when `email` belongs to `domain`, ignoring case.
pub fn is_company_email(email: &str, domain: &str) -> bool {
    email
        .rsplit_once('@')
        .is_some_and(|(local, host)| !local.is_empty() && host.eq_ignore_ascii_case(domain))
}
