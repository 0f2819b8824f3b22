use axum::{extract::State, Json};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::chat::Answer;
use crate::errors::Result;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    message: String,
}

pub async fn chat_handler(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Answer>> {
    let answer = state.assistant.answer(&request.message).await?;
    Ok(Json(answer))
}
