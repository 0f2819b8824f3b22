//! Help assistant: a fixed keyword table first, a generative model second.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::AppError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_OUTPUT_TOKENS: u32 = 150;

const SYSTEM_PROMPT: &str = "You are a helpful assistant for the company's internal file sharing service.
You help employees with:
- How to use the application features
- File uploads, previews, and management
- Privacy and sharing settings
- Troubleshooting issues

Key information:
- The app previews images, videos, audio files, and PDFs
- Files can be marked Public (visible to all employees) or Private (only for the owner)
- Only employees with a company email address can access the service

Be concise, friendly, and professional. Keep responses under 150 words.";

const UPLOAD_ANSWER: &str = "To upload files, open the File Upload section of the dashboard and click the upload area or drag files onto it. Supported formats: images, videos, audio, and PDFs.";
const PREVIEW_ANSWER: &str = "Previews are available for images (JPG, PNG, GIF), videos (MP4, WebM), audio (MP3, WAV), and PDFs. Other files can be downloaded but not previewed.";
const EDIT_ANSWER: &str = "Open any of your files in the dashboard and click Edit to change its description, tags, and privacy setting.";
const PRIVACY_ANSWER: &str = "Files are either Public (viewable by every employee) or Private (only you). Change this in the file edit panel.";
const ACCESS_ANSWER: &str = "The service is restricted to employees. Only company email addresses can register and sign in.";

/// Ordered: the first keyword contained in the question wins.
const KNOWLEDGE_BASE: &[(&str, &str)] = &[
    ("file upload", UPLOAD_ANSWER),
    ("how to upload", UPLOAD_ANSWER),
    ("file preview", PREVIEW_ANSWER),
    ("preview", PREVIEW_ANSWER),
    ("edit file", EDIT_ANSWER),
    ("edit", EDIT_ANSWER),
    ("public private", PRIVACY_ANSWER),
    ("privacy", PRIVACY_ANSWER),
    ("download", "Open any file and click Download to save it to your device."),
    ("security", ACCESS_ANSWER),
    ("who can access", ACCESS_ANSWER),
    ("company", "This is the company's private file sharing service for employees. All content is company-owned."),
    ("help", "I'm here to help! Ask me about uploads, previews, editing, privacy settings, or how the service works."),
    ("features", "Features: uploading images, videos, audio and PDFs, previews, editing descriptions and privacy, downloads, sharing with the team, live updates, and this assistant."),
];

pub fn knowledge_answer(message: &str) -> Option<&'static str> {
    let message = message.to_lowercase();
    KNOWLEDGE_BASE
        .iter()
        .find(|(keyword, _)| message.contains(keyword))
        .map(|(_, answer)| *answer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Faq,
    Ai,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub category: AnswerSource,
}

#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, question: &str) -> Result<String, AppError>;
}

pub struct Assistant {
    fallback: Option<Arc<dyn Generate>>,
}

impl Assistant {
    pub fn new(fallback: Option<Arc<dyn Generate>>) -> Self {
        Assistant { fallback }
    }

    pub fn from_config(config: &Config) -> Self {
        let fallback = config.gemini_api_key.as_ref().map(|key| {
            Arc::new(GeminiClient::new(key.clone(), config.gemini_model.clone())) as Arc<dyn Generate>
        });
        if fallback.is_none() {
            debug!("no GEMINI_API_KEY configured, assistant answers from the FAQ only");
        }
        Assistant::new(fallback)
    }

    pub async fn answer(&self, message: &str) -> Result<Answer, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::bad_request("Message is required"));
        }
        if let Some(answer) = knowledge_answer(message) {
            return Ok(Answer {
                response: answer.to_string(),
                category: AnswerSource::Faq,
            });
        }
        let fallback = self
            .fallback
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("Assistant is not configured".to_string()))?;
        Ok(Answer {
            response: fallback.generate(message).await?,
            category: AnswerSource::Ai,
        })
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        GeminiClient {
            http: reqwest::Client::new(),
            api_key,
            endpoint: format!("{GEMINI_BASE_URL}/{model}:generateContent"),
        }
    }
}

fn upstream_error(status: StatusCode) -> AppError {
    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "Invalid or expired Gemini API key".to_string(),
        StatusCode::TOO_MANY_REQUESTS => {
            "Gemini API rate limit exceeded. Please try again in a few minutes.".to_string()
        }
        StatusCode::SERVICE_UNAVAILABLE => "Gemini service is temporarily unavailable.".to_string(),
        other => format!("Gemini API error: {other}"),
    };
    AppError::Upstream(message)
}

#[async_trait]
impl Generate for GeminiClient {
    async fn generate(&self, question: &str) -> Result<String, AppError> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": format!("{SYSTEM_PROMPT}\n\nEmployee: {question}\nAssistant:") }]
            }],
            "generationConfig": {
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "temperature": 0.7,
                "topP": 0.9
            }
        });

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gemini request failed");
                AppError::Upstream("Gemini service is unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Gemini returned an error");
            return Err(upstream_error(status));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Gemini returned an unreadable body");
            AppError::Upstream("Gemini service temporarily unavailable. Please try again.".to_string())
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        Ok(text.unwrap_or_else(|| "I'm having trouble understanding that. Could you rephrase?".to_string()))
    }
}
