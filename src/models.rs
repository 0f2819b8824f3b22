use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub department: String,
    pub job_title: String,
    pub created_at: DateTime<Utc>,
}

/// User row including the stored credential; never serialized.
#[derive(Clone, Debug)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileOwner {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub mimetype: String,
    pub size: u64,
    pub owner: FileOwner,
    pub is_public: bool,
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner.id == user_id
    }

    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.is_public || self.is_owned_by(user_id)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum FileFilter {
    #[serde(rename = "my-files")]
    Mine,
    #[serde(rename = "public")]
    Public,
    #[default]
    #[serde(other)]
    Visible,
}

/// Tags arrive either as a JSON list or as a comma separated string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    pub fn into_tags(self) -> Vec<String> {
        match self {
            TagsInput::List(list) => normalize_tags(list.iter().map(String::as_str)),
            TagsInput::Csv(csv) => split_tags(&csv),
        }
    }
}

pub fn split_tags(csv: &str) -> Vec<String> {
    normalize_tags(csv.split(','))
}

fn normalize_tags<'a>(tags: impl Iterator<Item = &'a str>) -> Vec<String> {
    tags.map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdate {
    pub is_public: Option<bool>,
    pub description: Option<String>,
    pub tags: Option<TagsInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserPayload {
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilePayload {
    pub file: FileRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileRecord>,
    pub count: usize,
}

/// Body of responses that carry only a confirmation.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub success: bool,
    pub message: String,
}

impl StatusMessage {
    pub fn ok(message: &str) -> Self {
        StatusMessage {
            success: true,
            message: message.to_string(),
        }
    }
}

/// Success envelope shared by the JSON endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Envelope {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(message: &str, data: T) -> Self {
        Envelope {
            success: true,
            message: Some(message.to_string()),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_accept_list_or_csv() {
        let csv: TagsInput = serde_json::from_str(r#"" q3, finance ,,""#).unwrap();
        assert_eq!(csv.into_tags(), vec!["q3", "finance"]);
        let list: TagsInput = serde_json::from_str(r#"["a", " b ", ""]"#).unwrap();
        assert_eq!(list.into_tags(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_filter_means_visible() {
        let filter: FileFilter = serde_json::from_str(r#""everything""#).unwrap();
        assert_eq!(filter, FileFilter::Visible);
        let filter: FileFilter = serde_json::from_str(r#""my-files""#).unwrap();
        assert_eq!(filter, FileFilter::Mine);
    }
}
