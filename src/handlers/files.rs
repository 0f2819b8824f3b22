use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::crypto::random_id;
use crate::errors::{AppError, Result};
use crate::events::FileEvent;
use crate::models::{
    split_tags, Envelope, FileFilter, FileList, FileOwner, FilePayload, FileRecord, FileUpdate,
    StatusMessage, MAX_DESCRIPTION_CHARS,
};
use crate::storage::{BlobWriter, StoredBlob};
use crate::streaming::{serve, BlobRecord};
use crate::AppState;

const ALLOWED_MIME_PREFIXES: &[&str] = &["image/", "video/", "audio/"];
const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf"];

fn is_allowed_mimetype(mimetype: &str) -> bool {
    let mimetype = mimetype.to_ascii_lowercase();
    ALLOWED_MIME_PREFIXES
        .iter()
        .any(|prefix| mimetype.starts_with(prefix))
        || ALLOWED_MIME_TYPES.contains(&mimetype.as_str())
}

fn check_description(description: &str) -> Result<()> {
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(AppError::bad_request(format!(
            "Description cannot exceed {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    Ok(())
}

struct ReceivedFile {
    blob: StoredBlob,
    original_name: String,
    mimetype: String,
}

#[derive(Default)]
struct UploadForm {
    file: Option<ReceivedFile>,
    is_public: bool,
    description: String,
    tags: Vec<String>,
}

async fn copy_field(field: &mut Field<'_>, writer: &mut BlobWriter, limit: u64) -> Result<()> {
    while let Some(chunk) = field.chunk().await? {
        if writer.size() + chunk.len() as u64 > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "File exceeds the maximum upload size of {limit} bytes"
            )));
        }
        writer.update(&chunk).await?;
    }
    Ok(())
}

async fn receive_file(state: &AppState, mut field: Field<'_>) -> Result<ReceivedFile> {
    let original_name = field
        .file_name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::bad_request("File field contains no filename"))?;
    let mimetype = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    if !is_allowed_mimetype(&mimetype) {
        return Err(AppError::bad_request(format!(
            "File type {mimetype} is not allowed. Upload images, videos, audio or PDFs."
        )));
    }

    let mut writer = state.storage.writer(&original_name).await?;
    if let Err(err) = copy_field(&mut field, &mut writer, state.config.max_upload_bytes as u64).await {
        writer.abort().await;
        return Err(err);
    }
    Ok(ReceivedFile {
        blob: writer.finalize().await?,
        original_name,
        mimetype,
    })
}

async fn read_form(state: &AppState, multipart: &mut Multipart, form: &mut UploadForm) -> Result<()> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if form.file.is_some() {
                    return Err(AppError::bad_request("Only one file can be uploaded per request"));
                }
                form.file = Some(receive_file(state, field).await?);
            }
            "isPublic" => form.is_public = field.text().await?.trim() == "true",
            "description" => form.description = field.text().await?,
            "tags" => form.tags.extend(split_tags(&field.text().await?)),
            _ => {}
        }
    }
    Ok(())
}

async fn persist(state: &AppState, user: &CurrentUser, form: &UploadForm) -> Result<FileRecord> {
    let file = form
        .file
        .as_ref()
        .ok_or_else(|| AppError::bad_request("No file uploaded"))?;
    check_description(&form.description)?;

    let now = Utc::now();
    let record = FileRecord {
        id: random_id(),
        filename: file.blob.filename.clone(),
        original_name: file.original_name.clone(),
        path: file.blob.path.clone(),
        mimetype: file.mimetype.clone(),
        size: file.blob.size,
        owner: FileOwner {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        },
        is_public: form.is_public,
        description: form.description.clone(),
        tags: form.tags.clone(),
        created_at: now,
        updated_at: now,
    };
    state.db.insert_file(&record).await?;
    Ok(record)
}

pub async fn upload_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Envelope<FilePayload>>)> {
    let mut form = UploadForm::default();
    let result = match read_form(&state, &mut multipart, &mut form).await {
        Ok(()) => persist(&state, &user, &form).await,
        Err(err) => Err(err),
    };

    let record = match result {
        Ok(record) => record,
        Err(err) => {
            if let Some(file) = form.file.take() {
                if let Err(cleanup) = state.storage.remove(&file.blob.path).await {
                    warn!(error = %cleanup, "failed to remove rejected upload");
                }
            }
            return Err(err);
        }
    };

    info!(file = %record.id, user = %user.id, size = record.size, "file uploaded");
    state.events.publish(FileEvent::Uploaded(record.clone()));
    Ok((
        StatusCode::CREATED,
        Json(Envelope::with_message(
            "File uploaded successfully",
            FilePayload { file: record },
        )),
    ))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    filter: FileFilter,
}

pub async fn list_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Envelope<FileList>>> {
    let files = state.db.list_files(&user.id, query.filter).await?;
    let count = files.len();
    Ok(Json(Envelope::data(FileList { files, count })))
}

async fn find_file(state: &AppState, id: &str) -> Result<FileRecord> {
    state
        .db
        .find_file(id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))
}

pub async fn get_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Envelope<FilePayload>>> {
    let file = find_file(&state, &id).await?;
    if !file.is_visible_to(&user.id) {
        return Err(AppError::forbidden("Access denied. This file is private."));
    }
    Ok(Json(Envelope::data(FilePayload { file })))
}

pub async fn update_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(update): Json<FileUpdate>,
) -> Result<Json<Envelope<FilePayload>>> {
    let mut file = find_file(&state, &id).await?;
    if !file.is_owned_by(&user.id) {
        return Err(AppError::forbidden(
            "Access denied. You can only update your own files.",
        ));
    }

    let was_public = file.is_public;
    if let Some(description) = update.description {
        check_description(&description)?;
        file.description = description;
    }
    if let Some(is_public) = update.is_public {
        file.is_public = is_public;
    }
    if let Some(tags) = update.tags {
        file.tags = tags.into_tags();
    }
    file.updated_at = Utc::now();
    state.db.update_file(&file).await?;

    info!(file = %file.id, user = %user.id, "file updated");
    state.events.publish(FileEvent::Updated {
        file: file.clone(),
        was_public,
    });
    Ok(Json(Envelope::with_message(
        "File updated successfully",
        FilePayload { file },
    )))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<StatusMessage>> {
    let file = find_file(&state, &id).await?;
    if !file.is_owned_by(&user.id) {
        return Err(AppError::forbidden(
            "Access denied. You can only delete your own files.",
        ));
    }

    state.storage.remove(&file.path).await?;
    state.db.delete_file(&file.id).await?;

    info!(file = %file.id, user = %user.id, "file deleted");
    state.events.publish(FileEvent::Deleted { file_id: file.id });
    Ok(Json(StatusMessage::ok("File deleted successfully")))
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    // A non-UTF-8 value is passed on as empty so it is rejected as unsatisfiable.
    headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default())
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form.
fn content_disposition(original_name: &str) -> HeaderValue {
    let fallback: String = original_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let encoded: String = original_name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect();
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn download_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let file = find_file(&state, &id).await?;
    let disposition = content_disposition(&file.original_name);
    let mut response = serve(&BlobRecord::from(file), &id, &user.id, range_header(&headers)).await?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub async fn stream_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    serve(&state.db, &id, &user.id, range_header(&headers)).await
}
