//! Range-aware streaming of stored blobs.
//!
//! [`serve`] resolves a blob through a [`BlobRecords`] source, checks that the
//! requester may read it and answers with either the whole body or a single
//! `206 Partial Content` slice. Sizes always come from the filesystem, never
//! from the stored metadata.

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use futures_util::{StreamExt, TryStreamExt};
use std::{io, io::SeekFrom, path::PathBuf};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};

use crate::errors::{AppError, Result};
use crate::models::FileRecord;
use crate::range::{self, ByteRange};

const CHUNK_CAPACITY: usize = 64 * 1024;

/// Read-only view of a stored file used by the streaming path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRecord {
    pub id: String,
    pub owner_id: String,
    pub storage_path: PathBuf,
    /// Size declared at upload time; may be stale.
    pub size_bytes: u64,
    pub mimetype: String,
    pub is_public: bool,
}

impl BlobRecord {
    pub fn readable_by(&self, user_id: &str) -> bool {
        self.is_public || self.owner_id == user_id
    }
}

impl From<FileRecord> for BlobRecord {
    fn from(file: FileRecord) -> Self {
        BlobRecord {
            id: file.id,
            owner_id: file.owner.id,
            storage_path: file.path,
            size_bytes: file.size,
            mimetype: file.mimetype,
            is_public: file.is_public,
        }
    }
}

#[async_trait]
pub trait BlobRecords: Send + Sync {
    async fn blob_record(&self, id: &str) -> anyhow::Result<Option<BlobRecord>>;
}

/// A record already in hand serves itself.
#[async_trait]
impl BlobRecords for BlobRecord {
    async fn blob_record(&self, id: &str) -> anyhow::Result<Option<BlobRecord>> {
        Ok((self.id == id).then(|| self.clone()))
    }
}

/// Answers a read of `blob_id` on behalf of `requester_id`.
///
/// `range` is the raw `Range` header value, if any. Unparseable or
/// unsatisfiable ranges yield [`AppError::RangeNotSatisfiable`].
pub async fn serve<R>(records: &R, blob_id: &str, requester_id: &str, range: Option<&str>) -> Result<Response>
where
    R: BlobRecords + ?Sized,
{
    let record = records
        .blob_record(blob_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;

    if !record.readable_by(requester_id) {
        return Err(AppError::forbidden("Access denied. This file is private."));
    }

    let file_size = on_disk_size(&record).await?;
    let content_type = HeaderValue::from_str(&record.mimetype)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let Some(range) = range else {
        let file = open(&record).await?;
        let body = stream_body(file.take(file_size), &record.id, file_size);
        return build(StatusCode::OK, content_type, file_size, None, body);
    };

    let slice = range::parse(range, file_size).map_err(|err| {
        debug!(blob = %record.id, %err, header = range, "rejecting range");
        AppError::RangeNotSatisfiable {
            file_size,
            mimetype: record.mimetype.clone(),
        }
    })?;

    let mut file = open(&record).await?;
    file.seek(SeekFrom::Start(slice.start))
        .await
        .with_context(|| format!("seek to {} in blob {}", slice.start, record.id))?;
    let body = stream_body(file.take(slice.len()), &record.id, slice.len());
    build(StatusCode::PARTIAL_CONTENT, content_type, file_size, Some(slice), body)
}

async fn on_disk_size(record: &BlobRecord) -> Result<u64> {
    match fs::metadata(&record.storage_path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(missing_on_disk(record)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(missing_on_disk(record)),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("stat blob {}", record.id))
            .into()),
    }
}

async fn open(record: &BlobRecord) -> Result<File> {
    match File::open(&record.storage_path).await {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(missing_on_disk(record)),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("open blob {}", record.id))
            .into()),
    }
}

fn missing_on_disk(record: &BlobRecord) -> AppError {
    warn!(blob = %record.id, path = %record.storage_path.display(), "blob record has no bytes on disk");
    AppError::not_found("File not found on server")
}

/// Wraps `reader` in a body stream that owns the file handle.
///
/// The handle is closed when the body finishes, fails, or is dropped after a
/// client disconnect; the guard logs which of those happened.
fn stream_body<T>(reader: T, blob_id: &str, expected: u64) -> Body
where
    T: tokio::io::AsyncRead + Send + 'static,
{
    let blob = blob_id.to_string();
    let mut sent = scopeguard::guard(0u64, move |sent| {
        if sent < expected {
            debug!(%blob, sent, expected, "stream closed before completion");
        } else {
            trace!(%blob, sent, "stream complete");
        }
    });

    let failed_blob = blob_id.to_string();
    let stream = ReaderStream::with_capacity(reader, CHUNK_CAPACITY)
        .inspect_err(move |err| warn!(blob = %failed_blob, %err, "read failed mid-stream"))
        .map(move |chunk| {
            if let Ok(bytes) = &chunk {
                *sent += bytes.len() as u64;
            }
            chunk
        });
    Body::from_stream(stream)
}

fn build(
    status: StatusCode,
    content_type: HeaderValue,
    file_size: u64,
    slice: Option<ByteRange>,
    body: Body,
) -> Result<Response> {
    let length = slice.map_or(file_size, |s| s.len());
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(slice) = slice {
        builder = builder.header(header::CONTENT_RANGE, slice.content_range(file_size));
    }
    builder
        .body(body)
        .context("build streaming response")
        .map_err(AppError::from)
}
