use anyhow::{Context, Result};
use chrono::Utc;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

use crate::crypto::random_hex;

const MAX_EXTENSION_LEN: usize = 10;

/// Flat directory holding uploaded blobs.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug)]
pub struct StoredBlob {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

impl Storage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create upload directory {}", root.display()))?;
        Ok(Storage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn writer(&self, original_name: &str) -> Result<BlobWriter> {
        let filename = stored_filename(original_name);
        let path = self.root.join(&filename);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("create blob {}", path.display()))?;
        Ok(BlobWriter {
            file,
            filename,
            path,
            size: 0,
        })
    }

    /// Removes a blob; one that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "blob already removed");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("remove blob {}", path.display())),
        }
    }
}

/// Appends an upload to disk chunk by chunk as it arrives.
pub struct BlobWriter {
    file: File,
    filename: String,
    path: PathBuf,
    size: u64,
}

impl BlobWriter {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flushes to disk; a blob that cannot be flushed is removed.
    pub async fn finalize(mut self) -> Result<StoredBlob> {
        if let Err(err) = self.sync().await {
            self.abort().await;
            return Err(err);
        }
        Ok(StoredBlob {
            filename: self.filename,
            path: self.path,
            size: self.size,
        })
    }

    async fn sync(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    /// Drops the partial file.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(err) = fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), %err, "failed to remove partial upload");
        }
    }
}

/// `<unix millis>-<random hex><.ext>`, keeping only a short alphanumeric extension.
fn stored_filename(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}-{}{}", Utc::now().timestamp_millis(), random_hex(8), extension)
}
