use super::{BlobMetadata, BlobStore, BlobUrls, PutBlobRequest, Result, StorageError, normalize_pathname, target_pathname};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const OBJECTS_DIR: &str = "objects";
const METADATA_DIR: &str = "metadata";

/// Local filesystem storage backend.
///
/// Content lives under `{base_path}/objects/{pathname}` and metadata under
/// `{base_path}/metadata/{pathname}.json`, so user-chosen names never collide with metadata files.
pub struct LocalBlobStore {
    base_path: PathBuf,
    urls: BlobUrls,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadata {
    content_type: String,
    size: u64,
    uploaded_at: DateTime<Utc>,
}

impl LocalBlobStore {
    pub fn new(base_path: PathBuf, urls: BlobUrls) -> Self {
        Self { base_path, urls }
    }

    fn object_path(&self, pathname: &str) -> PathBuf {
        self.base_path.join(OBJECTS_DIR).join(pathname)
    }

    fn metadata_path(&self, pathname: &str) -> PathBuf {
        self.base_path.join(METADATA_DIR).join(format!("{pathname}.json"))
    }

    async fn load_metadata(&self, pathname: &str) -> Result<BlobMetadata> {
        let raw = fs::read(self.metadata_path(pathname)).await.map_err(|e| not_found_or(e, pathname))?;
        let stored: StoredMetadata = serde_json::from_slice(&raw)?;
        Ok(BlobMetadata::new(
            &self.urls,
            pathname,
            stored.content_type,
            stored.size,
            stored.uploaded_at,
        ))
    }
}

fn not_found_or(error: std::io::Error, pathname: &str) -> StorageError {
    if error.kind() == ErrorKind::NotFound {
        StorageError::NotFound {
            pathname: pathname.to_string(),
        }
    } else {
        StorageError::Io(error)
    }
}

async fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn pathname_for(&self, url: &str) -> Option<String> {
        self.urls.pathname_for(url)
    }

    async fn put(&self, request: PutBlobRequest) -> Result<BlobMetadata> {
        let pathname = target_pathname(&request)?;
        let stored = StoredMetadata {
            content_type: request.content_type,
            size: request.content.len() as u64,
            uploaded_at: Utc::now(),
        };

        write_file(&self.object_path(&pathname), &request.content).await?;
        write_file(&self.metadata_path(&pathname), &serde_json::to_vec(&stored)?).await?;

        tracing::debug!(pathname = %pathname, size = stored.size, "Stored blob on local filesystem");

        Ok(BlobMetadata::new(
            &self.urls,
            &pathname,
            stored.content_type,
            stored.size,
            stored.uploaded_at,
        ))
    }

    async fn head(&self, pathname: &str) -> Result<BlobMetadata> {
        let pathname = normalize_pathname(pathname)?;
        self.load_metadata(&pathname).await
    }

    async fn read(&self, pathname: &str) -> Result<(BlobMetadata, Bytes)> {
        let pathname = normalize_pathname(pathname)?;
        let metadata = self.load_metadata(&pathname).await?;
        let content = fs::read(self.object_path(&pathname))
            .await
            .map_err(|e| not_found_or(e, &pathname))?;
        Ok((metadata, Bytes::from(content)))
    }

    async fn delete(&self, pathname: &str) -> Result<()> {
        let pathname = normalize_pathname(pathname)?;
        remove_if_exists(&self.object_path(&pathname)).await?;
        remove_if_exists(&self.metadata_path(&pathname)).await?;
        Ok(())
    }
}
