//! Object storage for uploaded files.
//!
//! Uploaded files are addressed by a *pathname* (e.g. `reports/q3-1f2e3d4c5b6a7980.txt`) and are
//! publicly reachable at `{public_url}/blobs/{pathname}`. The [`BlobStore`] trait is the seam the
//! analysis pipeline consumes: it stores bytes, resolves metadata for a URL it issued, reads the
//! bytes back, and deletes objects once they have been analysed.
//!
//! Two backends are provided:
//!
//! - [`LocalBlobStore`]: files and JSON metadata side by side under a base directory
//! - [`InMemoryBlobStore`]: a process-local map, useful for development and tests

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::InMemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Length of the random suffix appended to uploaded pathnames.
const RANDOM_SUFFIX_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob {pathname} not found")]
    NotFound { pathname: String },

    #[error("Invalid pathname {pathname:?}: {reason}")]
    InvalidPathname { pathname: String, reason: &'static str },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt blob metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata of a stored object, as returned to uploaders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub url: String,
    pub download_url: String,
    pub pathname: String,
    pub content_type: String,
    pub content_disposition: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl BlobMetadata {
    fn new(urls: &BlobUrls, pathname: &str, content_type: String, size: u64, uploaded_at: DateTime<Utc>) -> Self {
        let file_name = pathname.rsplit('/').next().unwrap_or(pathname);
        Self {
            url: urls.url_for(pathname),
            download_url: urls.download_url_for(pathname),
            pathname: pathname.to_string(),
            content_type,
            content_disposition: format!("inline; filename=\"{file_name}\""),
            size,
            uploaded_at,
        }
    }

    /// Last segment of the pathname.
    pub fn file_name(&self) -> &str {
        self.pathname.rsplit('/').next().unwrap_or(&self.pathname)
    }
}

/// Request to store file content
#[derive(Debug, Clone)]
pub struct PutBlobRequest {
    pub pathname: String,
    pub content_type: String,
    pub content: Bytes,
    /// Append a random suffix so repeated uploads of the same name never collide
    pub add_random_suffix: bool,
}

/// Trait for object storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the pathname addressed by `url` if the URL was issued by this store.
    fn pathname_for(&self, url: &str) -> Option<String>;

    /// Whether `url` points into this store.
    fn owns(&self, url: &str) -> bool {
        self.pathname_for(url).is_some()
    }

    /// Store file content and return its metadata
    async fn put(&self, request: PutBlobRequest) -> Result<BlobMetadata>;

    /// Resolve metadata without reading the content
    async fn head(&self, pathname: &str) -> Result<BlobMetadata>;

    /// Retrieve metadata and full content
    async fn read(&self, pathname: &str) -> Result<(BlobMetadata, Bytes)>;

    /// Delete an object. Deleting an object that does not exist succeeds.
    async fn delete(&self, pathname: &str) -> Result<()>;
}

/// Builds and parses the public URLs of stored objects.
#[derive(Debug, Clone)]
pub struct BlobUrls {
    prefix: Url,
}

impl BlobUrls {
    pub fn new(public_url: &Url) -> std::result::Result<Self, url::ParseError> {
        let mut base = public_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            prefix: base.join("blobs/")?,
        })
    }

    pub fn url_for(&self, pathname: &str) -> String {
        format!("{}{}", self.prefix, pathname)
    }

    pub fn download_url_for(&self, pathname: &str) -> String {
        format!("{}?download=1", self.url_for(pathname))
    }

    pub fn pathname_for(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(self.prefix.as_str())?;
        let end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
        let pathname = &rest[..end];
        (!pathname.is_empty()).then(|| pathname.to_string())
    }
}

/// Validate a caller-supplied pathname and reduce it to URL-safe characters.
///
/// Leading slashes are dropped; empty, `.` and `..` segments are rejected; any character outside
/// `[A-Za-z0-9._-]` becomes `-`.
pub fn normalize_pathname(raw: &str) -> Result<String> {
    let invalid = |reason| StorageError::InvalidPathname {
        pathname: raw.to_string(),
        reason,
    };

    let trimmed = raw.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("pathname is empty"));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" => return Err(invalid("contains an empty segment")),
            "." | ".." => return Err(invalid("contains a relative segment")),
            _ => segments.push(
                segment
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '-' })
                    .collect::<String>(),
            ),
        }
    }

    Ok(segments.join("/"))
}

/// `photos/cat.png` -> `photos/cat-<suffix>.png`
fn with_random_suffix(pathname: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(RANDOM_SUFFIX_LEN).collect();

    let (dir, file) = match pathname.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, pathname),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{file}-{suffix}"),
    };

    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

/// Resolve the final pathname for a put request.
fn target_pathname(request: &PutBlobRequest) -> Result<String> {
    let pathname = normalize_pathname(&request.pathname)?;
    Ok(if request.add_random_suffix {
        with_random_suffix(&pathname)
    } else {
        pathname
    })
}
