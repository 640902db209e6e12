use crate::errors::{Error, Result};
use crate::storage::BlobStore;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Retrieves file content for analysis.
///
/// URLs issued by the local store are read straight from it; anything else is downloaded.
#[derive(Clone)]
pub struct FileSource {
    http: Client,
    store: Arc<dyn BlobStore>,
}

impl FileSource {
    pub fn new(http: Client, store: Arc<dyn BlobStore>) -> Self {
        Self { http, store }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    #[instrument(skip(self), err)]
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(pathname) = self.store.pathname_for(url) {
            let (_, content) = self.store.read(&pathname).await.map_err(|e| Error::Resolution {
                message: format!("Failed to read {pathname}: {e}"),
            })?;
            return Ok(content);
        }

        debug!("Downloading external file");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Resolution {
                message: format!("Failed to download file: {e}"),
            })?;

        response.bytes().await.map_err(|e| Error::Resolution {
            message: format!("Failed to read file content: {e}"),
        })
    }
}
