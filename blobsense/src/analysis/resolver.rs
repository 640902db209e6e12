use super::source::FileSource;
use crate::errors::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use tracing::{debug, instrument, warn};
use url::Url;

/// Content type assumed when nothing better can be determined.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file reference resolved to a downloadable location and a declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    pub source_url: String,
    pub resolved_download_url: String,
    pub content_type: String,
}

/// Determines the download URL and content type of a file reference.
#[derive(Clone)]
pub struct ContentTypeResolver {
    source: FileSource,
}

fn header_content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn resolution_error(message: impl Into<String>) -> Error {
    Error::Resolution { message: message.into() }
}

impl ContentTypeResolver {
    pub fn new(source: FileSource) -> Self {
        Self { source }
    }

    #[instrument(skip(self), err)]
    pub async fn resolve(&self, reference: &str) -> Result<RemoteFileRef> {
        let store = self.source.store();

        if let Some(pathname) = store.pathname_for(reference) {
            let metadata = store
                .head(&pathname)
                .await
                .map_err(|e| resolution_error(format!("Failed to resolve blob metadata: {e}")))?;
            debug!(content_type = %metadata.content_type, "Resolved stored blob");
            return Ok(RemoteFileRef {
                source_url: reference.to_string(),
                resolved_download_url: metadata.download_url,
                content_type: metadata.content_type,
            });
        }

        let url = Url::parse(reference).map_err(|e| resolution_error(format!("Invalid file URL {reference:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(resolution_error(format!("Unsupported URL scheme {:?}", url.scheme())));
        }

        let content_type = match self.head_content_type(&url).await {
            Some(content_type) => content_type,
            None => self.fetch_content_type(&url).await?,
        };

        debug!(content_type = %content_type, "Resolved external file");
        Ok(RemoteFileRef {
            source_url: reference.to_string(),
            resolved_download_url: reference.to_string(),
            content_type,
        })
    }

    /// Metadata-only HEAD request. `None` means the caller should fall back to a GET.
    async fn head_content_type(&self, url: &Url) -> Option<String> {
        match self.source.http().head(url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                let content_type = header_content_type(&response);
                if content_type.is_none() {
                    debug!("HEAD response carried no content type");
                }
                content_type
            }
            Ok(response) => {
                debug!(status = %response.status(), "HEAD request rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, "HEAD request failed");
                None
            }
        }
    }

    /// Full GET fallback. Only the headers are inspected; the body is dropped unread.
    async fn fetch_content_type(&self, url: &Url) -> Result<String> {
        let response = self
            .source
            .http()
            .get(url.clone())
            .send()
            .await
            .map_err(|e| resolution_error(format!("Failed to fetch file: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(resolution_error(format!("Failed to fetch file: {status}")));
        }

        Ok(header_content_type(&response).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobStore, BlobUrls, InMemoryBlobStore, PutBlobRequest};
    use bytes::Bytes;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> (ContentTypeResolver, Arc<InMemoryBlobStore>) {
        crate::test_utils::install_crypto_provider();
        let urls = BlobUrls::new(&Url::parse("http://localhost:3000").unwrap()).unwrap();
        let store = Arc::new(InMemoryBlobStore::new(urls));
        let source = FileSource::new(reqwest::Client::new(), store.clone());
        (ContentTypeResolver::new(source), store)
    }

    #[tokio::test]
    async fn stored_blobs_resolve_through_metadata() {
        let (resolver, store) = resolver();
        let stored = store
            .put(PutBlobRequest {
                pathname: "cat.png".to_string(),
                content_type: "image/png".to_string(),
                content: Bytes::from_static(b"png"),
                add_random_suffix: false,
            })
            .await
            .unwrap();

        let resolved = resolver.resolve(&stored.url).await.unwrap();
        assert_eq!(resolved.content_type, "image/png");
        assert_eq!(resolved.resolved_download_url, stored.download_url);
        assert_eq!(resolved.source_url, stored.url);
    }

    #[tokio::test]
    async fn missing_stored_blob_is_a_resolution_error() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("http://localhost:3000/blobs/nope.png").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn external_head_content_type_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/doc.txt"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/plain"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;

        let (resolver, _) = resolver();
        let url = format!("{}/doc.txt", server.uri());
        let resolved = resolver.resolve(&url).await.unwrap();

        assert_eq!(resolved.content_type, "text/plain");
        assert_eq!(resolved.resolved_download_url, url);
    }

    #[tokio::test]
    async fn failed_head_falls_back_to_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/photo"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/photo"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg").set_body_bytes(vec![0xFF, 0xD8]))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver();
        let resolved = resolver.resolve(&format!("{}/photo", server.uri())).await.unwrap();
        assert_eq!(resolved.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn failed_get_fallback_is_a_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let (resolver, _) = resolver();
        let err = resolver.resolve(&format!("{}/missing", server.uri())).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { message } if message.contains("404")));
    }

    #[tokio::test]
    async fn non_http_references_are_rejected() {
        let (resolver, _) = resolver();
        assert!(matches!(resolver.resolve("not a url").await, Err(Error::Resolution { .. })));
        assert!(matches!(resolver.resolve("file:///etc/passwd").await, Err(Error::Resolution { .. })));
    }
}
