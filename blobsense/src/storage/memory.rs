use super::{BlobMetadata, BlobStore, BlobUrls, PutBlobRequest, Result, StorageError, normalize_pathname, target_pathname};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;

/// Process-local storage backend. Contents are lost when the process exits.
pub struct InMemoryBlobStore {
    objects: DashMap<String, (BlobMetadata, Bytes)>,
    urls: BlobUrls,
}

impl InMemoryBlobStore {
    pub fn new(urls: BlobUrls) -> Self {
        Self {
            objects: DashMap::new(),
            urls,
        }
    }

    pub fn contains(&self, pathname: &str) -> bool {
        self.objects.contains_key(pathname)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn pathname_for(&self, url: &str) -> Option<String> {
        self.urls.pathname_for(url)
    }

    async fn put(&self, request: PutBlobRequest) -> Result<BlobMetadata> {
        let pathname = target_pathname(&request)?;
        let metadata = BlobMetadata::new(
            &self.urls,
            &pathname,
            request.content_type,
            request.content.len() as u64,
            Utc::now(),
        );
        self.objects.insert(pathname, (metadata.clone(), request.content));
        Ok(metadata)
    }

    async fn head(&self, pathname: &str) -> Result<BlobMetadata> {
        self.read(pathname).await.map(|(metadata, _)| metadata)
    }

    async fn read(&self, pathname: &str) -> Result<(BlobMetadata, Bytes)> {
        let pathname = normalize_pathname(pathname)?;
        self.objects
            .get(&pathname)
            .map(|entry| entry.value().clone())
            .ok_or(StorageError::NotFound { pathname })
    }

    async fn delete(&self, pathname: &str) -> Result<()> {
        let pathname = normalize_pathname(pathname)?;
        self.objects.remove(&pathname);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn suffixed_uploads_do_not_collide() {
        let store = InMemoryBlobStore::new(BlobUrls::new(&Url::parse("http://localhost:3000").unwrap()).unwrap());
        let request = PutBlobRequest {
            pathname: "cat.png".to_string(),
            content_type: "image/png".to_string(),
            content: Bytes::from_static(b"\x89PNG"),
            add_random_suffix: true,
        };

        let first = store.put(request.clone()).await.unwrap();
        let second = store.put(request).await.unwrap();

        assert_ne!(first.pathname, second.pathname);
        assert_eq!(store.len(), 2);

        store.delete(&first.pathname).await.unwrap();
        assert!(!store.contains(&first.pathname));
        assert!(store.contains(&second.pathname));
    }
}
