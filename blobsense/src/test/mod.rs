//! End-to-end tests through the HTTP router, with a fake completion provider and a temporary
//! local blob store.


use crate::storage::BlobMetadata;
use crate::test_utils::TestApp;
use axum::body::Bytes;

/// Upload `content` through `POST /api/analyze?filename=` and return its metadata.
async fn upload(app: &TestApp, filename: &str, content_type: Option<&str>, content: impl Into<Bytes>) -> BlobMetadata {
    let mut request = app
        .server
        .post("/api/analyze")
        .add_query_param("filename", filename)
        .bytes(content.into());
    if let Some(content_type) = content_type {
        request = request.content_type(content_type);
    }

    let response = request.await;
    response.assert_status_ok();
    response.json::<BlobMetadata>()
}
