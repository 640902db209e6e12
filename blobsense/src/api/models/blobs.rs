use serde::Deserialize;

/// Query string of `GET /blobs/{pathname}`.
#[derive(Debug, Default, Deserialize)]
pub struct BlobQuery {
    /// Any value requests `Content-Disposition: attachment`
    pub download: Option<String>,
}
