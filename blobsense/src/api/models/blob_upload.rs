use crate::storage::BlobMetadata;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/blob/upload`, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HandleUploadBody {
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken(GenerateClientTokenPayload),
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted(UploadCompletedPayload),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenPayload {
    pub pathname: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub client_payload: Option<String>,
    #[serde(default)]
    pub multipart: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedPayload {
    pub blob: BlobMetadata,
    #[serde(default)]
    pub token_payload: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HandleUploadResponse {
    #[serde(rename = "blob.generate-client-token")]
    ClientToken {
        #[serde(rename = "clientToken")]
        client_token: String,
    },
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted { response: String },
}
