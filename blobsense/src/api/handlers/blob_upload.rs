use crate::AppState;
use crate::api::models::blob_upload::{GenerateClientTokenPayload, HandleUploadBody, HandleUploadResponse};
use crate::storage::{BlobMetadata, normalize_pathname};
use crate::upload_token::{self, ClientTokenClaims};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

/// Error body of this endpoint. Client upload libraries read `error`, not `message`.
fn upload_error(message: impl Into<String>) -> Response {
    let message = message.into();
    warn!(error = %message, "Upload authorization request rejected");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// `POST /api/blob/upload`
///
/// Issues client upload tokens and receives upload-completed notifications.
pub async fn handle_upload(
    State(state): State<AppState>,
    body: Result<Json<HandleUploadBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return upload_error(rejection.body_text()),
    };

    match body {
        HandleUploadBody::GenerateClientToken(payload) => match generate_client_token(&state, payload) {
            Ok(client_token) => Json(HandleUploadResponse::ClientToken { client_token }).into_response(),
            Err(message) => upload_error(message),
        },
        HandleUploadBody::UploadCompleted(payload) => {
            upload_completed(&payload.blob, payload.token_payload.as_deref());
            Json(HandleUploadResponse::UploadCompleted {
                response: "ok".to_string(),
            })
            .into_response()
        }
    }
}

#[instrument(skip_all, fields(pathname = %payload.pathname))]
fn generate_client_token(state: &AppState, payload: GenerateClientTokenPayload) -> Result<String, String> {
    let secret = state
        .config
        .storage
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| "Storage credential is not configured".to_string())?;

    let pathname = normalize_pathname(&payload.pathname).map_err(|e| e.to_string())?;
    let ttl = chrono::Duration::from_std(state.config.storage.client_token_ttl).map_err(|e| e.to_string())?;

    let claims = ClientTokenClaims {
        pathname,
        allowed_content_types: state.config.upload.allowed_content_types.clone(),
        valid_until: (Utc::now() + ttl).timestamp_millis(),
        token_payload: Some("{}".to_string()),
        callback_url: payload.callback_url,
    };

    let token = upload_token::issue(&claims, secret).map_err(|e| e.to_string())?;
    info!(valid_until = claims.valid_until, "Issued client upload token");
    Ok(token)
}

/// Hook run once a client upload has been stored.
pub(crate) fn upload_completed(blob: &BlobMetadata, token_payload: Option<&str>) {
    info!(
        url = %blob.url,
        pathname = %blob.pathname,
        content_type = %blob.content_type,
        size = blob.size,
        token_payload = token_payload.unwrap_or_default(),
        "Blob upload completed"
    );
}
