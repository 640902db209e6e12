use crate::AppState;
use crate::api::handlers::analyze::body_or_error;
use crate::api::handlers::blob_upload::upload_completed;
use crate::api::models::blobs::BlobQuery;
use crate::errors::{Error, Result};
use crate::storage::{BlobMetadata, PutBlobRequest, normalize_pathname};
use crate::upload_token::{self, ClientTokenClaims};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State, rejection::BytesRejection},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{info, instrument};

fn forbidden(message: impl Into<String>) -> Error {
    Error::Forbidden {
        message: message.into(),
    }
}

/// Verify the bearer token of a client upload against the target pathname.
fn authorize(state: &AppState, headers: &HeaderMap, pathname: &str) -> Result<ClientTokenClaims> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| forbidden("Missing client upload token"))?;

    let secret = state
        .config
        .storage
        .token
        .as_deref()
        .ok_or_else(|| forbidden("Client uploads are not enabled"))?;

    let claims = upload_token::verify(token, secret, Utc::now()).map_err(|e| forbidden(e.to_string()))?;

    if claims.pathname != pathname {
        return Err(forbidden(format!("Client token does not authorize {pathname}")));
    }

    Ok(claims)
}

/// `PUT /blobs/{pathname}`
///
/// Stores a file uploaded directly by a client holding a token from `POST /api/blob/upload`.
#[instrument(skip(state, headers, body), err)]
pub async fn client_upload(
    State(state): State<AppState>,
    Path(pathname): Path<String>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<BlobMetadata>> {
    let pathname = normalize_pathname(&pathname)?;
    let claims = authorize(&state, &headers, &pathname)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "Content-Type header is required".to_string(),
        })?
        .to_string();

    if !upload_token::content_type_allowed(&claims.allowed_content_types, &content_type) {
        return Err(forbidden(format!("Content type {content_type} is not allowed")));
    }

    let content = body_or_error(body)?;
    let metadata = state
        .store
        .put(PutBlobRequest {
            pathname,
            content_type,
            content,
            add_random_suffix: false,
        })
        .await?;

    upload_completed(&metadata, claims.token_payload.as_deref());
    Ok(Json(metadata))
}

/// `GET /blobs/{pathname}`, also answering `HEAD`.
#[instrument(skip(state, query), err)]
pub async fn serve_blob(
    State(state): State<AppState>,
    Path(pathname): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<Response> {
    let (metadata, content) = state.store.read(&pathname).await?;

    let disposition = if query.download.is_some() {
        format!("attachment; filename=\"{}\"", metadata.file_name())
    } else {
        metadata.content_disposition.clone()
    };

    info!(pathname = %metadata.pathname, size = metadata.size, "Serving blob");

    Ok((
        [
            (header::CONTENT_TYPE, metadata.content_type),
            (header::CONTENT_LENGTH, content.len().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(content),
    )
        .into_response())
}
