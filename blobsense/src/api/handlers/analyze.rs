use crate::AppState;
use crate::analysis::{CleanupTask, DispatchOutcome, relay};
use crate::api::models::analyze::{AnalyzeQuery, AnalyzeRequest};
use crate::errors::{Error, Result};
use crate::storage::{BlobMetadata, PutBlobRequest};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{info, instrument};

const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// `POST /api/analyze`
///
/// With `filename`, stores the request body and returns its metadata. With `url`, resolves the
/// file, dispatches it to the completion provider and streams the answer back as plain text.
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    match query.into_request() {
        Some(AnalyzeRequest::Upload { filename }) => {
            let metadata = upload(&state, &filename, &headers, body).await?;
            Ok(Json(metadata).into_response())
        }
        Some(AnalyzeRequest::Analyze { url }) => analyze_file(&state, &url).await,
        None => Err(Error::BadRequest {
            message: "Invalid request".to_string(),
        }),
    }
}

/// Content type of an upload: an explicit header, else a guess from the name.
fn upload_content_type(headers: &HeaderMap, filename: &str) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != OCTET_STREAM)
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(filename).first_raw().map(str::to_string))
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

pub(crate) fn body_or_error(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge {
                message: "File exceeds the maximum upload size".to_string(),
            }
        } else {
            Error::BadRequest {
                message: rejection.body_text(),
            }
        }
    })
}

#[instrument(skip(state, headers, body), err)]
async fn upload(
    state: &AppState,
    filename: &str,
    headers: &HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<BlobMetadata> {
    let content = body_or_error(body)?;
    let content_type = upload_content_type(headers, filename);

    let metadata = state
        .store
        .put(PutBlobRequest {
            pathname: filename.to_string(),
            content_type,
            content,
            add_random_suffix: true,
        })
        .await?;

    info!(pathname = %metadata.pathname, size = metadata.size, content_type = %metadata.content_type, "Stored upload");
    Ok(metadata)
}

#[instrument(skip(state), err)]
async fn analyze_file(state: &AppState, url: &str) -> Result<Response> {
    let file = state.resolver.resolve(url).await?;

    let analysis = match state.dispatcher.dispatch(&file).await? {
        DispatchOutcome::Unsupported { content_type } => return Err(Error::UnsupportedType { content_type }),
        DispatchOutcome::Streaming(analysis) => analysis,
    };

    info!(
        mode = %analysis.mode,
        fallback = analysis.fallback_reason.is_some(),
        "Analysis started"
    );

    // Only files whose analysis started streaming are scheduled for deletion
    let body = relay(analysis.fragments).await?;
    state
        .cleanup
        .schedule(CleanupTask::after(file.source_url.clone(), state.config.analysis.cleanup_delay));

    Ok(([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn explicit_content_type_wins() {
        assert_eq!(upload_content_type(&headers(Some("text/markdown")), "notes.txt"), "text/markdown");
    }

    #[test]
    fn octet_stream_or_missing_header_falls_back_to_extension() {
        assert_eq!(upload_content_type(&headers(Some(OCTET_STREAM)), "cat.png"), "image/png");
        assert_eq!(upload_content_type(&headers(None), "notes.txt"), "text/plain");
        assert_eq!(upload_content_type(&headers(None), "mystery"), OCTET_STREAM);
    }
}
