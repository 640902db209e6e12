use crate::errors::{Error, Result};
use crate::provider::{FragmentStream, ProviderError};
use axum::body::Body;
use bytes::Bytes;
use futures::future::ready;
use futures::stream::{self, StreamExt};
use tracing::{debug, error};

/// Forward provider fragments to the caller as a streamed body.
///
/// Waits for the first non-empty fragment so that a provider that fails immediately still produces
/// a JSON error response. Later errors are logged and abort the body, leaving the caller with a
/// truncated stream.
pub async fn relay(mut fragments: FragmentStream) -> Result<Body> {
    let first = loop {
        match fragments.next().await {
            Some(Ok(fragment)) if fragment.is_empty() => continue,
            Some(Ok(fragment)) => break Bytes::from(fragment),
            Some(Err(e)) => return Err(Error::Provider(e)),
            None => {
                debug!("Provider stream ended without output");
                return Ok(Body::empty());
            }
        }
    };

    let rest = fragments
        .scan(false, |failed, item| {
            if *failed {
                return ready(None);
            }
            let next = match item {
                Ok(fragment) if fragment.is_empty() => None,
                Ok(fragment) => Some(Ok(Bytes::from(fragment))),
                Err(e) => {
                    error!(error = %e, "Provider stream failed mid-response");
                    *failed = true;
                    Some(Err(e))
                }
            };
            ready(Some(next))
        })
        .filter_map(ready);

    let body = stream::once(ready(Ok::<_, ProviderError>(first))).chain(rest);
    Ok(Body::from_stream(body))
}
