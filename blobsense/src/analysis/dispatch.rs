use super::mode::AnalysisMode;
use super::prompt::{ImageSource, PromptPayload, truncate_text};
use super::resolver::RemoteFileRef;
use super::source::FileSource;
use crate::config::AnalysisConfig;
use crate::errors::{Error, Result};
use crate::provider::{CompletionProvider, FragmentStream};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of the two-step image strategy: the remote URL first, then inline content once.
pub enum ImageSubmission {
    Direct(FragmentStream),
    Fallback { reason: String, stream: FragmentStream },
    Failed { reason: String, error: Error },
}

impl ImageSubmission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Fallback { .. } => "fallback",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A started analysis, ready to be relayed.
pub struct AnalysisStream {
    pub mode: AnalysisMode,
    /// Why the direct image submission was abandoned, if it was
    pub fallback_reason: Option<String>,
    pub fragments: FragmentStream,
}

pub enum DispatchOutcome {
    Streaming(AnalysisStream),
    Unsupported { content_type: String },
}

/// Classifies a resolved file and submits it to the completion provider in the matching form.
#[derive(Clone)]
pub struct AnalysisDispatcher {
    provider: Arc<dyn CompletionProvider>,
    source: FileSource,
    settings: AnalysisConfig,
}

impl AnalysisDispatcher {
    pub fn new(provider: Arc<dyn CompletionProvider>, source: FileSource, settings: AnalysisConfig) -> Self {
        Self {
            provider,
            source,
            settings,
        }
    }

    #[instrument(skip_all, fields(url = %file.resolved_download_url, content_type = %file.content_type), err)]
    pub async fn dispatch(&self, file: &RemoteFileRef) -> Result<DispatchOutcome> {
        let mode = AnalysisMode::classify(&file.content_type);
        metrics::counter!(crate::metrics::ANALYSES_TOTAL, "mode" => mode.as_str()).increment(1);

        let (fragments, fallback_reason) = match mode {
            AnalysisMode::Unsupported => {
                info!("Content type has no analysis mode");
                return Ok(DispatchOutcome::Unsupported {
                    content_type: file.content_type.clone(),
                });
            }
            AnalysisMode::Text => (self.submit_text(file).await?, None),
            AnalysisMode::Image => match self.submit_image(file).await {
                ImageSubmission::Direct(stream) => (stream, None),
                ImageSubmission::Fallback { reason, stream } => (stream, Some(reason)),
                ImageSubmission::Failed { reason, error } => {
                    warn!(direct_error = %reason, error = %error, "Image analysis failed after fallback");
                    return Err(error);
                }
            },
        };

        Ok(DispatchOutcome::Streaming(AnalysisStream {
            mode,
            fallback_reason,
            fragments,
        }))
    }

    /// Submit the image by URL, and on any provider error resubmit its content inline exactly once.
    pub async fn submit_image(&self, file: &RemoteFileRef) -> ImageSubmission {
        let direct = PromptPayload::image(&self.settings.image_prompt, ImageSource::Url(file.resolved_download_url.clone()));

        let reason = match self.provider.stream_completion(direct).await {
            Ok(stream) => return ImageSubmission::Direct(stream),
            Err(e) => e.to_string(),
        };

        warn!(error = %reason, "Direct image submission rejected, retrying with inline content");
        metrics::counter!(crate::metrics::IMAGE_FALLBACKS_TOTAL).increment(1);

        match self.submit_inline_image(file).await {
            Ok(stream) => ImageSubmission::Fallback { reason, stream },
            Err(error) => ImageSubmission::Failed { reason, error },
        }
    }

    async fn submit_inline_image(&self, file: &RemoteFileRef) -> Result<FragmentStream> {
        let content = self.source.fetch(&file.resolved_download_url).await?;
        if content.is_empty() {
            return Err(Error::Resolution {
                message: format!("File at {} is empty", file.resolved_download_url),
            });
        }

        let inline = PromptPayload::image(&self.settings.image_prompt, ImageSource::inline(&file.content_type, &content));
        Ok(self.provider.stream_completion(inline).await?)
    }

    async fn submit_text(&self, file: &RemoteFileRef) -> Result<FragmentStream> {
        let content = self.source.fetch(&file.resolved_download_url).await?;
        let text = String::from_utf8_lossy(&content);
        let body = truncate_text(&text, self.settings.max_text_chars, &self.settings.truncation_marker);

        let payload = PromptPayload::text(&self.settings.text_prompt, &body);
        Ok(self.provider.stream_completion(payload).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::storage::{BlobStore, BlobUrls, InMemoryBlobStore, PutBlobRequest};
    use crate::test_utils::FakeProvider;
    use bytes::Bytes;
    use futures::StreamExt;
    use url::Url;

    struct Fixture {
        dispatcher: AnalysisDispatcher,
        provider: Arc<FakeProvider>,
        store: Arc<InMemoryBlobStore>,
    }

    fn fixture(provider: FakeProvider) -> Fixture {
        crate::test_utils::install_crypto_provider();
        let urls = BlobUrls::new(&Url::parse("http://localhost:3000").unwrap()).unwrap();
        let store = Arc::new(InMemoryBlobStore::new(urls));
        let provider = Arc::new(provider);
        let source = FileSource::new(reqwest::Client::new(), store.clone());
        Fixture {
            dispatcher: AnalysisDispatcher::new(provider.clone(), source, AnalysisConfig::default()),
            provider,
            store,
        }
    }

    async fn stored(store: &InMemoryBlobStore, pathname: &str, content_type: &str, content: Vec<u8>) -> RemoteFileRef {
        let metadata = store
            .put(PutBlobRequest {
                pathname: pathname.to_string(),
                content_type: content_type.to_string(),
                content: Bytes::from(content),
                add_random_suffix: false,
            })
            .await
            .unwrap();
        RemoteFileRef {
            source_url: metadata.url,
            resolved_download_url: metadata.download_url,
            content_type: metadata.content_type,
        }
    }

    async fn collect(outcome: DispatchOutcome) -> (AnalysisMode, Option<String>, String) {
        let DispatchOutcome::Streaming(stream) = outcome else {
            panic!("expected a stream");
        };
        let text: Vec<String> = stream.fragments.map(|r| r.unwrap()).collect().await;
        (stream.mode, stream.fallback_reason, text.concat())
    }

    #[tokio::test]
    async fn direct_image_submission_sends_the_url() {
        let f = fixture(FakeProvider::new().respond(&["A cat."]));
        let file = stored(&f.store, "cat.png", "image/png", vec![1, 2, 3]).await;

        let (mode, fallback_reason, text) = collect(f.dispatcher.dispatch(&file).await.unwrap()).await;

        assert_eq!(mode, AnalysisMode::Image);
        assert_eq!(fallback_reason, None);
        assert_eq!(text, "A cat.");
        assert_eq!(
            f.provider.calls(),
            vec![PromptPayload::image(
                &AnalysisConfig::default().image_prompt,
                ImageSource::Url(file.resolved_download_url.clone())
            )]
        );
    }

    #[tokio::test]
    async fn rejected_image_falls_back_to_inline_content_once() {
        let f = fixture(
            FakeProvider::new()
                .reject(ProviderError::Rejected {
                    status: 400,
                    message: "Error while downloading".to_string(),
                })
                .respond(&["Inline ", "cat."]),
        );
        let file = stored(&f.store, "cat.webp", "image/webp", b"RIFF".to_vec()).await;

        let (_, fallback_reason, text) = collect(f.dispatcher.dispatch(&file).await.unwrap()).await;

        assert_eq!(fallback_reason.as_deref(), Some("400 Error while downloading"));
        assert_eq!(text, "Inline cat.");

        let calls = f.provider.calls();
        assert_eq!(calls.len(), 2);
        let PromptPayload::Image { image, .. } = &calls[1] else {
            panic!("expected an image payload");
        };
        assert_eq!(image.to_url(), "data:image/webp;base64,UklGRg==");
    }

    #[tokio::test]
    async fn empty_image_never_reaches_the_fallback_provider_call() {
        let f = fixture(FakeProvider::new().reject(ProviderError::Upstream {
            message: "bad url".to_string(),
        }));
        let file = stored(&f.store, "empty.png", "image/png", Vec::new()).await;

        let Err(err) = f.dispatcher.dispatch(&file).await else {
            panic!("expected failure");
        };

        assert!(matches!(err, Error::Resolution { .. }));
        assert_eq!(f.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn second_image_failure_is_a_provider_error() {
        let f = fixture(
            FakeProvider::new()
                .reject(ProviderError::Upstream {
                    message: "first".to_string(),
                })
                .reject(ProviderError::Upstream {
                    message: "second".to_string(),
                }),
        );
        let file = stored(&f.store, "cat.gif", "image/gif", vec![0x47]).await;

        let submission = f.dispatcher.submit_image(&file).await;
        assert_eq!(submission.as_str(), "failed");
        let ImageSubmission::Failed { reason, error } = submission else {
            unreachable!()
        };
        assert_eq!(reason, "first");
        assert!(matches!(error, Error::Provider(ProviderError::Upstream { message }) if message == "second"));
        assert_eq!(f.provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn long_text_is_truncated_before_submission() {
        let f = fixture(FakeProvider::new().respond(&["Summary"]));
        let body = format!("{}{}", "x".repeat(10_000), "y".repeat(2_000));
        let file = stored(&f.store, "big.txt", "text/plain", body.into_bytes()).await;

        let (mode, _, _) = collect(f.dispatcher.dispatch(&file).await.unwrap()).await;
        assert_eq!(mode, AnalysisMode::Text);

        let calls = f.provider.calls();
        let PromptPayload::Text { prompt } = &calls[0] else {
            panic!("expected a text payload");
        };
        let body = prompt
            .strip_prefix(&format!("{}\n\n", AnalysisConfig::default().text_prompt))
            .unwrap();
        assert_eq!(body, format!("{}... (truncated)", "x".repeat(10_000)));
    }

    #[tokio::test]
    async fn unsupported_types_never_call_the_provider() {
        let f = fixture(FakeProvider::new());
        let file = stored(&f.store, "archive.zip", "application/zip", vec![0x50, 0x4B]).await;

        let outcome = f.dispatcher.dispatch(&file).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Unsupported { content_type } if content_type == "application/zip"));
        assert!(f.provider.calls().is_empty());
    }
}
