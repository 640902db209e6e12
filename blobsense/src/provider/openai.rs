use super::{CompletionProvider, FragmentStream, ProviderError, sse};
use crate::analysis::prompt::PromptPayload;
use crate::config::ProviderConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest, ImageDetail, ImageUrl,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

/// Streams chat completions from an OpenAI-compatible endpoint.
pub struct OpenAiProvider {
    client: Client,
    completions_url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("completions_url", &self.completions_url.as_str())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: sse::ErrorBody,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        // No total timeout: streams may legitimately run long
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()?;

        let base_url = Url::parse(&config.base_url)?;
        let completions_url = ensure_slash(&base_url).join("chat/completions")?;

        Ok(Self {
            client,
            completions_url,
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, payload: &PromptPayload) -> CreateChatCompletionRequest {
        let content = match payload {
            PromptPayload::Image { instruction, image } => ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestUserMessageContentPart::Text(ChatCompletionRequestMessageContentPartText {
                    text: instruction.clone(),
                }),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: image.to_url(),
                        detail: Some(ImageDetail::Auto),
                    },
                }),
            ]),
            PromptPayload::Text { prompt } => ChatCompletionRequestUserMessageContent::Text(prompt.clone()),
        };

        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatCompletionRequestUserMessage::from(content).into()],
            max_completion_tokens: Some(self.max_tokens),
            stream: Some(true),
            ..Default::default()
        }
    }
}

/// Pull the provider's own error message out of a failure body, falling back to the raw text.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %self.model, kind = payload.kind()), err)]
    async fn stream_completion(&self, payload: PromptPayload) -> Result<FragmentStream, ProviderError> {
        debug!(url = %self.completions_url, "Submitting streaming chat completion");

        let response = self
            .client
            .post(self.completions_url.clone())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }

        Ok(sse::decode_fragments(response.bytes_stream()).boxed())
    }
}
