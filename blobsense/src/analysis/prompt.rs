//! Prompt construction for the completion provider.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::borrow::Cow;

pub const DEFAULT_MAX_TEXT_CHARS: usize = 10_000;
pub const DEFAULT_TRUNCATION_MARKER: &str = "... (truncated)";
pub const DEFAULT_IMAGE_PROMPT: &str = "What is in this image? Provide a brief description.";
pub const DEFAULT_TEXT_PROMPT: &str = "Analyze the following text content and provide a brief summary of what it contains.";

/// Where the provider reads the image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Remote URL the provider fetches itself
    Url(String),
    /// Base64 content embedded in the request
    Inline { content_type: String, data: String },
}

impl ImageSource {
    pub fn inline(content_type: &str, content: &[u8]) -> Self {
        Self::Inline {
            content_type: content_type.to_string(),
            data: STANDARD.encode(content),
        }
    }

    /// URL form accepted by the provider: the remote URL, or a `data:` URI.
    pub fn to_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Inline { content_type, data } => format!("data:{content_type};base64,{data}"),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPayload {
    Image { instruction: String, image: ImageSource },
    Text { prompt: String },
}

impl PromptPayload {
    pub fn image(instruction: &str, image: ImageSource) -> Self {
        Self::Image {
            instruction: instruction.to_string(),
            image,
        }
    }

    /// Embed a (possibly truncated) text body after the instruction.
    pub fn text(instruction: &str, body: &str) -> Self {
        Self::Text {
            prompt: format!("{instruction}\n\n{body}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image { image, .. } if image.is_inline() => "image_inline",
            Self::Image { .. } => "image_url",
            Self::Text { .. } => "text",
        }
    }
}

/// Cap `text` at `max_chars` Unicode scalar values, appending `marker` only when something was cut.
pub fn truncate_text<'a>(text: &'a str, max_chars: usize, marker: &str) -> Cow<'a, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}{marker}", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}
