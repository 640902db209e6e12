use serde::Serialize;
use std::fmt;

/// How a file's content is presented to the completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Image,
    Text,
    Unsupported,
}

impl AnalysisMode {
    /// Classify a MIME type string.
    ///
    /// Total over any input and case-sensitive: `image/` prefix selects [`AnalysisMode::Image`],
    /// a `text/` prefix or any occurrence of `text` selects [`AnalysisMode::Text`].
    pub fn classify(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("text/") || content_type.contains("text") {
            Self::Text
        } else {
            Self::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
