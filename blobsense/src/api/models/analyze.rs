use serde::Deserialize;

/// Query string of `POST /api/analyze`.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    /// Store the request body under this name
    pub filename: Option<String>,
    /// Analyse the file at this reference
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeRequest {
    Upload { filename: String },
    Analyze { url: String },
}

impl AnalyzeQuery {
    /// Exactly one non-empty parameter selects the operation; anything else is ambiguous.
    pub fn into_request(self) -> Option<AnalyzeRequest> {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());
        match (present(self.filename), present(self.url)) {
            (Some(filename), None) => Some(AnalyzeRequest::Upload { filename }),
            (None, Some(url)) => Some(AnalyzeRequest::Analyze { url }),
            _ => None,
        }
    }
}
