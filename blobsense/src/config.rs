//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `BLOBSENSE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `BLOBSENSE_` override YAML values
//! 3. **OPENAI_API_KEY** / **BLOB_READ_WRITE_TOKEN** - Special cases: override `provider.api_key`
//!    and `storage.token` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `BLOBSENSE_ANALYSIS__CLEANUP_DELAY=10m` sets the `analysis.cleanup_delay` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `public_url` - HTTP binding and the externally visible base URL
//!   used to build blob URLs
//! - **Provider**: `provider.base_url`, `provider.model`, `provider.max_tokens` - completion API
//! - **Storage**: `storage.backend`, `storage.path`, `storage.client_token_ttl` - blob storage
//! - **Analysis**: `analysis.max_text_chars`, `analysis.cleanup_delay` - pipeline policy
//! - **Upload**: `upload.allowed_content_types`, `upload.max_file_size` - client upload policy
//! - **Features**: `enable_metrics`, `enable_otel_export` - optional feature toggles
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! BLOBSENSE_PORT=8080
//!
//! # Credentials
//! OPENAI_API_KEY=sk-...
//! BLOB_READ_WRITE_TOKEN=...
//!
//! # Override nested values
//! BLOBSENSE_PROVIDER__MODEL=gpt-4o
//! BLOBSENSE_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::analysis::prompt::{DEFAULT_IMAGE_PROMPT, DEFAULT_MAX_TEXT_CHARS, DEFAULT_TEXT_PROMPT, DEFAULT_TRUNCATION_MARKER};
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "BLOBSENSE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file plus the two credentials is a working setup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL under which this service is reachable; blob URLs are `{public_url}/blobs/...`
    pub public_url: String,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Completion provider settings
    pub provider: ProviderConfig,
    /// Blob storage settings
    pub storage: StorageConfig,
    /// Analysis pipeline policy
    pub analysis: AnalysisConfig,
    /// Client upload policy
    pub upload: UploadConfig,
    pub cors: CorsConfig,
}

/// OpenAI-compatible completion API settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// API base URL, including the version segment (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Bearer credential; usually supplied through `OPENAI_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Bound on connecting and on each read of the response stream
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

// Keeps the API key out of logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `storage.path`
    Local,
    /// Process memory; contents are lost on restart
    Memory,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base directory for the local backend
    pub path: PathBuf,
    /// Read/write credential; signs client upload tokens. Usually supplied through
    /// `BLOB_READ_WRITE_TOKEN`.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Lifetime of issued client upload tokens
    #[serde(with = "humantime_serde")]
    pub client_token_ttl: Duration,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_token_ttl", &self.client_token_ttl)
            .finish()
    }
}

/// Analysis pipeline policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Text longer than this many characters is cut before submission
    pub max_text_chars: usize,
    /// Appended to text that was cut
    pub truncation_marker: String,
    /// Delay between a successful dispatch and deletion of the analysed file
    #[serde(with = "humantime_serde")]
    pub cleanup_delay: Duration,
    /// Timeout for downloading file content and probing external URLs
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    pub image_prompt: String,
    /// Instruction placed before the file text
    pub text_prompt: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Content types a client upload token may authorize. `type/*` entries match any subtype.
    pub allowed_content_types: Vec<String>,
    /// Maximum request body size in bytes for uploads
    pub max_file_size: usize,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
///
/// No CORS layer is installed when `allowed_origins` is empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
            enable_metrics: false,
            enable_otel_export: false,
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
            upload: UploadConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4-turbo".to_string(),
            max_tokens: 1000,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            path: PathBuf::from("./data/blobs"),
            token: None,
            client_token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
            cleanup_delay: Duration::from_secs(3 * 60),
            fetch_timeout: Duration::from_secs(30),
            image_prompt: DEFAULT_IMAGE_PROMPT.to_string(),
            text_prompt: DEFAULT_TEXT_PROMPT.to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: ["image/jpeg", "image/png", "image/gif", "image/webp", "text/plain", "application/pdf"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig { message: message.into() }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.provider.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(invalid(
                "provider.api_key is not configured. Set the OPENAI_API_KEY environment variable.",
            ));
        }

        if self.storage.token.as_deref().is_none_or(str::is_empty) {
            return Err(invalid(
                "storage.token is not configured. Set the BLOB_READ_WRITE_TOKEN environment variable.",
            ));
        }

        self.public_url()?;
        Url::parse(&self.provider.base_url).map_err(|e| invalid(format!("provider.base_url is not a valid URL: {e}")))?;

        if self.analysis.max_text_chars == 0 {
            return Err(invalid("analysis.max_text_chars must be positive"));
        }

        if self.upload.allowed_content_types.is_empty() {
            return Err(invalid("upload.allowed_content_types cannot be empty"));
        }

        if self.upload.max_file_size == 0 {
            return Err(invalid("upload.max_file_size must be positive"));
        }

        Ok(())
    }

    /// Parsed `public_url`.
    pub fn public_url(&self) -> Result<Url, Error> {
        Url::parse(&self.public_url).map_err(|e| invalid(format!("public_url is not a valid URL: {e}")))
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values. BLOBSENSE_CONFIG names
            // the file itself and is read by clap
            .merge(Env::prefixed("BLOBSENSE_").ignore(&["CONFIG"]).split("__"))
            // Conventional credential variables
            .merge(Env::raw().only(&["OPENAI_API_KEY"]).map(|_| "provider.api_key".into()))
            .merge(Env::raw().only(&["BLOB_READ_WRITE_TOKEN"]).map(|_| "storage.token".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
