//! # blobsense: streamed LLM analysis of uploaded files
//!
//! `blobsense` accepts file uploads, stores them in a blob store, and on request asks an
//! OpenAI-compatible completion API to describe them. The answer is relayed to the caller as a
//! plain-text stream while it is being generated, and the analysed file is deleted a few minutes
//! later.
//!
//! ## Request Flow
//!
//! A call to `POST /api/analyze?url=...` runs through the [`analysis`] pipeline:
//!
//! 1. [`analysis::ContentTypeResolver`] determines the download URL and content type of the file.
//!    Files in the local store are answered from their metadata; external URLs are checked with
//!    `HEAD`, falling back to `GET`.
//! 2. [`analysis::AnalysisDispatcher`] classifies the content type as image, text or unsupported
//!    and builds the prompt. Images are submitted by URL first and retried once with inline
//!    base64 content if the provider rejects the URL. Text is downloaded, decoded and capped.
//! 3. [`analysis::relay()`] turns the provider's fragment stream into the response body. Errors
//!    before the first fragment become a JSON error response; later errors end the stream.
//! 4. [`analysis::CleanupScheduler`] deletes the file once the configured delay has passed.
//!
//! Uploads arrive either through `POST /api/analyze?filename=...` or as client uploads
//! authorized by short-lived signed tokens from `POST /api/blob/upload`.
//!
//! ## Core Components
//!
//! - [`api`]: HTTP handlers and request/response models
//! - [`storage`]: the [`storage::BlobStore`] trait with local-disk and in-memory backends
//! - [`provider`]: the [`provider::CompletionProvider`] trait and its OpenAI-compatible client
//! - [`upload_token`]: signing and verification of client upload tokens
//! - [`config`]: YAML + environment configuration
//! - [`telemetry`], [`metrics`]: tracing and Prometheus metrics
//!
//! ## Getting Started
//!
//! ```bash
//! OPENAI_API_KEY=sk-... BLOB_READ_WRITE_TOKEN=... blobsense -f config.yaml
//! ```

pub mod analysis;
pub mod api;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod provider;
pub mod storage;
pub mod telemetry;
pub mod upload_token;

#[cfg(test)]
mod test;
#[cfg(test)]
mod test_utils;

use crate::analysis::{AnalysisDispatcher, CleanupScheduler, ContentTypeResolver, FileSource, TokioCleanupScheduler};
use crate::config::{CorsOrigin, StorageBackend};
use crate::provider::{CompletionProvider, OpenAiProvider};
use crate::storage::{BlobStore, BlobUrls, InMemoryBlobStore, LocalBlobStore};
use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::bon;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};

pub use config::Config;

/// Application state shared across all request handlers.
///
/// Every handle is constructed once at startup and never mutated.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .provider(provider)
///     .cleanup(cleanup)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BlobStore>,
    pub resolver: ContentTypeResolver,
    pub dispatcher: AnalysisDispatcher,
    pub cleanup: Arc<dyn CleanupScheduler>,
}

#[bon]
impl AppState {
    #[builder]
    pub fn new(
        config: Config,
        store: Arc<dyn BlobStore>,
        provider: Arc<dyn CompletionProvider>,
        cleanup: Arc<dyn CleanupScheduler>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.analysis.fetch_timeout)
            .build()
            .context("Failed to build HTTP client for file downloads")?;

        let source = FileSource::new(http, store.clone());
        let resolver = ContentTypeResolver::new(source.clone());
        let dispatcher = AnalysisDispatcher::new(provider, source, config.analysis.clone());

        Ok(Self {
            config,
            store,
            resolver,
            dispatcher,
            cleanup,
        })
    }
}

/// Create the configured blob store.
pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    let urls = BlobUrls::new(&config.public_url()?).context("Failed to derive blob URLs from public_url")?;

    let store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => {
            tokio::fs::create_dir_all(&config.storage.path)
                .await
                .with_context(|| format!("Failed to create storage directory {}", config.storage.path.display()))?;
            info!(path = %config.storage.path.display(), "Using local blob storage");
            Arc::new(LocalBlobStore::new(config.storage.path.clone(), urls))
        }
        StorageBackend::Memory => {
            info!("Using in-memory blob storage; files are lost on restart");
            Arc::new(InMemoryBlobStore::new(urls))
        }
    };

    Ok(store)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // A wildcard anywhere in the list allows every origin
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::HEAD, http::Method::POST, http::Method::PUT])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Includes:
/// - `/api/analyze` and `/api/blob/upload`
/// - `/blobs/{*pathname}` for serving files and accepting client uploads
/// - `/healthz`
/// - Optional Prometheus metrics and CORS
/// - Tracing middleware
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let max_file_size = state.config.upload.max_file_size;
    let enable_metrics = state.config.enable_metrics;
    let cors = (!state.config.cors.allowed_origins.is_empty())
        .then(|| create_cors_layer(&state.config))
        .transpose()?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/analyze", post(api::handlers::analyze::analyze))
        .route("/api/blob/upload", post(api::handlers::blob_upload::handle_upload))
        .route(
            "/blobs/{*pathname}",
            get(api::handlers::blobs::serve_blob).put(api::handlers::blobs::client_upload),
        )
        .layer(DefaultBodyLimit::max(max_file_size))
        .with_state(state);

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    let router = if enable_metrics {
        crate::metrics::instrument(router)
    } else {
        router
    };

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The assembled service: router, configuration and the token that stops background work.
pub struct Application {
    router: Router,
    config: Config,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting blobsense with configuration: {:#?}", config);

        let store = create_store(&config).await?;
        let provider = Arc::new(OpenAiProvider::new(&config.provider)?);

        // Pending cleanups are dropped on shutdown
        let shutdown = CancellationToken::new();
        let cleanup = Arc::new(TokioCleanupScheduler::new(store.clone(), shutdown.clone()));

        let state = AppState::builder()
            .config(config.clone())
            .store(store)
            .provider(provider)
            .cleanup(cleanup)
            .build()?;

        let router = build_router(state)?;

        Ok(Self {
            router,
            config,
            shutdown,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        info!("blobsense listening on http://{}, public URL {}", bind_addr, self.config.public_url);

        // Run the server with graceful shutdown
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Cancelling pending cleanups...");
        self.shutdown.cancel();

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
