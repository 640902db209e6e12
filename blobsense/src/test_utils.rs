//! Test doubles and fixtures shared by unit and integration tests.

use crate::analysis::{CleanupHandle, CleanupScheduler, CleanupTask};
use crate::config::{Config, ProviderConfig, StorageConfig};
use crate::provider::{CompletionProvider, FragmentStream, ProviderError};
use crate::analysis::prompt::PromptPayload;
use crate::storage::{BlobStore, BlobUrls, LocalBlobStore};
use crate::AppState;
use async_trait::async_trait;
use axum_test::TestServer;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;

pub const TEST_STORAGE_TOKEN: &str = "rw-test-token";

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the rustls crypto provider that `main` installs in production. Safe to call from every
/// test; only the first call has an effect.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Another test binary path may already have installed one
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

enum Scripted {
    Respond(Vec<String>),
    Reject(ProviderError),
    RespondThenFail(Vec<String>, ProviderError),
}

/// A [`CompletionProvider`] that replays scripted answers in order and records every payload.
///
/// Once the script runs out, further submissions fail with an upstream error.
#[derive(Default)]
pub struct FakeProvider {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<PromptPayload>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Scripted) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    /// Answer the next submission with these fragments.
    pub fn respond(self, fragments: &[&str]) -> Self {
        self.push(Scripted::Respond(fragments.iter().map(|f| f.to_string()).collect()))
    }

    /// Reject the next submission.
    pub fn reject(self, error: ProviderError) -> Self {
        self.push(Scripted::Reject(error))
    }

    /// Stream these fragments for the next submission, then fail mid-stream.
    pub fn respond_then_fail(self, fragments: &[&str], error: ProviderError) -> Self {
        self.push(Scripted::RespondThenFail(fragments.iter().map(|f| f.to_string()).collect(), error))
    }

    pub fn calls(&self) -> Vec<PromptPayload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn stream_completion(&self, payload: PromptPayload) -> Result<FragmentStream, ProviderError> {
        self.calls.lock().unwrap().push(payload);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Scripted::Respond(fragments)) => Ok(futures::stream::iter(fragments.into_iter().map(Ok)).boxed()),
            Some(Scripted::Reject(error)) => Err(error),
            Some(Scripted::RespondThenFail(fragments, error)) => Ok(futures::stream::iter(
                fragments.into_iter().map(Ok).chain(std::iter::once(Err(error))),
            )
            .boxed()),
            None => Err(ProviderError::Upstream {
                message: "no scripted response left".to_string(),
            }),
        }
    }
}

/// Records scheduled cleanups instead of running them.
#[derive(Default)]
pub struct RecordingCleanupScheduler {
    tasks: Mutex<Vec<CleanupTask>>,
}

impl RecordingCleanupScheduler {
    pub fn tasks(&self) -> Vec<CleanupTask> {
        self.tasks.lock().unwrap().clone()
    }
}

impl CleanupScheduler for RecordingCleanupScheduler {
    fn schedule(&self, task: CleanupTask) -> CleanupHandle {
        self.tasks.lock().unwrap().push(task);
        CleanupHandle::new(CancellationToken::new())
    }
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: "http://localhost:3000".to_string(),
        provider: ProviderConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        },
        storage: StorageConfig {
            token: Some(TEST_STORAGE_TOKEN.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A running router backed by a temporary local store and test doubles.
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<LocalBlobStore>,
    pub provider: Arc<FakeProvider>,
    pub cleanup: Arc<RecordingCleanupScheduler>,
    pub config: Config,
    _dir: tempfile::TempDir,
}

pub fn create_test_app(provider: FakeProvider) -> TestApp {
    create_test_app_with_config(provider, test_config())
}

pub fn create_test_app_with_config(provider: FakeProvider, config: Config) -> TestApp {
    install_crypto_provider();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let urls = BlobUrls::new(&config.public_url().unwrap()).unwrap();
    let store = Arc::new(LocalBlobStore::new(dir.path().to_path_buf(), urls));
    let provider = Arc::new(provider);
    let cleanup = Arc::new(RecordingCleanupScheduler::default());

    let state = AppState::builder()
        .config(config.clone())
        .store(store.clone() as Arc<dyn BlobStore>)
        .provider(provider.clone() as Arc<dyn CompletionProvider>)
        .cleanup(cleanup.clone() as Arc<dyn CleanupScheduler>)
        .build()
        .expect("Failed to build app state");

    let router = crate::build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        store,
        provider,
        cleanup,
        config,
        _dir: dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_clients_build_after_repeated_provider_installs() {
        install_crypto_provider();
        install_crypto_provider();

        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        assert!(reqwest::Client::builder().build().is_ok());
    }
}
