//! Shared test doubles for the pipeline crate's unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use lexmt_llm::provider::Provider;
use lexmt_llm::types::{ChatRequest, ChatResponse, Choice};
use lexmt_llm::{ChatClient, ChatMessage, ProviderError};
use lexmt_types::config::ProviderSettings;

/// Pops scripted replies in order; errors when the script runs dry.
pub(crate) struct QueueProvider {
    replies: Mutex<VecDeque<String>>,
    pub(crate) calls: AtomicU32,
}

impl QueueProvider {
    pub(crate) fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Provider for QueueProvider {
    fn name(&self) -> &str {
        "queue"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .expect("queue lock")
            .pop_front()
            .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))?;
        Ok(ChatResponse {
            id: "scripted".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(reply),
                finish_reason: Some("stop".into()),
            }],
            usage: None,
            model: "scripted-model".into(),
        })
    }
}

/// A client over a [`QueueProvider`] with default settings.
pub(crate) fn scripted_client(replies: &[&str]) -> ChatClient {
    scripted_client_with_provider(replies).0
}

/// Like [`scripted_client`], but also hands back the provider so tests can
/// count calls.
pub(crate) fn scripted_client_with_provider(replies: &[&str]) -> (ChatClient, Arc<QueueProvider>) {
    let provider = Arc::new(QueueProvider::new(replies));
    let client = ChatClient::new(provider.clone(), &ProviderSettings::default(), 8);
    (client, provider)
}

/// A client whose provider always fails with an upstream error.
pub(crate) fn failing_client() -> ChatClient {
    struct AlwaysFail;

    #[async_trait]
    impl Provider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::RequestFailed("HTTP 400: scripted failure".into()))
        }
    }

    ChatClient::new(Arc::new(AlwaysFail), &ProviderSettings::default(), 8)
}
