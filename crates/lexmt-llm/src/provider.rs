//! The [`Provider`] trait: the seam between the chat client and any
//! concrete completion backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// An LLM chat completion backend.
///
/// Implementations must be cheap to share (`Send + Sync`); the pipeline
/// holds one provider behind an `Arc` for the whole run. Tests substitute
/// scripted mock providers at this seam.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A short name for logging.
    fn name(&self) -> &str;

    /// Issue a chat completion request.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
