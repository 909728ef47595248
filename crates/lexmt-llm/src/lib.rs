//! # lexmt-llm
//!
//! Chat and embedding clients for the lexmt pipeline.
//!
//! # Architecture
//!
//! - [`Provider`] trait defines the chat completion seam
//! - [`OpenAiCompatProvider`] implements it for OpenAI-compatible endpoints
//! - [`RetryPolicy`] wraps any provider with exponential-backoff retry
//! - [`ChatClient`] is the facade agents use: semaphore cap, per-call
//!   timeout, and JSON-structured completion with one repair retry
//! - [`Embedder`] / [`ApiEmbedder`] / [`CachedEmbedder`] / [`HashEmbedder`]
//!   cover the embedding side
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lexmt_llm::{ChatClient, ChatMessage, CallOptions, OpenAiCompatProvider, RetryConfig, RetryPolicy};
//!
//! let provider = RetryPolicy::new(
//!     OpenAiCompatProvider::new(&config.provider),
//!     RetryConfig::with_max_retries(config.provider.max_retries),
//! );
//! let client = ChatClient::new(Arc::new(provider), &config.provider, config.max_concurrent);
//! let text = client
//!     .complete_text(&[ChatMessage::user("Translate: ...")], CallOptions::default())
//!     .await?;
//! ```

pub mod client;
pub mod embedding;
pub mod error;
pub mod json;
pub mod openai_compat;
pub mod provider;
pub mod retry;
pub mod types;

pub use client::{CallOptions, ChatClient};
pub use embedding::{ApiEmbedder, CachedEmbedder, Embedder, HashEmbedder};
pub use error::{ProviderError, Result};
pub use json::parse_with_repair;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, Usage};
