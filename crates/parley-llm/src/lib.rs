//! Language-model completion client for Parley call sessions.
//!
//! A call session submits its full rendered conversation history and gets a
//! single assistant reply back. Providers implement [`CompletionClient`];
//! [`OpenAiChat`] speaks the OpenAI-compatible `/v1/chat/completions` API.

mod config;
mod error;
pub mod openai;

use async_trait::async_trait;
use parley_types::Turn;

pub use config::LlmConfig;
pub use error::LlmError;
pub use openai::OpenAiChat;

/// Turn sequence in, one completion out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError>;
}
