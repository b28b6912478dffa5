//! OpenAI Chat Completions provider.
//!
//! Non-streaming: a spoken reply is synthesized as a whole, so partial tokens
//! would buy nothing here. Works with any OpenAI-compatible endpoint.

use async_trait::async_trait;
use parley_types::Turn;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CompletionClient, LlmConfig, LlmError};

pub struct OpenAiChat {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(config: &'a LlmConfig, turns: &'a [Turn]) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: turns
            .iter()
            .map(|t| ChatMessage {
                role: t.role.as_str(),
                content: &t.content,
            })
            .collect(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

fn first_reply(response: ChatResponse) -> Result<String, LlmError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(LlmError::EmptyResponse)
}

#[async_trait]
impl CompletionClient for OpenAiChat {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::Config("API key is not configured".to_string()));
        }

        let body = build_request(&self.config, turns);
        debug!(model = %self.config.model, turns = turns.len(), "requesting completion");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_reply(parsed)
    }
}
