use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// External LLM completion capability. Implementations must be stateless
/// per call and safe to invoke concurrently for independent prompts.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Chat-completions client against the OpenAI API.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable must be set")?;
        Ok(Self {
            api_key,
            model: model.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let resp = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(self.api_key.trim())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        if !resp.status().is_success() {
            // Keep the status line and body in the error text; the retry
            // classifier keys off rate-limit / server-error signatures.
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("chat completion returned {}: {}", status, text);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}
