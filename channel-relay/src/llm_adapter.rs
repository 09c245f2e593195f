use crate::types::{Result, SummarizeError, Summarizer};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_SUMMARY_PROMPT: &str = "You receive recent posts from a news channel, one per numbered line. \
Write a short digest of the main developments in the same language as the posts. \
Group related posts, skip duplicates and keep it under ten bullet points.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl LlmConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
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
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Summarizer backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSummarizer {
    client: Client,
    config: LlmConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn compose_input(texts: &[String]) -> String {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| format!("{}. {}", i + 1, text.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, texts: &[String], prompt: Option<&str>) -> std::result::Result<String, SummarizeError> {
        if texts.is_empty() {
            return Err(SummarizeError::Empty);
        }

        let input = Self::compose_input(texts);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.unwrap_or(DEFAULT_SUMMARY_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.3,
        };

        debug!("Requesting digest of {} posts from {}", texts.len(), self.config.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SummarizeError::Request(format!("HTTP {}", status)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        let digest = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(SummarizeError::Empty)?;

        info!("Generated digest for {} posts", texts.len());
        Ok(digest)
    }
}
