use super::{classify_request_error, classify_status, send_parts};
use crate::types::{Payload, Result, Transport, TransportError};
use crate::utils::{chunk_text, truncate_chars};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const MAX_MESSAGE_CHARS: usize = 4096;
const MAX_CAPTION_CHARS: usize = 1024;

/// Delivers through the Telegram Bot API; targets are chat ids.
pub struct TelegramTransport {
    client: Client,
    base_url: String,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Result<Self> {
        Self::with_base_url(bot_token, "https://api.telegram.org")
    }

    pub fn with_base_url(bot_token: &str, api_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        })
    }

    async fn call(&self, method: &str, body: Value) -> std::result::Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        classify_status(status, &detail)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, target: &str, payload: &Payload) -> std::result::Result<(), TransportError> {
        debug!("telegram: sending {:?} to {}", payload.kind(), target);
        match payload {
            Payload::Text { body } => {
                // Long posts go out as consecutive messages
                let parts = chunk_text(body, MAX_MESSAGE_CHARS);
                send_parts(&parts, |part: &str| {
                    self.call("sendMessage", json!({ "chat_id": target, "text": part }))
                })
                .await
            }
            Payload::Image { url, caption } => {
                let caption = caption.as_deref().map(|c| truncate_chars(c, MAX_CAPTION_CHARS));
                self.call("sendPhoto", json!({ "chat_id": target, "photo": url, "caption": caption }))
                    .await
            }
            Payload::Video { url, caption } => {
                let caption = caption.as_deref().map(|c| truncate_chars(c, MAX_CAPTION_CHARS));
                self.call("sendVideo", json!({ "chat_id": target, "video": url, "caption": caption }))
                    .await
            }
        }
    }
}
