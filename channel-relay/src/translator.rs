use crate::types::{Result, Translator};
use async_trait::async_trait;
use interfaces::defs::{RATE_LIMIT_MARKER, TRANSLATION_FAILURE_PREFIX};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// LibreTranslate-compatible `/translate` endpoint.
    pub endpoint: String,
    pub target_language: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

/// Translator backed by an HTTP translation service.
///
/// Never fails outright: throttling turns into text carrying the rate-limit
/// marker, every other problem into a `Translation failed:` message.
pub struct HttpTranslator {
    client: Client,
    endpoint: Url,
    config: TranslatorConfig,
}

impl HttpTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    async fn request(&self, text: &str) -> std::result::Result<String, String> {
        let body = TranslateRequest {
            q: text,
            source: "auto",
            target: &self.config.target_language,
            format: "text",
            api_key: self.config.api_key.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RATE_LIMIT_MARKER.to_string());
        }
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let parsed: TranslateResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.translated_text)
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str) -> String {
        match self.request(text).await {
            Ok(translated) => translated,
            Err(reason) => {
                debug!("Translation request failed: {}", reason);
                format!("{} {}", TRANSLATION_FAILURE_PREFIX, reason)
            }
        }
    }
}
