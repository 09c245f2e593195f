use crate::types::{ChannelFetcher, FetchConfig, FetchError, Item, ItemId, ItemKind, Result};
use crate::utils::expand_template;
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Item as the channel mirror API returns it. Dates and view counts come in
/// several shapes, so they are normalized after decoding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    id: ItemId,
    #[serde(rename = "type", default = "default_kind")]
    kind: ItemKind,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default)]
    views: Option<Value>,
}

fn default_kind() -> ItemKind {
    ItemKind::Text
}

impl From<RawItem> for Item {
    fn from(raw: RawItem) -> Self {
        Self {
            id: raw.id,
            kind: raw.kind,
            caption: raw.caption,
            media_url: raw.media_url.filter(|url| !url.trim().is_empty()),
            published_at: raw.date.as_ref().and_then(parse_date),
            views: raw.views.as_ref().and_then(parse_views),
        }
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        Value::Number(seconds) => seconds
            .as_i64()
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()),
        _ => None,
    }
}

/// Accepts `1234`, `"1234"`, `"1.2K"` and `"3M"`.
fn parse_views(value: &Value) -> Option<u64> {
    match value {
        Value::Number(count) => count.as_u64(),
        Value::String(text) => {
            let text = text.trim();
            let (digits, multiplier) = match text.chars().last()? {
                'K' | 'k' => (&text[..text.len() - 1], 1_000.0),
                'M' | 'm' => (&text[..text.len() - 1], 1_000_000.0),
                _ => (text, 1.0),
            };
            let count: f64 = digits.replace(',', "").parse().ok()?;
            Some((count * multiplier).round() as u64)
        }
        _ => None,
    }
}

/// Fetches a channel's recent posts from an HTTP mirror returning a JSON array.
pub struct HttpChannelFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpChannelFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        // Fail early on a template that can never produce a valid URL
        Url::parse(&expand_template(&config.url_template, "channel"))?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn channel_url(&self, channel: &str) -> std::result::Result<Url, FetchError> {
        Url::parse(&expand_template(&self.config.url_template, channel)).map_err(|e| FetchError::Malformed {
            channel: channel.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch_once(&self, channel: &str, url: &Url) -> std::result::Result<Vec<Item>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Unavailable {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                channel: channel.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable {
                channel: channel.to_string(),
                reason: format!("HTTP {}: {}", status, status.canonical_reason().unwrap_or("Unknown")),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Unavailable {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        decode_items(channel, &body)
    }
}

/// Decode a channel history body into items sorted by id.
pub fn decode_items(channel: &str, body: &str) -> std::result::Result<Vec<Item>, FetchError> {
    let raw: Vec<RawItem> = serde_json::from_str(body).map_err(|e| FetchError::Malformed {
        channel: channel.to_string(),
        reason: e.to_string(),
    })?;

    let mut items: Vec<Item> = raw.into_iter().map(Item::from).collect();
    items.sort_by_key(|item| item.id);
    Ok(items)
}

#[async_trait]
impl ChannelFetcher for HttpChannelFetcher {
    async fn fetch(&self, channel: &str) -> std::result::Result<Vec<Item>, FetchError> {
        let start_time = Instant::now();
        let url = self.channel_url(channel)?;

        debug!("Fetching channel: {} ({})", channel, url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            match self.fetch_once(channel, &url).await {
                Ok(items) => {
                    info!(
                        "Fetched {} items from {} in {}ms",
                        items.len(),
                        channel,
                        start_time.elapsed().as_millis()
                    );
                    return Ok(items);
                }
                // A missing channel or an undecodable body will not improve with retries
                Err(e @ (FetchError::NotFound { .. } | FetchError::Malformed { .. })) => return Err(e),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            attempt += 1;
                            warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt, channel, delay, e);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }
}
