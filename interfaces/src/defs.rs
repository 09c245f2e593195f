use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-assigned identifier, increasing within one channel. Not globally unique.
pub type ItemId = i64;

/// Text the translator embeds in its output when the upstream service throttled it.
pub const RATE_LIMIT_MARKER: &str = "Response code 429 (Too Many Requests)";

/// Prefix a translator puts in front of its output when translation failed.
pub const TRANSLATION_FAILURE_PREFIX: &str = "Translation failed:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Image,
    Video,
}

/// One unit of content published on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub views: Option<u64>,
}

impl Item {
    pub fn text(id: ItemId, caption: &str) -> Self {
        Self {
            id,
            kind: ItemKind::Text,
            caption: Some(caption.to_owned()),
            media_url: None,
            published_at: None,
            views: None,
        }
    }

    pub fn media(id: ItemId, kind: ItemKind, media_url: &str, caption: Option<&str>) -> Self {
        Self {
            id,
            kind,
            caption: caption.map(str::to_owned),
            media_url: Some(media_url.to_owned()),
            published_at: None,
            views: None,
        }
    }

    /// Caption or body, empty when the item carries none.
    pub fn body(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }
}

/// What actually goes over the wire to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Text { body: String },
    Image { url: String, caption: Option<String> },
    Video { url: String, caption: Option<String> },
}

impl Payload {
    pub fn kind(&self) -> ItemKind {
        match self {
            Payload::Text { .. } => ItemKind::Text,
            Payload::Image { .. } => ItemKind::Image,
            Payload::Video { .. } => ItemKind::Video,
        }
    }

    /// Rejects payloads no transport could ever deliver.
    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            Payload::Text { body } if body.trim().is_empty() => {
                Err(TransportError::Fatal("text payload has an empty body".to_owned()))
            }
            Payload::Image { url, .. } | Payload::Video { url, .. } if url.trim().is_empty() => {
                Err(TransportError::Fatal(format!("{:?} payload has no media locator", self.kind())))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("channel {channel} is unavailable: {reason}")]
    Unavailable { channel: String, reason: String },

    #[error("channel {channel} does not exist")]
    NotFound { channel: String },

    #[error("malformed response for channel {channel}: {reason}")]
    Malformed { channel: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection closed, timeout, throttling. Worth another attempt.
    #[error("recoverable delivery failure: {0}")]
    Recoverable(String),

    /// The payload or destination is wrong; retrying cannot help.
    #[error("fatal delivery failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Recoverable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Request(String),

    #[error("summarizer returned an empty digest")]
    Empty,

    #[error("no summarizer is configured")]
    Unavailable,
}

/// Produces the recent items of a channel, oldest first.
#[async_trait]
pub trait ChannelFetcher: Send + Sync {
    async fn fetch(&self, channel: &str) -> Result<Vec<Item>, FetchError>;
}

/// Translation never raises: on failure the returned text carries
/// [`TRANSLATION_FAILURE_PREFIX`] or [`RATE_LIMIT_MARKER`].
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> String;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, texts: &[String], prompt: Option<&str>) -> Result<String, SummarizeError>;
}

/// A chat platform able to deliver payloads to a target (chat id, webhook route, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, target: &str, payload: &Payload) -> Result<(), TransportError>;
}

pub fn is_rate_limited(text: &str) -> bool {
    text.contains(RATE_LIMIT_MARKER)
}

pub fn is_translation_failure(text: &str) -> bool {
    text.starts_with(TRANSLATION_FAILURE_PREFIX) || is_rate_limited(text)
}
