use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use interfaces::defs::{
    ChannelFetcher, FetchError, Item, ItemId, ItemKind, Payload, SummarizeError, Summarizer,
    Translator, Transport, TransportError,
};
pub use interfaces::state::{DocumentStore, StoreError};

/// Where a group's items are sent: a named transport and a target on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub transport: String,
    pub target: String,
}

/// A monitored channel after normalization. A channel listed by several
/// groups is polled once and delivered to all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub groups: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub url_template: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: "https://weeb-api.vercel.app/telegram/{channel}".to_string(),
            user_agent: "channel-relay/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Minimum gap between two consecutive deliveries to one destination.
    pub pacing: Duration,
    /// Total attempts per item and destination, the first one included.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_secs(2),
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub poll_interval: Duration,
    /// Window over which the polls of one cycle are staggered.
    pub spread_window: Duration,
    pub summary_interval: Duration,
    /// UTC hour at which the retained summaries are cleared.
    pub summary_reset_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20 * 60),
            spread_window: Duration::from_secs(10 * 60),
            summary_interval: Duration::from_secs(30 * 60),
            summary_reset_hour: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Oldest buffered items are dropped beyond this many per channel.
    pub max_buffered_items: usize,
    pub prompt: Option<String>,
    /// Every accepted digest is also sent here.
    pub admin: Option<Destination>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_buffered_items: 50,
            prompt: None,
            admin: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub delivery: DeliveryConfig,
    pub schedule: ScheduleConfig,
    pub summary: SummaryConfig,
    /// Drop items whose translation hit the rate limit instead of sending them.
    pub skip_on_rate_limit: bool,
    /// Remove channels the fetcher reports as nonexistent.
    pub prune_invalid_channels: bool,
    pub persist_attempts: u32,
    pub persist_retry_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryConfig::default(),
            schedule: ScheduleConfig::default(),
            summary: SummaryConfig::default(),
            skip_on_rate_limit: true,
            prune_invalid_channels: false,
            persist_attempts: 5,
            persist_retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Summarization error: {0}")]
    Summarize(#[from] SummarizeError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Group {group} routes to unknown transport {transport}")]
    UnknownTransport { group: String, transport: String },

    #[error("Position of {channel} could not be persisted after {attempts} attempts")]
    PersistExhausted { channel: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
