pub mod types;
pub mod utils;
pub mod state;
pub mod classifier;
pub mod processing;
pub mod delivery;
pub mod scheduler;
pub mod digest;
pub mod channel_manager;
pub mod fetcher;
pub mod translator;
pub mod llm_adapter;
pub mod transports;
pub mod pipeline;

pub use types::*;
pub use channel_manager::{ChannelEntry, ChannelRegistry, Group};
pub use classifier::{classify, Classification, StaleReason};
pub use delivery::{DeliveryOutcome, DeliveryReport, FanOut, Route};
pub use digest::{DrainReport, SummaryBatcher, SummaryEntry, SummaryRecord};
pub use fetcher::HttpChannelFetcher;
pub use llm_adapter::{LlmConfig, OpenAiSummarizer};
pub use pipeline::{ChannelReport, CycleReport, PipelineBuilder, RelayPipeline};
pub use processing::{ItemTransformer, TransformOutcome, TransformedItem};
pub use state::PositionStore;
pub use translator::{HttpTranslator, TranslatorConfig};
pub use transports::{TelegramTransport, WebhookTransport};
