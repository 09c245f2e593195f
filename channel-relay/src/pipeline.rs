use crate::channel_manager::ChannelRegistry;
use crate::classifier::{classify, Classification};
use crate::delivery::{DeliveryOutcome, DeliveryReport, FanOut, Route};
use crate::digest::{DrainReport, SummaryBatcher};
use crate::processing::{ItemTransformer, TransformOutcome, TransformedItem};
use crate::scheduler::{self, spread_offsets};
use crate::state::PositionStore;
use crate::types::{
    Channel, ChannelFetcher, DocumentStore, FetchError, ItemId, Payload, RelayConfig, RelayError,
    Result, Summarizer, Translator, Transport,
};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use interfaces::{EmptySummarizer, PassthroughTranslator};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What happened to one channel during one poll.
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: String,
    pub classification: &'static str,
    pub position: Option<ItemId>,
    pub new_items: usize,
    pub skipped: usize,
    pub delivery: DeliveryReport,
    pub error: Option<String>,
}

impl ChannelReport {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            classification: Classification::NoOp.label(),
            position: None,
            new_items: 0,
            skipped: 0,
            delivery: DeliveryReport::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub channels: Vec<ChannelReport>,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.channels.iter().map(|report| report.delivery.delivered()).sum()
    }

    pub fn rejected(&self) -> usize {
        self.channels.iter().map(|report| report.delivery.rejected()).sum()
    }
}

/// Poll, classify, transform, deliver; plus the summary drain and daily reset.
pub struct RelayPipeline {
    config: RelayConfig,
    fetcher: Arc<dyn ChannelFetcher>,
    transformer: ItemTransformer,
    fanout: FanOut,
    transports: HashMap<String, Arc<dyn Transport>>,
    positions: PositionStore,
    registry: ChannelRegistry,
    batcher: SummaryBatcher,
    admin: Option<Route>,
}

impl RelayPipeline {
    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn batcher(&self) -> &SummaryBatcher {
        &self.batcher
    }

    /// One full poll of one channel. Failures are absorbed into the report.
    pub async fn poll_channel(&self, channel: &Channel) -> ChannelReport {
        let mut report = ChannelReport::new(&channel.name);

        let items = match self.fetcher.fetch(&channel.name).await {
            Ok(items) => items,
            Err(FetchError::NotFound { .. }) => {
                self.handle_invalid_channel(channel).await;
                report.error = Some(format!("channel {} does not exist", channel.name));
                return report;
            }
            Err(e) => {
                warn!("Fetch failed for {}, treating as no-op: {}", channel.name, e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let stored = self.positions.get(&channel.name).await;
        let classification = classify(stored, &items);
        report.classification = classification.label();

        match &classification {
            Classification::NoOp => {
                debug!("No new items on {}", channel.name);
                report.position = stored;
                return report;
            }
            Classification::FirstSeen { item } => {
                info!("First poll of {}, starting from item {}", channel.name, item.id);
            }
            Classification::Incremental { items } => {
                info!("{} new item(s) on {}", items.len(), channel.name);
            }
            Classification::Stale { previous, newest, reason } => {
                error!(
                    "History of {} no longer contains position {} ({:?}); resynchronizing to {} without delivery",
                    channel.name, previous, reason, newest
                );
            }
        }

        // The position moves before delivery; a failed delivery is not retried on the next poll
        if let Some(position) = classification.new_position() {
            if let Err(e) = self.persist_position(&channel.name, position).await {
                error!("Abandoning cycle for {}: {}", channel.name, e);
                report.position = stored;
                report.error = Some(e.to_string());
                return report;
            }
            report.position = Some(position);
        }

        let deliverables = classification.into_deliverables();
        report.new_items = deliverables.len();

        let mut ready: Vec<TransformedItem> = Vec::with_capacity(deliverables.len());
        for item in deliverables {
            match self.transformer.transform(&channel.name, item).await {
                TransformOutcome::Ready(transformed) => {
                    if let Err(e) = self
                        .batcher
                        .append(&channel.name, transformed.item.id, &transformed.text)
                        .await
                    {
                        warn!("Could not buffer item {} of {} for summary: {}", transformed.item.id, channel.name, e);
                    }
                    ready.push(transformed);
                }
                TransformOutcome::Skipped { item, reason } => {
                    warn!("Skipped item {} of {}: {}", item.id, channel.name, reason);
                    report.skipped += 1;
                }
            }
        }

        let routes = self.routes_for(channel).await;
        if routes.is_empty() && !ready.is_empty() {
            warn!("{} has {} item(s) but no destinations", channel.name, ready.len());
        }
        report.delivery = self.fanout.deliver_all(&channel.name, &ready, &routes).await;

        report
    }

    /// Poll every enabled channel once, staggered across the spread window.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let channels = self.registry.channels().await;
        let offsets = spread_offsets(channels.len(), self.config.schedule.spread_window);

        info!("Starting poll cycle over {} channels", channels.len());

        let polls = channels.iter().zip(offsets).map(|(channel, offset)| async move {
            tokio::time::sleep(offset).await;
            self.poll_channel(channel).await
        });
        let reports = join_all(polls).await;

        let cycle = CycleReport {
            started_at,
            finished_at: Utc::now(),
            channels: reports,
        };
        info!(
            "Poll cycle finished: {} delivered, {} rejected",
            cycle.delivered(),
            cycle.rejected()
        );
        cycle
    }

    /// Drain the summary buffers and send each new digest to the admin destination.
    pub async fn drain_summaries(&self) -> DrainReport {
        let report = self.batcher.drain().await;
        let Some(route) = &self.admin else {
            return report;
        };

        for digest in &report.digests {
            let payload = Payload::Text {
                body: digest.announcement(),
            };
            match self.fanout.deliver_paced(route, &payload).await {
                DeliveryOutcome::Delivered { .. } => {
                    debug!("Sent the {} digest to {}", digest.channel, route.label())
                }
                DeliveryOutcome::Dropped { reason, .. } | DeliveryOutcome::Rejected { reason } => {
                    error!("Digest of {} not sent to {}: {}", digest.channel, route.label(), reason)
                }
            }
        }
        report
    }

    pub async fn clear_summaries(&self) -> Result<usize> {
        let cleared = self.batcher.clear().await?;
        info!("Daily reset cleared {} summaries", cleared);
        Ok(cleared)
    }

    /// Run the poll, drain and daily-reset schedules until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<()> {
        let poll_interval = self.config.schedule.poll_interval;
        let summary_interval = self.config.schedule.summary_interval;
        let reset_hour = self.config.schedule.summary_reset_hour;

        let poller = {
            let pipeline = self.clone();
            tokio::spawn(async move {
                scheduler::every("poll", Instant::now(), poll_interval, || {
                    let pipeline = pipeline.clone();
                    async move {
                        pipeline.run_cycle().await;
                    }
                })
                .await
            })
        };

        let drainer = {
            let pipeline = self.clone();
            let start = Instant::now() + summary_interval;
            tokio::spawn(async move {
                scheduler::every("summary", start, summary_interval, || {
                    let pipeline = pipeline.clone();
                    async move {
                        pipeline.drain_summaries().await;
                    }
                })
                .await
            })
        };

        let resetter = {
            let pipeline = self.clone();
            tokio::spawn(async move {
                scheduler::daily("summary-reset", reset_hour, || {
                    let pipeline = pipeline.clone();
                    async move {
                        if let Err(e) = pipeline.clear_summaries().await {
                            error!("Daily summary reset failed: {}", e);
                        }
                    }
                })
                .await
            })
        };

        info!("Relay running");
        shutdown.await;
        info!("Shutting down relay");

        poller.abort();
        drainer.abort();
        resetter.abort();
        Ok(())
    }

    /// Durable write with bounded retries; the caller must not proceed on error.
    async fn persist_position(&self, channel: &str, position: ItemId) -> Result<()> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: self.config.persist_retry_delay,
            initial_interval: self.config.persist_retry_delay,
            max_interval: self.config.persist_retry_delay * 16,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let attempts = self.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self.positions.set(channel, position).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.config.persist_retry_delay);
                    warn!(
                        "Persisting position {} for {} failed (attempt {}), retrying in {:?}: {}",
                        position, channel, attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => error!("Persisting position {} for {} failed: {}", position, channel, e),
            }
        }

        Err(RelayError::PersistExhausted {
            channel: channel.to_string(),
            attempts,
        })
    }

    async fn handle_invalid_channel(&self, channel: &Channel) {
        if !self.config.prune_invalid_channels {
            error!("Channel {} does not exist; remove it from the groups document", channel.name);
            return;
        }
        for group in &channel.groups {
            if let Err(e) = self.registry.remove_channel(group, &channel.name).await {
                error!("Could not remove invalid channel {} from {}: {}", channel.name, group, e);
            }
        }
    }

    /// Destinations of every group the channel is in, each one once.
    async fn routes_for(&self, channel: &Channel) -> Vec<Route> {
        let mut seen = HashSet::new();
        let mut routes = Vec::new();
        for group in &channel.groups {
            for destination in self.registry.destinations(group).await {
                if !seen.insert(destination.clone()) {
                    debug!("{} reaches {:?} through more than one group", channel.name, destination);
                    continue;
                }
                if let Some(transport) = self.transports.get(&destination.transport) {
                    routes.push(Route::new(transport.clone(), destination.target));
                }
            }
        }
        routes
    }
}

/// Group name reported when the admin destination names an unknown transport.
const ADMIN_GROUP: &str = "admin";

/// Assembles a [`RelayPipeline`] from its collaborators.
pub struct PipelineBuilder {
    config: RelayConfig,
    fetcher: Option<Arc<dyn ChannelFetcher>>,
    translator: Arc<dyn Translator>,
    summarizer: Arc<dyn Summarizer>,
    transports: HashMap<String, Arc<dyn Transport>>,
    state_store: Option<Arc<dyn DocumentStore>>,
    config_store: Option<Arc<dyn DocumentStore>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            fetcher: None,
            translator: Arc::new(PassthroughTranslator),
            summarizer: Arc::new(EmptySummarizer),
            transports: HashMap::new(),
            state_store: None,
            config_store: None,
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ChannelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Register a transport under its own name; groups refer to it by that name.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        info!("Adding transport: {}", transport.name());
        self.transports.insert(transport.name().to_string(), transport);
        self
    }

    /// Store for positions, pending buffers and summaries.
    pub fn state_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Store holding the groups document. Defaults to the state store.
    pub fn config_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub async fn build(self) -> Result<RelayPipeline> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| RelayError::Config("a channel fetcher is required".to_string()))?;
        let state_store = self
            .state_store
            .ok_or_else(|| RelayError::Config("a state store is required".to_string()))?;
        let config_store = self.config_store.unwrap_or_else(|| state_store.clone());

        let registry = ChannelRegistry::load(config_store).await?;
        for group in registry.groups().await {
            for destination in &group.destinations {
                if !self.transports.contains_key(&destination.transport) {
                    return Err(RelayError::UnknownTransport {
                        group: group.name.clone(),
                        transport: destination.transport.clone(),
                    });
                }
            }
        }

        let admin = match &self.config.summary.admin {
            Some(destination) => {
                let transport = self.transports.get(&destination.transport).ok_or_else(|| {
                    RelayError::UnknownTransport {
                        group: ADMIN_GROUP.to_string(),
                        transport: destination.transport.clone(),
                    }
                })?;
                Some(Route::new(transport.clone(), destination.target.clone()))
            }
            None => None,
        };

        let positions = PositionStore::open(state_store.clone()).await?;
        let batcher = SummaryBatcher::open(state_store, self.summarizer, self.config.summary.clone()).await?;

        Ok(RelayPipeline {
            transformer: ItemTransformer::new(self.translator, self.config.skip_on_rate_limit),
            fanout: FanOut::new(self.config.delivery.clone()),
            config: self.config,
            fetcher,
            transports: self.transports,
            positions,
            registry,
            batcher,
            admin,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
