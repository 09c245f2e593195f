#![allow(dead_code)]

use async_trait::async_trait;
use channel_relay::{
    ChannelFetcher, DocumentStore, FetchError, Item, ItemId, Payload, PipelineBuilder, RelayConfig,
    RelayPipeline, Result, SummarizeError, Summarizer, Translator, Transport, TransportError,
};
use interfaces::defs::{RATE_LIMIT_MARKER, TRANSLATION_FAILURE_PREFIX};
use interfaces::MemoryStore;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn text_item(id: ItemId) -> Item {
    Item::text(id, &format!("post {id}"))
}

pub fn text_items(ids: &[ItemId]) -> Vec<Item> {
    ids.iter().copied().map(text_item).collect()
}

/// Text as delivered: the channel heading, then the translated body.
pub fn posted(channel: &str, text: &str) -> String {
    format!("*{channel}*\n\n{text}")
}

pub enum FetchScript {
    Items(Vec<Item>),
    Unavailable,
    NotFound,
}

/// Serves whatever history was last scripted for a channel.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, FetchScript>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_items(&self, channel: &str, items: Vec<Item>) {
        self.set(channel, FetchScript::Items(items));
    }

    pub fn set(&self, channel: &str, script: FetchScript) {
        self.responses.lock().unwrap().insert(channel.to_string(), script);
    }

    pub fn calls(&self, channel: &str) -> usize {
        self.calls.lock().unwrap().get(channel).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChannelFetcher for ScriptedFetcher {
    async fn fetch(&self, channel: &str) -> std::result::Result<Vec<Item>, FetchError> {
        *self.calls.lock().unwrap().entry(channel.to_string()).or_default() += 1;
        match self.responses.lock().unwrap().get(channel) {
            Some(FetchScript::Items(items)) => Ok(items.clone()),
            Some(FetchScript::NotFound) => Err(FetchError::NotFound {
                channel: channel.to_string(),
            }),
            Some(FetchScript::Unavailable) | None => Err(FetchError::Unavailable {
                channel: channel.to_string(),
                reason: "scripted outage".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub target: String,
    pub payload: Payload,
    pub at: Instant,
}

impl Sent {
    pub fn text(&self) -> String {
        match &self.payload {
            Payload::Text { body } => body.clone(),
            Payload::Image { caption, .. } | Payload::Video { caption, .. } => caption.clone().unwrap_or_default(),
        }
    }
}

/// Records every successful delivery and fails on demand, per target.
pub struct RecordingTransport {
    name: String,
    sent: Mutex<Vec<Sent>>,
    failures: Mutex<HashMap<String, VecDeque<TransportError>>>,
    always_fail: Mutex<HashMap<String, TransportError>>,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            always_fail: Mutex::new(HashMap::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    /// The next `count` deliveries to `target` fail with `error`.
    pub fn fail_next(&self, target: &str, count: usize, error: TransportError) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(target.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    pub fn fail_always(&self, target: &str, error: TransportError) {
        self.always_fail.lock().unwrap().insert(target.to_string(), error);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|sent| sent.target == target).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, target: &str, payload: &Payload) -> std::result::Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.always_fail.lock().unwrap().get(target) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        self.sent.lock().unwrap().push(Sent {
            target: target.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Prefixes text with the target language; texts containing a trigger word fail.
#[derive(Default)]
pub struct ScriptedTranslator {
    rate_limited_on: Mutex<Option<String>>,
    failing_on: Mutex<Option<String>>,
}

impl ScriptedTranslator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rate_limit_when(&self, trigger: &str) {
        *self.rate_limited_on.lock().unwrap() = Some(trigger.to_string());
    }

    pub fn fail_when(&self, trigger: &str) {
        *self.failing_on.lock().unwrap() = Some(trigger.to_string());
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str) -> String {
        let rate_limited = self.rate_limited_on.lock().unwrap().clone();
        if rate_limited.is_some_and(|trigger| text.contains(&trigger)) {
            return format!("{} {}", TRANSLATION_FAILURE_PREFIX, RATE_LIMIT_MARKER);
        }
        let failing = self.failing_on.lock().unwrap().clone();
        if failing.is_some_and(|trigger| text.contains(&trigger)) {
            return format!("{} service unavailable", TRANSLATION_FAILURE_PREFIX);
        }
        format!("[he] {text}")
    }
}

/// Joins its inputs into one line; can be switched into failure.
#[derive(Default)]
pub struct ScriptedSummarizer {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, texts: &[String], _prompt: Option<&str>) -> std::result::Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SummarizeError::Request("scripted failure".to_string()));
        }
        Ok(format!("digest: {}", texts.join(" | ")))
    }
}

/// One group named after the channel, delivering to `telegram:<target>`.
pub fn single_group(channel: &str, target: &str) -> Value {
    json!([{
        "name": format!("{channel}-group"),
        "destinations": [{ "transport": "telegram", "target": target }],
        "channels": [channel],
        "enabled": true
    }])
}

pub fn quick_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.delivery.pacing = Duration::from_millis(500);
    config.delivery.retry_delay = Duration::from_millis(100);
    config.schedule.spread_window = Duration::ZERO;
    config.persist_attempts = 3;
    config.persist_retry_delay = Duration::from_millis(10);
    config
}

pub struct Harness {
    pub pipeline: RelayPipeline,
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub transport: Arc<RecordingTransport>,
    pub translator: Arc<ScriptedTranslator>,
    pub summarizer: Arc<ScriptedSummarizer>,
}

impl Harness {
    pub async fn new(groups: Value) -> Result<Self> {
        Self::with_config(groups, quick_config()).await
    }

    pub async fn with_config(groups: Value, config: RelayConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        store.save("groups", &groups).await?;

        let fetcher = ScriptedFetcher::new();
        let transport = RecordingTransport::new("telegram");
        let translator = ScriptedTranslator::new();
        let summarizer = ScriptedSummarizer::new();

        let pipeline = PipelineBuilder::new()
            .config(config)
            .fetcher(fetcher.clone())
            .translator(translator.clone())
            .summarizer(summarizer.clone())
            .transport(transport.clone())
            .state_store(store.clone())
            .build()
            .await?;

        Ok(Self {
            pipeline,
            store,
            fetcher,
            transport,
            translator,
            summarizer,
        })
    }

    pub async fn poll(&self, channel: &str) -> channel_relay::ChannelReport {
        let channel = self
            .pipeline
            .registry()
            .channels()
            .await
            .into_iter()
            .find(|c| c.name == channel)
            .unwrap_or_else(|| panic!("channel {channel} is not configured"));
        self.pipeline.poll_channel(&channel).await
    }
}
