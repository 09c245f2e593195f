use anyhow::{Context, Result};
use channel_relay::{
    DeliveryConfig, Destination, FetchConfig, HttpChannelFetcher, HttpTranslator, LlmConfig, OpenAiSummarizer,
    PipelineBuilder, PositionStore, RelayConfig, ScheduleConfig, SummaryBatcher, SummaryConfig,
    TelegramTransport, TranslatorConfig, WebhookTransport,
};
use clap::{Parser, Subcommand, ValueEnum};
use interfaces::{
    BaselineSummarizer, DocumentStore, EmptySummarizer, JsonFileStore, PassthroughTranslator,
    SqliteDocumentStore, Summarizer, Translator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    Json,
    Sqlite,
}

/// Relays new posts from public channels to messaging destinations.
#[derive(Parser, Debug)]
#[command(name = "channel-relay")]
#[command(version)]
struct Args {
    /// Directory holding groups.json and the state documents
    #[arg(long, default_value = "./data", env = "RELAY_DATA_DIR")]
    data_dir: PathBuf,

    /// Backend for positions, pending buffers and summaries
    #[arg(long, value_enum, default_value = "json", env = "RELAY_STORE")]
    store: StoreBackend,

    /// Channel history endpoint; `{channel}` is replaced by the channel name
    #[arg(long, default_value = "https://weeb-api.vercel.app/telegram/{channel}", env = "RELAY_FETCH_URL")]
    fetch_url: String,

    /// LibreTranslate-compatible endpoint. Text is relayed untranslated when unset
    #[arg(long, env = "RELAY_TRANSLATE_URL")]
    translate_url: Option<String>,

    #[arg(long, env = "RELAY_TRANSLATE_KEY")]
    translate_key: Option<String>,

    #[arg(long, default_value = "he", env = "RELAY_TARGET_LANG")]
    target_lang: String,

    /// Drop items whose translation was rate limited
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "SKIP")]
    skip: bool,

    /// Key for the OpenAI-compatible summary model. The offline summarizer is used when unset
    #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    #[arg(long, default_value = "gpt-4o-mini", env = "RELAY_SUMMARY_MODEL")]
    summary_model: String,

    #[arg(long, env = "RELAY_SUMMARY_PROMPT")]
    summary_prompt: Option<String>,

    /// Destination for digests, as `transport:target` (e.g. `telegram:-1001234`)
    #[arg(long, env = "ADMIN", value_parser = parse_destination)]
    admin: Option<Destination>,

    #[arg(long, default_value_t = 1200, env = "RELAY_POLL_INTERVAL_SECS")]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 600, env = "RELAY_SPREAD_WINDOW_SECS")]
    spread_window_secs: u64,

    /// Minimum gap between two deliveries to the same destination
    #[arg(long, default_value_t = 2000, env = "RELAY_PACING_MS")]
    pacing_ms: u64,

    #[arg(long, default_value_t = 3, env = "RELAY_DELIVERY_ATTEMPTS")]
    delivery_attempts: u32,

    #[arg(long, default_value_t = 1800, env = "RELAY_SUMMARY_INTERVAL_SECS")]
    summary_interval_secs: u64,

    #[arg(long, default_value_t = 50, env = "RELAY_SUMMARY_CAP")]
    summary_cap: usize,

    /// UTC hour at which retained summaries are cleared
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..24), env = "RELAY_SUMMARY_RESET_HOUR")]
    summary_reset_hour: u32,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    #[arg(long, env = "RELAY_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Remove channels that no longer exist from the groups document
    #[arg(long, default_value_t = false, env = "RELAY_PRUNE_INVALID")]
    prune_invalid: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the poll, summary and reset schedules until interrupted (default)
    Run,
    /// Run a single poll cycle and one summary drain, then exit
    Once,
    /// Print the stored position of every channel
    Positions,
    /// Print the retained summaries
    Summaries,
    /// Forget a channel's position so its next poll starts fresh
    Reset { channel: String },
}

fn parse_destination(value: &str) -> std::result::Result<Destination, String> {
    match value.split_once(':') {
        Some((transport, target)) if !transport.trim().is_empty() && !target.trim().is_empty() => Ok(Destination {
            transport: transport.trim().to_string(),
            target: target.trim().to_string(),
        }),
        _ => Err(format!("expected transport:target, got '{value}'")),
    }
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            delivery: DeliveryConfig {
                pacing: Duration::from_millis(self.pacing_ms),
                max_attempts: self.delivery_attempts.max(1),
                ..Default::default()
            },
            schedule: ScheduleConfig {
                poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
                spread_window: Duration::from_secs(self.spread_window_secs),
                summary_interval: Duration::from_secs(self.summary_interval_secs.max(1)),
                summary_reset_hour: self.summary_reset_hour,
            },
            summary: SummaryConfig {
                max_buffered_items: self.summary_cap,
                prompt: self.summary_prompt.clone(),
                admin: self.admin.clone(),
            },
            skip_on_rate_limit: self.skip,
            prune_invalid_channels: self.prune_invalid,
            ..Default::default()
        }
    }

    async fn state_store(&self) -> Result<Arc<dyn DocumentStore>> {
        match self.store {
            StoreBackend::Json => Ok(Arc::new(JsonFileStore::new(&self.data_dir))),
            StoreBackend::Sqlite => {
                tokio::fs::create_dir_all(&self.data_dir)
                    .await
                    .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;
                let url = format!("sqlite://{}", self.data_dir.join("relay.db").display());
                let store = SqliteDocumentStore::connect(&url)
                    .await
                    .with_context(|| format!("Failed to open {}", url))?;
                Ok(Arc::new(store))
            }
        }
    }

    fn translator(&self) -> Result<Arc<dyn Translator>> {
        match &self.translate_url {
            Some(endpoint) => {
                let translator = HttpTranslator::new(TranslatorConfig {
                    endpoint: endpoint.clone(),
                    target_language: self.target_lang.clone(),
                    api_key: self.translate_key.clone(),
                    timeout_seconds: 30,
                })
                .context("Invalid translator configuration")?;
                info!("Translating to '{}' via {}", self.target_lang, endpoint);
                Ok(Arc::new(translator))
            }
            None => {
                info!("No translator configured, relaying text as-is");
                Ok(Arc::new(PassthroughTranslator))
            }
        }
    }

    fn summarizer(&self) -> Result<Arc<dyn Summarizer>> {
        match &self.openai_key {
            Some(key) => {
                let mut config = LlmConfig::new(key.clone());
                config.model = self.summary_model.clone();
                let summarizer = OpenAiSummarizer::new(config).context("Invalid summarizer configuration")?;
                info!("Summarizing with {}", self.summary_model);
                Ok(Arc::new(summarizer))
            }
            None => {
                info!("No LLM key configured, using the extractive summarizer");
                Ok(Arc::new(BaselineSummarizer))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "channel_relay=info,interfaces=info".into()),
        )
        .init();

    let args = Args::parse();
    let state_store = args.state_store().await?;

    match &args.command {
        Some(Command::Positions) => {
            let positions = PositionStore::open(state_store).await?;
            for (channel, id) in positions.snapshot().await {
                println!("{channel}\t{id}");
            }
            Ok(())
        }
        Some(Command::Summaries) => {
            let batcher =
                SummaryBatcher::open(state_store, Arc::new(EmptySummarizer), SummaryConfig::default()).await?;
            let record = batcher.record().await;
            if let Some(cleared_at) = record.cleared_at {
                println!("last cleared {}", cleared_at.to_rfc3339());
            }
            for entry in record.entries {
                println!(
                    "[{}] {} ({} posts)\n{}\n",
                    entry.created_at.to_rfc3339(),
                    entry.channel,
                    entry.item_count,
                    entry.text
                );
            }
            Ok(())
        }
        Some(Command::Reset { channel }) => {
            let positions = PositionStore::open(state_store).await?;
            let channel = channel.trim().to_lowercase();
            if positions.remove(&channel).await? {
                println!("reset {channel}");
            } else {
                warn!("No stored position for {}", channel);
            }
            Ok(())
        }
        Some(Command::Once) => {
            let pipeline = build_pipeline(&args, state_store).await?;
            let cycle = pipeline.run_cycle().await;
            for report in &cycle.channels {
                if let Some(e) = &report.error {
                    error!("{}: {}", report.channel, e);
                }
            }
            let drained = pipeline.drain_summaries().await;
            info!(
                "Delivered {} item(s), summarized {} channel(s)",
                cycle.delivered(),
                drained.summarized.len()
            );
            Ok(())
        }
        None | Some(Command::Run) => {
            let pipeline = Arc::new(build_pipeline(&args, state_store).await?);
            pipeline
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
            Ok(())
        }
    }
}

async fn build_pipeline(
    args: &Args,
    state_store: Arc<dyn DocumentStore>,
) -> Result<channel_relay::RelayPipeline> {
    let fetcher = HttpChannelFetcher::new(FetchConfig {
        url_template: args.fetch_url.clone(),
        ..Default::default()
    })
    .context("Invalid fetch URL template")?;

    let mut builder = PipelineBuilder::new()
        .config(args.relay_config())
        .fetcher(Arc::new(fetcher))
        .translator(args.translator()?)
        .summarizer(args.summarizer()?)
        .state_store(state_store)
        .config_store(Arc::new(JsonFileStore::new(&args.data_dir)));

    if let Some(token) = &args.telegram_token {
        builder = builder.transport(Arc::new(TelegramTransport::new(token)?));
    }
    if let Some(url) = &args.webhook_url {
        builder = builder.transport(Arc::new(
            WebhookTransport::new(url).with_context(|| format!("Invalid webhook URL {}", url))?,
        ));
    }

    builder
        .build()
        .await
        .context("Failed to assemble the relay; check groups.json against the configured transports")
}
