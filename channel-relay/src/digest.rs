use crate::types::{DocumentStore, ItemId, Result, SummarizeError, Summarizer, SummaryConfig};
use chrono::{DateTime, Utc};
use interfaces::state::{load_document, save_document};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PENDING_KEY: &str = "pending";
pub const SUMMARIES_KEY: &str = "summaries";

/// A delivered item waiting to be summarized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedItem {
    pub entry_id: Uuid,
    pub item_id: ItemId,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub id: Uuid,
    pub channel: String,
    pub text: String,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
}

impl SummaryEntry {
    /// The digest as sent to the admin destination.
    pub fn announcement(&self) -> String {
        format!(
            "*Channel:* {}\n*Total messages:* {}\n\n{}",
            self.channel, self.item_count, self.text
        )
    }
}

/// Digests produced since the last daily reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub entries: Vec<SummaryEntry>,
    pub cleared_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub summarized: Vec<String>,
    pub failed: Vec<String>,
    /// Digests accepted by this drain, in channel order.
    pub digests: Vec<SummaryEntry>,
}

/// Per-channel buffers of delivered items, drained into digests on their own cadence.
pub struct SummaryBatcher {
    store: Arc<dyn DocumentStore>,
    summarizer: Arc<dyn Summarizer>,
    config: SummaryConfig,
    pending: Mutex<BTreeMap<String, Vec<BufferedItem>>>,
    record: Mutex<SummaryRecord>,
}

impl SummaryBatcher {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        summarizer: Arc<dyn Summarizer>,
        config: SummaryConfig,
    ) -> Result<Self> {
        let pending: BTreeMap<String, Vec<BufferedItem>> = load_document(store.as_ref(), PENDING_KEY)
            .await?
            .unwrap_or_default();
        let record: SummaryRecord = load_document(store.as_ref(), SUMMARIES_KEY)
            .await?
            .unwrap_or_default();

        Ok(Self {
            store,
            summarizer,
            config,
            pending: Mutex::new(pending),
            record: Mutex::new(record),
        })
    }

    /// Buffer one item for `channel`, evicting the oldest beyond the cap.
    pub async fn append(&self, channel: &str, item_id: ItemId, text: &str) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let mut next = pending.clone();
        let buffer = next.entry(channel.to_string()).or_default();

        buffer.push(BufferedItem {
            entry_id: Uuid::new_v4(),
            item_id,
            text: text.to_string(),
            captured_at: Utc::now(),
        });

        let cap = self.config.max_buffered_items.max(1);
        if buffer.len() > cap {
            let evicted = buffer.len() - cap;
            buffer.drain(..evicted);
            warn!("Summary buffer for {} is full, dropped {} oldest item(s)", channel, evicted);
        }

        save_document(self.store.as_ref(), PENDING_KEY, &next).await?;
        *pending = next;
        Ok(())
    }

    pub async fn pending(&self, channel: &str) -> Vec<BufferedItem> {
        self.pending.lock().await.get(channel).cloned().unwrap_or_default()
    }

    /// Summarize every non-empty buffer. A failed channel keeps its buffer for next time.
    pub async fn drain(&self) -> DrainReport {
        let snapshot: Vec<(String, Vec<BufferedItem>)> = {
            let pending = self.pending.lock().await;
            pending
                .iter()
                .filter(|(_, buffer)| !buffer.is_empty())
                .map(|(channel, buffer)| (channel.clone(), buffer.clone()))
                .collect()
        };

        let mut report = DrainReport::default();
        for (channel, batch) in snapshot {
            match self.drain_channel(&channel, &batch).await {
                Ok(entry) => {
                    report.summarized.push(channel);
                    report.digests.push(entry);
                }
                Err(e) => {
                    warn!("Summary for {} deferred: {}", channel, e);
                    report.failed.push(channel);
                }
            }
        }
        report
    }

    async fn drain_channel(&self, channel: &str, batch: &[BufferedItem]) -> Result<SummaryEntry> {
        let texts: Vec<String> = batch.iter().map(|entry| entry.text.clone()).collect();
        let digest = self
            .summarizer
            .summarize(&texts, self.config.prompt.as_deref())
            .await?;

        if digest.trim().is_empty() {
            return Err(SummarizeError::Empty.into());
        }

        // Only the summarized entries leave the buffer; items appended meanwhile stay
        let drained: HashSet<Uuid> = batch.iter().map(|entry| entry.entry_id).collect();
        {
            let mut pending = self.pending.lock().await;
            let mut next = pending.clone();
            if let Some(buffer) = next.get_mut(channel) {
                buffer.retain(|entry| !drained.contains(&entry.entry_id));
                if buffer.is_empty() {
                    next.remove(channel);
                }
            }
            save_document(self.store.as_ref(), PENDING_KEY, &next).await?;
            *pending = next;
        }

        let entry = SummaryEntry {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            text: digest,
            item_count: batch.len(),
            created_at: Utc::now(),
        };
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        next.entries.push(entry.clone());
        save_document(self.store.as_ref(), SUMMARIES_KEY, &next).await?;
        *record = next;

        info!("Summarized {} buffered item(s) for {}", batch.len(), channel);
        Ok(entry)
    }

    /// Daily reset of the retained digests. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let mut record = self.record.lock().await;
        let cleared = record.entries.len();
        let next = SummaryRecord {
            entries: Vec::new(),
            cleared_at: Some(Utc::now()),
        };
        save_document(self.store.as_ref(), SUMMARIES_KEY, &next).await?;
        *record = next;

        debug!("Cleared {} retained summaries", cleared);
        Ok(cleared)
    }

    pub async fn record(&self) -> SummaryRecord {
        self.record.lock().await.clone()
    }
}
