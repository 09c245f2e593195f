use crate::types::{Item, ItemKind, Payload, Translator};
use crate::utils::chunk_text;
use interfaces::defs::{is_rate_limited, is_translation_failure};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest piece of text handed to the translator in one call.
pub const MAX_CHUNK_CHARS: usize = 1000;

/// Stands in for a chunk the translator could not handle; the source text follows it.
pub const TRANSLATION_FAILED_MARKER: &str = "[translation failed]";

/// An item ready for fan-out.
#[derive(Debug, Clone)]
pub struct TransformedItem {
    pub item: Item,
    pub text: String,
    pub payload: Payload,
    pub failed_chunks: usize,
    pub rate_limited: bool,
}

#[derive(Debug, Clone)]
pub enum TransformOutcome {
    Ready(TransformedItem),
    /// Seen but not delivered; the position still moves past it.
    Skipped { item: Item, reason: String },
}

/// Translates and formats one new item at a time.
pub struct ItemTransformer {
    translator: Arc<dyn Translator>,
    skip_on_rate_limit: bool,
}

impl ItemTransformer {
    pub fn new(translator: Arc<dyn Translator>, skip_on_rate_limit: bool) -> Self {
        Self {
            translator,
            skip_on_rate_limit,
        }
    }

    /// `text` keeps the translated body; the payload carries it under the channel heading.
    pub async fn transform(&self, channel: &str, item: Item) -> TransformOutcome {
        let mut text = String::new();
        let mut failed_chunks = 0;
        let mut rate_limited = false;

        for chunk in chunk_text(item.body(), MAX_CHUNK_CHARS) {
            let translated = self.translator.translate(chunk).await;
            if is_translation_failure(&translated) {
                failed_chunks += 1;
                rate_limited |= is_rate_limited(&translated);
                debug!("Translation failed for a chunk of item {}: {}", item.id, translated);
                text.push_str(TRANSLATION_FAILED_MARKER);
                text.push(' ');
                text.push_str(chunk);
            } else {
                text.push_str(&translated);
            }
        }

        if rate_limited && self.skip_on_rate_limit {
            warn!("Skipping item {}: translator is rate limited", item.id);
            return TransformOutcome::Skipped {
                item,
                reason: "translator rate limited".to_string(),
            };
        }

        if failed_chunks > 0 {
            warn!("Item {} delivered with {} untranslated chunk(s)", item.id, failed_chunks);
        }

        let formatted = match item.kind {
            ItemKind::Text if text.trim().is_empty() => String::new(),
            _ => headed(channel, &text),
        };
        let payload = build_payload(&item, formatted);
        TransformOutcome::Ready(TransformedItem {
            item,
            text,
            payload,
            failed_chunks,
            rate_limited,
        })
    }
}

/// `*channel*`, followed by the text when there is any.
pub fn headed(channel: &str, text: &str) -> String {
    if text.trim().is_empty() {
        format!("*{channel}*")
    } else {
        format!("*{channel}*\n\n{text}")
    }
}

pub fn build_payload(item: &Item, text: String) -> Payload {
    let caption = if text.trim().is_empty() { None } else { Some(text.clone()) };
    let url = item.media_url.clone().unwrap_or_default();
    match item.kind {
        ItemKind::Text => Payload::Text { body: text },
        ItemKind::Image => Payload::Image { url, caption },
        ItemKind::Video => Payload::Video { url, caption },
    }
}
