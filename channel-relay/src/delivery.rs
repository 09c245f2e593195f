use crate::processing::TransformedItem;
use crate::types::{DeliveryConfig, ItemId, Payload, Transport, TransportError};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// A resolved destination: the transport instance plus its target.
#[derive(Clone)]
pub struct Route {
    pub transport: Arc<dyn Transport>,
    pub target: String,
}

impl Route {
    pub fn new(transport: Arc<dyn Transport>, target: impl Into<String>) -> Self {
        Self {
            transport,
            target: target.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.transport.name(), self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Recoverable failures outlasted the retry budget.
    Dropped { attempts: u32, reason: String },
    /// Fatal failure (malformed payload, bad target); never retried.
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub route: String,
    pub item_id: ItemId,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub records: Vec<DeliveryRecord>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::Delivered { .. }))
    }

    pub fn dropped(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::Dropped { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::Rejected { .. }))
    }

    fn count(&self, predicate: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.records.iter().filter(|record| predicate(&record.outcome)).count()
    }
}

/// Last delivery to one destination. Holding the lock serializes senders.
type Gate = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Sends a channel's new items to every route of that channel.
///
/// Routes run concurrently and independently; within one route items go out
/// oldest first. Deliveries to the same destination are at least `pacing`
/// apart, whichever channel they come from.
pub struct FanOut {
    config: DeliveryConfig,
    gates: Mutex<HashMap<String, Gate>>,
}

impl FanOut {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, label: &str) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(label.to_string()).or_default().clone()
    }

    /// [`Self::deliver_with_retry`] behind the destination's pacing gate.
    pub async fn deliver_paced(&self, route: &Route, payload: &Payload) -> DeliveryOutcome {
        let gate = self.gate(&route.label());
        let mut last = gate.lock().await;
        if let Some(at) = *last {
            tokio::time::sleep_until(at + self.config.pacing).await;
        }

        let outcome = self.deliver_with_retry(route, payload).await;
        *last = Some(Instant::now());
        outcome
    }

    pub async fn deliver_all(&self, channel: &str, items: &[TransformedItem], routes: &[Route]) -> DeliveryReport {
        if items.is_empty() {
            return DeliveryReport::default();
        }

        let per_route = join_all(routes.iter().map(|route| self.deliver_route(channel, items, route))).await;

        DeliveryReport {
            records: per_route.into_iter().flatten().collect(),
        }
    }

    async fn deliver_route(&self, channel: &str, items: &[TransformedItem], route: &Route) -> Vec<DeliveryRecord> {
        let label = route.label();
        let mut records = Vec::with_capacity(items.len());

        for transformed in items {
            debug!("Delivering {} item {} to {}", channel, transformed.item.id, label);
            let outcome = self.deliver_paced(route, &transformed.payload).await;
            match &outcome {
                DeliveryOutcome::Delivered { .. } => {}
                DeliveryOutcome::Dropped { attempts, reason } => error!(
                    "Dropped {} item {} for {} after {} attempts: {}",
                    channel, transformed.item.id, label, attempts, reason
                ),
                DeliveryOutcome::Rejected { reason } => error!(
                    "Rejected {} item {} for {}: {}",
                    channel, transformed.item.id, label, reason
                ),
            }

            records.push(DeliveryRecord {
                route: label.clone(),
                item_id: transformed.item.id,
                outcome,
            });
        }

        records
    }

    /// Bounded retry loop: recoverable failures back off exponentially,
    /// fatal ones return immediately.
    pub async fn deliver_with_retry(&self, route: &Route, payload: &Payload) -> DeliveryOutcome {
        if let Err(e) = payload.validate() {
            return DeliveryOutcome::Rejected { reason: e.to_string() };
        }

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: self.config.retry_delay,
            initial_interval: self.config.retry_delay,
            max_interval: self.config.retry_delay * 8,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match route.transport.deliver(&route.target, payload).await {
                Ok(()) => return DeliveryOutcome::Delivered { attempts },
                Err(TransportError::Fatal(reason)) => return DeliveryOutcome::Rejected { reason },
                Err(TransportError::Recoverable(reason)) => {
                    if attempts >= max_attempts {
                        return DeliveryOutcome::Dropped { attempts, reason };
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.config.retry_delay);
                    warn!(
                        "Attempt {} to {} failed ({}), retrying in {:?}",
                        attempts,
                        route.label(),
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
