//! Decides which items of a poll are new relative to the stored position.
//!
//! Identifiers are compared numerically; "newest" always means the highest
//! identifier, never the last list position.

use crate::types::{Item, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The stored position is above everything the channel still shows.
    Rewound,
    /// The stored position fell out of the returned window.
    Pruned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Nothing to deliver and nothing to store.
    NoOp,
    /// First contact: only the newest item is delivered.
    FirstSeen { item: Item },
    /// Items published after the stored position, oldest first.
    Incremental { items: Vec<Item> },
    /// History no longer contains the anchor: resynchronize, deliver nothing.
    Stale {
        previous: ItemId,
        newest: ItemId,
        reason: StaleReason,
    },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::NoOp => "no_op",
            Classification::FirstSeen { .. } => "first_seen",
            Classification::Incremental { .. } => "incremental",
            Classification::Stale { .. } => "stale",
        }
    }

    /// Position to persist before anything is delivered.
    pub fn new_position(&self) -> Option<ItemId> {
        match self {
            Classification::NoOp => None,
            Classification::FirstSeen { item } => Some(item.id),
            Classification::Incremental { items } => items.last().map(|item| item.id),
            Classification::Stale { newest, .. } => Some(*newest),
        }
    }

    pub fn into_deliverables(self) -> Vec<Item> {
        match self {
            Classification::FirstSeen { item } => vec![item],
            Classification::Incremental { items } => items,
            Classification::NoOp | Classification::Stale { .. } => Vec::new(),
        }
    }
}

pub fn classify(position: Option<ItemId>, items: &[Item]) -> Classification {
    let Some(newest) = items.iter().max_by_key(|item| item.id) else {
        return Classification::NoOp;
    };

    let Some(previous) = position else {
        return Classification::FirstSeen { item: newest.clone() };
    };

    match items.iter().position(|item| item.id == previous) {
        Some(index) => {
            let mut fresh: Vec<Item> = items[index + 1..]
                .iter()
                .filter(|item| item.id > previous)
                .cloned()
                .collect();
            if fresh.is_empty() {
                return Classification::NoOp;
            }
            fresh.sort_by_key(|item| item.id);
            Classification::Incremental { items: fresh }
        }
        None => {
            let reason = if previous > newest.id {
                StaleReason::Rewound
            } else {
                StaleReason::Pruned
            };
            Classification::Stale {
                previous,
                newest: newest.id,
                reason,
            }
        }
    }
}
