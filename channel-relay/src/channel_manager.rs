use crate::types::{Channel, Destination, DocumentStore, Result};
use interfaces::state::{load_document, save_document};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const GROUPS_KEY: &str = "groups";

/// A channel listed by a group: a bare name, or a name with an enabled flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
}

impl ChannelEntry {
    pub fn name(&self) -> &str {
        match self {
            ChannelEntry::Name(name) => name,
            ChannelEntry::Detailed { name, .. } => name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            ChannelEntry::Name(_) => true,
            ChannelEntry::Detailed { enabled, .. } => *enabled,
        }
    }

    fn normalized(&self) -> Self {
        match self {
            ChannelEntry::Name(name) => ChannelEntry::Name(name.trim().to_lowercase()),
            ChannelEntry::Detailed { name, enabled } => ChannelEntry::Detailed {
                name: name.trim().to_lowercase(),
                enabled: *enabled,
            },
        }
    }
}

/// Destinations that receive everything posted on the group's channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// The configured groups and their channels, persisted as one document.
pub struct ChannelRegistry {
    store: Arc<dyn DocumentStore>,
    groups: RwLock<Vec<Group>>,
}

impl ChannelRegistry {
    /// Load the groups document, case-fold every channel name and write it back.
    pub async fn load(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let mut groups: Vec<Group> = load_document(store.as_ref(), GROUPS_KEY)
            .await?
            .unwrap_or_default();

        for group in groups.iter_mut() {
            group.channels = group.channels.iter().map(ChannelEntry::normalized).collect();
            if group.destinations.is_empty() {
                warn!("Group {} has no destinations; its channels are tracked but not delivered", group.name);
            }
        }
        save_document(store.as_ref(), GROUPS_KEY, &groups).await?;

        if groups.is_empty() {
            warn!("No groups configured");
        } else {
            info!("Loaded {} groups", groups.len());
        }

        Ok(Self {
            store,
            groups: RwLock::new(groups),
        })
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.groups.read().await.clone()
    }

    /// Enabled channels in declaration order, each listed once with every group it belongs to.
    pub async fn channels(&self) -> Vec<Channel> {
        let groups = self.groups.read().await;
        let mut channels: Vec<Channel> = Vec::new();

        for group in groups.iter().filter(|group| group.enabled) {
            for entry in group.channels.iter().filter(|entry| entry.enabled()) {
                match channels.iter_mut().find(|channel| channel.name == entry.name()) {
                    Some(channel) => {
                        if !channel.groups.contains(&group.name) {
                            channel.groups.push(group.name.clone());
                        }
                    }
                    None => channels.push(Channel {
                        name: entry.name().to_string(),
                        groups: vec![group.name.clone()],
                        enabled: true,
                    }),
                }
            }
        }

        channels
    }

    pub async fn destinations(&self, group: &str) -> Vec<Destination> {
        let groups = self.groups.read().await;
        groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.destinations.clone())
            .unwrap_or_default()
    }

    /// Drop a channel proven invalid from `group`. Returns whether anything changed.
    pub async fn remove_channel(&self, group: &str, channel: &str) -> Result<bool> {
        let mut groups = self.groups.write().await;
        let mut next = groups.clone();

        let Some(target) = next.iter_mut().find(|g| g.name == group) else {
            return Ok(false);
        };
        let before = target.channels.len();
        target.channels.retain(|entry| entry.name() != channel);
        if target.channels.len() == before {
            return Ok(false);
        }

        save_document(self.store.as_ref(), GROUPS_KEY, &next).await?;
        *groups = next;

        warn!("Removed invalid channel {} from group {}", channel, group);
        Ok(true)
    }
}
