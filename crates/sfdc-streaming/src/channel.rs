//! Bayeux subscribe messages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Meta channel used for subscription requests.
pub const META_SUBSCRIBE: &str = "/meta/subscribe";

/// Channel of a push topic.
#[must_use]
pub fn topic_channel(name: &str) -> String {
    format!("/topic/{name}")
}

/// Replay extension of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayExtension {
    /// Channel to replay id to resume after.
    pub replay: BTreeMap<String, i64>,
}

/// One entry of a subscribe batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMessage {
    /// Message id, unique per client.
    pub id: u64,
    /// Bayeux client id assigned on handshake.
    pub client_id: String,
    /// Always [`META_SUBSCRIBE`].
    pub channel: String,
    /// Channel subscribed to.
    pub subscription: String,
    /// Resume position, present only when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<ReplayExtension>,
}

impl SubscribeMessage {
    /// Subscribe to `subscription` from the live position.
    #[must_use]
    pub fn new(id: u64, client_id: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            channel: META_SUBSCRIBE.to_string(),
            subscription: subscription.into(),
            ext: None,
        }
    }

    /// Resume after `replay_id` instead of subscribing live.
    #[must_use]
    pub fn with_replay(mut self, replay_id: i64) -> Self {
        let mut replay = BTreeMap::new();
        replay.insert(self.subscription.clone(), replay_id);
        self.ext = Some(ReplayExtension { replay });
        self
    }

    /// Resume position carried by this request.
    #[must_use]
    pub fn replay_id(&self) -> Option<i64> {
        self.ext
            .as_ref()
            .and_then(|ext| ext.replay.get(&self.subscription).copied())
    }
}

/// Source of outbound Bayeux message ids.
#[derive(Debug)]
pub struct MessageIds {
    next: AtomicU64,
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl MessageIds {
    /// Ids starting at `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
