//! Resume positions for subscribe batches.

use tracing::debug;

use crate::StreamResult;
use crate::channel::{MessageIds, SubscribeMessage};
use crate::replay::ReplayCursorStore;

/// Builds subscribe batches, resuming each channel from its stored cursor.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionReconciler {
    cursors: Option<ReplayCursorStore>,
}

impl SubscriptionReconciler {
    /// Create a reconciler. Without a cursor store every channel subscribes
    /// live.
    #[must_use]
    pub const fn new(cursors: Option<ReplayCursorStore>) -> Self {
        Self { cursors }
    }

    /// Cursor store in use, if replay tracking is enabled.
    #[must_use]
    pub const fn cursors(&self) -> Option<&ReplayCursorStore> {
        self.cursors.as_ref()
    }

    /// One subscribe message per channel, in the order given.
    ///
    /// # Errors
    /// Returns the cursor store's failure; nothing is subscribed then.
    pub async fn reconcile<S: AsRef<str>>(
        &self,
        channels: &[S],
        client_id: &str,
        ids: &MessageIds,
    ) -> StreamResult<Vec<SubscribeMessage>> {
        let mut batch = Vec::with_capacity(channels.len());
        for channel in channels {
            let channel = channel.as_ref();
            let replay_id = match &self.cursors {
                Some(cursors) => cursors.get(channel).await?,
                None => None,
            };

            let message = SubscribeMessage::new(ids.next_id(), client_id, channel);
            let message = match replay_id {
                Some(replay_id) => message.with_replay(replay_id),
                None => message,
            };
            debug!(channel, replay_id, id = message.id, "Composed subscribe request");
            batch.push(message);
        }
        Ok(batch)
    }
}
