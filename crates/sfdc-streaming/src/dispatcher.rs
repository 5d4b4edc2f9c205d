//! Delivery of inbound events to application handlers.
//!
//! Each event is handled on its own task. The channel's replay cursor moves
//! to the event's replay id only after its handler returned `Ok`; a failed
//! event leaves the cursor where it was, so it is delivered again after a
//! resubscribe. Events of one channel may complete out of order, in which
//! case the cursor follows whichever completed last.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::replay::ReplayCursorStore;
use crate::{StreamError, StreamResult};

/// What a channel was registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationSource {
    /// A raw channel.
    Channel,
    /// A push topic.
    Topic {
        /// Topic name.
        name: String,
    },
    /// The topic following one sobject type.
    Sobject {
        /// Sobject type, e.g. `Contact`.
        sobject_type: String,
        /// Record type developer name, if narrowed to one.
        record_type: Option<String>,
    },
}

/// One inbound event with its delivery context.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Channel the event arrived on.
    pub channel: String,
    /// Registration the channel belongs to.
    pub source: NotificationSource,
    /// Raw data message.
    pub message: Value,
    /// Replay id of the event.
    pub replay_id: i64,
    /// Bayeux client id of the receiving transport.
    pub client_id: String,
}

impl Notification {
    /// The `sobject` of a push topic event, if present.
    #[must_use]
    pub fn sobject(&self) -> Option<&Value> {
        self.message.get("sobject")
    }
}

/// Application logic for one channel.
///
/// Handlers must tolerate duplicates: an event whose handling failed, or
/// was still running when the process stopped, is delivered again.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Process one event.
    async fn handle(&self, notification: Notification) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Notification) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, notification: Notification) -> Result<(), HandlerError> {
        self(notification).await
    }
}

/// Result of one dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler succeeded.
    Handled {
        /// Replay id of the event.
        replay_id: i64,
        /// Whether the cursor was written.
        cursor_advanced: bool,
    },
    /// The handler failed; the cursor was left untouched.
    Failed {
        /// Replay id of the event.
        replay_id: i64,
        /// Handler error message.
        error: String,
    },
}

#[derive(Clone)]
struct Route {
    source: NotificationSource,
    handler: Arc<dyn NotificationHandler>,
}

/// Routes events to handlers and advances cursors on success.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    routes: Arc<HashMap<String, Route>>,
    cursors: Option<ReplayCursorStore>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.routes.keys().collect();
        channels.sort();
        f.debug_struct("NotificationDispatcher")
            .field("channels", &channels)
            .field("cursors", &self.cursors)
            .finish()
    }
}

/// Builder for [`NotificationDispatcher`].
#[derive(Default)]
pub struct NotificationDispatcherBuilder {
    routes: HashMap<String, Route>,
    cursors: Option<ReplayCursorStore>,
}

impl NotificationDispatcherBuilder {
    /// Route `channel` to `handler`.
    ///
    /// # Errors
    /// Returns [`StreamError::Config`] if the channel is already routed.
    pub fn route(
        mut self,
        channel: impl Into<String>,
        source: NotificationSource,
        handler: Arc<dyn NotificationHandler>,
    ) -> StreamResult<Self> {
        let channel = channel.into();
        if self.routes.contains_key(&channel) {
            return Err(sfdc_api::ConfigError::Invalid(format!(
                "channel {channel} registered twice"
            ))
            .into());
        }
        self.routes.insert(channel, Route { source, handler });
        Ok(self)
    }

    /// Advance cursors in `cursors` after successful handling.
    #[must_use]
    pub fn cursors(mut self, cursors: Option<ReplayCursorStore>) -> Self {
        self.cursors = cursors;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> NotificationDispatcher {
        NotificationDispatcher {
            routes: Arc::new(self.routes),
            cursors: self.cursors,
        }
    }
}

/// Replay id of a data message (`event.replayId`).
///
/// # Errors
/// Returns [`StreamError::InvalidMessage`] if it is missing or not an integer.
pub fn extract_replay_id(message: &Value) -> StreamResult<i64> {
    message
        .get("event")
        .and_then(|event| event.get("replayId"))
        .and_then(Value::as_i64)
        .ok_or_else(|| StreamError::InvalidMessage("missing integer event.replayId".into()))
}

impl NotificationDispatcher {
    /// Start building a dispatcher.
    #[must_use]
    pub fn builder() -> NotificationDispatcherBuilder {
        NotificationDispatcherBuilder::default()
    }

    /// Whether `channel` has a handler.
    #[must_use]
    pub fn handles(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    /// Spawn handling of one event.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidMessage`] if the message has no replay
    /// id or arrived on a channel without a handler.
    pub fn dispatch(
        &self,
        channel: &str,
        message: Value,
        client_id: impl Into<String>,
    ) -> StreamResult<JoinHandle<DispatchOutcome>> {
        let route = self
            .routes
            .get(channel)
            .cloned()
            .ok_or_else(|| StreamError::InvalidMessage(format!("no handler for channel {channel}")))?;
        let replay_id = extract_replay_id(&message)?;
        let notification = Notification {
            channel: channel.to_string(),
            source: route.source,
            message,
            replay_id,
            client_id: client_id.into(),
        };
        let cursors = self.cursors.clone();

        debug!(channel, replay_id, "Dispatching notification");
        Ok(tokio::spawn(run(route.handler, notification, cursors)))
    }
}

async fn run(
    handler: Arc<dyn NotificationHandler>,
    notification: Notification,
    cursors: Option<ReplayCursorStore>,
) -> DispatchOutcome {
    let channel = notification.channel.clone();
    let replay_id = notification.replay_id;

    if let Err(err) = handler.handle(notification).await {
        warn!(channel = %channel, replay_id, error = %err, "Notification handling failed, cursor not advanced");
        return DispatchOutcome::Failed {
            replay_id,
            error: err.to_string(),
        };
    }

    let cursor_advanced = match &cursors {
        Some(cursors) => match cursors.set(&channel, replay_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(channel = %channel, replay_id, error = %err, "Failed to persist replay cursor");
                false
            }
        },
        None => false,
    };
    debug!(channel = %channel, replay_id, cursor_advanced, "Notification handled");
    DispatchOutcome::Handled {
        replay_id,
        cursor_advanced,
    }
}
