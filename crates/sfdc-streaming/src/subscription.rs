//! Channel registrations.

use std::sync::Arc;

use sfdc_api::TopicOptions;

use crate::channel::topic_channel;
use crate::dispatcher::{NotificationHandler, NotificationSource};

/// Topic to declare before subscribing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    /// Free-form push topic.
    Topic {
        /// Topic name.
        name: String,
        /// Topic query.
        query: String,
        /// Notification settings.
        options: TopicOptions,
    },
    /// Topic following one sobject type.
    Sobject {
        /// Sobject type.
        sobject_type: String,
        /// Record type developer name.
        record_type: Option<String>,
        /// Ignore changes made by the configured user.
        exclude_current_user: bool,
        /// Notification settings.
        options: TopicOptions,
    },
}

/// A channel to subscribe to and the handler for its events.
#[derive(Clone)]
pub struct ChannelSubscription {
    channel: String,
    source: NotificationSource,
    declaration: Option<Declaration>,
    handler: Arc<dyn NotificationHandler>,
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("channel", &self.channel)
            .field("source", &self.source)
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

impl ChannelSubscription {
    /// Subscribe to a raw channel; nothing is declared.
    pub fn channel(name: impl Into<String>, handler: impl NotificationHandler + 'static) -> Self {
        Self {
            channel: name.into(),
            source: NotificationSource::Channel,
            declaration: None,
            handler: Arc::new(handler),
        }
    }

    /// Subscribe to `/topic/<name>`, declaring the topic first when a query
    /// is given.
    pub fn topic(
        name: impl Into<String>,
        query: Option<&str>,
        options: TopicOptions,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        let name = name.into();
        Self {
            channel: topic_channel(&name),
            declaration: query.map(|query| Declaration::Topic {
                name: name.clone(),
                query: query.to_string(),
                options,
            }),
            source: NotificationSource::Topic { name },
            handler: Arc::new(handler),
        }
    }

    /// Subscribe to the topic following changes to `sobject_type`, named
    /// `<sobject_type><record_type>`. Declared by default, excluding changes
    /// made by the configured user.
    pub fn sobject(
        sobject_type: impl Into<String>,
        record_type: Option<&str>,
        options: TopicOptions,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        let sobject_type = sobject_type.into();
        let record_type = record_type.map(str::to_string);
        let name = format!("{sobject_type}{}", record_type.as_deref().unwrap_or_default());
        Self {
            channel: topic_channel(&name),
            source: NotificationSource::Sobject {
                sobject_type: sobject_type.clone(),
                record_type: record_type.clone(),
            },
            declaration: Some(Declaration::Sobject {
                sobject_type,
                record_type,
                exclude_current_user: true,
                options,
            }),
            handler: Arc::new(handler),
        }
    }

    /// Builder: turn declaration of an sobject topic on or off.
    ///
    /// Has no effect on other registrations.
    #[must_use]
    pub fn declare(mut self, declare: bool) -> Self {
        if let NotificationSource::Sobject {
            sobject_type,
            record_type,
        } = &self.source
        {
            self.declaration = if declare {
                let (exclude_current_user, options) = match &self.declaration {
                    Some(Declaration::Sobject {
                        exclude_current_user,
                        options,
                        ..
                    }) => (*exclude_current_user, *options),
                    _ => (true, TopicOptions::default()),
                };
                Some(Declaration::Sobject {
                    sobject_type: sobject_type.clone(),
                    record_type: record_type.clone(),
                    exclude_current_user,
                    options,
                })
            } else {
                None
            };
        }
        self
    }

    /// Builder: include or ignore changes made by the configured user.
    #[must_use]
    pub fn exclude_current_user(mut self, exclude: bool) -> Self {
        if let Some(Declaration::Sobject {
            exclude_current_user,
            ..
        }) = &mut self.declaration
        {
            *exclude_current_user = exclude;
        }
        self
    }

    /// Channel name.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    /// What the channel was registered for.
    #[must_use]
    pub const fn source(&self) -> &NotificationSource {
        &self.source
    }

    /// Topic declared before subscribing, if any.
    #[must_use]
    pub const fn declaration(&self) -> Option<&Declaration> {
        self.declaration.as_ref()
    }

    /// Event handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn NotificationHandler> {
        Arc::clone(&self.handler)
    }
}
