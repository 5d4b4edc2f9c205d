//! Streaming client tying registrations, cursors and the transport together.

use parking_lot::RwLock;
use serde_json::Value;
use sfdc_api::{
    SalesforceApi, SalesforceClient, SalesforceConfig, SalesforceSessionFactory, SessionFactory,
    TopicDeclarationService, login,
};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::StreamResult;
use crate::channel::{MessageIds, SubscribeMessage};
use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};
use crate::reconciler::SubscriptionReconciler;
use crate::replay::ReplayCursorStore;
use crate::subscription::{ChannelSubscription, Declaration};
use crate::transport::{BayeuxTransport, StreamingEndpoint};

/// Subscribes registered channels through a Bayeux transport, resuming each
/// from its replay cursor, and dispatches their events.
pub struct StreamingClient<T, F = SalesforceSessionFactory>
where
    F: SessionFactory,
{
    config: SalesforceConfig,
    http: reqwest::Client,
    transport: T,
    topics: TopicDeclarationService<F>,
    subscriptions: Vec<ChannelSubscription>,
    reconciler: SubscriptionReconciler,
    dispatcher: NotificationDispatcher,
    message_ids: MessageIds,
    endpoint: RwLock<Option<StreamingEndpoint>>,
}

impl<T, F: SessionFactory> std::fmt::Debug for StreamingClient<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<T: BayeuxTransport> StreamingClient<T> {
    /// Build a client from configuration.
    ///
    /// Opens the replay cursor store when replay tracking is enabled.
    ///
    /// # Errors
    /// Returns a configuration error for invalid settings or duplicate
    /// channels, or a storage error if the cursor store cannot be opened.
    pub fn new(
        config: SalesforceConfig,
        transport: T,
        subscriptions: Vec<ChannelSubscription>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let cursors = if config.replay.enabled {
            Some(ReplayCursorStore::open(&config.replay)?)
        } else {
            None
        };
        let topics = SalesforceClient::from_config(config.clone())?.topics();
        Self::with_parts(config, transport, topics, cursors, subscriptions)
    }
}

impl<T, F> StreamingClient<T, F>
where
    T: BayeuxTransport,
    F: SessionFactory,
    F::Session: SalesforceApi,
{
    /// Build a client from explicit collaborators.
    ///
    /// # Errors
    /// Returns a configuration error if a channel is registered twice.
    pub fn with_parts(
        config: SalesforceConfig,
        transport: T,
        topics: TopicDeclarationService<F>,
        cursors: Option<ReplayCursorStore>,
        subscriptions: Vec<ChannelSubscription>,
    ) -> StreamResult<Self> {
        let mut builder = NotificationDispatcher::builder().cursors(cursors.clone());
        for sub in &subscriptions {
            builder = builder.route(sub.channel_name(), sub.source().clone(), sub.handler())?;
        }

        Ok(Self {
            config,
            http: reqwest::Client::new(),
            transport,
            topics,
            subscriptions,
            reconciler: SubscriptionReconciler::new(cursors),
            dispatcher: builder.build(),
            message_ids: MessageIds::default(),
            endpoint: RwLock::new(None),
        })
    }

    /// The transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Registered channels, in registration order.
    #[must_use]
    pub fn channels(&self) -> Vec<&str> {
        self.subscriptions
            .iter()
            .map(ChannelSubscription::channel_name)
            .collect()
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Log in and derive the streaming endpoint.
    ///
    /// # Errors
    /// Returns the login failure.
    #[instrument(skip(self), fields(username = %self.config.username))]
    pub async fn login(&self) -> StreamResult<StreamingEndpoint> {
        let info = login(&self.http, &self.config).await?;
        let endpoint = StreamingEndpoint::new(
            info.instance_host(),
            &self.config.api_version,
            info.access_token.clone(),
        )
        .with_bayeux_versions(
            &self.config.bayeux_version,
            &self.config.bayeux_minimum_version,
        );
        info!(server_uri = %endpoint.server_uri, "Streaming endpoint ready");
        *self.endpoint.write() = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Endpoint of the last successful login.
    #[must_use]
    pub fn endpoint(&self) -> Option<StreamingEndpoint> {
        self.endpoint.read().clone()
    }

    /// Authorization scheme and token for the transport, once logged in.
    #[must_use]
    pub fn authorization(&self) -> Option<(&'static str, String)> {
        self.endpoint
            .read()
            .as_ref()
            .map(|endpoint| {
                let (scheme, token) = endpoint.authorization();
                (scheme, token.to_string())
            })
    }

    /// Declare every topic that needs it, then subscribe.
    ///
    /// # Errors
    /// Returns the first declaration or subscription failure.
    #[instrument(skip(self))]
    pub async fn start(&self) -> StreamResult<Vec<SubscribeMessage>> {
        self.declare_topics().await?;
        self.subscribe().await
    }

    /// Declare the topics of all declaring registrations.
    ///
    /// # Errors
    /// Returns the first declaration failure.
    pub async fn declare_topics(&self) -> StreamResult<()> {
        for sub in &self.subscriptions {
            let outcome = match sub.declaration() {
                Some(Declaration::Topic {
                    name,
                    query,
                    options,
                }) => self.topics.declare_push_topic(name, query, *options).await?,
                Some(Declaration::Sobject {
                    sobject_type,
                    record_type,
                    exclude_current_user,
                    options,
                }) => {
                    self.topics
                        .declare_push_topic_for_sobject(
                            sobject_type,
                            record_type.as_deref(),
                            *exclude_current_user,
                            *options,
                        )
                        .await?
                }
                None => continue,
            };
            info!(channel = sub.channel_name(), ?outcome, "Declared topic");
        }
        Ok(())
    }

    /// Subscribe every registered channel, resuming from stored cursors.
    ///
    /// Returns the batch handed to the transport.
    ///
    /// # Errors
    /// Returns a cursor store or transport failure.
    #[instrument(skip(self))]
    pub async fn subscribe(&self) -> StreamResult<Vec<SubscribeMessage>> {
        let channels = self.channels();
        let client_id = self.transport.client_id();
        let batch = self
            .reconciler
            .reconcile(channels.as_slice(), &client_id, &self.message_ids)
            .await?;
        self.transport.send_and_handle(batch.clone()).await?;
        info!(channels = batch.len(), "Subscribed");
        Ok(batch)
    }

    /// Hand one inbound data message to its channel's handler.
    ///
    /// # Errors
    /// Returns [`crate::StreamError::InvalidMessage`] for an unknown channel
    /// or a message without replay id.
    pub fn handle_message(
        &self,
        channel: &str,
        message: Value,
    ) -> StreamResult<JoinHandle<DispatchOutcome>> {
        self.dispatcher
            .dispatch(channel, message, self.transport.client_id())
    }
}
