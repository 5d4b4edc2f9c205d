//! Seam to the Bayeux long-polling client.
//!
//! Handshake, connect cycles, reconnection and framing belong to the
//! transport. This crate only composes subscribe batches for it and accepts
//! the data messages it receives.

use async_trait::async_trait;
use sfdc_api::DEFAULT_BAYEUX_VERSION;

use crate::StreamResult;
use crate::channel::SubscribeMessage;

/// A Bayeux client connected to the streaming endpoint.
#[async_trait]
pub trait BayeuxTransport: Send + Sync {
    /// Client id assigned by the server on handshake.
    fn client_id(&self) -> String;

    /// Send a batch of subscribe requests and process the replies.
    async fn send_and_handle(&self, messages: Vec<SubscribeMessage>) -> StreamResult<()>;
}

/// Connection parameters for the transport, obtained by logging in.
#[derive(Clone)]
pub struct StreamingEndpoint {
    /// `https://<instance>/cometd/<api_version>`.
    pub server_uri: String,
    /// Bayeux protocol version offered on handshake.
    pub bayeux_version: String,
    /// Oldest Bayeux protocol version accepted on handshake.
    pub bayeux_minimum_version: String,
    access_token: String,
}

impl std::fmt::Debug for StreamingEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEndpoint")
            .field("server_uri", &self.server_uri)
            .field("bayeux_version", &self.bayeux_version)
            .field("bayeux_minimum_version", &self.bayeux_minimum_version)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl StreamingEndpoint {
    /// Endpoint of an instance host for an API version.
    #[must_use]
    pub fn new(host: &str, api_version: &str, access_token: impl Into<String>) -> Self {
        Self {
            server_uri: format!("https://{host}/cometd/{api_version}"),
            bayeux_version: DEFAULT_BAYEUX_VERSION.to_string(),
            bayeux_minimum_version: DEFAULT_BAYEUX_VERSION.to_string(),
            access_token: access_token.into(),
        }
    }

    /// Builder: protocol versions for the handshake.
    #[must_use]
    pub fn with_bayeux_versions(
        mut self,
        version: impl Into<String>,
        minimum_version: impl Into<String>,
    ) -> Self {
        self.bayeux_version = version.into();
        self.bayeux_minimum_version = minimum_version.into();
        self
    }

    /// Authorization scheme and credentials for the transport's requests.
    #[must_use]
    pub fn authorization(&self) -> (&'static str, &str) {
        ("Bearer", &self.access_token)
    }
}
