//! Pooled Salesforce client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

use crate::ApiResult;
use crate::config::SalesforceConfig;
use crate::invoker::{RemoteCall, RetryingInvoker};
use crate::pool::{PoolStats, SessionFactory, SessionPool};
use crate::push_topic::TopicDeclarationService;
use crate::session::{QueryResponse, SalesforceApi, SalesforceSessionFactory};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Entry point for REST calls against one organisation.
///
/// Every call leases a session from an internal pool and transparently
/// moves to a fresh session when the leased one has expired.
pub struct SalesforceClient<F: SessionFactory = SalesforceSessionFactory> {
    invoker: RetryingInvoker<F>,
    username: String,
    api_version: String,
}

impl<F: SessionFactory> Clone for SalesforceClient<F> {
    fn clone(&self) -> Self {
        Self {
            invoker: self.invoker.clone(),
            username: self.username.clone(),
            api_version: self.api_version.clone(),
        }
    }
}

impl<F: SessionFactory> std::fmt::Debug for SalesforceClient<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("username", &self.username)
            .field("api_version", &self.api_version)
            .field("pool", &self.invoker.pool().stats())
            .finish()
    }
}

impl SalesforceClient {
    /// Build a client for a validated configuration.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid, or an HTTP
    /// error if the HTTP client cannot be built.
    pub fn from_config(config: SalesforceConfig) -> ApiResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        let username = config.username.clone();
        let api_version = config.api_version.clone();
        let factory = SalesforceSessionFactory::new(http, config);
        Ok(Self::with_factory(factory, username, api_version))
    }
}

impl<F> SalesforceClient<F>
where
    F: SessionFactory,
    F::Session: SalesforceApi,
{
    /// Build a client over any session factory.
    #[must_use]
    pub fn with_factory(
        factory: F,
        username: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(factory));
        Self {
            invoker: RetryingInvoker::new(pool),
            username: username.into(),
            api_version: api_version.into(),
        }
    }

    /// Builder: wait before retrying on a fresh session.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.invoker = self.invoker.with_retry_delay(delay);
        self
    }

    /// The retrying invoker.
    #[must_use]
    pub const fn invoker(&self) -> &RetryingInvoker<F> {
        &self.invoker
    }

    /// The session pool.
    #[must_use]
    pub fn pool(&self) -> &SessionPool<F> {
        self.invoker.pool()
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.invoker.pool().stats()
    }

    /// Run an arbitrary call against a pooled session.
    ///
    /// # Errors
    /// Returns the first non-expiry failure of `call`.
    pub async fn invoke<C>(&self, call: C) -> ApiResult<C::Output>
    where
        C: RemoteCall<F::Session>,
    {
        self.invoker.invoke(call).await
    }

    /// Run a SOQL query.
    ///
    /// # Errors
    /// Returns any non-expiry remote failure.
    #[instrument(skip(self))]
    pub async fn query(&self, soql: &str) -> ApiResult<QueryResponse> {
        let soql: Arc<str> = Arc::from(soql);
        self.invoke(move |session: Arc<F::Session>| {
            let soql = Arc::clone(&soql);
            async move { session.query(&soql).await }
        })
        .await
    }

    /// Create a record.
    ///
    /// # Errors
    /// Returns any non-expiry remote failure.
    #[instrument(skip(self, record))]
    pub async fn create(&self, sobject: &str, record: Value) -> ApiResult<Value> {
        let sobject: Arc<str> = Arc::from(sobject);
        let record = Arc::new(record);
        self.invoke(move |session: Arc<F::Session>| {
            let sobject = Arc::clone(&sobject);
            let record = Arc::clone(&record);
            async move { session.create(&sobject, &record).await }
        })
        .await
    }

    /// Overwrite fields of a record.
    ///
    /// # Errors
    /// Returns any non-expiry remote failure.
    #[instrument(skip(self, record))]
    pub async fn update(&self, sobject: &str, id: &str, record: Value) -> ApiResult<()> {
        let sobject: Arc<str> = Arc::from(sobject);
        let id: Arc<str> = Arc::from(id);
        let record = Arc::new(record);
        self.invoke(move |session: Arc<F::Session>| {
            let sobject = Arc::clone(&sobject);
            let id = Arc::clone(&id);
            let record = Arc::clone(&record);
            async move { session.update(&sobject, &id, &record).await }
        })
        .await
    }

    /// Delete a record.
    ///
    /// # Errors
    /// Returns any non-expiry remote failure.
    #[instrument(skip(self))]
    pub async fn delete(&self, sobject: &str, id: &str) -> ApiResult<()> {
        let sobject: Arc<str> = Arc::from(sobject);
        let id: Arc<str> = Arc::from(id);
        self.invoke(move |session: Arc<F::Session>| {
            let sobject = Arc::clone(&sobject);
            let id = Arc::clone(&id);
            async move { session.delete(&sobject, &id).await }
        })
        .await
    }

    /// Topic declaration service sharing this client's pool.
    #[must_use]
    pub fn topics(&self) -> TopicDeclarationService<F> {
        TopicDeclarationService::new(
            self.invoker.clone(),
            self.username.clone(),
            self.api_version.clone(),
        )
    }
}
