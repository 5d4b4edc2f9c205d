//! Authenticated REST sessions.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::SalesforceConfig;
use crate::login::{LoginInfo, login};
use crate::pool::SessionFactory;
use crate::{ApiError, ApiResult};

/// Result page of a SOQL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Number of records matching the query.
    pub total_size: u64,
    /// Whether all records are contained in this page.
    #[serde(default = "default_done")]
    pub done: bool,
    /// Matching records.
    #[serde(default)]
    pub records: Vec<Value>,
}

const fn default_done() -> bool {
    true
}

impl QueryResponse {
    /// First record, if any matched.
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        if self.total_size < 1 {
            return None;
        }
        self.records.first()
    }
}

/// Remote calls a pooled session can perform.
///
/// Any of these may fail with [`ApiError::SessionExpired`]; callers going
/// through [`crate::RetryingInvoker`] never observe that variant.
#[async_trait]
pub trait SalesforceApi: Send + Sync {
    /// Run a SOQL query.
    async fn query(&self, soql: &str) -> ApiResult<QueryResponse>;

    /// Create a record, returning the creation result (`id`, `success`, `errors`).
    async fn create(&self, sobject: &str, record: &Value) -> ApiResult<Value>;

    /// Overwrite fields of an existing record.
    async fn update(&self, sobject: &str, id: &str, record: &Value) -> ApiResult<()>;

    /// Delete a record.
    async fn delete(&self, sobject: &str, id: &str) -> ApiResult<()>;
}

/// A single Salesforce REST session.
///
/// Logs in lazily on first use and keeps the access token for its whole
/// life. Once the token expires the session is useless and gets discarded
/// by the pool; it never logs in again.
pub struct SalesforceSession {
    http: reqwest::Client,
    config: Arc<SalesforceConfig>,
    auth: OnceCell<LoginInfo>,
}

impl std::fmt::Debug for SalesforceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceSession")
            .field("username", &self.config.username)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SalesforceSession {
    /// Create an unauthenticated session.
    #[must_use]
    pub fn new(http: reqwest::Client, config: Arc<SalesforceConfig>) -> Self {
        Self {
            http,
            config,
            auth: OnceCell::new(),
        }
    }

    /// Whether a login has already happened.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.initialized()
    }

    /// Login details, logging in first if needed.
    ///
    /// # Errors
    /// Returns the login failure.
    pub async fn login_info(&self) -> ApiResult<&LoginInfo> {
        self.auth
            .get_or_try_init(|| login(&self.http, &self.config))
            .await
    }

    fn base_url(&self, info: &LoginInfo) -> String {
        format!(
            "{}/services/data/v{}/",
            info.instance_url, self.config.api_version
        )
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> ApiResult<reqwest::Response> {
        let info = self.login_info().await?;
        let url = format!("{}{path}", self.base_url(info));
        debug!(%method, %url, "Salesforce request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&info.access_token);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let requested = response.url().to_string();
        let content = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), requested, content))
    }
}

#[async_trait]
impl SalesforceApi for SalesforceSession {
    async fn query(&self, soql: &str) -> ApiResult<QueryResponse> {
        let response = self
            .call(Method::GET, "query/", Some(&[("q", soql)][..]), None)
            .await?;
        Ok(response.json().await?)
    }

    async fn create(&self, sobject: &str, record: &Value) -> ApiResult<Value> {
        let response = self
            .call(
                Method::POST,
                &format!("sobjects/{sobject}/"),
                None,
                Some(record),
            )
            .await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn update(&self, sobject: &str, id: &str, record: &Value) -> ApiResult<()> {
        self.call(
            Method::PATCH,
            &format!("sobjects/{sobject}/{id}"),
            None,
            Some(record),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, sobject: &str, id: &str) -> ApiResult<()> {
        self.call(Method::DELETE, &format!("sobjects/{sobject}/{id}"), None, None)
            .await?;
        Ok(())
    }
}

/// Builds [`SalesforceSession`]s sharing one HTTP client and configuration.
#[derive(Debug, Clone)]
pub struct SalesforceSessionFactory {
    http: reqwest::Client,
    config: Arc<SalesforceConfig>,
}

impl SalesforceSessionFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(http: reqwest::Client, config: SalesforceConfig) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }

    /// Shared configuration.
    #[must_use]
    pub fn config(&self) -> &SalesforceConfig {
        &self.config
    }
}

impl SessionFactory for SalesforceSessionFactory {
    type Session = SalesforceSession;

    fn create(&self) -> SalesforceSession {
        SalesforceSession::new(self.http.clone(), Arc::clone(&self.config))
    }
}
