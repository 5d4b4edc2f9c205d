//! Push topic declaration.
//!
//! Declaring a topic is create-if-absent, update-otherwise. The existence
//! check and the write are two separate remote calls, so two processes
//! declaring the same name at once may both try to create it; the remote
//! uniqueness constraint on `Name` rejects the second.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cache::{DEFAULT_LOOKUP_CACHE_CAPACITY, LookupCache};
use crate::invoker::RetryingInvoker;
use crate::pool::SessionFactory;
use crate::session::SalesforceApi;
use crate::{ApiError, ApiResult};

/// Remote object type of push topics.
pub const PUSH_TOPIC_SOBJECT: &str = "PushTopic";

/// Maximum length of a topic name.
pub const MAX_TOPIC_NAME_LEN: usize = 25;

/// Which record fields are evaluated to decide whether an update notifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotifyForFields {
    /// Any field change.
    #[default]
    All,
    /// Fields referenced anywhere in the query.
    Referenced,
    /// Fields in the `SELECT` clause.
    Select,
    /// Fields in the `WHERE` clause.
    Where,
}

impl NotifyForFields {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Referenced => "Referenced",
            Self::Select => "Select",
            Self::Where => "Where",
        }
    }
}

impl fmt::Display for NotifyForFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyForFields {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "All" => Ok(Self::All),
            "Referenced" => Ok(Self::Referenced),
            "Select" => Ok(Self::Select),
            "Where" => Ok(Self::Where),
            other => Err(ApiError::InvalidTopic(format!(
                "unknown NotifyForFields value: {other}"
            ))),
        }
    }
}

/// Notification settings of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicOptions {
    /// Field evaluation mode.
    pub notify_for_fields: NotifyForFields,
    /// Notify on record creation.
    pub notify_for_operation_create: bool,
    /// Notify on record update.
    pub notify_for_operation_update: bool,
    /// Notify on record deletion.
    pub notify_for_operation_delete: bool,
    /// Notify on record undeletion.
    pub notify_for_operation_undelete: bool,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            notify_for_fields: NotifyForFields::All,
            notify_for_operation_create: true,
            notify_for_operation_update: true,
            notify_for_operation_delete: true,
            notify_for_operation_undelete: true,
        }
    }
}

impl TopicOptions {
    /// Builder: set the field evaluation mode.
    #[must_use]
    pub const fn with_notify_for_fields(mut self, mode: NotifyForFields) -> Self {
        self.notify_for_fields = mode;
        self
    }

    /// Builder: notify on create.
    #[must_use]
    pub const fn with_create(mut self, enabled: bool) -> Self {
        self.notify_for_operation_create = enabled;
        self
    }

    /// Builder: notify on update.
    #[must_use]
    pub const fn with_update(mut self, enabled: bool) -> Self {
        self.notify_for_operation_update = enabled;
        self
    }

    /// Builder: notify on delete.
    #[must_use]
    pub const fn with_delete(mut self, enabled: bool) -> Self {
        self.notify_for_operation_delete = enabled;
        self
    }

    /// Builder: notify on undelete.
    #[must_use]
    pub const fn with_undelete(mut self, enabled: bool) -> Self {
        self.notify_for_operation_undelete = enabled;
        self
    }
}

/// Full body written to the remote `PushTopic` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicDefinition {
    name: String,
    query: String,
    api_version: String,
    notify_for_fields: NotifyForFields,
    notify_for_operation_create: bool,
    notify_for_operation_update: bool,
    notify_for_operation_delete: bool,
    notify_for_operation_undelete: bool,
}

impl TopicDefinition {
    /// Assemble a definition.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidTopic`] if the name is empty or longer
    /// than [`MAX_TOPIC_NAME_LEN`] characters.
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        api_version: impl Into<String>,
        options: TopicOptions,
    ) -> ApiResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ApiError::InvalidTopic("name cannot be empty".into()));
        }
        if name.chars().count() > MAX_TOPIC_NAME_LEN {
            return Err(ApiError::InvalidTopic(format!(
                "name '{name}' exceeds {MAX_TOPIC_NAME_LEN} characters"
            )));
        }
        Ok(Self {
            name,
            query: query.into(),
            api_version: api_version.into(),
            notify_for_fields: options.notify_for_fields,
            notify_for_operation_create: options.notify_for_operation_create,
            notify_for_operation_update: options.notify_for_operation_update,
            notify_for_operation_delete: options.notify_for_operation_delete,
            notify_for_operation_undelete: options.notify_for_operation_undelete,
        })
    }

    /// Topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic query.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Wire representation.
    ///
    /// # Errors
    /// Returns [`ApiError::Json`] if serialization fails.
    pub fn to_value(&self) -> ApiResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// An existing remote topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushTopicRecord {
    /// Record id.
    #[serde(rename = "Id")]
    pub id: String,
    /// Topic name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Topic query.
    #[serde(rename = "Query", default)]
    pub query: String,
}

/// What a declaration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareOutcome {
    /// A new topic was created.
    Created {
        /// Id returned by the create call, when present.
        id: Option<String>,
    },
    /// The existing topic was overwritten.
    Updated {
        /// Id of the existing topic.
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LookupKey {
    User(String),
    RecordType {
        sobject_type: String,
        record_type: String,
    },
}

/// Escape a value for use inside a single-quoted SOQL literal.
#[must_use]
pub fn soql_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Query of a topic following changes to one sobject type.
#[must_use]
pub fn sobject_topic_query(
    sobject_type: &str,
    record_type_id: Option<&str>,
    excluded_user_id: Option<&str>,
) -> String {
    let mut query =
        format!("SELECT Id, Name, LastModifiedById, LastModifiedDate FROM {sobject_type}");
    let mut filters = Vec::with_capacity(2);
    if let Some(id) = record_type_id {
        filters.push(format!("RecordTypeId = '{}'", soql_literal(id)));
    }
    if let Some(id) = excluded_user_id {
        filters.push(format!("LastModifiedById != '{}'", soql_literal(id)));
    }
    if !filters.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&filters.join(" AND "));
    }
    query
}

fn id_of(record: &Value) -> ApiResult<String> {
    record
        .get("Id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::UnexpectedResponse(format!("record without Id: {record}")))
}

/// Declares push topics and resolves the names they depend on.
pub struct TopicDeclarationService<F: SessionFactory> {
    invoker: RetryingInvoker<F>,
    username: String,
    api_version: String,
    topics: LookupCache<String, PushTopicRecord>,
    ids: LookupCache<LookupKey, String>,
}

impl<F: SessionFactory> fmt::Debug for TopicDeclarationService<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDeclarationService")
            .field("username", &self.username)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl<F> TopicDeclarationService<F>
where
    F: SessionFactory,
    F::Session: SalesforceApi,
{
    /// Create a service declaring topics as `username`.
    #[must_use]
    pub fn new(
        invoker: RetryingInvoker<F>,
        username: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self::with_cache_capacity(invoker, username, api_version, DEFAULT_LOOKUP_CACHE_CAPACITY)
    }

    /// Create a service with a custom lookup cache size.
    #[must_use]
    pub fn with_cache_capacity(
        invoker: RetryingInvoker<F>,
        username: impl Into<String>,
        api_version: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            invoker,
            username: username.into(),
            api_version: api_version.into(),
            topics: LookupCache::new(capacity),
            ids: LookupCache::new(capacity),
        }
    }

    /// The invoker used for remote calls.
    #[must_use]
    pub const fn invoker(&self) -> &RetryingInvoker<F> {
        &self.invoker
    }

    async fn query_first(&self, soql: String) -> ApiResult<Option<Value>> {
        let soql = Arc::new(soql);
        let response = self
            .invoker
            .invoke(move |session: Arc<F::Session>| {
                let soql = Arc::clone(&soql);
                async move { session.query(&soql).await }
            })
            .await?;
        Ok(response.first().cloned())
    }

    /// Existing topic by name.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] if no topic has that name.
    #[instrument(skip(self))]
    pub async fn get_push_topic_by_name(&self, name: &str) -> ApiResult<PushTopicRecord> {
        self.topics
            .get_or_resolve(name.to_string(), || async {
                let soql = format!(
                    "SELECT Id, Name, Query FROM PushTopic WHERE Name = '{}'",
                    soql_literal(name)
                );
                let record = self
                    .query_first(soql)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("PushTopic '{name}' does not exist")))?;
                Ok(serde_json::from_value(record)?)
            })
            .await
    }

    /// Id of the user with the given username.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] if no such user exists.
    #[instrument(skip(self))]
    pub async fn get_user_id_by_name(&self, username: &str) -> ApiResult<String> {
        self.ids
            .get_or_resolve(LookupKey::User(username.to_string()), || async {
                let soql = format!(
                    "SELECT Id FROM User WHERE Username = '{}'",
                    soql_literal(username)
                );
                let record = self
                    .query_first(soql)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("User '{username}' does not exist")))?;
                id_of(&record)
            })
            .await
    }

    /// Id of a record type of an sobject type.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] if the record type does not exist.
    #[instrument(skip(self))]
    pub async fn get_record_type_id_by_name(
        &self,
        sobject_type: &str,
        record_type: &str,
    ) -> ApiResult<String> {
        let key = LookupKey::RecordType {
            sobject_type: sobject_type.to_string(),
            record_type: record_type.to_string(),
        };
        self.ids
            .get_or_resolve(key, || async {
                let soql = format!(
                    "SELECT Id, DeveloperName, SobjectType FROM RecordType \
                     WHERE SobjectType = '{}' AND DeveloperName = '{}'",
                    soql_literal(sobject_type),
                    soql_literal(record_type)
                );
                let record = self.query_first(soql).await?.ok_or_else(|| {
                    ApiError::NotFound(format!(
                        "RecordType '{record_type}' of '{sobject_type}' does not exist"
                    ))
                })?;
                id_of(&record)
            })
            .await
    }

    /// Create the topic, or overwrite it if one with the same name exists.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidTopic`] for an unusable name, or any
    /// non-expiry remote failure.
    #[instrument(skip(self, query, options), fields(topic = %name))]
    pub async fn declare_push_topic(
        &self,
        name: &str,
        query: &str,
        options: TopicOptions,
    ) -> ApiResult<DeclareOutcome> {
        let definition = TopicDefinition::new(name, query, &self.api_version, options)?;
        self.declare(&definition).await
    }

    /// Declare a topic following changes to `sobject_type`, optionally
    /// narrowed to one record type and to changes made by other users.
    ///
    /// The topic is named `sobject_type` followed by `record_type`.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] if the record type or the configured
    /// user cannot be resolved, or any other failure of
    /// [`Self::declare_push_topic`].
    #[instrument(skip(self, options))]
    pub async fn declare_push_topic_for_sobject(
        &self,
        sobject_type: &str,
        record_type: Option<&str>,
        exclude_current_user: bool,
        options: TopicOptions,
    ) -> ApiResult<DeclareOutcome> {
        let record_type_id = match record_type {
            Some(record_type) => Some(
                self.get_record_type_id_by_name(sobject_type, record_type)
                    .await?,
            ),
            None => None,
        };
        let user_id = if exclude_current_user {
            Some(self.get_user_id_by_name(&self.username).await?)
        } else {
            None
        };

        let name = format!("{sobject_type}{}", record_type.unwrap_or_default());
        let query = sobject_topic_query(sobject_type, record_type_id.as_deref(), user_id.as_deref());
        let definition = TopicDefinition::new(name, query, &self.api_version, options)?;
        self.declare(&definition).await
    }

    async fn declare(&self, definition: &TopicDefinition) -> ApiResult<DeclareOutcome> {
        let body = Arc::new(definition.to_value()?);

        match self.get_push_topic_by_name(definition.name()).await {
            Ok(existing) => {
                let id = Arc::new(existing.id);
                self.invoker
                    .invoke({
                        let id = Arc::clone(&id);
                        move |session: Arc<F::Session>| {
                            let id = Arc::clone(&id);
                            let body = Arc::clone(&body);
                            async move { session.update(PUSH_TOPIC_SOBJECT, &id, &body).await }
                        }
                    })
                    .await?;
                info!(topic = %definition.name(), id = %id, "Updated push topic");
                Ok(DeclareOutcome::Updated {
                    id: id.to_string(),
                })
            }
            Err(ApiError::NotFound(_)) => {
                debug!(topic = %definition.name(), "Push topic absent, creating");
                let created = self
                    .invoker
                    .invoke(move |session: Arc<F::Session>| {
                        let body = Arc::clone(&body);
                        async move { session.create(PUSH_TOPIC_SOBJECT, &body).await }
                    })
                    .await?;
                let id = created.get("id").and_then(Value::as_str).map(str::to_string);
                info!(topic = %definition.name(), id = ?id, "Created push topic");
                Ok(DeclareOutcome::Created { id })
            }
            Err(err) => Err(err),
        }
    }
}
