//! Durable replay cursors.
//!
//! A cursor is the replay id of the last event of a channel that was handled
//! successfully. It is stored under `salesforce:replay_id:<channel>` with a
//! time to live that every write refreshes. Salesforce retains events for
//! 24 hours, so a cursor older than that cannot be resumed from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use sfdc_api::{ConfigError, MAX_REPLAY_TTL, ReplayConfig};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{StreamError, StreamResult};

/// Namespace prefix of cursor keys.
pub const REPLAY_KEY_PREFIX: &str = "salesforce";

/// Key/value backend holding cursors.
///
/// `set_with_ttl` must store the value and its expiry as one unit.
#[async_trait]
pub trait ReplayStorage: Send + Sync {
    /// Stored value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StreamResult<Option<i64>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> StreamResult<()>;
}

/// Process-local storage, mainly for tests and single-run tools.
#[derive(Debug, Default)]
pub struct MemoryReplayStorage {
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl MemoryReplayStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStorage for MemoryReplayStorage {
    async fn get(&self, key: &str) -> StreamResult<Option<i64>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(&(value, expires_at)) if Instant::now() < expires_at => Ok(Some(value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> StreamResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS replay_cursors (
    key TEXT PRIMARY KEY NOT NULL,
    replay_id INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)";

/// SQLite-backed storage surviving process restarts.
#[derive(Clone)]
pub struct SqliteReplayStorage {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteReplayStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReplayStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteReplayStorage {
    /// Open or create a database file.
    ///
    /// # Errors
    /// Returns [`StreamError::Sqlite`] if the database cannot be opened or
    /// initialised.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StreamError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`StreamError::Sqlite`] if initialisation fails.
    pub fn open_in_memory() -> StreamResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StreamResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, if not in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl ReplayStorage for SqliteReplayStorage {
    async fn get(&self, key: &str) -> StreamResult<Option<i64>> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> StreamResult<Option<i64>> {
            let conn = conn.lock();
            let value = conn
                .query_row(
                    "SELECT replay_id FROM replay_cursors WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_ms()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await?
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> StreamResult<()> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> StreamResult<()> {
            let expires_at = now_ms().saturating_add(ttl_ms(ttl));
            conn.lock().execute(
                "INSERT INTO replay_cursors (key, replay_id, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    replay_id = excluded.replay_id,
                    expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await?
    }
}

/// Per-channel replay cursors over a [`ReplayStorage`].
#[derive(Clone)]
pub struct ReplayCursorStore {
    storage: Arc<dyn ReplayStorage>,
    ttl: Duration,
    prefix: String,
}

impl std::fmt::Debug for ReplayCursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCursorStore")
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ReplayCursorStore {
    /// Create a store writing cursors with the given time to live.
    #[must_use]
    pub fn new(storage: Arc<dyn ReplayStorage>, ttl: Duration) -> Self {
        Self {
            storage,
            ttl,
            prefix: REPLAY_KEY_PREFIX.to_string(),
        }
    }

    /// Builder: use another key namespace.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Open the backend named by `config.storage_uri`.
    ///
    /// Accepted URIs are `memory://`, `sqlite::memory:` and
    /// `sqlite://<path>`.
    ///
    /// # Errors
    /// Returns [`StreamError::Config`] for a missing or unsupported URI or a
    /// TTL beyond the retention window, or a storage error if the backend
    /// cannot be opened.
    pub fn open(config: &ReplayConfig) -> StreamResult<Self> {
        let uri = config
            .storage_uri
            .as_deref()
            .ok_or(ConfigError::MissingReplayStorage)?;
        if config.ttl.is_zero() || config.ttl > MAX_REPLAY_TTL {
            return Err(ConfigError::Invalid(format!(
                "replay ttl must be between 1s and {}s",
                MAX_REPLAY_TTL.as_secs()
            ))
            .into());
        }

        let storage: Arc<dyn ReplayStorage> = if uri == "memory://" {
            Arc::new(MemoryReplayStorage::new())
        } else if uri == "sqlite::memory:" {
            Arc::new(SqliteReplayStorage::open_in_memory()?)
        } else if let Some(path) = uri.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(
                    ConfigError::Invalid(format!("replay storage URI has no path: {uri}")).into(),
                );
            }
            Arc::new(SqliteReplayStorage::open(path)?)
        } else {
            return Err(
                ConfigError::Invalid(format!("unsupported replay storage URI: {uri}")).into(),
            );
        };

        info!(uri, ttl_secs = config.ttl.as_secs(), "Opened replay cursor store");
        Ok(Self::new(storage, config.ttl))
    }

    /// Time to live applied on every write.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Storage key of a channel's cursor.
    #[must_use]
    pub fn format_key(&self, channel: &str) -> String {
        format!("{}:replay_id:{channel}", self.prefix)
    }

    /// Last handled replay id of `channel`, if known and not expired.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub async fn get(&self, channel: &str) -> StreamResult<Option<i64>> {
        let replay_id = self.storage.get(&self.format_key(channel)).await?;
        debug!(channel, replay_id, "Read replay cursor");
        Ok(replay_id)
    }

    /// Record `replay_id` as the last handled event of `channel`.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub async fn set(&self, channel: &str, replay_id: i64) -> StreamResult<()> {
        self.storage
            .set_with_ttl(&self.format_key(channel), replay_id, self.ttl)
            .await?;
        debug!(channel, replay_id, "Advanced replay cursor");
        Ok(())
    }
}
