//! Salesforce REST API access with pooled, self-healing sessions.
//!
//! This crate provides:
//!
//! - **Session pool**: authenticated sessions are created lazily and reused
//! - **Retrying invoker**: calls hitting an expired session are replayed on a
//!   fresh one, invisibly to the caller
//! - **Lookup cache**: bounded LRU memoisation of name to id resolutions
//! - **Push topics**: idempotent create-or-update of streaming topics
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sfdc_api::{SalesforceClient, SalesforceConfig, TopicOptions};
//!
//! let config = SalesforceConfig::from_path("salesforce.toml")?;
//! let client = SalesforceClient::from_config(config)?;
//!
//! let contacts = client.query("SELECT Id, Name FROM Contact").await?;
//!
//! client
//!     .topics()
//!     .declare_push_topic_for_sobject("Contact", None, true, TopicOptions::default())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod cache;
mod client;
mod config;
mod error;
mod invoker;
mod login;
mod pool;
mod push_topic;
mod session;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use invoker::*;
pub use login::*;
pub use pool::*;
pub use push_topic::*;
pub use session::*;

/// REST API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "37.0";
