//! Resumable Salesforce Streaming API subscriptions.
//!
//! This crate provides:
//!
//! - **Replay cursors**: per-channel last handled replay id, persisted with a
//!   TTL in memory or SQLite
//! - **Subscription reconciliation**: subscribe batches resume each channel
//!   from its cursor
//! - **Notification dispatch**: events run on their own task and advance the
//!   cursor only when handled successfully
//! - **Streaming client**: topic declaration, login and subscription on top
//!   of an external Bayeux transport
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sfdc_api::{SalesforceConfig, TopicOptions};
//! use sfdc_streaming::{ChannelSubscription, Notification, StreamingClient};
//!
//! let contacts = ChannelSubscription::sobject("Contact", None, TopicOptions::default(),
//!     |n: Notification| async move {
//!         println!("{} changed", n.sobject().map_or("?", |s| s["Id"].as_str().unwrap_or("?")));
//!         Ok(())
//!     });
//!
//! let client = StreamingClient::new(config, transport, vec![contacts])?;
//! client.login().await?;
//! client.start().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod channel;
mod client;
mod dispatcher;
mod error;
mod reconciler;
mod replay;
mod subscription;
mod transport;

pub use channel::*;
pub use client::*;
pub use dispatcher::*;
pub use error::*;
pub use reconciler::*;
pub use replay::*;
pub use subscription::*;
pub use transport::*;
