//! An Aurora-aware connectivity wrapper that sits between an application and a low-level
//! database driver, giving a client connection to a multi-node Aurora-style cluster three
//! properties the underlying driver does not provide on its own:
//!
//! - an always-current view of which cluster nodes are writers vs readers (the crate's internal
//!   Cluster Topology Monitor),
//! - transparent recovery of a client session after a writer failover (the [`failover`]
//!   module), and
//! - load-aware routing for Aurora Limitless shard-group router endpoints (the [`limitless`]
//!   module).
//!
//! This crate never opens a socket itself; every connection and every query it issues goes
//! through the [`driver::DriverConnector`] / [`driver::DriverConnection`] capabilities supplied
//! by the embedding driver. Callers typically build one [`plugin::Plugin`] chain per connection
//! via [`connector::build_plugin_chain`] and drive it from their own `Connect` entry point.

mod cache;
mod cluster_id;
mod connector;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod failover;
pub mod host;
pub mod limitless;
pub mod options;
pub mod plugin;
mod registry;
mod runtime;
pub mod selector;
mod topology;

pub use connector::{build_plugin_chain, dialect_for};
pub use error::{Error, ErrorKind, Result};
