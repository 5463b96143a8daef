//! The capability boundary between this crate and the driver it wraps.
//!
//! This crate never opens a socket itself. Every query it issues — topology discovery, writer
//! verification, the Limitless router list — goes through a [`DriverConnection`] supplied by
//! the embedding driver, and every connection it establishes to a different host goes through
//! [`DriverConnector`]. Both are small enough that a test double can implement them in a few
//! lines, matching how the teacher driver isolates its wire layer behind `StreamDescription`.

use async_trait::async_trait;

use crate::error::Result;

/// One row of a query result set, as plain strings; this crate only ever reads text/numeric
/// columns it already knows how to parse (host id, role flag, CPU, lag, router load).
pub type Row = Vec<Option<String>>;

/// A live connection to one driver-chosen host, capable of running the small set of queries
/// this crate issues.
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Runs `query` and returns its result set, or an [`crate::error::Error`] carrying the
    /// driver-reported SQLSTATE on failure.
    async fn query(&self, query: &str) -> Result<Vec<Row>>;

    /// The host this connection is attached to, as the driver resolved it (not necessarily
    /// identical to the host string originally requested, e.g. after DNS round-robin).
    fn host(&self) -> String;

    /// Closes the connection. Errors are logged by the caller, not propagated, since this is
    /// always called while tearing down a connection already considered unusable.
    async fn close(&self);
}

/// Opens connections to specific hosts on behalf of the topology monitor, the failover
/// coordinator, and the Limitless router service. The embedding driver supplies one
/// implementation per physical connection type (ODBC handle, wire-protocol socket, ...).
#[async_trait]
pub trait DriverConnector: Send + Sync {
    /// Connects to `host:port`, passing through `attributes` (the original connection's
    /// attribute map, with `host`/`port` overridden) so auth and session settings survive a
    /// reroute to a different node.
    async fn connect(
        &self,
        host: &str,
        port: i32,
        attributes: &std::collections::HashMap<String, String>,
    ) -> Result<Box<dyn DriverConnection>>;
}
