//! Contains the `Error` and `Result` types used throughout this crate.

use std::{fmt, sync::Arc};

use thiserror::Error;

/// The result type returned by fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while monitoring cluster topology, failing over, or routing
/// through a Limitless shard group.
///
/// The inner [`ErrorKind`] is boxed to keep `Error` small on the stack and wrapped so it can
/// be cloned cheaply when the same failure needs to be reported to more than one waiter.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    pub kind: Box<ErrorKind>,
    #[source]
    pub(crate) source: Option<Arc<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            source: None,
        }
    }

    pub(crate) fn with_source(kind: ErrorKind, source: Error) -> Self {
        Self {
            kind: Box::new(kind),
            source: Some(Arc::new(source)),
        }
    }

    /// A connection attempt made by the next plugin in the chain failed. Recovered locally by
    /// the calling algorithm's own retry policy.
    pub(crate) fn transient_connection(host: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Self::new(ErrorKind::TransientConnection {
            message: format!("failed to connect to {host}: {cause}"),
        })
    }

    /// The driver reported a SQLSTATE with a network-error prefix.
    pub(crate) fn network_sql_state(sql_state: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkSqlState {
            sql_state: sql_state.into(),
        })
    }

    /// The driver reported a SQLSTATE with an access-error prefix.
    pub(crate) fn access_sql_state(sql_state: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessSqlState {
            sql_state: sql_state.into(),
        })
    }

    /// No host matched the selection criteria.
    pub(crate) fn no_candidate(mode: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NoCandidate {
            message: format!("no candidate host available for mode {mode}"),
        })
    }

    /// A bounded wait elapsed before the expected condition was observed.
    pub(crate) fn timeout(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Timeout {
            message: what.to_string(),
        })
    }

    pub(crate) fn unsupported_dialect(feature: impl fmt::Display) -> Self {
        Self::new(ErrorKind::UnsupportedDialect {
            message: format!("{feature} is not supported by the configured dialect"),
        })
    }

    /// Failover exhausted its `failover_timeout_ms` budget without reconnecting anywhere.
    pub(crate) fn failover_exhausted(mode: impl fmt::Display) -> Self {
        Self::new(ErrorKind::FailoverExhausted {
            message: format!("no candidate for mode {mode} reconnected before the failover budget elapsed"),
        })
    }

    /// A reconnection succeeded after a network-class SQLSTATE. This is surfaced as an error so
    /// the caller (the out-of-scope ODBC layer) can translate it into `SQL_SUCCESS_WITH_INFO`
    /// and prompt the application to reissue its statement; the session's transaction state is
    /// assumed lost.
    pub(crate) fn failover_succeeded(new_host: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailoverSucceeded {
            new_host: new_host.into(),
        })
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal {
            message: message.into(),
        })
    }

    /// Whether this error represents a network-class SQLSTATE, which should trigger failover.
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::NetworkSqlState { .. })
    }

    /// Whether this error represents an access-class SQLSTATE, which must never trigger
    /// failover and should be surfaced immediately.
    pub(crate) fn is_access_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::AccessSqlState { .. })
    }

    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Timeout { .. })
    }

    pub(crate) fn is_no_candidate(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::NoCandidate { .. })
    }

    /// Whether this error is the informational "failover succeeded, reissue your statement"
    /// diagnostic rather than a real failure.
    pub fn is_failover_succeeded(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::FailoverSucceeded { .. })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// The taxonomy of errors this crate can produce, per the propagation rules in the
/// specification: `TransientConnection` is recovered locally, `NetworkSqlState` and `Timeout`
/// are recovered via failover (and surfaced only if failover itself is exhausted), and the
/// remaining variants are always surfaced to the caller.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The next plugin's `Connect` returned failure for a specific host.
    #[error("{message}")]
    TransientConnection { message: String },

    /// A network-class SQLSTATE was reported by the wrapped driver.
    #[error("network error (SQLSTATE {sql_state})")]
    NetworkSqlState { sql_state: String },

    /// An access/authentication-class SQLSTATE was reported by the wrapped driver.
    #[error("access error (SQLSTATE {sql_state})")]
    AccessSqlState { sql_state: String },

    /// No host matched the selector's or failover mode's constraints.
    #[error("{message}")]
    NoCandidate { message: String },

    /// A bounded wait elapsed without observing the expected condition.
    #[error("operation timed out: {message}")]
    Timeout { message: String },

    /// A feature was requested against a dialect that does not support it.
    #[error("{message}")]
    UnsupportedDialect { message: String },

    /// Failover exhausted its budget without establishing a replacement connection.
    #[error("failover exhausted its budget: {message}")]
    FailoverExhausted { message: String },

    /// Failover reconnected the session to `new_host`. Not a failure: an informational
    /// diagnostic instructing the application to reissue the statement it was running.
    #[error("connection re-established to {new_host} after failover; reissue the last statement")]
    FailoverSucceeded { new_host: String },

    /// An internal invariant was violated or a handle could not be allocated.
    #[error("internal error: {message}")]
    Fatal { message: String },
}
