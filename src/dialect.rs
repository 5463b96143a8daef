//! Backend-flavor configuration: query text and SQLSTATE classification tables.
//!
//! The core treats the query strings as opaque configuration — it never parses or builds
//! SQL, only hands the dialect's text to the wrapped driver's `Execute`. Limitless support is
//! modeled as a refinement trait so that requesting it against a non-Limitless dialect is a
//! compile-time-checked "doesn't implement the capability", surfaced at runtime as
//! [`crate::error::ErrorKind::UnsupportedDialect`].

const ACCESS_SQL_STATE_PREFIXES: &[&str] = &["28P01", "28000"];
const NETWORK_SQL_STATE_PREFIXES: &[&str] = &["53", "57P01", "57P02", "57P03", "58", "08", "99", "F0", "XX"];

fn matches_any_prefix(sql_state: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| sql_state.starts_with(prefix))
}

pub(crate) fn is_sql_state_access_error(sql_state: &str) -> bool {
    matches_any_prefix(sql_state, ACCESS_SQL_STATE_PREFIXES)
}

pub(crate) fn is_sql_state_network_error(sql_state: &str) -> bool {
    matches_any_prefix(sql_state, NETWORK_SQL_STATE_PREFIXES)
}

/// One backend flavor's query text and default port.
pub trait Dialect: Send + Sync {
    fn default_port(&self) -> i32;
    fn topology_query(&self) -> &str;
    fn writer_id_query(&self) -> &str;
    fn node_id_query(&self) -> &str;
    fn is_reader_query(&self) -> &str;

    fn is_sql_state_access_error(&self, sql_state: &str) -> bool {
        is_sql_state_access_error(sql_state)
    }

    fn is_sql_state_network_error(&self, sql_state: &str) -> bool {
        is_sql_state_network_error(sql_state)
    }

    /// Returns this dialect's Limitless refinement, if it supports Limitless routing.
    fn as_limitless(&self) -> Option<&dyn LimitlessDialect> {
        None
    }
}

/// Additive capability: a dialect that also knows how to query the Limitless router list.
pub trait LimitlessDialect: Dialect {
    fn limitless_router_endpoint_query(&self) -> &str;
}

/// `pg_catalog.aurora_replica_status()`-backed dialect for Aurora PostgreSQL.
#[derive(Debug, Default)]
pub struct AuroraPostgres;

const PG_TOPOLOGY_QUERY: &str = "SELECT SERVER_ID, \
     CASE WHEN SESSION_ID = 'MASTER_SESSION_ID' THEN TRUE ELSE FALSE END, \
     CPU, COALESCE(REPLICA_LAG_IN_MSEC, 0) \
     FROM pg_catalog.aurora_replica_status() \
     WHERE EXTRACT(EPOCH FROM (NOW() - LAST_UPDATE_TIMESTAMP)) <= 300 \
     OR SESSION_ID = 'MASTER_SESSION_ID' \
     OR LAST_UPDATE_TIMESTAMP IS NULL";
const PG_WRITER_ID_QUERY: &str =
    "SELECT SERVER_ID FROM pg_catalog.aurora_replica_status() WHERE SESSION_ID = 'MASTER_SESSION_ID'";
const PG_NODE_ID_QUERY: &str = "SELECT aurora_db_instance_identifier()";
const PG_IS_READER_QUERY: &str = "SELECT pg_is_in_recovery()";

impl Dialect for AuroraPostgres {
    fn default_port(&self) -> i32 {
        5432
    }

    fn topology_query(&self) -> &str {
        PG_TOPOLOGY_QUERY
    }

    fn writer_id_query(&self) -> &str {
        PG_WRITER_ID_QUERY
    }

    fn node_id_query(&self) -> &str {
        PG_NODE_ID_QUERY
    }

    fn is_reader_query(&self) -> &str {
        PG_IS_READER_QUERY
    }
}

/// Aurora PostgreSQL with Limitless (shard-group router) support.
#[derive(Debug, Default)]
pub struct AuroraPostgresLimitless {
    inner: AuroraPostgres,
}

const PG_LIMITLESS_ROUTER_ENDPOINT_QUERY: &str =
    "SELECT router_endpoint, load FROM rds_tools.show_topology()";

impl Dialect for AuroraPostgresLimitless {
    fn default_port(&self) -> i32 {
        self.inner.default_port()
    }

    fn topology_query(&self) -> &str {
        self.inner.topology_query()
    }

    fn writer_id_query(&self) -> &str {
        self.inner.writer_id_query()
    }

    fn node_id_query(&self) -> &str {
        self.inner.node_id_query()
    }

    fn is_reader_query(&self) -> &str {
        self.inner.is_reader_query()
    }

    fn as_limitless(&self) -> Option<&dyn LimitlessDialect> {
        Some(self)
    }
}

impl LimitlessDialect for AuroraPostgresLimitless {
    fn limitless_router_endpoint_query(&self) -> &str {
        PG_LIMITLESS_ROUTER_ENDPOINT_QUERY
    }
}

/// `information_schema.replica_host_status`-backed dialect for Aurora MySQL.
#[derive(Debug, Default)]
pub struct AuroraMySql;

const MYSQL_TOPOLOGY_QUERY: &str = "SELECT SERVER_ID, SESSION_ID = 'MASTER_SESSION_ID' AS IS_WRITER, \
     CPU, COALESCE(REPLICA_LAG_IN_MILLISECONDS, 0) \
     FROM information_schema.replica_host_status \
     WHERE TIME_TO_SEC(TIMEDIFF(NOW(), LAST_UPDATE_TIMESTAMP)) <= 300 \
     OR SESSION_ID = 'MASTER_SESSION_ID'";
const MYSQL_WRITER_ID_QUERY: &str =
    "SELECT SERVER_ID FROM information_schema.replica_host_status WHERE SESSION_ID = 'MASTER_SESSION_ID'";
const MYSQL_NODE_ID_QUERY: &str = "SELECT @@aurora_server_id";
const MYSQL_IS_READER_QUERY: &str = "SELECT @@innodb_read_only";

impl Dialect for AuroraMySql {
    fn default_port(&self) -> i32 {
        3306
    }

    fn topology_query(&self) -> &str {
        MYSQL_TOPOLOGY_QUERY
    }

    fn writer_id_query(&self) -> &str {
        MYSQL_WRITER_ID_QUERY
    }

    fn node_id_query(&self) -> &str {
        MYSQL_NODE_ID_QUERY
    }

    fn is_reader_query(&self) -> &str {
        MYSQL_IS_READER_QUERY
    }
}
