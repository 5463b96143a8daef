//! Runs the dialect's topology/writer-id/node-id queries over a [`DriverConnection`] and
//! turns their result rows into [`HostInfo`] values.

use crate::{
    dialect::Dialect,
    driver::DriverConnection,
    error::{Error, Result},
    host::{aurora_weight, HostInfo, HostState, Role, NO_PORT},
};

const REPLACE_CHAR: char = '?';

/// Substitutes `?` in `host_pattern` with `node_id`; a pattern with no `?` is used unchanged
/// for every node, so the whole cluster resolves to one endpoint.
fn apply_host_pattern(host_pattern: Option<&str>, node_id: &str, fallback: &str) -> String {
    match host_pattern {
        Some(pattern) if pattern.contains(REPLACE_CHAR) => pattern.replacen(REPLACE_CHAR, node_id, 1),
        Some(pattern) => pattern.to_string(),
        None => fallback.to_string(),
    }
}

fn col(row: &[Option<String>], idx: usize) -> Option<&str> {
    row.get(idx).and_then(|v| v.as_deref())
}

/// Runs the dialect's topology query and returns the cluster's nodes in the order the driver
/// returned them, without reordering readers/writer (that's [`verify_writer`]'s job).
pub(crate) async fn query_topology(
    conn: &dyn DriverConnection,
    dialect: &dyn Dialect,
    host_pattern: Option<&str>,
    default_port: i32,
) -> Result<Vec<HostInfo>> {
    let rows = conn.query(dialect.topology_query()).await?;
    let mut hosts = Vec::with_capacity(rows.len());
    for row in &rows {
        let node_id = col(row, 0).unwrap_or_default();
        if node_id.is_empty() {
            continue;
        }
        let is_writer = matches!(col(row, 1), Some("t") | Some("true") | Some("1") | Some("TRUE"));
        let cpu_usage: f64 = col(row, 2).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let replica_lag_ms: f64 = col(row, 3).and_then(|v| v.parse().ok()).unwrap_or(0.0);

        let host = apply_host_pattern(host_pattern, node_id, node_id);
        let role = if is_writer { Role::Writer } else { Role::Reader };
        let weight = aurora_weight(replica_lag_ms, cpu_usage);
        hosts.push(HostInfo::new(host, default_port, role, HostState::Up, weight));
    }
    Ok(hosts)
}

/// Queries for the current writer's node id; empty means the connection is not attached to
/// (or cannot currently reach) the writer.
pub(crate) async fn get_writer_id(conn: &dyn DriverConnection, dialect: &dyn Dialect) -> Result<String> {
    let rows = conn.query(dialect.writer_id_query()).await?;
    Ok(rows.first().and_then(|r| col(r, 0)).unwrap_or_default().to_string())
}

/// Queries the connection's own node id, used as a liveness check: an empty/failing result
/// means the connection is unusable.
pub(crate) async fn get_node_id(conn: &dyn DriverConnection, dialect: &dyn Dialect) -> Result<String> {
    let rows = conn.query(dialect.node_id_query()).await?;
    Ok(rows.first().and_then(|r| col(r, 0)).unwrap_or_default().to_string())
}

/// Queries whether `conn` is currently attached to a reader or a writer.
pub(crate) async fn get_connection_role(conn: &dyn DriverConnection, dialect: &dyn Dialect) -> Result<Role> {
    let rows = conn.query(dialect.is_reader_query()).await?;
    let is_reader = matches!(rows.first().and_then(|r| col(r, 0)), Some("t") | Some("true") | Some("1") | Some("TRUE"));
    Ok(if is_reader { Role::Reader } else { Role::Writer })
}

/// Canonicalizes a topology: all readers first (in their original order), then the single
/// newest writer (greatest `last_update`), or an empty list if no writer was present.
/// Idempotent: applying it to an already-canonical topology returns the same sequence.
pub(crate) fn verify_writer(hosts: Vec<HostInfo>) -> Vec<HostInfo> {
    let mut readers = Vec::with_capacity(hosts.len());
    let mut newest_writer: Option<HostInfo> = None;
    for host in hosts {
        if host.role() == Role::Writer {
            let replace = match &newest_writer {
                Some(w) => host.last_update() > w.last_update(),
                None => true,
            };
            if replace {
                newest_writer = Some(host);
            }
        } else {
            readers.push(host);
        }
    }
    match newest_writer {
        Some(writer) => {
            readers.push(writer);
            readers
        }
        None => {
            tracing::warn!("no writer found within list of hosts");
            Vec::new()
        }
    }
}

/// Clones `attributes` with `SERVER`/`PORT` overridden to `host`/`port`, the attribute map a
/// node monitor or failover coordinator hands to the next plugin when it reconnects to a
/// specific cluster member rather than the originally requested endpoint.
pub(crate) fn conn_for_host(
    attributes: &std::collections::HashMap<String, String>,
    host: &str,
    port: i32,
) -> std::collections::HashMap<String, String> {
    let mut attrs = attributes.clone();
    attrs.insert("SERVER".to_string(), host.to_string());
    if port != NO_PORT {
        attrs.insert("PORT".to_string(), port.to_string());
    }
    attrs
}
