//! The Failover Coordinator: a request-path plugin that detects network-class SQLSTATEs,
//! drives reader/writer re-selection from the Cluster Topology Monitor's topology, and
//! re-establishes a session, per the specification's §4.6.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    cluster_id,
    dialect::Dialect,
    driver::{DriverConnection, DriverConnector, Row},
    error::{Error, Result},
    host::{HostInfo, HostState, Role, NO_PORT},
    options::{ClusterAwareOptions, FailoverMode},
    plugin::Plugin,
    registry, selector,
    selector::{HostSelector, SelectorProps},
    topology::{self, monitor::Ctm},
};

/// Returns, in priority order, the role(s) a [`FailoverMode`] targets: `false` means "reader",
/// `true` means "writer". `ReaderOrWriter` prefers readers and falls back to the writer.
fn phases_for_mode(mode: FailoverMode) -> &'static [bool] {
    match mode {
        FailoverMode::StrictWriter => &[true],
        FailoverMode::StrictReader => &[false],
        FailoverMode::ReaderOrWriter => &[false, true],
    }
}

/// Upper bound on how long [`FailoverConnection::failover`] waits for a topology change before
/// falling back to whatever is cached and starting to dial candidates. The full
/// `failover_timeout_ms` budget is reserved for the candidate-connection loop, not spent
/// waiting on a topology republish that may never come (e.g. the old writer never recovers).
const TOPOLOGY_REFRESH_SLICE: Duration = Duration::from_millis(250);

/// Plugin that wraps every established connection in a [`FailoverConnection`] so later
/// queries can be inspected for network-class SQLSTATEs.
pub struct FailoverPlugin {
    next: Arc<dyn Plugin>,
    side_connector: Arc<dyn DriverConnector>,
    dialect: Arc<dyn Dialect>,
    options: ClusterAwareOptions,
    /// Built once from `options.host_selector_strategy` so a `RoundRobin` strategy keeps one
    /// cursor per cluster across every reconnect attempt this plugin ever drives, rather than
    /// resetting on each call.
    selector: Arc<dyn HostSelector>,
}

impl FailoverPlugin {
    /// `next` is the remainder of the plugin chain (Limitless router -> terminal driver), used
    /// both for the initial connect and for post-failover reconnection attempts. `side_connector`
    /// is the raw driver capability the Cluster Topology Monitor uses for its own dedicated
    /// connections, independent of the plugin chain.
    pub fn new(
        next: Arc<dyn Plugin>,
        side_connector: Arc<dyn DriverConnector>,
        dialect: Arc<dyn Dialect>,
        options: ClusterAwareOptions,
    ) -> Self {
        let selector = selector::build(options.host_selector_strategy);
        Self {
            next,
            side_connector,
            dialect,
            options,
            selector,
        }
    }
}

#[async_trait]
impl Plugin for FailoverPlugin {
    async fn connect(&self, attributes: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
        if !self.options.enable_cluster_failover {
            return self.next.connect(attributes).await;
        }

        let cluster_id = cluster_id::derive(self.options.cluster_id_override.as_deref(), &self.options.server);
        let ctm = topology::monitor::acquire(
            cluster_id,
            self.dialect.clone(),
            self.side_connector.clone(),
            attributes.clone(),
            &self.options,
        );

        let conn = self.next.connect(attributes).await?;
        let port = if self.options.port == NO_PORT {
            self.dialect.default_port()
        } else {
            self.options.port
        };
        let host = HostInfo::new(conn.host(), port, Role::Unknown, HostState::Up, 0);

        Ok(Box::new(FailoverConnection {
            inner: AsyncMutex::new(conn),
            current_host: std::sync::Mutex::new(host),
            ctm,
            next: self.next.clone(),
            attrs: attributes.clone(),
            options: self.options.clone(),
            selector: self.selector.clone(),
        }))
    }
}

/// Wraps an established connection so `query` can detect a network-class SQLSTATE, suspend
/// the request, and reconnect before returning control to the caller.
struct FailoverConnection {
    inner: AsyncMutex<Box<dyn DriverConnection>>,
    current_host: std::sync::Mutex<HostInfo>,
    ctm: registry::Handle<String, Ctm>,
    next: Arc<dyn Plugin>,
    attrs: HashMap<String, String>,
    options: ClusterAwareOptions,
    selector: Arc<dyn HostSelector>,
}

#[async_trait]
impl DriverConnection for FailoverConnection {
    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let result = {
            let conn = self.inner.lock().await;
            conn.query(query).await
        };
        match result {
            Err(error) if error.is_network_error() => {
                self.failover().await?;
                let new_host = self.current_host.lock().unwrap().host().to_string();
                Err(Error::failover_succeeded(new_host))
            }
            other => other,
        }
    }

    fn host(&self) -> String {
        self.current_host.lock().unwrap().host().to_string()
    }

    async fn close(&self) {
        self.inner.lock().await.close().await;
    }
}

impl FailoverConnection {
    /// Bounded by `failover_timeout_ms`: refreshes the topology, then tries candidates in
    /// `highest_weight` order (lowest weight first) within each role phase the configured mode
    /// allows, reconnecting via the plugin chain beneath Failover.
    async fn failover(&self) -> Result<()> {
        let deadline = Instant::now() + self.options.failover_timeout;

        let remaining = deadline.saturating_duration_since(Instant::now());
        // spec.md §4.6 step 1 forces a fresh writer election unconditionally, regardless of mode.
        let topology = self.ctm.force_refresh(true, remaining.min(TOPOLOGY_REFRESH_SLICE)).await;

        let mut props = SelectorProps::new();
        props.insert("cluster".to_string(), self.ctm.cluster_id().to_string());

        let mut attempted: HashSet<String> = HashSet::new();
        for &want_writer in phases_for_mode(self.options.failover_mode) {
            loop {
                if Instant::now() >= deadline {
                    return Err(Error::failover_exhausted(format!("{:?}", self.options.failover_mode)));
                }
                let remaining_hosts: Vec<HostInfo> = topology
                    .iter()
                    .filter(|h| h.is_up() && !attempted.contains(h.host_id()))
                    .cloned()
                    .collect();
                let host = match self.selector.pick(&remaining_hosts, want_writer, &props) {
                    Ok(host) => host,
                    Err(_) => break,
                };
                attempted.insert(host.host_id().to_string());

                let attrs = topology::query::conn_for_host(&self.attrs, host.host(), host.port());
                match self.next.connect(&attrs).await {
                    Ok(new_conn) => {
                        *self.inner.lock().await = new_conn;
                        *self.current_host.lock().unwrap() = host;
                        let new_host = self.current_host.lock().unwrap().host().to_string();
                        tracing::info!(host = %new_host, "failover reconnected");
                        return Ok(());
                    }
                    Err(error) => {
                        tracing::warn!(host = %host.host(), %error, "failover candidate refused the connection");
                    }
                }
            }
        }

        Err(Error::no_candidate(format!("{:?}", self.options.failover_mode)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect::AuroraPostgres;
    use std::sync::Mutex as StdMutex;

    fn topo_row(node_id: &str, is_writer: bool, cpu: f64, lag_ms: f64) -> Row {
        vec![
            Some(node_id.to_string()),
            Some(is_writer.to_string()),
            Some(cpu.to_string()),
            Some(lag_ms.to_string()),
        ]
    }

    /// A connector whose topology query is scripted and whose per-host query/connect behavior
    /// can be toggled mid-test, shared across the CTM's side connections and the plugin chain's
    /// main connection.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        topology_rows: Arc<StdMutex<Vec<Row>>>,
        fail_queries: Arc<StdMutex<HashSet<String>>>,
        refuse_hosts: Arc<StdMutex<HashSet<String>>>,
    }

    struct ScriptedConnection {
        host: String,
        topology_rows: Arc<StdMutex<Vec<Row>>>,
        fail_queries: Arc<StdMutex<HashSet<String>>>,
    }

    #[async_trait]
    impl DriverConnection for ScriptedConnection {
        async fn query(&self, query: &str) -> Result<Vec<Row>> {
            if self.fail_queries.lock().unwrap().contains(&self.host) {
                return Err(Error::network_sql_state("08006"));
            }
            if query.contains("REPLICA_LAG_IN_MSEC") {
                return Ok(self.topology_rows.lock().unwrap().clone());
            }
            Ok(vec![])
        }

        fn host(&self) -> String {
            self.host.clone()
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl DriverConnector for ScriptedConnector {
        async fn connect(&self, host: &str, _port: i32, _attrs: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
            if self.refuse_hosts.lock().unwrap().contains(host) {
                return Err(Error::transient_connection(host, "refused"));
            }
            Ok(Box::new(ScriptedConnection {
                host: host.to_string(),
                topology_rows: self.topology_rows.clone(),
                fail_queries: self.fail_queries.clone(),
            }))
        }
    }

    struct StubPlugin(Arc<ScriptedConnector>);

    #[async_trait]
    impl Plugin for StubPlugin {
        async fn connect(&self, attributes: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
            let host = attributes.get("SERVER").cloned().unwrap_or_default();
            self.0.connect(&host, NO_PORT, attributes).await
        }
    }

    /// Mirrors the specification's example 3: a writer at weight 0, reader `r1` heavily loaded
    /// (weight 500), reader `r2` lightly loaded (weight 100) but unreachable. `StrictReader`
    /// must pick `r2` first, fail to connect, and fall back to `r1` without ever trying `w`.
    #[tokio::test]
    async fn strict_reader_never_attempts_the_writer_and_skips_unreachable_candidates() {
        let topology_rows = Arc::new(StdMutex::new(vec![
            topo_row("w", true, 0.0, 0.0),
            topo_row("r1", false, 0.0, 5.0),
            topo_row("r2", false, 100.0, 0.0),
        ]));
        let fail_queries = Arc::new(StdMutex::new(HashSet::new()));
        let refuse_hosts = Arc::new(StdMutex::new(HashSet::new()));
        refuse_hosts.lock().unwrap().insert("r2".to_string());

        let connector = Arc::new(ScriptedConnector {
            topology_rows,
            fail_queries: fail_queries.clone(),
            refuse_hosts,
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));

        let options = ClusterAwareOptions::builder()
            .server("w")
            .port(NO_PORT)
            .failover_mode(FailoverMode::StrictReader)
            .failover_timeout(Duration::from_secs(2))
            .build();

        let ctm = topology::monitor::acquire(
            "failover-strict-reader".to_string(),
            Arc::new(AuroraPostgres),
            connector.clone() as Arc<dyn DriverConnector>,
            HashMap::new(),
            &options,
        );
        // Prime the cache with a real regular-mode refresh before forcing the writer to fail.
        let primed = ctm.force_refresh(false, Duration::from_secs(2)).await;
        assert_eq!(primed.len(), 3);

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "w".to_string());
        let inner = next.connect(&attrs).await.unwrap();
        let conn = FailoverConnection {
            inner: AsyncMutex::new(inner),
            current_host: std::sync::Mutex::new(HostInfo::new("w", NO_PORT, Role::Writer, HostState::Up, 0)),
            ctm,
            next,
            attrs,
            selector: selector::build(options.host_selector_strategy),
            options,
        };

        fail_queries.lock().unwrap().insert("w".to_string());
        let err = conn.query("select 1").await.unwrap_err();
        assert!(err.is_failover_succeeded());
        assert_eq!(conn.host(), "r1");
    }

    #[tokio::test]
    async fn failover_exhausted_when_every_candidate_refuses() {
        let topology_rows = Arc::new(StdMutex::new(vec![topo_row("w", true, 0.0, 0.0), topo_row("r1", false, 0.0, 0.0)]));
        let fail_queries = Arc::new(StdMutex::new(HashSet::new()));
        let refuse_hosts = Arc::new(StdMutex::new(HashSet::new()));
        refuse_hosts.lock().unwrap().insert("r1".to_string());

        let connector = Arc::new(ScriptedConnector {
            topology_rows,
            fail_queries: fail_queries.clone(),
            refuse_hosts,
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));

        let options = ClusterAwareOptions::builder()
            .server("w")
            .port(NO_PORT)
            .failover_mode(FailoverMode::StrictReader)
            .failover_timeout(Duration::from_secs(2))
            .build();

        let ctm = topology::monitor::acquire(
            "failover-exhausted".to_string(),
            Arc::new(AuroraPostgres),
            connector.clone() as Arc<dyn DriverConnector>,
            HashMap::new(),
            &options,
        );
        ctm.force_refresh(false, Duration::from_secs(2)).await;

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "w".to_string());
        let inner = next.connect(&attrs).await.unwrap();
        let conn = FailoverConnection {
            inner: AsyncMutex::new(inner),
            current_host: std::sync::Mutex::new(HostInfo::new("w", NO_PORT, Role::Writer, HostState::Up, 0)),
            ctm,
            next,
            attrs,
            selector: selector::build(options.host_selector_strategy),
            options,
        };

        fail_queries.lock().unwrap().insert("w".to_string());
        let err = conn.query("select 1").await.unwrap_err();
        assert!(!err.is_failover_succeeded());
    }
}
