//! The Cluster Topology Monitor (CTM): a long-lived, per-[`crate::cluster_id`] background
//! engine that keeps the shared topology cache authoritative, switching between a Regular
//! mode (steady-state refresh over a verified writer connection) and a Panic mode (writer
//! election via racing Node Monitors) per the state machine in the specification's §4.5.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::{
    cache::SlidingCache,
    dialect::Dialect,
    driver::{DriverConnection, DriverConnector},
    error::{Error, Result},
    host::HostInfo,
    options::ClusterAwareOptions,
    registry::{ManagedMonitor, Registry},
    runtime,
    topology::query,
};

/// Interval Node Monitors and the main loop's shutdown check poll at, per §5.
const THREAD_SLEEP: Duration = Duration::from_millis(100);
/// Interval `force_refresh` polls the published topology for a change while waiting.
const TOPOLOGY_UPDATE_WAIT: Duration = Duration::from_secs(1);
/// Interval `delay_main` polls for a requested update or stop signal between refresh ticks.
const TOPOLOGY_REQUEST_WAIT: Duration = Duration::from_millis(50);
/// How long after a writer election the main loop runs at `high_refresh_rate` instead of
/// `refresh_rate`.
const HIGH_REFRESH_AFTER_PANIC: Duration = Duration::from_secs(30);

fn topology_cache() -> &'static SlidingCache<String, Vec<HostInfo>> {
    static CACHE: std::sync::OnceLock<SlidingCache<String, Vec<HostInfo>>> = std::sync::OnceLock::new();
    CACHE.get_or_init(|| SlidingCache::new(crate::host::DEFAULT_CACHE_TTL))
}

fn registry() -> &'static Registry<String, Ctm> {
    static REGISTRY: Registry<String, Ctm> = Registry::new();
    &REGISTRY
}

/// Returns a handle to the CTM for `cluster_id`, starting one if this is the first consumer.
pub(crate) fn acquire(
    cluster_id: String,
    dialect: Arc<dyn Dialect>,
    connector: Arc<dyn DriverConnector>,
    base_attrs: HashMap<String, String>,
    options: &ClusterAwareOptions,
) -> crate::registry::Handle<String, Ctm> {
    let initial_host = options.server.clone();
    let initial_port = if options.port == crate::host::NO_PORT {
        dialect.default_port()
    } else {
        options.port
    };
    let host_pattern = options.host_pattern.clone();
    let refresh_rate = options.topology_refresh_rate;
    let high_refresh_rate = options.topology_high_refresh_rate;
    let ignore_topology_request = options.ignore_topology_request;

    let (handle, _created) = registry().acquire(cluster_id.clone(), move || {
        Ctm::start(
            cluster_id,
            dialect,
            connector,
            base_attrs,
            initial_host,
            initial_port,
            host_pattern,
            refresh_rate,
            high_refresh_rate,
            ignore_topology_request,
        )
    });
    handle
}

struct WriterElection {
    connection: Box<dyn DriverConnection>,
    host_info: HostInfo,
}

/// State shared between the main loop task and its transient Node Monitor tasks.
struct Shared {
    running: AtomicBool,
    node_threads_stop: AtomicBool,
    request_update: AtomicBool,
    /// Set by `force_refresh(verify_writer=true, ..)`: forces the main loop to tear down its
    /// writer connection and go straight to Panic on its next iteration, even if that
    /// connection still looks healthy.
    force_reverify: AtomicBool,
    topology_updated: Notify,
    request_update_notify: Notify,
    ignore_topology_request_end: std::sync::Mutex<Option<Instant>>,
    high_refresh_end_time: std::sync::Mutex<Option<Instant>>,
    main_writer_host_info: std::sync::Mutex<Option<HostInfo>>,
}

/// One panic-mode election round's shared state: the single-producer writer handoff slot and
/// the "first reader wins" claim.
struct PanicRound {
    writer_slot: AsyncMutex<Option<WriterElection>>,
    writer_found: Notify,
    reader_claimed: AtomicBool,
    round_stop: AtomicBool,
}

/// Long-lived, per-cluster background engine. Construct via [`acquire`]; consumers never
/// build one directly, matching the "monitor registration entry" lifecycle in the
/// specification's data model.
pub(crate) struct Ctm {
    cluster_id: String,
    dialect: Arc<dyn Dialect>,
    connector: Arc<dyn DriverConnector>,
    base_attrs: HashMap<String, String>,
    initial_host: String,
    initial_port: i32,
    host_pattern: Option<String>,
    refresh_rate: Duration,
    high_refresh_rate: Duration,
    ignore_topology_request_ms: Duration,
    shared: Arc<Shared>,
    main_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Ctm {
    #[allow(clippy::too_many_arguments)]
    fn start(
        cluster_id: String,
        dialect: Arc<dyn Dialect>,
        connector: Arc<dyn DriverConnector>,
        base_attrs: HashMap<String, String>,
        initial_host: String,
        initial_port: i32,
        host_pattern: Option<String>,
        refresh_rate: Duration,
        high_refresh_rate: Duration,
        ignore_topology_request_ms: Duration,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            node_threads_stop: AtomicBool::new(false),
            request_update: AtomicBool::new(false),
            force_reverify: AtomicBool::new(false),
            topology_updated: Notify::new(),
            request_update_notify: Notify::new(),
            ignore_topology_request_end: std::sync::Mutex::new(None),
            high_refresh_end_time: std::sync::Mutex::new(None),
            main_writer_host_info: std::sync::Mutex::new(None),
        });
        let ctm = Arc::new(Self {
            cluster_id,
            dialect,
            connector,
            base_attrs,
            initial_host,
            initial_port,
            host_pattern,
            refresh_rate,
            high_refresh_rate,
            ignore_topology_request_ms,
            shared,
            main_task: std::sync::Mutex::new(None),
        });
        let task_ctm = ctm.clone();
        let handle = runtime::spawn(async move { main_loop(task_ctm).await });
        *ctm.main_task.lock().unwrap() = Some(handle);
        ctm
    }

    pub(crate) fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn default_port(&self) -> i32 {
        if self.initial_port == crate::host::NO_PORT {
            self.dialect.default_port()
        } else {
            self.initial_port
        }
    }

    fn cached_topology(&self) -> Vec<HostInfo> {
        topology_cache().get(&self.cluster_id)
    }

    fn publish(&self, topology: Vec<HostInfo>) {
        topology_cache().put(self.cluster_id.clone(), topology);
        self.shared.topology_updated.notify_waiters();
    }

    /// Clears a stale `ignore_topology_request_end` once `now` has passed it, so the "are we
    /// inside the quiet window" check in [`Self::force_refresh`] stays a plain comparison with
    /// no special-casing of "the window already ended" (the original's
    /// `HandleIgnoreTopologyTiming`).
    fn clear_stale_ignore_window(&self) {
        let mut end = self.shared.ignore_topology_request_end.lock().unwrap();
        if matches!(*end, Some(t) if Instant::now() >= t) {
            *end = None;
        }
    }

    fn current_refresh_interval(&self) -> Duration {
        let high_until = *self.shared.high_refresh_end_time.lock().unwrap();
        match high_until {
            Some(t) if Instant::now() < t => self.high_refresh_rate,
            _ => self.refresh_rate,
        }
    }

    fn on_writer_elected(&self, host_info: HostInfo) {
        let now = Instant::now();
        *self.shared.main_writer_host_info.lock().unwrap() = Some(host_info);
        *self.shared.ignore_topology_request_end.lock().unwrap() = Some(now + self.ignore_topology_request_ms);
        *self.shared.high_refresh_end_time.lock().unwrap() = Some(now + HIGH_REFRESH_AFTER_PANIC);
    }

    /// Blocks (bounded by `timeout`) until an update to the published topology has been
    /// observed, then returns it; an update requested while still inside the post-election
    /// quiet window returns the cached topology unchanged, without signalling the monitor.
    /// `timeout == 0` means "return cached without waiting."
    pub(crate) async fn force_refresh(&self, verify_writer: bool, timeout: Duration) -> Vec<HostInfo> {
        let now = Instant::now();
        if let Some(end) = *self.shared.ignore_topology_request_end.lock().unwrap() {
            if now < end {
                return self.cached_topology();
            }
        }
        let snapshot = self.cached_topology();
        if verify_writer {
            self.shared.force_reverify.store(true, Ordering::SeqCst);
        }
        self.shared.request_update.store(true, Ordering::SeqCst);
        self.shared.request_update_notify.notify_waiters();
        if timeout.is_zero() {
            return snapshot;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.cached_topology();
            }
            let tick = remaining.min(TOPOLOGY_UPDATE_WAIT);
            tokio::select! {
                _ = self.shared.topology_updated.notified() => {}
                _ = runtime::delay_for(tick) => {}
            }
            let current = self.cached_topology();
            if current != snapshot {
                return current;
            }
        }
    }

    /// The caller's-connection variant: if the CTM already holds a verified writer, this
    /// behaves exactly like [`Self::force_refresh`]; otherwise it runs one topology query
    /// directly on `conn` and publishes the result.
    pub(crate) async fn force_refresh_with_conn(
        &self,
        conn: &dyn DriverConnection,
        timeout: Duration,
    ) -> Vec<HostInfo> {
        if self.shared.main_writer_host_info.lock().unwrap().is_some() {
            return self.force_refresh(true, timeout).await;
        }
        let dialect = self.dialect.as_ref();
        match query::query_topology(conn, dialect, self.host_pattern.as_deref(), self.default_port()).await {
            Ok(rows) if !rows.is_empty() => {
                let canon = query::verify_writer(rows);
                self.publish(canon.clone());
                canon
            }
            Ok(_) => {
                tracing::warn!(cluster_id = %self.cluster_id, "direct topology query returned no rows");
                self.cached_topology()
            }
            Err(error) => {
                tracing::warn!(cluster_id = %self.cluster_id, %error, "direct topology query failed");
                self.cached_topology()
            }
        }
    }
}

#[async_trait]
impl ManagedMonitor for Ctm {
    async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.node_threads_stop.store(true, Ordering::SeqCst);
        self.shared.topology_updated.notify_waiters();
        self.shared.request_update_notify.notify_waiters();
        let handle = self.main_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn delay_main(shared: &Shared, interval: Duration) {
    let deadline = Instant::now() + interval;
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        if shared.request_update.swap(false, Ordering::SeqCst) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        let tick = remaining.min(TOPOLOGY_REQUEST_WAIT);
        tokio::select! {
            _ = shared.request_update_notify.notified() => {}
            _ = runtime::delay_for(tick) => {}
        }
    }
}

async fn main_loop(ctm: Arc<Ctm>) {
    let mut writer_conn = open_initial_writer(&ctm).await;

    while ctm.shared.running.load(Ordering::SeqCst) {
        ctm.clear_stale_ignore_window();
        let forced_reverify = ctm.shared.force_reverify.swap(false, Ordering::SeqCst);

        if !forced_reverify {
            if let Some(conn) = writer_conn.as_deref() {
                let dialect = ctm.dialect.as_ref();
                let result = query::query_topology(conn, dialect, ctm.host_pattern.as_deref(), ctm.default_port()).await;
                match result {
                    Ok(rows) if !rows.is_empty() => {
                        ctm.publish(query::verify_writer(rows));
                        let interval = ctm.current_refresh_interval();
                        delay_main(&ctm.shared, interval).await;
                        continue;
                    }
                    Ok(_) => {
                        tracing::warn!(cluster_id = %ctm.cluster_id, "topology query returned no rows, entering panic mode");
                    }
                    Err(error) => {
                        tracing::warn!(cluster_id = %ctm.cluster_id, %error, "lost the writer connection, entering panic mode");
                    }
                }
            }
        } else {
            tracing::info!(cluster_id = %ctm.cluster_id, "force_refresh requested writer re-verification, entering panic mode");
        }

        if let Some(conn) = writer_conn.take() {
            conn.close().await;
        }
        *ctm.shared.main_writer_host_info.lock().unwrap() = None;

        if !ctm.shared.running.load(Ordering::SeqCst) {
            break;
        }

        match run_panic_mode(&ctm).await {
            Some((conn, host_info)) => {
                ctm.on_writer_elected(host_info.clone());
                let dialect = ctm.dialect.as_ref();
                match query::query_topology(conn.as_ref(), dialect, ctm.host_pattern.as_deref(), ctm.default_port()).await {
                    Ok(rows) if !rows.is_empty() => ctm.publish(query::verify_writer(rows)),
                    _ => ctm.publish(query::verify_writer(vec![host_info])),
                }
                writer_conn = Some(conn);
            }
            None => break,
        }
    }
}

/// Opens the bootstrap connection to the configured seed host and verifies it is the writer;
/// `None` if unreachable (the loop will fall straight into panic mode on its first iteration).
async fn open_initial_writer(ctm: &Arc<Ctm>) -> Option<Box<dyn DriverConnection>> {
    let attrs = query::conn_for_host(&ctm.base_attrs, &ctm.initial_host, ctm.initial_port);
    match ctm.connector.connect(&ctm.initial_host, ctm.initial_port, &attrs).await {
        Ok(conn) => Some(conn),
        Err(error) => {
            tracing::warn!(cluster_id = %ctm.cluster_id, %error, "failed to open the initial CTM connection");
            None
        }
    }
}

/// Discovers (or re-discovers) a verified writer by racing Node Monitors over the last known
/// topology, bootstrapping one fresh topology query against the original seed if none is
/// known yet. Returns `None` only when the CTM is stopping.
async fn run_panic_mode(ctm: &Arc<Ctm>) -> Option<(Box<dyn DriverConnection>, HostInfo)> {
    loop {
        if !ctm.shared.running.load(Ordering::SeqCst) {
            return None;
        }

        let mut candidates = ctm.cached_topology();
        if candidates.is_empty() {
            candidates = bootstrap_topology(ctm).await;
        }
        if candidates.is_empty() {
            tracing::warn!(cluster_id = %ctm.cluster_id, "panic mode has no known hosts to probe");
            runtime::delay_for(THREAD_SLEEP.max(Duration::from_millis(500))).await;
            continue;
        }

        let round = Arc::new(PanicRound {
            writer_slot: AsyncMutex::new(None),
            writer_found: Notify::new(),
            reader_claimed: AtomicBool::new(false),
            round_stop: AtomicBool::new(false),
        });

        let mut tasks = Vec::with_capacity(candidates.len());
        for host in candidates {
            let task_ctm = ctm.clone();
            let task_round = round.clone();
            tasks.push(runtime::spawn(async move {
                node_monitor_task(task_ctm, host, task_round).await;
            }));
        }

        loop {
            if ctm.shared.node_threads_stop.load(Ordering::SeqCst) || !ctm.shared.running.load(Ordering::SeqCst) {
                round.round_stop.store(true, Ordering::SeqCst);
                round.writer_found.notify_waiters();
                for task in tasks {
                    let _ = task.await;
                }
                return None;
            }
            tokio::select! {
                _ = round.writer_found.notified() => {}
                _ = runtime::delay_for(THREAD_SLEEP) => {}
            }
            let mut slot = round.writer_slot.lock().await;
            if let Some(election) = slot.take() {
                drop(slot);
                round.round_stop.store(true, Ordering::SeqCst);
                return Some((election.connection, election.host_info));
            }
        }
    }
}

async fn bootstrap_topology(ctm: &Arc<Ctm>) -> Vec<HostInfo> {
    let attrs = query::conn_for_host(&ctm.base_attrs, &ctm.initial_host, ctm.initial_port);
    let conn = match ctm.connector.connect(&ctm.initial_host, ctm.initial_port, &attrs).await {
        Ok(conn) => conn,
        Err(error) => {
            tracing::warn!(cluster_id = %ctm.cluster_id, %error, "failed to bootstrap a topology in panic mode");
            return Vec::new();
        }
    };
    let dialect = ctm.dialect.as_ref();
    let rows = query::query_topology(conn.as_ref(), dialect, ctm.host_pattern.as_deref(), ctm.default_port())
        .await
        .unwrap_or_default();
    conn.close().await;
    query::verify_writer(rows)
}

/// One Node Monitor: reconnects as needed, checks whether its host is the writer, and either
/// races to publish a winning writer handoff or (the first reader to notice it is a reader)
/// becomes the reader worker that republishes topology until a writer is elected.
async fn node_monitor_task(ctm: Arc<Ctm>, host: HostInfo, round: Arc<PanicRound>) {
    let mut conn: Option<Box<dyn DriverConnection>> = None;
    loop {
        if round.round_stop.load(Ordering::SeqCst) || ctm.shared.node_threads_stop.load(Ordering::SeqCst) {
            if let Some(conn) = conn.take() {
                conn.close().await;
            }
            return;
        }

        if conn.is_none() {
            let attrs = query::conn_for_host(&ctm.base_attrs, host.host(), host.port());
            conn = ctm.connector.connect(host.host(), host.port(), &attrs).await.ok();
            if conn.is_none() {
                runtime::delay_for(THREAD_SLEEP).await;
                continue;
            }
        }

        let dialect = ctm.dialect.as_ref();
        let writer_id = query::get_writer_id(conn.as_deref().unwrap(), dialect).await;
        match writer_id {
            Ok(id) if !id.is_empty() => {
                let mut slot = round.writer_slot.lock().await;
                if slot.is_none() {
                    *slot = Some(WriterElection {
                        connection: conn.take().unwrap(),
                        host_info: host.clone(),
                    });
                    drop(slot);
                    round.writer_found.notify_waiters();
                } else if let Some(conn) = conn.take() {
                    conn.close().await;
                }
                return;
            }
            Ok(_) if !round.reader_claimed.swap(true, Ordering::SeqCst) => {
                run_reader_worker(&ctm, conn.take().unwrap(), &round).await;
                return;
            }
            Err(_) => {
                if let Some(conn) = conn.take() {
                    conn.close().await;
                }
            }
            Ok(_) => {}
        }

        runtime::delay_for(THREAD_SLEEP).await;
    }
}

/// The first Node Monitor to discover it is a reader takes over republishing the topology
/// (rather than merely polling writer-id) for the rest of the panic round.
async fn run_reader_worker(ctm: &Arc<Ctm>, conn: Box<dyn DriverConnection>, round: &Arc<PanicRound>) {
    loop {
        if round.round_stop.load(Ordering::SeqCst) || ctm.shared.node_threads_stop.load(Ordering::SeqCst) {
            conn.close().await;
            return;
        }
        let dialect = ctm.dialect.as_ref();
        if let Ok(rows) = query::query_topology(conn.as_ref(), dialect, ctm.host_pattern.as_deref(), ctm.default_port()).await {
            if !rows.is_empty() {
                ctm.publish(query::verify_writer(rows));
            }
        }
        runtime::delay_for(THREAD_SLEEP).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dialect::AuroraPostgres,
        driver::Row,
        host::{HostState, Role, NO_PORT},
        options::ClusterAwareOptions,
    };
    use std::sync::Mutex as StdMutex;

    /// A connector whose topology/writer-id responses are scripted per-host and can be mutated
    /// mid-test to simulate a writer connection dying.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        topology_rows: Arc<StdMutex<Vec<Row>>>,
        writer_ids: Arc<StdMutex<HashMap<String, String>>>,
        dead_hosts: Arc<StdMutex<std::collections::HashSet<String>>>,
    }

    struct ScriptedConnection {
        host: String,
        topology_rows: Arc<StdMutex<Vec<Row>>>,
        writer_ids: Arc<StdMutex<HashMap<String, String>>>,
        dead_hosts: Arc<StdMutex<std::collections::HashSet<String>>>,
    }

    #[async_trait]
    impl DriverConnection for ScriptedConnection {
        async fn query(&self, query: &str) -> Result<Vec<Row>> {
            if self.dead_hosts.lock().unwrap().contains(&self.host) {
                return Err(Error::network_sql_state("08006"));
            }
            if query.contains("REPLICA_LAG_IN_MSEC") {
                return Ok(self.topology_rows.lock().unwrap().clone());
            }
            // writer-id query
            let id = self
                .writer_ids
                .lock()
                .unwrap()
                .get(&self.host)
                .cloned()
                .unwrap_or_default();
            Ok(vec![vec![if id.is_empty() { None } else { Some(id) }]])
        }

        fn host(&self) -> String {
            self.host.clone()
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl DriverConnector for ScriptedConnector {
        async fn connect(
            &self,
            host: &str,
            _port: i32,
            _attrs: &HashMap<String, String>,
        ) -> Result<Box<dyn DriverConnection>> {
            if self.dead_hosts.lock().unwrap().contains(host) {
                return Err(Error::transient_connection(host, "refused"));
            }
            Ok(Box::new(ScriptedConnection {
                host: host.to_string(),
                topology_rows: self.topology_rows.clone(),
                writer_ids: self.writer_ids.clone(),
                dead_hosts: self.dead_hosts.clone(),
            }))
        }
    }

    fn row(node_id: &str, is_writer: bool, cpu: f64, lag: f64) -> Row {
        vec![
            Some(node_id.to_string()),
            Some(is_writer.to_string()),
            Some(cpu.to_string()),
            Some(lag.to_string()),
        ]
    }

    #[tokio::test]
    async fn regular_refresh_publishes_canonicalized_topology() {
        let connector = ScriptedConnector::default();
        *connector.topology_rows.lock().unwrap() = vec![
            row("a", true, 2.0, 0.0),
            row("b", false, 1.0, 10.0),
            row("c", false, 3.0, 20.0),
        ];

        let options = ClusterAwareOptions::builder()
            .server("a")
            .port(NO_PORT)
            .topology_refresh_rate(Duration::from_millis(20))
            .build();
        let ctm = acquire(
            "cluster-regular".to_string(),
            Arc::new(AuroraPostgres),
            Arc::new(connector),
            HashMap::new(),
            &options,
        );

        let topology = ctm.force_refresh(false, Duration::from_secs(2)).await;
        assert_eq!(topology.len(), 3);
        assert_eq!(topology[0].host(), "b");
        assert_eq!(topology[0].weight(), 1001);
        assert_eq!(topology[1].host(), "c");
        assert_eq!(topology[1].weight(), 2003);
        assert_eq!(topology[2].host(), "a");
        assert_eq!(topology[2].role(), Role::Writer);
    }

    #[tokio::test]
    async fn writer_failover_elects_new_writer_and_opens_quiet_window() {
        let connector = ScriptedConnector::default();
        *connector.topology_rows.lock().unwrap() = vec![row("a", true, 0.0, 0.0), row("b", false, 0.0, 0.0), row("c", false, 0.0, 0.0)];
        connector.writer_ids.lock().unwrap().insert("b".to_string(), "b".to_string());

        let options = ClusterAwareOptions::builder()
            .server("a")
            .port(NO_PORT)
            .topology_refresh_rate(Duration::from_millis(20))
            .ignore_topology_request(Duration::from_secs(30))
            .build();
        let ctm = acquire(
            "cluster-failover".to_string(),
            Arc::new(AuroraPostgres),
            Arc::new(connector.clone()),
            HashMap::new(),
            &options,
        );

        // Prime the cache with an initial regular-mode topology.
        let _ = ctm.force_refresh(false, Duration::from_secs(2)).await;

        // Kill the writer and make "a" unreachable, forcing a panic round; the cluster's own
        // topology view now reflects "b" as the new writer once it is reachable.
        connector.dead_hosts.lock().unwrap().insert("a".to_string());
        *connector.topology_rows.lock().unwrap() = vec![row("b", true, 0.0, 0.0), row("c", false, 0.0, 0.0)];

        let topology = ctm.force_refresh(true, Duration::from_secs(5)).await;
        let writer = topology.iter().find(|h| h.role() == Role::Writer);
        assert!(writer.is_some(), "expected a new writer to be elected: {topology:?}");
        assert_eq!(writer.unwrap().host(), "b");

        // Inside the quiet window, a second force_refresh(true, ...) returns the same cached
        // topology without blocking on a fresh election.
        let again = ctm.force_refresh(true, Duration::from_millis(50)).await;
        assert_eq!(again, topology);
    }

    #[tokio::test]
    async fn force_refresh_zero_timeout_never_blocks_and_is_idempotent() {
        let connector = ScriptedConnector::default();
        *connector.topology_rows.lock().unwrap() = vec![row("a", true, 0.0, 0.0)];
        let options = ClusterAwareOptions::builder().server("a.cluster.example").port(NO_PORT).build();
        let ctm = acquire(
            "cluster-zero-timeout".to_string(),
            Arc::new(AuroraPostgres),
            Arc::new(connector),
            HashMap::new(),
            &options,
        );
        let first = ctm.force_refresh(false, Duration::ZERO).await;
        let second = ctm.force_refresh(false, Duration::ZERO).await;
        assert_eq!(first, second);
    }
}
