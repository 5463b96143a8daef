//! The Router Monitor (a background engine keeping one Limitless shard group's router
//! endpoint list fresh) and the connect-with-retry algorithm a [`crate::plugin::Plugin`] uses
//! to establish a session through one of those endpoints.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::{
    dialect::Dialect,
    driver::{DriverConnection, DriverConnector},
    error::{Error, Result},
    host::{limitless_weight, HostInfo, HostState, Role, NO_PORT},
    plugin::Plugin,
    registry::{ManagedMonitor, Registry},
    runtime,
    selector::{HighestWeight, HostSelector, RoundRobin, SelectorProps},
    topology::query::conn_for_host,
};

fn registry() -> &'static Registry<String, RouterMonitor> {
    static REGISTRY: Registry<String, RouterMonitor> = Registry::new();
    &REGISTRY
}

/// Returns a handle to the router monitor for `service_id`, starting one if this is the first
/// consumer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn acquire(
    service_id: String,
    dialect: Arc<dyn Dialect>,
    connector: Arc<dyn DriverConnector>,
    base_attrs: HashMap<String, String>,
    seed_host: String,
    seed_port: i32,
    interval: Duration,
) -> crate::registry::Handle<String, RouterMonitor> {
    let (handle, _created) = registry().acquire(service_id.clone(), move || {
        RouterMonitor::start(service_id, dialect, connector, base_attrs, seed_host, seed_port, interval)
    });
    handle
}

/// Long-lived, per-service background engine keeping the router endpoint list fresh. Construct
/// via [`acquire`]; consumers never build one directly, matching the monitor registration
/// lifecycle CTM also follows.
pub(crate) struct RouterMonitor {
    service_id: String,
    dialect: Arc<dyn Dialect>,
    connector: Arc<dyn DriverConnector>,
    base_attrs: HashMap<String, String>,
    seed_host: String,
    seed_port: i32,
    interval: Duration,
    routers: std::sync::Mutex<Vec<HostInfo>>,
    round_robin: RoundRobin,
    running: AtomicBool,
    initial_ready: AtomicBool,
    initial_ready_notify: Notify,
    main_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RouterMonitor {
    #[allow(clippy::too_many_arguments)]
    fn start(
        service_id: String,
        dialect: Arc<dyn Dialect>,
        connector: Arc<dyn DriverConnector>,
        base_attrs: HashMap<String, String>,
        seed_host: String,
        seed_port: i32,
        interval: Duration,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self {
            service_id,
            dialect,
            connector,
            base_attrs,
            seed_host,
            seed_port,
            interval,
            routers: std::sync::Mutex::new(Vec::new()),
            round_robin: RoundRobin::new(),
            running: AtomicBool::new(true),
            initial_ready: AtomicBool::new(false),
            initial_ready_notify: Notify::new(),
            main_task: std::sync::Mutex::new(None),
        });
        let task_monitor = monitor.clone();
        let handle = runtime::spawn(async move { main_loop(task_monitor).await });
        *monitor.main_task.lock().unwrap() = Some(handle);
        monitor
    }

    /// Current router list, sampled under the list's mutex.
    pub(crate) fn snapshot(&self) -> Vec<HostInfo> {
        self.routers.lock().unwrap().clone()
    }

    fn publish(&self, routers: Vec<HostInfo>) {
        self.round_robin.set_round_robin_weight(&routers, &SelectorProps::new());
        *self.routers.lock().unwrap() = routers;
        self.initial_ready.store(true, Ordering::SeqCst);
        self.initial_ready_notify.notify_waiters();
    }

    /// Blocks (bounded by `timeout`) until the monitor's first router query has completed,
    /// whether or not it found any routers. Used by `LIMITLESS_MODE=IMMEDIATE`.
    pub(crate) async fn wait_initial_ready(&self, timeout: Duration) {
        if self.initial_ready.load(Ordering::SeqCst) {
            return;
        }
        let _ = runtime::timeout(timeout, "limitless router monitor initial query", self.initial_ready_notify.notified()).await;
    }

    /// Runs the dialect's router-endpoint query over `conn` and parses `(endpoint, load)` rows
    /// into reader-tagged [`HostInfo`]: router endpoints carry no writer/reader distinction of
    /// their own, and tagging them `Role::Reader` lets the existing `want_writer=false` selector
    /// path apply unchanged rather than adding a third selection mode just for routers.
    async fn query_routers(&self, conn: &dyn DriverConnection) -> Result<Vec<HostInfo>> {
        let limitless = self
            .dialect
            .as_limitless()
            .ok_or_else(|| Error::unsupported_dialect("limitless routing"))?;
        let rows = conn.query(limitless.limitless_router_endpoint_query()).await?;
        let mut hosts = Vec::with_capacity(rows.len());
        for row in &rows {
            let endpoint = row.first().and_then(|v| v.as_deref()).unwrap_or_default();
            if endpoint.is_empty() {
                continue;
            }
            let load: f64 = row
                .get(1)
                .and_then(|v| v.as_deref())
                .and_then(|v| v.parse().ok())
                .unwrap_or(f64::NAN);
            let weight = limitless_weight(load);
            hosts.push(HostInfo::new(endpoint, self.seed_port, Role::Reader, HostState::Up, weight));
        }
        if hosts.is_empty() {
            tracing::warn!(service_id = %self.service_id, "limitless router monitor found no routers");
        }
        Ok(hosts)
    }

    async fn open_seed_connection(&self) -> Option<Box<dyn DriverConnection>> {
        let attrs = conn_for_host(&self.base_attrs, &self.seed_host, self.seed_port);
        match self.connector.connect(&self.seed_host, self.seed_port, &attrs).await {
            Ok(conn) => Some(conn),
            Err(error) => {
                tracing::warn!(service_id = %self.service_id, %error, "failed to open the router monitor's connection");
                None
            }
        }
    }

    /// A single out-of-band router query on a fresh connection, used by [`establish_connection`]
    /// when the monitor's own list is still empty (e.g. lazy mode, or the monitor hasn't ticked
    /// yet).
    async fn direct_query(&self) -> Option<Vec<HostInfo>> {
        let conn = self.open_seed_connection().await?;
        let result = self.query_routers(conn.as_ref()).await;
        conn.close().await;
        match result {
            Ok(routers) => Some(routers),
            Err(error) => {
                tracing::warn!(service_id = %self.service_id, %error, "direct router query failed");
                None
            }
        }
    }
}

#[async_trait]
impl ManagedMonitor for RouterMonitor {
    async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.initial_ready_notify.notify_waiters();
        let handle = self.main_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn main_loop(monitor: Arc<RouterMonitor>) {
    let mut conn: Option<Box<dyn DriverConnection>> = None;
    while monitor.running.load(Ordering::SeqCst) {
        if conn.is_none() {
            conn = monitor.open_seed_connection().await;
        }
        if let Some(active) = conn.as_deref() {
            match monitor.query_routers(active).await {
                Ok(routers) => monitor.publish(routers),
                Err(error) => {
                    tracing::warn!(service_id = %monitor.service_id, %error, "lost the router monitor connection");
                    conn = None;
                }
            }
        } else {
            // Still mark the tick "ready" so IMMEDIATE mode doesn't block forever on an
            // unreachable seed; establish_connection's own direct-query fallback will retry.
            monitor.initial_ready.store(true, Ordering::SeqCst);
            monitor.initial_ready_notify.notify_waiters();
        }

        runtime::delay_for(monitor.interval).await;
    }
    if let Some(conn) = conn.take() {
        conn.close().await;
    }
}

/// Implements the specification's `establish_connection` algorithm: snapshot the router list,
/// fall back to a direct query if empty, pick round-robin first, then retry by highest weight
/// (marking failed candidates down locally) if that fails.
pub(crate) async fn establish_connection(
    monitor: &RouterMonitor,
    next: &Arc<dyn Plugin>,
    base_attrs: &HashMap<String, String>,
    router_max_retries: u32,
    connect_max_retries: u32,
    retry_interval: Duration,
) -> Result<Box<dyn DriverConnection>> {
    let mut routers = monitor.snapshot();
    if routers.is_empty() {
        for attempt in 0..router_max_retries.max(1) {
            routers = monitor.direct_query().await.unwrap_or_default();
            if !routers.is_empty() {
                break;
            }
            if attempt + 1 < router_max_retries {
                runtime::delay_for(retry_interval).await;
            }
        }
    }
    if routers.is_empty() {
        return Err(Error::no_candidate("limitless router list is empty"));
    }

    if let Ok(host) = monitor.round_robin.pick(&routers, false, &SelectorProps::new()) {
        let attrs = conn_for_host(base_attrs, host.host(), host.port());
        match next.connect(&attrs).await {
            Ok(conn) => return Ok(conn),
            Err(error) => {
                tracing::warn!(host = %host.host(), %error, "round-robin router candidate refused the connection");
                if let Some(h) = routers.iter_mut().find(|h| h.host_id() == host.host_id()) {
                    h.mark_down();
                }
            }
        }
    }

    for _ in 0..connect_max_retries {
        let host = match HighestWeight.pick(&routers, false, &SelectorProps::new()) {
            Ok(host) => host,
            Err(_) => break,
        };
        let attrs = conn_for_host(base_attrs, host.host(), host.port());
        match next.connect(&attrs).await {
            Ok(conn) => return Ok(conn),
            Err(error) => {
                tracing::warn!(host = %host.host(), %error, "highest-weight router candidate refused the connection");
                if let Some(h) = routers.iter_mut().find(|h| h.host_id() == host.host_id()) {
                    h.mark_down();
                }
            }
        }
    }

    Err(Error::no_candidate("limitless establish_connection exhausted every router candidate"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{dialect::AuroraPostgresLimitless, driver::Row};
    use std::sync::Mutex as StdMutex;

    struct StubConnection {
        host: String,
        rows: Vec<Row>,
        refuse: Arc<StdMutex<std::collections::HashSet<String>>>,
    }

    #[async_trait]
    impl DriverConnection for StubConnection {
        async fn query(&self, _query: &str) -> Result<Vec<Row>> {
            Ok(self.rows.clone())
        }

        fn host(&self) -> String {
            self.host.clone()
        }

        async fn close(&self) {}
    }

    struct StubConnector {
        rows: Vec<Row>,
        refuse: Arc<StdMutex<std::collections::HashSet<String>>>,
    }

    #[async_trait]
    impl DriverConnector for StubConnector {
        async fn connect(&self, host: &str, _port: i32, _attrs: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
            if self.refuse.lock().unwrap().contains(host) {
                return Err(Error::transient_connection(host, "refused"));
            }
            Ok(Box::new(StubConnection {
                host: host.to_string(),
                rows: self.rows.clone(),
                refuse: self.refuse.clone(),
            }))
        }
    }

    struct StubPlugin(Arc<StubConnector>);

    #[async_trait]
    impl Plugin for StubPlugin {
        async fn connect(&self, attributes: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
            let host = attributes.get("SERVER").cloned().unwrap_or_default();
            self.0.connect(&host, NO_PORT, attributes).await
        }
    }

    fn router_row(endpoint: &str, load: f64) -> Row {
        vec![Some(endpoint.to_string()), Some(load.to_string())]
    }

    #[tokio::test]
    async fn query_routers_computes_limitless_weights_from_load() {
        let connector = StubConnector {
            rows: vec![router_row("ep1", 0.2), router_row("ep2", 0.8)],
            refuse: Arc::new(StdMutex::new(Default::default())),
        };
        let conn = connector.connect("seed", NO_PORT, &HashMap::new()).await.unwrap();

        let monitor = RouterMonitor::start(
            "svc".to_string(),
            Arc::new(AuroraPostgresLimitless::default()),
            Arc::new(StubConnector {
                rows: vec![],
                refuse: Arc::new(StdMutex::new(Default::default())),
            }),
            HashMap::new(),
            "seed".to_string(),
            NO_PORT,
            Duration::from_secs(3600),
        );
        let routers = monitor.query_routers(conn.as_ref()).await.unwrap();
        assert_eq!(routers.len(), 2);
        assert_eq!(routers[0].host(), "ep1");
        assert_eq!(routers[0].weight(), 80);
        assert_eq!(routers[1].host(), "ep2");
        assert_eq!(routers[1].weight(), 20);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn establish_connection_falls_back_to_direct_query_when_list_is_empty() {
        let refuse = Arc::new(StdMutex::new(Default::default()));
        let connector = Arc::new(StubConnector {
            rows: vec![router_row("ep1", 0.5)],
            refuse: refuse.clone(),
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));

        let monitor = RouterMonitor::start(
            "svc-direct".to_string(),
            Arc::new(AuroraPostgresLimitless::default()),
            connector.clone() as Arc<dyn DriverConnector>,
            HashMap::new(),
            "ep1".to_string(),
            NO_PORT,
            Duration::from_secs(3600),
        );
        assert!(monitor.snapshot().is_empty());

        let conn = establish_connection(&monitor, &next, &HashMap::new(), 3, 3, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(conn.host(), "ep1");
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn establish_connection_falls_back_to_highest_weight_when_round_robin_pick_refuses() {
        let refuse = Arc::new(StdMutex::new(std::collections::HashSet::from(["ep1".to_string()])));
        let connector = Arc::new(StubConnector {
            rows: vec![router_row("ep1", 0.9), router_row("ep2", 0.1)],
            refuse: refuse.clone(),
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));

        let monitor = RouterMonitor::start(
            "svc-fallback".to_string(),
            Arc::new(AuroraPostgresLimitless::default()),
            connector.clone() as Arc<dyn DriverConnector>,
            HashMap::new(),
            "ep1".to_string(),
            NO_PORT,
            Duration::from_secs(3600),
        );
        monitor.wait_initial_ready(Duration::from_secs(2)).await;
        assert_eq!(monitor.snapshot().len(), 2);

        let conn = establish_connection(&monitor, &next, &HashMap::new(), 3, 3, Duration::from_millis(10))
            .await
            .unwrap();
        // ep1 has the lowest weight (10, the most loaded) so round-robin tries it first; it
        // refuses, so the highest-weight fallback lands on ep2.
        assert_eq!(conn.host(), "ep2");
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn establish_connection_fails_when_no_routers_are_ever_found() {
        let connector = Arc::new(StubConnector {
            rows: vec![],
            refuse: Arc::new(StdMutex::new(Default::default())),
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));

        let monitor = RouterMonitor::start(
            "svc-empty".to_string(),
            Arc::new(AuroraPostgresLimitless::default()),
            connector.clone() as Arc<dyn DriverConnector>,
            HashMap::new(),
            "seed".to_string(),
            NO_PORT,
            Duration::from_secs(3600),
        );

        let err = establish_connection(&monitor, &next, &HashMap::new(), 2, 2, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(err.is_no_candidate());
        monitor.shutdown().await;
    }
}
