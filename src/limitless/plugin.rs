//! The Limitless plugin: the first link in the chain (spec.md's system overview diagram has it
//! ahead of Failover), responsible for rewriting a Connect request's target host to a shard-group
//! router endpoint before delegating to the rest of the chain.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    cluster_id,
    dialect::Dialect,
    driver::{DriverConnection, DriverConnector},
    error::Result,
    host::NO_PORT,
    limitless::router::{self, RouterMonitor},
    options::{ClusterAwareOptions, LimitlessMode},
    plugin::Plugin,
    registry,
};

/// Upper bound on how long `LIMITLESS_MODE=IMMEDIATE` blocks the first connect waiting for the
/// router monitor's initial query, beyond which it proceeds with whatever the monitor has (which
/// may still be empty, falling through to `establish_connection`'s own direct-query retry).
const INITIAL_QUERY_WAIT: Duration = Duration::from_secs(5);

/// Plugin that, when `ENABLE_LIMITLESS` is set, replaces a Connect request's target with a
/// load-balanced router endpoint (spec.md §4.7) instead of connecting directly to the
/// configured server. Disabled (or against a non-Limitless dialect), it passes the request
/// through unchanged.
pub struct LimitlessPlugin {
    next: Arc<dyn Plugin>,
    side_connector: Arc<dyn DriverConnector>,
    dialect: Arc<dyn Dialect>,
    options: ClusterAwareOptions,
}

impl LimitlessPlugin {
    /// `next` is the remainder of the plugin chain a router endpoint connects through once
    /// chosen. `side_connector` is the raw driver capability the Router Monitor uses for its own
    /// dedicated connection, independent of the plugin chain.
    pub fn new(
        next: Arc<dyn Plugin>,
        side_connector: Arc<dyn DriverConnector>,
        dialect: Arc<dyn Dialect>,
        options: ClusterAwareOptions,
    ) -> Self {
        Self {
            next,
            side_connector,
            dialect,
            options,
        }
    }

    fn seed_port(&self) -> i32 {
        if self.options.port == NO_PORT {
            self.dialect.default_port()
        } else {
            self.options.port
        }
    }

    fn acquire_monitor(&self, attributes: &HashMap<String, String>) -> registry::Handle<String, RouterMonitor> {
        let service_id = cluster_id::derive(self.options.cluster_id_override.as_deref(), &self.options.server);
        router::acquire(
            service_id,
            self.dialect.clone(),
            self.side_connector.clone(),
            attributes.clone(),
            self.options.server.clone(),
            self.seed_port(),
            self.options.limitless_monitor_interval,
        )
    }
}

#[async_trait]
impl Plugin for LimitlessPlugin {
    async fn connect(&self, attributes: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
        if !self.options.enable_limitless {
            return self.next.connect(attributes).await;
        }
        if self.dialect.as_limitless().is_none() {
            return Err(crate::error::Error::unsupported_dialect("limitless routing"));
        }

        let monitor = self.acquire_monitor(attributes);
        if self.options.limitless_mode == LimitlessMode::Immediate {
            monitor.wait_initial_ready(INITIAL_QUERY_WAIT).await;
        }

        router::establish_connection(
            &monitor,
            &self.next,
            attributes,
            self.options.limitless_router_max_retries,
            self.options.limitless_max_retries,
            self.options.limitless_monitor_interval,
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dialect::{AuroraPostgres, AuroraPostgresLimitless},
        driver::Row,
        options::ClusterAwareOptions,
    };
    struct StubConnection {
        host: String,
        rows: Vec<Row>,
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
    }

    #[async_trait]
    impl DriverConnector for StubConnector {
        async fn connect(&self, host: &str, _port: i32, _attrs: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
            Ok(Box::new(StubConnection {
                host: host.to_string(),
                rows: self.rows.clone(),
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
    async fn disabled_passes_through_unchanged() {
        let connector = Arc::new(StubConnector { rows: vec![] });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));
        let options = ClusterAwareOptions::builder()
            .server("writer-a.cluster.example")
            .port(NO_PORT)
            .enable_limitless(false)
            .build();
        let plugin = LimitlessPlugin::new(next, connector, Arc::new(AuroraPostgresLimitless::default()), options);

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "writer-a.cluster.example".to_string());
        let conn = plugin.connect(&attrs).await.unwrap();
        assert_eq!(conn.host(), "writer-a.cluster.example");
    }

    #[tokio::test]
    async fn enabled_against_non_limitless_dialect_is_unsupported() {
        let connector = Arc::new(StubConnector { rows: vec![] });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));
        let options = ClusterAwareOptions::builder()
            .server("writer-a.cluster.example")
            .port(NO_PORT)
            .enable_limitless(true)
            .build();
        let plugin = LimitlessPlugin::new(next, connector, Arc::new(AuroraPostgres), options);

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "writer-a.cluster.example".to_string());
        let err = plugin.connect(&attrs).await.unwrap_err();
        assert!(matches!(*err.kind, crate::error::ErrorKind::UnsupportedDialect { .. }));
    }

    #[tokio::test]
    async fn enabled_rewrites_the_target_to_a_router_endpoint() {
        let connector = Arc::new(StubConnector {
            rows: vec![router_row("router-1", 0.1)],
        });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));
        let options = ClusterAwareOptions::builder()
            .server("limitless.cluster.example")
            .port(NO_PORT)
            .enable_limitless(true)
            .limitless_mode(crate::options::LimitlessMode::Immediate)
            .build();
        let plugin = LimitlessPlugin::new(
            next,
            connector,
            Arc::new(AuroraPostgresLimitless::default()),
            options,
        );

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "limitless.cluster.example".to_string());
        let conn = plugin.connect(&attrs).await.unwrap();
        assert_eq!(conn.host(), "router-1");
    }

    #[tokio::test]
    async fn no_routers_surfaces_no_candidate() {
        let connector = Arc::new(StubConnector { rows: vec![] });
        let next: Arc<dyn Plugin> = Arc::new(StubPlugin(connector.clone()));
        let options = ClusterAwareOptions::builder()
            .server("limitless-empty.cluster.example")
            .port(NO_PORT)
            .enable_limitless(true)
            .limitless_mode(crate::options::LimitlessMode::Immediate)
            .limitless_router_max_retries(1u32)
            .build();
        let plugin = LimitlessPlugin::new(
            next,
            connector,
            Arc::new(AuroraPostgresLimitless::default()),
            options,
        );

        let mut attrs = HashMap::new();
        attrs.insert("SERVER".to_string(), "limitless-empty.cluster.example".to_string());
        let err = plugin.connect(&attrs).await.unwrap_err();
        assert!(err.is_no_candidate());
    }
}
