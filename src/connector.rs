//! Top-level wiring: resolves a [`DatabaseDialect`] selection to its [`Dialect`] and assembles
//! the plugin chain a `Connect` request traverses, per the system overview diagram in spec.md
//! §2 (`Limitless -> Failover -> Custom-EP -> Next`). This crate owns the first two links;
//! `Custom-EP` and the terminal driver link belong to the embedding driver, represented here by
//! the [`crate::driver::DriverConnector`] the caller supplies.

use std::sync::Arc;

use crate::{
    dialect::{AuroraMySql, AuroraPostgres, AuroraPostgresLimitless, Dialect},
    driver::DriverConnector,
    failover::FailoverPlugin,
    host::NO_PORT,
    limitless::LimitlessPlugin,
    options::{ClusterAwareOptions, DatabaseDialect},
    plugin::{Plugin, TerminalPlugin},
};

/// Resolves a [`DatabaseDialect`] selection into its concrete [`Dialect`] implementation.
pub fn dialect_for(selection: DatabaseDialect) -> Arc<dyn Dialect> {
    match selection {
        DatabaseDialect::AuroraPostgresql => Arc::new(AuroraPostgres),
        DatabaseDialect::AuroraPostgresqlLimitless => Arc::new(AuroraPostgresLimitless::default()),
        DatabaseDialect::AuroraMysql => Arc::new(AuroraMySql),
    }
}

/// Builds the full plugin chain for one connection: a Limitless router link (a no-op pass-
/// through unless `ENABLE_LIMITLESS` is set) wrapping a Failover link (likewise a pass-through
/// unless `ENABLE_CLUSTER_FAILOVER` is set) wrapping a terminal link that hands `Connect`
/// requests to `connector`. `connector` is also reused as the dedicated side-connection
/// capability for the Cluster Topology Monitor and the Limitless Router Monitor, matching the
/// specification's "owns no database sockets directly, only via calls to the next plugin's
/// Connect" contract for the wrapped driver boundary.
pub fn build_plugin_chain(options: ClusterAwareOptions, connector: Arc<dyn DriverConnector>) -> Arc<dyn Plugin> {
    let dialect = dialect_for(options.database_dialect);
    let port = if options.port == NO_PORT {
        dialect.default_port()
    } else {
        options.port
    };
    let terminal: Arc<dyn Plugin> = Arc::new(TerminalPlugin::new(connector.clone(), options.server.clone(), port));

    let with_failover: Arc<dyn Plugin> =
        Arc::new(FailoverPlugin::new(terminal, connector.clone(), dialect.clone(), options.clone()));

    Arc::new(LimitlessPlugin::new(with_failover, connector, dialect, options))
}
