//! Connection-string configuration surface, parsed from the attribute map the wrapped driver
//! hands off at connect time rather than from a URI (there is no URI in the ODBC world this
//! crate grew out of).

use std::{collections::HashMap, time::Duration};

use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

const KEY_CLUSTER_ID: &str = "CLUSTER_ID";
const KEY_FAILOVER_MODE: &str = "FAILOVER_MODE";
const KEY_FAILOVER_TIMEOUT_MS: &str = "FAILOVER_TIMEOUT_MS";
const KEY_TOPOLOGY_REFRESH_RATE_MS: &str = "TOPOLOGY_REFRESH_RATE_MS";
const KEY_TOPOLOGY_HIGH_REFRESH_RATE_MS: &str = "TOPOLOGY_HIGH_REFRESH_RATE_MS";
const KEY_IGNORE_TOPOLOGY_REQUEST_MS: &str = "IGNORE_TOPOLOGY_REQUEST_MS";
const KEY_HOST_PATTERN: &str = "HOST_PATTERN";
const KEY_HOST_SELECTOR_STRATEGY: &str = "HOST_SELECTOR_STRATEGY";
const KEY_ENABLE_CLUSTER_FAILOVER: &str = "ENABLE_CLUSTER_FAILOVER";
const KEY_ENABLE_LIMITLESS: &str = "ENABLE_LIMITLESS";
const KEY_LIMITLESS_MODE: &str = "LIMITLESS_MODE";
const KEY_LIMITLESS_MONITOR_INTERVAL_MS: &str = "LIMITLESS_MONITOR_INTERVAL_MS";
const KEY_LIMITLESS_ROUTER_MAX_RETRIES: &str = "LIMITLESS_ROUTER_MAX_RETRIES";
const KEY_LIMITLESS_MAX_RETRIES: &str = "LIMITLESS_MAX_RETRIES";
const KEY_DATABASE_DIALECT: &str = "DATABASE_DIALECT";
const KEY_SERVER: &str = "SERVER";
const KEY_PORT: &str = "PORT";

/// Target role the failover coordinator must re-establish before it considers itself done.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum FailoverMode {
    StrictWriter,
    #[default]
    StrictReader,
    ReaderOrWriter,
}

impl FailoverMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "STRICT_WRITER" => Ok(Self::StrictWriter),
            "STRICT_READER" => Ok(Self::StrictReader),
            "READER_OR_WRITER" => Ok(Self::ReaderOrWriter),
            other => Err(Error::internal(format!("unrecognized {KEY_FAILOVER_MODE}: {other}"))),
        }
    }
}

/// Policy used to pick a host out of the candidates a [`crate::host::HostFilter`] admits.
///
/// The failover coordinator uses this to order reconnection candidates (spec.md §4.6 describes
/// the algorithm in terms of `highest_weight`, which is this enum's default so an unconfigured
/// connection gets exactly that behavior).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum HostSelectorStrategy {
    RandomHost,
    RoundRobin,
    #[default]
    HighestWeight,
}

impl HostSelectorStrategy {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "RANDOM_HOST" => Ok(Self::RandomHost),
            "ROUND_ROBIN" => Ok(Self::RoundRobin),
            "HIGHEST_WEIGHT" => Ok(Self::HighestWeight),
            other => Err(Error::internal(format!("unrecognized {KEY_HOST_SELECTOR_STRATEGY}: {other}"))),
        }
    }
}

/// Whether the Limitless router list is fetched eagerly at connect time or only once a query
/// needs it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum LimitlessMode {
    #[default]
    Immediate,
    Lazy,
}

impl LimitlessMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "IMMEDIATE" => Ok(Self::Immediate),
            "LAZY" => Ok(Self::Lazy),
            other => Err(Error::internal(format!("unrecognized {KEY_LIMITLESS_MODE}: {other}"))),
        }
    }
}

/// Backend flavor selection, independent of the [`crate::dialect::Dialect`] implementation
/// chosen at runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum DatabaseDialect {
    #[default]
    AuroraPostgresql,
    AuroraPostgresqlLimitless,
    AuroraMysql,
}

impl DatabaseDialect {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "AURORA_POSTGRESQL" => Ok(Self::AuroraPostgresql),
            "AURORA_POSTGRESQL_LIMITLESS" => Ok(Self::AuroraPostgresqlLimitless),
            "AURORA_MYSQL" => Ok(Self::AuroraMysql),
            other => Err(Error::internal(format!("unrecognized {KEY_DATABASE_DIALECT}: {other}"))),
        }
    }
}

fn parse_ms(raw: &str, key: &str) -> Result<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::internal(format!("invalid {key}: {raw}")))
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw {
        "true" | "TRUE" | "1" => Ok(true),
        "false" | "FALSE" | "0" => Ok(false),
        other => Err(Error::internal(format!("invalid {key}: {other}"))),
    }
}

fn parse_u32(raw: &str, key: &str) -> Result<u32> {
    raw.parse::<u32>()
        .map_err(|_| Error::internal(format!("invalid {key}: {raw}")))
}

/// Parsed, typed configuration for one connection. Built from the attribute map handed down
/// by the wrapped driver; keys this crate doesn't recognize are kept verbatim in
/// [`ClusterAwareOptions::extra_attrs`] so they can be forwarded unchanged to the next plugin.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ClusterAwareOptions {
    /// Configured override for the derived cluster id; empty means "not set".
    #[builder(default)]
    pub cluster_id_override: Option<String>,

    pub server: String,

    #[builder(default_code = "crate::host::NO_PORT")]
    pub port: i32,

    #[builder(default)]
    pub database: Option<String>,

    #[builder(default)]
    pub uid: Option<String>,

    #[builder(default)]
    pub pwd: Option<String>,

    #[builder(default)]
    pub failover_mode: FailoverMode,

    #[builder(default_code = "Duration::from_millis(30_000)")]
    pub failover_timeout: Duration,

    #[builder(default_code = "Duration::from_millis(30_000)")]
    pub topology_refresh_rate: Duration,

    #[builder(default_code = "Duration::from_millis(100)")]
    pub topology_high_refresh_rate: Duration,

    #[builder(default_code = "Duration::from_millis(30_000)")]
    pub ignore_topology_request: Duration,

    /// Template host carrying a `?` placeholder for the node id; no `?` means every node uses
    /// this host unchanged.
    #[builder(default)]
    pub host_pattern: Option<String>,

    #[builder(default)]
    pub host_selector_strategy: HostSelectorStrategy,

    #[builder(default_code = "true")]
    pub enable_cluster_failover: bool,

    #[builder(default)]
    pub enable_limitless: bool,

    #[builder(default)]
    pub limitless_mode: LimitlessMode,

    #[builder(default_code = "Duration::from_millis(7_500)")]
    pub limitless_monitor_interval: Duration,

    #[builder(default_code = "5")]
    pub limitless_router_max_retries: u32,

    #[builder(default_code = "5")]
    pub limitless_max_retries: u32,

    #[builder(default)]
    pub database_dialect: DatabaseDialect,

    /// Recognized-but-unconsumed and unrecognized attributes, forwarded to the next plugin's
    /// `Connect` unchanged.
    #[builder(default)]
    pub extra_attrs: HashMap<String, String>,
}

impl ClusterAwareOptions {
    /// Parses the attribute map the wrapped driver's `Connect` receives into typed options.
    /// Unknown keys (and `SERVER`/`PORT`/`DATABASE`/`UID`/`PWD`, which the next plugin still
    /// needs) are preserved in [`Self::extra_attrs`].
    pub fn from_attrs(attrs: &HashMap<String, String>) -> Result<Self> {
        let server = attrs
            .get(KEY_SERVER)
            .cloned()
            .ok_or_else(|| Error::internal(format!("missing required {KEY_SERVER}")))?;

        let mut builder = Self::builder().server(server.clone());

        if let Some(v) = attrs.get(KEY_CLUSTER_ID) {
            builder = builder.cluster_id_override(Some(v.clone()));
        }
        if let Some(v) = attrs.get(KEY_PORT) {
            let port = v.parse::<i32>().map_err(|_| Error::internal(format!("invalid {KEY_PORT}: {v}")))?;
            builder = builder.port(port);
        }
        if let Some(v) = attrs.get(KEY_FAILOVER_MODE) {
            builder = builder.failover_mode(FailoverMode::parse(v)?);
        }
        if let Some(v) = attrs.get(KEY_FAILOVER_TIMEOUT_MS) {
            builder = builder.failover_timeout(parse_ms(v, KEY_FAILOVER_TIMEOUT_MS)?);
        }
        if let Some(v) = attrs.get(KEY_TOPOLOGY_REFRESH_RATE_MS) {
            builder = builder.topology_refresh_rate(parse_ms(v, KEY_TOPOLOGY_REFRESH_RATE_MS)?);
        }
        if let Some(v) = attrs.get(KEY_TOPOLOGY_HIGH_REFRESH_RATE_MS) {
            builder = builder.topology_high_refresh_rate(parse_ms(v, KEY_TOPOLOGY_HIGH_REFRESH_RATE_MS)?);
        }
        if let Some(v) = attrs.get(KEY_IGNORE_TOPOLOGY_REQUEST_MS) {
            builder = builder.ignore_topology_request(parse_ms(v, KEY_IGNORE_TOPOLOGY_REQUEST_MS)?);
        }
        if let Some(v) = attrs.get(KEY_HOST_PATTERN) {
            builder = builder.host_pattern(Some(v.clone()));
        }
        if let Some(v) = attrs.get(KEY_HOST_SELECTOR_STRATEGY) {
            builder = builder.host_selector_strategy(HostSelectorStrategy::parse(v)?);
        }
        if let Some(v) = attrs.get(KEY_ENABLE_CLUSTER_FAILOVER) {
            builder = builder.enable_cluster_failover(parse_bool(v, KEY_ENABLE_CLUSTER_FAILOVER)?);
        }
        if let Some(v) = attrs.get(KEY_ENABLE_LIMITLESS) {
            builder = builder.enable_limitless(parse_bool(v, KEY_ENABLE_LIMITLESS)?);
        }
        if let Some(v) = attrs.get(KEY_LIMITLESS_MODE) {
            builder = builder.limitless_mode(LimitlessMode::parse(v)?);
        }
        if let Some(v) = attrs.get(KEY_LIMITLESS_MONITOR_INTERVAL_MS) {
            builder = builder.limitless_monitor_interval(parse_ms(v, KEY_LIMITLESS_MONITOR_INTERVAL_MS)?);
        }
        if let Some(v) = attrs.get(KEY_LIMITLESS_ROUTER_MAX_RETRIES) {
            builder = builder.limitless_router_max_retries(parse_u32(v, KEY_LIMITLESS_ROUTER_MAX_RETRIES)?);
        }
        if let Some(v) = attrs.get(KEY_LIMITLESS_MAX_RETRIES) {
            builder = builder.limitless_max_retries(parse_u32(v, KEY_LIMITLESS_MAX_RETRIES)?);
        }
        if let Some(v) = attrs.get(KEY_DATABASE_DIALECT) {
            builder = builder.database_dialect(DatabaseDialect::parse(v)?);
        }
        builder = builder.database(attrs.get(KEY_DATABASE).cloned());
        builder = builder.uid(attrs.get(KEY_UID).cloned());
        builder = builder.pwd(attrs.get(KEY_PWD).cloned());

        let recognized: &[&str] = &[
            KEY_CLUSTER_ID,
            KEY_SERVER,
            KEY_PORT,
            KEY_DATABASE,
            KEY_UID,
            KEY_PWD,
            KEY_FAILOVER_MODE,
            KEY_FAILOVER_TIMEOUT_MS,
            KEY_TOPOLOGY_REFRESH_RATE_MS,
            KEY_TOPOLOGY_HIGH_REFRESH_RATE_MS,
            KEY_IGNORE_TOPOLOGY_REQUEST_MS,
            KEY_HOST_PATTERN,
            KEY_HOST_SELECTOR_STRATEGY,
            KEY_ENABLE_CLUSTER_FAILOVER,
            KEY_ENABLE_LIMITLESS,
            KEY_LIMITLESS_MODE,
            KEY_LIMITLESS_MONITOR_INTERVAL_MS,
            KEY_LIMITLESS_ROUTER_MAX_RETRIES,
            KEY_LIMITLESS_MAX_RETRIES,
            KEY_DATABASE_DIALECT,
        ];
        let extra_attrs = attrs
            .iter()
            .filter(|(k, _)| !recognized.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        builder = builder.extra_attrs(extra_attrs);

        Ok(builder.build())
    }
}

const KEY_DATABASE: &str = "DATABASE";
const KEY_UID: &str = "UID";
const KEY_PWD: &str = "PWD";

#[cfg(test)]
mod test {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_keys_are_absent() {
        let opts = ClusterAwareOptions::from_attrs(&attrs(&[("SERVER", "writer-a.cluster.example")])).unwrap();
        assert_eq!(opts.failover_mode, FailoverMode::StrictReader);
        assert_eq!(opts.failover_timeout, Duration::from_millis(30_000));
        assert_eq!(opts.limitless_monitor_interval, Duration::from_millis(7_500));
        assert!(opts.enable_cluster_failover);
        assert!(!opts.enable_limitless);
    }

    #[test]
    fn unknown_keys_are_preserved_for_pass_through() {
        let opts = ClusterAwareOptions::from_attrs(&attrs(&[
            ("SERVER", "writer-a.cluster.example"),
            ("SSLMODE", "require"),
        ]))
        .unwrap();
        assert_eq!(opts.extra_attrs.get("SSLMODE").map(String::as_str), Some("require"));
    }

    #[test]
    fn recognized_enum_options_parse() {
        let opts = ClusterAwareOptions::from_attrs(&attrs(&[
            ("SERVER", "writer-a.cluster.example"),
            ("FAILOVER_MODE", "STRICT_WRITER"),
            ("HOST_SELECTOR_STRATEGY", "ROUND_ROBIN"),
            ("DATABASE_DIALECT", "AURORA_POSTGRESQL_LIMITLESS"),
        ]))
        .unwrap();
        assert_eq!(opts.failover_mode, FailoverMode::StrictWriter);
        assert_eq!(opts.host_selector_strategy, HostSelectorStrategy::RoundRobin);
        assert_eq!(opts.database_dialect, DatabaseDialect::AuroraPostgresqlLimitless);
    }

    #[test]
    fn missing_server_is_an_error() {
        assert!(ClusterAwareOptions::from_attrs(&attrs(&[])).is_err());
    }
}
