//! Host identity, state, and filtering — the data model shared by the topology monitor,
//! the failover coordinator, and the Limitless router service.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

/// Sentinel used when a host has no explicit port (the wrapped driver's default applies).
pub const NO_PORT: i32 = -1;

/// Role of a cluster node, as last observed by a topology refresh.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    Writer,
    Reader,
    Unknown,
}

/// Availability of a cluster node, as last observed (or forced down by the failover
/// coordinator after a failed connection attempt).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HostState {
    Up,
    Down,
}

/// Identity and last-known state of one cluster endpoint.
///
/// Equality is `host + port + role + weight`, matching the specification; there is no
/// intrinsic ordering, since selectors each impose their own.
#[derive(Clone, Debug)]
pub struct HostInfo {
    host: String,
    host_id: String,
    port: i32,
    role: Role,
    state: HostState,
    weight: u64,
    last_update: Instant,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: i32, role: Role, state: HostState, weight: u64) -> Self {
        let host = host.into();
        let host_id = derive_host_id(&host);
        Self {
            host,
            host_id,
            port,
            role,
            state,
            weight,
            last_update: Instant::now(),
        }
    }

    /// Builds a host with an explicit `last_update`, used when reconstructing a host whose
    /// freshness must be compared against siblings parsed in the same topology row.
    pub(crate) fn with_last_update(mut self, last_update: Instant) -> Self {
        self.last_update = last_update;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The leading DNS label of `host`, or the full host if it contains no dot.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn is_up(&self) -> bool {
        self.state == HostState::Up
    }

    pub(crate) fn mark_down(&mut self) {
        self.state = HostState::Down;
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.role == other.role
            && self.weight == other.weight
    }
}

impl Eq for HostInfo {}

fn derive_host_id(host: &str) -> String {
    match host.find('.') {
        Some(idx) => host[..idx].to_string(),
        None => host.to_string(),
    }
}

/// `weight = round(replica_lag_ms * 100 + cpu_usage_pct)`. Lower is better: this is an Aurora
/// replica's current load, not a selection priority.
pub(crate) fn aurora_weight(replica_lag_ms: f64, cpu_usage_pct: f64) -> u64 {
    (replica_lag_ms * 100.0 + cpu_usage_pct).round().max(0.0) as u64
}

/// Limitless inverts the Aurora convention: higher load means a lower weight, so the
/// highest-weight selector still means "least loaded." `load` is expected in `[0.0, 1.0]`;
/// values outside that range (including NaN from a malformed query result) fall back to
/// [`MIN_WEIGHT`].
pub(crate) const WEIGHT_SCALING: i64 = 100;
pub(crate) const MIN_WEIGHT: i64 = 0;
pub(crate) const MAX_WEIGHT: i64 = 100;

pub(crate) fn limitless_weight(load: f64) -> u64 {
    let raw = WEIGHT_SCALING - (load * WEIGHT_SCALING as f64).floor() as i64;
    if !load.is_finite() || raw < MIN_WEIGHT || raw > MAX_WEIGHT {
        tracing::warn!(load, "invalid router load, falling back to minimum weight");
        MIN_WEIGHT as u64
    } else {
        raw as u64
    }
}

/// Filters the hosts visible to a consumer down to an allowed or blocked set of `host_id`s,
/// plus an optional endpoint-type label that excludes writers from a reader-only view.
///
/// At most one of `allowed`/`blocked` is meant to be non-empty; if both are set, `allowed`
/// wins, matching the specification.
#[derive(Clone, Debug, Default)]
pub struct HostFilter {
    allowed: HashSet<String>,
    blocked: HashSet<String>,
    endpoint_type: Option<EndpointType>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointType {
    Reader,
}

impl HostFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed(mut self, allowed: impl IntoIterator<Item = String>) -> Self {
        self.allowed = allowed.into_iter().collect();
        self
    }

    pub fn with_blocked(mut self, blocked: impl IntoIterator<Item = String>) -> Self {
        self.blocked = blocked.into_iter().collect();
        self
    }

    pub fn with_endpoint_type(mut self, endpoint_type: EndpointType) -> Self {
        self.endpoint_type = Some(endpoint_type);
        self
    }

    /// Returns the subset of `hosts` this filter permits a caller to see.
    pub fn apply<'a>(&self, hosts: &'a [HostInfo]) -> Vec<&'a HostInfo> {
        hosts
            .iter()
            .filter(|h| self.permits(h))
            .collect()
    }

    fn permits(&self, host: &HostInfo) -> bool {
        if !self.allowed.is_empty() {
            return self.allowed.contains(host.host_id());
        }
        if self.blocked.contains(host.host_id()) {
            return false;
        }
        if self.endpoint_type == Some(EndpointType::Reader) && host.role() == Role::Writer {
            return false;
        }
        true
    }
}

/// Default TTL used by the sliding cache for published topologies, chosen to outlive a
/// single regular-mode refresh interval so a momentarily-stalled monitor doesn't evict its
/// own last-known-good topology out from under concurrent readers.
pub(crate) const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
