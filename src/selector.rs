//! Host selection policies. A selector picks one host out of the caller's already-filtered
//! candidate list (selectors never consult a [`crate::host::HostFilter`] themselves).

use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::seq::IteratorRandom;

use crate::{
    cache::SlidingCache,
    error::{Error, Result},
    host::{HostInfo, Role},
    options::HostSelectorStrategy,
};

/// A property bag passed alongside a selection request — currently only `"cluster"`, used by
/// [`RoundRobin`] to key its per-cluster cursor.
pub type SelectorProps = HashMap<String, String>;

fn wants(role: Role, want_writer: bool) -> bool {
    if want_writer {
        role == Role::Writer
    } else {
        role == Role::Reader
    }
}

fn eligible<'a>(candidates: &'a [HostInfo], want_writer: bool) -> Vec<&'a HostInfo> {
    candidates
        .iter()
        .filter(|h| h.is_up() && wants(h.role(), want_writer))
        .collect()
}

/// Picks a host out of a filtered candidate list.
pub trait HostSelector: Send + Sync {
    fn pick(
        &self,
        candidates: &[HostInfo],
        want_writer: bool,
        props: &SelectorProps,
    ) -> Result<HostInfo>;
}

/// Uniform selection over UP hosts matching the requested role.
#[derive(Debug, Default)]
pub struct Random;

impl HostSelector for Random {
    fn pick(&self, candidates: &[HostInfo], want_writer: bool, _props: &SelectorProps) -> Result<HostInfo> {
        eligible(candidates, want_writer)
            .into_iter()
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| Error::no_candidate("random"))
    }
}

/// Deterministic selection of the UP, matching-role host with the lowest weight (weight is
/// a load metric, so lowest is best). Ties are broken by `host_id` lexicographic order.
#[derive(Debug, Default)]
pub struct HighestWeight;

impl HostSelector for HighestWeight {
    fn pick(&self, candidates: &[HostInfo], want_writer: bool, _props: &SelectorProps) -> Result<HostInfo> {
        eligible(candidates, want_writer)
            .into_iter()
            .min_by(|a, b| a.weight().cmp(&b.weight()).then_with(|| a.host_id().cmp(b.host_id())))
            .cloned()
            .ok_or_else(|| Error::no_candidate("highest_weight"))
    }
}

#[derive(Clone, Default)]
struct RoundRobinClusterInfo {
    last_host_id: Option<String>,
    weight_counter: u64,
    weights: HashMap<String, u64>,
}

/// Per-cluster round-robin cursor. Hosts with `weight > 1` stick: the same host is returned
/// for `weight` consecutive picks before the cursor advances.
pub struct RoundRobin {
    clusters: SlidingCache<String, RoundRobinClusterInfo>,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            clusters: SlidingCache::new(Duration::from_secs(60 * 60)),
        }
    }

    fn cluster_key(props: &SelectorProps, candidates: &[&HostInfo]) -> String {
        if let Some(cluster) = props.get("cluster") {
            return cluster.clone();
        }
        let mut ids: Vec<&str> = candidates.iter().map(|h| h.host_id()).collect();
        ids.sort_unstable();
        ids.join(",")
    }

    /// Publishes the per-host weights that subsequent `pick` calls for this cluster should
    /// use to decide how many consecutive picks a host sticks for.
    pub fn set_round_robin_weight(&self, candidates: &[HostInfo], props: &SelectorProps) {
        let refs: Vec<&HostInfo> = candidates.iter().collect();
        let key = Self::cluster_key(props, &refs);
        let weights = candidates
            .iter()
            .map(|h| (h.host_id().to_string(), h.weight().max(1)))
            .collect();
        let mut info = self.clusters.get(&key);
        info.weights = weights;
        self.clusters.put(key, info);
    }
}

impl HostSelector for RoundRobin {
    fn pick(&self, candidates: &[HostInfo], want_writer: bool, props: &SelectorProps) -> Result<HostInfo> {
        let mut pool = eligible(candidates, want_writer);
        if pool.is_empty() {
            return Err(Error::no_candidate("round_robin"));
        }
        pool.sort_unstable_by(|a, b| a.host_id().cmp(b.host_id()));

        let key = Self::cluster_key(props, &pool);
        let mut info = self.clusters.get(&key);

        if let Some(last) = info.last_host_id.as_deref() {
            if info.weight_counter > 0 {
                if let Some(host) = pool.iter().find(|h| h.host_id() == last) {
                    info.weight_counter -= 1;
                    self.clusters.put(key, info);
                    return Ok((*host).clone());
                }
            }
        }

        let next_index = match info.last_host_id.as_deref() {
            Some(last) => match pool.iter().position(|h| h.host_id() == last) {
                Some(idx) => (idx + 1) % pool.len(),
                None => 0,
            },
            None => 0,
        };
        let chosen = pool[next_index];
        let weight = info
            .weights
            .get(chosen.host_id())
            .copied()
            .unwrap_or(1)
            .max(1);
        info.last_host_id = Some(chosen.host_id().to_string());
        info.weight_counter = weight - 1;
        self.clusters.put(key, info);
        Ok(chosen.clone())
    }
}

/// Resolves a configured [`HostSelectorStrategy`] into a selector instance. `RoundRobin`
/// carries its own cursor state, so a caller that needs a stable cursor across repeated picks
/// (the failover coordinator, across reconnect attempts on the same cluster) should build one
/// selector per owner and reuse it, rather than calling this per pick.
pub(crate) fn build(strategy: HostSelectorStrategy) -> Arc<dyn HostSelector> {
    match strategy {
        HostSelectorStrategy::RandomHost => Arc::new(Random),
        HostSelectorStrategy::RoundRobin => Arc::new(RoundRobin::new()),
        HostSelectorStrategy::HighestWeight => Arc::new(HighestWeight),
    }
}
