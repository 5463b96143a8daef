//! Derives the stable string this crate uses to key the topology cache and the process-wide
//! monitor registry for one cluster.
//!
//! Priority order: a configured override, then a pattern match against the initial server's
//! RDS cluster DNS name (`<identifier>.cluster-<random>.<region>.rds.amazonaws.com`), then a
//! monotonic clock reading rendered as text — which still gives every connection in the same
//! process a distinct, stable-for-the-process-lifetime id even when the server string isn't
//! an RDS cluster endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

/// Matches an RDS cluster (or cluster reader) endpoint and extracts the user-chosen cluster
/// identifier that precedes the `.cluster-` / `.cluster-ro-` label, e.g.
/// `dev-pg-limitless.cluster-cr28trhgdnv7.us-west-2.rds.amazonaws.com` -> `dev-pg-limitless`.
fn rds_cluster_id_from_host(host: &str) -> Option<String> {
    let rest = host
        .strip_suffix(".rds.amazonaws.com")
        .or_else(|| host.strip_suffix(".rds.amazonaws.com.cn"))?;
    let (identifier, remainder) = rest.split_once('.')?;
    if identifier.is_empty() {
        return None;
    }
    let is_cluster_label = remainder.starts_with("cluster-ro-") || remainder.starts_with("cluster-");
    is_cluster_label.then(|| identifier.to_string())
}

pub(crate) fn derive(override_id: Option<&str>, initial_host: &str) -> String {
    if let Some(id) = override_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if let Some(id) = rds_cluster_id_from_host(initial_host) {
        return id;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn override_wins_over_everything() {
        let id = derive(Some("my-cluster"), "writer.cluster-xyz.us-west-2.rds.amazonaws.com");
        assert_eq!(id, "my-cluster");
    }

    #[test]
    fn extracts_identifier_from_rds_cluster_dns() {
        let id = derive(None, "dev-pg-limitless.cluster-cr28trhgdnv7.us-west-2.rds.amazonaws.com");
        assert_eq!(id, "dev-pg-limitless");
    }

    #[test]
    fn extracts_identifier_from_rds_cluster_reader_dns() {
        let id = derive(None, "dev-pg.cluster-ro-cr28trhgdnv7.us-west-2.rds.amazonaws.com");
        assert_eq!(id, "dev-pg");
    }

    #[test]
    fn falls_back_to_a_non_empty_id_for_non_rds_hosts() {
        let id = derive(None, "localhost");
        assert!(!id.is_empty());
    }
}
