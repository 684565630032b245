//! # Consistent hash ring
//!
//! Maps cache keys onto backend addresses with the classic hex-fingerprint
//! virtual-node scheme: each backend gets `virtual_nodes` points on the
//! ring, one per `"<i>-<backend>"` MD5 fingerprint, and a key is owned by
//! the backend whose fingerprint is the lexicographically smallest one
//! that is `>=` the key's own fingerprint, wrapping around to the first
//! fingerprint if the key's hash sorts after all of them.

use md5::{Digest, Md5};

/// A consistent hash ring over a fixed backend set.
///
/// Immutable once built: adding or removing a backend requires building a
/// new `Ring`, which is the expected way to reshard (§4.2 — membership
/// changes are out of scope for live rebalancing).
#[derive(Debug, Clone)]
pub struct Ring {
    /// Sorted `(fingerprint, backend index)` pairs.
    points: Vec<(String, usize)>,
    backends: Vec<String>,
}

impl Ring {
    /// Builds a ring over `backends`, placing `virtual_nodes` fingerprints
    /// per backend.
    ///
    /// # Panics
    ///
    /// Panics if `backends` is empty; a ring with no backends cannot route
    /// anything and callers are expected to validate the host list upfront.
    pub fn new(backends: Vec<String>, virtual_nodes: usize) -> Ring {
        assert!(!backends.is_empty(), "ring requires at least one backend");

        let mut points = Vec::with_capacity(backends.len() * virtual_nodes);
        for vnode in 0..virtual_nodes {
            for (idx, backend) in backends.iter().enumerate() {
                let fingerprint = md5_hex(&format!("{vnode}-{backend}"));
                points.push((fingerprint, idx));
            }
        }
        points.sort_by(|a, b| a.0.cmp(&b.0));

        Ring { points, backends }
    }

    /// Returns the backend address owning `key`.
    pub fn node_for(&self, key: &str) -> &str {
        let key_hash = md5_hex(key);
        let idx = match self.points.binary_search_by(|(fp, _)| fp.as_str().cmp(key_hash.as_str())) {
            Ok(i) => i,
            Err(i) => i,
        };
        let idx = if idx == self.points.len() { 0 } else { idx };
        &self.backends[self.points[idx].1]
    }

    /// All backend addresses in the ring, in the order they were given.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }
}

fn md5_hex(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts3() -> Vec<String> {
        vec!["host-0".into(), "host-1".into(), "host-2".into()]
    }

    fn hosts4() -> Vec<String> {
        vec![
            "host-0".into(),
            "host-1".into(),
            "host-2".into(),
            "host-3".into(),
        ]
    }

    #[test]
    fn matches_reference_mapping_three_hosts() {
        let ring = Ring::new(hosts3(), 10);
        assert_eq!(ring.node_for("key_1"), "host-2");
        assert_eq!(ring.node_for("key_2"), "host-0");
        assert_eq!(ring.node_for("key_3"), "host-0");
        assert_eq!(ring.node_for("key_4"), "host-2");
        assert_eq!(ring.node_for("key_5"), "host-1");
    }

    #[test]
    fn matches_reference_mapping_four_hosts() {
        let ring = Ring::new(hosts4(), 10);
        assert_eq!(ring.node_for("key_1"), "host-2");
        assert_eq!(ring.node_for("key_2"), "host-0");
        assert_eq!(ring.node_for("key_3"), "host-0");
        assert_eq!(ring.node_for("key_4"), "host-2");
        assert_eq!(ring.node_for("key_5"), "host-1");
    }

    #[test]
    fn same_key_always_maps_to_same_backend() {
        let ring = Ring::new(hosts3(), 10);
        let first = ring.node_for("stable-key").to_string();
        for _ in 0..50 {
            assert_eq!(ring.node_for("stable-key"), first);
        }
    }

    #[test]
    #[should_panic]
    fn rejects_empty_backend_list() {
        Ring::new(Vec::new(), 10);
    }
}
