// src/core/topology.rs

//! A read-only snapshot of the cluster's backend nodes, consulted by the
//! load-balance selector. This is deliberately narrow: no gossip, no health
//! probing, no migration state — just the handful of facts the selector
//! needs about each node (see SPEC_FULL.md §3, "Cluster Topology").

/// Static and dynamic facts about a single backend node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendInfo {
    /// Relative weight used by the fallback weighted-random draw. Never negative.
    pub backend_weight: f64,
    /// Raw liveness: the node is reachable at all. Used by `VALID_BACKEND_RAW`.
    pub alive: bool,
    /// Load-balance eligibility: a stricter predicate than `alive` used to
    /// validate redirect-rule targets (`VALID_BACKEND`). A node can be alive
    /// but temporarily excluded from load balancing (e.g. lagging too far
    /// behind the primary).
    pub load_balance_eligible: bool,
}

impl BackendInfo {
    pub fn new(backend_weight: f64) -> Self {
        Self {
            backend_weight,
            alive: true,
            load_balance_eligible: true,
        }
    }
}

/// A read-only snapshot of the cluster's backend topology.
///
/// Cloned at selection entry so an in-flight selection is never disturbed by
/// a concurrent configuration reload (snapshot-at-entry, SPEC_FULL.md §5).
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    nodes: Vec<BackendInfo>,
    /// The writable node, if one exists. `None` means there is no primary
    /// (a pool of standbys only).
    primary_node_id: Option<usize>,
    /// Streaming-replication mode: whether the pool distinguishes primary
    /// from standbys for load balancing at all.
    pub streaming_replication_mode: bool,
}

impl ClusterTopology {
    pub fn new(
        nodes: Vec<BackendInfo>,
        primary_node_id: Option<usize>,
        streaming_replication_mode: bool,
    ) -> Self {
        Self {
            nodes,
            primary_node_id,
            streaming_replication_mode,
        }
    }

    pub fn num_backends(&self) -> usize {
        self.nodes.len()
    }

    pub fn backend(&self, id: usize) -> Option<&BackendInfo> {
        self.nodes.get(id)
    }

    /// The writable node, or `MASTER_NODE_ID` as a fallback — matches
    /// `choose_db_node_id`'s `"primary" -> PRIMARY_NODE_ID if >= 0, else
    /// MASTER_NODE_ID` rule (SPEC_FULL.md §4.2.1).
    pub fn primary_node_id(&self) -> Option<usize> {
        self.primary_node_id
    }

    /// The lowest-id currently-live node; the fallback of last resort.
    pub fn master_node_id(&self) -> usize {
        self.nodes
            .iter()
            .enumerate()
            .find(|(_, b)| b.alive)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// `VALID_BACKEND(i)`: raw liveness *and* load-balance eligibility.
    /// Used to validate redirect-rule targets.
    pub fn is_load_balance_target(&self, id: usize) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|b| b.alive && b.load_balance_eligible)
    }

    /// `VALID_BACKEND_RAW(i)`: raw liveness only. Used for the fallback
    /// weighted-random sum, which — per SPEC_FULL.md §9 — intentionally
    /// considers any live node, not just load-balance-eligible ones.
    pub fn is_alive(&self, id: usize) -> bool {
        self.nodes.get(id).is_some_and(|b| b.alive)
    }

    pub fn weight(&self, id: usize) -> f64 {
        self.nodes.get(id).map(|b| b.backend_weight).unwrap_or(0.0)
    }

    /// Ascending ids of every node, for the ordered iteration the selector's
    /// weighted draw requires (SPEC_FULL.md §4.2.2).
    pub fn ids(&self) -> impl Iterator<Item = usize> {
        0..self.nodes.len()
    }
}
