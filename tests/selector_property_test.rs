// tests/selector_property_test.rs

//! Property-based tests for the load-balance selector's fallback draw,
//! checking the exclusion invariants from SPEC_FULL.md §8 hold for
//! randomly generated topologies and draws.

use nodepool::core::balancer::{select_with_draws, BalancerConfig, RedirectRule};
use nodepool::core::topology::{BackendInfo, ClusterTopology};
use proptest::prelude::*;

fn topology_with_weights(weights: &[f64], primary: Option<usize>) -> ClusterTopology {
    let nodes = weights.iter().map(|w| BackendInfo::new(*w)).collect();
    ClusterTopology::new(nodes, primary, true)
}

fn empty_config() -> BalancerConfig {
    BalancerConfig {
        streaming_replication_mode: true,
        redirect_dbnames: vec![],
        redirect_app_names: vec![],
    }
}

proptest! {
    #[test]
    fn fallback_never_returns_forbidden_node(
        weights in prop::collection::vec(0.1f64..5.0, 3..6),
        hit_idx in 0usize..3,
        r in 0.0f64..1.0,
        fallback_unit in 0.0f64..1.0,
    ) {
        let topology = topology_with_weights(&weights, Some(0));
        let target = hit_idx % weights.len();
        let config = BalancerConfig {
            redirect_dbnames: vec![RedirectRule::compile("^t$", target.to_string(), 0.0).unwrap()],
            ..empty_config()
        };

        // Weight 0.0 means the direct hit never fires for r > 0.0, so a
        // positive draw always forbids `target` and falls into the
        // weighted draw.
        if r > 0.0 {
            let id = select_with_draws(&topology, &config, "t", None, r, fallback_unit);
            prop_assert_ne!(id, target);
        }
    }

    #[test]
    fn honored_standby_intent_never_falls_back_to_primary(
        weights in prop::collection::vec(0.1f64..5.0, 2..6),
        r in 0.0f64..1.0,
        fallback_unit in 0.0f64..1.0,
    ) {
        let topology = topology_with_weights(&weights, Some(0));
        // Weight 1.0: `r <= weight` always holds for r in [0, 1), so the
        // standby intent is always honored and the fallback draw must
        // exclude the primary (SPEC_FULL.md §8, "suggested == -1" invariant).
        let config = BalancerConfig {
            redirect_dbnames: vec![RedirectRule::compile("^t$", "standby", 1.0).unwrap()],
            ..empty_config()
        };

        let id = select_with_draws(&topology, &config, "t", None, r, fallback_unit);
        prop_assert_ne!(id, 0);
    }

    #[test]
    fn selection_always_picks_a_live_node_in_range(
        weights in prop::collection::vec(0.0f64..5.0, 1..6),
        r in 0.0f64..1.0,
        fallback_unit in 0.0f64..1.0,
    ) {
        let topology = topology_with_weights(&weights, Some(0));
        let config = empty_config();
        let id = select_with_draws(&topology, &config, "anydb", None, r, fallback_unit);
        prop_assert!(id < weights.len());
    }
}
