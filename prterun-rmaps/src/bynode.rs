//! §4.9: iteratively balance processes across the node list, by node share
//! rather than by slot fill order.
//!
//! Grounded on `prrte_rmaps_rr_bynode` in `rmaps_rr_mappers.c`. The spec's
//! prose describes `navg` via a ceiling division, but its own worked
//! scenario (§8 #5: 4 nodes × 8 slots, 10 procs → `navg = 2`) only holds
//! under the original's plain integer (floor) division — `navg = remaining
//! / nnodes`, not `ceil`. This port follows the original and the worked
//! scenario; see DESIGN.md for the recorded decision.

use crate::common::{check_oversubscription_gate, finalize_node_oversubscription};
use crate::error::MapError;
use crate::model::{mark_node_mapped, AppContext, Job, MapCallbacks, MappingPolicy, Node, NodeFlags, ObjType};

fn density_override(node: &Node, policy: &MappingPolicy) -> Option<u32> {
    let d = &policy.density;
    if d.pernode {
        Some(1)
    } else if let Some(n) = d.n_per_node {
        Some(n)
    } else if let Some(n) = d.n_per_socket {
        let packages = node
            .topology
            .as_ref()
            .map(|t| t.count_objs(ObjType::Package, 0) as u32)
            .unwrap_or(1)
            .max(1);
        Some(n * packages)
    } else {
        None
    }
}

fn place_on_node(
    job: &mut Job,
    app: &AppContext,
    node_idx: usize,
    node: &mut Node,
    count: u32,
    cb: &mut dyn MapCallbacks,
) {
    if count == 0 {
        return;
    }
    node.flags.insert(NodeFlags::MAPPED);
    mark_node_mapped(job, node_idx);
    let root = node.topology.as_ref().map(|t| t.root_obj());
    for _ in 0..count {
        let proc = cb.setup_proc(job.job_id, node_idx, app.idx);
        cb.set_locale(proc, root);
    }
    node.slots_inuse += count;
    node.num_procs += count;
}

/// Maps `app.num_procs` processes by balancing them round by round across
/// `nodes`, as described by §4.9.
pub fn map_by_node(
    job: &mut Job,
    app: &AppContext,
    nodes: &mut [Node],
    policy: &MappingPolicy,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    let total_slots: u32 = nodes.iter().map(|n| n.slots).sum();
    check_oversubscription_gate(total_slots, app.num_procs, policy.directive, cb)?;

    let mut remaining = app.num_procs;

    loop {
        let eligible: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.available() > 0)
            .map(|(i, _)| i)
            .collect();
        let nnodes = eligible.len() as u32;
        if remaining == 0 || nnodes == 0 {
            break;
        }

        let navg = (remaining / nnodes).max(1);
        let placed_at_navg = navg * nnodes;
        let extra = remaining.saturating_sub(placed_at_navg) / nnodes;
        let nxtra = remaining - (navg + extra) * nnodes;
        let bumped_extra = if nxtra > 0 { extra + 1 } else { extra };

        let mut made_progress = false;
        for (k, &idx) in eligible.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let extra_for_node = if (k as u32) < nxtra { bumped_extra } else { extra };
            let node = &mut nodes[idx];
            let want = density_override(node, policy).unwrap_or(navg + extra_for_node);
            let place = want.min(node.available()).min(remaining);
            if place > 0 {
                made_progress = true;
            }
            place_on_node(job, app, idx, node, place, cb);
            remaining -= place;
        }

        if !made_progress {
            break;
        }
    }

    // Final fill: pure oversubscription tail, one proc per node per pass.
    while remaining > 0 {
        let mut made_progress = false;
        for (idx, node) in nodes.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            place_on_node(job, app, idx, node, 1, cb);
            remaining -= 1;
            made_progress = true;
        }
        if !made_progress {
            return Err(MapError::OutOfResource(
                "no node available to absorb remaining procs".into(),
            ));
        }
    }

    for node in nodes.iter_mut() {
        if finalize_node_oversubscription(node, policy.directive, cb)? {
            job.oversubscribed = true;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DensityKnobs, MappingDirective, MappingSelector};
    use prterun_proc::ProcId;

    struct NullCallbacks {
        next_vpid: u32,
    }

    impl MapCallbacks for NullCallbacks {
        fn setup_proc(&mut self, _job_id: u32, _node_idx: usize, _app_idx: u32) -> ProcId {
            let vpid = self.next_vpid;
            self.next_vpid += 1;
            ProcId::new(0, vpid)
        }
        fn set_locale(&mut self, _proc: ProcId, _obj: Option<usize>) {}
        fn show_help(&mut self, _topic: &str, _key: &str) {}
        fn update_exit_status(&mut self, _code: i32) {}
    }

    #[test]
    fn ten_procs_across_4x8_balances_as_3_3_2_2() {
        let mut nodes = vec![
            Node::new("n0", 8),
            Node::new("n1", 8),
            Node::new("n2", 8),
            Node::new("n3", 8),
        ];
        let mut job = Job::new(1);
        let app = AppContext {
            idx: 0,
            app_name: "a".into(),
            num_procs: 10,
        };
        let policy = MappingPolicy {
            directive: MappingDirective::empty(),
            selector: MappingSelector::ByNode,
            density: DensityKnobs::default(),
        };
        let mut cb = NullCallbacks { next_vpid: 0 };
        map_by_node(&mut job, &app, &mut nodes, &policy, &mut cb).unwrap();
        assert_eq!(
            nodes.iter().map(|n| n.num_procs).collect::<Vec<_>>(),
            vec![3, 3, 2, 2]
        );
        assert!(nodes.iter().all(|n| !n.flags.contains(NodeFlags::OVERSUBSCRIBED)));
    }

    #[test]
    fn balance_law_holds_for_equal_slot_nodes() {
        let mut nodes = vec![Node::new("n0", 8), Node::new("n1", 8), Node::new("n2", 8)];
        let mut job = Job::new(1);
        let app = AppContext {
            idx: 0,
            app_name: "a".into(),
            num_procs: 17,
        };
        let policy = MappingPolicy {
            directive: MappingDirective::empty(),
            selector: MappingSelector::ByNode,
            density: DensityKnobs::default(),
        };
        let mut cb = NullCallbacks { next_vpid: 0 };
        map_by_node(&mut job, &app, &mut nodes, &policy, &mut cb).unwrap();
        let counts: Vec<u32> = nodes.iter().map(|n| n.num_procs).collect();
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(max - min <= 1);
        assert_eq!(counts.iter().sum::<u32>(), 17);
    }

    proptest::proptest! {
        /// The same balance law as `balance_law_holds_for_equal_slot_nodes`,
        /// generalized: for any number of equal-slot nodes and any process
        /// count (oversubscribing past total capacity is allowed, since no
        /// `NO_OVERSUBSCRIBE` directive is set), by-node placement never
        /// leaves two nodes more than one process apart.
        #[test]
        fn balance_law_holds_across_arbitrary_node_counts_and_loads(
            nnodes in 1usize..6,
            slots in 1u32..16,
            num_procs in 0u32..64,
        ) {
            let mut nodes: Vec<Node> = (0..nnodes).map(|i| Node::new(format!("n{}", i), slots)).collect();
            let mut job = Job::new(1);
            let app = AppContext {
                idx: 0,
                app_name: "a".into(),
                num_procs,
            };
            let policy = MappingPolicy {
                directive: MappingDirective::empty(),
                selector: MappingSelector::ByNode,
                density: DensityKnobs::default(),
            };
            let mut cb = NullCallbacks { next_vpid: 0 };
            map_by_node(&mut job, &app, &mut nodes, &policy, &mut cb).unwrap();

            let counts: Vec<u32> = nodes.iter().map(|n| n.num_procs).collect();
            proptest::prop_assert_eq!(counts.iter().sum::<u32>(), num_procs);
            let max = *counts.iter().max().unwrap();
            let min = *counts.iter().min().unwrap();
            proptest::prop_assert!(max - min <= 1);
        }
    }
}
