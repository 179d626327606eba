//! §4.8: fill nodes in list order up to their slot count, then balance
//! whatever remains evenly (with oversubscription) across the same list.
//!
//! Grounded directly on `prrte_rmaps_rr_byslot` in
//! `rmaps_rr_mappers.c`: the two-pass shape (fill-to-capacity, then
//! `deficit`/`extra`/`nxtra` balance) and the `SLOTS_GIVEN` permission gate
//! are carried over field for field.

use crate::common::{check_oversubscription_gate, finalize_node_oversubscription};
use crate::error::MapError;
use crate::model::{mark_node_mapped, AppContext, Job, MapCallbacks, MappingPolicy, Node, NodeFlags, ObjType};

fn num_to_assign(node: &Node, policy: &MappingPolicy) -> u32 {
    let d = &policy.density;
    if d.pernode {
        1
    } else if let Some(n) = d.n_per_node {
        n
    } else if let Some(n) = d.n_per_socket {
        let packages = node
            .topology
            .as_ref()
            .map(|t| t.count_objs(ObjType::Package, 0) as u32)
            .unwrap_or(1)
            .max(1);
        n * packages
    } else {
        node.available()
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

/// Maps `app.num_procs` processes onto `nodes` in list order, as described
/// by §4.8.
pub fn map_by_slot(
    job: &mut Job,
    app: &AppContext,
    nodes: &mut [Node],
    policy: &MappingPolicy,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    let total_slots: u32 = nodes.iter().map(|n| n.slots).sum();
    check_oversubscription_gate(total_slots, app.num_procs, policy.directive, cb)?;

    let mut mapped = 0u32;

    // Pass 1: fill in list order up to each node's declared capacity.
    for (idx, node) in nodes.iter_mut().enumerate() {
        if mapped >= app.num_procs {
            break;
        }
        if node.available() == 0 {
            continue;
        }
        let want = num_to_assign(node, policy);
        let place = want.min(app.num_procs - mapped);
        place_on_node(job, app, idx, node, place, cb);
        mapped += place;
    }

    if mapped >= app.num_procs {
        return Ok(());
    }

    // Pass 2: balance the remaining deficit across the full node list,
    // oversubscribing as needed.
    let deficit = app.num_procs - mapped;
    let n = nodes.len() as u32;
    let base = deficit / n;
    let nxtra = deficit - base * n;

    let mut remaining = deficit;
    for (idx, node) in nodes.iter_mut().enumerate() {
        if remaining == 0 {
            break;
        }
        let extra_for_node = if (idx as u32) < nxtra { base + 1 } else { base };
        let want = node.available() + extra_for_node;
        let place = want.min(remaining);
        place_on_node(job, app, idx, node, place, cb);
        remaining -= place;
        mapped += place;
    }

    for node in nodes.iter_mut() {
        if finalize_node_oversubscription(node, policy.directive, cb)? {
            job.oversubscribed = true;
        }
    }

    Ok(())
}
