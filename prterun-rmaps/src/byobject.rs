//! §4.10/§4.11: by-object placement, non-spanned (balance objects within
//! each node) and spanned (treat every object across every node as one flat
//! pool).
//!
//! Grounded on `prrte_rmaps_rr_byobj` and the static `byobj_span` helper in
//! `rmaps_rr_mappers.c`: the two-pass force-to-one-proc fallback, the
//! `start` rotation for comm_spawn continuation, and the flat-pool
//! `navg`/`nxtra_objs` distribution are carried over from there.

use crate::common::{check_oversubscription_gate, finalize_node_oversubscription};
use crate::error::MapError;
use crate::model::{
    mark_node_mapped, AppContext, Job, MapCallbacks, MappingPolicy, Node, NodeFlags, ObjType,
};

fn density_override(node: &Node, policy: &MappingPolicy, nobjs: usize, target: ObjType) -> Option<u32> {
    let d = &policy.density;
    if d.pernode {
        Some(1)
    } else if let Some(n) = d.n_per_node {
        Some(n)
    } else if let Some(n) = d.n_per_socket {
        let multiplier = if target == ObjType::Package {
            nobjs as u32
        } else {
            node.topology
                .as_ref()
                .map(|t| t.count_objs(ObjType::Package, 0) as u32)
                .unwrap_or(1)
                .max(1)
        };
        Some(n * multiplier)
    } else {
        None
    }
}

fn check_cpus_per_rank(
    policy: &MappingPolicy,
    node: &Node,
    target: ObjType,
    cache_level: u32,
    obj: usize,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    if let Some(cpr) = policy.density.cpus_per_rank {
        let npus = node
            .topology
            .as_ref()
            .map(|t| t.npus(target, cache_level, obj))
            .unwrap_or(0);
        if cpr > npus {
            cb.show_help("rmaps-rr", "cpus-per-rank-exceeds-npus");
            return Err(MapError::SilentError);
        }
    }
    Ok(())
}

fn require_topology(nodes: &[Node]) -> Result<(), MapError> {
    if nodes.iter().any(|n| n.topology.is_none()) {
        return Err(MapError::NotFound("node missing topology handle".into()));
    }
    Ok(())
}

/// §4.10: per-node object balancing, no spanning across nodes.
pub fn map_by_object(
    job: &mut Job,
    app: &AppContext,
    nodes: &mut [Node],
    policy: &MappingPolicy,
    target: ObjType,
    cache_level: u32,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    require_topology(nodes)?;
    let total_slots: u32 = nodes.iter().map(|n| n.slots).sum();
    check_oversubscription_gate(total_slots, app.num_procs, policy.directive, cb)?;

    let mut mapped = 0u32;
    let mut pass: u32 = 0;

    loop {
        if mapped >= app.num_procs {
            break;
        }
        let mut progressed = false;

        for (idx, node) in nodes.iter_mut().enumerate() {
            if mapped >= app.num_procs {
                break;
            }
            let nobjs = node
                .topology
                .as_ref()
                .map(|t| t.count_objs(target, cache_level))
                .unwrap_or(0);
            if nobjs == 0 {
                continue;
            }

            let mut nprocs = density_override(node, policy, nobjs, target).unwrap_or(node.available());
            let mut start = 0usize;
            if nprocs < 1 {
                if pass == 0 {
                    continue;
                }
                nprocs = 1;
                start = (node.num_procs as usize) % nobjs;
            }
            if job.is_spawn() {
                start = (job.bookmark_obj as usize + 1) % nobjs;
            }

            let place = nprocs.min(app.num_procs - mapped);
            for i in 0..place {
                let obj = (i as usize + start) % nobjs;
                check_cpus_per_rank(policy, node, target, cache_level, obj, cb)?;
                let proc = cb.setup_proc(job.job_id, idx, app.idx);
                cb.set_locale(proc, Some(obj));
                job.bookmark_obj = obj as u32;
            }
            if place > 0 {
                node.slots_inuse += place;
                node.num_procs += place;
                mapped += place;
                node.flags.insert(NodeFlags::MAPPED);
                mark_node_mapped(job, idx);
                progressed = true;
            }
        }

        if mapped >= app.num_procs {
            break;
        }
        if !progressed {
            if pass == 0 {
                pass = 1;
                continue;
            }
            break;
        }
        pass += 1;
    }

    for node in nodes.iter_mut() {
        if finalize_node_oversubscription(node, policy.directive, cb)? {
            job.oversubscribed = true;
        }
    }

    Ok(())
}

/// §4.11: treats every topology object across every node as a single flat
/// pool, distributing `navg` (`+1` for the first `nxtra_objs`) procs per
/// object in enumerated order.
pub fn map_by_object_span(
    job: &mut Job,
    app: &AppContext,
    nodes: &mut [Node],
    policy: &MappingPolicy,
    target: ObjType,
    cache_level: u32,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    require_topology(nodes)?;
    let total_slots: u32 = nodes.iter().map(|n| n.slots).sum();
    check_oversubscription_gate(total_slots, app.num_procs, policy.directive, cb)?;

    let per_node_objs: Vec<usize> = nodes
        .iter()
        .map(|n| {
            n.topology
                .as_ref()
                .map(|t| t.count_objs(target, cache_level))
                .unwrap_or(0)
        })
        .collect();
    let total_objs: usize = per_node_objs.iter().sum();
    if total_objs == 0 {
        return Err(MapError::NotFound("no topology objects available".into()));
    }

    let navg = ((app.num_procs as usize / total_objs).max(1)) as u32;
    let mut nxtra_objs = app.num_procs.saturating_sub(navg * total_objs as u32);
    let mut mapped = 0u32;

    for (idx, node) in nodes.iter_mut().enumerate() {
        let nobjs = per_node_objs[idx];
        if nobjs == 0 {
            continue;
        }
        let mut node_got_any = false;
        for obj in 0..nobjs {
            if mapped >= app.num_procs {
                break;
            }
            let nprocs = match density_override(node, policy, nobjs, target) {
                Some(n) => n,
                None => {
                    let bonus = if nxtra_objs > 0 {
                        nxtra_objs -= 1;
                        1
                    } else {
                        0
                    };
                    navg + bonus
                }
            };
            let place = nprocs.min(app.num_procs - mapped);
            if place > 0 {
                check_cpus_per_rank(policy, node, target, cache_level, obj, cb)?;
                for _ in 0..place {
                    let proc = cb.setup_proc(job.job_id, idx, app.idx);
                    cb.set_locale(proc, Some(obj));
                }
                node.slots_inuse += place;
                node.num_procs += place;
                mapped += place;
                node_got_any = true;
            }
        }
        if node_got_any {
            node.flags.insert(NodeFlags::MAPPED);
            mark_node_mapped(job, idx);
            job.bookmark_node = Some(idx);
        }
    }

    for node in nodes.iter_mut() {
        if finalize_node_oversubscription(node, policy.directive, cb)? {
            job.oversubscribed = true;
        }
    }

    Ok(())
}
