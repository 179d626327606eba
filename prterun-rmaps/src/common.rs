//! Oversubscription gate and permission check shared by all four mapper
//! variants. The original duplicates this check byte-for-byte in each of
//! `rmaps_rr_byslot`/`_bynode`/`_byobj`/`byobj_span`; since the four copies
//! are identical, factoring it into one function here does not change
//! observable behavior.

use crate::error::MapError;
use crate::model::{MapCallbacks, MappingDirective, Node, NodeFlags};

/// §4.8's oversubscription gate, checked once before any placement begins.
pub(crate) fn check_oversubscription_gate(
    total_slots: u32,
    num_procs: u32,
    directive: MappingDirective,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    if total_slots < num_procs && directive.contains(MappingDirective::NO_OVERSUBSCRIBE) {
        cb.show_help("rmaps-rr", "not-enough-resources");
        return Err(MapError::SilentError);
    }
    Ok(())
}

/// After placing procs onto `node`, flags it (and the job) `OVERSUBSCRIBED`
/// if it now carries more procs than slots, and enforces the permission
/// gate for nodes whose slot count came from an explicit allocation
/// (`SLOTS_GIVEN`).
pub(crate) fn finalize_node_oversubscription(
    node: &mut Node,
    directive: MappingDirective,
    cb: &mut dyn MapCallbacks,
) -> Result<bool, MapError> {
    if node.num_procs <= node.slots {
        return Ok(false);
    }
    node.flags.insert(NodeFlags::OVERSUBSCRIBED);
    if node.flags.contains(NodeFlags::SLOTS_GIVEN) {
        let allowed = directive.contains(MappingDirective::SUBSCRIBE_GIVEN)
            && !directive.contains(MappingDirective::NO_OVERSUBSCRIBE);
        if !allowed {
            cb.show_help("rmaps-rr", "slots-given-oversubscribed");
            return Err(MapError::SilentError);
        }
    }
    Ok(true)
}
