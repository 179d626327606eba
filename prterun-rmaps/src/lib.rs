//! Round-robin process-to-node resource mapper.
//!
//! Dispatches to one of four placement algorithms selected by
//! [`model::MappingSelector`]: by-slot ([`byslot`]), by-node ([`bynode`]),
//! or by-object, spanned or not ([`byobject`]). All four share the
//! oversubscription gate and permission check in [`common`].

pub mod byobject;
pub mod bynode;
pub mod byslot;
pub mod common;
pub mod error;
pub mod model;

pub use error::MapError;
pub use model::{
    AppContext, DensityKnobs, Job, MapCallbacks, MappingDirective, MappingPolicy, MappingSelector,
    Node, NodeFlags, ObjType, ObjectId, Topology,
};

/// Top-level mapper entry point: dispatches to the algorithm named by
/// `policy.selector`.
pub fn map(
    job: &mut Job,
    app: &AppContext,
    nodes: &mut [Node],
    policy: &MappingPolicy,
    cb: &mut dyn MapCallbacks,
) -> Result<(), MapError> {
    match policy.selector {
        MappingSelector::BySlot => byslot::map_by_slot(job, app, nodes, policy, cb),
        MappingSelector::ByNode => bynode::map_by_node(job, app, nodes, policy, cb),
        MappingSelector::ByObject { target, cache_level } => {
            if policy.directive.contains(MappingDirective::SPAN) {
                byobject::map_by_object_span(job, app, nodes, policy, target, cache_level, cb)
            } else {
                byobject::map_by_object(job, app, nodes, policy, target, cache_level, cb)
            }
        }
    }
}
