//! Node/slot/job data model and the explicit [`MappingPolicy`] that replaces
//! the original's process-wide mapping options and framework singleton
//! (§9 "Global state").

use bitflags::bitflags;
use prterun_proc::ProcId;

bitflags! {
    /// Per-node status flags, mirroring `PRTE_NODE_FLAG_*`.
    #[derive(Default)]
    pub struct NodeFlags: u8 {
        const MAPPED         = 0b001;
        const OVERSUBSCRIBED = 0b010;
        const SLOTS_GIVEN    = 0b100;
    }
}

bitflags! {
    /// Mapping directive bits, mirroring `PRTE_MAPPING_*`.
    #[derive(Default)]
    pub struct MappingDirective: u8 {
        const NO_OVERSUBSCRIBE = 0b001;
        const SUBSCRIBE_GIVEN  = 0b010;
        const SPAN             = 0b100;
    }
}

/// Topology object class a by-object mapping targets, e.g. NUMA package or
/// physical core. The concrete topology query implementation (hwloc in the
/// original) lives entirely outside this crate, behind [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    Package,
    Numa,
    Core,
}

/// Opaque handle to a topology object, scoped to one node's topology.
pub type ObjectId = usize;

/// The topology query surface consumed by the by-object mappers
/// (§6 "Mapper boundary (consumed)"). A real binary backs this with hwloc;
/// tests back it with a small synthetic topology.
pub trait Topology {
    fn count_objs(&self, target: ObjType, cache_level: u32) -> usize;
    fn npus(&self, target: ObjType, cache_level: u32, obj: ObjectId) -> u32;
    fn root_obj(&self) -> ObjectId;
}

/// One cluster node: its slot capacity, current usage and optional
/// topology.
pub struct Node {
    pub name: String,
    pub slots: u32,
    pub slots_inuse: u32,
    pub num_procs: u32,
    pub topology: Option<Box<dyn Topology>>,
    pub flags: NodeFlags,
}

impl Node {
    pub fn new(name: impl Into<String>, slots: u32) -> Self {
        Node {
            name: name.into(),
            slots,
            slots_inuse: 0,
            num_procs: 0,
            topology: None,
            flags: NodeFlags::empty(),
        }
    }

    pub fn with_topology(mut self, topo: Box<dyn Topology>) -> Self {
        self.topology = Some(topo);
        self
    }

    pub fn given_slots(mut self) -> Self {
        self.flags.insert(NodeFlags::SLOTS_GIVEN);
        self
    }

    pub fn available(&self) -> u32 {
        self.slots.saturating_sub(self.slots_inuse)
    }
}

/// A single application to be mapped onto the node list.
pub struct AppContext {
    pub idx: u32,
    pub app_name: String,
    pub num_procs: u32,
}

/// The selected placement algorithm and the topology object it targets when
/// by-object placement is in effect.
#[derive(Debug, Clone, Copy)]
pub enum MappingSelector {
    BySlot,
    ByNode,
    ByObject { target: ObjType, cache_level: u32 },
}

/// Density knobs controlling how many procs land per node/object, replacing
/// the original's process-wide `pernode`/`n_per_node`/`n_per_socket`
/// globals with an explicit, per-call value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityKnobs {
    pub pernode: bool,
    pub n_per_node: Option<u32>,
    pub n_per_socket: Option<u32>,
    pub cpus_per_rank: Option<u32>,
}

/// Everything the mapper needs that used to live in global MCA parameters.
#[derive(Debug, Clone, Copy)]
pub struct MappingPolicy {
    pub directive: MappingDirective,
    pub selector: MappingSelector,
    pub density: DensityKnobs,
}

/// A job's placement record: the subset of nodes it has been mapped onto,
/// plus the bookmarks used to continue a spanned comm_spawn.
pub struct Job {
    pub job_id: u32,
    pub originator: ProcId,
    pub mapped_node_indices: Vec<usize>,
    pub bookmark_obj: u32,
    pub bookmark_node: Option<usize>,
    pub oversubscribed: bool,
}

impl Job {
    pub fn new(job_id: u32) -> Self {
        Job {
            job_id,
            originator: ProcId::INVALID,
            mapped_node_indices: Vec::new(),
            bookmark_obj: 0,
            bookmark_node: None,
            oversubscribed: false,
        }
    }

    pub fn is_spawn(&self) -> bool {
        !self.originator.is_invalid()
    }

    fn mark_node_mapped(&mut self, idx: usize) {
        if !self.mapped_node_indices.contains(&idx) {
            self.mapped_node_indices.push(idx);
        }
    }
}

/// Proc creation and attribute/help-reporting callbacks consumed by the
/// mapper (§6 "Mapper boundary (consumed)").
pub trait MapCallbacks {
    fn setup_proc(&mut self, job_id: u32, node_idx: usize, app_idx: u32) -> ProcId;
    fn set_locale(&mut self, proc: ProcId, obj: Option<ObjectId>);
    fn show_help(&mut self, topic: &str, key: &str);
    fn update_exit_status(&mut self, code: i32);
}

pub(crate) fn mark_node_mapped(job: &mut Job, idx: usize) {
    job.mark_node_mapped(idx);
}
