//! The RML (routing/messaging layer) boundary: everything the transport
//! hands off to or receives instructions from, but does not implement
//! itself. Kept as a trait object stored in [`crate::reactor::Context`]
//! rather than a global, per the note that global state should become an
//! explicit, passed-in value.

use prterun_proc::ProcId;

use crate::error::Error;

/// Collaborator the transport calls into on message arrival, send
/// completion and job-state changes. A production binary implements this
/// against the real routing table; tests implement it against a `Vec` of
/// observed calls.
pub trait Rml {
    /// A complete frame addressed to a local process has arrived.
    fn deliver_local(&mut self, origin: ProcId, dst: ProcId, tag: i32, payload: Vec<u8>);

    /// A previously queued send has gone out in full.
    fn send_complete(&mut self, peer: ProcId, tag: i32);

    /// The transport has given up on `peer`; the RML should consider the
    /// job affected by this failure.
    fn signal_job_state_comm_failed(&mut self, peer: ProcId);

    /// A frame addressed to a non-local process arrived and must be
    /// re-submitted to the OOB layer for further routing.
    fn submit_oob(&mut self, origin: ProcId, dst: ProcId, tag: i32, payload: Vec<u8>) -> Result<(), Error>;
}
