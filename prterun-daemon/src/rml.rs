//! A logging-only [`prterun_oob::Rml`] implementation used by the `listen`
//! subcommand smoke test: it has no routing table of its own, it just
//! reports what the transport told it.

use prterun_oob::Error;
use prterun_oob::Rml;
use prterun_proc::ProcId;
use tracing::{info, warn};

#[derive(Default)]
pub struct LoggingRml;

impl Rml for LoggingRml {
    fn deliver_local(&mut self, origin: ProcId, dst: ProcId, tag: i32, payload: Vec<u8>) {
        info!(%origin, %dst, tag, bytes = payload.len(), "delivered locally");
    }

    fn send_complete(&mut self, peer: ProcId, tag: i32) {
        info!(%peer, tag, "send complete");
    }

    fn signal_job_state_comm_failed(&mut self, peer: ProcId) {
        warn!(%peer, "job state: comm failed");
    }

    fn submit_oob(&mut self, origin: ProcId, dst: ProcId, tag: i32, payload: Vec<u8>) -> Result<(), Error> {
        warn!(%origin, %dst, tag, bytes = payload.len(), "no route configured, dropping forward");
        Ok(())
    }
}
