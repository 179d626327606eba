//! A [`prterun_rmaps::MapCallbacks`] implementation that hands out
//! sequential vpids and logs help text/exit-status changes instead of
//! wiring them into a real job-state machine.

use prterun_proc::ProcId;
use prterun_rmaps::MapCallbacks;
use tracing::{error, info};

pub struct LoggingMapCallbacks {
    job_id: u32,
    next_vpid: u32,
}

impl LoggingMapCallbacks {
    pub fn new(job_id: u32) -> Self {
        LoggingMapCallbacks { job_id, next_vpid: 0 }
    }
}

impl MapCallbacks for LoggingMapCallbacks {
    fn setup_proc(&mut self, job_id: u32, node_idx: usize, app_idx: u32) -> ProcId {
        let vpid = self.next_vpid;
        self.next_vpid += 1;
        info!(job_id, node_idx, app_idx, vpid, "placed process");
        debug_assert_eq!(job_id, self.job_id);
        ProcId::new(job_id, vpid)
    }

    fn set_locale(&mut self, proc: ProcId, obj: Option<usize>) {
        info!(%proc, ?obj, "set HWLOC_LOCALE");
    }

    fn show_help(&mut self, topic: &str, key: &str) {
        error!(topic, key, "mapper reported a policy violation");
    }

    fn update_exit_status(&mut self, code: i32) {
        info!(code, "exit status updated");
    }
}
