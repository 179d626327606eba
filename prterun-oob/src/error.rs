use std::io;

use prterun_proc::ProcId;
use thiserror::Error;

/// Transport-level errors, matching the `PRTE_ERR_*` codes consumed at the
/// §6 boundary (`UNREACH`, `COMM_FAILURE`, `OUT_OF_RESOURCE` and friends).
#[derive(Debug, Error)]
pub enum Error {
    #[error("peer {0} is unreachable")]
    Unreach(ProcId),

    #[error("communication with peer {0} failed")]
    CommFailure(ProcId),

    #[error("no peer registered for {0}")]
    NotFound(ProcId),

    #[error("out of resources: {0}")]
    OutOfResource(String),

    #[error(transparent)]
    Header(#[from] prterun_proc::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Classification of the outcome of one non-blocking read or write attempt,
/// kept distinct at the type level per the note that `EAGAIN` and
/// `EWOULDBLOCK` must not be collapsed even though libc folds them to the
/// same value on most platforms the original targets.
#[derive(Debug)]
pub enum IoOutcome {
    /// The operation fully completed (all requested bytes moved).
    Done(usize),
    /// A short vectored write/read, or the `WouldBlock` retry bound was
    /// spent without ever blocking outright; some bytes moved. Resume from
    /// the returned count once the socket is next ready.
    Busy(usize),
    /// The kernel has no room/data right now (`EAGAIN`/`EWOULDBLOCK`) and
    /// the retry bound gave up with zero bytes moved; wait for the next
    /// readiness notification.
    WouldBlock,
    /// The peer closed its end of the connection (`read` returned `0`).
    PeerClosed,
    /// An unrecoverable I/O error.
    Fatal(io::Error),
}

pub(crate) fn classify_io_error(err: io::Error) -> IoOutcome {
    match err.kind() {
        io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
        _ => IoOutcome::Fatal(err),
    }
}
