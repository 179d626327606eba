//! Partial-I/O kernels shared by the send and receive handlers.
//!
//! Grounded directly on `prte_oob_tcp_msg_send_bytes`/`read_bytes` in
//! `oob_tcp_sendrecv.c`: a short vectored write or read is not an error, it
//! is resumed from exactly where it left off on the next readiness
//! notification, and `EINTR` is retried in-loop up to a small bound rather
//! than being surfaced to the caller.

use std::io::{self, IoSlice, Read, Write};

use crate::error::{classify_io_error, IoOutcome};

/// Number of in-loop `EINTR` retries before giving up and returning to the
/// caller, matching `OOB_SEND_MAX_RETRIES` in the original.
pub const MAX_RETRIES: u32 = 3;

/// Attempts to write as much of `header` then `payload` as the socket will
/// currently accept, using a single vectored write the way the original
/// issues one `writev` call with a two-element `iovec`.
///
/// `EINTR` is retried in-loop with no bound — it never represents a full
/// socket, just an interrupted syscall. `EAGAIN`/`EWOULDBLOCK` (both surface
/// as [`io::ErrorKind::WouldBlock`] in Rust) get a short bounded spin of
/// `MAX_RETRIES` attempts before giving up, the same latency-reduction hack
/// `send_msg` uses to avoid re-arming the writable event for what is often a
/// one-tick stall.
pub fn write_once<W: Write>(w: &mut W, header: &[u8], payload: &[u8]) -> IoOutcome {
    let total = header.len() + payload.len();
    let slices = [IoSlice::new(header), IoSlice::new(payload)];
    let mut retries = 0;
    loop {
        match w.write_vectored(&slices) {
            Ok(0) if total != 0 => {
                return IoOutcome::Fatal(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write_vectored wrote zero bytes",
                ))
            }
            Ok(n) if n == total => return IoOutcome::Done(n),
            Ok(n) => return IoOutcome::Busy(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    return IoOutcome::WouldBlock;
                }
                continue;
            }
            Err(e) => return classify_io_error(e),
        }
    }
}

/// Reads into `buf` starting at `have`, up to `buf.len()`, stopping as soon
/// as the kernel has no more to offer. Mirrors `read_bytes`'s read loop:
/// `rc == 0` is peer-closed, `EAGAIN`/`EWOULDBLOCK` ends the attempt without
/// error, anything else is fatal.
pub fn read_into<R: Read>(r: &mut R, buf: &mut [u8], have: &mut usize) -> IoOutcome {
    while *have < buf.len() {
        match r.read(&mut buf[*have..]) {
            Ok(0) => return IoOutcome::PeerClosed,
            Ok(n) => {
                *have += n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return classify_io_error(e),
        }
    }
    IoOutcome::Done(*have)
}
