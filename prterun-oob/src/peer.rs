//! Per-peer state machine, send queue and receive buffer.
//!
//! The state machine is a plain enum with one transition method per state,
//! rather than a single `dispatch(state, event)` function switching on the
//! state tag — the same shape the teacher's `p2p::supervisor::Protocol`
//! uses for its own `Input`-driven transitions.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use prterun_proc::{Header, MessageType, ProcId};
use tracing::{debug, trace, warn};

use crate::error::{Error, IoOutcome};
use crate::io::{read_into, write_once};

/// How long a peer may sit in [`PeerState::ConnectAck`] before the connect
/// path is restarted, matching the original's per-peer connect timer.
pub const CONNECT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a single peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Closed,
    Connecting,
    ConnectAck,
    Connected,
    Accepting,
    Failed,
}

/// What the reactor must do in response to a [`Peer::queue_msg`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    /// Nothing beyond enqueuing: the queue will drain on its own once the
    /// peer connects, or the caller didn't ask to activate the send.
    None,
    /// The peer was `Closed`/`Failed` and the submission asked to activate;
    /// the reactor must (re)start the connect attempt.
    BeginConnect,
}

/// Ownership of a queued send's payload bytes: either a relay buffer this
/// crate allocated itself, or a handle into an RML-owned message that must
/// be handed back rather than freed here. A two-variant enum makes the
/// "exactly one of these is live" invariant a compile-time fact instead of
/// a pair of nullable pointers with a runtime check.
#[derive(Debug, Clone)]
pub enum Payload {
    Owned(Vec<u8>),
    Borrowed(Arc<Vec<u8>>),
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v.as_slice(),
            Payload::Borrowed(v) => v.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message queued for transmission to a peer, tracking how many bytes of
/// the header and the payload have already gone out so that a short
/// vectored write resumes from the right offset next turn.
#[derive(Debug)]
pub struct SendRequest {
    pub peer: ProcId,
    pub tag: i32,
    header_bytes: [u8; Header::WIRE_SIZE],
    payload: Payload,
    written: usize,
}

impl SendRequest {
    pub fn new(origin: ProcId, dst: ProcId, tag: i32, seq_num: u32, payload: Payload) -> Self {
        let header = Header {
            origin,
            dst,
            payload_bytes: payload.len() as u32,
            tag,
            seq_num,
            msg_type: MessageType::Rml,
        };
        SendRequest {
            peer: dst,
            tag,
            header_bytes: header.encode(),
            payload,
            written: 0,
        }
    }

    fn total_len(&self) -> usize {
        Header::WIRE_SIZE + self.payload.len()
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.total_len()
    }

    fn remaining_header(&self) -> &[u8] {
        if self.written >= Header::WIRE_SIZE {
            &[]
        } else {
            &self.header_bytes[self.written..]
        }
    }

    fn remaining_payload(&self) -> &[u8] {
        let p = self.payload.as_slice();
        if self.written <= Header::WIRE_SIZE {
            p
        } else {
            &p[self.written - Header::WIRE_SIZE..]
        }
    }

    /// Attempts one non-blocking vectored write of whatever header/payload
    /// bytes remain. Returns `true` once the whole frame has gone out.
    pub fn write_once<W: Write>(&mut self, w: &mut W) -> Result<bool, IoOutcome> {
        match write_once(w, self.remaining_header(), self.remaining_payload()) {
            IoOutcome::Done(n) => {
                self.written += n;
                Ok(true)
            }
            IoOutcome::Busy(n) => {
                self.written += n;
                Ok(false)
            }
            other => Err(other),
        }
    }

    /// Whether this request's payload is borrowed from an RML-owned message
    /// rather than a relay buffer this crate allocated itself. Only a
    /// borrowed payload gets `sendComplete` called back on completion; a
    /// relay buffer is simply released.
    pub fn is_rml_owned(&self) -> bool {
        matches!(self.payload, Payload::Borrowed(_))
    }
}

/// Result of one [`RecvBuffer::poll`] call.
pub enum RecvOutcome {
    WouldBlock,
    PeerClosed,
    Frame(Header, Vec<u8>),
}

/// Header-then-payload state machine for the receive side, mirroring the
/// `RxState` split used in the pack's length-prefixed frame reader: reading
/// the fixed header is a distinct state from reading the variable-length
/// payload, so a short read never has to guess which region it landed in.
enum RxState {
    Header {
        buf: [u8; Header::WIRE_SIZE],
        have: usize,
    },
    Payload {
        header: Header,
        buf: Vec<u8>,
        have: usize,
    },
}

pub struct RecvBuffer {
    state: RxState,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        RecvBuffer {
            state: RxState::Header {
                buf: [0u8; Header::WIRE_SIZE],
                have: 0,
            },
        }
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives the state machine forward by reading whatever bytes are
    /// currently available, stopping at the first `WouldBlock`/peer-close
    /// the way `read_bytes` does — never loops across multiple frames in
    /// one call.
    pub fn poll<R: Read>(&mut self, r: &mut R) -> Result<RecvOutcome, Error> {
        loop {
            match &mut self.state {
                RxState::Header { buf, have } => match read_into(r, buf, have) {
                    IoOutcome::Done(_) => {
                        let header = Header::decode(buf)?;
                        let len = header.payload_bytes as usize;
                        if len == 0 {
                            // Zero-byte message: no payload phase at all.
                            self.state = RxState::Header {
                                buf: [0u8; Header::WIRE_SIZE],
                                have: 0,
                            };
                            return Ok(RecvOutcome::Frame(header, Vec::new()));
                        }
                        self.state = RxState::Payload {
                            header,
                            buf: vec![0u8; len],
                            have: 0,
                        };
                        continue;
                    }
                    IoOutcome::WouldBlock => return Ok(RecvOutcome::WouldBlock),
                    IoOutcome::PeerClosed => return Ok(RecvOutcome::PeerClosed),
                    IoOutcome::Busy(_) => return Ok(RecvOutcome::WouldBlock),
                    IoOutcome::Fatal(e) => return Err(Error::Io(e)),
                },
                RxState::Payload { header, buf, have } => match read_into(r, buf, have) {
                    IoOutcome::Done(_) => {
                        let header = *header;
                        let payload = std::mem::take(buf);
                        self.state = RxState::Header {
                            buf: [0u8; Header::WIRE_SIZE],
                            have: 0,
                        };
                        return Ok(RecvOutcome::Frame(header, payload));
                    }
                    IoOutcome::WouldBlock => return Ok(RecvOutcome::WouldBlock),
                    IoOutcome::PeerClosed => return Ok(RecvOutcome::PeerClosed),
                    IoOutcome::Busy(_) => return Ok(RecvOutcome::WouldBlock),
                    IoOutcome::Fatal(e) => return Err(Error::Io(e)),
                },
            }
        }
    }
}

/// Which readiness registrations a peer currently wants from the reactor.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventInterest {
    pub recv_active: bool,
    pub send_active: bool,
}

/// One peer connection: its identity, lifecycle state, outstanding sends
/// and in-progress receive.
pub struct Peer {
    pub id: ProcId,
    pub state: PeerState,
    pub send_queue: VecDeque<SendRequest>,
    pub recv: RecvBuffer,
    pub interest: EventInterest,
    connect_ack_deadline: Option<Instant>,
    next_seq: u32,
}

impl Peer {
    pub fn new(id: ProcId) -> Self {
        Peer {
            id,
            state: PeerState::Closed,
            send_queue: VecDeque::new(),
            recv: RecvBuffer::new(),
            interest: EventInterest::default(),
            connect_ack_deadline: None,
            next_seq: 0,
        }
    }

    fn next_seq_num(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// §4.2: enqueue a message. A non-activating submission just joins the
    /// queue. An activating submission either arms the write interest, if
    /// the peer is already `Connected`, or — if the peer is `Closed`/
    /// `Failed` — tells the caller to begin a connect attempt; the queue
    /// drains once that attempt completes.
    pub fn queue_msg(&mut self, origin: ProcId, tag: i32, payload: Payload, activate: bool) -> SubmitAction {
        let seq = self.next_seq_num();
        let req = SendRequest::new(origin, self.id, tag, seq, payload);
        self.send_queue.push_back(req);
        trace!(peer = %self.id, queued = self.send_queue.len(), activate, "queued send");
        if !activate {
            return SubmitAction::None;
        }
        match self.state {
            PeerState::Connected => {
                self.interest.send_active = true;
                SubmitAction::None
            }
            PeerState::Closed | PeerState::Failed => SubmitAction::BeginConnect,
            _ => SubmitAction::None,
        }
    }

    /// §4.1: begin an active (outgoing) connection attempt.
    pub fn transition_to_connecting(&mut self) {
        debug!(peer = %self.id, "connecting");
        self.state = PeerState::Connecting;
        self.interest = EventInterest {
            recv_active: false,
            send_active: true,
        };
    }

    /// §4.1: an inbound connection has been accepted and is awaiting the
    /// identification handshake.
    pub fn transition_to_accepting(&mut self) {
        debug!(peer = %self.id, "accepting");
        self.state = PeerState::Accepting;
        self.interest = EventInterest {
            recv_active: true,
            send_active: false,
        };
    }

    /// §4.1: the connect() call returned (or writability fired), move to
    /// waiting for the peer's identification response.
    pub fn transition_to_connect_ack(&mut self) {
        debug!(peer = %self.id, "connect_ack");
        self.state = PeerState::ConnectAck;
        self.connect_ack_deadline = Some(Instant::now() + CONNECT_ACK_TIMEOUT);
        self.interest = EventInterest {
            recv_active: true,
            send_active: false,
        };
    }

    /// §4.1: handshake complete. Arms the write interest if sends piled up
    /// while the connection was still forming.
    pub fn transition_to_connected(&mut self) {
        debug!(peer = %self.id, "connected");
        self.state = PeerState::Connected;
        self.connect_ack_deadline = None;
        self.interest.recv_active = true;
        self.interest.send_active = !self.send_queue.is_empty();
    }

    /// §9: a peer becoming unreachable while still in `ConnectAck` is not
    /// fatal — the connect path simply restarts, matching the original's
    /// asymmetric handling of `UNREACH` during the handshake.
    pub fn transition_to_closed_for_retry(&mut self) {
        debug!(peer = %self.id, "closed, eligible for retry");
        self.state = PeerState::Closed;
        self.connect_ack_deadline = None;
        self.interest = EventInterest::default();
    }

    /// A fatal, non-retryable failure (peer closed while `Connected`, or an
    /// I/O error that is not `WouldBlock`/`Interrupted`).
    pub fn transition_to_failed(&mut self) {
        warn!(peer = %self.id, "failed");
        self.state = PeerState::Failed;
        self.connect_ack_deadline = None;
        self.interest = EventInterest::default();
    }

    pub fn connect_ack_expired(&self, now: Instant) -> bool {
        matches!(self.connect_ack_deadline, Some(deadline) if now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use prterun_proc::MessageType;

    #[test]
    fn connect_ack_deadline_expires_only_after_the_timeout() {
        let mut peer = Peer::new(ProcId::new(1, 0));
        peer.transition_to_connecting();
        peer.transition_to_connect_ack();

        let now = Instant::now();
        assert!(!peer.connect_ack_expired(now));
        assert!(peer.connect_ack_expired(now + CONNECT_ACK_TIMEOUT + Duration::from_secs(1)));
    }

    #[test]
    fn queue_msg_only_arms_send_interest_once_connected() {
        let mut peer = Peer::new(ProcId::new(1, 0));
        peer.transition_to_connecting();
        let action = peer.queue_msg(ProcId::new(2, 0), 7, Payload::Owned(vec![1, 2, 3]), true);
        assert_eq!(action, SubmitAction::None);
        assert!(!peer.interest.send_active);
        assert_eq!(peer.send_queue.len(), 1);

        peer.transition_to_connect_ack();
        peer.transition_to_connected();
        assert!(peer.interest.send_active);
    }

    #[test]
    fn queue_msg_with_activate_drives_a_closed_peer_toward_begin_connect() {
        let mut peer = Peer::new(ProcId::new(1, 0));
        let action = peer.queue_msg(ProcId::new(2, 0), 3, Payload::Owned(vec![1]), true);
        assert_eq!(action, SubmitAction::BeginConnect);
        assert_eq!(peer.state, PeerState::Closed);
    }

    #[test]
    fn queue_msg_without_activate_leaves_a_closed_peer_untouched() {
        let mut peer = Peer::new(ProcId::new(1, 0));
        let action = peer.queue_msg(ProcId::new(2, 0), 3, Payload::Owned(vec![1]), false);
        assert_eq!(action, SubmitAction::None);
        assert_eq!(peer.state, PeerState::Closed);
        assert!(!peer.interest.send_active);
    }

    #[test]
    fn send_request_writes_header_and_payload_in_one_vectored_call() {
        let origin = ProcId::new(1, 0);
        let dst = ProcId::new(2, 0);
        let mut req = SendRequest::new(origin, dst, 5, 0, Payload::Owned(vec![9, 9, 9]));
        assert!(!req.is_complete());
        assert_eq!(req.remaining_header().len(), Header::WIRE_SIZE);

        let mut sink = Vec::new();
        let done = req.write_once(&mut sink).unwrap();
        assert!(done);
        assert!(req.is_complete());
        assert_eq!(sink.len(), Header::WIRE_SIZE + 3);
    }

    #[test]
    fn recv_buffer_reports_a_zero_byte_payload_frame_without_a_payload_phase() {
        let header = Header {
            origin: ProcId::new(3, 0),
            dst: ProcId::new(4, 0),
            payload_bytes: 0,
            tag: 1,
            seq_num: 0,
            msg_type: MessageType::Rml,
        };
        let mut cursor = Cursor::new(header.encode().to_vec());
        let mut recv = RecvBuffer::new();
        match recv.poll(&mut cursor).unwrap() {
            RecvOutcome::Frame(decoded, payload) => {
                assert_eq!(decoded, header);
                assert!(payload.is_empty());
            }
            _ => panic!("expected a complete frame"),
        }
    }
}
