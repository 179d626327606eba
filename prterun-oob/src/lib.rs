//! Event-driven, length-prefixed out-of-band TCP transport.
//!
//! A single-threaded `mio` reactor ([`reactor::Reactor`]) drives a table of
//! [`peer::Peer`] state machines, each with its own send queue and receive
//! buffer. Delivery and routing decisions are handed off to an [`rml::Rml`]
//! implementation supplied by the caller.

pub mod error;
pub mod io;
pub mod peer;
pub mod reactor;
pub mod rml;

pub use error::Error;
pub use peer::{Payload, Peer, PeerState, RecvBuffer, SendRequest, SubmitAction};
pub use reactor::{Reactor, TransportConfig};
pub use rml::Rml;
