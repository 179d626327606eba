//! Process identity and wire-frame header shared by the prterun out-of-band
//! transport and the round-robin resource mapper.
//!
//! Everything in this crate is pure data plus codec logic: no sockets, no
//! allocation beyond what the caller supplies. Both `prterun-oob` and
//! `prterun-rmaps` depend on it so that a [`ProcId`] means the same thing on
//! both sides of the transport/mapper boundary.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Errors that can occur while encoding or decoding a wire frame header.
#[derive(Debug, Error)]
pub enum Error {
    #[error("short read: need {need} more bytes to decode a header")]
    ShortRead { need: usize },

    #[error("declared payload size {0} exceeds the configured maximum")]
    PayloadTooLarge(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Sentinel job id, mirroring `PRTE_JOBID_INVALID` (all bits set).
pub const JOBID_INVALID: u32 = u32::MAX;

/// Sentinel vpid, mirroring `PRTE_VPID_INVALID` (all bits set).
pub const VPID_INVALID: u32 = u32::MAX;

/// Identifies a single process within a job: a job id plus the process's
/// rank (vpid, "virtual process id") within that job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId {
    pub job_id: u32,
    pub vpid: u32,
}

impl ProcId {
    /// The invalid/unset proc id, used as a sentinel in place of an
    /// `Option<ProcId>` in contexts where the original C carries a single
    /// `prte_process_name_t` field that may or may not be filled in.
    pub const INVALID: ProcId = ProcId {
        job_id: JOBID_INVALID,
        vpid: VPID_INVALID,
    };

    pub fn new(job_id: u32, vpid: u32) -> Self {
        ProcId { job_id, vpid }
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let job_id = r.read_u32::<BigEndian>()?;
        let vpid = r.read_u32::<BigEndian>()?;
        Ok(ProcId { job_id, vpid })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_u32::<BigEndian>(self.job_id)?;
        w.write_u32::<BigEndian>(self.vpid)?;
        Ok(())
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "[INVALID]")
        } else {
            write!(f, "[{}:{}]", self.job_id, self.vpid)
        }
    }
}

/// Distinguishes the purpose of a frame, mirroring the original's
/// `MCA_OOB_TCP_*` message-type byte. `Rml` frames are handed to the RML
/// boundary for local delivery or further routing; `Ident` frames are used
/// only during the connect/accept handshake and never reach the RML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Rml = 0,
    Ident = 1,
}

impl MessageType {
    fn from_u8(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(MessageType::Rml),
            1 => Ok(MessageType::Ident),
            other => Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message type byte {}", other),
            ))),
        }
    }
}

/// Fixed-layout, big-endian wire header preceding every frame's payload.
///
/// Layout (32 bytes, 16-byte aligned): origin [`ProcId`] (8), destination
/// [`ProcId`] (8), `payload_bytes: u32` (4), `tag: i32` (4), `seq_num: u32`
/// (4), `msg_type: u8` + 3 bytes reserved (4) — the reserved bytes are
/// always written as zero and ignored on read, matching the original's
/// unused padding in `mca_oob_tcp_hdr_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub origin: ProcId,
    pub dst: ProcId,
    pub payload_bytes: u32,
    pub tag: i32,
    pub seq_num: u32,
    pub msg_type: MessageType,
}

impl Header {
    pub const WIRE_SIZE: usize = 32;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        {
            let mut cursor: &mut [u8] = &mut buf;
            self.origin.write_to(&mut cursor).expect("fixed-size buffer");
            self.dst.write_to(&mut cursor).expect("fixed-size buffer");
            cursor
                .write_u32::<BigEndian>(self.payload_bytes)
                .expect("fixed-size buffer");
            cursor.write_i32::<BigEndian>(self.tag).expect("fixed-size buffer");
            cursor
                .write_u32::<BigEndian>(self.seq_num)
                .expect("fixed-size buffer");
            cursor
                .write_u8(self.msg_type as u8)
                .expect("fixed-size buffer");
            // 3 reserved padding bytes, left zeroed, rounding the header
            // out to a 16-byte-aligned size.
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(Error::ShortRead {
                need: Self::WIRE_SIZE - bytes.len(),
            });
        }
        let mut cursor = bytes;
        let origin = ProcId::read_from(&mut cursor)?;
        let dst = ProcId::read_from(&mut cursor)?;
        let payload_bytes = cursor.read_u32::<BigEndian>()?;
        let tag = cursor.read_i32::<BigEndian>()?;
        let seq_num = cursor.read_u32::<BigEndian>()?;
        let msg_type = MessageType::from_u8(cursor.read_u8()?)?;
        Ok(Header {
            origin,
            dst,
            payload_bytes,
            tag,
            seq_num,
            msg_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_proc_id_is_all_ones() {
        assert_eq!(ProcId::INVALID.job_id, u32::MAX);
        assert_eq!(ProcId::INVALID.vpid, u32::MAX);
        assert!(ProcId::INVALID.is_invalid());
        assert!(!ProcId::new(0, 0).is_invalid());
    }

    #[test]
    fn header_round_trips_through_wire_bytes() {
        let hdr = Header {
            origin: ProcId::new(7, 3),
            dst: ProcId::new(7, 9),
            payload_bytes: 128,
            tag: -1,
            seq_num: 42,
            msg_type: MessageType::Rml,
        };
        let bytes = hdr.encode();
        assert_eq!(bytes.len(), Header::WIRE_SIZE);
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(hdr, decoded);
    }

    #[test]
    fn zero_byte_payload_header_round_trips() {
        let hdr = Header {
            origin: ProcId::new(1, 0),
            dst: ProcId::new(1, 1),
            payload_bytes: 0,
            tag: 0,
            seq_num: 0,
            msg_type: MessageType::Ident,
        };
        let bytes = hdr.encode();
        assert_eq!(Header::decode(&bytes).unwrap(), hdr);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let bytes = [0u8; Header::WIRE_SIZE - 1];
        match Header::decode(&bytes) {
            Err(Error::ShortRead { need }) => assert_eq!(need, 1),
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_unknown_message_type() {
        let mut bytes = Header {
            origin: ProcId::new(0, 0),
            dst: ProcId::new(0, 0),
            payload_bytes: 0,
            tag: 0,
            seq_num: 0,
            msg_type: MessageType::Rml,
        }
        .encode();
        bytes[Header::WIRE_SIZE - 1] = 9;
        assert!(Header::decode(&bytes).is_err());
    }
}
