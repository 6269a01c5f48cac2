//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Frame`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (type tag, sequence number, length).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Frame`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian** and signed.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Frame Type                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                        Sequence Number                        +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Payload Length                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_SIZE`] = 16 bytes.
//! type(4) + seq(8) + payload_len(4).  There is no checksum; integrity is
//! left to the datagram layer.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Largest datagram either side will put on the wire.
pub const MTU: usize = 1400;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_SIZE: usize = 16;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = MTU - HEADER_SIZE;

/// Largest sequence number the signed 64-bit wire field can carry.
pub const MAX_SEQ: u64 = i64::MAX as u64;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_PAYLOAD_LEN: usize = 12;

/// The closed set of frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Handshake request carrying `"OPERATION:FILENAME"`.
    Syn,
    /// One chunk of file content.
    Data,
    /// Positive acknowledgement of a sequence number.
    Ack,
    /// End of transfer.
    Fin,
    /// Peer-reported failure with a UTF-8 reason.
    Error,
    /// Handshake accepted.
    SynAck,
}

impl FrameType {
    /// Numeric tag used on the wire.
    pub const fn tag(self) -> i32 {
        match self {
            Self::Syn => 0,
            Self::Data => 1,
            Self::Ack => 2,
            Self::Fin => 3,
            Self::Error => 4,
            Self::SynAck => 5,
        }
    }

    /// Inverse of [`FrameType::tag`]; `None` for tags outside the protocol.
    pub const fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Syn),
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            3 => Some(Self::Fin),
            4 => Some(Self::Error),
            5 => Some(Self::SynAck),
            _ => None,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
            Self::Error => "ERROR",
            Self::SynAck => "SYN_ACK",
        };
        f.write_str(name)
    }
}

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The datagram cannot be a frame at all.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// The payload-length field is negative, too large, or overruns the buffer.
    #[error("invalid payload length {declared} ({available} bytes available)")]
    InvalidLength {
        /// Value of the length field.
        declared: i64,
        /// Bytes actually present after the header.
        available: usize,
    },

    /// A caller tried to build a frame whose sequence number has no wire form.
    #[error("sequence number {seq} exceeds {MAX_SEQ}")]
    SequenceOutOfRange {
        /// Offending sequence number.
        seq: u64,
    },

    /// A caller tried to build a frame whose payload does not fit the MTU.
    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD_SIZE}-byte limit")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
    },
}

/// A complete protocol datagram.
///
/// Fields are private so that every frame in existence respects
/// [`MAX_PAYLOAD_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameType,
    seq: u64,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, rejecting payloads larger than [`MAX_PAYLOAD_SIZE`] and
    /// sequence numbers above [`MAX_SEQ`].
    pub fn new(kind: FrameType, seq: u64, payload: Vec<u8>) -> Result<Self, FrameError> {
        if seq > MAX_SEQ {
            return Err(FrameError::SequenceOutOfRange { seq });
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge { len: payload.len() });
        }
        Ok(Self { kind, seq, payload })
    }

    /// Handshake request for `operation` on `filename`.
    pub fn syn(seq: u64, operation: &str, filename: &str) -> Result<Self, FrameError> {
        Self::new(FrameType::Syn, seq, format!("{operation}:{filename}").into_bytes())
    }

    /// Data chunk at `seq`.
    pub fn data(seq: u64, chunk: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(FrameType::Data, seq, chunk)
    }

    /// Error report carrying a human-readable `message`.
    pub fn error(seq: u64, message: &str) -> Result<Self, FrameError> {
        Self::new(FrameType::Error, seq, message.as_bytes().to_vec())
    }

    pub fn syn_ack(seq: u64) -> Self {
        Self::control(FrameType::SynAck, seq)
    }

    pub fn ack(seq: u64) -> Self {
        Self::control(FrameType::Ack, seq)
    }

    pub fn fin(seq: u64) -> Self {
        Self::control(FrameType::Fin, seq)
    }

    /// Payload-less frames.  `seq` must not exceed [`MAX_SEQ`]; sessions only
    /// ever echo a decoded sequence or one advanced through [`next_seq`].
    fn control(kind: FrameType, seq: u64) -> Self {
        debug_assert!(seq <= MAX_SEQ, "sequence {seq} has no wire form");
        Self {
            kind,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> FrameType {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Serialise this frame into a newly allocated byte vector of exactly
    /// `HEADER_SIZE + payload.len()` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + self.payload.len()];

        buf[OFF_TYPE..OFF_TYPE + 4].copy_from_slice(&self.kind.tag().to_be_bytes());
        // Every constructor keeps `seq <= MAX_SEQ`, so the top bit stays clear.
        buf[OFF_SEQ..OFF_SEQ + 8].copy_from_slice(&(self.seq as i64).to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4]
            .copy_from_slice(&(self.payload.len() as i32).to_be_bytes());
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Frame`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_SIZE`] or carries an unknown type tag
    ///   or a negative sequence number ([`FrameError::Malformed`]),
    /// - the length field is negative, above [`MAX_PAYLOAD_SIZE`], or longer
    ///   than the bytes that follow the header ([`FrameError::InvalidLength`]).
    ///
    /// Bytes beyond the declared payload are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Malformed("shorter than the 16-byte header"));
        }

        let tag = i32::from_be_bytes(read_array(buf, OFF_TYPE));
        let seq = i64::from_be_bytes(read_array(buf, OFF_SEQ));
        let declared = i32::from_be_bytes(read_array(buf, OFF_PAYLOAD_LEN));

        let kind = FrameType::from_tag(tag).ok_or(FrameError::Malformed("unknown frame type"))?;
        let seq = u64::try_from(seq).map_err(|_| FrameError::Malformed("negative sequence number"))?;

        let available = buf.len() - HEADER_SIZE;
        let len = usize::try_from(declared)
            .ok()
            .filter(|&len| len <= MAX_PAYLOAD_SIZE && len <= available)
            .ok_or(FrameError::InvalidLength {
                declared: i64::from(declared),
                available,
            })?;

        Ok(Self {
            kind,
            seq,
            payload: buf[HEADER_SIZE..HEADER_SIZE + len].to_vec(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seq={} len={}", self.kind, self.seq, self.payload.len())
    }
}

/// The sequence number after `seq`, if it still fits on the wire.
pub fn next_seq(seq: u64) -> Result<u64, FrameError> {
    seq.checked_add(1)
        .filter(|&next| next <= MAX_SEQ)
        .ok_or(FrameError::SequenceOutOfRange { seq: seq.saturating_add(1) })
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn header(tag: i32, seq: i64, len: i32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&tag.to_be_bytes());
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::data(42, b"hello".to_vec()).unwrap();
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn roundtrip_at_payload_bounds() {
        for len in [0, 1, MAX_PAYLOAD_SIZE - 1, MAX_PAYLOAD_SIZE] {
            let frame = Frame::data(7, vec![0xab; len]).unwrap();
            let bytes = frame.encode();
            assert_eq!(bytes.len(), HEADER_SIZE + len);
            assert_eq!(Frame::decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn header_constants() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(MAX_PAYLOAD_SIZE, 1384);
    }

    #[test]
    fn fields_are_big_endian_on_wire() {
        let bytes = Frame::syn_ack(0x0102_0304_0506_0708).encode();
        assert_eq!(&bytes[OFF_TYPE..OFF_TYPE + 4], &[0, 0, 0, 5]);
        assert_eq!(
            &bytes[OFF_SEQ..OFF_SEQ + 8],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        assert_eq!(&bytes[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn wire_tags_match_protocol() {
        let tags: Vec<i32> = [
            FrameType::Syn,
            FrameType::Data,
            FrameType::Ack,
            FrameType::Fin,
            FrameType::Error,
            FrameType::SynAck,
        ]
        .iter()
        .map(|k| k.tag())
        .collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn decode_short_buffers_are_malformed() {
        for len in 0..HEADER_SIZE {
            assert!(
                matches!(Frame::decode(&vec![0u8; len]), Err(FrameError::Malformed(_))),
                "length {len} should be malformed"
            );
        }
    }

    #[test]
    fn decode_unknown_tag_is_malformed() {
        let bytes = header(9, 0, 0);
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::Malformed("unknown frame type"))
        );
    }

    #[test]
    fn decode_negative_sequence_is_malformed() {
        let bytes = header(FrameType::Ack.tag(), -1, 0);
        assert!(matches!(Frame::decode(&bytes), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn decode_negative_length_is_invalid() {
        let bytes = header(FrameType::Data.tag(), 0, -4);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::InvalidLength { declared: -4, .. })
        ));
    }

    #[test]
    fn decode_oversized_length_is_invalid() {
        let mut bytes = header(FrameType::Data.tag(), 0, MAX_PAYLOAD_SIZE as i32 + 1);
        bytes.resize(HEADER_SIZE + MAX_PAYLOAD_SIZE + 1, 0);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::InvalidLength { .. })
        ));
    }

    #[test]
    fn decode_truncated_payload_is_invalid() {
        let mut bytes = Frame::data(3, b"data".to_vec()).unwrap().encode();
        bytes.pop();
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::InvalidLength {
                declared: 4,
                available: 3
            })
        );
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = Frame::data(3, b"abc".to_vec()).unwrap().encode();
        bytes.extend_from_slice(b"junk");
        assert_eq!(Frame::decode(&bytes).unwrap().payload(), b"abc");
    }

    #[test]
    fn oversized_payload_is_rejected_at_construction() {
        assert_eq!(
            Frame::data(0, vec![0; MAX_PAYLOAD_SIZE + 1]),
            Err(FrameError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1
            })
        );
    }

    #[test]
    fn largest_sequence_survives_the_wire() {
        for frame in [Frame::data(MAX_SEQ, b"end".to_vec()).unwrap(), Frame::ack(MAX_SEQ)] {
            assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }
    }

    #[test]
    fn sequence_without_wire_form_is_rejected_at_construction() {
        let seq = 1u64 << 63;
        assert_eq!(
            Frame::data(seq, Vec::new()),
            Err(FrameError::SequenceOutOfRange { seq })
        );
        assert!(Frame::syn(u64::MAX, "UPLOAD", "a").is_err());
        assert!(Frame::error(seq, "late").is_err());
    }

    #[test]
    fn next_seq_stops_at_the_wire_limit() {
        assert_eq!(next_seq(0), Ok(1));
        assert_eq!(next_seq(MAX_SEQ - 1), Ok(MAX_SEQ));
        assert_eq!(
            next_seq(MAX_SEQ),
            Err(FrameError::SequenceOutOfRange { seq: 1 << 63 })
        );
        assert!(next_seq(u64::MAX).is_err());
    }

    #[test]
    fn decode_random_bytes_never_panics() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..5_000 {
            let len = rng.gen_range(0..HEADER_SIZE + 64);
            let mut bytes = vec![0u8; len];
            rng.fill(&mut bytes[..]);
            if let Ok(frame) = Frame::decode(&bytes) {
                assert!(frame.seq() <= MAX_SEQ);
                assert!(frame.payload().len() <= len - HEADER_SIZE);
            }
        }

        // Plausible headers reach the length and payload checks.
        for _ in 0..5_000 {
            let tag = rng.gen_range(-1..8);
            let seq = rng.gen::<i64>();
            let declared = rng.gen_range(-8..MAX_PAYLOAD_SIZE as i32 + 8);
            let mut bytes = header(tag, seq, declared);
            let extra = rng.gen_range(0..MAX_PAYLOAD_SIZE + 8);
            bytes.extend((0..extra).map(|_| rng.gen::<u8>()));

            match Frame::decode(&bytes) {
                Ok(frame) => {
                    assert_eq!(frame.kind().tag(), tag);
                    assert_eq!(frame.seq(), seq as u64);
                    assert_eq!(frame.payload().len(), declared as usize);
                }
                Err(FrameError::Malformed(_)) => assert!(!(0..=5).contains(&tag) || seq < 0),
                Err(FrameError::InvalidLength { declared: d, available }) => {
                    assert_eq!(d, i64::from(declared));
                    assert_eq!(available, extra);
                }
                Err(other) => panic!("decode produced a construction error: {other}"),
            }
        }
    }

    #[test]
    fn syn_payload_is_operation_and_filename() {
        let syn = Frame::syn(0, "UPLOAD", "notes.txt").unwrap();
        assert_eq!(syn.kind(), FrameType::Syn);
        assert_eq!(syn.text(), "UPLOAD:notes.txt");
    }

    #[test]
    fn decoded_payload_does_not_alias_input() {
        let mut bytes = Frame::data(0, b"xyz".to_vec()).unwrap().encode();
        let frame = Frame::decode(&bytes).unwrap();
        bytes[HEADER_SIZE] = b'!';
        assert_eq!(frame.payload(), b"xyz");
    }
}
