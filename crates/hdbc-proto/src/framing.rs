//! Message, segment and part framing.
//!
//! Every exchange is one *message*:
//!
//! ```text
//! [message header: 32 bytes]
//!   [segment header: 24 bytes]
//!     [part header: 16 bytes][part body][zero padding to 8]
//!     [part header: 16 bytes][part body][zero padding to 8]
//!     ...
//! ```
//!
//! The current protocol uses exactly one segment per message; the
//! `no_of_segm` field is reserved for future multi-segment support and reply
//! messages with any other value are rejected as a protocol error.
//!
//! # Invariants
//!
//! - `var_part_length` = sum of all framed segment bytes after the 32-byte
//!   message header
//! - `segment_length` = 24 + Σ part framed size, where a part's framed size
//!   is 16 + body length padded to the next 8-byte boundary
//! - the part argument count uses the 32-bit `big_argument_count` field iff
//!   the count exceeds `i16::MAX`

use bitflags::bitflags;

use crate::{
    encoding::{Decoder, Encoder},
    error::{ProtocolError, Result},
    message_type::MessageType,
    part_kind::PartKind,
};

/// Size of the encoded message header.
pub const MESSAGE_HEADER_SIZE: usize = 32;
/// Size of the encoded segment header.
pub const SEGMENT_HEADER_SIZE: usize = 24;
/// Size of the encoded part header.
pub const PART_HEADER_SIZE: usize = 16;

/// Session id carried before the server has assigned one.
pub const INITIAL_SESSION_ID: i64 = -1;

/// Largest argument count a part can carry.
pub const MAX_NUM_ARG: usize = i32::MAX as usize;

const BIG_NUM_ARG_INDICATOR: i16 = -1;

/// Padding needed to bring `len` to the next 8-byte boundary.
#[must_use]
pub const fn pad8(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// Framed size of a part with a `body_len`-byte body.
#[must_use]
pub const fn part_framed_size(body_len: usize) -> usize {
    PART_HEADER_SIZE + body_len + pad8(body_len)
}

/// Message header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Session id assigned at authenticate; [`INITIAL_SESSION_ID`] before
    pub session_id: i64,
    /// Per-connection packet counter, incremented by the client before each write
    pub packet_count: i32,
    /// Bytes following this header
    pub var_part_length: u32,
    /// Negotiated buffer size
    pub var_part_size: u32,
    /// Number of segments; always 1 in current use
    pub no_of_segm: i16,
}

impl MessageHeader {
    /// Encode into `enc` (32 bytes including 10 reserved zero bytes).
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.i64(self.session_id);
        enc.i32(self.packet_count);
        enc.u32(self.var_part_length);
        enc.u32(self.var_part_size);
        enc.i16(self.no_of_segm);
        enc.zeroes(10);
    }

    /// Decode from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Self {
        let h = Self {
            session_id: dec.i64(),
            packet_count: dec.i32(),
            var_part_length: dec.u32(),
            var_part_size: dec.u32(),
            no_of_segm: dec.i16(),
        };
        dec.skip(10);
        h
    }
}

/// Segment kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum SegmentKind {
    /// Unused on the wire; zero value
    Invalid = 0,
    /// Client request
    Request = 1,
    /// Server reply
    Reply = 2,
    /// Server error reply
    Error = 5,
}

impl SegmentKind {
    /// Convert from the raw wire value.
    #[must_use]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            0 => Some(Self::Invalid),
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

bitflags! {
    /// Command options sent in request segments.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandOptions: u8 {
        /// Disable implicit fetching of the first result chunk
        const SELFETCH_OFF = 0x01;
        /// Request a scrollable cursor
        const SCROLLABLE_CURSOR = 0x02;
        /// Server may skip the explicit close-resultset round trip
        const NO_RESULTSET_CLOSE_NEEDED = 0x04;
        /// Keep the cursor open across commit
        const HOLD_CURSOR_OVER_COMMIT = 0x08;
        /// Execute on the local node only
        const EXECUTE_LOCALLY = 0x10;
    }
}

bitflags! {
    /// Attributes carried in a part header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PartAttributes: u8 {
        /// Final packet of this entity
        const LAST_PACKET = 0x01;
        /// More packets follow
        const NEXT_PACKET = 0x02;
        /// First packet of this entity
        const FIRST_PACKET = 0x04;
        /// Fetch ran past the end of the result set
        const ROW_NOT_FOUND = 0x08;
        /// Server closed the result set
        const RESULTSET_CLOSED = 0x10;
    }
}

impl PartAttributes {
    /// True if the server marked this the last packet.
    #[must_use]
    pub fn last_packet(self) -> bool {
        self.contains(Self::LAST_PACKET)
    }

    /// True if the server already closed the result set.
    #[must_use]
    pub fn resultset_closed(self) -> bool {
        self.contains(Self::RESULTSET_CLOSED)
    }
}

/// Segment header (24 bytes).
///
/// Request segments carry `{message_type, commit, command_options}`; reply
/// segments carry the function code; error segments leave the kind-specific
/// bytes reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Total framed segment length, including these 24 bytes
    pub segment_length: i32,
    /// Offset of this segment within the message's variable part
    pub segment_ofs: i32,
    /// Number of parts in this segment
    pub no_of_parts: i16,
    /// 1-based segment number
    pub segment_no: i16,
    /// Discriminator for the kind-specific trailer
    pub segment_kind: SegmentKind,
    /// Request only: message type
    pub message_type: MessageType,
    /// Request only: auto-commit flag
    pub commit: bool,
    /// Request only: command options
    pub command_options: CommandOptions,
    /// Reply only: function code (raw; see `FunctionCode`)
    pub function_code: i16,
}

impl SegmentHeader {
    /// Build a request segment header.
    #[must_use]
    pub fn request(
        segment_length: i32,
        no_of_parts: i16,
        message_type: MessageType,
        commit: bool,
    ) -> Self {
        Self {
            segment_length,
            segment_ofs: 0,
            no_of_parts,
            segment_no: 1,
            segment_kind: SegmentKind::Request,
            message_type,
            commit,
            command_options: CommandOptions::default(),
            function_code: 0,
        }
    }

    /// Encode into `enc` (requests only).
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.i32(self.segment_length);
        enc.i32(self.segment_ofs);
        enc.i16(self.no_of_parts);
        enc.i16(self.segment_no);
        enc.i8(self.segment_kind as i8);
        match self.segment_kind {
            SegmentKind::Request => {
                enc.i8(self.message_type as i8);
                enc.bool(self.commit);
                enc.u8(self.command_options.bits());
                enc.zeroes(8);
            },
            SegmentKind::Reply => {
                enc.zeroes(1);
                enc.i16(self.function_code);
                enc.zeroes(8);
            },
            _ => enc.zeroes(11),
        }
    }

    /// Decode from `dec` (replies and error segments).
    pub fn decode(dec: &mut Decoder<'_>) -> Self {
        let segment_length = dec.i32();
        let segment_ofs = dec.i32();
        let no_of_parts = dec.i16();
        let segment_no = dec.i16();
        let raw_kind = dec.i8();
        let segment_kind = match SegmentKind::from_i8(raw_kind) {
            Some(k) => k,
            None => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "segment kind",
                    value: i64::from(raw_kind),
                });
                SegmentKind::Invalid
            },
        };
        let mut h = Self {
            segment_length,
            segment_ofs,
            no_of_parts,
            segment_no,
            segment_kind,
            message_type: MessageType::ExecuteDirect,
            commit: false,
            command_options: CommandOptions::default(),
            function_code: 0,
        };
        match segment_kind {
            SegmentKind::Reply => {
                dec.skip(1);
                h.function_code = dec.i16();
                dec.skip(8);
            },
            _ => dec.skip(11),
        }
        h
    }
}

/// Part header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartHeader {
    /// Payload discriminator
    pub part_kind: PartKind,
    /// Packet attributes
    pub part_attributes: PartAttributes,
    argument_count: i16,
    big_argument_count: i32,
    /// Encoded body length in bytes (excluding padding)
    pub buffer_length: i32,
    /// Remaining buffer capacity when the part was written
    pub buffer_size: i32,
}

impl PartHeader {
    /// Build a part header for `num_arg` arguments and a `body_len`-byte body.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TooManyArguments`] past [`MAX_NUM_ARG`].
    pub fn new(
        part_kind: PartKind,
        num_arg: usize,
        body_len: usize,
        buffer_size: i32,
    ) -> Result<Self> {
        let (argument_count, big_argument_count) = if num_arg <= i16::MAX as usize {
            (num_arg as i16, 0)
        } else if num_arg <= MAX_NUM_ARG {
            (BIG_NUM_ARG_INDICATOR, num_arg as i32)
        } else {
            return Err(ProtocolError::TooManyArguments(num_arg));
        };
        Ok(Self {
            part_kind,
            part_attributes: PartAttributes::default(),
            argument_count,
            big_argument_count,
            buffer_length: body_len as i32,
            buffer_size,
        })
    }

    /// Argument count, reading the big field when the sentinel is set.
    #[must_use]
    pub fn num_arg(&self) -> usize {
        if self.argument_count == BIG_NUM_ARG_INDICATOR {
            self.big_argument_count as usize
        } else {
            self.argument_count as usize
        }
    }

    /// Encode into `enc`.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.i8(self.part_kind as i8);
        enc.u8(self.part_attributes.bits());
        enc.i16(self.argument_count);
        enc.i32(self.big_argument_count);
        enc.i32(self.buffer_length);
        enc.i32(self.buffer_size);
    }

    /// Decode from `dec`. Unknown part kinds latch a protocol error.
    pub fn decode(dec: &mut Decoder<'_>) -> Self {
        let raw_kind = dec.i8();
        let part_kind = match PartKind::from_i8(raw_kind) {
            Some(k) => k,
            None => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "part kind",
                    value: i64::from(raw_kind),
                });
                PartKind::Error
            },
        };
        Self {
            part_kind,
            part_attributes: PartAttributes::from_bits_retain(dec.u8()),
            argument_count: dec.i16(),
            big_argument_count: dec.i32(),
            buffer_length: dec.i32(),
            buffer_size: dec.i32(),
        }
    }
}
