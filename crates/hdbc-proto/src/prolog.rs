//! Connection prolog (initialization handshake).
//!
//! Before any framed message, the client sends a fixed 14-byte
//! initialization request announcing product/protocol version and
//! little-endian byte order; the server answers with 8 bytes of version
//! information.

use crate::encoding::{Decoder, Encoder};

/// Size of the encoded initialization request.
pub const PROLOG_REQUEST_SIZE: usize = 14;
/// Size of the initialization reply.
pub const PROLOG_REPLY_SIZE: usize = 8;

const FILLER: u32 = 0xFFFF_FFFF;
const MAJOR_PRODUCT_VERSION: i8 = 4;
const MINOR_PRODUCT_VERSION: i16 = 20;
const MAJOR_PROTOCOL_VERSION: i8 = 4;
const MINOR_PROTOCOL_VERSION: i16 = 1;
const OPTION_ENDIANNESS: i8 = 1;
const LITTLE_ENDIAN: i8 = 1;

/// Encode the initialization request.
pub fn encode_request(enc: &mut Encoder<'_>) {
    enc.u32(FILLER);
    enc.i8(MAJOR_PRODUCT_VERSION);
    enc.i16(MINOR_PRODUCT_VERSION);
    enc.i8(MAJOR_PROTOCOL_VERSION);
    enc.i16(MINOR_PROTOCOL_VERSION);
    enc.zeroes(1);
    enc.i8(1); // number of options
    enc.i8(OPTION_ENDIANNESS);
    enc.i8(LITTLE_ENDIAN);
}

/// Decoded initialization reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologReply {
    /// Server product version (major)
    pub product_major: i8,
    /// Server product version (minor)
    pub product_minor: i16,
    /// Protocol version (major)
    pub protocol_major: i8,
    /// Protocol version (minor)
    pub protocol_minor: i16,
}

impl PrologReply {
    /// Decode the 8-byte reply.
    pub fn decode(dec: &mut Decoder<'_>) -> Self {
        let reply = Self {
            product_major: dec.i8(),
            product_minor: dec.i16(),
            protocol_major: dec.i8(),
            protocol_minor: dec.i16(),
        };
        dec.skip(2);
        reply
    }
}
