//! Typed byte codec with deferred error capture.
//!
//! Part decoders are long linear reads; checking a `Result` after every
//! 2-byte field would bury the wire layout in error plumbing. Instead both
//! [`Encoder`] and [`Decoder`] latch the *first* error and turn every
//! subsequent operation into a no-op returning zero values. Callers run a
//! whole decoding batch and check once at the end via [`Decoder::finish`].
//!
//! All integers are little-endian; the authentication sub-protocol needs a
//! handful of big-endian fields which have explicit `*_be` variants.
//!
//! # Length-indicator strings
//!
//! Variable-length byte runs are prefixed with a length indicator byte:
//!
//! - `0..=245`: the length itself, in one byte
//! - `246..=254`: reserved, a decode error
//! - `255`: a multi-byte length follows
//!
//! Two incompatible variants exist for the `255` form and callers must pick
//! one explicitly: the authentication variant (`*_auth`) uses a big-endian
//! `u16`, the general variant uses a little-endian `u32`.

use bytes::{BufMut, BytesMut};

use crate::{
    cesu8,
    error::{ProtocolError, Result},
};

const MAX_SHORT_LENGTH: usize = 245;
const LENGTH_INDICATOR: u8 = 255;

/// Framed size of a general-variant length-indicated byte run.
#[must_use]
pub fn var_bytes_size(len: usize) -> usize {
    if len <= MAX_SHORT_LENGTH {
        1 + len
    } else {
        5 + len
    }
}

/// Framed size of an auth-variant length-indicated byte run.
#[must_use]
pub fn var_bytes_size_auth(len: usize) -> usize {
    if len <= MAX_SHORT_LENGTH {
        1 + len
    } else {
        3 + len
    }
}

/// Write side of the codec. Appends to a [`BytesMut`] owned by the caller.
#[derive(Debug)]
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
    err: Option<ProtocolError>,
}

impl<'a> Encoder<'a> {
    /// Create an encoder appending to `buf`.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, err: None }
    }

    /// Latch `err` if no earlier error is held.
    pub fn latch(&mut self, err: ProtocolError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Consume the encoder, yielding the first latched error if any.
    pub fn finish(self) -> Result<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ok(&self) -> bool {
        self.err.is_none()
    }

    /// Write a single byte.
    pub fn u8(&mut self, v: u8) {
        if self.ok() {
            self.buf.put_u8(v);
        }
    }

    /// Write a signed byte.
    pub fn i8(&mut self, v: i8) {
        self.u8(v as u8);
    }

    /// Write a bool as one byte (0 or 1).
    pub fn bool(&mut self, v: bool) {
        self.u8(u8::from(v));
    }

    /// Write a little-endian i16.
    pub fn i16(&mut self, v: i16) {
        if self.ok() {
            self.buf.put_i16_le(v);
        }
    }

    /// Write a little-endian u16.
    pub fn u16(&mut self, v: u16) {
        if self.ok() {
            self.buf.put_u16_le(v);
        }
    }

    /// Write a big-endian u16 (auth sub-protocol only).
    pub fn u16_be(&mut self, v: u16) {
        if self.ok() {
            self.buf.put_u16(v);
        }
    }

    /// Write a little-endian i32.
    pub fn i32(&mut self, v: i32) {
        if self.ok() {
            self.buf.put_i32_le(v);
        }
    }

    /// Write a little-endian u32.
    pub fn u32(&mut self, v: u32) {
        if self.ok() {
            self.buf.put_u32_le(v);
        }
    }

    /// Write a little-endian i64.
    pub fn i64(&mut self, v: i64) {
        if self.ok() {
            self.buf.put_i64_le(v);
        }
    }

    /// Write a little-endian u64.
    pub fn u64(&mut self, v: u64) {
        if self.ok() {
            self.buf.put_u64_le(v);
        }
    }

    /// Write a little-endian u128.
    pub fn u128(&mut self, v: u128) {
        if self.ok() {
            self.buf.put_u128_le(v);
        }
    }

    /// Write an IEEE-754 f64.
    pub fn f64(&mut self, v: f64) {
        if self.ok() {
            self.buf.put_f64_le(v);
        }
    }

    /// Write a raw byte run.
    pub fn bytes(&mut self, v: &[u8]) {
        if self.ok() {
            self.buf.put_slice(v);
        }
    }

    /// Write `n` zero bytes.
    pub fn zeroes(&mut self, n: usize) {
        if self.ok() {
            self.buf.put_bytes(0, n);
        }
    }

    /// Write a string as CESU-8 without any length prefix.
    pub fn cesu8_str(&mut self, s: &str) {
        if self.ok() {
            let mut tmp = Vec::with_capacity(cesu8::str_size(s));
            cesu8::encode_into(s, &mut tmp);
            self.buf.put_slice(&tmp);
        }
    }

    /// Write a length-indicated byte run, general variant.
    pub fn li_bytes(&mut self, v: &[u8]) {
        if !self.ok() {
            return;
        }
        if v.len() <= MAX_SHORT_LENGTH {
            self.buf.put_u8(v.len() as u8);
        } else if v.len() <= u32::MAX as usize {
            self.buf.put_u8(LENGTH_INDICATOR);
            self.buf.put_u32_le(v.len() as u32);
        } else {
            self.latch(ProtocolError::OutOfRange {
                field: "length indicator",
                value: i64::try_from(v.len()).unwrap_or(i64::MAX),
            });
            return;
        }
        self.buf.put_slice(v);
    }

    /// Write a length-indicated byte run, auth variant (big-endian u16).
    pub fn li_bytes_auth(&mut self, v: &[u8]) {
        if !self.ok() {
            return;
        }
        if v.len() <= MAX_SHORT_LENGTH {
            self.buf.put_u8(v.len() as u8);
        } else if v.len() <= u16::MAX as usize {
            self.buf.put_u8(LENGTH_INDICATOR);
            self.buf.put_u16(v.len() as u16);
        } else {
            self.latch(ProtocolError::SubParameterSize { size: v.len(), max: u16::MAX as usize });
            return;
        }
        self.buf.put_slice(v);
    }

    /// Write a length-indicated CESU-8 string, general variant.
    pub fn li_cesu8_str(&mut self, s: &str) {
        if self.ok() {
            self.li_bytes(&cesu8::encode(s));
        }
    }

    /// Write a length-indicated CESU-8 string, auth variant.
    pub fn li_cesu8_str_auth(&mut self, s: &str) {
        if self.ok() {
            self.li_bytes_auth(&cesu8::encode(s));
        }
    }
}

/// Read side of the codec. A cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    err: Option<ProtocolError>,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, err: None }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The latched error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ProtocolError> {
        self.err.as_ref()
    }

    /// Latch `err` if no earlier error is held.
    pub fn latch(&mut self, err: ProtocolError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Consume the decoder, yielding the first latched error if any.
    pub fn finish(self) -> Result<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.err.is_some() {
            return None;
        }
        if self.remaining() < n {
            self.latch(ProtocolError::Underflow { needed: n, remaining: self.remaining() });
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) {
        let _ = self.take(n);
    }

    /// Read a single byte.
    pub fn u8(&mut self) -> u8 {
        self.take(1).map_or(0, |s| s[0])
    }

    /// Read a signed byte.
    pub fn i8(&mut self) -> i8 {
        self.u8() as i8
    }

    /// Read a bool (any non-zero byte is true).
    pub fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    /// Read a little-endian i16.
    pub fn i16(&mut self) -> i16 {
        self.take(2).map_or(0, |s| i16::from_le_bytes([s[0], s[1]]))
    }

    /// Read a little-endian u16.
    pub fn u16(&mut self) -> u16 {
        self.i16() as u16
    }

    /// Read a big-endian u16 (auth sub-protocol only).
    pub fn u16_be(&mut self) -> u16 {
        self.take(2).map_or(0, |s| u16::from_be_bytes([s[0], s[1]]))
    }

    /// Read a little-endian i32.
    pub fn i32(&mut self) -> i32 {
        self.take(4).map_or(0, |s| i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// Read a little-endian u32.
    pub fn u32(&mut self) -> u32 {
        self.i32() as u32
    }

    /// Read a big-endian u32 (auth sub-protocol only, e.g. the rounds count).
    pub fn u32_be(&mut self) -> u32 {
        self.take(4).map_or(0, |s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// Read a little-endian i64.
    pub fn i64(&mut self) -> i64 {
        self.take(8).map_or(0, |s| {
            i64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
        })
    }

    /// Read a little-endian u64.
    pub fn u64(&mut self) -> u64 {
        self.i64() as u64
    }

    /// Read a little-endian u128.
    pub fn u128(&mut self) -> u128 {
        match self.take(16) {
            Some(s) => {
                let mut b = [0u8; 16];
                b.copy_from_slice(s);
                u128::from_le_bytes(b)
            },
            None => 0,
        }
    }

    /// Read an IEEE-754 f64.
    pub fn f64(&mut self) -> f64 {
        f64::from_bits(self.u64())
    }

    /// Read a raw byte run of length `n`.
    pub fn bytes(&mut self, n: usize) -> &'a [u8] {
        self.take(n).unwrap_or(&[])
    }

    /// Read `n` bytes as a CESU-8 string.
    pub fn cesu8_str(&mut self, n: usize) -> String {
        let raw = self.bytes(n);
        match cesu8::decode(raw) {
            Ok(s) => s,
            Err(err) => {
                self.latch(err);
                String::new()
            },
        }
    }

    fn li_len(&mut self, auth: bool) -> usize {
        let ind = self.u8();
        match ind {
            0..=245 => usize::from(ind),
            LENGTH_INDICATOR => {
                if auth {
                    usize::from(self.u16_be())
                } else {
                    self.u32() as usize
                }
            },
            _ => {
                self.latch(ProtocolError::ReservedLengthIndicator(ind));
                0
            },
        }
    }

    /// Read a length-indicated byte run, general variant.
    pub fn li_bytes(&mut self) -> &'a [u8] {
        let n = self.li_len(false);
        self.bytes(n)
    }

    /// Read a length-indicated byte run, auth variant.
    pub fn li_bytes_auth(&mut self) -> &'a [u8] {
        let n = self.li_len(true);
        self.bytes(n)
    }

    /// Read a length-indicated CESU-8 string, general variant.
    pub fn li_cesu8_str(&mut self) -> String {
        let n = self.li_len(false);
        self.cesu8_str(n)
    }

    /// Read a length-indicated CESU-8 string, auth variant.
    pub fn li_cesu8_str_auth(&mut self) -> String {
        let n = self.li_len(true);
        self.cesu8_str(n)
    }
}
