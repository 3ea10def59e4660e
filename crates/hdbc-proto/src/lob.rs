//! LOB descriptors and the piecewise transfer parts.
//!
//! Large objects never travel whole. An upload sends the first chunk inline
//! with the execute; the server answers with a locator id per LOB and the
//! client streams the remaining chunks through `WriteLobRequest` messages.
//! A download starts with the inline bytes of the result value's
//! [`LobOutDescr`] and pulls the rest through `ReadLobRequest` keyed by the
//! locator id.

use std::io::Read;

use bitflags::bitflags;

use crate::{
    encoding::{Decoder, Encoder},
    error::{ProtocolError, Result},
};

/// Server-assigned 64-bit handle of a LOB being streamed.
pub type LocatorId = u64;

bitflags! {
    /// Options byte attached to LOB descriptors on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LobOptions: u8 {
        /// Value is null
        const NULL_INDICATOR = 0x01;
        /// Descriptor carries inline data
        const DATA_INCLUDED = 0x02;
        /// No more data follows
        const LAST_DATA = 0x04;
    }
}

impl LobOptions {
    /// True if no more data follows.
    #[must_use]
    pub fn is_last_data(self) -> bool {
        self.contains(Self::LAST_DATA)
    }
}

/// Byte size of an encoded LOB input parameter (options, chunk length,
/// chunk position); the chunk itself is written at the end of the row.
pub const LOB_PRM_SIZE: usize = 9;

/// Input descriptor for a LOB parameter (upload direction).
///
/// Wraps the caller's reader. [`LobInDescr::fetch_next`] pulls the next
/// chunk into the internal buffer; the first chunk is fetched before part
/// sizing so that its in-part offset is stable.
pub struct LobInDescr {
    rd: Box<dyn Read + Send + Sync>,
    buf: Vec<u8>,
    done: bool,
    /// Byte offset of the inline chunk within the containing part body
    pos: usize,
}

impl LobInDescr {
    /// Wrap a reader for upload.
    #[must_use]
    pub fn new(rd: Box<dyn Read + Send + Sync>) -> Self {
        Self { rd, buf: Vec::new(), done: false, pos: 0 }
    }

    /// Current chunk bytes.
    #[must_use]
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    /// True once the reader is exhausted and the final chunk is buffered.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.done
    }

    /// Record the chunk's byte offset within the containing part.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Fetch the next chunk of at most `chunk_size` bytes.
    ///
    /// Returns true if this is the last chunk.
    ///
    /// # Errors
    ///
    /// Propagates reader errors as [`ProtocolError::Other`].
    pub fn fetch_next(&mut self, chunk_size: usize) -> Result<bool> {
        self.buf.clear();
        self.buf.resize(chunk_size, 0);
        let mut filled = 0;
        while filled < chunk_size {
            match self.rd.read(&mut self.buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                },
                Ok(n) => filled += n,
                Err(err) => {
                    return Err(ProtocolError::Other(format!("lob source read failed: {err}")));
                },
            }
        }
        self.buf.truncate(filled);
        Ok(self.done)
    }

    /// Wire options for the current chunk.
    #[must_use]
    pub fn options(&self) -> LobOptions {
        let mut opt = LobOptions::DATA_INCLUDED;
        if self.done {
            opt |= LobOptions::LAST_DATA;
        }
        opt
    }

    /// Encode the 9-byte parameter descriptor (options, length, position).
    pub fn encode_descr(&self, enc: &mut Encoder<'_>) {
        enc.u8(self.options().bits());
        enc.i32(self.buf.len() as i32);
        enc.i32(self.pos as i32);
    }
}

impl std::fmt::Debug for LobInDescr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobInDescr")
            .field("chunk_len", &self.buf.len())
            .field("done", &self.done)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

/// Output descriptor for a LOB result value (download direction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobOutDescr {
    /// Locator id for follow-up reads
    pub id: LocatorId,
    /// Wire options; `LAST_DATA` means the inline bytes are everything
    pub opt: LobOptions,
    /// True for CLOB/NCLOB/TEXT: offsets count characters, not bytes
    pub is_char_based: bool,
    /// Total length in the server's unit (characters or bytes)
    pub num_char: u64,
    /// Total length in bytes
    pub num_byte: u64,
    /// Inline data delivered with the result set
    pub b: Vec<u8>,
}

impl LobOutDescr {
    /// Decode a LOB result value. Returns `None` for a null value.
    pub fn decode(dec: &mut Decoder<'_>, is_char_based: bool) -> Option<Self> {
        dec.skip(1); // lob type code; redundant with the field metadata
        let opt = LobOptions::from_bits_retain(dec.u8());
        dec.skip(2);
        if opt.contains(LobOptions::NULL_INDICATOR) {
            return None;
        }
        let num_char = dec.u64();
        let num_byte = dec.u64();
        let id = dec.u64();
        let chunk_len = dec.i32();
        let b = dec.bytes(chunk_len as usize).to_vec();
        Some(Self { id, opt, is_char_based, num_char, num_byte, b })
    }

    /// Encode in the result-value layout (server side; used by tests).
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u8(if self.is_char_based { 2 } else { 1 });
        enc.u8(self.opt.bits());
        enc.zeroes(2);
        enc.u64(self.num_char);
        enc.u64(self.num_byte);
        enc.u64(self.id);
        enc.i32(self.b.len() as i32);
        enc.bytes(&self.b);
    }
}

/// `ReadLobRequest` part: ask for `chunk_size` units starting at `ofs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLobRequest {
    /// Locator to read from
    pub id: LocatorId,
    /// Offset already received, in the LOB's unit (0-based; 1-based on the wire)
    pub ofs: u64,
    /// Units to fetch
    pub chunk_size: i32,
}

impl ReadLobRequest {
    /// Encoded body size.
    pub const SIZE: usize = 20;

    /// Encode into `enc`.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.id);
        enc.i64(self.ofs as i64 + 1);
        enc.i32(self.chunk_size);
    }
}

/// `ReadLobReply` part: one chunk of LOB data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadLobReply {
    /// Locator the chunk belongs to
    pub id: LocatorId,
    /// Wire options; `LAST_DATA` ends the download
    pub opt: LobOptions,
    /// Chunk bytes
    pub b: Vec<u8>,
}

impl ReadLobReply {
    /// Decode from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Self {
        let id = dec.u64();
        let opt = LobOptions::from_bits_retain(dec.u8());
        let chunk_len = dec.i32();
        dec.skip(3);
        let b = dec.bytes(chunk_len as usize).to_vec();
        Self { id, opt, b }
    }

    /// Encode (server side; used by tests).
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.id);
        enc.u8(self.opt.bits());
        enc.i32(self.b.len() as i32);
        enc.zeroes(3);
        enc.bytes(&self.b);
    }
}

/// One LOB chunk within a `WriteLobRequest` part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLobChunk<'a> {
    /// Target locator
    pub id: LocatorId,
    /// Options; `LAST_DATA` on the final chunk
    pub opt: LobOptions,
    /// Chunk bytes
    pub b: &'a [u8],
}

impl WriteLobChunk<'_> {
    /// Encoded size of this chunk.
    #[must_use]
    pub fn size(&self) -> usize {
        8 + 1 + 8 + 4 + self.b.len()
    }

    /// Encode into `enc`: locator, options, offset (-1 = append), data.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.id);
        enc.u8(self.opt.bits());
        enc.i64(-1);
        enc.i32(self.b.len() as i32);
        enc.bytes(self.b);
    }
}

/// `WriteLobReply` part: locator ids assigned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteLobReply {
    /// One locator per LOB input parameter, in parameter order
    pub ids: Vec<LocatorId>,
}

impl WriteLobReply {
    /// Decode `num_arg` locator ids.
    pub fn decode(dec: &mut Decoder<'_>, num_arg: usize) -> Self {
        let ids = (0..num_arg).map(|_| dec.u64()).collect();
        Self { ids }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn fetch_next_detects_eof_within_final_chunk() {
        let data = vec![7u8; 1000];
        let mut descr = LobInDescr::new(Box::new(std::io::Cursor::new(data)));

        assert!(!descr.fetch_next(600).unwrap());
        assert_eq!(descr.chunk().len(), 600);

        assert!(descr.fetch_next(600).unwrap());
        assert_eq!(descr.chunk().len(), 400);
        assert!(descr.options().is_last_data());
    }

    #[test]
    fn exact_multiple_needs_trailing_empty_chunk() {
        let data = vec![7u8; 1200];
        let mut descr = LobInDescr::new(Box::new(std::io::Cursor::new(data)));

        assert!(!descr.fetch_next(600).unwrap());
        assert!(!descr.fetch_next(600).unwrap());
        assert!(descr.fetch_next(600).unwrap());
        assert_eq!(descr.chunk().len(), 0);
    }

    #[test]
    fn read_lob_request_offset_is_one_based_on_the_wire() {
        let req = ReadLobRequest { id: 42, ofs: 100, chunk_size: 8192 };
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        req.encode(&mut enc);
        enc.finish().unwrap();

        assert_eq!(buf.len(), ReadLobRequest::SIZE);
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.u64(), 42);
        assert_eq!(dec.i64(), 101);
        assert_eq!(dec.i32(), 8192);
    }

    #[test]
    fn read_lob_reply_round_trip() {
        let reply = ReadLobReply {
            id: 9,
            opt: LobOptions::DATA_INCLUDED | LobOptions::LAST_DATA,
            b: b"tail".to_vec(),
        };
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        reply.encode(&mut enc);
        enc.finish().unwrap();

        let mut dec = Decoder::new(&buf);
        assert_eq!(ReadLobReply::decode(&mut dec), reply);
        dec.finish().unwrap();
    }

    #[test]
    fn lob_out_descr_null() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        enc.u8(2);
        enc.u8(LobOptions::NULL_INDICATOR.bits());
        enc.zeroes(2);
        enc.finish().unwrap();

        let mut dec = Decoder::new(&buf);
        assert_eq!(LobOutDescr::decode(&mut dec, true), None);
    }
}
