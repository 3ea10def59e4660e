//! Framed request/reply exchange.
//!
//! One [`Channel`] per connection. Writing assembles the whole message in a
//! reusable buffer (the headers need the total sizes up front) and sends
//! it in one `write_all`. Reading pulls the 32-byte message header, then the
//! announced variable part, and scans the part headers so reply parts can be
//! iterated lazily by the session layer.
//!
//! Error-kind reply segments are converted here: the `Error` part becomes a
//! [`DriverError::Hdb`] (warnings are logged and dropped). The connection
//! stays usable afterwards.

use bytes::BytesMut;
use hdbc_proto::{
    encoding::{Decoder, Encoder},
    framing::{
        pad8, part_framed_size, MessageHeader, PartHeader, SegmentHeader, INITIAL_SESSION_ID,
        MESSAGE_HEADER_SIZE, SEGMENT_HEADER_SIZE,
    },
    parts::Part,
    prolog,
    resultset::decode_server_errors,
    FunctionCode, MessageType, PartKind, ProtocolError, SegmentKind,
};

use crate::{
    error::{DriverError, Result},
    wire::Wire,
};

/// A framed connection: wire plus packet/session bookkeeping.
pub(crate) struct Channel {
    wire: Wire,
    buffer_size: u32,
    session_id: i64,
    next_packet: i32,
    write_buf: BytesMut,
    read_buf: BytesMut,
}

impl Channel {
    pub(crate) fn new(wire: Wire, buffer_size: usize) -> Self {
        Self {
            wire,
            buffer_size: buffer_size as u32,
            session_id: INITIAL_SESSION_ID,
            next_packet: 0,
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
        }
    }

    pub(crate) fn session_id(&self) -> i64 {
        self.session_id
    }

    pub(crate) fn is_bad(&self) -> bool {
        self.wire.is_bad()
    }

    /// Exchange the initialization prolog.
    pub(crate) async fn prolog(&mut self) -> Result<prolog::PrologReply> {
        self.write_buf.clear();
        let mut enc = Encoder::new(&mut self.write_buf);
        prolog::encode_request(&mut enc);
        enc.finish()?;
        let request = self.write_buf.split().freeze();
        self.wire.write_all(&request).await?;

        let mut reply = [0u8; prolog::PROLOG_REPLY_SIZE];
        self.wire.read_exact(&mut reply).await?;
        let mut dec = Decoder::new(&reply);
        let parsed = prolog::PrologReply::decode(&mut dec);
        dec.finish()?;
        Ok(parsed)
    }

    /// Frame and send one request message.
    pub(crate) async fn write_message(
        &mut self,
        message_type: MessageType,
        commit: bool,
        parts: &[Part<'_>],
    ) -> Result<()> {
        let bodies: Vec<usize> = parts.iter().map(Part::size).collect();
        let segment_length =
            SEGMENT_HEADER_SIZE + bodies.iter().map(|&len| part_framed_size(len)).sum::<usize>();

        let header = MessageHeader {
            session_id: self.session_id,
            packet_count: self.next_packet,
            var_part_length: segment_length as u32,
            var_part_size: self.buffer_size,
            no_of_segm: 1,
        };
        self.next_packet += 1;

        self.write_buf.clear();
        let mut enc = Encoder::new(&mut self.write_buf);
        header.encode(&mut enc);
        SegmentHeader::request(segment_length as i32, parts.len() as i16, message_type, commit)
            .encode(&mut enc);

        let mut remaining = self.buffer_size as i64 - SEGMENT_HEADER_SIZE as i64;
        for (part, &body_len) in parts.iter().zip(&bodies) {
            remaining -= part_framed_size(body_len) as i64;
            let ph = PartHeader::new(
                part.kind(),
                part.num_arg(),
                body_len,
                remaining.clamp(0, i64::from(i32::MAX)) as i32,
            )?;
            ph.encode(&mut enc);
            part.encode(&mut enc);
            enc.zeroes(pad8(body_len));
        }
        enc.finish()?;

        debug_assert_eq!(self.write_buf.len(), MESSAGE_HEADER_SIZE + segment_length);

        let message = self.write_buf.split().freeze();
        self.wire.write_all(&message).await
    }

    /// Read one reply message.
    ///
    /// Stores the reply's session id, validates the single-segment
    /// invariant, scans part headers, and converts error segments into
    /// [`DriverError::Hdb`].
    pub(crate) async fn read_reply(&mut self) -> Result<Reply> {
        let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
        self.wire.read_exact(&mut header_buf).await?;
        let mut dec = Decoder::new(&header_buf);
        let header = MessageHeader::decode(&mut dec);
        dec.finish()?;

        if header.no_of_segm != 1 {
            return Err(ProtocolError::InvalidSegmentCount(header.no_of_segm).into());
        }
        self.session_id = header.session_id;

        self.read_buf.clear();
        self.read_buf.resize(header.var_part_length as usize, 0);
        self.wire.read_exact(&mut self.read_buf).await?;

        let mut dec = Decoder::new(&self.read_buf);
        let segment = SegmentHeader::decode(&mut dec);
        if let Some(err) = dec.error() {
            return Err(err.clone().into());
        }

        // scan part headers so iteration can skip unread parts by length
        let mut parts = Vec::with_capacity(segment.no_of_parts as usize);
        let mut pos = SEGMENT_HEADER_SIZE;
        for i in 0..segment.no_of_parts {
            let avail = &self.read_buf[pos..];
            let mut hdec = Decoder::new(avail);
            let ph = PartHeader::decode(&mut hdec);
            if let Some(err) = hdec.error() {
                return Err(err.clone().into());
            }
            let body_len = ph.buffer_length as usize;
            let body_start = pos + hdec.position();
            if body_start + body_len > self.read_buf.len() {
                return Err(ProtocolError::Underflow {
                    needed: body_len,
                    remaining: self.read_buf.len() - body_start,
                }
                .into());
            }
            parts.push((ph, body_start..body_start + body_len));

            let mut advance = hdec.position() + body_len + pad8(body_len);
            if pos + advance > self.read_buf.len() && i == segment.no_of_parts - 1 {
                // trailing padding of the final part may be absent
                advance = hdec.position() + body_len;
            }
            pos += advance;
        }

        let reply = Reply {
            function_code: FunctionCode::from_i16(segment.function_code).unwrap_or_default(),
            parts,
            buf: std::mem::take(&mut self.read_buf),
        };

        if segment.segment_kind == SegmentKind::Error {
            let err = reply.server_error()?;
            self.read_buf = reply.buf; // keep the allocation
            return Err(err);
        }
        Ok(reply)
    }

    /// Send a request and read its reply.
    pub(crate) async fn exchange(
        &mut self,
        message_type: MessageType,
        commit: bool,
        parts: &[Part<'_>],
    ) -> Result<Reply> {
        self.write_message(message_type, commit, parts).await?;
        self.read_reply().await
    }

    /// Read and discard a reply (fire-and-forget requests).
    pub(crate) async fn read_skip(&mut self) -> Result<()> {
        self.read_reply().await.map(|_| ())
    }
}

/// A decoded reply message: function code plus lazily-readable parts.
pub(crate) struct Reply {
    pub(crate) function_code: FunctionCode,
    parts: Vec<(PartHeader, std::ops::Range<usize>)>,
    buf: BytesMut,
}

impl Reply {
    /// Iterate all parts; the callback decodes the kinds it cares about
    /// from the part-scoped decoder, everything else is skipped.
    ///
    /// Decoder underflow inside a callback is fatal (reading past the
    /// declared part body means the kind dispatch is out of sync).
    pub(crate) fn for_each_part<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&PartHeader, &mut Decoder<'_>) -> Result<()>,
    {
        for (ph, range) in &self.parts {
            let mut dec = Decoder::new(&self.buf[range.clone()]);
            f(ph, &mut dec)?;
            dec.finish()?;
        }
        Ok(())
    }

    /// Extract the server error(s) of an error segment.
    ///
    /// The first error-level entry wins; warnings are logged and dropped.
    fn server_error(&self) -> Result<DriverError> {
        let mut first = None;
        self.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::Error {
                for err in decode_server_errors(dec, ph.num_arg()) {
                    if err.is_warning() {
                        tracing::warn!(code = err.code, "server warning: {}", err.text);
                    } else if first.is_none() {
                        first = Some(err);
                    }
                }
            }
            Ok(())
        })?;
        Ok(match first {
            Some(err) => DriverError::Hdb(err),
            None => ProtocolError::Other("error segment without error part".into()).into(),
        })
    }
}
