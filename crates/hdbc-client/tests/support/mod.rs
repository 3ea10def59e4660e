#![allow(dead_code)] // each test binary uses a different slice of the helpers

//! Scripted server for session tests.
//!
//! Tests connect through an in-memory duplex transport; the test body
//! plays the server side, asserting on decoded requests and answering
//! with hand-built reply messages. Framing invariants (size accounting,
//! packet counter) are checked on every request that passes through.

use std::sync::Mutex;

use bytes::BytesMut;
use hdbc_client::{ConnAttrs, Connector, Dialer, DialerOptions, Transport};
use hdbc_proto::{
    encoding::{Decoder, Encoder},
    framing::{pad8, MessageHeader, PartAttributes, PartHeader, SegmentHeader, SegmentKind,
        MESSAGE_HEADER_SIZE, SEGMENT_HEADER_SIZE},
    options::{ConnectOptionKey, OptionValue, Options},
    prolog,
    typecode::TypeCode,
    value::HdbValue,
    FunctionCode, PartKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const SESSION_ID: i64 = 0x1234;

/// Dialer handing out a pre-created in-memory stream.
pub struct DuplexDialer(Mutex<Option<DuplexStream>>);

#[async_trait::async_trait]
impl Dialer for DuplexDialer {
    async fn dial(
        &self,
        _host: &str,
        _options: DialerOptions,
    ) -> std::io::Result<Box<dyn Transport>> {
        let stream = self
            .0
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "dialed twice"))?;
        Ok(Box::new(stream))
    }
}

/// A connector wired to an in-memory server end.
pub fn connector() -> (Connector, ServerConn) {
    let (client_end, server_end) = tokio::io::duplex(1 << 20);
    let attrs = ConnAttrs::new("testdb:39013");
    let connector = Connector::new(attrs)
        .with_jwt_auth("dummy token")
        .with_dialer(std::sync::Arc::new(DuplexDialer(Mutex::new(Some(client_end)))));
    (connector, ServerConn { stream: server_end, expected_packet: 0 })
}

/// One decoded client request.
pub struct Request {
    pub message_type: i8,
    pub commit: bool,
    pub parts: Vec<(PartHeader, Vec<u8>)>,
}

impl Request {
    pub fn part(&self, kind: PartKind) -> &(PartHeader, Vec<u8>) {
        self.parts
            .iter()
            .find(|(ph, _)| ph.part_kind == kind)
            .unwrap_or_else(|| panic!("request has no {kind:?} part"))
    }
}

/// A reply part under construction.
pub struct PartSpec {
    pub kind: PartKind,
    pub attrs: PartAttributes,
    pub num_arg: usize,
    pub body: Vec<u8>,
}

impl PartSpec {
    pub fn new(kind: PartKind, num_arg: usize, body: Vec<u8>) -> Self {
        Self { kind, attrs: PartAttributes::default(), num_arg, body }
    }

    pub fn with_attrs(mut self, attrs: PartAttributes) -> Self {
        self.attrs = attrs;
        self
    }
}

/// Server end of the duplex transport.
pub struct ServerConn {
    stream: DuplexStream,
    expected_packet: i32,
}

impl ServerConn {
    /// Serve the prolog and the JWT authentication exchange.
    pub async fn handshake(&mut self) {
        self.handshake_with_options(default_connect_options()).await;
    }

    pub async fn handshake_with_options(&mut self, options: Options<ConnectOptionKey>) {
        // prolog
        let mut request = [0u8; prolog::PROLOG_REQUEST_SIZE];
        self.stream.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..4], &[0xFF; 4]);
        self.stream.write_all(&[4, 50, 0, 4, 1, 0, 0, 0]).await.unwrap();

        // authenticate
        let request = self.read_request().await;
        assert_eq!(request.message_type, 65);
        request.part(PartKind::ClientContext);
        request.part(PartKind::Authentication);
        self.send_reply(
            FunctionCode::Nil,
            &[PartSpec::new(PartKind::Authentication, 1, b"\x02\x00\x03JWT\x07USER123".to_vec())],
        )
        .await;

        // connect
        let request = self.read_request().await;
        assert_eq!(request.message_type, 66);
        request.part(PartKind::Authentication);
        request.part(PartKind::ClientId);
        request.part(PartKind::ConnectOptions);

        let mut body = BytesMut::new();
        let mut enc = Encoder::new(&mut body);
        options.encode(&mut enc);
        enc.finish().unwrap();
        self.send_reply(
            FunctionCode::Nil,
            &[
                PartSpec::new(
                    PartKind::Authentication,
                    1,
                    b"\x02\x00\x03JWT\x205be8f43e064e0589ce07ba9de6fce107".to_vec(),
                ),
                PartSpec::new(PartKind::ConnectOptions, options.len(), body.to_vec()),
            ],
        )
        .await;
    }

    /// Read one request message, asserting the framing invariants.
    pub async fn read_request(&mut self) -> Request {
        let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
        self.stream.read_exact(&mut header_buf).await.unwrap();
        let mut dec = Decoder::new(&header_buf);
        let header = MessageHeader::decode(&mut dec);
        dec.finish().unwrap();

        // strictly monotonic packet counter
        assert_eq!(header.packet_count, self.expected_packet, "packet counter out of sequence");
        self.expected_packet += 1;
        assert_eq!(header.no_of_segm, 1);

        let mut body = vec![0u8; header.var_part_length as usize];
        self.stream.read_exact(&mut body).await.unwrap();

        // request segment header (kind-specific trailer decoded by hand)
        let mut dec = Decoder::new(&body);
        let segment_length = dec.i32();
        let _segment_ofs = dec.i32();
        let no_of_parts = dec.i16();
        let _segment_no = dec.i16();
        let kind = dec.i8();
        assert_eq!(kind, SegmentKind::Request as i8);
        let message_type = dec.i8();
        let commit = dec.bool();
        let _command_options = dec.i8();
        dec.skip(8);
        assert_eq!(segment_length as usize, body.len(), "segment length accounting");

        let mut parts = Vec::new();
        let mut framed_total = 0usize;
        for _ in 0..no_of_parts {
            let ph = PartHeader::decode(&mut dec);
            let body_len = ph.buffer_length as usize;
            let part_body = dec.bytes(body_len).to_vec();
            dec.skip(pad8(body_len));
            framed_total += 16 + body_len + pad8(body_len);
            parts.push((ph, part_body));
        }
        dec.finish().unwrap();
        assert_eq!(SEGMENT_HEADER_SIZE + framed_total, body.len(), "part size accounting");

        Request { message_type, commit, parts }
    }

    /// Send a reply-kind message.
    pub async fn send_reply(&mut self, fc: FunctionCode, parts: &[PartSpec]) {
        self.send_segment(SegmentKind::Reply, fc, parts).await;
    }

    /// Send an error-kind message carrying one server error.
    pub async fn send_error(&mut self, code: i32, text: &str) {
        let mut body = BytesMut::new();
        let mut enc = Encoder::new(&mut body);
        enc.i32(code);
        enc.i32(0);
        enc.i32(text.len() as i32);
        enc.i8(1);
        enc.bytes(b"HY000");
        enc.cesu8_str(text);
        enc.finish().unwrap();
        self.send_segment(
            SegmentKind::Error,
            FunctionCode::Nil,
            &[PartSpec::new(PartKind::Error, 1, body.to_vec())],
        )
        .await;
    }

    async fn send_segment(&mut self, kind: SegmentKind, fc: FunctionCode, parts: &[PartSpec]) {
        let framed: usize = parts.iter().map(|p| 16 + p.body.len() + pad8(p.body.len())).sum();
        let segment_length = SEGMENT_HEADER_SIZE + framed;

        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        MessageHeader {
            session_id: SESSION_ID,
            packet_count: 0,
            var_part_length: segment_length as u32,
            var_part_size: 1 << 20,
            no_of_segm: 1,
        }
        .encode(&mut enc);

        let mut segment =
            SegmentHeader::request(segment_length as i32, parts.len() as i16, hdbc_proto::MessageType::ExecuteDirect, false);
        segment.segment_kind = kind;
        segment.function_code = fc as i16;
        segment.encode(&mut enc);

        for part in parts {
            let mut ph =
                PartHeader::new(part.kind, part.num_arg, part.body.len(), 1 << 20).unwrap();
            ph.part_attributes = part.attrs;
            ph.encode(&mut enc);
            enc.bytes(&part.body);
            enc.zeroes(pad8(part.body.len()));
        }
        enc.finish().unwrap();
        self.stream.write_all(&buf).await.unwrap();
    }
}

/// Connect options a healthy server would report.
pub fn default_connect_options() -> Options<ConnectOptionKey> {
    Options::new()
        .with(ConnectOptionKey::DataFormatVersion2, OptionValue::Int(8))
        .with(
            ConnectOptionKey::FullVersionString,
            OptionValue::String("4.50.000.00.1700000000".into()),
        )
        .with(ConnectOptionKey::DatabaseName, OptionValue::String("HXE".into()))
}

/// Encode result metadata for integer columns named `names`.
pub fn int_metadata(names: &[&str]) -> Vec<u8> {
    metadata(&names.iter().map(|n| (*n, TypeCode::Integer)).collect::<Vec<_>>())
}

/// Encode result metadata for `(name, type)` columns.
pub fn metadata(columns: &[(&str, TypeCode)]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut enc = Encoder::new(&mut buf);
    let mut offset = 0u32;
    for (name, tc) in columns {
        enc.u8(0x02);
        enc.u8(*tc as u8);
        enc.i16(0);
        enc.i16(10);
        enc.zeroes(2);
        enc.u32(u32::MAX); // table name
        enc.u32(u32::MAX); // schema name
        enc.u32(offset);
        enc.u32(offset);
        offset += 1 + name.len() as u32;
    }
    for (name, _) in columns {
        enc.u8(name.len() as u8);
        enc.bytes(name.as_bytes());
    }
    enc.finish().unwrap();
    buf.to_vec()
}

/// Encode a resultset body of integer rows (single column).
pub fn int_rows(values: &[i32]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut enc = Encoder::new(&mut buf);
    for v in values {
        HdbValue::Int(*v).encode_res(&mut enc, TypeCode::Integer);
    }
    enc.finish().unwrap();
    buf.to_vec()
}

/// Encode a `RowsAffected` body.
pub fn rows_affected(counts: &[i32]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut enc = Encoder::new(&mut buf);
    for c in counts {
        enc.i32(*c);
    }
    enc.finish().unwrap();
    buf.to_vec()
}

/// Encode a `StatementId`/`ResultsetId` body.
pub fn id_body(id: u64) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

/// Encode parameter metadata for input fields of the given types.
pub fn input_parameter_metadata(tcs: &[TypeCode]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut enc = Encoder::new(&mut buf);
    for tc in tcs {
        enc.u8(0x01);
        enc.u8(*tc as u8);
        enc.i8(0x01); // in
        enc.zeroes(1);
        enc.u32(u32::MAX);
        enc.i16(0);
        enc.i16(0);
        enc.zeroes(4);
    }
    enc.finish().unwrap();
    buf.to_vec()
}
