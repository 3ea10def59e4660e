//! Fuzzer for the reply-side decoders.
//!
//! Every byte a server sends flows through these paths: the three framing
//! headers, the metadata parts with their name tables, row decoding, LOB
//! descriptors, option lists and the authentication payload reader. None of
//! them may panic or read out of bounds on arbitrary input; a malformed
//! reply must surface as a latched decoder error.

#![no_main]

use hdbc_proto::{
    auth::Authenticator,
    cesu8,
    encoding::Decoder,
    fields::{ParameterMetadata, ResultMetadata},
    framing::{MessageHeader, PartHeader, SegmentHeader},
    lob::{LobOutDescr, ReadLobReply, WriteLobReply},
    options::{ConnectOptionKey, Options},
    resultset::{decode_server_errors, RowsAffected},
    typecode::TypeCode,
    value::HdbValue,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    // cap the argument counts so a 2-byte input cannot ask for 4G rows
    let num_arg = usize::from(data[0]) % 32;
    let body = &data[1..];

    let mut dec = Decoder::new(body);
    let _ = MessageHeader::decode(&mut dec);
    let _ = SegmentHeader::decode(&mut dec);
    let _ = PartHeader::decode(&mut dec);

    let mut dec = Decoder::new(body);
    let _ = ResultMetadata::decode(&mut dec, num_arg);

    let mut dec = Decoder::new(body);
    let _ = ParameterMetadata::decode(&mut dec, num_arg);

    let mut dec = Decoder::new(body);
    let _ = RowsAffected::decode(&mut dec, num_arg);

    let mut dec = Decoder::new(body);
    let _ = decode_server_errors(&mut dec, num_arg);

    let mut dec = Decoder::new(body);
    let _: Options<ConnectOptionKey> = Options::decode(&mut dec, num_arg);

    let mut dec = Decoder::new(body);
    let _ = LobOutDescr::decode(&mut dec, true);
    let mut dec = Decoder::new(body);
    let _ = ReadLobReply::decode(&mut dec);
    let mut dec = Decoder::new(body);
    let _ = WriteLobReply::decode(&mut dec, num_arg);

    for tc in [
        TypeCode::Boolean,
        TypeCode::Integer,
        TypeCode::Decimal,
        TypeCode::Fixed12,
        TypeCode::Nvarchar,
        TypeCode::Varbinary,
        TypeCode::Nclob,
        TypeCode::Longdate,
    ] {
        let mut dec = Decoder::new(body);
        let _ = HdbValue::decode_res(&mut dec, tc, 2);
    }

    let _ = cesu8::decode(body);
    let _ = cesu8::char_count(body);

    // the auth reader must reject malformed payloads, not panic on them
    let mut auth = Authenticator::new("user");
    auth.add_basic("user", "secret");
    auth.add_jwt("token");
    let mut dec = Decoder::new(body);
    if auth.init_reply_decode(&mut dec).is_ok() {
        let mut dec = Decoder::new(body);
        let _ = auth.final_reply_decode(&mut dec);
    }
});
