//! Bulk execution packaging, partial-failure accounting, piecewise LOB
//! upload, and procedure calls with table outputs.

mod support;

use hdbc_client::{DriverError, ExecuteResult};
use hdbc_proto::{
    encoding::Encoder,
    framing::PartAttributes,
    lob::LobOptions,
    typecode::TypeCode,
    value::HdbValue,
    FunctionCode, PartKind,
};
use tokio_util::sync::CancellationToken;

use support::{
    connector, id_body, input_parameter_metadata, int_metadata, int_rows, rows_affected, PartSpec,
};

const STMT_ID: u64 = 4711;

async fn serve_prepare(server: &mut support::ServerConn, prm_types: &[TypeCode]) {
    let request = server.read_request().await;
    assert_eq!(request.message_type, 3); // prepare
    server
        .send_reply(
            FunctionCode::Insert,
            &[
                PartSpec::new(PartKind::StatementId, 1, id_body(STMT_ID)),
                PartSpec::new(
                    PartKind::ParameterMetadata,
                    prm_types.len(),
                    input_parameter_metadata(prm_types),
                ),
            ],
        )
        .await;
}

#[tokio::test]
async fn exec_many_splits_into_bulk_packages() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;
        serve_prepare(&mut server, &[TypeCode::Integer]).await;

        for expected_rows in [10_000usize, 10_000, 5_000] {
            let request = server.read_request().await;
            assert_eq!(request.message_type, 13); // execute
            let (ph, _) = request.part(PartKind::Parameters);
            assert_eq!(ph.num_arg(), expected_rows);
            assert_eq!(
                u64::from_le_bytes(request.part(PartKind::StatementId).1[..8].try_into().unwrap()),
                STMT_ID
            );
            server
                .send_reply(
                    FunctionCode::Insert,
                    &[PartSpec::new(
                        PartKind::RowsAffected,
                        1,
                        rows_affected(&[expected_rows as i32]),
                    )],
                )
                .await;
        }
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let prep = conn.prepare(&token, "insert into t values (?)").await.unwrap();
    let rows: Vec<Vec<HdbValue>> = (0..25_000).map(|i| vec![HdbValue::Int(i)]).collect();
    let total = conn.exec_many(&token, &prep, rows).await.unwrap();
    assert_eq!(total, 25_000);

    server_task.await.unwrap();
}

#[tokio::test]
async fn exec_many_reports_partial_sum_on_failure() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;
        serve_prepare(&mut server, &[TypeCode::Integer]).await;

        let _request = server.read_request().await;
        server
            .send_reply(
                FunctionCode::Insert,
                &[PartSpec::new(PartKind::RowsAffected, 1, rows_affected(&[10]))],
            )
            .await;

        // the second package fails on the server
        let _request = server.read_request().await;
        server.send_error(301, "unique constraint violated").await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let prep = conn.prepare(&token, "insert into t values (?)").await.unwrap();
    let rows: Vec<Vec<HdbValue>> = (0..25_000).map(|i| vec![HdbValue::Int(i)]).collect();
    let err = conn.exec_many(&token, &prep, rows).await.unwrap_err();
    match err {
        DriverError::PartialExecute { rows_affected, source } => {
            assert_eq!(rows_affected, 10);
            assert!(matches!(*source, DriverError::Hdb(_)));
        },
        other => panic!("expected partial execute, got {other:?}"),
    }

    server_task.await.unwrap();
}

#[tokio::test]
async fn lob_upload_streams_chunks_after_the_execute() {
    const LOB_LEN: usize = 50_224;
    const CHUNK: usize = 8_192;
    const LOCATOR: u64 = 0x10B0;

    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;
        serve_prepare(&mut server, &[TypeCode::Blob]).await;

        // the execute carries the first chunk inline
        let request = server.read_request().await;
        assert_eq!(request.message_type, 13);
        let (ph, body) = request.part(PartKind::Parameters);
        assert_eq!(ph.num_arg(), 1);
        // type code + 9-byte descriptor + first chunk
        assert_eq!(body.len(), 1 + 9 + CHUNK);
        assert_eq!(body[0], TypeCode::Blob as u8);
        let chunk_len = i32::from_le_bytes(body[2..6].try_into().unwrap());
        assert_eq!(chunk_len as usize, CHUNK);
        server
            .send_reply(
                FunctionCode::Insert,
                &[
                    PartSpec::new(PartKind::RowsAffected, 1, rows_affected(&[1])),
                    PartSpec::new(PartKind::WriteLobReply, 1, LOCATOR.to_le_bytes().to_vec()),
                ],
            )
            .await;

        // remaining chunks arrive via write-lob requests
        let expected = [CHUNK, CHUNK, CHUNK, CHUNK, CHUNK, 1_072];
        for (i, &expected_len) in expected.iter().enumerate() {
            let request = server.read_request().await;
            assert_eq!(request.message_type, 17); // write lob
            let (ph, body) = request.part(PartKind::WriteLobRequest);
            assert_eq!(ph.num_arg(), 1);
            assert_eq!(u64::from_le_bytes(body[..8].try_into().unwrap()), LOCATOR);
            let opt = LobOptions::from_bits_retain(body[8]);
            let is_final = i == expected.len() - 1;
            assert_eq!(opt.is_last_data(), is_final);
            assert_eq!(i64::from_le_bytes(body[9..17].try_into().unwrap()), -1);
            let len = i32::from_le_bytes(body[17..21].try_into().unwrap()) as usize;
            assert_eq!(len, expected_len);
            assert_eq!(body.len(), 21 + len);

            // the final reply carries no locator ids
            server.send_reply(FunctionCode::Nil, &[]).await;
        }
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let prep = conn.prepare(&token, "insert into blobs values (?)").await.unwrap();
    let payload = vec![0x5A_u8; LOB_LEN];
    let result = conn.exec(&token, &prep, vec![HdbValue::Bytes(payload)]).await.unwrap();
    assert_eq!(result, ExecuteResult::RowsAffected(1));

    server_task.await.unwrap();
}

#[tokio::test]
async fn clob_download_counts_surrogate_pairs_twice() {
    use hdbc_proto::{cesu8, lob::ReadLobReply};

    // inline: "a𝄞" = 1 + 6 bytes, counted as 3 characters (pair counts
    // twice); the remaining 2 characters arrive via one read-lob round trip
    let inline = cesu8::encode("a𝄞");
    let tail = cesu8::encode("bc");

    let (connector, mut server) = connector();
    let inline_clone = inline.clone();
    let tail_clone = tail.clone();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let _request = server.read_request().await;
        let mut row = bytes::BytesMut::new();
        let mut enc = Encoder::new(&mut row);
        enc.u8(2); // lob type code
        enc.u8(LobOptions::DATA_INCLUDED.bits());
        enc.zeroes(2);
        enc.u64(5); // total characters
        enc.u64((inline_clone.len() + tail_clone.len()) as u64);
        enc.u64(55); // locator
        enc.i32(inline_clone.len() as i32);
        enc.bytes(&inline_clone);
        enc.finish().unwrap();
        server
            .send_reply(
                FunctionCode::Select,
                &[
                    PartSpec::new(
                        PartKind::ResultMetadata,
                        1,
                        support::metadata(&[("DOC", TypeCode::Nclob)]),
                    ),
                    PartSpec::new(PartKind::ResultsetId, 1, id_body(600)),
                    PartSpec::new(PartKind::Resultset, 1, row.to_vec())
                        .with_attrs(PartAttributes::LAST_PACKET),
                ],
            )
            .await;

        // the follow-up read resumes at character offset 3 (wire: 1-based)
        let request = server.read_request().await;
        assert_eq!(request.message_type, 16); // read lob
        let (_, body) = request.part(PartKind::ReadLobRequest);
        assert_eq!(u64::from_le_bytes(body[..8].try_into().unwrap()), 55);
        assert_eq!(i64::from_le_bytes(body[8..16].try_into().unwrap()), 4);
        assert_eq!(i32::from_le_bytes(body[16..20].try_into().unwrap()), 2);

        let reply = ReadLobReply {
            id: 55,
            opt: LobOptions::DATA_INCLUDED | LobOptions::LAST_DATA,
            b: tail_clone,
        };
        let mut body = bytes::BytesMut::new();
        let mut enc = Encoder::new(&mut body);
        reply.encode(&mut enc);
        enc.finish().unwrap();
        server
            .send_reply(
                FunctionCode::Nil,
                &[PartSpec::new(PartKind::ReadLobReply, 1, body.to_vec())],
            )
            .await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let mut cursor = conn.query_direct(&token, "select doc from docs").await.unwrap().unwrap();
    let descr = match &cursor.row(0)[0] {
        HdbValue::LobOut(descr) => descr.clone(),
        other => panic!("expected lob value, got {other:?}"),
    };
    assert!(descr.is_char_based);
    assert!(!descr.opt.is_last_data());

    let mut out = Vec::new();
    cursor.read_lob(&token, &descr, &mut out).await.unwrap();
    assert_eq!(out, cesu8::encode("a𝄞bc"));

    cursor.close(&token).await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn call_collects_outputs_and_tables() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        // prepare: one in parameter, one out parameter
        let request = server.read_request().await;
        assert_eq!(request.message_type, 3);
        let mut meta = bytes::BytesMut::new();
        let mut enc = Encoder::new(&mut meta);
        for mode in [0x01u8, 0x04] {
            enc.u8(0x01);
            enc.u8(TypeCode::Integer as u8);
            enc.i8(mode as i8);
            enc.zeroes(1);
            enc.u32(u32::MAX);
            enc.i16(0);
            enc.i16(0);
            enc.zeroes(4);
        }
        enc.finish().unwrap();
        server
            .send_reply(
                FunctionCode::DbProcedureCallWithResult,
                &[
                    PartSpec::new(PartKind::StatementId, 1, id_body(STMT_ID)),
                    PartSpec::new(PartKind::ParameterMetadata, 2, meta.to_vec()),
                ],
            )
            .await;

        // execute: one input row, reply streams outputs plus one table
        let request = server.read_request().await;
        assert_eq!(request.message_type, 13);
        assert_eq!(request.part(PartKind::Parameters).0.num_arg(), 1);

        let mut out_body = bytes::BytesMut::new();
        let mut enc = Encoder::new(&mut out_body);
        HdbValue::Int(42).encode_res(&mut enc, TypeCode::Integer);
        enc.finish().unwrap();

        server
            .send_reply(
                FunctionCode::DbProcedureCallWithResult,
                &[
                    PartSpec::new(PartKind::OutputParameters, 1, out_body.to_vec()),
                    PartSpec::new(PartKind::ResultMetadata, 1, int_metadata(&["RESULT"])),
                    PartSpec::new(PartKind::ResultsetId, 1, id_body(9009)),
                    PartSpec::new(PartKind::Resultset, 3, int_rows(&[7, 8, 9]))
                        .with_attrs(PartAttributes::LAST_PACKET),
                ],
            )
            .await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let prep = conn.prepare(&token, "call proc(?, ?)").await.unwrap();
    assert!(prep.is_procedure_call());
    assert_eq!(prep.num_input_fields(), 1);

    let call = conn.call(&token, &prep, vec![HdbValue::Int(5)]).await.unwrap();
    let (out_fields, out_values) = call.output();
    assert_eq!(out_fields.len(), 1);
    assert_eq!(out_values, &[HdbValue::Int(42)]);

    let tables = call.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].id, 9009);
    assert_eq!(tables[0].num_rows(), 3);
    assert_eq!(tables[0].row(1), &[HdbValue::Int(8)]);

    server_task.await.unwrap();
}
