//! Session lifecycle tests against a scripted server:
//! authentication, direct execution, cursors, the nested-query guard,
//! cancellation, and connect-info queries.

mod support;

use hdbc_client::{DriverError, ExecuteResult};
use hdbc_proto::{
    encoding::Encoder,
    framing::PartAttributes,
    options::{DbConnectInfoKey, OptionValue, Options},
    value::HdbValue,
    FunctionCode, PartKind,
};
use tokio_util::sync::CancellationToken;

use support::{
    connector, id_body, int_metadata, int_rows, rows_affected, PartSpec,
};

#[tokio::test]
async fn connect_reports_server_metadata() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;
        // close() sends a disconnect and does not wait for any reply
        let request = server.read_request().await;
        assert_eq!(request.message_type, 77);
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();
    assert_eq!(conn.version(), "4.50.000.00.1700000000");
    assert_eq!(conn.database_name(), "HXE");
    assert_eq!(conn.dfv().await, 8);
    assert!(conn.is_valid().await);

    conn.close().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn exec_direct_distinguishes_dml_and_ddl() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let request = server.read_request().await;
        assert_eq!(request.message_type, 2); // execute direct
        assert!(request.commit);
        server
            .send_reply(
                FunctionCode::Insert,
                &[PartSpec::new(PartKind::RowsAffected, 2, rows_affected(&[3, 4]))],
            )
            .await;

        let request = server.read_request().await;
        assert_eq!(request.message_type, 2);
        server.send_reply(FunctionCode::Ddl, &[]).await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let result = conn.exec_direct(&token, "insert into t select * from s").await.unwrap();
    assert_eq!(result, ExecuteResult::RowsAffected(7));

    let result = conn.exec_direct(&token, "create table t (i int)").await.unwrap();
    assert_eq!(result, ExecuteResult::NoRows);

    server_task.await.unwrap();
}

#[tokio::test]
async fn select_from_dummy_closes_without_round_trip() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let request = server.read_request().await;
        assert_eq!(request.message_type, 2);
        server
            .send_reply(
                FunctionCode::Select,
                &[
                    PartSpec::new(PartKind::ResultMetadata, 1, int_metadata(&["DUMMY"])),
                    PartSpec::new(PartKind::ResultsetId, 1, id_body(501)),
                    PartSpec::new(PartKind::Resultset, 1, int_rows(&[1]))
                        .with_attrs(PartAttributes::LAST_PACKET),
                ],
            )
            .await;

        // the next message must be the disconnect: a last-packet cursor
        // closes without a close-resultset round trip
        let request = server.read_request().await;
        assert_eq!(request.message_type, 77);
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let cursor = conn.query_direct(&token, "select 1 from dummy").await.unwrap().unwrap();
    assert_eq!(cursor.num_rows(), 1);
    assert_eq!(cursor.row(0), &[HdbValue::Int(1)]);
    assert!(cursor.attributes().last_packet());
    cursor.close(&token).await.unwrap();

    conn.close().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn open_cursor_rejects_nested_statements() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let _request = server.read_request().await;
        server
            .send_reply(
                FunctionCode::Select,
                &[
                    PartSpec::new(PartKind::ResultMetadata, 1, int_metadata(&["N"])),
                    PartSpec::new(PartKind::ResultsetId, 1, id_body(77)),
                    PartSpec::new(PartKind::Resultset, 2, int_rows(&[1, 2])),
                ],
            )
            .await;

        // close of the still-open cursor
        let request = server.read_request().await;
        assert_eq!(request.message_type, 69);
        assert_eq!(u64::from_le_bytes(request.part(PartKind::ResultsetId).1[..8].try_into().unwrap()), 77);
        server.send_reply(FunctionCode::Nil, &[]).await;

        // statement retried after the cursor released the connection
        let request = server.read_request().await;
        assert_eq!(request.message_type, 2);
        server
            .send_reply(
                FunctionCode::Insert,
                &[PartSpec::new(PartKind::RowsAffected, 1, rows_affected(&[1]))],
            )
            .await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let cursor = conn.query_direct(&token, "select n from t").await.unwrap().unwrap();
    assert!(!cursor.attributes().last_packet());

    // while the cursor holds the connection every other statement fails
    let err = conn.exec_direct(&token, "insert into t values (9)").await.unwrap_err();
    assert!(matches!(err, DriverError::NestedQuery));

    cursor.close(&token).await.unwrap();

    let result = conn.exec_direct(&token, "insert into t values (9)").await.unwrap();
    assert_eq!(result, ExecuteResult::RowsAffected(1));

    server_task.await.unwrap();
}

#[tokio::test]
async fn cancellation_poisons_the_connection() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;
        // swallow the ping request and never answer
        let _request = server.read_request().await;
    });

    let connect_token = CancellationToken::new();
    let conn = connector.connect(&connect_token).await.unwrap();

    let op_token = CancellationToken::new();
    let ping = conn.ping(&op_token);
    tokio::pin!(ping);

    // let the request hit the wire, then pull the plug
    tokio::select! {
        biased;
        res = &mut ping => panic!("ping finished early: {res:?}"),
        () = tokio::time::sleep(std::time::Duration::from_millis(20)) => {},
    }
    op_token.cancel();
    let err = ping.await.unwrap_err();
    assert!(matches!(err, DriverError::Cancelled));

    // the connection is poisoned for good
    assert!(!conn.is_valid().await);
    let err = conn.exec_direct(&op_token, "select 1 from dummy").await.unwrap_err();
    assert!(matches!(err, DriverError::BadConnection));

    server_task.await.unwrap();
}

#[tokio::test]
async fn fetch_next_appends_into_the_row_buffer() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let _request = server.read_request().await;
        server
            .send_reply(
                FunctionCode::Select,
                &[
                    PartSpec::new(PartKind::ResultMetadata, 1, int_metadata(&["N"])),
                    PartSpec::new(PartKind::ResultsetId, 1, id_body(88)),
                    PartSpec::new(PartKind::Resultset, 2, int_rows(&[1, 2])),
                ],
            )
            .await;

        for (values, last) in [(vec![3, 4], false), (vec![5], true)] {
            let request = server.read_request().await;
            assert_eq!(request.message_type, 71); // fetch next
            assert_eq!(
                u64::from_le_bytes(request.part(PartKind::ResultsetId).1[..8].try_into().unwrap()),
                88
            );
            let attrs = if last { PartAttributes::LAST_PACKET } else { PartAttributes::default() };
            server
                .send_reply(
                    FunctionCode::Fetch,
                    &[PartSpec::new(PartKind::Resultset, values.len(), int_rows(&values))
                        .with_attrs(attrs)],
                )
                .await;
        }
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let mut cursor = conn.query_direct(&token, "select n from t").await.unwrap().unwrap();
    while cursor.fetch_next(&token).await.unwrap() {}

    assert_eq!(cursor.num_rows(), 5);
    let all: Vec<i32> = (0..cursor.num_rows())
        .map(|i| match cursor.row(i)[0] {
            HdbValue::Int(v) => v,
            ref other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(all, vec![1, 2, 3, 4, 5]);
    assert!(cursor.decode_errors().is_empty());

    cursor.close(&token).await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn db_connect_info_round_trip() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let request = server.read_request().await;
        assert_eq!(request.message_type, 82);
        request.part(PartKind::DbConnectInfo);

        let reply: Options<DbConnectInfoKey> = Options::new()
            .with(DbConnectInfoKey::Host, OptionValue::String("hana-2".into()))
            .with(DbConnectInfoKey::Port, OptionValue::Int(39_041))
            .with(DbConnectInfoKey::IsConnected, OptionValue::Bool(false));
        let mut body = bytes::BytesMut::new();
        let mut enc = Encoder::new(&mut body);
        reply.encode(&mut enc);
        enc.finish().unwrap();
        server
            .send_reply(
                FunctionCode::Nil,
                &[PartSpec::new(PartKind::DbConnectInfo, reply.len(), body.to_vec())],
            )
            .await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let info = conn.db_connect_info(&token, "TENANT2").await.unwrap();
    assert_eq!(info.database_name, "TENANT2");
    assert_eq!(info.host, "hana-2");
    assert_eq!(info.port, 39_041);
    assert!(!info.is_connected);

    server_task.await.unwrap();
}

#[tokio::test]
async fn server_errors_keep_the_connection_usable() {
    let (connector, mut server) = connector();
    let server_task = tokio::spawn(async move {
        server.handshake().await;

        let _request = server.read_request().await;
        server.send_error(257, "sql syntax error").await;

        let _request = server.read_request().await;
        server
            .send_reply(
                FunctionCode::Insert,
                &[PartSpec::new(PartKind::RowsAffected, 1, rows_affected(&[1]))],
            )
            .await;
    });

    let token = CancellationToken::new();
    let conn = connector.connect(&token).await.unwrap();

    let err = conn.exec_direct(&token, "selct 1").await.unwrap_err();
    match &err {
        DriverError::Hdb(server_err) => {
            assert_eq!(server_err.code, 257);
            assert_eq!(server_err.text, "sql syntax error");
        },
        other => panic!("expected hdb error, got {other:?}"),
    }
    assert!(!err.is_fatal());
    assert!(conn.is_valid().await);

    let result = conn.exec_direct(&token, "insert into t values (1)").await.unwrap();
    assert_eq!(result, ExecuteResult::RowsAffected(1));

    server_task.await.unwrap();
}
