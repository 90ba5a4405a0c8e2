// tests/integration/cursor_test.rs

//! Cursor tests: pull mode, push mode, terminal sequences, and
//! mid-stream errors.

use crate::test_helpers::*;
use opaldb_client::{Connection, CursorEvent, OpalDBError, Reply, RunOpts};
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::test]
async fn cursor_pull_concatenates_batches_in_order() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!([1, 2])).await;

        let (continue_token, query) = read_frame(&mut stream).await;
        assert_eq!(continue_token, token, "continuation reuses the token");
        assert_eq!(query, json!([2]));
        write_response(&mut stream, token, 3, json!([3])).await;

        let (_, query) = read_frame(&mut stream).await;
        assert_eq!(query, json!([2]));
        write_response(&mut stream, token, 2, json!([4, 5])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let reply = conn.run(json!("rows"), RunOpts::default()).await.expect("run");
    let cursor = match reply {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };
    let all = cursor.all().await.expect("all");
    assert_eq!(all, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    server_task.await.expect("server task");
}

#[tokio::test]
async fn cursor_push_delivers_batches_then_exactly_one_done() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!(["a", "b"])).await;
        let _ = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!(["c"])).await;
        let _ = read_frame(&mut stream).await;
        write_response(&mut stream, token, 2, json!(["d"])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let cursor = match conn.run(json!("rows"), RunOpts::default()).await.expect("run") {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };

    let (sink, mut events) = mpsc::channel(16);
    cursor.activate(sink);

    assert_eq!(
        events.recv().await,
        Some(CursorEvent::Batch(vec![json!("a"), json!("b")]))
    );
    assert_eq!(events.recv().await, Some(CursorEvent::Batch(vec![json!("c")])));
    assert_eq!(events.recv().await, Some(CursorEvent::Batch(vec![json!("d")])));
    assert_eq!(events.recv().await, Some(CursorEvent::Done));
    // The push task holds the only sender; after Done it ends and the
    // channel closes with nothing further delivered.
    assert_eq!(events.recv().await, None);
    server_task.await.expect("server task");
}

#[tokio::test]
async fn terminal_sequence_yields_a_drained_cursor() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 2, json!([10, 20, 30])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let mut cursor = match conn.run(json!("rows"), RunOpts::default()).await.expect("run") {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };

    let batch = cursor.next_batch().await.expect("first batch");
    assert_eq!(batch, Some(vec![json!(10), json!(20), json!(30)]));
    // Drained: no continuation is issued, the stream just ends.
    assert_eq!(cursor.next_batch().await.expect("end"), None);
    server_task.await.expect("server task");
}

#[tokio::test]
async fn partial_then_terminal_is_delivered_once_per_batch() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!([1])).await;
        let _ = read_frame(&mut stream).await;
        write_response(&mut stream, token, 2, json!([2])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let mut cursor = match conn.run(json!("rows"), RunOpts::default()).await.expect("run") {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };

    assert_eq!(cursor.next_batch().await.expect("batch 1"), Some(vec![json!(1)]));
    assert_eq!(cursor.next_batch().await.expect("batch 2"), Some(vec![json!(2)]));
    assert_eq!(cursor.next_batch().await.expect("end"), None);
    assert_eq!(cursor.next_batch().await.expect("still ended"), None);
    server_task.await.expect("server task");
}

#[tokio::test]
async fn cursor_error_mid_stream_is_terminal() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!([1])).await;
        let _ = read_frame(&mut stream).await;
        write_response(&mut stream, token, 18, json!(["index went away"])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let cursor = match conn.run(json!("rows"), RunOpts::default()).await.expect("run") {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };

    let err = cursor.all().await.expect_err("stream must fail");
    match err {
        OpalDBError::Query { kind, payload } => {
            assert_eq!(format!("{kind:?}"), "RuntimeError");
            assert_eq!(payload, json!("index went away"));
        }
        other => panic!("expected query error, got {other:?}"),
    }
    server_task.await.expect("server task");
}

#[tokio::test]
async fn query_error_reply() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 17, json!(["no such table"])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let err = conn
        .run(json!("bad"), RunOpts::default())
        .await
        .expect_err("query must fail");
    match err {
        OpalDBError::Query { kind, payload } => {
            assert_eq!(format!("{kind:?}"), "CompileError");
            assert_eq!(payload, json!("no such table"));
        }
        other => panic!("expected query error, got {other:?}"),
    }
    server_task.await.expect("server task");
}

#[tokio::test]
async fn closing_an_open_cursor_sends_stop() {
    init_tracing();
    let server = MockServer::bind().await;
    let options = server.options();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept_authenticated().await;
        let (token, _) = read_frame(&mut stream).await;
        write_response(&mut stream, token, 3, json!([1])).await;
        let (stop_token, query) = read_frame(&mut stream).await;
        assert_eq!(stop_token, token);
        assert_eq!(query, json!([3]));
        write_response(&mut stream, token, 2, json!([])).await;
    });

    let conn = Connection::connect(options).await.expect("connect");
    let mut cursor = match conn.run(json!("rows"), RunOpts::default()).await.expect("run") {
        Reply::Cursor(cursor) => cursor,
        other => panic!("expected cursor reply, got {other:?}"),
    };
    cursor.close().await;
    assert_eq!(cursor.next_batch().await.expect("closed"), Some(vec![json!(1)]));
    assert_eq!(cursor.next_batch().await.expect("closed"), None);
    server_task.await.expect("server task");
}
