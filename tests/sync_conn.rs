//! `sync::Conn` against a scripted server

mod common;

use std::time::Duration;

use common::*;
use mysql_wire::channel::InstrumentationSettings;
use mysql_wire::constant::{CapabilityFlags, ColumnType};
use mysql_wire::error::{Error, FramingError};
use mysql_wire::{Row, RowAccess, Value};
use mysql_wire::sync::QueryOptions;
use pretty_assertions::assert_eq;

const LONGLONG: ColumnType = ColumnType::MYSQL_TYPE_LONGLONG;
const VARCHAR: ColumnType = ColumnType::MYSQL_TYPE_VAR_STRING;

fn current_server() -> Script {
    Script::handshake(server_capabilities())
}

fn legacy_server() -> Script {
    Script::handshake(server_capabilities() - CapabilityFlags::CLIENT_DEPRECATE_EOF)
}

#[test]
fn handshake_negotiates_capabilities() {
    let script = current_server();
    let mut opts = opts();
    opts.db = Some("shop".to_string());
    let (conn, recorded) = connect(&script, opts);

    assert_eq!(conn.session().server_version, SERVER_VERSION);
    assert_eq!(conn.session().connection_id, CONNECTION_ID);
    assert_eq!(conn.session().seed, b"abcdefghijklmnopqrst");
    let caps = conn.capabilities();
    assert!(caps.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
    assert!(caps.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
    assert!(!caps.contains(CapabilityFlags::CLIENT_COMPRESS));
    assert!(!caps.contains(CapabilityFlags::CLIENT_LOCAL_FILES));
    assert!(conn.state().autocommit());

    let packets = client_packets(&recorded.lock().unwrap().written);
    assert_eq!(packets.len(), 1);
    let (sequence_id, response) = &packets[0];
    assert_eq!(*sequence_id, 1);
    let sent = u32::from_le_bytes(response[..4].try_into().unwrap());
    assert_eq!(sent, caps.bits());
    assert_eq!(&response[32..37], b"root\0");
    assert!(response.ends_with(b"shop\0mysql_native_password\0"));
}

#[test]
fn rejected_connection() {
    let mut script = Script::commands(true);
    script.err(1040, "08004", "Too many connections");
    let (transport, _recorded) = ScriptedTransport::new(script.bytes().to_vec());
    let err = mysql_wire::Conn::connect_with_transport(Box::new(transport), opts()).unwrap_err();
    assert!(matches!(err, Error::ConnectionRejected(ref e) if e.error_code == 1040));
}

#[test]
fn multi_statement_query_returns_every_result() {
    let mut script = current_server();
    script
        .reply()
        .columns(&[("a", LONGLONG)])
        .text_row(&[Some("1")])
        .done(AUTOCOMMIT | MORE_RESULTS)
        .ok(3, 0, AUTOCOMMIT | MORE_RESULTS)
        .columns(&[("b", VARCHAR)])
        .text_row(&[Some("x")])
        .text_row(&[None])
        .done(AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let results = conn
        .query("SELECT 1; UPDATE t SET v = 0; SELECT b FROM t")
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 3);

    assert!(results[0].has_rows());
    assert_eq!(results[0].rows.len(), 1);
    assert_eq!(results[0].rows[0].get::<i64>(0).unwrap(), 1);

    assert!(!results[1].has_rows());
    assert_eq!(results[1].affected_rows(), 3);

    let rows = &results[2].rows;
    assert_eq!(rows[0].get_by_name::<String>("b").unwrap(), "x");
    assert!(rows[1].is_null(0).unwrap());
    assert_eq!(rows[1].get::<Option<String>>(0).unwrap(), None);

    assert!(!conn.state().more_results_exist());
    let sent = commands_sent(&recorded);
    assert_eq!(
        sent,
        vec![(0, b"\x03SELECT 1; UPDATE t SET v = 0; SELECT b FROM t".to_vec())]
    );
}

#[test]
fn legacy_eof_server() {
    let mut script = legacy_server();
    script
        .reply()
        .columns(&[("n", LONGLONG), ("s", VARCHAR)])
        .text_row(&[Some("10"), Some("ten")])
        .eof(AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());
    assert!(!conn.capabilities().contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));

    let results = conn.query("SELECT n, s FROM t").unwrap().unwrap();
    let row = &results[0].rows[0];
    assert_eq!(row.value(0).unwrap(), Value::Int(10));
    assert_eq!(row.value(1).unwrap(), Value::Text("ten".into()));
}

#[test]
fn server_error_leaves_connection_usable() {
    let mut script = current_server();
    script
        .reply()
        .err(1146, "42S02", "Table 'test.missing' doesn't exist");
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    let err = conn.query("SELECT * FROM missing").unwrap().unwrap_err();
    assert_eq!(err.error_code, 1146);
    assert_eq!(err.sql_state, "42S02");
    assert_eq!(err.message, "Table 'test.missing' doesn't exist");
    assert!(!conn.is_broken());

    conn.ping().unwrap().unwrap();
}

#[test]
fn comment_prefix() {
    let mut script = current_server();
    script.reply().ok(0, 0, AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let mut opts = opts();
    opts.comment = Some("job=nightly".to_string());
    let (mut conn, recorded) = connect(&script, opts);

    conn.query_drop("DELETE FROM t").unwrap().unwrap();
    conn.ping().unwrap().unwrap();

    let sent = commands_sent(&recorded);
    assert_eq!(sent[0].1, b"\x03/* job=nightly */ DELETE FROM t".to_vec());
    assert_eq!(sent[1].1, vec![0x0E]);
}

#[test]
fn streaming_rows_and_results() {
    let mut script = current_server();
    script
        .reply()
        .columns(&[("a", LONGLONG)])
        .text_row(&[Some("1")])
        .text_row(&[Some("2")])
        .done(AUTOCOMMIT | MORE_RESULTS)
        .ok(1, 0, AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    {
        let mut stream = conn.query_stream("SELECT a FROM t; DELETE FROM t").unwrap().unwrap();
        assert_eq!(stream.columns().map(|c| c.len()), Some(1));

        let row = stream.next_row().unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
        let detached = row.detach();

        // Skips the second row
        assert!(stream.next_result().unwrap().unwrap());
        assert!(stream.columns().is_none());
        assert_eq!(stream.status().map(|s| s.affected_rows), Some(1));
        assert!(stream.next_row().unwrap().is_none());
        assert!(!stream.next_result().unwrap().unwrap());

        assert_eq!(detached.get::<i64>(0).unwrap(), 1);
    }

    conn.ping().unwrap().unwrap();
}

#[test]
fn dropping_a_stream_drains_it() {
    let mut script = current_server();
    script
        .reply()
        .columns(&[("a", LONGLONG)])
        .text_row(&[Some("1")])
        .text_row(&[Some("2")])
        .text_row(&[Some("3")])
        .done(AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    let mut stream = conn.query_stream("SELECT a FROM t").unwrap().unwrap();
    assert!(stream.next_row().unwrap().is_some());
    drop(stream);

    assert!(!conn.is_broken());
    conn.ping().unwrap().unwrap();
}

#[test]
fn error_in_place_of_a_row() {
    let mut script = current_server();
    script
        .reply()
        .columns(&[("a", LONGLONG)])
        .text_row(&[Some("1")])
        .err(1317, "70100", "Query execution was interrupted");
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    {
        let mut stream = conn.query_stream("SELECT SLEEP(10)").unwrap().unwrap();
        assert!(stream.next_row().unwrap().is_some());
        let err = stream.next_row().unwrap_err();
        assert!(matches!(err, Error::ServerError(ref e) if e.error_code == 1317));
        assert!(!err.is_fatal());
        assert!(stream.next_row().unwrap().is_none());
    }
    assert!(!conn.is_broken());
    conn.ping().unwrap().unwrap();
}

#[test]
fn prepared_statement_round_trip() {
    let mut script = current_server();
    script
        .reply()
        .prepare_ok(1, 2, 1)
        .definitions(&[("?", LONGLONG)])
        .definitions(&[("id", LONGLONG), ("parent", LONGLONG)]);
    script
        .reply()
        .columns(&[("id", LONGLONG), ("parent", LONGLONG)])
        .binary_row(&[Some(5), Some(1)])
        .binary_row(&[Some(6), None])
        .done(AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let stmt = conn
        .prepare("SELECT id, parent FROM t WHERE id > ?")
        .unwrap()
        .unwrap();
    assert_eq!(stmt.id(), 1);
    assert_eq!(stmt.num_params(), 1);
    assert_eq!(stmt.columns().map(|c| c.len()), Some(2));

    let err = conn.execute(&stmt, &[]).unwrap_err();
    assert!(matches!(err, Error::BadUsageError(_)));
    assert!(!conn.is_broken());

    let results = conn.execute(&stmt, &[Value::Int(4)]).unwrap().unwrap();
    let rows = &results[0].rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<i64>(0).unwrap(), 5);
    assert_eq!(rows[0].get_by_name::<i64>("parent").unwrap(), 1);
    assert_eq!(rows[1].get::<Option<i64>>(1).unwrap(), None);

    conn.close_statement(stmt).unwrap();
    conn.ping().unwrap().unwrap();

    let sent = commands_sent(&recorded);
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0].1[0], 0x16);
    let mut execute = vec![0x17, 1, 0, 0, 0, 0x00, 1, 0, 0, 0, 0x00, 0x01, 0x08, 0x00];
    execute.extend_from_slice(&4i64.to_le_bytes());
    assert_eq!(sent[1], (0, execute));
    assert_eq!(sent[2], (0, vec![0x19, 1, 0, 0, 0]));
}

#[test]
fn prepare_on_legacy_server_reads_eof_packets() {
    let mut script = legacy_server();
    script
        .reply()
        .prepare_ok(3, 1, 1)
        .definitions(&[("?", LONGLONG)])
        .definitions(&[("n", LONGLONG)]);
    script
        .reply()
        .columns(&[("n", LONGLONG)])
        .binary_row(&[Some(42)])
        .eof(AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    let stmt = conn.prepare("SELECT ? + 0").unwrap().unwrap();
    assert_eq!(stmt.params().map(|p| p.len()), Some(1));

    let mut stream = conn.execute_stream(&stmt, &[Value::Int(42)]).unwrap().unwrap();
    let row = stream.next_row().unwrap().unwrap();
    assert_eq!(row.get::<i64>(0).unwrap(), 42);
    drop(row);
    assert!(stream.next_row().unwrap().is_none());
    stream.close().unwrap().unwrap();
}

fn cursor_script(statement_id: u32) -> Script {
    let mut script = current_server();
    script
        .reply()
        .prepare_ok(statement_id, 1, 0)
        .definitions(&[("n", LONGLONG)]);
    script
        .reply()
        .columns(&[("n", LONGLONG)])
        .done(AUTOCOMMIT | CURSOR_EXISTS);
    script
        .reply()
        .binary_row(&[Some(1)])
        .binary_row(&[Some(2)])
        .done(AUTOCOMMIT | CURSOR_EXISTS);
    script
}

#[test]
fn cursor_fetches_in_batches() {
    let mut script = cursor_script(2);
    script
        .reply()
        .binary_row(&[Some(3)])
        .done(AUTOCOMMIT | CURSOR_EXISTS | LAST_ROW_SENT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let stmt = conn.prepare("SELECT n FROM t").unwrap().unwrap();
    let mut seen = Vec::new();
    {
        let mut cursor = conn.execute_cursor(&stmt, &[], 2).unwrap().unwrap();
        while let Some(row) = cursor.next_row().unwrap() {
            seen.push(row.get::<i64>(0).unwrap());
        }
        assert!(cursor.is_exhausted());
    }
    assert_eq!(seen, vec![1, 2, 3]);
    conn.ping().unwrap().unwrap();

    let sent = commands_sent(&recorded);
    // prepare, execute, fetch, fetch, ping
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[1].1[5], 0x01);
    assert_eq!(sent[2].1, vec![0x1C, 2, 0, 0, 0, 2, 0, 0, 0]);
    assert_eq!(sent[3].1, sent[2].1);
}

#[test]
fn dropping_an_open_cursor_resets_it() {
    let mut script = cursor_script(4);
    // COM_STMT_RESET
    script.reply().ok(0, 0, AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let stmt = conn.prepare("SELECT n FROM t").unwrap().unwrap();
    {
        let mut cursor = conn.execute_cursor(&stmt, &[], 2).unwrap().unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
    }
    assert!(!conn.is_broken());
    conn.ping().unwrap().unwrap();

    let sent = commands_sent(&recorded);
    assert_eq!(sent[3].1, vec![0x1A, 4, 0, 0, 0]);
    assert_eq!(sent[4].1, vec![0x0E]);

    assert!(matches!(
        conn.execute_cursor(&stmt, &[], 0),
        Err(Error::BadUsageError(_))
    ));
}

fn temp_file(tag: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "mysql-wire-{}-{}.csv",
        tag,
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn local_infile_sends_the_file() {
    let path = temp_file("infile", b"1,a\n2,b\n");
    let mut request = vec![0xFB];
    request.extend_from_slice(path.to_str().unwrap().as_bytes());

    let mut script = current_server();
    // file contents and the empty packet come from the client
    script.reply().packet(&request).skip(2).ok(2, 0, AUTOCOMMIT);
    let mut opts = opts();
    opts.allow_local_infile = true;
    let (mut conn, recorded) = connect(&script, opts);
    assert!(conn.capabilities().contains(CapabilityFlags::CLIENT_LOCAL_FILES));

    let results = conn
        .query("LOAD DATA LOCAL INFILE 'x' INTO TABLE t")
        .unwrap()
        .unwrap();
    assert_eq!(results[0].affected_rows(), 2);

    let sent = commands_sent(&recorded);
    assert_eq!(sent[1], (2, b"1,a\n2,b\n".to_vec()));
    assert_eq!(sent[2], (3, Vec::new()));
    std::fs::remove_file(path).unwrap();
}

#[test]
fn local_infile_refused_when_disabled() {
    let path = temp_file("refused", b"secret");
    let mut request = vec![0xFB];
    request.extend_from_slice(path.to_str().unwrap().as_bytes());

    let mut script = current_server();
    script.reply().packet(&request).skip(1).ok(0, 0, AUTOCOMMIT);
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let err = conn.query("LOAD DATA LOCAL INFILE 'x' INTO TABLE t").unwrap_err();
    assert!(matches!(err, Error::LocalInfile(_)));
    assert!(!conn.is_broken());
    conn.ping().unwrap().unwrap();

    let sent = commands_sent(&recorded);
    assert_eq!(sent[1], (2, Vec::new()));
    std::fs::remove_file(path).unwrap();
}

#[test]
fn refused_local_infile_wins_over_the_server_error() {
    let path = temp_file("refused-err", b"secret");
    let mut request = vec![0xFB];
    request.extend_from_slice(path.to_str().unwrap().as_bytes());

    let mut script = current_server();
    script
        .reply()
        .packet(&request)
        .skip(1)
        .err(1148, "42000", "The used command is not allowed with this MySQL version");
    script
        .reply()
        .packet(&request)
        .skip(1)
        .err(1148, "42000", "The used command is not allowed with this MySQL version");
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    let err = conn.query("LOAD DATA LOCAL INFILE 'x' INTO TABLE t").unwrap_err();
    assert!(matches!(err, Error::LocalInfile(_)));
    assert!(!conn.is_broken());

    let err = conn
        .query_stream("LOAD DATA LOCAL INFILE 'x' INTO TABLE t")
        .err()
        .unwrap();
    assert!(matches!(err, Error::LocalInfile(_)));
    assert!(!conn.is_broken());

    conn.ping().unwrap().unwrap();
    std::fs::remove_file(path).unwrap();
}

#[test]
fn compressed_protocol() {
    let mut script = current_server();
    let mut first = Script::commands(true);
    first
        .reply()
        .columns(&[("a", LONGLONG)])
        .text_row(&[Some("7")])
        .done(AUTOCOMMIT);
    script.raw(&envelope(1, first.bytes(), false));
    let mut second = Script::commands(true);
    second.reply().ok(1, 0, AUTOCOMMIT);
    script.raw(&envelope(1, second.bytes(), true));

    let mut opts = opts();
    opts.compress = true;
    let (mut conn, recorded) = connect(&script, opts);
    assert!(conn.capabilities().contains(CapabilityFlags::CLIENT_COMPRESS));

    let results = conn.query("SELECT 7").unwrap().unwrap();
    assert_eq!(results[0].rows[0].get::<i64>(0).unwrap(), 7);

    let long_sql = format!("UPDATE t SET v = '{}'", "a".repeat(200));
    let results = conn.query(&long_sql).unwrap().unwrap();
    assert_eq!(results[0].affected_rows(), 1);

    let written = recorded.lock().unwrap().written.clone();
    let response_len = usize::from(written[0]) | usize::from(written[1]) << 8;
    let mut rest = &written[4 + response_len..];

    // Short commands are stored
    assert_eq!(&rest[..7], &[13, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&rest[7..20], b"\x09\x00\x00\x00\x03SELECT 7");
    rest = &rest[20..];

    let compressed_len = usize::from(rest[0]) | usize::from(rest[1]) << 8;
    let uncompressed_len = usize::from(rest[4]) | usize::from(rest[5]) << 8;
    assert_eq!(rest[3], 0);
    assert_eq!(uncompressed_len, 4 + 1 + long_sql.len());
    assert!(compressed_len < uncompressed_len);

    let mut inflated = Vec::new();
    std::io::Read::read_to_end(
        &mut flate2::read::ZlibDecoder::new(&rest[7..7 + compressed_len]),
        &mut inflated,
    )
    .unwrap();
    assert_eq!(&inflated[5..], long_sql.as_bytes());
}

#[test]
fn framing_error_breaks_the_connection() {
    let mut script = current_server();
    script.reply().skip(4).ok(0, 0, AUTOCOMMIT);
    let (mut conn, _recorded) = connect(&script, opts());

    let err = conn.query("SELECT 1").unwrap_err();
    assert!(matches!(
        err,
        Error::Framing(FramingError::SequenceMismatch {
            expected: 1,
            actual: 5
        })
    ));
    assert!(conn.is_broken());
    assert!(matches!(conn.ping(), Err(Error::ConnectionBroken)));
}

#[test]
fn server_hangup_is_fatal() {
    let script = current_server();
    let (mut conn, _recorded) = connect(&script, opts());

    let err = conn.ping().unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
    assert!(conn.is_broken());
}

#[test]
fn per_command_timeout_is_restored() {
    let mut script = current_server();
    script.reply().ok(0, 0, AUTOCOMMIT);
    let (mut conn, recorded) = connect(&script, opts());

    let options = QueryOptions {
        timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    conn.query_with("DO 1", &options).unwrap().unwrap();
    assert_eq!(
        recorded.lock().unwrap().timeouts,
        vec![Some(Duration::from_secs(2)), None]
    );
}

#[test]
fn updatable_and_large_rows() {
    let mut script = current_server();
    script
        .reply()
        .columns(&[("n", LONGLONG)])
        .text_row(&[Some("1")])
        .done(AUTOCOMMIT);
    script
        .reply()
        .columns(&[("s", VARCHAR)])
        .text_row(&[Some("a fairly long value")])
        .done(AUTOCOMMIT);
    let mut opts = opts();
    opts.large_row_threshold = 8;
    let (mut conn, _recorded) = connect(&script, opts);

    let options = QueryOptions {
        updatable: true,
        ..Default::default()
    };
    let mut results = conn.query_with("SELECT n FROM t", &options).unwrap().unwrap();
    let row = &mut results[0].rows[0];
    assert!(matches!(row, Row::Owned(_)));
    let owned = row.make_owned().unwrap();
    owned.set_raw(0, Some(b"9".to_vec())).unwrap();
    assert_eq!(owned.get::<i64>(0).unwrap(), 9);

    let mut results = conn.query("SELECT s FROM t").unwrap().unwrap();
    let row = &mut results[0].rows[0];
    assert!(matches!(row, Row::Buffered(_)));
    assert_eq!(row.get::<String>(0).unwrap(), "a fairly long value");
    row.make_owned().unwrap();
    assert!(matches!(row, Row::Owned(_)));
}

#[test]
fn instrumentation_can_be_reconfigured() {
    let mut script = current_server();
    script.reply().ok(0, 0, AUTOCOMMIT);
    let mut opts = opts();
    opts.track_timing = true;
    opts.debug_buffer_size = 4;
    let (mut conn, _recorded) = connect(&script, opts);

    conn.ping().unwrap().unwrap();
    let timing = conn.instrumentation().timing().unwrap();
    assert!(timing.last_sent().is_some());
    assert!(timing.last_received().is_some());
    assert!(conn.instrumentation().debug_dump().is_some());

    conn.reconfigure_instrumentation(&InstrumentationSettings::default());
    assert!(conn.instrumentation().is_empty());
}
