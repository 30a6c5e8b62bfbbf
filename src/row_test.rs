use pretty_assertions::assert_eq;

use crate::charset::DefaultCollations;
use crate::constant::{CapabilityFlags, ColumnFlags, ColumnType};
use crate::protocol::command::{ColumnDefinition, ColumnDefinitionBuilder, TypeOptions};
use crate::row::*;
use crate::value::{Date, Value};

fn columns(defs: &[(&str, ColumnType, u16, u32)]) -> ColumnDefinition {
    let mut builder = ColumnDefinitionBuilder::new(defs.len());
    for (name, column_type, collation, length) in defs {
        let mut out = Vec::new();
        for s in ["def", "test", "t", "t", *name, *name] {
            out.push(s.len() as u8);
            out.extend_from_slice(s.as_bytes());
        }
        out.push(0x0c);
        out.extend_from_slice(&collation.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.push(*column_type as u8);
        out.extend_from_slice(&ColumnFlags::empty().bits().to_le_bytes());
        out.push(0);
        out.extend_from_slice(&[0, 0]);
        builder.push(&out);
    }
    builder
        .finish(
            CapabilityFlags::CLIENT_LONG_FLAG,
            &DefaultCollations,
            &TypeOptions::default(),
        )
        .unwrap()
}

fn id_name() -> ColumnDefinition {
    columns(&[
        ("id", ColumnType::MYSQL_TYPE_LONGLONG, 63, 20),
        ("name", ColumnType::MYSQL_TYPE_VAR_STRING, 45, 80),
    ])
}

#[test]
fn text_buffer_row_decodes_lazily() {
    let payload = vec![0x02, b'4', b'2', 0x05, b'h', b'e', b'l', b'l', b'o'];
    let row = BufferRow::new(payload.as_slice(), id_name(), RowFormat::Text);

    assert_eq!(row.len(), 2);
    assert_eq!(row.get::<i64>(0).unwrap(), 42);
    assert_eq!(row.get_by_name::<String>("NAME").unwrap(), "hello");
    assert_eq!(row.raw(1).unwrap(), Some(&b"hello"[..]));
    assert!(row.value(2).is_err());
    assert!(row.get_by_name::<i64>("missing").is_err());
}

#[test]
fn binary_owned_row() {
    let columns = columns(&[
        ("id", ColumnType::MYSQL_TYPE_LONGLONG, 63, 20),
        ("note", ColumnType::MYSQL_TYPE_VAR_STRING, 45, 80),
        ("born", ColumnType::MYSQL_TYPE_DATE, 63, 10),
    ]);
    // note is NULL: bit 1 + 2
    let mut payload = vec![0x00, 0b0000_1000];
    payload.extend_from_slice(&7i64.to_le_bytes());
    payload.extend_from_slice(&[0x04, 0xD0, 0x07, 0x01, 0x02]);

    let row = BufferRow::new(payload, columns, RowFormat::Binary);
    let owned = row.to_owned_row().unwrap();
    assert_eq!(owned.get::<i64>(0).unwrap(), 7);
    assert!(owned.is_null(1).unwrap());
    assert_eq!(owned.get::<Option<String>>(1).unwrap(), None);
    assert_eq!(
        owned.get::<Date>(2).unwrap(),
        Date {
            year: 2000,
            month: 1,
            day: 2
        }
    );
}

#[test]
fn malformed_buffer_row_fails_on_access() {
    let row = BufferRow::new(vec![0x02, b'4'], id_name(), RowFormat::Text);
    assert!(row.value(0).is_err());
}

#[test]
fn owned_row_set_raw() {
    let payload = [0x01, b'1', 0xFB];
    let mut spans = Vec::new();
    let columns = id_name();
    scan_row(RowFormat::Text, &payload, &columns, &mut spans).unwrap();
    let mut row = OwnedRow::from_spans(&payload, &spans, columns, RowFormat::Text);
    assert_eq!(row.value(1).unwrap(), Value::Null);

    row.set_raw(1, Some(b"bob".to_vec())).unwrap();
    assert_eq!(row.get::<String>(1).unwrap(), "bob");
    row.set_raw(0, None).unwrap();
    assert!(row.is_null(0).unwrap());
    assert!(row.set_raw(5, None).is_err());
}

#[test]
fn detached_row_survives_buffer_reuse() {
    let mut buffer = vec![0x01, b'9', 0x01, b'x'];
    let detached = {
        let row = BufferRow::new(buffer.as_slice(), id_name(), RowFormat::Text);
        assert_eq!(row.get::<i64>(0).unwrap(), 9);
        row.detach()
    };
    buffer.clear();
    assert_eq!(detached.get::<String>(1).unwrap(), "x");
}

#[test]
fn make_owned_unpacks_buffered_rows() {
    let mut row = Row::Buffered(BufferRow::new(
        vec![0x01, b'1', 0x01, b'a'],
        id_name(),
        RowFormat::Text,
    ));
    row.make_owned().unwrap().set_raw(1, Some(b"b".to_vec())).unwrap();
    assert!(matches!(row, Row::Owned(_)));
    assert_eq!(row.get::<String>(1).unwrap(), "b");
}

#[test]
fn materialization_choice() {
    let small = columns(&[("id", ColumnType::MYSQL_TYPE_LONG, 63, 11)]);
    assert_eq!(
        choose_materialization(&small, 16, 2048, false),
        Materialization::Owned
    );
    assert_eq!(
        choose_materialization(&small, 4096, 2048, false),
        Materialization::Buffered
    );
    assert_eq!(
        choose_materialization(&small, 4096, 2048, true),
        Materialization::Owned
    );

    let blob = columns(&[("b", ColumnType::MYSQL_TYPE_BLOB, 63, 65_535)]);
    assert_eq!(
        choose_materialization(&blob, 16, 2048, false),
        Materialization::Buffered
    );
}
