use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::buffer::{IntWidth, PayloadBuffer, StringKind};
use crate::constant::{CommandByte, CursorType};
use crate::error::{FramingError, Result};
use crate::protocol::command::query::write_text_command;
use crate::protocol::response::OK_HEADER;
use crate::protocol::value::{NullBitmap, parameter_type, write_binary_value};
use crate::value::Value;

/// Prepared statement OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut PayloadBuffer, sql: &str, comment: Option<&str>) {
    write_text_command(out, CommandByte::StmtPrepare, comment, sql);
}

/// Read COM_STMT_PREPARE response
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    match payload.split_first() {
        Some((&OK_HEADER, data)) => PrepareOk::ref_from_prefix(data)
            .map(|(ok, _metadata_follows)| ok)
            .map_err(|_| FramingError::Malformed("COM_STMT_PREPARE response too short").into()),
        _ => Err(FramingError::Malformed("COM_STMT_PREPARE response must start with 0x00").into()),
    }
}

/// Write COM_STMT_EXECUTE command
///
/// Parameter types are always sent, so the server never relies on types
/// bound by an earlier execution.
pub fn write_execute(
    out: &mut PayloadBuffer,
    statement_id: u32,
    cursor: CursorType,
    params: &[Value<'_>],
) {
    out.clear();
    out.write_int(IntWidth::Int1, CommandByte::StmtExecute as u64);
    out.write_int(IntWidth::Int4, u64::from(statement_id));
    out.write_int(IntWidth::Int1, cursor as u64);
    // iteration count, always 1
    out.write_int(IntWidth::Int4, 1);

    if params.is_empty() {
        return;
    }

    let mut bitmap = vec![0u8; NullBitmap::parameters_len(params.len())];
    for (idx, param) in params.iter().enumerate() {
        if param.is_null()
            && let Some(byte) = bitmap.get_mut(idx >> 3)
        {
            *byte |= 1 << (idx & 7);
        }
    }
    out.write_bytes(StringKind::Eof, &bitmap);

    // new-params-bound-flag
    out.write_int(IntWidth::Int1, 1);
    for param in params {
        let (column_type, unsigned) = parameter_type(param);
        out.write_int(IntWidth::Int1, column_type as u64);
        out.write_int(IntWidth::Int1, if unsigned { 0x80 } else { 0 });
    }

    for param in params {
        write_binary_value(out, param);
    }
}

/// Write COM_STMT_FETCH command
pub fn write_fetch(out: &mut PayloadBuffer, statement_id: u32, rows: u32) {
    out.clear();
    out.write_int(IntWidth::Int1, CommandByte::StmtFetch as u64);
    out.write_int(IntWidth::Int4, u64::from(statement_id));
    out.write_int(IntWidth::Int4, u64::from(rows));
}

/// Write COM_STMT_CLOSE command
pub fn write_close_statement(out: &mut PayloadBuffer, statement_id: u32) {
    out.clear();
    out.write_int(IntWidth::Int1, CommandByte::StmtClose as u64);
    out.write_int(IntWidth::Int4, u64::from(statement_id));
}

/// Write COM_STMT_RESET command
pub fn write_reset_statement(out: &mut PayloadBuffer, statement_id: u32) {
    out.clear();
    out.write_int(IntWidth::Int1, CommandByte::StmtReset as u64);
    out.write_int(IntWidth::Int4, u64::from(statement_id));
}
