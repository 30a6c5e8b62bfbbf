use std::ops::Range;
use std::sync::Arc;

use crate::charset::CollationTable;
use crate::constant::{BinaryWidth, CapabilityFlags, ColumnType, MAX_COLUMNS, ServerStatusFlags};
use crate::error::{Error, FramingError, Result};
use crate::protocol::command::{ColumnDefinition, ColumnDefinitionBuilder, Field, TypeOptions};
use crate::protocol::primitive::*;
use crate::protocol::response::{
    ERR_HEADER, ErrPayload, ErrPayloadBytes, LOCAL_INFILE_HEADER, OK_HEADER, OkPayload,
    OkPayloadBytes, is_err_packet, is_row_terminator,
};
use crate::protocol::value::NullBitmap;

/// Location of one column value inside a row payload; `None` is SQL NULL
pub type ValueSpan = Option<Range<usize>>;

/// Row encoding of a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY: every value is a length-encoded string
    Text,
    /// COM_STMT_EXECUTE / COM_STMT_FETCH: null bitmap plus typed values
    Binary,
}

/// Locate the values of a text-protocol row.
pub fn scan_text_row(payload: &[u8], columns: usize, spans: &mut Vec<ValueSpan>) -> Result<()> {
    spans.clear();
    let mut rest = payload;
    for _ in 0..columns {
        let (value, next) = read_string_lenenc_nullable(rest)?;
        spans.push(value.map(|v| {
            let end = payload.len() - next.len();
            (end - v.len())..end
        }));
        rest = next;
    }
    if !rest.is_empty() {
        return Err(Error::decode(format!(
            "text row has {} bytes after {} columns",
            rest.len(),
            columns
        )));
    }
    Ok(())
}

/// Locate the values of a binary-protocol row.
///
/// Each non-NULL value's width comes from its column's wire type; temporal
/// spans exclude their 1-byte length prefix.
pub fn scan_binary_row(payload: &[u8], fields: &[Field], spans: &mut Vec<ValueSpan>) -> Result<()> {
    spans.clear();
    let (header, data) = read_int_1(payload)?;
    if header != OK_HEADER {
        return Err(Error::decode(format!(
            "binary row must start with 0x00, got 0x{:02X}",
            header
        )));
    }
    let bitmap_len = NullBitmap::result_set_len(fields.len());
    if data.len() < bitmap_len {
        return Err(Error::decode(format!(
            "binary row of {} bytes cannot hold a {}-byte null bitmap for {} columns",
            payload.len(),
            bitmap_len,
            fields.len()
        )));
    }
    let (bitmap, mut rest) = read_string_fix(data, bitmap_len)?;
    let bitmap = NullBitmap::for_result_set(bitmap);
    let offset = |rest: &[u8]| payload.len() - rest.len();

    for (idx, field) in fields.iter().enumerate() {
        if bitmap.is_null(idx) {
            spans.push(None);
            continue;
        }
        let Some(column_type) = ColumnType::from_u8(field.raw_type()) else {
            return Err(Error::decode(format!(
                "cannot size value of unknown column type 0x{:02X}",
                field.raw_type()
            )));
        };
        let (value, next) = match column_type.binary_width() {
            BinaryWidth::Fixed(n) => read_string_fix(rest, n)?,
            BinaryWidth::LengthPrefixed => {
                let (len, after) = read_int_1(rest)?;
                read_string_fix(after, usize::from(len))?
            }
            BinaryWidth::LengthEncoded => read_string_lenenc(rest)?,
        };
        let end = offset(next);
        spans.push(Some((end - value.len())..end));
        rest = next;
    }

    if !rest.is_empty() {
        return Err(Error::decode(format!(
            "binary row has {} bytes after {} columns",
            rest.len(),
            fields.len()
        )));
    }
    Ok(())
}

/// What the caller should do with the packet it just fed
#[derive(Debug)]
pub enum ResultEvent {
    /// Packet consumed; read the next one
    NeedPacket,
    /// A result without rows (OK packet)
    Status(OkPayload),
    /// Column metadata is complete; rows follow unless a cursor was opened.
    /// `status` is set when a legacy EOF packet closed the metadata.
    Columns {
        columns: ColumnDefinition,
        status: Option<ServerStatusFlags>,
    },
    /// The packet is a row of the current result
    Row,
    /// The current result's rows are finished
    RowsDone(OkPayload),
    /// The server asks for the contents of a local file
    LocalInfile(String),
    /// ERR packet; the command is over
    ServerError(ErrPayload),
}

#[derive(Debug)]
enum AssemblerState {
    AwaitingResponse,
    ReadingColumns(ColumnDefinitionBuilder),
    AwaitingColumnsEof(ColumnDefinition),
    ReadingRows,
    AwaitingInfileResult,
    Done { more_results: bool },
}

/// Sans-I/O state machine for one command's responses.
///
/// `AwaitingResponse -> {Status | Columns -> Row* -> RowsDone}`, and back to
/// `AwaitingResponse` while the server reports more results.
#[derive(Debug)]
pub struct ResultAssembler {
    state: AssemblerState,
    capabilities: CapabilityFlags,
    collations: Arc<dyn CollationTable>,
    type_options: TypeOptions,
}

impl ResultAssembler {
    pub fn new(
        capabilities: CapabilityFlags,
        collations: Arc<dyn CollationTable>,
        type_options: TypeOptions,
    ) -> Self {
        Self {
            state: AssemblerState::AwaitingResponse,
            capabilities,
            collations,
            type_options,
        }
    }

    /// Whether the last completed result announced a successor.
    pub fn has_more_results(&self) -> bool {
        matches!(self.state, AssemblerState::Done { more_results: true })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, AssemblerState::Done { .. })
    }

    pub fn is_reading_rows(&self) -> bool {
        matches!(self.state, AssemblerState::ReadingRows)
    }

    /// Move on to the next chained result.
    pub fn next_result(&mut self) -> Result<()> {
        match self.state {
            AssemblerState::Done { more_results: true } => {
                self.state = AssemblerState::AwaitingResponse;
                Ok(())
            }
            _ => Err(Error::BadUsageError(
                "no further result is pending".to_string(),
            )),
        }
    }

    /// Expect rows again, e.g. after sending COM_STMT_FETCH on an open cursor.
    pub fn resume_rows(&mut self) {
        self.state = AssemblerState::ReadingRows;
    }

    /// Expect the status that follows a finished local file upload.
    pub fn infile_sent(&mut self) {
        self.state = AssemblerState::AwaitingInfileResult;
    }

    fn finish(&mut self, ok: &OkPayload) {
        self.state = AssemblerState::Done {
            more_results: ok.more_results_exist(),
        };
    }

    fn server_error(&mut self, payload: &[u8]) -> Result<ResultEvent> {
        self.state = AssemblerState::Done {
            more_results: false,
        };
        Ok(ResultEvent::ServerError(ErrPayload::try_from(
            ErrPayloadBytes(payload),
        )?))
    }

    fn status(&mut self, payload: &[u8]) -> Result<ResultEvent> {
        let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
        self.finish(&ok);
        Ok(ResultEvent::Status(ok))
    }

    fn columns_done(&mut self, builder: ColumnDefinitionBuilder) -> Result<ResultEvent> {
        let columns =
            builder.finish(self.capabilities, self.collations.as_ref(), &self.type_options)?;
        if self
            .capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
        {
            self.state = AssemblerState::ReadingRows;
            Ok(ResultEvent::Columns {
                columns,
                status: None,
            })
        } else {
            self.state = AssemblerState::AwaitingColumnsEof(columns);
            Ok(ResultEvent::NeedPacket)
        }
    }

    /// Feed the next packet of the command's response.
    pub fn feed(&mut self, payload: &[u8]) -> Result<ResultEvent> {
        match std::mem::replace(&mut self.state, AssemblerState::ReadingRows) {
            AssemblerState::AwaitingResponse => match payload.first() {
                None => Err(FramingError::Malformed("empty response packet").into()),
                Some(&ERR_HEADER) => self.server_error(payload),
                Some(&OK_HEADER) => self.status(payload),
                Some(&LOCAL_INFILE_HEADER) => {
                    self.state = AssemblerState::AwaitingResponse;
                    let name = payload.get(1..).unwrap_or_default();
                    Ok(ResultEvent::LocalInfile(
                        String::from_utf8_lossy(name).into_owned(),
                    ))
                }
                Some(_) => {
                    let (count, _rest) = read_int_lenenc(payload)?;
                    let count = usize::try_from(count)
                        .ok()
                        .filter(|count| (1..=MAX_COLUMNS).contains(count))
                        .ok_or(FramingError::Malformed("column count out of range"))?;
                    self.state = AssemblerState::ReadingColumns(ColumnDefinitionBuilder::new(count));
                    Ok(ResultEvent::NeedPacket)
                }
            },

            AssemblerState::ReadingColumns(mut builder) => {
                // Short metadata closed early by an EOF marker
                if !self
                    .capabilities
                    .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
                    && is_row_terminator(payload, self.capabilities)
                {
                    tracing::warn!(
                        missing = builder.remaining(),
                        "column metadata ended before the announced count"
                    );
                    let columns = builder.finish(
                        self.capabilities,
                        self.collations.as_ref(),
                        &self.type_options,
                    )?;
                    let eof = OkPayload::parse_terminator(payload, self.capabilities)?;
                    self.state = AssemblerState::ReadingRows;
                    return Ok(ResultEvent::Columns {
                        columns,
                        status: Some(eof.status_flags),
                    });
                }
                if is_err_packet(payload) {
                    return self.server_error(payload);
                }
                builder.push(payload);
                if builder.is_complete() {
                    self.columns_done(builder)
                } else {
                    self.state = AssemblerState::ReadingColumns(builder);
                    Ok(ResultEvent::NeedPacket)
                }
            }

            AssemblerState::AwaitingColumnsEof(columns) => {
                if !is_row_terminator(payload, self.capabilities) {
                    return Err(FramingError::Malformed("expected EOF after column metadata").into());
                }
                let eof = OkPayload::parse_terminator(payload, self.capabilities)?;
                self.state = AssemblerState::ReadingRows;
                Ok(ResultEvent::Columns {
                    columns,
                    status: Some(eof.status_flags),
                })
            }

            AssemblerState::ReadingRows => {
                if is_err_packet(payload) {
                    return self.server_error(payload);
                }
                if is_row_terminator(payload, self.capabilities) {
                    let ok = OkPayload::parse_terminator(payload, self.capabilities)?;
                    self.finish(&ok);
                    return Ok(ResultEvent::RowsDone(ok));
                }
                Ok(ResultEvent::Row)
            }

            AssemblerState::AwaitingInfileResult => match payload.first() {
                Some(&ERR_HEADER) => self.server_error(payload),
                Some(&OK_HEADER) => self.status(payload),
                _ => Err(FramingError::Malformed("expected OK or ERR after LOCAL INFILE data").into()),
            },

            state @ AssemblerState::Done { .. } => {
                self.state = state;
                Err(Error::LibraryBug(crate::error::eyre!(
                    "packet fed to a finished result"
                )))
            }
        }
    }
}

#[cfg(test)]
#[path = "resultset_test.rs"]
mod resultset_test;
