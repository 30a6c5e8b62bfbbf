use crate::error::{Error, Result, ServerResult};
use crate::protocol::command::ColumnDefinition;
use crate::protocol::command::prepared::{write_fetch, write_reset_statement};
use crate::protocol::command::resultset::{ResultAssembler, ResultEvent};
use crate::protocol::response::{ErrPayload, ErrPayloadBytes, is_err_packet};
use crate::row::{BufferRow, RowFormat};

use super::conn::Conn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// The read buffer holds a row not yet handed out
    PendingRow,
    /// Rows of the current batch are on the wire
    Reading,
    /// Batch finished; the next row needs a `COM_STMT_FETCH`
    NeedFetch,
    Done,
}

/// Rows of a prepared statement read through a server-side cursor.
///
/// Column definitions from the execute response are reused for every fetch.
/// If the server answers without opening a cursor the rows are streamed
/// directly. Dropping an unfinished cursor closes it with `COM_STMT_RESET`.
pub struct Cursor<'c> {
    conn: &'c mut Conn,
    assembler: ResultAssembler,
    statement_id: u32,
    fetch_size: u32,
    columns: Option<ColumnDefinition>,
    state: CursorState,
}

impl<'c> Cursor<'c> {
    pub(super) fn open(
        conn: &'c mut Conn,
        statement_id: u32,
        fetch_size: u32,
    ) -> Result<ServerResult<Self>> {
        let assembler = conn.assembler();
        let mut cursor = Self {
            conn,
            assembler,
            statement_id,
            fetch_size,
            columns: None,
            state: CursorState::Done,
        };
        let sent = cursor.conn.send_command();
        cursor.conn.track(sent)?;
        let opened = cursor.read_execute_response();
        match cursor.conn.track(opened)? {
            Ok(()) => Ok(Ok(cursor)),
            Err(err) => Ok(Err(err)),
        }
    }

    pub fn columns(&self) -> Option<&ColumnDefinition> {
        self.columns.as_ref()
    }

    /// Whether every row has been read
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Done
    }

    fn read_execute_response(&mut self) -> Result<ServerResult<()>> {
        loop {
            self.conn.read_packet()?;
            match self.assembler.feed(self.conn.read_buf.as_slice())? {
                ResultEvent::NeedPacket => {}
                // No result set, nothing to fetch
                ResultEvent::Status(status) => {
                    self.conn.state.apply_ok(&status);
                    return Ok(Ok(()));
                }
                ResultEvent::Columns {
                    columns,
                    status: Some(status),
                } => {
                    self.columns = Some(columns);
                    self.conn.state.apply_status(status);
                    self.state = if self.conn.state.cursor_exists() {
                        CursorState::NeedFetch
                    } else {
                        CursorState::Reading
                    };
                    return Ok(Ok(()));
                }
                // The packet after the columns tells whether a cursor was opened
                ResultEvent::Columns {
                    columns,
                    status: None,
                } => {
                    self.columns = Some(columns);
                    self.state = CursorState::Reading;
                    return match self.read_batch_packet() {
                        Ok(true) => {
                            self.state = CursorState::PendingRow;
                            Ok(Ok(()))
                        }
                        Ok(false) => Ok(Ok(())),
                        Err(Error::ServerError(err)) => Ok(Err(err)),
                        Err(err) => Err(err),
                    };
                }
                ResultEvent::ServerError(err) => return Ok(Err(err)),
                event @ (ResultEvent::Row
                | ResultEvent::RowsDone(_)
                | ResultEvent::LocalInfile(_)) => {
                    return Err(Error::LibraryBug(crate::error::eyre!(
                        "{:?} in an execute response",
                        event
                    )));
                }
            }
        }
    }

    fn fetch(&mut self) -> Result<()> {
        write_fetch(&mut self.conn.write_buf, self.statement_id, self.fetch_size);
        self.conn.send_command()?;
        self.assembler.resume_rows();
        self.state = CursorState::Reading;
        tracing::trace!(
            statement_id = self.statement_id,
            rows = self.fetch_size,
            "cursor fetch"
        );
        Ok(())
    }

    /// Read one packet of the current batch; `true` if it is a row.
    fn read_batch_packet(&mut self) -> Result<bool> {
        self.conn.read_packet()?;
        match self.assembler.feed(self.conn.read_buf.as_slice())? {
            ResultEvent::Row => Ok(true),
            ResultEvent::RowsDone(status) => {
                self.conn.state.apply_ok(&status);
                let state = &self.conn.state;
                self.state = if state.cursor_exists() && !state.last_row_sent() {
                    CursorState::NeedFetch
                } else {
                    CursorState::Done
                };
                Ok(false)
            }
            ResultEvent::ServerError(err) => {
                self.state = CursorState::Done;
                Err(Error::ServerError(err))
            }
            event => Err(Error::LibraryBug(crate::error::eyre!(
                "{:?} while reading cursor rows",
                event
            ))),
        }
    }

    /// Position on the next row; `false` once the cursor is exhausted.
    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                CursorState::Done => return Ok(false),
                CursorState::PendingRow => {
                    self.state = CursorState::Reading;
                    return Ok(true);
                }
                CursorState::NeedFetch => self.fetch()?,
                CursorState::Reading => {
                    if self.read_batch_packet()? {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Read the next row, fetching a new batch from the server when needed.
    ///
    /// An ERR packet ends the cursor and is returned as [`Error::ServerError`].
    pub fn next_row(&mut self) -> Result<Option<BufferRow<&[u8]>>> {
        let advanced = self.advance();
        if !self.conn.track(advanced)? {
            return Ok(None);
        }
        let columns = self.columns.clone().ok_or_else(|| {
            Error::LibraryBug(crate::error::eyre!("cursor row without column definitions"))
        })?;
        Ok(Some(BufferRow::new(
            self.conn.read_buf.as_slice(),
            columns,
            RowFormat::Binary,
        )))
    }

    /// Stop reading; an open server-side cursor is reset.
    pub fn close(mut self) -> Result<ServerResult<()>> {
        let closed = self.close_inner();
        self.conn.track(closed)
    }

    fn close_inner(&mut self) -> Result<ServerResult<()>> {
        if self.state == CursorState::PendingRow {
            self.state = CursorState::Reading;
        }
        // The rest of the current batch is already on its way
        while self.state == CursorState::Reading {
            match self.read_batch_packet() {
                Ok(_) => {}
                Err(Error::ServerError(err)) => return Ok(Err(err)),
                Err(err) => return Err(err),
            }
        }
        if self.state == CursorState::NeedFetch {
            return self.reset();
        }
        Ok(Ok(()))
    }

    fn reset(&mut self) -> Result<ServerResult<()>> {
        self.state = CursorState::Done;
        write_reset_statement(&mut self.conn.write_buf, self.statement_id);
        self.conn.send_command()?;
        self.conn.read_packet()?;
        let payload = self.conn.read_buf.as_slice();
        if is_err_packet(payload) {
            return Ok(Err(ErrPayload::try_from(ErrPayloadBytes(payload))?));
        }
        Ok(Ok(()))
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.state != CursorState::Done && !self.conn.is_broken() {
            let closed = self.close_inner();
            match self.conn.track(closed) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(%err, "server rejected cursor reset"),
                Err(err) => tracing::warn!(%err, "failed to close cursor"),
            }
        }
        self.conn.recycle_read_buffer();
    }
}
