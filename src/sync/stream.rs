use std::time::Duration;

use crate::error::{Error, Result, ServerResult};
use crate::protocol::command::ColumnDefinition;
use crate::protocol::command::resultset::{ResultAssembler, ResultEvent};
use crate::protocol::response::OkPayload;
use crate::row::{BufferRow, RowFormat};

use super::conn::Conn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Rows of the current result are still on the wire
    Rows,
    /// The current result is complete; more may follow
    ResultDone,
    Finished,
}

/// Rows pulled from the wire one at a time.
///
/// The stream borrows the connection exclusively until it is dropped, so no
/// other command can interleave. Each row borrows the connection's read buffer
/// and is gone once the next row is read. Dropping the stream early drains
/// whatever the server still has to send.
pub struct QueryStream<'c> {
    conn: &'c mut Conn,
    assembler: ResultAssembler,
    format: RowFormat,
    columns: Option<ColumnDefinition>,
    status: Option<OkPayload>,
    phase: Phase,
    restore_timeout: Option<Option<Duration>>,
    local_error: Option<String>,
}

impl<'c> QueryStream<'c> {
    /// Send the command already written to the connection's write buffer and
    /// read up to the first result's columns.
    pub(super) fn open(
        conn: &'c mut Conn,
        format: RowFormat,
        timeout: Option<Duration>,
    ) -> Result<ServerResult<Self>> {
        let restore = conn.apply_timeout(timeout);
        let restore_timeout = conn.track(restore)?;
        let assembler = conn.assembler();
        let mut stream = Self {
            conn,
            assembler,
            format,
            columns: None,
            status: None,
            phase: Phase::Finished,
            restore_timeout,
            local_error: None,
        };

        let sent = stream.conn.send_command();
        stream.conn.track(sent)?;
        let header = stream.read_result_header();
        match stream.conn.track(header)? {
            Ok(()) => Ok(Ok(stream)),
            Err(err) => Ok(Err(err)),
        }
    }

    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// Columns of the current result; `None` for a result without rows
    pub fn columns(&self) -> Option<&ColumnDefinition> {
        self.columns.as_ref()
    }

    /// Status of the current result once all of its rows have been read
    pub fn status(&self) -> Option<&OkPayload> {
        self.status.as_ref()
    }

    /// Read the next row of the current result.
    ///
    /// An ERR packet in place of a row ends the stream and is returned as
    /// [`Error::ServerError`]; the connection stays usable.
    pub fn next_row(&mut self) -> Result<Option<BufferRow<&[u8]>>> {
        let advanced = self.advance();
        if self.conn.track(advanced)? {
            self.current_row().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Move to the next result, skipping unread rows of the current one.
    ///
    /// Returns `false` once the command has no more results.
    pub fn next_result(&mut self) -> Result<ServerResult<bool>> {
        let result = self.advance_result();
        self.conn.track(result)
    }

    /// Drain every remaining row and result.
    pub fn close(mut self) -> Result<ServerResult<()>> {
        let drained = self.drain();
        self.conn.track(drained)
    }

    fn current_row(&self) -> Result<BufferRow<&[u8]>> {
        let columns = self.columns.clone().ok_or_else(|| {
            Error::LibraryBug(crate::error::eyre!("row without column definitions"))
        })?;
        Ok(BufferRow::new(
            self.conn.read_buf.as_slice(),
            columns,
            self.format,
        ))
    }

    fn read_result_header(&mut self) -> Result<ServerResult<()>> {
        loop {
            self.conn.read_packet()?;
            match self.assembler.feed(self.conn.read_buf.as_slice())? {
                ResultEvent::NeedPacket => {}
                ResultEvent::Status(status) => {
                    self.conn.state.apply_ok(&status);
                    self.columns = None;
                    self.status = Some(status);
                    self.phase = Phase::ResultDone;
                    if let Some(message) = self.local_error.take() {
                        if let Err(err) = self.drain()? {
                            tracing::warn!(%err, "server error after a refused local infile");
                        }
                        return Err(Error::LocalInfile(message));
                    }
                    return Ok(Ok(()));
                }
                ResultEvent::Columns { columns, status } => {
                    if let Some(status) = status {
                        self.conn.state.apply_status(status);
                    }
                    self.columns = Some(columns);
                    self.status = None;
                    self.phase = Phase::Rows;
                    return Ok(Ok(()));
                }
                ResultEvent::LocalInfile(name) => {
                    if let Err(message) = self.conn.send_local_file(&name)? {
                        self.local_error = Some(message);
                    }
                    self.assembler.infile_sent();
                }
                ResultEvent::ServerError(err) => {
                    self.phase = Phase::Finished;
                    if let Some(message) = self.local_error.take() {
                        tracing::warn!(%err, "server error after a refused local infile");
                        return Err(Error::LocalInfile(message));
                    }
                    return Ok(Err(err));
                }
                event @ (ResultEvent::Row | ResultEvent::RowsDone(_)) => {
                    return Err(Error::LibraryBug(crate::error::eyre!(
                        "{:?} before the result header",
                        event
                    )));
                }
            }
        }
    }

    /// Read one packet of the current result; `true` if it is a row.
    fn advance(&mut self) -> Result<bool> {
        if self.phase != Phase::Rows {
            return Ok(false);
        }
        self.conn.read_packet()?;
        match self.assembler.feed(self.conn.read_buf.as_slice())? {
            ResultEvent::Row => Ok(true),
            ResultEvent::RowsDone(status) => {
                self.conn.state.apply_ok(&status);
                self.status = Some(status);
                self.phase = Phase::ResultDone;
                Ok(false)
            }
            ResultEvent::ServerError(err) => {
                self.phase = Phase::Finished;
                Err(Error::ServerError(err))
            }
            event => Err(Error::LibraryBug(crate::error::eyre!(
                "{:?} while reading rows",
                event
            ))),
        }
    }

    fn advance_result(&mut self) -> Result<ServerResult<bool>> {
        while self.advance()? {}
        if self.phase == Phase::Finished || !self.assembler.has_more_results() {
            self.phase = Phase::Finished;
            return Ok(Ok(false));
        }
        self.assembler.next_result()?;
        Ok(self.read_result_header()?.map(|()| true))
    }

    fn drain(&mut self) -> Result<ServerResult<()>> {
        loop {
            match self.advance_result() {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Ok(Ok(())),
                Ok(Err(err)) | Err(Error::ServerError(err)) => {
                    self.phase = Phase::Finished;
                    return Ok(Err(err));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for QueryStream<'_> {
    fn drop(&mut self) {
        if self.phase != Phase::Finished && !self.conn.is_broken() {
            tracing::debug!("discarding unread rows of a streaming result");
            let drained = self.drain();
            if let Err(err) = self.conn.track(drained) {
                tracing::warn!(%err, "failed to drain streaming result");
            }
        }
        if let Some(previous) = self.restore_timeout.take() {
            let restored = self.conn.restore_timeout(Some(previous));
            let _ = self.conn.track(restored);
        }
        self.conn.recycle_read_buffer();
    }
}
