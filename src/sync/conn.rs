use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::PayloadBuffer;
use crate::buffer_pool::{BufferPool, BufferPurpose};
use crate::channel::{InstrumentationSettings, InstrumentationStack, PacketChannel, Transport};
use crate::charset::{CollationTable, DefaultCollations};
use crate::constant::{CapabilityFlags, CursorType};
use crate::error::{Error, Result, ServerResult};
use crate::opts::Opts;
use crate::protocol::command::prepared::{
    read_prepare_ok, write_close_statement, write_execute, write_prepare,
};
use crate::protocol::command::query::write_query;
use crate::protocol::command::resultset::{ResultAssembler, ResultEvent};
use crate::protocol::command::utility::{
    write_init_db, write_ping, write_quit, write_reset_connection,
};
use crate::protocol::command::{ColumnDefinition, ColumnDefinitionBuilder, TypeOptions};
use crate::protocol::connection::{Handshake, HandshakeResult};
use crate::protocol::response::{
    ErrPayload, ErrPayloadBytes, OkPayload, OkPayloadBytes, is_err_packet, is_row_terminator,
};
use crate::row::{BufferRow, Materialization, OwnedRow, Row, RowFormat, choose_materialization, scan_row};
use crate::session::{ServerSession, SessionState};
use crate::value::Value;

use super::cursor::Cursor;
use super::result::{QueryOptions, ResultSet, Statement};
use super::stream::QueryStream;

/// A blocking connection.
///
/// Every command borrows the connection mutably, so at most one command and
/// one streaming result can be in flight at a time.
#[derive(Debug)]
pub struct Conn {
    pub(super) channel: PacketChannel,
    pub(super) opts: Opts,
    session: ServerSession,
    pub(super) state: SessionState,
    collations: Arc<dyn CollationTable>,
    type_options: TypeOptions,
    pub(super) pool: BufferPool,
    pub(super) read_buf: PayloadBuffer,
    pub(super) write_buf: PayloadBuffer,
    broken: bool,
}

impl Conn {
    /// Connect over TCP, or the Unix socket in `opts.socket`, and authenticate.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;

        let transport: Box<dyn Transport> = if let Some(socket) = &opts.socket {
            Box::new(UnixStream::connect(socket)?)
        } else {
            if opts.host.is_empty() {
                return Err(Error::BadConfigError(
                    "Missing host in connection options".to_string(),
                ));
            }
            let stream = TcpStream::connect((opts.host.as_str(), opts.port))?;
            stream.set_nodelay(opts.tcp_nodelay)?;
            Box::new(stream)
        };

        Self::connect_with_transport(transport, opts)
    }

    /// Run the handshake over an already connected byte stream.
    #[tracing::instrument(skip_all)]
    pub fn connect_with_transport(transport: Box<dyn Transport>, opts: Opts) -> Result<Self> {
        if opts.tls && !cfg!(feature = "tls") {
            return Err(Error::BadConfigError(
                "TLS requested but the crate was built without the `tls` feature".to_string(),
            ));
        }

        let mut channel = PacketChannel::new(transport, opts.max_packet_size);
        channel.reconfigure(&opts.instrumentation());

        let mut packet = PayloadBuffer::new();
        let mut handshake = Handshake::new(opts.handshake_config());
        let mut initial_handshake = None;

        channel.read_packet(&mut packet)?;
        let mut step = handshake.drive(packet.as_slice())?;
        let (capabilities, ok) = loop {
            match step {
                HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake: hs,
                } => {
                    tracing::debug!(
                        server_version = %hs.server_version,
                        connection_id = hs.connection_id,
                        "server greeting"
                    );
                    initial_handshake = Some(hs);
                    channel.send(&handshake_response)?;
                }
                HandshakeResult::SslRequest {
                    ssl_request,
                    initial_handshake: hs,
                } => {
                    initial_handshake = Some(hs);
                    channel.send(&ssl_request)?;
                    channel = upgrade_channel(channel, &opts)?;
                    step = handshake.drive_after_tls()?;
                    continue;
                }
                HandshakeResult::Write(data) => channel.send(&data)?,
                HandshakeResult::Read => {}
                HandshakeResult::Connected {
                    capability_flags,
                    ok,
                } => break (capability_flags, ok),
            }
            channel.read_packet(&mut packet)?;
            step = handshake.drive(packet.as_slice())?;
        };

        let initial_handshake = initial_handshake.ok_or_else(|| {
            Error::LibraryBug(crate::error::eyre!("connected without a server greeting"))
        })?;

        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            tracing::debug!(threshold = opts.compression_threshold, "compression enabled");
            channel.enable_compression(opts.compression_threshold, opts.buffer_retain_threshold);
        }

        let mut state = SessionState::new(initial_handshake.status_flags);
        state.apply_ok(&ok);
        let session = ServerSession::new(initial_handshake, capabilities);
        let pool = BufferPool::new(opts.buffer_retain_threshold);
        let read_buf = PayloadBuffer::from_vec(pool.take(BufferPurpose::Row));

        Ok(Self {
            channel,
            type_options: opts.type_options(),
            opts,
            session,
            state,
            collations: Arc::new(DefaultCollations),
            pool,
            read_buf,
            write_buf: PayloadBuffer::new(),
            broken: false,
        })
    }

    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Status flags and warnings reported by the last command
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.session.capabilities
    }

    /// Whether a fatal error has made this connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn instrumentation(&self) -> &InstrumentationStack {
        self.channel.instrumentation()
    }

    /// Change tracing, timing and capture settings on a live connection.
    pub fn reconfigure_instrumentation(&mut self, settings: &InstrumentationSettings) {
        self.channel.reconfigure(settings);
    }

    /// Use a different collation to encoding table for subsequent results.
    pub fn set_collation_table(&mut self, collations: Arc<dyn CollationTable>) {
        self.collations = collations;
    }

    pub(super) fn assembler(&self) -> ResultAssembler {
        ResultAssembler::new(
            self.session.capabilities,
            Arc::clone(&self.collations),
            self.type_options,
        )
    }

    pub(super) fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            Err(Error::ConnectionBroken)
        } else {
            Ok(())
        }
    }

    /// Remember fatal errors so later commands fail fast.
    pub(super) fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && err.is_fatal()
            && !self.broken
        {
            tracing::warn!(%err, "connection is broken");
            self.broken = true;
            self.channel.stop();
        }
        result
    }

    /// Start a command cycle: new sequence, fresh per-command status.
    pub(super) fn begin_command(&mut self) {
        self.channel.reset_sequence();
        self.state.begin_command();
    }

    #[tracing::instrument(skip_all)]
    pub(super) fn send_command(&mut self) -> Result<()> {
        self.begin_command();
        self.channel.send(self.write_buf.as_slice())
    }

    pub(super) fn read_packet(&mut self) -> Result<()> {
        self.channel.read_packet(&mut self.read_buf)
    }

    /// Apply `timeout` (or the configured default) and return the deadline to restore.
    pub(super) fn apply_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<Option<Duration>>> {
        match timeout.or(self.opts.read_timeout) {
            Some(timeout) => {
                let previous = self.channel.read_timeout()?;
                self.channel.set_read_timeout(Some(timeout))?;
                Ok(Some(previous))
            }
            None => Ok(None),
        }
    }

    pub(super) fn restore_timeout(&mut self, previous: Option<Option<Duration>>) -> Result<()> {
        match previous {
            Some(previous) => self.channel.set_read_timeout(previous),
            None => Ok(()),
        }
    }

    /// Hand the read buffer back to the pool so an oversized one is shrunk.
    pub(super) fn recycle_read_buffer(&mut self) {
        let buf = std::mem::take(&mut self.read_buf).into_vec();
        self.pool.give_back(BufferPurpose::Row, buf);
        self.read_buf = PayloadBuffer::from_vec(self.pool.take(BufferPurpose::Row));
    }

    /// Run one command/response cycle with its own read deadline.
    ///
    /// The previous deadline is restored whether or not the command succeeds.
    fn run_command<T>(
        &mut self,
        timeout: Option<Duration>,
        command: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.ensure_usable()?;
        let result = match self.apply_timeout(timeout) {
            Ok(previous) => {
                let result = command(self);
                let restored = self.restore_timeout(previous);
                result.and_then(|value| restored.map(|()| value))
            }
            Err(err) => Err(err),
        };
        self.recycle_read_buffer();
        self.track(result)
    }

    /// Execute a text query and buffer every result it produces.
    pub fn query(&mut self, sql: &str) -> Result<ServerResult<Vec<ResultSet>>> {
        self.query_with(sql, &QueryOptions::default())
    }

    pub fn query_with(
        &mut self,
        sql: &str,
        options: &QueryOptions,
    ) -> Result<ServerResult<Vec<ResultSet>>> {
        self.run_command(options.timeout, |conn| {
            write_query(&mut conn.write_buf, sql, conn.opts.comment.as_deref());
            conn.send_command()?;
            conn.collect_results(RowFormat::Text, options.updatable)
        })
    }

    /// Execute a text query and discard its rows.
    pub fn query_drop(&mut self, sql: &str) -> Result<ServerResult<()>> {
        match self.query_stream(sql)? {
            Ok(stream) => stream.close(),
            Err(err) => Ok(Err(err)),
        }
    }

    /// Execute a text query and read its rows one at a time.
    pub fn query_stream(&mut self, sql: &str) -> Result<ServerResult<QueryStream<'_>>> {
        self.ensure_usable()?;
        write_query(&mut self.write_buf, sql, self.opts.comment.as_deref());
        QueryStream::open(self, RowFormat::Text, None)
    }

    pub(super) fn collect_results(
        &mut self,
        format: RowFormat,
        updatable: bool,
    ) -> Result<ServerResult<Vec<ResultSet>>> {
        let mut assembler = self.assembler();
        let mut results = Vec::new();
        let mut local_error = None;
        loop {
            match self.collect_one(&mut assembler, format, updatable, &mut local_error)? {
                Ok(result) => results.push(result),
                Err(err) => {
                    if let Some(message) = local_error {
                        tracing::warn!(%err, "server error after a refused local infile");
                        return Err(Error::LocalInfile(message));
                    }
                    return Ok(Err(err));
                }
            }
            if !assembler.has_more_results() {
                break;
            }
            assembler.next_result()?;
        }
        match local_error {
            Some(message) => Err(Error::LocalInfile(message)),
            None => Ok(Ok(results)),
        }
    }

    fn collect_one(
        &mut self,
        assembler: &mut ResultAssembler,
        format: RowFormat,
        updatable: bool,
        local_error: &mut Option<String>,
    ) -> Result<ServerResult<ResultSet>> {
        let mut columns: Option<ColumnDefinition> = None;
        let mut rows = Vec::new();
        let mut spans = Vec::new();
        loop {
            self.read_packet()?;
            match assembler.feed(self.read_buf.as_slice())? {
                ResultEvent::NeedPacket => {}
                ResultEvent::Status(status) | ResultEvent::RowsDone(status) => {
                    self.state.apply_ok(&status);
                    return Ok(Ok(ResultSet {
                        columns,
                        rows,
                        status,
                    }));
                }
                ResultEvent::Columns {
                    columns: definition,
                    status,
                } => {
                    if let Some(status) = status {
                        self.state.apply_status(status);
                    }
                    columns = Some(definition);
                }
                ResultEvent::Row => {
                    let Some(definition) = &columns else {
                        return Err(Error::LibraryBug(crate::error::eyre!(
                            "row before column definitions"
                        )));
                    };
                    let payload = self.read_buf.as_slice();
                    let row = match choose_materialization(
                        definition,
                        payload.len(),
                        self.opts.large_row_threshold,
                        updatable,
                    ) {
                        Materialization::Owned => {
                            scan_row(format, payload, definition, &mut spans)?;
                            Row::Owned(OwnedRow::from_spans(
                                payload,
                                &spans,
                                definition.clone(),
                                format,
                            ))
                        }
                        Materialization::Buffered => Row::Buffered(BufferRow::new(
                            payload.to_vec(),
                            definition.clone(),
                            format,
                        )),
                    };
                    rows.push(row);
                }
                ResultEvent::LocalInfile(name) => {
                    if let Err(message) = self.send_local_file(&name)? {
                        *local_error = Some(message);
                    }
                    assembler.infile_sent();
                }
                ResultEvent::ServerError(err) => {
                    return Ok(Err(err));
                }
            }
        }
    }

    /// Read `count` column definitions, plus the EOF that follows them on
    /// servers without `CLIENT_DEPRECATE_EOF`.
    fn read_definitions(&mut self, count: u16) -> Result<Option<ColumnDefinition>> {
        if count == 0 {
            return Ok(None);
        }
        let mut builder = ColumnDefinitionBuilder::new(usize::from(count));
        while !builder.is_complete() {
            self.read_packet()?;
            builder.push(self.read_buf.as_slice());
        }
        let capabilities = self.session.capabilities;
        if !capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
            self.read_packet()?;
            if !is_row_terminator(self.read_buf.as_slice(), capabilities) {
                return Err(crate::error::FramingError::Malformed(
                    "expected EOF after statement metadata",
                )
                .into());
            }
        }
        builder
            .finish(capabilities, self.collations.as_ref(), &self.type_options)
            .map(Some)
    }

    /// Prepare a statement on the server.
    pub fn prepare(&mut self, sql: &str) -> Result<ServerResult<Statement>> {
        self.run_command(None, |conn| {
            write_prepare(&mut conn.write_buf, sql, conn.opts.comment.as_deref());
            conn.send_command()?;
            conn.read_packet()?;
            if is_err_packet(conn.read_buf.as_slice()) {
                return Ok(Err(ErrPayload::try_from(ErrPayloadBytes(
                    conn.read_buf.as_slice(),
                ))?));
            }

            let prepare_ok = read_prepare_ok(conn.read_buf.as_slice())?;
            let id = prepare_ok.statement_id();
            let num_params = prepare_ok.num_params();
            let num_columns = prepare_ok.num_columns();
            let warnings = prepare_ok.warning_count();

            let params = conn.read_definitions(num_params)?;
            let columns = conn.read_definitions(num_columns)?;
            tracing::debug!(id, num_params, num_columns, "statement prepared");
            Ok(Ok(Statement {
                id,
                num_params,
                params,
                columns,
                warnings,
            }))
        })
    }

    fn check_params(statement: &Statement, params: &[Value<'_>]) -> Result<()> {
        if params.len() == usize::from(statement.num_params) {
            Ok(())
        } else {
            Err(Error::BadUsageError(format!(
                "statement expects {} parameters, got {}",
                statement.num_params,
                params.len()
            )))
        }
    }

    /// Execute a prepared statement and buffer its results.
    pub fn execute(
        &mut self,
        statement: &Statement,
        params: &[Value<'_>],
    ) -> Result<ServerResult<Vec<ResultSet>>> {
        Self::check_params(statement, params)?;
        self.run_command(None, |conn| {
            write_execute(
                &mut conn.write_buf,
                statement.id,
                CursorType::NoCursor,
                params,
            );
            conn.send_command()?;
            conn.collect_results(RowFormat::Binary, false)
        })
    }

    /// Execute a prepared statement and read its rows one at a time.
    pub fn execute_stream(
        &mut self,
        statement: &Statement,
        params: &[Value<'_>],
    ) -> Result<ServerResult<QueryStream<'_>>> {
        self.ensure_usable()?;
        Self::check_params(statement, params)?;
        write_execute(
            &mut self.write_buf,
            statement.id,
            CursorType::NoCursor,
            params,
        );
        QueryStream::open(self, RowFormat::Binary, None)
    }

    /// Execute a prepared statement with a read-only server-side cursor.
    ///
    /// Rows are fetched `fetch_size` at a time with `COM_STMT_FETCH`.
    pub fn execute_cursor(
        &mut self,
        statement: &Statement,
        params: &[Value<'_>],
        fetch_size: u32,
    ) -> Result<ServerResult<Cursor<'_>>> {
        self.ensure_usable()?;
        Self::check_params(statement, params)?;
        if fetch_size == 0 {
            return Err(Error::BadUsageError(
                "cursor fetch size must be positive".to_string(),
            ));
        }
        write_execute(
            &mut self.write_buf,
            statement.id,
            CursorType::ReadOnly,
            params,
        );
        Cursor::open(self, statement.id, fetch_size)
    }

    /// Deallocate a prepared statement. The server sends no reply.
    pub fn close_statement(&mut self, statement: Statement) -> Result<()> {
        self.run_command(None, |conn| {
            write_close_statement(&mut conn.write_buf, statement.id);
            conn.send_command()
        })
    }

    /// Send a command answered by a single OK or ERR packet.
    fn simple_command(&mut self) -> Result<ServerResult<OkPayload>> {
        self.send_command()?;
        self.read_packet()?;
        let payload = self.read_buf.as_slice();
        if is_err_packet(payload) {
            return Ok(Err(ErrPayload::try_from(ErrPayloadBytes(payload))?));
        }
        let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
        self.state.apply_ok(&ok);
        Ok(Ok(ok))
    }

    pub fn ping(&mut self) -> Result<ServerResult<()>> {
        self.run_command(None, |conn| {
            write_ping(&mut conn.write_buf);
            Ok(conn.simple_command()?.map(drop))
        })
    }

    /// Change the default database.
    pub fn init_db(&mut self, database: &str) -> Result<ServerResult<()>> {
        self.run_command(None, |conn| {
            write_init_db(&mut conn.write_buf, database, conn.opts.comment.as_deref());
            Ok(conn.simple_command()?.map(drop))
        })
    }

    /// Reset session state on the server (variables, temporary tables, prepared statements).
    pub fn reset_connection(&mut self) -> Result<ServerResult<()>> {
        self.run_command(None, |conn| {
            write_reset_connection(&mut conn.write_buf);
            Ok(conn.simple_command()?.map(drop))
        })
    }

    /// Send `COM_QUIT` and release the transport.
    pub fn close(mut self) -> Result<()> {
        self.ensure_usable()?;
        write_quit(&mut self.write_buf);
        let result = self.send_command();
        self.channel.stop();
        tracing::debug!(connection_id = self.session.connection_id, "connection closed");
        result
    }
}

#[cfg(feature = "tls")]
fn upgrade_channel(channel: PacketChannel, opts: &Opts) -> Result<PacketChannel> {
    let sequence_id = channel.sequence_id();
    let transport = channel.into_transport();
    let tls = crate::channel::upgrade_to_tls(transport, &opts.host, opts.tls_accept_invalid_certs)?;
    tracing::debug!("transport upgraded to TLS");

    let mut channel = PacketChannel::new(tls, opts.max_packet_size);
    channel.reconfigure(&opts.instrumentation());
    channel.set_sequence_id(sequence_id);
    Ok(channel)
}

#[cfg(not(feature = "tls"))]
fn upgrade_channel(_channel: PacketChannel, _opts: &Opts) -> Result<PacketChannel> {
    Err(Error::BadConfigError(
        "TLS requested but the crate was built without the `tls` feature".to_string(),
    ))
}
