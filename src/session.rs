//! What the server told us at connect time, and what it reports per command.

use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::protocol::connection::InitialHandshake;
use crate::protocol::response::OkPayload;

/// Fixed facts about the server, captured once at handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Scramble sent with the greeting
    pub seed: Vec<u8>,
    pub server_capabilities: CapabilityFlags,
    /// Capabilities both sides agreed on
    pub capabilities: CapabilityFlags,
    pub collation: u8,
}

impl ServerSession {
    pub fn new(handshake: InitialHandshake, capabilities: CapabilityFlags) -> Self {
        Self {
            protocol_version: handshake.protocol_version,
            server_version: handshake.server_version,
            connection_id: handshake.connection_id,
            seed: handshake.auth_plugin_data,
            server_capabilities: handshake.capability_flags,
            capabilities,
            collation: handshake.collation,
        }
    }

    pub fn has_capability(&self, flag: CapabilityFlags) -> bool {
        self.capabilities.contains(flag)
    }
}

/// Flags that only describe the last command
const PER_COMMAND_FLAGS: ServerStatusFlags = ServerStatusFlags::SERVER_QUERY_WAS_SLOW
    .union(ServerStatusFlags::SERVER_STATUS_NO_INDEX_USED)
    .union(ServerStatusFlags::SERVER_STATUS_NO_GOOD_INDEX_USED);

/// Status flags and warnings as of the last terminal packet.
///
/// Updated when a command starts ([`begin_command`](Self::begin_command)) and
/// after every OK, EOF or ERR packet that ends a result ([`apply`](Self::apply)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    status_flags: ServerStatusFlags,
    warnings: u16,
    was_in_transaction: bool,
}

impl SessionState {
    pub fn new(status_flags: ServerStatusFlags) -> Self {
        Self {
            status_flags,
            warnings: 0,
            was_in_transaction: status_flags.contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS),
        }
    }

    /// Reset what only applies to one command and remember the transaction state.
    pub fn begin_command(&mut self) {
        self.was_in_transaction = self.in_transaction();
        self.status_flags.remove(PER_COMMAND_FLAGS);
        self.warnings = 0;
    }

    pub fn apply(&mut self, status_flags: ServerStatusFlags, warnings: u16) {
        self.status_flags = status_flags;
        self.warnings = warnings;
    }

    pub fn apply_ok(&mut self, ok: &OkPayload) {
        self.apply(ok.status_flags, ok.warnings);
    }

    /// Only the per-command flags change, e.g. after a legacy EOF without warnings.
    pub fn apply_status(&mut self, status_flags: ServerStatusFlags) {
        self.status_flags = status_flags;
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    /// Transaction state before the last command started
    pub fn was_in_transaction(&self) -> bool {
        self.was_in_transaction
    }

    pub fn autocommit(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    }

    pub fn was_slow(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_QUERY_WAS_SLOW)
    }

    pub fn no_index_used(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_NO_INDEX_USED)
    }

    pub fn no_good_index_used(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_NO_GOOD_INDEX_USED)
    }

    pub fn more_results_exist(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    pub fn cursor_exists(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
    }

    pub fn last_row_sent(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT)
    }
}
