use std::time::Duration;

use crate::protocol::command::ColumnDefinition;
use crate::protocol::response::OkPayload;
use crate::row::Row;

/// Per-command settings for buffered queries
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Unpack every row so it can be modified in place
    pub updatable: bool,
    /// Read deadline for this command only; falls back to `Opts::read_timeout`
    pub timeout: Option<Duration>,
}

/// One fully read result of a command
#[derive(Debug)]
pub struct ResultSet {
    /// `None` for results without rows (INSERT, UPDATE, ...)
    pub columns: Option<ColumnDefinition>,
    pub rows: Vec<Row>,
    /// The OK packet, or the terminator that ended the rows
    pub status: OkPayload,
}

impl ResultSet {
    pub fn has_rows(&self) -> bool {
        self.columns.is_some()
    }

    pub fn affected_rows(&self) -> u64 {
        self.status.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.status.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.status.warnings
    }

    pub fn info(&self) -> &str {
        &self.status.info
    }
}

/// A statement prepared on the server
#[derive(Debug, Clone)]
pub struct Statement {
    pub(super) id: u32,
    pub(super) num_params: u16,
    pub(super) params: Option<ColumnDefinition>,
    pub(super) columns: Option<ColumnDefinition>,
    pub(super) warnings: u16,
}

impl Statement {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_params(&self) -> u16 {
        self.num_params
    }

    /// Parameter metadata, when the statement has parameters
    pub fn params(&self) -> Option<&ColumnDefinition> {
        self.params.as_ref()
    }

    /// Result columns announced at prepare time
    pub fn columns(&self) -> Option<&ColumnDefinition> {
        self.columns.as_ref()
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }
}
