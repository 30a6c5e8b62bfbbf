//! Client side of the MySQL wire protocol.
//!
//! Layers, bottom up: [`buffer`] reads and writes protocol primitives,
//! [`channel`] frames logical packets (with optional compression and
//! instrumentation), [`protocol`] encodes commands and decodes responses, and
//! [`sync`] drives them over a blocking transport.

pub mod buffer;
pub mod buffer_pool;
pub mod channel;
pub mod charset;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
pub mod row;
pub mod session;
pub mod sync;
pub mod value;

pub use error::{Error, Result, ServerResult};
pub use opts::Opts;
pub use row::{BufferRow, OwnedRow, Row, RowAccess, RowFormat};
pub use sync::{Conn, Cursor, QueryOptions, QueryStream, ResultSet, Statement};
pub use value::{FromValue, Value};
