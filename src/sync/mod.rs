//! Blocking client over any [`Transport`](crate::channel::Transport).

mod conn;
mod cursor;
mod local_infile;
mod result;
mod stream;

pub use conn::Conn;
pub use cursor::Cursor;
pub use result::{QueryOptions, ResultSet, Statement};
pub use stream::QueryStream;
