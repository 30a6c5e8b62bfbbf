use bitflags::bitflags;

/// Largest payload a single frame can carry (`0xFFFFFF`).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Frame header: 3-byte length + 1-byte sequence.
pub const PACKET_HEADER_LEN: usize = 4;

/// Compressed frame header: 3-byte compressed length + 1-byte sequence + 3-byte uncompressed length.
pub const COMPRESSED_HEADER_LEN: usize = 7;

/// Payloads shorter than this are sent uncompressed inside the compressed envelope.
pub const MIN_COMPRESS_LEN: usize = 50;

/// Server-side limit on the number of columns in one table or result.
pub const MAX_COLUMNS: usize = 4096;

/// Collation index of the `binary` pseudo charset.
pub const BINARY_COLLATION: u16 = 63;

/// `utf8mb4_general_ci`, used for the handshake response.
pub const UTF8MB4_GENERAL_CI: u8 = 45;

/// MySQL command bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    Statistics = 0x09,
    ProcessKill = 0x0c,
    Ping = 0x0e,
    ChangeUser = 0x11,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    ResetConnection = 0x1f,
}

impl CommandByte {
    /// Commands whose payload is SQL text and may carry a comment prefix.
    pub fn accepts_comment(self) -> bool {
        matches!(
            self,
            CommandByte::Query | CommandByte::StmtPrepare | CommandByte::InitDb
        )
    }

    /// Commands the server never answers.
    pub fn expects_response(self) -> bool {
        !matches!(
            self,
            CommandByte::Quit | CommandByte::StmtClose | CommandByte::StmtSendLongData
        )
    }
}

bitflags! {
    /// Client/server capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        const CLIENT_LONG_PASSWORD = 0x00000001;
        const CLIENT_FOUND_ROWS = 0x00000002;
        const CLIENT_LONG_FLAG = 0x00000004;
        const CLIENT_CONNECT_WITH_DB = 0x00000008;
        const CLIENT_NO_SCHEMA = 0x00000010;
        const CLIENT_COMPRESS = 0x00000020;
        const CLIENT_ODBC = 0x00000040;
        const CLIENT_LOCAL_FILES = 0x00000080;
        const CLIENT_IGNORE_SPACE = 0x00000100;
        const CLIENT_PROTOCOL_41 = 0x00000200;
        const CLIENT_INTERACTIVE = 0x00000400;
        const CLIENT_SSL = 0x00000800;
        const CLIENT_IGNORE_SIGPIPE = 0x00001000;
        const CLIENT_TRANSACTIONS = 0x00002000;
        const CLIENT_RESERVED = 0x00004000;
        const CLIENT_SECURE_CONNECTION = 0x00008000;
        const CLIENT_MULTI_STATEMENTS = 0x00010000;
        const CLIENT_MULTI_RESULTS = 0x00020000;
        const CLIENT_PS_MULTI_RESULTS = 0x00040000;
        const CLIENT_PLUGIN_AUTH = 0x00080000;
        const CLIENT_CONNECT_ATTRS = 0x00100000;
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x00200000;
        const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS = 0x00400000;
        const CLIENT_SESSION_TRACK = 0x00800000;
        const CLIENT_DEPRECATE_EOF = 0x01000000;
        const CLIENT_OPTIONAL_RESULTSET_METADATA = 0x02000000;
        const CLIENT_ZSTD_COMPRESSION_ALGORITHM = 0x04000000;
        const CLIENT_QUERY_ATTRIBUTES = 0x08000000;
        const MULTI_FACTOR_AUTHENTICATION = 0x10000000;
        const CLIENT_CAPABILITY_EXTENSION = 0x20000000;
        const CLIENT_SSL_VERIFY_SERVER_CERT = 0x40000000;
        const CLIENT_REMEMBER_OPTIONS = 0x80000000;
    }
}

/// Requested on every connection (still subject to what the server offers).
pub const CAPABILITIES_ALWAYS_ENABLED: CapabilityFlags = CapabilityFlags::CLIENT_LONG_PASSWORD
    .union(CapabilityFlags::CLIENT_LONG_FLAG)
    .union(CapabilityFlags::CLIENT_PROTOCOL_41)
    .union(CapabilityFlags::CLIENT_TRANSACTIONS)
    .union(CapabilityFlags::CLIENT_SECURE_CONNECTION)
    .union(CapabilityFlags::CLIENT_MULTI_RESULTS)
    .union(CapabilityFlags::CLIENT_PS_MULTI_RESULTS)
    .union(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    .union(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA);

/// Controlled by `Opts` (either directly through `Opts::capabilities` or by a dedicated option).
pub const CAPABILITIES_CONFIGURABLE: CapabilityFlags = CapabilityFlags::CLIENT_FOUND_ROWS
    .union(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    .union(CapabilityFlags::CLIENT_COMPRESS)
    .union(CapabilityFlags::CLIENT_LOCAL_FILES)
    .union(CapabilityFlags::CLIENT_IGNORE_SPACE)
    .union(CapabilityFlags::CLIENT_SSL)
    .union(CapabilityFlags::CLIENT_MULTI_STATEMENTS)
    .union(CapabilityFlags::CLIENT_DEPRECATE_EOF);

/// Never requested.
pub const CAPABILITIES_ALWAYS_DISABLED: CapabilityFlags = CapabilityFlags::all()
    .difference(CAPABILITIES_ALWAYS_ENABLED)
    .difference(CAPABILITIES_CONFIGURABLE);

bitflags! {
    /// Server status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerStatusFlags: u16 {
        const SERVER_STATUS_IN_TRANS = 0x0001;
        const SERVER_STATUS_AUTOCOMMIT = 0x0002;
        const SERVER_MORE_RESULTS_EXISTS = 0x0008;
        const SERVER_STATUS_NO_GOOD_INDEX_USED = 0x0010;
        const SERVER_STATUS_NO_INDEX_USED = 0x0020;
        const SERVER_STATUS_CURSOR_EXISTS = 0x0040;
        const SERVER_STATUS_LAST_ROW_SENT = 0x0080;
        const SERVER_STATUS_DB_DROPPED = 0x0100;
        const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;
        const SERVER_STATUS_METADATA_CHANGED = 0x0400;
        const SERVER_QUERY_WAS_SLOW = 0x0800;
        const SERVER_PS_OUT_PARAMS = 0x1000;
        const SERVER_STATUS_IN_TRANS_READONLY = 0x2000;
        const SERVER_SESSION_STATE_CHANGED = 0x4000;
    }
}

bitflags! {
    /// Column definition flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        const NOT_NULL_FLAG = 0x0001;
        const PRI_KEY_FLAG = 0x0002;
        const UNIQUE_KEY_FLAG = 0x0004;
        const MULTIPLE_KEY_FLAG = 0x0008;
        const BLOB_FLAG = 0x0010;
        const UNSIGNED_FLAG = 0x0020;
        const ZEROFILL_FLAG = 0x0040;
        const BINARY_FLAG = 0x0080;
        const ENUM_FLAG = 0x0100;
        const AUTO_INCREMENT_FLAG = 0x0200;
        const TIMESTAMP_FLAG = 0x0400;
        const SET_FLAG = 0x0800;
        const NO_DEFAULT_VALUE_FLAG = 0x1000;
        const ON_UPDATE_NOW_FLAG = 0x2000;
        const PART_KEY_FLAG = 0x4000;
        const NUM_FLAG = 0x8000;
    }
}

/// Protocol-level column type ids
#[allow(non_camel_case_types)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    MYSQL_TYPE_DECIMAL = 0x00,
    MYSQL_TYPE_TINY = 0x01,
    MYSQL_TYPE_SHORT = 0x02,
    MYSQL_TYPE_LONG = 0x03,
    MYSQL_TYPE_FLOAT = 0x04,
    MYSQL_TYPE_DOUBLE = 0x05,
    MYSQL_TYPE_NULL = 0x06,
    MYSQL_TYPE_TIMESTAMP = 0x07,
    MYSQL_TYPE_LONGLONG = 0x08,
    MYSQL_TYPE_INT24 = 0x09,
    MYSQL_TYPE_DATE = 0x0a,
    MYSQL_TYPE_TIME = 0x0b,
    MYSQL_TYPE_DATETIME = 0x0c,
    MYSQL_TYPE_YEAR = 0x0d,
    MYSQL_TYPE_NEWDATE = 0x0e,
    MYSQL_TYPE_VARCHAR = 0x0f,
    MYSQL_TYPE_BIT = 0x10,
    MYSQL_TYPE_TIMESTAMP2 = 0x11,
    MYSQL_TYPE_DATETIME2 = 0x12,
    MYSQL_TYPE_TIME2 = 0x13,
    MYSQL_TYPE_JSON = 0xf5,
    MYSQL_TYPE_NEWDECIMAL = 0xf6,
    MYSQL_TYPE_ENUM = 0xf7,
    MYSQL_TYPE_SET = 0xf8,
    MYSQL_TYPE_TINY_BLOB = 0xf9,
    MYSQL_TYPE_MEDIUM_BLOB = 0xfa,
    MYSQL_TYPE_LONG_BLOB = 0xfb,
    MYSQL_TYPE_BLOB = 0xfc,
    MYSQL_TYPE_VAR_STRING = 0xfd,
    MYSQL_TYPE_STRING = 0xfe,
    MYSQL_TYPE_GEOMETRY = 0xff,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::MYSQL_TYPE_DECIMAL),
            0x01 => Some(Self::MYSQL_TYPE_TINY),
            0x02 => Some(Self::MYSQL_TYPE_SHORT),
            0x03 => Some(Self::MYSQL_TYPE_LONG),
            0x04 => Some(Self::MYSQL_TYPE_FLOAT),
            0x05 => Some(Self::MYSQL_TYPE_DOUBLE),
            0x06 => Some(Self::MYSQL_TYPE_NULL),
            0x07 => Some(Self::MYSQL_TYPE_TIMESTAMP),
            0x08 => Some(Self::MYSQL_TYPE_LONGLONG),
            0x09 => Some(Self::MYSQL_TYPE_INT24),
            0x0a => Some(Self::MYSQL_TYPE_DATE),
            0x0b => Some(Self::MYSQL_TYPE_TIME),
            0x0c => Some(Self::MYSQL_TYPE_DATETIME),
            0x0d => Some(Self::MYSQL_TYPE_YEAR),
            0x0e => Some(Self::MYSQL_TYPE_NEWDATE),
            0x0f => Some(Self::MYSQL_TYPE_VARCHAR),
            0x10 => Some(Self::MYSQL_TYPE_BIT),
            0x11 => Some(Self::MYSQL_TYPE_TIMESTAMP2),
            0x12 => Some(Self::MYSQL_TYPE_DATETIME2),
            0x13 => Some(Self::MYSQL_TYPE_TIME2),
            0xf5 => Some(Self::MYSQL_TYPE_JSON),
            0xf6 => Some(Self::MYSQL_TYPE_NEWDECIMAL),
            0xf7 => Some(Self::MYSQL_TYPE_ENUM),
            0xf8 => Some(Self::MYSQL_TYPE_SET),
            0xf9 => Some(Self::MYSQL_TYPE_TINY_BLOB),
            0xfa => Some(Self::MYSQL_TYPE_MEDIUM_BLOB),
            0xfb => Some(Self::MYSQL_TYPE_LONG_BLOB),
            0xfc => Some(Self::MYSQL_TYPE_BLOB),
            0xfd => Some(Self::MYSQL_TYPE_VAR_STRING),
            0xfe => Some(Self::MYSQL_TYPE_STRING),
            0xff => Some(Self::MYSQL_TYPE_GEOMETRY),
            _ => None,
        }
    }

    /// Width of a value in the binary row encoding.
    pub fn binary_width(self) -> BinaryWidth {
        match self {
            Self::MYSQL_TYPE_NULL => BinaryWidth::Fixed(0),
            Self::MYSQL_TYPE_TINY => BinaryWidth::Fixed(1),
            Self::MYSQL_TYPE_SHORT | Self::MYSQL_TYPE_YEAR => BinaryWidth::Fixed(2),
            Self::MYSQL_TYPE_LONG | Self::MYSQL_TYPE_INT24 | Self::MYSQL_TYPE_FLOAT => {
                BinaryWidth::Fixed(4)
            }
            Self::MYSQL_TYPE_LONGLONG | Self::MYSQL_TYPE_DOUBLE => BinaryWidth::Fixed(8),
            Self::MYSQL_TYPE_DATE
            | Self::MYSQL_TYPE_NEWDATE
            | Self::MYSQL_TYPE_DATETIME
            | Self::MYSQL_TYPE_DATETIME2
            | Self::MYSQL_TYPE_TIMESTAMP
            | Self::MYSQL_TYPE_TIMESTAMP2
            | Self::MYSQL_TYPE_TIME
            | Self::MYSQL_TYPE_TIME2 => BinaryWidth::LengthPrefixed,
            Self::MYSQL_TYPE_DECIMAL
            | Self::MYSQL_TYPE_NEWDECIMAL
            | Self::MYSQL_TYPE_VARCHAR
            | Self::MYSQL_TYPE_VAR_STRING
            | Self::MYSQL_TYPE_STRING
            | Self::MYSQL_TYPE_BIT
            | Self::MYSQL_TYPE_JSON
            | Self::MYSQL_TYPE_ENUM
            | Self::MYSQL_TYPE_SET
            | Self::MYSQL_TYPE_TINY_BLOB
            | Self::MYSQL_TYPE_MEDIUM_BLOB
            | Self::MYSQL_TYPE_LONG_BLOB
            | Self::MYSQL_TYPE_BLOB
            | Self::MYSQL_TYPE_GEOMETRY => BinaryWidth::LengthEncoded,
        }
    }
}

/// How many bytes a binary-protocol value occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryWidth {
    Fixed(usize),
    /// 1-byte length followed by that many bytes (temporal types)
    LengthPrefixed,
    /// length-encoded byte string
    LengthEncoded,
}

/// Cursor flags for COM_STMT_EXECUTE
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorType {
    NoCursor = 0x00,
    ReadOnly = 0x01,
}

#[cfg(test)]
#[path = "constant_test.rs"]
mod constant_test;
