use std::ops::Range;
use std::sync::{Arc, OnceLock};

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::charset::{CollationTable, Encoding};
use crate::constant::{BINARY_COLLATION, CapabilityFlags, ColumnFlags, ColumnType, MAX_COLUMNS};
use crate::error::{Error, FramingError, Result};
use crate::protocol::primitive::*;

/// Fixed-size tail of a Column Definition packet when `CLIENT_LONG_FLAG` is set (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn charset(&self) -> u16 {
        self.charset.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn raw_type(&self) -> u8 {
        self.column_type
    }

    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_retain(self.flags.get())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// Logical SQL type of a column, resolved from the wire type and its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MysqlType {
    Decimal,
    DecimalUnsigned,
    Bit,
    Boolean,
    TinyInt,
    TinyIntUnsigned,
    SmallInt,
    SmallIntUnsigned,
    MediumInt,
    MediumIntUnsigned,
    Int,
    IntUnsigned,
    BigInt,
    BigIntUnsigned,
    Float,
    FloatUnsigned,
    Double,
    DoubleUnsigned,
    Null,
    Timestamp,
    Date,
    Time,
    DateTime,
    Year,
    Varchar,
    Varbinary,
    Json,
    Enum,
    Set,
    TinyBlob,
    TinyText,
    MediumBlob,
    MediumText,
    LongBlob,
    LongText,
    Blob,
    Text,
    Char,
    Binary,
    Geometry,
    Unknown,
}

impl MysqlType {
    /// Values of this type are raw bytes rather than text.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            MysqlType::Bit
                | MysqlType::Varbinary
                | MysqlType::TinyBlob
                | MysqlType::MediumBlob
                | MysqlType::LongBlob
                | MysqlType::Blob
                | MysqlType::Binary
                | MysqlType::Geometry
                | MysqlType::Unknown
        )
    }

    /// Types whose values can grow past a few hundred bytes
    pub fn is_variable_length(self) -> bool {
        matches!(
            self,
            MysqlType::TinyBlob
                | MysqlType::TinyText
                | MysqlType::MediumBlob
                | MysqlType::MediumText
                | MysqlType::LongBlob
                | MysqlType::LongText
                | MysqlType::Blob
                | MysqlType::Text
                | MysqlType::Json
                | MysqlType::Geometry
        )
    }
}

/// Switches that change how ambiguous wire types are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeOptions {
    pub tiny_int1_is_bit: bool,
    pub transformed_bit_is_boolean: bool,
    pub blobs_are_strings: bool,
    pub functions_never_return_blobs: bool,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            tiny_int1_is_bit: true,
            transformed_bit_is_boolean: false,
            blobs_are_strings: false,
            functions_never_return_blobs: false,
        }
    }
}

/// Everything type resolution looks at
#[derive(Debug, Clone, Copy)]
pub struct TypeInputs {
    pub raw_type: u8,
    pub flags: ColumnFlags,
    pub collation: u16,
    pub length: u32,
    /// The column has no originating table (an expression or function result)
    pub from_function: bool,
    /// `BINARY` with the binary collation, and not from an implicit temporary table
    pub opaque_binary: bool,
}

const TINY_BLOB_MAX: u32 = 255;
const BLOB_MAX: u32 = 65_535;
const MEDIUM_BLOB_MAX: u32 = 16_777_215;

/// Resolve the logical type of a column.
///
/// `MYSQL_TYPE_BLOB` is reported for every blob size; its length picks the
/// concrete variant, which is then resolved once more.
pub fn resolve_type(inputs: &TypeInputs, options: &TypeOptions) -> MysqlType {
    if inputs.raw_type != ColumnType::MYSQL_TYPE_BLOB as u8 {
        return resolve_concrete(inputs, options);
    }

    let sized = if inputs.length <= TINY_BLOB_MAX {
        ColumnType::MYSQL_TYPE_TINY_BLOB
    } else if inputs.length <= BLOB_MAX {
        return if reports_text(inputs, options) {
            MysqlType::Text
        } else {
            MysqlType::Blob
        };
    } else if inputs.length <= MEDIUM_BLOB_MAX {
        ColumnType::MYSQL_TYPE_MEDIUM_BLOB
    } else {
        ColumnType::MYSQL_TYPE_LONG_BLOB
    };
    resolve_concrete(
        &TypeInputs {
            raw_type: sized as u8,
            ..*inputs
        },
        options,
    )
}

fn reports_text(inputs: &TypeInputs, options: &TypeOptions) -> bool {
    !inputs.flags.contains(ColumnFlags::BINARY_FLAG)
        || inputs.collation != BINARY_COLLATION
        || options.blobs_are_strings
        || (inputs.from_function && options.functions_never_return_blobs)
}

fn resolve_concrete(inputs: &TypeInputs, options: &TypeOptions) -> MysqlType {
    let unsigned = inputs.flags.contains(ColumnFlags::UNSIGNED_FLAG);
    let pick = |signed: MysqlType, unsigned_type: MysqlType| {
        if unsigned { unsigned_type } else { signed }
    };
    let Some(column_type) = ColumnType::from_u8(inputs.raw_type) else {
        return MysqlType::Unknown;
    };

    match column_type {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            pick(MysqlType::Decimal, MysqlType::DecimalUnsigned)
        }
        ColumnType::MYSQL_TYPE_TINY => {
            if !unsigned && inputs.length == 1 && options.tiny_int1_is_bit {
                if options.transformed_bit_is_boolean {
                    MysqlType::Boolean
                } else {
                    MysqlType::Bit
                }
            } else {
                pick(MysqlType::TinyInt, MysqlType::TinyIntUnsigned)
            }
        }
        ColumnType::MYSQL_TYPE_SHORT => pick(MysqlType::SmallInt, MysqlType::SmallIntUnsigned),
        ColumnType::MYSQL_TYPE_INT24 => pick(MysqlType::MediumInt, MysqlType::MediumIntUnsigned),
        ColumnType::MYSQL_TYPE_LONG => pick(MysqlType::Int, MysqlType::IntUnsigned),
        ColumnType::MYSQL_TYPE_LONGLONG => pick(MysqlType::BigInt, MysqlType::BigIntUnsigned),
        ColumnType::MYSQL_TYPE_FLOAT => pick(MysqlType::Float, MysqlType::FloatUnsigned),
        ColumnType::MYSQL_TYPE_DOUBLE => pick(MysqlType::Double, MysqlType::DoubleUnsigned),
        ColumnType::MYSQL_TYPE_NULL => MysqlType::Null,
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            MysqlType::Timestamp
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => MysqlType::Date,
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => MysqlType::Time,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => MysqlType::DateTime,
        ColumnType::MYSQL_TYPE_YEAR => MysqlType::Year,
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
            if inputs.opaque_binary
                && !(inputs.from_function && options.functions_never_return_blobs)
            {
                MysqlType::Varbinary
            } else {
                MysqlType::Varchar
            }
        }
        ColumnType::MYSQL_TYPE_BIT => MysqlType::Bit,
        ColumnType::MYSQL_TYPE_JSON => MysqlType::Json,
        ColumnType::MYSQL_TYPE_ENUM => MysqlType::Enum,
        ColumnType::MYSQL_TYPE_SET => MysqlType::Set,
        ColumnType::MYSQL_TYPE_TINY_BLOB => {
            if reports_text(inputs, options) {
                MysqlType::TinyText
            } else {
                MysqlType::TinyBlob
            }
        }
        ColumnType::MYSQL_TYPE_MEDIUM_BLOB => {
            if reports_text(inputs, options) {
                MysqlType::MediumText
            } else {
                MysqlType::MediumBlob
            }
        }
        ColumnType::MYSQL_TYPE_LONG_BLOB => {
            if reports_text(inputs, options) {
                MysqlType::LongText
            } else {
                MysqlType::LongBlob
            }
        }
        // Only reached with a length that skipped the size lookup
        ColumnType::MYSQL_TYPE_BLOB => {
            if reports_text(inputs, options) {
                MysqlType::Text
            } else {
                MysqlType::Blob
            }
        }
        ColumnType::MYSQL_TYPE_STRING => {
            if inputs.opaque_binary && !options.blobs_are_strings {
                MysqlType::Binary
            } else {
                MysqlType::Char
            }
        }
        ColumnType::MYSQL_TYPE_GEOMETRY => MysqlType::Geometry,
    }
}

/// Name stored in the shared metadata buffer, decoded on first use
#[derive(Debug, Default)]
struct LazyName {
    range: Range<usize>,
    decoded: OnceLock<String>,
}

impl LazyName {
    fn new(range: Range<usize>) -> Self {
        Self {
            range,
            decoded: OnceLock::new(),
        }
    }

    fn get<'a>(&'a self, packets: &[u8], encoding: Encoding) -> &'a str {
        self.decoded.get_or_init(|| {
            let bytes = packets.get(self.range.clone()).unwrap_or_default();
            encoding.decode(bytes).into_owned()
        })
    }

    fn bytes<'a>(&self, packets: &'a [u8]) -> &'a [u8] {
        packets.get(self.range.clone()).unwrap_or_default()
    }
}

/// Metadata of one result column
#[derive(Debug)]
pub struct Field {
    packets: Arc<[u8]>,
    schema: LazyName,
    table: LazyName,
    original_table: LazyName,
    name: LazyName,
    original_name: LazyName,
    name_encoding: Encoding,
    encoding: Encoding,
    collation: u16,
    length: u32,
    raw_type: u8,
    flags: ColumnFlags,
    decimals: u8,
    mysql_type: MysqlType,
}

impl Field {
    /// Parse the column definition stored at `range` inside `packets`.
    ///
    /// Names are kept as ranges into `packets` and decoded on first access.
    pub fn parse(
        packets: Arc<[u8]>,
        range: Range<usize>,
        capabilities: CapabilityFlags,
        collations: &dyn CollationTable,
        options: &TypeOptions,
    ) -> Result<Self> {
        let base = range.start;
        let payload = packets
            .get(range)
            .ok_or(FramingError::Malformed("column definition out of range"))?;
        let offset = |rest: &[u8]| base + payload.len() - rest.len();

        let (_catalog, rest) = read_string_lenenc(payload)?;
        let mut names = Vec::with_capacity(5);
        let mut rest = rest;
        for _ in 0..5 {
            let (bytes, next) = read_string_lenenc(rest)?;
            let end = offset(next);
            names.push((end - bytes.len())..end);
            rest = next;
        }

        // Length of the fixed fields, always 0x0c
        let (_length, rest) = read_int_lenenc(rest)?;
        let (collation, length, raw_type, flags, decimals) =
            if capabilities.contains(CapabilityFlags::CLIENT_LONG_FLAG) {
                let (tail, _reserved) = ColumnDefinitionTail::ref_from_prefix(rest)
                    .map_err(|_| FramingError::Malformed("column definition tail too short"))?;
                (
                    tail.charset(),
                    tail.column_length(),
                    tail.raw_type(),
                    tail.flags(),
                    tail.decimals(),
                )
            } else {
                let (collation, rest) = read_int_2(rest)?;
                let (length, rest) = read_int_4(rest)?;
                let (raw_type, rest) = read_int_1(rest)?;
                let (flags, rest) = read_int_1(rest)?;
                let (decimals, _rest) = read_int_1(rest)?;
                (
                    collation,
                    length,
                    raw_type,
                    ColumnFlags::from_bits_retain(u16::from(flags)),
                    decimals,
                )
            };

        let mut names = names.into_iter().map(LazyName::new);
        let mut next_name = || names.next().unwrap_or_default();
        let schema = next_name();
        let table = next_name();
        let original_table = next_name();
        let name = next_name();
        let original_name = next_name();

        let from_function = original_table.range.is_empty();
        let is_string_type = matches!(
            ColumnType::from_u8(raw_type),
            Some(
                ColumnType::MYSQL_TYPE_STRING
                    | ColumnType::MYSQL_TYPE_VAR_STRING
                    | ColumnType::MYSQL_TYPE_VARCHAR
            )
        );
        let encoding = collations.encoding(collation);
        let opaque_binary = if collation == BINARY_COLLATION
            && flags.contains(ColumnFlags::BINARY_FLAG)
            && is_string_type
        {
            !table.bytes(&packets).starts_with(b"#sql_")
        } else {
            encoding.is_binary()
        };

        let mysql_type = resolve_type(
            &TypeInputs {
                raw_type,
                flags,
                collation,
                length,
                from_function,
                opaque_binary,
            },
            options,
        );

        Ok(Self {
            packets,
            schema,
            table,
            original_table,
            name,
            original_name,
            // Metadata is always sent in the connection character set
            name_encoding: Encoding::Utf8,
            encoding,
            collation,
            length,
            raw_type,
            flags,
            decimals,
            mysql_type,
        })
    }

    pub fn schema(&self) -> &str {
        self.schema.get(&self.packets, self.name_encoding)
    }

    /// Table alias
    pub fn table(&self) -> &str {
        self.table.get(&self.packets, self.name_encoding)
    }

    pub fn original_table(&self) -> &str {
        self.original_table.get(&self.packets, self.name_encoding)
    }

    /// Column alias
    pub fn name(&self) -> &str {
        self.name.get(&self.packets, self.name_encoding)
    }

    pub fn original_name(&self) -> &str {
        self.original_name.get(&self.packets, self.name_encoding)
    }

    pub fn collation(&self) -> u16 {
        self.collation
    }

    /// Encoding of the column's values
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Maximum byte length of a value
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn raw_type(&self) -> u8 {
        self.raw_type
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_u8(self.raw_type)
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn mysql_type(&self) -> MysqlType {
        self.mysql_type
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    pub fn is_from_function(&self) -> bool {
        self.original_table.range.is_empty()
    }
}

/// Collects the column definition packets of one result set.
///
/// All packets are copied into one buffer that the resulting fields share.
#[derive(Debug)]
pub struct ColumnDefinitionBuilder {
    count: usize,
    packets: Vec<u8>,
    ranges: Vec<Range<usize>>,
}

impl ColumnDefinitionBuilder {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            packets: Vec::with_capacity(count.min(MAX_COLUMNS) * 64),
            ranges: Vec::with_capacity(count.min(MAX_COLUMNS)),
        }
    }

    pub fn push(&mut self, payload: &[u8]) {
        let start = self.packets.len();
        self.packets.extend_from_slice(payload);
        self.ranges.push(start..self.packets.len());
    }

    pub fn remaining(&self) -> usize {
        self.count.saturating_sub(self.ranges.len())
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    pub fn finish(
        self,
        capabilities: CapabilityFlags,
        collations: &dyn CollationTable,
        options: &TypeOptions,
    ) -> Result<ColumnDefinition> {
        if self.ranges.len() > self.count {
            return Err(Error::decode(format!(
                "received {} column definitions, expected {}",
                self.ranges.len(),
                self.count
            )));
        }
        let packets: Arc<[u8]> = self.packets.into();
        let fields = self
            .ranges
            .into_iter()
            .map(|range| {
                Field::parse(
                    Arc::clone(&packets),
                    range,
                    capabilities,
                    collations,
                    options,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ColumnDefinition {
            fields: fields.into(),
        })
    }
}

/// Immutable, cheaply cloned column list of one result set
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    fields: Arc<[Field]>,
}

impl ColumnDefinition {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Position of the first column whose alias is `name` (ASCII case-insensitive)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name().eq_ignore_ascii_case(name))
    }

    /// Whether any column can hold values larger than `threshold` bytes
    pub fn has_large_fields(&self, threshold: usize) -> bool {
        self.fields.iter().any(|field| {
            field.mysql_type().is_variable_length() || field.length() as usize > threshold
        })
    }
}
