//! Wire encodings of column values in both row formats.

use std::borrow::Cow;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::buffer::{IntWidth, PayloadBuffer, StringKind};
use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::command::{Field, MysqlType};
use crate::value::{Date, DateTime, Time, Value};

/// DATE/DATETIME/TIMESTAMP - 4 bytes (date only)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

/// DATE/DATETIME/TIMESTAMP - 7 bytes (without microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// DATE/DATETIME/TIMESTAMP - 11 bytes (with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIME - 12 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

/// NULL bitmap of the binary protocol
///
/// Result rows reserve the first 2 bits; statement parameters start at bit 0.
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 2 }
    }

    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 0 }
    }

    /// Bytes needed for `columns` columns of a result row: `(columns + 2 + 7) / 8`
    pub fn result_set_len(columns: usize) -> usize {
        (columns + 2).div_ceil(8)
    }

    pub fn parameters_len(params: usize) -> usize {
        params.div_ceil(8)
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + self.offset;
        match self.bitmap.get(bit_pos >> 3) {
            Some(byte) => byte & (1 << (bit_pos & 7)) != 0,
            None => false,
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bitmap
    }
}

fn temporal_len_error(what: &str, len: usize) -> Error {
    Error::decode(format!("invalid {} length: {}", what, len))
}

fn decode_timestamp(bytes: &[u8]) -> Result<DateTime> {
    match bytes.len() {
        0 => Ok(DateTime::default()),
        4 => {
            let ts = Timestamp4::ref_from_bytes(bytes)
                .map_err(|_| temporal_len_error("timestamp", 4))?;
            Ok(DateTime {
                year: ts.year.get(),
                month: ts.month,
                day: ts.day,
                ..Default::default()
            })
        }
        7 => {
            let ts = Timestamp7::ref_from_bytes(bytes)
                .map_err(|_| temporal_len_error("timestamp", 7))?;
            Ok(DateTime {
                year: ts.year.get(),
                month: ts.month,
                day: ts.day,
                hour: ts.hour,
                minute: ts.minute,
                second: ts.second,
                microsecond: 0,
            })
        }
        11 => {
            let ts = Timestamp11::ref_from_bytes(bytes)
                .map_err(|_| temporal_len_error("timestamp", 11))?;
            Ok(DateTime {
                year: ts.year.get(),
                month: ts.month,
                day: ts.day,
                hour: ts.hour,
                minute: ts.minute,
                second: ts.second,
                microsecond: ts.microsecond.get(),
            })
        }
        len => Err(temporal_len_error("timestamp", len)),
    }
}

fn decode_time(bytes: &[u8]) -> Result<Time> {
    match bytes.len() {
        0 => Ok(Time::default()),
        8 => {
            let t = Time8::ref_from_bytes(bytes).map_err(|_| temporal_len_error("time", 8))?;
            Ok(Time {
                negative: t.is_negative != 0,
                days: t.days.get(),
                hour: t.hour,
                minute: t.minute,
                second: t.second,
                microsecond: 0,
            })
        }
        12 => {
            let t = Time12::ref_from_bytes(bytes).map_err(|_| temporal_len_error("time", 12))?;
            Ok(Time {
                negative: t.is_negative != 0,
                days: t.days.get(),
                hour: t.hour,
                minute: t.minute,
                second: t.second,
                microsecond: t.microsecond.get(),
            })
        }
        len => Err(temporal_len_error("time", len)),
    }
}

fn le_bytes<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::decode(format!("expected {} value bytes, got {}", N, bytes.len())))
}

fn character_data<'a>(field: &Field, bytes: &'a [u8]) -> Value<'a> {
    if field.mysql_type().is_binary() {
        Value::Bytes(bytes)
    } else {
        Value::Text(field.encoding().decode(bytes))
    }
}

/// Decode one binary-protocol value.
///
/// `bytes` is the value without its length prefix, as located by the row scanner.
pub fn decode_binary<'a>(field: &Field, bytes: &'a [u8]) -> Result<Value<'a>> {
    let Some(column_type) = field.column_type() else {
        return Err(Error::decode(format!(
            "unknown column type 0x{:02X}",
            field.raw_type()
        )));
    };
    let unsigned = field.is_unsigned();

    let value = match column_type {
        ColumnType::MYSQL_TYPE_NULL => Value::Null,
        ColumnType::MYSQL_TYPE_TINY => {
            let [b] = le_bytes::<1>(bytes)?;
            if unsigned {
                Value::UInt(u64::from(b))
            } else {
                Value::Int(i64::from(b as i8))
            }
        }
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
            let raw = u16::from_le_bytes(le_bytes(bytes)?);
            if unsigned || column_type == ColumnType::MYSQL_TYPE_YEAR {
                Value::UInt(u64::from(raw))
            } else {
                Value::Int(i64::from(raw as i16))
            }
        }
        ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
            let raw = u32::from_le_bytes(le_bytes(bytes)?);
            if unsigned {
                Value::UInt(u64::from(raw))
            } else {
                Value::Int(i64::from(raw as i32))
            }
        }
        ColumnType::MYSQL_TYPE_LONGLONG => {
            let raw = u64::from_le_bytes(le_bytes(bytes)?);
            if unsigned {
                Value::UInt(raw)
            } else {
                Value::Int(raw as i64)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => Value::Float(f32::from_le_bytes(le_bytes(bytes)?)),
        ColumnType::MYSQL_TYPE_DOUBLE => Value::Double(f64::from_le_bytes(le_bytes(bytes)?)),
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            Value::Date(decode_timestamp(bytes)?.date())
        }
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => Value::DateTime(decode_timestamp(bytes)?),
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            Value::Time(decode_time(bytes)?)
        }
        ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL
        | ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_BIT
        | ColumnType::MYSQL_TYPE_JSON
        | ColumnType::MYSQL_TYPE_ENUM
        | ColumnType::MYSQL_TYPE_SET
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY => character_data(field, bytes),
    };
    Ok(value)
}

fn ascii(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::decode("non-ASCII numeric text value"))
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8]) -> Result<T> {
    let text = ascii(bytes)?;
    text.parse()
        .map_err(|_| Error::decode(format!("cannot parse text value {:?}", text)))
}

fn parse_fraction(text: &str) -> Result<u32> {
    if text.is_empty() {
        return Ok(0);
    }
    let digits: String = text.chars().chain(std::iter::repeat('0')).take(6).collect();
    digits
        .parse()
        .map_err(|_| Error::decode(format!("bad fractional seconds {:?}", text)))
}

fn split_number<T: std::str::FromStr>(part: Option<&str>, what: &str) -> Result<T> {
    part.and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::decode(format!("bad {} in temporal text value", what)))
}

/// `YYYY-MM-DD`
pub fn parse_text_date(text: &str) -> Result<Date> {
    let mut parts = text.splitn(3, '-');
    Ok(Date {
        year: split_number(parts.next(), "year")?,
        month: split_number(parts.next(), "month")?,
        day: split_number(parts.next(), "day")?,
    })
}

/// `YYYY-MM-DD[ hh:mm:ss[.ffffff]]`
pub fn parse_text_datetime(text: &str) -> Result<DateTime> {
    let (date, time) = text.split_once(' ').unwrap_or((text, ""));
    let date = parse_text_date(date)?;
    let mut datetime = DateTime {
        year: date.year,
        month: date.month,
        day: date.day,
        ..Default::default()
    };
    if !time.is_empty() {
        let (hms, fraction) = time.split_once('.').unwrap_or((time, ""));
        let mut parts = hms.splitn(3, ':');
        datetime.hour = split_number(parts.next(), "hour")?;
        datetime.minute = split_number(parts.next(), "minute")?;
        datetime.second = split_number(parts.next(), "second")?;
        datetime.microsecond = parse_fraction(fraction)?;
    }
    Ok(datetime)
}

/// `[-]hhh:mm:ss[.ffffff]`
pub fn parse_text_time(text: &str) -> Result<Time> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (hms, fraction) = rest.split_once('.').unwrap_or((rest, ""));
    let mut parts = hms.splitn(3, ':');
    let hours: u32 = split_number(parts.next(), "hour")?;
    Ok(Time {
        negative,
        days: hours / 24,
        hour: (hours % 24) as u8,
        minute: split_number(parts.next(), "minute")?,
        second: split_number(parts.next(), "second")?,
        microsecond: parse_fraction(fraction)?,
    })
}

/// Decode one text-protocol value using the column's resolved type.
pub fn decode_text<'a>(field: &Field, bytes: &'a [u8]) -> Result<Value<'a>> {
    let value = match field.mysql_type() {
        MysqlType::Null => Value::Null,
        MysqlType::Boolean
        | MysqlType::TinyInt
        | MysqlType::SmallInt
        | MysqlType::MediumInt
        | MysqlType::Int
        | MysqlType::BigInt => Value::Int(parse_text(bytes)?),
        MysqlType::TinyIntUnsigned
        | MysqlType::SmallIntUnsigned
        | MysqlType::MediumIntUnsigned
        | MysqlType::IntUnsigned
        | MysqlType::BigIntUnsigned
        | MysqlType::Year => Value::UInt(parse_text(bytes)?),
        MysqlType::Float | MysqlType::FloatUnsigned => Value::Float(parse_text(bytes)?),
        MysqlType::Double | MysqlType::DoubleUnsigned => Value::Double(parse_text(bytes)?),
        MysqlType::Date => Value::Date(parse_text_date(ascii(bytes)?)?),
        MysqlType::DateTime | MysqlType::Timestamp => {
            Value::DateTime(parse_text_datetime(ascii(bytes)?)?)
        }
        MysqlType::Time => Value::Time(parse_text_time(ascii(bytes)?)?),
        // TINYINT(1) reported as BIT still arrives as digits
        MysqlType::Bit if field.column_type() == Some(ColumnType::MYSQL_TYPE_TINY) => {
            Value::Int(parse_text(bytes)?)
        }
        MysqlType::Decimal | MysqlType::DecimalUnsigned => {
            Value::Text(Cow::Borrowed(ascii(bytes)?))
        }
        _ => character_data(field, bytes),
    };
    Ok(value)
}

/// Wire type id and unsigned flag used to send a parameter
pub fn parameter_type(value: &Value<'_>) -> (ColumnType, bool) {
    match value {
        Value::Null => (ColumnType::MYSQL_TYPE_NULL, false),
        Value::Int(_) => (ColumnType::MYSQL_TYPE_LONGLONG, false),
        Value::UInt(_) => (ColumnType::MYSQL_TYPE_LONGLONG, true),
        Value::Float(_) => (ColumnType::MYSQL_TYPE_FLOAT, false),
        Value::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE, false),
        Value::Date(_) => (ColumnType::MYSQL_TYPE_DATE, false),
        Value::DateTime(_) => (ColumnType::MYSQL_TYPE_DATETIME, false),
        Value::Time(_) => (ColumnType::MYSQL_TYPE_TIME, false),
        Value::Text(_) => (ColumnType::MYSQL_TYPE_VAR_STRING, false),
        Value::Bytes(_) => (ColumnType::MYSQL_TYPE_BLOB, false),
    }
}

/// Append the binary encoding of a non-NULL parameter.
pub fn write_binary_value(out: &mut PayloadBuffer, value: &Value<'_>) {
    match value {
        Value::Null => {}
        Value::Int(v) => out.write_int(IntWidth::Int8, *v as u64),
        Value::UInt(v) => out.write_int(IntWidth::Int8, *v),
        Value::Float(v) => out.write_int(IntWidth::Int4, u64::from(v.to_bits())),
        Value::Double(v) => out.write_int(IntWidth::Int8, v.to_bits()),
        Value::Date(d) => {
            out.write_int(IntWidth::Int1, 4);
            out.write_int(IntWidth::Int2, u64::from(d.year));
            out.write_int(IntWidth::Int1, u64::from(d.month));
            out.write_int(IntWidth::Int1, u64::from(d.day));
        }
        Value::DateTime(dt) => {
            out.write_int(IntWidth::Int1, 11);
            out.write_int(IntWidth::Int2, u64::from(dt.year));
            for part in [dt.month, dt.day, dt.hour, dt.minute, dt.second] {
                out.write_int(IntWidth::Int1, u64::from(part));
            }
            out.write_int(IntWidth::Int4, u64::from(dt.microsecond));
        }
        Value::Time(t) => {
            out.write_int(IntWidth::Int1, 12);
            out.write_int(IntWidth::Int1, u64::from(t.negative));
            out.write_int(IntWidth::Int4, u64::from(t.days));
            for part in [t.hour, t.minute, t.second] {
                out.write_int(IntWidth::Int1, u64::from(part));
            }
            out.write_int(IntWidth::Int4, u64::from(t.microsecond));
        }
        Value::Text(s) => out.write_bytes(StringKind::LenEnc, s.as_bytes()),
        Value::Bytes(b) => out.write_bytes(StringKind::LenEnc, b),
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
