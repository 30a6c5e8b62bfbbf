//! Typed column values.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// One decoded column value, borrowing from the row it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    /// TINYINT .. BIGINT, YEAR
    Int(i64),
    /// Unsigned integer columns
    UInt(u64),
    Float(f32),
    Double(f64),
    /// DATE
    Date(Date),
    /// DATETIME, TIMESTAMP
    DateTime(DateTime),
    /// TIME, which may be negative and longer than a day
    Time(Time),
    /// Character data decoded with the column's encoding (also DECIMAL, JSON, ENUM, SET)
    Text(Cow<'a, str>),
    /// BLOB, BINARY, BIT, GEOMETRY
    Bytes(&'a [u8]),
}

impl Value<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value<'_> {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value<'_> {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u64> for Value<'_> {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value<'_> {
    fn from(value: u32) -> Self {
        Value::UInt(u64::from(value))
    }
}

impl From<bool> for Value<'_> {
    fn from(value: bool) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f32> for Value<'_> {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value<'_> {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(value: &'a str) -> Self {
        Value::Text(Cow::Borrowed(value))
    }
}

impl From<String> for Value<'_> {
    fn from(value: String) -> Self {
        Value::Text(Cow::Owned(value))
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(value: &'a [u8]) -> Self {
        Value::Bytes(value)
    }
}

impl From<Date> for Value<'_> {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime> for Value<'_> {
    fn from(value: DateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Time> for Value<'_> {
    fn from(value: Time) -> Self {
        Value::Time(value)
    }
}

impl<'a, T: Into<Value<'a>>> From<Option<T>> for Value<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl DateTime {
    pub fn date(&self) -> Date {
        Date {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub negative: bool,
    pub days: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl Time {
    /// Total hours including whole days, as shown by `HH:MM:SS` text
    pub fn total_hours(&self) -> u64 {
        u64::from(self.days) * 24 + u64::from(self.hour)
    }
}

fn mismatch(value: &Value<'_>, target: &str) -> Error {
    Error::BadUsageError(format!("cannot convert {:?} to {}", value, target))
}

/// Conversion from a column value into a Rust type
pub trait FromValue: Sized {
    fn from_value(value: Value<'_>) -> Result<Self>;
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value<'_>) -> Result<Self> {
                    let converted = match &value {
                        Value::Int(v) => <$t>::try_from(*v).ok(),
                        Value::UInt(v) => <$t>::try_from(*v).ok(),
                        Value::Text(s) => s.trim().parse::<$t>().ok(),
                        _ => None,
                    };
                    converted.ok_or_else(|| mismatch(&value, stringify!($t)))
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(v),
            Value::Float(v) => Ok(f64::from(v)),
            Value::Int(v) => Ok(v as f64),
            Value::UInt(v) => Ok(v as f64),
            Value::Text(ref s) => s.trim().parse().map_err(|_| mismatch(&value, "f64")),
            other => Err(mismatch(&other, "f64")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Text(ref s) => s.trim().parse().map_err(|_| mismatch(&value, "f32")),
            other => Err(mismatch(&other, "f32")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v != 0),
            Value::UInt(v) => Ok(v != 0),
            // BIT(1)
            Value::Bytes(bytes) => Ok(bytes.iter().any(|&b| b != 0)),
            Value::Text(ref s) => match s.trim() {
                "1" | "true" | "TRUE" => Ok(true),
                "0" | "false" | "FALSE" => Ok(false),
                _ => Err(mismatch(&value, "bool")),
            },
            other => Err(mismatch(&other, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.into_owned()),
            Value::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::BadUsageError("column value is not valid UTF-8".to_string())),
            Value::Int(v) => Ok(v.to_string()),
            Value::UInt(v) => Ok(v.to_string()),
            other => Err(mismatch(&other, "String")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Bytes(bytes) => Ok(bytes.to_vec()),
            Value::Text(s) => Ok(s.into_owned().into_bytes()),
            other => Err(mismatch(&other, "Vec<u8>")),
        }
    }
}

impl FromValue for Date {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date()),
            other => Err(mismatch(&other, "Date")),
        }
    }
}

impl FromValue for DateTime {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Date(d) => Ok(DateTime {
                year: d.year,
                month: d.month,
                day: d.day,
                ..Default::default()
            }),
            other => Err(mismatch(&other, "DateTime")),
        }
    }
}

impl FromValue for Time {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Time(t) => Ok(t),
            other => Err(mismatch(&other, "Time")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value<'_>) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
