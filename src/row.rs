//! Row materializations.
//!
//! * [`OwnedRow`] copies every value out of the packet and may be modified.
//! * [`BufferRow`] keeps the whole packet and locates values on first access.
//!   A `BufferRow<&[u8]>` borrows the connection's read buffer and therefore
//!   cannot outlive the next packet read.

use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::protocol::command::resultset::{ValueSpan, scan_binary_row, scan_text_row};
use crate::protocol::command::ColumnDefinition;
use crate::protocol::value::{decode_binary, decode_text};
use crate::value::{FromValue, Value};

pub use crate::protocol::command::resultset::RowFormat;

/// How rows of a static result are kept in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialization {
    Owned,
    Buffered,
}

/// Pick the in-memory form of a row read into a buffered result.
///
/// Rows that must stay modifiable are always unpacked. Otherwise results with
/// large or variable-length columns, or a packet bigger than `threshold`, keep
/// the packet and decode lazily.
pub fn choose_materialization(
    columns: &ColumnDefinition,
    payload_len: usize,
    threshold: usize,
    updatable: bool,
) -> Materialization {
    if updatable {
        Materialization::Owned
    } else if payload_len > threshold || columns.has_large_fields(threshold) {
        Materialization::Buffered
    } else {
        Materialization::Owned
    }
}

/// Find the value spans of one row payload.
pub fn scan_row(
    format: RowFormat,
    payload: &[u8],
    columns: &ColumnDefinition,
    spans: &mut Vec<ValueSpan>,
) -> Result<()> {
    match format {
        RowFormat::Text => scan_text_row(payload, columns.len(), spans),
        RowFormat::Binary => scan_binary_row(payload, columns.fields(), spans),
    }
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::BadUsageError(format!("column index {} out of range for {} columns", index, len))
}

/// Read access shared by every row materialization
pub trait RowAccess {
    fn columns(&self) -> &ColumnDefinition;

    fn format(&self) -> RowFormat;

    /// Wire bytes of a value, without any length prefix; `None` is NULL.
    fn raw(&self, index: usize) -> Result<Option<&[u8]>>;

    fn len(&self) -> usize {
        self.columns().len()
    }

    fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.raw(index)?.is_none())
    }

    /// Decode one value with its column's type.
    fn value(&self, index: usize) -> Result<Value<'_>> {
        let columns = self.columns();
        let field = columns
            .get(index)
            .ok_or_else(|| out_of_range(index, columns.len()))?;
        match self.raw(index)? {
            None => Ok(Value::Null),
            Some(bytes) => match self.format() {
                RowFormat::Text => decode_text(field, bytes),
                RowFormat::Binary => decode_binary(field, bytes),
            },
        }
    }

    fn get<T: FromValue>(&self, index: usize) -> Result<T>
    where
        Self: Sized,
    {
        T::from_value(self.value(index)?)
    }

    /// Like [`get`](Self::get), looking the column up by name (case-insensitive).
    fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T>
    where
        Self: Sized,
    {
        let index = self
            .columns()
            .index_of(name)
            .ok_or_else(|| Error::BadUsageError(format!("no column named '{}'", name)))?;
        self.get(index)
    }
}

/// A fully unpacked row
#[derive(Debug, Clone)]
pub struct OwnedRow {
    columns: ColumnDefinition,
    format: RowFormat,
    values: Vec<Option<Vec<u8>>>,
}

impl OwnedRow {
    /// Copy the located values out of `payload`.
    pub fn from_spans(
        payload: &[u8],
        spans: &[ValueSpan],
        columns: ColumnDefinition,
        format: RowFormat,
    ) -> Self {
        let values = spans
            .iter()
            .map(|span| span.clone().and_then(|range| payload.get(range)).map(<[u8]>::to_vec))
            .collect();
        Self {
            columns,
            format,
            values,
        }
    }

    /// Replace a value in its wire form (text digits, or the binary encoding of
    /// the column's type). `None` sets NULL.
    pub fn set_raw(&mut self, index: usize, value: Option<Vec<u8>>) -> Result<()> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))?;
        *slot = value;
        Ok(())
    }
}

impl RowAccess for OwnedRow {
    fn columns(&self) -> &ColumnDefinition {
        &self.columns
    }

    fn format(&self) -> RowFormat {
        self.format
    }

    fn raw(&self, index: usize) -> Result<Option<&[u8]>> {
        self.values
            .get(index)
            .map(Option::as_deref)
            .ok_or_else(|| out_of_range(index, self.values.len()))
    }
}

/// A row that keeps its packet and locates values lazily
#[derive(Debug)]
pub struct BufferRow<B: AsRef<[u8]>> {
    payload: B,
    columns: ColumnDefinition,
    format: RowFormat,
    spans: OnceLock<Vec<ValueSpan>>,
}

impl<B: AsRef<[u8]>> BufferRow<B> {
    pub fn new(payload: B, columns: ColumnDefinition, format: RowFormat) -> Self {
        Self {
            payload,
            columns,
            format,
            spans: OnceLock::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_ref()
    }

    fn spans(&self) -> Result<&[ValueSpan]> {
        if let Some(spans) = self.spans.get() {
            return Ok(spans);
        }
        let mut spans = Vec::with_capacity(self.columns.len());
        scan_row(self.format, self.payload.as_ref(), &self.columns, &mut spans)?;
        Ok(self.spans.get_or_init(|| spans))
    }

    /// Copy the values into an [`OwnedRow`].
    pub fn to_owned_row(&self) -> Result<OwnedRow> {
        Ok(OwnedRow::from_spans(
            self.payload.as_ref(),
            self.spans()?,
            self.columns.clone(),
            self.format,
        ))
    }

    /// Copy the packet so the row outlives the buffer it was read into.
    pub fn detach(&self) -> BufferRow<Vec<u8>> {
        BufferRow {
            payload: self.payload.as_ref().to_vec(),
            columns: self.columns.clone(),
            format: self.format,
            spans: self.spans.clone(),
        }
    }
}

impl<B: AsRef<[u8]>> RowAccess for BufferRow<B> {
    fn columns(&self) -> &ColumnDefinition {
        &self.columns
    }

    fn format(&self) -> RowFormat {
        self.format
    }

    fn raw(&self, index: usize) -> Result<Option<&[u8]>> {
        let spans = self.spans()?;
        let span = spans
            .get(index)
            .ok_or_else(|| out_of_range(index, spans.len()))?;
        Ok(span
            .clone()
            .and_then(|range| self.payload.as_ref().get(range)))
    }
}

/// A row of a static result
#[derive(Debug)]
pub enum Row {
    Owned(OwnedRow),
    Buffered(BufferRow<Vec<u8>>),
}

impl Row {
    /// Unpack the row so it can be modified.
    pub fn make_owned(&mut self) -> Result<&mut OwnedRow> {
        if let Row::Buffered(row) = self {
            *self = Row::Owned(row.to_owned_row()?);
        }
        match self {
            Row::Owned(row) => Ok(row),
            Row::Buffered(_) => Err(Error::LibraryBug(crate::error::eyre!(
                "row still buffered after unpacking"
            ))),
        }
    }
}

impl RowAccess for Row {
    fn columns(&self) -> &ColumnDefinition {
        match self {
            Row::Owned(row) => row.columns(),
            Row::Buffered(row) => row.columns(),
        }
    }

    fn format(&self) -> RowFormat {
        match self {
            Row::Owned(row) => row.format(),
            Row::Buffered(row) => row.format(),
        }
    }

    fn raw(&self, index: usize) -> Result<Option<&[u8]>> {
        match self {
            Row::Owned(row) => row.raw(index),
            Row::Buffered(row) => row.raw(index),
        }
    }
}

#[cfg(test)]
#[path = "row_test.rs"]
mod row_test;
