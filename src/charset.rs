//! Collation index to text encoding mapping.
//!
//! Only the collations a client commonly meets are listed; anything else is
//! reported as [`Encoding::Other`] and decoded as lossy UTF-8.

use std::borrow::Cow;

use auto_impl::auto_impl;
use simdutf8::basic::from_utf8;

use crate::constant::BINARY_COLLATION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
    Ascii,
    Binary,
    Other(&'static str),
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
            Encoding::Binary => "binary",
            Encoding::Other(name) => name,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Encoding::Binary)
    }

    /// Decode bytes into text. UTF-8 input is borrowed without copying.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Encoding::Latin1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
            Encoding::Utf8 | Encoding::Ascii | Encoding::Binary | Encoding::Other(_) => {
                match from_utf8(bytes) {
                    Ok(s) => Cow::Borrowed(s),
                    Err(_) => String::from_utf8_lossy(bytes),
                }
            }
        }
    }
}

/// Lookup from collation index to encoding.
#[auto_impl(&, Box, Arc)]
pub trait CollationTable: std::fmt::Debug + Send + Sync {
    fn encoding(&self, collation: u16) -> Encoding;
}

/// Built-in table covering the default collations of current servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCollations;

impl CollationTable for DefaultCollations {
    fn encoding(&self, collation: u16) -> Encoding {
        match collation {
            BINARY_COLLATION => Encoding::Binary,
            5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => Encoding::Latin1,
            11 | 65 => Encoding::Ascii,
            33 | 83 | 192..=215 | 223 => Encoding::Utf8,
            45 | 46 | 224..=247 | 255..=323 => Encoding::Utf8,
            28 | 87 => Encoding::Other("GBK"),
            1 | 84 => Encoding::Other("Big5"),
            13 | 88 => Encoding::Other("Shift_JIS"),
            _ => Encoding::Other("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_collations() {
        let table = DefaultCollations;
        assert_eq!(table.encoding(33), Encoding::Utf8);
        assert_eq!(table.encoding(45), Encoding::Utf8);
        assert_eq!(table.encoding(255), Encoding::Utf8);
        assert_eq!(table.encoding(63), Encoding::Binary);
        assert_eq!(table.encoding(8), Encoding::Latin1);
    }

    #[test]
    fn latin1_decodes_high_bytes() {
        assert_eq!(Encoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "caf\u{e9}");
    }

    #[test]
    fn utf8_decoding_borrows() {
        assert!(matches!(Encoding::Utf8.decode(b"abc"), Cow::Borrowed("abc")));
    }
}
