//! Low-level byte stream parser for classfile and dex decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser used by every format reader in the crate. It offers bounds-checked access to binary
//! data with support for both byte orders, the LEB128 variable-length integers used by dex
//! images, and the modified UTF-8 string encoding shared by classfiles and dex images.
//!
//! # Key Components
//!
//! ## Positioning
//! - [`crate::file::parser::Parser::new_at`] - Start reading at an offset
//! - [`crate::file::parser::Parser::pos`] - Current cursor position
//!
//! ## Data Access Methods
//! - [`crate::file::parser::Parser::read_le`] - Read primitive types (little-endian)
//! - [`crate::file::parser::Parser::read_be`] - Read primitive types (big-endian)
//! - [`crate::file::parser::Parser::read_bytes`] - Borrow a raw byte range
//!
//! ## Variable-Length Encodings
//! - [`crate::file::parser::Parser::read_uleb128`] - Unsigned LEB128
//! - [`crate::file::parser::Parser::read_mutf8`] - Length-delimited modified UTF-8
//! - [`crate::file::parser::Parser::read_mutf8_cstr`] - NUL-terminated modified UTF-8
//!
//! # Usage Examples
//!
//! ```rust
//! use hookscope::Parser;
//!
//! let data = [0xCA, 0xFE, 0xE5, 0x8E, 0x26];
//! let mut parser = Parser::new(&data);
//!
//! let magic_hi: u16 = parser.read_be()?;
//! assert_eq!(magic_hi, 0xCAFE);
//!
//! // 624485 encoded as unsigned LEB128
//! assert_eq!(parser.read_uleb128()?, 624_485);
//! # Ok::<(), hookscope::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, read_le_at, ByteIO},
    Result,
};

/// A cursor over a borrowed byte slice.
///
/// `Parser` provides a cursor-based interface for reading binary data in both
/// little-endian and big-endian formats. The classfile readers use the big-endian
/// accessors while the dex readers use the little-endian ones together with the
/// LEB128 helpers.
///
/// The parser never owns the data it reads and never mutates it. All reads are bounds
/// checked and report [`crate::Error::OutOfBounds`] on truncated input.
///
/// # Examples
///
/// ```rust
/// use hookscope::Parser;
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data);
///
/// let first = parser.read_le::<u32>()?;
/// assert_eq!(first, 0x04030201);
///
/// let mut parser = Parser::new_at(&data, 6)?;
/// let last_bytes = parser.read_be::<u16>()?;
/// assert_eq!(last_bytes, 0x0708);
/// # Ok::<(), hookscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Create a new parser positioned at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset` lies past the end of `data`.
    pub fn new_at(data: &'a [u8], offset: usize) -> Result<Self> {
        if offset > data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(Parser {
            data,
            position: offset,
        })
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Read a type `T` from the current position in little-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: ByteIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a type `T` from the current position in big-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_be<T: ByteIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Read an unsigned LEB128 value as used throughout the dex format.
    ///
    /// At most five bytes are consumed; the fifth byte may only contribute its low four bits.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input or
    /// [`crate::Error::Malformed`] when the encoding exceeds 32 bits.
    pub fn read_uleb128(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0u32;

        loop {
            let byte = self.read_le::<u8>()?;
            if shift == 28 && (byte & 0xF0) != 0 {
                return Err(malformed_error!(
                    "uleb128 at offset {:#x} exceeds 32 bits",
                    self.position - 1
                ));
            }

            value |= u32::from(byte & 0x7F) << shift;
            if (byte & 0x80) == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read `length` bytes of modified UTF-8 and decode them.
    ///
    /// This is the encoding of classfile `CONSTANT_Utf8` entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `length` bytes are not available or
    /// [`crate::Error::Malformed`] for an invalid byte sequence.
    pub fn read_mutf8(&mut self, length: usize) -> Result<String> {
        let start = self.position;
        let bytes = self.read_bytes(length)?;
        decode_mutf8(bytes).map_err(|e| e.with_context(format!("...at offset {start:#010x}")))
    }

    /// Read a NUL-terminated modified UTF-8 string, as stored in dex `string_data_item`s.
    ///
    /// The position is advanced past the terminator.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found or
    /// [`crate::Error::Malformed`] for an invalid byte sequence.
    pub fn read_mutf8_cstr(&mut self) -> Result<String> {
        let start = self.position;
        let rest = self.data.get(start..).ok_or(out_of_bounds_error!())?;
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(out_of_bounds_error!());
        };

        self.position = start + nul + 1;
        decode_mutf8(&rest[..nul])
    }

    /// Returns the number of bytes remaining from the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Ensures that at least `needed` bytes are available from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `needed` bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(out_of_bounds_error!());
        }
        Ok(())
    }

    /// Calculates an end position safely with overflow checking.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the calculation would overflow
    /// or if the resulting position exceeds the data length.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }

    /// Reads a slice of bytes of the specified length from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `length` bytes would exceed the data.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

/// Decode a modified UTF-8 byte sequence.
///
/// Modified UTF-8 differs from standard UTF-8 in two ways: `U+0000` is written as the
/// two-byte sequence `C0 80`, and supplementary characters are written as two separately
/// encoded UTF-16 surrogates. Unpaired surrogates decode to `U+FFFD`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a truncated or invalid byte sequence.
///
/// # Examples
///
/// ```rust
/// use hookscope::file::parser::decode_mutf8;
///
/// assert_eq!(decode_mutf8(b"java/lang/Object")?, "java/lang/Object");
/// assert_eq!(decode_mutf8(&[0x61, 0xC0, 0x80, 0x62])?, "a\0b");
/// # Ok::<(), hookscope::Error>(())
/// ```
pub fn decode_mutf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 >> 4 {
            0x0..=0x7 => {
                if b0 == 0 {
                    return Err(malformed_error!("raw NUL in modified UTF-8 at byte {}", i));
                }
                units.push(u16::from(b0));
                i += 1;
            }
            0xC | 0xD => {
                let b1 = continuation(bytes, i + 1)?;
                units.push((u16::from(b0 & 0x1F) << 6) | u16::from(b1 & 0x3F));
                i += 2;
            }
            0xE => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(
                    (u16::from(b0 & 0x0F) << 12)
                        | (u16::from(b1 & 0x3F) << 6)
                        | u16::from(b2 & 0x3F),
                );
                i += 3;
            }
            _ => {
                return Err(malformed_error!(
                    "invalid modified UTF-8 lead byte {:#04x} at byte {}",
                    b0,
                    i
                ))
            }
        }
    }

    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn continuation(bytes: &[u8], index: usize) -> Result<u8> {
    match bytes.get(index) {
        Some(&b) if (b & 0xC0) == 0x80 => Ok(b),
        Some(&b) => Err(malformed_error!(
            "invalid modified UTF-8 continuation byte {:#04x} at byte {}",
            b,
            index
        )),
        None => Err(malformed_error!("truncated modified UTF-8 sequence")),
    }
}
