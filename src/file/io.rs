//! Low-level byte order and safe reading/writing utilities for classfile and dex parsing.
//!
//! Classfiles are big-endian throughout, dex images are little-endian, and the on-disk
//! trampoline artifacts written by [`crate::hook`] are little-endian as well. This module
//! provides bounds-checked primitives for both byte orders so that none of the format
//! parsers index into raw slices directly.
//!
//! # Key Components
//!
//! - [`crate::file::io::ByteIO`] - Trait defining endian-aware reading and writing for primitive types
//! - [`crate::file::io::read_le_at`] / [`crate::file::io::read_be_at`] - Read at an offset and advance it
//! - [`crate::file::io::push_be`] - Append to a growable buffer
//!
//! # Usage Examples
//!
//! ```rust
//! use hookscope::file::io::{read_be_at, read_le_at};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! assert_eq!(magic, 0xCAFE_BABE);
//! assert_eq!(offset, 4);
//!
//! let mut offset = 0;
//! let little: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(little, 0xFECA);
//! # Ok::<(), hookscope::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type specific safe readers and writers
///
/// Implemented for all fixed-size primitives that show up in classfile, dex and
/// artifact-cache structures.
pub trait ByteIO: Sized {
    /// Associated type representing the byte array for this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_byte_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ByteIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_byte_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Safely reads T in little-endian order from the start of a data buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn read_le<T: ByteIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads T in little-endian order at `offset`, advancing the offset by `size_of::<T>()`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed the buffer.
pub fn read_le_at<T: ByteIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Safely reads T in big-endian order from the start of a data buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn read_be<T: ByteIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads T in big-endian order at `offset`, advancing the offset by `size_of::<T>()`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed the buffer.
pub fn read_be_at<T: ByteIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_be_bytes(read))
}

/// Appends T in big-endian order to a growable buffer.
pub fn push_be<T: ByteIO>(data: &mut Vec<u8>, value: T) {
    data.extend_from_slice(value.to_be_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_be_u16() {
        let result = read_be::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102);
    }

    #[test]
    fn read_be_u32() {
        let result = read_be::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102_0304);
    }

    #[test]
    fn read_le_u64() {
        let result = read_le::<u64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_be_f64() {
        let bytes = 1.5f64.to_be_bytes();
        assert_eq!(read_be::<f64>(&bytes).unwrap(), 1.5);
    }

    #[test]
    fn read_advances_offset() {
        let mut offset = 2;
        let value = read_be_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0304);
        assert_eq!(offset, 4);
    }

    #[test]
    fn errors() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];

        let result = read_le::<u64>(&buffer);
        assert!(matches!(result, Err(OutOfBounds)));

        let mut offset = usize::MAX;
        let result = read_be_at::<u16>(&buffer, &mut offset);
        assert!(matches!(result, Err(OutOfBounds)));
        assert_eq!(offset, usize::MAX);
    }

    #[test]
    fn push_appends_big_endian() {
        let mut out = vec![0xFF];
        push_be::<u16>(&mut out, 0x0102);
        push_be::<u32>(&mut out, 0x0304_0506);
        assert_eq!(out, vec![0xFF, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }
}
