//! Input abstraction for classfile and dex images.
//!
//! This module abstracts over where the bytes of a class or dex image come from. Parsers in
//! [`crate::classfile`] and [`crate::dex`] operate on plain `&[u8]`, but a caller will usually
//! either have a file on disk or a buffer it does not want to hand over. [`crate::file::File`]
//! covers both cases with a pluggable [`crate::file::Backend`]:
//!
//! - [`crate::file::File::from_file`] memory-maps a file read-only
//! - [`crate::file::File::from_mem`] takes ownership of a buffer
//! - [`crate::file::File::from_slice`] copies a borrowed buffer into a private allocation, so a
//!   caller-owned buffer is never retained
//!
//! The container kind is sniffed from the magic bytes on load.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Loaded image with kind detection
//! - [`crate::file::Backend`] - Trait for data sources
//! - [`crate::file::parser::Parser`] - Cursor used by all format readers
//! - [`crate::file::io`] - Endian-aware primitive readers and writers
//!
//! # Examples
//!
//! ```rust
//! use hookscope::{File, file::FileKind};
//!
//! let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
//! let file = File::from_slice(&bytes)?;
//! assert_eq!(file.kind(), FileKind::ClassFile);
//! assert_eq!(file.len(), 8);
//! # Ok::<(), hookscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use memory::Memory;
use physical::Physical;

/// Backend trait for file data sources.
///
/// All implementations must be thread-safe so that a loaded [`File`] can back a dex session
/// that is read from many threads at once.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// The container format detected from the leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A JVM classfile (`CA FE BA BE`)
    ClassFile,
    /// A dex image (`dex\n` followed by a three digit version and NUL)
    Dex,
    /// Anything else
    Unknown,
}

impl FileKind {
    /// Sniff the kind of `data` from its magic bytes.
    #[must_use]
    pub fn detect(data: &[u8]) -> FileKind {
        match data {
            [0xCA, 0xFE, 0xBA, 0xBE, ..] => FileKind::ClassFile,
            [b'd', b'e', b'x', b'\n', _, _, _, 0, ..] => FileKind::Dex,
            _ => FileKind::Unknown,
        }
    }
}

/// A loaded classfile or dex image.
///
/// The data is immutable for the lifetime of the `File`. Parsers borrow from it; a dex
/// session additionally keeps the `File` alive in an `Arc` for as long as it is open.
pub struct File {
    data: Box<dyn Backend>,
    kind: FileKind,
}

impl File {
    /// Memory-map the file at `file`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file can not be opened,
    /// [`crate::Error::Error`] if mapping fails and [`crate::Error::Empty`] for an empty file.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Take ownership of an in-memory buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] if the buffer is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    /// Copy a borrowed buffer into a private allocation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] if the buffer is empty.
    pub fn from_slice(data: &[u8]) -> Result<File> {
        Self::from_mem(data.to_vec())
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let kind = FileKind::detect(data.data());
        Ok(File {
            data: Box::new(data),
            kind,
        })
    }

    /// Returns the container kind detected on load.
    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has a length of zero.
    ///
    /// A successfully loaded file is never empty, but the accessor is kept for symmetry
    /// with [`File::len`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the complete image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}
