//! On-disk trampoline artifacts.
//!
//! An artifact records what was generated for one member: its id and erased signature.
//! The file layout is big-endian and self-validating:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | magic `HSTB` |
//! | 4      | 2    | format version |
//! | 6      | 1    | receiver flag |
//! | 7      | 2    | id length `n` |
//! | 9      | n    | id (UTF-8) |
//! | 9+n    | 2    | descriptor length `m` |
//! | 11+n   | m    | erased descriptor (UTF-8) |
//! | 11+n+m | 20   | SHA-1 of everything before |
//!
//! Anything that fails to validate is treated as a miss, so a damaged cache only costs a
//! regeneration.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use log::debug;
use sha1::{Digest, Sha1};

use crate::{
    file::{io::push_be, parser::Parser},
    hook::signature::ErasedSignature,
    Error, Result,
};

const MAGIC: &[u8; 4] = b"HSTB";
const FORMAT_VERSION: u16 = 1;
const EXTENSION: &str = "hstub";

/// Distinguishes staging files of concurrent stores within this process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// What the generator produced for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubArtifact {
    /// The member's signature id
    pub id: String,
    /// The erased shape the hook entry enforces
    pub signature: ErasedSignature,
}

impl StubArtifact {
    /// Serialize into the checksummed file format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let descriptor = self.signature.descriptor();
        let mut out = Vec::with_capacity(31 + self.id.len() + descriptor.len());
        out.extend_from_slice(MAGIC);
        push_be(&mut out, FORMAT_VERSION);
        push_be(&mut out, u8::from(self.signature.receiver));
        push_be(&mut out, self.id.len() as u16);
        out.extend_from_slice(self.id.as_bytes());
        push_be(&mut out, descriptor.len() as u16);
        out.extend_from_slice(descriptor.as_bytes());
        let checksum = Sha1::digest(&out);
        out.extend_from_slice(&checksum);
        out
    }

    /// Parse and validate a serialized artifact.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic, version, checksum or signature and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn from_bytes(data: &[u8]) -> Result<StubArtifact> {
        if data.len() < 20 {
            return Err(out_of_bounds_error!());
        }
        let (body, checksum) = data.split_at(data.len() - 20);
        if Sha1::digest(body).as_slice() != checksum {
            return Err(malformed_error!("artifact checksum mismatch"));
        }

        let mut parser = Parser::new(body);
        if parser.read_bytes(4)? != MAGIC {
            return Err(malformed_error!("bad artifact magic"));
        }
        let version = parser.read_be::<u16>()?;
        if version != FORMAT_VERSION {
            return Err(malformed_error!("unsupported artifact version {}", version));
        }
        let receiver = match parser.read_be::<u8>()? {
            0 => false,
            1 => true,
            other => return Err(malformed_error!("bad receiver flag {}", other)),
        };
        let id = read_string(&mut parser)?;
        let descriptor = read_string(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!("trailing bytes in artifact"));
        }

        Ok(StubArtifact {
            id,
            signature: ErasedSignature::parse(&descriptor, receiver)?,
        })
    }
}

fn read_string(parser: &mut Parser<'_>) -> Result<String> {
    let len = parser.read_be::<u16>()? as usize;
    let bytes = parser.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed_error!("artifact string is not UTF-8"))
}

/// A directory of [`StubArtifact`] files keyed by signature id.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
    io_timeout: Option<Duration>,
}

impl ArtifactCache {
    /// A cache rooted at `dir`; the directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>, io_timeout: Option<Duration>) -> Self {
        ArtifactCache {
            dir: dir.into(),
            io_timeout,
        }
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `id`.
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Load the artifact for `id`.
    ///
    /// Missing, unreadable, corrupt or mismatching files all yield `None`.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<StubArtifact> {
        let path = self.path_for(id);
        let data = match self.bounded(move || fs::read(path)) {
            Ok(data) => data,
            Err(e) => {
                debug!("trampoline cache miss for {id}: {e}");
                return None;
            }
        };

        match StubArtifact::from_bytes(&data) {
            Ok(artifact) if artifact.id == id => Some(artifact),
            Ok(artifact) => {
                debug!("trampoline cache entry {id} names {}, ignoring", artifact.id);
                None
            }
            Err(e) => {
                debug!("trampoline cache entry {id} is damaged: {e}");
                None
            }
        }
    }

    /// Persist `artifact`, replacing any previous file atomically.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the directory or file can not be written, and
    /// [`crate::Error::Error`] if the write exceeds the configured timeout.
    pub fn store(&self, artifact: &StubArtifact) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.path_for(&artifact.id);
        let staging = self.staging_path(&artifact.id);
        let bytes = artifact.to_bytes();

        self.bounded(move || {
            fs::create_dir_all(&dir)?;
            fs::write(&staging, bytes)?;
            fs::rename(&staging, &path)
        })
    }

    /// A fresh temporary path next to the entry of `id`, unique per process and per store.
    fn staging_path(&self, id: &str) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{id}.{EXTENSION}.{}.{seq}", std::process::id()))
    }

    /// Run `io`, giving up after the configured timeout. The operation itself is not
    /// cancelled; it finishes in the background.
    fn bounded<T, F>(&self, io: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> std::io::Result<T> + Send + 'static,
    {
        let Some(timeout) = self.io_timeout else {
            return Ok(io()?);
        };

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(io());
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Error(format!(
                "trampoline cache I/O exceeded {timeout:?}"
            ))),
        }
    }
}
