// common.rs — error types, load results and logging setup

use std::io;

use crc::{Crc, CRC_32_ISO_HDLC};
use thiserror::Error;

const CRC_CALC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// ============================================================
// Errors
// ============================================================

/// Everything that can go wrong while reading a vmap resource.
#[derive(Debug, Error)]
pub enum VmapError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("wrong file header, expected {expected}")]
    BadMagic { expected: &'static str },

    #[error("chunk mismatch: expected {expected:?}, found {found:?}")]
    ChunkMismatch { expected: String, found: String },

    #[error("spawn name length {0} exceeds the limit")]
    NameTooLong(u32),

    #[error("triangle index {index} out of range ({vertices} vertices)")]
    TriangleIndexOutOfRange { index: u32, vertices: usize },

    #[error("bounding tree is malformed: {0}")]
    MalformedTree(&'static str),

    #[error("{what} count {count} is out of range")]
    CountOutOfRange { what: &'static str, count: u64 },
}

impl VmapError {
    pub fn chunk_mismatch(expected: &[u8], found: &[u8]) -> Self {
        VmapError::ChunkMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VmapError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

// ============================================================
// Load results
// ============================================================

/// Outcome of a tile or map load, reported to the caller that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    Success,
    FileNotFound,
    VersionMismatch,
    ReadFromFileFailed,
    DisabledInConfig,
}

impl LoadResult {
    pub fn is_success(self) -> bool {
        self == LoadResult::Success
    }
}

impl From<&VmapError> for LoadResult {
    fn from(err: &VmapError) -> Self {
        match err {
            e if e.is_not_found() => LoadResult::FileNotFound,
            VmapError::BadMagic { .. } => LoadResult::VersionMismatch,
            _ => LoadResult::ReadFromFileFailed,
        }
    }
}

// ============================================================
// Checksums
// ============================================================

/// CRC-32 of a resource file's bytes, reported alongside load messages.
pub fn file_checksum(data: &[u8]) -> u32 {
    CRC_CALC.checksum(data)
}

// ============================================================
// Logging
// ============================================================

/// Install a `tracing` subscriber for binaries. `RUST_LOG` overrides
/// `default_filter`. Safe to call more than once.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_result_from_not_found() {
        let err = VmapError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(LoadResult::from(&err), LoadResult::FileNotFound);
    }

    #[test]
    fn test_load_result_from_bad_magic() {
        let err = VmapError::BadMagic { expected: "VMAP_7.0" };
        assert_eq!(LoadResult::from(&err), LoadResult::VersionMismatch);
    }

    #[test]
    fn test_load_result_from_truncation() {
        let err = VmapError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "short"));
        assert_eq!(LoadResult::from(&err), LoadResult::ReadFromFileFailed);
        let err = VmapError::chunk_mismatch(b"VERT", b"TRIM");
        assert_eq!(LoadResult::from(&err), LoadResult::ReadFromFileFailed);
        let err = VmapError::CountOutOfRange { what: "liquid height", count: u64::MAX };
        assert_eq!(LoadResult::from(&err), LoadResult::ReadFromFileFailed);
    }

    #[test]
    fn test_chunk_mismatch_message() {
        let err = VmapError::chunk_mismatch(b"NODE", b"GOBJ");
        assert_eq!(err.to_string(), "chunk mismatch: expected \"NODE\", found \"GOBJ\"");
    }

    #[test]
    fn test_file_checksum_known_value() {
        assert_eq!(file_checksum(b"123456789"), 0xCBF4_3926);
    }
}
