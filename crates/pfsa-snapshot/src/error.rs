use std::io;

use thiserror::Error;

use crate::format::SectionId;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a pfsa checkpoint (bad magic)")]
    InvalidMagic,

    #[error("checkpoint format version {0} is not supported")]
    UnsupportedVersion(u16),

    #[error("checkpoint was written with byte-order tag {0}; only little-endian is supported")]
    InvalidEndianness(u8),

    #[error("checkpoint has no {0} section")]
    MissingSection(SectionId),

    #[error("{0} exceeds the encodable size")]
    TooLarge(&'static str),

    #[error("cannot allocate {len} bytes while decoding")]
    OutOfMemory { len: usize },

    #[error("checkpoint memory is {found} bytes but the target has {expected}")]
    MemoryLenMismatch { expected: u64, found: u64 },

    #[error("corrupt checkpoint: {0}")]
    Corrupt(&'static str),

    #[error("lz4: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),

    #[error("workload name is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
