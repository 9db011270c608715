//! Chunked memory image encoding.
//!
//! Layout: `total_len u64, compression u8, chunk_size u32`, then for each chunk
//! `packed_len u32` and the packed bytes. The unpacked length of every chunk is implied by
//! `chunk_size` and `total_len`.

use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{WireRead, WireWrite};

const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(SnapshotError::Corrupt("unknown memory compression")),
        }
    }

    fn pack(self, chunk: &[u8]) -> Vec<u8> {
        match self {
            Compression::None => chunk.to_vec(),
            Compression::Lz4 => lz4_flex::block::compress(chunk),
        }
    }

    fn unpack(self, packed: &[u8], into: &mut [u8]) -> Result<()> {
        match self {
            Compression::None => into.copy_from_slice(packed),
            Compression::Lz4 => {
                let n = lz4_flex::block::decompress_into(packed, into)?;
                if n != into.len() {
                    return Err(SnapshotError::Corrupt("lz4 chunk decoded short"));
                }
            }
        }
        Ok(())
    }

    /// Largest packed form a chunk of `len` bytes may legitimately have.
    fn max_packed_len(self, len: usize) -> usize {
        match self {
            Compression::None => len,
            Compression::Lz4 => lz4_flex::block::get_maximum_output_size(len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWriteOptions {
    pub compression: Compression,
    pub chunk_size: u32,
}

impl Default for MemoryWriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
            chunk_size: 16 * 1024,
        }
    }
}

fn check_chunk_size(size: u32) -> Result<usize> {
    if size == 0 || size > MAX_CHUNK_SIZE {
        return Err(SnapshotError::Corrupt("chunk size out of range"));
    }
    Ok(size as usize)
}

pub(crate) fn encode<W: Write>(w: &mut W, memory: &[u8], opts: MemoryWriteOptions) -> Result<()> {
    let chunk_size = check_chunk_size(opts.chunk_size)?;
    w.put_u64(memory.len() as u64)?;
    w.put_u8(opts.compression.tag())?;
    w.put_u32(opts.chunk_size)?;

    for chunk in memory.chunks(chunk_size) {
        let packed = opts.compression.pack(chunk);
        let packed_len =
            u32::try_from(packed.len()).map_err(|_| SnapshotError::TooLarge("memory chunk"))?;
        w.put_u32(packed_len)?;
        w.write_all(&packed)?;
    }
    Ok(())
}

pub(crate) fn decode_into<R: Read>(r: &mut R, memory: &mut [u8]) -> Result<()> {
    let found = r.get_u64()?;
    if found != memory.len() as u64 {
        return Err(SnapshotError::MemoryLenMismatch {
            expected: memory.len() as u64,
            found,
        });
    }
    let compression = Compression::from_tag(r.get_u8()?)?;
    let chunk_size = check_chunk_size(r.get_u32()?)?;

    for chunk in memory.chunks_mut(chunk_size) {
        let packed_len = r.get_u32()? as usize;
        let plausible = match compression {
            Compression::None => packed_len == chunk.len(),
            Compression::Lz4 => packed_len <= compression.max_packed_len(chunk.len()),
        };
        if !plausible {
            return Err(SnapshotError::Corrupt("memory chunk has implausible length"));
        }
        let packed = r.get_vec(packed_len)?;
        compression.unpack(&packed, chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn uneven_tail_chunk_is_restored() {
        let memory: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let opts = MemoryWriteOptions {
            compression: Compression::Lz4,
            chunk_size: 4096,
        };
        let mut buf = Vec::new();
        encode(&mut buf, &memory, opts).unwrap();

        let mut restored = vec![0u8; memory.len()];
        decode_into(&mut Cursor::new(buf), &mut restored).unwrap();
        assert_eq!(restored, memory);
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut buf = Vec::new();
        encode(&mut buf, &[1, 2, 3], MemoryWriteOptions::default()).unwrap();
        let mut restored = vec![0u8; 4];
        let err = decode_into(&mut Cursor::new(buf), &mut restored).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MemoryLenMismatch {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn zero_chunk_size_is_refused() {
        let opts = MemoryWriteOptions {
            compression: Compression::None,
            chunk_size: 0,
        };
        assert!(encode(&mut Vec::new(), &[0; 8], opts).is_err());
    }
}
