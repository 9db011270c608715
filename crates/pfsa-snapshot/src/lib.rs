//! On-disk format for architectural checkpoints.
//!
//! A checkpoint is a directory holding a single [`STATE_FILE_NAME`] blob: a file header
//! followed by sections, each framed as `id u32, version u16, len u64, payload`. Sections with an
//! unknown id or version are skipped on restore so newer writers stay readable.

#![forbid(unsafe_code)]

mod error;
mod format;
mod io;
mod memory;
mod types;

pub use crate::error::{Result, SnapshotError};
pub use crate::format::{
    SectionId, CHECKPOINT_MAGIC, CHECKPOINT_VERSION, LITTLE_ENDIAN_TAG, SECTION_VERSION,
    STATE_FILE_NAME,
};
pub use crate::memory::{Compression, MemoryWriteOptions};
pub use crate::types::{CheckpointMeta, CoreState, CORE_REGISTER_COUNT};

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::io::{WireRead, WireWrite};

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    pub memory: MemoryWriteOptions,
}

/// A machine whose architectural state can be captured.
pub trait CheckpointSource {
    fn checkpoint_meta(&self) -> CheckpointMeta;
    fn core_state(&self) -> CoreState;
    fn memory(&self) -> &[u8];
}

/// A machine that can be rebuilt from a checkpoint. Sections arrive in file order.
pub trait CheckpointTarget {
    fn restore_meta(&mut self, meta: CheckpointMeta);
    fn restore_core_state(&mut self, state: CoreState);
    fn memory_mut(&mut self) -> &mut [u8];

    /// Runs once every required section has been applied.
    fn post_restore(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn save_checkpoint<W: Write, S: CheckpointSource + ?Sized>(
    w: &mut W,
    source: &S,
    options: SaveOptions,
) -> Result<()> {
    w.write_all(CHECKPOINT_MAGIC)?;
    w.put_u16(CHECKPOINT_VERSION)?;
    w.put_u8(LITTLE_ENDIAN_TAG)?;
    w.put_u8(0)?;

    emit_section(w, SectionId::META, |buf| source.checkpoint_meta().encode(buf))?;
    emit_section(w, SectionId::CORE, |buf| source.core_state().encode(buf))?;
    emit_section(w, SectionId::MEMORY, |buf| {
        memory::encode(buf, source.memory(), options.memory)
    })
}

pub fn restore_checkpoint<R: Read, T: CheckpointTarget + ?Sized>(
    r: &mut R,
    target: &mut T,
) -> Result<()> {
    check_file_header(r)?;

    let mut seen = Vec::with_capacity(SectionId::REQUIRED.len());
    while let Some((id, version, len)) = next_section(r)? {
        let mut payload = r.take(len);
        if version == SECTION_VERSION {
            match id {
                SectionId::META => target.restore_meta(CheckpointMeta::decode(&mut payload)?),
                SectionId::CORE => target.restore_core_state(CoreState::decode(&mut payload)?),
                SectionId::MEMORY => memory::decode_into(&mut payload, target.memory_mut())?,
                _ => {}
            }
            seen.push(id);
        }
        finish_section(&mut payload)?;
    }

    if let Some(missing) = SectionId::REQUIRED.into_iter().find(|id| !seen.contains(id)) {
        return Err(SnapshotError::MissingSection(missing));
    }
    target.post_restore()
}

/// Reads only the `META` section; used to check a checkpoint's identity before a full restore.
pub fn read_checkpoint_meta<R: Read>(r: &mut R) -> Result<CheckpointMeta> {
    check_file_header(r)?;
    while let Some((id, version, len)) = next_section(r)? {
        let mut payload = r.take(len);
        if id == SectionId::META && version == SECTION_VERSION {
            return CheckpointMeta::decode(&mut payload);
        }
        finish_section(&mut payload)?;
    }
    Err(SnapshotError::MissingSection(SectionId::META))
}

/// Writes `source` into `dir/STATE_FILE_NAME` and syncs it. `dir` must already exist.
pub fn write_checkpoint_dir<S: CheckpointSource + ?Sized>(
    dir: &Path,
    source: &S,
    options: SaveOptions,
) -> Result<PathBuf> {
    let path = dir.join(STATE_FILE_NAME);
    let mut w = BufWriter::new(File::create(&path)?);
    save_checkpoint(&mut w, source, options)?;
    let file = w.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(path)
}

pub fn read_checkpoint_dir<T: CheckpointTarget + ?Sized>(dir: &Path, target: &mut T) -> Result<()> {
    restore_checkpoint(&mut open_state(dir)?, target)
}

pub fn read_checkpoint_dir_meta(dir: &Path) -> Result<CheckpointMeta> {
    read_checkpoint_meta(&mut open_state(dir)?)
}

fn open_state(dir: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(dir.join(STATE_FILE_NAME))?))
}

fn emit_section<W: Write>(
    w: &mut W,
    id: SectionId,
    encode: impl FnOnce(&mut Vec<u8>) -> Result<()>,
) -> Result<()> {
    let mut payload = Vec::new();
    encode(&mut payload)?;
    w.put_u32(id.0)?;
    w.put_u16(SECTION_VERSION)?;
    w.put_u64(payload.len() as u64)?;
    w.write_all(&payload)?;
    Ok(())
}

fn check_file_header<R: Read>(r: &mut R) -> Result<()> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != CHECKPOINT_MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    match r.get_u16()? {
        CHECKPOINT_VERSION => {}
        other => return Err(SnapshotError::UnsupportedVersion(other)),
    }
    match r.get_u8()? {
        LITTLE_ENDIAN_TAG => {}
        other => return Err(SnapshotError::InvalidEndianness(other)),
    }
    r.get_u8()?;
    Ok(())
}

/// Reads the next section frame, or `None` at a clean end of file.
fn next_section<R: Read>(r: &mut R) -> Result<Option<(SectionId, u16, u64)>> {
    let mut id = [0u8; 4];
    let mut filled = 0;
    while filled < id.len() {
        match r.read(&mut id[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let version = r.get_u16()?;
    let len = r.get_u64()?;
    Ok(Some((SectionId(u32::from_le_bytes(id)), version, len)))
}

/// Skips whatever a decoder left unread and fails if the payload was cut short.
fn finish_section<R: Read>(payload: &mut std::io::Take<R>) -> Result<()> {
    std::io::copy(payload, &mut std::io::sink())?;
    if payload.limit() != 0 {
        return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "section payload truncated").into());
    }
    Ok(())
}
