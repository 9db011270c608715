use std::fmt;

pub const CHECKPOINT_MAGIC: &[u8; 8] = b"PFSACKPT";
pub const CHECKPOINT_VERSION: u16 = 1;
pub const LITTLE_ENDIAN_TAG: u8 = 1;

/// Every section is currently written at this version; other versions are skipped on read.
pub const SECTION_VERSION: u16 = 1;

/// File name of the state blob inside a checkpoint directory.
pub const STATE_FILE_NAME: &str = "state.ckpt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

impl SectionId {
    /// Workload identity and progress counters.
    pub const META: SectionId = SectionId(1);
    /// Program counter and register file.
    pub const CORE: SectionId = SectionId(2);
    /// Data memory image.
    pub const MEMORY: SectionId = SectionId(3);

    /// Sections a restore cannot do without.
    pub const REQUIRED: [SectionId; 3] = [Self::META, Self::CORE, Self::MEMORY];
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SectionId::META => f.write_str("META"),
            SectionId::CORE => f.write_str("CORE"),
            SectionId::MEMORY => f.write_str("MEMORY"),
            SectionId(other) => write!(f, "section #{other}"),
        }
    }
}
