use std::fmt::{self, Display, Formatter};

use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};

/// The kinds of on-disk artifacts a sector has.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectorFileType {
    Unsealed = 0b001,
    Sealed = 0b010,
    Cache = 0b100,
}

/// A set of artifact kinds. Iterates in `Unsealed`, `Sealed`, `Cache` order.
pub type FileTypes = BitFlags<SectorFileType>;

impl SectorFileType {
    pub const ALL: [SectorFileType; 3] = [
        SectorFileType::Unsealed,
        SectorFileType::Sealed,
        SectorFileType::Cache,
    ];

    /// Directory under a storage root holding artifacts of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            SectorFileType::Unsealed => "unsealed",
            SectorFileType::Sealed => "sealed",
            SectorFileType::Cache => "cache",
        }
    }
}

impl Display for SectorFileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// What a storage location is used for when picking where to put a new artifact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    Sealing,
    Storage,
}

impl Display for PathType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathType::Sealing => f.write_str("sealing"),
            PathType::Storage => f.write_str("storage"),
        }
    }
}

pub const FS_OVERHEAD_DEN: u64 = 10;

/// Worst-case disk use of each artifact kind, in tenths of the sector size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OverheadClass {
    /// While sealing: 11 layers, tree-d, tree-c and tree-r-last live in the cache.
    Seal,
    /// After finalization only tree-r-last and the aux files remain in the cache.
    Finalized,
}

impl OverheadClass {
    pub fn numerator(self, file_type: SectorFileType) -> u64 {
        match (self, file_type) {
            (_, SectorFileType::Unsealed) | (_, SectorFileType::Sealed) => FS_OVERHEAD_DEN,
            (OverheadClass::Seal, SectorFileType::Cache) => 141,
            (OverheadClass::Finalized, SectorFileType::Cache) => 2,
        }
    }

    pub fn space_use(self, file_type: SectorFileType, sector_size: u64) -> u64 {
        sector_size * self.numerator(file_type) / FS_OVERHEAD_DEN
    }

    pub fn total_space_use(self, file_types: FileTypes, sector_size: u64) -> u64 {
        file_types
            .iter()
            .map(|file_type| self.space_use(file_type, sector_size))
            .sum()
    }
}
