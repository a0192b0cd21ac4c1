use crate::file_type::{FileTypes, PathType, SectorFileType};
use crate::paths::StorageId;
use crate::sector::SectorId;

pub use anyhow::Result;

/// Storage failures callers may want to tell apart.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{file_type} artifact of sector {sector} not found in any attached storage")]
    NotFound {
        sector: SectorId,
        file_type: SectorFileType,
    },
    #[error("not enough space in storage {storage}: need {needed} bytes, {available} available")]
    InsufficientSpace {
        storage: StorageId,
        needed: u64,
        available: u64,
    },
    #[error("storage {0} is already attached")]
    AlreadyAttached(StorageId),
    #[error("unknown storage {0}")]
    UnknownStorage(StorageId),
    #[error("no {path_type} storage can hold the {file_type} artifact of sector {sector}")]
    NoSuitableStorage {
        sector: SectorId,
        file_type: SectorFileType,
        path_type: PathType,
    },
    #[error("artifact kinds {0:?} requested as both existing and allocated")]
    Overlap(FileTypes),
    #[error("storage lock poisoned")]
    Poisoned,
}
