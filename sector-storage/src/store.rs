use std::path::PathBuf;

use anyhow::Result;

use crate::file_type::{FileTypes, OverheadClass, PathType, SectorFileType};
use crate::paths::{SectorPaths, SectorStorageIds, StorageId};
use crate::reservation::Reservation;
use crate::sector::{SectorId, SectorRef};

/// Resolves and moves sector artifacts between storage locations.
pub trait SectorStore: Send + Sync {
    /// Resolves paths for a sector.
    ///
    /// `existing` kinds must already be declared in the index, otherwise this fails with
    /// [`StorageError::NotFound`](crate::error::StorageError::NotFound). `allocate` kinds get a
    /// fresh path on a location chosen for `path_type`. Nothing is created on disk for them.
    fn acquire_sector(
        &self,
        sector: &SectorRef,
        existing: FileTypes,
        allocate: FileTypes,
        path_type: PathType,
    ) -> Result<(SectorPaths, SectorStorageIds)>;

    /// Moves the given artifacts to long-term storage.
    fn move_storage(&self, sector: &SectorRef, file_types: FileTypes) -> Result<()>;

    /// Removes every non-primary copy of an artifact once a primary copy exists on a
    /// storage-capable location.
    fn remove_copies(&self, sector: SectorId, file_type: SectorFileType) -> Result<()>;
}

/// A storage root attached to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub id: StorageId,
    pub weight: u64,
    pub local_path: PathBuf,
    pub can_seal: bool,
    pub can_store: bool,
}

/// Capacity accounting for the storage attached to this node.
pub trait LocalStorage: Send + Sync {
    /// Reserves space for `file_types` on the locations in `storage_ids`. The space is given
    /// back when the returned reservation is released or dropped.
    fn reserve(
        &self,
        sector: &SectorRef,
        file_types: FileTypes,
        storage_ids: &SectorStorageIds,
        overhead: OverheadClass,
    ) -> Result<Reservation>;

    fn local(&self) -> Result<Vec<StoragePath>>;
}
