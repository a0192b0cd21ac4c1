use std::fmt;
use std::fs;
use std::sync::Arc;

use anyhow::{ensure, format_err, Context, Result};
use log::{debug, error, trace};
use sector_storage::{
    FileTypes, LocalStorage, OverheadClass, PathType, Reservation, SectorFileType, SectorIndex,
    SectorPaths, SectorRef, SectorStorageIds, SectorStore,
};

/// Sector scoped access to storage: path acquisition together with a capacity reservation.
pub struct StorageProvider {
    storage: Arc<dyn SectorStore>,
    local_store: Arc<dyn LocalStorage>,
    index: Arc<dyn SectorIndex>,
}

impl StorageProvider {
    pub fn new(
        storage: Arc<dyn SectorStore>,
        local_store: Arc<dyn LocalStorage>,
        index: Arc<dyn SectorIndex>,
    ) -> Self {
        StorageProvider {
            storage,
            local_store,
            index,
        }
    }

    /// Resolves `existing` artifacts and allocates `allocate` ones, reserving the worst case
    /// sealing footprint for the allocated kinds. An allocated cache directory is created once
    /// the space is reserved.
    pub fn acquire_sector(
        &self,
        sector: &SectorRef,
        existing: FileTypes,
        allocate: FileTypes,
        path_type: PathType,
    ) -> Result<AcquiredSector> {
        let (paths, storage_ids) = self
            .storage
            .acquire_sector(sector, existing, allocate, path_type)?;

        let reservation = self
            .local_store
            .reserve(sector, allocate, &storage_ids, OverheadClass::Seal)
            .context("reserving storage space")?;

        if allocate.contains(SectorFileType::Cache) {
            let cache = paths.path(SectorFileType::Cache)?;
            fs::create_dir_all(cache)
                .with_context(|| format!("creating cache directory {:?}", cache))?;
        }

        debug!(
            "acquired sector {} (e: {:?}; a: {:?}): {:?}",
            sector.id, existing, allocate, paths
        );

        Ok(AcquiredSector {
            sector: *sector,
            paths,
            storage_ids,
            allocate,
            reservation: Some(reservation),
            index: Arc::clone(&self.index),
            declared: FileTypes::empty(),
            committed: false,
        })
    }

    pub fn storage(&self) -> &dyn SectorStore {
        self.storage.as_ref()
    }

    pub fn local_store(&self) -> &dyn LocalStorage {
        self.local_store.as_ref()
    }

    pub fn index(&self) -> &dyn SectorIndex {
        self.index.as_ref()
    }
}

/// Paths of a sector held for the duration of one stage.
///
/// Dropping it gives the reserved capacity back. If the stage called [`commit`], the
/// allocated artifacts not yet passed to [`declare`] are then declared into the index. A
/// failed declaration on drop is logged and does not stop the remaining ones.
///
/// [`commit`]: AcquiredSector::commit
/// [`declare`]: AcquiredSector::declare
pub struct AcquiredSector {
    sector: SectorRef,
    paths: SectorPaths,
    storage_ids: SectorStorageIds,
    allocate: FileTypes,
    reservation: Option<Reservation>,
    index: Arc<dyn SectorIndex>,
    declared: FileTypes,
    committed: bool,
}

impl AcquiredSector {
    pub fn paths(&self) -> &SectorPaths {
        &self.paths
    }

    pub fn storage_ids(&self) -> &SectorStorageIds {
        &self.storage_ids
    }

    /// Marks the allocated artifacts as complete.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    /// Declares one allocated artifact right away, for artifacts that are complete before the
    /// rest of the stage is. It stays declared whatever happens to the stage afterwards.
    pub fn declare(&mut self, file_type: SectorFileType) -> Result<()> {
        ensure!(
            self.allocate.contains(file_type),
            "{} of {} was not allocated",
            file_type,
            self.sector.id
        );
        let storage = self.storage_ids.get(file_type).ok_or_else(|| {
            format_err!("no storage was acquired for {} of {}", file_type, self.sector.id)
        })?;

        self.index
            .declare_sector(storage, self.sector.id, file_type, true)
            .with_context(|| {
                format!("declaring {} of {} in {}", file_type, self.sector.id, storage)
            })?;
        self.declared |= file_type;
        trace!("declared {} of {} in {}", file_type, self.sector.id, storage);

        Ok(())
    }
}

impl fmt::Debug for AcquiredSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredSector")
            .field("sector", &self.sector)
            .field("paths", &self.paths)
            .field("storage_ids", &self.storage_ids)
            .field("allocate", &self.allocate)
            .field("reservation", &self.reservation)
            .field("declared", &self.declared)
            .field("committed", &self.committed)
            .finish()
    }
}

impl Drop for AcquiredSector {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            reservation.release();
        }

        let pending: FileTypes = self
            .allocate
            .iter()
            .filter(|file_type| !self.declared.contains(*file_type))
            .collect();

        if !self.committed {
            if !pending.is_empty() {
                debug!(
                    "not declaring {:?} of {}: stage did not complete",
                    pending, self.sector.id
                );
            }
            return;
        }

        for file_type in pending.iter() {
            let storage = match self.storage_ids.get(file_type) {
                Some(storage) => storage,
                None => {
                    error!(
                        "declare sector {} ({}): no storage was acquired",
                        self.sector.id, file_type
                    );
                    continue;
                }
            };

            match self
                .index
                .declare_sector(storage, self.sector.id, file_type, true)
            {
                Ok(()) => trace!("declared {} of {} in {}", file_type, self.sector.id, storage),
                Err(err) => error!(
                    "declare sector {} ({}) in {} error: {:?}",
                    self.sector.id, file_type, storage, err
                ),
            }
        }
    }
}
