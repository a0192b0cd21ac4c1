use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::file_type::SectorFileType;
use crate::paths::StorageId;
use crate::sector::SectorId;

/// Capabilities of a storage location as known to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub id: StorageId,
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
}

/// A location holding a copy of a sector artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorStorageInfo {
    pub id: StorageId,
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
    /// Whether this copy is the authoritative one.
    pub primary: bool,
}

/// Tracks which storage locations hold which sector artifacts.
pub trait SectorIndex: Send + Sync {
    fn attach_storage(&self, info: StorageInfo) -> Result<()>;

    fn storage_info(&self, id: &StorageId) -> Result<StorageInfo>;

    /// Records that `storage` holds the `file_type` artifact of `sector`. Declaring an already
    /// declared artifact is a no-op apart from upgrading it to primary.
    fn declare_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
        primary: bool,
    ) -> Result<()>;

    fn drop_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<()>;

    fn find_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<Vec<SectorStorageInfo>>;
}

#[derive(Debug, Clone)]
struct Declaration {
    storage: StorageId,
    primary: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    stores: BTreeMap<StorageId, StorageInfo>,
    sectors: HashMap<(SectorId, SectorFileType), Vec<Declaration>>,
}

/// A process-local index.
#[derive(Debug, Default)]
pub struct MemIndex {
    state: Mutex<IndexState>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, IndexState>> {
        self.state.lock().map_err(|_| StorageError::Poisoned.into())
    }
}

impl SectorIndex for MemIndex {
    fn attach_storage(&self, info: StorageInfo) -> Result<()> {
        let mut state = self.state()?;
        if state.stores.contains_key(&info.id) {
            return Err(StorageError::AlreadyAttached(info.id).into());
        }
        trace!("attached storage {:?}", info);
        state.stores.insert(info.id.clone(), info);

        Ok(())
    }

    fn storage_info(&self, id: &StorageId) -> Result<StorageInfo> {
        self.state()?
            .stores
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::UnknownStorage(id.clone()).into())
    }

    fn declare_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
        primary: bool,
    ) -> Result<()> {
        let mut state = self.state()?;
        if !state.stores.contains_key(storage) {
            return Err(StorageError::UnknownStorage(storage.clone()).into());
        }

        let declarations = state.sectors.entry((sector, file_type)).or_default();
        match declarations.iter_mut().find(|decl| &decl.storage == storage) {
            Some(existing) => existing.primary |= primary,
            None => declarations.push(Declaration {
                storage: storage.clone(),
                primary,
            }),
        }
        trace!(
            "declared {} of {} in {} (primary: {})",
            file_type,
            sector,
            storage,
            primary
        );

        Ok(())
    }

    fn drop_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<()> {
        let mut state = self.state()?;
        if let Some(declarations) = state.sectors.get_mut(&(sector, file_type)) {
            declarations.retain(|decl| &decl.storage != storage);
            if declarations.is_empty() {
                state.sectors.remove(&(sector, file_type));
            }
        }
        trace!("dropped {} of {} from {}", file_type, sector, storage);

        Ok(())
    }

    fn find_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<Vec<SectorStorageInfo>> {
        let state = self.state()?;
        let found = state
            .sectors
            .get(&(sector, file_type))
            .map(|declarations| {
                declarations
                    .iter()
                    .filter_map(|decl| {
                        state.stores.get(&decl.storage).map(|info| SectorStorageInfo {
                            id: info.id.clone(),
                            weight: info.weight,
                            can_seal: info.can_seal,
                            can_store: info.can_store,
                            primary: decl.primary,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(found)
    }
}
