use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{ensure, format_err, Context, Result};
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::file_type::{FileTypes, OverheadClass, PathType, SectorFileType};
use crate::fsutil::{dir_size, move_path, remove_path};
use crate::index::{SectorIndex, StorageInfo};
use crate::paths::{SectorPaths, SectorStorageIds, StorageId};
use crate::reservation::Reservation;
use crate::sector::{parse_sector_name, sector_name, SectorId, SectorRef};
use crate::store::{LocalStorage, SectorStore, StoragePath};

/// Metadata file stored in the root of every attached storage location.
pub const METADATA_FILE: &str = "sectorstore.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalStorageMeta {
    #[serde(rename = "ID")]
    pub id: StorageId,
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
    /// Upper bound on the bytes used below the root, 0 for no limit beyond the filesystem.
    #[serde(default)]
    pub max_storage: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub capacity: u64,
    /// Free bytes not yet claimed by a reservation.
    pub available: u64,
    pub reserved: u64,
}

#[derive(Debug, Clone)]
struct LocalPath {
    meta: LocalStorageMeta,
    root: PathBuf,
}

impl LocalPath {
    fn sector_path(&self, file_type: SectorFileType, sector: SectorId) -> PathBuf {
        self.root
            .join(file_type.dir_name())
            .join(sector_name(sector))
    }

    fn can_hold(&self, path_type: PathType) -> bool {
        match path_type {
            PathType::Sealing => self.meta.can_seal,
            PathType::Storage => self.meta.can_store,
        }
    }

    fn stat(&self, reserved: u64) -> Result<FsStat> {
        let fs_available = fs2::available_space(&self.root)
            .with_context(|| format!("reading free space of {:?}", self.root))?;

        let (capacity, available) = if self.meta.max_storage > 0 {
            let used = dir_size(&self.root)?;
            (
                self.meta.max_storage,
                fs_available.min(self.meta.max_storage.saturating_sub(used)),
            )
        } else {
            let total = fs2::total_space(&self.root)
                .with_context(|| format!("reading capacity of {:?}", self.root))?;
            (total, fs_available)
        };

        Ok(FsStat {
            capacity,
            available: available.saturating_sub(reserved),
            reserved,
        })
    }
}

type Reservations = Arc<Mutex<HashMap<StorageId, u64>>>;

/// Storage locations on local directories, with in-process capacity reservations.
///
/// Every root contains `unsealed/`, `sealed/` and `cache/` directories and a
/// [`METADATA_FILE`]. Sector artifacts are named after [`sector_name`].
pub struct LocalStore {
    index: Arc<dyn SectorIndex>,
    paths: Mutex<BTreeMap<StorageId, LocalPath>>,
    reserved: Reservations,
}

impl LocalStore {
    pub fn new(index: Arc<dyn SectorIndex>) -> Self {
        LocalStore {
            index,
            paths: Mutex::new(BTreeMap::new()),
            reserved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Initializes `root` as a new storage location and attaches it.
    pub fn attach(&self, root: impl AsRef<Path>, meta: LocalStorageMeta) -> Result<StorageId> {
        let root = root.as_ref();
        fs::create_dir_all(root).with_context(|| format!("creating storage root {:?}", root))?;

        let meta_path = root.join(METADATA_FILE);
        ensure!(
            !meta_path.exists(),
            "storage root {:?} is already initialized",
            root
        );
        fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)
            .with_context(|| format!("writing {:?}", meta_path))?;

        self.open_path(root)
    }

    /// Attaches an initialized storage root and declares the sector artifacts found in it.
    pub fn open_path(&self, root: impl AsRef<Path>) -> Result<StorageId> {
        let root = root.as_ref();
        let meta_path = root.join(METADATA_FILE);
        let meta: LocalStorageMeta = serde_json::from_slice(
            &fs::read(&meta_path).with_context(|| format!("reading {:?}", meta_path))?,
        )
        .with_context(|| format!("parsing {:?}", meta_path))?;

        let mut paths = self.paths()?;
        if paths.contains_key(&meta.id) {
            return Err(StorageError::AlreadyAttached(meta.id).into());
        }

        self.index.attach_storage(StorageInfo {
            id: meta.id.clone(),
            weight: meta.weight,
            can_seal: meta.can_seal,
            can_store: meta.can_store,
        })?;

        for file_type in SectorFileType::ALL {
            let dir = root.join(file_type.dir_name());
            fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;

            for entry in fs::read_dir(&dir).with_context(|| format!("listing {:?}", dir))? {
                let entry = entry.with_context(|| format!("listing {:?}", dir))?;
                let name = entry.file_name();
                let parsed = name
                    .to_str()
                    .ok_or_else(|| format_err!("non utf-8 file name"))
                    .and_then(parse_sector_name);
                match parsed {
                    Ok(sector) => {
                        self.index
                            .declare_sector(&meta.id, sector, file_type, meta.can_store)?;
                    }
                    Err(err) => warn!("skipping {:?}: {}", entry.path(), err),
                }
            }
        }

        info!(
            "attached storage {} at {:?} (seal: {}, store: {})",
            meta.id, root, meta.can_seal, meta.can_store
        );
        let id = meta.id.clone();
        paths.insert(
            id.clone(),
            LocalPath {
                meta,
                root: root.to_path_buf(),
            },
        );

        Ok(id)
    }

    pub fn stat(&self, id: &StorageId) -> Result<FsStat> {
        let paths = self.paths()?;
        let path = paths
            .get(id)
            .ok_or_else(|| StorageError::UnknownStorage(id.clone()))?;
        let reserved = self.reserved(id)?;

        path.stat(reserved)
    }

    /// Bytes currently reserved on a location.
    pub fn reserved(&self, id: &StorageId) -> Result<u64> {
        Ok(self.reservations()?.get(id).copied().unwrap_or(0))
    }

    fn paths(&self) -> Result<MutexGuard<'_, BTreeMap<StorageId, LocalPath>>> {
        self.paths.lock().map_err(|_| StorageError::Poisoned.into())
    }

    fn reservations(&self) -> Result<MutexGuard<'_, HashMap<StorageId, u64>>> {
        self.reserved.lock().map_err(|_| StorageError::Poisoned.into())
    }

    /// Picks the heaviest location of the given type with room for the artifact.
    /// Must be called with the paths lock held.
    fn best_alloc(
        &self,
        paths: &BTreeMap<StorageId, LocalPath>,
        sector: &SectorRef,
        file_type: SectorFileType,
        path_type: PathType,
    ) -> Result<StorageId> {
        let overhead = match path_type {
            PathType::Sealing => OverheadClass::Seal,
            PathType::Storage => OverheadClass::Finalized,
        };
        let needed = overhead.space_use(file_type, sector.sector_size());
        let reserved = self.reservations()?;

        let mut best: Option<(u64, u64, &StorageId)> = None;
        for (id, path) in paths.iter().filter(|(_, path)| path.can_hold(path_type)) {
            let stat = match path.stat(reserved.get(id).copied().unwrap_or(0)) {
                Ok(stat) => stat,
                Err(err) => {
                    warn!("skipping storage {}: {:#}", id, err);
                    continue;
                }
            };
            if stat.available < needed {
                trace!(
                    "storage {} has {} bytes available, {} needs {}",
                    id,
                    stat.available,
                    file_type,
                    needed
                );
                continue;
            }

            let candidate = (path.meta.weight, stat.available, id);
            if best.map_or(true, |(weight, available, _)| {
                (candidate.0, candidate.1) > (weight, available)
            }) {
                best = Some(candidate);
            }
        }

        best.map(|(_, _, id)| id.clone()).ok_or_else(|| {
            StorageError::NoSuitableStorage {
                sector: sector.id,
                file_type,
                path_type,
            }
            .into()
        })
    }

    /// The local location holding an artifact, if the index knows one and it exists on disk.
    fn find_local(
        &self,
        paths: &BTreeMap<StorageId, LocalPath>,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<Option<(StorageId, LocalPath)>> {
        let found = self.index.find_sector(sector, file_type)?;

        Ok(found.iter().find_map(|info| {
            let path = paths.get(&info.id)?;
            if path.sector_path(file_type, sector).exists() {
                Some((info.id.clone(), path.clone()))
            } else {
                warn!(
                    "index lists {} of {} in {}, but it is not on disk",
                    file_type, sector, info.id
                );
                None
            }
        }))
    }
}

impl SectorStore for LocalStore {
    fn acquire_sector(
        &self,
        sector: &SectorRef,
        existing: FileTypes,
        allocate: FileTypes,
        path_type: PathType,
    ) -> Result<(SectorPaths, SectorStorageIds)> {
        let overlap = existing & allocate;
        if !overlap.is_empty() {
            return Err(StorageError::Overlap(overlap).into());
        }

        let paths = self.paths()?;
        let mut sector_paths = SectorPaths::default();
        let mut storage_ids = SectorStorageIds::default();

        for file_type in existing.iter() {
            let (id, path) = self
                .find_local(&paths, sector.id, file_type)?
                .ok_or(StorageError::NotFound {
                    sector: sector.id,
                    file_type,
                })?;
            sector_paths.set(file_type, path.sector_path(file_type, sector.id));
            storage_ids.set(file_type, id);
        }

        for file_type in allocate.iter() {
            let id = self.best_alloc(&paths, sector, file_type, path_type)?;
            sector_paths.set(file_type, paths[&id].sector_path(file_type, sector.id));
            storage_ids.set(file_type, id);
        }

        trace!(
            "acquired {} (existing: {:?}, allocate: {:?}, {}): {:?}",
            sector,
            existing,
            allocate,
            path_type,
            sector_paths
        );

        Ok((sector_paths, storage_ids))
    }

    fn move_storage(&self, sector: &SectorRef, file_types: FileTypes) -> Result<()> {
        for file_type in file_types.iter() {
            // Resolve source and destination under the lock, move without it.
            let (src_id, src, dest) = {
                let paths = self.paths()?;
                let (src_id, src) = self
                    .find_local(&paths, sector.id, file_type)?
                    .ok_or(StorageError::NotFound {
                        sector: sector.id,
                        file_type,
                    })?;
                let dest = if src.meta.can_store {
                    None
                } else {
                    let dest_id = self.best_alloc(&paths, sector, file_type, PathType::Storage)?;
                    let dest = paths[&dest_id].clone();
                    Some((dest_id, dest))
                };
                (src_id, src, dest)
            };

            let (dest_id, dest) = match dest {
                Some(dest) => dest,
                None => {
                    debug!(
                        "{} of {} is already on long-term storage {}",
                        file_type, sector.id, src_id
                    );
                    self.index
                        .declare_sector(&src_id, sector.id, file_type, true)?;
                    continue;
                }
            };

            let from = src.sector_path(file_type, sector.id);
            let to = dest.sector_path(file_type, sector.id);
            info!(
                "moving {} of {} from {} to {}: {:?} -> {:?}",
                file_type, sector.id, src_id, dest_id, from, to
            );
            remove_path(&to)?;
            move_path(&from, &to)
                .with_context(|| format!("moving {} of {}", file_type, sector.id))?;

            self.index.drop_sector(&src_id, sector.id, file_type)?;
            self.index
                .declare_sector(&dest_id, sector.id, file_type, true)?;
        }

        Ok(())
    }

    fn remove_copies(&self, sector: SectorId, file_type: SectorFileType) -> Result<()> {
        let found = self.index.find_sector(sector, file_type)?;
        if !found.iter().any(|info| info.primary && info.can_store) {
            warn!(
                "no primary copy of {} of {} on long-term storage, keeping all copies",
                file_type, sector
            );
            return Ok(());
        }

        let copies: Vec<(StorageId, PathBuf)> = {
            let paths = self.paths()?;
            found
                .iter()
                .filter(|info| !info.primary)
                .filter_map(|info| {
                    paths
                        .get(&info.id)
                        .map(|path| (info.id.clone(), path.sector_path(file_type, sector)))
                })
                .collect()
        };

        for (id, path) in copies {
            info!("removing copy of {} of {} in {}", file_type, sector, id);
            remove_path(&path)?;
            self.index.drop_sector(&id, sector, file_type)?;
        }

        Ok(())
    }
}

impl LocalStorage for LocalStore {
    fn reserve(
        &self,
        sector: &SectorRef,
        file_types: FileTypes,
        storage_ids: &SectorStorageIds,
        overhead: OverheadClass,
    ) -> Result<Reservation> {
        let sector_size = sector.sector_size();

        let mut wanted: BTreeMap<StorageId, u64> = BTreeMap::new();
        for file_type in file_types.iter() {
            let id = storage_ids.get(file_type).ok_or_else(|| {
                format_err!("no storage was acquired for {} of {}", file_type, sector.id)
            })?;
            *wanted.entry(id.clone()).or_default() += overhead.space_use(file_type, sector_size);
        }
        if wanted.is_empty() {
            return Ok(Reservation::empty());
        }

        {
            let paths = self.paths()?;
            let mut reserved = self.reservations()?;

            for (id, needed) in &wanted {
                let path = paths
                    .get(id)
                    .ok_or_else(|| StorageError::UnknownStorage(id.clone()))?;
                let stat = path.stat(reserved.get(id).copied().unwrap_or(0))?;
                if stat.available < *needed {
                    return Err(StorageError::InsufficientSpace {
                        storage: id.clone(),
                        needed: *needed,
                        available: stat.available,
                    }
                    .into());
                }
            }

            for (id, needed) in &wanted {
                *reserved.entry(id.clone()).or_default() += *needed;
            }
        }
        debug!("reserved {:?} for {}", wanted, sector.id);

        let reservations = Arc::clone(&self.reserved);
        let sector_id = sector.id;
        Ok(Reservation::new(move || match reservations.lock() {
            Ok(mut reserved) => {
                for (id, needed) in wanted {
                    if let Some(held) = reserved.get_mut(&id) {
                        *held = held.saturating_sub(needed);
                        if *held == 0 {
                            reserved.remove(&id);
                        }
                    }
                }
                trace!("released reservation of {}", sector_id);
            }
            Err(_) => error!(
                "reservation lock poisoned, space held for {} was not returned",
                sector_id
            ),
        }))
    }

    fn local(&self) -> Result<Vec<StoragePath>> {
        Ok(self
            .paths()?
            .values()
            .map(|path| StoragePath {
                id: path.meta.id.clone(),
                weight: path.meta.weight,
                local_path: path.root.clone(),
                can_seal: path.meta.can_seal,
                can_store: path.meta.can_store,
            })
            .collect())
    }
}
