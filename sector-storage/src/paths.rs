use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{format_err, Result};
use serde::{Deserialize, Serialize};

use crate::file_type::SectorFileType;

/// Identifier of a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    pub fn new(id: impl Into<String>) -> Self {
        StorageId(id.into())
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One optional value per artifact kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByFileType<T> {
    pub unsealed: Option<T>,
    pub sealed: Option<T>,
    pub cache: Option<T>,
}

impl<T> Default for ByFileType<T> {
    fn default() -> Self {
        ByFileType {
            unsealed: None,
            sealed: None,
            cache: None,
        }
    }
}

impl<T> ByFileType<T> {
    pub fn get(&self, file_type: SectorFileType) -> Option<&T> {
        match file_type {
            SectorFileType::Unsealed => self.unsealed.as_ref(),
            SectorFileType::Sealed => self.sealed.as_ref(),
            SectorFileType::Cache => self.cache.as_ref(),
        }
    }

    pub fn set(&mut self, file_type: SectorFileType, value: T) {
        let slot = match file_type {
            SectorFileType::Unsealed => &mut self.unsealed,
            SectorFileType::Sealed => &mut self.sealed,
            SectorFileType::Cache => &mut self.cache,
        };
        *slot = Some(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectorFileType, &T)> + '_ {
        SectorFileType::ALL
            .into_iter()
            .filter_map(move |file_type| self.get(file_type).map(|value| (file_type, value)))
    }
}

/// Filesystem paths of the artifacts acquired for a sector. Only valid while the
/// reservation they were acquired with is held.
pub type SectorPaths = ByFileType<PathBuf>;

/// Storage locations holding each acquired artifact.
pub type SectorStorageIds = ByFileType<StorageId>;

impl ByFileType<PathBuf> {
    pub fn path(&self, file_type: SectorFileType) -> Result<&Path> {
        self.get(file_type)
            .map(PathBuf::as_path)
            .ok_or_else(|| format_err!("no {} path was acquired", file_type))
    }
}
