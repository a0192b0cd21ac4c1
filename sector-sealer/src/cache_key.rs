use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

/// On-disk format version of persisted tree and layer stores.
pub const STORE_VERSION: u32 = 2;

pub const LABEL_LAYER_KEY: &str = "layer";

/// Names of the files the proving library keeps in a sector's cache directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheKey {
    PAux,
    TAux,
    CommDTree,
    CommCTree,
    CommRLastTree,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            CacheKey::PAux => write!(f, "p_aux"),
            CacheKey::TAux => write!(f, "t_aux"),
            CacheKey::CommDTree => write!(f, "tree-d"),
            CacheKey::CommCTree => write!(f, "tree-c"),
            CacheKey::CommRLastTree => write!(f, "tree-r-last"),
        }
    }
}

impl CacheKey {
    pub fn label_layer(layer: usize) -> String {
        format!("{}-{}", LABEL_LAYER_KEY, layer)
    }

    /// Path of this key's store inside `cache_dir`. The aux files are stored under their bare
    /// name, trees under the versioned store file name.
    pub fn path(self, cache_dir: &Path) -> PathBuf {
        match self {
            CacheKey::PAux | CacheKey::TAux => cache_dir.join(self.to_string()),
            _ => store_data_path(cache_dir, &self.to_string()),
        }
    }
}

/// File name of the persisted store with the given id, e.g. `sc-02-data-tree-d.dat`.
pub fn store_data_file_name(id: &str) -> String {
    format!("sc-{:0>2}-data-{}.dat", STORE_VERSION, id)
}

pub fn store_data_path(cache_dir: &Path, id: &str) -> PathBuf {
    cache_dir.join(store_data_file_name(id))
}
