use std::fs;
use std::path::Path;

use anyhow::{format_err, Context, Result};
use log::trace;

use crate::cache_key::{store_data_file_name, CacheKey, LABEL_LAYER_KEY};

/// Removes all files in `dir` whose name matches `file_pattern`.
fn remove_files_with_glob(dir: &Path, file_pattern: &str) -> Result<()> {
    let dir_str = dir
        .to_str()
        .ok_or_else(|| format_err!("cache path {:?} is not valid UTF-8", dir))?;
    let pattern = format!("{}/{}", glob::Pattern::escape(dir_str), file_pattern);

    let globs = glob::glob(&pattern).with_context(|| format!("invalid glob {:?}", pattern))?;
    for maybe_path in globs {
        let path = maybe_path?;
        fs::remove_file(&path).with_context(|| format!("Failed to delete {:?}", &path))?
    }
    Ok(())
}

/// Discards all persisted merkle and layer data that is not needed for PoSt.
///
/// `tree-r-last` and the aux files stay.
pub fn clear_cache_dir(cache_path: &Path) -> Result<()> {
    let tree_d_path = CacheKey::CommDTree.path(cache_path);
    if tree_d_path.exists() {
        fs::remove_file(&tree_d_path)
            .with_context(|| format!("Failed to delete {:?}", &tree_d_path))?;
        trace!("tree d deleted");
    }

    // TreeC might be split into several sub-trees with a numeric suffix.
    remove_files_with_glob(
        cache_path,
        &store_data_file_name(&format!("{}*", CacheKey::CommCTree)),
    )?;
    trace!("tree c deleted");

    remove_files_with_glob(
        cache_path,
        &store_data_file_name(&format!("{}*", LABEL_LAYER_KEY)),
    )?;
    trace!("layers deleted");

    Ok(())
}
