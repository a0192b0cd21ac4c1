use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use walkdir::WalkDir;

/// Moves a file or directory, falling back to copy + remove when a rename is not possible
/// (e.g. across filesystems).
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(err) => debug!("rename {:?} -> {:?} failed ({}), copying instead", from, to, err),
    }

    if from.is_dir() {
        copy_dir(from, to)?;
        fs::remove_dir_all(from).with_context(|| format!("removing {:?} after copy", from))?;
    } else {
        fs::copy(from, to).with_context(|| format!("copying {:?} -> {:?}", from, to))?;
        fs::remove_file(from).with_context(|| format!("removing {:?} after copy", from))?;
    }

    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.with_context(|| format!("walking {:?}", from))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("{:?} is not below {:?}", entry.path(), from))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("creating {:?}", target))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {:?} -> {:?}", entry.path(), target))?;
        }
    }

    Ok(())
}

/// Removes a file or a directory tree. A path that does not exist is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {:?}", path)),
    }
}

/// Total size of all regular files below `path`.
pub fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("walking {:?}", path))?;
        if entry.file_type().is_file() {
            total += entry
                .metadata()
                .with_context(|| format!("reading metadata of {:?}", entry.path()))?
                .len();
        }
    }

    Ok(total)
}
