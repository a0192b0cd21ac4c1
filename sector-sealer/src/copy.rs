use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{debug, error};
use sector_storage::fsutil::remove_path;

use crate::settings::Settings;

#[derive(Debug, thiserror::Error)]
enum CopyError {
    /// The filesystem cannot clone files, a plain copy has to be made.
    #[error("reflink is not supported: {0}")]
    UnsupportedOperation(#[source] io::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// How the sealed file prefix was produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CopyMethod {
    Reflink,
    Stream,
}

/// Creates `dst` as an exact copy of the first `size` bytes of `src`.
///
/// A copy-on-write clone truncated to `size` is tried first, unless disabled in `settings`.
/// If the filesystem cannot clone, exactly `size` bytes are streamed instead. Any existing
/// `dst` is replaced.
pub fn materialize_sealed_prefix(
    src: &Path,
    dst: &Path,
    size: u64,
    settings: &Settings,
) -> Result<CopyMethod> {
    let src_len = fs::metadata(src)
        .with_context(|| format!("could not stat {:?}", src))?
        .len();
    ensure!(
        src_len >= size,
        "{:?} holds {} bytes, less than the {} bytes to copy",
        src,
        src_len,
        size
    );

    if settings.try_reflink {
        match reflink_prefix(src, dst, size) {
            Ok(()) => {
                debug!("reflinked {:?} -> {:?} ({} bytes)", src, dst, size);
                return Ok(CopyMethod::Reflink);
            }
            Err(CopyError::UnsupportedOperation(err)) => error!(
                "reflink {:?} -> {:?} failed, falling back to slow copy, use a single scratch btrfs or xfs filesystem: {}",
                src, dst, err
            ),
            Err(CopyError::Storage(err)) => return Err(err),
        }
    }

    stream_prefix(src, dst, size, settings.copy_buffer_size)?;
    debug!("copied {:?} -> {:?} ({} bytes)", src, dst, size);

    Ok(CopyMethod::Stream)
}

fn reflink_prefix(src: &Path, dst: &Path, size: u64) -> Result<(), CopyError> {
    remove_path(dst)?;
    reflink_copy::reflink(src, dst).map_err(CopyError::UnsupportedOperation)?;

    // Once cloned, failing to cut off the tree layers is a real error.
    let file = OpenOptions::new()
        .write(true)
        .open(dst)
        .with_context(|| format!("could not open reflinked {:?}", dst))?;
    file.set_len(size)
        .with_context(|| format!("truncating reflinked {:?} to {} bytes", dst, size))?;
    file.sync_all()
        .with_context(|| format!("could not sync {:?}", dst))?;

    Ok(())
}

fn stream_prefix(src: &Path, dst: &Path, size: u64, buffer_size: usize) -> Result<()> {
    let source = File::open(src).with_context(|| format!("could not open {:?}", src))?;
    let dest = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .with_context(|| format!("could not create {:?}", dst))?;

    let mut reader = BufReader::with_capacity(buffer_size, source).take(size);
    let mut writer = BufWriter::with_capacity(buffer_size, dest);
    let copied = io::copy(&mut reader, &mut writer)
        .with_context(|| format!("copying {:?} -> {:?}", src, dst))?;
    ensure!(
        copied == size,
        "copied {} bytes from {:?}, expected {}",
        copied,
        src,
        size
    );

    let dest = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("could not flush {:?}", dst))?;
    dest.sync_all()
        .with_context(|| format!("could not sync {:?}", dst))?;

    Ok(())
}
