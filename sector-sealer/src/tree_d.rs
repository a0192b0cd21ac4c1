use std::cmp::max;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{debug, trace, warn};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::fr32::Fr32Reader;
use crate::types::Commitment;

pub const NODE_SIZE: usize = 32;

/// Hashes two sibling nodes into their parent, trimmed to a valid field element.
pub fn hash_pair(left: &[u8], right: &[u8]) -> [u8; NODE_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);

    let mut parent: [u8; NODE_SIZE] = hasher.finalize().into();
    parent[NODE_SIZE - 1] &= 0b0011_1111;
    parent
}

/// Removes a tree file unless it was written completely.
struct PartialFile<'a> {
    path: &'a Path,
    complete: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        PartialFile {
            path,
            complete: false,
        }
    }

    fn complete(mut self) {
        self.complete = true;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.complete {
            return;
        }
        match fs::remove_file(self.path) {
            Ok(()) => debug!("removed partial tree file {:?}", self.path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove partial tree file {:?}: {}", self.path, err),
        }
    }
}

/// Writes the unsealed binary tree over `size` bytes of padded data to `out_path` and returns
/// its root.
///
/// The file holds the leaf layer followed by every parent layer up to the root, so it is
/// `2 * size - 32` bytes long. With `unpadded` set the data is fr32 padded on the fly. Missing
/// data is zero filled. On failure the partially written file is removed.
pub fn build_tree_d<R: Read>(
    data: R,
    unpadded: bool,
    out_path: &Path,
    size: u64,
    buffer_size: usize,
) -> Result<Commitment> {
    ensure!(
        size.is_power_of_two() && size >= 2 * NODE_SIZE as u64,
        "tree-d size must be a power of two of at least {} bytes, got {}",
        2 * NODE_SIZE,
        size
    );

    let partial = PartialFile::new(out_path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_path)
        .with_context(|| format!("could not create tree-d file {:?}", out_path))?;
    let mut writer = BufWriter::with_capacity(buffer_size, &file);

    let leaves = if unpadded {
        io::copy(&mut Fr32Reader::new(data).take(size + 1), &mut writer)
    } else {
        io::copy(&mut data.take(size + 1), &mut writer)
    }
    .context("writing tree-d leaves")?;
    ensure!(
        leaves <= size,
        "data does not fit in a tree of {} padded bytes",
        size
    );
    io::copy(&mut io::repeat(0).take(size - leaves), &mut writer)?;
    writer.flush()?;
    trace!("tree-d leaves written: {} data bytes", leaves);

    let mut reader = BufReader::with_capacity(
        buffer_size,
        File::open(out_path).with_context(|| format!("could not open {:?}", out_path))?,
    );
    let chunk_len = max(buffer_size / (2 * NODE_SIZE), 1) * 2 * NODE_SIZE;
    let mut chunk = vec![0u8; chunk_len];

    let mut root = [0u8; NODE_SIZE];
    let mut level_start = 0;
    let mut level_len = size;
    while level_len > NODE_SIZE as u64 {
        reader.seek(SeekFrom::Start(level_start))?;

        let mut remaining = level_len;
        while remaining > 0 {
            let n = std::cmp::min(chunk_len as u64, remaining) as usize;
            reader.read_exact(&mut chunk[..n])?;

            let parents: Vec<[u8; NODE_SIZE]> = chunk[..n]
                .par_chunks(2 * NODE_SIZE)
                .map(|pair| hash_pair(&pair[..NODE_SIZE], &pair[NODE_SIZE..]))
                .collect();
            for parent in &parents {
                writer.write_all(parent)?;
            }
            if let Some(last) = parents.last() {
                root = *last;
            }

            remaining -= n as u64;
        }
        writer.flush()?;

        level_start += level_len;
        level_len /= 2;
    }

    drop(writer);
    file.sync_all()
        .with_context(|| format!("could not sync {:?}", out_path))?;
    partial.complete();
    debug!("built tree-d {:?}: comm_d {}", out_path, hex::encode(root));

    Ok(root)
}
