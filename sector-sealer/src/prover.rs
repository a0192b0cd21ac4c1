use std::io::Read;
use std::path::Path;

use anyhow::Result;
use log::trace;
use sector_storage::{RegisteredSealProof, SectorId, SectorRef};

use crate::clear::clear_cache_dir;
use crate::tree_d::build_tree_d;
use crate::types::{Commitment, ReplicaId, Seed, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealPreCommitOutput {
    pub comm_r: Commitment,
    pub comm_d: Commitment,
}

/// Everything needed to check a seal proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealVerifyInfo {
    pub proof_type: RegisteredSealProof,
    pub sector: SectorId,
    pub randomness: Ticket,
    pub interactive_randomness: Seed,
    pub proof: Vec<u8>,
    pub comm_r: Commitment,
    pub comm_d: Commitment,
}

/// Entry points of the proving library.
///
/// All calls are blocking and may run for a long time.
pub trait SealProver: Send + Sync {
    /// Generates the layers of the sector key into `cache_path`.
    fn generate_sdr(
        &self,
        proof_type: RegisteredSealProof,
        cache_path: &Path,
        replica_id: &ReplicaId,
    ) -> Result<()>;

    /// Encodes `sealed_path`, which must hold the tree-d prefix, into the sealed replica in
    /// place and builds tree-c and tree-r-last in `cache_path`.
    fn seal_pre_commit_phase2(
        &self,
        phase1_output: &[u8],
        cache_path: &Path,
        sealed_path: &Path,
    ) -> Result<SealPreCommitOutput>;

    fn seal_commit_phase2(&self, vanilla_proof: &[u8], sector: SectorId) -> Result<Vec<u8>>;

    fn verify_seal(&self, info: &SealVerifyInfo) -> Result<bool>;

    /// Discards everything in the cache that is not needed for PoSt.
    fn clear_cache(&self, sector_size: u64, cache_path: &Path) -> Result<()> {
        trace!("clearing cache {:?} of a {} byte sector", cache_path, sector_size);
        clear_cache_dir(cache_path)
    }
}

/// Produces the vanilla proof bundle from the on-disk sealed and cache artifacts.
pub trait VanillaProver: Send + Sync {
    fn generate_porep_vanilla_proof(
        &self,
        sector: &SectorRef,
        comm_r: &Commitment,
        comm_d: &Commitment,
        ticket: &Ticket,
        seed: &Seed,
    ) -> Result<Vec<u8>>;
}

/// Builds the unsealed tree file and returns its root.
pub trait TreeBuilder: Send + Sync {
    fn build_unsealed_tree(
        &self,
        data: &mut dyn Read,
        unpadded: bool,
        dest: &Path,
        size: u64,
    ) -> Result<Commitment>;
}

/// Builds tree-d on disk with SHA-256.
#[derive(Debug, Clone)]
pub struct Sha256TreeBuilder {
    buffer_size: usize,
}

impl Sha256TreeBuilder {
    pub fn new(buffer_size: usize) -> Self {
        Sha256TreeBuilder { buffer_size }
    }
}

impl TreeBuilder for Sha256TreeBuilder {
    fn build_unsealed_tree(
        &self,
        data: &mut dyn Read,
        unpadded: bool,
        dest: &Path,
        size: u64,
    ) -> Result<Commitment> {
        build_tree_d(data, unpadded, dest, size, self.buffer_size)
    }
}
