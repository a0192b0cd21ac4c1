use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{format_err, Context};
use log::{debug, info, warn};
use sector_storage::fsutil::move_path;
use sector_storage::sector::sector_name;
use sector_storage::{
    FileTypes, LocalStorage, PathType, SectorFileType, SectorId, SectorIndex, SectorRef,
    SectorStore, StoragePath,
};

use crate::cache_key::CacheKey;
use crate::cancel::CancelToken;
use crate::copy::materialize_sealed_prefix;
use crate::error::{Result, SealError, Stage};
use crate::layout::{encode_phase1_output, LayoutError};
use crate::prover::{
    SealPreCommitOutput, SealProver, SealVerifyInfo, Sha256TreeBuilder, TreeBuilder,
    VanillaProver,
};
use crate::provider::{AcquiredSector, StorageProvider};
use crate::replica_id::replica_id;
use crate::settings::Settings;
use crate::types::{Commitment, Seed, Ticket};

/// Runs the sealing stages of single sectors against local storage.
///
/// Every stage is a blocking call. Stages of one sector must be called in pipeline order and
/// never concurrently; different sectors may be processed in parallel.
pub struct SealCalls {
    sectors: StorageProvider,
    prover: Arc<dyn SealProver>,
    vanilla: Arc<dyn VanillaProver>,
    tree_builder: Arc<dyn TreeBuilder>,
    settings: Settings,
}

impl SealCalls {
    pub fn new(
        storage: Arc<dyn SectorStore>,
        local_store: Arc<dyn LocalStorage>,
        index: Arc<dyn SectorIndex>,
        prover: Arc<dyn SealProver>,
        vanilla: Arc<dyn VanillaProver>,
        settings: Settings,
    ) -> Self {
        SealCalls {
            sectors: StorageProvider::new(storage, local_store, index),
            prover,
            vanilla,
            tree_builder: Arc::new(Sha256TreeBuilder::new(settings.tree_d_buffer_size)),
            settings,
        }
    }

    pub fn with_tree_builder(mut self, tree_builder: Arc<dyn TreeBuilder>) -> Self {
        self.tree_builder = tree_builder;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn acquire(
        &self,
        sector: &SectorRef,
        stage: Stage,
        existing: FileTypes,
        allocate: FileTypes,
        cancel: &CancelToken,
    ) -> Result<AcquiredSector, SealError> {
        checkpoint(cancel, sector, stage)?;

        let acquired = self
            .sectors
            .acquire_sector(sector, existing, allocate, PathType::Sealing)
            .map_err(|err| {
                SealError::classify(sector.id, stage, err.context("acquiring sector paths"))
            })?;

        checkpoint(cancel, sector, stage)?;
        Ok(acquired)
    }

    /// Generates the sector key (SDR layers) into a freshly allocated cache directory.
    pub fn generate_replica_key(
        &self,
        sector: &SectorRef,
        ticket: &Ticket,
        comm_d: &Commitment,
        cancel: &CancelToken,
    ) -> Result<(), SealError> {
        let stage = Stage::GenerateReplicaKey;
        let mut acquired = self.acquire(
            sector,
            stage,
            FileTypes::empty(),
            SectorFileType::Cache.into(),
            cancel,
        )?;
        let cache = acquired
            .paths()
            .path(SectorFileType::Cache)
            .map_err(|err| SealError::storage(sector.id, stage, err))?;

        let replica_id = replica_id(sector.proof_type, sector.id, ticket, comm_d);
        info!(
            "{}: generating sdr for {}, replica id {}",
            stage,
            sector,
            hex::encode(replica_id)
        );

        self.prover
            .generate_sdr(sector.proof_type, cache, &replica_id)
            .map_err(|err| {
                SealError::compute(
                    sector.id,
                    stage,
                    err.context(format!("generating SDR {} ({:?})", sector.id.number, cache)),
                )
            })?;

        acquired.commit();
        Ok(())
    }

    /// Writes tree-d over `size` padded bytes of `data` into the cache and returns CommD.
    pub fn build_unsealed_tree(
        &self,
        sector: &SectorRef,
        size: u64,
        data: &mut dyn Read,
        unpadded: bool,
        cancel: &CancelToken,
    ) -> Result<Commitment, SealError> {
        let stage = Stage::BuildUnsealedTree;
        // TODO: allocate Unsealed here once sectors carry deal data.
        let maybe_unsealed = FileTypes::empty();

        let mut acquired = self.acquire(
            sector,
            stage,
            SectorFileType::Cache.into(),
            maybe_unsealed,
            cancel,
        )?;
        let cache = acquired
            .paths()
            .path(SectorFileType::Cache)
            .map_err(|err| SealError::storage(sector.id, stage, err))?;
        let tree_d_path = CacheKey::CommDTree.path(cache);

        let comm_d = self
            .tree_builder
            .build_unsealed_tree(data, unpadded, &tree_d_path, size)
            .map_err(|err| SealError::compute(sector.id, stage, err.context("building tree-d")))?;
        info!("{}: {} comm_d {}", stage, sector.id, hex::encode(comm_d));

        acquired.commit();
        Ok(comm_d)
    }

    /// Copies the tree-d prefix into a new sealed file and runs the second pre-commit phase
    /// on it, which turns it into the sealed replica in place.
    pub fn build_sealed_tree_and_prove_phase2(
        &self,
        sector: &SectorRef,
        comm_d: &Commitment,
        cancel: &CancelToken,
    ) -> Result<SealPreCommitOutput, SealError> {
        let stage = Stage::BuildSealedTree;
        let phase1_output =
            encode_phase1_output(*comm_d, sector.proof_type).map_err(|err| match err {
                LayoutError::UnsupportedProofClass(proof) => SealError::UnsupportedProofClass {
                    sector: sector.id,
                    stage,
                    proof,
                },
                err => SealError::compute(
                    sector.id,
                    stage,
                    anyhow::Error::new(err).context("make phase1 output"),
                ),
            })?;

        let mut acquired = self.acquire(
            sector,
            stage,
            SectorFileType::Cache.into(),
            SectorFileType::Sealed.into(),
            cancel,
        )?;
        let storage_err = move |err: anyhow::Error| SealError::storage(sector.id, stage, err);
        let cache = acquired
            .paths()
            .path(SectorFileType::Cache)
            .map_err(storage_err)?;
        let sealed = acquired
            .paths()
            .path(SectorFileType::Sealed)
            .map_err(storage_err)?;

        let method = materialize_sealed_prefix(
            &CacheKey::CommDTree.path(cache),
            sealed,
            sector.sector_size(),
            &self.settings,
        )
        .map_err(|err| storage_err(err.context("copying tree-d prefix to sealed file")))?;
        debug!("{}: {} sealed file created ({:?})", stage, sector.id, method);

        checkpoint(cancel, sector, stage)?;

        let output = self
            .prover
            .seal_pre_commit_phase2(&phase1_output, cache, sealed)
            .map_err(|err| SealError::compute(sector.id, stage, err))?;
        if output.comm_d != *comm_d {
            return Err(SealError::compute(
                sector.id,
                stage,
                format_err!(
                    "phase 2 returned comm_d {}, expected {}",
                    hex::encode(output.comm_d),
                    hex::encode(comm_d)
                ),
            ));
        }
        info!(
            "{}: {} comm_r {}",
            stage,
            sector.id,
            hex::encode(output.comm_r)
        );

        acquired.commit();
        Ok(output)
    }

    /// Produces the commit proof and checks it before handing it out.
    pub fn generate_and_verify_proof(
        &self,
        sector: &SectorRef,
        comm_r: &Commitment,
        comm_d: &Commitment,
        ticket: &Ticket,
        seed: &Seed,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, SealError> {
        let stage = Stage::GenerateProof;
        checkpoint(cancel, sector, stage)?;

        let vanilla_proof = self
            .vanilla
            .generate_porep_vanilla_proof(sector, comm_r, comm_d, ticket, seed)
            .map_err(|err| {
                SealError::compute(
                    sector.id,
                    stage,
                    err.context("failed to generate vanilla proof"),
                )
            })?;

        checkpoint(cancel, sector, stage)?;

        let proof = self
            .prover
            .seal_commit_phase2(&vanilla_proof, sector.id)
            .map_err(|err| {
                SealError::compute(sector.id, stage, err.context("computing seal proof failed"))
            })?;

        let info = SealVerifyInfo {
            proof_type: sector.proof_type,
            sector: sector.id,
            randomness: *ticket,
            interactive_randomness: *seed,
            proof,
            comm_r: *comm_r,
            comm_d: *comm_d,
        };
        self.verify_proof(&info)?;
        info!("{}: {} proof verified", stage, sector.id);

        Ok(info.proof)
    }

    /// Verifies a seal proof. A proof the library rejects is [`SealError::ProofInvalid`].
    pub fn verify_proof(&self, info: &SealVerifyInfo) -> Result<(), SealError> {
        let stage = Stage::GenerateProof;
        match self.prover.verify_seal(info) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("{}: porep of {} failed to validate", stage, info.sector);
                Err(SealError::ProofInvalid {
                    sector: info.sector,
                    stage,
                })
            }
            Err(err) => Err(SealError::compute(
                info.sector,
                stage,
                err.context("failed to verify proof"),
            )),
        }
    }

    /// Drops everything from the cache that is not needed for PoSt. With `keep_unsealed` the
    /// tree-d prefix, which is the padded sector data, becomes the unsealed artifact.
    ///
    /// The unsealed artifact is declared as soon as it is in place, so a retry after a failed
    /// cache clear picks it up instead of looking for tree-d again.
    pub fn finalize_sector(
        &self,
        sector: &SectorRef,
        keep_unsealed: bool,
        cancel: &CancelToken,
    ) -> Result<(), SealError> {
        let stage = Stage::Finalize;
        let mut existing: FileTypes = SectorFileType::Cache.into();
        let mut allocate = FileTypes::empty();
        if keep_unsealed {
            let declared = self
                .sectors
                .index()
                .find_sector(sector.id, SectorFileType::Unsealed)
                .map_err(|err| {
                    SealError::storage(sector.id, stage, err.context("finding unsealed sector"))
                })?;
            // Nothing before this stage writes the unsealed file, it only comes from tree-d.
            if declared.is_empty() {
                allocate |= SectorFileType::Unsealed;
            } else {
                existing |= SectorFileType::Unsealed;
            }
        }

        let mut acquired = self.acquire(sector, stage, existing, allocate, cancel)?;
        let storage_err = move |err: anyhow::Error| SealError::storage(sector.id, stage, err);
        let ssize = sector.sector_size();
        let paths = acquired.paths().clone();
        let cache = paths.path(SectorFileType::Cache).map_err(storage_err)?;

        if keep_unsealed {
            let unsealed = paths
                .path(SectorFileType::Unsealed)
                .map_err(storage_err)?;
            extract_unsealed(cache, unsealed, sector.id, ssize).map_err(storage_err)?;
            if allocate.contains(SectorFileType::Unsealed) {
                acquired
                    .declare(SectorFileType::Unsealed)
                    .map_err(storage_err)?;
            }
            debug!("{}: {} unsealed data moved to {:?}", stage, sector.id, unsealed);
        }

        checkpoint(cancel, sector, stage)?;

        self.prover
            .clear_cache(ssize, cache)
            .map_err(|err| storage_err(err.context("clearing cache")))?;
        info!("{}: {} finalized", stage, sector.id);

        acquired.commit();
        Ok(())
    }

    /// Moves the sector to long-term storage and removes the copies left behind.
    pub fn migrate_storage(
        &self,
        sector: &SectorRef,
        cancel: &CancelToken,
    ) -> Result<(), SealError> {
        let stage = Stage::MigrateStorage;
        checkpoint(cancel, sector, stage)?;

        let unsealed = self
            .sector_storage_type(sector.id, SectorFileType::Unsealed)
            .map_err(|err| {
                SealError::storage(sector.id, stage, err.context("checking unsealed storage type"))
            })?;
        let to_move = migration_plan(unsealed);
        info!("{}: moving {:?} of {}", stage, to_move, sector.id);

        self.sectors
            .storage()
            .move_storage(sector, to_move)
            .map_err(|err| SealError::classify(sector.id, stage, err.context("moving storage")))?;

        for file_type in to_move.iter() {
            self.sectors
                .storage()
                .remove_copies(sector.id, file_type)
                .map_err(|err| {
                    SealError::classify(
                        sector.id,
                        stage,
                        err.context(format!("rm copies (t: {}, s: {})", file_type, sector.id)),
                    )
                })?;
        }

        Ok(())
    }

    pub fn local_storage(&self) -> anyhow::Result<Vec<StoragePath>> {
        self.sectors.local_store().local()
    }

    /// Where an artifact lives: `None` if nowhere, `Sealing` if any copy is on a sealing
    /// location.
    fn sector_storage_type(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> anyhow::Result<Option<PathType>> {
        let stores = self
            .sectors
            .index()
            .find_sector(sector, file_type)
            .context("finding sector")?;
        if stores.is_empty() {
            return Ok(None);
        }

        if stores.iter().any(|store| store.can_seal) {
            Ok(Some(PathType::Sealing))
        } else {
            Ok(Some(PathType::Storage))
        }
    }
}

/// Artifact kinds to move to long-term storage, given where the unsealed copy lives. Cache and
/// sealed always move, unsealed only if it sits on sealing storage.
pub fn migration_plan(unsealed: Option<PathType>) -> FileTypes {
    let mut to_move = SectorFileType::Cache | SectorFileType::Sealed;
    if unsealed == Some(PathType::Sealing) {
        to_move |= SectorFileType::Unsealed;
    }
    to_move
}

fn extract_unsealed(
    cache: &Path,
    unsealed: &Path,
    sector: SectorId,
    ssize: u64,
) -> anyhow::Result<()> {
    let tree_d = CacheKey::CommDTree.path(cache);
    if !tree_d.exists() && fs::metadata(unsealed).map_or(false, |meta| meta.len() == ssize) {
        debug!("{} already has unsealed data at {:?}", sector, unsealed);
        return Ok(());
    }

    let tree_d_len = fs::metadata(&tree_d)
        .with_context(|| format!("reading tree-d {:?}", tree_d))?
        .len();
    anyhow::ensure!(
        tree_d_len >= ssize,
        "tree-d {:?} holds {} bytes, less than the {} byte sector",
        tree_d,
        tree_d_len,
        ssize
    );

    let temp_unsealed = cache.join(sector_name(sector));
    fs::rename(&tree_d, &temp_unsealed).context("moving tree-d to temp file")?;

    OpenOptions::new()
        .write(true)
        .open(&temp_unsealed)
        .and_then(|file| file.set_len(ssize))
        .context("truncating unsealed file to sector size")?;

    move_path(&temp_unsealed, unsealed).with_context(|| {
        format!(
            "move temp unsealed sector to final location ({:?} -> {:?})",
            temp_unsealed, unsealed
        )
    })
}

fn checkpoint(cancel: &CancelToken, sector: &SectorRef, stage: Stage) -> Result<(), SealError> {
    if cancel.is_cancelled() {
        info!("{}: {} cancelled", stage, sector.id);
        return Err(SealError::Cancelled {
            sector: sector.id,
            stage,
        });
    }
    Ok(())
}
