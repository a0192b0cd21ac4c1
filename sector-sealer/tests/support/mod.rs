#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, format_err, Result};
use rand::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;
use sector_sealer::cache_key::{store_data_path, CacheKey};
use sector_sealer::{
    Commitment, Phase1Output, ReplicaId, SealCalls, SealPreCommitOutput, SealProver,
    SealVerifyInfo, Seed, Settings, Ticket, VanillaProver, TEST_SEED,
};
use sector_storage::{
    FileTypes, LocalStorage, LocalStorageMeta, LocalStore, MemIndex, OverheadClass, PathType,
    RegisteredSealProof, Reservation, SectorFileType, SectorId, SectorIndex, SectorPaths,
    SectorRef, SectorStorageIds, SectorStorageInfo, SectorStore, StorageId, StoragePath,
    StorageInfo,
};
use sha2::{Digest, Sha256};
use tempfile::{tempdir, TempDir};

pub const MINER: u64 = 1000;
pub const SEALED_XOR: u8 = 0xaa;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn mock_vanilla_proof(
    sector: SectorId,
    comm_r: &Commitment,
    comm_d: &Commitment,
    ticket: &Ticket,
    seed: &Seed,
) -> Vec<u8> {
    sha256(&[
        &sector.miner.to_le_bytes(),
        &sector.number.to_le_bytes(),
        comm_r,
        comm_d,
        ticket,
        seed,
    ])
    .to_vec()
}

fn mock_snark(vanilla_proof: &[u8], sector: SectorId) -> Vec<u8> {
    sha256(&[vanilla_proof, &sector.number.to_le_bytes()]).to_vec()
}

/// Stands in for the proving library: writes files of the right names and derives everything
/// from hashes of its inputs.
#[derive(Debug, Default)]
pub struct MockProver {
    pub fail_sdr: AtomicBool,
    pub fail_clear_cache: AtomicBool,
    /// Flips a bit of every commit proof, so it no longer verifies.
    pub corrupt_proof: AtomicBool,
}

impl SealProver for MockProver {
    fn generate_sdr(
        &self,
        _proof_type: RegisteredSealProof,
        cache_path: &Path,
        replica_id: &ReplicaId,
    ) -> Result<()> {
        if self.fail_sdr.load(Ordering::SeqCst) {
            bail!("sdr exploded");
        }
        ensure!(cache_path.is_dir(), "cache {:?} does not exist", cache_path);

        for layer in 1..=2 {
            fs::write(
                store_data_path(cache_path, &CacheKey::label_layer(layer)),
                replica_id.repeat(layer),
            )?;
        }
        Ok(())
    }

    fn seal_pre_commit_phase2(
        &self,
        phase1_output: &[u8],
        cache_path: &Path,
        sealed_path: &Path,
    ) -> Result<SealPreCommitOutput> {
        let phase1: Phase1Output = serde_json::from_slice(phase1_output)?;
        let group = phase1
            .labels
            .values()
            .next()
            .ok_or_else(|| format_err!("no layer group"))?;
        let sector_size = group.labels[0].size * 32;

        let mut sealed = fs::read(sealed_path)?;
        ensure!(
            sealed.len() as u64 == sector_size,
            "sealed file holds {} bytes, expected {}",
            sealed.len(),
            sector_size
        );
        for byte in sealed.iter_mut() {
            *byte ^= SEALED_XOR;
        }
        fs::write(sealed_path, &sealed)?;

        fs::write(CacheKey::CommCTree.path(cache_path), b"tree-c")?;
        fs::write(CacheKey::CommRLastTree.path(cache_path), b"tree-r-last")?;
        fs::write(CacheKey::PAux.path(cache_path), b"p_aux")?;
        fs::write(CacheKey::TAux.path(cache_path), b"t_aux")?;

        Ok(SealPreCommitOutput {
            comm_r: sha256(&[&sealed]),
            comm_d: phase1.comm_d,
        })
    }

    fn seal_commit_phase2(&self, vanilla_proof: &[u8], sector: SectorId) -> Result<Vec<u8>> {
        let mut proof = mock_snark(vanilla_proof, sector);
        if self.corrupt_proof.load(Ordering::SeqCst) {
            proof[0] ^= 1;
        }
        Ok(proof)
    }

    fn verify_seal(&self, info: &SealVerifyInfo) -> Result<bool> {
        let vanilla = mock_vanilla_proof(
            info.sector,
            &info.comm_r,
            &info.comm_d,
            &info.randomness,
            &info.interactive_randomness,
        );
        Ok(mock_snark(&vanilla, info.sector) == info.proof)
    }

    fn clear_cache(&self, _sector_size: u64, cache_path: &Path) -> Result<()> {
        if self.fail_clear_cache.load(Ordering::SeqCst) {
            bail!("clear cache exploded");
        }
        sector_sealer::clear::clear_cache_dir(cache_path)
    }
}

#[derive(Debug, Default)]
pub struct MockVanilla;

impl VanillaProver for MockVanilla {
    fn generate_porep_vanilla_proof(
        &self,
        sector: &SectorRef,
        comm_r: &Commitment,
        comm_d: &Commitment,
        ticket: &Ticket,
        seed: &Seed,
    ) -> Result<Vec<u8>> {
        Ok(mock_vanilla_proof(sector.id, comm_r, comm_d, ticket, seed))
    }
}

/// An index whose declarations can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyIndex {
    inner: MemIndex,
    pub fail_declare: AtomicBool,
}

impl SectorIndex for FlakyIndex {
    fn attach_storage(&self, info: StorageInfo) -> Result<()> {
        self.inner.attach_storage(info)
    }

    fn storage_info(&self, id: &StorageId) -> Result<StorageInfo> {
        self.inner.storage_info(id)
    }

    fn declare_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
        primary: bool,
    ) -> Result<()> {
        if self.fail_declare.load(Ordering::SeqCst) {
            bail!("index unavailable");
        }
        self.inner.declare_sector(storage, sector, file_type, primary)
    }

    fn drop_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<()> {
        self.inner.drop_sector(storage, sector, file_type)
    }

    fn find_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<Vec<SectorStorageInfo>> {
        self.inner.find_sector(sector, file_type)
    }
}

/// A store that raises a cancellation as soon as paths are acquired.
pub struct CancellingStore {
    pub inner: Arc<LocalStore>,
    pub token: sector_sealer::CancelToken,
}

impl SectorStore for CancellingStore {
    fn acquire_sector(
        &self,
        sector: &SectorRef,
        existing: FileTypes,
        allocate: FileTypes,
        path_type: PathType,
    ) -> Result<(SectorPaths, SectorStorageIds)> {
        let acquired = self
            .inner
            .acquire_sector(sector, existing, allocate, path_type)?;
        self.token.cancel();
        Ok(acquired)
    }

    fn move_storage(&self, sector: &SectorRef, file_types: FileTypes) -> Result<()> {
        self.inner.move_storage(sector, file_types)
    }

    fn remove_copies(&self, sector: SectorId, file_type: SectorFileType) -> Result<()> {
        self.inner.remove_copies(sector, file_type)
    }
}

/// A store that remembers every set of artifact kinds it was asked to move.
pub struct RecordingStore {
    pub inner: Arc<LocalStore>,
    pub moved: Mutex<Vec<FileTypes>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<LocalStore>) -> Self {
        RecordingStore {
            inner,
            moved: Mutex::new(Vec::new()),
        }
    }

    pub fn moved(&self) -> Vec<FileTypes> {
        self.moved.lock().expect("lock poisoned").clone()
    }
}

impl SectorStore for RecordingStore {
    fn acquire_sector(
        &self,
        sector: &SectorRef,
        existing: FileTypes,
        allocate: FileTypes,
        path_type: PathType,
    ) -> Result<(SectorPaths, SectorStorageIds)> {
        self.inner
            .acquire_sector(sector, existing, allocate, path_type)
    }

    fn move_storage(&self, sector: &SectorRef, file_types: FileTypes) -> Result<()> {
        self.moved.lock().expect("lock poisoned").push(file_types);
        self.inner.move_storage(sector, file_types)
    }

    fn remove_copies(&self, sector: SectorId, file_type: SectorFileType) -> Result<()> {
        self.inner.remove_copies(sector, file_type)
    }
}

/// Capacity accounting that never has room.
#[derive(Debug, Default)]
pub struct FullStorage;

impl LocalStorage for FullStorage {
    fn reserve(
        &self,
        sector: &SectorRef,
        file_types: FileTypes,
        _storage_ids: &SectorStorageIds,
        _overhead: OverheadClass,
    ) -> Result<Reservation> {
        bail!("no room for {:?} of {}", file_types, sector.id)
    }

    fn local(&self) -> Result<Vec<StoragePath>> {
        Ok(Vec::new())
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub index: Arc<FlakyIndex>,
    pub store: Arc<LocalStore>,
    pub prover: Arc<MockProver>,
    pub seal_id: StorageId,
    pub store_id: StorageId,
    pub calls: SealCalls,
}

impl TestEnv {
    /// One sealing location and one long-term location.
    pub fn new() -> Self {
        fil_logger::maybe_init();

        let dir = tempdir().expect("tempdir failure");
        let index = Arc::new(FlakyIndex::default());
        let store = Arc::new(LocalStore::new(index.clone()));

        let seal_id = store
            .attach(
                dir.path().join("seal"),
                LocalStorageMeta {
                    id: StorageId::new("seal"),
                    weight: 10,
                    can_seal: true,
                    can_store: false,
                    max_storage: 0,
                },
            )
            .expect("attach failed");
        let store_id = store
            .attach(
                dir.path().join("store"),
                LocalStorageMeta {
                    id: StorageId::new("store"),
                    weight: 10,
                    can_seal: false,
                    can_store: true,
                    max_storage: 0,
                },
            )
            .expect("attach failed");

        let prover = Arc::new(MockProver::default());
        let calls = SealCalls::new(
            store.clone(),
            store.clone(),
            index.clone(),
            prover.clone(),
            Arc::new(MockVanilla),
            Settings::default(),
        );

        TestEnv {
            dir,
            index,
            store,
            prover,
            seal_id,
            store_id,
            calls,
        }
    }

    /// Attaches another location below the test directory.
    pub fn attach(&self, name: &str, weight: u64, can_seal: bool, can_store: bool) -> StorageId {
        self.store
            .attach(
                self.dir.path().join(name),
                LocalStorageMeta {
                    id: StorageId::new(name),
                    weight,
                    can_seal,
                    can_store,
                    max_storage: 0,
                },
            )
            .expect("attach failed")
    }

    /// Seal calls running against `storage` instead of the plain local store.
    pub fn calls_with(&self, storage: Arc<dyn SectorStore>) -> SealCalls {
        SealCalls::new(
            storage,
            self.store.clone(),
            self.index.clone(),
            self.prover.clone(),
            Arc::new(MockVanilla),
            Settings::default(),
        )
    }

    pub fn sector(&self, number: u64) -> SectorRef {
        SectorRef::new(MINER, number, RegisteredSealProof::StackedDrg2KiBV1_1)
    }

    /// Bytes reserved across all locations.
    pub fn reserved(&self) -> u64 {
        self.store.reserved(&self.seal_id).expect("reserved failed")
            + self.store.reserved(&self.store_id).expect("reserved failed")
    }

    pub fn locations(&self, sector: &SectorRef, file_type: SectorFileType) -> Vec<StorageId> {
        self.index
            .find_sector(sector.id, file_type)
            .expect("find failed")
            .into_iter()
            .map(|info| info.id)
            .collect()
    }

    pub fn seal_root(&self) -> std::path::PathBuf {
        self.dir.path().join("seal")
    }

    pub fn store_root(&self) -> std::path::PathBuf {
        self.dir.path().join("store")
    }
}

/// 2KiB of random padded sector data.
pub fn sector_data() -> Vec<u8> {
    let mut rng = XorShiftRng::from_seed(TEST_SEED);
    let mut data = vec![0u8; 2048];
    rng.fill_bytes(&mut data);
    for node in data.chunks_mut(32) {
        node[31] &= 0b0011_1111;
    }
    data
}
