use std::fs;
use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use sector_sealer::cache_key::{store_data_path, CacheKey};
use sector_sealer::tree_d::build_tree_d;
use sector_sealer::{
    CancelToken, Commitment, SealCalls, SealError, SealVerifyInfo, Settings, Stage,
};
use sector_storage::{RegisteredSealProof, SectorFileType, SectorIndex, SectorRef};
use tempfile::tempdir;

mod support;

use support::{
    sector_data, CancellingStore, FullStorage, MockVanilla, RecordingStore, TestEnv, MINER,
    SEALED_XOR,
};

const TICKET: [u8; 32] = [3u8; 32];
const SEED: [u8; 32] = [4u8; 32];

fn expected_comm_d(data: &[u8]) -> Commitment {
    let dir = tempdir().expect("tempdir failure");
    build_tree_d(Cursor::new(data), false, &dir.path().join("tree-d"), 2048, 4096)
        .expect("build failed")
}

/// Runs the pipeline up to and including phase 2.
fn seal(env: &TestEnv, sector: &SectorRef, data: &[u8]) -> (Commitment, Commitment) {
    let cancel = CancelToken::new();
    let comm_d = expected_comm_d(data);

    env.calls
        .generate_replica_key(sector, &TICKET, &comm_d, &cancel)
        .expect("generate_replica_key failed");
    let built = env
        .calls
        .build_unsealed_tree(sector, 2048, &mut Cursor::new(data.to_vec()), false, &cancel)
        .expect("build_unsealed_tree failed");
    assert_eq!(built, comm_d);

    let output = env
        .calls
        .build_sealed_tree_and_prove_phase2(sector, &comm_d, &cancel)
        .expect("phase 2 failed");
    assert_eq!(output.comm_d, comm_d);

    (output.comm_r, comm_d)
}

#[test]
fn test_seal_lifecycle_2kib() {
    let env = TestEnv::new();
    let sector = env.sector(1);
    let data = sector_data();
    let cancel = CancelToken::new();

    let (comm_r, comm_d) = seal(&env, &sector, &data);
    assert_eq!(env.reserved(), 0);

    let cache = env.seal_root().join("cache").join("s-t01000-1");
    assert!(store_data_path(&cache, &CacheKey::label_layer(1)).exists());
    assert_eq!(
        fs::metadata(CacheKey::CommDTree.path(&cache))
            .expect("stat failed")
            .len(),
        4064
    );
    assert_eq!(env.locations(&sector, SectorFileType::Cache), vec![env.seal_id.clone()]);
    assert_eq!(env.locations(&sector, SectorFileType::Sealed), vec![env.seal_id.clone()]);

    let sealed = fs::read(env.seal_root().join("sealed").join("s-t01000-1")).expect("read failed");
    let expected_sealed: Vec<u8> = data.iter().map(|byte| byte ^ SEALED_XOR).collect();
    assert_eq!(sealed, expected_sealed);

    let proof = env
        .calls
        .generate_and_verify_proof(&sector, &comm_r, &comm_d, &TICKET, &SEED, &cancel)
        .expect("proof failed");
    env.calls
        .verify_proof(&SealVerifyInfo {
            proof_type: sector.proof_type,
            sector: sector.id,
            randomness: TICKET,
            interactive_randomness: SEED,
            proof,
            comm_r,
            comm_d,
        })
        .expect("proof does not verify");

    env.calls
        .finalize_sector(&sector, true, &cancel)
        .expect("finalize failed");
    assert_eq!(env.reserved(), 0);

    let unsealed = env.seal_root().join("unsealed").join("s-t01000-1");
    assert_eq!(fs::read(&unsealed).expect("read failed"), data);
    assert_eq!(env.locations(&sector, SectorFileType::Unsealed), vec![env.seal_id.clone()]);

    let mut left: Vec<String> = fs::read_dir(&cache)
        .expect("read_dir failed")
        .map(|entry| {
            entry
                .expect("read_dir failed")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    left.sort();
    assert_eq!(left, vec!["p_aux", "sc-02-data-tree-r-last.dat", "t_aux"]);

    env.calls
        .migrate_storage(&sector, &cancel)
        .expect("migrate failed");
    for file_type in SectorFileType::ALL.iter() {
        assert_eq!(
            env.locations(&sector, *file_type),
            vec![env.store_id.clone()],
            "{} was not migrated",
            file_type
        );
    }
    assert!(!cache.exists());
    assert!(!unsealed.exists());
    assert_eq!(
        fs::read(env.store_root().join("unsealed").join("s-t01000-1")).expect("read failed"),
        data
    );
    assert_eq!(
        fs::read(env.store_root().join("sealed").join("s-t01000-1")).expect("read failed"),
        expected_sealed
    );
    assert!(env
        .store_root()
        .join("cache")
        .join("s-t01000-1")
        .join("p_aux")
        .exists());
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_finalize_without_unsealed() {
    let env = TestEnv::new();
    let sector = env.sector(2);
    let cancel = CancelToken::new();
    seal(&env, &sector, &sector_data());

    env.calls
        .finalize_sector(&sector, false, &cancel)
        .expect("finalize failed");

    let cache = env.seal_root().join("cache").join("s-t01000-2");
    assert!(!CacheKey::CommDTree.path(&cache).exists());
    assert!(!CacheKey::CommCTree.path(&cache).exists());
    assert!(CacheKey::CommRLastTree.path(&cache).exists());
    assert!(!env.seal_root().join("unsealed").join("s-t01000-2").exists());
    assert!(env.locations(&sector, SectorFileType::Unsealed).is_empty());

    env.calls
        .migrate_storage(&sector, &cancel)
        .expect("migrate failed");
    assert!(env.locations(&sector, SectorFileType::Unsealed).is_empty());
    assert_eq!(env.locations(&sector, SectorFileType::Sealed), vec![env.store_id.clone()]);
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_finalize_requires_tree_d() {
    let env = TestEnv::new();
    let sector = env.sector(3);
    let cancel = CancelToken::new();

    env.calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &cancel)
        .expect("generate_replica_key failed");

    let err = env
        .calls
        .finalize_sector(&sector, true, &cancel)
        .expect_err("finalize without tree-d must fail");
    assert!(matches!(err, SealError::Storage { stage: Stage::Finalize, .. }));
    assert!(env.locations(&sector, SectorFileType::Unsealed).is_empty());
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_clear_cache_failure_is_fatal() {
    let env = TestEnv::new();
    let sector = env.sector(4);
    seal(&env, &sector, &sector_data());

    env.prover.fail_clear_cache.store(true, Ordering::SeqCst);
    let err = env
        .calls
        .finalize_sector(&sector, false, &CancelToken::new())
        .expect_err("clear cache failure must surface");
    assert!(matches!(err, SealError::Storage { .. }));
    assert!(err.is_retryable());
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_finalize_retry_after_clear_failure() {
    let env = TestEnv::new();
    let sector = env.sector(12);
    let data = sector_data();
    let cancel = CancelToken::new();
    seal(&env, &sector, &data);

    env.prover.fail_clear_cache.store(true, Ordering::SeqCst);
    let err = env
        .calls
        .finalize_sector(&sector, true, &cancel)
        .expect_err("clear cache failure must surface");
    assert!(matches!(
        err,
        SealError::Storage {
            stage: Stage::Finalize,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(env.reserved(), 0);

    // The extracted data is already tracked, even though the stage failed.
    let unsealed = env.seal_root().join("unsealed").join("s-t01000-12");
    assert_eq!(fs::read(&unsealed).expect("read failed"), data);
    assert_eq!(env.locations(&sector, SectorFileType::Unsealed), vec![env.seal_id.clone()]);

    env.prover.fail_clear_cache.store(false, Ordering::SeqCst);
    env.calls
        .finalize_sector(&sector, true, &cancel)
        .expect("retried finalize failed");

    let cache = env.seal_root().join("cache").join("s-t01000-12");
    assert!(!CacheKey::CommCTree.path(&cache).exists());
    assert!(CacheKey::CommRLastTree.path(&cache).exists());
    assert_eq!(fs::read(&unsealed).expect("read failed"), data);
    assert_eq!(env.locations(&sector, SectorFileType::Unsealed), vec![env.seal_id.clone()]);
    assert_eq!(env.reserved(), 0);

    env.calls
        .migrate_storage(&sector, &cancel)
        .expect("migrate failed");
    assert_eq!(env.locations(&sector, SectorFileType::Unsealed), vec![env.store_id.clone()]);
    assert!(!unsealed.exists());
    assert_eq!(
        fs::read(env.store_root().join("unsealed").join("s-t01000-12")).expect("read failed"),
        data
    );
}

#[test]
fn test_failed_reservation_creates_nothing() {
    let env = TestEnv::new();
    let sector = env.sector(16);
    let calls = SealCalls::new(
        env.store.clone(),
        Arc::new(FullStorage),
        env.index.clone(),
        env.prover.clone(),
        Arc::new(MockVanilla),
        Settings::default(),
    );

    let err = calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &CancelToken::new())
        .expect_err("reservation cannot succeed");
    assert!(matches!(
        err,
        SealError::Storage {
            stage: Stage::GenerateReplicaKey,
            ..
        }
    ));
    assert!(!env.seal_root().join("cache").join("s-t01000-16").exists());
    assert!(env.locations(&sector, SectorFileType::Cache).is_empty());
}

#[test]
fn test_compute_failure_releases_reservation() {
    let env = TestEnv::new();
    let sector = env.sector(5);
    env.prover.fail_sdr.store(true, Ordering::SeqCst);

    let err = env
        .calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &CancelToken::new())
        .expect_err("sdr failure must surface");
    assert!(matches!(
        err,
        SealError::Compute {
            stage: Stage::GenerateReplicaKey,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(err.sector(), sector.id);

    assert_eq!(env.reserved(), 0);
    assert!(env.locations(&sector, SectorFileType::Cache).is_empty());
}

#[test]
fn test_declare_failure_still_releases() {
    let env = TestEnv::new();
    let sector = env.sector(6);
    env.index.fail_declare.store(true, Ordering::SeqCst);

    env.calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &CancelToken::new())
        .expect("declare failures must not fail the stage");

    assert_eq!(env.reserved(), 0);
    assert!(env.locations(&sector, SectorFileType::Cache).is_empty());
}

#[test]
fn test_missing_artifacts_are_not_found() {
    let env = TestEnv::new();
    let sector = env.sector(7);
    let cancel = CancelToken::new();

    let err = env
        .calls
        .build_unsealed_tree(&sector, 2048, &mut Cursor::new(vec![0u8; 2048]), false, &cancel)
        .expect_err("cache does not exist");
    assert!(matches!(
        err,
        SealError::NotFound {
            stage: Stage::BuildUnsealedTree,
            ..
        }
    ));
    assert!(!err.is_retryable());

    let err = env
        .calls
        .finalize_sector(&sector, false, &cancel)
        .expect_err("cache does not exist");
    assert!(matches!(err, SealError::NotFound { .. }));

    let err = env
        .calls
        .migrate_storage(&sector, &cancel)
        .expect_err("nothing to move");
    assert!(matches!(
        err,
        SealError::NotFound {
            stage: Stage::MigrateStorage,
            ..
        }
    ));
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_corrupted_proof_is_invalid() {
    let env = TestEnv::new();
    let sector = env.sector(8);
    let (comm_r, comm_d) = seal(&env, &sector, &sector_data());

    let proof = env
        .calls
        .generate_and_verify_proof(
            &sector,
            &comm_r,
            &comm_d,
            &TICKET,
            &SEED,
            &CancelToken::new(),
        )
        .expect("proof failed");

    let mut info = SealVerifyInfo {
        proof_type: sector.proof_type,
        sector: sector.id,
        randomness: TICKET,
        interactive_randomness: SEED,
        proof,
        comm_r,
        comm_d,
    };
    info.proof[0] ^= 1;

    let err = env
        .calls
        .verify_proof(&info)
        .expect_err("corrupted proof must not verify");
    assert!(matches!(err, SealError::ProofInvalid { .. }));
    assert!(!err.is_retryable());

    // A proof for different commitments does not verify either.
    info.proof[0] ^= 1;
    info.comm_r[0] ^= 1;
    assert!(matches!(
        env.calls.verify_proof(&info),
        Err(SealError::ProofInvalid { .. })
    ));
}

#[test]
fn test_unverified_proof_is_not_returned() {
    let env = TestEnv::new();
    let sector = env.sector(15);
    let (comm_r, comm_d) = seal(&env, &sector, &sector_data());
    env.prover.corrupt_proof.store(true, Ordering::SeqCst);

    let err = env
        .calls
        .generate_and_verify_proof(
            &sector,
            &comm_r,
            &comm_d,
            &TICKET,
            &SEED,
            &CancelToken::new(),
        )
        .expect_err("a proof that does not verify must not be returned");
    assert!(matches!(
        err,
        SealError::ProofInvalid {
            stage: Stage::GenerateProof,
            ..
        }
    ));
    assert_eq!(err.sector(), sector.id);
    assert!(!err.is_retryable());
}

#[test]
fn test_migrate_leaves_unsealed_on_long_term_storage() {
    let env = TestEnv::new();
    let sector = env.sector(13);
    let cancel = CancelToken::new();
    seal(&env, &sector, &sector_data());
    env.calls
        .finalize_sector(&sector, false, &cancel)
        .expect("finalize failed");

    let unsealed = env.store_root().join("unsealed").join("s-t01000-13");
    fs::write(&unsealed, vec![9u8; 2048]).expect("write failed");
    env.index
        .declare_sector(&env.store_id, sector.id, SectorFileType::Unsealed, true)
        .expect("declare failed");

    let store = Arc::new(RecordingStore::new(env.store.clone()));
    env.calls_with(store.clone())
        .migrate_storage(&sector, &cancel)
        .expect("migrate failed");

    assert_eq!(
        store.moved(),
        vec![SectorFileType::Cache | SectorFileType::Sealed]
    );
    assert_eq!(env.locations(&sector, SectorFileType::Unsealed), vec![env.store_id.clone()]);
    assert_eq!(fs::read(&unsealed).expect("read failed"), vec![9u8; 2048]);
    assert!(!env.seal_root().join("unsealed").join("s-t01000-13").exists());
    assert_eq!(env.locations(&sector, SectorFileType::Sealed), vec![env.store_id.clone()]);
    assert_eq!(env.locations(&sector, SectorFileType::Cache), vec![env.store_id.clone()]);
}

#[test]
fn test_migrate_unsealed_on_sealing_and_storage_location() {
    let env = TestEnv::new();
    let sector = env.sector(14);
    let cancel = CancelToken::new();
    seal(&env, &sector, &sector_data());
    env.calls
        .finalize_sector(&sector, false, &cancel)
        .expect("finalize failed");

    let both_id = env.attach("both", 1, true, true);
    let unsealed = env.dir.path().join("both").join("unsealed").join("s-t01000-14");
    fs::write(&unsealed, vec![9u8; 2048]).expect("write failed");
    env.index
        .declare_sector(&both_id, sector.id, SectorFileType::Unsealed, false)
        .expect("declare failed");

    let store = Arc::new(RecordingStore::new(env.store.clone()));
    env.calls_with(store.clone())
        .migrate_storage(&sector, &cancel)
        .expect("migrate failed");

    // A location that can seal puts unsealed in the move set, but it can already hold
    // long-term data, so the file stays and becomes the primary copy.
    assert_eq!(
        store.moved(),
        vec![SectorFileType::Cache | SectorFileType::Sealed | SectorFileType::Unsealed]
    );
    let found = env
        .index
        .find_sector(sector.id, SectorFileType::Unsealed)
        .expect("find failed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, both_id);
    assert!(found[0].primary);
    assert_eq!(fs::read(&unsealed).expect("read failed"), vec![9u8; 2048]);
    assert!(!env.store_root().join("unsealed").join("s-t01000-14").exists());
    assert_eq!(env.locations(&sector, SectorFileType::Sealed), vec![env.store_id.clone()]);
}

#[test]
fn test_unsupported_proof_class() {
    let env = TestEnv::new();
    let sector = SectorRef::new(MINER, 9, RegisteredSealProof::StackedDrg8MiBV1_1);

    let err = env
        .calls
        .build_sealed_tree_and_prove_phase2(&sector, &[0u8; 32], &CancelToken::new())
        .expect_err("8MiB has no layout");
    assert!(matches!(
        err,
        SealError::UnsupportedProofClass {
            proof: RegisteredSealProof::StackedDrg8MiBV1_1,
            ..
        }
    ));
    assert!(!err.is_retryable());
    assert_eq!(env.reserved(), 0);
    assert!(!env.seal_root().join("sealed").join("s-t01000-9").exists());
}

#[test]
fn test_cancelled_before_acquisition() {
    let env = TestEnv::new();
    let sector = env.sector(10);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = env
        .calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &cancel)
        .expect_err("cancelled");
    assert!(matches!(
        err,
        SealError::Cancelled {
            stage: Stage::GenerateReplicaKey,
            ..
        }
    ));
    assert!(!env.seal_root().join("cache").join("s-t01000-10").exists());
}

#[test]
fn test_cancelled_after_acquisition_releases() {
    let env = TestEnv::new();
    let sector = env.sector(11);
    let cancel = CancelToken::new();

    let calls = env.calls_with(Arc::new(CancellingStore {
        inner: env.store.clone(),
        token: cancel.clone(),
    }));

    let err = calls
        .generate_replica_key(&sector, &TICKET, &[0u8; 32], &cancel)
        .expect_err("cancelled");
    assert!(matches!(err, SealError::Cancelled { .. }));
    assert!(err.is_retryable());

    assert_eq!(env.reserved(), 0);
    assert!(env.locations(&sector, SectorFileType::Cache).is_empty());
}

#[test]
fn test_concurrent_sectors() {
    let env = TestEnv::new();
    let sectors: Vec<SectorRef> = (20..24).map(|number| env.sector(number)).collect();

    thread::scope(|s| {
        for sector in &sectors {
            let env = &env;
            s.spawn(move || {
                env.calls
                    .generate_replica_key(sector, &TICKET, &[0u8; 32], &CancelToken::new())
                    .expect("generate_replica_key failed");
            });
        }
    });

    for sector in &sectors {
        assert_eq!(env.locations(sector, SectorFileType::Cache), vec![env.seal_id.clone()]);
    }
    assert_eq!(env.reserved(), 0);
}

#[test]
fn test_local_storage() {
    let env = TestEnv::new();
    let mut listed = env.calls.local_storage().expect("local failed");
    listed.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, env.seal_id);
    assert!(listed[0].can_seal && !listed[0].can_store);
    assert_eq!(listed[1].id, env.store_id);
    assert_eq!(listed[1].local_path, env.store_root());
}
