#![deny(clippy::all, clippy::perf, clippy::correctness, rust_2018_idioms)]
#![allow(clippy::unreadable_literal)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::ptr_arg)]
#![warn(clippy::unnecessary_lazy_evaluations)]

pub mod cache_key;
pub mod cancel;
pub mod clear;
pub mod copy;
pub mod error;
pub mod fr32;
pub mod layout;
pub mod prover;
pub mod provider;
pub mod replica_id;
pub mod seal_calls;
pub mod settings;
pub mod tree_d;
pub mod types;

pub use cancel::CancelToken;
pub use error::{SealError, Stage};
pub use layout::{encode_phase1_output, phase1_output, LayerGeometry, LayoutError, Phase1Output};
pub use prover::{
    SealPreCommitOutput, SealProver, SealVerifyInfo, Sha256TreeBuilder, TreeBuilder,
    VanillaProver,
};
pub use provider::{AcquiredSector, StorageProvider};
pub use seal_calls::{migration_plan, SealCalls};
pub use settings::Settings;
pub use types::*;

pub const TEST_SEED: [u8; 16] = [
    0x59, 0x62, 0xbe, 0x5d, 0x76, 0x3d, 0x31, 0x8d, 0x17, 0xdb, 0x37, 0x32, 0x54, 0x06, 0xbc, 0xe5,
];
