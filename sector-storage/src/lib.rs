#![deny(clippy::all, clippy::perf, clippy::correctness, rust_2018_idioms)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::ptr_arg)]
#![warn(clippy::unnecessary_lazy_evaluations)]

pub mod error;
pub mod file_type;
pub mod fsutil;
pub mod index;
pub mod local;
pub mod paths;
pub mod registered_proof;
pub mod reservation;
pub mod sector;
pub mod store;

pub use error::StorageError;
pub use file_type::{FileTypes, OverheadClass, PathType, SectorFileType};
pub use index::{MemIndex, SectorIndex, SectorStorageInfo, StorageInfo};
pub use local::{FsStat, LocalStorageMeta, LocalStore};
pub use paths::{SectorPaths, SectorStorageIds, StorageId};
pub use registered_proof::{PoRepId, RegisteredSealProof};
pub use reservation::Reservation;
pub use sector::{ActorId, SectorId, SectorNumber, SectorRef};
pub use store::{LocalStorage, SectorStore, StoragePath};
