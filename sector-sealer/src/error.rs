use std::fmt::{self, Display, Formatter};

use sector_storage::{RegisteredSealProof, SectorId, StorageError};

pub use anyhow::Result;

/// The pipeline stages, named as they show up in logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    GenerateReplicaKey,
    BuildUnsealedTree,
    BuildSealedTree,
    GenerateProof,
    Finalize,
    MigrateStorage,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::GenerateReplicaKey => "generate-sdr",
            Stage::BuildUnsealedTree => "tree-d",
            Stage::BuildSealedTree => "tree-rc",
            Stage::GenerateProof => "porep-snark",
            Stage::Finalize => "finalize",
            Stage::MigrateStorage => "move-storage",
        };
        f.write_str(name)
    }
}

/// Failure of a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("{stage} of {sector}: required artifact not found: {cause:#}")]
    NotFound {
        sector: SectorId,
        stage: Stage,
        cause: anyhow::Error,
    },
    #[error("{stage} of {sector}: storage error: {cause:#}")]
    Storage {
        sector: SectorId,
        stage: Stage,
        cause: anyhow::Error,
    },
    #[error("{stage} of {sector}: compute error: {cause:#}")]
    Compute {
        sector: SectorId,
        stage: Stage,
        cause: anyhow::Error,
    },
    #[error("{stage} of {sector}: porep failed to validate")]
    ProofInvalid { sector: SectorId, stage: Stage },
    #[error("{stage} of {sector}: unsupported proof class {proof}")]
    UnsupportedProofClass {
        sector: SectorId,
        stage: Stage,
        proof: RegisteredSealProof,
    },
    #[error("{stage} of {sector} was cancelled")]
    Cancelled { sector: SectorId, stage: Stage },
}

impl SealError {
    pub fn storage(sector: SectorId, stage: Stage, cause: impl Into<anyhow::Error>) -> Self {
        SealError::Storage {
            sector,
            stage,
            cause: cause.into(),
        }
    }

    pub fn compute(sector: SectorId, stage: Stage, cause: impl Into<anyhow::Error>) -> Self {
        SealError::Compute {
            sector,
            stage,
            cause: cause.into(),
        }
    }

    /// A storage failure, or `NotFound` if it was caused by a missing artifact.
    pub fn classify(sector: SectorId, stage: Stage, cause: anyhow::Error) -> Self {
        let not_found = cause.chain().any(|err| {
            matches!(
                err.downcast_ref::<StorageError>(),
                Some(StorageError::NotFound { .. })
            )
        });

        if not_found {
            SealError::NotFound {
                sector,
                stage,
                cause,
            }
        } else {
            SealError::Storage {
                sector,
                stage,
                cause,
            }
        }
    }

    pub fn sector(&self) -> SectorId {
        match self {
            SealError::NotFound { sector, .. }
            | SealError::Storage { sector, .. }
            | SealError::Compute { sector, .. }
            | SealError::ProofInvalid { sector, .. }
            | SealError::UnsupportedProofClass { sector, .. }
            | SealError::Cancelled { sector, .. } => *sector,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            SealError::NotFound { stage, .. }
            | SealError::Storage { stage, .. }
            | SealError::Compute { stage, .. }
            | SealError::ProofInvalid { stage, .. }
            | SealError::UnsupportedProofClass { stage, .. }
            | SealError::Cancelled { stage, .. } => *stage,
        }
    }

    /// The underlying failure, for the variants that wrap one.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            SealError::NotFound { cause, .. }
            | SealError::Storage { cause, .. }
            | SealError::Compute { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Whether running the whole stage again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SealError::Storage { .. } | SealError::Compute { .. } | SealError::Cancelled { .. }
        )
    }
}
