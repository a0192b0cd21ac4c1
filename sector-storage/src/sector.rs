use std::fmt;

use anyhow::{format_err, Context, Result};
use serde::{Deserialize, Serialize};

use crate::registered_proof::RegisteredSealProof;

pub type ActorId = u64;
pub type SectorNumber = u64;

/// Identifier for a single sector of a single miner.
#[derive(
    Default, Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct SectorId {
    pub miner: ActorId,
    pub number: SectorNumber,
}

impl SectorId {
    pub fn new(miner: ActorId, number: SectorNumber) -> Self {
        SectorId { miner, number }
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sector_name(*self))
    }
}

/// A sector together with the proof variant it is sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    pub id: SectorId,
    pub proof_type: RegisteredSealProof,
}

impl SectorRef {
    pub fn new(miner: ActorId, number: SectorNumber, proof_type: RegisteredSealProof) -> Self {
        SectorRef {
            id: SectorId::new(miner, number),
            proof_type,
        }
    }

    #[inline]
    pub fn sector_size(&self) -> u64 {
        self.proof_type.sector_size()
    }
}

impl fmt::Display for SectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.proof_type)
    }
}

/// Name of every on-disk artifact of a sector, e.g. `s-t01000-1`.
pub fn sector_name(id: SectorId) -> String {
    format!("s-t0{}-{}", id.miner, id.number)
}

pub fn parse_sector_name(name: &str) -> Result<SectorId> {
    let rest = name
        .strip_prefix("s-t0")
        .ok_or_else(|| format_err!("invalid sector name {:?}: missing s-t0 prefix", name))?;
    let (miner, number) = rest
        .split_once('-')
        .ok_or_else(|| format_err!("invalid sector name {:?}: missing number", name))?;

    Ok(SectorId {
        miner: miner
            .parse()
            .with_context(|| format!("invalid miner in sector name {:?}", name))?,
        number: number
            .parse()
            .with_context(|| format!("invalid number in sector name {:?}", name))?,
    })
}
