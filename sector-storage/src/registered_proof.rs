use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use anyhow::{format_err, Error, Result};
use serde::{Deserialize, Serialize};

pub const SECTOR_SIZE_2_KIB: u64 = 1 << 11;
pub const SECTOR_SIZE_8_MIB: u64 = 1 << 23;
pub const SECTOR_SIZE_512_MIB: u64 = 1 << 29;
pub const SECTOR_SIZE_32_GIB: u64 = 1 << 35;
pub const SECTOR_SIZE_64_GIB: u64 = 1 << 36;

pub type PoRepId = [u8; 32];

/// The seal proof variants registered with the network.
///
/// The discriminant is the registered proof id, which is also what ends up in the first
/// eight bytes of the PoRep id.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u64)]
pub enum RegisteredSealProof {
    StackedDrg2KiBV1 = 0,
    StackedDrg8MiBV1 = 1,
    StackedDrg512MiBV1 = 2,
    StackedDrg32GiBV1 = 3,
    StackedDrg64GiBV1 = 4,

    StackedDrg2KiBV1_1 = 5,
    StackedDrg8MiBV1_1 = 6,
    StackedDrg512MiBV1_1 = 7,
    StackedDrg32GiBV1_1 = 8,
    StackedDrg64GiBV1_1 = 9,

    StackedDrg2KiBV1_1_Feat_SyntheticPoRep = 10,
    StackedDrg8MiBV1_1_Feat_SyntheticPoRep = 11,
    StackedDrg512MiBV1_1_Feat_SyntheticPoRep = 12,
    StackedDrg32GiBV1_1_Feat_SyntheticPoRep = 13,
    StackedDrg64GiBV1_1_Feat_SyntheticPoRep = 14,
}

impl RegisteredSealProof {
    pub const ALL: [RegisteredSealProof; 15] = [
        RegisteredSealProof::StackedDrg2KiBV1,
        RegisteredSealProof::StackedDrg8MiBV1,
        RegisteredSealProof::StackedDrg512MiBV1,
        RegisteredSealProof::StackedDrg32GiBV1,
        RegisteredSealProof::StackedDrg64GiBV1,
        RegisteredSealProof::StackedDrg2KiBV1_1,
        RegisteredSealProof::StackedDrg8MiBV1_1,
        RegisteredSealProof::StackedDrg512MiBV1_1,
        RegisteredSealProof::StackedDrg32GiBV1_1,
        RegisteredSealProof::StackedDrg64GiBV1_1,
        RegisteredSealProof::StackedDrg2KiBV1_1_Feat_SyntheticPoRep,
        RegisteredSealProof::StackedDrg8MiBV1_1_Feat_SyntheticPoRep,
        RegisteredSealProof::StackedDrg512MiBV1_1_Feat_SyntheticPoRep,
        RegisteredSealProof::StackedDrg32GiBV1_1_Feat_SyntheticPoRep,
        RegisteredSealProof::StackedDrg64GiBV1_1_Feat_SyntheticPoRep,
    ];

    #[inline]
    pub const fn registered_id(self) -> u64 {
        self as u64
    }

    pub const fn sector_size(self) -> u64 {
        use RegisteredSealProof::*;
        match self {
            StackedDrg2KiBV1 | StackedDrg2KiBV1_1 | StackedDrg2KiBV1_1_Feat_SyntheticPoRep => {
                SECTOR_SIZE_2_KIB
            }
            StackedDrg8MiBV1 | StackedDrg8MiBV1_1 | StackedDrg8MiBV1_1_Feat_SyntheticPoRep => {
                SECTOR_SIZE_8_MIB
            }
            StackedDrg512MiBV1
            | StackedDrg512MiBV1_1
            | StackedDrg512MiBV1_1_Feat_SyntheticPoRep => SECTOR_SIZE_512_MIB,
            StackedDrg32GiBV1 | StackedDrg32GiBV1_1 | StackedDrg32GiBV1_1_Feat_SyntheticPoRep => {
                SECTOR_SIZE_32_GIB
            }
            StackedDrg64GiBV1 | StackedDrg64GiBV1_1 | StackedDrg64GiBV1_1_Feat_SyntheticPoRep => {
                SECTOR_SIZE_64_GIB
            }
        }
    }

    pub fn is_synthetic(self) -> bool {
        self.registered_id() >= RegisteredSealProof::StackedDrg2KiBV1_1_Feat_SyntheticPoRep as u64
    }

    /// PoRep id: registered id (little-endian) in bytes 0..8, nonce 0 in bytes 8..16.
    pub fn porep_id(self) -> PoRepId {
        let mut porep_id = [0u8; 32];
        porep_id[..8].copy_from_slice(&self.registered_id().to_le_bytes());
        porep_id
    }

    pub fn name(self) -> &'static str {
        use RegisteredSealProof::*;
        match self {
            StackedDrg2KiBV1 => "StackedDrg2KiBV1",
            StackedDrg8MiBV1 => "StackedDrg8MiBV1",
            StackedDrg512MiBV1 => "StackedDrg512MiBV1",
            StackedDrg32GiBV1 => "StackedDrg32GiBV1",
            StackedDrg64GiBV1 => "StackedDrg64GiBV1",
            StackedDrg2KiBV1_1 => "StackedDrg2KiBV1_1",
            StackedDrg8MiBV1_1 => "StackedDrg8MiBV1_1",
            StackedDrg512MiBV1_1 => "StackedDrg512MiBV1_1",
            StackedDrg32GiBV1_1 => "StackedDrg32GiBV1_1",
            StackedDrg64GiBV1_1 => "StackedDrg64GiBV1_1",
            StackedDrg2KiBV1_1_Feat_SyntheticPoRep => "StackedDrg2KiBV1_1_Feat_SyntheticPoRep",
            StackedDrg8MiBV1_1_Feat_SyntheticPoRep => "StackedDrg8MiBV1_1_Feat_SyntheticPoRep",
            StackedDrg512MiBV1_1_Feat_SyntheticPoRep => {
                "StackedDrg512MiBV1_1_Feat_SyntheticPoRep"
            }
            StackedDrg32GiBV1_1_Feat_SyntheticPoRep => "StackedDrg32GiBV1_1_Feat_SyntheticPoRep",
            StackedDrg64GiBV1_1_Feat_SyntheticPoRep => "StackedDrg64GiBV1_1_Feat_SyntheticPoRep",
        }
    }
}

impl Display for RegisteredSealProof {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegisteredSealProof {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RegisteredSealProof::ALL
            .iter()
            .copied()
            .find(|proof| proof.name() == s)
            .ok_or_else(|| format_err!("unknown registered seal proof: {}", s))
    }
}

impl TryFrom<u64> for RegisteredSealProof {
    type Error = Error;

    fn try_from(id: u64) -> Result<Self> {
        RegisteredSealProof::ALL
            .iter()
            .copied()
            .find(|proof| proof.registered_id() == id)
            .ok_or_else(|| format_err!("unknown registered seal proof id: {}", id))
    }
}
