//! Phase-1 output handed to the second sealing phase.
//!
//! The proving library only reads the tree geometry from this structure, the paths it
//! contains are placeholders. The field names and nesting are fixed by its parser.

use std::collections::BTreeMap;

use sector_storage::RegisteredSealProof;
use serde::{Deserialize, Serialize};

use crate::cache_key::CacheKey;
use crate::types::Commitment;

const PLACEHOLDER_PATH: &str = "/placeholder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: String,
    pub path: String,
    pub rows_to_discard: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerGroup {
    #[serde(rename = "_h")]
    pub h: Option<String>,
    pub labels: Vec<StoreConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase1Output {
    pub comm_d: Commitment,
    /// Tree-d store.
    pub config: StoreConfig,
    pub labels: BTreeMap<String, LayerGroup>,
    pub registered_proof: String,
}

/// Tree geometry of one proof class. Sizes are in nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    pub group: &'static str,
    pub registered_proof: &'static str,
    pub layers: usize,
    pub layer_rows_to_discard: u64,
    pub layer_size: u64,
    pub root_rows_to_discard: u64,
    pub root_size: u64,
}

const LAYOUT_TABLE: [(RegisteredSealProof, LayerGeometry); 5] = [
    (
        RegisteredSealProof::StackedDrg2KiBV1_1,
        LayerGeometry {
            group: "StackedDrg2KiBV1",
            registered_proof: "StackedDrg2KiBV1_1",
            layers: 2,
            layer_rows_to_discard: 0,
            layer_size: 64,
            root_rows_to_discard: 0,
            root_size: 127,
        },
    ),
    (
        RegisteredSealProof::StackedDrg2KiBV1_1_Feat_SyntheticPoRep,
        LayerGeometry {
            group: "StackedDrg2KiBV1",
            registered_proof: "StackedDrg2KiBV1_1",
            layers: 2,
            layer_rows_to_discard: 0,
            layer_size: 64,
            root_rows_to_discard: 0,
            root_size: 127,
        },
    ),
    (
        RegisteredSealProof::StackedDrg512MiBV1_1,
        LayerGeometry {
            group: "StackedDrg512MiBV1",
            registered_proof: "StackedDrg512MiBV1_1",
            layers: 2,
            layer_rows_to_discard: 0,
            layer_size: 16_777_216,
            root_rows_to_discard: 0,
            root_size: 33_554_431,
        },
    ),
    (
        RegisteredSealProof::StackedDrg32GiBV1_1,
        LayerGeometry {
            group: "StackedDrg32GiBV1",
            registered_proof: "StackedDrg32GiBV1_1",
            layers: 11,
            layer_rows_to_discard: 0,
            layer_size: 1_073_741_824,
            root_rows_to_discard: 0,
            root_size: 2_147_483_647,
        },
    ),
    (
        RegisteredSealProof::StackedDrg64GiBV1_1,
        LayerGeometry {
            group: "StackedDrg64GiBV1",
            registered_proof: "StackedDrg64GiBV1_1",
            layers: 11,
            layer_rows_to_discard: 0,
            layer_size: 2_147_483_648,
            root_rows_to_discard: 0,
            root_size: 4_294_967_295,
        },
    ),
];

// Every layer holds one node per 32 byte leaf and tree-d is a full binary tree over them.
const _: () = {
    let mut i = 0;
    while i < LAYOUT_TABLE.len() {
        let (proof, geometry) = LAYOUT_TABLE[i];
        assert!(geometry.layer_size * 32 == proof.sector_size());
        assert!(geometry.root_size == 2 * geometry.layer_size - 1);
        i += 1;
    }
};

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("no layer geometry for proof class {0}")]
    UnsupportedProofClass(RegisteredSealProof),
    #[error("could not encode phase-1 output: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn layer_geometry(proof: RegisteredSealProof) -> Option<LayerGeometry> {
    LAYOUT_TABLE
        .into_iter()
        .find(|(class, _)| *class == proof)
        .map(|(_, geometry)| geometry)
}

/// Proof classes with a known geometry.
pub fn supported_proofs() -> impl Iterator<Item = RegisteredSealProof> {
    LAYOUT_TABLE.into_iter().map(|(proof, _)| proof)
}

pub fn phase1_output(
    comm_d: Commitment,
    proof: RegisteredSealProof,
) -> Result<Phase1Output, LayoutError> {
    let geometry = layer_geometry(proof).ok_or(LayoutError::UnsupportedProofClass(proof))?;

    let labels = (1..=geometry.layers)
        .map(|layer| StoreConfig {
            id: CacheKey::label_layer(layer),
            path: PLACEHOLDER_PATH.to_string(),
            rows_to_discard: geometry.layer_rows_to_discard,
            size: geometry.layer_size,
        })
        .collect();

    let mut groups = BTreeMap::new();
    groups.insert(
        geometry.group.to_string(),
        LayerGroup { h: None, labels },
    );

    Ok(Phase1Output {
        comm_d,
        config: StoreConfig {
            id: CacheKey::CommDTree.to_string(),
            path: PLACEHOLDER_PATH.to_string(),
            rows_to_discard: geometry.root_rows_to_discard,
            size: geometry.root_size,
        },
        labels: groups,
        registered_proof: geometry.registered_proof.to_string(),
    })
}

/// Builds the phase-1 output for `proof` and serializes it.
pub fn encode_phase1_output(
    comm_d: Commitment,
    proof: RegisteredSealProof,
) -> Result<Vec<u8>, LayoutError> {
    Ok(serde_json::to_vec(&phase1_output(comm_d, proof)?)?)
}
