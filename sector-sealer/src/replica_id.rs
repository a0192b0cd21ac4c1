use sector_storage::{ActorId, RegisteredSealProof, SectorId};
use sha2::{Digest, Sha256};

use crate::types::{Commitment, ProverId, ReplicaId, Ticket};

/// The miner actor id as an unsigned LEB128 varint, zero padded to 32 bytes.
pub fn prover_id(miner: ActorId) -> ProverId {
    let mut buf = unsigned_varint::encode::u64_buffer();
    let encoded = unsigned_varint::encode::u64(miner, &mut buf);

    let mut prover_id = [0u8; 32];
    prover_id[..encoded.len()].copy_from_slice(encoded);
    prover_id
}

/// Derives the replica id the sector key is generated from.
pub fn replica_id(
    proof: RegisteredSealProof,
    sector: SectorId,
    ticket: &Ticket,
    comm_d: &Commitment,
) -> ReplicaId {
    let hash = Sha256::new()
        .chain_update(prover_id(sector.miner))
        .chain_update(sector.number.to_be_bytes())
        .chain_update(ticket)
        .chain_update(comm_d)
        .chain_update(proof.porep_id())
        .finalize();

    let mut replica_id: ReplicaId = hash.into();
    replica_id[31] &= 0b0011_1111;
    replica_id
}
