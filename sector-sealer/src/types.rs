/// Root hash of a sector tree (CommD or CommR).
pub type Commitment = [u8; 32];
/// Chain randomness the replica key is derived from.
pub type Ticket = [u8; 32];
/// Interactive randomness the commit proof is challenged with.
pub type Seed = [u8; 32];
pub type ProverId = [u8; 32];
pub type ReplicaId = [u8; 32];
