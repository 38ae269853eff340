//! Mintbridge Privacy SDK
//!
//! Tornado-style deposit primitives used to unlink a burn from a mint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Deposit                                 │
//! │  nullifier (31B) ─┬──────────────► NullifierHash = H2(n)        │
//! │  secret    (31B) ─┴─► preimage ──► Commitment    = H2(n || s)   │
//! │                                         │                       │
//! │                                         ▼                       │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │          Denomination pool tree (MiMC, height 20)        │   │
//! │  │  • rebuilt from observed deposit events                  │   │
//! │  │  • inclusion path becomes the private proof input        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod deposit;
pub mod encryption;
pub mod merkle;
pub mod mimc;
pub mod nullifier;
mod poseidon;

pub use commitment::Commitment;
pub use deposit::{Deposit, PREIMAGE_BYTES, SCALAR_BYTES, new_deposit};
pub use encryption::{SealError, SealedPreimage, SealingKey};
pub use merkle::{
    Leaf, MAX_TREE_HEIGHT, MERKLE_TREE_HEIGHT, MerkleError, MerkleHasher, MerkleProof,
    ROOT_HISTORY_SIZE, RootHistory, TreeFrontier, build_merkle_proof,
};
pub use mimc::MiMC;
pub use nullifier::NullifierHash;
