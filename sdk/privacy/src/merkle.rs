//! Deposit Merkle Trees
//!
//! Every denomination pool keeps an append-only tree of commitments. The
//! withdrawer never holds the tree: it rebuilds one from the deposit events it
//! has observed and extracts an inclusion path for its own leaf.
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               C0  C1 C2   Z0      (Z0 = zero leaf)
//! ```
//!
//! Nodes are hashed with MiMC. Empty positions are filled with the zero value
//! for their level, so a tree of height `H` always has `2^H` leaves.

use std::collections::VecDeque;
use std::sync::LazyLock;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commitment::Commitment;
use crate::mimc::MiMC;
use crate::poseidon::field_to_bytes;

/// Height of every deposit pool tree
pub const MERKLE_TREE_HEIGHT: usize = 20;

/// Largest supported height (leaf indices are `u32`)
pub const MAX_TREE_HEIGHT: usize = 32;

/// Number of recent roots a pool accepts
pub const ROOT_HISTORY_SIZE: usize = 30;

/// Tag hashed into the level-0 zero value
const ZERO_VALUE_TAG: &[u8] = b"mintbridge";

static HASHER: LazyLock<MerkleHasher> = LazyLock::new(MerkleHasher::new);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("deposit {0} is not in the observed leaf set")]
    NotFound(Commitment),
    #[error("observed leaves are not contiguous: expected index {expected}, got {found}")]
    NonContiguous { expected: u32, found: u32 },
    #[error("tree of height {height} cannot hold {leaves} leaves")]
    TreeFull { height: usize, leaves: u64 },
    #[error("unsupported tree height {0}")]
    InvalidHeight(usize),
}

/// A leaf as reported by a deposit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub index: u32,
    pub commitment: Commitment,
}

impl Leaf {
    pub fn new(index: u32, commitment: Commitment) -> Self {
        Self { index, commitment }
    }
}

/// Inclusion path for one commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: [u8; 32],
    /// Sibling hashes from leaf to root
    pub path_elements: Vec<[u8; 32]>,
    /// 0 = current node is the left child, 1 = right child
    pub path_indices: Vec<u8>,
    pub leaf_index: u32,
}

impl MerkleProof {
    /// Check that the path recombines `leaf` into `self.root`
    pub fn verify(&self, leaf: &Commitment) -> bool {
        self.path_elements.len() == self.path_indices.len()
            && MerkleHasher::global().compute_root_from_path(
                &leaf.0,
                &self.path_elements,
                &self.path_indices,
            ) == self.root
    }

    pub fn height(&self) -> usize {
        self.path_elements.len()
    }
}

/// MiMC node hasher with precomputed zero subtrees
pub struct MerkleHasher {
    mimc: MiMC,
    /// zeros[i] is the root of an empty subtree of height i
    zeros: Vec<[u8; 32]>,
}

impl MerkleHasher {
    pub fn new() -> Self {
        let mimc = MiMC::new();
        let mut zeros = Vec::with_capacity(MAX_TREE_HEIGHT + 1);
        let mut current = zero_value();
        zeros.push(current);
        for _ in 0..MAX_TREE_HEIGHT {
            current = mimc.hash_2_bytes(&current, &current);
            zeros.push(current);
        }
        Self { mimc, zeros }
    }

    /// Shared instance
    pub fn global() -> &'static MerkleHasher {
        &HASHER
    }

    pub fn hash_pair(&self, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        self.mimc.hash_2_bytes(left, right)
    }

    /// Root of an empty subtree of the given height
    pub fn zero(&self, level: usize) -> &[u8; 32] {
        &self.zeros[level]
    }

    pub fn compute_root_from_path(
        &self,
        leaf: &[u8; 32],
        path_elements: &[[u8; 32]],
        path_indices: &[u8],
    ) -> [u8; 32] {
        let mut current = *leaf;
        for (sibling, index) in path_elements.iter().zip(path_indices) {
            current = if *index == 1 {
                self.hash_pair(sibling, &current)
            } else {
                self.hash_pair(&current, sibling)
            };
        }
        current
    }
}

impl Default for MerkleHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Level-0 padding: `blake3("mintbridge")` reduced into the field
pub fn zero_value() -> [u8; 32] {
    let digest = blake3::hash(ZERO_VALUE_TAG);
    field_to_bytes(Fr::from_le_bytes_mod_order(digest.as_bytes()))
}

fn check_height(height: usize) -> Result<(), MerkleError> {
    if height == 0 || height > MAX_TREE_HEIGHT {
        return Err(MerkleError::InvalidHeight(height));
    }
    Ok(())
}

fn capacity(height: usize) -> u64 {
    1u64 << height
}

/// Rebuild a tree of `height` from the observed leaves and prove `target`.
///
/// Leaves may arrive in any order but must cover `0..n` without gaps once
/// sorted. A target that is not (yet) among them yields
/// [`MerkleError::NotFound`], which callers treat as "retry later".
pub fn build_merkle_proof(
    target: &Commitment,
    height: usize,
    leaves: &[Leaf],
) -> Result<MerkleProof, MerkleError> {
    check_height(height)?;
    if leaves.len() as u64 > capacity(height) {
        return Err(MerkleError::TreeFull {
            height,
            leaves: leaves.len() as u64,
        });
    }

    let mut sorted = leaves.to_vec();
    sorted.sort_by_key(|leaf| leaf.index);
    for (expected, leaf) in sorted.iter().enumerate() {
        if leaf.index as usize != expected {
            return Err(MerkleError::NonContiguous {
                expected: expected as u32,
                found: leaf.index,
            });
        }
    }

    let leaf_index = sorted
        .iter()
        .position(|leaf| leaf.commitment == *target)
        .ok_or(MerkleError::NotFound(*target))?;

    let hasher = MerkleHasher::global();
    let mut level: Vec<[u8; 32]> = sorted.iter().map(|leaf| leaf.commitment.0).collect();
    let mut position = leaf_index;
    let mut path_elements = Vec::with_capacity(height);
    let mut path_indices = Vec::with_capacity(height);

    for depth in 0..height {
        let sibling = level
            .get(position ^ 1)
            .copied()
            .unwrap_or(*hasher.zero(depth));
        path_elements.push(sibling);
        path_indices.push((position & 1) as u8);

        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(hasher.zero(depth));
                hasher.hash_pair(&pair[0], right)
            })
            .collect();
        position >>= 1;
    }

    Ok(MerkleProof {
        root: level[0],
        path_elements,
        path_indices,
        leaf_index: leaf_index as u32,
    })
}

/// Incremental tree keeping only the rightmost filled subtree per level.
///
/// Produces the same roots as [`build_merkle_proof`] for the same leaves.
#[derive(Debug, Clone)]
pub struct TreeFrontier {
    height: usize,
    filled_subtrees: Vec<[u8; 32]>,
    next_index: u64,
    root: [u8; 32],
}

impl TreeFrontier {
    pub fn new(height: usize) -> Result<Self, MerkleError> {
        check_height(height)?;
        let hasher = MerkleHasher::global();
        Ok(Self {
            height,
            filled_subtrees: (0..height).map(|level| *hasher.zero(level)).collect(),
            next_index: 0,
            root: *hasher.zero(height),
        })
    }

    /// Append a leaf and return its index
    pub fn insert(&mut self, leaf: &Commitment) -> Result<u32, MerkleError> {
        if self.next_index >= capacity(self.height) {
            return Err(MerkleError::TreeFull {
                height: self.height,
                leaves: self.next_index + 1,
            });
        }

        let hasher = MerkleHasher::global();
        let index = self.next_index;
        let mut position = index;
        let mut current = leaf.0;

        for level in 0..self.height {
            current = if position & 1 == 0 {
                self.filled_subtrees[level] = current;
                hasher.hash_pair(&current, hasher.zero(level))
            } else {
                hasher.hash_pair(&self.filled_subtrees[level], &current)
            };
            position >>= 1;
        }

        self.root = current;
        self.next_index += 1;
        Ok(index as u32)
    }

    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

/// Ring of the most recent roots of one tree
#[derive(Debug, Clone)]
pub struct RootHistory {
    /// Most recent last
    roots: VecDeque<[u8; 32]>,
    capacity: usize,
}

impl RootHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            roots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, root: [u8; 32]) {
        if self.capacity == 0 {
            return;
        }
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    /// Whether `root` is still inside the retention window
    pub fn is_known(&self, root: &[u8; 32]) -> bool {
        self.roots.contains(root)
    }

    pub fn current(&self) -> Option<&[u8; 32]> {
        self.roots.back()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Default for RootHistory {
    fn default() -> Self {
        Self::new(ROOT_HISTORY_SIZE)
    }
}
