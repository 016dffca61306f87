//! Binary Merkle tree over state roots
//!
//! Leaves are used as-is (not re-hashed). The leaf layer is padded to the
//! next power of two with [`empty_leaf`], and every interior node is
//! `keccak256(left ‖ right)`. A single leaf is its own root.

use alloy::primitives::B256;

use crate::hash::{empty_leaf, hash_pair};

/// A fully materialized tree, leaves first
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<B256>>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build the tree. Returns `None` for an empty leaf set.
    pub fn new(leaves: &[B256]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let width = leaves.len().next_power_of_two();
        let mut layer = leaves.to_vec();
        layer.resize(width, empty_leaf());

        let mut levels = vec![layer];
        while levels.last().map_or(0, Vec::len) > 1 {
            let next = levels
                .last()
                .map(|prev| {
                    prev.chunks(2)
                        .map(|pair| hash_pair(&pair[0], &pair[1]))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            levels.push(next);
        }

        Some(Self {
            levels,
            leaf_count: leaves.len(),
        })
    }

    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Sibling path for the leaf at `index`, bottom to top
    pub fn proof(&self, index: usize) -> Option<Vec<B256>> {
        if index >= self.leaf_count {
            return None;
        }
        let mut position = index;
        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        for level in &self.levels[..self.levels.len() - 1] {
            siblings.push(level[position ^ 1]);
            position /= 2;
        }
        Some(siblings)
    }
}

/// Root of `leaves` under the padding rules above
pub fn compute_root(leaves: &[B256]) -> Option<B256> {
    MerkleTree::new(leaves).map(|tree| tree.root())
}

/// Check that `leaf` sits at `index` in the tree committed to by `root`
pub fn verify(leaf: B256, index: u64, siblings: &[B256], root: B256) -> bool {
    if siblings.len() < 64 && index >> siblings.len() != 0 {
        return false;
    }
    let mut node = leaf;
    let mut position = index;
    for sibling in siblings {
        node = if position & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        position >>= 1;
    }
    node == root
}
