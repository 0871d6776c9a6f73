// src/merkle.rs
// Binary SHA-256 commitment trees over client digests

use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

/// Fixed-length client digest; leaves of the commitment tree.
pub type Digest = [u8; 32];

/// Which side the sibling hash sits on when re-hashing upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion path: the sibling hash and its position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Merkle tree over an ordered list of digests.
///
/// Leaves enter the tree as-is (no pre-hash); every internal node is
/// SHA256(left || right). A level with an odd node count promotes the lone
/// trailing node unchanged to the next level. `build` and `verify` agree on
/// this rule, so re-hashing a leaf through its path reproduces the root.
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree over the given ordered digests.
    ///
    /// Deterministic: the same ordered input always yields the same root and
    /// the same per-index paths. Duplicate digests each occupy their own leaf
    /// and receive independent valid paths. Panics on empty input; callers
    /// skip empty batches.
    pub fn build(digests: &[Digest]) -> Self {
        assert!(!digests.is_empty(), "cannot build a tree over zero digests");

        let mut levels = vec![digests.to_vec()];
        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let prev = levels.last().expect("levels never empty");
            let mut next = Vec::with_capacity((prev.len() + 1) / 2);
            for chunk in prev.chunks(2) {
                if chunk.len() == 2 {
                    next.push(hash_pair(&chunk[0], &chunk[1]));
                } else {
                    // odd, promote unchanged
                    next.push(chunk[0]);
                }
            }
            levels.push(next);
        }
        MerkleTree { levels }
    }

    pub fn root(&self) -> Digest {
        self.levels.last().expect("levels never empty")[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Inclusion path for the leaf at `index`, ordered leaf-to-root.
    ///
    /// Levels where the node was promoted unchanged contribute no step.
    pub fn path(&self, index: usize) -> Vec<InclusionStep> {
        assert!(index < self.leaf_count(), "leaf index out of bounds");

        let mut steps = Vec::new();
        let mut idx = index;
        for level in &self.levels {
            if level.len() == 1 {
                break;
            }
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            if sibling_idx < level.len() {
                steps.push(InclusionStep {
                    sibling: level[sibling_idx],
                    side: if idx % 2 == 0 { Side::Right } else { Side::Left },
                });
            }
            // lone promoted nodes keep their hash and just move up
            idx /= 2;
        }
        steps
    }
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Re-hash `leaf` through `path` and compare against `expected_root`.
pub fn verify(leaf: &Digest, path: &[InclusionStep], expected_root: &Digest) -> bool {
    let mut current = *leaf;
    for step in path {
        current = match step.side {
            Side::Right => hash_pair(&current, &step.sibling),
            Side::Left => hash_pair(&step.sibling, &current),
        };
    }
    current == *expected_root
}
