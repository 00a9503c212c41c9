//! Proving that an element is, or is not, part of the forest.
//!
//! Both proof kinds bottom out in the same kernel, [`PathProof`]: the sibling
//! hashes along the path from one leaf to the root of its subtree. An
//! [`InclusionProof`] carries one path plus the roots of all peer subtrees;
//! an [`ExclusionProof`] carries one witness per subtree, each made of the
//! path(s) to the sorted leaves that bracket the missing element.
//!
//! Verification never trusts structure: every path is shape-checked before
//! any index arithmetic, ordering predicates are strict, and any failure
//! surfaces as a plain `false`.

use crate::{
    combine,
    hash_leaf,
    hash_roots,
    HASH_WIDTH,
    MAX_HEIGHT,
};

/// The sibling hashes from a leaf to the root of its subtree.
///
/// The path is the concatenation of `height` 32-byte hashes, deepest sibling
/// first. Which side each sibling sits on is not stored: in a perfect tree
/// bit `d` of the leaf index says whether the sibling at depth `d` is the
/// right (`0`) or the left (`1`) operand of the combine step.
///
/// The path contains neither the leaf hash nor the root; the verifier
/// supplies the leaf and compares the reconstruction against the root it
/// already trusts.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathProof {
    audit_path: Vec<u8>,
    leaf_index: usize,
}

impl PathProof {
    pub(crate) fn new(audit_path: Vec<u8>, leaf_index: usize) -> Self {
        let proof = Self {
            audit_path,
            leaf_index,
        };
        debug_assert!(proof.is_well_formed());
        proof
    }

    pub fn unchecked() -> UncheckedPathProof {
        UncheckedPathProof::new()
    }

    pub fn into_unchecked(self) -> UncheckedPathProof {
        let Self {
            audit_path,
            leaf_index,
        } = self;
        UncheckedPathProof {
            audit_path,
            leaf_index,
        }
    }

    /// Returns the concatenated sibling hashes, deepest first.
    #[must_use]
    #[inline]
    pub fn audit_path(&self) -> &[u8] {
        &self.audit_path
    }

    /// Returns the index of the leaf this path starts from.
    #[must_use]
    #[inline]
    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    /// Returns the number of siblings in the path, which equals the height
    /// of the subtree it was constructed in.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.audit_path.len() / HASH_WIDTH
    }

    /// Returns if the path has no siblings, as for a single-leaf subtree.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.audit_path.is_empty()
    }

    /// Returns the height of the subtree this path was constructed in.
    #[must_use]
    #[inline]
    pub fn height(&self) -> u32 {
        self.len() as u32
    }

    /// Returns the number of leaves of the subtree, `2^height`.
    ///
    /// Only meaningful for well-formed paths; verifiers shape-check first.
    #[must_use]
    pub(crate) fn num_leaves(&self) -> usize {
        1 << self.height()
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.audit_path.len() % HASH_WIDTH == 0
            && self.height() <= MAX_HEIGHT
            && self.leaf_index < 1 << self.height()
    }

    /// Walks the audit path to reconstruct the subtree root starting from a
    /// leaf hash.
    ///
    /// # Examples
    /// ```
    /// use canopy_forest::{
    ///     hash_leaf,
    ///     PerfectTree,
    /// };
    /// let tree = PerfectTree::from_sorted_leaves(vec![
    ///     b"ash".to_vec(),
    ///     b"fir".to_vec(),
    ///     b"oak".to_vec(),
    ///     b"yew".to_vec(),
    /// ])
    /// .unwrap();
    /// let proof = tree.construct_proof(2).expect("leaf 2 is inside the tree");
    /// assert_eq!(
    ///     tree.root(),
    ///     proof.reconstruct_root_with_leaf_hash(hash_leaf(b"oak")),
    /// );
    /// ```
    #[must_use]
    pub fn reconstruct_root_with_leaf_hash(&self, leaf_hash: [u8; 32]) -> [u8; 32] {
        let mut acc = leaf_hash;
        for (depth, sibling) in self.audit_path.chunks(HASH_WIDTH).enumerate() {
            let sibling_on_left = self
                .leaf_index
                .checked_shr(depth as u32)
                .unwrap_or_default()
                & 1
                == 1;
            if sibling_on_left {
                acc = combine(sibling, &acc);
            } else {
                acc = combine(&acc, sibling);
            }
        }
        acc
    }

    /// Walks the audit path starting from an element encoding, hashing it
    /// into the leaf hash first.
    #[must_use]
    pub fn reconstruct_root_with_leaf(&self, element: &[u8]) -> [u8; 32] {
        self.reconstruct_root_with_leaf_hash(hash_leaf(element))
    }
}

/// A builder pattern shadowing [`PathProof`] with unchecked fields.
///
/// Mainly useful when deserializing a path received over the wire:
/// [`UncheckedPathProof::try_into_proof`] rejects paths whose shape cannot
/// belong to any perfect tree.
///
/// # Examples
/// ```rust
/// use canopy_forest::PathProof;
/// let proof = PathProof::unchecked()
///     .audit_path(vec![42; 96])
///     .leaf_index(5)
///     .try_into_proof()
///     .expect("is a valid path for a height-3 tree");
/// ```
#[derive(Debug, Default)]
pub struct UncheckedPathProof {
    pub audit_path: Vec<u8>,
    pub leaf_index: usize,
}

impl UncheckedPathProof {
    fn new() -> Self {
        Self::default()
    }

    /// Sets the concatenated sibling hashes; the length must be a multiple
    /// of 32.
    #[must_use]
    pub fn audit_path(self, audit_path: Vec<u8>) -> Self {
        Self {
            audit_path,
            ..self
        }
    }

    /// Sets the index of the leaf the path starts from; it must fall inside
    /// a tree whose height is the number of path segments.
    #[must_use]
    pub fn leaf_index(self, leaf_index: usize) -> Self {
        Self {
            leaf_index,
            ..self
        }
    }

    /// Constructs the [`PathProof`] from the builder inputs.
    ///
    /// # Errors
    /// Returns an error if the audit path length is not a multiple of 32, if
    /// it has more segments than the greatest supported tree height, or if
    /// the leaf index falls outside a tree of that height.
    pub fn try_into_proof(self) -> Result<PathProof, InvalidPathProof> {
        let Self {
            audit_path,
            leaf_index,
        } = self;

        if audit_path.len() % HASH_WIDTH != 0 {
            return Err(InvalidPathProof::not_multiple_of_hash_width(
                audit_path.len(),
            ));
        }

        let height = (audit_path.len() / HASH_WIDTH) as u32;
        if height > MAX_HEIGHT {
            return Err(InvalidPathProof::too_many_segments(height));
        }

        if leaf_index >= 1 << height {
            return Err(InvalidPathProof::leaf_index_outside_tree(
                leaf_index, height,
            ));
        }

        Ok(PathProof {
            audit_path,
            leaf_index,
        })
    }
}

/// Error of converting an [`UncheckedPathProof`] into a [`PathProof`].
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct InvalidPathProof(InvalidPathProofKind);

impl InvalidPathProof {
    fn not_multiple_of_hash_width(len: usize) -> Self {
        Self(InvalidPathProofKind::NotMultipleOfHashWidth {
            len,
        })
    }

    fn too_many_segments(height: u32) -> Self {
        Self(InvalidPathProofKind::TooManySegments {
            height,
        })
    }

    fn leaf_index_outside_tree(leaf_index: usize, height: u32) -> Self {
        Self(InvalidPathProofKind::LeafIndexOutsideTree {
            leaf_index,
            height,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum InvalidPathProofKind {
    #[error("audit path byte length must be a multiple of 32, but was {len}")]
    NotMultipleOfHashWidth { len: usize },
    #[error("audit path with {height} segments exceeds the greatest supported tree height")]
    TooManySegments { height: u32 },
    #[error("leaf index {leaf_index} falls outside a tree of height {height}")]
    LeafIndexOutsideTree { leaf_index: usize, height: u32 },
}

/// Proof that one element is a leaf of the forest.
///
/// The embedded [`PathProof`] reconstructs the root of the subtree holding
/// the element; `peer_roots` lists the roots of every other subtree in
/// forest order, so the verifier can reassemble the forest root with the
/// reconstructed root spliced in at `subtree_index`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InclusionProof {
    value: Vec<u8>,
    subtree_index: usize,
    path: PathProof,
    peer_roots: Vec<[u8; 32]>,
}

impl InclusionProof {
    /// Assembles a proof from its parts, as when decoding one received over
    /// the wire.
    ///
    /// No validation happens here; a proof assembled from inconsistent
    /// parts simply fails [`InclusionProof::verify`].
    #[must_use]
    pub fn from_parts(
        value: Vec<u8>,
        subtree_index: usize,
        path: PathProof,
        peer_roots: Vec<[u8; 32]>,
    ) -> Self {
        Self {
            value,
            subtree_index,
            path,
            peer_roots,
        }
    }

    /// Returns the element encoding under proof.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the position of the covering subtree in the forest.
    #[must_use]
    pub fn subtree_index(&self) -> usize {
        self.subtree_index
    }

    #[must_use]
    pub fn path(&self) -> &PathProof {
        &self.path
    }

    /// Returns the roots of all other subtrees in forest order.
    #[must_use]
    pub fn peer_roots(&self) -> &[[u8; 32]] {
        &self.peer_roots
    }

    /// Returns if the proof binds the element to `expected_root`.
    ///
    /// # Examples
    /// ```
    /// use canopy_forest::Forest;
    /// let forest = Forest::from_elements([b"ash", b"fir", b"oak"]);
    /// let proof = forest.prove_inclusion(b"fir").expect("fir was inserted");
    /// assert!(proof.verify(forest.root()));
    /// assert!(!proof.verify([0; 32]));
    /// ```
    #[must_use = "verifying a proof is only useful if the result is checked"]
    pub fn verify(&self, expected_root: [u8; 32]) -> bool {
        if !self.path.is_well_formed() || self.subtree_index > self.peer_roots.len() {
            return false;
        }
        let subtree_root = self.path.reconstruct_root_with_leaf(&self.value);
        let (before, after) = self.peer_roots.split_at(self.subtree_index);
        let root = hash_roots(
            before
                .iter()
                .copied()
                .chain([subtree_root])
                .chain(after.iter().copied()),
        );
        root == expected_root
    }
}

/// Witness that one subtree does not contain the target element.
///
/// Sorted leaves make each form sufficient: a proven leaf at the subtree
/// boundary, or a proven *adjacent* pair bracketing the target, leaves no
/// index where the target could hide.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubtreeExclusion {
    /// The forest has no subtrees at all; only the empty forest's proof
    /// carries this, as its sole witness.
    Empty,
    /// The target orders strictly before the subtree's leftmost leaf.
    BeforeAll {
        successor: Vec<u8>,
        successor_proof: PathProof,
    },
    /// The target orders strictly after the subtree's rightmost leaf.
    AfterAll {
        predecessor: Vec<u8>,
        predecessor_proof: PathProof,
    },
    /// Two adjacent leaves strictly bracket the target.
    Between {
        predecessor: Vec<u8>,
        predecessor_proof: PathProof,
        successor: Vec<u8>,
        successor_proof: PathProof,
    },
}

impl SubtreeExclusion {
    /// Checks the witness's ordering and boundary predicates against
    /// `target` and reconstructs the subtree root it commits to.
    ///
    /// Returns `None` for an invalid witness, and always for [`Empty`],
    /// which commits to no subtree.
    ///
    /// [`Empty`]: SubtreeExclusion::Empty
    fn subtree_root(&self, target: &[u8]) -> Option<[u8; 32]> {
        match self {
            SubtreeExclusion::Empty => None,
            SubtreeExclusion::BeforeAll {
                successor,
                successor_proof,
            } => {
                if !successor_proof.is_well_formed()
                    || successor_proof.leaf_index() != 0
                    || target >= successor.as_slice()
                {
                    return None;
                }
                Some(successor_proof.reconstruct_root_with_leaf(successor))
            }
            SubtreeExclusion::AfterAll {
                predecessor,
                predecessor_proof,
            } => {
                if !predecessor_proof.is_well_formed()
                    || predecessor_proof.leaf_index() != predecessor_proof.num_leaves() - 1
                    || predecessor.as_slice() >= target
                {
                    return None;
                }
                Some(predecessor_proof.reconstruct_root_with_leaf(predecessor))
            }
            SubtreeExclusion::Between {
                predecessor,
                predecessor_proof,
                successor,
                successor_proof,
            } => {
                if !predecessor_proof.is_well_formed() || !successor_proof.is_well_formed() {
                    return None;
                }
                // Adjacency of the two leaf indices is the load-bearing
                // fact: it rules out any leaf between the pair.
                if predecessor_proof.height() != successor_proof.height()
                    || successor_proof.leaf_index() != predecessor_proof.leaf_index() + 1
                {
                    return None;
                }
                if predecessor.as_slice() >= target || target >= successor.as_slice() {
                    return None;
                }
                let root = predecessor_proof.reconstruct_root_with_leaf(predecessor);
                if successor_proof.reconstruct_root_with_leaf(successor) != root {
                    return None;
                }
                Some(root)
            }
        }
    }
}

/// Proof that an element is absent from the forest.
///
/// Subtrees do not share a global leaf order, so absence is proven from
/// every subtree independently: one [`SubtreeExclusion`] per subtree, in
/// forest order. Verification reconstructs every subtree root from its
/// witness and reassembles the forest root, so a proof that skips or
/// reorders subtrees cannot verify.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExclusionProof {
    target: Vec<u8>,
    witnesses: Vec<SubtreeExclusion>,
}

impl ExclusionProof {
    /// Assembles a proof from its parts, as when decoding one received over
    /// the wire.
    ///
    /// No validation happens here; a proof assembled from inconsistent
    /// parts simply fails [`ExclusionProof::verify`].
    #[must_use]
    pub fn from_parts(target: Vec<u8>, witnesses: Vec<SubtreeExclusion>) -> Self {
        Self {
            target,
            witnesses,
        }
    }

    /// Returns the element encoding proven absent.
    #[must_use]
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// Returns the per-subtree witnesses in forest order.
    #[must_use]
    pub fn witnesses(&self) -> &[SubtreeExclusion] {
        &self.witnesses
    }

    /// Returns if the proof binds the target's absence to `expected_root`.
    ///
    /// # Examples
    /// ```
    /// use canopy_forest::Forest;
    /// let forest = Forest::from_elements([b"ash", b"fir", b"oak"]);
    /// let proof = forest
    ///     .prove_exclusion(b"elm")
    ///     .expect("elm was never inserted");
    /// assert!(proof.verify(forest.root()));
    /// ```
    #[must_use = "verifying a proof is only useful if the result is checked"]
    pub fn verify(&self, expected_root: [u8; 32]) -> bool {
        let has_empty = self
            .witnesses
            .iter()
            .any(|witness| matches!(witness, SubtreeExclusion::Empty));
        if has_empty && self.witnesses.len() != 1 {
            return false;
        }
        let mut roots = Vec::with_capacity(self.witnesses.len());
        for witness in &self.witnesses {
            if matches!(witness, SubtreeExclusion::Empty) {
                continue;
            }
            match witness.subtree_root(&self.target) {
                Some(root) => roots.push(root),
                None => return false,
            }
        }
        hash_roots(roots) == expected_root
    }
}
