//! The forest: an ordered sequence of perfect trees committing to the
//! whole multiset.

use std::collections::BTreeMap;

use crate::{
    audit::{
        ExclusionProof,
        InclusionProof,
        SubtreeExclusion,
    },
    hash_roots,
    merge,
    LocateResult,
    PerfectTree,
};

/// An insert-only authenticated multiset of byte-string elements.
///
/// The forest holds one perfect tree per set bit of its cardinality, in
/// strictly decreasing height order, plus a cached root over the subtree
/// roots in that order. Each subtree's leaves are individually sorted, but
/// subtrees partition the elements by insertion epoch, not by value, so
/// membership queries probe every subtree.
///
/// Mutation happens only through [`Forest::insert`] and
/// [`Forest::merge_with`]; both leave the forest in canonical form, and the
/// committed root after an insert reflects all prior inserts and the new
/// element. Trees are immutable once built, so cloning a forest is a cheap
/// way to snapshot a state whose proofs stay valid forever.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forest {
    trees: Vec<PerfectTree>,
    cardinality: u64,
    root: [u8; 32],
}

impl Forest {
    /// Creates an empty forest. Its root is the fixed empty-forest digest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trees: Vec::new(),
            cardinality: 0,
            root: crate::empty_forest_root(),
        }
    }

    /// Constructs a forest by inserting every element yielded by `iter`.
    pub fn from_elements<I, B>(iter: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut forest = Self::new();
        for element in iter {
            forest.insert(element.as_ref());
        }
        forest
    }

    /// Reassembles a forest from subtrees, as when loading persisted state.
    ///
    /// # Errors
    /// Returns an error if the subtree heights are not strictly decreasing.
    pub fn from_trees(trees: Vec<PerfectTree>) -> Result<Self, BuildForestError> {
        if let Some(position) = trees
            .windows(2)
            .position(|pair| pair[0].height() <= pair[1].height())
        {
            return Err(BuildForestError::non_descending_heights(position + 1));
        }
        let cardinality = trees.iter().map(|tree| tree.num_leaves() as u64).sum();
        let root = hash_roots(trees.iter().map(PerfectTree::root));
        Ok(Self {
            trees,
            cardinality,
            root,
        })
    }

    /// Inserts one element.
    ///
    /// The element becomes a single-leaf tree at the tail; while the two
    /// rightmost trees have equal height they are fused, which is exactly
    /// carry propagation in a binary counter. After `n` inserts the subtree
    /// heights match the set bits of `n`.
    pub fn insert(&mut self, element: impl AsRef<[u8]>) {
        self.trees
            .push(PerfectTree::stub(element.as_ref().to_vec()));
        while let [.., left, right] = self.trees.as_slice() {
            if left.height() != right.height() {
                break;
            }
            let right = self
                .trees
                .pop()
                .expect("the carry loop matched two trees at the tail");
            let left = self
                .trees
                .pop()
                .expect("the carry loop matched two trees at the tail");
            self.trees.push(merge::merge(left, right));
        }
        self.cardinality += 1;
        self.recompute_root();
    }

    /// Produces the union of the two multisets as a new canonical forest.
    ///
    /// Subtrees of both operands are combined like the digits of two binary
    /// numerals: pairs of equal-height trees are merged into a carry of the
    /// next height, from height zero upward. Equal-height pairs with
    /// interleaving leaf ranges take the sorted merge path, so the union is
    /// commutative: `a.merge_with(b)` and `b.merge_with(a)` commit to the
    /// same root. Which elements share a subtree still depends on the
    /// operands' shapes, as it does for sequential inserts.
    #[must_use]
    pub fn merge_with(self, other: Forest) -> Forest {
        let cardinality = self.cardinality + other.cardinality;
        let mut by_height: BTreeMap<u32, Vec<PerfectTree>> = BTreeMap::new();
        for tree in self.trees.into_iter().chain(other.trees) {
            by_height.entry(tree.height()).or_default().push(tree);
        }
        let mut trees = Vec::new();
        let mut carry: Option<PerfectTree> = None;
        let mut height = 0;
        while carry.is_some() || !by_height.is_empty() {
            let mut at_height = Vec::with_capacity(3);
            at_height.extend(carry.take());
            at_height.extend(by_height.remove(&height).unwrap_or_default());
            match at_height.len() {
                0 => {}
                1 => trees.extend(at_height.pop()),
                2 => {
                    let right = at_height.pop().expect("two trees are present");
                    let left = at_height.pop().expect("two trees are present");
                    carry = Some(merge::merge(left, right));
                }
                _ => {
                    let right = at_height.pop().expect("three trees are present");
                    let left = at_height.pop().expect("three trees are present");
                    carry = Some(merge::merge(left, right));
                    trees.extend(at_height.pop());
                }
            }
            height += 1;
        }
        trees.reverse();
        let root = hash_roots(trees.iter().map(PerfectTree::root));
        Forest {
            trees,
            cardinality,
            root,
        }
    }

    /// Returns the forest root, the sole public commitment to the multiset.
    #[must_use]
    #[inline]
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Returns the number of elements inserted so far.
    #[must_use]
    #[inline]
    pub fn len(&self) -> u64 {
        self.cardinality
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }

    /// Returns the subtrees in forest order, largest first.
    #[must_use]
    pub fn trees(&self) -> &[PerfectTree] {
        &self.trees
    }

    /// Iterates over the subtree roots in forest order.
    pub fn subtree_roots(&self) -> impl ExactSizeIterator<Item = [u8; 32]> + '_ {
        self.trees.iter().map(PerfectTree::root)
    }

    /// Returns if at least one occurrence of `element` is in the multiset.
    #[must_use]
    pub fn contains(&self, element: impl AsRef<[u8]>) -> bool {
        let element = element.as_ref();
        self.trees
            .iter()
            .any(|tree| matches!(tree.find(element), LocateResult::Found(_)))
    }

    /// Locates `element` in every subtree, in forest order.
    #[must_use]
    pub fn locate(&self, element: &[u8]) -> Vec<LocateResult> {
        self.trees.iter().map(|tree| tree.find(element)).collect()
    }

    /// Proves that `element` is in the multiset.
    ///
    /// Returns `None` if it is not. When the element occurs more than once
    /// the proof deterministically covers the leftmost occurrence in the
    /// leftmost covering subtree.
    #[must_use]
    pub fn prove_inclusion(&self, element: impl AsRef<[u8]>) -> Option<InclusionProof> {
        let element = element.as_ref();
        for (subtree_index, tree) in self.trees.iter().enumerate() {
            let LocateResult::Found(leaf_index) = tree.find(element) else {
                continue;
            };
            let path = tree
                .construct_proof(leaf_index)
                .expect("find returned an index inside the tree");
            let peer_roots = self
                .trees
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != subtree_index)
                .map(|(_, peer)| peer.root())
                .collect();
            return Some(InclusionProof::from_parts(
                element.to_vec(),
                subtree_index,
                path,
                peer_roots,
            ));
        }
        None
    }

    /// Proves that `element` is absent from the multiset.
    ///
    /// Returns `None` if any subtree contains it. The proof carries one
    /// witness per subtree in forest order; the empty forest yields a
    /// single [`SubtreeExclusion::Empty`] witness.
    #[must_use]
    pub fn prove_exclusion(&self, element: impl AsRef<[u8]>) -> Option<ExclusionProof> {
        let target = element.as_ref();
        let mut witnesses = Vec::with_capacity(self.trees.len().max(1));
        if self.trees.is_empty() {
            witnesses.push(SubtreeExclusion::Empty);
        }
        for tree in &self.trees {
            let witness = match tree.find(target) {
                LocateResult::Found(_) => return None,
                LocateResult::BeforeAll => SubtreeExclusion::BeforeAll {
                    successor: tree
                        .leaf(0)
                        .expect("a perfect tree holds at least one leaf")
                        .to_vec(),
                    successor_proof: tree
                        .construct_proof(0)
                        .expect("leaf 0 is inside every tree"),
                },
                LocateResult::AfterAll => {
                    let last = tree.num_leaves() - 1;
                    SubtreeExclusion::AfterAll {
                        predecessor: tree
                            .leaf(last)
                            .expect("the last leaf is inside the tree")
                            .to_vec(),
                        predecessor_proof: tree
                            .construct_proof(last)
                            .expect("the last leaf is inside the tree"),
                    }
                }
                LocateResult::GapBetween(predecessor, successor) => SubtreeExclusion::Between {
                    predecessor: tree
                        .leaf(predecessor)
                        .expect("find returned an index inside the tree")
                        .to_vec(),
                    predecessor_proof: tree
                        .construct_proof(predecessor)
                        .expect("find returned an index inside the tree"),
                    successor: tree
                        .leaf(successor)
                        .expect("find returned an index inside the tree")
                        .to_vec(),
                    successor_proof: tree
                        .construct_proof(successor)
                        .expect("find returned an index inside the tree"),
                },
            };
            witnesses.push(witness);
        }
        Some(ExclusionProof::from_parts(target.to_vec(), witnesses))
    }

    fn recompute_root(&mut self) {
        self.root = hash_roots(self.trees.iter().map(PerfectTree::root));
    }
}

impl Default for Forest {
    fn default() -> Self {
        Forest::new()
    }
}

/// Error returned when subtrees do not form a canonical forest.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct BuildForestError(BuildForestErrorKind);

impl BuildForestError {
    fn non_descending_heights(index: usize) -> Self {
        Self(BuildForestErrorKind::NonDescendingHeights {
            index,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum BuildForestErrorKind {
    #[error(
        "subtree heights must be strictly decreasing, but the tree at index {index} is at least \
         as tall as its predecessor"
    )]
    NonDescendingHeights { index: usize },
}
