//! Fusing two equal-height trees into one tree of the next height.
//!
//! Two modes share the entry point. When the left tree's leaves all order
//! at or before the right tree's, the fused in-order node buffer is the
//! left buffer, the new root, then the right buffer, so the merge costs a
//! single hash and two buffer splices. When the leaf ranges interleave the
//! leaves are two-way merged by byte order and the tree is rebuilt bottom
//! up; the result then has a root unrelated to either input, and paths
//! constructed against the inputs no longer verify.
//!
//! The insert path hits the cheap mode whenever elements arrive in
//! ascending order; cross-forest unions usually take the sorted mode. Both
//! keep every tree's leaves weakly sorted.

use crate::{
    combine,
    PerfectTree,
    HASH_WIDTH,
};

/// Merges two perfect trees of equal height into one of height + 1.
///
/// # Panics
/// Panics if the two trees differ in height.
#[must_use]
pub fn merge(left: PerfectTree, right: PerfectTree) -> PerfectTree {
    assert_eq!(
        left.height(),
        right.height(),
        "only equal-height trees can be merged",
    );
    if left.last_leaf() <= right.first_leaf() {
        concatenate(left, right)
    } else {
        sort_merge(left, right)
    }
}

/// Fuses `left` and `right` without rehashing; the new root is
/// `combine(left.root(), right.root())` by construction.
fn concatenate(left: PerfectTree, right: PerfectTree) -> PerfectTree {
    let root = combine(&left.root(), &right.root());
    let PerfectTree {
        height,
        mut nodes,
        mut leaves,
    } = left;
    let PerfectTree {
        nodes: right_nodes,
        leaves: right_leaves,
        ..
    } = right;
    nodes.reserve(HASH_WIDTH + right_nodes.len());
    nodes.extend_from_slice(&root);
    nodes.extend_from_slice(&right_nodes);
    leaves.extend(right_leaves);
    PerfectTree {
        height: height + 1,
        nodes,
        leaves,
    }
}

/// Two-way merges the leaf streams by byte order and rebuilds; ties drain
/// the left operand first, keeping equal elements left-biased.
fn sort_merge(left: PerfectTree, right: PerfectTree) -> PerfectTree {
    let mut merged = Vec::with_capacity(left.num_leaves() + right.num_leaves());
    let mut left_leaves = left.leaves.into_iter().peekable();
    let mut right_leaves = right.leaves.into_iter().peekable();
    while let (Some(next_left), Some(next_right)) = (left_leaves.peek(), right_leaves.peek()) {
        let take_left = next_left <= next_right;
        let source = if take_left {
            &mut left_leaves
        } else {
            &mut right_leaves
        };
        merged.push(source.next().expect("peek returned an element"));
    }
    merged.extend(left_leaves);
    merged.extend(right_leaves);
    PerfectTree::build_unchecked(merged)
}
