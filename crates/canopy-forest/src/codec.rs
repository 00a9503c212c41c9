//! Serializing perfect trees to and from flat byte streams.
//!
//! A tree file is a fixed header followed by every node hash in post-order:
//! each leaf before its parent, each subtree fully emitted before its right
//! sibling, the root last. For a height-2 tree over leaves `1..4` with
//! branches `a = (1,2)`, `b = (3,4)` and root `r` the digest order is
//!
//! ```text
//! 1 2 a 3 4 b r
//! ```
//!
//! Digests are fixed width, so no per-node framing is needed; a writer can
//! emit every node the moment its children are out, and a reader performing
//! a two-way merge can pick the sorted leaves out of the stream by position
//! alone. The element encodings follow the digests, length-prefixed, since
//! element-side search needs the encodings and not just their hashes.
//!
//! Decoding trusts nothing: every branch digest is recomputed from the
//! element payloads and compared against the stream, so a single flipped
//! byte anywhere in the file fails the decode.

use std::io::{
    self,
    Read,
    Write,
};

use crate::{
    is_branch,
    perfect_left_child,
    perfect_right_child,
    perfect_root,
    PerfectTree,
    HASH_WIDTH,
    MAX_HEIGHT,
};

/// First bytes of every serialized tree.
pub const MAGIC: [u8; 4] = *b"CNPY";

/// Current serialization format version.
pub const FORMAT_VERSION: u8 = 1;

/// Writes `tree` to `writer` in the layout described at the module root.
///
/// # Errors
/// Returns an error if `writer` fails, or if a leaf encoding is too long
/// for its `u32` length prefix.
pub fn encode_tree<W: Write>(tree: &PerfectTree, writer: &mut W) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[
        FORMAT_VERSION,
        HASH_WIDTH as u8,
        tree.height()
            .try_into()
            .expect("tree heights fit into a byte"),
    ])?;
    write_subtree(tree, perfect_root(tree.node_count()), writer)?;
    for leaf in tree.leaves() {
        let len = u32::try_from(leaf.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "leaf encoding exceeds the u32 length prefix",
            )
        })?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(leaf)?;
    }
    Ok(())
}

/// Emits the subtree rooted at in-order index `index` in post-order.
fn write_subtree<W: Write>(tree: &PerfectTree, index: usize, writer: &mut W) -> io::Result<()> {
    if is_branch(index) {
        write_subtree(tree, perfect_left_child(index), writer)?;
        write_subtree(tree, perfect_right_child(index), writer)?;
    }
    writer.write_all(&tree.node(index))
}

/// Reads one tree from `reader`, revalidating every digest.
///
/// Buffers grow only as stream bytes actually arrive, so a header lying
/// about the height or a payload lying about its length runs out of stream
/// and fails, rather than reserving the claimed size upfront.
///
/// # Errors
/// Returns an error if `reader` fails, the header is not this format or
/// does not fit in memory, the leaf encodings are unsorted, or any digest
/// in the stream differs from the one recomputed from the payloads.
pub fn decode_tree<R: Read>(reader: &mut R) -> Result<PerfectTree, DecodeError> {
    let mut magic = [0; 4];
    reader.read_exact(&mut magic).map_err(DecodeError::io)?;
    if magic != MAGIC {
        return Err(DecodeError::bad_magic(magic));
    }
    let mut header = [0; 3];
    reader.read_exact(&mut header).map_err(DecodeError::io)?;
    let [version, hash_width, height] = header;
    if version != FORMAT_VERSION {
        return Err(DecodeError::unsupported_version(version));
    }
    if usize::from(hash_width) != HASH_WIDTH {
        return Err(DecodeError::unsupported_hash_width(hash_width));
    }
    if u32::from(height) > MAX_HEIGHT {
        return Err(DecodeError::height_out_of_range(height));
    }
    let (num_leaves, node_count) = tree_dimensions(height)?;

    let mut digests = Vec::new();
    let mut digest = [0; HASH_WIDTH];
    for _ in 0..node_count {
        reader.read_exact(&mut digest).map_err(DecodeError::io)?;
        digests.extend_from_slice(&digest);
    }

    // the digest section was fully present, so the header was honest and
    // num_leaves is safe to reserve for
    let mut leaves = Vec::with_capacity(num_leaves);
    for index in 0..num_leaves {
        let mut len_bytes = [0; 4];
        reader.read_exact(&mut len_bytes).map_err(DecodeError::io)?;
        let len = u64::from(u32::from_le_bytes(len_bytes));
        let mut payload = Vec::new();
        reader
            .by_ref()
            .take(len)
            .read_to_end(&mut payload)
            .map_err(DecodeError::io)?;
        if (payload.len() as u64) < len {
            return Err(DecodeError::io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "leaf payload is shorter than its length prefix",
            )));
        }
        if leaves
            .last()
            .is_some_and(|previous: &Vec<u8>| previous > &payload)
        {
            return Err(DecodeError::unsorted_leaves(index));
        }
        leaves.push(payload);
    }

    let tree = PerfectTree::build_unchecked(leaves);
    let mut cursor = 0;
    compare_subtree(&tree, perfect_root(node_count), &digests, &mut cursor)?;
    Ok(tree)
}

/// Computes `(num_leaves, node_count)` for a header height, erroring when
/// the node buffer cannot be addressed on this platform.
fn tree_dimensions(height: u8) -> Result<(usize, usize), DecodeError> {
    let num_leaves = 1usize
        .checked_shl(height.into())
        .ok_or_else(|| DecodeError::tree_too_large(height))?;
    let node_count = num_leaves
        .checked_mul(2)
        .and_then(|count| count.checked_sub(1))
        .filter(|count| count.checked_mul(HASH_WIDTH).is_some())
        .ok_or_else(|| DecodeError::tree_too_large(height))?;
    Ok((num_leaves, node_count))
}

/// Walks the rebuilt tree in post-order, comparing every recomputed node
/// hash against the digests read from the stream.
fn compare_subtree(
    tree: &PerfectTree,
    index: usize,
    digests: &[u8],
    cursor: &mut usize,
) -> Result<(), DecodeError> {
    if is_branch(index) {
        compare_subtree(tree, perfect_left_child(index), digests, cursor)?;
        compare_subtree(tree, perfect_right_child(index), digests, cursor)?;
    }
    let stored = &digests[*cursor * HASH_WIDTH..(*cursor + 1) * HASH_WIDTH];
    *cursor += 1;
    if tree.node(index) != stored {
        return Err(if is_branch(index) {
            DecodeError::node_hash_mismatch(index)
        } else {
            DecodeError::leaf_hash_mismatch(index / 2)
        });
    }
    Ok(())
}

/// Error deserializing a perfect tree.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DecodeError(DecodeErrorKind);

impl DecodeError {
    fn io(source: io::Error) -> Self {
        Self(DecodeErrorKind::Io {
            source,
        })
    }

    fn bad_magic(actual: [u8; 4]) -> Self {
        Self(DecodeErrorKind::BadMagic {
            actual,
        })
    }

    fn unsupported_version(actual: u8) -> Self {
        Self(DecodeErrorKind::UnsupportedVersion {
            actual,
        })
    }

    fn unsupported_hash_width(actual: u8) -> Self {
        Self(DecodeErrorKind::UnsupportedHashWidth {
            actual,
        })
    }

    fn height_out_of_range(actual: u8) -> Self {
        Self(DecodeErrorKind::HeightOutOfRange {
            actual,
        })
    }

    fn tree_too_large(height: u8) -> Self {
        Self(DecodeErrorKind::TreeTooLarge {
            height,
        })
    }

    fn unsorted_leaves(index: usize) -> Self {
        Self(DecodeErrorKind::UnsortedLeaves {
            index,
        })
    }

    fn node_hash_mismatch(index: usize) -> Self {
        Self(DecodeErrorKind::NodeHashMismatch {
            index,
        })
    }

    fn leaf_hash_mismatch(index: usize) -> Self {
        Self(DecodeErrorKind::LeafHashMismatch {
            index,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum DecodeErrorKind {
    #[error("failed reading from the underlying stream")]
    Io { source: io::Error },
    #[error("stream does not start with the tree file magic, got {actual:x?}")]
    BadMagic { actual: [u8; 4] },
    #[error("unsupported format version {actual}")]
    UnsupportedVersion { actual: u8 },
    #[error("unsupported hash width {actual}, only 32-byte digests are supported")]
    UnsupportedHashWidth { actual: u8 },
    #[error("tree height {actual} exceeds the greatest supported height")]
    HeightOutOfRange { actual: u8 },
    #[error("the node buffer for a tree of height {height} exceeds addressable memory")]
    TreeTooLarge { height: u8 },
    #[error("leaf payloads are not sorted; the payload at index {index} orders before its predecessor")]
    UnsortedLeaves { index: usize },
    #[error("branch digest at node index {index} does not match its recomputed children")]
    NodeHashMismatch { index: usize },
    #[error("leaf digest at leaf index {index} does not match its payload")]
    LeafHashMismatch { index: usize },
}
