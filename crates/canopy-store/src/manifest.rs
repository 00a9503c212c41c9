//! The manifest document committing a persisted forest.

use canopy_forest::Forest;
use serde::{
    Deserialize,
    Serialize,
};

/// Current manifest document version.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The persisted description of one forest state: its root, cardinality,
/// and the ordered subtree list. Together with the referenced tree files it
/// is the full persisted state.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct Manifest {
    pub(crate) version: u32,
    /// Hex-encoded forest root.
    pub(crate) root: String,
    pub(crate) cardinality: u64,
    /// Subtrees in forest order, largest first.
    pub(crate) trees: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct TreeEntry {
    pub(crate) height: u32,
    /// Hex-encoded subtree root, which is also the tree file's name.
    pub(crate) file_id: String,
}

impl Manifest {
    pub(crate) fn for_forest(forest: &Forest) -> Self {
        Self {
            version: FORMAT_VERSION,
            root: hex::encode(forest.root()),
            cardinality: forest.len(),
            trees: forest
                .trees()
                .iter()
                .map(|tree| TreeEntry {
                    height: tree.height(),
                    file_id: hex::encode(tree.root()),
                })
                .collect(),
        }
    }
}
