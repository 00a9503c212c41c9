//! Filesystem persistence for a forest.
//!
//! A store directory holds one content-addressed file per subtree under
//! `trees/`, named by the subtree root, plus a `MANIFEST.json` naming the
//! subtrees of the committed forest state in order. Tree files are written
//! once and never rewritten; committing a new state writes whatever tree
//! files are missing and then swaps the manifest in atomically via
//! write-new-then-rename. A crash mid-save therefore leaves the previous
//! manifest, and the previous forest, authoritative.
//!
//! Loading revalidates everything on the way in: every tree file's digests
//! are recomputed from its payloads, every tree root must match its file
//! name and manifest entry, and the reassembled forest root must match the
//! manifest's. Tree files that no forest state references anymore can be
//! deleted with [`Store::prune`].

use std::{
    collections::HashSet,
    fs,
    io::{
        self,
        BufReader,
        Write as _,
    },
    path::{
        Path,
        PathBuf,
    },
};

use canopy_forest::{
    codec,
    forest::BuildForestError,
    Forest,
    PerfectTree,
};
use tracing::{
    debug,
    info,
};

mod manifest;

use manifest::{
    Manifest,
    TreeEntry,
};

const MANIFEST_FILE: &str = "MANIFEST.json";
const TREES_DIR: &str = "trees";
const TREE_FILE_EXT: &str = "tree";

/// Configuration for opening a [`Store`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the manifest and tree files; created if missing.
    pub dir: PathBuf,
    /// Sync file contents to disk before committing renames.
    pub fsync: bool,
}

impl Config {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync: true,
        }
    }
}

/// A single-writer forest store rooted at one directory.
pub struct Store {
    dir: PathBuf,
    fsync: bool,
}

impl Store {
    /// Opens the store, creating the directory layout if needed.
    ///
    /// # Errors
    /// Returns an error if the directories cannot be created.
    pub fn open(config: Config) -> Result<Self, Error> {
        let Config {
            dir,
            fsync,
        } = config;
        fs::create_dir_all(dir.join(TREES_DIR))
            .map_err(|source| Error::create_dir(dir.clone(), source))?;
        debug!(dir = %dir.display(), "opened forest store");
        Ok(Self {
            dir,
            fsync,
        })
    }

    /// Commits `forest` as the store's current state.
    ///
    /// Tree files already present from earlier saves are reused; trees are
    /// immutable and content-addressed, so a file name match is a content
    /// match. The manifest rename is the commit point.
    ///
    /// # Errors
    /// Returns an error if writing a tree file or the manifest fails; the
    /// previously committed state stays intact in that case.
    pub fn save(&self, forest: &Forest) -> Result<(), Error> {
        let mut new_files = 0;
        for tree in forest.trees() {
            let file_id = hex::encode(tree.root());
            let path = self.tree_path(&file_id);
            if path.exists() {
                continue;
            }
            self.write_tree(tree, &file_id, &path)?;
            new_files += 1;
        }
        let manifest = Manifest::for_forest(forest);
        self.write_manifest(&manifest)?;
        info!(
            root = %manifest.root,
            cardinality = forest.len(),
            new_files,
            "committed forest state",
        );
        Ok(())
    }

    /// Loads the committed forest state, or `None` if nothing was ever
    /// committed.
    ///
    /// # Errors
    /// Returns an error if the manifest or a tree file cannot be read, or
    /// if any revalidation fails: a tampered tree file, a tree that does
    /// not match its manifest entry, a non-canonical subtree sequence, or a
    /// forest root differing from the manifest's.
    pub fn load(&self) -> Result<Option<Forest>, Error> {
        let path = self.manifest_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::read_manifest(path, source)),
        };
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|source| Error::parse_manifest(path, source))?;
        if manifest.version != manifest::FORMAT_VERSION {
            return Err(Error::unsupported_manifest_version(manifest.version));
        }

        let mut trees = Vec::with_capacity(manifest.trees.len());
        for entry in &manifest.trees {
            trees.push(self.read_tree(entry)?);
        }
        let forest = Forest::from_trees(trees).map_err(Error::non_canonical)?;
        if forest.len() != manifest.cardinality {
            return Err(Error::cardinality_mismatch(
                manifest.cardinality,
                forest.len(),
            ));
        }
        let root = hex::encode(forest.root());
        if root != manifest.root {
            return Err(Error::root_mismatch(manifest.root, root));
        }
        info!(
            root = %manifest.root,
            cardinality = manifest.cardinality,
            trees = manifest.trees.len(),
            "loaded forest state",
        );
        Ok(Some(forest))
    }

    /// Deletes tree files the committed manifest no longer references.
    ///
    /// Returns the number of files removed. Old states' subtrees stay on
    /// disk until pruned, so proofs against earlier roots can still be
    /// regenerated up to that point.
    ///
    /// # Errors
    /// Returns an error if the manifest or the tree directory cannot be
    /// read, or a stale file cannot be removed.
    pub fn prune(&self) -> Result<usize, Error> {
        let path = self.manifest_path();
        let referenced: HashSet<String> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Manifest>(&bytes)
                .map_err(|source| Error::parse_manifest(path, source))?
                .trees
                .into_iter()
                .map(|entry| entry.file_id)
                .collect(),
            Err(source) if source.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(source) => return Err(Error::read_manifest(path, source)),
        };

        let trees_dir = self.dir.join(TREES_DIR);
        let mut removed = 0;
        for dir_entry in
            fs::read_dir(&trees_dir).map_err(|source| Error::list_trees(trees_dir.clone(), source))?
        {
            let dir_entry =
                dir_entry.map_err(|source| Error::list_trees(trees_dir.clone(), source))?;
            let path = dir_entry.path();
            let Some(file_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if referenced.contains(file_id) {
                continue;
            }
            fs::remove_file(&path)
                .map_err(|source| Error::remove_tree(file_id.to_string(), source))?;
            debug!(file_id, "pruned unreferenced tree file");
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "pruned forest store");
        }
        Ok(removed)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn tree_path(&self, file_id: &str) -> PathBuf {
        self.dir
            .join(TREES_DIR)
            .join(format!("{file_id}.{TREE_FILE_EXT}"))
    }

    fn write_tree(&self, tree: &PerfectTree, file_id: &str, path: &Path) -> Result<(), Error> {
        let mut scratch = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|source| Error::write_tree(file_id.to_string(), source))?;
        codec::encode_tree(tree, &mut scratch)
            .map_err(|source| Error::write_tree(file_id.to_string(), source))?;
        if self.fsync {
            scratch
                .as_file()
                .sync_all()
                .map_err(|source| Error::write_tree(file_id.to_string(), source))?;
        }
        scratch
            .persist(path)
            .map_err(|source| Error::write_tree(file_id.to_string(), source.error))?;
        debug!(
            file_id,
            height = tree.height(),
            leaves = tree.num_leaves(),
            "wrote tree file",
        );
        Ok(())
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(manifest).map_err(Error::encode_manifest)?;
        let mut scratch = tempfile::NamedTempFile::new_in(&self.dir).map_err(Error::write_manifest)?;
        scratch.write_all(&bytes).map_err(Error::write_manifest)?;
        if self.fsync {
            scratch.as_file().sync_all().map_err(Error::write_manifest)?;
        }
        scratch
            .persist(self.manifest_path())
            .map_err(|source| Error::write_manifest(source.error))?;
        Ok(())
    }

    fn read_tree(&self, entry: &TreeEntry) -> Result<PerfectTree, Error> {
        let path = self.tree_path(&entry.file_id);
        let file =
            fs::File::open(&path).map_err(|source| Error::read_tree(entry.file_id.clone(), source))?;
        let mut reader = BufReader::new(file);
        let tree = codec::decode_tree(&mut reader)
            .map_err(|source| Error::decode_tree(entry.file_id.clone(), source))?;
        if tree.height() != entry.height {
            return Err(Error::height_mismatch(
                entry.file_id.clone(),
                entry.height,
                tree.height(),
            ));
        }
        if hex::encode(tree.root()) != entry.file_id {
            return Err(Error::tree_root_mismatch(entry.file_id.clone()));
        }
        Ok(tree)
    }
}

/// Error working with a forest store.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn create_dir(path: PathBuf, source: io::Error) -> Self {
        Self(ErrorKind::CreateDir {
            path,
            source,
        })
    }

    fn read_manifest(path: PathBuf, source: io::Error) -> Self {
        Self(ErrorKind::ReadManifest {
            path,
            source,
        })
    }

    fn parse_manifest(path: PathBuf, source: serde_json::Error) -> Self {
        Self(ErrorKind::ParseManifest {
            path,
            source,
        })
    }

    fn unsupported_manifest_version(actual: u32) -> Self {
        Self(ErrorKind::UnsupportedManifestVersion {
            actual,
        })
    }

    fn encode_manifest(source: serde_json::Error) -> Self {
        Self(ErrorKind::EncodeManifest {
            source,
        })
    }

    fn write_manifest(source: io::Error) -> Self {
        Self(ErrorKind::WriteManifest {
            source,
        })
    }

    fn write_tree(file_id: String, source: io::Error) -> Self {
        Self(ErrorKind::WriteTree {
            file_id,
            source,
        })
    }

    fn read_tree(file_id: String, source: io::Error) -> Self {
        Self(ErrorKind::ReadTree {
            file_id,
            source,
        })
    }

    fn decode_tree(file_id: String, source: codec::DecodeError) -> Self {
        Self(ErrorKind::DecodeTree {
            file_id,
            source,
        })
    }

    fn height_mismatch(file_id: String, expected: u32, actual: u32) -> Self {
        Self(ErrorKind::HeightMismatch {
            file_id,
            expected,
            actual,
        })
    }

    fn tree_root_mismatch(file_id: String) -> Self {
        Self(ErrorKind::TreeRootMismatch {
            file_id,
        })
    }

    fn non_canonical(source: BuildForestError) -> Self {
        Self(ErrorKind::NonCanonical {
            source,
        })
    }

    fn cardinality_mismatch(expected: u64, actual: u64) -> Self {
        Self(ErrorKind::CardinalityMismatch {
            expected,
            actual,
        })
    }

    fn root_mismatch(expected: String, actual: String) -> Self {
        Self(ErrorKind::RootMismatch {
            expected,
            actual,
        })
    }

    fn list_trees(path: PathBuf, source: io::Error) -> Self {
        Self(ErrorKind::ListTrees {
            path,
            source,
        })
    }

    fn remove_tree(file_id: String, source: io::Error) -> Self {
        Self(ErrorKind::RemoveTree {
            file_id,
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("failed creating store directory layout under {path:?}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed reading manifest at {path:?}")]
    ReadManifest { path: PathBuf, source: io::Error },
    #[error("failed parsing manifest at {path:?}")]
    ParseManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported manifest version {actual}")]
    UnsupportedManifestVersion { actual: u32 },
    #[error("failed encoding manifest")]
    EncodeManifest { source: serde_json::Error },
    #[error("failed writing manifest")]
    WriteManifest { source: io::Error },
    #[error("failed writing tree file `{file_id}`")]
    WriteTree { file_id: String, source: io::Error },
    #[error("failed reading tree file `{file_id}`")]
    ReadTree { file_id: String, source: io::Error },
    #[error("failed decoding tree file `{file_id}`")]
    DecodeTree {
        file_id: String,
        source: codec::DecodeError,
    },
    #[error("tree file `{file_id}` has height {actual}, but the manifest records {expected}")]
    HeightMismatch {
        file_id: String,
        expected: u32,
        actual: u32,
    },
    #[error("tree file `{file_id}` decodes to a root different from its file id")]
    TreeRootMismatch { file_id: String },
    #[error("manifest subtrees do not form a canonical forest")]
    NonCanonical { source: BuildForestError },
    #[error("manifest records cardinality {expected}, but the subtrees hold {actual} leaves")]
    CardinalityMismatch { expected: u64, actual: u64 },
    #[error("manifest records forest root {expected}, but the subtrees reassemble to {actual}")]
    RootMismatch { expected: String, actual: String },
    #[error("failed listing tree files under {path:?}")]
    ListTrees { path: PathBuf, source: io::Error },
    #[error("failed removing stale tree file `{file_id}`")]
    RemoveTree { file_id: String, source: io::Error },
}
