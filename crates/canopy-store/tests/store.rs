use std::fs;

use canopy_forest::Forest;
use canopy_store::{
    Config,
    Store,
};

fn enc(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

fn open_store(dir: &tempfile::TempDir) -> Store {
    Store::open(Config::new(dir.path())).expect("a fresh temp dir is writable")
}

fn forest_over(values: &[u64]) -> Forest {
    Forest::from_elements(values.iter().map(|v| enc(*v)))
}

#[test]
fn an_empty_store_loads_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    assert!(store.load().expect("loading an empty store is fine").is_none());
}

#[test]
fn a_saved_forest_loads_back_with_the_same_root() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let forest = forest_over(&[70, 10, 85, 40, 55, 25]);
    store.save(&forest).expect("saving succeeds");

    let loaded = store
        .load()
        .expect("loading succeeds")
        .expect("a state was committed");
    assert_eq!(forest, loaded);
    assert_eq!(forest.root(), loaded.root());

    // proofs generated from the reloaded forest verify against the old root
    let proof = loaded.prove_inclusion(enc(40)).expect("40 was inserted");
    assert!(proof.verify(forest.root()));
}

#[test]
fn resaving_a_grown_forest_reuses_surviving_tree_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let mut forest = forest_over(&[1, 2, 3, 4]);
    store.save(&forest).expect("saving succeeds");

    // 4 = 0b100: one tree file; two more inserts keep it and add one
    forest.insert(enc(5));
    forest.insert(enc(6));
    store.save(&forest).expect("resaving succeeds");

    let loaded = store
        .load()
        .expect("loading succeeds")
        .expect("a state was committed");
    assert_eq!(forest.root(), loaded.root());
    assert_eq!(6, loaded.len());
}

#[test]
fn a_flipped_byte_in_a_tree_file_fails_the_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    store
        .save(&forest_over(&[10, 20, 30, 40]))
        .expect("saving succeeds");

    let trees_dir = dir.path().join("trees");
    let tree_file = fs::read_dir(&trees_dir)
        .expect("trees dir exists")
        .next()
        .expect("one tree file was written")
        .expect("dir entry is readable")
        .path();
    let mut bytes = fs::read(&tree_file).expect("tree file is readable");
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    fs::write(&tree_file, bytes).expect("tree file is writable");

    assert!(store.load().is_err());
}

#[test]
fn a_manifest_pointing_at_a_different_root_fails_the_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    store.save(&forest_over(&[7, 8, 9])).expect("saving succeeds");

    let manifest_path = dir.path().join("MANIFEST.json");
    let manifest = fs::read_to_string(&manifest_path).expect("manifest is readable");
    let tampered = manifest.replacen("\"root\": \"", "\"root\": \"00", 1);
    assert_ne!(manifest, tampered);
    fs::write(&manifest_path, tampered).expect("manifest is writable");

    assert!(store.load().is_err());
}

#[test]
fn pruning_removes_only_unreferenced_tree_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let mut forest = forest_over(&[1, 2, 3]);
    store.save(&forest).expect("saving succeeds");
    // 3 = 0b11: two tree files on disk

    // growing to 4 = 0b100 merges everything into one new tree
    forest.insert(enc(4));
    store.save(&forest).expect("resaving succeeds");

    let removed = store.prune().expect("pruning succeeds");
    assert_eq!(2, removed);
    assert_eq!(0, store.prune().expect("pruning is idempotent"));

    let loaded = store
        .load()
        .expect("loading succeeds after pruning")
        .expect("a state was committed");
    assert_eq!(forest.root(), loaded.root());
}

#[test]
fn the_empty_forest_round_trips() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    store.save(&Forest::new()).expect("saving succeeds");
    let loaded = store
        .load()
        .expect("loading succeeds")
        .expect("a state was committed");
    assert!(loaded.is_empty());
    assert_eq!(Forest::new().root(), loaded.root());
}
