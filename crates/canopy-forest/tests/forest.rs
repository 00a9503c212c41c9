use canopy_forest::{
    empty_forest_root,
    Forest,
    SubtreeExclusion,
};
use rand::{
    rngs::StdRng,
    Rng as _,
    SeedableRng as _,
};

fn enc(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

fn forest_over(values: &[u64]) -> Forest {
    Forest::from_elements(values.iter().map(|v| enc(*v)))
}

fn subtree_heights(forest: &Forest) -> Vec<u32> {
    forest.trees().iter().map(|tree| tree.height()).collect()
}

#[track_caller]
fn assert_proves_exclusion(forest: &Forest, value: u64) {
    let proof = forest
        .prove_exclusion(enc(value))
        .expect("the value was never inserted");
    assert!(proof.verify(forest.root()), "exclusion of {value}");
    assert!(forest.prove_inclusion(enc(value)).is_none());
}

#[test]
fn subtree_heights_track_the_set_bits_of_the_cardinality() {
    let elements = [70, 10, 85, 40, 55, 25, 100, 5, 62, 77, 31, 48];
    let mut forest = Forest::new();
    for (count, element) in (1u64..).zip(elements) {
        forest.insert(enc(element));
        let expected: Vec<u32> = (0..u64::BITS)
            .rev()
            .filter(|bit| count & (1 << bit) != 0)
            .collect();
        assert_eq!(expected, subtree_heights(&forest), "after {count} inserts");
        assert_eq!(count, forest.len());
    }
    // 12 = 0b1100
    assert_eq!(vec![3, 2], subtree_heights(&forest));
}

#[test]
fn forest_shape_is_independent_of_element_values() {
    let ascending = forest_over(&[1, 2, 3, 4, 5, 6]);
    let descending = forest_over(&[60, 50, 40, 30, 20, 10]);
    assert_eq!(subtree_heights(&ascending), subtree_heights(&descending));
}

#[test]
fn inclusion_proofs_verify_for_every_inserted_element() {
    let values = [10, 25, 40, 55, 70, 85];
    let forest = forest_over(&values);
    let root = forest.root();
    for value in values {
        assert!(forest.contains(enc(value)));
        let proof = forest
            .prove_inclusion(enc(value))
            .expect("the value was inserted");
        assert_eq!(proof.value(), enc(value));
        assert!(proof.verify(root), "inclusion of {value}");
    }
}

#[test]
fn exclusion_between_two_leaves_names_the_bracketing_pair() {
    // heights [2, 1]: the height-2 tree holds 10..=55, the height-1 tree
    // holds 70 and 85
    let forest = forest_over(&[10, 25, 40, 55, 70, 85]);
    let proof = forest.prove_exclusion(enc(50)).expect("50 was not inserted");
    assert!(proof.verify(forest.root()));

    let SubtreeExclusion::Between {
        predecessor,
        successor,
        ..
    } = &proof.witnesses()[0]
    else {
        panic!("50 falls between two leaves of the first subtree");
    };
    assert_eq!(predecessor.as_slice(), enc(40));
    assert_eq!(successor.as_slice(), enc(55));

    let SubtreeExclusion::BeforeAll {
        successor, ..
    } = &proof.witnesses()[1]
    else {
        panic!("50 orders before every leaf of the second subtree");
    };
    assert_eq!(successor.as_slice(), enc(70));
}

#[test]
fn exclusion_at_the_boundaries_of_a_single_stub() {
    let forest = forest_over(&[5]);

    let before = forest.prove_exclusion(enc(3)).expect("3 was not inserted");
    assert!(before.verify(forest.root()));
    let SubtreeExclusion::BeforeAll {
        successor, ..
    } = &before.witnesses()[0]
    else {
        panic!("3 orders before the only leaf");
    };
    assert_eq!(successor.as_slice(), enc(5));

    let after = forest.prove_exclusion(enc(9)).expect("9 was not inserted");
    assert!(after.verify(forest.root()));
    let SubtreeExclusion::AfterAll {
        predecessor, ..
    } = &after.witnesses()[0]
    else {
        panic!("9 orders after the only leaf");
    };
    assert_eq!(predecessor.as_slice(), enc(5));
}

#[test]
fn the_empty_forest_proves_any_exclusion() {
    let forest = Forest::new();
    assert_eq!(empty_forest_root(), forest.root());
    let proof = forest.prove_exclusion(enc(42)).expect("nothing was inserted");
    assert_eq!(&[SubtreeExclusion::Empty], proof.witnesses());
    assert!(proof.verify(forest.root()));
}

#[test]
fn present_elements_yield_no_exclusion_proof() {
    let forest = forest_over(&[10, 20, 30]);
    assert!(forest.prove_exclusion(enc(20)).is_none());
    assert!(forest.prove_inclusion(enc(21)).is_none());
}

#[test]
fn duplicates_are_kept_and_remain_provable() {
    let forest = forest_over(&[20, 20, 20, 10]);
    assert_eq!(4, forest.len());
    assert!(forest.contains(enc(20)));
    let proof = forest.prove_inclusion(enc(20)).expect("20 was inserted");
    assert!(proof.verify(forest.root()));
    assert!(forest.prove_exclusion(enc(20)).is_none());
    assert_proves_exclusion(&forest, 15);
}

#[test]
fn union_merges_two_forests_into_one_commitment() {
    let left = forest_over(&[10, 30, 50]);
    let right = forest_over(&[20, 40, 60]);
    let union = left.merge_with(right);

    assert_eq!(6, union.len());
    for value in [10, 20, 30, 40, 50, 60] {
        assert!(union.contains(enc(value)));
        let proof = union
            .prove_inclusion(enc(value))
            .expect("both operands' elements are in the union");
        assert!(proof.verify(union.root()));
    }
    assert_proves_exclusion(&union, 35);
}

#[test]
fn union_of_singletons_is_insertion_order_independent() {
    let one_way = forest_over(&[7]).merge_with(forest_over(&[3]));
    let other_way = forest_over(&[3]).merge_with(forest_over(&[7]));
    assert_eq!(one_way.root(), other_way.root());
}

#[test]
fn sequential_insert_order_changes_the_root() {
    // with three elements the height-1 subtree holds the first two inserts,
    // so permuting the inserts redistributes elements across subtrees
    let one_way = forest_over(&[1, 2, 3]);
    let other_way = forest_over(&[3, 2, 1]);
    assert_ne!(one_way.root(), other_way.root());
}

#[test]
fn merging_two_empty_forests_is_idempotent() {
    let union = Forest::new().merge_with(Forest::new());
    assert_eq!(empty_forest_root(), union.root());
    assert!(union.is_empty());
}

#[test]
fn merging_with_an_empty_forest_keeps_the_root() {
    let forest = forest_over(&[4, 2, 9]);
    let root = forest.root();
    let union = forest.merge_with(Forest::new());
    assert_eq!(root, union.root());
}

#[test]
fn proofs_do_not_transfer_across_roots() {
    let mut forest = forest_over(&[10, 20, 30]);
    let old_root = forest.root();
    let proof = forest.prove_inclusion(enc(20)).expect("20 was inserted");
    assert!(proof.verify(old_root));

    forest.insert(enc(40));
    assert_ne!(old_root, forest.root());
    assert!(!proof.verify(forest.root()));

    let exclusion = forest.prove_exclusion(enc(25)).expect("25 was not inserted");
    assert!(exclusion.verify(forest.root()));
    assert!(!exclusion.verify(old_root));
}

#[test]
fn tampered_inclusion_proofs_fail_verification() {
    let forest = forest_over(&[10, 20, 30, 40, 50]);
    let root = forest.root();
    let proof = forest.prove_inclusion(enc(30)).expect("30 was inserted");
    assert!(proof.verify(root));

    let mut tampered_path = proof.path().clone().into_unchecked();
    tampered_path.audit_path[0] ^= 0x01;
    let tampered = canopy_forest::InclusionProof::from_parts(
        proof.value().to_vec(),
        proof.subtree_index(),
        tampered_path
            .try_into_proof()
            .expect("flipping a byte keeps the shape valid"),
        proof.peer_roots().to_vec(),
    );
    assert!(!tampered.verify(root));
}

#[test]
fn a_large_random_workload_satisfies_completeness_and_soundness() {
    let mut rng = StdRng::seed_from_u64(0x1209_3302);
    let mut inserted = Vec::new();
    let mut forest = Forest::new();
    for _ in 0..300 {
        // even values only, so odd probes are guaranteed absent
        let value = rng.gen_range(0..500_000u64) * 2;
        forest.insert(enc(value));
        inserted.push(value);
    }
    let root = forest.root();

    for value in &inserted {
        let proof = forest
            .prove_inclusion(enc(*value))
            .expect("the value was inserted");
        assert!(proof.verify(root), "inclusion of {value}");
    }
    for _ in 0..300 {
        let absent = rng.gen_range(0..500_000u64) * 2 + 1;
        assert_proves_exclusion(&forest, absent);
    }
}
