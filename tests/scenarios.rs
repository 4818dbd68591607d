use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use pact::trie::{NodeKind, PACT};

type SmallTree = PACT<4, u32>;

#[test]
fn single_key_is_a_leaf_root() {
    let mut tree = SmallTree::new();
    tree.put(&[0, 0, 0, 0], 1);

    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get(&[0, 0, 0, 0]), Some(&1));

    let nodes: Vec<_> = tree.nodes().collect();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].kind, NodeKind::Leaf);
    assert_eq!(nodes[0].start_depth, 0);
}

#[test]
fn two_keys_branch_at_the_last_byte() {
    let mut tree = SmallTree::new();
    tree.put(&[0, 0, 0, 0], 1);
    tree.put(&[0, 0, 0, 1], 2);

    assert_eq!(tree.len(), 2);
    assert_eq!(tree.get(&[0, 0, 0, 0]), Some(&1));
    assert_eq!(tree.get(&[0, 0, 0, 1]), Some(&2));

    // The three shared bytes compress into the branch's own infix.
    let nodes: Vec<_> = tree.nodes().collect();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0].start_depth, 0);
    assert_eq!(nodes[0].end_depth, 3);
    assert!(matches!(
        nodes[0].kind,
        NodeKind::Branch {
            bucket_count: 1,
            child_count: 2,
        }
    ));
    assert_eq!(nodes[1].kind, NodeKind::Leaf);
    assert_eq!(nodes[1].key_prefix, [0, 0, 0, 0]);
    assert_eq!(nodes[2].kind, NodeKind::Leaf);
    assert_eq!(nodes[2].key_prefix, [0, 0, 0, 1]);
}

#[test]
fn snapshots_are_isolated_and_ordered_by_subset() {
    let mut a = SmallTree::new();
    a.put(&[0, 0, 0, 0], 1);
    let b = a.branch();
    a.put(&[0, 0, 0, 1], 2);

    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert_eq!(b.get(&[0, 0, 0, 1]), None);
    assert!(b.is_subset_of(&a));
    assert!(!a.is_subset_of(&b));
}

#[test]
fn full_fanout_on_the_last_byte_grows_the_branch() {
    let mut tree = SmallTree::new();
    for x in 0..=255u8 {
        tree.put(&[0, 0, 0, x], x as u32);
    }

    assert_eq!(tree.len(), 256);
    for x in 0..=255u8 {
        assert_eq!(tree.get(&[0, 0, 0, x]), Some(&(x as u32)));
    }

    let root = tree.nodes().next().unwrap();
    match root.kind {
        NodeKind::Branch {
            bucket_count,
            child_count,
        } => {
            assert!(bucket_count >= 32);
            assert_eq!(child_count, 256);
        }
        other => panic!("expected a branch root, got {:?}", other),
    }
}

#[test]
fn full_fanout_on_the_first_byte_grows_the_branch() {
    let mut tree = SmallTree::new();
    for x in 0..=255u8 {
        tree.put(&[x, 0, 0, 0], x as u32);
    }

    assert_eq!(tree.len(), 256);
    let root = tree.nodes().next().unwrap();
    assert_eq!(root.start_depth, 0);
    assert_eq!(root.end_depth, 0);
    assert!(matches!(
        root.kind,
        NodeKind::Branch {
            bucket_count: 64,
            child_count: 256,
        }
    ));
}

#[test]
fn insertion_order_does_not_change_the_tree() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut keys: Vec<[u8; 64]> = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        let mut key = [0u8; 64];
        rng.fill(&mut key[..]);
        keys.push(key);
    }

    let mut forward = PACT::<64, ()>::new();
    for key in &keys {
        forward.put(key, ());
    }
    let mut backward = PACT::<64, ()>::new();
    for key in keys.iter().rev() {
        backward.put(key, ());
    }

    assert_eq!(forward.len(), backward.len());
    assert!(forward == backward);
}

#[test]
fn union_equals_fresh_inserts() {
    let mut rng = StdRng::seed_from_u64(0xBEEF);
    let mut xs: Vec<[u8; 64]> = Vec::new();
    let mut ys: Vec<[u8; 64]> = Vec::new();
    for _ in 0..1000 {
        let mut key = [0u8; 64];
        rng.fill(&mut key[..]);
        xs.push(key);
        // Overlap roughly half of the keys.
        if rng.gen_bool(0.5) {
            ys.push(key);
        } else {
            let mut other = [0u8; 64];
            rng.fill(&mut other[..]);
            ys.push(other);
        }
    }

    let mut a = PACT::<64, ()>::new();
    for key in &xs {
        a.put(key, ());
    }
    let mut b = PACT::<64, ()>::new();
    for key in &ys {
        b.put(key, ());
    }

    let union = PACT::union([a.clone(), b.clone()]);

    let mut fresh = PACT::<64, ()>::new();
    let mut distinct = std::collections::HashSet::new();
    for key in xs.iter().chain(ys.iter()) {
        fresh.put(key, ());
        distinct.insert(*key);
    }

    assert_eq!(union.len(), distinct.len() as u64);
    assert!(union == fresh);
    assert!(a.is_subset_of(&union));
    assert!(b.is_subset_of(&union));
}

#[test]
fn maximally_diverging_keys() {
    let mut tree = PACT::<64, ()>::new();
    tree.put(&[0x00; 64], ());
    tree.put(&[0x01; 64], ());
    assert_eq!(tree.len(), 2);
    assert!(tree.get(&[0x00; 64]).is_some());
    assert!(tree.get(&[0x01; 64]).is_some());

    let root = tree.nodes().next().unwrap();
    assert_eq!(root.start_depth, 0);
    assert_eq!(root.end_depth, 0);
}
