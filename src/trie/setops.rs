use super::*;

/// Merge the given nodes into one subtree anchored at exactly
/// `at_depth`. `prefix` carries the path bytes above `at_depth` and is
/// scratch space below it.
fn recursive_union<const KEY_LEN: usize, V, S>(
    at_depth: usize,
    nodes: &mut Vec<Head<KEY_LEN, V, S>>,
    prefix: &mut [u8; KEY_LEN],
) -> Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    let Some((first, rest)) = nodes.split_first() else {
        return Head::new_empty();
    };

    // Subtrees with equal digests hold the same keys; share the first.
    let first_hash = first.hash(prefix);
    if rest.iter().all(|node| node.hash(prefix) == first_hash) {
        return nodes.swap_remove(0).wrap_path(at_depth, prefix);
    }

    let mut depth = at_depth;
    loop {
        debug_assert!(depth < KEY_LEN);

        let mut union_childbits = ByteBitset::new_empty();
        for node in nodes.iter() {
            match node.peek(depth) {
                Peek::Fragment(byte) => union_childbits.set(byte),
                Peek::Branch(children) => {
                    let mut merged = ByteBitset::new_empty();
                    merged.set_union(&union_childbits, &children);
                    union_childbits = merged;
                }
            }
        }

        match union_childbits.count() {
            0 => unreachable!("every node fixes at least one byte per depth"),
            1 => {
                // All inputs agree here; extend the shared path.
                let byte = union_childbits
                    .find_first_set()
                    .expect("count is one");
                prefix[depth] = byte;
                for node in nodes.iter_mut() {
                    if depth == node.end_depth() {
                        let next = node.child(depth, byte);
                        *node = next;
                    }
                }
                depth += 1;
            }
            _ => {
                let mut branch = Head::new_branch_at(at_depth, depth, prefix);
                while let Some(byte) = union_childbits.drain_next_ascending() {
                    prefix[depth] = byte;
                    let mut children: Vec<Head<KEY_LEN, V, S>> = nodes
                        .iter()
                        .map(|node| node.child(depth, byte))
                        .filter(|child| !child.is_empty())
                        .collect();
                    let merged = recursive_union(depth, &mut children, prefix);
                    debug_assert!(!merged.is_empty());
                    branch = branch.insert_child(prefix, merged);
                }
                return branch.wrap_path(at_depth, prefix);
            }
        }
    }
}

/// Intersect the given nodes into one subtree anchored at exactly
/// `at_depth`, or `Empty` when they share no key.
fn recursive_intersect<const KEY_LEN: usize, V, S>(
    at_depth: usize,
    nodes: &mut Vec<Head<KEY_LEN, V, S>>,
    prefix: &mut [u8; KEY_LEN],
) -> Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    let Some((first, rest)) = nodes.split_first() else {
        return Head::new_empty();
    };

    let first_hash = first.hash(prefix);
    if rest.iter().all(|node| node.hash(prefix) == first_hash) {
        return nodes.swap_remove(0).wrap_path(at_depth, prefix);
    }

    let mut depth = at_depth;
    loop {
        if depth == KEY_LEN {
            // A single shared key remains; all nodes are its leaf.
            return nodes.swap_remove(0).wrap_path(at_depth, prefix);
        }

        let mut shared_childbits = ByteBitset::new_full();
        for node in nodes.iter() {
            match node.peek(depth) {
                Peek::Fragment(byte) => {
                    let mut only = ByteBitset::new_empty();
                    if shared_childbits.is_set(byte) {
                        only.set(byte);
                    }
                    shared_childbits = only;
                }
                Peek::Branch(children) => {
                    let mut merged = ByteBitset::new_empty();
                    merged.set_intersect(&shared_childbits, &children);
                    shared_childbits = merged;
                }
            }
        }

        match shared_childbits.count() {
            0 => return Head::new_empty(),
            1 => {
                let byte = shared_childbits
                    .find_first_set()
                    .expect("count is one");
                prefix[depth] = byte;
                for node in nodes.iter_mut() {
                    if depth == node.end_depth() {
                        let next = node.child(depth, byte);
                        debug_assert!(!next.is_empty());
                        *node = next;
                    }
                }
                depth += 1;
            }
            _ => {
                let mut intersections: Vec<(u8, Head<KEY_LEN, V, S>)> = Vec::new();
                while let Some(byte) = shared_childbits.drain_next_ascending() {
                    prefix[depth] = byte;
                    let mut children: Vec<Head<KEY_LEN, V, S>> = nodes
                        .iter()
                        .map(|node| node.child(depth, byte))
                        .collect();
                    debug_assert!(children.iter().all(|child| !child.is_empty()));
                    let shared = recursive_intersect(depth, &mut children, prefix);
                    if !shared.is_empty() {
                        intersections.push((byte, shared));
                    }
                }
                match intersections.len() {
                    0 => return Head::new_empty(),
                    1 => {
                        // The intersection no longer branches here; the
                        // single subtree is re-anchored per the wrap rule.
                        let (byte, shared) = intersections.pop().expect("one intersection");
                        prefix[depth] = byte;
                        return shared.wrap_path(at_depth, prefix);
                    }
                    _ => {
                        let mut branch = Head::new_branch_at(at_depth, depth, prefix);
                        for (byte, shared) in intersections {
                            prefix[depth] = byte;
                            branch = branch.insert_child(prefix, shared);
                        }
                        return branch.wrap_path(at_depth, prefix);
                    }
                }
            }
        }
    }
}

/// Walks two subtrees in lockstep, proving or refuting that every key
/// of the left one occurs in the right one.
fn recursive_is_subset<const KEY_LEN: usize, V, S>(
    at_depth: usize,
    mut this: Head<KEY_LEN, V, S>,
    mut other: Head<KEY_LEN, V, S>,
    prefix: &mut [u8; KEY_LEN],
) -> bool
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    if this.hash(prefix) == other.hash(prefix) {
        return true;
    }

    let mut depth = at_depth;
    loop {
        if depth == KEY_LEN {
            return true;
        }
        match (this.peek(depth), other.peek(depth)) {
            (Peek::Fragment(a), Peek::Fragment(b)) => {
                if a != b {
                    return false;
                }
                prefix[depth] = a;
                if depth == this.end_depth() {
                    this = this.child(depth, a);
                }
                if depth == other.end_depth() {
                    other = other.child(depth, a);
                }
                depth += 1;
            }
            (Peek::Fragment(a), Peek::Branch(children)) => {
                if !children.is_set(a) {
                    return false;
                }
                prefix[depth] = a;
                if depth == this.end_depth() {
                    this = this.child(depth, a);
                }
                other = other.child(depth, a);
                depth += 1;
            }
            (Peek::Branch(_), Peek::Fragment(_)) => {
                // A branch holds at least two child bytes, a fragment one.
                return false;
            }
            (Peek::Branch(these), Peek::Branch(others)) => {
                if !these.is_subset_of(&others) {
                    return false;
                }
                let mut bits = these;
                while let Some(byte) = bits.drain_next_ascending() {
                    prefix[depth] = byte;
                    let this_child = this.child(depth, byte);
                    let other_child = other.child(depth, byte);
                    if !recursive_is_subset(depth, this_child, other_child, prefix) {
                        return false;
                    }
                }
                return true;
            }
        }
    }
}

/// Walks two subtrees in lockstep, checking whether any key occurs in
/// both.
fn recursive_is_intersecting<const KEY_LEN: usize, V, S>(
    at_depth: usize,
    mut this: Head<KEY_LEN, V, S>,
    mut other: Head<KEY_LEN, V, S>,
    prefix: &mut [u8; KEY_LEN],
) -> bool
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    if this.hash(prefix) == other.hash(prefix) {
        return true;
    }

    let mut depth = at_depth;
    loop {
        if depth == KEY_LEN {
            return true;
        }
        match (this.peek(depth), other.peek(depth)) {
            (Peek::Fragment(a), Peek::Fragment(b)) => {
                if a != b {
                    return false;
                }
                prefix[depth] = a;
                if depth == this.end_depth() {
                    this = this.child(depth, a);
                }
                if depth == other.end_depth() {
                    other = other.child(depth, a);
                }
                depth += 1;
            }
            (Peek::Fragment(a), Peek::Branch(children)) => {
                if !children.is_set(a) {
                    return false;
                }
                prefix[depth] = a;
                if depth == this.end_depth() {
                    this = this.child(depth, a);
                }
                other = other.child(depth, a);
                depth += 1;
            }
            (Peek::Branch(children), Peek::Fragment(b)) => {
                if !children.is_set(b) {
                    return false;
                }
                prefix[depth] = b;
                this = this.child(depth, b);
                if depth == other.end_depth() {
                    other = other.child(depth, b);
                }
                depth += 1;
            }
            (Peek::Branch(these), Peek::Branch(others)) => {
                let mut shared = ByteBitset::new_empty();
                shared.set_intersect(&these, &others);
                while let Some(byte) = shared.drain_next_ascending() {
                    prefix[depth] = byte;
                    let this_child = this.child(depth, byte);
                    let other_child = other.child(depth, byte);
                    if recursive_is_intersecting(depth, this_child, other_child, prefix) {
                        return true;
                    }
                }
                return false;
            }
        }
    }
}

impl<const KEY_LEN: usize, V, S> PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    /// The union of the given trees. Shared subtrees are reused
    /// wholesale; where keys collide, the value of the earliest tree in
    /// the sequence wins.
    pub fn union<I>(trees: I) -> PACT<KEY_LEN, V, S>
    where
        I: IntoIterator<Item = PACT<KEY_LEN, V, S>>,
    {
        let mut roots: Vec<Head<KEY_LEN, V, S>> = trees
            .into_iter()
            .map(|tree| tree.root)
            .filter(|root| !root.is_empty())
            .collect();
        if roots.is_empty() {
            return PACT::new();
        }
        let mut prefix = [0u8; KEY_LEN];
        PACT {
            root: recursive_union(0, &mut roots, &mut prefix),
        }
    }

    /// A new tree holding exactly the keys present in both trees.
    pub fn intersect(&self, other: &Self) -> Self {
        if self.root.is_empty() || other.root.is_empty() {
            return PACT::new();
        }
        let mut roots = vec![self.root.clone(), other.root.clone()];
        let mut prefix = [0u8; KEY_LEN];
        PACT {
            root: recursive_intersect(0, &mut roots, &mut prefix),
        }
    }

    /// Whether every key of this tree is present in `other`.
    /// Shared subtrees are decided in O(1) by their digests.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        if self.root.is_empty() {
            return true;
        }
        if other.root.is_empty() {
            return false;
        }
        let mut prefix = [0u8; KEY_LEN];
        recursive_is_subset(0, self.root.clone(), other.root.clone(), &mut prefix)
    }

    /// Whether the two trees share at least one key.
    pub fn is_intersecting(&self, other: &Self) -> bool {
        if self.root.is_empty() || other.root.is_empty() {
            return false;
        }
        let mut prefix = [0u8; KEY_LEN];
        recursive_is_intersecting(0, self.root.clone(), other.root.clone(), &mut prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn tree_of(keys: &[[u8; 64]]) -> PACT<64, (), SingleSegmentation> {
        let mut tree = PACT::new();
        for key in keys {
            tree.put(key, ());
        }
        tree
    }

    #[test]
    fn union_of_singletons() {
        let left = tree_of(&[[0; 64]]);
        let mut right_key = [0; 64];
        right_key[63] = 1;
        let right = tree_of(&[right_key]);

        let union = PACT::union([left, right]);
        assert_eq!(union.len(), 2);
        assert!(union.get(&[0; 64]).is_some());
        assert!(union.get(&right_key).is_some());
    }

    #[test]
    fn union_of_empty_is_empty() {
        let union = PACT::<64, (), SingleSegmentation>::union([]);
        assert!(union.is_empty());
    }

    #[test]
    fn subset_reflexive_and_strict() {
        let mut small = PACT::<64, (), SingleSegmentation>::new();
        small.put(&[0; 64], ());
        let mut big = small.branch();
        let mut other = [0; 64];
        other[63] = 1;
        big.put(&other, ());

        assert!(small.is_subset_of(&small));
        assert!(small.is_subset_of(&big));
        assert!(!big.is_subset_of(&small));
    }

    proptest! {
        #[test]
        fn union_matches_sequential_insert(
            left in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 1..256),
            right in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 1..256),
        ) {
            let left: Vec<[u8; 64]> = left.into_iter().map(|k| k.try_into().unwrap()).collect();
            let right: Vec<[u8; 64]> = right.into_iter().map(|k| k.try_into().unwrap()).collect();

            let left_tree = tree_of(&left);
            let right_tree = tree_of(&right);

            let union = PACT::union([left_tree.clone(), right_tree.clone()]);

            let mut sequential = left_tree.clone();
            for key in &right {
                sequential.put(key, ());
            }

            let expected: HashSet<[u8; 64]> =
                HashSet::from_iter(left.iter().chain(right.iter()).copied());
            prop_assert_eq!(union.len(), expected.len() as u64);
            prop_assert!(union == sequential);
            for key in &expected {
                prop_assert!(union.get(key).is_some());
            }
        }

        #[test]
        fn intersect_matches_set_intersection(
            left in prop::collection::hash_set(prop::collection::vec(0u8..=255, 2), 1..128),
            right in prop::collection::hash_set(prop::collection::vec(0u8..=255, 2), 1..128),
        ) {
            // Two byte keys collide often enough to make overlap likely.
            let widen = |k: &Vec<u8>| -> [u8; 64] {
                let mut key = [0u8; 64];
                key[0] = k[0];
                key[63] = k[1];
                key
            };
            let left: Vec<[u8; 64]> = left.iter().map(widen).collect();
            let right: Vec<[u8; 64]> = right.iter().map(widen).collect();

            let left_tree = tree_of(&left);
            let right_tree = tree_of(&right);

            let intersection = left_tree.intersect(&right_tree);

            let left_set: HashSet<[u8; 64]> = HashSet::from_iter(left.iter().copied());
            let right_set: HashSet<[u8; 64]> = HashSet::from_iter(right.iter().copied());
            let expected: HashSet<[u8; 64]> =
                left_set.intersection(&right_set).copied().collect();

            prop_assert_eq!(intersection.len(), expected.len() as u64);
            for key in &expected {
                prop_assert!(intersection.get(key).is_some());
            }
            prop_assert_eq!(
                left_tree.is_intersecting(&right_tree),
                !expected.is_empty()
            );
        }

        #[test]
        fn subset_iff_union_equals_superset(
            base in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 1..128),
            extra in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 0..16),
        ) {
            let base: Vec<[u8; 64]> = base.into_iter().map(|k| k.try_into().unwrap()).collect();
            let extra: Vec<[u8; 64]> = extra.into_iter().map(|k| k.try_into().unwrap()).collect();

            let small = tree_of(&base);
            let mut big = small.clone();
            for key in &extra {
                big.put(key, ());
            }

            prop_assert!(small.is_subset_of(&big));
            prop_assert_eq!(big.is_subset_of(&small), big.len() == small.len());
        }
    }
}
