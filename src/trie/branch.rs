use super::*;

use std::marker::PhantomData;

/// The out-of-line part of a branch node.
///
/// Next to the cuckoo table of children it carries the bookkeeping that
/// makes whole-subtree operations O(1): the XOR over all key digests
/// below it, the number of those keys, the number of distinct segment
/// prefixes, the set of child bytes in use, and the bitmap recording
/// which of the two table hashes currently places each child byte.
#[derive(Clone, Debug)]
#[repr(C, align(64))]
pub(crate) struct BranchBody<const KEY_LEN: usize, V, S, Table>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    Table: ByteTable<Head<KEY_LEN, V, S>>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    pub(crate) leaf_count: u64,
    pub(crate) segment_count: u32,
    pub(crate) node_hash: u128,
    pub(crate) child_set: ByteBitset,
    pub(crate) rand_hash_used: ByteBitset,
    pub(crate) child_table: Table,
    value: PhantomData<V>,
    key_segments: PhantomData<S>,
}

impl<const KEY_LEN: usize, V, S, Table> BranchBody<KEY_LEN, V, S, Table>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    Table: ByteTable<Head<KEY_LEN, V, S>>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    pub(crate) fn new() -> Self {
        Self {
            leaf_count: 0,
            segment_count: 0,
            node_hash: 0,
            child_set: ByteBitset::new_empty(),
            rand_hash_used: ByteBitset::new_empty(),
            child_table: Table::new(),
            value: PhantomData,
            key_segments: PhantomData,
        }
    }

    /// Account for a new child and hand it to the table. The child must
    /// be anchored at `end_depth` and `key` must carry the path bytes
    /// above the branch. Returns the displaced entry when the table is
    /// full, which obliges the caller to grow the branch.
    pub(crate) fn insert(
        &mut self,
        end_depth: usize,
        key: &[u8; KEY_LEN],
        child: Head<KEY_LEN, V, S>,
    ) -> Head<KEY_LEN, V, S> {
        let Some(byte_key) = child.key() else {
            return Head::new_empty();
        };
        self.child_set.set(byte_key);
        self.leaf_count += child.count();
        self.segment_count += child.count_segment(end_depth);
        self.node_hash ^= child.hash(key);
        self.child_table.put(&mut self.rand_hash_used, child)
    }

    /// Re-place a child displaced by growth. All bookkeeping already
    /// happened when it was first inserted.
    pub(crate) fn reinsert(&mut self, child: Head<KEY_LEN, V, S>) -> Head<KEY_LEN, V, S> {
        self.child_table.put(&mut self.rand_hash_used, child)
    }

    /// The same branch with its bucket array duplicated into the next
    /// table size. Stale duplicate slots are reclaimed lazily by later
    /// inserts.
    pub(crate) fn grow(self) -> BranchBody<KEY_LEN, V, S, Table::Grown>
    where
        Table::Grown: ByteTable<Head<KEY_LEN, V, S>>,
    {
        BranchBody {
            leaf_count: self.leaf_count,
            segment_count: self.segment_count,
            node_hash: self.node_hash,
            child_set: self.child_set,
            rand_hash_used: self.rand_hash_used,
            child_table: self.child_table.grow(),
            value: PhantomData,
            key_segments: PhantomData,
        }
    }
}

/// Maps each table size to the branch head variant embedding it, so
/// growth can be written once over all sizes.
pub(crate) trait BranchTable<const KEY_LEN: usize, V, S>:
    ByteTable<Head<KEY_LEN, V, S>>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn wrap(
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: BranchBody<KEY_LEN, V, S, Self>,
    ) -> Head<KEY_LEN, V, S>;
}

macro_rules! impl_branch_table {
    ($table:ident, $variant:ident) => {
        impl<const KEY_LEN: usize, V, S> BranchTable<KEY_LEN, V, S>
            for $table<Head<KEY_LEN, V, S>>
        where
            V: SizeLimited<13> + Clone,
            S: KeySegmentation<KEY_LEN>,
            [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
        {
            fn wrap(
                start_depth: u8,
                fragment: [u8; HEAD_FRAGMENT_LEN],
                end_depth: u8,
                body: BranchBody<KEY_LEN, V, S, Self>,
            ) -> Head<KEY_LEN, V, S> {
                Head::$variant {
                    start_depth,
                    fragment,
                    end_depth,
                    body: Arc::new(body),
                }
            }
        }
    };
}

impl_branch_table!(ByteTable4, Branch4);
impl_branch_table!(ByteTable8, Branch8);
impl_branch_table!(ByteTable16, Branch16);
impl_branch_table!(ByteTable32, Branch32);
impl_branch_table!(ByteTable64, Branch64);
impl_branch_table!(ByteTable128, Branch128);
impl_branch_table!(ByteTable256, Branch256);

/// Wrap the branch body into its head, growing it through successive
/// table sizes until the displaced entry (if any) finds a slot. The
/// second-hash eviction rule bounds displacement at the largest size,
/// so growth always terminates there.
///
/// Written as one non-generic function per table size (rather than a
/// single function generic over `Table` recursing on `Table::Grown`)
/// because a recursive generic bound of the form `Table::Grown:
/// BranchTable<..>` would require `Table::Grown::Grown: BranchTable<..>`
/// to typecheck the recursive call, and so on without end; the concrete
/// table family is finite, so enumerating it sidesteps the unbounded
/// obligation.
macro_rules! impl_place_with_growth {
    ($fn_name:ident, $table:ident, $grow_fn:ident, $is_max:expr) => {
        pub(crate) fn $fn_name<const KEY_LEN: usize, V, S>(
            start_depth: u8,
            fragment: [u8; HEAD_FRAGMENT_LEN],
            end_depth: u8,
            body: BranchBody<KEY_LEN, V, S, $table<Head<KEY_LEN, V, S>>>,
            displaced: Head<KEY_LEN, V, S>,
        ) -> Head<KEY_LEN, V, S>
        where
            V: SizeLimited<13> + Clone,
            S: KeySegmentation<KEY_LEN>,
            [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
        {
            if displaced.key().is_none() {
                return <$table<Head<KEY_LEN, V, S>> as BranchTable<KEY_LEN, V, S>>::wrap(
                    start_depth,
                    fragment,
                    end_depth,
                    body,
                );
            }
            if $is_max {
                panic!("insert failed on maximally grown branch");
            }
            let mut grown = body.grow();
            let displaced = grown.reinsert(displaced);
            $grow_fn(start_depth, fragment, end_depth, grown, displaced)
        }
    };
}

impl_place_with_growth!(place_with_growth_4, ByteTable4, place_with_growth_8, false);
impl_place_with_growth!(place_with_growth_8, ByteTable8, place_with_growth_16, false);
impl_place_with_growth!(place_with_growth_16, ByteTable16, place_with_growth_32, false);
impl_place_with_growth!(place_with_growth_32, ByteTable32, place_with_growth_64, false);
impl_place_with_growth!(place_with_growth_64, ByteTable64, place_with_growth_128, false);
impl_place_with_growth!(place_with_growth_128, ByteTable128, place_with_growth_256, false);
impl_place_with_growth!(place_with_growth_256, ByteTable256, place_with_growth_256, true);
