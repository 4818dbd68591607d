//! # Persistent Adaptive Cuckoo Trie
//!
//! A 256-ary byte-branching radix tree over fixed-length keys. Interior
//! nodes compress their children into cuckoo-hashed buckets, so a single
//! branch representation adapts from 2 up to 256 children while staying
//! cache-line friendly. Runs of non-branching key bytes are collapsed
//! into infix nodes, and leaves carry the tail of their key inline in
//! the 16-byte node head.
//!
//! Every node body is reference counted and shared on clone, making
//! snapshots O(1) and mutation copy-on-write. Each branch maintains the
//! XOR of the keyed 128-bit digests of all keys below it, which makes
//! equality, subset and overlap checks on whole subtrees O(1) and lets
//! set operations share unchanged subtrees wholesale.

mod branch;
mod cursor;
mod setops;

use branch::{
    place_with_growth_128, place_with_growth_16, place_with_growth_256, place_with_growth_32,
    place_with_growth_4, place_with_growth_64, place_with_growth_8, BranchBody,
};
pub use cursor::{KeyIterator, NodeIterator, NodeKind, PACTCursor, PaddedCursor, TreeNode};

use rand::rngs::StdRng;
use rand::thread_rng;
use rand::RngCore;
use rand::SeedableRng;
use siphasher::sip128::{Hasher128, SipHasher24};
use std::cmp::max;
use std::cmp::min;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Once;

use crate::bitset::ByteBitset;
use crate::bytetable;
use crate::bytetable::{
    ByteEntry, ByteTable, ByteTable128, ByteTable16, ByteTable256, ByteTable32, ByteTable4,
    ByteTable64, ByteTable8,
};

/// All nodes fit in a head of this size; branch and infix nodes spill
/// the rest of their data into a reference counted body.
pub const HEAD_SIZE: usize = 16;

/// The number of infix bytes a branch or infix head stores inline.
pub const HEAD_FRAGMENT_LEN: usize = 5;

static mut SIP_KEY: [u8; 16] = [0; 16];
static INIT: Once = Once::new();

/// Initialises the process-wide key hashing secret and the byte table
/// permutations. Called automatically when the first tree is created.
fn init() {
    INIT.call_once(|| {
        bytetable::init();
        let mut rng = thread_rng();
        let mut key = [0u8; 16];
        rng.fill_bytes(&mut key);
        unsafe {
            SIP_KEY = key;
        }
    });
}

/// Initialises the key hashing secret and the byte table permutations
/// from a fixed seed, for reproducible runs. Must be called before the
/// first tree is created; later calls are no-ops.
pub fn init_seeded(seed: u64) {
    INIT.call_once(|| {
        let mut rng = StdRng::seed_from_u64(seed);
        bytetable::init_with(&mut rng);
        let mut key = [0u8; 16];
        rng.fill_bytes(&mut key);
        unsafe {
            SIP_KEY = key;
        }
    });
}

/// The keyed 128-bit digest of a full key. Node hashes are the XOR over
/// the digests of all keys in the subtree, so they are independent of
/// insertion order and tree shape.
fn leaf_key_hash<const KEY_LEN: usize>(key: &[u8; KEY_LEN]) -> u128 {
    let sip_key = unsafe { SIP_KEY };
    let mut hasher = SipHasher24::new_with_key(&sip_key);
    hasher.write(&key[..]);
    hasher.finish128().into()
}

/// Bounds a type to a maximum size and exposes the slack below the
/// limit. Used to size the inline key fragment of leaves around the
/// value they carry.
pub trait SizeLimited<const LIMIT: usize>: Sized {
    const UNUSED: usize = LIMIT - std::mem::size_of::<Self>();
}

impl<A: Sized, const LIMIT: usize> SizeLimited<LIMIT> for A {}

/// Splits the key into segments for selectivity accounting. Segment
/// counts answer "how many distinct segment prefixes exist below this
/// prefix" without a traversal, which query planners use to order
/// variables.
pub trait KeySegmentation<const KEY_LEN: usize>: Copy + Clone + std::fmt::Debug {
    /// The length of the key with every segment padded to the width of
    /// the widest one. [`PaddedCursor`] operates in this coordinate
    /// space.
    const PADDED_LEN: usize;

    /// Returns the segment index for the given key depth.
    fn segment(depth: usize) -> usize;

    /// Returns whether the given padded depth is padding rather than a
    /// key byte.
    fn padding(padded_depth: usize) -> bool;
}

/// A `KeySegmentation` treating the whole key as one segment.
/// This is the default segmentation.
#[derive(Copy, Clone, Debug)]
pub struct SingleSegmentation {}

impl<const KEY_LEN: usize> KeySegmentation<KEY_LEN> for SingleSegmentation {
    const PADDED_LEN: usize = KEY_LEN;

    fn segment(_depth: usize) -> usize {
        0
    }

    fn padding(_padded_depth: usize) -> bool {
        false
    }
}

fn index_start(infix_start: usize, index: usize) -> usize {
    index - infix_start
}

fn index_end(infix_len: usize, infix_end: usize, index: usize) -> usize {
    (index + infix_len) - infix_end
}

/// Copy the bytes at `source[start_index..]` to the front of `target`,
/// truncating whichever side is shorter.
fn copy_start(target: &mut [u8], source: &[u8], start_index: usize) {
    let used_len = min(source.len() - start_index, target.len());
    target[..used_len].copy_from_slice(&source[start_index..start_index + used_len]);
}

/// Copy the bytes at `source[..end_index]` to the back of `target`,
/// truncating whichever side is shorter.
fn copy_end(target: &mut [u8], source: &[u8], end_index: usize) {
    let target_len = target.len();
    let used_len = min(end_index, target_len);
    target[target_len - used_len..].copy_from_slice(&source[end_index - used_len..end_index]);
}

/// What a node has to say about a given depth: either the single key
/// byte every key below it shares there, or the set of child bytes it
/// branches into.
#[derive(Debug, Clone)]
pub(crate) enum Peek {
    Fragment(u8),
    Branch(ByteBitset),
}

/// The out-of-line part of an infix node: the compressed byte run that
/// does not fit the head, and the single child below it. The fragment
/// is anchored at the node's end depth, so re-anchoring the head never
/// has to move it.
#[derive(Clone, Debug)]
#[repr(C)]
pub(crate) struct InfixBody<const KEY_LEN: usize, V, S, const BODY_FRAGMENT_LEN: usize>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    pub(crate) child: Head<KEY_LEN, V, S>,
    pub(crate) fragment: [u8; BODY_FRAGMENT_LEN],
}

/// A node handle. Every variant is exactly [`HEAD_SIZE`] bytes, which
/// is what allows four of them to share a cache-line-sized bucket.
///
/// * `Empty` marks an unoccupied slot.
/// * `Leaf` stores the tail of its key and the value inline; it has no
///   body allocation.
/// * `Infix14..Infix62` compress a run of key bytes shared by every key
///   below them; bodies grow in 16 byte steps, and the smallest variant
///   able to carry a run is always chosen.
/// * `Branch4..Branch256` discriminate children by the key byte at
///   their end depth, holding 1 to 64 cuckoo buckets.
#[derive(Clone)]
#[repr(u8)]
pub(crate) enum Head<const KEY_LEN: usize, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    Empty {
        padding: [u8; 15],
    } = 0,
    Leaf {
        start_depth: u8,
        fragment: [u8; <V as SizeLimited<13>>::UNUSED + 1],
        value: V,
    },
    Infix14 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<InfixBody<KEY_LEN, V, S, 14>>,
    },
    Infix30 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<InfixBody<KEY_LEN, V, S, 30>>,
    },
    Infix46 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<InfixBody<KEY_LEN, V, S, 46>>,
    },
    Infix62 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<InfixBody<KEY_LEN, V, S, 62>>,
    },
    Branch4 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable4<Head<KEY_LEN, V, S>>>>,
    },
    Branch8 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable8<Head<KEY_LEN, V, S>>>>,
    },
    Branch16 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable16<Head<KEY_LEN, V, S>>>>,
    },
    Branch32 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable32<Head<KEY_LEN, V, S>>>>,
    },
    Branch64 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable64<Head<KEY_LEN, V, S>>>>,
    },
    Branch128 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable128<Head<KEY_LEN, V, S>>>>,
    },
    Branch256 {
        start_depth: u8,
        fragment: [u8; HEAD_FRAGMENT_LEN],
        end_depth: u8,
        body: Arc<BranchBody<KEY_LEN, V, S, ByteTable256<Head<KEY_LEN, V, S>>>>,
    },
}

impl<const KEY_LEN: usize, V, S> Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    /// The number of key tail bytes a leaf stores next to its value.
    pub(crate) const LEAF_FRAGMENT_LEN: usize = <V as SizeLimited<13>>::UNUSED + 1;

    pub(crate) fn new_empty() -> Self {
        Self::Empty { padding: [0; 15] }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }

    pub(crate) fn new_leaf(start_depth: usize, key: &[u8; KEY_LEN], value: V) -> Self {
        let actual_start_depth = max(
            start_depth,
            KEY_LEN.saturating_sub(Self::LEAF_FRAGMENT_LEN),
        );

        let mut fragment = [0; <V as SizeLimited<13>>::UNUSED + 1];
        copy_start(fragment.as_mut_slice(), &key[..], actual_start_depth);

        Self::Leaf {
            start_depth: actual_start_depth as u8,
            fragment,
            value,
        }
    }

    /// A new empty branch discriminating children at `end_depth`, with
    /// the infix bytes above it taken from `key`.
    fn new_branch_at(start_depth: usize, end_depth: usize, key: &[u8; KEY_LEN]) -> Self {
        let actual_start_depth = max(
            start_depth as isize,
            end_depth as isize - HEAD_FRAGMENT_LEN as isize,
        ) as usize;

        let mut fragment = [0; HEAD_FRAGMENT_LEN];
        copy_start(fragment.as_mut_slice(), &key[..], actual_start_depth);

        Self::Branch4 {
            start_depth: actual_start_depth as u8,
            fragment,
            end_depth: end_depth as u8,
            body: Arc::new(BranchBody::new()),
        }
    }

    /// Insert a child into a branch, growing the branch through its
    /// variants whenever the table reports a displaced entry. The child
    /// must be anchored at the branch's end depth and `key` must carry
    /// the path bytes above the branch.
    pub(crate) fn insert_child(self, key: &[u8; KEY_LEN], child: Self) -> Self {
        macro_rules! insert_arm {
            ($grow_fn:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident) => {{
                let mut body = Arc::try_unwrap($body).unwrap_or_else(|arc| (*arc).clone());
                let displaced = body.insert($end_depth as usize, key, child);
                $grow_fn($start_depth, $fragment, $end_depth, body, displaced)
            }};
        }
        match self {
            Head::Branch4 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_4, start_depth, fragment, end_depth, body)
            }
            Head::Branch8 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_8, start_depth, fragment, end_depth, body)
            }
            Head::Branch16 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_16, start_depth, fragment, end_depth, body)
            }
            Head::Branch32 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_32, start_depth, fragment, end_depth, body)
            }
            Head::Branch64 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_64, start_depth, fragment, end_depth, body)
            }
            Head::Branch128 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_128, start_depth, fragment, end_depth, body)
            }
            Head::Branch256 { start_depth, fragment, end_depth, body } => {
                insert_arm!(place_with_growth_256, start_depth, fragment, end_depth, body)
            }
            _ => panic!("`insert_child` called on non-branch"),
        }
    }

    pub(crate) fn start_depth(&self) -> usize {
        match self {
            Head::Empty { .. } => panic!("`start_depth` called on `Empty`"),
            Head::Leaf { start_depth, .. }
            | Head::Infix14 { start_depth, .. }
            | Head::Infix30 { start_depth, .. }
            | Head::Infix46 { start_depth, .. }
            | Head::Infix62 { start_depth, .. }
            | Head::Branch4 { start_depth, .. }
            | Head::Branch8 { start_depth, .. }
            | Head::Branch16 { start_depth, .. }
            | Head::Branch32 { start_depth, .. }
            | Head::Branch64 { start_depth, .. }
            | Head::Branch128 { start_depth, .. }
            | Head::Branch256 { start_depth, .. } => *start_depth as usize,
        }
    }

    /// The depth below which this node no longer speaks for the key:
    /// the branching depth for branches, the child's start for infixes,
    /// and the key length for leaves.
    pub(crate) fn end_depth(&self) -> usize {
        match self {
            Head::Empty { .. } => panic!("`end_depth` called on `Empty`"),
            Head::Leaf { .. } => KEY_LEN,
            Head::Infix14 { end_depth, .. }
            | Head::Infix30 { end_depth, .. }
            | Head::Infix46 { end_depth, .. }
            | Head::Infix62 { end_depth, .. }
            | Head::Branch4 { end_depth, .. }
            | Head::Branch8 { end_depth, .. }
            | Head::Branch16 { end_depth, .. }
            | Head::Branch32 { end_depth, .. }
            | Head::Branch64 { end_depth, .. }
            | Head::Branch128 { end_depth, .. }
            | Head::Branch256 { end_depth, .. } => *end_depth as usize,
        }
    }

    /// The number of keys reachable through this node.
    pub(crate) fn count(&self) -> u64 {
        match self {
            Head::Empty { .. } => 0,
            Head::Leaf { .. } => 1,
            Head::Infix14 { body, .. } => body.child.count(),
            Head::Infix30 { body, .. } => body.child.count(),
            Head::Infix46 { body, .. } => body.child.count(),
            Head::Infix62 { body, .. } => body.child.count(),
            Head::Branch4 { body, .. } => body.leaf_count,
            Head::Branch8 { body, .. } => body.leaf_count,
            Head::Branch16 { body, .. } => body.leaf_count,
            Head::Branch32 { body, .. } => body.leaf_count,
            Head::Branch64 { body, .. } => body.leaf_count,
            Head::Branch128 { body, .. } => body.leaf_count,
            Head::Branch256 { body, .. } => body.leaf_count,
        }
    }

    /// The number of distinct segment prefixes below this node, as seen
    /// from a query at `at_depth`. Nodes branching in a later segment
    /// count as a single prefix of the queried one.
    pub(crate) fn count_segment(&self, at_depth: usize) -> u32 {
        macro_rules! branch_arm {
            ($end_depth:ident, $body:ident) => {
                if S::segment(at_depth) != S::segment(*$end_depth as usize) {
                    1
                } else {
                    $body.segment_count
                }
            };
        }
        match self {
            Head::Empty { .. } => 0,
            Head::Leaf { .. } => 1,
            Head::Infix14 { body, .. } => body.child.count_segment(at_depth),
            Head::Infix30 { body, .. } => body.child.count_segment(at_depth),
            Head::Infix46 { body, .. } => body.child.count_segment(at_depth),
            Head::Infix62 { body, .. } => body.child.count_segment(at_depth),
            Head::Branch4 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch8 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch16 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch32 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch64 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch128 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch256 { end_depth, body, .. } => branch_arm!(end_depth, body),
        }
    }

    /// The XOR over the key digests of the subtree. Branches answer from
    /// their maintained sum; leaves and infixes reconstruct their full
    /// key by overlaying their stored bytes on `prefix`, which must hold
    /// the path bytes above this node's start.
    pub(crate) fn hash(&self, prefix: &[u8; KEY_LEN]) -> u128 {
        macro_rules! infix_arm {
            ($start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident, $body_fragment_len:expr) => {{
                let start = *$start_depth as usize;
                let end = *$end_depth as usize;
                let mut key = *prefix;
                for depth in start..end {
                    key[depth] = if depth < start + HEAD_FRAGMENT_LEN {
                        $fragment[index_start(start, depth)]
                    } else {
                        $body.fragment[index_end($body_fragment_len, end, depth)]
                    };
                }
                $body.child.hash(&key)
            }};
        }
        match self {
            Head::Empty { .. } => 0,
            Head::Leaf {
                start_depth,
                fragment,
                ..
            } => {
                let start = *start_depth as usize;
                let mut key = *prefix;
                for depth in start..KEY_LEN {
                    key[depth] = fragment[index_start(start, depth)];
                }
                leaf_key_hash(&key)
            }
            Head::Infix14 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 14)
            }
            Head::Infix30 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 30)
            }
            Head::Infix46 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 46)
            }
            Head::Infix62 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 62)
            }
            Head::Branch4 { body, .. } => body.node_hash,
            Head::Branch8 { body, .. } => body.node_hash,
            Head::Branch16 { body, .. } => body.node_hash,
            Head::Branch32 { body, .. } => body.node_hash,
            Head::Branch64 { body, .. } => body.node_hash,
            Head::Branch128 { body, .. } => body.node_hash,
            Head::Branch256 { body, .. } => body.node_hash,
        }
    }

    /// What this node fixes at `at_depth`: the infix byte there, or the
    /// set of child bytes if `at_depth` is its branching depth. Infixes
    /// at their end depth delegate to their child, so a caller walking
    /// depths never sees a gap.
    pub(crate) fn peek(&self, at_depth: usize) -> Peek {
        macro_rules! infix_arm {
            ($start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident, $body_fragment_len:expr) => {{
                let start = *$start_depth as usize;
                let end = *$end_depth as usize;
                debug_assert!(start <= at_depth && at_depth <= end);
                if at_depth == end {
                    $body.child.peek(at_depth)
                } else if at_depth < start + HEAD_FRAGMENT_LEN {
                    Peek::Fragment($fragment[index_start(start, at_depth)])
                } else {
                    Peek::Fragment($body.fragment[index_end($body_fragment_len, end, at_depth)])
                }
            }};
        }
        macro_rules! branch_arm {
            ($start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident) => {{
                let start = *$start_depth as usize;
                let end = *$end_depth as usize;
                debug_assert!(start <= at_depth && at_depth <= end);
                if at_depth == end {
                    Peek::Branch($body.child_set)
                } else {
                    Peek::Fragment($fragment[index_start(start, at_depth)])
                }
            }};
        }
        match self {
            Head::Empty { .. } => panic!("`peek` called on `Empty`"),
            Head::Leaf {
                start_depth,
                fragment,
                ..
            } => {
                let start = *start_depth as usize;
                debug_assert!(start <= at_depth && at_depth < KEY_LEN);
                Peek::Fragment(fragment[index_start(start, at_depth)])
            }
            Head::Infix14 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 14)
            }
            Head::Infix30 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 30)
            }
            Head::Infix46 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 46)
            }
            Head::Infix62 { start_depth, fragment, end_depth, body } => {
                infix_arm!(start_depth, fragment, end_depth, body, 62)
            }
            Head::Branch4 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch8 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch16 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch32 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch64 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch128 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
            Head::Branch256 { start_depth, fragment, end_depth, body } => {
                branch_arm!(start_depth, fragment, end_depth, body)
            }
        }
    }

    /// The node continuing the descent when `byte` is chosen at
    /// `at_depth`: this node itself while `at_depth` lies in its infix,
    /// the matching table entry at a branching depth, or `Empty` if the
    /// byte does not occur.
    pub(crate) fn child(&self, at_depth: usize, byte: u8) -> Self {
        macro_rules! infix_arm {
            ($end_depth:ident, $body:ident) => {{
                if at_depth == *$end_depth as usize {
                    $body.child.child(at_depth, byte)
                } else {
                    match self.peek(at_depth) {
                        Peek::Fragment(b) if b == byte => self.clone(),
                        _ => Self::new_empty(),
                    }
                }
            }};
        }
        macro_rules! branch_arm {
            ($end_depth:ident, $body:ident) => {{
                if at_depth == *$end_depth as usize {
                    if $body.child_set.is_set(byte) {
                        $body
                            .child_table
                            .get(&$body.rand_hash_used, byte)
                            .expect("child table must contain the set byte")
                            .clone()
                    } else {
                        Self::new_empty()
                    }
                } else {
                    match self.peek(at_depth) {
                        Peek::Fragment(b) if b == byte => self.clone(),
                        _ => Self::new_empty(),
                    }
                }
            }};
        }
        match self {
            Head::Empty { .. } => Self::new_empty(),
            Head::Leaf { .. } => match self.peek(at_depth) {
                Peek::Fragment(b) if b == byte => self.clone(),
                _ => Self::new_empty(),
            },
            Head::Infix14 { end_depth, body, .. } => infix_arm!(end_depth, body),
            Head::Infix30 { end_depth, body, .. } => infix_arm!(end_depth, body),
            Head::Infix46 { end_depth, body, .. } => infix_arm!(end_depth, body),
            Head::Infix62 { end_depth, body, .. } => infix_arm!(end_depth, body),
            Head::Branch4 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch8 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch16 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch32 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch64 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch128 { end_depth, body, .. } => branch_arm!(end_depth, body),
            Head::Branch256 { end_depth, body, .. } => branch_arm!(end_depth, body),
        }
    }

    /// Borrow the child continuing the descent below this node's end
    /// depth. Only meaningful for infixes and branches.
    pub(crate) fn child_ref(&self, byte: u8) -> Option<&Self> {
        macro_rules! branch_arm {
            ($body:ident) => {
                $body.child_table.get(&$body.rand_hash_used, byte)
            };
        }
        match self {
            Head::Empty { .. } | Head::Leaf { .. } => None,
            Head::Infix14 { body, .. } => Some(&body.child),
            Head::Infix30 { body, .. } => Some(&body.child),
            Head::Infix46 { body, .. } => Some(&body.child),
            Head::Infix62 { body, .. } => Some(&body.child),
            Head::Branch4 { body, .. } => branch_arm!(body),
            Head::Branch8 { body, .. } => branch_arm!(body),
            Head::Branch16 { body, .. } => branch_arm!(body),
            Head::Branch32 { body, .. } => branch_arm!(body),
            Head::Branch64 { body, .. } => branch_arm!(body),
            Head::Branch128 { body, .. } => branch_arm!(body),
            Head::Branch256 { body, .. } => branch_arm!(body),
        }
    }

    /// Re-anchor this node at `new_start_depth`, keeping its logical
    /// byte content. Bytes between the new and the old start are
    /// supplied from `key`. Start depths clamp to what the variant can
    /// carry; use [`Self::wrap_path`] when the anchor must be reached
    /// exactly.
    pub(crate) fn with_start(self, new_start_depth: usize, key: &[u8; KEY_LEN]) -> Self {
        macro_rules! infix_arm {
            ($variant:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident, $body_fragment_len:expr) => {{
                let old_start = $start_depth as usize;
                let end = $end_depth as usize;
                let actual_start_depth = max(
                    new_start_depth as isize,
                    end as isize - ($body_fragment_len + HEAD_FRAGMENT_LEN) as isize,
                ) as usize;
                let mut new_fragment = [0; HEAD_FRAGMENT_LEN];
                for i in 0..HEAD_FRAGMENT_LEN {
                    let depth = actual_start_depth + i;
                    if depth >= end {
                        break;
                    }
                    new_fragment[i] = if depth < old_start {
                        key[depth]
                    } else if depth < old_start + HEAD_FRAGMENT_LEN {
                        $fragment[index_start(old_start, depth)]
                    } else {
                        $body.fragment[index_end($body_fragment_len, end, depth)]
                    };
                }
                Self::$variant {
                    start_depth: actual_start_depth as u8,
                    fragment: new_fragment,
                    end_depth: $end_depth,
                    body: $body,
                }
            }};
        }
        macro_rules! branch_arm {
            ($variant:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident) => {{
                let old_start = $start_depth as usize;
                let end = $end_depth as usize;
                let actual_start_depth = max(
                    new_start_depth as isize,
                    end as isize - HEAD_FRAGMENT_LEN as isize,
                ) as usize;
                let mut new_fragment = [0; HEAD_FRAGMENT_LEN];
                for i in 0..HEAD_FRAGMENT_LEN {
                    let depth = actual_start_depth + i;
                    if depth >= end {
                        break;
                    }
                    new_fragment[i] = if depth < old_start {
                        key[depth]
                    } else {
                        $fragment[index_start(old_start, depth)]
                    };
                }
                Self::$variant {
                    start_depth: actual_start_depth as u8,
                    fragment: new_fragment,
                    end_depth: $end_depth,
                    body: $body,
                }
            }};
        }
        match self {
            Head::Empty { .. } => panic!("`with_start` called on `Empty`"),
            Head::Leaf {
                start_depth,
                fragment,
                value,
            } => {
                let old_start = start_depth as usize;
                let actual_start_depth = max(
                    new_start_depth,
                    KEY_LEN.saturating_sub(Self::LEAF_FRAGMENT_LEN),
                );
                let mut new_fragment = [0; <V as SizeLimited<13>>::UNUSED + 1];
                for i in 0..new_fragment.len() {
                    let depth = actual_start_depth + i;
                    if depth >= KEY_LEN {
                        break;
                    }
                    new_fragment[i] = if depth < old_start {
                        key[depth]
                    } else {
                        fragment[index_start(old_start, depth)]
                    };
                }
                Self::Leaf {
                    start_depth: actual_start_depth as u8,
                    fragment: new_fragment,
                    value,
                }
            }
            Head::Infix14 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix14, start_depth, fragment, end_depth, body, 14)
            }
            Head::Infix30 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix30, start_depth, fragment, end_depth, body, 30)
            }
            Head::Infix46 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix46, start_depth, fragment, end_depth, body, 46)
            }
            Head::Infix62 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix62, start_depth, fragment, end_depth, body, 62)
            }
            Head::Branch4 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch4, start_depth, fragment, end_depth, body)
            }
            Head::Branch8 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch8, start_depth, fragment, end_depth, body)
            }
            Head::Branch16 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch16, start_depth, fragment, end_depth, body)
            }
            Head::Branch32 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch32, start_depth, fragment, end_depth, body)
            }
            Head::Branch64 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch64, start_depth, fragment, end_depth, body)
            }
            Head::Branch128 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch128, start_depth, fragment, end_depth, body)
            }
            Head::Branch256 { start_depth, fragment, end_depth, body } => {
                branch_arm!(Branch256, start_depth, fragment, end_depth, body)
            }
        }
    }

    /// Anchor this node at exactly `start_depth`, wrapping it in the
    /// smallest infix variant able to carry the bytes its own head
    /// cannot. `key` must supply the path bytes over the wrapped range.
    /// An infix is never wrapped in another infix; re-anchoring one
    /// below its capacity rebuilds a single merged infix over its child.
    pub(crate) fn wrap_path(self, start_depth: usize, key: &[u8; KEY_LEN]) -> Self {
        macro_rules! infix_arm {
            ($variant:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident, $body_fragment_len:expr) => {{
                let old_start = $start_depth as usize;
                let end = $end_depth as usize;
                let fits = end.saturating_sub($body_fragment_len + HEAD_FRAGMENT_LEN)
                    <= start_depth;
                if old_start <= start_depth || fits {
                    // The anchor lies within this variant's capacity.
                    return Self::$variant {
                        start_depth: $start_depth,
                        fragment: $fragment,
                        end_depth: $end_depth,
                        body: $body,
                    }
                    .with_start(start_depth, key);
                }
                // The run outgrew this variant; overlay its bytes on the
                // key and wrap its child afresh over the merged span.
                let mut full_key = *key;
                for depth in old_start..end {
                    full_key[depth] = if depth < old_start + HEAD_FRAGMENT_LEN {
                        $fragment[index_start(old_start, depth)]
                    } else {
                        $body.fragment[index_end($body_fragment_len, end, depth)]
                    };
                }
                let body = Arc::try_unwrap($body).unwrap_or_else(|arc| (*arc).clone());
                return Self::wrap_non_infix(body.child, start_depth, &full_key);
            }};
        }
        match self {
            Head::Infix14 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix14, start_depth, fragment, end_depth, body, 14)
            }
            Head::Infix30 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix30, start_depth, fragment, end_depth, body, 30)
            }
            Head::Infix46 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix46, start_depth, fragment, end_depth, body, 46)
            }
            Head::Infix62 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix62, start_depth, fragment, end_depth, body, 62)
            }
            other => Self::wrap_non_infix(other, start_depth, key),
        }
    }

    fn wrap_non_infix(node: Self, start_depth: usize, key: &[u8; KEY_LEN]) -> Self {
        let expanded = node.with_start(start_depth, key);

        let actual_start_depth = expanded.start_depth();
        if start_depth == actual_start_depth {
            return expanded;
        }

        let path_length = actual_start_depth - start_depth;

        if path_length <= 14 + HEAD_FRAGMENT_LEN {
            return Self::new_infix14(start_depth, key, expanded);
        }
        if path_length <= 30 + HEAD_FRAGMENT_LEN {
            return Self::new_infix30(start_depth, key, expanded);
        }
        if path_length <= 46 + HEAD_FRAGMENT_LEN {
            return Self::new_infix46(start_depth, key, expanded);
        }
        if path_length <= 62 + HEAD_FRAGMENT_LEN {
            return Self::new_infix62(start_depth, key, expanded);
        }

        panic!("infix span exceeds the largest infix variant");
    }

    pub(crate) fn put(self, at_depth: usize, key: &[u8; KEY_LEN], value: V) -> Self {
        macro_rules! infix_arm {
            ($variant:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident, $body_fragment_len:expr) => {{
                let start = $start_depth as usize;
                let end = $end_depth as usize;
                debug_assert_eq!(at_depth, start);

                let mut branch_depth = at_depth;
                while branch_depth < end {
                    let infix_byte = if branch_depth < start + HEAD_FRAGMENT_LEN {
                        $fragment[index_start(start, branch_depth)]
                    } else {
                        $body.fragment[index_end($body_fragment_len, end, branch_depth)]
                    };
                    if infix_byte == key[branch_depth] {
                        branch_depth += 1;
                    } else {
                        break;
                    }
                }

                if branch_depth == end {
                    // The whole infix matched, the key continues in the child.
                    let mut new_body = Arc::try_unwrap($body).unwrap_or_else(|arc| (*arc).clone());
                    let child = std::mem::replace(&mut new_body.child, Self::new_empty());
                    let new_child = child.put(end, key, value);
                    if new_child.start_depth() != end {
                        // The child put introduced a branch shallower than
                        // this infix reaches; the whole run is re-wrapped
                        // into a single fresh infix over it.
                        return new_child.wrap_path(at_depth, key);
                    }
                    new_body.child = new_child;
                    return Self::$variant {
                        start_depth: $start_depth,
                        fragment: $fragment,
                        end_depth: $end_depth,
                        body: Arc::new(new_body),
                    };
                }

                // The key diverges inside the infix; a branch at the
                // discriminating depth adopts the new leaf and this node.
                let sibling = Self::new_leaf(branch_depth, key, value).wrap_path(branch_depth, key);
                let this = Self::$variant {
                    start_depth: $start_depth,
                    fragment: $fragment,
                    end_depth: $end_depth,
                    body: $body,
                };
                Self::new_branch_at(at_depth, branch_depth, key)
                    .insert_child(key, sibling)
                    .insert_child(key, this.with_start(branch_depth, key))
            }};
        }

        macro_rules! branch_arm {
            ($grow_fn:ident, $variant:ident, $start_depth:ident, $fragment:ident, $end_depth:ident, $body:ident) => {{
                let start = $start_depth as usize;
                let end = $end_depth as usize;
                debug_assert_eq!(at_depth, start);

                let mut branch_depth = at_depth;
                while branch_depth < end
                    && $fragment[index_start(start, branch_depth)] == key[branch_depth]
                {
                    branch_depth += 1;
                }

                if branch_depth < end {
                    let sibling =
                        Self::new_leaf(branch_depth, key, value).wrap_path(branch_depth, key);
                    let this = Self::$variant {
                        start_depth: $start_depth,
                        fragment: $fragment,
                        end_depth: $end_depth,
                        body: $body,
                    };
                    return Self::new_branch_at(at_depth, branch_depth, key)
                        .insert_child(key, sibling)
                        .insert_child(key, this.with_start(branch_depth, key));
                }

                let byte_key = key[end];
                let mut new_body = Arc::try_unwrap($body).unwrap_or_else(|arc| (*arc).clone());

                if new_body.child_set.is_set(byte_key) {
                    // Update the existing child in its slot and patch the
                    // hash and counters by the delta.
                    let old_hash;
                    let old_leaf_count;
                    let old_segment_count;
                    let new_hash;
                    let new_leaf_count;
                    let new_segment_count;
                    {
                        let rand_hash_used = new_body.rand_hash_used;
                        let slot = new_body
                            .child_table
                            .get_mut(&rand_hash_used, byte_key)
                            .expect("child table must contain the set byte");
                        let old_child = std::mem::replace(slot, Self::new_empty());
                        old_hash = old_child.hash(key);
                        old_leaf_count = old_child.count();
                        old_segment_count = old_child.count_segment(end);
                        let new_child = old_child.put(end, key, value);
                        let new_child = if new_child.start_depth() == end {
                            new_child
                        } else {
                            new_child.wrap_path(end, key)
                        };
                        new_hash = new_child.hash(key);
                        new_leaf_count = new_child.count();
                        new_segment_count = new_child.count_segment(end);
                        *slot = new_child;
                    }
                    new_body.node_hash = (new_body.node_hash ^ old_hash) ^ new_hash;
                    new_body.leaf_count = (new_body.leaf_count - old_leaf_count) + new_leaf_count;
                    new_body.segment_count =
                        (new_body.segment_count - old_segment_count) + new_segment_count;
                    return Self::$variant {
                        start_depth: $start_depth,
                        fragment: $fragment,
                        end_depth: $end_depth,
                        body: Arc::new(new_body),
                    };
                }

                let inserted = Self::new_leaf(end, key, value).wrap_path(end, key);
                let displaced = new_body.insert(end, key, inserted);
                $grow_fn($start_depth, $fragment, $end_depth, new_body, displaced)
            }};
        }

        match self {
            Head::Empty { .. } => Self::new_leaf(at_depth, key, value).wrap_path(at_depth, key),
            Head::Leaf {
                start_depth,
                fragment,
                value: old_value,
            } => {
                let start = start_depth as usize;
                debug_assert_eq!(at_depth, start);

                let mut branch_depth = at_depth;
                while branch_depth < KEY_LEN
                    && fragment[index_start(start, branch_depth)] == key[branch_depth]
                {
                    branch_depth += 1;
                }

                if branch_depth == KEY_LEN {
                    // Same key: overwrite the value. The hash is keyed on
                    // keys only, so the subtree digest is unchanged.
                    return Self::Leaf {
                        start_depth,
                        fragment,
                        value,
                    };
                }

                let this = Self::Leaf {
                    start_depth,
                    fragment,
                    value: old_value,
                };
                let sibling = Self::new_leaf(branch_depth, key, value);
                Self::new_branch_at(at_depth, branch_depth, key)
                    .insert_child(key, sibling)
                    .insert_child(key, this.with_start(branch_depth, key))
            }
            Head::Infix14 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix14, start_depth, fragment, end_depth, body, 14)
            }
            Head::Infix30 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix30, start_depth, fragment, end_depth, body, 30)
            }
            Head::Infix46 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix46, start_depth, fragment, end_depth, body, 46)
            }
            Head::Infix62 { start_depth, fragment, end_depth, body } => {
                infix_arm!(Infix62, start_depth, fragment, end_depth, body, 62)
            }
            Head::Branch4 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_4, Branch4, start_depth, fragment, end_depth, body)
            }
            Head::Branch8 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_8, Branch8, start_depth, fragment, end_depth, body)
            }
            Head::Branch16 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_16, Branch16, start_depth, fragment, end_depth, body)
            }
            Head::Branch32 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_32, Branch32, start_depth, fragment, end_depth, body)
            }
            Head::Branch64 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_64, Branch64, start_depth, fragment, end_depth, body)
            }
            Head::Branch128 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_128, Branch128, start_depth, fragment, end_depth, body)
            }
            Head::Branch256 { start_depth, fragment, end_depth, body } => {
                branch_arm!(place_with_growth_256, Branch256, start_depth, fragment, end_depth, body)
            }
        }
    }
}

macro_rules! create_new_infix {
    ($name:ident, $variant:ident, $body_fragment_len:expr) => {
        impl<const KEY_LEN: usize, V, S> Head<KEY_LEN, V, S>
        where
            V: SizeLimited<13> + Clone,
            S: KeySegmentation<KEY_LEN>,
            [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
        {
            fn $name(start_depth: usize, key: &[u8; KEY_LEN], child: Self) -> Self {
                let end_depth = child.start_depth();

                let mut body_fragment = [0; $body_fragment_len];
                copy_end(body_fragment.as_mut_slice(), &key[..], end_depth);

                let body = Arc::new(InfixBody {
                    child,
                    fragment: body_fragment,
                });

                let actual_start_depth = max(
                    start_depth as isize,
                    end_depth as isize - ($body_fragment_len + HEAD_FRAGMENT_LEN) as isize,
                ) as usize;

                let mut fragment = [0; HEAD_FRAGMENT_LEN];
                copy_start(fragment.as_mut_slice(), &key[..], actual_start_depth);

                Self::$variant {
                    start_depth: actual_start_depth as u8,
                    fragment,
                    end_depth: end_depth as u8,
                    body,
                }
            }
        }
    };
}

create_new_infix!(new_infix14, Infix14, 14);
create_new_infix!(new_infix30, Infix30, 30);
create_new_infix!(new_infix46, Infix46, 46);
create_new_infix!(new_infix62, Infix62, 62);

impl<const KEY_LEN: usize, V, S> ByteEntry for Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn zeroed() -> Self {
        Self::new_empty()
    }

    fn key(&self) -> Option<u8> {
        match self {
            Head::Empty { .. } => None,
            Head::Leaf { fragment, .. } => Some(fragment[0]),
            Head::Infix14 { fragment, .. } => Some(fragment[0]),
            Head::Infix30 { fragment, .. } => Some(fragment[0]),
            Head::Infix46 { fragment, .. } => Some(fragment[0]),
            Head::Infix62 { fragment, .. } => Some(fragment[0]),
            Head::Branch4 { fragment, .. } => Some(fragment[0]),
            Head::Branch8 { fragment, .. } => Some(fragment[0]),
            Head::Branch16 { fragment, .. } => Some(fragment[0]),
            Head::Branch32 { fragment, .. } => Some(fragment[0]),
            Head::Branch64 { fragment, .. } => Some(fragment[0]),
            Head::Branch128 { fragment, .. } => Some(fragment[0]),
            Head::Branch256 { fragment, .. } => Some(fragment[0]),
        }
    }
}

impl<const KEY_LEN: usize, V, S> Default for Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn default() -> Self {
        Self::new_empty()
    }
}

impl<const KEY_LEN: usize, V, S> fmt::Debug for Head<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Head::Empty { .. } => "Empty",
            Head::Leaf { .. } => "Leaf",
            Head::Infix14 { .. } => "Infix14",
            Head::Infix30 { .. } => "Infix30",
            Head::Infix46 { .. } => "Infix46",
            Head::Infix62 { .. } => "Infix62",
            Head::Branch4 { .. } => "Branch4",
            Head::Branch8 { .. } => "Branch8",
            Head::Branch16 { .. } => "Branch16",
            Head::Branch32 { .. } => "Branch32",
            Head::Branch64 { .. } => "Branch64",
            Head::Branch128 { .. } => "Branch128",
            Head::Branch256 { .. } => "Branch256",
        };
        if self.is_empty() {
            write!(f, "{}", name)
        } else {
            write!(
                f,
                "{}[{}..{}]",
                name,
                self.start_depth(),
                self.end_depth()
            )
        }
    }
}

/// A persistent adaptive cuckoo trie over `[u8; KEY_LEN]` keys carrying
/// values of type `V`.
///
/// Cloning is O(1) and shares structure; all mutation is copy-on-write,
/// so clones behave as immutable snapshots. Two trees built from the
/// same keys compare equal regardless of insertion order, in constant
/// time, via their maintained structural hash.
pub struct PACT<const KEY_LEN: usize, V, S = SingleSegmentation>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    pub(crate) root: Head<KEY_LEN, V, S>,
}

impl<const KEY_LEN: usize, V, S> PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    /// Creates a new empty tree. The first tree created in a process
    /// initialises the hashing secret, unless [`init_seeded`] was called
    /// before.
    pub fn new() -> Self {
        init();
        PACT {
            root: Head::new_empty(),
        }
    }

    /// Inserts the key, or overwrites its value if it is already
    /// present. Re-inserting a present key never changes the tree's
    /// structural hash.
    pub fn put(&mut self, key: &[u8; KEY_LEN], value: V) {
        let root = std::mem::replace(&mut self.root, Head::new_empty());
        self.root = root.put(0, key, value).wrap_path(0, key);
    }

    /// Returns the value stored under the key, if any.
    pub fn get(&self, key: &[u8; KEY_LEN]) -> Option<&V> {
        if self.root.is_empty() {
            return None;
        }
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            if depth == KEY_LEN {
                return match node {
                    Head::Leaf { value, .. } => Some(value),
                    _ => None,
                };
            }
            if depth == node.end_depth() {
                node = node.child_ref(key[depth])?;
            } else {
                match node.peek(depth) {
                    Peek::Fragment(byte) if byte == key[depth] => depth += 1,
                    _ => return None,
                }
            }
        }
    }

    /// The number of keys in the tree.
    pub fn len(&self) -> u64 {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// An O(1) snapshot sharing the whole tree. Writes to either handle
    /// copy the touched path and leave the other unchanged.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Returns true if some key with the given prefix is present.
    pub fn has_prefix<const PREFIX_LEN: usize>(&self, prefix: &[u8; PREFIX_LEN]) -> bool {
        assert!(PREFIX_LEN <= KEY_LEN);
        if self.root.is_empty() {
            return PREFIX_LEN == 0;
        }
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            if depth == PREFIX_LEN {
                return true;
            }
            if depth == node.end_depth() {
                match node.child_ref(prefix[depth]) {
                    Some(child) => node = child,
                    None => return false,
                }
            } else {
                match node.peek(depth) {
                    Peek::Fragment(byte) if byte == prefix[depth] => depth += 1,
                    _ => return false,
                }
            }
        }
    }

    /// The number of distinct segment prefixes under the given prefix,
    /// per the tree's [`KeySegmentation`]. Used as a selectivity
    /// estimate by query planners.
    pub fn segmented_len<const PREFIX_LEN: usize>(&self, prefix: &[u8; PREFIX_LEN]) -> u64 {
        assert!(PREFIX_LEN <= KEY_LEN);
        if self.root.is_empty() {
            return 0;
        }
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            if depth == PREFIX_LEN {
                return node.count_segment(PREFIX_LEN) as u64;
            }
            if depth == node.end_depth() {
                match node.child_ref(prefix[depth]) {
                    Some(child) => node = child,
                    None => return 0,
                }
            } else {
                match node.peek(depth) {
                    Peek::Fragment(byte) if byte == prefix[depth] => depth += 1,
                    _ => return 0,
                }
            }
        }
    }

    /// A cursor positioned at the root, for byte-at-a-time traversal.
    pub fn cursor(&self) -> PACTCursor<KEY_LEN, V, S> {
        PACTCursor::new(self)
    }

    /// A cursor over the segment-padded view of the key space.
    pub fn padded_cursor(&self) -> PaddedCursor<KEY_LEN, V, S> {
        PaddedCursor::new(self)
    }

    /// Depth-first iteration over every node in the tree.
    pub fn nodes(&self) -> NodeIterator<KEY_LEN, V, S> {
        NodeIterator::new(self)
    }

    /// Iteration over all keys, in ascending byte order.
    pub fn iter(&self) -> KeyIterator<KEY_LEN, V, S> {
        KeyIterator::new(self)
    }

    pub(crate) fn root_hash(&self) -> Option<u128> {
        if self.root.is_empty() {
            None
        } else {
            Some(self.root.hash(&[0; KEY_LEN]))
        }
    }
}

impl<const KEY_LEN: usize, V, S> Clone for PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn clone(&self) -> Self {
        PACT {
            root: self.root.clone(),
        }
    }
}

impl<const KEY_LEN: usize, V, S> Default for PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const KEY_LEN: usize, V, S> PartialEq for PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn eq(&self, other: &Self) -> bool {
        self.root_hash() == other.root_hash()
    }
}

impl<const KEY_LEN: usize, V, S> Eq for PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
}

impl<const KEY_LEN: usize, V, S> fmt::Debug for PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PACT")
            .field("len", &self.len())
            .field("root", &self.root)
            .finish()
    }
}

impl<'a, const KEY_LEN: usize, V, S> IntoIterator for &'a PACT<KEY_LEN, V, S>
where
    V: SizeLimited<13> + Clone,
    S: KeySegmentation<KEY_LEN>,
    [u8; <V as SizeLimited<13>>::UNUSED + 1]: Sized,
{
    type Item = [u8; KEY_LEN];
    type IntoIter = KeyIterator<KEY_LEN, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        KeyIterator::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::mem;

    #[test]
    fn head_size() {
        assert_eq!(mem::size_of::<Head<64, (), SingleSegmentation>>(), HEAD_SIZE);
        assert_eq!(mem::size_of::<Head<64, u64, SingleSegmentation>>(), HEAD_SIZE);
        assert_eq!(mem::size_of::<Head<4, u32, SingleSegmentation>>(), HEAD_SIZE);
    }

    #[test]
    fn infix_body_size() {
        assert_eq!(mem::size_of::<InfixBody<64, (), SingleSegmentation, 14>>(), 16 * 2);
        assert_eq!(mem::size_of::<InfixBody<64, (), SingleSegmentation, 30>>(), 16 * 3);
        assert_eq!(mem::size_of::<InfixBody<64, (), SingleSegmentation, 46>>(), 16 * 4);
        assert_eq!(mem::size_of::<InfixBody<64, (), SingleSegmentation, 62>>(), 16 * 5);
    }

    #[test]
    fn empty_tree() {
        let tree = PACT::<64, (), SingleSegmentation>::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn tree_put_one() {
        let mut tree = PACT::<64, (), SingleSegmentation>::new();
        let key = [0; 64];
        tree.put(&key, ());
        assert_eq!(tree.len(), 1);
        assert!(tree.get(&key).is_some());
    }

    #[test]
    fn tree_put_same_key_is_idempotent() {
        let mut tree = PACT::<64, (), SingleSegmentation>::new();
        let key = [7; 64];
        tree.put(&key, ());
        let hash_before = tree.root_hash();
        tree.put(&key, ());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root_hash(), hash_before);
    }

    #[test]
    fn tree_put_overwrites_value() {
        let mut tree = PACT::<4, u32, SingleSegmentation>::new();
        let key = [1, 2, 3, 4];
        tree.put(&key, 17);
        assert_eq!(tree.get(&key), Some(&17));
        let hash_before = tree.root_hash();
        tree.put(&key, 23);
        assert_eq!(tree.get(&key), Some(&23));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root_hash(), hash_before);
    }

    #[test]
    fn divergence_at_first_byte() {
        let mut tree = PACT::<64, (), SingleSegmentation>::new();
        tree.put(&[0; 64], ());
        tree.put(&[1; 64], ());
        assert_eq!(tree.len(), 2);
        assert!(tree.get(&[0; 64]).is_some());
        assert!(tree.get(&[1; 64]).is_some());
    }

    #[test]
    fn divergence_at_last_byte() {
        let mut tree = PACT::<64, (), SingleSegmentation>::new();
        let mut a = [0; 64];
        let mut b = [0; 64];
        a[63] = 1;
        b[63] = 2;
        tree.put(&a, ());
        tree.put(&b, ());
        assert_eq!(tree.len(), 2);
        assert!(tree.get(&a).is_some());
        assert!(tree.get(&b).is_some());
        assert!(tree.get(&[0; 64]).is_none());
    }

    #[test]
    fn branch_growth_over_first_byte() {
        let mut tree = PACT::<64, (), SingleSegmentation>::new();
        for i in 0..=255u8 {
            let mut key = [0; 64];
            key[0] = i;
            tree.put(&key, ());
        }
        assert_eq!(tree.len(), 256);
        for i in 0..=255u8 {
            let mut key = [0; 64];
            key[0] = i;
            assert!(tree.get(&key).is_some());
        }
    }

    proptest! {
        #[test]
        fn tree_len(keys in prop::collection::vec(prop::collection::vec(0u8..=255, 64), 1..1024)) {
            let mut tree = PACT::<64, (), SingleSegmentation>::new();
            let mut set = HashSet::new();
            for key in keys {
                let key: [u8; 64] = key.try_into().unwrap();
                tree.put(&key, ());
                set.insert(key);
            }
            prop_assert_eq!(set.len() as u64, tree.len());
        }

        #[test]
        fn tree_get(keys in prop::collection::vec(prop::collection::vec(0u8..=255, 64), 1..256)) {
            let mut tree = PACT::<64, u64, SingleSegmentation>::new();
            let mut reference = std::collections::HashMap::new();
            for (i, key) in keys.into_iter().enumerate() {
                let key: [u8; 64] = key.try_into().unwrap();
                tree.put(&key, i as u64);
                reference.insert(key, i as u64);
            }
            for (key, value) in &reference {
                prop_assert_eq!(tree.get(key), Some(value));
            }
        }

        #[test]
        fn tree_hash_is_insertion_order_independent(
            keys in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 1..256)
        ) {
            let keys: Vec<[u8; 64]> = keys.into_iter().map(|k| k.try_into().unwrap()).collect();

            let mut forward = PACT::<64, (), SingleSegmentation>::new();
            for key in &keys {
                forward.put(key, ());
            }
            let mut backward = PACT::<64, (), SingleSegmentation>::new();
            for key in keys.iter().rev() {
                backward.put(key, ());
            }

            prop_assert_eq!(forward.root_hash(), backward.root_hash());
            prop_assert!(forward == backward);
        }

        #[test]
        fn tree_snapshot_isolation(
            keys in prop::collection::hash_set(prop::collection::vec(0u8..=255, 64), 2..64)
        ) {
            let keys: Vec<[u8; 64]> = keys.into_iter().map(|k| k.try_into().unwrap()).collect();
            let (probe, rest) = keys.split_first().unwrap();

            let mut tree = PACT::<64, (), SingleSegmentation>::new();
            for key in rest {
                tree.put(key, ());
            }
            let snapshot = tree.branch();
            let count_before = snapshot.len();

            tree.put(probe, ());

            prop_assert_eq!(snapshot.len(), count_before);
            prop_assert!(snapshot.get(probe).is_none());
            prop_assert!(tree.get(probe).is_some());
        }
    }
}
