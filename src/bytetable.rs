//! Cuckoo hash tables indexed by a single byte.
//!
//! Each table is a fixed power-of-two array of cache-line-sized buckets
//! holding four slots each. A key is stored in the bucket selected by one
//! of two hash functions: the bit-reversal permutation (`ideal_hash`) or a
//! process-wide random byte permutation (`rand_hash`). Which of the two
//! placed a key is tracked by the owning node in a [`ByteBitset`], so a
//! lookup probes exactly one bucket.
//!
//! Both hashes are compressed by masking with the bucket count. Growing a
//! table doubles the bucket array by duplicating it; a key is then present
//! under both indices its hashes can compress to, and the copy that no
//! longer matches its placement hash is reclaimed by a later insert that
//! treats such outdated slots as free.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::thread_rng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::Once;

use crate::bitset::ByteBitset;

/// The number of slots per bucket.
pub const BUCKET_SLOT_COUNT: usize = 4;

/// The maximum number of buckets per table.
pub const MAX_BUCKET_COUNT: usize = 64;

/// The maximum number of cuckoo displacements attempted during an insert
/// before the table reports that it needs to grow.
const MAX_RETRIES: usize = 4;

static mut RAND: u8 = 4;
static mut RANDOM_PERMUTATION_RAND: [u8; 256] = [0; 256];
static mut RANDOM_PERMUTATION_HASH: [u8; 256] = [0; 256];
static INIT: Once = Once::new();

/// Initialise the displacement randomness and the random hash permutation
/// from the thread rng. Called automatically when the first tree is
/// created.
pub fn init() {
    init_with(&mut thread_rng());
}

/// Initialise the displacement randomness and the random hash permutation
/// from a fixed seed, for reproducible runs. Must be called before any
/// table is used; later calls are no-ops.
pub fn init_seeded(seed: u64) {
    init_with(&mut StdRng::seed_from_u64(seed));
}

pub(crate) fn init_with<R: Rng>(rng: &mut R) {
    INIT.call_once(|| {
        let mut bytes: [u8; 256] = [0; 256];
        for i in 0..256 {
            bytes[i] = i as u8;
        }

        // The random hash must disagree with the bit-reversal hash on the
        // bucket index for every key at the largest table size, otherwise
        // displacement between the two could fail to make progress.
        'shuffle: loop {
            bytes.shuffle(rng);
            for i in 0..256 {
                let ideal = (i as u8).reverse_bits() as usize;
                if (ideal ^ bytes[i] as usize) & (MAX_BUCKET_COUNT - 1) == 0 {
                    continue 'shuffle;
                }
            }
            break;
        }
        unsafe {
            RANDOM_PERMUTATION_HASH = bytes;
        }

        bytes.shuffle(rng);
        unsafe {
            RANDOM_PERMUTATION_RAND = bytes;
        }
    });
}

/// Types stored in a byte table. `zeroed` is the absent marker;
/// `key` must return `None` exactly for it.
pub trait ByteEntry {
    fn zeroed() -> Self;
    fn key(&self) -> Option<u8>;
}

/// The 8-bit bit-reversal permutation. At the largest table size this
/// places keys in an almost linear order over the buckets.
#[inline]
fn ideal_hash(byte_key: u8) -> usize {
    byte_key.reverse_bits() as usize
}

/// A random bijective byte -> byte mapping via lookup table.
#[inline]
fn rand_hash(byte_key: u8) -> usize {
    unsafe { RANDOM_PERMUTATION_HASH[byte_key as usize] as usize }
}

/// Cut off the upper bits of the hash so that it indexes a bucket.
#[inline]
fn compress_hash(bucket_count: usize, hash: usize) -> usize {
    hash & (bucket_count - 1)
}

/// The hash currently placing the key, as recorded by the owning node.
#[inline]
fn placement_hash(rand_hash_used: &ByteBitset, byte_key: u8) -> usize {
    if rand_hash_used.is_set(byte_key) {
        rand_hash(byte_key)
    } else {
        ideal_hash(byte_key)
    }
}

/// A cache-line-sized row of four slots sharing colliding hash values.
#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct ByteBucket<T: ByteEntry + Clone> {
    slots: [T; BUCKET_SLOT_COUNT],
}

impl<T: ByteEntry + Clone> ByteBucket<T> {
    fn new() -> Self {
        ByteBucket {
            slots: std::array::from_fn(|_| T::zeroed()),
        }
    }

    fn find_key(&self, byte_key: u8) -> Option<&T> {
        self.slots.iter().find(|slot| slot.key() == Some(byte_key))
    }

    fn find_key_mut(&mut self, byte_key: u8) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .find(|slot| slot.key() == Some(byte_key))
    }

    /// Move the entry into this bucket, in order of preference replacing a
    /// slot with the same key, an unoccupied slot, or an occupied slot
    /// whose placement hash no longer selects this bucket (left behind by
    /// a growth duplication). Hands the entry back if all slots are
    /// occupied and current.
    fn put(
        &mut self,
        rand_hash_used: &ByteBitset,
        bucket_count: usize,
        bucket_index: usize,
        entry: T,
    ) -> Option<T> {
        let byte_key = entry.key().unwrap();
        if let Some(slot) = self.find_key_mut(byte_key) {
            *slot = entry;
            return None;
        }
        for slot in &mut self.slots {
            if slot.key().is_none() {
                *slot = entry;
                return None;
            }
        }
        for slot in &mut self.slots {
            let key = slot.key().unwrap();
            if bucket_index != compress_hash(bucket_count, placement_hash(rand_hash_used, key)) {
                *slot = entry;
                return None;
            }
        }
        Some(entry)
    }

    /// Displace a pseudorandomly chosen slot, returning the evicted entry.
    fn shove_randomly(&mut self, entry: T) -> T {
        let index = unsafe { RAND as usize } & (BUCKET_SLOT_COUNT - 1);
        std::mem::replace(&mut self.slots[index], entry)
    }

    /// Displace the first slot placed by the random hash, returning the
    /// evicted entry. Used at the maximum table size, where evicting only
    /// random-hashed slots bounds the displacement chain.
    fn shove_rand_hashed(&mut self, rand_hash_used: &ByteBitset, entry: T) -> Option<T> {
        for slot in &mut self.slots {
            if let Some(key) = slot.key() {
                if rand_hash_used.is_set(key) {
                    return Some(std::mem::replace(slot, entry));
                }
            }
        }
        None
    }
}

/// Operations shared by all table sizes, so that node bodies can be
/// generic over the table they embed.
pub trait ByteTable<T: ByteEntry + Clone>: Clone {
    /// The table of the next size up; the largest size grows into itself
    /// (and never needs to).
    type Grown: ByteTable<T>;

    const BUCKET_COUNT: usize;

    fn new() -> Self;

    /// Fetch the entry stored under the byte key, probing the single
    /// bucket selected by the key's recorded placement hash.
    fn get(&self, rand_hash_used: &ByteBitset, byte_key: u8) -> Option<&T>;

    fn get_mut(&mut self, rand_hash_used: &ByteBitset, byte_key: u8) -> Option<&mut T>;

    /// Insert the entry, displacing colliding entries between their two
    /// buckets as needed. Returns the zeroed entry on success, or a
    /// displaced entry if the table needs to grow to make room.
    fn put(&mut self, rand_hash_used: &mut ByteBitset, entry: T) -> T;

    /// Duplicate the bucket array into a table of twice the size.
    fn grow(&self) -> Self::Grown;
}

macro_rules! create_bytetable {
    ($name:ident, $bucket_count:expr, $grown:ident) => {
        #[derive(Clone, Debug)]
        #[repr(transparent)]
        pub struct $name<T: ByteEntry + Clone> {
            buckets: [ByteBucket<T>; $bucket_count],
        }

        impl<T: ByteEntry + Clone> ByteTable<T> for $name<T> {
            type Grown = $grown<T>;

            const BUCKET_COUNT: usize = $bucket_count;

            fn new() -> Self {
                Self {
                    buckets: std::array::from_fn(|_| ByteBucket::new()),
                }
            }

            fn get(&self, rand_hash_used: &ByteBitset, byte_key: u8) -> Option<&T> {
                self.buckets[compress_hash($bucket_count, placement_hash(rand_hash_used, byte_key))]
                    .find_key(byte_key)
            }

            fn get_mut(&mut self, rand_hash_used: &ByteBitset, byte_key: u8) -> Option<&mut T> {
                self.buckets[compress_hash($bucket_count, placement_hash(rand_hash_used, byte_key))]
                    .find_key_mut(byte_key)
            }

            fn put(&mut self, rand_hash_used: &mut ByteBitset, entry: T) -> T {
                let Some(mut byte_key) = entry.key() else {
                    return T::zeroed();
                };

                let current_index =
                    compress_hash($bucket_count, placement_hash(rand_hash_used, byte_key));
                if let Some(existing) = self.buckets[current_index].find_key_mut(byte_key) {
                    *existing = entry;
                    return T::zeroed();
                }

                // Fresh and reinserted entries always start out on the
                // bit-reversal hash.
                rand_hash_used.unset(byte_key);

                let max_grown = $bucket_count == MAX_BUCKET_COUNT;
                let min_grown = $bucket_count == 1;

                let mut current_entry = entry;
                let mut retries: usize = 0;
                loop {
                    unsafe {
                        RAND = RANDOM_PERMUTATION_RAND[(RAND ^ byte_key) as usize];
                    }

                    let bucket_index =
                        compress_hash($bucket_count, placement_hash(rand_hash_used, byte_key));

                    current_entry = match self.buckets[bucket_index].put(
                        rand_hash_used,
                        $bucket_count,
                        bucket_index,
                        current_entry,
                    ) {
                        None => return T::zeroed(),
                        Some(entry) => entry,
                    };

                    if min_grown || retries == MAX_RETRIES {
                        return current_entry;
                    }

                    if max_grown {
                        current_entry = match self.buckets[bucket_index]
                            .shove_rand_hashed(rand_hash_used, current_entry.clone())
                        {
                            Some(displaced) => displaced,
                            None => return current_entry,
                        };
                        byte_key = current_entry.key().unwrap();
                        rand_hash_used.unset(byte_key);
                    } else {
                        retries += 1;
                        current_entry = self.buckets[bucket_index].shove_randomly(current_entry);
                        byte_key = current_entry.key().unwrap();
                        rand_hash_used.set_value(byte_key, !rand_hash_used.is_set(byte_key));
                    }
                }
            }

            fn grow(&self) -> Self::Grown {
                $grown {
                    buckets: std::array::from_fn(|index| {
                        self.buckets[index % $bucket_count].clone()
                    }),
                }
            }
        }
    };
}

create_bytetable!(ByteTable4, 1, ByteTable8);
create_bytetable!(ByteTable8, 2, ByteTable16);
create_bytetable!(ByteTable16, 4, ByteTable32);
create_bytetable!(ByteTable32, 8, ByteTable64);
create_bytetable!(ByteTable64, 16, ByteTable128);
create_bytetable!(ByteTable128, 32, ByteTable256);
create_bytetable!(ByteTable256, 64, ByteTable256);
