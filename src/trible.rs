//! The 64-byte entity/attribute/value tuple indexed by [`TribleSet`]
//! (crate::tribleset::TribleSet), and the byte orders and segmentations
//! of its six permutation indices.

use arbitrary::Arbitrary;

use crate::trie::KeySegmentation;

/// The length of a trible in bytes.
pub const TRIBLE_LEN: usize = 64;

/// The start index of the entity in a trible.
pub const E_START: usize = 0;
/// The end index of the entity in a trible (inclusive).
pub const E_END: usize = 15;

/// The start index of the attribute in a trible.
pub const A_START: usize = 16;
/// The end index of the attribute in a trible (inclusive).
pub const A_END: usize = 31;

/// The start index of the value in a trible.
pub const V_START: usize = 32;
/// The end index of the value in a trible (inclusive).
pub const V_END: usize = 63;

/// A triple of entity, attribute and value, stored as 16 + 16 + 32
/// concatenated bytes.
#[derive(Arbitrary, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct Trible {
    pub data: [u8; TRIBLE_LEN],
}

impl Trible {
    pub fn new(e: &[u8; 16], a: &[u8; 16], v: &[u8; 32]) -> Trible {
        let mut data = [0; TRIBLE_LEN];
        data[E_START..=E_END].copy_from_slice(e);
        data[A_START..=A_END].copy_from_slice(a);
        data[V_START..=V_END].copy_from_slice(v);
        Self { data }
    }

    pub fn e(&self) -> &[u8] {
        &self.data[E_START..=E_END]
    }

    pub fn a(&self) -> &[u8] {
        &self.data[A_START..=A_END]
    }

    pub fn v(&self) -> &[u8] {
        &self.data[V_START..=V_END]
    }

    pub fn order_eav(&self) -> [u8; TRIBLE_LEN] {
        self.data
    }

    pub fn order_eva(&self) -> [u8; TRIBLE_LEN] {
        let mut data = [0; TRIBLE_LEN];
        data[0..16].copy_from_slice(&self.data[E_START..=E_END]);
        data[16..48].copy_from_slice(&self.data[V_START..=V_END]);
        data[48..64].copy_from_slice(&self.data[A_START..=A_END]);
        data
    }

    pub fn order_aev(&self) -> [u8; TRIBLE_LEN] {
        let mut data = [0; TRIBLE_LEN];
        data[0..16].copy_from_slice(&self.data[A_START..=A_END]);
        data[16..32].copy_from_slice(&self.data[E_START..=E_END]);
        data[32..64].copy_from_slice(&self.data[V_START..=V_END]);
        data
    }

    pub fn order_ave(&self) -> [u8; TRIBLE_LEN] {
        let mut data = [0; TRIBLE_LEN];
        data[0..16].copy_from_slice(&self.data[A_START..=A_END]);
        data[16..48].copy_from_slice(&self.data[V_START..=V_END]);
        data[48..64].copy_from_slice(&self.data[E_START..=E_END]);
        data
    }

    pub fn order_vea(&self) -> [u8; TRIBLE_LEN] {
        let mut data = [0; TRIBLE_LEN];
        data[0..32].copy_from_slice(&self.data[V_START..=V_END]);
        data[32..48].copy_from_slice(&self.data[E_START..=E_END]);
        data[48..64].copy_from_slice(&self.data[A_START..=A_END]);
        data
    }

    pub fn order_vae(&self) -> [u8; TRIBLE_LEN] {
        let mut data = [0; TRIBLE_LEN];
        data[0..32].copy_from_slice(&self.data[V_START..=V_END]);
        data[32..48].copy_from_slice(&self.data[A_START..=A_END]);
        data[48..64].copy_from_slice(&self.data[E_START..=E_END]);
        data
    }
}

macro_rules! key_segmentation {
    ($name:ident, $key_len:expr, [$($size:expr),+]) => {
        #[derive(Copy, Clone, Debug)]
        pub struct $name {}

        impl KeySegmentation<$key_len> for $name {
            const PADDED_LEN: usize = {
                let sizes = [$($size),+];
                let mut widest = 0;
                let mut i = 0;
                while i < sizes.len() {
                    if sizes[i] > widest {
                        widest = sizes[i];
                    }
                    i += 1;
                }
                widest * sizes.len()
            };

            fn segment(depth: usize) -> usize {
                let sizes = [$($size),+];
                let mut segment = 0;
                let mut boundary = 0;
                while segment < sizes.len() {
                    boundary += sizes[segment];
                    if depth < boundary {
                        return segment;
                    }
                    segment += 1;
                }
                sizes.len() - 1
            }

            fn padding(padded_depth: usize) -> bool {
                let sizes = [$($size),+];
                let widest = Self::PADDED_LEN / sizes.len();
                let segment = padded_depth / widest;
                let offset = padded_depth % widest;
                offset < widest - sizes[segment]
            }
        }
    };
}

key_segmentation!(EAVSegmentation, TRIBLE_LEN, [16, 16, 32]);
key_segmentation!(EVASegmentation, TRIBLE_LEN, [16, 32, 16]);
key_segmentation!(AEVSegmentation, TRIBLE_LEN, [16, 16, 32]);
key_segmentation!(AVESegmentation, TRIBLE_LEN, [16, 32, 16]);
key_segmentation!(VEASegmentation, TRIBLE_LEN, [32, 16, 16]);
key_segmentation!(VAESegmentation, TRIBLE_LEN, [32, 16, 16]);

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> Trible {
        let mut data = [0u8; TRIBLE_LEN];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }
        Trible { data }
    }

    #[rustfmt::skip]
    #[test]
    fn order_eav() {
        assert_eq!(canonical().order_eav(), canonical().data);
    }

    #[rustfmt::skip]
    #[test]
    fn order_aev() {
        let reordered = [
            16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
             0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
            48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
        ];
        assert_eq!(canonical().order_aev(), reordered);
    }

    #[rustfmt::skip]
    #[test]
    fn order_ave() {
        let reordered = [
            16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
            48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
             0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
        ];
        assert_eq!(canonical().order_ave(), reordered);
    }

    #[rustfmt::skip]
    #[test]
    fn order_eva() {
        let reordered = [
             0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
            48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
            16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
        ];
        assert_eq!(canonical().order_eva(), reordered);
    }

    #[rustfmt::skip]
    #[test]
    fn order_vea() {
        let reordered = [
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
            48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
             0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
            16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
        ];
        assert_eq!(canonical().order_vea(), reordered);
    }

    #[rustfmt::skip]
    #[test]
    fn order_vae() {
        let reordered = [
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
            48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63,
            16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
             0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
        ];
        assert_eq!(canonical().order_vae(), reordered);
    }

    #[test]
    fn segmentation_boundaries() {
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(0), 0);
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(15), 0);
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(16), 1);
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(31), 1);
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(32), 2);
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::segment(63), 2);

        assert_eq!(<VEASegmentation as KeySegmentation<64>>::segment(31), 0);
        assert_eq!(<VEASegmentation as KeySegmentation<64>>::segment(32), 1);
        assert_eq!(<VEASegmentation as KeySegmentation<64>>::segment(48), 2);
    }

    #[test]
    fn padding_pads_narrow_segments() {
        // All segments are padded to 32 bytes, so a 16 byte segment is
        // padding over its first 16 padded depths.
        assert_eq!(<EAVSegmentation as KeySegmentation<64>>::PADDED_LEN, 96);
        for depth in 0..16 {
            assert!(<EAVSegmentation as KeySegmentation<64>>::padding(depth));
        }
        for depth in 16..32 {
            assert!(!<EAVSegmentation as KeySegmentation<64>>::padding(depth));
        }
        for depth in 64..96 {
            assert!(!<EAVSegmentation as KeySegmentation<64>>::padding(depth));
        }

        assert_eq!(<VEASegmentation as KeySegmentation<64>>::PADDED_LEN, 96);
        for depth in 0..32 {
            assert!(!<VEASegmentation as KeySegmentation<64>>::padding(depth));
        }
        for depth in 32..48 {
            assert!(<VEASegmentation as KeySegmentation<64>>::padding(depth));
        }
    }
}
