//! Byte-order reversal for fixed-width integers.
//!
//! Everything in a table is little-endian except the memo file's leading
//! next-free-block index, which is stored big-endian.

/// In-place byte swap.
pub trait FlipEndian {
    fn flip_endian(&mut self);
}

macro_rules! impl_flip_endian {
    ($($t:ty),*) => {
        $(
            impl FlipEndian for $t {
                fn flip_endian(&mut self) {
                    *self = self.swap_bytes();
                }
            }
        )*
    };
}

impl_flip_endian!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Reverse the byte order of `value` in place.
pub fn flip_endian<T: FlipEndian>(value: &mut T) {
    value.flip_endian();
}
