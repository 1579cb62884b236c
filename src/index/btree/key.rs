use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width index key. `Ord` supplies the comparator; the codec maps
/// a key to exactly `ENCODED_LEN` bytes inside a tree page.
pub trait IndexKey: Copy + Ord + Debug + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! int_index_key {
    ($ty:ty, $len:expr, $write:ident, $read:ident) => {
        impl IndexKey for $ty {
            const ENCODED_LEN: usize = $len;

            fn encode(&self, buf: &mut [u8]) {
                LittleEndian::$write(&mut buf[..$len], *self);
            }

            fn decode(buf: &[u8]) -> Self {
                LittleEndian::$read(&buf[..$len])
            }
        }
    };
}

int_index_key!(u32, 4, write_u32, read_u32);
int_index_key!(u64, 8, write_u64, read_u64);
int_index_key!(i32, 4, write_i32, read_i32);
int_index_key!(i64, 8, write_i64, read_i64);

/// A fixed-width byte-string key, for indexing short strings of up to N
/// bytes (zero-padded). Compares lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedKey<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedKey<N> {
    /// Build a key from the first N bytes of `bytes`, zero-padded.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; N];
        let len = bytes.len().min(N);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }
}

impl<const N: usize> IndexKey for FixedKey<N> {
    const ENCODED_LEN: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut key = [0u8; N];
        key.copy_from_slice(&buf[..N]);
        Self(key)
    }
}
