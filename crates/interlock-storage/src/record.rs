//! Fixed-width record codec.
//!
//! Every key and value a B+ tree stores has a constant on-disk size, so
//! node and value files can be addressed by plain offsets. Records encode
//! little-endian through `bytes::{Buf, BufMut}`.

use bytes::{Buf, BufMut};
use interlock_common::{Date, DateTime, FixedStr, Time};
use std::fmt;

/// A value with a fixed little-endian disk encoding.
pub trait Record: Clone {
    /// Encoded size in bytes. Constant per type, never per value.
    const SIZE: usize;

    fn encode(&self, buf: &mut impl BufMut);
    fn decode(buf: &mut impl Buf) -> Self;
}

/// Marker for types usable as B+ tree keys.
pub trait Key: Record + Copy + Ord + fmt::Debug {}

impl<T: Record + Copy + Ord + fmt::Debug> Key for T {}

/// Opaque value-file offset returned by `insert`.
///
/// Valid for the lifetime of its key; `erase` frees the slot and the
/// free list may re-hand it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(pub i32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A key together with its value handle, as yielded by scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<K> {
    pub key: K,
    pub handle: Handle,
}

impl Record for Handle {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.0);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Handle(buf.get_i32_le())
    }
}

macro_rules! int_record {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl Record for $ty {
            const SIZE: usize = $size;

            fn encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut impl Buf) -> Self {
                buf.$get()
            }
        }
    };
}

int_record!(u8, 1, put_u8, get_u8);
int_record!(i32, 4, put_i32_le, get_i32_le);
int_record!(u32, 4, put_u32_le, get_u32_le);
int_record!(i64, 8, put_i64_le, get_i64_le);
int_record!(u64, 8, put_u64_le, get_u64_le);

impl Record for bool {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self as u8);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        buf.get_u8() != 0
    }
}

impl<A: Record, B: Record> Record for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, buf: &mut impl BufMut) {
        self.0.encode(buf);
        self.1.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let a = A::decode(buf);
        let b = B::decode(buf);
        (a, b)
    }
}

impl<const N: usize> Record for FixedStr<N> {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let mut bytes = [0u8; N];
        buf.copy_to_slice(&mut bytes);
        FixedStr::from_bytes(bytes)
    }
}

impl Record for Date {
    const SIZE: usize = 2;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.month as u8);
        buf.put_u8(self.day as u8);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let month = buf.get_u8() as i32;
        let day = buf.get_u8() as i32;
        Date::new(month, day)
    }
}

impl Record for DateTime {
    const SIZE: usize = Date::SIZE + 4;

    fn encode(&self, buf: &mut impl BufMut) {
        self.date.encode(buf);
        buf.put_i32_le(self.time.minutes);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let date = Date::decode(buf);
        let minutes = buf.get_i32_le();
        DateTime {
            date,
            time: Time::new(minutes),
        }
    }
}
