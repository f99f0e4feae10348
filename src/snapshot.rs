//! Persistence hooks for table contents.
//!
//! A snapshot is written through any [`bytes::BufMut`] and restored from any
//! [`bytes::Buf`]; the table itself decides what to write (see
//! `SparseMap::snapshot`). Entries opt in by implementing [`Persist`].
//! All integers are little-endian.

use crate::error::{Result, SparseTableError};
use bytes::{Buf, BufMut};

/// An entry type that can be written to and read back from a snapshot.
pub trait Persist: Sized {
    fn persist<B: BufMut>(&self, buf: &mut B);
    fn restore<B: Buf>(buf: &mut B) -> Result<Self>;
}

#[inline]
fn ensure(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(SparseTableError::DeserializationMismatch(format!(
            "snapshot truncated: needed {} more bytes, {} left",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

#[inline]
pub(crate) fn read_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

#[inline]
pub(crate) fn read_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

#[inline]
pub(crate) fn read_u64<B: Buf>(buf: &mut B) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

#[inline]
pub(crate) fn read_f32<B: Buf>(buf: &mut B) -> Result<f32> {
    Ok(f32::from_bits(read_u32(buf)?))
}

pub(crate) fn expect_tag<B: Buf>(buf: &mut B, tag: u8, what: &str) -> Result<()> {
    let found = read_u8(buf)?;
    if found != tag {
        return Err(SparseTableError::DeserializationMismatch(format!(
            "expected {} (tag {}), found tag {}",
            what, tag, found
        )));
    }
    Ok(())
}

macro_rules! persist_int {
    ($($ty:ty => $put:ident / $get:ident / $width:expr,)+) => {
        $(
            impl Persist for $ty {
                #[inline]
                fn persist<B: BufMut>(&self, buf: &mut B) {
                    buf.$put(*self);
                }
                #[inline]
                fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
                    ensure(buf, $width)?;
                    Ok(buf.$get())
                }
            }
        )+
    };
}

persist_int! {
    u8 => put_u8 / get_u8 / 1,
    u16 => put_u16_le / get_u16_le / 2,
    u32 => put_u32_le / get_u32_le / 4,
    u64 => put_u64_le / get_u64_le / 8,
    i8 => put_i8 / get_i8 / 1,
    i16 => put_i16_le / get_i16_le / 2,
    i32 => put_i32_le / get_i32_le / 4,
    i64 => put_i64_le / get_i64_le / 8,
}

impl Persist for usize {
    #[inline]
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(*self as u64);
    }
    #[inline]
    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(read_u64(buf)? as usize)
    }
}

impl Persist for String {
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.len() as u64);
        buf.put_slice(self.as_bytes());
    }

    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        let bytes = Vec::<u8>::restore(buf)?;
        String::from_utf8(bytes).map_err(|err| {
            SparseTableError::DeserializationMismatch(format!("string entry not utf-8: {}", err))
        })
    }
}

impl Persist for Vec<u8> {
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.len() as u64);
        buf.put_slice(self);
    }

    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        let len = read_u64(buf)? as usize;
        ensure(buf, len)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(bytes)
    }
}

// Map entries are (key, value) pairs.
impl<A: Persist, B: Persist> Persist for (A, B) {
    fn persist<W: BufMut>(&self, buf: &mut W) {
        self.0.persist(buf);
        self.1.persist(buf);
    }

    fn restore<R: Buf>(buf: &mut R) -> Result<Self> {
        let a = A::restore(buf)?;
        let b = B::restore(buf)?;
        Ok((a, b))
    }
}
