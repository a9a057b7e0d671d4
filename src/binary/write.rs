#![deny(missing_docs)]

//! Immediate binary writing.
//!
//! Values are written straight to a [`WriteContext`]. Structures that contain offsets to
//! objects written later go through [`LinkedWriter`](crate::binary::linked::LinkedWriter)
//! instead, which also implements `WriteContext`.

use std::marker::PhantomData;

use crate::binary::read::ReadUnchecked;
use crate::binary::{I16Be, I32Be, I8, U16Be, U24Be, U32Be, U8};
use crate::error::WriteError;

/// A growable in-memory output.
pub struct WriteBuffer {
    data: Vec<u8>,
}

/// Writes into a fixed region of a `WriteBuffer` when a placeholder is filled.
struct WriteSlice<'a> {
    offset: usize,
    data: &'a mut [u8],
}

/// Counts bytes without storing them. Useful to size a structure before writing it.
pub struct WriteCounter {
    count: usize,
}

/// Space reserved for a value of type `T` that is written once it is known.
///
/// In a `WriteBuffer` `offset` is the byte position of the reserved space. In a `LinkedWriter`
/// it identifies the reserved piece, as byte positions are only known after layout.
pub struct Placeholder<T, HostType>
where
    T: WriteBinary<HostType>,
{
    pub(crate) offset: usize,
    pub(crate) length: usize,
    marker: PhantomData<T>,
    host: PhantomData<HostType>,
}

impl<T, HostType> Placeholder<T, HostType>
where
    T: WriteBinary<HostType>,
{
    pub(crate) fn new(offset: usize, length: usize) -> Self {
        Placeholder {
            offset,
            length,
            marker: PhantomData,
            host: PhantomData,
        }
    }

    /// Number of bytes reserved.
    pub fn len(&self) -> usize {
        self.length
    }
}

/// A type with a binary representation that `HostType` values can be written as.
pub trait WriteBinary<HostType = Self> {
    /// Returned by `write`, usually `()`.
    type Output;

    /// Write `val` to `ctxt`.
    fn write<C: WriteContext>(ctxt: &mut C, val: HostType) -> Result<Self::Output, WriteError>;
}

/// Like [`WriteBinary`] but the encoding depends on `Args`.
pub trait WriteBinaryDep<HostType = Self> {
    /// Extra information needed to write the value.
    type Args;
    /// Returned by `write_dep`, usually `()`.
    type Output;

    /// Write `val` to `ctxt` using `args`.
    fn write_dep<C: WriteContext>(
        ctxt: &mut C,
        val: HostType,
        args: Self::Args,
    ) -> Result<Self::Output, WriteError>;
}

/// A destination for binary output.
pub trait WriteContext {
    /// Write each value produced by `iter` as a `T`.
    fn write_iter<T, HostType>(
        &mut self,
        iter: impl Iterator<Item = HostType>,
    ) -> Result<(), WriteError>
    where
        Self: Sized,
        T: WriteBinary<HostType>,
    {
        iter.map(|val| T::write(self, val).map(|_| ())).collect()
    }

    /// Append raw bytes.
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), WriteError>;

    /// Append `count` zero bytes.
    fn write_zeros(&mut self, count: usize) -> Result<(), WriteError>;

    /// Number of bytes written so far.
    fn bytes_written(&self) -> usize;

    /// Reserve space for a fixed size `T` to be filled in with `write_placeholder`.
    fn placeholder<'a, T, HostType>(&mut self) -> Result<Placeholder<T, HostType>, WriteError>
    where
        T: WriteBinary<HostType> + ReadUnchecked,
    {
        let offset = self.bytes_written();
        self.write_zeros(T::SIZE)?;
        Ok(Placeholder::new(offset, T::SIZE))
    }

    /// Fill in a placeholder. The value must occupy exactly the reserved space.
    fn write_placeholder<T, HostType>(
        &mut self,
        placeholder: Placeholder<T, HostType>,
        val: HostType,
    ) -> Result<T::Output, WriteError>
    where
        T: WriteBinary<HostType>;
}

impl<T, HostType> WriteBinaryDep<HostType> for T
where
    T: WriteBinary<HostType>,
{
    type Args = ();
    type Output = T::Output;

    fn write_dep<C: WriteContext>(
        ctxt: &mut C,
        val: HostType,
        (): Self::Args,
    ) -> Result<Self::Output, WriteError> {
        T::write(ctxt, val)
    }
}

macro_rules! write_be {
    ($marker:ty, $host:ty) => {
        impl<T> WriteBinary<T> for $marker
        where
            T: Into<$host>,
        {
            type Output = ();

            fn write<C: WriteContext>(ctxt: &mut C, t: T) -> Result<(), WriteError> {
                let val: $host = t.into();
                ctxt.write_bytes(&val.to_be_bytes())
            }
        }
    };
}

write_be!(U8, u8);
write_be!(I8, i8);
write_be!(I16Be, i16);
write_be!(U16Be, u16);
write_be!(I32Be, i32);
write_be!(U32Be, u32);

impl<T> WriteBinary<T> for U24Be
where
    T: Into<u32>,
{
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, t: T) -> Result<(), WriteError> {
        let val: u32 = t.into();
        if val > 0xFF_FFFF {
            return Err(WriteError::BadValue);
        }
        ctxt.write_bytes(&val.to_be_bytes()[1..])
    }
}

impl WriteContext for WriteBuffer {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn write_zeros(&mut self, count: usize) -> Result<(), WriteError> {
        self.data.resize(self.data.len() + count, 0);
        Ok(())
    }

    fn bytes_written(&self) -> usize {
        self.data.len()
    }

    fn write_placeholder<T, HostType>(
        &mut self,
        placeholder: Placeholder<T, HostType>,
        val: HostType,
    ) -> Result<T::Output, WriteError>
    where
        T: WriteBinary<HostType>,
    {
        let end = placeholder.offset + placeholder.length;
        let data = self
            .data
            .get_mut(placeholder.offset..end)
            .ok_or(WriteError::PlaceholderMismatch)?;
        let mut slice = WriteSlice { offset: 0, data };
        let output = T::write(&mut slice, val)?;
        if slice.offset != placeholder.length {
            return Err(WriteError::PlaceholderMismatch);
        }
        Ok(output)
    }
}

impl<'a> WriteContext for WriteSlice<'a> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), WriteError> {
        let end = self.offset + data.len();
        let dest = self
            .data
            .get_mut(self.offset..end)
            .ok_or(WriteError::PlaceholderMismatch)?;
        dest.copy_from_slice(data);
        self.offset = end;
        Ok(())
    }

    fn write_zeros(&mut self, count: usize) -> Result<(), WriteError> {
        self.write_bytes(&vec![0; count])
    }

    fn bytes_written(&self) -> usize {
        self.offset
    }

    fn write_placeholder<T, HostType>(
        &mut self,
        _placeholder: Placeholder<T, HostType>,
        _val: HostType,
    ) -> Result<T::Output, WriteError>
    where
        T: WriteBinary<HostType>,
    {
        Err(WriteError::NotImplemented)
    }
}

impl WriteContext for WriteCounter {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.count += data.len();
        Ok(())
    }

    fn write_zeros(&mut self, count: usize) -> Result<(), WriteError> {
        self.count += count;
        Ok(())
    }

    fn bytes_written(&self) -> usize {
        self.count
    }

    /// The space was already counted, so the value is written to a counter that is thrown away.
    fn write_placeholder<T, HostType>(
        &mut self,
        _placeholder: Placeholder<T, HostType>,
        val: HostType,
    ) -> Result<T::Output, WriteError>
    where
        T: WriteBinary<HostType>,
    {
        T::write(&mut WriteCounter::new(), val)
    }
}

impl WriteBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        WriteBuffer { data: Vec::new() }
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Consume the buffer, returning its bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        WriteBuffer::new()
    }
}

impl WriteCounter {
    /// A counter at zero.
    pub fn new() -> Self {
        WriteCounter { count: 0 }
    }
}

impl Default for WriteCounter {
    fn default() -> Self {
        WriteCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::coverage::Coverage;
    use crate::tag;

    #[test]
    fn test_integers_are_big_endian() {
        let mut ctxt = WriteBuffer::new();
        U32Be::write(&mut ctxt, tag::KERN).unwrap();
        I16Be::write(&mut ctxt, -2i16).unwrap();
        U24Be::write(&mut ctxt, 0x10203u32).unwrap();
        assert_eq!(ctxt.bytes(), b"kern\xFF\xFE\x01\x02\x03");
        assert_eq!(
            U24Be::write(&mut ctxt, 0x100_0000u32),
            Err(WriteError::BadValue)
        );
    }

    #[test]
    fn test_write_placeholder() {
        let mut ctxt = WriteBuffer::new();
        U8::write(&mut ctxt, 1u8).unwrap();
        let placeholder = ctxt.placeholder::<U16Be, u16>().unwrap();
        assert_eq!(placeholder.len(), 2);
        U8::write(&mut ctxt, 3u8).unwrap();
        ctxt.write_placeholder(placeholder, 2u16).unwrap();
        assert_eq!(ctxt.bytes(), &[1, 0, 2, 3]);
    }

    #[test]
    fn test_placeholder_size_mismatch() {
        let mut ctxt = WriteBuffer::new();
        let placeholder = ctxt.placeholder::<U16Be, u16>().unwrap();
        let wide = Placeholder::<U32Be, u32>::new(placeholder.offset, placeholder.len());
        assert_eq!(
            ctxt.write_placeholder(wide, 7u32),
            Err(WriteError::PlaceholderMismatch)
        );
    }

    #[test]
    fn test_counter_matches_buffer() {
        let coverage = (10u16..20).collect::<Coverage>();
        let mut counter = WriteCounter::new();
        let mut buffer = WriteBuffer::new();
        Coverage::write(&mut counter, &coverage).unwrap();
        Coverage::write(&mut buffer, &coverage).unwrap();
        assert_eq!(counter.bytes_written(), buffer.len());

        let placeholder = counter.placeholder::<U32Be, u32>().unwrap();
        counter.write_placeholder(placeholder, 1u32).unwrap();
        assert_eq!(counter.bytes_written(), buffer.len() + 4);
    }
}
