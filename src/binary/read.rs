//! Reading binary data.
//!
//! Parsing is built from small composable readers. A `ReadScope` is a window onto the input
//! that remembers where it sits in the buffer it was cut from; a `ReadCtxt` is a cursor over a
//! scope. Types implement `ReadBinary` (or `ReadBinaryDep` when they need context such as a
//! glyph count) to describe how they are read. The validating counterparts live in
//! [`crate::validate`].

use crate::binary::{I16Be, I32Be, I8, U16Be, U24Be, U32Be, U8};
use crate::error::ParseError;
use crate::size;
use crate::validate::{Logger, ReadBinaryDepValidated};
use bitreader::BitReader;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// A read ran past the end of its scope.
#[derive(Debug, Copy, Clone)]
pub struct ReadEof {}

/// A window onto the input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReadScope<'a> {
    base: usize,
    data: &'a [u8],
    origin: &'a [u8],
}

/// A cursor over a `ReadScope`.
#[derive(Clone)]
pub struct ReadCtxt<'a> {
    scope: ReadScope<'a>,
    offset: usize,
}

/// Sub-byte fields read most significant bit first.
pub struct BitFields<'a> {
    reader: BitReader<'a>,
}

/// A type that can be read without any outside context.
pub trait ReadBinary {
    type HostType<'a>: Sized;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self::HostType<'a>, ParseError>;
}

/// A type whose reading depends on `Args`, such as a count or format read earlier.
pub trait ReadBinaryDep {
    type Args<'a>: Copy;
    type HostType<'a>: Sized;

    fn read_dep<'a>(
        ctxt: &mut ReadCtxt<'a>,
        args: Self::Args<'a>,
    ) -> Result<Self::HostType<'a>, ParseError>;
}

/// A `ReadBinaryDep` type whose encoded size is known from its arguments alone.
pub trait ReadFixedSizeDep: ReadBinaryDep {
    fn size(args: Self::Args<'_>) -> usize;
}

/// A fixed size type that can always be read once `SIZE` bytes are known to be available.
pub trait ReadUnchecked {
    type HostType: Sized;

    const SIZE: usize;

    /// Read exactly `SIZE` bytes.
    ///
    /// # Safety
    ///
    /// The caller must ensure `SIZE` bytes remain in `ctxt`.
    unsafe fn read_unchecked<'a>(ctxt: &mut ReadCtxt<'a>) -> Self::HostType;
}

/// A record read as `ReadType` (usually a tuple of fields) then converted.
pub trait ReadFrom {
    type ReadType: ReadUnchecked;
    fn read_from(value: <Self::ReadType as ReadUnchecked>::HostType) -> Self;
}

impl<T> ReadUnchecked for T
where
    T: ReadFrom,
{
    type HostType = T;

    const SIZE: usize = T::ReadType::SIZE;

    unsafe fn read_unchecked<'a>(ctxt: &mut ReadCtxt<'a>) -> Self::HostType {
        T::read_from(T::ReadType::read_unchecked(ctxt))
    }
}

impl<T> ReadBinary for T
where
    T: ReadUnchecked,
{
    type HostType<'a> = T::HostType;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self::HostType<'a>, ParseError> {
        Ok(ctxt.read_checked::<T>()?)
    }
}

impl<T> ReadBinaryDep for T
where
    T: ReadBinary,
{
    type Args<'a> = ();
    type HostType<'a> = T::HostType<'a>;

    fn read_dep<'a>(
        ctxt: &mut ReadCtxt<'a>,
        (): Self::Args<'_>,
    ) -> Result<Self::HostType<'a>, ParseError> {
        T::read(ctxt)
    }
}

impl<T> ReadFixedSizeDep for T
where
    T: ReadUnchecked,
{
    fn size((): ()) -> usize {
        T::SIZE
    }
}

/// `length` items of `T` laid out back to back, read on demand.
#[derive(Clone)]
pub struct ReadArray<'a, T: ReadFixedSizeDep> {
    scope: ReadScope<'a>,
    length: usize,
    stride: usize,
    args: T::Args<'a>,
}

pub struct ReadArrayIter<'a, T: ReadUnchecked> {
    scope: ReadScope<'a>,
    index: usize,
    length: usize,
    stride: usize,
    phantom: PhantomData<T>,
}

pub struct ReadArrayDepIter<'a, 'b, T: ReadFixedSizeDep> {
    array: &'b ReadArray<'a, T>,
    index: usize,
}

impl<'a> ReadScope<'a> {
    pub fn new(data: &'a [u8]) -> ReadScope<'a> {
        ReadScope {
            base: 0,
            data,
            origin: data,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Absolute position of the start of this scope within the buffer it was cut from.
    pub fn base(&self) -> usize {
        self.base
    }

    /// A scope starting `offset` bytes past the start of this scope.
    ///
    /// An offset past the end gives an empty scope.
    pub fn offset(&self, offset: usize) -> ReadScope<'a> {
        self.sub_scope(offset, self.data.get(offset..).unwrap_or(&[]))
    }

    /// A scope of `length` bytes starting `offset` bytes past the start of this scope.
    ///
    /// A zero length scope is allowed anywhere. Otherwise `offset` must be within this scope
    /// (`BadOffset`) and `length` bytes must follow it (`BadEof`).
    pub fn offset_length(&self, offset: usize, length: usize) -> Result<ReadScope<'a>, ParseError> {
        if length == 0 {
            return Ok(self.sub_scope(offset, &[]));
        }
        let rest = self.data.get(offset..).filter(|rest| !rest.is_empty());
        let data = rest.ok_or(ParseError::BadOffset)?;
        let data = data.get(..length).ok_or(ParseError::BadEof)?;
        Ok(self.sub_scope(offset, data))
    }

    fn sub_scope(&self, offset: usize, data: &'a [u8]) -> ReadScope<'a> {
        ReadScope {
            base: self.base + offset,
            data,
            origin: self.origin,
        }
    }

    /// A scope starting `offset` bytes past the start of the original buffer.
    ///
    /// Unlike `offset` this ignores where the current scope begins, which suits formats whose
    /// offsets are measured from the start of the whole table rather than the enclosing record.
    pub fn offset_from_origin(&self, offset: usize) -> ReadScope<'a> {
        ReadScope {
            base: offset,
            data: self.origin.get(offset..).unwrap_or(&[]),
            origin: self.origin,
        }
    }

    pub fn offset_from_origin_length(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<ReadScope<'a>, ParseError> {
        ReadScope::new(self.origin)
            .offset_length(offset, length)
            .map(|scope| ReadScope {
                origin: self.origin,
                ..scope
            })
    }

    pub fn ctxt(&self) -> ReadCtxt<'a> {
        ReadCtxt::new(*self)
    }

    pub fn read<T: ReadBinaryDep<Args<'a> = ()>>(&self) -> Result<T::HostType<'a>, ParseError> {
        self.ctxt().read::<T>()
    }

    pub fn read_dep<T: ReadBinaryDep>(
        &self,
        args: T::Args<'a>,
    ) -> Result<T::HostType<'a>, ParseError> {
        self.ctxt().read_dep::<T>(args)
    }

    /// Read `T` from the start of this scope, reporting problems to `logger`.
    pub fn read_validated<T>(&self, logger: &Logger) -> Option<T::HostType<'a>>
    where
        T: ReadBinaryDepValidated<Args<'a> = ()>,
    {
        self.ctxt().read_validated::<T>(logger)
    }

    pub fn read_dep_validated<T: ReadBinaryDepValidated>(
        &self,
        args: T::Args<'a>,
        logger: &Logger,
    ) -> Option<T::HostType<'a>> {
        self.ctxt().read_dep_validated::<T>(args, logger)
    }
}

impl<'a> ReadCtxt<'a> {
    fn new(scope: ReadScope<'a>) -> ReadCtxt<'a> {
        ReadCtxt { scope, offset: 0 }
    }

    /// `Err(ParseError::BadValue)` unless `cond` holds.
    pub fn check(&self, cond: bool) -> Result<(), ParseError> {
        require(cond, ParseError::BadValue)
    }

    /// `Err(ParseError::BadIndex)` unless `cond` holds.
    ///
    /// ```
    /// use otcodec::binary::read::ReadScope;
    /// use otcodec::error::ParseError;
    ///
    /// let mut ctxt = ReadScope::new(&[0, 3]).ctxt();
    /// let count = ctxt.read_u16be().unwrap();
    /// assert!(ctxt.check_index(2 < count).is_ok());
    /// assert_eq!(ctxt.check_index(5 < count), Err(ParseError::BadIndex));
    /// ```
    pub fn check_index(&self, cond: bool) -> Result<(), ParseError> {
        require(cond, ParseError::BadIndex)
    }

    /// `Err(ParseError::BadVersion)` unless `cond` holds. Used for format and version fields.
    pub fn check_version(&self, cond: bool) -> Result<(), ParseError> {
        require(cond, ParseError::BadVersion)
    }

    /// The scope starting at the current cursor position.
    pub fn scope(&self) -> ReadScope<'a> {
        self.scope.offset(self.offset)
    }

    /// Absolute position of the cursor within the original buffer.
    pub fn position(&self) -> usize {
        self.scope.base + self.offset
    }

    /// Position of the cursor relative to the start of this context's scope.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.scope.data.len().saturating_sub(self.offset)
    }

    pub fn read<T: ReadBinaryDep<Args<'a> = ()>>(&mut self) -> Result<T::HostType<'a>, ParseError> {
        T::read_dep(self, ())
    }

    pub fn read_dep<T: ReadBinaryDep>(
        &mut self,
        args: T::Args<'a>,
    ) -> Result<T::HostType<'a>, ParseError> {
        T::read_dep(self, args)
    }

    pub fn read_validated<T>(&mut self, logger: &Logger) -> Option<T::HostType<'a>>
    where
        T: ReadBinaryDepValidated<Args<'a> = ()>,
    {
        T::read_dep_validated(self, (), logger)
    }

    pub fn read_dep_validated<T: ReadBinaryDepValidated>(
        &mut self,
        args: T::Args<'a>,
        logger: &Logger,
    ) -> Option<T::HostType<'a>> {
        T::read_dep_validated(self, args, logger)
    }

    /// Read `T` without advancing the cursor.
    pub fn peek<T: ReadBinaryDep<Args<'a> = ()>>(&self) -> Result<T::HostType<'a>, ParseError> {
        self.clone().read::<T>()
    }

    pub fn peek_u8(&self) -> Result<u8, ReadEof> {
        self.clone().read_u8()
    }

    pub fn peek_u16be(&self) -> Result<u16, ReadEof> {
        self.clone().read_u16be()
    }

    pub fn bytes_available(&self) -> bool {
        self.offset < self.scope.data.len()
    }

    fn check_avail(&self, length: usize) -> Result<(), ReadEof> {
        if length <= self.remaining() {
            Ok(())
        } else {
            Err(ReadEof {})
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadEof> {
        self.read_checked::<U8>()
    }

    pub fn read_i8(&mut self) -> Result<i8, ReadEof> {
        self.read_checked::<I8>()
    }

    pub fn read_u16be(&mut self) -> Result<u16, ReadEof> {
        self.read_checked::<U16Be>()
    }

    pub fn read_i16be(&mut self) -> Result<i16, ReadEof> {
        self.read_checked::<I16Be>()
    }

    pub fn read_u24be(&mut self) -> Result<u32, ReadEof> {
        self.read_checked::<U24Be>()
    }

    pub fn read_u32be(&mut self) -> Result<u32, ReadEof> {
        self.read_checked::<U32Be>()
    }

    pub fn read_i32be(&mut self) -> Result<i32, ReadEof> {
        self.read_checked::<I32Be>()
    }

    fn read_checked<T: ReadUnchecked>(&mut self) -> Result<T::HostType, ReadEof> {
        self.check_avail(T::SIZE)?;
        // SAFETY: `T::SIZE` bytes are available.
        Ok(unsafe { T::read_unchecked(self) })
    }

    /// Take the next `N` bytes without checking that they are there.
    unsafe fn take_unchecked<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0; N];
        bytes.copy_from_slice(self.scope.data.get_unchecked(self.offset..self.offset + N));
        self.offset += N;
        bytes
    }

    /// Read `length` bytes that hold packed sub-byte fields.
    ///
    /// ```
    /// use otcodec::binary::read::ReadScope;
    ///
    /// // push:1 noAdvance:1 offset:14
    /// let mut ctxt = ReadScope::new(&[0xC0, 0x04]).ctxt();
    /// let mut bits = ctxt.read_bit_fields(2).unwrap();
    /// assert_eq!(bits.take(1).unwrap(), 1);
    /// assert_eq!(bits.take(1).unwrap(), 1);
    /// assert_eq!(bits.take(14).unwrap(), 4);
    /// ```
    pub fn read_bit_fields(&mut self, length: usize) -> Result<BitFields<'a>, ReadEof> {
        let data = self.read_slice(length)?;
        Ok(BitFields {
            reader: BitReader::new(data),
        })
    }

    pub fn read_array<T: ReadUnchecked>(
        &mut self,
        length: usize,
    ) -> Result<ReadArray<'a, T>, ParseError> {
        let byte_len = length.checked_mul(T::SIZE).ok_or(ParseError::LimitExceeded)?;
        let scope = self.read_scope(byte_len)?;
        let args = ();
        Ok(ReadArray {
            scope,
            length,
            stride: T::SIZE,
            args,
        })
    }

    /// Read bytes up to and including the first one that holds `nibble` in either half.
    pub fn read_until_nibble(&mut self, nibble: u8) -> Result<&'a [u8], ReadEof> {
        let holds_nibble = |b: &u8| b >> 4 == nibble || b & 0xF == nibble;
        let rest = self.scope.data.get(self.offset..).unwrap_or(&[]);
        match rest.iter().position(holds_nibble) {
            Some(last) => self.read_slice(last + 1),
            None => Err(ReadEof {}),
        }
    }

    pub fn read_array_dep<T: ReadFixedSizeDep>(
        &mut self,
        length: usize,
        args: T::Args<'a>,
    ) -> Result<ReadArray<'a, T>, ParseError> {
        let stride = T::size(args);
        let byte_len = length.checked_mul(stride).ok_or(ParseError::LimitExceeded)?;
        let scope = self.read_scope(byte_len)?;
        Ok(ReadArray {
            scope,
            length,
            stride,
            args,
        })
    }

    /// Take the next `length` bytes as a scope.
    pub fn read_scope(&mut self, length: usize) -> Result<ReadScope<'a>, ReadEof> {
        let scope = self
            .scope
            .offset_length(self.offset, length)
            .map_err(|_| ReadEof {})?;
        self.offset += length;
        Ok(scope)
    }

    pub fn read_slice(&mut self, length: usize) -> Result<&'a [u8], ReadEof> {
        self.read_scope(length).map(|scope| scope.data)
    }
}

fn require(cond: bool, error: ParseError) -> Result<(), ParseError> {
    if cond {
        Ok(())
    } else {
        Err(error)
    }
}

impl<'a> BitFields<'a> {
    /// Take the next `count` bits (at most 32) as an unsigned value.
    pub fn take(&mut self, count: u8) -> Result<u32, ParseError> {
        self.reader
            .read_u32(count)
            .map_err(|_| ParseError::BadEof)
    }

    /// Take the next `count` bits as a two's complement signed value.
    pub fn take_signed(&mut self, count: u8) -> Result<i32, ParseError> {
        self.reader
            .read_i32(count)
            .map_err(|_| ParseError::BadEof)
    }

    pub fn take_flag(&mut self) -> Result<bool, ParseError> {
        self.reader.read_bool().map_err(|_| ParseError::BadEof)
    }
}

impl<'a, T: ReadFixedSizeDep> ReadArray<'a, T> {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read item `index`, `BadIndex` if it is out of range.
    pub fn read_item(&self, index: usize) -> Result<T::HostType<'a>, ParseError> {
        if index >= self.length {
            return Err(ParseError::BadIndex);
        }
        self.scope
            .offset_length(index * self.stride, self.stride)?
            .read_dep::<T>(self.args)
    }

    pub fn get_item(&self, index: usize) -> Option<<T as ReadUnchecked>::HostType>
    where
        T: ReadUnchecked,
    {
        if index >= self.length {
            return None;
        }
        self.scope
            .offset(index * self.stride)
            .ctxt()
            .read_checked::<T>()
            .ok()
    }

    pub fn last(&self) -> Option<<T as ReadUnchecked>::HostType>
    where
        T: ReadUnchecked,
    {
        self.get_item(self.length.checked_sub(1)?)
    }

    pub fn to_vec(&self) -> Vec<<T as ReadUnchecked>::HostType>
    where
        T: ReadUnchecked,
    {
        self.iter().collect()
    }

    /// Read every item, stopping at the first that fails.
    pub fn read_to_vec(&self) -> Result<Vec<T::HostType<'a>>, ParseError> {
        self.iter_res().collect()
    }

    pub fn iter(&self) -> ReadArrayIter<'a, T>
    where
        T: ReadUnchecked,
    {
        ReadArrayIter {
            scope: self.scope,
            index: 0,
            length: self.length,
            stride: self.stride,
            phantom: PhantomData,
        }
    }

    /// Iterate over items that need `Args` to read, each as a `Result`.
    pub fn iter_res<'b>(&'b self) -> ReadArrayDepIter<'a, 'b, T> {
        ReadArrayDepIter {
            array: self,
            index: 0,
        }
    }

    /// Binary search of an array sorted by `f`, with the same result as
    /// `slice::binary_search_by`.
    pub fn binary_search_by<F>(&self, mut f: F) -> Result<usize, usize>
    where
        F: FnMut(<T as ReadUnchecked>::HostType) -> Ordering,
        T: ReadUnchecked,
    {
        let (mut low, mut high) = (0, self.length);
        while low < high {
            let mid = low + (high - low) / 2;
            // NOTE(unwrap): `mid` is below `self.length` so the item is in bounds
            match f(self.get_item(mid).unwrap()) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(low)
    }
}

impl<'a, 'b, T: ReadUnchecked> IntoIterator for &'b ReadArray<'a, T> {
    type Item = T::HostType;
    type IntoIter = ReadArrayIter<'a, T>;

    fn into_iter(self) -> ReadArrayIter<'a, T> {
        self.iter()
    }
}

impl<'a, T: ReadUnchecked> Iterator for ReadArrayIter<'a, T> {
    type Item = T::HostType;

    fn next(&mut self) -> Option<T::HostType> {
        if self.index >= self.length {
            return None;
        }
        let mut ctxt = self.scope.offset(self.index * self.stride).ctxt();
        self.index += 1;
        ctxt.read_checked::<T>().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.length - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a, T: ReadUnchecked> ExactSizeIterator for ReadArrayIter<'a, T> {}

impl<'a, 'b, T: ReadFixedSizeDep> Iterator for ReadArrayDepIter<'a, 'b, T> {
    type Item = Result<T::HostType<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;
        (index < self.array.len()).then(|| {
            self.index += 1;
            self.array.read_item(index)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.array.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

macro_rules! read_unchecked_be {
    ($marker:ty, $host:ty) => {
        impl ReadUnchecked for $marker {
            type HostType = $host;

            const SIZE: usize = std::mem::size_of::<$host>();

            unsafe fn read_unchecked<'a>(ctxt: &mut ReadCtxt<'a>) -> $host {
                <$host>::from_be_bytes(ctxt.take_unchecked())
            }
        }
    };
}

read_unchecked_be!(U8, u8);
read_unchecked_be!(I8, i8);
read_unchecked_be!(U16Be, u16);
read_unchecked_be!(I16Be, i16);
read_unchecked_be!(U32Be, u32);
read_unchecked_be!(I32Be, i32);

impl ReadUnchecked for U24Be {
    type HostType = u32;

    const SIZE: usize = size::U24;

    unsafe fn read_unchecked<'a>(ctxt: &mut ReadCtxt<'a>) -> u32 {
        let [b0, b1, b2] = ctxt.take_unchecked();
        u32::from_be_bytes([0, b0, b1, b2])
    }
}

macro_rules! read_unchecked_tuple {
    ($($field:ident),+) => {
        impl<$($field: ReadUnchecked),+> ReadUnchecked for ($($field,)+) {
            type HostType = ($($field::HostType,)+);

            const SIZE: usize = 0 $(+ $field::SIZE)+;

            unsafe fn read_unchecked<'a>(ctxt: &mut ReadCtxt<'a>) -> Self::HostType {
                // Tuple fields are evaluated left to right
                ($($field::read_unchecked(ctxt),)+)
            }
        }
    };
}

read_unchecked_tuple!(A, B);
read_unchecked_tuple!(A, B, C);

impl<'a, T> fmt::Debug for ReadArray<'a, T>
where
    T: ReadFixedSizeDep,
    T::HostType<'a>: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter_res().map_while(Result::ok))
            .finish()
    }
}
