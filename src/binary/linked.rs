#![deny(missing_docs)]

//! Binary writing with offsets that are resolved after all data has been added.
//!
//! Font tables are full of offsets that point forward to data that has not been written yet.
//! `LinkedWriter` collects the output as a list of pieces. Positions are marked with
//! [`Stake`]s, and offsets between two stakes are recorded as links. Nothing is laid out until
//! [`LinkedWriter::into_bytes`] is called, at which point every link is resolved and patched.
//!
//! Links with a variable width encoding (the CFF DICT operand encoding for instance) start out
//! zero-length and the layout is recomputed until no piece moves.
//!
//! ```
//! use otcodec::binary::linked::LinkedWriter;
//! use otcodec::binary::write::{WriteBinary, WriteContext};
//! use otcodec::binary::U16Be;
//!
//! # fn main() -> Result<(), otcodec::error::WriteError> {
//! let mut w = LinkedWriter::new();
//! let start = w.stake_current();
//! let data = w.new_stake();
//! w.add_offset16(start, data)?;
//! U16Be::write(&mut w, 0xFFFFu16)?;
//! w.stake_current_with_value(data)?;
//! w.write_bytes(b"Hi")?;
//! assert_eq!(w.into_bytes()?, [0, 4, 0xFF, 0xFF, b'H', b'i']);
//! # Ok(())
//! # }
//! ```

use byteorder::{BigEndian, ByteOrder};
use num_traits as num;

use crate::binary::read::ReadUnchecked;
use crate::binary::write::{Placeholder, WriteBinary, WriteBuffer, WriteContext};
use crate::error::WriteError;

/// Upper bound on the number of layout passes made while resolving variable width offsets.
pub const MAX_LAYOUT_PASSES: usize = 64;

/// An opaque marker for a position in the output of a `LinkedWriter`.
///
/// A stake is created unbound by [`LinkedWriter::new_stake`] and bound to the current position
/// by [`LinkedWriter::stake_current_with_value`], or created already bound with
/// [`LinkedWriter::stake_current`]. Stakes are only meaningful to the writer that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stake(u32);

/// How a resolved offset is stored in the output.
#[derive(Copy, Clone, Debug)]
pub enum OffsetEncoding {
    /// Unsigned 8-bit
    U8,
    /// Unsigned 16-bit big-endian
    U16,
    /// Unsigned 24-bit big-endian
    U24,
    /// Unsigned 32-bit big-endian
    U32,
    /// Signed 16-bit big-endian
    I16,
    /// Signed 32-bit big-endian
    I32,
    /// A field of the given number of bits (at most 32), packed with neighbouring bit fields.
    Bits(u8),
    /// A variable length encoding. The function is called with the resolved value and must
    /// return its encoded bytes.
    Variable(fn(i64) -> Result<Vec<u8>, WriteError>),
}

/// Adjustments applied when resolving a single offset.
///
/// The stored value is `(target - base + delta) / divisor`.
#[derive(Copy, Clone, Debug)]
pub struct LinkOptions {
    /// Bytes added to the distance between the stakes.
    pub delta: i64,
    /// The distance is divided by this, for offsets counted in words or longs. It must divide
    /// the distance exactly.
    pub divisor: u32,
    /// Permit a negative value for this offset.
    pub negative_ok: bool,
}

/// Writer-wide settings.
#[derive(Copy, Clone, Debug, Default)]
pub struct WriterOptions {
    /// Permit negative values for every offset, not just those that opt in.
    pub allow_negative_offsets: bool,
}

enum Piece {
    Bytes(Vec<u8>),
    Bits { value: u32, count: u8 },
    Link(usize),
    Deferred { length: usize, data: Option<Vec<u8>> },
    Align(usize),
}

struct Link {
    base: Stake,
    target: Stake,
    encoding: OffsetEncoding,
    options: LinkOptions,
}

/// A `WriteContext` that supports stakes, unresolved offsets and deferred values.
pub struct LinkedWriter {
    pieces: Vec<Piece>,
    links: Vec<Link>,
    /// Index of the piece each stake is bound in front of.
    stakes: Vec<Option<usize>>,
    options: WriterOptions,
    /// Whether more bytes may be appended to the last piece without moving a stake.
    open_bytes: bool,
    estimated_bits: usize,
}

struct BitSink {
    data: Vec<u8>,
    acc: u8,
    n_bits: u8,
}

impl Stake {
    /// A number identifying this stake within its writer.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            delta: 0,
            divisor: 1,
            negative_ok: false,
        }
    }
}

impl LinkOptions {
    /// Options that add `delta` bytes to the resolved distance.
    pub fn with_delta(delta: i64) -> Self {
        LinkOptions {
            delta,
            ..LinkOptions::default()
        }
    }

    /// Options for an offset counted in units of `divisor` bytes.
    pub fn with_divisor(divisor: u32) -> Self {
        LinkOptions {
            divisor,
            ..LinkOptions::default()
        }
    }

    /// Permit a negative value for this offset.
    pub fn negative_ok(self) -> Self {
        LinkOptions {
            negative_ok: true,
            ..self
        }
    }
}

impl OffsetEncoding {
    fn fixed_width_bits(self) -> Option<usize> {
        match self {
            OffsetEncoding::U8 => Some(8),
            OffsetEncoding::U16 | OffsetEncoding::I16 => Some(16),
            OffsetEncoding::U24 => Some(24),
            OffsetEncoding::U32 | OffsetEncoding::I32 => Some(32),
            OffsetEncoding::Bits(count) => Some(usize::from(count)),
            OffsetEncoding::Variable(_) => None,
        }
    }

    fn is_signed(self) -> bool {
        matches!(self, OffsetEncoding::I16 | OffsetEncoding::I32)
    }
}

impl LinkedWriter {
    /// Create an empty writer with default options.
    pub fn new() -> Self {
        LinkedWriter::with_options(WriterOptions::default())
    }

    /// Create an empty writer.
    pub fn with_options(options: WriterOptions) -> Self {
        LinkedWriter {
            pieces: Vec::new(),
            links: Vec::new(),
            stakes: Vec::new(),
            options,
            open_bytes: false,
            estimated_bits: 0,
        }
    }

    /// Create a new stake that is not yet bound to a position.
    pub fn new_stake(&mut self) -> Stake {
        let stake = Stake(self.stakes.len() as u32);
        self.stakes.push(None);
        stake
    }

    /// Create a new stake bound to the current position.
    pub fn stake_current(&mut self) -> Stake {
        let stake = self.new_stake();
        self.stakes[stake.0 as usize] = Some(self.pieces.len());
        self.open_bytes = false;
        stake
    }

    /// Bind a stake previously created with `new_stake` to the current position.
    pub fn stake_current_with_value(&mut self, stake: Stake) -> Result<(), WriteError> {
        match self.stakes.get_mut(stake.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(self.pieces.len());
                self.open_bytes = false;
                Ok(())
            }
            Some(Some(_)) => Err(WriteError::DuplicateStake(stake)),
            None => Err(WriteError::UnboundStake(stake)),
        }
    }

    /// Returns `true` if `stake` has been bound to a position.
    pub fn is_bound(&self, stake: Stake) -> bool {
        matches!(self.stakes.get(stake.0 as usize), Some(Some(_)))
    }

    /// Append the low `count` bits of `value`, most significant bit first.
    pub fn add_bits(&mut self, value: u32, count: u8) -> Result<(), WriteError> {
        if count == 0 || count > 32 || (count < 32 && value >> count != 0) {
            return Err(WriteError::BadValue);
        }
        self.push_piece(Piece::Bits { value, count });
        self.estimated_bits += usize::from(count);
        Ok(())
    }

    /// Pad with zero bytes until the position is a multiple of `multiple` bytes.
    ///
    /// The padding is computed when the layout is resolved, so it remains correct when variable
    /// width offsets earlier in the output change size.
    pub fn align(&mut self, multiple: usize) -> Result<(), WriteError> {
        if multiple == 0 {
            return Err(WriteError::BadValue);
        }
        self.push_piece(Piece::Align(multiple));
        self.estimated_bits += align_padding(self.estimated_bits, multiple);
        Ok(())
    }

    /// Add an offset from `base` to `target`, stored with `encoding`.
    ///
    /// Either stake may be bound before or after this call, but both must be bound by the time
    /// `into_bytes` is called.
    pub fn add_offset(
        &mut self,
        base: Stake,
        target: Stake,
        encoding: OffsetEncoding,
        options: LinkOptions,
    ) -> Result<(), WriteError> {
        for stake in [base, target] {
            if stake.0 as usize >= self.stakes.len() {
                return Err(WriteError::UnboundStake(stake));
            }
        }
        if options.divisor == 0 {
            return Err(WriteError::BadValue);
        }
        if let OffsetEncoding::Bits(count) = encoding {
            if count == 0 || count > 32 {
                return Err(WriteError::BadValue);
            }
        }
        let index = self.links.len();
        self.links.push(Link {
            base,
            target,
            encoding,
            options,
        });
        self.push_piece(Piece::Link(index));
        self.estimated_bits += encoding.fixed_width_bits().unwrap_or(0);
        Ok(())
    }

    /// Add an unsigned 16-bit offset from `base` to `target`.
    pub fn add_offset16(&mut self, base: Stake, target: Stake) -> Result<(), WriteError> {
        self.add_offset(base, target, OffsetEncoding::U16, LinkOptions::default())
    }

    /// Add an unsigned 32-bit offset from `base` to `target`.
    pub fn add_offset32(&mut self, base: Stake, target: Stake) -> Result<(), WriteError> {
        self.add_offset(base, target, OffsetEncoding::U32, LinkOptions::default())
    }

    /// Reserve space for a `T` to be filled in later with `write_placeholder`.
    pub fn add_deferred<T, HostType>(&mut self) -> Result<Placeholder<T, HostType>, WriteError>
    where
        T: WriteBinary<HostType> + ReadUnchecked,
    {
        self.placeholder::<T, HostType>()
    }

    /// Resolve every offset and return the final bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>, WriteError> {
        for link in &self.links {
            self.stake_piece(link.base)?;
            self.stake_piece(link.target)?;
        }
        if self
            .pieces
            .iter()
            .any(|piece| matches!(piece, Piece::Deferred { data: None, .. }))
        {
            return Err(WriteError::DeferredValueUnset);
        }

        let widths = self.resolve_widths()?;
        let starts = self.layout(&widths)?;
        let mut sink = BitSink::new();
        for (index, piece) in self.pieces.iter().enumerate() {
            match piece {
                Piece::Bytes(bytes) => sink.push_bytes(bytes),
                Piece::Bits { value, count } => sink.push_bits(*value, *count),
                Piece::Link(link_index) => {
                    let link = &self.links[*link_index];
                    let value = self.link_value(link, &starts)?;
                    self.check_sign(link, value)?;
                    match link.encoding {
                        OffsetEncoding::Bits(count) => {
                            sink.push_bits(encode_bits(value, count)?, count)
                        }
                        OffsetEncoding::Variable(encode) => {
                            let bytes = encode(value)?;
                            if bytes.len() * 8 != widths[*link_index] {
                                return Err(WriteError::ResizeLoop);
                            }
                            sink.push_bytes(&bytes)
                        }
                        encoding => sink.push_bytes(&encode_fixed(encoding, value)?),
                    }
                }
                Piece::Deferred { data, .. } => {
                    sink.push_bytes(data.as_deref().ok_or(WriteError::DeferredValueUnset)?)
                }
                Piece::Align(_) => {
                    let padding = starts[index + 1] - starts[index];
                    sink.push_bytes(&vec![0; padding / 8]);
                }
            }
        }

        sink.finish()
    }

    fn push_piece(&mut self, piece: Piece) {
        self.pieces.push(piece);
        self.open_bytes = false;
    }

    fn push_bytes(&mut self, data: &[u8]) {
        if self.open_bytes {
            if let Some(Piece::Bytes(bytes)) = self.pieces.last_mut() {
                bytes.extend_from_slice(data);
                self.estimated_bits += data.len() * 8;
                return;
            }
        }
        self.pieces.push(Piece::Bytes(data.to_vec()));
        self.open_bytes = true;
        self.estimated_bits += data.len() * 8;
    }

    fn stake_piece(&self, stake: Stake) -> Result<usize, WriteError> {
        match self.stakes.get(stake.0 as usize) {
            Some(Some(piece)) => Ok(*piece),
            _ => Err(WriteError::UnboundStake(stake)),
        }
    }

    /// Compute the bit position of the start of every piece, plus the end position.
    fn layout(&self, widths: &[usize]) -> Result<Vec<usize>, WriteError> {
        let mut starts = Vec::with_capacity(self.pieces.len() + 1);
        let mut position = 0;
        for piece in &self.pieces {
            starts.push(position);
            position += match piece {
                Piece::Bytes(bytes) => bytes.len() * 8,
                Piece::Bits { count, .. } => usize::from(*count),
                Piece::Link(index) => widths[*index],
                Piece::Deferred { length, .. } => length * 8,
                Piece::Align(multiple) => {
                    if position % 8 != 0 {
                        return Err(WriteError::Misaligned);
                    }
                    align_padding(position, *multiple)
                }
            };
        }
        starts.push(position);
        Ok(starts)
    }

    /// Settle the width of every variable width link.
    fn resolve_widths(&self) -> Result<Vec<usize>, WriteError> {
        let mut widths = self
            .links
            .iter()
            .map(|link| link.encoding.fixed_width_bits().unwrap_or(0))
            .collect::<Vec<_>>();
        let variable = self
            .links
            .iter()
            .enumerate()
            .filter_map(|(index, link)| match link.encoding {
                OffsetEncoding::Variable(encode) => Some((index, encode)),
                _ => None,
            })
            .collect::<Vec<_>>();
        if variable.is_empty() {
            return Ok(widths);
        }

        let mut seen = Vec::new();
        for pass in 0..MAX_LAYOUT_PASSES {
            let starts = self.layout(&widths)?;
            let mut changed = false;
            for &(index, encode) in &variable {
                let value = self.link_value(&self.links[index], &starts)?;
                let width = encode(value)?.len() * 8;
                if widths[index] != width {
                    widths[index] = width;
                    changed = true;
                }
            }
            if !changed {
                log::trace!("variable width offsets settled after {} passes", pass + 1);
                return Ok(widths);
            }
            if seen.contains(&starts) {
                return Err(WriteError::ResizeLoop);
            }
            seen.push(starts);
        }

        Err(WriteError::ResizeLoop)
    }

    fn link_value(&self, link: &Link, starts: &[usize]) -> Result<i64, WriteError> {
        let base = starts[self.stake_piece(link.base)?];
        let target = starts[self.stake_piece(link.target)?];
        if base % 8 != 0 || target % 8 != 0 {
            return Err(WriteError::Misaligned);
        }
        let distance = (target / 8) as i64 - (base / 8) as i64 + link.options.delta;
        let divisor = i64::from(link.options.divisor);
        if distance % divisor != 0 {
            return Err(WriteError::Misaligned);
        }
        Ok(distance / divisor)
    }

    fn check_sign(&self, link: &Link, value: i64) -> Result<(), WriteError> {
        if value < 0
            && !(link.options.negative_ok
                || self.options.allow_negative_offsets
                || link.encoding.is_signed())
        {
            Err(WriteError::NegativeOffset)
        } else {
            Ok(())
        }
    }
}

impl Default for LinkedWriter {
    fn default() -> Self {
        LinkedWriter::new()
    }
}

impl WriteContext for LinkedWriter {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.push_bytes(data);
        Ok(())
    }

    fn write_zeros(&mut self, count: usize) -> Result<(), WriteError> {
        self.push_bytes(&vec![0; count]);
        Ok(())
    }

    /// An estimate of the bytes written so far.
    ///
    /// Variable width offsets are not counted since their size is unknown until the layout is
    /// resolved. Use stakes rather than this value for anything that ends up in the output.
    fn bytes_written(&self) -> usize {
        self.estimated_bits / 8
    }

    fn placeholder<'a, T, HostType>(&mut self) -> Result<Placeholder<T, HostType>, WriteError>
    where
        T: WriteBinary<HostType> + ReadUnchecked,
    {
        Ok(self.push_deferred(T::SIZE))
    }

    fn write_placeholder<T, HostType>(
        &mut self,
        placeholder: Placeholder<T, HostType>,
        val: HostType,
    ) -> Result<T::Output, WriteError>
    where
        T: WriteBinary<HostType>,
    {
        let mut buffer = WriteBuffer::new();
        let output = T::write(&mut buffer, val)?;
        match self.pieces.get_mut(placeholder.offset) {
            Some(Piece::Deferred { length, data: data @ None })
                if *length == placeholder.length && buffer.len() == *length =>
            {
                *data = Some(buffer.into_inner());
                Ok(output)
            }
            _ => Err(WriteError::PlaceholderMismatch),
        }
    }
}

impl LinkedWriter {
    fn push_deferred<T, HostType>(&mut self, length: usize) -> Placeholder<T, HostType>
    where
        T: WriteBinary<HostType>,
    {
        let index = self.pieces.len();
        self.push_piece(Piece::Deferred { length, data: None });
        self.estimated_bits += length * 8;
        Placeholder::new(index, length)
    }
}

fn align_padding(position_bits: usize, multiple: usize) -> usize {
    let unit = multiple * 8;
    (unit - position_bits % unit) % unit
}

fn encode_fixed(encoding: OffsetEncoding, value: i64) -> Result<Vec<u8>, WriteError> {
    let overflow = || WriteError::OffsetOverflow;
    let mut buf = [0u8; 4];
    let len = match encoding {
        OffsetEncoding::U8 => {
            buf[0] = num::cast::<i64, u8>(value)
                .or_else(|| num::cast::<i64, i8>(value).map(|v| v as u8))
                .ok_or_else(overflow)?;
            1
        }
        OffsetEncoding::U16 => {
            let v = num::cast::<i64, u16>(value)
                .or_else(|| num::cast::<i64, i16>(value).map(|v| v as u16))
                .ok_or_else(overflow)?;
            BigEndian::write_u16(&mut buf, v);
            2
        }
        OffsetEncoding::U24 => {
            if !(-0x80_0000..=0xFF_FFFF).contains(&value) {
                return Err(overflow());
            }
            BigEndian::write_u24(&mut buf, (value as u32) & 0xFF_FFFF);
            3
        }
        OffsetEncoding::U32 => {
            let v = num::cast::<i64, u32>(value)
                .or_else(|| num::cast::<i64, i32>(value).map(|v| v as u32))
                .ok_or_else(overflow)?;
            BigEndian::write_u32(&mut buf, v);
            4
        }
        OffsetEncoding::I16 => {
            BigEndian::write_i16(&mut buf, num::cast(value).ok_or_else(overflow)?);
            2
        }
        OffsetEncoding::I32 => {
            BigEndian::write_i32(&mut buf, num::cast(value).ok_or_else(overflow)?);
            4
        }
        OffsetEncoding::Bits(_) | OffsetEncoding::Variable(_) => return Err(WriteError::BadValue),
    };
    Ok(buf[..len].to_vec())
}

fn encode_bits(value: i64, count: u8) -> Result<u32, WriteError> {
    let limit = 1i64 << count;
    if (0..limit).contains(&value) {
        Ok(value as u32)
    } else if value < 0 && value >= -(limit / 2) {
        Ok((value & (limit - 1)) as u32)
    } else {
        Err(WriteError::OffsetOverflow)
    }
}

impl BitSink {
    fn new() -> Self {
        BitSink {
            data: Vec::new(),
            acc: 0,
            n_bits: 0,
        }
    }

    fn push_bits(&mut self, value: u32, count: u8) {
        for shift in (0..count).rev() {
            let bit = ((value >> shift) & 1) as u8;
            self.acc = (self.acc << 1) | bit;
            self.n_bits += 1;
            if self.n_bits == 8 {
                self.data.push(self.acc);
                self.acc = 0;
                self.n_bits = 0;
            }
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        if self.n_bits == 0 {
            self.data.extend_from_slice(bytes);
        } else {
            for &byte in bytes {
                self.push_bits(u32::from(byte), 8);
            }
        }
    }

    fn finish(self) -> Result<Vec<u8>, WriteError> {
        if self.n_bits != 0 {
            return Err(WriteError::Misaligned);
        }
        Ok(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{I16Be, U16Be, U8};
    use crate::tests::to_hex;

    #[test]
    fn test_offsets_with_delta() {
        let mut w = LinkedWriter::new();
        I16Be::write(&mut w, -1i16).unwrap();
        let s1 = w.stake_current();
        let s2 = w.new_stake();
        w.add_offset16(s1, s2).unwrap();
        I16Be::write(&mut w, -2i16).unwrap();
        w.add_offset(s1, s2, OffsetEncoding::U16, LinkOptions::with_delta(10))
            .unwrap();
        I16Be::write(&mut w, -3i16).unwrap();
        w.stake_current_with_value(s2).unwrap();
        w.write_bytes(b"Hi there").unwrap();

        assert_eq!(
            to_hex(&w.into_bytes().unwrap()),
            "FFFF 0008 FFFE 0012 FFFD 4869 2074 6865 7265"
        );
    }

    #[test]
    fn test_bit_field_offset() {
        let mut w = LinkedWriter::new();
        I16Be::write(&mut w, -1i16).unwrap();
        let s1 = w.stake_current();
        let s2 = w.new_stake();
        w.add_bits(0b11, 2).unwrap();
        w.add_offset(s1, s2, OffsetEncoding::Bits(14), LinkOptions::default())
            .unwrap();
        I16Be::write(&mut w, -2i16).unwrap();
        w.stake_current_with_value(s2).unwrap();
        I16Be::write(&mut w, -3i16).unwrap();

        assert_eq!(to_hex(&w.into_bytes().unwrap()), "FFFF C004 FFFE FFFD");
    }

    #[test]
    fn test_unbound_stake() {
        let mut w = LinkedWriter::new();
        let s1 = w.stake_current();
        let s2 = w.new_stake();
        w.add_offset16(s1, s2).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::UnboundStake(s2)));
    }

    #[test]
    fn test_duplicate_stake() {
        let mut w = LinkedWriter::new();
        let s1 = w.stake_current();
        assert_eq!(
            w.stake_current_with_value(s1),
            Err(WriteError::DuplicateStake(s1))
        );
    }

    #[test]
    fn test_negative_offset() {
        let mut w = LinkedWriter::new();
        let target = w.stake_current();
        U16Be::write(&mut w, 0u16).unwrap();
        let base = w.stake_current();
        w.add_offset16(base, target).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::NegativeOffset));

        let mut w = LinkedWriter::new();
        let target = w.stake_current();
        U16Be::write(&mut w, 0u16).unwrap();
        let base = w.stake_current();
        w.add_offset(
            base,
            target,
            OffsetEncoding::U16,
            LinkOptions::default().negative_ok(),
        )
        .unwrap();
        assert_eq!(w.into_bytes().unwrap(), [0, 0, 0xFF, 0xFE]);
    }

    #[test]
    fn test_negative_offsets_writer_wide() {
        let mut w = LinkedWriter::with_options(WriterOptions {
            allow_negative_offsets: true,
        });
        let target = w.stake_current();
        U8::write(&mut w, 7u8).unwrap();
        let base = w.stake_current();
        w.add_offset(base, target, OffsetEncoding::U8, LinkOptions::default())
            .unwrap();
        assert_eq!(w.into_bytes().unwrap(), [7, 0xFF]);
    }

    #[test]
    fn test_offset_overflow() {
        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::U8, LinkOptions::default())
            .unwrap();
        w.write_zeros(300).unwrap();
        w.stake_current_with_value(target).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::OffsetOverflow));
    }

    #[test]
    fn test_divisor() {
        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::U16, LinkOptions::with_divisor(2))
            .unwrap();
        w.write_zeros(6).unwrap();
        w.stake_current_with_value(target).unwrap();
        assert_eq!(&w.into_bytes().unwrap()[..2], &[0, 4]);

        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::U16, LinkOptions::with_divisor(2))
            .unwrap();
        w.write_zeros(1).unwrap();
        w.stake_current_with_value(target).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::Misaligned));
    }

    #[test]
    fn test_align() {
        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::U8, LinkOptions::default())
            .unwrap();
        w.align(4).unwrap();
        w.stake_current_with_value(target).unwrap();
        U8::write(&mut w, 9u8).unwrap();
        assert_eq!(w.into_bytes().unwrap(), [4, 0, 0, 0, 9]);
    }

    #[test]
    fn test_deferred_value() {
        let mut w = LinkedWriter::new();
        U8::write(&mut w, 1u8).unwrap();
        let count = w.add_deferred::<U16Be, u16>().unwrap();
        U8::write(&mut w, 3u8).unwrap();
        w.write_placeholder(count, 2).unwrap();
        assert_eq!(w.into_bytes().unwrap(), [1, 0, 2, 3]);
    }

    #[test]
    fn test_deferred_value_unset() {
        let mut w = LinkedWriter::new();
        let _count = w.add_deferred::<U16Be, u16>().unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::DeferredValueUnset));
    }

    #[test]
    fn test_variable_width_offset_converges() {
        fn encode(value: i64) -> Result<Vec<u8>, WriteError> {
            if value < 0x80 {
                Ok(vec![value as u8])
            } else {
                Ok(vec![0x80, (value >> 8) as u8, value as u8])
            }
        }

        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::Variable(encode), LinkOptions::default())
            .unwrap();
        w.write_zeros(0x7E).unwrap();
        w.stake_current_with_value(target).unwrap();

        // With a one byte encoding the target would be at 0x7F, but 0x7F fits in one byte so
        // that is stable.
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes[0], 0x7F);
        assert_eq!(bytes.len(), 0x7F);

        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::Variable(encode), LinkOptions::default())
            .unwrap();
        w.write_zeros(0x7F).unwrap();
        w.stake_current_with_value(target).unwrap();

        // A one byte encoding would put the target at 0x80, which needs three bytes.
        let bytes = w.into_bytes().unwrap();
        assert_eq!(&bytes[..3], &[0x80, 0x00, 0x82]);
        assert_eq!(bytes.len(), 0x82);
    }

    #[test]
    fn test_resize_loop() {
        fn encode(value: i64) -> Result<Vec<u8>, WriteError> {
            if value < 2 {
                Ok(vec![0; 2])
            } else {
                Ok(vec![0; 1])
            }
        }

        let mut w = LinkedWriter::new();
        let base = w.stake_current();
        let target = w.new_stake();
        w.add_offset(base, target, OffsetEncoding::Variable(encode), LinkOptions::default())
            .unwrap();
        w.stake_current_with_value(target).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::ResizeLoop));
    }

    #[test]
    fn test_unaligned_end() {
        let mut w = LinkedWriter::new();
        w.add_bits(1, 3).unwrap();
        assert_eq!(w.into_bytes(), Err(WriteError::Misaligned));
    }
}
