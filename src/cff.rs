//! CFF DICT and INDEX structures.
//!
//! Refer to [Technical Note #5176](http://wwwimages.adobe.com/content/dam/Adobe/en/devnet/font/pdfs/5176.CFF.pdf)
//! for more information.
//!
//! DICT operands use a variable width encoding, so a DICT that holds offsets to data written
//! after it cannot be sized up front. [`Dict::write_linked`] writes those operands as variable
//! width links on a [`LinkedWriter`], which picks the shortest encoding once the layout is
//! known.

use std::convert::TryFrom;
use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use itertools::Itertools;
use lazy_static::lazy_static;
use tinyvec::TinyVec;

use crate::binary::linked::{LinkOptions, LinkedWriter, OffsetEncoding, Stake};
use crate::binary::read::{ReadBinary, ReadBinaryDep, ReadCtxt, ReadScope};
use crate::binary::write::{WriteBinary, WriteBuffer, WriteContext};
use crate::binary::{I16Be, I32Be, U16Be, U8};
use crate::error::{ParseError, WriteError};
use crate::validate::{ensure_remaining, Logger, ReadBinaryValidated};

/// The most operands that may precede a DICT operator.
pub const MAX_OPERANDS: usize = 48;

const END_OF_FLOAT_FLAG: u8 = 0xf;
const RESERVED_NIBBLE: u8 = 0xd;
// Longest decimal text accepted when converting a real to `f64`.
const MAX_REAL_LEN: usize = 64;

/// First byte of a two byte operator.
const ESCAPE: u16 = 12 << 8;

lazy_static! {
    static ref TOP_DICT_DEFAULTS: Vec<(Operator, Vec<Operand>)> = vec![
        (Operator::IsFixedPitch, integers(&[0])),
        (Operator::ItalicAngle, integers(&[0])),
        (Operator::UnderlinePosition, integers(&[-100])),
        (Operator::UnderlineThickness, integers(&[50])),
        (Operator::PaintType, integers(&[0])),
        (Operator::CharstringType, integers(&[2])),
        // 0.001 0 0 0.001 0 0
        (
            Operator::FontMatrix,
            vec![
                real(&[0x0a, 0x00, 0x1f]),
                Operand::Integer(0),
                Operand::Integer(0),
                real(&[0x0a, 0x00, 0x1f]),
                Operand::Integer(0),
                Operand::Integer(0),
            ]
        ),
        (Operator::FontBBox, integers(&[0, 0, 0, 0])),
        (Operator::StrokeWidth, integers(&[0])),
        (Operator::Charset, vec![Operand::Offset(0)]),
        (Operator::Encoding, vec![Operand::Offset(0)]),
        (Operator::CIDFontVersion, integers(&[0])),
        (Operator::CIDFontRevision, integers(&[0])),
        (Operator::CIDFontType, integers(&[0])),
        (Operator::CIDCount, integers(&[8720])),
    ];
    static ref PRIVATE_DICT_DEFAULTS: Vec<(Operator, Vec<Operand>)> = vec![
        // 0.039625
        (Operator::BlueScale, vec![real(&[0x0a, 0x03, 0x96, 0x25, 0xff])]),
        (Operator::BlueShift, integers(&[7])),
        (Operator::BlueFuzz, integers(&[1])),
        (Operator::ForceBold, integers(&[0])),
        (Operator::LanguageGroup, integers(&[0])),
        // 0.06
        (Operator::ExpansionFactor, vec![real(&[0x0a, 0x06, 0xff])]),
        (Operator::InitialRandomSeed, integers(&[0])),
        (Operator::StrokeWidth, integers(&[0])),
        (Operator::DefaultWidthX, integers(&[0])),
        (Operator::NominalWidthX, integers(&[0])),
    ];
}

fn integers(values: &[i32]) -> Vec<Operand> {
    values.iter().map(|&value| Operand::Integer(value)).collect()
}

fn real(bytes: &[u8]) -> Operand {
    Operand::Real(Real(TinyVec::from(bytes)))
}

fn find_default(
    defaults: &'static [(Operator, Vec<Operand>)],
    operator: Operator,
) -> Option<&'static [Operand]> {
    defaults
        .iter()
        .find(|(op, _)| *op == operator)
        .map(|(_, operands)| operands.as_slice())
}

/// A borrowed INDEX: a count, an offset array and the object data it points into.
#[derive(Clone, Debug)]
pub struct Index<'a> {
    pub count: usize,
    off_size: u8,
    offsets: &'a [u8],
    data: &'a [u8],
}

/// An INDEX built from owned objects, for writing.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct OwnedIndex {
    pub data: Vec<Vec<u8>>,
}

/// An ordered list of operators and their operands.
///
/// `T` supplies the values an operator takes when it is absent, which are also left out when
/// the DICT is written.
#[derive(Debug, PartialEq, Clone)]
pub struct Dict<T>
where
    T: DictDefault,
{
    entries: Vec<(Operator, Vec<Operand>)>,
    default: PhantomData<T>,
}

/// The values DICT operators take when they are absent.
pub trait DictDefault {
    fn default(op: Operator) -> Option<&'static [Operand]>;
}

#[derive(Debug, PartialEq, Clone)]
pub struct TopDictDefault;

#[derive(Debug, PartialEq, Clone)]
pub struct PrivateDictDefault;

pub type TopDict = Dict<TopDictDefault>;

pub type PrivateDict = Dict<PrivateDictDefault>;

/// Offsets to be resolved when writing a DICT with `Dict::write_linked`.
#[derive(Debug, Clone, Default)]
pub struct DictLinks {
    links: Vec<(Operator, DictLink)>,
}

/// The stakes behind an offset-valued DICT operator.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DictLink {
    /// A single offset from `base` to `target`.
    Offset { base: Stake, target: Stake },
    /// The Private operator's (size, offset) pair. The size is the distance from `start` to
    /// `end` and the offset is the distance from `base` to `start`.
    Private { base: Stake, start: Stake, end: Stake },
}

/// One token of DICT data.
#[derive(Debug, PartialEq)]
enum Op {
    Operator(Operator),
    Operand(Operand),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operand {
    Integer(i32),
    /// An integer that locates other data. Read from the operands of offset-valued operators.
    Offset(i32),
    Real(Real),
}

/// A real number, kept as the packed nibbles that encode it.
///
/// Convert to `f64` with `TryFrom`. Build one with `Real::from_f64`.
#[derive(Debug, PartialEq, Clone)]
pub struct Real(TinyVec<[u8; 7]>);

macro_rules! dict_operators {
    ($($name:ident = $value:expr,)*) => {
        /// A DICT operator, numbered by its encoding. Two byte operators keep the escape byte
        /// in the high byte.
        #[repr(u16)]
        #[derive(Debug, PartialEq, Eq, Copy, Clone)]
        pub enum Operator {
            $($name = $value,)*
        }

        const OPERATORS: &[Operator] = &[$(Operator::$name,)*];
    };
}

dict_operators! {
    Version = 0,
    Notice = 1,
    FullName = 2,
    FamilyName = 3,
    Weight = 4,
    FontBBox = 5,
    BlueValues = 6,
    OtherBlues = 7,
    FamilyBlues = 8,
    FamilyOtherBlues = 9,
    StdHW = 10,
    StdVW = 11,
    UniqueID = 13,
    XUID = 14,
    Charset = 15,
    Encoding = 16,
    CharStrings = 17,
    Private = 18,
    Subrs = 19,
    DefaultWidthX = 20,
    NominalWidthX = 21,
    Copyright = ESCAPE,
    IsFixedPitch = ESCAPE | 1,
    ItalicAngle = ESCAPE | 2,
    UnderlinePosition = ESCAPE | 3,
    UnderlineThickness = ESCAPE | 4,
    PaintType = ESCAPE | 5,
    CharstringType = ESCAPE | 6,
    FontMatrix = ESCAPE | 7,
    StrokeWidth = ESCAPE | 8,
    BlueScale = ESCAPE | 9,
    BlueShift = ESCAPE | 10,
    BlueFuzz = ESCAPE | 11,
    StemSnapH = ESCAPE | 12,
    StemSnapV = ESCAPE | 13,
    ForceBold = ESCAPE | 14,
    LanguageGroup = ESCAPE | 17,
    ExpansionFactor = ESCAPE | 18,
    InitialRandomSeed = ESCAPE | 19,
    SyntheticBase = ESCAPE | 20,
    PostScript = ESCAPE | 21,
    BaseFontName = ESCAPE | 22,
    BaseFontBlend = ESCAPE | 23,
    ROS = ESCAPE | 30,
    CIDFontVersion = ESCAPE | 31,
    CIDFontRevision = ESCAPE | 32,
    CIDFontType = ESCAPE | 33,
    CIDCount = ESCAPE | 34,
    UIDBase = ESCAPE | 35,
    FDArray = ESCAPE | 36,
    FDSelect = ESCAPE | 37,
    FontName = ESCAPE | 38,
}

impl TryFrom<u16> for Operator {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        OPERATORS
            .iter()
            .copied()
            .find(|&op| op as u16 == value)
            .ok_or(ParseError::BadValue)
    }
}

impl Operator {
    /// Returns `true` if this operator's single operand is an offset.
    pub fn takes_offset(self) -> bool {
        matches!(
            self,
            Operator::Charset
                | Operator::Encoding
                | Operator::CharStrings
                | Operator::Subrs
                | Operator::FDArray
                | Operator::FDSelect
        )
    }
}

/// The value of entry `i` of an INDEX offset array.
///
/// `i` must be at most the INDEX count and `off_size` in `1..=4`.
fn offset_at(offsets: &[u8], off_size: u8, i: usize) -> usize {
    let width = usize::from(off_size);
    let start = i * width;
    // NOTE(cast): at most 4 bytes are read so the value fits in a u32
    BigEndian::read_uint(&offsets[start..start + width], width) as usize
}

/// The smallest INDEX offset size that can hold `value`.
fn offset_size(value: usize) -> Option<u8> {
    match u32::try_from(value).ok()? {
        0..=0xFF => Some(1),
        0x100..=0xFFFF => Some(2),
        0x1_0000..=0xFF_FFFF => Some(3),
        _ => Some(4),
    }
}

impl<'b> ReadBinary for Index<'b> {
    type HostType<'a> = Index<'a>;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self::HostType<'a>, ParseError> {
        let count = usize::from(ctxt.read_u16be()?);
        if count == 0 {
            return Ok(Index::empty());
        }
        let off_size = ctxt.read_u8()?;
        ctxt.check((1..=4).contains(&off_size))?;
        let offsets = ctxt.read_slice((count + 1) * usize::from(off_size))?;

        // Offsets are 1 based and never decrease
        let first = offset_at(offsets, off_size, 0);
        let sorted = (0..=count)
            .map(|i| offset_at(offsets, off_size, i))
            .tuple_windows()
            .all(|(a, b)| a <= b);
        if first != 1 || !sorted {
            return Err(ParseError::BadOffset);
        }
        let data = ctxt.read_slice(offset_at(offsets, off_size, count) - 1)?;

        Ok(Index {
            count,
            off_size,
            offsets,
            data,
        })
    }
}

impl<'b> ReadBinaryValidated for Index<'b> {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Index<'a>> {
        let logger = logger.child("INDEX");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![ctxt.remaining().into()],
        );
        if !ensure_remaining(ctxt, &logger, 2) {
            return None;
        }
        let count = usize::from(ctxt.read_u16be().ok()?);
        logger.info("V0846", "INDEX count: {}", vec![count.into()]);
        if count == 0 {
            return Some(Index::empty());
        }
        if !ensure_remaining(ctxt, &logger, 1) {
            return None;
        }

        let off_size_position = ctxt.position();
        let off_size = ctxt.read_u8().ok()?;
        logger.debug("V0001", "offSize = {}", vec![u32::from(off_size).into()]);
        if !(1..=4).contains(&off_size) {
            logger.error_at(
                off_size_position,
                "V0843",
                "Invalid INDEX offSize {}",
                vec![u32::from(off_size).into()],
            );
            return None;
        }
        let offsets_len = (count + 1) * usize::from(off_size);
        if ctxt.remaining() < offsets_len {
            logger.error_at(
                ctxt.position(),
                "V0942",
                "INDEX length too short for count.",
                Vec::new(),
            );
            return None;
        }
        let offsets = ctxt.read_slice(offsets_len).ok()?;

        let data_position = ctxt.position();
        let first = offset_at(offsets, off_size, 0);
        if first != 1 {
            logger.error_at(
                data_position,
                "V0979",
                "First INDEX offset is {} rather than 1.",
                vec![first.into()],
            );
            return None;
        }
        let mut data_left = ctxt.remaining();
        let lengths = (0..=count)
            .map(|i| offset_at(offsets, off_size, i))
            .tuple_windows()
            // NOTE(cast): offsets are at most 4 bytes wide
            .map(|(start, end)| end as i64 - start as i64);
        for (i, length) in lengths.enumerate() {
            if length < 0 {
                logger.error_at(
                    data_position,
                    "V0979",
                    "Negative length {} for INDEX entry {}.",
                    vec![length.into(), i.into()],
                );
                return None;
            }
            // NOTE(cast): checked non-negative above
            let length = length as usize;
            if length > data_left {
                logger.error_at(
                    data_position,
                    "V0845",
                    "Length {} for INDEX entry {} is past end of INDEX structure.",
                    vec![length.into(), i.into()],
                );
                return None;
            }
            data_left -= length;
        }

        let data = ctxt
            .read_slice(offset_at(offsets, off_size, count) - 1)
            .ok()?;
        Some(Index {
            count,
            off_size,
            offsets,
            data,
        })
    }
}

impl<'a> WriteBinary<&Self> for Index<'a> {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, index: &Index<'a>) -> Result<(), WriteError> {
        U16Be::write(ctxt, u16::try_from(index.count)?)?;
        if index.count > 0 {
            U8::write(ctxt, index.off_size)?;
            ctxt.write_bytes(index.offsets)?;
            ctxt.write_bytes(index.data)?;
        }
        Ok(())
    }
}

impl WriteBinary<&Self> for OwnedIndex {
    type Output = ();

    /// Write the INDEX with the smallest offset size that fits its data.
    fn write<C: WriteContext>(ctxt: &mut C, index: &OwnedIndex) -> Result<(), WriteError> {
        U16Be::write(ctxt, u16::try_from(index.data.len())?)?;
        if index.data.is_empty() {
            return Ok(());
        }

        let offsets = index.offsets();
        let last = offsets.last().copied().unwrap_or(1);
        let off_size = offset_size(last).ok_or(WriteError::BadValue)?;
        let width = usize::from(off_size);
        U8::write(ctxt, off_size)?;
        for offset in offsets {
            let bytes = u32::try_from(offset)?.to_be_bytes();
            ctxt.write_bytes(&bytes[4 - width..])?;
        }
        for object in &index.data {
            ctxt.write_bytes(object)?;
        }
        Ok(())
    }
}

impl<'a> Index<'a> {
    fn empty() -> Index<'static> {
        Index {
            count: 0,
            off_size: 1,
            offsets: &[],
            data: &[],
        }
    }

    /// The bytes of object `index`, or `None` if it is out of range.
    pub fn read_object(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.count {
            return None;
        }
        let start = offset_at(self.offsets, self.off_size, index) - 1;
        let end = offset_at(self.offsets, self.off_size, index + 1) - 1;
        self.data.get(start..end)
    }

    /// Read object `index` as a `T`.
    pub fn read<T: ReadBinaryDep<Args<'a> = ()>>(
        &self,
        index: usize,
    ) -> Result<T::HostType<'a>, ParseError> {
        let object = self.read_object(index).ok_or(ParseError::BadIndex)?;
        ReadScope::new(object).read_dep::<T>(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.count).filter_map(move |i| self.read_object(i))
    }

    pub fn off_size(&self) -> u8 {
        self.off_size
    }

    /// Total length of the object data.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

impl<'a> From<&Index<'a>> for OwnedIndex {
    fn from(index: &Index<'a>) -> Self {
        OwnedIndex::new(index.iter().map(<[u8]>::to_vec).collect())
    }
}

impl OwnedIndex {
    pub fn new(data: Vec<Vec<u8>>) -> Self {
        OwnedIndex { data }
    }

    /// The offset array: the 1 based start of each object then the end of the last one.
    fn offsets(&self) -> Vec<usize> {
        std::iter::once(1)
            .chain(self.data.iter().scan(1, |end, object| {
                *end += object.len();
                Some(*end)
            }))
            .collect()
    }

    /// Write this INDEX to `w` with each offset as a link to its object.
    ///
    /// The offset size is written as a deferred value once the data length is known. Returns
    /// the stake at the start of each object.
    pub fn write_linked(w: &mut LinkedWriter, index: &OwnedIndex) -> Result<Vec<Stake>, WriteError> {
        U16Be::write(w, u16::try_from(index.data.len())?)?;
        if index.data.is_empty() {
            return Ok(Vec::new());
        }

        let data_len: usize = index.data.iter().map(Vec::len).sum();
        let off_size = offset_size(data_len + 1).ok_or(WriteError::BadValue)?;
        let encoding = match off_size {
            1 => OffsetEncoding::U8,
            2 => OffsetEncoding::U16,
            3 => OffsetEncoding::U24,
            _ => OffsetEncoding::U32,
        };
        let off_size_value = w.add_deferred::<U8, u8>()?;

        // Offsets count from the byte before the object data
        let base = w.new_stake();
        let bounds = (0..=index.data.len())
            .map(|_| w.new_stake())
            .collect::<Vec<_>>();
        for &bound in &bounds {
            w.add_offset(base, bound, encoding, LinkOptions::with_delta(1))?;
        }

        w.stake_current_with_value(base)?;
        for (&start, object) in bounds.iter().zip(&index.data) {
            w.stake_current_with_value(start)?;
            w.write_bytes(object)?;
        }
        w.stake_current_with_value(bounds[index.data.len()])?;
        w.write_placeholder(off_size_value, off_size)?;

        Ok(bounds[..index.data.len()].to_vec())
    }
}

impl ReadBinary for Op {
    type HostType<'b> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        let b0 = ctxt.read_u8()?;
        let op = match b0 {
            12 => Op::Operator(Operator::try_from(ESCAPE | u16::from(ctxt.read_u8()?))?),
            0..=21 => Op::Operator(Operator::try_from(u16::from(b0))?),
            28 => Op::Operand(Operand::Integer(i32::from(ctxt.read_i16be()?))),
            29 => Op::Operand(Operand::Integer(ctxt.read_i32be()?)),
            30 => {
                let nibbles = ctxt.read_until_nibble(END_OF_FLOAT_FLAG)?;
                Op::Operand(Operand::Real(Real(TinyVec::from(nibbles))))
            }
            32..=246 => Op::Operand(Operand::Integer(i32::from(b0) - 139)),
            247..=254 => {
                let b1 = i32::from(ctxt.read_u8()?);
                let magnitude = i32::from((b0 - 247) % 4) * 256 + b1 + 108;
                Op::Operand(Operand::Integer(if b0 < 251 { magnitude } else { -magnitude }))
            }
            // 22..=27, 31 and 255 are reserved
            _ => return Err(ParseError::BadValue),
        };
        Ok(op)
    }
}

fn is_reserved_operand(b0: u8) -> bool {
    matches!(b0, 22..=27 | 31 | 255)
}

/// Mark the operands of offset-valued operators as offsets.
///
/// Offsets are written in a fixed width form, so a DICT read and written again keeps its
/// size.
fn integer_to_offset(operator: Operator, operands: &mut [Operand]) {
    let is_offset = match (operator, &*operands) {
        // Encodings 0 and 1 are the predefined encodings
        (Operator::Encoding, [Operand::Integer(value)]) => *value > 1,
        (Operator::Private, [Operand::Integer(_), Operand::Integer(_)]) => true,
        (operator, [Operand::Integer(_)]) => operator.takes_offset(),
        _ => false,
    };
    if is_offset {
        for operand in operands.iter_mut() {
            if let Operand::Integer(value) = *operand {
                *operand = Operand::Offset(value);
            }
        }
    }
}

impl<T> ReadBinary for Dict<T>
where
    T: DictDefault,
{
    type HostType<'b> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self::HostType<'a>, ParseError> {
        let mut dict = Dict::new();
        let mut operands = Vec::new();
        while ctxt.bytes_available() {
            match Op::read(ctxt)? {
                Op::Operator(operator) => {
                    integer_to_offset(operator, &mut operands);
                    dict.entries.push((operator, std::mem::take(&mut operands)));
                }
                Op::Operand(operand) if operands.len() < MAX_OPERANDS => operands.push(operand),
                Op::Operand(_) => return Err(ParseError::LimitExceeded),
            }
        }
        Ok(dict)
    }
}

impl<T> ReadBinaryValidated for Dict<T>
where
    T: DictDefault,
{
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Self> {
        let logger = logger.child("DICT");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![ctxt.remaining().into()],
        );

        let mut dict = Dict::new();
        let mut operands = Vec::new();
        while ctxt.bytes_available() {
            let position = ctxt.position();
            let b0 = ctxt.peek_u8().ok()?;
            let operand = match Op::read(ctxt) {
                Ok(Op::Operator(operator)) => {
                    integer_to_offset(operator, &mut operands);
                    dict.entries.push((operator, std::mem::take(&mut operands)));
                    continue;
                }
                Ok(Op::Operand(operand)) => operand,
                Err(ParseError::BadEof) => {
                    logger.error_at(
                        position,
                        "V0848",
                        "DICT data too short for operand.",
                        Vec::new(),
                    );
                    return None;
                }
                Err(_) => {
                    let template = if is_reserved_operand(b0) {
                        "Reserved value {} in DICT operand"
                    } else {
                        "Unknown DICT operator {}"
                    };
                    logger.error_at(position, "V0847", template, vec![u32::from(b0).into()]);
                    return None;
                }
            };

            if matches!(&operand, Operand::Real(real) if real.has_reserved_nibble()) {
                logger.error_at(
                    position,
                    "V0847",
                    "Reserved value {} in DICT operand",
                    vec![u32::from(RESERVED_NIBBLE).into()],
                );
                return None;
            }
            if operands.len() == MAX_OPERANDS {
                logger.error_at(
                    position,
                    "V0844",
                    "Number of DICT operands exceeds limit of {}.",
                    vec![MAX_OPERANDS.into()],
                );
                return None;
            }
            operands.push(operand);
        }

        if !operands.is_empty() {
            logger.error_at(
                ctxt.position(),
                "V0849",
                "DICT operands not followed by operator.",
                Vec::new(),
            );
            return None;
        }
        Some(dict)
    }
}

impl<T> WriteBinary<&Self> for Dict<T>
where
    T: DictDefault,
{
    type Output = ();

    /// Write the DICT, leaving out operators that hold their default value.
    fn write<C: WriteContext>(ctxt: &mut C, dict: &Dict<T>) -> Result<(), WriteError> {
        for (operator, operands) in dict.iter() {
            if !dict.is_default(*operator, operands) {
                write_entry(ctxt, *operator, operands)?;
            }
        }
        Ok(())
    }
}

fn write_entry<C: WriteContext>(
    ctxt: &mut C,
    operator: Operator,
    operands: &[Operand],
) -> Result<(), WriteError> {
    for operand in operands {
        Operand::write(ctxt, operand)?;
    }
    Operator::write(ctxt, operator)
}

impl<T> Dict<T>
where
    T: DictDefault,
{
    pub fn new() -> Self {
        Dict {
            entries: Vec::new(),
            default: PhantomData,
        }
    }

    /// Write `dict` to `w`, replacing the operands of each operator in `links` with offsets
    /// that are resolved when the layout is known.
    ///
    /// Linked operators that are not present in `dict` are written after its other entries.
    pub fn write_linked(
        w: &mut LinkedWriter,
        dict: &Dict<T>,
        links: &DictLinks,
    ) -> Result<(), WriteError> {
        for (operator, operands) in dict.iter() {
            match links.get(*operator) {
                Some(link) => write_dict_link(w, *operator, link)?,
                None if dict.is_default(*operator, operands) => {}
                None => write_entry(w, *operator, operands)?,
            }
        }
        for (operator, link) in links.iter() {
            if dict.get(*operator).is_none() {
                write_dict_link(w, *operator, *link)?;
            }
        }
        Ok(())
    }

    /// Set the operands of `operator`, replacing any existing entry for it.
    pub fn push(&mut self, operator: Operator, operands: Vec<Operand>) {
        match self.entries.iter_mut().find(|(op, _)| *op == operator) {
            Some((_, existing)) => *existing = operands,
            None => self.entries.push((operator, operands)),
        }
    }

    pub fn get(&self, operator: Operator) -> Option<&[Operand]> {
        self.entries
            .iter()
            .find(|(op, _)| *op == operator)
            .map(|(_, operands)| operands.as_slice())
    }

    /// The operands of `operator`, or its default if it is absent.
    pub fn get_with_default(&self, operator: Operator) -> Option<&[Operand]> {
        self.get(operator).or_else(|| T::default(operator))
    }

    /// The value of `operator` when it holds a single integer or offset.
    pub fn get_i32(&self, operator: Operator) -> Option<Result<i32, ParseError>> {
        self.get_with_default(operator)
            .map(|operands| match operands {
                [Operand::Integer(value)] | [Operand::Offset(value)] => Ok(*value),
                _ => Err(ParseError::BadValue),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Operator, Vec<Operand>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the Private DICT this DICT points at, returning it and its offset within `scope`.
    ///
    /// A Private DICT of length 0 holds only defaults.
    pub fn read_private_dict<'a>(
        &self,
        scope: &ReadScope<'a>,
    ) -> Result<(PrivateDict, usize), ParseError> {
        let (length, offset) = match self.get(Operator::Private) {
            Some([Operand::Offset(length), Operand::Offset(offset)]) => {
                (usize::try_from(*length)?, usize::try_from(*offset)?)
            }
            Some(_) => return Err(ParseError::BadValue),
            None => return Err(ParseError::MissingValue),
        };
        let private = scope.offset_length(offset, length)?.read::<PrivateDict>()?;
        Ok((private, offset))
    }

    fn is_default(&self, operator: Operator, operands: &[Operand]) -> bool {
        T::default(operator) == Some(operands)
    }
}

impl<T: DictDefault> Default for Dict<T> {
    fn default() -> Self {
        Dict::new()
    }
}

impl DictDefault for TopDictDefault {
    fn default(op: Operator) -> Option<&'static [Operand]> {
        find_default(&TOP_DICT_DEFAULTS, op)
    }
}

impl DictDefault for PrivateDictDefault {
    fn default(op: Operator) -> Option<&'static [Operand]> {
        find_default(&PRIVATE_DICT_DEFAULTS, op)
    }
}

fn write_dict_link(
    w: &mut LinkedWriter,
    operator: Operator,
    link: DictLink,
) -> Result<(), WriteError> {
    let operand = || OffsetEncoding::Variable(encode_offset_operand);
    match link {
        DictLink::Offset { base, target } => {
            w.add_offset(base, target, operand(), LinkOptions::default())?;
        }
        DictLink::Private { base, start, end } => {
            w.add_offset(start, end, operand(), LinkOptions::default())?;
            w.add_offset(base, start, operand(), LinkOptions::default())?;
        }
    }
    Operator::write(w, operator)
}

impl DictLinks {
    pub fn new() -> Self {
        DictLinks::default()
    }

    /// Link `operator`'s single offset operand from `base` to `target`.
    pub fn push_offset(
        &mut self,
        operator: Operator,
        base: Stake,
        target: Stake,
    ) -> Result<(), WriteError> {
        if !operator.takes_offset() {
            return Err(WriteError::BadValue);
        }
        self.insert(operator, DictLink::Offset { base, target });
        Ok(())
    }

    /// Link the Private operator's size to the span `start..end` and its offset from `base`
    /// to `start`.
    pub fn push_private(&mut self, base: Stake, start: Stake, end: Stake) {
        self.insert(Operator::Private, DictLink::Private { base, start, end })
    }

    pub fn get(&self, operator: Operator) -> Option<DictLink> {
        self.links
            .iter()
            .find(|(op, _)| *op == operator)
            .map(|(_, link)| *link)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Operator, DictLink)> {
        self.links.iter()
    }

    fn insert(&mut self, operator: Operator, link: DictLink) {
        match self.links.iter_mut().find(|(op, _)| *op == operator) {
            Some((_, existing)) => *existing = link,
            None => self.links.push((operator, link)),
        }
    }
}

impl WriteBinary<Self> for Operator {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, op: Operator) -> Result<(), WriteError> {
        match (op as u16).to_be_bytes() {
            [0, value] => U8::write(ctxt, value),
            bytes => ctxt.write_bytes(&bytes),
        }
    }
}

impl WriteBinary<&Self> for Operand {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, op: &Operand) -> Result<(), WriteError> {
        match op {
            Operand::Integer(value) => encode_integer(ctxt, *value),
            // Offsets written outside a LinkedWriter always take 5 bytes, so the size of a
            // DICT does not depend on the offsets it holds.
            Operand::Offset(value) => {
                U8::write(ctxt, 29)?;
                I32Be::write(ctxt, *value)
            }
            Operand::Real(real) => {
                U8::write(ctxt, 30)?;
                ctxt.write_bytes(real.as_bytes())
            }
        }
    }
}

/// Write `value` using the shortest DICT integer encoding.
///
/// Refer to Table 3 Operand Encoding in section 4 of Technical Note #5176.
pub fn encode_integer<C: WriteContext>(ctxt: &mut C, value: i32) -> Result<(), WriteError> {
    // NOTE(cast): each band limits the range of the values cast
    match encoded_integer_len(value) {
        1 => U8::write(ctxt, (value + 139) as u8),
        2 => {
            let magnitude = value.abs() - 108;
            let lead = if value > 0 { 247 } else { 251 };
            U8::write(ctxt, (lead + (magnitude >> 8)) as u8)?;
            U8::write(ctxt, (magnitude & 0xFF) as u8)
        }
        3 => {
            U8::write(ctxt, 28)?;
            I16Be::write(ctxt, value as i16)
        }
        _ => {
            U8::write(ctxt, 29)?;
            I32Be::write(ctxt, value)
        }
    }
}

/// The number of bytes `encode_integer` uses for `value`.
pub fn encoded_integer_len(value: i32) -> usize {
    match value {
        -107..=107 => 1,
        -1131..=1131 => 2,
        -32768..=32767 => 3,
        _ => 5,
    }
}

/// Encode a resolved offset as a DICT integer operand.
///
/// This is the `OffsetEncoding::Variable` function used for offset-valued operators.
pub fn encode_offset_operand(value: i64) -> Result<Vec<u8>, WriteError> {
    let value = i32::try_from(value).map_err(|_| WriteError::OffsetOverflow)?;
    let mut buffer = WriteBuffer::new();
    encode_integer(&mut buffer, value)?;
    Ok(buffer.into_inner())
}

impl TryFrom<Real> for f64 {
    type Error = ParseError;

    /// Parse the decimal text the nibbles spell out.
    fn try_from(real: Real) -> Result<Self, Self::Error> {
        let mut text = String::new();
        for nibble in real
            .nibbles()
            .take_while(|&nibble| nibble != END_OF_FLOAT_FLAG)
        {
            match nibble {
                0..=9 => text.push(char::from(b'0' + nibble)),
                0xa => text.push('.'),
                0xb => text.push('E'),
                0xc => text.push_str("E-"),
                0xe => text.push('-'),
                _ => return Err(ParseError::BadValue),
            }
            if text.len() > MAX_REAL_LEN {
                return Err(ParseError::LimitExceeded);
            }
        }
        text.parse().map_err(|_| ParseError::BadValue)
    }
}

impl Real {
    /// Encode `value` as packed nibbles.
    ///
    /// Non-finite values cannot be represented.
    pub fn from_f64(value: f64) -> Result<Real, WriteError> {
        if !value.is_finite() {
            return Err(WriteError::BadValue);
        }
        // Debug formatting gives the shortest text that reads back exactly, switching to an
        // exponent for very large or small values.
        let formatted = format!("{:?}", value);
        let text = formatted.strip_suffix(".0").unwrap_or(&formatted);

        let mut nibbles = Vec::with_capacity(text.len() + 2);
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            let nibble = match c {
                '0'..='9' => c as u8 - b'0',
                '.' => 0xa,
                'e' | 'E' if chars.peek() == Some(&'-') => {
                    chars.next();
                    0xc
                }
                'e' | 'E' => 0xb,
                '-' => 0xe,
                _ => return Err(WriteError::BadValue),
            };
            nibbles.push(nibble);
        }
        nibbles.push(END_OF_FLOAT_FLAG);
        if nibbles.len() % 2 == 1 {
            nibbles.push(END_OF_FLOAT_FLAG);
        }

        Ok(Real(
            nibbles
                .chunks(2)
                .map(|pair| (pair[0] << 4) | pair[1])
                .collect(),
        ))
    }

    /// The packed nibbles, without the leading operand byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn nibbles(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().flat_map(|byte| [byte >> 4, byte & 0xF])
    }

    fn has_reserved_nibble(&self) -> bool {
        self.nibbles()
            .take_while(|&nibble| nibble != END_OF_FLOAT_FLAG)
            .any(|nibble| nibble == RESERVED_NIBBLE)
    }
}
