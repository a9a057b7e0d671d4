//! AAT lookup tables.
//!
//! A lookup table maps glyphs to 16-bit values. They are used for class tables in extended
//! state tables and for per-glyph substitutions in `morx`.
//!
//! <https://developer.apple.com/fonts/TrueType-Reference-Manual/RM06/Chap6Tables.html>

use std::collections::BTreeMap;
use std::iter::FromIterator;

use itertools::Itertools;

use crate::binary::read::{ReadBinary, ReadBinaryDep, ReadCtxt, ReadFrom, ReadScope};
use crate::binary::write::{WriteBinary, WriteContext};
use crate::binary::{U16Be, U8};
use crate::error::{ParseError, WriteError};
use crate::state_table::ClassMap;
use crate::validate::{ensure_remaining, read_or_report, Arg, Logger, ReadBinaryDepValidated};

/// Glyph that marks the end of the units in a binary search table.
pub const SENTINEL_GLYPH: u16 = 0xFFFF;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lookup {
    pub map: BTreeMap<u16, u16>,
}

#[derive(Debug, Clone, Copy)]
pub struct BinSrchHeader {
    unit_size: u16,
    n_units: u16,
}

/// A format 2 or format 4 unit. For format 4 the value is an offset to the values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct LookupSegment {
    last_glyph: u16,
    first_glyph: u16,
    value: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct LookupSingle {
    glyph: u16,
    value: u16,
}

enum SegmentFault {
    Swapped,
    Unsorted,
    Overlapping,
}

impl Lookup {
    pub fn new() -> Self {
        Lookup::default()
    }

    pub fn get(&self, glyph: u16) -> Option<u16> {
        self.map.get(&glyph).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The lookup as a class map. Glyphs mapped to class 1 are dropped.
    pub fn to_class_map(&self) -> ClassMap {
        self.map.iter().map(|(&glyph, &class)| (glyph, class)).collect()
    }

    /// Runs of consecutive glyphs with the same value, as (first, last, value).
    fn segments(&self) -> Vec<(u16, u16, u16)> {
        self.map
            .iter()
            .map(|(&glyph, &value)| (glyph, glyph, value))
            .coalesce(|a, b| {
                if a.1.checked_add(1) == Some(b.0) && a.2 == b.2 {
                    Ok((a.0, b.1, a.2))
                } else {
                    Err((a, b))
                }
            })
            .collect()
    }

    fn is_contiguous(&self) -> bool {
        match (self.map.keys().next(), self.map.keys().next_back()) {
            (Some(&first), Some(&last)) => usize::from(last - first) + 1 == self.map.len(),
            _ => true,
        }
    }

    /// The format `write` uses: whichever of formats 2, 6 and 8 is smallest.
    pub fn best_format(&self) -> u16 {
        let mut candidates = vec![
            (2, 12 + 6 * (self.segments().len() + 1)),
            (6, 12 + 4 * (self.map.len() + 1)),
        ];
        if self.is_contiguous() {
            candidates.push((8, 6 + 2 * self.map.len()));
        }
        candidates
            .into_iter()
            .min_by_key(|&(_, size)| size)
            .map_or(2, |(format, _)| format)
    }
}

impl FromIterator<(u16, u16)> for Lookup {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        Lookup {
            map: iter.into_iter().collect(),
        }
    }
}

impl From<&ClassMap> for Lookup {
    fn from(class_map: &ClassMap) -> Self {
        class_map.iter().collect()
    }
}

impl ReadBinary for BinSrchHeader {
    type HostType<'a> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        let unit_size = ctxt.read_u16be()?;
        let n_units = ctxt.read_u16be()?;
        // searchRange, entrySelector and rangeShift can be derived from the other two
        let _search_range = ctxt.read_u16be()?;
        let _entry_selector = ctxt.read_u16be()?;
        let _range_shift = ctxt.read_u16be()?;

        Ok(BinSrchHeader { unit_size, n_units })
    }
}

impl BinSrchHeader {
    pub fn new(unit_size: u16, n_units: u16) -> Self {
        BinSrchHeader { unit_size, n_units }
    }

    fn write<C: WriteContext>(&self, ctxt: &mut C) -> Result<(), WriteError> {
        let (search_range, entry_selector) = match self.n_units {
            0 => (0, 0),
            n => {
                let entry_selector = 15 - n.leading_zeros();
                (u32::from(self.unit_size) << entry_selector, entry_selector)
            }
        };
        let range_shift = u32::from(self.unit_size) * u32::from(self.n_units) - search_range;
        U16Be::write(ctxt, self.unit_size)?;
        U16Be::write(ctxt, self.n_units)?;
        U16Be::write(ctxt, u16::try_from(search_range)?)?;
        U16Be::write(ctxt, u16::try_from(entry_selector)?)?;
        U16Be::write(ctxt, u16::try_from(range_shift)?)?;
        Ok(())
    }
}

impl ReadFrom for LookupSegment {
    type ReadType = (U16Be, U16Be, U16Be);

    fn read_from((last_glyph, first_glyph, value): (u16, u16, u16)) -> Self {
        LookupSegment {
            last_glyph,
            first_glyph,
            value,
        }
    }
}

impl LookupSegment {
    const SIZE: u16 = 6;

    fn is_sentinel(&self) -> bool {
        self.first_glyph == SENTINEL_GLYPH && self.last_glyph == SENTINEL_GLYPH
    }

    fn len(&self) -> usize {
        usize::from(self.last_glyph - self.first_glyph) + 1
    }
}

impl ReadFrom for LookupSingle {
    type ReadType = (U16Be, U16Be);

    fn read_from((glyph, value): (u16, u16)) -> Self {
        LookupSingle { glyph, value }
    }
}

impl LookupSingle {
    const SIZE: u16 = 4;
}

fn check_segments(segments: &[LookupSegment]) -> Result<(), SegmentFault> {
    if segments.iter().any(|s| s.first_glyph > s.last_glyph) {
        return Err(SegmentFault::Swapped);
    }
    if segments
        .iter()
        .tuple_windows()
        .any(|(a, b)| b.first_glyph < a.first_glyph)
    {
        return Err(SegmentFault::Unsorted);
    }
    if segments
        .iter()
        .tuple_windows()
        .any(|(a, b)| b.first_glyph <= a.last_glyph)
    {
        return Err(SegmentFault::Overlapping);
    }
    Ok(())
}

fn read_segments(
    ctxt: &mut ReadCtxt<'_>,
    header: BinSrchHeader,
) -> Result<Vec<LookupSegment>, ParseError> {
    ctxt.check(header.unit_size == LookupSegment::SIZE)?;
    let segments = ctxt
        .read_array::<LookupSegment>(usize::from(header.n_units))?
        .iter()
        .filter(|segment| !segment.is_sentinel())
        .collect::<Vec<_>>();
    check_segments(&segments).map_err(|_| ParseError::BadValue)?;
    Ok(segments)
}

fn read_segment_values(
    table: &ReadScope<'_>,
    segment: &LookupSegment,
    map: &mut BTreeMap<u16, u16>,
) -> Result<(), ParseError> {
    let values = table
        .offset(usize::from(segment.value))
        .ctxt()
        .read_array::<U16Be>(segment.len())?;
    map.extend((segment.first_glyph..=segment.last_glyph).zip(values.iter()));
    Ok(())
}

impl ReadBinaryDep for Lookup {
    type Args<'a> = u16;
    type HostType<'a> = Lookup;

    /// Read a lookup table. `n_glyphs` is only used by format 0.
    fn read_dep<'a>(ctxt: &mut ReadCtxt<'a>, n_glyphs: u16) -> Result<Lookup, ParseError> {
        let table = ctxt.scope();
        let format = ctxt.read_u16be()?;
        let mut map = BTreeMap::new();

        match format {
            0 => {
                let values = ctxt.read_array::<U16Be>(usize::from(n_glyphs))?;
                map.extend((0..n_glyphs).zip(values.iter()));
            }
            2 => {
                let header = ctxt.read::<BinSrchHeader>()?;
                for segment in read_segments(ctxt, header)? {
                    map.extend(
                        (segment.first_glyph..=segment.last_glyph).map(|glyph| (glyph, segment.value)),
                    );
                }
            }
            4 => {
                let header = ctxt.read::<BinSrchHeader>()?;
                for segment in read_segments(ctxt, header)? {
                    read_segment_values(&table, &segment, &mut map)?;
                }
            }
            6 => {
                let header = ctxt.read::<BinSrchHeader>()?;
                ctxt.check(header.unit_size == LookupSingle::SIZE)?;
                let singles = ctxt.read_array::<LookupSingle>(usize::from(header.n_units))?;
                map.extend(
                    singles
                        .iter()
                        .filter(|single| single.glyph != SENTINEL_GLYPH)
                        .map(|single| (single.glyph, single.value)),
                );
            }
            8 => {
                let first_glyph = ctxt.read_u16be()?;
                let glyph_count = ctxt.read_u16be()?;
                let values = ctxt.read_array::<U16Be>(usize::from(glyph_count))?;
                let glyphs = glyph_range(first_glyph, glyph_count)?;
                map.extend(glyphs.zip(values.iter()));
            }
            10 => {
                // Size of a lookup unit in bytes. Allowed values are 1, 2, 4, and 8.
                let unit_size = ctxt.read_u16be()?;
                let first_glyph = ctxt.read_u16be()?;
                let glyph_count = ctxt.read_u16be()?;
                let glyphs = glyph_range(first_glyph, glyph_count)?;
                match unit_size {
                    1 => {
                        let values = ctxt.read_array::<U8>(usize::from(glyph_count))?;
                        map.extend(glyphs.zip(values.iter().map(u16::from)));
                    }
                    2 => {
                        let values = ctxt.read_array::<U16Be>(usize::from(glyph_count))?;
                        map.extend(glyphs.zip(values.iter()));
                    }
                    // Values wider than 16 bits are not representable in a `Lookup`
                    4 | 8 => return Err(ParseError::NotImplemented),
                    _ => return Err(ParseError::BadValue),
                }
            }
            _ => return Err(ParseError::BadVersion),
        }

        Ok(Lookup { map })
    }
}

/// The glyphs covered by a trimmed array, which must not run past glyph 0xFFFF.
fn glyph_range(
    first_glyph: u16,
    glyph_count: u16,
) -> Result<impl Iterator<Item = u16>, ParseError> {
    let start = u32::from(first_glyph);
    let end = start + u32::from(glyph_count);
    if end > 0x10000 {
        return Err(ParseError::BadValue);
    }
    // NOTE(cast): end is at most 0x10000 so every glyph fits in a u16
    Ok((start..end).map(|glyph| glyph as u16))
}

impl ReadBinaryDepValidated for Lookup {
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        n_glyphs: u16,
        logger: &Logger,
    ) -> Option<Lookup> {
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        let table = ctxt.scope();
        if !ensure_remaining(ctxt, logger, 2) {
            return None;
        }
        let format = table.ctxt().read_u16be().ok()?;

        match format {
            0 if n_glyphs == 0 => {
                logger.warning("V0702", "The format 0 Lookup has no actual data.", Vec::new());
                Some(Lookup::new())
            }
            0 | 10 => read_or_report::<Lookup>(ctxt, n_glyphs, logger),
            2 | 4 => {
                ctxt.read_u16be().ok()?;
                let header = read_bin_srch_header(ctxt, logger, format, LookupSegment::SIZE)?;
                let data_position = ctxt.position();
                let units = match ctxt.read_array::<LookupSegment>(usize::from(header.n_units)) {
                    Ok(units) => units,
                    Err(_) => {
                        let (code, template) = if format == 2 {
                            ("V0704", "The data for the format 2 Lookup are missing or incomplete.")
                        } else {
                            ("V0706", "The data for the format 4 Lookup are missing or incomplete.")
                        };
                        logger.error_at(data_position, code, template, Vec::new());
                        return None;
                    }
                };
                let has_sentinel = units.iter().any(|unit| unit.is_sentinel());
                let segments = units
                    .iter()
                    .filter(|unit| !unit.is_sentinel())
                    .collect::<Vec<_>>();
                if let Err(fault) = check_segments(&segments) {
                    let (code, template) = match fault {
                        SegmentFault::Swapped => (
                            "V0705",
                            "At least one glyph range has its start and end glyph indices swapped.",
                        ),
                        SegmentFault::Unsorted => {
                            ("V0715", "The segments are not sorted by first glyph.")
                        }
                        SegmentFault::Overlapping => {
                            ("V0716", "The segments have overlaps in glyph coverage.")
                        }
                    };
                    logger.error_at(data_position, code, template, Vec::new());
                    return None;
                }

                let mut map = BTreeMap::new();
                for segment in &segments {
                    if format == 2 {
                        map.extend(
                            (segment.first_glyph..=segment.last_glyph)
                                .map(|glyph| (glyph, segment.value)),
                        );
                        continue;
                    }
                    let data_start = 12 + 6 * units.len();
                    if usize::from(segment.value) < data_start {
                        logger.error_at(
                            data_position,
                            "V0708",
                            "The segment offset for the ({}, {}) group is {}, which places it \
                             within the segment index data.",
                            vec![
                                Arg::from(segment.first_glyph),
                                Arg::from(segment.last_glyph),
                                Arg::from(segment.value),
                            ],
                        );
                        return None;
                    }
                    if read_segment_values(&table, segment, &mut map).is_err() {
                        logger.error_at(
                            table.base() + table.data().len(),
                            "V0707",
                            "The segment data at the specified offset are missing or incomplete.",
                            Vec::new(),
                        );
                        return None;
                    }
                }
                if !has_sentinel {
                    check_sentinel(ctxt, logger, LookupSegment::SIZE);
                }
                Some(Lookup { map })
            }
            6 => {
                ctxt.read_u16be().ok()?;
                let header = read_bin_srch_header(ctxt, logger, format, LookupSingle::SIZE)?;
                let data_position = ctxt.position();
                let units = match ctxt.read_array::<LookupSingle>(usize::from(header.n_units)) {
                    Ok(units) => units,
                    Err(_) => {
                        logger.error_at(
                            data_position,
                            "V0710",
                            "The data for the format 6 Lookup are missing or incomplete.",
                            Vec::new(),
                        );
                        return None;
                    }
                };
                let has_sentinel = units.iter().any(|unit| unit.glyph == SENTINEL_GLYPH);
                let singles = units
                    .iter()
                    .filter(|unit| unit.glyph != SENTINEL_GLYPH)
                    .collect::<Vec<_>>();
                if !singles.iter().map(|single| single.glyph).all_unique() {
                    logger.error_at(
                        data_position,
                        "V0713",
                        "There are duplicate glyphs in the format 6 data.",
                        Vec::new(),
                    );
                    return None;
                }
                if singles
                    .iter()
                    .tuple_windows()
                    .any(|(a, b)| b.glyph < a.glyph)
                {
                    logger.error_at(data_position, "V0714", "The glyphs are not sorted.", Vec::new());
                    return None;
                }
                if !has_sentinel {
                    check_sentinel(ctxt, logger, LookupSingle::SIZE);
                }
                Some(
                    singles
                        .iter()
                        .map(|single| (single.glyph, single.value))
                        .collect(),
                )
            }
            8 => {
                ctxt.read_u16be().ok()?;
                let header_position = ctxt.position();
                let (first_glyph, glyph_count) = match (ctxt.read_u16be(), ctxt.read_u16be()) {
                    (Ok(first_glyph), Ok(glyph_count)) => (first_glyph, glyph_count),
                    _ => {
                        logger.error_at(
                            header_position,
                            "V0711",
                            "The format 8 header is missing or incomplete.",
                            Vec::new(),
                        );
                        return None;
                    }
                };
                let data_position = ctxt.position();
                match ctxt.read_array::<U16Be>(usize::from(glyph_count)) {
                    Ok(values) => match glyph_range(first_glyph, glyph_count) {
                        Ok(glyphs) => Some(
                            glyphs
                                .zip(values.iter())
                                .collect(),
                        ),
                        Err(_) => {
                            logger.error_at(
                                header_position,
                                "V0711",
                                "The format 8 glyph range extends past the last glyph.",
                                Vec::new(),
                            );
                            None
                        }
                    },
                    Err(_) => {
                        logger.error_at(
                            data_position,
                            "V0712",
                            "The format 8 data is missing or incomplete.",
                            Vec::new(),
                        );
                        None
                    }
                }
            }
            _ => {
                logger.error_at(
                    table.base(),
                    "V0701",
                    "The Lookup format ({}) is not recognized.",
                    vec![Arg::from(format)],
                );
                None
            }
        }
    }
}

fn read_bin_srch_header(
    ctxt: &mut ReadCtxt<'_>,
    logger: &Logger,
    format: u16,
    unit_size: u16,
) -> Option<BinSrchHeader> {
    let position = ctxt.position();
    if !ensure_remaining(ctxt, logger, 10) {
        return None;
    }
    let header = ctxt.read::<BinSrchHeader>().ok()?;
    if header.unit_size != unit_size {
        logger.error_at(
            position,
            "V0709",
            "Was expecting a unitSize of {} in the binary search header for a format {} \
             Lookup, but got {} instead.",
            vec![
                Arg::from(unit_size),
                Arg::from(format),
                Arg::from(header.unit_size),
            ],
        );
        return None;
    }
    Some(header)
}

fn check_sentinel(ctxt: &ReadCtxt<'_>, logger: &Logger, unit_size: u16) {
    let mut peek = ctxt.clone();
    match peek.read_slice(usize::from(unit_size)) {
        Ok(unit) if unit[..4] == [0xFF; 4][..] || (unit_size == 4 && unit[..2] == [0xFF; 2][..]) => {}
        _ => logger.warning_at(
            ctxt.position(),
            "V0762",
            "Expected a sentinel but one is not present.",
            Vec::new(),
        ),
    }
}

impl WriteBinary<&Self> for Lookup {
    type Output = ();

    /// Write the lookup in whichever of formats 2, 6 and 8 is smallest.
    ///
    /// Binary search tables end with a 0xFFFF sentinel unit, which is not included in
    /// `nUnits`. Glyph 0xFFFF itself can't be looked up.
    fn write<C: WriteContext>(ctxt: &mut C, lookup: &Lookup) -> Result<(), WriteError> {
        if lookup.map.contains_key(&SENTINEL_GLYPH) {
            return Err(WriteError::BadValue);
        }
        let format = lookup.best_format();
        U16Be::write(ctxt, format)?;
        match format {
            2 => {
                let segments = lookup.segments();
                BinSrchHeader::new(LookupSegment::SIZE, u16::try_from(segments.len())?)
                    .write(ctxt)?;
                for (first, last, value) in segments {
                    ctxt.write_iter::<U16Be, _>([last, first, value].into_iter())?;
                }
                ctxt.write_iter::<U16Be, _>([SENTINEL_GLYPH; 3].into_iter())?;
            }
            6 => {
                BinSrchHeader::new(LookupSingle::SIZE, u16::try_from(lookup.map.len())?)
                    .write(ctxt)?;
                for (&glyph, &value) in &lookup.map {
                    U16Be::write(ctxt, glyph)?;
                    U16Be::write(ctxt, value)?;
                }
                ctxt.write_iter::<U16Be, _>([SENTINEL_GLYPH; 2].into_iter())?;
            }
            _ => {
                let first_glyph = lookup.map.keys().next().copied().unwrap_or(0);
                U16Be::write(ctxt, first_glyph)?;
                U16Be::write(ctxt, u16::try_from(lookup.map.len())?)?;
                ctxt.write_iter::<U16Be, _>(lookup.map.values().copied())?;
            }
        }
        Ok(())
    }
}
