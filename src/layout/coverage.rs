//! Coverage tables.
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/chapter2#coverage-table>

use itertools::Itertools;

use crate::binary::read::{ReadBinary, ReadCtxt, ReadFrom};
use crate::binary::write::{WriteBinary, WriteContext};
use crate::binary::U16Be;
use crate::error::{ParseError, WriteError};
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryValidated};

/// A sorted set of glyphs. The coverage index of a glyph is its position in the set.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coverage {
    glyphs: Vec<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct RangeRecord {
    start_glyph: u16,
    end_glyph: u16,
    start_coverage_index: u16,
}

impl ReadFrom for RangeRecord {
    type ReadType = (U16Be, U16Be, U16Be);

    fn read_from((start_glyph, end_glyph, start_coverage_index): (u16, u16, u16)) -> Self {
        RangeRecord {
            start_glyph,
            end_glyph,
            start_coverage_index,
        }
    }
}

impl RangeRecord {
    fn glyphs(&self) -> impl Iterator<Item = u16> {
        self.start_glyph..=self.end_glyph
    }
}

impl Coverage {
    pub fn new() -> Self {
        Coverage::default()
    }

    pub fn glyphs(&self) -> &[u16] {
        &self.glyphs
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn contains(&self, glyph: u16) -> bool {
        self.index_of(glyph).is_some()
    }

    /// The coverage index of `glyph`, if it is covered.
    pub fn index_of(&self, glyph: u16) -> Option<usize> {
        self.glyphs.binary_search(&glyph).ok()
    }

    /// Runs of consecutive glyph ids as inclusive `(first, last)` pairs.
    fn ranges(&self) -> Vec<(u16, u16)> {
        self.glyphs
            .iter()
            .map(|&glyph| (glyph, glyph))
            .coalesce(|(first, last), (next, _)| {
                if u32::from(last) + 1 == u32::from(next) {
                    Ok((first, next))
                } else {
                    Err(((first, last), (next, next)))
                }
            })
            .collect()
    }

    fn format(&self) -> u16 {
        let format1_size = 2 * self.glyphs.len();
        let format2_size = 6 * self.ranges().len();
        if format1_size <= format2_size {
            1
        } else {
            2
        }
    }
}

impl FromIterator<u16> for Coverage {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut glyphs = iter.into_iter().collect::<Vec<_>>();
        glyphs.sort_unstable();
        glyphs.dedup();
        Coverage { glyphs }
    }
}

fn is_ascending(glyphs: &[u16]) -> bool {
    glyphs.iter().tuple_windows().all(|(a, b)| a < b)
}

fn ranges_are_ordered(ranges: &[RangeRecord]) -> bool {
    ranges
        .iter()
        .tuple_windows()
        .all(|(a, b)| a.end_glyph < b.start_glyph)
}

/// Returns true if each range starts at the coverage index following the previous range.
fn indices_are_contiguous(ranges: &[RangeRecord]) -> bool {
    let mut expected = 0u32;
    for range in ranges {
        if u32::from(range.start_coverage_index) != expected {
            return false;
        }
        expected += u32::from(range.end_glyph - range.start_glyph) + 1;
    }
    true
}

impl ReadBinary for Coverage {
    type HostType<'a> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        match ctxt.read_u16be()? {
            1 => {
                let glyph_count = ctxt.read_u16be()?;
                let glyphs = ctxt.read_array::<U16Be>(usize::from(glyph_count))?.to_vec();
                ctxt.check(is_ascending(&glyphs))?;
                Ok(Coverage { glyphs })
            }
            2 => {
                let range_count = ctxt.read_u16be()?;
                let ranges = ctxt
                    .read_array::<RangeRecord>(usize::from(range_count))?
                    .to_vec();
                for range in &ranges {
                    ctxt.check(range.start_glyph <= range.end_glyph)?;
                }
                ctxt.check(ranges_are_ordered(&ranges))?;
                ctxt.check(indices_are_contiguous(&ranges))?;
                let glyphs = ranges.iter().flat_map(RangeRecord::glyphs).collect();
                Ok(Coverage { glyphs })
            }
            _ => Err(ParseError::BadVersion),
        }
    }
}

impl ReadBinaryValidated for Coverage {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Self> {
        let logger = logger.child("coverage");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, 4) {
            return None;
        }
        let position = ctxt.position();
        let format = ctxt.read_u16be().ok()?;
        let count = ctxt.read_u16be().ok()?;
        logger.debug(
            "V0087",
            "Format {} with count {}.",
            vec![Arg::from(format), Arg::from(count)],
        );
        if format != 1 && format != 2 {
            logger.error_at(
                position,
                "E5100",
                "Unknown format: {}.",
                vec![Arg::from(format)],
            );
            return None;
        }
        if count == 0 {
            logger.warning_at(position + 2, "V0086", "Coverage is empty.", Vec::new());
        }

        if format == 1 {
            let glyphs = match ctxt.read_array::<U16Be>(usize::from(count)) {
                Ok(array) => array.to_vec(),
                Err(_) => {
                    logger.error_at(
                        ctxt.position(),
                        "V0088",
                        "Insufficient bytes for format 1 glyph array.",
                        Vec::new(),
                    );
                    return None;
                }
            };
            if !is_ascending(&glyphs) {
                logger.error(
                    "V0089",
                    "Format 1 glyphs are not sorted in increasing order.",
                    Vec::new(),
                );
            }
            return Some(glyphs.into_iter().collect());
        }

        let ranges = match ctxt.read_array::<RangeRecord>(usize::from(count)) {
            Ok(array) => array.to_vec(),
            Err(_) => {
                logger.error_at(
                    ctxt.position(),
                    "V0090",
                    "Insufficient bytes for format 2 range records.",
                    Vec::new(),
                );
                return None;
            }
        };
        let mut valid = true;
        for (i, range) in ranges.iter().enumerate() {
            if range.start_glyph > range.end_glyph {
                logger.index(i).error(
                    "V0093",
                    "Range first glyph {} is greater than last glyph {}.",
                    vec![Arg::from(range.start_glyph), Arg::from(range.end_glyph)],
                );
                valid = false;
            }
        }
        if !ranges_are_ordered(&ranges) {
            logger.error(
                "V0091",
                "Format 2 ranges are not sorted or overlap.",
                Vec::new(),
            );
        }
        if valid && !indices_are_contiguous(&ranges) {
            logger.error(
                "V0092",
                "Format 2 coverage indices have gaps.",
                Vec::new(),
            );
        }
        Some(ranges.iter().flat_map(RangeRecord::glyphs).collect())
    }
}

impl WriteBinary<&Self> for Coverage {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, coverage: &Coverage) -> Result<(), WriteError> {
        match coverage.format() {
            1 => {
                U16Be::write(ctxt, 1u16)?;
                U16Be::write(ctxt, u16::try_from(coverage.glyphs.len())?)?;
                for &glyph in &coverage.glyphs {
                    U16Be::write(ctxt, glyph)?;
                }
            }
            _ => {
                let ranges = coverage.ranges();
                U16Be::write(ctxt, 2u16)?;
                U16Be::write(ctxt, u16::try_from(ranges.len())?)?;
                let mut index = 0usize;
                for (first, last) in ranges {
                    U16Be::write(ctxt, first)?;
                    U16Be::write(ctxt, last)?;
                    U16Be::write(ctxt, u16::try_from(index)?)?;
                    index += usize::from(last - first) + 1;
                }
            }
        }
        Ok(())
    }
}
