//! Class definition tables.
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/chapter2#class-definition-table>

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::binary::read::{ReadBinary, ReadCtxt, ReadFrom};
use crate::binary::write::{WriteBinary, WriteContext};
use crate::binary::U16Be;
use crate::error::{ParseError, WriteError};
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryValidated};

/// Maps glyphs to classes. Glyphs that are not mapped are in class 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassDef {
    classes: BTreeMap<u16, u16>,
}

#[derive(Copy, Clone, Debug)]
struct ClassRangeRecord {
    start_glyph: u16,
    end_glyph: u16,
    class_value: u16,
}

impl ReadFrom for ClassRangeRecord {
    type ReadType = (U16Be, U16Be, U16Be);

    fn read_from((start_glyph, end_glyph, class_value): (u16, u16, u16)) -> Self {
        ClassRangeRecord {
            start_glyph,
            end_glyph,
            class_value,
        }
    }
}

impl ClassDef {
    pub fn new() -> Self {
        ClassDef::default()
    }

    pub fn get(&self, glyph: u16) -> u16 {
        self.classes.get(&glyph).copied().unwrap_or(0)
    }

    /// Assign `glyph` to `class`. Assigning class 0 removes the glyph.
    pub fn insert(&mut self, glyph: u16, class: u16) {
        if class == 0 {
            self.classes.remove(&glyph);
        } else {
            self.classes.insert(glyph, class);
        }
    }

    /// Glyphs with a non-zero class, in glyph order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u16, u16)> + '_ {
        self.classes.iter().map(|(&glyph, &class)| (glyph, class))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The format that encodes this class definition in the fewest bytes.
    ///
    /// Format 1 wins a tie. An empty class definition uses format 2.
    pub fn best_format(&self) -> u16 {
        match self.glyph_span() {
            Some((first, last))
                if last - first < u16::MAX
                    && usize::from(last - first) + 2 <= 3 * self.segments().len() =>
            {
                1
            }
            _ => 2,
        }
    }

    fn glyph_span(&self) -> Option<(u16, u16)> {
        let (first, _) = self.iter().next()?;
        let (last, _) = self.iter().next_back()?;
        Some((first, last))
    }

    /// Runs of consecutive glyphs sharing a class.
    fn segments(&self) -> Vec<ClassRangeRecord> {
        self.iter()
            .map(|(glyph, class)| ClassRangeRecord {
                start_glyph: glyph,
                end_glyph: glyph,
                class_value: class,
            })
            .coalesce(|a, b| {
                if u32::from(a.end_glyph) + 1 == u32::from(b.start_glyph)
                    && a.class_value == b.class_value
                {
                    Ok(ClassRangeRecord {
                        end_glyph: b.end_glyph,
                        ..a
                    })
                } else {
                    Err((a, b))
                }
            })
            .collect()
    }

    fn extend_from_ranges(&mut self, ranges: &[ClassRangeRecord]) {
        for range in ranges {
            for glyph in range.start_glyph..=range.end_glyph {
                self.insert(glyph, range.class_value);
            }
        }
    }
}

impl FromIterator<(u16, u16)> for ClassDef {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        let mut class_def = ClassDef::new();
        for (glyph, class) in iter {
            class_def.insert(glyph, class);
        }
        class_def
    }
}

impl ReadBinary for ClassDef {
    type HostType<'a> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        match ctxt.read_u16be()? {
            1 => {
                let start_glyph = ctxt.read_u16be()?;
                let glyph_count = ctxt.read_u16be()?;
                let class_values = ctxt.read_array::<U16Be>(usize::from(glyph_count))?;
                ctxt.check(u32::from(start_glyph) + u32::from(glyph_count) <= 0x10000)?;
                Ok((start_glyph..=u16::MAX).zip(class_values.iter()).collect())
            }
            2 => {
                let range_count = ctxt.read_u16be()?;
                let ranges = ctxt
                    .read_array::<ClassRangeRecord>(usize::from(range_count))?
                    .to_vec();
                for range in &ranges {
                    ctxt.check(range.start_glyph <= range.end_glyph)?;
                }
                let mut class_def = ClassDef::new();
                class_def.extend_from_ranges(&ranges);
                Ok(class_def)
            }
            _ => Err(ParseError::BadVersion),
        }
    }
}

impl ReadBinaryValidated for ClassDef {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Self> {
        let logger = logger.child("classDef");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, 2) {
            return None;
        }
        let position = ctxt.position();
        let format = ctxt.read_u16be().ok()?;
        logger.debug("V0079", "Format {}.", vec![Arg::from(format)]);

        let (class_def, explicit_zero) = match format {
            1 => {
                if ctxt.remaining() < 4 {
                    logger.error_at(
                        ctxt.position(),
                        "V0080",
                        "Insufficient bytes for format 1 header.",
                        Vec::new(),
                    );
                    return None;
                }
                let start_glyph = ctxt.read_u16be().ok()?;
                let glyph_count = ctxt.read_u16be().ok()?;
                let class_values = match ctxt.read_array::<U16Be>(usize::from(glyph_count)) {
                    Ok(array) => array.to_vec(),
                    Err(_) => {
                        logger.error_at(
                            ctxt.position(),
                            "V0081",
                            "Insufficient bytes for format 1 table.",
                            Vec::new(),
                        );
                        return None;
                    }
                };
                let explicit_zero = class_values.contains(&0);
                let class_def = (start_glyph..=u16::MAX)
                    .zip(class_values)
                    .collect::<ClassDef>();
                (class_def, explicit_zero)
            }
            2 => {
                if ctxt.remaining() < 2 {
                    logger.error_at(
                        ctxt.position(),
                        "V0082",
                        "Insufficient bytes for format 2 count.",
                        Vec::new(),
                    );
                    return None;
                }
                let range_count = ctxt.read_u16be().ok()?;
                let ranges = match ctxt.read_array::<ClassRangeRecord>(usize::from(range_count))
                {
                    Ok(array) => array.to_vec(),
                    Err(_) => {
                        logger.error_at(
                            ctxt.position(),
                            "V0083",
                            "Insufficient bytes for format 2 table.",
                            Vec::new(),
                        );
                        return None;
                    }
                };
                if !ranges
                    .iter()
                    .tuple_windows()
                    .all(|(a, b)| a.start_glyph < b.start_glyph)
                {
                    logger.error(
                        "V0084",
                        "Format 2 segments not sorted by first glyph.",
                        Vec::new(),
                    );
                }
                if let Some((i, _)) = ranges
                    .iter()
                    .find_position(|range| range.start_glyph > range.end_glyph)
                {
                    logger.index(i).error(
                        "V0085",
                        "Format 2 segment first greater than last.",
                        Vec::new(),
                    );
                    return None;
                }
                let mut class_def = ClassDef::new();
                class_def.extend_from_ranges(&ranges);
                (class_def, ranges.iter().any(|range| range.class_value == 0))
            }
            _ => {
                logger.error_at(
                    position,
                    "E5000",
                    "Unknown format {}.",
                    vec![Arg::from(format)],
                );
                return None;
            }
        };

        if explicit_zero {
            logger.warning(
                "V0305",
                "One or more glyphs unnecessarily mapped explicitly to class zero.",
                Vec::new(),
            );
        }
        let used = class_def
            .iter()
            .map(|(_, class)| class)
            .collect::<BTreeSet<_>>();
        if used.iter().next_back().map_or(0, |&max| usize::from(max)) != used.len() {
            logger.warning(
                "V0306",
                "The values in the ClassDef are not contiguous.",
                Vec::new(),
            );
        }
        Some(class_def)
    }
}

impl WriteBinary<&Self> for ClassDef {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, class_def: &ClassDef) -> Result<(), WriteError> {
        match class_def.glyph_span() {
            Some((first, last)) if class_def.best_format() == 1 => {
                U16Be::write(ctxt, 1u16)?;
                U16Be::write(ctxt, first)?;
                U16Be::write(ctxt, last - first + 1)?;
                for glyph in first..=last {
                    U16Be::write(ctxt, class_def.get(glyph))?;
                }
            }
            _ => {
                U16Be::write(ctxt, 2u16)?;
                let segments = class_def.segments();
                U16Be::write(ctxt, u16::try_from(segments.len())?)?;
                for segment in segments {
                    U16Be::write(ctxt, segment.start_glyph)?;
                    U16Be::write(ctxt, segment.end_glyph)?;
                    U16Be::write(ctxt, segment.class_value)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::read::ReadScope;
    use crate::binary::write::WriteBuffer;
    use crate::tests::from_hex;

    fn write(class_def: &ClassDef) -> Vec<u8> {
        let mut buffer = WriteBuffer::new();
        ClassDef::write(&mut buffer, class_def).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_dense_classes_use_format1() {
        let class_def = [(4, 2), (5, 2), (6, 2), (7, 1)]
            .into_iter()
            .collect::<ClassDef>();
        assert_eq!(class_def.best_format(), 1);
        let data = write(&class_def);
        assert_eq!(data, from_hex("0001 0004 0004 0002 0002 0002 0001"));
        let read = ReadScope::new(&data).read::<ClassDef>().unwrap();
        assert_eq!(read, class_def);
        assert_eq!(read.get(6), 2);
        assert_eq!(read.get(8), 0);
    }

    #[test]
    fn test_sparse_classes_use_format2() {
        let class_def = [(4, 2), (5, 2), (6, 2), (7, 1), (10, 2), (11, 2), (15, 2)]
            .into_iter()
            .collect::<ClassDef>();
        assert_eq!(class_def.best_format(), 2);
        let data = write(&class_def);
        assert_eq!(
            data,
            from_hex("0002 0004 0004 0006 0002 0007 0007 0001 000A 000B 0002 000F 000F 0002")
        );
        assert_eq!(ReadScope::new(&data).read::<ClassDef>().unwrap(), class_def);
    }

    #[test]
    fn test_empty_is_format2() {
        let data = write(&ClassDef::new());
        assert_eq!(data, from_hex("0002 0000"));
        assert!(ReadScope::new(&data).read::<ClassDef>().unwrap().is_empty());
    }

    #[test]
    fn test_class_zero_dropped() {
        let data = from_hex("0001 0004 0003 0001 0000 0001");
        let logger = Logger::new("test");
        let class_def = ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .unwrap();
        assert_eq!(class_def.len(), 2);
        assert!(logger.has_code("V0305"));
        assert!(!logger.has_code("V0306"));
        assert!(!logger.has_errors());
    }

    #[test]
    fn test_explicit_zero_in_either_format() {
        let data = from_hex("0002 0002 0001 0002 0001 0005 0005 0000");
        let logger = Logger::new("test");
        let class_def = ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .unwrap();
        assert_eq!(class_def.len(), 2);
        assert!(logger.has_code("V0305"));
        assert!(!logger.has_code("V0306"));

        let data = from_hex("0001 0004 0002 0001 0002");
        let logger = Logger::new("test");
        ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .unwrap();
        assert!(!logger.has_code("V0305"));
    }

    #[test]
    fn test_non_contiguous_classes() {
        let data = from_hex("0002 0002 0001 0002 0001 0005 0005 0003");
        let logger = Logger::new("test");
        ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .unwrap();
        assert!(logger.has_code("V0306"));
    }

    #[test]
    fn test_validated_errors() {
        let logger = Logger::new("test");
        let data = from_hex("0009 0000");
        assert!(ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .is_none());
        assert!(logger.has_code("E5000"));
        assert_eq!(
            ReadScope::new(&data).read::<ClassDef>(),
            Err(ParseError::BadVersion)
        );

        let data = from_hex("0001 0004");
        assert!(ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .is_none());
        assert!(logger.has_code("V0080"));

        let data = from_hex("0001 0004 0003 0001");
        assert!(ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .is_none());
        assert!(logger.has_code("V0081"));

        let data = from_hex("0002 0002 0009 0005 0001 0001 0002 0001");
        assert!(ReadScope::new(&data)
            .read_validated::<ClassDef>(&logger)
            .is_none());
        assert!(logger.has_code("V0085"));
        assert!(logger.has_code("V0084"));
        assert_eq!(
            ReadScope::new(&data).read::<ClassDef>(),
            Err(ParseError::BadValue)
        );
    }
}
