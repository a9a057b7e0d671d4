//! Single adjustment positioning subtables (GPOS lookup type 1).
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/gpos#lookup-type-1-single-adjustment-positioning-subtable>

use std::collections::BTreeMap;

use crate::binary::linked::LinkedWriter;
use crate::binary::read::{ReadBinary, ReadBinaryDep, ReadCtxt};
use crate::binary::write::WriteBinary;
use crate::binary::U16Be;
use crate::error::{ParseError, WriteError};
use crate::layout::coverage::Coverage;
use crate::layout::device::Device;
use crate::layout::value_record::{ValueFormat, ValueRecord};
use crate::pool::Pool;
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryValidated};

/// The adjustment applied to each covered glyph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SinglePos {
    pub values: BTreeMap<u16, ValueRecord>,
}

impl SinglePos {
    pub fn apply(&self, glyph: u16) -> Option<&ValueRecord> {
        self.values.get(&glyph)
    }

    pub fn coverage(&self) -> Coverage {
        self.values.keys().copied().collect()
    }

    /// The record shared by every glyph, if there is one.
    fn shared_record(&self) -> Option<&ValueRecord> {
        let mut records = self.values.values();
        let first = records.next()?;
        records.all(|record| record == first).then_some(first)
    }

    /// Write the subtable, choosing format 1 when every glyph has the same record.
    ///
    /// The coverage table follows the subtable body, then any device tables.
    pub fn write_linked(w: &mut LinkedWriter, single_pos: &SinglePos) -> Result<(), WriteError> {
        let base = w.stake_current();
        let mut devices: Pool<Device, Device> = Pool::new();
        let coverage = w.new_stake();

        let empty = ValueRecord::default();
        let shared = match single_pos.values.is_empty() {
            true => Some(&empty),
            false => single_pos.shared_record(),
        };
        match shared {
            Some(record) => {
                let format = record.format();
                U16Be::write(w, 1u16)?;
                w.add_offset16(base, coverage)?;
                ValueFormat::write(w, format)?;
                ValueRecord::write_linked(w, record, format, base, &mut devices)?;
            }
            None => {
                let format = single_pos
                    .values
                    .values()
                    .fold(ValueFormat::empty(), |format, record| {
                        format | record.format()
                    });
                U16Be::write(w, 2u16)?;
                w.add_offset16(base, coverage)?;
                ValueFormat::write(w, format)?;
                U16Be::write(w, u16::try_from(single_pos.values.len())?)?;
                for record in single_pos.values.values() {
                    ValueRecord::write_linked(w, record, format, base, &mut devices)?;
                }
            }
        }

        w.stake_current_with_value(coverage)?;
        Coverage::write(w, &single_pos.coverage())?;
        devices.drain(w, |w, _key, device| Device::write(w, &device))
    }
}

impl ReadBinary for SinglePos {
    type HostType<'a> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        let scope = ctxt.scope();
        let format = ctxt.read_u16be()?;
        let coverage_offset = usize::from(ctxt.read_u16be()?);
        let value_format = ctxt.read::<ValueFormat>()?;
        let coverage = scope.offset(coverage_offset).read::<Coverage>()?;
        let values = match format {
            1 => {
                let record = ValueRecord::read_dep(ctxt, (value_format, scope))?;
                coverage
                    .glyphs()
                    .iter()
                    .map(|&glyph| (glyph, record.clone()))
                    .collect()
            }
            2 => {
                let value_count = usize::from(ctxt.read_u16be()?);
                ctxt.check_index(value_count == coverage.len())?;
                let records = ctxt
                    .read_array_dep::<ValueRecord>(value_count, (value_format, scope))?
                    .read_to_vec()?;
                coverage.glyphs().iter().copied().zip(records).collect()
            }
            _ => return Err(ParseError::BadVersion),
        };
        Ok(SinglePos { values })
    }
}

impl ReadBinaryValidated for SinglePos {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Self> {
        let logger = logger.child("single");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, 6) {
            return None;
        }
        let scope = ctxt.scope();
        let position = ctxt.position();
        let format = ctxt.read_u16be().ok()?;
        if format != 1 && format != 2 {
            logger.error_at(
                position,
                "V0321",
                "The value {} is not a valid format for a Single table.",
                vec![Arg::from(format)],
            );
            return None;
        }
        let coverage_offset = usize::from(ctxt.read_u16be().ok()?);
        let coverage = scope
            .offset(coverage_offset)
            .read_validated::<Coverage>(&logger)?;
        let value_format = ctxt.read_u16be().ok()?;
        let value_format = match ValueFormat::from_bits(value_format) {
            Some(value_format) => value_format,
            None => {
                logger.error_at(
                    position + 4,
                    "E4110",
                    "Reserved bits are set in the ValueFormat field ({}).",
                    vec![Arg::from(value_format)],
                );
                return None;
            }
        };

        let values = match format {
            1 => {
                let record =
                    ctxt.read_dep_validated::<ValueRecord>((value_format, scope), &logger)?;
                coverage
                    .glyphs()
                    .iter()
                    .map(|&glyph| (glyph, record.clone()))
                    .collect()
            }
            _ => {
                if ctxt.remaining() < 2 {
                    logger.error_at(
                        ctxt.position(),
                        "V0322",
                        "Insufficient bytes for format 2 Value count.",
                        Vec::new(),
                    );
                    return None;
                }
                let value_count = ctxt.read_u16be().ok()?;
                let mut records = Vec::with_capacity(usize::from(value_count));
                for i in 0..usize::from(value_count) {
                    records.push(ctxt.read_dep_validated::<ValueRecord>(
                        (value_format, scope),
                        &logger.index(i),
                    )?);
                }
                if records.len() != coverage.len() {
                    logger.error(
                        "V0931",
                        "There are {} Value records for {} covered glyphs.",
                        vec![Arg::from(records.len()), Arg::from(coverage.len())],
                    );
                    return None;
                }
                coverage.glyphs().iter().copied().zip(records).collect()
            }
        };
        Some(SinglePos { values })
    }
}
