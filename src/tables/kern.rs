//! `kern` format 1 subtables: contextual kerning driven by a state table.
//!
//! Only the state table portion of the subtable is handled here, starting at `nClasses`. All
//! offsets in it are from that point.
//!
//! <https://developer.apple.com/fonts/TrueType-Reference-Manual/RM06/Chap6kern.html>

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::binary::linked::{LinkOptions, LinkedWriter, OffsetEncoding};
use crate::binary::read::{ReadBinaryDep, ReadCtxt, ReadScope};
use crate::binary::write::WriteBinary;
use crate::binary::{U16Be, U8};
use crate::error::{ParseError, WriteError};
use crate::pool::{ImmutableKey, Pool};
use crate::state_table::builder::compile;
use crate::state_table::interpreter::Interpreter;
use crate::state_table::{
    check_header, position_in, read_machine, ClassMap, Entry, EntryFlags, Generation,
    MachineError, MachineFault, MachineLayout, StateTable,
};
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryDepValidated};

const HEADER_LEN: usize = 10;
const ENTRY_LEN: usize = 4;

bitflags! {
    /// The flags word of a format 1 entry.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct KernEntryFlags: u16 {
        const PUSH = 0x8000;
        const DONT_ADVANCE = 0x4000;
        const VALUE_OFFSET = 0x3FFF;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KernFormat1Args {
    /// Values move glyphs perpendicular to the line, and 0x8000 resets the shift.
    pub cross_stream: bool,
}

/// One kerning value. Each value pops a glyph off the stack and applies to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernValue {
    /// Adjust the popped glyph by this many font units. The value must be even.
    Adjust(i16),
    /// Return the cross-stream position to the baseline at the popped glyph.
    ResetCrossStream,
}

/// The value list of an entry, applied to successive glyphs popped off the stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernValues(pub Vec<KernValue>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernFormat1 {
    pub table: StateTable<KernValues>,
}

impl KernValue {
    fn from_raw(raw: u16, cross_stream: bool) -> KernValue {
        let raw = raw & !1;
        if cross_stream && raw == 0x8000 {
            KernValue::ResetCrossStream
        } else {
            KernValue::Adjust(raw as i16)
        }
    }

    fn to_raw(self, cross_stream: bool) -> Result<u16, WriteError> {
        match self {
            // The low bit is the end of list marker
            KernValue::Adjust(value) if value & 1 != 0 => Err(WriteError::BadValue),
            KernValue::Adjust(i16::MIN) if cross_stream => Err(WriteError::BadValue),
            KernValue::Adjust(value) => Ok(value as u16),
            KernValue::ResetCrossStream if cross_stream => Ok(0x8000),
            KernValue::ResetCrossStream => Err(WriteError::BadValue),
        }
    }
}

impl KernValues {
    fn read(scope: ReadScope<'_>, cross_stream: bool) -> Result<KernValues, ParseError> {
        let mut ctxt = scope.ctxt();
        let mut values = Vec::new();
        loop {
            let raw = ctxt.read_u16be()?;
            values.push(KernValue::from_raw(raw, cross_stream));
            if raw & 1 == 1 {
                break;
            }
        }
        Ok(KernValues(values))
    }

    fn write(&self, w: &mut LinkedWriter, cross_stream: bool) -> Result<(), WriteError> {
        let last = self.0.len().checked_sub(1).ok_or(WriteError::BadValue)?;
        for (i, value) in self.0.iter().enumerate() {
            let raw = value.to_raw(cross_stream)?;
            U16Be::write(w, raw | u16::from(i == last))?;
        }
        Ok(())
    }
}

impl ImmutableKey for KernValues {
    type Key = Vec<KernValue>;

    fn immutable_key(&self) -> Vec<KernValue> {
        self.0.clone()
    }
}

fn malformed(position: usize) -> impl FnOnce(crate::binary::read::ReadEof) -> MachineError {
    move |err| MachineError::new(MachineFault::Malformed(ParseError::from(err)), position)
}

fn read_class_table(scope: ReadScope<'_>) -> Result<ClassMap, ParseError> {
    let mut ctxt = scope.ctxt();
    let first_glyph = ctxt.read_u16be()?;
    let n_glyphs = ctxt.read_u16be()?;
    ctxt.check(u32::from(first_glyph) + u32::from(n_glyphs) <= 0x10000)?;
    let classes = ctxt.read_slice(usize::from(n_glyphs))?;
    Ok((0..n_glyphs)
        .zip(classes)
        .map(|(i, &class)| (first_glyph + i, u16::from(class)))
        .collect())
}

fn read_format1(
    ctxt: &mut ReadCtxt<'_>,
    args: KernFormat1Args,
) -> Result<KernFormat1, MachineError> {
    let table = ctxt.scope();
    let start = table.base();
    let n_classes = ctxt.read_u16be().map_err(malformed(start))?;
    let mut offsets = [0; 4];
    for offset in offsets.iter_mut() {
        *offset = usize::from(ctxt.read_u16be().map_err(malformed(start))?);
    }
    let [class_table, state_array, entry_table, value_table] = offsets;
    // The value table is empty when no entry has values, so it may start at the very end.
    check_header(
        &table,
        HEADER_LEN,
        u32::from(n_classes),
        &[class_table, state_array, entry_table],
    )?;
    if value_table < HEADER_LEN || value_table > table.data().len() {
        return Err(MachineError::new(MachineFault::OffsetOutOfBounds, start));
    }

    let class_map = read_class_table(table.offset(class_table)).map_err(|err| {
        MachineError::new(MachineFault::Malformed(err), position_in(&table, class_table))
    })?;

    let layout = MachineLayout {
        generation: Generation::Compact,
        n_classes,
        state_array_offset: state_array,
        entry_table_offset: entry_table,
        entry_size: ENTRY_LEN,
    };
    let machine = read_machine(&table, &layout, |ctxt| {
        let next_state = ctxt.read_u16be()?;
        let flags = KernEntryFlags::from_bits_retain(ctxt.read_u16be()?);
        Ok((next_state, flags))
    })?;

    let mut lists: BTreeMap<u16, KernValues> = BTreeMap::new();
    let mut entries = Vec::with_capacity(machine.entries.len());
    for raw in &machine.entries {
        let mut flags = EntryFlags::empty();
        flags.set(EntryFlags::PUSH, raw.payload.contains(KernEntryFlags::PUSH));
        flags.set(
            EntryFlags::DONT_ADVANCE,
            raw.payload.contains(KernEntryFlags::DONT_ADVANCE),
        );
        let value_offset = (raw.payload & KernEntryFlags::VALUE_OFFSET).bits();
        let mut entry = Entry::new(raw.next_state).with_flags(flags);
        if value_offset != 0 {
            let values = match lists.get(&value_offset) {
                Some(values) => values.clone(),
                None => {
                    let offset = usize::from(value_offset);
                    let values = KernValues::read(table.offset(offset), args.cross_stream)
                        .map_err(|err| {
                            MachineError::new(
                                MachineFault::Malformed(err),
                                position_in(&table, offset),
                            )
                        })?;
                    lists.insert(value_offset, values.clone());
                    values
                }
            };
            entry = entry.with_action(values);
        }
        entries.push(entry);
    }

    let table = StateTable::from_parts(class_map, n_classes, machine.cells, entries)
        .map_err(|err| MachineError::new(MachineFault::Malformed(err), start))?;
    Ok(KernFormat1 { table })
}

impl ReadBinaryDep for KernFormat1 {
    type Args<'a> = KernFormat1Args;
    type HostType<'a> = KernFormat1;

    fn read_dep<'a>(
        ctxt: &mut ReadCtxt<'a>,
        args: KernFormat1Args,
    ) -> Result<KernFormat1, ParseError> {
        read_format1(ctxt, args).map_err(ParseError::from)
    }
}

impl ReadBinaryDepValidated for KernFormat1 {
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        args: KernFormat1Args,
        logger: &Logger,
    ) -> Option<KernFormat1> {
        let logger = logger.child("format1");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, HEADER_LEN) {
            return None;
        }
        match read_format1(ctxt, args) {
            Ok(kern) => Some(kern),
            Err(err) => {
                err.report(&logger);
                None
            }
        }
    }
}

impl KernFormat1 {
    /// Write the state table, class table first and the value lists last.
    pub fn write_linked(
        w: &mut LinkedWriter,
        kern: &KernFormat1,
        args: KernFormat1Args,
    ) -> Result<(), WriteError> {
        let compiled = compile(&kern.table)?;
        let start = w.stake_current();
        U16Be::write(w, compiled.n_classes)?;
        let class_table = w.new_stake();
        let state_array = w.new_stake();
        let entry_table = w.new_stake();
        let value_table = w.new_stake();
        for stake in [class_table, state_array, entry_table, value_table] {
            w.add_offset16(start, stake)?;
        }

        w.stake_current_with_value(class_table)?;
        write_class_table(w, &compiled.class_map)?;

        w.stake_current_with_value(state_array)?;
        let rows = compiled.write_rows(w, Generation::Compact)?;
        w.align(2)?;

        w.stake_current_with_value(entry_table)?;
        let mut values: Pool<Vec<KernValue>, KernValues> = Pool::new();
        for entry in &compiled.entries {
            if !(EntryFlags::PUSH | EntryFlags::DONT_ADVANCE).contains(entry.flags) {
                return Err(WriteError::BadValue);
            }
            let row = rows
                .get(usize::from(entry.next_state))
                .ok_or(WriteError::BadValue)?;
            w.add_offset16(start, *row)?;
            w.add_bits(u32::from(entry.flags.contains(EntryFlags::PUSH)), 1)?;
            w.add_bits(u32::from(entry.flags.contains(EntryFlags::DONT_ADVANCE)), 1)?;
            match &entry.action {
                // an empty list reads back as no action
                Some(list) if list.0.is_empty() => return Err(WriteError::BadValue),
                Some(list) => {
                    let stake = values.add(w, list.clone());
                    w.add_offset(
                        start,
                        stake,
                        OffsetEncoding::Bits(14),
                        LinkOptions::default(),
                    )?;
                }
                None => w.add_bits(0, 14)?,
            }
        }

        w.stake_current_with_value(value_table)?;
        values.drain(w, |w, _key, list| list.write(w, args.cross_stream))
    }
}

fn write_class_table(w: &mut LinkedWriter, class_map: &ClassMap) -> Result<(), WriteError> {
    let (first_glyph, last_glyph) = match (class_map.iter().next(), class_map.iter().last()) {
        (Some((first, _)), Some((last, _))) => (first, last),
        _ => {
            U16Be::write(w, 0u16)?;
            return U16Be::write(w, 0u16);
        }
    };
    U16Be::write(w, first_glyph)?;
    U16Be::write(
        w,
        u16::try_from(u32::from(last_glyph) - u32::from(first_glyph) + 1)?,
    )?;
    for glyph in first_glyph..=last_glyph {
        U8::write(w, u8::try_from(class_map.get(glyph))?)?;
    }
    Ok(())
}

/// Run the kerning state machine over `glyphs`, returning the adjustment for each glyph.
///
/// With `cross_stream` set the adjustments are shifts perpendicular to the line that carry
/// on to later glyphs, so a reset sets the popped glyph's adjustment to cancel the shift
/// built up before it.
pub fn apply_kerning(
    kern: &KernFormat1,
    glyphs: &[u16],
    cross_stream: bool,
) -> Result<Vec<i16>, ParseError> {
    let mut adjustments = vec![0i16; glyphs.len()];
    let mut glyphs = glyphs.to_vec();
    Interpreter::new(&kern.table).run(
        &mut glyphs,
        |_, _| false,
        |values, site| {
            for value in &values.0 {
                let pos = match site.stack.pop() {
                    Some(pos) => pos,
                    None => break,
                };
                match *value {
                    KernValue::Adjust(delta) => {
                        adjustments[pos] = adjustments[pos].saturating_add(delta)
                    }
                    KernValue::ResetCrossStream if cross_stream => {
                        let before: i32 = adjustments[..pos].iter().map(|&a| i32::from(a)).sum();
                        adjustments[pos] = (-before).clamp(-0x8000, 0x7FFF) as i16;
                    }
                    KernValue::ResetCrossStream => {}
                }
            }
            Ok(())
        },
    )?;
    Ok(adjustments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::from_hex;

    const A: u16 = 20;
    const V: u16 = 30;

    /// Pushes A and kerns it by -50 when V follows.
    fn pair_table() -> StateTable<KernValues> {
        let mut table = StateTable::new(6);
        table.class_map.insert(A, 4);
        table.class_map.insert(V, 5);
        let saw_a = table.add_state().unwrap();
        for state in [0, 1, saw_a] {
            table
                .set_entry(state, 4, Entry::new(saw_a).with_flags(EntryFlags::PUSH))
                .unwrap();
        }
        table
            .set_entry(
                saw_a,
                5,
                Entry::new(0).with_action(KernValues(vec![KernValue::Adjust(-50)])),
            )
            .unwrap();
        table
    }

    fn pair_table_data() -> Vec<u8> {
        from_hex(
            "0006 000A 0019 002C 0038
             0014 000B 0401 0101 0101 0101 0101 05
             00 0000 0002 00
             00 0000 0002 00
             00 0000 0002 01
             00
             0019 0000 0019 0038 0025 8000
             FFCF",
        )
    }

    fn write(kern: &KernFormat1, args: KernFormat1Args) -> Result<Vec<u8>, WriteError> {
        let mut w = LinkedWriter::new();
        KernFormat1::write_linked(&mut w, kern, args)?;
        w.into_bytes()
    }

    #[test]
    fn test_write_pair_table() {
        let kern = KernFormat1 {
            table: pair_table(),
        };
        let data = write(&kern, KernFormat1Args::default()).unwrap();
        assert_eq!(data, pair_table_data());
    }

    #[test]
    fn test_read_pair_table() {
        let data = pair_table_data();
        let kern = ReadScope::new(&data)
            .read_dep::<KernFormat1>(KernFormat1Args::default())
            .unwrap();
        assert_eq!(kern.table, pair_table());
    }

    #[test]
    fn test_shared_value_lists_written_once() {
        let mut table = pair_table();
        let extra = table.add_state().unwrap();
        table
            .set_entry(
                extra,
                5,
                Entry::new(1).with_action(KernValues(vec![KernValue::Adjust(-50)])),
            )
            .unwrap();
        table
            .set_entry(1, 5, Entry::new(extra).with_flags(EntryFlags::PUSH))
            .unwrap();
        let kern = KernFormat1 { table };
        let data = write(&kern, KernFormat1Args::default()).unwrap();
        // Two entries refer to the value list but it appears once, at the end.
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xCF]);
        assert_eq!(data.iter().filter(|&&b| b == 0xCF).count(), 1);
        let read = ReadScope::new(&data)
            .read_dep::<KernFormat1>(KernFormat1Args::default())
            .unwrap();
        assert_eq!(read, kern);
    }

    #[test]
    fn test_apply_kerning() {
        let kern = KernFormat1 {
            table: pair_table(),
        };
        assert_eq!(apply_kerning(&kern, &[A, V], false).unwrap(), vec![-50, 0]);
        assert_eq!(apply_kerning(&kern, &[V, A], false).unwrap(), vec![0, 0]);
        assert_eq!(
            apply_kerning(&kern, &[A, A, V, 7], false).unwrap(),
            vec![0, -50, 0, 0]
        );
    }

    #[test]
    fn test_cross_stream_values() {
        assert_eq!(
            KernValue::from_raw(0x8001, true),
            KernValue::ResetCrossStream
        );
        assert_eq!(KernValue::from_raw(0x8001, false), KernValue::Adjust(-32768));
        assert_eq!(KernValue::from_raw(0xFF39, false), KernValue::Adjust(-200));
        assert_eq!(
            KernValue::ResetCrossStream.to_raw(false),
            Err(WriteError::BadValue)
        );
        assert_eq!(KernValue::Adjust(-25).to_raw(false), Err(WriteError::BadValue));

        let mut table = pair_table();
        table.states[2].entries[5].action = Some(KernValues(vec![
            KernValue::Adjust(100),
            KernValue::ResetCrossStream,
        ]));
        let kern = KernFormat1 { table };
        let args = KernFormat1Args { cross_stream: true };
        let data = write(&kern, args).unwrap();
        assert_eq!(&data[data.len() - 4..], &[0x00, 0x64, 0x80, 0x01]);
        assert_eq!(
            ReadScope::new(&data).read_dep::<KernFormat1>(args).unwrap(),
            kern
        );
        assert_eq!(
            write(&kern, KernFormat1Args::default()),
            Err(WriteError::BadValue)
        );
    }

    #[test]
    fn test_rejects_empty_value_list() {
        let mut table = pair_table();
        table
            .set_entry(2, 5, Entry::new(0).with_action(KernValues(vec![])))
            .unwrap();
        assert_eq!(
            write(&KernFormat1 { table }, KernFormat1Args::default()),
            Err(WriteError::BadValue)
        );
    }

    #[test]
    fn test_rejects_mark_flag() {
        let mut table = pair_table();
        table.states[2].entries[4].flags = EntryFlags::MARK;
        assert_eq!(
            write(&KernFormat1 { table }, KernFormat1Args::default()),
            Err(WriteError::BadValue)
        );
    }

    #[test]
    fn test_validated_read() {
        let data = pair_table_data();
        let logger = Logger::new("kern");
        let kern = ReadScope::new(&data)
            .read_dep_validated::<KernFormat1>(KernFormat1Args::default(), &logger)
            .unwrap();
        assert_eq!(kern.table, pair_table());
        assert!(!logger.has_errors());

        let mut data = pair_table_data();
        data[1] = 3;
        let logger = Logger::new("kern");
        assert!(ReadScope::new(&data)
            .read_dep_validated::<KernFormat1>(KernFormat1Args::default(), &logger)
            .is_none());
        assert!(logger.has_code("V0634"));
        assert_eq!(
            ReadScope::new(&data).read_dep::<KernFormat1>(KernFormat1Args::default()),
            Err(ParseError::BadValue)
        );

        let mut data = pair_table_data();
        data[7] = 0x80;
        let logger = Logger::new("kern");
        assert!(ReadScope::new(&data)
            .read_dep_validated::<KernFormat1>(KernFormat1Args::default(), &logger)
            .is_none());
        assert!(logger.has_code("V0635"));

        // A cell refers to entry 5, which would run past the end of the data.
        let mut data = pair_table_data();
        data[29] = 5;
        let logger = Logger::new("kern");
        assert!(ReadScope::new(&data)
            .read_dep_validated::<KernFormat1>(KernFormat1Args::default(), &logger)
            .is_none());
        assert!(logger.has_code("V0724"));
    }
}
