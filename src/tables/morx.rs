//! `morx` contextual glyph substitution subtables.
//!
//! Only the body of a type 1 subtable is handled here, starting at the extended state table
//! header. Chains, features and the other subtable types are out of scope.
//!
//! <https://developer.apple.com/fonts/TrueType-Reference-Manual/RM06/Chap6morx.html>

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::binary::linked::LinkedWriter;
use crate::binary::read::{ReadBinaryDep, ReadCtxt, ReadEof};
use crate::binary::write::WriteBinary;
use crate::binary::{U16Be, U32Be};
use crate::error::{ParseError, WriteError};
use crate::pool::{ImmutableKey, Pool};
use crate::state_table::analyzer::{analyze, Analysis, SubstitutionAction};
use crate::state_table::builder::compile;
use crate::state_table::{
    check_header, position_in, read_machine, Entry, EntryFlags, Generation, MachineError,
    MachineFault, MachineLayout, StateTable,
};
use crate::tables::aat::Lookup;
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryDepValidated};

const HEADER_LEN: usize = 20;
const ENTRY_LEN: usize = 8;
/// Lookup index meaning no substitution.
const NO_LOOKUP: u16 = 0xFFFF;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ContextualEntryFlags: u16 {
        const SET_MARK = 0x8000;
        const DONT_ADVANCE = 0x4000;
    }
}

/// Substitutions made by an entry: one for the marked glyph and one for the current glyph.
///
/// A glyph that is not in the map is left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextualAction {
    pub mark: Option<BTreeMap<u16, u16>>,
    pub current: Option<BTreeMap<u16, u16>>,
}

type SubstitutionKey = Vec<(u16, u16)>;

/// A contextual substitution subtable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextualSubtable {
    pub table: StateTable<ContextualAction>,
}

struct RawContextualEntry {
    flags: ContextualEntryFlags,
    mark_index: u16,
    current_index: u16,
}

fn substitution_key(map: &BTreeMap<u16, u16>) -> SubstitutionKey {
    map.iter().map(|(&from, &to)| (from, to)).collect()
}

impl ImmutableKey for ContextualAction {
    type Key = (Option<SubstitutionKey>, Option<SubstitutionKey>);

    fn immutable_key(&self) -> Self::Key {
        (
            self.mark.as_ref().map(substitution_key),
            self.current.as_ref().map(substitution_key),
        )
    }
}

impl SubstitutionAction for ContextualAction {
    fn mark_substitution(&self) -> Option<&BTreeMap<u16, u16>> {
        self.mark.as_ref()
    }

    fn current_substitution(&self) -> Option<&BTreeMap<u16, u16>> {
        self.current.as_ref()
    }
}

fn malformed(position: usize) -> impl Fn(ReadEof) -> MachineError {
    move |err| MachineError::new(MachineFault::Malformed(ParseError::from(err)), position)
}

fn read_contextual(
    ctxt: &mut ReadCtxt<'_>,
    n_glyphs: u16,
) -> Result<ContextualSubtable, MachineError> {
    let table = ctxt.scope();
    let start = table.base();
    let n_classes = ctxt.read_u32be().map_err(malformed(start))?;
    let mut offsets = [0; 4];
    for offset in offsets.iter_mut() {
        *offset = usize::try_from(ctxt.read_u32be().map_err(malformed(start))?)
            .map_err(|_| MachineError::new(MachineFault::OffsetOutOfBounds, start))?;
    }
    let [class_table, state_array, entry_table, substitution_table] = offsets;
    check_header(
        &table,
        HEADER_LEN,
        n_classes,
        &[class_table, state_array, entry_table],
    )?;
    // With no substitutions the substitution table is empty and may start at the very end.
    if substitution_table < HEADER_LEN || substitution_table > table.data().len() {
        return Err(MachineError::new(MachineFault::OffsetOutOfBounds, start));
    }
    let n_classes = u16::try_from(n_classes).map_err(|_| {
        MachineError::new(MachineFault::Malformed(ParseError::LimitExceeded), start)
    })?;

    let class_map = table
        .offset(class_table)
        .read_dep::<Lookup>(n_glyphs)
        .map_err(|err| {
            MachineError::new(MachineFault::Malformed(err), position_in(&table, class_table))
        })?
        .to_class_map();

    let layout = MachineLayout {
        generation: Generation::Extended,
        n_classes,
        state_array_offset: state_array,
        entry_table_offset: entry_table,
        entry_size: ENTRY_LEN,
    };
    let machine = read_machine(&table, &layout, |ctxt| {
        let next_state = ctxt.read_u16be()?;
        let flags = ContextualEntryFlags::from_bits_truncate(ctxt.read_u16be()?);
        let mark_index = ctxt.read_u16be()?;
        let current_index = ctxt.read_u16be()?;
        Ok((
            next_state,
            RawContextualEntry {
                flags,
                mark_index,
                current_index,
            },
        ))
    })?;

    // The number of lookups isn't stored, so read as many as the entries refer to.
    let n_lookups = machine
        .entries
        .iter()
        .flat_map(|raw| [raw.payload.mark_index, raw.payload.current_index])
        .filter(|&index| index != NO_LOOKUP)
        .map(|index| usize::from(index) + 1)
        .max()
        .unwrap_or(0);
    let substitutions = table.offset(substitution_table);
    let lookup_offsets = substitutions
        .ctxt()
        .read_array::<U32Be>(n_lookups)
        .map_err(|_| {
            MachineError::new(
                MachineFault::SubstitutionTableMissing,
                position_in(&table, substitution_table),
            )
        })?;
    let mut lookups = Vec::with_capacity(n_lookups);
    for offset in lookup_offsets.iter() {
        let offset = usize::try_from(offset).map_err(|_| {
            MachineError::new(MachineFault::OffsetOutOfBounds, substitutions.base())
        })?;
        let lookup = substitutions
            .offset(offset)
            .read_dep::<Lookup>(n_glyphs)
            .map_err(|err| {
                MachineError::new(
                    MachineFault::Malformed(err),
                    position_in(&table, substitution_table.saturating_add(offset)),
                )
            })?;
        lookups.push(lookup.map);
    }

    // NO_LOOKUP is never below n_lookups
    let lookup = |index: u16| lookups.get(usize::from(index)).cloned();
    let entries = machine
        .entries
        .iter()
        .map(|raw| {
            let mut flags = EntryFlags::empty();
            flags.set(
                EntryFlags::MARK,
                raw.payload.flags.contains(ContextualEntryFlags::SET_MARK),
            );
            flags.set(
                EntryFlags::DONT_ADVANCE,
                raw.payload.flags.contains(ContextualEntryFlags::DONT_ADVANCE),
            );
            let entry = Entry::new(raw.next_state).with_flags(flags);
            let action = ContextualAction {
                mark: lookup(raw.payload.mark_index),
                current: lookup(raw.payload.current_index),
            };
            if action.mark.is_none() && action.current.is_none() {
                entry
            } else {
                entry.with_action(action)
            }
        })
        .collect::<Vec<_>>();

    let table = StateTable::from_parts(class_map, n_classes, machine.cells, entries)
        .map_err(|err| MachineError::new(MachineFault::Malformed(err), start))?;
    Ok(ContextualSubtable { table })
}

impl ReadBinaryDep for ContextualSubtable {
    type Args<'a> = u16;
    type HostType<'a> = ContextualSubtable;

    /// Read the subtable. `n_glyphs` is the number of glyphs in the font.
    fn read_dep<'a>(
        ctxt: &mut ReadCtxt<'a>,
        n_glyphs: u16,
    ) -> Result<ContextualSubtable, ParseError> {
        read_contextual(ctxt, n_glyphs).map_err(ParseError::from)
    }
}

impl ReadBinaryDepValidated for ContextualSubtable {
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        n_glyphs: u16,
        logger: &Logger,
    ) -> Option<ContextualSubtable> {
        let logger = logger.child("contextual");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, HEADER_LEN) {
            return None;
        }
        match read_contextual(ctxt, n_glyphs) {
            Ok(subtable) => Some(subtable),
            Err(err) => {
                err.report(&logger);
                None
            }
        }
    }
}

impl ContextualSubtable {
    /// Work out every substitution the subtable can make, per (state, class) cell.
    pub fn analyze(&self) -> Result<Analysis, ParseError> {
        analyze(&self.table)
    }

    /// Write the subtable: header, class lookup, state array, entry table, then the
    /// substitution lookups.
    pub fn write_linked(
        w: &mut LinkedWriter,
        subtable: &ContextualSubtable,
    ) -> Result<(), WriteError> {
        let compiled = compile(&subtable.table)?;

        // Number the distinct lookups in key order.
        let mut lookups: BTreeMap<SubstitutionKey, &BTreeMap<u16, u16>> = BTreeMap::new();
        for action in compiled.entries.iter().filter_map(|e| e.action.as_ref()) {
            for map in [&action.mark, &action.current].into_iter().flatten() {
                lookups.insert(substitution_key(map), map);
            }
        }
        let indices = lookups
            .keys()
            .enumerate()
            .map(|(index, key)| (key.clone(), index))
            .collect::<BTreeMap<_, _>>();
        let index_of = |map: &Option<BTreeMap<u16, u16>>| -> Result<u16, WriteError> {
            let map = match map {
                Some(map) => map,
                None => return Ok(NO_LOOKUP),
            };
            let index = indices
                .get(&substitution_key(map))
                .ok_or(WriteError::BadValue)?;
            match u16::try_from(*index)? {
                NO_LOOKUP => Err(WriteError::BadValue),
                index => Ok(index),
            }
        };

        let start = w.stake_current();
        U32Be::write(w, u32::from(compiled.n_classes))?;
        let class_table = w.new_stake();
        let state_array = w.new_stake();
        let entry_table = w.new_stake();
        let substitution_table = w.new_stake();
        for stake in [class_table, state_array, entry_table, substitution_table] {
            w.add_offset32(start, stake)?;
        }

        w.stake_current_with_value(class_table)?;
        Lookup::write(w, &Lookup::from(&compiled.class_map))?;

        w.stake_current_with_value(state_array)?;
        compiled.write_rows(w, Generation::Extended)?;

        w.stake_current_with_value(entry_table)?;
        for entry in &compiled.entries {
            if !(EntryFlags::MARK | EntryFlags::DONT_ADVANCE).contains(entry.flags) {
                return Err(WriteError::BadValue);
            }
            let mut flags = ContextualEntryFlags::empty();
            flags.set(
                ContextualEntryFlags::SET_MARK,
                entry.flags.contains(EntryFlags::MARK),
            );
            flags.set(
                ContextualEntryFlags::DONT_ADVANCE,
                entry.flags.contains(EntryFlags::DONT_ADVANCE),
            );
            let (mark_index, current_index) = match &entry.action {
                Some(action) => (index_of(&action.mark)?, index_of(&action.current)?),
                None => (NO_LOOKUP, NO_LOOKUP),
            };
            U16Be::write(w, entry.next_state)?;
            U16Be::write(w, flags.bits())?;
            U16Be::write(w, mark_index)?;
            U16Be::write(w, current_index)?;
        }

        w.stake_current_with_value(substitution_table)?;
        let mut pool: Pool<SubstitutionKey, Lookup> = Pool::new();
        for (key, map) in lookups {
            let stake = pool.stake(w, key, Lookup { map: map.clone() });
            w.add_offset32(substitution_table, stake)?;
        }
        pool.drain(w, |w, _key, lookup| Lookup::write(w, &lookup))
    }
}
