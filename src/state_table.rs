//! Finite state machines shared by the AAT `kern`, `mort`, `morx` and `kerx` tables.
//!
//! A state table maps each glyph to a class, and each (state, class) cell to an [`Entry`]
//! giving the next state, some flags and an optional action. The two binary generations
//! differ only in field widths and in how the next state is stored, so tables are held in one
//! owned form, [`StateTable`], and converted by the codecs in `tables`.
//!
//! <https://developer.apple.com/fonts/TrueType-Reference-Manual/RM06/Chap6Tables.html>

pub mod analyzer;
pub mod builder;
pub mod interpreter;

use std::collections::BTreeMap;
use std::iter::FromIterator;

use bitflags::bitflags;

use crate::binary::read::{ReadCtxt, ReadScope};
use crate::binary::U16Be;
use crate::error::ParseError;
use crate::validate::{Arg, Logger};

/// End of text.
///
/// Never appears in a class table. It is used once after the last glyph has been processed.
pub const CLASS_END_OF_TEXT: u16 = 0;

/// Out of bounds.
///
/// Any glyph the class table does not mention is assigned this class.
pub const CLASS_OUT_OF_BOUNDS: u16 = 1;

/// Deleted glyph.
///
/// Contextual processing deletes a glyph by replacing it with [`DELETED_GLYPH`], which always
/// gets this class.
pub const CLASS_DELETED_GLYPH: u16 = 2;

/// End of line.
pub const CLASS_END_OF_LINE: u16 = 3;

/// The first class available for real glyphs.
pub const FIRST_GLYPH_CLASS: u16 = 4;

pub const STATE_START_OF_TEXT: u16 = 0;
pub const STATE_START_OF_LINE: u16 = 1;

pub const DELETED_GLYPH: u16 = 0xFFFF;

bitflags! {
    /// Generic transition flags. Each format maps its own wire flags onto these.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EntryFlags: u8 {
        /// Push the current glyph position on the stack before the action runs.
        const PUSH = 0x01;
        /// Make the current glyph the marked glyph after the action runs.
        const MARK = 0x02;
        /// Stay on the current glyph for the next transition.
        const DONT_ADVANCE = 0x04;
        /// Forget the mark and empty the stack.
        const RESET = 0x08;
    }
}

/// The two binary layouts of a state table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Generation {
    /// `kern` and `mort`: 8-bit classes and cells, 16-bit offsets, and the next state stored
    /// as a byte offset to its row.
    Compact,
    /// `kerx` and `morx`: lookup table classes, 16-bit cells, 32-bit offsets, and the next
    /// state stored as a row index.
    Extended,
}

/// Glyph to class mapping.
///
/// Class 1 is never stored. Looking up a glyph that is not present gives class 1, and the
/// deleted glyph always gives class 2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassMap {
    classes: BTreeMap<u16, u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<A> {
    pub next_state: u16,
    pub flags: EntryFlags,
    pub action: Option<A>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRow<A> {
    pub name: String,
    pub entries: Vec<Entry<A>>,
}

/// An owned state table with actions of type `A`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateTable<A> {
    pub class_map: ClassMap,
    pub n_classes: u16,
    pub states: Vec<StateRow<A>>,
}

impl Generation {
    /// Size in bytes of one state array cell.
    pub fn cell_size(self) -> usize {
        match self {
            Generation::Compact => 1,
            Generation::Extended => 2,
        }
    }
}

impl ClassMap {
    pub fn new() -> Self {
        ClassMap::default()
    }

    pub fn get(&self, glyph: u16) -> u16 {
        if glyph == DELETED_GLYPH {
            CLASS_DELETED_GLYPH
        } else {
            self.classes
                .get(&glyph)
                .copied()
                .unwrap_or(CLASS_OUT_OF_BOUNDS)
        }
    }

    /// Assign `class` to `glyph`. Assigning class 1 removes the glyph.
    pub fn insert(&mut self, glyph: u16, class: u16) {
        if class == CLASS_OUT_OF_BOUNDS {
            self.classes.remove(&glyph);
        } else {
            self.classes.insert(glyph, class);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.classes.iter().map(|(&glyph, &class)| (glyph, class))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The glyphs in each class.
    pub fn glyphs_by_class(&self) -> BTreeMap<u16, Vec<u16>> {
        let mut by_class: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
        for (glyph, class) in self.iter() {
            by_class.entry(class).or_default().push(glyph);
        }
        by_class
    }
}

impl FromIterator<(u16, u16)> for ClassMap {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        let mut map = ClassMap::new();
        for (glyph, class) in iter {
            map.insert(glyph, class);
        }
        map
    }
}

impl<A> Entry<A> {
    pub fn new(next_state: u16) -> Self {
        Entry {
            next_state,
            flags: EntryFlags::empty(),
            action: None,
        }
    }

    pub fn with_flags(self, flags: EntryFlags) -> Self {
        Entry { flags, ..self }
    }

    pub fn with_action(self, action: A) -> Self {
        Entry {
            action: Some(action),
            ..self
        }
    }
}

impl<A> Default for Entry<A> {
    fn default() -> Self {
        Entry::new(STATE_START_OF_TEXT)
    }
}

impl<A> StateRow<A> {
    fn empty(name: String, n_classes: u16) -> Self {
        StateRow {
            name,
            entries: (0..n_classes).map(|_| Entry::default()).collect(),
        }
    }
}

impl<A> StateTable<A> {
    /// A table with the two fixed states, every cell going back to the start of text.
    pub fn new(n_classes: u16) -> Self {
        StateTable {
            class_map: ClassMap::new(),
            n_classes,
            states: vec![
                StateRow::empty(state_name(0), n_classes),
                StateRow::empty(state_name(1), n_classes),
            ],
        }
    }

    /// Append a state with every cell going back to the start of text. Returns its index.
    ///
    /// State names are not stored in the binary forms, so a read table names its states
    /// "State 2", "State 3" and so on, as this does.
    pub fn add_state(&mut self) -> Result<u16, ParseError> {
        let index = u16::try_from(self.states.len())?;
        self.states
            .push(StateRow::empty(state_name(self.states.len()), self.n_classes));
        Ok(index)
    }

    pub fn set_entry(&mut self, state: u16, class: u16, entry: Entry<A>) -> Result<(), ParseError> {
        let cell = self
            .states
            .get_mut(usize::from(state))
            .and_then(|row| row.entries.get_mut(usize::from(class)))
            .ok_or(ParseError::BadIndex)?;
        *cell = entry;
        Ok(())
    }

    pub fn entry(&self, state: u16, class: u16) -> Option<&Entry<A>> {
        self.states
            .get(usize::from(state))
            .and_then(|row| row.entries.get(usize::from(class)))
    }

    /// The class used for `glyph`. Classes the table has no column for are out of bounds.
    pub fn class_of(&self, glyph: u16) -> u16 {
        let class = self.class_map.get(glyph);
        if class < self.n_classes {
            class
        } else {
            CLASS_OUT_OF_BOUNDS
        }
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// Check the structural invariants of the table.
    pub fn check(&self) -> Result<(), ParseError> {
        if self.n_classes < FIRST_GLYPH_CLASS || self.states.len() < 2 {
            return Err(ParseError::BadValue);
        }
        for row in &self.states {
            if row.entries.len() != usize::from(self.n_classes) {
                return Err(ParseError::BadValue);
            }
            if row
                .entries
                .iter()
                .any(|entry| usize::from(entry.next_state) >= self.states.len())
            {
                return Err(ParseError::BadIndex);
            }
        }
        for (glyph, class) in self.class_map.iter() {
            if glyph == DELETED_GLYPH || class < FIRST_GLYPH_CLASS || class >= self.n_classes {
                return Err(ParseError::BadValue);
            }
        }
        Ok(())
    }
}

impl<A: Clone> StateTable<A> {
    /// Build a table from a state array of entry indices and the entries they refer to.
    pub fn from_parts(
        class_map: ClassMap,
        n_classes: u16,
        cells: Vec<Vec<u16>>,
        entries: Vec<Entry<A>>,
    ) -> Result<Self, ParseError> {
        let states = cells
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let entries = row
                    .into_iter()
                    .map(|cell| entries.get(usize::from(cell)).cloned())
                    .collect::<Option<Vec<_>>>()
                    .ok_or(ParseError::BadIndex)?;
                Ok(StateRow {
                    name: state_name(index),
                    entries,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;
        let table = StateTable {
            class_map,
            n_classes,
            states,
        };
        table.check()?;
        Ok(table)
    }
}

fn state_name(index: usize) -> String {
    match index {
        0 => String::from("Start of text"),
        1 => String::from("Start of line"),
        _ => format!("State {}", index),
    }
}

/// Problems found while reading the state array and entry table of a state table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MachineFault {
    TooFewClasses(u32),
    OffsetOutOfBounds,
    EntryTableMissing,
    TooFewStates,
    StateArrayIncomplete,
    EntryIndexOutOfRange,
    UndefinedState(u32),
    SubstitutionTableMissing,
    Malformed(ParseError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MachineError {
    pub fault: MachineFault,
    /// Absolute position the problem was found at.
    pub position: usize,
}

/// Where the parts of a state table are, relative to the start of the table.
pub(crate) struct MachineLayout {
    pub generation: Generation,
    pub n_classes: u16,
    pub state_array_offset: usize,
    pub entry_table_offset: usize,
    pub entry_size: usize,
}

pub(crate) struct RawEntry<E> {
    /// Row index of the next state.
    pub next_state: u16,
    pub payload: E,
}

/// A state array and the entries it uses, before format specific decoding.
pub(crate) struct RawMachine<E> {
    pub cells: Vec<Vec<u16>>,
    pub entries: Vec<RawEntry<E>>,
}

impl MachineFault {
    fn code(&self) -> &'static str {
        match self {
            MachineFault::TooFewClasses(_) => "V0634",
            MachineFault::OffsetOutOfBounds => "V0635",
            MachineFault::EntryTableMissing => "V0636",
            MachineFault::TooFewStates => "V0725",
            MachineFault::StateArrayIncomplete => "V0676",
            MachineFault::EntryIndexOutOfRange => "V0724",
            MachineFault::UndefinedState(_) => "V0677",
            MachineFault::SubstitutionTableMissing => "V0728",
            MachineFault::Malformed(_) => "V0001",
        }
    }
}

impl MachineError {
    pub(crate) fn new(fault: MachineFault, position: usize) -> Self {
        MachineError { fault, position }
    }

    /// Report this problem as an error diagnostic.
    pub(crate) fn report(&self, logger: &Logger) {
        let (template, args): (&'static str, Vec<Arg>) = match &self.fault {
            MachineFault::TooFewClasses(n) => (
                "The number of classes in a state table must be at least four, but is only {}.",
                vec![Arg::from(*n)],
            ),
            MachineFault::OffsetOutOfBounds => (
                "One or more offsets to state table components are outside the bounds of the \
                 state table itself.",
                Vec::new(),
            ),
            MachineFault::EntryTableMissing => {
                ("The entry table is missing or incomplete.", Vec::new())
            }
            MachineFault::TooFewStates => (
                "The number of states in the state table is less than two. The two fixed \
                 states must always be present.",
                Vec::new(),
            ),
            MachineFault::StateArrayIncomplete => {
                ("The state array is missing or incomplete.", Vec::new())
            }
            MachineFault::EntryIndexOutOfRange => (
                "At least one state array cell contains an entry index that is out of range.",
                Vec::new(),
            ),
            MachineFault::UndefinedState(raw) => (
                "This state is referred to but undefined: {}",
                vec![Arg::from(*raw)],
            ),
            MachineFault::SubstitutionTableMissing => (
                "The offset header to the per-glyph lookup tables is missing or incomplete.",
                Vec::new(),
            ),
            MachineFault::Malformed(err) => (
                "Unable to read structure: {}.",
                vec![Arg::from(err.to_string())],
            ),
        };
        logger.error_at(self.position, self.fault.code(), template, args);
    }
}

impl From<MachineError> for ParseError {
    fn from(error: MachineError) -> Self {
        match error.fault {
            MachineFault::TooFewClasses(_) | MachineFault::TooFewStates => ParseError::BadValue,
            MachineFault::OffsetOutOfBounds => ParseError::BadOffset,
            MachineFault::EntryTableMissing
            | MachineFault::StateArrayIncomplete
            | MachineFault::SubstitutionTableMissing => ParseError::BadEof,
            MachineFault::EntryIndexOutOfRange | MachineFault::UndefinedState(_) => {
                ParseError::BadIndex
            }
            MachineFault::Malformed(err) => err,
        }
    }
}

/// Absolute position of `offset` within `table`, limited to the end of the data.
pub(crate) fn position_in(table: &ReadScope<'_>, offset: usize) -> usize {
    table.base() + offset.min(table.data().len())
}

/// Check the class count and that every component offset lands inside the table after its
/// header.
pub(crate) fn check_header(
    table: &ReadScope<'_>,
    header_len: usize,
    n_classes: u32,
    offsets: &[usize],
) -> Result<(), MachineError> {
    if n_classes < u32::from(FIRST_GLYPH_CLASS) {
        return Err(MachineError::new(
            MachineFault::TooFewClasses(n_classes),
            table.base(),
        ));
    }
    let len = table.data().len();
    if offsets
        .iter()
        .any(|&offset| offset < header_len || offset >= len)
    {
        return Err(MachineError::new(
            MachineFault::OffsetOutOfBounds,
            table.base(),
        ));
    }
    Ok(())
}

/// Read the state array and entry table of a state table.
///
/// The number of states is not stored anywhere. Rows are read for the two fixed states, for
/// any rows that fit between the state array and an entry table that directly follows it, and
/// then for every state an entry refers to, until no new states are found.
///
/// `read_entry` reads one entry, returning the next state as stored and the format specific
/// payload.
pub(crate) fn read_machine<'a, E, F>(
    table: &ReadScope<'a>,
    layout: &MachineLayout,
    mut read_entry: F,
) -> Result<RawMachine<E>, MachineError>
where
    F: FnMut(&mut ReadCtxt<'a>) -> Result<(u16, E), ParseError>,
{
    let row_size = usize::from(layout.n_classes) * layout.generation.cell_size();
    let gap_rows = layout
        .entry_table_offset
        .checked_sub(layout.state_array_offset)
        .map_or(0, |gap| gap / row_size);
    let mut n_states = gap_rows.max(2);
    let mut cells: Vec<Vec<u16>> = Vec::new();
    let mut entries: Vec<RawEntry<E>> = Vec::new();

    loop {
        while cells.len() < n_states {
            let row_start = layout.state_array_offset + cells.len() * row_size;
            let row = read_row(table.offset(row_start).ctxt(), layout).map_err(|_| {
                let fault = if cells.len() < 2 {
                    MachineFault::TooFewStates
                } else {
                    MachineFault::StateArrayIncomplete
                };
                MachineError::new(fault, position_in(table, row_start))
            })?;
            cells.push(row);
        }

        let n_entries = cells
            .iter()
            .flatten()
            .map(|&cell| usize::from(cell) + 1)
            .max()
            .unwrap_or(0);
        while entries.len() < n_entries {
            let entry_start = layout.entry_table_offset + entries.len() * layout.entry_size;
            let position = position_in(table, entry_start);
            let mut ctxt = table.offset(entry_start).ctxt();
            let (raw_next_state, payload) = match read_entry(&mut ctxt) {
                Ok(entry) => entry,
                Err(ParseError::BadEof) if entries.is_empty() => {
                    return Err(MachineError::new(
                        MachineFault::EntryTableMissing,
                        position,
                    ))
                }
                Err(ParseError::BadEof) => {
                    return Err(MachineError::new(
                        MachineFault::EntryIndexOutOfRange,
                        position,
                    ))
                }
                Err(err) => {
                    return Err(MachineError::new(MachineFault::Malformed(err), position))
                }
            };
            let next_state = next_state_row(layout, raw_next_state)
                .ok_or_else(|| {
                    MachineError::new(
                        MachineFault::UndefinedState(u32::from(raw_next_state)),
                        position,
                    )
                })?;
            n_states = n_states.max(usize::from(next_state) + 1);
            entries.push(RawEntry {
                next_state,
                payload,
            });
        }

        if cells.len() >= n_states {
            break;
        }
    }

    Ok(RawMachine { cells, entries })
}

fn read_row(mut ctxt: ReadCtxt<'_>, layout: &MachineLayout) -> Result<Vec<u16>, ParseError> {
    let n_classes = usize::from(layout.n_classes);
    match layout.generation {
        Generation::Compact => Ok(ctxt
            .read_slice(n_classes)?
            .iter()
            .map(|&cell| u16::from(cell))
            .collect()),
        Generation::Extended => Ok(ctxt.read_array::<U16Be>(n_classes)?.to_vec()),
    }
}

fn next_state_row(layout: &MachineLayout, raw: u16) -> Option<u16> {
    match layout.generation {
        Generation::Extended => Some(raw),
        Generation::Compact => {
            let row_size = usize::from(layout.n_classes);
            let from_array = usize::from(raw).checked_sub(layout.state_array_offset)?;
            if from_array % row_size != 0 {
                return None;
            }
            u16::try_from(from_array / row_size).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_map_defaults() {
        let mut map: ClassMap = vec![(10, 4), (11, 5)].into_iter().collect();
        assert_eq!(map.get(10), 4);
        assert_eq!(map.get(12), CLASS_OUT_OF_BOUNDS);
        assert_eq!(map.get(DELETED_GLYPH), CLASS_DELETED_GLYPH);
        map.insert(11, CLASS_OUT_OF_BOUNDS);
        assert_eq!(map.len(), 1);
        assert_eq!(map.glyphs_by_class().get(&4), Some(&vec![10]));
    }

    #[test]
    fn test_new_table_has_fixed_states() {
        let table = StateTable::<()>::new(5);
        assert_eq!(table.n_states(), 2);
        assert_eq!(table.states[0].name, "Start of text");
        assert_eq!(table.states[1].name, "Start of line");
        assert!(table.check().is_ok());
    }

    #[test]
    fn test_check_rejects_bad_tables() {
        let table = StateTable::<()>::new(3);
        assert_eq!(table.check(), Err(ParseError::BadValue));

        let mut table = StateTable::<()>::new(4);
        table.set_entry(1, 2, Entry::new(7)).unwrap();
        assert_eq!(table.check(), Err(ParseError::BadIndex));

        let mut table = StateTable::<()>::new(4);
        table.class_map.insert(3, 4);
        assert_eq!(table.check(), Err(ParseError::BadValue));

        assert_eq!(
            StateTable::<()>::new(4).set_entry(2, 0, Entry::new(0)),
            Err(ParseError::BadIndex)
        );
    }

    #[test]
    fn test_class_of_unknown_column() {
        let mut table = StateTable::<()>::new(5);
        table.class_map.insert(20, 4);
        table.class_map.insert(21, 9);
        assert_eq!(table.class_of(20), 4);
        assert_eq!(table.class_of(21), CLASS_OUT_OF_BOUNDS);
    }

    #[test]
    fn test_from_parts() {
        let entries = vec![Entry::new(0), Entry::new(2).with_action('x')];
        let cells = vec![vec![0, 0, 0, 0, 1], vec![0; 5], vec![0, 0, 0, 0, 1]];
        let table = StateTable::from_parts(ClassMap::new(), 5, cells, entries).unwrap();
        assert_eq!(table.n_states(), 3);
        assert_eq!(table.states[2].name, "State 2");
        assert_eq!(table.entry(2, 4).and_then(|e| e.action), Some('x'));

        let result = StateTable::<char>::from_parts(
            ClassMap::new(),
            4,
            vec![vec![0, 0, 0, 3]; 2],
            vec![Entry::new(0)],
        );
        assert_eq!(result, Err(ParseError::BadIndex));
    }

    fn compact_layout() -> MachineLayout {
        MachineLayout {
            generation: Generation::Compact,
            n_classes: 4,
            state_array_offset: 2,
            entry_table_offset: 10,
            entry_size: 2,
        }
    }

    fn read_compact_entry(ctxt: &mut ReadCtxt<'_>) -> Result<(u16, u8), ParseError> {
        Ok((u16::from(ctxt.read_u8()?), ctxt.read_u8()?))
    }

    #[test]
    fn test_read_machine_discovers_states() {
        // Two rows sit before the entry table and two more are only found through entry 1.
        #[rustfmt::skip]
        let data = [
            0, 0,
            0, 0, 0, 1,
            0, 0, 0, 0,
            0, 0, 0, 1,
            0, 0, 0, 0,
            // entry table
            2, 0,
            10, 7,
        ];
        let layout = MachineLayout {
            entry_table_offset: 18,
            ..compact_layout()
        };
        let machine = read_machine(&ReadScope::new(&data), &layout, read_compact_entry)
            .ok()
            .unwrap();
        assert_eq!(machine.cells.len(), 4);
        assert_eq!(machine.entries.len(), 2);
        assert_eq!(machine.entries[1].next_state, 2);
        assert_eq!(machine.entries[1].payload, 7);
    }

    #[test]
    fn test_read_machine_faults() {
        // A cell refers to entry 5 but the data ends after entry 1.
        #[rustfmt::skip]
        let data = [
            0, 0,
            0, 0, 0, 5,
            0, 0, 0, 0,
            2, 0,
            2, 0,
        ];
        let err = read_machine(&ReadScope::new(&data), &compact_layout(), read_compact_entry)
            .err()
            .unwrap();
        assert_eq!(err.fault, MachineFault::EntryIndexOutOfRange);
        assert_eq!(err.position, 14);

        let data = [0, 0, 0, 0, 0, 0];
        let layout = MachineLayout {
            entry_table_offset: 2,
            ..compact_layout()
        };
        let err = read_machine(&ReadScope::new(&data), &layout, read_compact_entry)
            .err()
            .unwrap();
        assert_eq!(err.fault, MachineFault::TooFewStates);
        assert!(err.position <= data.len());

        // Next state 3 is not on a row boundary.
        #[rustfmt::skip]
        let data = [
            0, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
            3, 0,
        ];
        let err = read_machine(&ReadScope::new(&data), &compact_layout(), read_compact_entry)
            .err()
            .unwrap();
        assert_eq!(err.fault, MachineFault::UndefinedState(3));
        assert_eq!(ParseError::from(err), ParseError::BadIndex);

        let logger = Logger::new("kern");
        MachineError::new(MachineFault::TooFewClasses(3), 0).report(&logger);
        assert!(logger.has_code("V0634"));
        assert!(logger.has_errors());
    }

    #[test]
    fn test_check_header() {
        let data = [0u8; 20];
        let scope = ReadScope::new(&data);
        assert!(check_header(&scope, 10, 4, &[10, 12, 19]).is_ok());
        assert_eq!(
            check_header(&scope, 10, 3, &[10]).err().map(|e| e.fault),
            Some(MachineFault::TooFewClasses(3))
        );
        assert_eq!(
            check_header(&scope, 10, 4, &[10, 20]).err().map(|e| e.fault),
            Some(MachineFault::OffsetOutOfBounds)
        );
    }
}
