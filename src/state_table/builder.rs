//! Compile a `StateTable` into the arrays its binary forms are written from.

use std::collections::BTreeMap;

use crate::binary::linked::{LinkedWriter, Stake};
use crate::binary::write::WriteBinary;
use crate::binary::{U16Be, U8};
use crate::error::WriteError;
use crate::pool::ImmutableKey;

use super::{ClassMap, Entry, Generation, StateTable};

/// Identity of an entry: next state, flag bits and action key.
pub type EntryKey<K> = (u16, u8, Option<K>);

/// A state table flattened into a state array of entry indices and a deduplicated entry
/// table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledTable<A> {
    pub n_classes: u16,
    pub class_map: ClassMap,
    /// Distinct entries in ascending key order.
    pub entries: Vec<Entry<A>>,
    /// Entry index for each (state, class).
    pub cells: Vec<Vec<u16>>,
    pub state_names: Vec<String>,
}

/// Compile `table`. The same table always compiles to the same arrays.
pub fn compile<A>(table: &StateTable<A>) -> Result<CompiledTable<A>, WriteError>
where
    A: ImmutableKey + Clone,
{
    table.check().map_err(|_| WriteError::BadValue)?;

    let mut pool: BTreeMap<EntryKey<A::Key>, Entry<A>> = BTreeMap::new();
    for entry in table.states.iter().flat_map(|row| row.entries.iter()) {
        pool.entry(entry_key(entry))
            .or_insert_with(|| entry.clone());
    }
    let pooled = pool.into_iter().collect::<Vec<_>>();

    let cells = table
        .states
        .iter()
        .map(|row| {
            row.entries
                .iter()
                .map(|entry| {
                    let key = entry_key(entry);
                    let index = pooled
                        .binary_search_by(|(probe, _)| probe.cmp(&key))
                        .map_err(|_| WriteError::BadValue)?;
                    Ok(u16::try_from(index)?)
                })
                .collect::<Result<Vec<_>, WriteError>>()
        })
        .collect::<Result<Vec<_>, WriteError>>()?;

    Ok(CompiledTable {
        n_classes: table.n_classes,
        class_map: table.class_map.clone(),
        entries: pooled.into_iter().map(|(_, entry)| entry).collect(),
        cells,
        state_names: table.states.iter().map(|row| row.name.clone()).collect(),
    })
}

fn entry_key<A: ImmutableKey>(entry: &Entry<A>) -> EntryKey<A::Key> {
    (
        entry.next_state,
        entry.flags.bits(),
        entry.action.as_ref().map(ImmutableKey::immutable_key),
    )
}

impl<A> CompiledTable<A> {
    pub fn n_states(&self) -> usize {
        self.cells.len()
    }

    /// Write the state array, returning a stake bound to the start of each row.
    ///
    /// Compact cells are a byte each, so at most 256 distinct entries can be written.
    pub fn write_rows(
        &self,
        w: &mut LinkedWriter,
        generation: Generation,
    ) -> Result<Vec<Stake>, WriteError> {
        let mut rows = Vec::with_capacity(self.cells.len());
        for row in &self.cells {
            rows.push(w.stake_current());
            for &cell in row {
                match generation {
                    Generation::Compact => U8::write(w, u8::try_from(cell)?)?,
                    Generation::Extended => U16Be::write(w, cell)?,
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_table::EntryFlags;

    #[derive(Clone, Debug, PartialEq)]
    struct Shift(i16);

    impl ImmutableKey for Shift {
        type Key = i16;

        fn immutable_key(&self) -> i16 {
            self.0
        }
    }

    fn sample() -> StateTable<Shift> {
        let mut table = StateTable::new(5);
        table.class_map.insert(20, 4);
        let saw = table.add_state().unwrap();
        table
            .set_entry(0, 4, Entry::new(saw).with_flags(EntryFlags::MARK))
            .unwrap();
        table
            .set_entry(1, 4, Entry::new(saw).with_flags(EntryFlags::MARK))
            .unwrap();
        table
            .set_entry(saw, 4, Entry::new(0).with_action(Shift(-25)))
            .unwrap();
        table
    }

    #[test]
    fn test_entries_shared_and_sorted() {
        let compiled = compile(&sample()).unwrap();
        // The default entry (0, no flags, no action) sorts first.
        assert_eq!(compiled.entries.len(), 3);
        assert_eq!(compiled.entries[0], Entry::new(0));
        assert_eq!(compiled.entries[1].action, Some(Shift(-25)));
        assert_eq!(compiled.cells[0], vec![0, 0, 0, 0, 2]);
        assert_eq!(compiled.cells[1], compiled.cells[0]);
        assert_eq!(compiled.cells[2], vec![0, 0, 0, 0, 1]);
        assert_eq!(compiled.state_names[2], "State 2");
    }

    #[test]
    fn test_compile_then_rebuild() {
        let table = sample();
        let compiled = compile(&table).unwrap();
        let rebuilt = StateTable::from_parts(
            compiled.class_map,
            compiled.n_classes,
            compiled.cells,
            compiled.entries,
        )
        .unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn test_compile_rejects_invalid_table() {
        let mut table = sample();
        table.states[2].entries.pop();
        assert_eq!(compile(&table), Err(WriteError::BadValue));
    }

    #[test]
    fn test_write_rows() {
        let compiled = compile(&sample()).unwrap();
        let mut w = LinkedWriter::new();
        let rows = compiled.write_rows(&mut w, Generation::Compact).unwrap();
        assert_eq!(rows.len(), 3);
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes, [0, 0, 0, 0, 2, 0, 0, 0, 0, 2, 0, 0, 0, 0, 1]);

        let mut w = LinkedWriter::new();
        compiled.write_rows(&mut w, Generation::Extended).unwrap();
        assert_eq!(w.into_bytes().unwrap().len(), 30);
    }
}
