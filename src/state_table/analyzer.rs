//! Work out which substitutions a contextual state table can actually perform.
//!
//! Starting from the two fixed states with nothing marked, every reachable combination of
//! state and marked glyph set is visited once. For each cell the glyphs that can be current
//! come from the class map, and the glyphs that can be marked are carried along from the
//! transitions that led there. The result lists, per (state, class) cell, the input and output
//! glyph of each substitution the cell can make.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;

use crate::error::ParseError;

use super::{
    EntryFlags, StateTable, CLASS_DELETED_GLYPH, CLASS_END_OF_LINE, CLASS_END_OF_TEXT,
    CLASS_OUT_OF_BOUNDS, DELETED_GLYPH, FIRST_GLYPH_CLASS, STATE_START_OF_LINE,
    STATE_START_OF_TEXT,
};

/// Upper limit on (state, marked set) combinations visited before giving up.
pub const MAX_ANALYSIS_ITEMS: usize = 0x10000;

/// An action that may substitute the marked glyph, the current glyph, or both.
pub trait SubstitutionAction {
    fn mark_substitution(&self) -> Option<&BTreeMap<u16, u16>>;

    fn current_substitution(&self) -> Option<&BTreeMap<u16, u16>>;
}

/// (state, class)
pub type Cell = (u16, u16);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Substitutions made to the marked glyph by each cell.
    pub mark: BTreeMap<Cell, BTreeMap<u16, u16>>,
    /// Substitutions made to the current glyph by each cell.
    pub current: BTreeMap<Cell, BTreeMap<u16, u16>>,
}

type GlyphSet = BTreeSet<u16>;

pub fn analyze<A: SubstitutionAction>(table: &StateTable<A>) -> Result<Analysis, ParseError> {
    table.check()?;

    let mut class_glyphs: BTreeMap<u16, GlyphSet> = BTreeMap::new();
    for (glyph, class) in table.class_map.iter() {
        class_glyphs.entry(class).or_default().insert(glyph);
    }
    class_glyphs.insert(CLASS_DELETED_GLYPH, GlyphSet::from([DELETED_GLYPH]));

    let mut analysis = Analysis::default();
    let mut work = vec![
        (STATE_START_OF_LINE, GlyphSet::new()),
        (STATE_START_OF_TEXT, GlyphSet::new()),
    ];
    let mut visited: FxHashSet<(u16, GlyphSet)> = FxHashSet::default();

    while let Some((state, mark_set)) = work.pop() {
        if visited.contains(&(state, mark_set.clone())) {
            continue;
        }
        if visited.len() >= MAX_ANALYSIS_ITEMS {
            return Err(ParseError::LimitExceeded);
        }
        let row = &table.states[usize::from(state)];

        for (class, entry) in (0..table.n_classes).zip(row.entries.iter()) {
            let current_set = match class {
                CLASS_END_OF_TEXT | CLASS_OUT_OF_BOUNDS | CLASS_END_OF_LINE => GlyphSet::new(),
                _ => match class_glyphs.get(&class) {
                    Some(glyphs) => glyphs.clone(),
                    // Nothing can be in this class so the cell is unreachable.
                    None if class >= FIRST_GLYPH_CLASS => continue,
                    None => GlyphSet::new(),
                },
            };

            let (new_mark, new_current) = match &entry.action {
                Some(action) => (
                    substitute(
                        action.mark_substitution(),
                        &mark_set,
                        analysis.mark.entry((state, class)).or_default(),
                    ),
                    substitute(
                        action.current_substitution(),
                        &current_set,
                        analysis.current.entry((state, class)).or_default(),
                    ),
                ),
                None => (mark_set.clone(), current_set),
            };

            if entry.next_state > STATE_START_OF_LINE {
                let carried = if entry.flags.contains(EntryFlags::MARK) {
                    new_current
                } else {
                    new_mark
                };
                if !visited.contains(&(entry.next_state, carried.clone())) {
                    work.push((entry.next_state, carried));
                }
            }
        }

        visited.insert((state, mark_set));
    }

    analysis.mark.retain(|_, subs| !subs.is_empty());
    analysis.current.retain(|_, subs| !subs.is_empty());
    Ok(analysis)
}

/// Apply `lookup` to each glyph in `glyphs`, recording what changes in `record`.
///
/// A glyph the lookup does not mention is left as it is.
fn substitute(
    lookup: Option<&BTreeMap<u16, u16>>,
    glyphs: &GlyphSet,
    record: &mut BTreeMap<u16, u16>,
) -> GlyphSet {
    match lookup {
        Some(lookup) => glyphs
            .iter()
            .map(|glyph| match lookup.get(glyph) {
                Some(&output) => {
                    record.insert(*glyph, output);
                    output
                }
                None => *glyph,
            })
            .collect(),
        None => glyphs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_table::Entry;

    #[derive(Clone, Debug, Default)]
    struct Subst {
        mark: Option<BTreeMap<u16, u16>>,
        current: Option<BTreeMap<u16, u16>>,
    }

    impl SubstitutionAction for Subst {
        fn mark_substitution(&self) -> Option<&BTreeMap<u16, u16>> {
            self.mark.as_ref()
        }

        fn current_substitution(&self) -> Option<&BTreeMap<u16, u16>> {
            self.current.as_ref()
        }
    }

    fn map(pairs: &[(u16, u16)]) -> BTreeMap<u16, u16> {
        pairs.iter().copied().collect()
    }

    const F: u16 = 73;
    const I: u16 = 76;
    const FF: u16 = 330;

    /// f f i and f i ligatures: the first f is marked, a following f turns the mark into ff,
    /// and an i turns the mark into the ligature and deletes itself.
    fn ligature_table() -> StateTable<Subst> {
        let mut table = StateTable::new(6);
        table.class_map.insert(F, 4);
        table.class_map.insert(I, 5);
        let saw_f = table.add_state().unwrap();
        let saw_ff = table.add_state().unwrap();
        let delete = map(&[(F, DELETED_GLYPH), (I, DELETED_GLYPH)]);
        for state in [0, 1, saw_ff] {
            table
                .set_entry(state, 4, Entry::new(saw_f).with_flags(EntryFlags::MARK))
                .unwrap();
        }
        let to_ff = Subst {
            mark: Some(map(&[(F, FF)])),
            current: Some(delete.clone()),
        };
        table
            .set_entry(saw_f, 4, Entry::new(saw_ff).with_action(to_ff))
            .unwrap();
        let to_fi = Subst {
            mark: Some(map(&[(F, 192)])),
            current: Some(delete.clone()),
        };
        table
            .set_entry(saw_f, 5, Entry::new(0).with_action(to_fi))
            .unwrap();
        let to_ffi = Subst {
            mark: Some(map(&[(FF, 331)])),
            current: Some(delete),
        };
        table
            .set_entry(saw_ff, 5, Entry::new(0).with_action(to_ffi))
            .unwrap();
        table
    }

    #[test]
    fn test_ligature_analysis() {
        let analysis = analyze(&ligature_table()).unwrap();
        assert_eq!(analysis.mark.len(), 3);
        assert_eq!(analysis.mark[&(2, 4)], map(&[(F, FF)]));
        assert_eq!(analysis.mark[&(2, 5)], map(&[(F, 192)]));
        assert_eq!(analysis.mark[&(3, 5)], map(&[(FF, 331)]));
        assert_eq!(analysis.current[&(2, 4)], map(&[(F, DELETED_GLYPH)]));
        assert_eq!(analysis.current[&(3, 5)], map(&[(I, DELETED_GLYPH)]));
    }

    #[test]
    fn test_unreachable_cells_ignored() {
        let mut table = ligature_table();
        // State 3 is only reachable with ff marked, so an f -> x mark substitution there
        // never happens.
        table.states[3].entries[5].action = Some(Subst {
            mark: Some(map(&[(F, 999), (FF, 331)])),
            current: None,
        });
        let analysis = analyze(&table).unwrap();
        assert_eq!(analysis.mark[&(3, 5)], map(&[(FF, 331)]));
        assert!(!analysis.current.contains_key(&(3, 5)));
    }

    #[test]
    fn test_marked_deleted_glyph_loop_terminates() {
        // Marking the deleted glyph and staying in the same state revisits the same
        // (state, marked set) and must not recurse forever.
        let mut table: StateTable<Subst> = StateTable::new(5);
        table.class_map.insert(F, 4);
        let looping = table.add_state().unwrap();
        table
            .set_entry(0, 4, Entry::new(looping).with_flags(EntryFlags::MARK))
            .unwrap();
        table
            .set_entry(
                looping,
                CLASS_DELETED_GLYPH,
                Entry::new(looping).with_flags(EntryFlags::MARK),
            )
            .unwrap();
        table
            .set_entry(
                looping,
                4,
                Entry::new(looping).with_action(Subst {
                    mark: Some(map(&[(F, 5), (5, F)])),
                    current: None,
                }),
            )
            .unwrap();
        let analysis = analyze(&table).unwrap();
        assert_eq!(analysis.mark[&(2, 4)], map(&[(F, 5), (5, F)]));
    }
}
