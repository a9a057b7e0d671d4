//! Run a state table over a glyph sequence.

use rustc_hash::FxHashSet;

use crate::error::ParseError;

use super::{
    Entry, EntryFlags, StateTable, CLASS_END_OF_TEXT, STATE_START_OF_LINE, STATE_START_OF_TEXT,
};

pub struct Interpreter<'t, A> {
    table: &'t StateTable<A>,
}

/// What an action can see and change. All positions are indices into the full glyph sequence,
/// ignorable glyphs included.
pub struct ActionSite<'s> {
    pub glyphs: &'s mut [u16],
    /// The glyph being processed, `None` at end of text.
    pub current: Option<usize>,
    pub mark: Option<usize>,
    pub stack: &'s mut Vec<usize>,
}

/// The outcome of a successful `match_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match<A> {
    /// Number of glyphs from the start position to the last glyph consumed, ignorable glyphs
    /// included.
    pub count: usize,
    /// Actions to apply, with the position each applies to.
    pub effects: Vec<(usize, A)>,
}

struct RunState {
    state: u16,
    mark: Option<usize>,
    stack: Vec<usize>,
}

impl<'t, A> Interpreter<'t, A> {
    pub fn new(table: &'t StateTable<A>) -> Self {
        Interpreter { table }
    }

    fn entry(&self, state: u16, class: u16) -> Result<&'t Entry<A>, ParseError> {
        self.table.entry(state, class).ok_or(ParseError::BadIndex)
    }

    /// Process the whole of `glyphs`, calling `apply` for every entry with an action.
    ///
    /// Glyphs for which `ignorable` returns `true` are skipped. They keep their place in the
    /// sequence and can still be changed by actions.
    pub fn run<I, F>(
        &self,
        glyphs: &mut [u16],
        ignorable: I,
        mut apply: F,
    ) -> Result<(), ParseError>
    where
        I: Fn(usize, u16) -> bool,
        F: FnMut(&A, &mut ActionSite<'_>) -> Result<(), ParseError>,
    {
        let positions = (0..glyphs.len())
            .filter(|&i| !ignorable(i, glyphs[i]))
            .collect::<Vec<_>>();
        let mut run = RunState {
            state: STATE_START_OF_TEXT,
            mark: None,
            stack: Vec::new(),
        };
        // (state, glyph) pairs seen without advancing from the current position
        let mut seen: FxHashSet<(u16, u16)> = FxHashSet::default();

        let mut k = 0;
        while let Some(&pos) = positions.get(k) {
            let class = self.table.class_of(glyphs[pos]);
            let entry = self.entry(run.state, class)?;
            step(entry, Some(pos), glyphs, &mut run, &mut apply)?;
            run.state = entry.next_state;

            if entry.flags.contains(EntryFlags::DONT_ADVANCE) {
                if seen.insert((run.state, glyphs[pos])) {
                    continue;
                }
                log::warn!(
                    "state {} revisited at glyph position {} without advancing, moving on",
                    run.state,
                    pos
                );
            }
            seen.clear();
            k += 1;
        }

        let entry = self.entry(run.state, CLASS_END_OF_TEXT)?;
        step(entry, None, glyphs, &mut run, &mut apply)
    }
}

impl<'t, A: Clone> Interpreter<'t, A> {
    /// Try to match starting at `start` in state 0.
    ///
    /// The match completes when a transition returns to one of the two fixed states after at
    /// least one action. Returning there without an action, or running out of glyphs first,
    /// is no match. `glyphs` is not changed.
    pub fn match_at<I>(
        &self,
        glyphs: &[u16],
        start: usize,
        ignorable: I,
    ) -> Result<Option<Match<A>>, ParseError>
    where
        I: Fn(usize, u16) -> bool,
    {
        match glyphs.get(start) {
            Some(&glyph) if !ignorable(start, glyph) => {}
            _ => return Ok(None),
        }
        let positions = (start..glyphs.len())
            .filter(|&i| !ignorable(i, glyphs[i]))
            .collect::<Vec<_>>();

        let mut state = STATE_START_OF_TEXT;
        let mut mark: Option<usize> = None;
        let mut effects = Vec::new();
        let mut last_consumed: Option<usize> = None;
        let mut seen: FxHashSet<u16> = FxHashSet::default();

        let mut k = 0;
        while let Some(&pos) = positions.get(k) {
            let entry = self.entry(state, self.table.class_of(glyphs[pos]))?;
            if let Some(action) = &entry.action {
                effects.push((mark.unwrap_or(pos), action.clone()));
            }
            if entry.flags.contains(EntryFlags::MARK) {
                mark = Some(pos);
            }
            if entry.flags.contains(EntryFlags::RESET) {
                mark = None;
            }
            state = entry.next_state;

            let mut advance = !entry.flags.contains(EntryFlags::DONT_ADVANCE);
            if !advance && !seen.insert(state) {
                log::warn!(
                    "state {} revisited at glyph position {} without advancing, moving on",
                    state,
                    pos
                );
                advance = true;
            }
            if advance {
                last_consumed = Some(pos);
            }

            if state <= STATE_START_OF_LINE {
                return Ok(completed(start, last_consumed, effects));
            }
            if advance {
                seen.clear();
                k += 1;
            }
        }

        let entry = self.entry(state, CLASS_END_OF_TEXT)?;
        if let (Some(action), Some(pos)) = (&entry.action, mark.or(last_consumed)) {
            effects.push((pos, action.clone()));
        }
        if entry.next_state <= STATE_START_OF_LINE {
            Ok(completed(start, last_consumed, effects))
        } else {
            Ok(None)
        }
    }
}

fn completed<A>(
    start: usize,
    last_consumed: Option<usize>,
    effects: Vec<(usize, A)>,
) -> Option<Match<A>> {
    match last_consumed {
        Some(end) if !effects.is_empty() => Some(Match {
            count: end - start + 1,
            effects,
        }),
        _ => None,
    }
}

fn step<A, F>(
    entry: &Entry<A>,
    current: Option<usize>,
    glyphs: &mut [u16],
    run: &mut RunState,
    apply: &mut F,
) -> Result<(), ParseError>
where
    F: FnMut(&A, &mut ActionSite<'_>) -> Result<(), ParseError>,
{
    if let (true, Some(pos)) = (entry.flags.contains(EntryFlags::PUSH), current) {
        run.stack.push(pos);
    }
    if let Some(action) = &entry.action {
        let mut site = ActionSite {
            glyphs,
            current,
            mark: run.mark,
            stack: &mut run.stack,
        };
        apply(action, &mut site)?;
    }
    if let (true, Some(pos)) = (entry.flags.contains(EntryFlags::MARK), current) {
        run.mark = Some(pos);
    }
    if entry.flags.contains(EntryFlags::RESET) {
        run.mark = None;
        run.stack.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER: u16 = 7;
    const A: u16 = 10;
    const B: u16 = 11;
    const MARK: u16 = 50;

    /// State 0 marks an A and moves to state 2. In state 2 a B goes back to state 0 with an
    /// adjustment of -25.
    fn pair_table() -> StateTable<i16> {
        let mut table = StateTable::new(6);
        table.class_map.insert(A, 4);
        table.class_map.insert(B, 5);
        let saw_a = table.add_state().unwrap();
        for state in [0, 1] {
            table
                .set_entry(state, 4, Entry::new(saw_a).with_flags(EntryFlags::MARK))
                .unwrap();
        }
        table
            .set_entry(saw_a, 4, Entry::new(saw_a).with_flags(EntryFlags::MARK))
            .unwrap();
        table
            .set_entry(saw_a, 5, Entry::new(0).with_action(-25))
            .unwrap();
        table
    }

    fn is_mark(_index: usize, glyph: u16) -> bool {
        glyph == MARK
    }

    #[test]
    fn test_match_at() {
        let table = pair_table();
        let interpreter = Interpreter::new(&table);
        let glyphs = [OTHER, A, B, OTHER];

        assert_eq!(interpreter.match_at(&glyphs, 0, |_, _| false).unwrap(), None);
        assert_eq!(
            interpreter.match_at(&glyphs, 1, |_, _| false).unwrap(),
            Some(Match {
                count: 2,
                effects: vec![(1, -25)]
            })
        );
        assert_eq!(interpreter.match_at(&glyphs, 2, |_, _| false).unwrap(), None);
        assert_eq!(interpreter.match_at(&glyphs, 9, |_, _| false).unwrap(), None);
    }

    #[test]
    fn test_match_skips_ignorable() {
        let table = pair_table();
        let interpreter = Interpreter::new(&table);
        let glyphs = [OTHER, A, MARK, B, OTHER];

        let found = interpreter.match_at(&glyphs, 1, is_mark).unwrap().unwrap();
        assert_eq!(found.count, 3);
        assert_eq!(found.effects, vec![(1, -25)]);
        assert_eq!(glyphs[2], MARK);
        assert_eq!(interpreter.match_at(&glyphs, 2, is_mark).unwrap(), None);
    }

    #[test]
    fn test_ignorable_at_position_one() {
        let table = pair_table();
        let interpreter = Interpreter::new(&table);
        let at_one = |i: usize, _glyph: u16| i == 1;

        // Without skipping, the glyph between A and B ends the match.
        let glyphs = [A, OTHER, B];
        assert_eq!(interpreter.match_at(&glyphs, 0, |_, _| false).unwrap(), None);
        let found = interpreter.match_at(&glyphs, 0, at_one).unwrap().unwrap();
        assert_eq!(found.count, 3);
        assert_eq!(found.effects, vec![(0, -25)]);

        let mut glyphs = [A, MARK, B];
        let mut applied = Vec::new();
        interpreter
            .run(&mut glyphs, at_one, |&dx, site| {
                applied.push((site.mark, site.current, dx));
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, vec![(Some(0), Some(2), -25)]);
        assert_eq!(glyphs, [A, MARK, B]);
    }

    #[test]
    fn test_match_needs_completion() {
        let table = pair_table();
        let interpreter = Interpreter::new(&table);
        // Runs out of glyphs in state 2.
        assert_eq!(interpreter.match_at(&[A, A], 0, |_, _| false).unwrap(), None);
    }

    #[test]
    fn test_run_applies_actions() {
        let table = pair_table();
        let mut glyphs = [A, B, OTHER, A, MARK, B];
        let mut applied = Vec::new();
        Interpreter::new(&table)
            .run(&mut glyphs, is_mark, |&dx, site| {
                applied.push((site.mark, site.current, dx));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            applied,
            vec![(Some(0), Some(1), -25), (Some(3), Some(5), -25)]
        );
    }

    #[test]
    fn test_run_end_of_text_and_substitution() {
        // Every A is replaced by B, and the end of text entry records that it ran.
        let mut table: StateTable<u16> = StateTable::new(5);
        table.class_map.insert(A, 4);
        table.set_entry(0, 4, Entry::new(0).with_action(B)).unwrap();
        table.set_entry(0, 0, Entry::new(0).with_action(0)).unwrap();

        let mut glyphs = [A, OTHER, A];
        let mut saw_end = false;
        Interpreter::new(&table)
            .run(&mut glyphs, |_, _| false, |&replacement, site| {
                match site.current {
                    Some(pos) => site.glyphs[pos] = replacement,
                    None => saw_end = true,
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(glyphs, [B, OTHER, B]);
        assert!(saw_end);
    }

    #[test]
    fn test_run_push_and_dont_advance() {
        let mut table: StateTable<()> = StateTable::new(5);
        table.class_map.insert(A, 4);
        // Push each A, then pop everything at the end.
        table
            .set_entry(0, 4, Entry::new(0).with_flags(EntryFlags::PUSH))
            .unwrap();
        table.set_entry(0, 0, Entry::new(0).with_action(())).unwrap();
        let mut glyphs = [A, OTHER, A];
        let mut popped = Vec::new();
        Interpreter::new(&table)
            .run(&mut glyphs, |_, _| false, |_, site| {
                while let Some(pos) = site.stack.pop() {
                    popped.push(pos);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(popped, vec![2, 0]);

        // A table that never advances still terminates.
        let mut table: StateTable<()> = StateTable::new(5);
        table
            .set_entry(0, 1, Entry::new(0).with_flags(EntryFlags::DONT_ADVANCE))
            .unwrap();
        let mut glyphs = [OTHER, OTHER];
        let mut calls = 0;
        Interpreter::new(&table)
            .run(&mut glyphs, |_, _| false, |_, _| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_reset_clears_mark() {
        let mut table = pair_table();
        table
            .set_entry(2, 1, Entry::new(2).with_flags(EntryFlags::RESET))
            .unwrap();
        let found = Interpreter::new(&table)
            .match_at(&[A, OTHER, B], 0, |_, _| false)
            .unwrap()
            .unwrap();
        // Without a mark the adjustment applies to the B itself.
        assert_eq!(found.effects, vec![(2, -25)]);
        assert_eq!(found.count, 3);
    }
}
