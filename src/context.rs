//! Matching of chaining contextual rules against a glyph run.
//!
//! A rule is a backtrack sequence, an input sequence and a lookahead sequence. Glyphs the
//! caller marks as ignorable (for example marks skipped by a lookup flag) take no part in
//! matching, but positions reported back to the caller always index the full run.

use crate::error::ParseError;
use crate::layout::class_def::ClassDef;
use crate::layout::coverage::Coverage;

/// How each element of a sequence is matched.
pub enum GlyphTable<'a> {
    Empty,
    ById(&'a [u16]),
    ByClassDef(&'a ClassDef, &'a [u16]),
    ByCoverage(&'a [Coverage]),
}

impl<'a> GlyphTable<'a> {
    pub fn len(&self) -> usize {
        match self {
            GlyphTable::Empty => 0,
            GlyphTable::ById(glyphs) => glyphs.len(),
            GlyphTable::ByClassDef(_, classes) => classes.len(),
            GlyphTable::ByCoverage(coverages) => coverages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, i: usize, glyph: u16) -> bool {
        match self {
            GlyphTable::Empty => false,
            GlyphTable::ById(glyphs) => glyphs.get(i) == Some(&glyph),
            GlyphTable::ByClassDef(class_def, classes) => {
                classes.get(i) == Some(&class_def.get(glyph))
            }
            GlyphTable::ByCoverage(coverages) => coverages
                .get(i)
                .map_or(false, |coverage| coverage.contains(glyph)),
        }
    }
}

/// The non-ignorable positions of a glyph run.
///
/// Matching runs over the compacted sequence. `original` maps a compacted index back to the
/// run, `compacted` maps a run position forward.
pub struct NonIgnorable {
    positions: Vec<usize>,
    back: Vec<Option<usize>>,
}

impl NonIgnorable {
    pub fn new<I>(glyphs: &[u16], ignorable: I) -> Self
    where
        I: Fn(usize, u16) -> bool,
    {
        let mut positions = Vec::with_capacity(glyphs.len());
        let mut back = Vec::with_capacity(glyphs.len());
        for (i, &glyph) in glyphs.iter().enumerate() {
            if ignorable(i, glyph) {
                back.push(None);
            } else {
                back.push(Some(positions.len()));
                positions.push(i);
            }
        }
        NonIgnorable { positions, back }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position in the full run of compacted index `index`.
    pub fn original(&self, index: usize) -> Option<usize> {
        self.positions.get(index).copied()
    }

    /// Compacted index of run position `position`, `None` if that glyph is ignorable.
    pub fn compacted(&self, position: usize) -> Option<usize> {
        self.back.get(position).copied().flatten()
    }
}

/// A successful match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextMatch {
    /// Glyphs from the start position to the last input glyph, ignorable glyphs included.
    pub count: usize,
    /// Lookups to apply, as (position in the full run, lookup index).
    pub effects: Vec<(usize, u16)>,
}

pub struct MatchContext<'a> {
    pub backtrack_table: GlyphTable<'a>,
    pub input_table: GlyphTable<'a>,
    pub lookahead_table: GlyphTable<'a>,
}

impl<'a> MatchContext<'a> {
    /// Returns the compacted index of the last input glyph if the context matches with the
    /// first input glyph at compacted index `index`.
    ///
    /// The backtrack sequence is matched moving away from `index`, so its first element is
    /// the glyph immediately before the input.
    pub fn matches(&self, glyphs: &[u16], run: &NonIgnorable, index: usize) -> Option<usize> {
        let glyph_at = |i: usize| run.original(i).and_then(|pos| glyphs.get(pos).copied());

        if self.input_table.is_empty() || index < self.backtrack_table.len() {
            return None;
        }
        let backtrack = (0..self.backtrack_table.len())
            .all(|i| glyph_at(index - 1 - i).map_or(false, |g| self.backtrack_table.check(i, g)));
        let input = (0..self.input_table.len())
            .all(|i| glyph_at(index + i).map_or(false, |g| self.input_table.check(i, g)));
        let last = index + self.input_table.len() - 1;
        let lookahead = (0..self.lookahead_table.len())
            .all(|i| glyph_at(last + 1 + i).map_or(false, |g| self.lookahead_table.check(i, g)));
        (backtrack && input && lookahead).then_some(last)
    }

    /// Match with the first input glyph at `start` in `glyphs`, translating `lookups` from
    /// input sequence indices to positions in `glyphs`.
    pub fn match_at<I>(
        &self,
        glyphs: &[u16],
        start: usize,
        ignorable: I,
        lookups: &[(u16, u16)],
    ) -> Result<Option<ContextMatch>, ParseError>
    where
        I: Fn(usize, u16) -> bool,
    {
        let run = NonIgnorable::new(glyphs, ignorable);
        let index = match run.compacted(start) {
            Some(index) => index,
            None => return Ok(None),
        };
        let last = match self.matches(glyphs, &run, index) {
            Some(last) => last,
            None => return Ok(None),
        };
        let mut effects = Vec::with_capacity(lookups.len());
        for &(sequence_index, lookup_index) in lookups {
            let sequence_index = usize::from(sequence_index);
            if sequence_index >= self.input_table.len() {
                return Err(ParseError::BadIndex);
            }
            let position = run
                .original(index + sequence_index)
                .ok_or(ParseError::BadIndex)?;
            effects.push((position, lookup_index));
        }
        let end = run.original(last).ok_or(ParseError::BadIndex)?;
        Ok(Some(ContextMatch {
            count: end - start + 1,
            effects,
        }))
    }
}

/// Class sequences for a chaining context rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainClassRule {
    /// Nearest glyph first.
    pub backtrack: Vec<u16>,
    pub input: Vec<u16>,
    pub lookahead: Vec<u16>,
    /// (input sequence index, lookup index) pairs.
    pub lookups: Vec<(u16, u16)>,
}

/// The class definitions used by each sequence of a chain-class rule set.
pub struct ChainClassDefs<'a> {
    pub backtrack: &'a ClassDef,
    pub input: &'a ClassDef,
    pub lookahead: &'a ClassDef,
}

impl ChainClassRule {
    pub fn match_context<'a>(&'a self, class_defs: &ChainClassDefs<'a>) -> MatchContext<'a> {
        MatchContext {
            backtrack_table: GlyphTable::ByClassDef(class_defs.backtrack, &self.backtrack),
            input_table: GlyphTable::ByClassDef(class_defs.input, &self.input),
            lookahead_table: GlyphTable::ByClassDef(class_defs.lookahead, &self.lookahead),
        }
    }

    /// Match this rule with its first input glyph at `start`.
    ///
    /// Glyphs for which `ignorable` returns `true` are skipped but counted in the result.
    pub fn match_at<I>(
        &self,
        class_defs: &ChainClassDefs<'_>,
        glyphs: &[u16],
        start: usize,
        ignorable: I,
    ) -> Result<Option<ContextMatch>, ParseError>
    where
        I: Fn(usize, u16) -> bool,
    {
        self.match_context(class_defs)
            .match_at(glyphs, start, ignorable, &self.lookups)
    }
}
