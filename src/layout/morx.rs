//! Apply `morx` contextual substitutions to a glyph run.

use crate::error::ParseError;
use crate::state_table::interpreter::{ActionSite, Interpreter};
use crate::state_table::DELETED_GLYPH;
use crate::tables::morx::{ContextualAction, ContextualSubtable};

/// Run `subtable` over `glyphs`, substituting in place.
///
/// Deleted glyphs are left in the run as 0xFFFF. Use [`remove_deleted_glyphs`] to drop them.
pub fn apply_contextual(
    subtable: &ContextualSubtable,
    glyphs: &mut [u16],
) -> Result<(), ParseError> {
    Interpreter::new(&subtable.table).run(glyphs, |_, _| false, substitute)
}

fn substitute(action: &ContextualAction, site: &mut ActionSite<'_>) -> Result<(), ParseError> {
    // The mark substitution is made first, the current glyph may be the marked one.
    if let (Some(lookup), Some(pos)) = (&action.mark, site.mark) {
        if let Some(&glyph) = lookup.get(&site.glyphs[pos]) {
            site.glyphs[pos] = glyph;
        }
    }
    if let (Some(lookup), Some(pos)) = (&action.current, site.current) {
        if let Some(&glyph) = lookup.get(&site.glyphs[pos]) {
            site.glyphs[pos] = glyph;
        }
    }
    Ok(())
}

pub fn remove_deleted_glyphs(glyphs: &mut Vec<u16>) {
    glyphs.retain(|&glyph| glyph != DELETED_GLYPH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::read::ReadScope;
    use crate::tables::morx::tests::ligature_data;

    fn ligatures() -> ContextualSubtable {
        ReadScope::new(&ligature_data())
            .read_dep::<ContextualSubtable>(400)
            .unwrap()
    }

    #[test]
    fn test_ffi_ligature() {
        let mut glyphs = [0x49, 0x49, 0x4C];
        apply_contextual(&ligatures(), &mut glyphs).unwrap();
        assert_eq!(glyphs, [0x14B, DELETED_GLYPH, DELETED_GLYPH]);

        let mut glyphs = glyphs.to_vec();
        remove_deleted_glyphs(&mut glyphs);
        assert_eq!(glyphs, vec![0x14B]);
    }

    #[test]
    fn test_fl_ligature_in_context() {
        let mut glyphs = vec![3, 0x49, 0x4F, 0x49];
        apply_contextual(&ligatures(), &mut glyphs).unwrap();
        remove_deleted_glyphs(&mut glyphs);
        assert_eq!(glyphs, vec![3, 0xC1, 0x49]);
    }

    #[test]
    fn test_unmatched_glyphs_unchanged() {
        let mut glyphs = [0x4C, 0x4F, 7];
        apply_contextual(&ligatures(), &mut glyphs).unwrap();
        assert_eq!(glyphs, [0x4C, 0x4F, 7]);
    }
}
