//! Binding - resolving words to value slots
//!
//! A word cell's binding names either a **varlist** (specific binding: the
//! word refers to that context's slot) or a **paramlist** (relative
//! binding: the word refers to "whichever frame of this function is
//! running", and needs a **specifier** to pick the instance). Arrays carry
//! bindings the same way, so a function body deep inside blocks still
//! knows which frame its words belong to.
//!
//! The relative/specific distinction is a type at this seam: a `Val` is a
//! cell known to be fully specific, and the only way to derive one from a
//! possibly-relative cell is `Val::derive`, which demands the specifier.

use crate::context::{context_accessible, find_key, keylist_of, var_at};
use crate::error::{ErrorId, Raised, fail};
use crate::frame::Frame;
use reval_core::cell::{CELL_FLAG_PROTECTED, CELL_FLAG_RELATIVE, Cell, Kind};
use reval_core::series::{
    MKS_NONE, SERIES_FLAG_VARLIST, Series, append_cell, make_array, manage_series,
};
use reval_core::symbol::{canon_of, spelling_bytes};

/// Context for resolving relatively-bound cells. `Specified` asserts the
/// cell tree contains no relative references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier {
    Specified,
    Ctx(*mut Series),
}

/// A fully specific value: safe to store anywhere, no frame needed to read
/// its words. The constructor is the proof obligation.
#[derive(Debug, Clone, Copy)]
pub struct Val(pub Cell);

impl Val {
    /// Derive a specific value from a possibly-relative cell. This is the
    /// single point where RELATIVE goes away.
    pub fn derive(rel: &Cell, specifier: Specifier) -> Val {
        Val(derelativize(rel, specifier))
    }

    #[inline]
    pub fn cell(&self) -> &Cell {
        &self.0
    }
}

/// Resolve a possibly-relative cell into a specific copy.
pub fn derelativize(rel: &Cell, specifier: Specifier) -> Cell {
    let mut copy = *rel;
    if !copy.get_flag(CELL_FLAG_RELATIVE) {
        return copy;
    }
    match specifier {
        Specifier::Ctx(varlist) => {
            debug_assert!(unsafe { (*varlist).get_flag(SERIES_FLAG_VARLIST) });
            copy.set_binding(varlist);
            copy.clear_flag(CELL_FLAG_RELATIVE);
        }
        Specifier::Specified => {
            debug_assert!(false, "relative cell derived without a specifier");
        }
    }
    copy
}

/// Specifier to carry when recursing into an array cell: the array's own
/// binding when it is relative-resolved, otherwise the incoming one.
pub fn derive_specifier(array_cell: &Cell, outer: Specifier) -> Specifier {
    if array_cell.get_flag(CELL_FLAG_RELATIVE) {
        // Relative array: the outer specifier resolves it.
        outer
    } else {
        let binding = array_cell.binding();
        if binding.is_null() {
            Specifier::Specified
        } else {
            Specifier::Ctx(binding)
        }
    }
}

// =============================================================================
// Variable access
// =============================================================================

fn word_text(word: &Cell) -> String {
    String::from_utf8_lossy(spelling_bytes(word.word_spelling())).into_owned()
}

/// Resolve a word to its varlist and 1-based index, honoring the
/// relative/specific distinction.
fn resolve_binding(word: &Cell, specifier: Specifier) -> Result<(*mut Series, usize), Raised> {
    let binding = word.binding();
    if binding.is_null() {
        return fail(ErrorId::NotBound, &[&word_text(word)]);
    }

    if word.get_flag(CELL_FLAG_RELATIVE) {
        // Binding is a paramlist; the specifier picks the frame instance.
        let Specifier::Ctx(varlist) = specifier else {
            return fail(ErrorId::NotBound, &[&word_text(word)]);
        };
        debug_assert_eq!(
            crate::func::func_underlying(binding),
            crate::func::func_underlying(keylist_of(varlist)),
            "specifier does not match the word's paramlist"
        );
        Ok((varlist, word.word_index()))
    } else {
        Ok((binding, word.word_index()))
    }
}

/// The storage slot for a context index, redirecting through a live frame
/// when the context is a running call whose arguments are on the chunk
/// stack.
pub fn ctx_slot(varlist: *mut Series, index: usize) -> Result<*mut Cell, Raised> {
    if !context_accessible(varlist) {
        return fail(ErrorId::PastEnd, &[]);
    }
    unsafe {
        let frame = (*varlist).misc as *mut Frame;
        if !frame.is_null() && (*frame).args_on_chunk {
            debug_assert!(index >= 1 && index <= (*frame).num_args);
            return Ok((*frame).args_head.add(index - 1));
        }
    }
    Ok(var_at(varlist, index))
}

/// Read a word's variable.
pub fn get_var(word: &Cell, specifier: Specifier) -> Result<*mut Cell, Raised> {
    let (varlist, index) = resolve_binding(word, specifier)?;
    ctx_slot(varlist, index)
}

/// Write a word's variable. Refuses PROTECTED slots and RUNNING frames
/// held by a native.
pub fn set_var(word: &Cell, specifier: Specifier, value: &Cell) -> Result<(), Raised> {
    let (varlist, index) = resolve_binding(word, specifier)?;
    if unsafe { (*varlist).get_flag(reval_core::series::SERIES_FLAG_RUNNING) } {
        return fail(ErrorId::Protected, &[]);
    }
    let slot = ctx_slot(varlist, index)?;
    unsafe {
        if (*slot).get_flag(CELL_FLAG_PROTECTED) {
            return fail(ErrorId::Protected, &[]);
        }
        *slot = *value;
    }
    Ok(())
}

// =============================================================================
// Deep binding
// =============================================================================

pub const BIND_DEEP: u32 = 1 << 0;
/// Bind every word, adding missing keys to the context.
pub const BIND_ALL: u32 = 1 << 1;
/// Add keys for (and bind) set-words only; other words bind if present.
pub const BIND_SET: u32 = 1 << 2;

/// Walk an array tree rewriting word bindings to point at `ctx`.
pub fn bind_values_deep(array: *mut Series, ctx: *mut Series, flags: u32) {
    let len = unsafe { (*array).len() };
    for i in 0..len {
        let cell = unsafe { &mut *(*array).array_at(i) };
        match cell.kind() {
            Some(k) if k.is_word() => {
                let spelling = cell.word_spelling();
                let mut index = find_key(ctx, spelling);
                if index == 0 {
                    let adding = flags & BIND_ALL != 0
                        || (flags & BIND_SET != 0 && k == Kind::SetWord);
                    if !adding {
                        continue;
                    }
                    index = crate::context::append_context_key(ctx, spelling);
                }
                cell.set_binding(ctx);
                cell.set_word_index(index);
                cell.clear_flag(CELL_FLAG_RELATIVE);
            }
            Some(k) if k.is_array() => {
                if flags & BIND_DEEP != 0 {
                    bind_values_deep(cell.series(), ctx, flags);
                }
            }
            _ => {}
        }
    }
}

/// Bind words of an array tree to a function's paramlist as relative
/// references (function body creation).
pub fn relativize_deep(array: *mut Series, paramlist: *mut Series) {
    let num_params = crate::func::func_num_params(paramlist);
    let len = unsafe { (*array).len() };
    for i in 0..len {
        let cell = unsafe { &mut *(*array).array_at(i) };
        match cell.kind() {
            Some(k) if k.is_word() => {
                let canon = canon_of(cell.word_spelling());
                for n in 1..=num_params {
                    let key = unsafe { &*crate::func::func_param(paramlist, n) };
                    if canon_of(key.key_spelling()) == canon {
                        cell.set_binding(paramlist);
                        cell.set_word_index(n);
                        cell.set_flag(CELL_FLAG_RELATIVE);
                        break;
                    }
                }
            }
            Some(k) if k.is_array() => {
                relativize_deep(cell.series(), paramlist);
                cell.set_binding(paramlist);
                cell.set_flag(CELL_FLAG_RELATIVE);
            }
            _ => {}
        }
    }
}

/// Import bindings for loaded source: bind every word into `ctx` (the lib
/// or module context), interning new keys as encountered.
pub fn intern_values_deep(array: *mut Series, ctx: *mut Series) {
    bind_values_deep(array, ctx, BIND_DEEP | BIND_SET);
}

/// Deep-copy an array from `index`, recursing into nested arrays. Strings
/// and other non-array series stay shared; body copies only need fresh
/// cells to rebind.
pub fn copy_array_deep(array: *mut Series, index: usize) -> *mut Series {
    let len = unsafe { (*array).len() };
    let count = len.saturating_sub(index);
    let copy = make_array(count.max(1), MKS_NONE);
    for i in index..len {
        let cell = unsafe { &*(*array).array_at(i) };
        let mut dup = *cell;
        if let Some(k) = dup.kind() {
            if k.is_array() {
                let inner = copy_array_deep(dup.series(), 0);
                manage_series(inner);
                dup.payload[0] = inner as u64;
            }
        }
        append_cell(copy, &dup);
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{append_context_key, make_context};
    use crate::test_support::RuntimeGuard;
    use reval_core::symbol::intern;

    #[test]
    fn bind_and_read() {
        let _rt = RuntimeGuard::new();
        let ctx = make_context(2, Kind::Object);
        let idx = append_context_key(ctx, intern(b"value"));
        unsafe { (*var_at(ctx, idx)).init_integer(42) };

        let block = make_array(2, MKS_NONE);
        let mut word = Cell::zeroed();
        word.init_word(Kind::Word, intern(b"value"));
        append_cell(block, &word);

        bind_values_deep(block, ctx, BIND_DEEP);
        let bound = unsafe { &*(*block).array_at(0) };
        let slot = get_var(bound, Specifier::Specified).unwrap();
        assert_eq!(unsafe { (*slot).int64() }, 42);
    }

    #[test]
    fn unbound_word_fails() {
        let _rt = RuntimeGuard::new();
        let mut word = Cell::zeroed();
        word.init_word(Kind::Word, intern(b"floating"));
        let err = get_var(&word, Specifier::Specified).unwrap_err();
        assert_eq!(crate::error::error_id_name(err.0), "not-bound");
    }

    #[test]
    fn protected_slot_refuses_set() {
        let _rt = RuntimeGuard::new();
        let ctx = make_context(1, Kind::Object);
        let idx = append_context_key(ctx, intern(b"sealed"));
        unsafe {
            (*var_at(ctx, idx)).init_integer(1);
            (*var_at(ctx, idx)).set_flag(CELL_FLAG_PROTECTED);
        }
        let mut word = Cell::zeroed();
        word.init_word(Kind::Word, intern(b"sealed"));
        word.set_binding(ctx);
        word.set_word_index(idx);

        let mut two = Cell::zeroed();
        two.init_integer(2);
        let err = set_var(&word, Specifier::Specified, &two).unwrap_err();
        assert_eq!(crate::error::error_id_name(err.0), "protected");
    }

    #[test]
    fn set_words_extend_module_contexts() {
        let _rt = RuntimeGuard::new();
        let ctx = make_context(1, Kind::Module);
        let block = make_array(2, MKS_NONE);
        let mut setword = Cell::zeroed();
        setword.init_word(Kind::SetWord, intern(b"fresh"));
        append_cell(block, &setword);

        intern_values_deep(block, ctx);
        assert_eq!(find_key(ctx, intern(b"fresh")), 1);
    }
}
