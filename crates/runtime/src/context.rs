//! Contexts - keylist/varlist pairs
//!
//! A context is two parallel arrays. The **keylist** holds typeset cells
//! whose `extra` word names each key; it is sharable between contexts with
//! the same shape. The **varlist** holds one value cell per key, preceded
//! by an archetype cell at slot zero (a context value whose payload points
//! back at the varlist itself). OBJECT!, MODULE!, ERROR! and FRAME! are all
//! this structure; a FRAME!'s keylist is the function's paramlist.
//!
//! ```text
//!  keylist:  [ BLANK | typeset a | typeset b | typeset c ]   (shared)
//!                link ▲
//!  varlist:  [ OBJECT!│ value     | value     | value     ]
//!              └ payload points back at varlist
//! ```
//!
//! Key indexes are 1-based: index 0 is the archetype/rootkey slot.

use crate::error::{ErrorId, Raised, fail};
use reval_core::cell::{Cell, Kind};
use reval_core::series::{
    MKS_NONE, SERIES_FLAG_INACCESSIBLE, SERIES_FLAG_VARLIST, Series, append_cell, make_array,
};
use reval_core::symbol::{canon_of, spelling_bytes};

/// All-kinds typeset bits (no restriction).
pub const TS_ANY: u64 = !0;

/// Parameter/key class, carried in the typeset cell's kind-specific bits.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Ordinary evaluated argument.
    Normal = 0,
    /// Evaluated, but refuses to complete deferred enfix on its left.
    Tight,
    /// Taken literally, no evaluation at all.
    HardQuote,
    /// Taken literally unless a GROUP!/GET-WORD!/GET-PATH!, which evaluate.
    SoftQuote,
    /// `/refinement` switch; LOGIC! or BLANK! at the callsite.
    Refinement,
    /// Frame-local, not fulfilled from the callsite.
    Local,
    /// `return:` definitional return slot.
    Return,
}

impl ParamClass {
    pub fn from_bits(bits: u8) -> ParamClass {
        match bits {
            0 => ParamClass::Normal,
            1 => ParamClass::Tight,
            2 => ParamClass::HardQuote,
            3 => ParamClass::SoftQuote,
            4 => ParamClass::Refinement,
            5 => ParamClass::Local,
            _ => ParamClass::Return,
        }
    }
}

/// Format a typeset key cell in place.
pub fn init_key(cell: &mut Cell, spelling: *mut Series, bits: u64, class: ParamClass) {
    cell.init_typeset(bits, spelling);
    cell.set_kind_bits(class as u8);
}

#[inline]
pub fn key_class(key: &Cell) -> ParamClass {
    ParamClass::from_bits(key.kind_bits())
}

// =============================================================================
// Construction
// =============================================================================

/// Make a context with room for `capacity` keys. The keylist and varlist
/// are created unmanaged (promote with `manage_context` once reachable).
pub fn make_context(capacity: usize, kind: Kind) -> *mut Series {
    debug_assert!(kind.is_context());

    let keylist = make_array(capacity + 1, MKS_NONE);
    let mut rootkey = Cell::zeroed();
    rootkey.init_blank();
    append_cell(keylist, &rootkey);

    let varlist = make_array(capacity + 1, MKS_NONE);
    unsafe {
        (*varlist).set_flag(SERIES_FLAG_VARLIST);
        (*varlist).link = keylist as u64;
        (*varlist).misc = 0;
    }
    let mut archetype = Cell::zeroed();
    archetype.init_context(kind, varlist);
    append_cell(varlist, &archetype);

    varlist
}

#[inline]
pub fn keylist_of(varlist: *mut Series) -> *mut Series {
    unsafe {
        debug_assert!((*varlist).get_flag(SERIES_FLAG_VARLIST));
        (*varlist).link as *mut Series
    }
}

pub fn set_keylist(varlist: *mut Series, keylist: *mut Series) {
    unsafe {
        (*varlist).link = keylist as u64;
    }
}

/// Number of keys (excluding the rootkey/archetype slot).
#[inline]
pub fn context_len(varlist: *mut Series) -> usize {
    unsafe { (*varlist).len() - 1 }
}

/// The archetype cell at varlist slot zero.
#[inline]
pub fn context_archetype(varlist: *mut Series) -> *mut Cell {
    unsafe { (*varlist).array_at(0) }
}

#[inline]
pub fn context_kind(varlist: *mut Series) -> Kind {
    unsafe { (*context_archetype(varlist)).kind_checked() }
}

/// Key cell by 1-based index.
#[inline]
pub fn key_at(varlist: *mut Series, index: usize) -> *mut Cell {
    debug_assert!(index >= 1 && index <= context_len(varlist));
    unsafe { (*keylist_of(varlist)).array_at(index) }
}

/// Value cell by 1-based index.
#[inline]
pub fn var_at(varlist: *mut Series, index: usize) -> *mut Cell {
    debug_assert!(index >= 1, "index 0 is the archetype");
    unsafe { (*varlist).array_at(index) }
}

/// Append a key/value pair; the new value slot starts void (END-formatted
/// blank). Returns the new 1-based index.
pub fn append_context_key(varlist: *mut Series, spelling: *mut Series) -> usize {
    let keylist = keylist_of(varlist);
    let mut key = Cell::zeroed();
    init_key(&mut key, spelling, TS_ANY, ParamClass::Normal);
    append_cell(keylist, &key);

    let mut blank = Cell::zeroed();
    blank.init_blank();
    append_cell(varlist, &blank);

    context_len(varlist)
}

/// Find a key by canonical symbol. Returns the 1-based index or 0.
pub fn find_key(varlist: *mut Series, spelling: *mut Series) -> usize {
    let canon = canon_of(spelling);
    let len = context_len(varlist);
    for index in 1..=len {
        let key = unsafe { &*key_at(varlist, index) };
        if canon_of(key.key_spelling()) == canon {
            return index;
        }
    }
    0
}

/// Look up a key's value; error if absent.
pub fn select_context(varlist: *mut Series, spelling: *mut Series) -> Result<*mut Cell, Raised> {
    let index = find_key(varlist, spelling);
    if index == 0 {
        return fail(ErrorId::NotBound, &[&spelling_text(spelling)]);
    }
    Ok(var_at(varlist, index))
}

fn spelling_text(spelling: *mut Series) -> String {
    String::from_utf8_lossy(spelling_bytes(spelling)).into_owned()
}

/// Promote a context (both arrays) to collector ownership.
pub fn manage_context(varlist: *mut Series) {
    let keylist = keylist_of(varlist);
    if unsafe { !(*keylist).is_managed() } {
        reval_core::series::manage_series(keylist);
    }
    if unsafe { !(*varlist).is_managed() } {
        reval_core::series::manage_series(varlist);
    }
}

/// A reified frame whose call has ended: reads must refuse rather than
/// dereference dead argument storage.
pub fn mark_context_inaccessible(varlist: *mut Series) {
    unsafe {
        (*varlist).set_flag(SERIES_FLAG_INACCESSIBLE);
        (*varlist).misc = 0;
    }
}

#[inline]
pub fn context_accessible(varlist: *mut Series) -> bool {
    unsafe { !(*varlist).get_flag(SERIES_FLAG_INACCESSIBLE) }
}

// =============================================================================
// Resolve / import
// =============================================================================

/// Import definitions from `source` into `target` by canonical symbol
/// match: every key of `source` that also names a key of `target` has its
/// value copied across. With `add_missing`, unmatched source keys are
/// appended to `target` first.
pub fn resolve_context(target: *mut Series, source: *mut Series, add_missing: bool) {
    let len = context_len(source);
    for index in 1..=len {
        let key = unsafe { &*key_at(source, index) };
        let spelling = key.key_spelling();
        let mut t_index = find_key(target, spelling);
        if t_index == 0 {
            if !add_missing {
                continue;
            }
            t_index = append_context_key(target, spelling);
        }
        unsafe {
            *var_at(target, t_index) = *var_at(source, index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reval_core::state::CoreGuard;
    use reval_core::symbol::intern;

    #[test]
    fn context_shape() {
        let _core = CoreGuard::new();
        let ctx = make_context(4, Kind::Object);
        assert_eq!(context_len(ctx), 0);
        assert_eq!(context_kind(ctx), Kind::Object);

        let alpha = intern(b"alpha");
        let idx = append_context_key(ctx, alpha);
        assert_eq!(idx, 1);
        unsafe { (*var_at(ctx, idx)).init_integer(5) };

        assert_eq!(find_key(ctx, alpha), 1);
        assert_eq!(find_key(ctx, intern(b"ALPHA")), 1); // canon match
        assert_eq!(find_key(ctx, intern(b"beta")), 0);
        assert_eq!(unsafe { (*var_at(ctx, 1)).int64() }, 5);
    }

    #[test]
    fn resolve_copies_by_canon() {
        let _core = CoreGuard::new();
        let a = make_context(2, Kind::Object);
        let b = make_context(2, Kind::Object);
        let x = intern(b"x");
        append_context_key(a, x);
        unsafe { (*var_at(a, 1)).init_integer(1) };
        append_context_key(b, intern(b"X"));
        unsafe { (*var_at(b, 1)).init_integer(2) };

        resolve_context(a, b, false);
        assert_eq!(unsafe { (*var_at(a, 1)).int64() }, 2);

        let y = intern(b"y");
        append_context_key(b, y);
        unsafe { (*var_at(b, 2)).init_integer(9) };
        resolve_context(a, b, true);
        assert_eq!(context_len(a), 2);
        assert_eq!(unsafe { (*var_at(a, find_key(a, y))).int64() }, 9);
    }
}
