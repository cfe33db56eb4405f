//! Symbol interner
//!
//! Word spellings are interned UTF-8 byte series. Two spellings are the
//! same word when their case-folded forms match; the fold-class has one
//! **canon** series, and every other casing variant ("synonym") reaches it
//! through the node's `misc` word. Synonyms of a canon form a circular
//! chain through `link`, so dropping any member - canon included - can
//! rewrite the class without touching the table more than once.
//!
//! ```text
//!        map[fold("Hello")] ─────┐
//!                                ▼
//!   ┌────────┐ link  ┌────────┐ link  ┌────────┐
//!   │ "hello"│─────▶ │ "Hello"│─────▶ │ "HELLO"│──┐
//!   │ CANON  │       │ misc ──┼──┐    │ misc ──┼─┐│
//!   └────────┘       └────────┘  │    └────────┘ ││
//!        ▲      ▲────────────────┘               ││
//!        ▲───────────────────────────────────────┘│
//!        └────────────────────── link ────────────┘
//! ```
//!
//! WORD! equality compares canon pointers; nothing ever walks the chain on
//! the comparison path.

use crate::series::{
    MKS_MANAGED, SERIES_FLAG_CANON, SERIES_FLAG_UTF8_SYMBOL, Series, append_bytes, make_series,
};
use crate::state::mem;
use std::collections::HashMap;

/// Case-folded spelling -> canon series.
pub struct SymbolTable {
    map: HashMap<Vec<u8>, *mut Series>,
}

/// Latin-1-ish fold for bytes at and above 0xC0: A-grave through THORN
/// fold to their lowercase pair, with the multiplication sign left alone.
#[inline]
pub fn fold_byte(b: u8) -> u8 {
    match b {
        b'A'..=b'Z' => b + 0x20,
        0xC0..=0xDE if b != 0xD7 => b + 0x20,
        _ => b,
    }
}

pub fn case_fold(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| fold_byte(b)).collect()
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            map: HashMap::with_capacity(512),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

fn new_symbol_series(bytes: &[u8]) -> *mut Series {
    // Spellings are managed from birth; the collector may reap a spelling
    // once no word references it, and `deregister` repairs the class.
    let s = make_series(bytes.len().max(1), 1, MKS_MANAGED);
    append_bytes(s, bytes);
    unsafe {
        (*s).set_flag(SERIES_FLAG_UTF8_SYMBOL);
    }
    s
}

/// Intern a spelling, returning its series. The canon for the fold-class is
/// created on first contact; later casing variants chain onto it.
pub fn intern(bytes: &[u8]) -> *mut Series {
    debug_assert!(!bytes.is_empty(), "empty spelling");
    let folded = case_fold(bytes);

    let existing = mem().symbols.map.get(&folded).copied();
    match existing {
        None => {
            let canon = new_symbol_series(bytes);
            unsafe {
                (*canon).set_flag(SERIES_FLAG_CANON);
                (*canon).link = canon as u64; // chain of one
                (*canon).misc = 0;
            }
            mem().symbols.map.insert(folded, canon);
            canon
        }
        Some(canon) => {
            // Exact spelling already present?
            let mut cursor = canon;
            loop {
                if unsafe { (*cursor).data_slice() } == bytes {
                    return cursor;
                }
                cursor = unsafe { (*cursor).link as *mut Series };
                if cursor == canon {
                    break;
                }
            }
            // New casing variant: insert after the canon.
            let synonym = new_symbol_series(bytes);
            unsafe {
                (*synonym).misc = canon as u64;
                (*synonym).link = (*canon).link;
                (*canon).link = synonym as u64;
            }
            synonym
        }
    }
}

/// Canon series for any spelling (itself, if it is the canon).
#[inline]
pub fn canon_of(spelling: *mut Series) -> *mut Series {
    unsafe {
        debug_assert!((*spelling).get_flag(SERIES_FLAG_UTF8_SYMBOL));
        if (*spelling).get_flag(SERIES_FLAG_CANON) {
            spelling
        } else {
            (*spelling).misc as *mut Series
        }
    }
}

/// Spelling bytes of a symbol series.
#[inline]
pub fn spelling_bytes<'a>(spelling: *mut Series) -> &'a [u8] {
    unsafe { (*spelling).data_slice() }
}

/// Two spellings name the same word when their canons coincide.
#[inline]
pub fn same_word(a: *mut Series, b: *mut Series) -> bool {
    canon_of(a) == canon_of(b)
}

/// Unhook a spelling that is being killed. Synonyms unlink from the chain;
/// a canon with surviving synonyms abdicates to the next one, which becomes
/// the table entry for the fold-class.
pub(crate) fn deregister(spelling: *mut Series) {
    let folded = case_fold(unsafe { (*spelling).data_slice() });

    unsafe {
        let next = (*spelling).link as *mut Series;
        if next == spelling {
            // Chain of one; the class disappears.
            debug_assert!((*spelling).get_flag(SERIES_FLAG_CANON));
            mem().symbols.map.remove(&folded);
            return;
        }

        // Find the predecessor on the circular chain and splice around.
        let mut prev = next;
        while (*prev).link as *mut Series != spelling {
            prev = (*prev).link as *mut Series;
        }
        (*prev).link = next as u64;

        if (*spelling).get_flag(SERIES_FLAG_CANON) {
            // Promote the next synonym to canon for the whole class.
            (*next).set_flag(SERIES_FLAG_CANON);
            (*next).misc = 0;
            let mut cursor = (*next).link as *mut Series;
            while cursor != next {
                (*cursor).misc = next as u64;
                cursor = (*cursor).link as *mut Series;
            }
            mem().symbols.map.insert(folded, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CoreGuard;

    #[test]
    fn fold_identity_governs_interning() {
        let _core = CoreGuard::new();
        let a = intern(b"hello");
        let b = intern(b"HELLO");
        let c = intern(b"Hello");
        let d = intern(b"other");
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(same_word(a, b));
        assert!(same_word(b, c));
        assert!(!same_word(a, d));
    }

    #[test]
    fn interning_is_idempotent_per_spelling() {
        let _core = CoreGuard::new();
        let a = intern(b"foo");
        let b = intern(b"foo");
        assert_eq!(a, b);
    }

    #[test]
    fn canon_is_first_spelling_seen() {
        let _core = CoreGuard::new();
        let first = intern(b"MixedCase");
        let second = intern(b"mixedcase");
        assert_eq!(canon_of(second), first);
        assert_eq!(spelling_bytes(second), b"mixedcase");
    }

    #[test]
    fn latin1_fold_pairs() {
        assert_eq!(fold_byte(0xC0), 0xE0); // A-grave
        assert_eq!(fold_byte(0xD7), 0xD7); // multiplication sign unchanged
        assert_eq!(fold_byte(b'Q'), b'q');
        assert_eq!(fold_byte(b'3'), b'3');
    }

    #[test]
    fn deregister_promotes_synonym() {
        let _core = CoreGuard::new();
        let canon = intern(b"Promote-Me");
        let syn = intern(b"promote-me");
        assert_eq!(canon_of(syn), canon);
        deregister(canon);
        assert!(unsafe { (*syn).get_flag(SERIES_FLAG_CANON) });
        let again = intern(b"PROMOTE-ME");
        assert_eq!(canon_of(again), syn);
    }
}
