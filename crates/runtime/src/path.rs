//! Path evaluation
//!
//! Paths navigate left to right: the head resolves like a word (or
//! evaluates, for groups), and each subsequent element picks into the
//! value so far. Hitting a FUNCTION! mid-path turns the remaining elements
//! into refinement demands and invokes. SET-PATH! assigns through the
//! final picker; GET-PATH! never invokes.

use crate::bind::{Specifier, ctx_slot, derelativize, derive_specifier, get_var};
use crate::context::find_key;
use crate::error::{ErrorId, Raised, fail};
use crate::eval::{eval_next, invoke, is_thrown};
use crate::frame::Frame;
use reval_core::cell::{CELL_FLAG_PROTECTED, Cell, Kind};
use reval_core::series::{SERIES_FLAG_LOCKED, SERIES_FLAG_RUNNING, Series};
use reval_core::symbol::{canon_of, spelling_bytes};

struct Walk {
    current: Cell,
    /// Spelling of the last word traversed (function-call labels).
    label: *mut Series,
}

fn resolve_head(head: &Cell, specifier: Specifier) -> Result<Walk, Raised> {
    match head.kind_checked() {
        Kind::Word | Kind::GetWord => {
            let slot = get_var(head, specifier)?;
            let value = unsafe { *slot };
            if value.is_end() {
                return fail(ErrorId::NoValue, &[&text_of(head.word_spelling())]);
            }
            Ok(Walk {
                current: value,
                label: head.word_spelling(),
            })
        }
        Kind::Group => {
            let mut out = Cell::end();
            crate::eval::do_any_array(&mut out, head, specifier)?;
            if out.is_end() {
                return fail(ErrorId::NoValue, &["(group in path)"]);
            }
            Ok(Walk {
                current: out,
                label: core::ptr::null_mut(),
            })
        }
        _ => Ok(Walk {
            current: derelativize(head, specifier),
            label: core::ptr::null_mut(),
        }),
    }
}

fn text_of(spelling: *mut Series) -> String {
    String::from_utf8_lossy(spelling_bytes(spelling)).into_owned()
}

/// Resolve a picker element to a usable key (groups evaluate first).
fn resolve_picker(picker: &Cell, specifier: Specifier) -> Result<Cell, Raised> {
    if picker.is_kind(Kind::Group) {
        let mut out = Cell::end();
        crate::eval::do_any_array(&mut out, picker, specifier)?;
        return Ok(out);
    }
    Ok(derelativize(picker, specifier))
}

/// The slot a picker addresses inside `target`, or an immediate value for
/// non-slot picks (string characters).
enum Picked {
    Slot(*mut Cell),
    Immediate(Cell),
}

fn pick_in(target: &Cell, picker: &Cell) -> Result<Picked, Raised> {
    match target.kind_checked() {
        Kind::Object | Kind::Module | Kind::Error | Kind::Frame => {
            if !picker.kind().is_some_and(|k| k.is_word()) {
                return fail(ErrorId::InvalidArg, &[&crate::mold::mold_cell(picker)]);
            }
            let varlist = target.context_varlist();
            let index = find_key(varlist, picker.word_spelling());
            if index == 0 {
                return fail(ErrorId::InvalidArg, &[&text_of(picker.word_spelling())]);
            }
            Ok(Picked::Slot(ctx_slot(varlist, index)?))
        }

        Kind::Block | Kind::Group | Kind::Path | Kind::SetPath | Kind::GetPath
        | Kind::LitPath => {
            let array = target.series();
            let len = unsafe { (*array).len() };
            match picker.kind_checked() {
                Kind::Integer => {
                    let n = picker.int64();
                    let pos = target.index() as i64 + n - 1;
                    if n < 1 || pos as usize >= len {
                        let mut blank = Cell::zeroed();
                        blank.init_blank();
                        return Ok(Picked::Immediate(blank));
                    }
                    Ok(Picked::Slot(unsafe { (*array).array_at(pos as usize) }))
                }
                Kind::Word => {
                    // SELECT semantics: find the word, yield what follows.
                    let canon = canon_of(picker.word_spelling());
                    for i in target.index()..len {
                        let item = unsafe { &*(*array).array_at(i) };
                        if item.kind().is_some_and(|k| k.is_word())
                            && canon_of(item.word_spelling()) == canon
                        {
                            if i + 1 < len {
                                return Ok(Picked::Slot(unsafe {
                                    (*array).array_at(i + 1)
                                }));
                            }
                            break;
                        }
                    }
                    let mut blank = Cell::zeroed();
                    blank.init_blank();
                    Ok(Picked::Immediate(blank))
                }
                _ => fail(ErrorId::InvalidArg, &[&crate::mold::mold_cell(picker)]),
            }
        }

        Kind::String | Kind::Binary | Kind::File | Kind::Email | Kind::Url | Kind::Tag => {
            if !picker.is_kind(Kind::Integer) {
                return fail(ErrorId::InvalidArg, &[&crate::mold::mold_cell(picker)]);
            }
            let series = target.series();
            let len = unsafe { (*series).len() };
            let pos = target.index() as i64 + picker.int64() - 1;
            if picker.int64() < 1 || pos as usize >= len {
                let mut blank = Cell::zeroed();
                blank.init_blank();
                return Ok(Picked::Immediate(blank));
            }
            let byte = unsafe { *(*series).at_raw(pos as usize) };
            let mut out = Cell::zeroed();
            if target.is_kind(Kind::Binary) {
                out.init_integer(byte as i64);
            } else {
                out.init_char(byte as char);
            }
            Ok(Picked::Immediate(out))
        }

        _ => fail(
            ErrorId::IllegalAction,
            &[target.kind_checked().name()],
        ),
    }
}

/// Gather trailing path elements as refinement demands.
fn gather_refinements(
    array: *mut Series,
    from: usize,
    specifier: Specifier,
) -> Result<Vec<*mut Series>, Raised> {
    let len = unsafe { (*array).len() };
    let mut canons = Vec::new();
    for i in from..len {
        let element = unsafe { &*(*array).array_at(i) };
        let resolved = resolve_picker(element, specifier)?;
        match resolved.kind() {
            Some(k) if k.is_word() => canons.push(canon_of(resolved.word_spelling())),
            _ => {
                return fail(
                    ErrorId::BadRefine,
                    &[&crate::mold::mold_cell(&resolved)],
                );
            }
        }
    }
    Ok(canons)
}

// =============================================================================
// PATH! - may invoke
// =============================================================================

pub fn eval_path(f: &mut Frame, path: &Cell) -> Result<(), Raised> {
    let spec = derive_specifier(path, f.specifier);
    let array = path.series();
    let len = unsafe { (*array).len() };
    let mut walk = resolve_head(unsafe { &*(*array).array_at(path.index()) }, spec)?;

    let mut i = path.index() + 1;
    while i < len {
        if walk.current.is_kind(Kind::Function) {
            let refinements = gather_refinements(array, i, spec)?;
            return invoke(f, &walk.current.clone(), walk.label, false, &refinements);
        }
        let picker = resolve_picker(unsafe { &*(*array).array_at(i) }, spec)?;
        walk.current = match pick_in(&walk.current, &picker)? {
            Picked::Slot(slot) => unsafe { *slot },
            Picked::Immediate(value) => value,
        };
        if let Some(k) = picker.kind() {
            if k.is_word() {
                walk.label = picker.word_spelling();
            }
        }
        i += 1;
    }

    // Path ended on a function value: invoke with no refinements.
    if walk.current.is_kind(Kind::Function) {
        return invoke(f, &walk.current.clone(), walk.label, false, &[]);
    }
    unsafe { *f.out = walk.current };
    Ok(())
}

// =============================================================================
// GET-PATH! - never invokes
// =============================================================================

pub fn eval_get_path(f: &mut Frame, path: &Cell) -> Result<(), Raised> {
    let spec = derive_specifier(path, f.specifier);
    let array = path.series();
    let len = unsafe { (*array).len() };
    let mut walk = resolve_head(unsafe { &*(*array).array_at(path.index()) }, spec)?;

    for i in path.index() + 1..len {
        let picker = resolve_picker(unsafe { &*(*array).array_at(i) }, spec)?;
        walk.current = match pick_in(&walk.current, &picker)? {
            Picked::Slot(slot) => unsafe { *slot },
            Picked::Immediate(value) => value,
        };
    }
    unsafe { *f.out = walk.current };
    Ok(())
}

// =============================================================================
// SET-PATH! - assigns through the final picker
// =============================================================================

pub fn eval_set_path(f: &mut Frame, path: &Cell) -> Result<(), Raised> {
    // Right-hand side evaluates first, landing in out (the set-path's own
    // result, like SET-WORD!).
    eval_next(f.out, f.source, &mut f.index, f.specifier, 0)?;
    if is_thrown(unsafe { &*f.out }) {
        return Ok(());
    }
    if unsafe { (*f.out).is_end() } {
        return fail(ErrorId::NoValue, &[&crate::mold::mold_cell(path)]);
    }

    let spec = derive_specifier(path, f.specifier);
    let array = path.series();
    let len = unsafe { (*array).len() };
    debug_assert!(len >= 2);
    let mut walk = resolve_head(unsafe { &*(*array).array_at(path.index()) }, spec)?;

    for i in path.index() + 1..len - 1 {
        let picker = resolve_picker(unsafe { &*(*array).array_at(i) }, spec)?;
        walk.current = match pick_in(&walk.current, &picker)? {
            Picked::Slot(slot) => unsafe { *slot },
            Picked::Immediate(value) => value,
        };
    }

    refuse_if_held(&walk.current)?;
    let picker = resolve_picker(unsafe { &*(*array).array_at(len - 1) }, spec)?;
    match pick_in(&walk.current, &picker)? {
        Picked::Slot(slot) => unsafe {
            if (*slot).get_flag(CELL_FLAG_PROTECTED) {
                return fail(ErrorId::Protected, &[]);
            }
            *slot = *f.out;
        },
        Picked::Immediate(_) => {
            return fail(ErrorId::InvalidArg, &[&crate::mold::mold_cell(&picker)]);
        }
    }
    Ok(())
}

/// Mutation barrier: a RUNNING frame context (native hold) and LOCKED
/// series both refuse writes.
fn refuse_if_held(target: &Cell) -> Result<(), Raised> {
    if let Some(k) = target.kind() {
        if k.is_context() {
            let varlist = target.context_varlist();
            if unsafe { (*varlist).get_flag(SERIES_FLAG_RUNNING) } {
                return fail(ErrorId::Protected, &[]);
            }
        } else if k.is_series() {
            let series = target.series();
            if unsafe { (*series).get_flag(SERIES_FLAG_LOCKED) } {
                return fail(ErrorId::LockedSeries, &[]);
            }
        }
    }
    Ok(())
}
