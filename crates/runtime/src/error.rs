//! Errors, raising, and traps
//!
//! An interpreter error is an ERROR! context carrying a category, an id, a
//! numeric code, up to three message arguments, and a "near" rendering of
//! where it happened. Raising propagates the context out-of-band as the
//! `Err` arm of evaluator `Result`s until a **trap** catches it.
//!
//! A trap is a checkpoint of all unwindable state: data stack depth, chunk
//! stack position, manuals-list length, guard-stack depths, and the mold
//! buffer mark. Catching restores every one of them, so whatever the
//! failed computation pushed or allocated is released.
//!
//! HALT is a distinguished error that ordinary traps rethrow; only the
//! unhaltable trap at the top of `do_string` (or an embedder's equivalent)
//! may catch it.

use crate::context::{append_context_key, make_context, manage_context, var_at};
use crate::interp::rt;
use reval_core::cell::Kind;
use reval_core::mold;
use reval_core::series::{Series, free_series, make_binary_from, MKS_NONE};
use reval_core::state::mem;
use reval_core::symbol::intern;
use reval_core::stack::Chunk;

// =============================================================================
// Taxonomy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Scan,
    Type,
    Resource,
    Eval,
    Ffi,
    Misc,
}

impl ErrorCategory {
    pub fn name(self) -> &'static str {
        match self {
            ErrorCategory::Scan => "syntax",
            ErrorCategory::Type => "script",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Eval => "script",
            ErrorCategory::Ffi => "access",
            ErrorCategory::Misc => "user",
        }
    }
}

/// Compact error identities. The numeric code is the discriminant offset
/// into the category's hundred-block, stable for the embedding API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorId {
    // scan
    Invalid,
    Missing,
    PastEnd,
    // type/value
    InvalidArg,
    BadMake,
    OutOfRange,
    ArgType,
    CannotReflect,
    IllegalAction,
    NotBound,
    NoValue,
    // resource
    NoMemory,
    LockedSeries,
    Protected,
    // evaluation
    NoCatch,
    Halt,
    BadRefine,
    Malconstruct,
    // ffi
    NotFfiBuild,
    OnlyCallbackPtr,
    BadLibrary,
    // generic
    Misc,
}

impl ErrorId {
    pub fn category(self) -> ErrorCategory {
        use ErrorId::*;
        match self {
            Invalid | Missing | PastEnd => ErrorCategory::Scan,
            InvalidArg | BadMake | OutOfRange | ArgType | CannotReflect | IllegalAction
            | NotBound | NoValue => ErrorCategory::Type,
            NoMemory | LockedSeries | Protected => ErrorCategory::Resource,
            NoCatch | Halt | BadRefine | Malconstruct => ErrorCategory::Eval,
            NotFfiBuild | OnlyCallbackPtr | BadLibrary => ErrorCategory::Ffi,
            Misc => ErrorCategory::Misc,
        }
    }

    pub fn code(self) -> i32 {
        use ErrorId::*;
        let (base, offset) = match self {
            Invalid => (200, 1),
            Missing => (200, 2),
            PastEnd => (200, 3),
            InvalidArg => (300, 1),
            BadMake => (300, 2),
            OutOfRange => (300, 3),
            ArgType => (300, 4),
            CannotReflect => (300, 5),
            IllegalAction => (300, 6),
            NotBound => (300, 7),
            NoValue => (300, 8),
            NoMemory => (400, 1),
            LockedSeries => (400, 2),
            Protected => (400, 3),
            NoCatch => (500, 1),
            Halt => (500, 2),
            BadRefine => (500, 3),
            Malconstruct => (500, 4),
            NotFfiBuild => (600, 1),
            OnlyCallbackPtr => (600, 2),
            BadLibrary => (600, 3),
            Misc => (800, 0),
        };
        base + offset
    }

    pub fn name(self) -> &'static str {
        use ErrorId::*;
        match self {
            Invalid => "invalid",
            Missing => "missing",
            PastEnd => "past-end",
            InvalidArg => "invalid-arg",
            BadMake => "bad-make",
            OutOfRange => "out-of-range",
            ArgType => "arg-type",
            CannotReflect => "cannot-reflect",
            IllegalAction => "illegal-action",
            NotBound => "not-bound",
            NoValue => "no-value",
            NoMemory => "no-memory",
            LockedSeries => "locked-series",
            Protected => "protected",
            NoCatch => "no-catch",
            Halt => "halt",
            BadRefine => "bad-refine",
            Malconstruct => "malconstruct",
            NotFfiBuild => "not-ffi-build",
            OnlyCallbackPtr => "only-callback-ptr",
            BadLibrary => "bad-library",
            Misc => "misc",
        }
    }

    /// Message template; `{1}` `{2}` `{3}` splice the arguments.
    pub fn template(self) -> &'static str {
        use ErrorId::*;
        match self {
            Invalid => "invalid {1} -- {2}",
            Missing => "missing {1} at {2}",
            PastEnd => "out of range or past end",
            InvalidArg => "invalid argument: {1}",
            BadMake => "cannot MAKE {1} from: {2}",
            OutOfRange => "value out of range: {1}",
            ArgType => "{1} does not allow {2} for its {3} argument",
            CannotReflect => "cannot reflect {1} of: {2}",
            IllegalAction => "action not allowed on: {1}",
            NotBound => "{1} word is not bound to a context",
            NoValue => "{1} has no value",
            NoMemory => "not enough memory: {1} bytes",
            LockedSeries => "series is source or permanently locked",
            Protected => "protected value or series - cannot modify",
            NoCatch => "no CATCH for THROW of {1}",
            Halt => "halted by user or script",
            BadRefine => "incompatible or invalid refinement: {1}",
            Malconstruct => "invalid construction spec: {1}",
            NotFfiBuild => "this build does not support FFI",
            OnlyCallbackPtr => "only callback functions may be passed by pointer",
            BadLibrary => "bad library (already closed?)",
            Misc => "watch out",
        }
    }
}

// =============================================================================
// Raising
// =============================================================================

/// An in-flight raise: the ERROR! context unwinding toward the nearest
/// trap. The context is managed; nothing between the raise point and the
/// catch allocates, so it cannot be swept mid-flight.
#[derive(Debug, Clone, Copy)]
pub struct Raised(pub *mut Series);

const KEY_NAMES: [&[u8]; 8] = [
    b"type", b"id", b"code", b"arg1", b"arg2", b"arg3", b"near", b"where",
];

const IDX_TYPE: usize = 1;
const IDX_ID: usize = 2;
const IDX_CODE: usize = 3;
const IDX_ARG1: usize = 4;
const IDX_NEAR: usize = 7;
const IDX_WHERE: usize = 8;

/// Fill the `where` slot with a block of the frame labels active at raise
/// time, innermost first.
fn fill_where(ctx: *mut Series) {
    if !crate::interp::interp_initialized() {
        return;
    }
    let labels = crate::frame::frame_label_block();
    if let Some(block) = labels {
        unsafe {
            (*var_at(ctx, IDX_WHERE)).init_series(Kind::Block, block, 0);
        }
    }
}

/// Build an ERROR! context. `args` are pre-formed texts (molded values or
/// plain words); at most three are kept.
pub fn make_error(id: ErrorId, args: &[&str]) -> *mut Series {
    let ctx = make_context(KEY_NAMES.len(), Kind::Error);
    for name in KEY_NAMES {
        append_context_key(ctx, intern(name));
    }

    unsafe {
        (*var_at(ctx, IDX_TYPE)).init_word(Kind::Word, intern(id.category().name().as_bytes()));
        (*var_at(ctx, IDX_ID)).init_word(Kind::Word, intern(id.name().as_bytes()));
        (*var_at(ctx, IDX_CODE)).init_integer(id.code() as i64);
        for (n, text) in args.iter().take(3).enumerate() {
            let s = make_binary_from(text.as_bytes(), MKS_NONE);
            reval_core::series::manage_series(s);
            (*var_at(ctx, IDX_ARG1 + n)).init_series(Kind::String, s, 0);
        }
        let near = nearest_frame_location();
        if let Some(text) = near {
            let s = make_binary_from(text.as_bytes(), MKS_NONE);
            reval_core::series::manage_series(s);
            (*var_at(ctx, IDX_NEAR)).init_series(Kind::String, s, 0);
        }
    }
    fill_where(ctx);
    manage_context(ctx);
    ctx
}

/// Raise an error: build the context and return the `Err` every evaluator
/// layer propagates with `?`.
pub fn fail<T>(id: ErrorId, args: &[&str]) -> Result<T, Raised> {
    let ctx = make_error(id, args);
    tracing::debug!(id = id.name(), code = id.code(), "error raised");
    Err(Raised(ctx))
}

/// Attach an explicit "near" rendering (the scanner's path; running frames
/// fill theirs from the frame chain). Returns the context for chaining.
pub fn attach_near(ctx: *mut Series, near: &str) -> *mut Series {
    unsafe {
        let s = make_binary_from(near.as_bytes(), MKS_NONE);
        reval_core::series::manage_series(s);
        (*var_at(ctx, IDX_NEAR)).init_series(Kind::String, s, 0);
    }
    ctx
}

/// Raise with an explicit "near" rendering.
pub fn fail_near<T>(id: ErrorId, args: &[&str], near: &str) -> Result<T, Raised> {
    let ctx = make_error(id, args);
    attach_near(ctx, near);
    Err(Raised(ctx))
}

fn nearest_frame_location() -> Option<String> {
    if !crate::interp::interp_initialized() {
        return None;
    }
    let f = rt().frame_top;
    if f.is_null() {
        return None;
    }
    Some(unsafe { crate::frame::describe_frame(&*f) })
}

// -- interrogation ------------------------------------------------------------

pub fn error_id_name(ctx: *mut Series) -> String {
    let id = unsafe { &*var_at(ctx, IDX_ID) };
    if id.is_kind(Kind::Word) {
        String::from_utf8_lossy(reval_core::symbol::spelling_bytes(id.word_spelling()))
            .into_owned()
    } else {
        String::from("misc")
    }
}

pub fn error_code(ctx: *mut Series) -> i32 {
    let code = unsafe { &*var_at(ctx, IDX_CODE) };
    if code.is_kind(Kind::Integer) {
        code.int64() as i32
    } else {
        0
    }
}

pub fn is_halt(ctx: *mut Series) -> bool {
    error_code(ctx) == ErrorId::Halt.code()
}

/// Render the error's message template with its arguments spliced in.
pub fn error_message(ctx: *mut Series) -> String {
    let id_name = error_id_name(ctx);
    let template = ALL_IDS
        .iter()
        .find(|id| id.name() == id_name)
        .map(|id| id.template())
        .unwrap_or("unknown error");

    let mut message = String::from(template);
    for n in 0..3 {
        let pattern = format!("{{{}}}", n + 1);
        if !message.contains(&pattern) {
            continue;
        }
        let arg = unsafe { &*var_at(ctx, IDX_ARG1 + n) };
        let text = if arg.is_kind(Kind::String) {
            String::from_utf8_lossy(unsafe { (*arg.series()).data_slice() }).into_owned()
        } else {
            String::from("...")
        };
        message = message.replace(&pattern, &text);
    }
    message
}

pub fn error_near(ctx: *mut Series) -> Option<String> {
    let near = unsafe { &*var_at(ctx, IDX_NEAR) };
    if near.is_kind(Kind::String) {
        Some(String::from_utf8_lossy(unsafe { (*near.series()).data_slice() }).into_owned())
    } else {
        None
    }
}

const ALL_IDS: [ErrorId; 22] = [
    ErrorId::Invalid,
    ErrorId::Missing,
    ErrorId::PastEnd,
    ErrorId::InvalidArg,
    ErrorId::BadMake,
    ErrorId::OutOfRange,
    ErrorId::ArgType,
    ErrorId::CannotReflect,
    ErrorId::IllegalAction,
    ErrorId::NotBound,
    ErrorId::NoValue,
    ErrorId::NoMemory,
    ErrorId::LockedSeries,
    ErrorId::Protected,
    ErrorId::NoCatch,
    ErrorId::Halt,
    ErrorId::BadRefine,
    ErrorId::Malconstruct,
    ErrorId::NotFfiBuild,
    ErrorId::OnlyCallbackPtr,
    ErrorId::BadLibrary,
    ErrorId::Misc,
];

// =============================================================================
// Traps
// =============================================================================

/// The unwindable-state checkpoint a trap records at push.
pub struct TrapMarks {
    dsp: usize,
    chunk: *mut Chunk,
    manuals_len: usize,
    guard_series_len: usize,
    guard_cells_len: usize,
    mold_mark: usize,
}

pub fn snapshot_marks() -> TrapMarks {
    let m = mem();
    TrapMarks {
        dsp: m.data_stack.dsp(),
        chunk: m.chunks.mark(),
        manuals_len: m.manuals.len(),
        guard_series_len: m.guarded_series.len(),
        guard_cells_len: m.guarded_cells.len(),
        mold_mark: mold::mark(),
    }
}

/// Restore every recorded mark, freeing manually-tracked series allocated
/// since the snapshot.
pub fn unwind_to_marks(marks: &TrapMarks) {
    let m = mem();
    m.data_stack.drop_to(marks.dsp);
    m.chunks.truncate_to(marks.chunk);

    while m.manuals.len() > marks.manuals_len {
        let series = m.manuals[m.manuals.len() - 1];
        free_series(series);
    }

    m.guarded_series.truncate(marks.guard_series_len);
    m.guarded_cells.truncate(marks.guard_cells_len);
    mold::drop_to(marks.mold_mark);

    // A throw that was in flight when the raise happened is abandoned by
    // the unwind; the stash must not stay armed.
    if crate::interp::interp_initialized() {
        let interp = rt();
        if interp.thrown_alive {
            interp.thrown_stash = reval_core::cell::Cell::end();
            interp.thrown_alive = false;
        }
    }
}

/// Run `body` under a trap. An ordinary raise is caught, the marks are
/// restored, and the error context is returned. HALT passes through.
pub fn with_trap<T>(body: impl FnOnce() -> Result<T, Raised>) -> Result<Result<T, *mut Series>, Raised> {
    let marks = snapshot_marks();
    match body() {
        Ok(value) => Ok(Ok(value)),
        Err(Raised(ctx)) if is_halt(ctx) => Err(Raised(ctx)),
        Err(Raised(ctx)) => {
            unwind_to_marks(&marks);
            Ok(Err(ctx))
        }
    }
}

/// Run `body` under an unhaltable trap: catches everything, HALT included.
/// This is the outermost barrier of `do_string` and the callback boundary.
pub fn with_trap_all<T>(body: impl FnOnce() -> Result<T, Raised>) -> Result<T, *mut Series> {
    let marks = snapshot_marks();
    match body() {
        Ok(value) => Ok(value),
        Err(Raised(ctx)) => {
            unwind_to_marks(&marks);
            Err(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RuntimeGuard;

    #[test]
    fn error_context_carries_identity() {
        let _rt = RuntimeGuard::new();
        let ctx = make_error(ErrorId::ArgType, &["append", "integer!", "series"]);
        assert_eq!(error_id_name(ctx), "arg-type");
        assert_eq!(error_code(ctx), ErrorId::ArgType.code());
        assert_eq!(
            error_message(ctx),
            "append does not allow integer! for its series argument"
        );
    }

    #[test]
    fn trap_restores_marks() {
        let _rt = RuntimeGuard::new();
        let m = mem();
        let dsp = m.data_stack.dsp();
        let manuals = m.manuals.len();

        let caught = with_trap(|| -> Result<(), Raised> {
            unsafe { (*mem().data_stack.push()).init_integer(3) };
            let _scratch = reval_core::series::make_series(64, 1, reval_core::series::MKS_NONE);
            fail(ErrorId::InvalidArg, &["3"])
        })
        .expect("not a halt");

        let err = caught.unwrap_err();
        assert_eq!(error_id_name(err), "invalid-arg");
        assert_eq!(mem().data_stack.dsp(), dsp);
        assert_eq!(mem().manuals.len(), manuals);
    }

    #[test]
    fn halt_passes_ordinary_traps() {
        let _rt = RuntimeGuard::new();
        let result = with_trap(|| -> Result<(), Raised> { fail(ErrorId::Halt, &[]) });
        assert!(result.is_err());

        let outer = with_trap_all(|| -> Result<(), Raised> { fail(ErrorId::Halt, &[]) });
        assert!(is_halt(outer.unwrap_err()));
    }
}
