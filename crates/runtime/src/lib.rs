//! Reval Runtime: the evaluating half of the interpreter
//!
//! Everything that knows what a value *means* lives here: the scanner
//! that loads UTF-8 source into cell trees, the frame-based evaluator
//! with its enfix and throw protocols, bindings and contexts, the
//! tracing collector, the FFI trampoline, and the `extern "C"` embedding
//! surface.
//!
//! # Modules
//!
//! - `scan`: source text -> arrays of cells (tables, tokens, literals)
//! - `eval`, `frame`, `path`: the evaluator protocol
//! - `bind`, `context`, `func`: words, contexts, functions
//! - `error`: error contexts, raising, traps
//! - `gc`: mark-and-sweep over the node pool
//! - `ffi`: routines and callbacks (behind the `ffi` feature)
//! - `api`: the C-callable embedding surface
//! - `natives`: the core-protocol natives and the lib context

pub mod api;
pub mod bind;
pub mod codec;
pub mod context;
pub mod error;
pub mod eval;
pub mod frame;
pub mod func;
pub mod gc;
pub mod interp;
pub mod mold;
pub mod natives;
pub mod path;
pub mod scan;
pub mod signal;

#[cfg(feature = "ffi")]
pub mod ffi;
#[cfg(not(feature = "ffi"))]
pub mod ffi_stub;

#[doc(hidden)]
pub mod test_support;

use bind::{BIND_DEEP, BIND_SET, Specifier, bind_values_deep};
use error::with_trap_all;
use eval::{do_array_full, is_thrown, take_thrown};
use interp::rt;
use reval_core::cell::{Cell, Kind};
use reval_core::series::{MKS_NONE, Series, make_array, manage_series};
use reval_core::symbol::{canon_of, spelling_bytes};

pub use error::{ErrorCategory, ErrorId, Raised};
pub use interp::{Event, Interp};

/// Interpreter bring-up options.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Deliver SIGINT as the HALT signal.
    pub sigint_halt: bool,
    /// Emit a `tracing` event per evaluation step.
    pub trace: bool,
}

/// Bring up the interpreter on this thread: core memory, the interp
/// state, the lib context with its natives, and the codec registry.
pub fn init_core(options: InitOptions) {
    if !reval_core::core_state_initialized() {
        reval_core::init_core_state();
    }
    interp::install_interp();

    let interp = rt();
    let empty = make_array(1, MKS_NONE);
    manage_series(empty);
    interp.empty_array = empty;

    let root = make_array(8, MKS_NONE);
    manage_series(root);
    interp.root_array = root;

    interp.lib = natives::init_lib();
    codec::init_codecs();
    interp.trace_on = options.trace;

    if options.sigint_halt {
        if let Err(err) = signal::install_sigint_handler() {
            tracing::warn!(%err, "SIGINT handler not installed");
        }
    }

    tracing::debug!("interpreter initialized");
}

/// Tear down this thread's interpreter. With `clean`, a final collection
/// runs first so handle cleaners fire; the return value is the number of
/// series still manually tracked (leaks under a clean shutdown).
pub fn shutdown_core(clean: bool) -> usize {
    if clean {
        gc::recycle();
    }
    interp::uninstall_interp();
    reval_core::shutdown_core_state()
}

/// Everything `do_string` can come back with.
#[derive(Debug, Clone, Copy)]
pub enum DoResult {
    /// The last expression's value.
    Value(Cell),
    /// Evaluation produced nothing (empty input, all barriers).
    Void,
    /// An error was raised and not trapped.
    Error(*mut Series),
    /// HALT was delivered.
    Halt,
    /// QUIT unwound the whole script.
    Quit,
}

impl DoResult {
    /// The embedding API's result code: positive datatype number of the
    /// value, 0 for void, -1 halt, -2 quit, other negatives for errors.
    pub fn code(&self) -> i32 {
        match self {
            DoResult::Value(cell) => cell.kind_byte() as i32,
            DoResult::Void => 0,
            DoResult::Halt => -1,
            DoResult::Quit => -2,
            DoResult::Error(_) => -3,
        }
    }
}

/// Scan and evaluate a UTF-8 source string against the lib context. This
/// is the outermost (unhaltable) trap: every raise is caught here.
pub fn do_string(source: &[u8]) -> DoResult {
    let result = with_trap_all(|| {
        let array = scan::scan_source(source)?;
        bind_values_deep(array, rt().lib, BIND_DEEP | BIND_SET);
        let mut out = Cell::end();
        do_array_full(&mut out, array, 0, Specifier::Specified)?;
        Ok(out)
    });

    match result {
        Err(ctx) => {
            if error::is_halt(ctx) {
                DoResult::Halt
            } else {
                DoResult::Error(ctx)
            }
        }
        Ok(mut out) => {
            if is_thrown(&out) {
                // An uncaught throw: QUIT unwinds cleanly, anything else
                // is a no-catch error.
                if out.is_kind(Kind::Word)
                    && spelling_bytes(canon_of(out.word_spelling())) == b"quit"
                {
                    let _ = take_thrown(&mut out);
                    return DoResult::Quit;
                }
                let label = crate::mold::mold_cell(&out);
                let _ = take_thrown(&mut out);
                return DoResult::Error(error::make_error(ErrorId::NoCatch, &[&label]));
            }
            if out.is_end() {
                DoResult::Void
            } else {
                DoResult::Value(out)
            }
        }
    }
}
