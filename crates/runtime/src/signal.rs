//! Asynchronous signals
//!
//! HALT can be requested from outside the interpreter thread (SIGINT
//! handler, embedder escape), so the cross-thread side is a process-wide
//! atomic flag; the evaluator folds it into the thread-local signal mask
//! at its between-steps poll. Everything else about signal state is
//! single-threaded.

use crate::interp::{SIG_HALT, interp_initialized, rt};
use std::sync::atomic::{AtomicBool, Ordering};

static HALT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Request a halt. Safe from any thread and from signal handlers.
pub fn request_halt() {
    HALT_REQUESTED.store(true, Ordering::Relaxed);
}

/// Poll-and-clear, called between evaluation steps. True means deliver
/// the HALT error now.
pub fn take_halt() -> bool {
    let cross_thread = HALT_REQUESTED.swap(false, Ordering::Relaxed);
    if !interp_initialized() {
        return cross_thread;
    }
    let interp = rt();
    let local = interp.signals & SIG_HALT != 0;
    interp.signals &= !SIG_HALT;
    cross_thread || local
}

/// Hook SIGINT to the halt flag. Optional: embedders with their own
/// interrupt handling call `request_halt` themselves.
#[cfg(unix)]
pub fn install_sigint_handler() -> std::io::Result<()> {
    // signal-hook sets the flag from the handler context; the evaluator
    // notices at its next step poll.
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool as Flag;

    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let flag: Arc<Flag> = Arc::new(Flag::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;

    // A watcher thread folds the sig-safe flag into the interpreter's
    // halt request (the handler itself may only touch the atomic).
    std::thread::Builder::new()
        .name("reval-sigint".into())
        .spawn(move || {
            loop {
                if flag.swap(false, Ordering::Relaxed) {
                    request_halt();
                }
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_sigint_handler() -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn halt_flag_round_trip() {
        assert!(!take_halt());
        request_halt();
        assert!(take_halt());
        assert!(!take_halt());
    }
}
