//! Test bring-up
//!
//! Tests share runner threads, so interpreter bring-up has to be
//! idempotent per thread: the first guard on a thread owns the instance
//! and tears it down, nested guards are no-ops. Mirrors the core crate's
//! `CoreGuard` one level up.

use crate::{InitOptions, init_core, shutdown_core};

pub struct RuntimeGuard {
    owner: bool,
}

impl RuntimeGuard {
    pub fn new() -> RuntimeGuard {
        if crate::interp::interp_initialized() {
            RuntimeGuard { owner: false }
        } else {
            init_core(InitOptions::default());
            RuntimeGuard { owner: true }
        }
    }
}

impl Default for RuntimeGuard {
    fn default() -> Self {
        RuntimeGuard::new()
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        if self.owner {
            shutdown_core(false);
        }
    }
}
