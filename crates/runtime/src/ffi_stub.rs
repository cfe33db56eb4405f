//! Builds without the `ffi` feature still accept ROUTINE! construction
//! requests; they just refuse them with `not-ffi-build`.

use crate::error::{ErrorId, Raised, fail};
use crate::frame::Frame;

pub fn native_make_routine_unavailable(_f: &mut Frame) -> Result<(), Raised> {
    fail(ErrorId::NotFfiBuild, &[])
}
