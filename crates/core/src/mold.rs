//! Mold buffer - shared UTF-8 scratch
//!
//! One growable byte buffer serves as scratch for scanning (de-escaped
//! string content accumulates here before being flushed into a fresh
//! series) and for molding values back to text. Uses nest: a caller takes a
//! mark, appends, then either flushes the region into a series or drops
//! back to the mark. Traps record the mark too, so an unwind releases
//! whatever a failed scan had pushed.

use crate::series::{MKS_NONE, Series, make_binary_from};
use crate::state::mem;

/// Current high-water mark; pass to `drop_to` / `flush_series`.
#[inline]
pub fn mark() -> usize {
    mem().mold_buf.len()
}

#[inline]
pub fn push_byte(b: u8) {
    mem().mold_buf.push(b);
}

#[inline]
pub fn push_bytes(bytes: &[u8]) {
    mem().mold_buf.extend_from_slice(bytes);
}

/// Append one code point as UTF-8.
#[inline]
pub fn push_char(c: char) {
    let mut buf = [0u8; 4];
    mem().mold_buf
        .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Release everything pushed after `mark`.
#[inline]
pub fn drop_to(mark: usize) {
    let buf = &mut mem().mold_buf;
    debug_assert!(mark <= buf.len());
    buf.truncate(mark);
}

/// The bytes pushed since `mark`.
#[inline]
pub fn since<'a>(mark: usize) -> &'a [u8] {
    &mem().mold_buf[mark..]
}

/// Copy the region after `mark` into a fresh byte series and release it.
pub fn flush_series(mark: usize) -> *mut Series {
    let s = make_binary_from(since(mark), MKS_NONE);
    drop_to(mark);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::free_series;
    use crate::state::CoreGuard;

    #[test]
    fn nested_marks_restore() {
        let _core = CoreGuard::new();
        let outer = mark();
        push_bytes(b"abc");
        let inner = mark();
        push_char('\u{00E9}');
        assert_eq!(since(inner), "\u{00E9}".as_bytes());
        drop_to(inner);
        assert_eq!(since(outer), b"abc");
        drop_to(outer);
    }

    #[test]
    fn flush_copies_region() {
        let _core = CoreGuard::new();
        let m = mark();
        push_bytes(b"hello");
        let s = flush_series(m);
        assert_eq!(unsafe { (*s).data_slice() }, b"hello");
        assert_eq!(mark(), m);
        free_series(s);
    }
}
