//! Series nodes - growable homogeneous sequences
//!
//! A series is a header node from the node pool plus element storage that is
//! either inline in the node ("singular" series, up to one cell or 32 bytes
//! of raw data) or a dynamic payload from the size-classed pools.
//!
//! ## Node Layout (64 bytes, two cells)
//!
//! ```text
//! ┌────────┬────────┬──────────────────────────────────┬────────┬────────┐
//! │ header │  link  │        content (32 bytes)        │  info  │  misc  │
//! ├────────┼────────┼──────────────────────────────────┼────────┼────────┤
//! │ flags  │ varies │ dynamic {data,len,rest,bias}     │ wide + │ varies │
//! │        │        │ or one inline cell / 32 raw bytes│ inline │        │
//! │        │        │                                  │  len   │        │
//! └────────┴────────┴──────────────────────────────────┴────────┴────────┘
//! ```
//!
//! The `info` word sits where a second inline cell's header would be, and
//! always carries the END bit in the cell-header position. An inline array
//! of one cell therefore terminates "for free": reading the slot after the
//! inline cell sees a header with END set. This is why a node is exactly
//! two cells and why `info`'s layout cannot move.
//!
//! Dynamic arrays instead reserve the final slot of their allocation as a
//! written, never-overwritten END, so an array asked for capacity 4 gets 4
//! usable cells and a fifth terminator slot.
//!
//! ## Lifecycle
//!
//! Every series is born tracked by the manuals list and invisible to the
//! collector. It either gets freed explicitly, or is promoted to MANAGED
//! (removed from manuals, swept by the collector when unreachable), or is
//! dropped in bulk when a trap unwind truncates the manuals list.
//!
//! `link` and `misc` are interpreted per series role: canon/synonym chains
//! for symbol spellings, keylist for context varlists, the owning frame for
//! reified frame varlists.

use crate::cell::{CELL_FLAG_END, Cell, Kind};
use crate::pool::NODE_POOL;
use crate::state::mem;

// =============================================================================
// Header flags
// =============================================================================

/// Nonzero marker: the node holds a live series. (A freed node is all-zero,
/// a pairing has the cell flag of its first cell instead.)
pub const SERIES_FLAG_SERIES: u64 = 1 << 0;
pub const SERIES_FLAG_HAS_DYNAMIC: u64 = 1 << 1;
pub const SERIES_FLAG_ARRAY: u64 = 1 << 2;
pub const SERIES_FLAG_MANAGED: u64 = 1 << 3;
pub const SERIES_FLAG_MARKED: u64 = 1 << 4;
pub const SERIES_FLAG_FIXED_SIZE: u64 = 1 << 5;
pub const SERIES_FLAG_POWER_OF_2: u64 = 1 << 6;
pub const SERIES_FLAG_UTF8_SYMBOL: u64 = 1 << 7;
pub const SERIES_FLAG_INACCESSIBLE: u64 = 1 << 8;
pub const SERIES_FLAG_LOCKED: u64 = 1 << 9;
pub const SERIES_FLAG_RUNNING: u64 = 1 << 10;
// bit 11 is never set on a series header: it is the CELL flag position,
// which tells a pairing's first cell apart from a series node.
pub const SERIES_FLAG_CANON: u64 = 1 << 12;
/// Varlist of a context; `link` is the keylist, `misc` a live frame or null.
pub const SERIES_FLAG_VARLIST: u64 = 1 << 13;
/// Paramlist of a function; first cell is the archetype.
pub const SERIES_FLAG_PARAMLIST: u64 = 1 << 14;

const _: () = assert!(SERIES_FLAG_SERIES != 0 && (1 << 11) != SERIES_FLAG_CANON);

// make_series flags

pub const MKS_NONE: u64 = 0;
pub const MKS_ARRAY: u64 = 1 << 0;
pub const MKS_POWER_OF_2: u64 = 1 << 1;
/// Skip the manuals list; the series starts life already MANAGED.
pub const MKS_MANAGED: u64 = 1 << 2;

/// Total byte ceiling for one series' storage.
pub const SERIES_MAX_BYTES: usize = i32::MAX as usize;

/// Bytes of element storage a node can carry inline.
pub const INLINE_CAPACITY: usize = 32;

// info word layout: wide in bits 0..8, END pattern at the cell END bit,
// inline length in bits 16..24.
const INFO_WIDE_MASK: u64 = 0xFF;
const INFO_LEN_SHIFT: u64 = 16;
const INFO_LEN_MASK: u64 = 0xFF << INFO_LEN_SHIFT;

// =============================================================================
// Node layout
// =============================================================================

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Dynamic {
    pub data: *mut u8,
    pub len: u32,
    /// Allocated capacity in elements (for arrays, includes the reserved
    /// terminator slot).
    pub rest: u32,
    /// Elements of spare capacity kept before `data` after head removals.
    pub bias: u32,
    _pad: u32,
}

#[repr(C)]
pub union Content {
    pub dynamic: Dynamic,
    pub fixed: [u8; INLINE_CAPACITY],
}

#[repr(C)]
pub struct Series {
    pub header: u64,
    pub link: u64,
    pub content: Content,
    pub info: u64,
    pub misc: u64,
}

const _: () = assert!(core::mem::size_of::<Series>() == 64);
const _: () = assert!(core::mem::size_of::<Series>() == 2 * core::mem::size_of::<Cell>());
const _: () = assert!(core::mem::offset_of!(Series, info) == 48);

impl Series {
    #[inline]
    pub fn get_flag(&self, flag: u64) -> bool {
        self.header & flag != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u64) {
        self.header |= flag;
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: u64) {
        self.header &= !flag;
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.get_flag(SERIES_FLAG_ARRAY)
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.get_flag(SERIES_FLAG_HAS_DYNAMIC)
    }

    #[inline]
    pub fn is_managed(&self) -> bool {
        self.get_flag(SERIES_FLAG_MANAGED)
    }

    #[inline]
    pub fn wide(&self) -> usize {
        (self.info & INFO_WIDE_MASK) as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.is_dynamic() {
            unsafe { self.content.dynamic.len as usize }
        } else {
            ((self.info & INFO_LEN_MASK) >> INFO_LEN_SHIFT) as usize
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the content length. Array terminators are the caller's concern
    /// (use `term_array` after).
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        if self.is_dynamic() {
            unsafe { self.content.dynamic.len = len as u32 }
        } else {
            debug_assert!(len * self.wide() <= INLINE_CAPACITY);
            self.info = (self.info & !INFO_LEN_MASK) | ((len as u64) << INFO_LEN_SHIFT);
        }
    }

    /// Allocated element capacity (arrays: including the terminator slot).
    #[inline]
    pub fn rest(&self) -> usize {
        if self.is_dynamic() {
            unsafe { self.content.dynamic.rest as usize }
        } else if self.is_array() {
            1
        } else {
            INLINE_CAPACITY / self.wide()
        }
    }

    /// Elements that can hold content (excludes an array's terminator slot).
    #[inline]
    pub fn usable(&self) -> usize {
        if self.is_array() && self.is_dynamic() {
            self.rest() - 1
        } else {
            self.rest()
        }
    }

    #[inline]
    pub fn bias(&self) -> usize {
        if self.is_dynamic() {
            unsafe { self.content.dynamic.bias as usize }
        } else {
            0
        }
    }

    #[inline]
    pub fn data(&self) -> *mut u8 {
        if self.is_dynamic() {
            unsafe { self.content.dynamic.data }
        } else {
            &self.content as *const Content as *mut u8
        }
    }

    /// Element pointer by index, unchecked beyond a debug bound.
    #[inline]
    pub fn at_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index <= self.rest());
        unsafe { self.data().add(index * self.wide()) }
    }

    #[inline]
    pub fn data_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.data(), self.len() * self.wide()) }
    }

    // -- arrays ---------------------------------------------------------------

    /// Cell pointer into an arrayed series. Index `len` is the terminator;
    /// for an inline array that slot is the node's own info word.
    #[inline]
    pub fn array_at(&self, index: usize) -> *mut Cell {
        debug_assert!(self.is_array());
        debug_assert_eq!(self.wide(), core::mem::size_of::<Cell>());
        self.at_raw(index) as *mut Cell
    }

    #[inline]
    pub fn array_head(&self) -> *mut Cell {
        self.array_at(0)
    }

    /// Write the END terminator at the current length. Inline arrays whose
    /// single slot is full rely on the info word instead; there is nothing
    /// to write (and writing would clobber the node).
    #[inline]
    pub fn term_array(&mut self) {
        debug_assert!(self.is_array());
        let len = self.len();
        if self.is_dynamic() {
            debug_assert!(len < self.rest());
            unsafe { (*self.array_at(len)).set_end() };
        } else if len == 0 {
            unsafe { (*self.array_at(0)).set_end() };
        } else {
            debug_assert_eq!(len, 1);
            debug_assert!(self.info & CELL_FLAG_END != 0);
        }
    }
}

// =============================================================================
// Allocation
// =============================================================================

fn series_data_alloc(s: &mut Series, capacity: usize, wide: usize, flags: u64) {
    let is_array = flags & MKS_ARRAY != 0;

    // Arrays reserve one slot past the requested capacity for the END.
    let slots = if is_array { capacity + 1 } else { capacity };
    let size = slots * wide;

    if size <= INLINE_CAPACITY && !is_array || is_array && capacity <= 1 {
        // Inline: data lives in the node, info doubles as the terminator.
        s.info = wide as u64 | CELL_FLAG_END;
        s.content.fixed = [0u8; INLINE_CAPACITY];
        if is_array {
            s.set_flag(SERIES_FLAG_ARRAY);
            s.term_array();
        }
        return;
    }

    let m = mem();
    let (data, actual) = m
        .pools
        .alloc_bytes(size, flags & MKS_POWER_OF_2 != 0);

    s.set_flag(SERIES_FLAG_HAS_DYNAMIC);
    s.info = wide as u64 | CELL_FLAG_END;
    s.content.dynamic = Dynamic {
        data,
        len: 0,
        rest: (actual / wide) as u32,
        bias: 0,
        _pad: 0,
    };

    if is_array {
        s.set_flag(SERIES_FLAG_ARRAY);
        // Reserved terminator in the final capacity slot, plus the live
        // terminator at length zero.
        let rest = s.rest();
        unsafe {
            (*s.array_at(rest - 1)).set_end();
        }
        s.term_array();
    }
}

/// Create a series of `capacity` elements of `wide` bytes each.
///
/// The series is added to the manuals list (collector-invisible) unless
/// `MKS_MANAGED` asks for immediate promotion.
pub fn make_series(capacity: usize, wide: usize, flags: u64) -> *mut Series {
    assert!(wide != 0 && capacity != 0, "zero-size series request");
    let total = capacity
        .checked_mul(wide)
        .filter(|t| *t < SERIES_MAX_BYTES)
        .unwrap_or_else(|| panic!("series request exceeds storage ceiling"));

    let m = mem();
    m.take_ballast(total as isize);

    let node = m.pools.make_node(NODE_POOL) as *mut Series;
    let s = unsafe { &mut *node };
    s.header = SERIES_FLAG_SERIES;
    s.link = 0;
    s.misc = 0;
    s.info = 0;
    if flags & MKS_POWER_OF_2 != 0 {
        s.set_flag(SERIES_FLAG_POWER_OF_2);
    }

    series_data_alloc(s, capacity, wide, flags);

    if flags & MKS_MANAGED != 0 {
        s.set_flag(SERIES_FLAG_MANAGED);
    } else {
        m.manuals.push(node);
    }
    node
}

/// Create an arrayed series of cells.
pub fn make_array(capacity: usize, extra_flags: u64) -> *mut Series {
    make_series(
        capacity.max(1),
        core::mem::size_of::<Cell>(),
        MKS_ARRAY | extra_flags,
    )
}

/// Total bytes of a dynamic series' allocation, bias region included.
fn series_total(s: &Series) -> usize {
    debug_assert!(s.is_dynamic());
    (s.bias() + s.rest()) * s.wide()
}

/// Free a dynamic payload, adjusting for bias so the original allocation
/// base is returned.
fn free_unbiased_data(data: *mut u8, bias: usize, total: usize, wide: usize) {
    let base = unsafe { data.sub(bias * wide) };
    mem().pools.free_bytes(base, total);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesError {
    Locked,
    FixedSize,
    Inaccessible,
}

/// Open `delta` new element slots at `index`.
///
/// Head inserts reuse the bias region in O(1) when possible; otherwise the
/// tail shifts in place if capacity allows; otherwise the series data is
/// reallocated, doubling when this series has been expanded recently.
pub fn expand_series(sp: *mut Series, index: usize, delta: usize) -> Result<(), SeriesError> {
    let s = unsafe { &mut *sp };
    if delta == 0 {
        return Ok(());
    }
    if s.get_flag(SERIES_FLAG_INACCESSIBLE) {
        return Err(SeriesError::Inaccessible);
    }
    if s.get_flag(SERIES_FLAG_LOCKED) {
        return Err(SeriesError::Locked);
    }

    let wide = s.wide();
    let len = s.len();
    debug_assert!(index <= len);

    // Cheap case: absorb the bias region for a head insert.
    if index == 0 && s.bias() >= delta && s.is_dynamic() {
        unsafe {
            let d = &mut s.content.dynamic;
            d.bias -= delta as u32;
            d.data = d.data.sub(delta * wide);
            d.rest += delta as u32;
            d.len += delta as u32;
        }
        return Ok(());
    }

    if len + delta <= s.usable() {
        // Shift the tail in place to open the gap.
        unsafe {
            let src = s.at_raw(index);
            let dst = s.at_raw(index + delta);
            core::ptr::copy(src, dst, (len - index) * wide);
        }
        s.set_len(len + delta);
        if s.is_array() {
            s.term_array();
        }
        return Ok(());
    }

    if s.get_flag(SERIES_FLAG_FIXED_SIZE) {
        return Err(SeriesError::FixedSize);
    }

    // Reallocate. Series seen expanding before grow by doubling; the MRU
    // table smooths the amortized cost of append loops.
    let m = mem();
    let extra = if m.note_expansion(sp) { len.max(delta) } else { 0 };
    let new_capacity = len + delta + extra;

    let was_dynamic = s.is_dynamic();
    let old_data = s.data();
    let old_bias = s.bias();
    let old_total = if was_dynamic { series_total(s) } else { 0 };
    let is_array = s.is_array();

    m.take_ballast((new_capacity * wide) as isize);

    let slots = if is_array { new_capacity + 1 } else { new_capacity };
    let (data, actual) = m
        .pools
        .alloc_bytes(slots * wide, s.get_flag(SERIES_FLAG_POWER_OF_2));

    unsafe {
        // Head, gap, tail.
        core::ptr::copy_nonoverlapping(old_data, data, index * wide);
        core::ptr::copy_nonoverlapping(
            old_data.add(index * wide),
            data.add((index + delta) * wide),
            (len - index) * wide,
        );
    }

    s.set_flag(SERIES_FLAG_HAS_DYNAMIC);
    s.content.dynamic = Dynamic {
        data,
        len: (len + delta) as u32,
        rest: (actual / wide) as u32,
        bias: 0,
        _pad: 0,
    };
    if is_array {
        let rest = s.rest();
        unsafe { (*s.array_at(rest - 1)).set_end() };
        s.term_array();
    }

    if was_dynamic {
        free_unbiased_data(old_data, old_bias, old_total, wide);
    }
    Ok(())
}

/// Drop `delta` elements from the head in O(1) by growing the bias region.
pub fn shrink_head(sp: *mut Series, delta: usize) {
    let s = unsafe { &mut *sp };
    debug_assert!(delta <= s.len());
    if !s.is_dynamic() {
        let wide = s.wide();
        let len = s.len();
        unsafe {
            let base = s.data();
            core::ptr::copy(base.add(delta * wide), base, (len - delta) * wide);
        }
        s.set_len(len - delta);
        if s.is_array() {
            s.term_array();
        }
        return;
    }
    let wide = s.wide();
    unsafe {
        let d = &mut s.content.dynamic;
        d.bias += delta as u32;
        d.data = d.data.add(delta * wide);
        d.rest -= delta as u32;
        d.len -= delta as u32;
    }
}

/// Reallocate a series' storage to `capacity`, optionally preserving the
/// leading `min(len, capacity)` elements. Width changes forbid preservation.
pub fn remake_series(
    sp: *mut Series,
    capacity: usize,
    wide: usize,
    preserve: bool,
) -> Result<(), SeriesError> {
    let s = unsafe { &mut *sp };
    if s.get_flag(SERIES_FLAG_LOCKED) {
        return Err(SeriesError::Locked);
    }
    assert!(
        !preserve || wide == s.wide(),
        "remake cannot preserve across a width change"
    );

    let old_len = s.len();
    let old_data = s.data();
    let old_bias = s.bias();
    let was_dynamic = s.is_dynamic();
    let old_total = if was_dynamic { series_total(s) } else { 0 };
    let old_wide = s.wide();
    let keep = if preserve { old_len.min(capacity) } else { 0 };
    let is_array = s.is_array();

    // Inline data would be clobbered by series_data_alloc; stage it.
    let mut staged = [0u8; INLINE_CAPACITY];
    if !was_dynamic && keep > 0 {
        unsafe {
            core::ptr::copy_nonoverlapping(old_data, staged.as_mut_ptr(), keep * old_wide);
        }
    }

    s.clear_flag(SERIES_FLAG_HAS_DYNAMIC);
    let mut flags = if is_array { MKS_ARRAY } else { MKS_NONE };
    if s.get_flag(SERIES_FLAG_POWER_OF_2) {
        flags |= MKS_POWER_OF_2;
    }
    mem().take_ballast((capacity * wide) as isize);
    series_data_alloc(s, capacity, wide, flags);

    if keep > 0 {
        let src = if was_dynamic {
            old_data
        } else {
            staged.as_ptr() as *mut u8
        };
        unsafe {
            core::ptr::copy_nonoverlapping(src, s.data(), keep * wide);
        }
        s.set_len(keep);
        if is_array {
            s.term_array();
        }
    }

    if was_dynamic {
        free_unbiased_data(old_data, old_bias, old_total, old_wide);
    }
    Ok(())
}

// =============================================================================
// Freeing
// =============================================================================

/// Release a series' payload and return its node to the pool. Shared tail
/// of both the explicit free path and the collector's sweep.
pub(crate) fn kill_series(sp: *mut Series) {
    let s = unsafe { &mut *sp };
    debug_assert!(s.get_flag(SERIES_FLAG_SERIES), "kill of non-series node");

    // An array fronted by a HANDLE! with a registered cleaner runs it
    // before the storage goes away.
    if s.is_array() && s.len() >= 1 {
        let first = unsafe { &mut *s.array_at(0) };
        if first.is_kind(Kind::Handle) && first.extra != 0 {
            let cleaner: fn(&mut Cell) = unsafe { core::mem::transmute(first.extra as usize) };
            cleaner(first);
        }
    }

    // Interned spellings de-register so the canon chain stays consistent.
    if s.get_flag(SERIES_FLAG_UTF8_SYMBOL) {
        crate::symbol::deregister(sp);
    }

    if s.is_dynamic() {
        let total = series_total(s);
        free_unbiased_data(s.data(), s.bias(), total, s.wide());
    }

    mem().forget_series(sp);
    s.header = 0; // free marker, before the node returns to the pool
    mem().pools.free_node(NODE_POOL, sp as *mut u8);
}

/// Collector entry point: kill a swept (managed, unreachable) series.
pub fn gc_kill_series(sp: *mut Series) {
    debug_assert!(unsafe { (*sp).is_managed() });
    kill_series(sp);
}

/// Explicitly free an unmanaged series. Managed series belong to the
/// collector; freeing one here is a bug.
pub fn free_series(sp: *mut Series) {
    let s = unsafe { &*sp };
    assert!(!s.is_managed(), "explicit free of a managed series");
    drop_from_manuals(sp);
    kill_series(sp);
}

/// Remove a series from the manuals tracking list. Most frees happen in
/// LIFO order, so the scan runs from the tail.
pub(crate) fn drop_from_manuals(sp: *mut Series) {
    let manuals = &mut mem().manuals;
    let pos = manuals
        .iter()
        .rposition(|&p| p == sp)
        .expect("series not on the manuals list");
    manuals.swap_remove(pos);
}

/// Promote a series to collector ownership.
pub fn manage_series(sp: *mut Series) {
    let s = unsafe { &mut *sp };
    if s.is_managed() {
        return;
    }
    drop_from_manuals(sp);
    s.set_flag(SERIES_FLAG_MANAGED);
}

// =============================================================================
// Pairings
// =============================================================================

/// Allocate a pairing: two cells in one node. The first cell's CELL flag is
/// what node walkers use to tell a pairing from a series header.
pub fn alloc_pairing() -> *mut Cell {
    let node = mem().pools.make_node(NODE_POOL) as *mut Cell;
    unsafe {
        (*node) = Cell::end();
        (*node.add(1)) = Cell::end();
    }
    node
}

pub fn manage_pairing(paired: *mut Cell) {
    unsafe {
        (*paired).set_flag(crate::cell::CELL_FLAG_MANAGED);
    }
}

pub fn free_pairing(paired: *mut Cell) {
    unsafe {
        debug_assert!((*paired).get_flag(crate::cell::CELL_FLAG_CELL));
        (*paired).header = 0;
    }
    mem().pools.free_node(NODE_POOL, paired as *mut u8);
}

// =============================================================================
// Append helpers
// =============================================================================

/// Append one cell to an arrayed series, returning the written slot.
pub fn append_cell(arr: *mut Series, cell: &Cell) -> *mut Cell {
    let len = unsafe { (*arr).len() };
    expand_series(arr, len, 1).expect("append to unexpandable array");
    let slot = unsafe { (*arr).array_at(len) };
    unsafe { *slot = *cell };
    slot
}

/// Append raw bytes to a byte-wide series.
pub fn append_bytes(ser: *mut Series, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let len = unsafe { (*ser).len() };
    expand_series(ser, len, bytes.len()).expect("append to unexpandable series");
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), (*ser).at_raw(len), bytes.len());
    }
}

/// Make a byte-wide series holding `bytes`.
pub fn make_binary_from(bytes: &[u8], flags: u64) -> *mut Series {
    let s = make_series(bytes.len().max(1), 1, flags);
    append_bytes(s, bytes);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CoreGuard;

    #[test]
    fn inline_array_terminates_through_info() {
        let _core = CoreGuard::new();
        let arr = make_array(1, MKS_NONE);
        let s = unsafe { &mut *arr };
        assert!(!s.is_dynamic());
        assert_eq!(s.len(), 0);
        assert!(unsafe { (*s.array_at(0)).is_end() });

        let mut c = Cell::zeroed();
        c.init_integer(7);
        append_cell(arr, &c);
        assert_eq!(s.len(), 1);
        // Slot one is the node's own info word, read as an END header.
        assert!(unsafe { (*s.array_at(1)).is_end() });
        free_series(arr);
    }

    #[test]
    fn dynamic_array_reserves_final_end() {
        let _core = CoreGuard::new();
        let arr = make_array(4, MKS_NONE);
        let s = unsafe { &mut *arr };
        assert!(s.is_dynamic());
        let rest = s.rest();
        assert!(rest >= 5);
        assert!(unsafe { (*s.array_at(rest - 1)).is_end() });

        let mut c = Cell::zeroed();
        for i in 0..4 {
            c.init_integer(i);
            append_cell(arr, &c);
        }
        assert_eq!(s.len(), 4);
        assert!(unsafe { (*s.array_at(s.len())).is_end() });
        free_series(arr);
    }

    #[test]
    fn expansion_growth_and_gap() {
        let _core = CoreGuard::new();
        let ser = make_series(4, 1, MKS_NONE);
        append_bytes(ser, b"abcd");
        expand_series(ser, 2, 3).unwrap();
        let s = unsafe { &*ser };
        assert_eq!(s.len(), 7);
        assert_eq!(&s.data_slice()[0..2], b"ab");
        assert_eq!(&s.data_slice()[5..7], b"cd");
        free_series(ser);
    }

    #[test]
    fn bias_head_push_pop_is_lossless() {
        let _core = CoreGuard::new();
        let ser = make_series(64, 1, MKS_NONE);
        append_bytes(ser, b"hello world");
        let before = unsafe { (*ser).data_slice().to_vec() };

        shrink_head(ser, 6);
        assert_eq!(unsafe { (*ser).data_slice() }, b"world");
        assert_eq!(unsafe { (*ser).bias() }, 6);

        expand_series(ser, 0, 6).unwrap();
        unsafe {
            core::ptr::copy_nonoverlapping(b"hello ".as_ptr(), (*ser).data(), 6);
        }
        assert_eq!(unsafe { (*ser).data_slice() }, &before[..]);
        free_series(ser);
    }

    #[test]
    fn fixed_size_refuses_realloc() {
        let _core = CoreGuard::new();
        let ser = make_series(8, 1, MKS_NONE);
        unsafe { (*ser).set_flag(SERIES_FLAG_FIXED_SIZE) };
        append_bytes(ser, b"12345678");
        let len = unsafe { (*ser).len() };
        let err = expand_series(ser, len, 64).unwrap_err();
        assert_eq!(err, SeriesError::FixedSize);
        free_series(ser);
    }

    #[test]
    fn remake_preserves_prefix() {
        let _core = CoreGuard::new();
        let ser = make_series(4, 1, MKS_NONE);
        append_bytes(ser, b"abcdef");
        remake_series(ser, 3, 1, true).unwrap();
        assert_eq!(unsafe { (*ser).data_slice() }, b"abc");
        free_series(ser);
    }

    #[test]
    fn pairings_are_two_cells_in_one_node() {
        let _core = CoreGuard::new();
        let paired = alloc_pairing();
        unsafe {
            assert!((*paired).is_end());
            assert!((*paired.add(1)).is_end());
            (*paired).init_integer(1);
            (*paired.add(1)).init_integer(2);
            // The first cell's CELL flag is what tells a node walker this
            // is not a series header.
            assert!((*paired).get_flag(crate::cell::CELL_FLAG_CELL));
            assert_eq!((*paired).int64(), 1);
            assert_eq!((*paired.add(1)).int64(), 2);
        }
        free_pairing(paired);
    }

    #[test]
    fn handle_cleaner_runs_on_free() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CLEANED: AtomicUsize = AtomicUsize::new(0);
        fn cleaner(_cell: &mut Cell) {
            CLEANED.fetch_add(1, Ordering::SeqCst);
        }

        let _core = CoreGuard::new();
        let arr = make_array(1, MKS_NONE);
        let mut c = Cell::zeroed();
        c.init_handle(core::ptr::null_mut(), 99);
        c.extra = cleaner as usize as u64;
        append_cell(arr, &c);
        let seen = CLEANED.load(Ordering::SeqCst);
        free_series(arr);
        assert_eq!(CLEANED.load(Ordering::SeqCst), seen + 1);
    }
}
