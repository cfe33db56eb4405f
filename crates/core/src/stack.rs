//! The two value stacks
//!
//! **Data stack**: a single growable array of cells indexed by `dsp`. The
//! scanner pushes parsed values here before reversing them into arrays;
//! refinement bookkeeping and reduce-style operations use it as scratch.
//! Trap checkpoints record `dsp` and truncate back to it on unwind.
//!
//! **Chunk stack**: a LIFO allocator of variable-length cell slabs for call
//! arguments. A frame pushes one chunk of `arity` cells when fulfillment
//! begins and pops it when the call ends. Chunks live inside "chunkers"
//! (page-ish system allocations); each chunk records its predecessor, so an
//! unwind can drop to any earlier chunk boundary without walking cell by
//! cell.
//!
//! ```text
//! chunker ──▶ ┌────────┬──────────────┬────────┬──────────┬───────────┐
//!             │ chunk A│ A's cells…   │ chunk B│ B's cells│ (unused)  │
//!             │ header │              │ header │          │           │
//!             └────────┴──────────────┴───┬────┴──────────┴───────────┘
//!                 ▲                       │ prev
//!                 └───────────────────────┘
//! ```
//!
//! All chunk cells are initialized to END at push time: the collector may
//! visit a frame mid-fulfillment, and an uninitialized slot must read as a
//! terminator rather than garbage.

use crate::cell::{CELL_SIZE, Cell};
use crate::series::{MKS_ARRAY, MKS_MANAGED, Series, expand_series, make_series};
use crate::state::mem;

// =============================================================================
// Data stack
// =============================================================================

pub struct DataStack {
    array: *mut Series,
}

impl DataStack {
    pub(crate) fn unbooted() -> DataStack {
        DataStack {
            array: core::ptr::null_mut(),
        }
    }

    pub(crate) fn bootstrap(&mut self) {
        debug_assert!(self.array.is_null());
        self.array = make_series(256, CELL_SIZE, MKS_ARRAY | MKS_MANAGED);
    }

    /// The backing array, for the collector's root walk.
    #[inline]
    pub fn backing_array(&self) -> *mut Series {
        self.array
    }

    /// Current depth (the water mark traps record).
    #[inline]
    pub fn dsp(&self) -> usize {
        unsafe { (*self.array).len() }
    }

    /// Push an END-formatted cell and return it for the caller to fill.
    #[inline]
    pub fn push(&mut self) -> *mut Cell {
        let len = self.dsp();
        expand_series(self.array, len, 1).expect("data stack expansion failed");
        let slot = unsafe { (*self.array).array_at(len) };
        unsafe { (*slot).set_end() };
        slot
    }

    #[inline]
    pub fn at(&self, index: usize) -> *mut Cell {
        debug_assert!(index < self.dsp());
        unsafe { (*self.array).array_at(index) }
    }

    #[inline]
    pub fn top(&self) -> *mut Cell {
        self.at(self.dsp() - 1)
    }

    /// Pop the top cell into `out`.
    #[inline]
    pub fn pop_into(&mut self, out: &mut Cell) {
        let dsp = self.dsp();
        debug_assert!(dsp > 0, "data stack underflow");
        unsafe {
            *out = *self.at(dsp - 1);
            (*self.array).set_len(dsp - 1);
            (*self.array).term_array();
        }
    }

    /// Truncate to a recorded water mark (trap unwind, or after draining a
    /// pushed range into an array).
    #[inline]
    pub fn drop_to(&mut self, dsp: usize) {
        debug_assert!(dsp <= self.dsp());
        unsafe {
            (*self.array).set_len(dsp);
            (*self.array).term_array();
        }
    }
}

// =============================================================================
// Chunk stack
// =============================================================================

/// Default chunker payload; single chunks larger than this get a chunker of
/// their own.
const CHUNKER_PAYLOAD: usize = 4096;

#[repr(C)]
struct Chunker {
    prev: *mut Chunker,
    /// Payload bytes available in this chunker.
    size: usize,
    /// Payload bytes consumed by live chunks.
    used: usize,
    _pad: u64,
}

const CHUNKER_HEADER: usize = core::mem::size_of::<Chunker>();
const _: () = assert!(CHUNKER_HEADER == 32);

/// Chunk header, sized and aligned as one cell slot so the cells that
/// follow it stay 64-bit aligned.
#[repr(C)]
pub struct Chunk {
    prev: *mut Chunk,
    chunker: *mut Chunker,
    /// `used` value of the chunker before this chunk was pushed.
    offset: usize,
    len: usize,
}

const _: () = assert!(core::mem::size_of::<Chunk>() == CELL_SIZE);

pub struct ChunkStack {
    chunkers: *mut Chunker,
    top: *mut Chunk,
}

impl ChunkStack {
    pub fn new() -> ChunkStack {
        ChunkStack {
            chunkers: core::ptr::null_mut(),
            top: core::ptr::null_mut(),
        }
    }

    /// Water mark for trap records; `truncate_to` unwinds to it.
    #[inline]
    pub fn mark(&self) -> *mut Chunk {
        self.top
    }

    /// Push a chunk of `len` cells, all initialized to END.
    pub fn push_chunk(&mut self, len: usize) -> *mut Cell {
        let need = (len + 2) * CELL_SIZE; // header + cells + terminator

        unsafe {
            if self.chunkers.is_null() || (*self.chunkers).used + need > (*self.chunkers).size {
                let size = need.max(CHUNKER_PAYLOAD);
                let raw = mem().pools.alloc_mem(CHUNKER_HEADER + size) as *mut Chunker;
                (*raw).prev = self.chunkers;
                (*raw).size = size;
                (*raw).used = 0;
                self.chunkers = raw;
            }

            let chunker = self.chunkers;
            let base = (chunker as *mut u8).add(CHUNKER_HEADER + (*chunker).used);
            let chunk = base as *mut Chunk;
            (*chunk).prev = self.top;
            (*chunk).chunker = chunker;
            (*chunk).offset = (*chunker).used;
            (*chunk).len = len;
            (*chunker).used += need;

            let cells = base.add(CELL_SIZE) as *mut Cell;
            for i in 0..=len {
                *cells.add(i) = Cell::end();
            }

            self.top = chunk;
            cells
        }
    }

    /// Cell pointer and length of the top chunk.
    #[inline]
    pub fn top_cells(&self) -> Option<(*mut Cell, usize)> {
        if self.top.is_null() {
            return None;
        }
        unsafe {
            let cells = (self.top as *mut u8).add(CELL_SIZE) as *mut Cell;
            Some((cells, (*self.top).len))
        }
    }

    /// Pop the top chunk. A chunker emptied by the pop is released unless
    /// it is the last one (kept to absorb call churn).
    pub fn pop_chunk(&mut self) {
        let chunk = self.top;
        assert!(!chunk.is_null(), "chunk stack underflow");
        unsafe {
            let chunker = (*chunk).chunker;
            (*chunker).used = (*chunk).offset;
            self.top = (*chunk).prev;

            if (*chunker).used == 0 && !(*chunker).prev.is_null() {
                debug_assert_eq!(chunker, self.chunkers);
                self.chunkers = (*chunker).prev;
                let total = CHUNKER_HEADER + (*chunker).size;
                mem().pools.free_mem(chunker as *mut u8, total);
            }
        }
    }

    /// Drop chunks until the recorded mark is on top again.
    pub fn truncate_to(&mut self, chunk_mark: *mut Chunk) {
        while self.top != chunk_mark {
            self.pop_chunk();
        }
    }

    /// Walk live chunks newest-first; used by the collector's root scan.
    pub fn for_each_chunk(&self, mut f: impl FnMut(*mut Cell, usize)) {
        let mut chunk = self.top;
        while !chunk.is_null() {
            unsafe {
                let cells = (chunk as *mut u8).add(CELL_SIZE) as *mut Cell;
                f(cells, (*chunk).len);
                chunk = (*chunk).prev;
            }
        }
    }

    /// Release every chunker at shutdown.
    pub fn shutdown(&mut self) {
        self.top = core::ptr::null_mut();
        unsafe {
            let mut chunker = self.chunkers;
            self.chunkers = core::ptr::null_mut();
            while !chunker.is_null() {
                let prev = (*chunker).prev;
                let total = CHUNKER_HEADER + (*chunker).size;
                mem().pools.free_mem(chunker as *mut u8, total);
                chunker = prev;
            }
        }
    }
}

impl Default for ChunkStack {
    fn default() -> Self {
        ChunkStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CoreGuard;

    #[test]
    fn data_stack_push_pop() {
        let _core = CoreGuard::new();
        let m = mem();
        let base = m.data_stack.dsp();
        unsafe {
            (*m.data_stack.push()).init_integer(1);
            (*m.data_stack.push()).init_integer(2);
        }
        assert_eq!(m.data_stack.dsp(), base + 2);
        let mut out = Cell::zeroed();
        m.data_stack.pop_into(&mut out);
        assert_eq!(out.int64(), 2);
        m.data_stack.drop_to(base);
        assert_eq!(m.data_stack.dsp(), base);
    }

    #[test]
    fn chunks_nest_and_unwind() {
        let _core = CoreGuard::new();
        let chunks = &mut mem().chunks;
        let water = chunks.mark();

        let a = chunks.push_chunk(3);
        unsafe {
            (*a).init_integer(10);
            (*a.add(1)).init_integer(11);
        }
        let inner_mark = chunks.mark();
        let b = chunks.push_chunk(2);
        unsafe {
            assert!((*b).is_end()); // push initializes every slot
        }
        chunks.truncate_to(inner_mark);
        let (top, len) = chunks.top_cells().unwrap();
        assert_eq!(top, a);
        assert_eq!(len, 3);
        unsafe { assert_eq!((*a).int64(), 10) };

        chunks.truncate_to(water);
        assert!(chunks.top_cells().is_none() || chunks.mark() == water);
    }

    #[test]
    fn oversized_chunk_gets_own_chunker() {
        let _core = CoreGuard::new();
        let chunks = &mut mem().chunks;
        let water = chunks.mark();
        let cells = chunks.push_chunk(300); // larger than a default chunker
        unsafe {
            (*cells.add(299)).init_integer(7);
            assert_eq!((*cells.add(299)).int64(), 7);
        }
        chunks.truncate_to(water);
    }

    #[test]
    fn chunk_cells_terminate() {
        let _core = CoreGuard::new();
        let chunks = &mut mem().chunks;
        let water = chunks.mark();
        let cells = chunks.push_chunk(2);
        unsafe {
            (*cells).init_integer(1);
            (*cells.add(1)).init_integer(2);
            assert!((*cells.add(2)).is_end());
        }
        chunks.truncate_to(water);
    }
}
