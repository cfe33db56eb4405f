//! Garbage collector - stop-the-world mark and sweep
//!
//! Runs only between evaluation steps (the recycle signal is polled where
//! no partially-formatted cell is reachable). The mark phase walks every
//! cell reachable from:
//!
//! - the pinned root array and the lib context
//! - the data stack (up to its current depth) and every chunk-stack slab
//! - the frame chain: out cell, scratch cell, argument slab, source
//!   array, bindings, varlist
//! - the guard stacks and the manuals list
//! - the thrown stash and the parked callback error
//!
//! The sweep phase enumerates the node pool: any MANAGED series without a
//! mark is killed, any marked node has its mark cleared for the next
//! cycle. Manual (unmanaged) series are never swept - they are freed
//! explicitly or by trap unwind.

use crate::interp::rt;
use reval_core::cell::{
    CELL_FLAG_MANAGED, CELL_FLAG_MARKED, Cell, Kind,
};
use reval_core::pool::NODE_POOL;
use reval_core::series::{
    SERIES_FLAG_MANAGED, SERIES_FLAG_MARKED, SERIES_FLAG_PARAMLIST, SERIES_FLAG_SERIES,
    SERIES_FLAG_UTF8_SYMBOL, SERIES_FLAG_VARLIST, Series,
};
use reval_core::state::mem;

struct Marker {
    /// Arrays whose cells still need scanning.
    pending: Vec<*mut Series>,
}

impl Marker {
    fn new() -> Marker {
        Marker {
            pending: Vec::with_capacity(256),
        }
    }

    fn mark_series(&mut self, sp: *mut Series) {
        if sp.is_null() {
            return;
        }
        let s = unsafe { &mut *sp };
        debug_assert!(s.get_flag(SERIES_FLAG_SERIES), "mark of non-series node");
        if s.get_flag(SERIES_FLAG_MARKED) {
            return;
        }
        s.set_flag(SERIES_FLAG_MARKED);

        if s.is_array() {
            self.pending.push(sp);
        }
        if s.get_flag(SERIES_FLAG_VARLIST) {
            self.mark_series(s.link as *mut Series); // keylist
        }
        if s.get_flag(SERIES_FLAG_PARAMLIST) {
            self.mark_series(s.link as *mut Series); // underlying
        }
        if s.get_flag(SERIES_FLAG_UTF8_SYMBOL) && s.misc != 0 {
            self.mark_series(s.misc as *mut Series); // canon of a synonym
        }
    }

    fn mark_cell(&mut self, cp: *const Cell) {
        let cell = unsafe { &*cp };
        if cell.is_end() {
            return;
        }
        // Pairing heads carry their own mark bit.
        if cell.get_flag(CELL_FLAG_MANAGED) {
            unsafe { (*(cp as *mut Cell)).set_flag(CELL_FLAG_MARKED) };
        }

        let Some(kind) = cell.kind() else { return };
        match kind {
            k if k.is_series() => {
                self.mark_series(cell.payload[0] as *mut Series);
                self.mark_series(cell.extra as *mut Series); // binding/specifier
            }
            k if k.is_word() => {
                self.mark_series(cell.payload[0] as *mut Series); // spelling
                self.mark_series(cell.extra as *mut Series); // binding
            }
            Kind::Function => {
                self.mark_series(cell.payload[0] as *mut Series); // paramlist
                self.mark_series(cell.payload[1] as *mut Series); // body holder
                self.mark_series(cell.extra as *mut Series); // binding
            }
            k if k.is_context() => {
                self.mark_series(cell.payload[0] as *mut Series); // varlist
            }
            Kind::Typeset => {
                self.mark_series(cell.extra as *mut Series); // key spelling
            }
            Kind::Varargs => {
                self.mark_series(cell.payload[0] as *mut Series); // feed
            }
            Kind::Library => {
                self.mark_series(cell.payload[1] as *mut Series); // path
            }
            _ => {}
        }
    }

    /// Drain the pending-array worklist, scanning cells breadth-first so
    /// deep trees cannot overflow the Rust stack.
    fn propagate(&mut self) {
        while let Some(array) = self.pending.pop() {
            let len = unsafe { (*array).len() };
            for i in 0..len {
                // Void slots inside varlists read as END and carry nothing.
                self.mark_cell(unsafe { (*array).array_at(i) });
            }
        }
    }
}

fn mark_roots(marker: &mut Marker) {
    let interp = rt();

    marker.mark_series(interp.root_array);
    marker.mark_series(interp.lib);
    marker.mark_series(interp.empty_array);
    if interp.thrown_alive {
        let stash = interp.thrown_stash;
        marker.mark_cell(&stash);
    }
    marker.mark_series(interp.callback_error);

    let m = mem();

    // Data stack up to the current depth.
    marker.mark_series(m.data_stack.backing_array());
    for i in 0..m.data_stack.dsp() {
        marker.mark_cell(m.data_stack.at(i));
    }

    // Chunk slabs (argument cells of every in-flight call).
    let mut chunk_cells: Vec<(*mut Cell, usize)> = Vec::new();
    m.chunks.for_each_chunk(|cells, len| chunk_cells.push((cells, len)));
    for (cells, len) in chunk_cells {
        for i in 0..len {
            marker.mark_cell(unsafe { cells.add(i) });
        }
    }

    // Guards.
    for &s in &m.guarded_series {
        marker.mark_series(s);
    }
    for &c in &m.guarded_cells {
        marker.mark_cell(c);
    }

    // The manuals list: unmanaged series are not swept, but managed series
    // they reference must survive.
    for &s in &m.manuals {
        let series = unsafe { &mut *s };
        if series.is_array() && !series.get_flag(SERIES_FLAG_MARKED) {
            series.set_flag(SERIES_FLAG_MARKED);
            marker.pending.push(s);
        }
    }

    // The frame chain.
    let mut f = interp.frame_top;
    while !f.is_null() {
        let frame = unsafe { &*f };
        marker.mark_cell(frame.out);
        let scratch = frame.cell;
        marker.mark_cell(&scratch);
        marker.mark_series(frame.source);
        if let crate::bind::Specifier::Ctx(ctx) = frame.specifier {
            marker.mark_series(ctx);
        }
        marker.mark_series(frame.label);
        marker.mark_series(frame.func);
        marker.mark_series(frame.original);
        marker.mark_series(frame.binding);
        marker.mark_series(frame.varlist);
        for i in 0..frame.num_args {
            marker.mark_cell(unsafe { frame.args_head.add(i) });
        }
        f = frame.prior;
    }
}

/// Run a full collection cycle. Returns the number of series killed.
pub fn recycle() -> usize {
    let span = tracing::debug_span!("recycle");
    let _entered = span.enter();

    let mut marker = Marker::new();
    mark_roots(&mut marker);
    marker.propagate();

    // Sweep the node pool: unmarked managed series die, marks clear.
    let mut doomed: Vec<*mut Series> = Vec::new();
    let mut doomed_pairings: Vec<*mut Cell> = Vec::new();
    let mut live = 0usize;
    mem().pools.for_each_node(NODE_POOL, |node| {
        let header = unsafe { *(node as *const u64) };
        if header == 0 {
            return; // free node
        }
        if header & reval_core::cell::CELL_FLAG_CELL != 0 {
            let cell = node as *mut Cell;
            let managed = header & CELL_FLAG_MANAGED != 0;
            let marked = header & CELL_FLAG_MARKED != 0;
            if managed && !marked {
                doomed_pairings.push(cell);
            } else {
                unsafe { (*cell).clear_flag(CELL_FLAG_MARKED) };
                live += 1;
            }
            return;
        }
        let series = node as *mut Series;
        let s = unsafe { &mut *series };
        if s.get_flag(SERIES_FLAG_MARKED) {
            s.clear_flag(SERIES_FLAG_MARKED);
            live += 1;
        } else if s.get_flag(SERIES_FLAG_MANAGED) {
            doomed.push(series);
        } else {
            live += 1; // manual series are never swept
        }
    });

    let swept = doomed.len() + doomed_pairings.len();
    for series in doomed {
        reval_core::series::gc_kill_series(series);
    }
    for pairing in doomed_pairings {
        reval_core::series::free_pairing(pairing);
    }

    let m = mem();
    m.sig_recycle = false;
    m.ballast = m.ballast_reset;

    tracing::debug!(swept, live, "recycle complete");
    swept
}

/// Count the live (non-free) series nodes, for the stability checks.
pub fn count_live_series() -> usize {
    let mut count = 0usize;
    mem().pools.for_each_node(NODE_POOL, |node| {
        let header = unsafe { *(node as *const u64) };
        if header != 0 && header & reval_core::cell::CELL_FLAG_CELL == 0 {
            count += 1;
        }
    });
    count
}
