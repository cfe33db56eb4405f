//! Size-classed memory pools
//!
//! All small allocations in the interpreter come from pools: large segments
//! acquired from the system allocator, carved into fixed-size nodes chained
//! on a freelist. Pooling keeps the allocator aware of how much memory the
//! interpreter holds (so collection can be triggered on a ballast threshold
//! and a memory quota can refuse allocation before the OS does) and lets the
//! sweeper enumerate every node of a given class.
//!
//! ## Pool table
//!
//! ```text
//! ┌────────────────────────────┬──────────────────────────────────────────┐
//! │ 16, 32, ... 256  (x16)     │ fine-grained small payloads              │
//! │ 320, 384, 448, 512 (x64)   │ mid-size payloads                        │
//! │ 1K, 2K, 3K, 4K   (x1024)   │ large payloads                           │
//! │ NODE_POOL (64 bytes)       │ series headers and cell pairings         │
//! └────────────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Requests above `4 * MEM_BIG_SIZE` bypass pooling and go straight to the
//! system allocator ("unpooled"), still counted in `mem_usage`.
//!
//! Freed nodes have their first machine word set to zero; live series and
//! pairings always have a nonzero first word, which is what lets the sweep
//! phase tell them apart while walking segments.

use std::alloc::{Layout, alloc, dealloc};

/// Large-series threshold. Payload pools run up to `4 * MEM_BIG_SIZE`.
pub const MEM_BIG_SIZE: usize = 1024;

/// Power-of-2 rounding floor for oversized growable series.
const POW2_FLOOR: usize = 2048;

/// Pool id of the node pool (series headers / pairings).
/// The payload pools occupy ids `0..NODE_POOL`.
pub const NODE_POOL: usize = 24;

/// Sentinel id recorded for allocations that bypassed pooling.
pub const SYSTEM_POOL: usize = 0xFF;

pub const MAX_POOLS: usize = NODE_POOL + 1;

/// Node size of the node pool: one series header, which is by construction
/// the size of two cells (pairings are allocated from the same pool).
pub const NODE_WIDE: usize = 64;

struct PoolSpec {
    wide: usize,
    units: usize,
}

/// Units-per-segment taper with class width: many small nodes per segment
/// for tiny classes, fewer as the class width grows.
const POOL_SPECS: [PoolSpec; MAX_POOLS] = [
    PoolSpec { wide: 16, units: 256 },
    PoolSpec { wide: 32, units: 512 },
    PoolSpec { wide: 48, units: 1024 },
    PoolSpec { wide: 64, units: 512 },
    PoolSpec { wide: 80, units: 256 },
    PoolSpec { wide: 96, units: 128 },
    PoolSpec { wide: 112, units: 128 },
    PoolSpec { wide: 128, units: 64 },
    PoolSpec { wide: 144, units: 64 },
    PoolSpec { wide: 160, units: 64 },
    PoolSpec { wide: 176, units: 32 },
    PoolSpec { wide: 192, units: 32 },
    PoolSpec { wide: 208, units: 32 },
    PoolSpec { wide: 224, units: 32 },
    PoolSpec { wide: 240, units: 32 },
    PoolSpec { wide: 256, units: 64 },
    PoolSpec { wide: 320, units: 32 },
    PoolSpec { wide: 384, units: 16 },
    PoolSpec { wide: 448, units: 16 },
    PoolSpec { wide: 512, units: 8 },
    PoolSpec { wide: MEM_BIG_SIZE, units: 16 },
    PoolSpec { wide: MEM_BIG_SIZE * 2, units: 8 },
    PoolSpec { wide: MEM_BIG_SIZE * 3, units: 4 },
    PoolSpec { wide: MEM_BIG_SIZE * 4, units: 4 },
    PoolSpec { wide: NODE_WIDE, units: 4096 }, // NODE_POOL
];

/// Segment header. The nodes follow immediately after.
#[repr(C)]
struct Segment {
    next: *mut Segment,
    size: usize, // total allocation size including this header
}

const SEGMENT_HEADER: usize = core::mem::size_of::<Segment>();

/// View of a free node: first word zero, second word links the freelist.
#[repr(C)]
struct FreeNode {
    header: u64,
    next_if_free: *mut FreeNode,
}

pub struct Pool {
    wide: usize,
    units: usize,
    segs: *mut Segment,
    first: *mut FreeNode,
    /// Total nodes carved across all segments.
    pub has: usize,
    /// Nodes currently on the freelist.
    pub free: usize,
}

/// Snapshot used by diagnostics and the accounting invariant tests.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub wide: usize,
    pub has: usize,
    pub free: usize,
    pub segments: usize,
}

pub struct Pools {
    pools: Vec<Pool>,
    /// Request size -> pool id, for sizes `0..=4 * MEM_BIG_SIZE`.
    map: Vec<u8>,
    /// Bytes currently held from the system allocator.
    pub mem_usage: usize,
    /// Refuse allocations beyond this (0 = no quota).
    pub mem_limit: usize,
    /// When pooling is bypassed, every node is its own system allocation so
    /// external memory-error detectors see individual lifetimes.
    pools_off: bool,
}

/// Abort path for segment exhaustion. No partial state is observable: the
/// counters are only bumped after the allocation succeeds.
#[cold]
fn fatal_oom(size: usize) -> ! {
    tracing::error!(size, "system allocator refused a segment");
    panic!("out of memory: allocation of {size} bytes failed");
}

#[inline]
fn layout_for(size: usize) -> Layout {
    // All pool traffic is 8-byte aligned; series payloads hold cells or
    // byte data and cells require 8.
    Layout::from_size_align(size, 8).expect("allocation size overflow")
}

impl Pools {
    pub fn new() -> Pools {
        let pools = POOL_SPECS
            .iter()
            .map(|spec| Pool {
                wide: spec.wide,
                units: spec.units,
                segs: core::ptr::null_mut(),
                first: core::ptr::null_mut(),
                has: 0,
                free: 0,
            })
            .collect();

        // Precompute the size -> pool map: each entry holds the smallest
        // class that fits the request.
        let mut map = vec![0u8; 4 * MEM_BIG_SIZE + 1];
        let mut pool_id = 0usize;
        for (size, entry) in map.iter_mut().enumerate() {
            while POOL_SPECS[pool_id].wide < size {
                pool_id += 1;
            }
            *entry = pool_id as u8;
        }

        Pools {
            pools,
            map,
            mem_usage: 0,
            mem_limit: 0,
            pools_off: std::env::var_os("REVAL_POOLS_OFF").is_some(),
        }
    }

    /// Raw tracked allocation from the system allocator. The quota check
    /// happens before the allocation; crossing it is reported by the caller
    /// as a `no-memory` policy refusal, not here.
    pub fn alloc_mem(&mut self, size: usize) -> *mut u8 {
        self.mem_usage += size;
        let ptr = unsafe { alloc(layout_for(size)) };
        if ptr.is_null() {
            fatal_oom(size);
        }
        ptr
    }

    pub fn free_mem(&mut self, ptr: *mut u8, size: usize) {
        debug_assert!(self.mem_usage >= size);
        self.mem_usage -= size;
        unsafe { dealloc(ptr, layout_for(size)) };
    }

    /// True once a configured quota has been crossed. The evaluator's
    /// security policy consults this to refuse further expansion.
    #[inline]
    pub fn over_limit(&self) -> bool {
        self.mem_limit != 0 && self.mem_usage > self.mem_limit
    }

    fn fill_pool(&mut self, pool_id: usize) {
        let (wide, units) = {
            let pool = &self.pools[pool_id];
            (pool.wide, pool.units)
        };
        let mem_size = wide * units + SEGMENT_HEADER;
        let raw = self.alloc_mem(mem_size);

        let pool = &mut self.pools[pool_id];
        let seg = raw as *mut Segment;
        unsafe {
            (*seg).size = mem_size;
            (*seg).next = pool.segs;
        }
        pool.segs = seg;
        pool.has += units;
        pool.free += units;

        // Carve the segment and chain the nodes onto the freelist. Each
        // node's header word is zeroed, the free marker.
        unsafe {
            let mut node = raw.add(SEGMENT_HEADER) as *mut FreeNode;
            let prior_first = pool.first;
            pool.first = node;
            for _ in 1..units {
                (*node).header = 0;
                let next = (node as *mut u8).add(wide) as *mut FreeNode;
                (*node).next_if_free = next;
                node = next;
            }
            (*node).header = 0;
            (*node).next_if_free = prior_first;
        }

        tracing::trace!(pool_id, wide, units, "pool segment filled");
    }

    /// Hand out one node from a pool. The node's header word is guaranteed
    /// zero; the caller must make it nonzero so pool walkers can tell it is
    /// in use.
    pub fn make_node(&mut self, pool_id: usize) -> *mut u8 {
        if self.pools_off {
            let wide = self.pools[pool_id].wide;
            let ptr = self.alloc_mem(wide);
            unsafe { core::ptr::write_bytes(ptr, 0, core::mem::size_of::<u64>()) };
            self.pools[pool_id].has += 1;
            return ptr;
        }

        if self.pools[pool_id].first.is_null() {
            self.fill_pool(pool_id);
        }
        let pool = &mut self.pools[pool_id];
        let node = pool.first;
        unsafe {
            debug_assert_eq!((*node).header, 0, "live node on freelist");
            pool.first = (*node).next_if_free;
        }
        pool.free -= 1;
        debug_assert_eq!(node as usize % 8, 0);
        node as *mut u8
    }

    /// Return a node. Its header word becomes zero, the marker that node
    /// enumeration (and the sweeper) treats as free space.
    pub fn free_node(&mut self, pool_id: usize, ptr: *mut u8) {
        if self.pools_off {
            let wide = self.pools[pool_id].wide;
            self.pools[pool_id].has -= 1;
            self.free_mem(ptr, wide);
            return;
        }

        let pool = &mut self.pools[pool_id];
        let node = ptr as *mut FreeNode;
        unsafe {
            debug_assert_ne!((*node).header, 0, "double free of pool node");
            (*node).header = 0;
            (*node).next_if_free = pool.first;
        }
        pool.first = node;
        pool.free += 1;
    }

    /// Variable-length payload allocation. Returns the data pointer and the
    /// actual size granted (the pool class width, the power-of-2 rounding,
    /// or the request itself when unpooled).
    pub fn alloc_bytes(&mut self, size: usize, round_pow2: bool) -> (*mut u8, usize) {
        let mut total = size;
        if round_pow2 && total > MEM_BIG_SIZE && total < 4 * MEM_BIG_SIZE {
            total = total.next_power_of_two().max(POW2_FLOOR);
        }

        if total > 4 * MEM_BIG_SIZE {
            return (self.alloc_mem(total), total);
        }

        let pool_id = self.map[total] as usize;
        let actual = self.pools[pool_id].wide;
        (self.make_node(pool_id), actual)
    }

    /// Release a payload previously granted by `alloc_bytes`. `size` must be
    /// the actual granted size.
    pub fn free_bytes(&mut self, ptr: *mut u8, size: usize) {
        if size > 4 * MEM_BIG_SIZE {
            self.free_mem(ptr, size);
            return;
        }
        let pool_id = self.map[size] as usize;
        debug_assert_eq!(self.pools[pool_id].wide, size, "free size is not a class width");
        self.free_node(pool_id, ptr);
    }

    /// Walk every node slot of one pool, in-use and free alike. The callback
    /// receives the node base pointer; free nodes read a zero first word.
    ///
    /// Used by the sweep phase over `NODE_POOL`.
    pub fn for_each_node(&self, pool_id: usize, mut f: impl FnMut(*mut u8)) {
        let pool = &self.pools[pool_id];
        let mut seg = pool.segs;
        while !seg.is_null() {
            unsafe {
                let mut node = (seg as *mut u8).add(SEGMENT_HEADER);
                for _ in 0..pool.units {
                    f(node);
                    node = node.add(pool.wide);
                }
                seg = (*seg).next;
            }
        }
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|p| {
                let mut segments = 0;
                let mut seg = p.segs;
                while !seg.is_null() {
                    segments += 1;
                    seg = unsafe { (*seg).next };
                }
                PoolStats {
                    wide: p.wide,
                    has: p.has,
                    free: p.free,
                    segments,
                }
            })
            .collect()
    }

    #[inline]
    pub fn pool_wide(&self, pool_id: usize) -> usize {
        self.pools[pool_id].wide
    }

    #[inline]
    pub fn pools_bypassed(&self) -> bool {
        self.pools_off
    }

    /// Release every segment back to the system. Only valid at shutdown,
    /// after all series have been freed or deliberately leaked.
    pub fn shutdown(&mut self) {
        for pool_id in 0..MAX_POOLS {
            let mut seg = self.pools[pool_id].segs;
            self.pools[pool_id].segs = core::ptr::null_mut();
            self.pools[pool_id].first = core::ptr::null_mut();
            self.pools[pool_id].has = 0;
            self.pools[pool_id].free = 0;
            while !seg.is_null() {
                let next = unsafe { (*seg).next };
                let size = unsafe { (*seg).size };
                self.free_mem(seg as *mut u8, size);
                seg = next;
            }
        }
    }
}

impl Default for Pools {
    fn default() -> Self {
        Pools::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_picks_smallest_fitting_class() {
        let pools = Pools::new();
        assert_eq!(pools.pool_wide(pools.map[1] as usize), 16);
        assert_eq!(pools.pool_wide(pools.map[16] as usize), 16);
        assert_eq!(pools.pool_wide(pools.map[17] as usize), 32);
        assert_eq!(pools.pool_wide(pools.map[257] as usize), 320);
        assert_eq!(pools.pool_wide(pools.map[513] as usize), MEM_BIG_SIZE);
        assert_eq!(
            pools.pool_wide(pools.map[4 * MEM_BIG_SIZE] as usize),
            4 * MEM_BIG_SIZE
        );
    }

    #[test]
    fn node_roundtrip_restores_freelist() {
        let mut pools = Pools::new();
        let node = pools.make_node(NODE_POOL);
        unsafe { *(node as *mut u64) = 1 }; // claim it
        let free_before = pools.pools[NODE_POOL].free;
        pools.free_node(NODE_POOL, node);
        assert_eq!(pools.pools[NODE_POOL].free, free_before + 1);
        pools.shutdown();
    }

    #[test]
    fn accounting_balances() {
        let mut pools = Pools::new();
        let baseline = pools.mem_usage;
        let (ptr, actual) = pools.alloc_bytes(100, false);
        assert_eq!(actual, 112);
        let (big, big_actual) = pools.alloc_bytes(5 * MEM_BIG_SIZE, false);
        assert_eq!(big_actual, 5 * MEM_BIG_SIZE);
        pools.free_bytes(ptr, actual);
        pools.free_bytes(big, big_actual);
        // Segments stay resident; the unpooled allocation must be refunded.
        assert!(pools.mem_usage >= baseline);
        let stats = pools.stats();
        for s in &stats {
            assert!(s.free <= s.has);
        }
        pools.shutdown();
        assert_eq!(pools.mem_usage, 0);
    }

    #[test]
    fn pow2_rounding_above_big() {
        let mut pools = Pools::new();
        let (ptr, actual) = pools.alloc_bytes(1100, true);
        assert_eq!(actual, 2048);
        pools.free_bytes(ptr, actual);
        pools.shutdown();
    }

    #[test]
    fn has_equals_free_plus_live() {
        let mut pools = Pools::new();
        let mut held = Vec::new();
        for _ in 0..100 {
            let node = pools.make_node(NODE_POOL);
            unsafe { *(node as *mut u64) = 1 };
            held.push(node);
        }
        let pool = &pools.pools[NODE_POOL];
        assert_eq!(pool.has, pool.free + held.len());
        for node in held {
            pools.free_node(NODE_POOL, node);
        }
        let pool = &pools.pools[NODE_POOL];
        assert_eq!(pool.has, pool.free);
        pools.shutdown();
    }
}
