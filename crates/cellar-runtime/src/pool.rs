//! This module defines the fixed-size-class allocator that backs every heap node of the runtime.
//! Each [Pool] hands out units of one width, carving them from segments obtained from the system
//! allocator. Units are recycled through an intrusive free list and segments are never returned
//! to the system while the pool is alive.
//!
//! Requests wider than the largest class are served by [PoolSet::allocate_oversized], a direct
//! `malloc` whose address is tracked until it is released.

use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr::NonNull;

use fxhash::FxHashMap;

use crate::config::{HeapConfig, PoolSpec, UNIT_ALIGN};
use crate::error::{fatal, FatalError};

/// First byte of a unit sitting on a free list.
pub const FREE_BYTE: u8 = 0xF5;

/// First byte of a unit holding a live node header or level record.
pub const LIVE_BYTE: u8 = 0x1C;

/// The shape a unit takes while it is on a free list. The marker byte overlays the first byte of
/// whatever structure the unit holds while in use.
#[repr(C)]
struct FreeUnit {
    marker: u8,
    next: Option<NonNull<FreeUnit>>,
}

struct Segment {
    base: NonNull<u8>,
    layout: Layout,
    units: usize,
}

/// Index of a pool inside a [PoolSet].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(pub(crate) u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub width: usize,
    pub segments: usize,
    /// Units ever carved from segments.
    pub carved: usize,
    /// Units currently on the free list.
    pub free: usize,
    pub in_use: usize,
}

pub struct Pool {
    width: usize,
    units_per_segment: usize,
    segments: Vec<Segment>,
    head: Option<NonNull<FreeUnit>>,
    tail: Option<NonNull<FreeUnit>>,
    free: usize,
    carved: usize,
}

impl Pool {
    pub fn new(spec: PoolSpec) -> Self {
        let width = spec.width.max(size_of::<FreeUnit>());
        let width = width.div_ceil(UNIT_ALIGN) * UNIT_ALIGN;

        Self {
            width,
            units_per_segment: spec.units_per_segment.max(1),
            segments: Vec::new(),
            head: None,
            tail: None,
            free: 0,
            carved: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Pops a unit off the free list, carving a new segment when the list is empty.
    pub fn alloc(&mut self) -> NonNull<u8> {
        let Some(unit) = self.head else {
            return self.carve_segment();
        };

        unsafe {
            self.head = (*unit.as_ptr()).next;
        }

        if self.head.is_none() {
            self.tail = None;
        }

        self.free -= 1;
        unit.cast()
    }

    /// Gives a unit back to this pool. It is appended at the tail, so recently freed units are the
    /// last ones to be handed out again.
    ///
    /// # Safety
    /// The unit must have been obtained from [Pool::alloc] on this same pool, must not be on the
    /// free list already, and whatever it held must have been dropped.
    pub unsafe fn free(&mut self, unit: NonNull<u8>) {
        debug_assert!(self.contains(unit), "unit does not belong to this pool");
        self.push_free(unit.cast());
    }

    fn push_free(&mut self, unit: NonNull<FreeUnit>) {
        unsafe {
            unit.as_ptr().write(FreeUnit {
                marker: FREE_BYTE,
                next: None,
            });

            match self.tail {
                Some(tail) => (*tail.as_ptr()).next = Some(unit),
                None => self.head = Some(unit),
            }
        }

        self.tail = Some(unit);
        self.free += 1;
    }

    /// Allocates a new segment, threads all but its last unit onto the free list and returns the
    /// last one.
    fn carve_segment(&mut self) -> NonNull<u8> {
        let units = self.units_per_segment;
        let bytes = self.width * units;

        let layout = Layout::from_size_align(bytes, UNIT_ALIGN)
            .unwrap_or_else(|_| fatal(FatalError::AllocationFailed { bytes }));

        let base = unsafe { alloc::alloc(layout) };

        let Some(base) = NonNull::new(base) else {
            tracing::error!(bytes, width = self.width, "pool segment allocation failed");
            alloc::handle_alloc_error(layout)
        };

        for index in 0..units - 1 {
            let unit = unsafe { base.as_ptr().add(index * self.width) };
            self.push_free(unsafe { NonNull::new_unchecked(unit.cast()) });
        }

        self.segments.push(Segment { base, layout, units });
        self.carved += units;

        tracing::trace!(width = self.width, units, "carved pool segment");

        unsafe { NonNull::new_unchecked(base.as_ptr().add((units - 1) * self.width)) }
    }

    /// Whether `unit` is the start of a unit in one of this pool's segments.
    pub fn contains(&self, unit: NonNull<u8>) -> bool {
        let address = unit.as_ptr() as usize;

        self.segments.iter().any(|segment| {
            let start = segment.base.as_ptr() as usize;
            let end = start + segment.units * self.width;
            (start..end).contains(&address) && (address - start) % self.width == 0
        })
    }

    /// Units ever carved. Together with [Pool::unit] this walks the segments by index, which lets
    /// the collector free units while it walks.
    pub(crate) fn unit_count(&self) -> usize {
        self.carved
    }

    /// The `index`-th carved unit, counting across segments in carving order.
    pub(crate) fn unit(&self, index: usize) -> NonNull<u8> {
        let segment = &self.segments[index / self.units_per_segment];
        let offset = (index % self.units_per_segment) * self.width;
        unsafe { NonNull::new_unchecked(segment.base.as_ptr().add(offset)) }
    }

    /// Every unit ever carved, free or not, in segment order.
    pub(crate) fn units(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        (0..self.unit_count()).map(move |index| self.unit(index))
    }

    /// Reads the marker byte of a unit.
    ///
    /// # Safety
    /// `unit` must come from [Pool::units] or [Pool::alloc] of this pool.
    pub(crate) unsafe fn is_free(unit: NonNull<u8>) -> bool {
        unit.as_ptr().read() == FREE_BYTE
    }

    /// Walks the free list. Used to audit the counters.
    pub fn free_list_len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;

        while let Some(unit) = cursor {
            count += 1;
            cursor = unsafe { (*unit.as_ptr()).next };
        }

        count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            width: self.width,
            segments: self.segments.len(),
            carved: self.carved,
            free: self.free,
            in_use: self.carved - self.free,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            unsafe { alloc::dealloc(segment.base.as_ptr(), segment.layout) }
        }
    }
}

/// Where a [Block] came from, so it can be given back to the right place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Pool(PoolId),
    System,
}

/// A data block handed out by [PoolSet::alloc_block].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub ptr: NonNull<u8>,
    /// Usable bytes, the full width of the unit rather than the requested size.
    pub bytes: usize,
    pub origin: Origin,
}

/// All the pools of one heap: the graduated data-block classes followed by the node-header and the
/// level-record pools.
pub struct PoolSet {
    pools: Vec<Pool>,
    classes: usize,
    node: PoolId,
    level: PoolId,
    oversized: FxHashMap<usize, usize>,
}

impl PoolSet {
    pub fn new(config: &HeapConfig, node_width: usize, level_width: usize) -> Self {
        let mut pools = config
            .size_classes
            .iter()
            .map(|spec| Pool::new(*spec))
            .collect::<Vec<_>>();

        let classes = pools.len();

        pools.push(Pool::new(PoolSpec::new(
            node_width,
            config.node_units_per_segment,
        )));
        pools.push(Pool::new(PoolSpec::new(
            level_width,
            config.level_units_per_segment,
        )));

        Self {
            pools,
            classes,
            node: PoolId(classes as u16),
            level: PoolId(classes as u16 + 1),
            oversized: FxHashMap::default(),
        }
    }

    pub fn pool(&self, id: PoolId) -> &Pool {
        &self.pools[id.0 as usize]
    }

    pub fn node_pool(&self) -> PoolId {
        self.node
    }

    pub fn level_pool(&self) -> PoolId {
        self.level
    }

    pub fn alloc_unit(&mut self, id: PoolId) -> NonNull<u8> {
        self.pools[id.0 as usize].alloc()
    }

    /// # Safety
    /// See [Pool::free].
    pub unsafe fn free_unit(&mut self, id: PoolId, unit: NonNull<u8>) {
        self.pools[id.0 as usize].free(unit)
    }

    /// The smallest data-block class whose width fits `bytes`.
    pub fn class_for(&self, bytes: usize) -> Option<PoolId> {
        let classes = &self.pools[..self.classes];
        let index = classes.partition_point(|pool| pool.width < bytes);
        (index < classes.len()).then_some(PoolId(index as u16))
    }

    pub fn alloc_block(&mut self, bytes: usize) -> Block {
        match self.class_for(bytes) {
            Some(id) => Block {
                ptr: self.alloc_unit(id),
                bytes: self.pool(id).width,
                origin: Origin::Pool(id),
            },
            None => {
                let bytes = bytes.div_ceil(UNIT_ALIGN) * UNIT_ALIGN;
                Block {
                    ptr: self.allocate_oversized(bytes),
                    bytes,
                    origin: Origin::System,
                }
            }
        }
    }

    /// # Safety
    /// The block must come from [PoolSet::alloc_block] on this set and must not be used again.
    pub unsafe fn free_block(&mut self, block: Block) {
        match block.origin {
            Origin::Pool(id) => self.free_unit(id, block.ptr),
            Origin::System => self.free_oversized(block.ptr),
        }
    }

    /// Direct system allocation for requests beyond the largest class.
    pub fn allocate_oversized(&mut self, bytes: usize) -> NonNull<u8> {
        let ptr = unsafe { libc::malloc(bytes.max(1)) };

        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            fatal(FatalError::AllocationFailed { bytes })
        };

        self.oversized.insert(ptr.as_ptr() as usize, bytes);
        tracing::trace!(bytes, "oversized allocation");
        ptr
    }

    /// # Safety
    /// `ptr` must come from [PoolSet::allocate_oversized] and must not be used again.
    pub unsafe fn free_oversized(&mut self, ptr: NonNull<u8>) {
        if self.oversized.remove(&(ptr.as_ptr() as usize)).is_none() {
            crate::error::inconsistent("freeing an untracked oversized allocation");
        }

        libc::free(ptr.as_ptr().cast());
    }

    /// Bytes currently held by oversized allocations.
    pub fn oversized_bytes(&self) -> usize {
        self.oversized.values().sum()
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(Pool::stats).collect()
    }
}

impl Drop for PoolSet {
    fn drop(&mut self) {
        for (address, _) in self.oversized.drain() {
            unsafe { libc::free(address as *mut libc::c_void) }
        }
    }
}
