//! Mark and sweep collection of managed nodes.
//!
//! Roots are the running levels, the guard stack, `lib` and every live node that was never
//! handed to the collector. Marking is a breadth-first walk using a gray queue bounded by
//! [crate::config::HeapConfig::mark_queue_limit]. When the queue cannot take another node, the
//! node keeps its MARKED flag without SCANNED and the walk falls back to rescanning the node pool
//! for such nodes, which needs no memory at all.
//!
//! Collections only happen at safe points: right after a call's arguments are in its frame, and
//! when [Heap::recycle] is called explicitly.

use std::time::Instant;

use crate::cell::Cell;
use crate::heap::Heap;
use crate::node::{NodeFlags, NodeRef};
use crate::pool::{Pool, PoolId, PoolSet};

pub mod guard;

pub use guard::GuardScope;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub freed_last: usize,
    pub freed_total: usize,
    /// Collections whose gray queue overflowed.
    pub overflow_fallbacks: usize,
}

struct Marker<'a> {
    queue: &'a mut Vec<NodeRef>,
    limit: usize,
    overflowed: bool,
}

impl Marker<'_> {
    fn mark(&mut self, node: NodeRef) {
        let flags = unsafe { &mut *node.flags_ptr() };

        if flags.contains(NodeFlags::MARKED) {
            return;
        }

        flags.insert(NodeFlags::MARKED);

        if self.queue.len() >= self.limit || self.queue.try_reserve(1).is_err() {
            self.overflowed = true;
            return;
        }

        self.queue.push(node);
    }

    fn mark_cell(&mut self, cell: &Cell) {
        for node in cell.referenced_nodes() {
            self.mark(node);
        }
    }

    fn scan(&mut self, node: NodeRef) {
        unsafe {
            (*node.flags_ptr()).insert(NodeFlags::SCANNED);

            let (link, misc) = node.traced_slots();
            for referenced in link.into_iter().chain(misc) {
                self.mark(referenced);
            }

            for cell in node.traced_cells() {
                self.mark_cell(cell);
            }
        }
    }

    fn drain(&mut self) {
        while let Some(node) = self.queue.pop() {
            self.scan(node);
        }
    }

    /// Scans every node that was marked while the queue was full. Returns whether one was found.
    fn rescan(&mut self, pools: &PoolSet, id: PoolId) -> bool {
        let mut found = false;

        for node in live_nodes(pools, id) {
            let flags = unsafe { *node.flags_ptr() };

            if flags.contains(NodeFlags::MARKED) && !flags.contains(NodeFlags::SCANNED) {
                found = true;
                self.scan(node);
                self.drain();
            }
        }

        found
    }
}

fn live_nodes(pools: &PoolSet, id: PoolId) -> impl Iterator<Item = NodeRef> + '_ {
    pools
        .pool(id)
        .units()
        .filter(|unit| unsafe { !Pool::is_free(*unit) })
        .map(NodeRef::from_unit)
}

impl Heap {
    /// Accounts for `bytes` of new allocation against the ballast.
    pub(crate) fn charge(&mut self, bytes: usize) {
        self.ballast -= bytes as isize;

        if self.ballast <= 0 && self.config.gc_enabled && !self.gc_pending {
            self.gc_pending = true;
            tracing::trace!(ballast = self.ballast, "ballast exhausted, collection pending");
        }
    }

    /// Whether the ballast ran out since the last collection.
    pub fn gc_pending(&self) -> bool {
        self.gc_pending
    }

    /// Turns automatic collection on or off. [Heap::recycle] always collects.
    pub fn set_gc_enabled(&mut self, enabled: bool) {
        self.config.gc_enabled = enabled;

        if !enabled {
            self.gc_pending = false;
        }
    }

    /// Collects if the ballast ran out. Only call where every value the caller still needs is
    /// reachable from a root.
    pub(crate) fn collect_if_pending(&mut self) -> usize {
        if self.gc_pending && self.config.gc_enabled {
            self.recycle()
        } else {
            0
        }
    }

    /// Runs a full collection and returns the number of nodes freed.
    pub fn recycle(&mut self) -> usize {
        let started = Instant::now();
        let id = self.pools.node_pool();

        let mut queue = std::mem::take(&mut self.mark_queue);
        let mut marker = Marker {
            queue: &mut queue,
            limit: self.config.mark_queue_limit.max(1),
            overflowed: false,
        };

        marker.mark(self.lib);

        for level in &self.levels {
            let level = unsafe { level.as_ref() };
            marker.mark(level.details);
            marker.mark(level.varlist);
        }

        for guard in &self.guards {
            guard.mark(&mut marker);
        }

        for node in live_nodes(&self.pools, id) {
            let flags = unsafe { *node.flags_ptr() };

            if !flags.contains(NodeFlags::MANAGED) {
                marker.mark(node);
            }
        }

        marker.drain();

        let overflowed = marker.overflowed;
        if overflowed {
            tracing::warn!(
                limit = marker.limit,
                "mark queue overflowed, rescanning the node pool"
            );

            while marker.rescan(&self.pools, id) {}
        }

        queue.clear();
        self.mark_queue = queue;

        let freed = self.sweep(id);

        self.ballast = self.config.ballast as isize;
        self.gc_pending = false;

        self.gc_stats.collections += 1;
        self.gc_stats.freed_last = freed;
        self.gc_stats.freed_total += freed;
        if overflowed {
            self.gc_stats.overflow_fallbacks += 1;
        }

        tracing::debug!(
            freed,
            live = self.live_nodes(),
            elapsed = ?started.elapsed(),
            "collection finished"
        );

        freed
    }

    /// Frees unmarked managed nodes and clears the marks of the rest.
    fn sweep(&mut self, id: PoolId) -> usize {
        let mut freed = 0;

        for index in 0..self.pools.pool(id).unit_count() {
            let unit = self.pools.pool(id).unit(index);

            if unsafe { Pool::is_free(unit) } {
                continue;
            }

            let node = NodeRef::from_unit(unit);
            let flags = unsafe { &mut *node.flags_ptr() };

            if flags.contains(NodeFlags::MANAGED) && !flags.contains(NodeFlags::MARKED) {
                self.free_node(node);
                freed += 1;
            } else {
                flags.remove(NodeFlags::MARKED | NodeFlags::SCANNED);
            }
        }

        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Kind, Value};
    use crate::config::HeapConfig;
    use crate::node::Flavor;

    #[test]
    fn unreachable_managed_nodes_are_freed() {
        let mut heap = Heap::new(HeapConfig::small());
        let before = heap.live_nodes();

        heap.make_text("garbage");
        heap.make_block(&[Value::integer(1)]);

        assert_eq!(heap.recycle(), 2);
        assert_eq!(heap.live_nodes(), before);
        assert_eq!(heap.gc_stats().freed_last, 2);
    }

    #[test]
    fn unmanaged_nodes_are_roots() {
        let mut heap = Heap::new(HeapConfig::small());
        let holder = heap.make_node(Flavor::Array, 1, NodeFlags::empty());
        let text = heap.make_text("kept");
        heap.node_mut(holder).push_cell(text.copied().into_cell());

        assert_eq!(heap.recycle(), 0);
        assert_eq!(heap.text_of(&text).unwrap(), "kept");

        heap.manage(holder);
        assert_eq!(heap.recycle(), 2);
    }

    #[test]
    fn lib_keeps_its_values() {
        let mut heap = Heap::new(HeapConfig::small());
        let block = heap.make_block(&[Value::integer(1)]);
        heap.lib_define("kept", &block).unwrap();

        heap.recycle();

        let kept = heap.lib_get("kept").unwrap();
        assert_eq!(kept.type_of(), Kind::Block);
        assert_eq!(heap.length_of(&kept).unwrap(), 1);
    }

    #[test]
    fn overflow_falls_back_to_rescans() {
        let mut config = HeapConfig::small();
        config.mark_queue_limit = 1;

        let mut heap = Heap::new(config);
        let mut items = Vec::new();
        for n in 0..10 {
            items.push(heap.make_block(&[Value::integer(n)]));
        }
        let outer = heap.make_block(&items);
        heap.lib_define("outer", &outer).unwrap();

        heap.make_text("garbage");

        assert_eq!(heap.recycle(), 1);
        assert_eq!(heap.gc_stats().overflow_fallbacks, 1);

        let outer = heap.lib_get("outer").unwrap();
        for (n, item) in heap.values_of(&outer).unwrap().iter().enumerate() {
            let first = heap.at(item, 0).unwrap();
            assert_eq!(first.as_integer().unwrap(), n as i64);
        }
    }

    #[test]
    fn exhausted_ballast_requests_a_collection() {
        let mut config = HeapConfig::small();
        config.ballast = 1024;

        let mut heap = Heap::new(config);
        assert!(!heap.gc_pending());

        for _ in 0..16 {
            heap.make_text("filler text that needs a block of its own");
        }
        assert!(heap.gc_pending());

        heap.set_gc_enabled(false);
        assert!(!heap.gc_pending());
        assert_eq!(heap.collect_if_pending(), 0);
    }
}
