//! The [Heap] owns every pool, node and symbol of one runtime instance, together with the state
//! the collector needs: the level stack, the guard stack and the module context `lib`.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::action::frame::Level;
use crate::cell::{Binding, Cell, Extra, Kind, Value};
use crate::config::HeapConfig;
use crate::error::inconsistent;
use crate::gc::guard::Guard;
use crate::gc::GcStats;
use crate::node::{Link, Node, NodeFlags, NodeRef};
use crate::pool::{Pool, PoolSet, PoolStats};
use crate::symbol::{Symbol, SymbolTable};

pub struct Heap {
    pub(crate) config: HeapConfig,
    pub(crate) pools: PoolSet,
    symbols: SymbolTable,
    /// Varlist of the module context.
    pub(crate) lib: NodeRef,
    pub(crate) levels: Vec<NonNull<Level>>,
    pub(crate) guards: Vec<Guard>,
    /// Bytes left before a collection is requested.
    pub(crate) ballast: isize,
    pub(crate) gc_pending: bool,
    pub(crate) gc_stats: GcStats,
    pub(crate) mark_queue: Vec<NodeRef>,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        let pools = PoolSet::new(&config, size_of::<Node>(), size_of::<Level>());

        let mut heap = Heap {
            ballast: config.ballast as isize,
            config,
            pools,
            symbols: SymbolTable::default(),
            lib: NodeRef::dangling(),
            levels: Vec::new(),
            guards: Vec::new(),
            gc_pending: false,
            gc_stats: GcStats::default(),
            mark_queue: Vec::new(),
        };

        // The module context is never managed, which keeps it alive as a root.
        heap.lib = heap.make_context_nodes(Kind::Object, 0, NodeFlags::empty());

        tracing::debug!(
            ballast = heap.config.ballast,
            classes = heap.config.size_classes.len(),
            "heap created"
        );

        heap
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn intern(&mut self, spelling: &str) -> Symbol {
        self.symbols.intern(spelling)
    }

    pub fn lookup_symbol(&self, spelling: &str) -> Option<Symbol> {
        self.symbols.lookup(spelling)
    }

    pub fn spelling(&self, symbol: Symbol) -> &str {
        self.symbols.spelling(symbol)
    }

    /// Resolves a cell read from an array. A relative cell takes `specifier`, which must be a
    /// frame of the action the cell is relative to, as its binding.
    pub fn derelativize(&self, cell: &Cell, specifier: Option<NodeRef>) -> Value {
        let mut resolved = cell.copied();

        if let Binding::Relative(action) = cell.binding() {
            let Some(varlist) = specifier else {
                inconsistent("relative value read without a frame to resolve it");
            };

            let expected = self.paramlist_of(action);

            match self.node(varlist).link {
                Link::Paramlist(paramlist) if paramlist == expected => {}
                _ => inconsistent("relative value resolved against a frame of another action"),
            }

            resolved.set_extra(Extra::Binding(Binding::Context(varlist)));
        }

        Value::from_specific(resolved)
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    pub fn node_pool_stats(&self) -> PoolStats {
        self.pools.pool(self.pools.node_pool()).stats()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc_stats
    }

    /// Bytes currently held by allocations larger than every size class.
    pub fn oversized_bytes(&self) -> usize {
        self.pools.oversized_bytes()
    }

    /// Number of live nodes, managed or not.
    pub fn live_nodes(&self) -> usize {
        let stats = self.node_pool_stats();
        stats.in_use
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(HeapConfig::default())
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let pool = self.pools.node_pool();

        for index in 0..self.pools.pool(pool).unit_count() {
            let unit = self.pools.pool(pool).unit(index);

            if unsafe { !Pool::is_free(unit) } {
                self.free_node(NodeRef::from_unit(unit));
            }
        }

        let level_pool = self.pools.level_pool();
        for level in std::mem::take(&mut self.levels) {
            unsafe { self.pools.free_unit(level_pool, level.cast()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Value;

    #[test]
    fn dropping_the_heap_runs_cleaners() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static CLEANED: AtomicUsize = AtomicUsize::new(0);

        fn clean(_: Box<dyn std::any::Any>) {
            CLEANED.fetch_add(1, Ordering::SeqCst);
        }

        let mut heap = Heap::new(HeapConfig::small());
        heap.make_handle(Box::new("resource"), Some(clean));
        drop(heap);

        assert_eq!(CLEANED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plain_values_derelativize_to_themselves() {
        let heap = Heap::new(HeapConfig::small());
        let value = Value::integer(3);

        assert_eq!(heap.derelativize(&value, None), value);
    }

    #[test]
    fn live_nodes_are_counted() {
        let mut heap = Heap::new(HeapConfig::small());
        let before = heap.live_nodes();
        heap.make_text("one");
        heap.make_text("two");

        assert_eq!(heap.live_nodes(), before + 2);
    }
}
