use std::ops::{Deref, DerefMut};

use super::Marker;
use crate::cell::{Cell, CellFlags, Value};
use crate::heap::Heap;
use crate::node::NodeRef;

/// One entry of the guard stack.
pub(crate) enum Guard {
    Node(NodeRef),
    /// A private copy of the guarded value, so later writes to the original slot do not matter.
    Value(Cell),
}

impl Guard {
    pub(super) fn mark(&self, marker: &mut Marker<'_>) {
        match self {
            Guard::Node(node) => marker.mark(*node),
            Guard::Value(cell) => marker.mark_cell(cell),
        }
    }
}

/// Keeps guarded values reachable until it is dropped, on every exit path.
///
/// The scope derefs to the [Heap], so work continues through it while the guard holds:
///
/// ```
/// # use cellar_runtime::{Heap, HeapConfig};
/// let mut heap = Heap::new(HeapConfig::small());
/// let text = heap.make_text("kept");
///
/// let mut scope = heap.guard_value(&text);
/// scope.recycle();
/// assert_eq!(scope.text_of(&text).unwrap(), "kept");
/// ```
pub struct GuardScope<'a> {
    heap: &'a mut Heap,
    depth: usize,
}

impl Heap {
    pub fn guard_value(&mut self, value: &Value) -> GuardScope<'_> {
        let depth = self.guards.len();

        let mut cell = value.copied().into_cell();
        cell.set_flag(CellFlags::ROOT);
        self.guards.push(Guard::Value(cell));

        GuardScope { heap: self, depth }
    }

    pub fn guard_node(&mut self, node: NodeRef) -> GuardScope<'_> {
        let depth = self.guards.len();
        self.guards.push(Guard::Node(node));

        GuardScope { heap: self, depth }
    }

    pub fn guard_depth(&self) -> usize {
        self.guards.len()
    }
}

impl Deref for GuardScope<'_> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        self.heap
    }
}

impl DerefMut for GuardScope<'_> {
    fn deref_mut(&mut self) -> &mut Heap {
        self.heap
    }
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.heap.guards.truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::error::{Result, RuntimeError};

    #[test]
    fn guards_pop_in_order() {
        let mut heap = Heap::new(HeapConfig::small());
        let a = heap.make_text("a");
        let b = heap.make_text("b");

        {
            let mut outer = heap.guard_value(&a);
            {
                let inner = outer.guard_value(&b);
                assert_eq!(inner.guard_depth(), 2);
            }
            assert_eq!(outer.guard_depth(), 1);
            assert_eq!(outer.recycle(), 1);
        }

        assert_eq!(heap.guard_depth(), 0);
        assert_eq!(heap.recycle(), 1);
    }

    #[test]
    fn guards_are_dropped_on_error_paths() {
        fn fails(heap: &mut Heap, value: &Value) -> Result<()> {
            let scope = heap.guard_value(value);
            scope.get_field(value, "missing")?;
            Ok(())
        }

        let mut heap = Heap::new(HeapConfig::small());
        let text = heap.make_text("t");

        assert!(matches!(fails(&mut heap, &text), Err(RuntimeError::TypeMismatch { .. })));
        assert_eq!(heap.guard_depth(), 0);
    }

    #[test]
    fn guarded_nodes_survive() {
        let mut heap = Heap::new(HeapConfig::small());
        let block = heap.make_block(&[]);
        let node = block.node().unwrap();

        let mut scope = heap.guard_node(node);
        assert_eq!(scope.recycle(), 0);
        assert!(scope.is_live(node));
    }
}
