use std::any::Any;
use std::ptr::NonNull;

use super::param::Param;
use super::Dispatcher;
use crate::cell::{Kind, Value};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Link, NodeRef};
use crate::pool::LIVE_BYTE;
use crate::symbol::Symbol;

/// Record of one running action, allocated from the level pool. The collector treats the action
/// and its varlist as roots while the record is on the stack.
#[repr(C)]
pub(crate) struct Level {
    marker: u8,
    pub details: NodeRef,
    pub varlist: NodeRef,
}

impl Heap {
    pub(crate) fn push_level(&mut self, details: NodeRef, varlist: NodeRef) -> NonNull<Level> {
        let pool = self.pools.level_pool();
        let level = self.pools.alloc_unit(pool).cast::<Level>();

        unsafe {
            level.as_ptr().write(Level {
                marker: LIVE_BYTE,
                details,
                varlist,
            })
        }

        self.levels.push(level);
        level
    }

    pub(crate) fn pop_level(&mut self, level: NonNull<Level>) {
        match self.levels.pop() {
            Some(top) if top == level => {}
            _ => inconsistent("level stack popped out of order"),
        }

        debug_assert_eq!(unsafe { level.as_ref().marker }, LIVE_BYTE);

        let pool = self.pools.level_pool();
        unsafe { self.pools.free_unit(pool, level.cast()) }
    }

    /// Number of actions currently running.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// What a dispatcher sees of the call it is running: the heap, the fulfilled arguments and the
/// details of its action.
pub struct Frame<'a> {
    heap: &'a mut Heap,
    details: NodeRef,
    varlist: NodeRef,
    label: Symbol,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        heap: &'a mut Heap,
        details: NodeRef,
        varlist: NodeRef,
        label: Symbol,
    ) -> Self {
        Self {
            heap,
            details,
            varlist,
            label,
        }
    }

    pub fn heap(&mut self) -> &mut Heap {
        &mut *self.heap
    }

    pub fn label(&self) -> &str {
        self.heap.spelling(self.label)
    }

    /// The frame as a value, e.g. to bind words to it.
    pub fn varlist(&self) -> Value {
        Value::context(Kind::Frame, self.varlist)
    }

    pub fn param_count(&self) -> usize {
        self.heap.node(self.varlist).len() - 1
    }

    /// The argument of the `index`-th parameter, counting from zero.
    pub fn arg(&self, index: usize) -> Value {
        match self.heap.node(self.varlist).cells() {
            Ok(cells) => match cells.get(index + 1) {
                Some(cell) => Value::from_specific(cell.copied()),
                None => inconsistent(format!(
                    "'{}' has no parameter number {index}",
                    self.label()
                )),
            },
            Err(_) => inconsistent("frame of a running action was released"),
        }
    }

    pub fn arg_named(&self, name: &str) -> Result<Value> {
        let index = self
            .heap
            .lookup_symbol(name)
            .and_then(|symbol| self.param_index(symbol))
            .ok_or_else(|| RuntimeError::NoSuchParam {
                action: self.label().to_string(),
                param: name.to_string(),
            })?;

        Ok(self.arg(index))
    }

    fn param_index(&self, symbol: Symbol) -> Option<usize> {
        let Link::Paramlist(paramlist) = self.heap.node(self.varlist).link else {
            return None;
        };

        self.heap
            .node(paramlist)
            .cells()
            .ok()?
            .iter()
            .skip(1)
            .position(|cell| Param::from_cell(cell).is_some_and(|param| param.symbol == symbol))
    }

    /// Whether an optional parameter was left out by the caller.
    pub fn is_absent(&self, index: usize) -> bool {
        self.arg(index).is_null()
    }

    /// The `index`-th dispatcher-specific slot of the action, resolved against this frame.
    pub fn detail(&self, index: usize) -> Value {
        let cells = match self.heap.node(self.details).cells() {
            Ok(cells) => cells,
            Err(_) => inconsistent("details of a running action were released"),
        };

        match cells.get(index + 1) {
            Some(cell) => self.heap.derelativize(cell, Some(self.varlist)),
            None => inconsistent(format!("'{}' has no detail number {index}", self.label())),
        }
    }

    pub fn set_detail(&mut self, index: usize, value: &Value) {
        self.heap.write_detail(self.details, index, value);
    }

    /// Host resource held by the handle in detail slot `index`. The action keeps that handle
    /// alive, so finding it released means the heap is inconsistent.
    pub fn resource<T: Any>(&self, index: usize) -> &T {
        let handle = self.detail(index);

        match self.heap.handle_data::<T>(&handle) {
            Ok(data) => data,
            Err(RuntimeError::Unavailable) => inconsistent(format!(
                "dispatcher of '{}' ran after its resource was released",
                self.label()
            )),
            Err(error) => inconsistent(format!("bad resource slot of '{}': {error}", self.label())),
        }
    }

    /// Installs `dispatcher` for every future call of this action.
    pub fn replace_dispatcher(&mut self, dispatcher: Dispatcher) {
        self.heap.install_dispatcher(self.details, dispatcher);
    }
}
