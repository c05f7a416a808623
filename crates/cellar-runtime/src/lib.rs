//! The core of the cellar interpreter: value cells, the pool allocator backing every heap
//! resident structure, actions with their dispatch protocol, and the garbage collector.
//!
//! Everything hangs off a [Heap]. Values are [Value]s, fixed-size cells that either carry their
//! data inline or refer to a [node::Node]. Nodes are allocated from pools and, once managed,
//! are freed by the collector when nothing reachable refers to them.
//!
//! ```
//! use cellar_runtime::{Bounce, Frame, Heap, HeapConfig, Kind, ParamSpec, Result, TypeSet, Value};
//!
//! fn double(frame: &mut Frame<'_>) -> Result<Bounce> {
//!     let n = frame.arg(0).as_integer()?;
//!     Ok(Bounce::Out(Value::integer(n * 2)))
//! }
//!
//! let mut heap = Heap::new(HeapConfig::small());
//! let spec = [ParamSpec::normal("n", TypeSet::of(&[Kind::Integer]))];
//! let action = heap.register_native("double", &spec, double).unwrap();
//!
//! let out = heap.invoke(&action, &[Value::integer(21)]).unwrap();
//! assert_eq!(out.as_integer().unwrap(), 42);
//! ```

pub mod action;
pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod gc;
pub mod heap;
pub mod node;
pub mod pool;
pub mod symbol;

pub use action::deferred::{Materialized, Materializer};
pub use action::{Bounce, CallArgs, Dispatcher, Frame, ParamClass, ParamSpec};
pub use cell::{Cell, CellFlags, Kind, TypeSet, Value};
pub use config::{HeapConfig, PoolSpec};
pub use error::{FatalError, Result, RuntimeError};
pub use gc::{GcStats, GuardScope};
pub use heap::Heap;
pub use node::{Cleaner, NodeRef};
pub use symbol::Symbol;
