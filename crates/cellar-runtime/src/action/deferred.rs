//! Natives whose implementation is produced on first call.
//!
//! A deferred native starts out with a dispatcher that only materializes the real one: it hands
//! the link name and source text to a [Materializer], stores whatever resource comes back in a
//! handle and installs the materialized dispatcher before asking for a redispatch. Later calls go
//! straight to the installed dispatcher.

use std::any::Any;

use super::{Bounce, Dispatcher, Frame, ParamSpec};
use crate::cell::Value;
use crate::error::{inconsistent, Result};
use crate::heap::Heap;
use crate::node::Cleaner;

pub type Materializer = fn(link_name: &str, source: &str) -> Result<Materialized>;

/// Result of materializing a deferred native.
pub struct Materialized {
    pub dispatcher: Dispatcher,
    /// Data the dispatcher reads back with [Frame::resource] from [RESOURCE].
    pub resource: Option<Box<dyn Any>>,
    pub cleaner: Option<Cleaner>,
}

impl Materialized {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            resource: None,
            cleaner: None,
        }
    }

    pub fn with_resource(mut self, resource: Box<dyn Any>, cleaner: Option<Cleaner>) -> Self {
        self.resource = Some(resource);
        self.cleaner = cleaner;
        self
    }
}

const LINK_NAME: usize = 0;
const SOURCE: usize = 1;
const MATERIALIZER: usize = 2;

/// Details slot holding the handle of the materialized resource.
pub const RESOURCE: usize = 3;

impl Heap {
    pub fn make_deferred_native(
        &mut self,
        label: &str,
        spec: &[ParamSpec],
        link_name: &str,
        source: &str,
        materializer: Materializer,
    ) -> Value {
        let action = self.make_action(spec, materialize, RESOURCE + 1, label);

        let link_name = self.make_text(link_name);
        let source = self.make_text(source);
        let materializer = self.make_handle(Box::new(materializer), None);

        let Some(details) = action.node() else {
            inconsistent("action without details");
        };

        // Nothing can collect between creation and these writes.
        self.write_detail(details, LINK_NAME, &link_name);
        self.write_detail(details, SOURCE, &source);
        self.write_detail(details, MATERIALIZER, &materializer);

        action
    }

    /// Whether a deferred native is still waiting for its first call.
    pub fn is_pending(&self, action: &Value) -> Result<bool> {
        let details = self.action_details(action)?;
        Ok(self.dispatcher_is(details, materialize))
    }
}

fn materialize(frame: &mut Frame<'_>) -> Result<Bounce> {
    let link_name = frame.detail(LINK_NAME);
    let link_name = frame.heap().text_of(&link_name)?;
    let source = frame.detail(SOURCE);
    let source = frame.heap().text_of(&source)?;
    let materializer = *frame.resource::<Materializer>(MATERIALIZER);

    tracing::debug!(action = frame.label(), link_name, "materializing deferred native");

    let Materialized {
        dispatcher,
        resource,
        cleaner,
    } = materializer(&link_name, &source)?;

    if let Some(resource) = resource {
        let handle = frame.heap().make_handle(resource, cleaner);
        frame.set_detail(RESOURCE, &handle);
    }

    frame.replace_dispatcher(dispatcher);
    Ok(Bounce::Redispatch)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cell::{Kind, TypeSet};
    use crate::config::HeapConfig;
    use crate::error::RuntimeError;

    static MATERIALIZED: AtomicUsize = AtomicUsize::new(0);

    fn scaled(frame: &mut Frame<'_>) -> Result<Bounce> {
        let factor = *frame.resource::<i64>(RESOURCE);
        let n = frame.arg(0).as_integer()?;
        Ok(Bounce::Out(Value::integer(n * factor)))
    }

    fn build(link_name: &str, source: &str) -> Result<Materialized> {
        MATERIALIZED.fetch_add(1, Ordering::SeqCst);
        assert_eq!(link_name, "scale");

        let factor = source
            .trim()
            .parse::<i64>()
            .map_err(|error| RuntimeError::User(error.to_string()))?;

        Ok(Materialized::new(scaled).with_resource(Box::new(factor), None))
    }

    fn refuse(_: &str, _: &str) -> Result<Materialized> {
        Err("no compiler available".into())
    }

    fn spec() -> [ParamSpec; 1] {
        [ParamSpec::normal("n", TypeSet::of(&[Kind::Integer]))]
    }

    #[test]
    fn materializes_once() {
        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_deferred_native("triple", &spec(), "scale", "3", build);

        assert!(heap.is_pending(&action).unwrap());

        let first = heap.invoke(&action, &[Value::integer(2)]).unwrap();
        let second = heap.invoke(&action, &[Value::integer(5)]).unwrap();

        assert_eq!(first.as_integer().unwrap(), 6);
        assert_eq!(second.as_integer().unwrap(), 15);
        assert_eq!(MATERIALIZED.load(Ordering::SeqCst), 1);
        assert!(!heap.is_pending(&action).unwrap());
    }

    #[test]
    fn failed_materialization_stays_pending() {
        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_deferred_native("broken", &spec(), "scale", "3", refuse);

        assert_eq!(
            heap.invoke(&action, &[Value::integer(2)]),
            Err(RuntimeError::User("no compiler available".into()))
        );
        assert!(heap.is_pending(&action).unwrap());
        assert_eq!(heap.depth(), 0);
    }
}
