//! Actions whose body is a block.
//!
//! The body is copied once, when the action is made, and every word naming a parameter is bound
//! relative to the action. Reading the body through a running frame resolves those words to the
//! frame's varlist, so one body serves every call without being copied again.

use fxhash::FxHashMap;

use super::{Bounce, Frame, ParamSpec};
use crate::action::param::Param;
use crate::cell::{Binding, Cell, Extra, Layout, Payload, Slot, Value};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Flavor, NodeFlags, NodeRef};

/// Details slot holding the relativized body.
pub const BODY: usize = 0;

impl Heap {
    pub fn make_interpreted(
        &mut self,
        label: &str,
        spec: &[ParamSpec],
        body: &Value,
    ) -> Result<Value> {
        let found = body.datatype();

        if !found.is_array() {
            return Err(RuntimeError::expected("block or group", found));
        }

        let source = self.series_node(body)?;
        let action = self.make_action(spec, run_body, BODY + 1, label);

        let Some(details) = action.node() else {
            inconsistent("action without details");
        };

        let params = self.params_of(details);
        let mut copies = FxHashMap::default();
        let copy = self.relativize(source, body.index(), details, &params, &mut copies)?;

        let relative = Cell::fresh(
            found,
            Layout::Series,
            Extra::Binding(Binding::Relative(details)),
            Payload::Any {
                first: Slot::Node(copy),
                second: Slot::Index(0),
            },
        );

        self.write_detail(details, BODY, &relative);
        Ok(action)
    }

    /// Deep copies an array from `from` on, binding parameter words relative to `details`.
    /// An array reached again, e.g. one that contains itself, reuses its copy.
    fn relativize(
        &mut self,
        source: NodeRef,
        from: usize,
        details: NodeRef,
        params: &[Param],
        copies: &mut FxHashMap<(NodeRef, usize), NodeRef>,
    ) -> Result<NodeRef> {
        if let Some(copy) = copies.get(&(source, from)) {
            return Ok(*copy);
        }

        let cells = self
            .node(source)
            .cells()?
            .iter()
            .skip(from)
            .map(Cell::copied)
            .collect::<Vec<_>>();

        let copy = self.make_node(Flavor::Array, cells.len(), NodeFlags::MANAGED);
        copies.insert((source, from), copy);

        for mut cell in cells {
            let kind = cell.type_of();

            if kind.is_word() {
                let slot = cell.symbol().and_then(|symbol| {
                    params
                        .iter()
                        .position(|param| param.symbol == symbol)
                        .map(|index| (symbol, index))
                });

                if let Some((symbol, index)) = slot {
                    cell.set_extra(Extra::Binding(Binding::Relative(details)));
                    cell.set_payload(Payload::Word {
                        symbol,
                        index: (index + 1) as u32,
                    });
                }
            } else if kind.is_array() && !cell.is_paired_quote() {
                if let Some(inner) = cell.node() {
                    let nested = self.relativize(inner, cell.index(), details, params, copies)?;

                    cell.set_extra(Extra::Binding(Binding::Relative(details)));
                    cell.set_payload(Payload::Any {
                        first: Slot::Node(nested),
                        second: Slot::Index(0),
                    });
                }
            }

            self.node_mut(copy).push_cell(cell);
        }

        Ok(copy)
    }
}

/// The result of a call is its body, bound to the call's frame.
fn run_body(frame: &mut Frame<'_>) -> Result<Bounce> {
    let body = frame.detail(BODY);

    tracing::trace!(action = frame.label(), "body resolved against frame");
    Ok(Bounce::Out(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Kind, TypeSet};
    use crate::config::HeapConfig;

    #[test]
    fn body_words_resolve_per_call() {
        let mut heap = Heap::new(HeapConfig::small());
        let x = heap.intern("x");
        let y = heap.intern("y");
        let inner = heap.make_block(&[Value::word(x)]);
        let body = heap.make_block(&[Value::word(x), Value::word(y), inner]);

        let spec = [ParamSpec::normal("x", TypeSet::ANY)];
        let action = heap.make_interpreted("echo", &spec, &body).unwrap();

        assert_eq!(heap.detail(&action, BODY), Err(RuntimeError::RelativeValue));

        let first = heap.invoke(&action, &[Value::integer(1)]).unwrap();
        let second = heap.invoke(&action, &[Value::integer(2)]).unwrap();

        let words = heap.values_of(&first).unwrap();
        assert_eq!(heap.get_var(&words[0]).unwrap().as_integer().unwrap(), 1);
        assert!(matches!(heap.get_var(&words[1]), Err(RuntimeError::Unbound(_))));

        let nested = heap.values_of(&words[2]).unwrap();
        assert_eq!(heap.get_var(&nested[0]).unwrap().as_integer().unwrap(), 1);

        let words = heap.values_of(&second).unwrap();
        assert_eq!(heap.get_var(&words[0]).unwrap().as_integer().unwrap(), 2);
    }

    #[test]
    fn the_source_block_is_not_shared() {
        let mut heap = Heap::new(HeapConfig::small());
        let x = heap.intern("x");
        let body = heap.make_block(&[Value::word(x)]);

        let spec = [ParamSpec::normal("x", TypeSet::ANY)];
        let action = heap.make_interpreted("echo", &spec, &body).unwrap();

        heap.append(&body, &Value::integer(10)).unwrap();

        let out = heap.invoke(&action, &[Value::blank()]).unwrap();
        assert_eq!(heap.length_of(&out).unwrap(), 1);
        assert_eq!(out.type_of(), Kind::Block);
    }

    #[test]
    fn bodies_that_contain_themselves_are_copied_once() {
        let mut heap = Heap::new(HeapConfig::small());
        let x = heap.intern("x");
        let body = heap.make_block(&[Value::word(x)]);
        heap.append(&body, &body.copied()).unwrap();

        let spec = [ParamSpec::normal("x", TypeSet::ANY)];
        let action = heap.make_interpreted("loop", &spec, &body).unwrap();
        let out = heap.invoke(&action, &[Value::integer(7)]).unwrap();

        let words = heap.values_of(&out).unwrap();
        assert_eq!(heap.get_var(&words[0]).unwrap().as_integer().unwrap(), 7);

        let inner = heap.values_of(&words[1]).unwrap();
        assert_eq!(words[1].node(), out.node());
        assert_eq!(heap.get_var(&inner[0]).unwrap().as_integer().unwrap(), 7);
        assert_eq!(heap.mold(&out), "[x [...]]");
    }
}
