//! This module defines actions, the callable values of the runtime.
//!
//! An action is a details node holding its dispatcher-specific slots, linked to a paramlist that
//! declares its parameters. The dispatcher is a function pointer stored in the details node, so
//! replacing it changes the behavior seen through every value that references the action.
//!
//! Calls go through [Heap::invoke]: arguments are validated against the paramlist before any
//! frame exists, then copied into a varlist, a level is pushed and the dispatcher runs.

use crate::cell::{Cell, CellFlags, Extra, Kind, Layout, Payload, Slot, Value};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Flavor, Link, Misc, NodeFlags, NodeRef};
use crate::symbol::Symbol;

pub mod deferred;
pub mod frame;
pub mod interpreted;
pub mod param;

pub use frame::Frame;
pub use param::{ParamClass, ParamSpec};

use param::Param;

/// Runs one call of an action.
pub type Dispatcher = fn(&mut Frame<'_>) -> Result<Bounce>;

/// What a dispatcher hands back.
#[derive(Debug)]
pub enum Bounce {
    Out(Value),
    /// The dispatcher installed a replacement for itself; run the replacement with the same
    /// frame.
    Redispatch,
}

/// Arguments of a call: positional ones fill normal parameters in order, named ones may target
/// normal parameters and refinements.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallArgs<'a> {
    pub positional: &'a [Value],
    pub named: &'a [(&'a str, Value)],
}

impl Heap {
    /// Creates an action from its parameters, its dispatcher and the number of details slots the
    /// dispatcher needs. The details slots start out blank.
    pub fn make_action(
        &mut self,
        spec: &[ParamSpec],
        dispatcher: Dispatcher,
        extra_slots: usize,
        label: &str,
    ) -> Value {
        let label = self.intern(label);
        let symbols = spec
            .iter()
            .map(|param| self.intern(&param.name))
            .collect::<Vec<_>>();

        for (index, symbol) in symbols.iter().enumerate() {
            if symbols[..index].contains(symbol) {
                inconsistent(format!(
                    "'{}' declares '{}' twice",
                    self.spelling(label),
                    self.spelling(*symbol)
                ));
            }
        }

        let paramlist = self.make_node(Flavor::Paramlist, spec.len() + 1, NodeFlags::MANAGED);
        let details = self.make_node(Flavor::Details, extra_slots + 1, NodeFlags::MANAGED);

        let archetype = Cell::fresh(
            Kind::Action,
            Layout::Series,
            Extra::Key(label),
            Payload::Any {
                first: Slot::Node(details),
                second: Slot::Empty,
            },
        );

        let target = self.node_mut(paramlist);
        target.push_cell(archetype.copied());

        for (param, symbol) in spec.iter().zip(symbols) {
            target.push_cell(param.to_cell(symbol));
        }

        self.freeze_node(paramlist);

        let target = self.node_mut(details);
        target.push_cell(archetype.copied());

        for _ in 0..extra_slots {
            target.push_cell(Value::blank().into_cell());
        }

        target.link = Link::Paramlist(paramlist);
        target.misc = Misc::Action {
            dispatcher: std::cell::Cell::new(dispatcher),
            meta: None,
        };

        Value::from_specific(archetype)
    }

    /// Creates an action and defines it in `lib` under `name`.
    pub fn register_native(
        &mut self,
        name: &str,
        spec: &[ParamSpec],
        dispatcher: Dispatcher,
    ) -> Result<Value> {
        let action = self.make_action(spec, dispatcher, 0, name);
        self.lib_define(name, &action)?;

        tracing::trace!(name, "registered native");
        Ok(action)
    }

    pub(crate) fn action_details(&self, action: &Value) -> Result<NodeRef> {
        match (action.datatype(), action.node()) {
            (Kind::Action, Some(details)) => Ok(details),
            (found, _) => Err(RuntimeError::expected("action", found)),
        }
    }

    pub(crate) fn paramlist_of(&self, details: NodeRef) -> NodeRef {
        match self.node(details).link {
            Link::Paramlist(paramlist) => paramlist,
            _ => inconsistent("action details without a paramlist"),
        }
    }

    pub(crate) fn label_of(&self, details: NodeRef) -> Symbol {
        let archetype = self.node(details).cells().ok().and_then(|cells| cells.first());

        match archetype.map(Cell::extra) {
            Some(Extra::Key(label)) => label,
            _ => inconsistent("action details without an archetype"),
        }
    }

    pub(crate) fn params_of(&self, details: NodeRef) -> Vec<Param> {
        let paramlist = self.paramlist_of(details);

        match self.node(paramlist).cells() {
            Ok(cells) => cells
                .iter()
                .skip(1)
                .map(|cell| match Param::from_cell(cell) {
                    Some(param) => param,
                    None => inconsistent("paramlist slot that is not a parameter"),
                })
                .collect(),
            Err(_) => inconsistent("paramlist was released"),
        }
    }

    /// Name the action was created with.
    pub fn action_label(&self, action: &Value) -> Result<&str> {
        let details = self.action_details(action)?;
        Ok(self.spelling(self.label_of(details)))
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self, action: &Value) -> Result<Vec<String>> {
        let details = self.action_details(action)?;

        Ok(self
            .params_of(details)
            .iter()
            .map(|param| self.spelling(param.symbol).to_string())
            .collect())
    }

    fn dispatcher_of(&self, details: NodeRef) -> Dispatcher {
        match &self.node(details).misc {
            Misc::Action { dispatcher, .. } => dispatcher.get(),
            _ => inconsistent("action details without a dispatcher"),
        }
    }

    pub(crate) fn dispatcher_is(&self, details: NodeRef, dispatcher: Dispatcher) -> bool {
        self.dispatcher_of(details) as usize == dispatcher as usize
    }

    pub(crate) fn install_dispatcher(&self, details: NodeRef, replacement: Dispatcher) {
        match &self.node(details).misc {
            Misc::Action { dispatcher, .. } => dispatcher.set(replacement),
            _ => inconsistent("action details without a dispatcher"),
        }

        tracing::debug!(action = self.spelling(self.label_of(details)), "replaced dispatcher");
    }

    /// Changes what `action` does on every later call, through every value referencing it.
    pub fn replace_dispatcher(&mut self, action: &Value, dispatcher: Dispatcher) -> Result<()> {
        let details = self.action_details(action)?;
        self.install_dispatcher(details, dispatcher);
        Ok(())
    }

    pub(crate) fn write_detail(&mut self, details: NodeRef, index: usize, cell: &Cell) {
        let label = self.label_of(details);

        match self.node_mut(details).cells_unguarded().get_mut(index + 1) {
            Some(slot) => slot.overwrite(cell),
            None => {
                let label = self.spelling(label).to_string();
                inconsistent(format!("'{label}' has no detail number {index}"))
            }
        }
    }

    pub fn set_detail(&mut self, action: &Value, index: usize, value: &Value) -> Result<()> {
        let details = self.action_details(action)?;
        self.write_detail(details, index, value);
        Ok(())
    }

    /// A details slot read from outside any call of the action.
    pub fn detail(&self, action: &Value, index: usize) -> Result<Value> {
        let details = self.action_details(action)?;
        let cells = self.node(details).cells()?;

        match cells.get(index + 1) {
            Some(cell) if cell.is_relative() => Err(RuntimeError::RelativeValue),
            Some(cell) => Ok(self.derelativize(cell, None)),
            None => Err(RuntimeError::OutOfRange {
                index,
                len: cells.len() - 1,
            }),
        }
    }

    /// Attaches a metadata object, e.g. documentation, to an action.
    pub fn set_action_meta(&mut self, action: &Value, meta: &Value) -> Result<()> {
        let details = self.action_details(action)?;

        let object = match (meta.datatype(), meta.node()) {
            (Kind::Object, Some(varlist)) => varlist,
            (found, _) => return Err(RuntimeError::expected("object", found)),
        };

        match &mut self.node_mut(details).misc {
            Misc::Action { meta, .. } => *meta = Some(object),
            _ => inconsistent("action details without a dispatcher"),
        }

        Ok(())
    }

    pub fn action_meta(&self, action: &Value) -> Result<Option<Value>> {
        let details = self.action_details(action)?;

        match &self.node(details).misc {
            Misc::Action { meta, .. } => {
                Ok(meta.map(|varlist| Value::context(Kind::Object, varlist)))
            }
            _ => inconsistent("action details without a dispatcher"),
        }
    }

    /// Calls `action` with positional arguments.
    pub fn invoke(&mut self, action: &Value, args: &[Value]) -> Result<Value> {
        self.invoke_with(
            action,
            CallArgs {
                positional: args,
                named: &[],
            },
        )
    }

    pub fn invoke_with(&mut self, action: &Value, args: CallArgs<'_>) -> Result<Value> {
        let details = self.action_details(action)?;
        let label = self.label_of(details);
        let params = self.params_of(details);

        let slots = self.fulfill(label, &params, &args)?;
        let varlist = self.make_frame(details, &params, &slots);

        let level = self.push_level(details, varlist);

        tracing::trace!(
            action = self.spelling(label),
            depth = self.levels.len(),
            "invoking"
        );

        let result = self.run_level(details, varlist, label);
        self.pop_level(level);
        result
    }

    /// Matches arguments against parameters without touching the heap. Every failure is
    /// reported here, before any frame exists.
    fn fulfill<'v>(
        &self,
        label: Symbol,
        params: &[Param],
        args: &CallArgs<'v>,
    ) -> Result<Vec<Option<&'v Value>>> {
        let action = || self.spelling(label).to_string();
        let name_of = |param: &Param| self.spelling(param.symbol).to_string();

        let normal = params
            .iter()
            .enumerate()
            .filter(|(_, param)| param.class == ParamClass::Normal)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        if args.positional.len() > normal.len() {
            return Err(RuntimeError::TooManyArgs {
                action: action(),
                expected: normal.len(),
                found: args.positional.len(),
            });
        }

        let mut slots = vec![None; params.len()];

        for (value, index) in args.positional.iter().zip(normal) {
            slots[index] = Some(value);
        }

        for (name, value) in args.named {
            let index = self
                .lookup_symbol(name)
                .and_then(|symbol| {
                    params.iter().position(|param| {
                        param.symbol == symbol && param.class != ParamClass::Local
                    })
                })
                .ok_or_else(|| RuntimeError::NoSuchParam {
                    action: action(),
                    param: name.to_string(),
                })?;

            if slots[index].is_some() {
                return Err(RuntimeError::DuplicateArg {
                    action: action(),
                    param: name.to_string(),
                });
            }

            slots[index] = Some(value);
        }

        for (param, slot) in params.iter().zip(&slots) {
            match slot {
                None if param.is_required() => {
                    return Err(RuntimeError::MissingArg {
                        action: action(),
                        param: name_of(param),
                    })
                }
                Some(value) if value.is_null() && param.optional => {}
                Some(value) if !param.types.contains(value.datatype()) => {
                    return Err(RuntimeError::ArgType {
                        action: action(),
                        param: name_of(param),
                        found: value.datatype(),
                    })
                }
                _ => {}
            }
        }

        Ok(slots)
    }

    /// Builds the varlist of a call. Parameters the caller left out hold null.
    fn make_frame(
        &mut self,
        details: NodeRef,
        params: &[Param],
        slots: &[Option<&Value>],
    ) -> NodeRef {
        let paramlist = self.paramlist_of(details);
        let varlist = self.make_node(Flavor::Varlist, params.len() + 1, NodeFlags::MANAGED);
        let null = Value::null();

        let target = self.node_mut(varlist);
        target.link = Link::Paramlist(paramlist);
        target.push_cell(Value::context(Kind::Frame, varlist).into_cell());

        for (param, slot) in params.iter().zip(slots) {
            let mut cell = Cell::erased();
            cell.set_flag(CellFlags::STACK);

            if param.class == ParamClass::Local {
                cell.set_flag(CellFlags::HIDDEN);
            }

            cell.overwrite(slot.unwrap_or(&null));
            target.push_cell(cell);
        }

        varlist
    }

    fn run_level(&mut self, details: NodeRef, varlist: NodeRef, label: Symbol) -> Result<Value> {
        // Arguments are rooted by the level from here on, so this is a safe point.
        self.collect_if_pending();

        loop {
            let dispatcher = self.dispatcher_of(details);

            match dispatcher(&mut Frame::new(self, details, varlist, label))? {
                Bounce::Out(value) => return Ok(value),
                Bounce::Redispatch => {
                    if self.dispatcher_is(details, dispatcher) {
                        inconsistent(format!(
                            "'{}' asked to redispatch without replacing its dispatcher",
                            self.spelling(label)
                        ));
                    }

                    tracing::debug!(action = self.spelling(label), "redispatching");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::TypeSet;
    use crate::config::HeapConfig;

    fn first(frame: &mut Frame<'_>) -> Result<Bounce> {
        Ok(Bounce::Out(frame.arg(0)))
    }

    fn describe(frame: &mut Frame<'_>) -> Result<Bounce> {
        let base = frame.arg(0).as_integer()?;
        let scale = if frame.is_absent(1) {
            1
        } else {
            frame.arg_named("scale")?.as_integer()?
        };

        Ok(Bounce::Out(Value::integer(base * scale)))
    }

    fn integers() -> TypeSet {
        TypeSet::of(&[Kind::Integer])
    }

    #[test]
    fn arity_is_checked_before_dispatch() {
        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_action(&[ParamSpec::normal("n", integers())], first, 0, "first");

        assert_eq!(
            heap.invoke(&action, &[]),
            Err(RuntimeError::MissingArg {
                action: "first".into(),
                param: "n".into()
            })
        );

        assert_eq!(
            heap.invoke(&action, &[Value::integer(1), Value::integer(2)]),
            Err(RuntimeError::TooManyArgs {
                action: "first".into(),
                expected: 1,
                found: 2
            })
        );

        assert_eq!(heap.depth(), 0);
    }

    #[test]
    fn refinements_are_named_only() {
        let mut heap = Heap::new(HeapConfig::small());
        let spec = [
            ParamSpec::normal("base", integers()),
            ParamSpec::refinement("scale", integers()),
            ParamSpec::local("tmp"),
        ];
        let action = heap.make_action(&spec, describe, 0, "describe");

        let out = heap.invoke(&action, &[Value::integer(4)]).unwrap();
        assert_eq!(out.as_integer().unwrap(), 4);

        let named = [("scale", Value::integer(3))];
        let out = heap
            .invoke_with(
                &action,
                CallArgs {
                    positional: &[Value::integer(4)],
                    named: &named,
                },
            )
            .unwrap();
        assert_eq!(out.as_integer().unwrap(), 12);

        let named = [("tmp", Value::integer(3))];
        assert!(matches!(
            heap.invoke_with(
                &action,
                CallArgs {
                    positional: &[Value::integer(4)],
                    named: &named,
                }
            ),
            Err(RuntimeError::NoSuchParam { .. })
        ));

        let named = [("base", Value::integer(3))];
        assert!(matches!(
            heap.invoke_with(
                &action,
                CallArgs {
                    positional: &[Value::integer(4)],
                    named: &named,
                }
            ),
            Err(RuntimeError::DuplicateArg { .. })
        ));
    }

    #[test]
    fn details_and_labels() {
        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_action(&[], first, 2, "holder");

        heap.set_detail(&action, 1, &Value::integer(9)).unwrap();

        assert_eq!(heap.action_label(&action).unwrap(), "holder");
        assert_eq!(heap.detail(&action, 1).unwrap().as_integer().unwrap(), 9);
        assert_eq!(heap.detail(&action, 0).unwrap().type_of(), Kind::Blank);
        assert!(heap.detail(&action, 2).is_err());
        assert_eq!(heap.mold(&action), "#[action! holder]");
    }

    #[test]
    fn meta_objects_are_attached() {
        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_action(&[], first, 0, "documented");
        let doc = heap.make_text("does nothing");
        let meta = heap.make_object(&[("description", doc)]).unwrap();

        assert_eq!(heap.action_meta(&action).unwrap(), None);
        heap.set_action_meta(&action, &meta).unwrap();

        let attached = heap.action_meta(&action).unwrap().unwrap();
        let description = heap.get_field(&attached, "description").unwrap();
        assert_eq!(heap.text_of(&description).unwrap(), "does nothing");
    }

    #[test]
    #[should_panic(expected = "internal consistency failure")]
    fn redispatch_without_replacement_is_fatal() {
        fn stuck(_: &mut Frame<'_>) -> Result<Bounce> {
            Ok(Bounce::Redispatch)
        }

        let mut heap = Heap::new(HeapConfig::small());
        let action = heap.make_action(&[], stuck, 0, "stuck");
        let _ = heap.invoke(&action, &[]);
    }
}
