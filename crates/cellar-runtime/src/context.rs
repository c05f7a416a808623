//! Contexts: objects, frames and the module context `lib`.
//!
//! A context is a varlist whose slot 0 is an archetype cell referring back to the varlist, and
//! whose remaining slots hold the variables. Keys live elsewhere: objects link a keylist of
//! symbols, frames link the paramlist of their action. Words bind to a context by slot index.

use crate::cell::{Binding, CellFlags, Extra, Kind, Payload, Value};
use crate::error::{Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Flavor, Link, NodeFlags, NodeRef};
use crate::symbol::Symbol;

impl Heap {
    /// Creates a keylist and a varlist with room for `capacity` variables. Returns the varlist.
    pub(crate) fn make_context_nodes(
        &mut self,
        kind: Kind,
        capacity: usize,
        flags: NodeFlags,
    ) -> NodeRef {
        let keylist = self.make_node(Flavor::Keylist, capacity, flags);
        let varlist = self.make_node(Flavor::Varlist, capacity + 1, flags);

        let target = self.node_mut(varlist);
        target.link = Link::Keylist(keylist);
        target.push_cell(Value::context(kind, varlist).into_cell());

        varlist
    }

    pub fn make_object(&mut self, fields: &[(&str, Value)]) -> Result<Value> {
        let varlist = self.make_context_nodes(Kind::Object, fields.len(), NodeFlags::MANAGED);

        for (name, value) in fields {
            let symbol = self.intern(name);
            self.define(varlist, symbol, value)?;
        }

        Ok(Value::context(Kind::Object, varlist))
    }

    fn varlist_of(&self, context: &Value) -> Result<NodeRef> {
        match (context.datatype(), context.node()) {
            (kind, Some(varlist)) if kind.is_context() => Ok(varlist),
            (found, _) => Err(RuntimeError::expected("object or frame", found)),
        }
    }

    /// Slot of `symbol` in a varlist. Hidden slots are never found.
    fn slot_of(&self, varlist: NodeRef, symbol: Symbol) -> Option<usize> {
        let target = self.node(varlist);
        let cells = target.cells().ok()?;

        self.context_keys(target)
            .iter()
            .position(|key| *key == symbol)
            .map(|index| index + 1)
            .filter(|slot| cells.get(*slot).is_some_and(|cell| !cell.has_flag(CellFlags::HIDDEN)))
    }

    fn field_slot(&self, context: &Value, name: &str) -> Result<(NodeRef, usize)> {
        let varlist = self.varlist_of(context)?;

        self.lookup_symbol(name)
            .and_then(|symbol| self.slot_of(varlist, symbol))
            .map(|slot| (varlist, slot))
            .ok_or_else(|| RuntimeError::NoSuchField(name.to_string()))
    }

    fn read_slot(&self, varlist: NodeRef, slot: usize) -> Result<Value> {
        let cells = self.node(varlist).cells()?;

        match cells.get(slot) {
            Some(cell) => Ok(self.derelativize(cell, Some(varlist))),
            None => Err(RuntimeError::OutOfRange {
                index: slot,
                len: cells.len(),
            }),
        }
    }

    fn write_slot(&mut self, varlist: NodeRef, slot: usize, value: &Value) -> Result<()> {
        let cells = self.node_mut(varlist).cells_mut()?;
        let len = cells.len();

        match cells.get_mut(slot) {
            Some(cell) => cell.copy_from(value),
            None => Err(RuntimeError::OutOfRange { index: slot, len }),
        }
    }

    /// Sets `symbol` in an object varlist, adding the key if it is missing.
    fn define(&mut self, varlist: NodeRef, symbol: Symbol, value: &Value) -> Result<()> {
        if let Some(slot) = self.slot_of(varlist, symbol) {
            return self.write_slot(varlist, slot, value);
        }

        let Link::Keylist(keylist) = self.node(varlist).link else {
            return Err(RuntimeError::NoSuchField(self.spelling(symbol).to_string()));
        };

        self.node(varlist).check_mutable()?;

        let keys = self.node(keylist).len();
        let slots = self.node(varlist).len();

        self.ensure_capacity(keylist, keys + 1)?;
        self.ensure_capacity(varlist, slots + 1)?;

        self.node_mut(keylist).push_symbol(symbol);
        self.node_mut(varlist).push_cell(value.copied().into_cell());

        Ok(())
    }

    pub fn get_field(&self, context: &Value, name: &str) -> Result<Value> {
        let (varlist, slot) = self.field_slot(context, name)?;
        self.read_slot(varlist, slot)
    }

    pub fn set_field(&mut self, context: &Value, name: &str, value: &Value) -> Result<()> {
        let (varlist, slot) = self.field_slot(context, name)?;
        self.write_slot(varlist, slot, value)
    }

    /// Marks a field so that later writes fail.
    pub fn protect_field(&mut self, context: &Value, name: &str) -> Result<()> {
        let (varlist, slot) = self.field_slot(context, name)?;

        if let Some(cell) = self.node_mut(varlist).cells_unguarded().get_mut(slot) {
            cell.set_flag(CellFlags::PROTECTED);
        }

        Ok(())
    }

    /// Visible field names in slot order.
    pub fn field_names(&self, context: &Value) -> Result<Vec<String>> {
        let varlist = self.varlist_of(context)?;
        let target = self.node(varlist);
        let cells = target.cells()?;

        Ok(self
            .context_keys(target)
            .into_iter()
            .zip(cells.iter().skip(1))
            .filter(|(_, cell)| !cell.has_flag(CellFlags::HIDDEN))
            .map(|(key, _)| self.spelling(key).to_string())
            .collect())
    }

    /// The module context.
    pub fn lib(&self) -> Value {
        Value::context(Kind::Object, self.lib)
    }

    pub fn lib_define(&mut self, name: &str, value: &Value) -> Result<()> {
        let symbol = self.intern(name);
        self.define(self.lib, symbol, value)
    }

    pub fn lib_get(&self, name: &str) -> Option<Value> {
        let slot = self.slot_of(self.lib, self.lookup_symbol(name)?)?;
        self.read_slot(self.lib, slot).ok()
    }

    /// A copy of `word` bound to `context`.
    pub fn bind_word(&self, word: &Value, context: &Value) -> Result<Value> {
        let found = word.datatype();
        let symbol = match word.symbol() {
            Some(symbol) if found.is_word() => symbol,
            _ => return Err(RuntimeError::expected("word", found)),
        };

        let varlist = self.varlist_of(context)?;
        let slot = self
            .slot_of(varlist, symbol)
            .ok_or_else(|| RuntimeError::Unbound(self.spelling(symbol).to_string()))?;

        let mut bound = word.copied();
        let cell = bound.cell_mut();
        cell.set_extra(Extra::Binding(Binding::Context(varlist)));
        cell.set_payload(Payload::Word {
            symbol,
            index: slot as u32,
        });

        Ok(bound)
    }

    fn word_slot(&self, word: &Value) -> Result<(NodeRef, usize)> {
        match (word.binding(), word.payload()) {
            (Binding::Context(varlist), Payload::Word { index, .. })
                if word.type_of().is_word() =>
            {
                Ok((varlist, index as usize))
            }
            (_, Payload::Word { symbol, .. }) => {
                Err(RuntimeError::Unbound(self.spelling(symbol).to_string()))
            }
            _ => Err(RuntimeError::expected("word", word.datatype())),
        }
    }

    /// The variable a bound word refers to.
    pub fn get_var(&self, word: &Value) -> Result<Value> {
        let (varlist, slot) = self.word_slot(word)?;
        self.read_slot(varlist, slot)
    }

    pub fn set_var(&mut self, word: &Value, value: &Value) -> Result<()> {
        let (varlist, slot) = self.word_slot(word)?;
        self.write_slot(varlist, slot, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;

    #[test]
    fn objects_hold_fields() {
        let mut heap = Heap::new(HeapConfig::small());
        let object = heap
            .make_object(&[("a", Value::integer(1)), ("b", Value::logic(true))])
            .unwrap();

        assert_eq!(heap.get_field(&object, "a").unwrap().as_integer().unwrap(), 1);
        heap.set_field(&object, "a", &Value::integer(5)).unwrap();
        assert_eq!(heap.get_field(&object, "a").unwrap().as_integer().unwrap(), 5);

        assert_eq!(
            heap.get_field(&object, "c"),
            Err(RuntimeError::NoSuchField("c".into()))
        );
        assert_eq!(heap.field_names(&object).unwrap(), ["a", "b"]);
        assert_eq!(heap.mold(&object), "make object! [a: 5 b: true]");
    }

    #[test]
    fn protected_fields_refuse_writes() {
        let mut heap = Heap::new(HeapConfig::small());
        let object = heap.make_object(&[("a", Value::integer(1))]).unwrap();

        heap.protect_field(&object, "a").unwrap();

        assert_eq!(
            heap.set_field(&object, "a", &Value::integer(2)),
            Err(RuntimeError::ProtectedCell)
        );
        assert_eq!(heap.get_field(&object, "a").unwrap().as_integer().unwrap(), 1);
    }

    #[test]
    fn lib_grows_as_names_are_defined() {
        let mut heap = Heap::new(HeapConfig::small());

        for n in 0..20 {
            heap.lib_define(&format!("v{n}"), &Value::integer(n)).unwrap();
        }

        heap.lib_define("v3", &Value::integer(-3)).unwrap();

        assert_eq!(heap.lib_get("v19").unwrap().as_integer().unwrap(), 19);
        assert_eq!(heap.lib_get("v3").unwrap().as_integer().unwrap(), -3);
        assert_eq!(heap.lib_get("missing"), None);
    }

    #[test]
    fn words_bind_by_slot() {
        let mut heap = Heap::new(HeapConfig::small());
        let object = heap.make_object(&[("x", Value::integer(7))]).unwrap();
        let x = heap.word("x");
        let y = heap.word("y");

        assert_eq!(heap.get_var(&x), Err(RuntimeError::Unbound("x".into())));
        assert_eq!(heap.bind_word(&y, &object), Err(RuntimeError::Unbound("y".into())));

        let bound = heap.bind_word(&x, &object).unwrap();
        assert_eq!(heap.get_var(&bound).unwrap().as_integer().unwrap(), 7);

        heap.set_var(&bound, &Value::integer(8)).unwrap();
        assert_eq!(heap.get_field(&object, "x").unwrap().as_integer().unwrap(), 8);
    }
}
