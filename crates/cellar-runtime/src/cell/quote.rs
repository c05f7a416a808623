//! Quoting levels. Shallow levels are encoded in the kind byte; past [MAX_INLINE_QUOTE] the cell
//! holds its unquoted value in a pairing node and counts the depth in its extra slot.

use super::{Extra, Kind, Layout, Payload, Slot, Value, MAX_INLINE_QUOTE, QUOTE_STEP};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Flavor, NodeFlags};

impl Heap {
    /// Adds one quoting level to `value` in place.
    pub fn quote(&mut self, value: &mut Value) -> Result<()> {
        let cell = value.cell_mut();

        if cell.is_protected() {
            return Err(RuntimeError::ProtectedCell);
        }

        let depth = cell.quote_depth();

        if depth < MAX_INLINE_QUOTE {
            cell.set_kind_byte(cell.kind_byte() + QUOTE_STEP);
            return Ok(());
        }

        if depth > MAX_INLINE_QUOTE {
            cell.set_extra(Extra::QuoteDepth(depth + 1));
            return Ok(());
        }

        let mut base = cell.copied();
        base.set_kind_byte(cell.kind_byte() % QUOTE_STEP);

        let pairing = self.make_node(
            Flavor::Pairing,
            1,
            NodeFlags::MANAGED | NodeFlags::FIXED_SIZE,
        );
        self.node_mut(pairing).push_cell(base);

        let cell = value.cell_mut();
        let flags = cell.flags();
        cell.reset(
            Kind::Quoted,
            Layout::Pairing,
            Extra::QuoteDepth(depth + 1),
            Payload::Any {
                first: Slot::Node(pairing),
                second: Slot::Empty,
            },
        );
        cell.set_flag(flags);

        Ok(())
    }

    /// Removes one quoting level from `value` in place.
    pub fn unquote(&mut self, value: &mut Value) -> Result<()> {
        if value.is_protected() {
            return Err(RuntimeError::ProtectedCell);
        }

        let depth = value.quote_depth();

        if depth == 0 {
            return Err(RuntimeError::NotQuoted);
        }

        if depth <= MAX_INLINE_QUOTE {
            let cell = value.cell_mut();
            cell.set_kind_byte(cell.kind_byte() - QUOTE_STEP);
            return Ok(());
        }

        if depth > MAX_INLINE_QUOTE + 1 {
            value.cell_mut().set_extra(Extra::QuoteDepth(depth - 1));
            return Ok(());
        }

        let Some(pairing) = value.node() else {
            inconsistent("paired quote without a pairing node");
        };

        let inner = match self.node(pairing).cells()? {
            [inner] => inner.copied(),
            _ => inconsistent("pairing node must hold exactly one cell"),
        };

        let cell = value.cell_mut();
        let flags = cell.flags();
        cell.overwrite(&inner);
        cell.set_kind_byte(inner.kind_byte() + QUOTE_STEP * MAX_INLINE_QUOTE as u8);
        cell.set_flag(flags);

        Ok(())
    }

    /// The value with every quoting level removed.
    pub fn unquoted(&self, value: &Value) -> Result<Value> {
        if !value.is_paired_quote() {
            let mut cell = value.copied().into_cell();
            cell.set_kind_byte(cell.kind_byte() % QUOTE_STEP);
            return Ok(Value::from_specific(cell));
        }

        let Some(pairing) = value.node() else {
            inconsistent("paired quote without a pairing node");
        };

        match self.node(pairing).cells()? {
            [inner] => Ok(Value::from_specific(inner.copied())),
            _ => inconsistent("pairing node must hold exactly one cell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;

    #[test]
    fn shallow_quotes_bump_the_kind_byte() {
        let mut heap = Heap::new(HeapConfig::small());
        let mut value = Value::integer(10);

        heap.quote(&mut value).unwrap();
        heap.quote(&mut value).unwrap();

        assert_eq!(value.kind_byte(), Kind::Integer as u8 + 2 * QUOTE_STEP);
        assert_eq!(value.type_of(), Kind::Integer);
        assert_eq!(value.datatype(), Kind::Quoted);
        assert_eq!(value.quote_depth(), 2);
        assert!(value.node().is_none());
    }

    #[test]
    fn deep_quotes_switch_to_a_pairing() {
        let mut heap = Heap::new(HeapConfig::small());
        let mut value = heap.make_text("deep");

        for _ in 0..5 {
            heap.quote(&mut value).unwrap();
        }

        assert!(value.is_paired_quote());
        assert_eq!(value.quote_depth(), 5);
        assert_eq!(value.type_of(), Kind::Quoted);
        assert_eq!(heap.mold(&value), "'''''\"deep\"");

        let base = heap.unquoted(&value).unwrap();
        assert_eq!(heap.text_of(&base).unwrap(), "deep");

        for _ in 0..5 {
            heap.unquote(&mut value).unwrap();
        }

        assert_eq!(value.quote_depth(), 0);
        assert_eq!(heap.text_of(&value).unwrap(), "deep");
        assert_eq!(heap.unquote(&mut value), Err(RuntimeError::NotQuoted));
    }

    #[test]
    fn back_to_inline_at_the_boundary() {
        let mut heap = Heap::new(HeapConfig::small());
        let mut value = Value::logic(true);

        for _ in 0..4 {
            heap.quote(&mut value).unwrap();
        }

        heap.unquote(&mut value).unwrap();

        assert!(!value.is_paired_quote());
        assert_eq!(value.quote_depth(), 3);
        assert_eq!(value.type_of(), Kind::Logic);
    }
}
