//! Building values from host data.

use std::any::Any;

use super::{Binding, Cell, Extra, Kind, Layout, Payload, Slot, Value, INLINE_PAYLOAD};
use crate::error::{inconsistent, Result, RuntimeError};
use crate::heap::Heap;
use crate::node::{Cleaner, Flavor, Link, Misc, NodeFlags, NodeRef};
use crate::symbol::Symbol;

impl Value {
    fn scalar(kind: Kind, payload: Payload) -> Value {
        Value::from_specific(Cell::fresh(kind, Layout::Scalar, Extra::None, payload))
    }

    pub fn null() -> Value {
        Value::scalar(Kind::Null, Payload::None)
    }

    pub fn blank() -> Value {
        Value::scalar(Kind::Blank, Payload::None)
    }

    pub fn logic(value: bool) -> Value {
        Value::scalar(Kind::Logic, Payload::Logic(value))
    }

    pub fn integer(value: i64) -> Value {
        Value::scalar(Kind::Integer, Payload::Integer(value))
    }

    pub fn decimal(value: f64) -> Value {
        Value::scalar(Kind::Decimal, Payload::Decimal(value))
    }

    /// A time of day or duration, in nanoseconds.
    pub fn time(nanoseconds: i64) -> Value {
        Value::scalar(Kind::Time, Payload::Time(nanoseconds))
    }

    pub fn date(year: i32, month: u8, day: u8, zone: Option<i16>) -> Value {
        let extra = zone.map(Extra::Zone).unwrap_or(Extra::None);
        let payload = Payload::Date { year, month, day };
        Value::from_specific(Cell::fresh(Kind::Date, Layout::Scalar, extra, payload))
    }

    pub fn char(value: char) -> Value {
        let mut buffer = [0; 4];
        let encoded = value.encode_utf8(&mut buffer);
        Value::inline(Kind::Char, encoded.as_bytes())
    }

    pub fn datatype_of(kind: Kind) -> Value {
        Value::from_specific(Cell::fresh(
            Kind::Datatype,
            Layout::Scalar,
            Extra::Datatype(kind),
            Payload::None,
        ))
    }

    fn any_word(kind: Kind, symbol: Symbol) -> Value {
        Value::from_specific(Cell::fresh(
            kind,
            Layout::Word,
            Extra::Binding(Binding::Unbound),
            Payload::Word { symbol, index: 0 },
        ))
    }

    pub fn word(symbol: Symbol) -> Value {
        Value::any_word(Kind::Word, symbol)
    }

    pub fn set_word(symbol: Symbol) -> Value {
        Value::any_word(Kind::SetWord, symbol)
    }

    pub fn get_word(symbol: Symbol) -> Value {
        Value::any_word(Kind::GetWord, symbol)
    }

    /// Bytes that fit in the payload. Longer input is a caller bug.
    fn inline(kind: Kind, data: &[u8]) -> Value {
        if data.len() > INLINE_PAYLOAD {
            inconsistent("inline payload overflow");
        }

        let mut bytes = [0; INLINE_PAYLOAD];
        bytes[..data.len()].copy_from_slice(data);

        let payload = Payload::Inline {
            len: data.len() as u8,
            bytes,
        };

        Value::from_specific(Cell::fresh(kind, Layout::Inline, Extra::None, payload))
    }

    pub(crate) fn series(kind: Kind, node: NodeRef, index: usize) -> Value {
        Value::from_specific(Cell::fresh(
            kind,
            Layout::Series,
            Extra::None,
            Payload::Any {
                first: Slot::Node(node),
                second: Slot::Index(index),
            },
        ))
    }

    pub(crate) fn context(kind: Kind, varlist: NodeRef) -> Value {
        Value::from_specific(Cell::fresh(
            kind,
            Layout::Context,
            Extra::None,
            Payload::Any {
                first: Slot::Node(varlist),
                second: Slot::Empty,
            },
        ))
    }

    /// The same series seen from another position. Text positions count characters, positions
    /// past the tail read as empty.
    pub fn skip(&self, offset: usize) -> Result<Value> {
        match (self.layout(), self.payload()) {
            (Layout::Series, Payload::Any { first, second }) => {
                let index = match second {
                    Slot::Index(index) => index,
                    _ => 0,
                };

                let mut cell = self.copied().into_cell();
                cell.payload = Payload::Any {
                    first,
                    second: Slot::Index(index + offset),
                };
                Ok(Value::from_specific(cell))
            }
            _ => Err(RuntimeError::expected("series", self.datatype())),
        }
    }
}

impl Heap {
    /// A word value for `name`, interning the spelling.
    pub fn word(&mut self, name: &str) -> Value {
        Value::word(self.intern(name))
    }

    fn make_bytes(&mut self, flavor: Flavor, kind: Kind, data: &[u8]) -> Value {
        let node = self.make_node(flavor, data.len(), NodeFlags::MANAGED);
        self.node_mut(node).push_bytes(data);
        Value::series(kind, node, 0)
    }

    /// Text always lives in a node, however short.
    pub fn make_text(&mut self, text: &str) -> Value {
        self.make_bytes(Flavor::Text, Kind::Text, text.as_bytes())
    }

    /// Short issues are kept in the payload, longer ones in a node.
    pub fn make_issue(&mut self, text: &str) -> Value {
        if text.len() <= INLINE_PAYLOAD {
            Value::inline(Kind::Issue, text.as_bytes())
        } else {
            self.make_bytes(Flavor::Text, Kind::Issue, text.as_bytes())
        }
    }

    pub fn make_binary(&mut self, data: &[u8]) -> Value {
        self.make_bytes(Flavor::Binary, Kind::Binary, data)
    }

    pub(crate) fn make_array(&mut self, kind: Kind, items: &[Value]) -> Value {
        let node = self.make_node(Flavor::Array, items.len(), NodeFlags::MANAGED);
        let target = self.node_mut(node);

        for item in items {
            target.push_cell(item.copied().into_cell());
        }

        Value::series(kind, node, 0)
    }

    pub fn make_block(&mut self, items: &[Value]) -> Value {
        self.make_array(Kind::Block, items)
    }

    pub fn make_group(&mut self, items: &[Value]) -> Value {
        self.make_array(Kind::Group, items)
    }

    /// Wraps host data. The cleaner runs once, when the handle is released or collected.
    pub fn make_handle(&mut self, data: Box<dyn Any>, cleaner: Option<Cleaner>) -> Value {
        let node = self.make_node(Flavor::Handle, 0, NodeFlags::MANAGED);
        let target = self.node_mut(node);
        target.link = Link::Resource(Some(data));
        target.misc = Misc::Cleaner(cleaner);

        Value::series(Kind::Handle, node, 0)
    }

    pub fn handle_data<T: Any>(&self, handle: &Value) -> Result<&T> {
        let node = match (handle.datatype(), handle.node()) {
            (Kind::Handle, Some(node)) => node,
            (found, _) => return Err(RuntimeError::expected("handle", found)),
        };

        let target = self.node(node);
        target.check_readable()?;

        match &target.link {
            Link::Resource(Some(resource)) => resource
                .downcast_ref::<T>()
                .ok_or_else(|| RuntimeError::expected(std::any::type_name::<T>(), Kind::Handle)),
            _ => Err(RuntimeError::Unavailable),
        }
    }
}
