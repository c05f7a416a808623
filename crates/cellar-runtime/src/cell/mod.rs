//! This module defines the [Cell], the fixed-size structure that holds one value, and [Value], the
//! resolved form of a cell that is safe to hand around on its own.
//!
//! A cell is never copied bit for bit. It is written through [Cell::reset] or [Cell::copy_from],
//! both of which keep the destination's own persistent header bits and take only the copyable
//! bits from the source.

use std::ops::Deref;

use bitflags::bitflags;

use crate::action::param::{ParamClass, ParamFlags};
use crate::error::{Result, RuntimeError};
use crate::node::NodeRef;
use crate::symbol::Symbol;

pub mod construct;
pub mod display;
pub mod kind;
pub mod quote;

pub use kind::{Kind, Layout, TypeSet, MAX_INLINE_QUOTE, QUOTE_STEP};

/// Bytes that fit in an inline payload.
pub const INLINE_PAYLOAD: usize = 15;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CellFlags: u16 {
        /// Writes through this cell fail.
        const PROTECTED = 1 << 0;
        /// Formatting hint for the position the cell sits in.
        const NEWLINE_BEFORE = 1 << 1;
        /// Cell lives in a frame or other transient storage.
        const STACK = 1 << 2;
        /// Cell is a root of its own, e.g. a guard slot.
        const ROOT = 1 << 3;
        /// Series referenced by this value must not be modified through it.
        const CONST = 1 << 4;
        /// Value was taken literally rather than produced by evaluation.
        const UNEVALUATED = 1 << 5;
        /// Scratch bit, meaningful only inside a single operation.
        const NOTE = 1 << 6;
        /// Frame slot not visible to lookups from outside the frame.
        const HIDDEN = 1 << 7;
    }
}

impl CellFlags {
    /// Bits owned by the destination slot. A copy never changes them.
    pub const PERSIST: CellFlags = CellFlags::PROTECTED
        .union(CellFlags::NEWLINE_BEFORE)
        .union(CellFlags::STACK)
        .union(CellFlags::ROOT)
        .union(CellFlags::HIDDEN);

    /// Bits that travel with the value.
    pub const COPY: CellFlags = CellFlags::CONST;
}

#[derive(Debug, Clone, Copy)]
struct Header {
    kind_byte: u8,
    layout: Layout,
    flags: CellFlags,
}

/// What a word or an array is bound to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Unbound,
    /// Bound to a varlist.
    Context(NodeRef),
    /// Only meaningful together with a running instance of this action.
    Relative(NodeRef),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extra {
    None,
    Binding(Binding),
    /// Timezone offset of a date, in minutes.
    Zone(i16),
    Datatype(Kind),
    /// Name carried by parameters and action archetypes.
    Key(Symbol),
    /// Depth of a quoted value too deep for the kind byte.
    QuoteDepth(u32),
}

/// One of the two general purpose payload slots. Only [Slot::Node] is traced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Empty,
    Node(NodeRef),
    Index(usize),
    Symbol(Symbol),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    /// Nanoseconds.
    Time(i64),
    Date {
        year: i32,
        month: u8,
        day: u8,
    },
    Inline {
        len: u8,
        bytes: [u8; INLINE_PAYLOAD],
    },
    Word {
        symbol: Symbol,
        index: u32,
    },
    Param {
        class: ParamClass,
        flags: ParamFlags,
        types: TypeSet,
    },
    Any {
        first: Slot,
        second: Slot,
    },
}

/// One value slot. It is deliberately neither `Clone` nor `Copy`, use [Cell::copy_from] or
/// [Cell::copied].
#[derive(Debug)]
pub struct Cell {
    header: Header,
    extra: Extra,
    payload: Payload,
}

impl Cell {
    /// A cell in the trash state with no flags. Storage is initialized with this before any value
    /// is written to it.
    pub const fn erased() -> Self {
        Cell {
            header: Header {
                kind_byte: Kind::Trash as u8,
                layout: Layout::Scalar,
                flags: CellFlags::empty(),
            },
            extra: Extra::None,
            payload: Payload::None,
        }
    }

    pub(crate) fn fresh(kind: Kind, layout: Layout, extra: Extra, payload: Payload) -> Self {
        let mut cell = Cell::erased();
        cell.reset(kind, layout, extra, payload);
        cell
    }

    /// Writes a new value into the cell, keeping only its persistent bits.
    pub fn reset(&mut self, kind: Kind, layout: Layout, extra: Extra, payload: Payload) {
        self.header = Header {
            kind_byte: kind as u8,
            layout,
            flags: self.header.flags & CellFlags::PERSIST,
        };
        self.extra = extra;
        self.payload = payload;
    }

    /// Copies `source` into this cell. Referenced nodes are shared, not duplicated.
    pub fn copy_from(&mut self, source: &Cell) -> Result<()> {
        if self.is_protected() {
            return Err(RuntimeError::ProtectedCell);
        }

        self.overwrite(source);
        Ok(())
    }

    /// [Cell::copy_from] without the protection check, for slots the runtime itself owns.
    pub(crate) fn overwrite(&mut self, source: &Cell) {
        self.header = Header {
            kind_byte: source.header.kind_byte,
            layout: source.header.layout,
            flags: (self.header.flags & CellFlags::PERSIST)
                | (source.header.flags & CellFlags::COPY),
        };
        self.extra = source.extra;
        self.payload = source.payload;
    }

    /// A fresh cell holding the same value.
    pub fn copied(&self) -> Cell {
        let mut cell = Cell::erased();
        cell.overwrite(self);
        cell
    }

    pub fn kind_byte(&self) -> u8 {
        self.header.kind_byte
    }

    pub fn layout(&self) -> Layout {
        self.header.layout
    }

    pub fn extra(&self) -> Extra {
        self.extra
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    pub(crate) fn set_extra(&mut self, extra: Extra) {
        self.extra = extra;
    }

    pub(crate) fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    pub(crate) fn set_kind_byte(&mut self, byte: u8) {
        self.header.kind_byte = byte;
    }

    /// The primary type, with inline quoting levels collapsed.
    pub fn type_of(&self) -> Kind {
        match Kind::from_byte(self.header.kind_byte % QUOTE_STEP) {
            Some(kind) => kind,
            None => crate::error::inconsistent(format!(
                "cell with unknown kind byte {}",
                self.header.kind_byte
            )),
        }
    }

    /// The type as seen by type checks: any quoting level makes it [Kind::Quoted].
    pub fn datatype(&self) -> Kind {
        if self.quote_depth() > 0 {
            Kind::Quoted
        } else {
            self.type_of()
        }
    }

    pub fn quote_depth(&self) -> u32 {
        match (self.header.layout, self.extra) {
            (Layout::Pairing, Extra::QuoteDepth(depth)) => depth,
            _ => u32::from(self.header.kind_byte / QUOTE_STEP),
        }
    }

    pub fn is_paired_quote(&self) -> bool {
        self.header.layout == Layout::Pairing && matches!(self.extra, Extra::QuoteDepth(_))
    }

    pub fn flags(&self) -> CellFlags {
        self.header.flags
    }

    pub fn has_flag(&self, flag: CellFlags) -> bool {
        self.header.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: CellFlags) {
        self.header.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.header.flags.remove(flag);
    }

    pub fn is_protected(&self) -> bool {
        self.has_flag(CellFlags::PROTECTED)
    }

    pub fn is_relative(&self) -> bool {
        matches!(self.extra, Extra::Binding(Binding::Relative(_)))
    }

    pub fn binding(&self) -> Binding {
        match self.extra {
            Extra::Binding(binding) => binding,
            _ => Binding::Unbound,
        }
    }

    /// The node held in the first payload slot, if any.
    pub fn node(&self) -> Option<NodeRef> {
        match self.payload {
            Payload::Any {
                first: Slot::Node(node),
                ..
            } => Some(node),
            _ => None,
        }
    }

    /// Every node this cell keeps alive: the payload slots and the binding.
    pub fn referenced_nodes(&self) -> impl Iterator<Item = NodeRef> {
        let (first, second) = match self.payload {
            Payload::Any { first, second } => (first, second),
            _ => (Slot::Empty, Slot::Empty),
        };

        let binding = match self.extra {
            Extra::Binding(Binding::Context(node) | Binding::Relative(node)) => Some(node),
            _ => None,
        };

        [first, second]
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Node(node) => Some(node),
                _ => None,
            })
            .chain(binding)
    }

    /// Position inside a series, kept in the second payload slot.
    pub fn index(&self) -> usize {
        match self.payload {
            Payload::Any {
                second: Slot::Index(index),
                ..
            } => index,
            _ => 0,
        }
    }

    pub fn symbol(&self) -> Option<Symbol> {
        match (self.payload, self.extra) {
            (Payload::Word { symbol, .. }, _) => Some(symbol),
            (_, Extra::Key(symbol)) => Some(symbol),
            _ => None,
        }
    }

    fn expect_kind(&self, kind: Kind) -> Result<()> {
        match self.datatype() {
            found if found == kind => Ok(()),
            found => Err(RuntimeError::expected(kind.name(), found)),
        }
    }

    pub fn as_integer(&self) -> Result<i64> {
        self.expect_kind(Kind::Integer)?;

        match self.payload {
            Payload::Integer(value) => Ok(value),
            _ => crate::error::inconsistent("integer cell without an integer payload"),
        }
    }

    pub fn as_decimal(&self) -> Result<f64> {
        match (self.datatype(), self.payload) {
            (Kind::Decimal, Payload::Decimal(value)) => Ok(value),
            (Kind::Integer, Payload::Integer(value)) => Ok(value as f64),
            (found, _) => Err(RuntimeError::expected("decimal", found)),
        }
    }

    pub fn as_logic(&self) -> Result<bool> {
        self.expect_kind(Kind::Logic)?;

        match self.payload {
            Payload::Logic(value) => Ok(value),
            _ => crate::error::inconsistent("logic cell without a logic payload"),
        }
    }

    pub fn as_char(&self) -> Result<char> {
        self.expect_kind(Kind::Char)?;

        let text = self.inline_str()?;
        text.chars()
            .next()
            .ok_or_else(|| RuntimeError::expected("char", Kind::Issue))
    }

    pub fn as_datatype(&self) -> Result<Kind> {
        match (self.datatype(), self.extra) {
            (Kind::Datatype, Extra::Datatype(kind)) => Ok(kind),
            (found, _) => Err(RuntimeError::expected("datatype", found)),
        }
    }

    /// Bytes of an inline payload as text.
    pub(crate) fn inline_str(&self) -> Result<&str> {
        match &self.payload {
            Payload::Inline { len, bytes } => {
                std::str::from_utf8(&bytes[..*len as usize]).map_err(|_| RuntimeError::InvalidUtf8)
            }
            _ => Err(RuntimeError::expected("inline text", self.datatype())),
        }
    }

    pub fn is_null(&self) -> bool {
        self.datatype() == Kind::Null
    }
}

impl PartialEq for Cell {
    /// Equal kind, layout, extra and payload. Header flags are not part of the value.
    fn eq(&self, other: &Self) -> bool {
        self.header.kind_byte == other.header.kind_byte
            && self.header.layout == other.header.layout
            && self.extra == other.extra
            && self.payload == other.payload
    }
}

/// A cell that is fully resolved: it never carries a relative binding, so it can be used without
/// knowing which frame it came from. Values taken out of arrays go through
/// [crate::Heap::derelativize].
#[derive(Debug, PartialEq)]
#[repr(transparent)]
pub struct Value(Cell);

impl Value {
    pub(crate) fn from_specific(cell: Cell) -> Self {
        if cell.is_relative() {
            crate::error::inconsistent("relative cell used where a specific value is required");
        }

        Value(cell)
    }

    pub(crate) fn cell_mut(&mut self) -> &mut Cell {
        &mut self.0
    }

    pub fn copied(&self) -> Value {
        Value(self.0.copied())
    }

    /// A view of this value that cannot be used to modify the series it references.
    pub fn constant(mut self) -> Value {
        self.0.set_flag(CellFlags::CONST);
        self
    }

    pub fn into_cell(self) -> Cell {
        self.0
    }
}

impl Deref for Value {
    type Target = Cell;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_keeps_destination_persistent_bits() {
        let payload = Payload::Integer(7);
        let mut source = Cell::fresh(Kind::Integer, Layout::Scalar, Extra::None, payload);
        source.set_flag(CellFlags::NEWLINE_BEFORE | CellFlags::CONST | CellFlags::NOTE);

        let mut dest = Cell::erased();
        dest.set_flag(CellFlags::STACK);
        dest.copy_from(&source).unwrap();

        assert_eq!(dest.flags(), CellFlags::STACK | CellFlags::CONST);
        assert_eq!(dest.as_integer().unwrap(), 7);
    }

    #[test]
    fn protected_cells_refuse_writes() {
        let source = Cell::fresh(Kind::Logic, Layout::Scalar, Extra::None, Payload::Logic(true));
        let mut dest = Cell::erased();
        dest.set_flag(CellFlags::PROTECTED);

        assert_eq!(dest.copy_from(&source), Err(RuntimeError::ProtectedCell));
        assert_eq!(dest.type_of(), Kind::Trash);
    }

    #[test]
    fn reset_clears_transient_bits() {
        let mut cell = Cell::erased();
        cell.set_flag(CellFlags::NOTE | CellFlags::ROOT | CellFlags::UNEVALUATED);
        cell.reset(Kind::Blank, Layout::Scalar, Extra::None, Payload::None);

        assert_eq!(cell.flags(), CellFlags::ROOT);
    }

    #[test]
    fn extraction_checks_the_kind() {
        let cell = Cell::fresh(Kind::Decimal, Layout::Scalar, Extra::None, Payload::Decimal(1.5));

        assert_eq!(cell.as_decimal().unwrap(), 1.5);
        assert_eq!(
            cell.as_integer(),
            Err(RuntimeError::expected("integer", Kind::Decimal))
        );
    }
}
