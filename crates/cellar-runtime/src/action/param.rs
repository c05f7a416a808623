use bitflags::bitflags;

use crate::cell::{Cell, Extra, Kind, Layout, Payload, TypeSet};
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParamClass {
    /// Filled positionally or by name.
    Normal,
    /// Filled by name only; absent unless given.
    Refinement,
    /// Never filled by the caller, starts out null.
    Local,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamFlags: u8 {
        /// The caller may leave the parameter out.
        const OPTIONAL = 1 << 0;
    }
}

/// Declaration of one parameter, as given to [crate::Heap::make_action].
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub class: ParamClass,
    pub types: TypeSet,
    pub optional: bool,
}

impl ParamSpec {
    pub fn normal(name: impl Into<String>, types: TypeSet) -> Self {
        Self {
            name: name.into(),
            class: ParamClass::Normal,
            types,
            optional: false,
        }
    }

    pub fn refinement(name: impl Into<String>, types: TypeSet) -> Self {
        Self {
            name: name.into(),
            class: ParamClass::Refinement,
            types,
            optional: true,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: ParamClass::Local,
            types: TypeSet::ANY,
            optional: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub(crate) fn to_cell(&self, symbol: Symbol) -> Cell {
        let mut flags = ParamFlags::empty();
        flags.set(ParamFlags::OPTIONAL, self.optional);

        Cell::fresh(
            Kind::Parameter,
            Layout::Scalar,
            Extra::Key(symbol),
            Payload::Param {
                class: self.class,
                flags,
                types: self.types,
            },
        )
    }
}

/// A parameter as read back from a paramlist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Param {
    pub symbol: Symbol,
    pub class: ParamClass,
    pub types: TypeSet,
    pub optional: bool,
}

impl Param {
    pub(crate) fn from_cell(cell: &Cell) -> Option<Param> {
        match (cell.extra(), cell.payload()) {
            (
                Extra::Key(symbol),
                Payload::Param {
                    class,
                    flags,
                    types,
                },
            ) => Some(Param {
                symbol,
                class,
                types,
                optional: flags.contains(ParamFlags::OPTIONAL),
            }),
            _ => None,
        }
    }

    /// Whether a caller must supply this parameter.
    pub(crate) fn is_required(&self) -> bool {
        self.class == ParamClass::Normal && !self.optional
    }
}
