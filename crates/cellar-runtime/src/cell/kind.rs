use std::fmt::Display;

/// Each quoting level adds this to the kind byte, as long as the depth stays inline.
pub const QUOTE_STEP: u8 = 64;

/// Deepest quoting that is still encoded in the kind byte itself.
pub const MAX_INLINE_QUOTE: u32 = 3;

/// The primary type of a value. Every discriminant is below [QUOTE_STEP].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Trash = 0,
    Null,
    Blank,
    Logic,
    Integer,
    Decimal,
    Time,
    Date,
    Char,
    Issue,
    Text,
    Binary,
    Word,
    SetWord,
    GetWord,
    Block,
    Group,
    Action,
    Object,
    Frame,
    Handle,
    Datatype,
    Parameter,
    Quoted,
}

impl Kind {
    pub const ALL: [Kind; 24] = [
        Kind::Trash,
        Kind::Null,
        Kind::Blank,
        Kind::Logic,
        Kind::Integer,
        Kind::Decimal,
        Kind::Time,
        Kind::Date,
        Kind::Char,
        Kind::Issue,
        Kind::Text,
        Kind::Binary,
        Kind::Word,
        Kind::SetWord,
        Kind::GetWord,
        Kind::Block,
        Kind::Group,
        Kind::Action,
        Kind::Object,
        Kind::Frame,
        Kind::Handle,
        Kind::Datatype,
        Kind::Parameter,
        Kind::Quoted,
    ];

    pub fn from_byte(byte: u8) -> Option<Kind> {
        Kind::ALL.get(byte as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Trash => "trash",
            Kind::Null => "null",
            Kind::Blank => "blank",
            Kind::Logic => "logic",
            Kind::Integer => "integer",
            Kind::Decimal => "decimal",
            Kind::Time => "time",
            Kind::Date => "date",
            Kind::Char => "char",
            Kind::Issue => "issue",
            Kind::Text => "text",
            Kind::Binary => "binary",
            Kind::Word => "word",
            Kind::SetWord => "set-word",
            Kind::GetWord => "get-word",
            Kind::Block => "block",
            Kind::Group => "group",
            Kind::Action => "action",
            Kind::Object => "object",
            Kind::Frame => "frame",
            Kind::Handle => "handle",
            Kind::Datatype => "datatype",
            Kind::Parameter => "parameter",
            Kind::Quoted => "quoted",
        }
    }

    pub fn is_word(self) -> bool {
        matches!(self, Kind::Word | Kind::SetWord | Kind::GetWord)
    }

    pub fn is_array(self) -> bool {
        matches!(self, Kind::Block | Kind::Group)
    }

    pub fn is_context(self) -> bool {
        matches!(self, Kind::Object | Kind::Frame)
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How the payload of a cell is physically laid out. The same [Kind] can come in more than one
/// layout, e.g. an issue is either [Layout::Inline] or [Layout::Series].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Layout {
    Scalar,
    /// Up to fifteen bytes stored in the payload.
    Inline,
    /// First slot is a node, second slot an index into it.
    Series,
    Word,
    /// First slot is a varlist.
    Context,
    /// First slot is a one-cell pairing node.
    Pairing,
}

/// A set of kinds, one bit per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeSet(u64);

impl TypeSet {
    pub const EMPTY: TypeSet = TypeSet(0);

    /// Every kind except trash.
    pub const ANY: TypeSet = TypeSet(!1);

    pub fn of(kinds: &[Kind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |set, kind| set.with(*kind))
    }

    pub fn with(self, kind: Kind) -> Self {
        TypeSet(self.0 | 1 << kind as u8)
    }

    pub fn contains(self, kind: Kind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    pub fn kinds(self) -> impl Iterator<Item = Kind> {
        Kind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }

    /// Human readable list of the kinds, used in error messages.
    pub fn describe(self) -> String {
        if self == Self::ANY {
            return "any value".into();
        }

        self.kinds()
            .map(Kind::name)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_fit_below_the_quote_step() {
        assert!(Kind::ALL.iter().all(|kind| (*kind as u8) < QUOTE_STEP));

        for (index, kind) in Kind::ALL.iter().enumerate() {
            assert_eq!(Kind::from_byte(index as u8), Some(*kind));
        }
    }

    #[test]
    fn typesets() {
        let numbers = TypeSet::of(&[Kind::Integer, Kind::Decimal]);
        assert!(numbers.contains(Kind::Decimal));
        assert!(!numbers.contains(Kind::Text));
        assert_eq!(numbers.describe(), "integer or decimal");
        assert!(TypeSet::ANY.contains(Kind::Quoted));
        assert!(!TypeSet::ANY.contains(Kind::Trash));
    }
}
