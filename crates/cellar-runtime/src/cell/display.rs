use std::fmt::Display;

use super::{Cell, Extra, Kind, Layout, Payload};
use crate::heap::Heap;
use crate::node::{Link, NodeRef};

/// Source-like rendering of a cell. Needs the heap to read the nodes the cell references.
pub struct Molded<'a> {
    heap: &'a Heap,
    cell: &'a Cell,
    /// Arrays and contexts enclosing this cell. One that shows up again is written as `...`.
    enclosing: Vec<NodeRef>,
}

impl Heap {
    pub fn mold(&self, cell: &Cell) -> String {
        Molded {
            heap: self,
            cell,
            enclosing: Vec::new(),
        }
        .to_string()
    }

    /// Like [Heap::mold], but text-like values render as their bare content.
    pub fn form(&self, cell: &Cell) -> String {
        if cell.quote_depth() == 0 {
            if let Some(text) = self.bare(cell) {
                return text;
            }
        }

        self.mold(cell)
    }

    /// Content of a text-like cell, ignoring any quoting.
    fn bare(&self, cell: &Cell) -> Option<String> {
        match (cell.type_of(), cell.layout()) {
            (Kind::Text | Kind::Issue, Layout::Series) => self.bare_text(cell),
            (Kind::Issue | Kind::Char, Layout::Inline) => cell.inline_str().ok().map(str::to_owned),
            _ => None,
        }
    }

    fn bare_text(&self, cell: &Cell) -> Option<String> {
        let node = self.node(cell.node()?);
        self.str_of(node, cell.index()).ok().map(str::to_owned)
    }
}

impl Molded<'_> {
    fn nested<'b>(&'b self, cell: &'b Cell, container: Option<NodeRef>) -> Molded<'b> {
        let mut enclosing = self.enclosing.clone();
        enclosing.extend(container);

        Molded {
            heap: self.heap,
            cell,
            enclosing,
        }
    }

    fn array(&self, f: &mut std::fmt::Formatter<'_>, open: &str, close: &str) -> std::fmt::Result {
        let Some(node) = self.cell.node() else {
            return write!(f, "{open}{close}");
        };

        if self.enclosing.contains(&node) {
            return write!(f, "{open}...{close}");
        }

        let Ok(cells) = self.heap.node(node).cells() else {
            return write!(f, "#[unavailable]");
        };

        write!(f, "{open}")?;

        for (index, cell) in cells.iter().skip(self.cell.index()).enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }

            write!(f, "{}", self.nested(cell, Some(node)))?;
        }

        write!(f, "{close}")
    }

    fn fields(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(node) = self.cell.node() else {
            return write!(f, "[]");
        };

        if self.enclosing.contains(&node) {
            return write!(f, "[...]");
        }

        let varlist = self.heap.node(node);
        let Ok(cells) = varlist.cells() else {
            return write!(f, "#[unavailable]");
        };

        let keys = self.heap.context_keys(varlist);

        write!(f, "[")?;

        for (index, (key, cell)) in keys.iter().zip(cells.iter().skip(1)).enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }

            let value = self.nested(cell, Some(node));
            write!(f, "{}: {}", self.heap.spelling(*key), value)?;
        }

        write!(f, "]")
    }
}

impl Display for Molded<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.cell;

        for _ in 0..cell.quote_depth() {
            write!(f, "'")?;
        }

        if cell.is_paired_quote() {
            let inner = cell
                .node()
                .and_then(|pairing| self.heap.node(pairing).cells().ok())
                .and_then(|cells| cells.first());

            return match inner {
                Some(inner) => write!(f, "{}", self.nested(inner, None)),
                None => write!(f, "#[unavailable]"),
            };
        }

        match (cell.type_of(), cell.payload()) {
            (Kind::Trash, _) => write!(f, "~"),
            (Kind::Null, _) => write!(f, "null"),
            (Kind::Blank, _) => write!(f, "_"),
            (Kind::Logic, Payload::Logic(value)) => write!(f, "{value}"),
            (Kind::Integer, Payload::Integer(value)) => write!(f, "{value}"),
            (Kind::Decimal, Payload::Decimal(value)) => write!(f, "{value:?}"),
            (Kind::Time, Payload::Time(nanos)) => {
                let sign = if nanos < 0 { "-" } else { "" };
                let nanos = nanos.unsigned_abs();
                let seconds = nanos / 1_000_000_000;
                let fraction = nanos % 1_000_000_000;

                write!(
                    f,
                    "{sign}{}:{:02}:{:02}",
                    seconds / 3600,
                    seconds / 60 % 60,
                    seconds % 60
                )?;

                if fraction > 0 {
                    let digits = format!("{fraction:09}");
                    write!(f, ".{}", digits.trim_end_matches('0'))?;
                }

                Ok(())
            }
            (Kind::Date, Payload::Date { year, month, day }) => {
                write!(f, "{year:04}-{month:02}-{day:02}")?;

                if let Extra::Zone(minutes) = cell.extra() {
                    let sign = if minutes < 0 { '-' } else { '+' };
                    let minutes = minutes.unsigned_abs();
                    write!(f, "{sign}{:02}:{:02}", minutes / 60, minutes % 60)?;
                }

                Ok(())
            }
            (Kind::Char, _) => match cell.inline_str() {
                Ok(text) => write!(f, "#\"{text}\""),
                Err(_) => write!(f, "#[unavailable]"),
            },
            (Kind::Issue, _) => match self.heap.bare(cell) {
                Some(text) => write!(f, "#{text}"),
                None => write!(f, "#[unavailable]"),
            },
            (Kind::Text, _) => match self.heap.bare_text(cell) {
                Some(text) => write!(f, "\"{}\"", text.replace('"', "^\"")),
                None => write!(f, "#[unavailable]"),
            },
            (Kind::Binary, _) => {
                let bytes = cell
                    .node()
                    .and_then(|node| self.heap.node(node).bytes().ok());

                match bytes {
                    Some(bytes) => {
                        write!(f, "#{{")?;
                        for byte in bytes.iter().skip(cell.index()) {
                            write!(f, "{byte:02X}")?;
                        }
                        write!(f, "}}")
                    }
                    None => write!(f, "#[unavailable]"),
                }
            }
            (kind @ (Kind::Word | Kind::SetWord | Kind::GetWord), Payload::Word { symbol, .. }) => {
                let name = self.heap.spelling(symbol);

                match kind {
                    Kind::SetWord => write!(f, "{name}:"),
                    Kind::GetWord => write!(f, ":{name}"),
                    _ => write!(f, "{name}"),
                }
            }
            (Kind::Block, _) => self.array(f, "[", "]"),
            (Kind::Group, _) => self.array(f, "(", ")"),
            (Kind::Action, _) => match cell.extra() {
                Extra::Key(label) => write!(f, "#[action! {}]", self.heap.spelling(label)),
                _ => write!(f, "#[action!]"),
            },
            (Kind::Object, _) => {
                write!(f, "make object! ")?;
                self.fields(f)
            }
            (Kind::Frame, _) => write!(f, "#[frame!]"),
            (Kind::Handle, _) => write!(f, "#[handle!]"),
            (Kind::Datatype, _) => match cell.extra() {
                Extra::Datatype(kind) => write!(f, "{kind}!"),
                _ => write!(f, "#[datatype!]"),
            },
            (Kind::Parameter, _) => match cell.extra() {
                Extra::Key(name) => write!(f, "#[parameter! {}]", self.heap.spelling(name)),
                _ => write!(f, "#[parameter!]"),
            },
            (kind, _) => write!(f, "#[{kind}!]"),
        }
    }
}

impl Heap {
    /// Keys of a varlist, whichever of the two key sources it uses.
    pub(crate) fn context_keys(&self, varlist: &crate::node::Node) -> Vec<crate::symbol::Symbol> {
        match varlist.link {
            Link::Keylist(keylist) => self
                .node(keylist)
                .symbols()
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            Link::Paramlist(paramlist) => self
                .node(paramlist)
                .cells()
                .map(|cells| cells.iter().skip(1).filter_map(Cell::symbol).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cell::{Kind, Value};
    use crate::config::HeapConfig;
    use crate::heap::Heap;

    #[test]
    fn scalars() {
        let heap = Heap::new(HeapConfig::small());

        assert_eq!(heap.mold(&Value::integer(-3)), "-3");
        assert_eq!(heap.mold(&Value::decimal(2.0)), "2.0");
        assert_eq!(heap.mold(&Value::logic(false)), "false");
        assert_eq!(heap.mold(&Value::blank()), "_");
        assert_eq!(heap.mold(&Value::char('a')), "#\"a\"");
        assert_eq!(heap.mold(&Value::datatype_of(Kind::Integer)), "integer!");
        assert_eq!(heap.mold(&Value::time(3_723_500_000_000)), "1:02:03.5");
        assert_eq!(heap.mold(&Value::date(2024, 1, 5, Some(-90))), "2024-01-05-01:30");
    }

    #[test]
    fn series() {
        let mut heap = Heap::new(HeapConfig::small());
        let text = heap.make_text("say \"hi\"");
        let word = heap.word("x");
        let group = heap.make_group(&[Value::integer(1)]);
        let block = heap.make_block(&[text, word, group]);
        let binary = heap.make_binary(&[0xCA, 0xFE]);

        assert_eq!(heap.mold(&block), "[\"say ^\"hi^\"\" x (1)]");
        assert_eq!(heap.mold(&binary), "#{CAFE}");
        let bare = heap.make_text("bare");
        assert_eq!(heap.form(&bare), "bare");
        assert_eq!(heap.mold(&bare), "\"bare\"");
    }

    #[test]
    fn cycles_are_cut() {
        let mut heap = Heap::new(HeapConfig::small());
        let block = heap.make_block(&[Value::integer(1)]);
        heap.append(&block, &block.copied()).unwrap();

        assert_eq!(heap.mold(&block), "[1 [...]]");

        let group = heap.make_group(&[block.copied()]);
        heap.append(&block, &group).unwrap();
        assert_eq!(heap.mold(&block), "[1 [...] ([...])]");

        let object = heap.make_object(&[("a", Value::integer(1))]).unwrap();
        heap.set_field(&object, "a", &object.copied()).unwrap();
        assert_eq!(heap.mold(&object), "make object! [a: make object! [...]]");

        let text = heap.make_text("");
        heap.append(&text, &block).unwrap();
        assert_eq!(heap.text_of(&text).unwrap(), "[1 [...] ([...])]");
    }

    #[test]
    fn shared_arrays_that_are_not_cycles_are_molded_in_full() {
        let mut heap = Heap::new(HeapConfig::small());
        let inner = heap.make_block(&[Value::integer(2)]);
        let outer = heap.make_block(&[inner.copied(), inner]);

        assert_eq!(heap.mold(&outer), "[[2] [2]]");
    }
}
