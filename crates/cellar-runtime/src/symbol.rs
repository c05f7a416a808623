//! Interned spellings of words, keys and parameter names.

use fxhash::FxHashMap;

/// An interned, case-sensitive spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub(crate) u32);

#[derive(Default)]
pub struct SymbolTable {
    spellings: Vec<Box<str>>,
    index: FxHashMap<Box<str>, Symbol>,
}

impl SymbolTable {
    pub fn intern(&mut self, spelling: &str) -> Symbol {
        if let Some(symbol) = self.index.get(spelling) {
            return *symbol;
        }

        let symbol = Symbol(self.spellings.len() as u32);
        self.spellings.push(spelling.into());
        self.index.insert(spelling.into(), symbol);
        symbol
    }

    /// Finds an already interned spelling without adding it.
    pub fn lookup(&self, spelling: &str) -> Option<Symbol> {
        self.index.get(spelling).copied()
    }

    pub fn spelling(&self, symbol: Symbol) -> &str {
        &self.spellings[symbol.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.spellings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spellings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_case_sensitive() {
        let mut table = SymbolTable::default();
        let a = table.intern("append");
        let b = table.intern("Append");

        assert_ne!(a, b);
        assert_eq!(table.intern("append"), a);
        assert_eq!(table.spelling(b), "Append");
        assert_eq!(table.lookup("missing"), None);
        assert_eq!(table.len(), 2);
    }
}
