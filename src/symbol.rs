use crate::error::LispResult;
use crate::heap::Heap;
use crate::value::{Object, Value};

impl Heap {
    /// Intern a symbol name. Returns the existing symbol if already
    /// interned, or allocates a new one and prepends it to the symbol list.
    ///
    /// The symbol list is a root, so interned symbols are never collected
    /// and `intern(n) == intern(n)` holds across collections.
    pub fn intern(&mut self, name: &str) -> LispResult<Value> {
        if let Some(sym) = self.find_symbol(name) {
            return Ok(sym);
        }
        let sym = self.alloc(Object::Symbol(name.to_string()))?;
        // The cons protects `sym` as its head should it have to collect.
        self.symbols = self.cons(sym, self.symbols)?;
        Ok(sym)
    }

    /// Look up a symbol by name, without interning.
    pub fn find_symbol(&self, name: &str) -> Option<Value> {
        let mut current = self.symbols;
        while let Some((sym, rest)) = self.as_cell(current) {
            if self.symbol_name(sym) == Some(name) {
                return Some(sym);
            }
            current = rest;
        }
        None
    }

    pub fn symbol_name(&self, v: Value) -> Option<&str> {
        match self.get(v) {
            Object::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Total number of interned symbols.
    pub fn symbol_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.symbols;
        while let Some((_, rest)) = self.as_cell(current) {
            count += 1;
            current = rest;
        }
        count
    }
}

/// Symbols the evaluator dispatches on by identity, interned at startup.
#[derive(Clone, Copy, Debug)]
pub struct Builtins {
    pub quote: Value,
    pub define: Value,
    pub setq: Value,
    pub if_: Value,
    pub lambda: Value,
    pub t: Value,
}

impl Builtins {
    pub fn intern_all(heap: &mut Heap) -> LispResult<Self> {
        Ok(Builtins {
            quote: heap.intern("quote")?,
            define: heap.intern("define")?,
            setq: heap.intern("setq")?,
            if_: heap.intern("if")?,
            lambda: heap.intern("lambda")?,
            t: heap.intern("t")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    #[test]
    fn test_intern_returns_same_value() {
        let mut heap = Heap::new(HeapConfig { capacity: 32 }).unwrap();
        let a = heap.intern("foo").unwrap();
        let b = heap.intern("foo").unwrap();
        let c = heap.intern("bar").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.symbol_name(a), Some("foo"));
        assert_eq!(heap.symbol_count(), 2);
    }

    #[test]
    fn test_symbols_survive_collection() {
        let mut heap = Heap::new(HeapConfig { capacity: 32 }).unwrap();
        let a = heap.intern("kept").unwrap();
        heap.make_str("garbage").unwrap();
        assert_eq!(heap.collect(), 1);
        assert_eq!(heap.find_symbol("kept"), Some(a));
        assert_eq!(heap.intern("kept").unwrap(), a);
    }

    #[test]
    fn test_intern_under_pressure() {
        // nil + 3 symbols with their list cells = 7 slots; the 8th is
        // churned by garbage so interning has to collect.
        let mut heap = Heap::new(HeapConfig { capacity: 8 }).unwrap();
        let names = ["a", "b", "c"];
        let mut syms = Vec::new();
        for name in names {
            heap.make_fixnum(0).unwrap();
            syms.push(heap.intern(name).unwrap());
        }
        for (name, sym) in names.iter().zip(&syms) {
            assert_eq!(heap.intern(name).unwrap(), *sym);
        }
        assert!(heap.check_conservation());
    }

    #[test]
    fn test_builtins_are_distinct() {
        let mut heap = Heap::new(HeapConfig { capacity: 64 }).unwrap();
        let b = Builtins::intern_all(&mut heap).unwrap();
        assert_ne!(b.quote, b.define);
        assert_eq!(heap.intern("lambda").unwrap(), b.lambda);
    }
}
