use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

impl Symbol {
    fn new(name: &str, scope: SymbolScope, index: usize) -> Self {
        Self {
            name: name.to_string(),
            scope,
            index,
        }
    }
}

/// One lexical scope of bindings. Function bodies get a table enclosed by the
/// table of the code that defines them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SymbolTable {
    pub outer: Option<Box<SymbolTable>>,
    /// The enclosing bindings this scope captured, in first-resolved order.
    pub free_symbols: Vec<Symbol>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Default::default()
        }
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = match self.outer {
            Some(_) => SymbolScope::Local,
            None => SymbolScope::Global,
        };
        let symbol = Symbol::new(name, scope, self.num_definitions);
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Builtin, index);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Function, 0);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol::new(&original.name, SymbolScope::Free, self.free_symbols.len());
        log::trace!("capturing '{}' as free variable {}", original.name, symbol.index);
        self.free_symbols.push(original);
        self.store.insert(symbol.name.to_string(), symbol.clone());
        symbol
    }

    /// Looks `name` up through the enclosing scopes. A binding found in an
    /// enclosing function scope is registered as free in every scope between
    /// there and here.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }

        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}
