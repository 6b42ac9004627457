//! Name resolution for the compiler.
//!
//! The table is a stack of scopes. Scope 0 is the global scope and also holds
//! the built-ins; every function literal pushes one scope for its body. A name
//! found in an enclosing *function* scope is re-defined as a `Free` symbol in
//! each scope between the definition and the use, which is how the compiler
//! learns what a closure has to capture.

use std::collections::HashMap;

use tracing::debug;

use crate::runtime::builtins::BUILTINS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The enclosing function's own name, bound by `let`.
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
        Symbol {
            name: name.to_string(),
            scope,
            index,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    store: HashMap<String, Symbol>,
    /// Slots allocated by `define`; for a function this is its local count.
    pub num_definitions: usize,
    /// Symbols captured from enclosing scopes, in capture order. Each entry is
    /// the symbol as the *enclosing* scope sees it.
    pub free_symbols: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table whose global scope already knows every built-in.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            scopes: vec![Scope::default()],
        };
        for (index, builtin) in BUILTINS.iter().enumerate() {
            table.define_builtin(index, builtin.name);
        }
        table
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn is_global(&self) -> bool {
        self.depth() == 0
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
        debug!(depth = self.depth(), "enter symbol scope");
    }

    /// Pops the innermost scope. The global scope is never popped.
    pub fn leave_scope(&mut self) -> Option<Scope> {
        if self.is_global() {
            return None;
        }
        let scope = self.scopes.pop();
        debug!(depth = self.depth(), "leave symbol scope");
        scope
    }

    /// Binds `name` in the innermost scope.
    ///
    /// Re-binding a name that already has a slot of the same kind in this
    /// scope reuses the slot; anything else allocates a new one.
    pub fn define(&mut self, name: &str) -> Symbol {
        let depth = self.depth();
        let kind = if depth == 0 {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let scope = &mut self.scopes[depth];

        if let Some(existing) = scope.store.get(name) {
            if existing.scope == kind {
                debug!(name, index = existing.index, "rebinding existing slot");
                return existing.clone();
            }
        }

        let symbol = Symbol::new(name, kind, scope.num_definitions);
        scope.num_definitions += 1;
        scope.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Builtin, index);
        self.scopes[0].store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let depth = self.depth();
        let symbol = Symbol::new(name, SymbolScope::Function, 0);
        self.scopes[depth]
            .store
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolves `name` from the innermost scope outwards.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        let depth = self.depth();
        self.resolve_at(depth, name)
    }

    fn resolve_at(&mut self, depth: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.scopes[depth].store.get(name) {
            return Some(symbol.clone());
        }
        if depth == 0 {
            return None;
        }

        let outer = self.resolve_at(depth - 1, name)?;
        match outer.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(outer),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => {
                Some(self.define_free(depth, outer))
            }
        }
    }

    fn define_free(&mut self, depth: usize, original: Symbol) -> Symbol {
        let scope = &mut self.scopes[depth];
        let symbol = Symbol::new(&original.name, SymbolScope::Free, scope.free_symbols.len());
        scope.free_symbols.push(original);
        scope.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Free symbols captured so far by the innermost scope.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.scopes[self.depth()].free_symbols
    }
}
