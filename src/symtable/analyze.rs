//! Second pass: assign storage classes top-down.

use indexmap::IndexSet;
use rustc_hash::FxHashSet;

use super::{ScopeId, ScopeKind, Storage, Symbol, SymbolTable};
use crate::compiler::{CompileError, CompileResult};

pub(super) fn analyze(table: &mut SymbolTable) -> CompileResult<()> {
    let globals = module_globals(table);
    let root = table.root();
    analyze_scope(table, root, &FxHashSet::default(), &globals)?;
    Ok(())
}

/// Names that end up bound in the module namespace: module-level bindings plus
/// names assigned through a `global` declaration anywhere.
fn module_globals(table: &SymbolTable) -> FxHashSet<String> {
    let mut globals = FxHashSet::default();
    for (id, scope) in table.scopes() {
        for symbol in scope.symbols.values() {
            let module_binding = id == table.root() && symbol.is_bound;
            if module_binding || (symbol.explicit_global && symbol.is_bound) {
                globals.insert(symbol.name.clone());
            }
        }
    }
    globals
}

/// Resolves `id` given the names bound in enclosing function scopes and
/// returns the names this scope needs from outside.
fn analyze_scope(
    table: &mut SymbolTable,
    id: ScopeId,
    enclosing: &FxHashSet<String>,
    globals: &FxHashSet<String>,
) -> CompileResult<IndexSet<String>> {
    let kind = table.scope(id).kind;

    for symbol in table.scope_mut(id).symbols.values_mut() {
        symbol.storage = own_storage(symbol, kind, enclosing, globals)?;
    }

    let child_bound = {
        let scope = table.scope(id);
        match kind {
            ScopeKind::Module => FxHashSet::default(),
            ScopeKind::Class => {
                let mut bound = enclosing.clone();
                bound.insert("__class__".to_string());
                bound
            }
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension => {
                let mut bound = enclosing.clone();
                for symbol in scope.symbols.values() {
                    if symbol.explicit_global {
                        bound.remove(&symbol.name);
                    } else if symbol.storage == Storage::Local {
                        bound.insert(symbol.name.clone());
                    }
                }
                bound
            }
        }
    };

    let children = table.scope(id).children.clone();
    let mut child_free = IndexSet::new();
    for child in children {
        child_free.extend(analyze_scope(table, child, &child_bound, globals)?);
    }

    let scope = table.scope_mut(id);
    let span = scope.span;
    let mut free = IndexSet::new();
    for name in child_free {
        if kind == ScopeKind::Class && name == "__class__" {
            scope.needs_class_cell = true;
            let symbol = scope
                .symbols
                .entry(name.clone())
                .or_insert_with(|| Symbol::new(&name, span));
            symbol.storage = Storage::Cell;
            continue;
        }
        match scope.symbols.get_mut(&name) {
            Some(symbol) if symbol.storage == Storage::Local && kind.is_function_like() => {
                symbol.storage = Storage::Cell;
            }
            Some(symbol) if symbol.storage == Storage::Cell => {}
            Some(symbol) if symbol.storage == Storage::Free => {
                free.insert(name);
            }
            Some(_) if kind == ScopeKind::Class => {
                // The class body has its own binding of the name; methods still
                // see the enclosing function's cell.
                if !scope.class_free.contains(&name) {
                    scope.class_free.push(name.clone());
                }
                free.insert(name);
            }
            Some(_) => {}
            None => {
                let mut symbol = Symbol::new(&name, span);
                symbol.storage = Storage::Free;
                scope.symbols.insert(name.clone(), symbol);
                free.insert(name);
            }
        }
    }

    for symbol in scope.symbols.values() {
        if symbol.storage == Storage::Free {
            free.insert(symbol.name.clone());
        }
    }
    Ok(free)
}

fn own_storage(
    symbol: &Symbol,
    kind: ScopeKind,
    enclosing: &FxHashSet<String>,
    globals: &FxHashSet<String>,
) -> CompileResult<Storage> {
    if symbol.explicit_global {
        return Ok(Storage::Global);
    }
    if symbol.is_nonlocal {
        if !enclosing.contains(&symbol.name) {
            return Err(CompileError::NonlocalNotFound {
                name: symbol.name.clone(),
                line: symbol.span.line,
                column: symbol.span.column,
            });
        }
        return Ok(Storage::Free);
    }
    if symbol.is_bound {
        return Ok(match kind {
            ScopeKind::Module => Storage::Global,
            _ => Storage::Local,
        });
    }
    if kind != ScopeKind::Module && enclosing.contains(&symbol.name) {
        return Ok(Storage::Free);
    }
    if globals.contains(&symbol.name) {
        Ok(Storage::Global)
    } else {
        Ok(Storage::Builtin)
    }
}
