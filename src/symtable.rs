//! Scope resolution.
//!
//! Every function, class, lambda and comprehension gets a [`Scope`] in an arena
//! owned by [`SymbolTable`]. Scopes refer to each other by [`ScopeId`] and are
//! found again from the syntax tree through the `(start, end)` offsets of the
//! node that introduced them.
//!
//! Resolution runs in two passes. The first walks the tree once and records, per
//! scope, which names are bound, used or declared `global`/`nonlocal`. The second
//! walks the scope tree top-down with the set of names visible from enclosing
//! function scopes and assigns each name its [`Storage`].

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::Program;
use crate::compiler::CompileResult;
use crate::token::Span;

mod analyze;
mod collect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
    Lambda,
    Comprehension,
}

impl ScopeKind {
    /// Scopes whose locals live in fast slots and may be captured by closures.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension
        )
    }
}

/// Where a name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Fast local slot (or the class namespace inside a class body).
    Local,
    /// Local that is captured by a nested scope.
    Cell,
    /// Captured from an enclosing function scope.
    Free,
    /// Module namespace.
    Global,
    /// Not bound anywhere in the module; looked up in builtins at runtime.
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredVia {
    Parameter,
    Assignment,
    Global,
    Nonlocal,
    ComprehensionTarget,
    ExceptTarget,
    PatternCapture,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub storage: Storage,
    pub declared_via: Option<DeclaredVia>,
    pub is_bound: bool,
    pub is_used: bool,
    pub is_parameter: bool,
    pub explicit_global: bool,
    pub is_nonlocal: bool,
    /// Bound by `:=` from an inner comprehension.
    pub walrus_target: bool,
    pub span: Span,
}

impl Symbol {
    fn new(name: &str, span: Span) -> Self {
        Self {
            name: name.to_string(),
            storage: Storage::Builtin,
            declared_via: None,
            is_bound: false,
            is_used: false,
            is_parameter: false,
            explicit_global: false,
            is_nonlocal: false,
            walrus_target: false,
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: String,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub symbols: IndexMap<String, Symbol>,
    /// Parameter names in slot order.
    pub params: Vec<String>,
    pub has_varargs: bool,
    pub has_varkw: bool,
    pub is_generator: bool,
    pub is_coroutine: bool,
    /// Class body that must provide an implicit `__class__` cell.
    pub needs_class_cell: bool,
    /// Class-body locals that nested functions capture from an enclosing
    /// function; the class only forwards their cells.
    pub class_free: Vec<String>,
    pub span: Span,
}

impl Scope {
    fn new(kind: ScopeKind, name: &str, parent: Option<ScopeId>, span: Span) -> Self {
        Self {
            kind,
            name: name.to_string(),
            parent,
            children: Vec::new(),
            symbols: IndexMap::new(),
            params: Vec::new(),
            has_varargs: false,
            has_varkw: false,
            is_generator: false,
            is_coroutine: false,
            needs_class_cell: false,
            class_free: Vec::new(),
            span,
        }
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Names stored in cells created by this scope, in first-seen order.
    pub fn cellvars(&self) -> Vec<String> {
        self.names_with(Storage::Cell)
    }

    /// Names captured from enclosing scopes, in first-seen order.
    pub fn freevars(&self) -> Vec<String> {
        let mut names = self.names_with(Storage::Free);
        names.extend(self.class_free.iter().cloned());
        names
    }

    fn names_with(&self, storage: Storage) -> Vec<String> {
        self.symbols
            .values()
            .filter(|symbol| symbol.storage == storage)
            .map(|symbol| symbol.name.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    by_node: FxHashMap<(usize, usize), ScopeId>,
}

impl SymbolTable {
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(index, scope)| (ScopeId(index), scope))
    }

    /// Scope introduced by the node with the given span.
    pub fn scope_for(&self, span: Span) -> Option<ScopeId> {
        self.by_node.get(&(span.start, span.end)).copied()
    }

    /// Storage of `name` inside `scope`. Names the resolver never saw (compiler
    /// temporaries) fall back to what an unbound use would get.
    pub fn storage(&self, scope: ScopeId, name: &str) -> Storage {
        let scope = self.scope(scope);
        match scope.symbol(name) {
            Some(symbol) => symbol.storage,
            None if scope.kind == ScopeKind::Module => Storage::Global,
            None => Storage::Builtin,
        }
    }

    pub(crate) fn add_scope(
        &mut self,
        kind: ScopeKind,
        name: &str,
        parent: Option<ScopeId>,
        span: Span,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope::new(kind, name, parent, span));
        if let Some(parent) = parent {
            self.scopes[parent.0].children.push(id);
        }
        self.by_node.insert((span.start, span.end), id);
        id
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }
}

/// Resolves every name in `program` to a storage class.
pub fn resolve(program: &Program) -> CompileResult<SymbolTable> {
    let mut table = SymbolTable::default();
    collect::collect(&mut table, program)?;
    analyze::analyze(&mut table)?;
    for (_, scope) in table.scopes() {
        debug!(
            scope = %scope.name,
            kind = ?scope.kind,
            symbols = scope.symbols.len(),
            cells = scope.cellvars().len(),
            frees = scope.freevars().len(),
            "resolved scope"
        );
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StatementKind;
    use crate::compiler::CompileError;
    use crate::parser::parse;
    use indoc::indoc;

    fn resolve_source(source: &str) -> SymbolTable {
        let program = parse(source).expect("parse");
        resolve(&program).expect("resolve")
    }

    fn resolve_error(source: &str) -> CompileError {
        let program = parse(source).expect("parse");
        resolve(&program).expect_err("expected resolution failure")
    }

    fn scope_named<'t>(table: &'t SymbolTable, name: &str) -> &'t Scope {
        table
            .scopes()
            .map(|(_, scope)| scope)
            .find(|scope| scope.name == name)
            .expect("scope should exist")
    }

    #[test]
    fn assigned_name_is_local_for_whole_function() {
        let table = resolve_source(indoc! {"
            x = 1
            def f():
                print(x)
                x = 2
        "});
        let f = scope_named(&table, "f");
        assert_eq!(f.symbol("x").map(|s| s.storage), Some(Storage::Local));
        assert_eq!(f.symbol("print").map(|s| s.storage), Some(Storage::Builtin));
        let module = table.scope(table.root());
        assert_eq!(module.symbol("x").map(|s| s.storage), Some(Storage::Global));
    }

    #[test]
    fn captured_local_becomes_cell_and_free() {
        let table = resolve_source(indoc! {"
            def outer():
                count = 0
                def middle():
                    def inner():
                        return count
                    return inner
                return middle
        "});
        assert_eq!(scope_named(&table, "outer").cellvars(), vec!["count"]);
        assert_eq!(scope_named(&table, "middle").freevars(), vec!["count"]);
        assert_eq!(scope_named(&table, "inner").freevars(), vec!["count"]);
    }

    #[test]
    fn class_body_is_not_visible_to_methods() {
        let table = resolve_source(indoc! {"
            def make():
                value = 1
                class C:
                    value = 2
                    def get(self):
                        return value
                return C
        "});
        let get = scope_named(&table, "get");
        assert_eq!(get.symbol("value").map(|s| s.storage), Some(Storage::Free));
        let class = scope_named(&table, "C");
        assert_eq!(class.symbol("value").map(|s| s.storage), Some(Storage::Local));
        assert_eq!(class.freevars(), vec!["value"]);
        assert_eq!(scope_named(&table, "make").cellvars(), vec!["value"]);
    }

    #[test]
    fn super_use_creates_class_cell() {
        let table = resolve_source(indoc! {"
            class B(A):
                def run(self):
                    return super().run()
        "});
        let class = scope_named(&table, "B");
        assert!(class.needs_class_cell);
        assert_eq!(class.cellvars(), vec!["__class__"]);
        assert_eq!(scope_named(&table, "run").freevars(), vec!["__class__"]);
    }

    #[test]
    fn comprehension_gets_its_own_scope() {
        let program = parse("x = 1\ny = [x for x in range(3)]\n").expect("parse");
        let table = resolve(&program).expect("resolve");
        let StatementKind::Assign { value, .. } = &program.body[1].kind else {
            panic!("expected assignment");
        };
        let comp = table.scope_for(value.span).expect("comprehension scope");
        let scope = table.scope(comp);
        assert_eq!(scope.kind, ScopeKind::Comprehension);
        assert_eq!(scope.params, vec![".0"]);
        assert_eq!(scope.symbol("x").map(|s| s.storage), Some(Storage::Local));
        assert!(scope.symbol("range").is_none());
    }

    #[test]
    fn walrus_in_comprehension_binds_enclosing_function() {
        let table = resolve_source(indoc! {"
            def f(items):
                [last := item for item in items]
                return last
        "});
        assert_eq!(scope_named(&table, "f").cellvars(), vec!["last"]);
        assert_eq!(scope_named(&table, "<listcomp>").freevars(), vec!["last"]);
    }

    #[test]
    fn global_parameter_is_binding_conflict() {
        let err = resolve_error(indoc! {"
            def f(x):
                global x
        "});
        assert!(matches!(
            err,
            CompileError::BindingConflict { ref name, ref scope, .. } if name == "x" && scope == "f"
        ));
    }

    #[test]
    fn global_after_use_is_binding_conflict() {
        let err = resolve_error(indoc! {"
            def f():
                print(x)
                global x
        "});
        assert!(matches!(err, CompileError::BindingConflict { .. }));
    }

    #[test]
    fn nonlocal_without_binding_is_reported() {
        let err = resolve_error(indoc! {"
            def f():
                def g():
                    nonlocal missing
                    missing = 1
        "});
        assert!(matches!(
            err,
            CompileError::NonlocalNotFound { ref name, line: 3, .. } if name == "missing"
        ));
    }

    #[test]
    fn nonlocal_shares_enclosing_cell() {
        let table = resolve_source(indoc! {"
            def counter():
                n = 0
                def bump():
                    nonlocal n
                    n += 1
                    return n
                return bump
        "});
        assert_eq!(scope_named(&table, "counter").cellvars(), vec!["n"]);
        let bump = scope_named(&table, "bump");
        assert_eq!(bump.symbol("n").map(|s| s.storage), Some(Storage::Free));
    }

    #[test]
    fn generator_flag_is_recorded() {
        let table = resolve_source(indoc! {"
            def gen():
                yield 1
            squares = (n * n for n in range(3))
        "});
        assert!(scope_named(&table, "gen").is_generator);
        assert!(scope_named(&table, "<genexpr>").is_generator);
    }
}
