//! Shared fact table threaded through the pipeline.
//!
//! One store per run, passed by `&mut` rather than held in a process-wide
//! singleton, so parallel runs stay isolated by construction. Passes communicate
//! through it: the propagation pass records literal variable values, the
//! inlining passes record function and class definitions.

use indexmap::IndexMap;
use phpfold_syntax::tree::{NodeKind, Param};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::FxHashMap;

pub const GLOBAL_SCOPE: &str = "<global>";

/// A user-defined function captured from the tree.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<Param>,
    /// The `FunctionDecl` node.
    pub decl: NodeId,
    /// Return expression when the body is exactly `return <expr>;`.
    pub single_return: Option<NodeId>,
}

/// A user-defined class captured from the tree.
#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    pub parent_class_name: Option<String>,
    /// Declaration order matters for constructor synthesis.
    pub properties: IndexMap<String, Option<NodeId>>,
    /// Method name (lowercased) to its `FunctionDecl` node.
    pub methods: FxHashMap<String, NodeId>,
    /// Variable names known to hold instances of this class.
    pub instances: Vec<String>,
}

#[derive(Debug, Default)]
struct ScopeTable {
    vars: FxHashMap<String, NodeId>,
    consts: FxHashMap<String, NodeId>,
}

/// Hierarchical symbol table: one global table (functions, classes,
/// constants) plus per-scope variable/constant maps. All scope-keyed
/// operations go through the current scope, which each pass sets
/// explicitly before use.
#[derive(Debug)]
pub struct ScopeStore {
    current: String,
    scopes: FxHashMap<String, ScopeTable>,
    functions: FxHashMap<String, FunctionInfo>,
    classes: FxHashMap<String, ClassInfo>,
    constants: FxHashMap<String, NodeId>,
}

impl Default for ScopeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStore {
    pub fn new() -> Self {
        ScopeStore {
            current: GLOBAL_SCOPE.to_string(),
            scopes: FxHashMap::default(),
            functions: FxHashMap::default(),
            classes: FxHashMap::default(),
            constants: FxHashMap::default(),
        }
    }

    pub fn set_current_scope(&mut self, name: &str) {
        self.current = name.to_string();
    }

    pub fn current_scope(&self) -> &str {
        &self.current
    }

    fn table_mut(&mut self) -> &mut ScopeTable {
        self.scopes.entry(self.current.clone()).or_default()
    }

    // ------------------------------------------------------------------
    // Variables (current scope)
    // ------------------------------------------------------------------

    /// Record a variable's replacement value. Only scalar literals are ever
    /// stored; a non-literal value drops any existing entry instead.
    pub fn set_var(&mut self, tree: &Tree, name: &str, value: NodeId) -> bool {
        if tree.is_literal(value) {
            self.table_mut().vars.insert(name.to_string(), value);
            true
        } else {
            self.table_mut().vars.remove(name);
            false
        }
    }

    pub fn get_var(&self, name: &str) -> Option<NodeId> {
        self.scopes.get(&self.current)?.vars.get(name).copied()
    }

    pub fn clear_var(&mut self, name: &str) {
        self.table_mut().vars.remove(name);
    }

    /// Drop all tracked variables in the current scope (used at branching
    /// constructs, where straight-line facts stop holding).
    pub fn clear_vars(&mut self) {
        self.table_mut().vars.clear();
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    pub fn set_const(&mut self, name: &str, value: NodeId) {
        self.table_mut().consts.insert(name.to_string(), value);
    }

    /// Scope-local first, then global.
    pub fn get_const(&self, name: &str) -> Option<NodeId> {
        if let Some(table) = self.scopes.get(&self.current) {
            if let Some(&id) = table.consts.get(name) {
                return Some(id);
            }
        }
        self.constants.get(name).copied()
    }

    pub fn set_global_const(&mut self, name: &str, value: NodeId) {
        self.constants.insert(name.to_string(), value);
    }

    // ------------------------------------------------------------------
    // Functions (global; names are case-insensitive)
    // ------------------------------------------------------------------

    pub fn set_function(&mut self, info: FunctionInfo) {
        self.functions.insert(info.name.to_ascii_lowercase(), info);
    }

    pub fn get_function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    // ------------------------------------------------------------------
    // Classes (global; names are case-insensitive)
    // ------------------------------------------------------------------

    pub fn set_class(&mut self, name: &str, info: ClassInfo) {
        self.classes.insert(name.to_ascii_lowercase(), info);
    }

    pub fn get_class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&name.to_ascii_lowercase())
    }

    pub fn get_class_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(&name.to_ascii_lowercase())
    }

    pub fn register_instance(&mut self, class: &str, var: &str) {
        if let Some(info) = self.get_class_mut(class) {
            if !info.instances.iter().any(|v| v == var) {
                info.instances.push(var.to_string());
            }
        }
    }

    /// Method lookup with a single-level fallback to the parent class.
    /// No multi-level resolution: a method missing from both the class and
    /// its direct parent is simply not found.
    pub fn lookup_method(&self, class: &str, method: &str) -> Option<NodeId> {
        let info = self.get_class(class)?;
        let key = method.to_ascii_lowercase();
        if let Some(&decl) = info.methods.get(&key) {
            return Some(decl);
        }
        let parent = info.parent_class_name.as_deref()?;
        self.get_class(parent)?.methods.get(&key).copied()
    }

    /// Effective property set for a class: parent properties first, then
    /// the class's own (single-level, same rule as methods).
    pub fn all_properties(&self, class: &str) -> IndexMap<String, Option<NodeId>> {
        let mut props = IndexMap::new();
        if let Some(info) = self.get_class(class) {
            if let Some(parent) = info
                .parent_class_name
                .as_deref()
                .and_then(|p| self.get_class(p))
            {
                for (name, default) in &parent.properties {
                    props.insert(name.clone(), *default);
                }
            }
            for (name, default) in &info.properties {
                props.insert(name.clone(), *default);
            }
        }
        props
    }
}

/// Capture a `FunctionDecl` node into a [`FunctionInfo`], detecting the
/// single-return shape the function inliner needs.
pub fn capture_function(tree: &Tree, decl: NodeId) -> Option<FunctionInfo> {
    let NodeKind::FunctionDecl { name, params, body } = tree.kind(decl) else {
        return None;
    };
    let single_return = match tree.kind(*body) {
        NodeKind::Block(stmts) if stmts.len() == 1 => match tree.kind(stmts[0]) {
            NodeKind::Return(Some(expr)) => Some(*expr),
            _ => None,
        },
        _ => None,
    };
    Some(FunctionInfo {
        name: name.clone(),
        params: params.clone(),
        decl,
        single_return,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;
    use phpfold_syntax::tree::Literal;
    use phpfold_syntax::Span;

    #[test]
    fn test_var_entries_hold_only_literals() {
        let mut tree = Tree::new();
        let lit = tree.alloc(NodeKind::Lit(Literal::Int(5)), Span::dummy());
        let var = tree.alloc(NodeKind::Variable("y".into()), Span::dummy());

        let mut store = ScopeStore::new();
        assert!(store.set_var(&tree, "x", lit));
        assert_eq!(store.get_var("x"), Some(lit));

        // Reassigning a non-literal drops the entry entirely.
        assert!(!store.set_var(&tree, "x", var));
        assert_eq!(store.get_var("x"), None);
    }

    #[test]
    fn test_vars_are_scope_keyed() {
        let mut tree = Tree::new();
        let lit = tree.alloc(NodeKind::Lit(Literal::Int(1)), Span::dummy());

        let mut store = ScopeStore::new();
        store.set_var(&tree, "x", lit);
        store.set_current_scope("fn:helper");
        assert_eq!(store.get_var("x"), None);
        store.set_current_scope(GLOBAL_SCOPE);
        assert_eq!(store.get_var("x"), Some(lit));
    }

    #[test]
    fn test_const_lookup_falls_back_to_global() {
        let mut tree = Tree::new();
        let lit = tree.alloc(NodeKind::Lit(Literal::Int(7)), Span::dummy());
        let mut store = ScopeStore::new();
        store.set_global_const("LIMIT", lit);
        store.set_current_scope("fn:worker");
        assert_eq!(store.get_const("LIMIT"), Some(lit));
    }

    #[test]
    fn test_scope_local_const_shadows_global() {
        let mut tree = Tree::new();
        let global = tree.alloc(NodeKind::Lit(Literal::Int(1)), Span::dummy());
        let local = tree.alloc(NodeKind::Lit(Literal::Int(2)), Span::dummy());
        let mut store = ScopeStore::new();
        store.set_global_const("MODE", global);
        store.set_current_scope("fn:worker");
        store.set_const("MODE", local);
        assert_eq!(store.get_const("MODE"), Some(local));
        store.set_current_scope(GLOBAL_SCOPE);
        assert_eq!(store.get_const("MODE"), Some(global));
    }

    #[test]
    fn test_function_names_case_insensitive() {
        let program = parse("<?php function Add($a) { return $a; }").unwrap();
        let info = capture_function(&program.tree, program.roots[0]).unwrap();
        let mut store = ScopeStore::new();
        store.set_function(info);
        assert!(store.get_function("add").is_some());
        assert!(store.get_function("ADD").is_some());
    }

    #[test]
    fn test_capture_detects_single_return() {
        let program =
            parse("<?php function one() { return 1; } function two() { $x = 1; return $x; }")
                .unwrap();
        let one = capture_function(&program.tree, program.roots[0]).unwrap();
        let two = capture_function(&program.tree, program.roots[1]).unwrap();
        assert!(one.single_return.is_some());
        assert!(two.single_return.is_none());
    }

    #[test]
    fn test_method_lookup_single_level_fallback() {
        let program = parse(
            "<?php class A { function hello() { return 1; } } class B extends A { } class C extends B { }",
        )
        .unwrap();
        let tree = &program.tree;
        let mut store = ScopeStore::new();
        for &root in &program.roots {
            if let NodeKind::ClassDecl {
                name,
                parent,
                methods,
                ..
            } = tree.kind(root)
            {
                let mut info = ClassInfo {
                    parent_class_name: parent.clone(),
                    ..Default::default()
                };
                for &m in methods {
                    if let NodeKind::FunctionDecl { name: m_name, .. } = tree.kind(m) {
                        info.methods.insert(m_name.to_ascii_lowercase(), m);
                    }
                }
                store.set_class(name, info);
            }
        }
        assert!(store.lookup_method("A", "hello").is_some());
        assert!(store.lookup_method("B", "hello").is_some());
        // Grandparent lookup is out of scope: one level only.
        assert!(store.lookup_method("C", "hello").is_none());
    }
}
