//! Static include flattening.
//!
//! The entry file is parsed, then every statically-resolvable
//! include/require is replaced, depth first, by the parsed contents of
//! its target. Each inlined file gets a unique `f{n}_` prefix applied to
//! the functions, classes, and constants it declares (intra-file
//! references are rewritten on the spot), and the old-to-new names accumulate
//! in three global maps. A final whole-tree rename resolves cross-file
//! references (a file may use symbols from files inlined after it);
//! names the entry file itself declares are exempt so they are never
//! captured.
//!
//! Failure stays local: an unresolvable or missing path leaves the
//! include unexpanded, a parse error turns that file's contribution into
//! nothing plus a diagnostic. Only an unreadable or unparseable entry
//! file aborts.

use std::path::{Path, PathBuf};

use phpfold_syntax::parser::Program;
use phpfold_syntax::tree::{Callee, IncludeKind, Literal, NodeKind};
use phpfold_syntax::{parse, NodeId, Tree};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::diagnostics::DiagnosticHandler;
use crate::errors::TransformError;

/// Upper bound on inlined files; cyclic plain `include` chains would
/// otherwise expand forever.
const MAX_INLINED_FILES: u32 = 256;

pub struct Inliner<'a> {
    handler: &'a dyn DiagnosticHandler,
    /// Canonical paths already inlined, for `*_once` semantics.
    visited: FxHashSet<PathBuf>,
    next_tag: u32,
    /// Lowercased old name → prefixed name.
    function_renames: FxHashMap<String, String>,
    class_renames: FxHashMap<String, String>,
    /// Constants are case-sensitive.
    const_renames: FxHashMap<String, String>,
}

impl<'a> Inliner<'a> {
    pub fn new(handler: &'a dyn DiagnosticHandler) -> Self {
        Inliner {
            handler,
            visited: FxHashSet::default(),
            next_tag: 0,
            function_renames: FxHashMap::default(),
            class_renames: FxHashMap::default(),
            const_renames: FxHashMap::default(),
        }
    }

    pub fn inline_entry(&mut self, entry: &Path) -> Result<Program, TransformError> {
        let source = std::fs::read_to_string(entry).map_err(|source| {
            TransformError::EntryUnreadable {
                path: entry.to_path_buf(),
                source,
            }
        })?;
        let mut program = parse(&source).map_err(|err| TransformError::EntryUnparseable {
            path: entry.to_path_buf(),
            message: err.to_string(),
        })?;
        if let Ok(canonical) = entry.canonicalize() {
            self.visited.insert(canonical);
        }

        let dir = entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // Entry declarations are never renamed and never captured by the
        // final fixup.
        let entry_decls = Declarations::collect(&program.tree, &program.roots);

        let mut roots = std::mem::take(&mut program.roots);
        self.expand_list(&mut program.tree, &mut roots, &dir);
        program.roots = roots;

        self.global_rename(&mut program.tree, &program.roots, &entry_decls);
        info!(
            "inlined {} file(s) into {}",
            self.next_tag,
            entry.display()
        );
        Ok(program)
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    fn expand_list(&mut self, tree: &mut Tree, list: &mut Vec<NodeId>, dir: &Path) {
        let mut i = 0;
        while i < list.len() {
            let stmt = list[i];
            if let Some((kind, path_expr)) = include_of(tree, stmt) {
                match self.resolve_include_expr(tree, path_expr, dir) {
                    Some(target) if target.exists() => {
                        let canonical = target.canonicalize().unwrap_or_else(|_| target.clone());
                        if kind.is_once() && self.visited.contains(&canonical) {
                            list.remove(i);
                            continue;
                        }
                        if self.next_tag >= MAX_INLINED_FILES {
                            self.handler.warning(
                                Some(tree.span(stmt)),
                                "include limit reached; leaving include unexpanded",
                            );
                            i += 1;
                            continue;
                        }
                        self.visited.insert(canonical);
                        let imported = self.load_file(tree, &target);
                        let advance = imported.len();
                        list.splice(i..=i, imported);
                        i += advance;
                        continue;
                    }
                    Some(target) => {
                        self.handler.warning(
                            Some(tree.span(stmt)),
                            &format!("include target {} not found", target.display()),
                        );
                    }
                    // Dynamic path: static inlining does not apply.
                    None => {
                        debug!("leaving dynamic include untouched");
                    }
                }
            }
            self.expand_in_node(tree, stmt, dir);
            i += 1;
        }
    }

    /// Recurse into nested statement lists, but not into function or
    /// class bodies: an include there runs at call time, not at include
    /// time, and splicing it would change when its definitions appear.
    fn expand_in_node(&mut self, tree: &mut Tree, id: NodeId, dir: &Path) {
        if matches!(
            tree.kind(id),
            NodeKind::FunctionDecl { .. } | NodeKind::ClassDecl { .. }
        ) {
            return;
        }
        let mut kind = tree.take_kind(id);
        match &mut kind {
            NodeKind::Block(stmts) => self.expand_list(tree, stmts, dir),
            NodeKind::Switch { cases, .. } => {
                for case in cases {
                    self.expand_list(tree, &mut case.body, dir);
                }
            }
            _ => {}
        }
        for child in kind.children() {
            self.expand_in_node(tree, child, dir);
        }
        tree.put_kind(id, kind);
    }

    /// Parse, prefix, and recursively expand one included file, returning
    /// its statements imported into the main tree. A parse failure
    /// reports and contributes nothing.
    fn load_file(&mut self, tree: &mut Tree, path: &Path) -> Vec<NodeId> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                self.handler
                    .error(None, &format!("cannot read {}: {err}", path.display()));
                return Vec::new();
            }
        };
        let mut program = match parse(&source) {
            Ok(program) => program,
            Err(err) => {
                self.handler
                    .error(None, &format!("cannot parse {}: {err}", path.display()));
                return Vec::new();
            }
        };

        self.next_tag += 1;
        let prefix = format!("f{}_", self.next_tag);
        debug!("inlining {} with prefix {prefix}", path.display());

        // Collect this file's own declarations before nested expansion,
        // so nested files' already-prefixed names are not re-prefixed.
        let decls = Declarations::collect(&program.tree, &program.roots);
        let mut renamer = Renamer {
            prefix: &prefix,
            decls: &decls,
        };
        for &root in &program.roots {
            renamer.rename(&mut program.tree, root);
        }
        self.record_renames(&prefix, &decls);

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        // Nested includes resolve relative to the included file.
        let mut roots = std::mem::take(&mut program.roots);
        self.expand_list(&mut program.tree, &mut roots, &dir);

        roots
            .into_iter()
            .map(|root| tree.import(&program.tree, root))
            .collect()
    }

    fn record_renames(&mut self, prefix: &str, decls: &Declarations) {
        for name in &decls.function_names {
            self.function_renames
                .insert(name.to_ascii_lowercase(), format!("{prefix}{name}"));
        }
        for name in &decls.class_names {
            self.class_renames
                .insert(name.to_ascii_lowercase(), format!("{prefix}{name}"));
        }
        for name in &decls.const_names {
            self.const_renames
                .insert(name.clone(), format!("{prefix}{name}"));
        }
    }

    // ------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------

    /// Only string literals, `__DIR__`, and concatenations thereof
    /// resolve; anything computed is unresolved by design.
    fn resolve_include_expr(&self, tree: &Tree, id: NodeId, dir: &Path) -> Option<PathBuf> {
        let text = eval_path_text(tree, id, dir)?;
        let path = PathBuf::from(&text);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(dir.join(path))
        }
    }

    // ------------------------------------------------------------------
    // Final cross-file fixup
    // ------------------------------------------------------------------

    fn global_rename(&self, tree: &mut Tree, roots: &[NodeId], entry_decls: &Declarations) {
        let mut renamed = 0usize;
        for &root in roots {
            self.global_rename_node(tree, root, entry_decls, &mut renamed);
        }
        if renamed > 0 {
            debug!("global rename fixed {renamed} cross-file reference(s)");
        }
    }

    fn global_rename_node(
        &self,
        tree: &mut Tree,
        id: NodeId,
        entry_decls: &Declarations,
        renamed: &mut usize,
    ) {
        let mut kind = tree.take_kind(id);
        match &mut kind {
            NodeKind::Call {
                callee: Callee::Named(name),
                ..
            } => {
                let key = name.to_ascii_lowercase();
                if !entry_decls.function_names_lower.contains(&key) {
                    if let Some(new_name) = self.function_renames.get(&key) {
                        *name = new_name.clone();
                        *renamed += 1;
                    }
                }
            }
            NodeKind::New { class, .. } | NodeKind::StaticCall { class, .. } => {
                let key = class.to_ascii_lowercase();
                if !entry_decls.class_names_lower.contains(&key) {
                    if let Some(new_name) = self.class_renames.get(&key) {
                        *class = new_name.clone();
                        *renamed += 1;
                    }
                }
            }
            NodeKind::ClassDecl { parent: Some(parent), .. } => {
                let key = parent.to_ascii_lowercase();
                if !entry_decls.class_names_lower.contains(&key) {
                    if let Some(new_name) = self.class_renames.get(&key) {
                        *parent = new_name.clone();
                        *renamed += 1;
                    }
                }
            }
            NodeKind::ConstFetch(name) => {
                if !entry_decls.const_names.contains(name) {
                    if let Some(new_name) = self.const_renames.get(name) {
                        *name = new_name.clone();
                        *renamed += 1;
                    }
                }
            }
            _ => {}
        }
        for child in kind.children() {
            self.global_rename_node(tree, child, entry_decls, renamed);
        }
        tree.put_kind(id, kind);
    }
}

fn include_of(tree: &Tree, stmt: NodeId) -> Option<(IncludeKind, NodeId)> {
    let NodeKind::ExprStmt(expr) = tree.kind(stmt) else {
        return None;
    };
    let NodeKind::Include { kind, path } = tree.kind(*expr) else {
        return None;
    };
    Some((*kind, *path))
}

fn eval_path_text(tree: &Tree, id: NodeId, dir: &Path) -> Option<String> {
    match tree.kind(id) {
        NodeKind::Lit(Literal::String(s)) => Some(s.clone()),
        NodeKind::MagicDir => Some(dir.to_string_lossy().into_owned()),
        NodeKind::Binary {
            op: phpfold_syntax::tree::BinaryOp::Concat,
            lhs,
            rhs,
        } => {
            let mut text = eval_path_text(tree, *lhs, dir)?;
            text.push_str(&eval_path_text(tree, *rhs, dir)?);
            Some(text)
        }
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Declaration collection and per-file renaming
// ----------------------------------------------------------------------

#[derive(Debug, Default)]
struct Declarations {
    function_names: Vec<String>,
    class_names: Vec<String>,
    const_names: Vec<String>,
    function_names_lower: FxHashSet<String>,
    class_names_lower: FxHashSet<String>,
    const_names_set: FxHashSet<String>,
}

impl Declarations {
    fn collect(tree: &Tree, roots: &[NodeId]) -> Self {
        let mut decls = Declarations::default();
        for &root in roots {
            decls.visit(tree, root);
        }
        decls
    }

    fn visit(&mut self, tree: &Tree, id: NodeId) {
        match tree.kind(id) {
            NodeKind::FunctionDecl { name, .. } => {
                self.function_names_lower.insert(name.to_ascii_lowercase());
                self.function_names.push(name.clone());
                // Nested declarations still register globally when run.
                for child in tree.children(id) {
                    self.visit(tree, child);
                }
            }
            NodeKind::ClassDecl { name, .. } => {
                // Methods are not global functions; do not descend.
                self.class_names_lower.insert(name.to_ascii_lowercase());
                self.class_names.push(name.clone());
            }
            NodeKind::ConstDecl { name, .. } => {
                self.record_const(name);
            }
            NodeKind::Call {
                callee: Callee::Named(name),
                args,
            } if name.eq_ignore_ascii_case("define") => {
                if let Some(NodeKind::Lit(Literal::String(const_name))) =
                    args.first().map(|&a| tree.kind(a))
                {
                    self.record_const(const_name);
                }
                for child in tree.children(id) {
                    self.visit(tree, child);
                }
            }
            _ => {
                for child in tree.children(id) {
                    self.visit(tree, child);
                }
            }
        }
    }

    fn record_const(&mut self, name: &str) {
        // The language's own literals are never user constants.
        if matches!(
            name.to_ascii_lowercase().as_str(),
            "true" | "false" | "null"
        ) {
            return;
        }
        if self.const_names_set.insert(name.to_string()) {
            self.const_names.push(name.to_string());
        }
    }

    fn has_function(&self, name: &str) -> bool {
        self.function_names_lower
            .contains(&name.to_ascii_lowercase())
    }

    fn has_class(&self, name: &str) -> bool {
        self.class_names_lower.contains(&name.to_ascii_lowercase())
    }

    fn has_const(&self, name: &str) -> bool {
        self.const_names_set.contains(name)
    }
}

struct Renamer<'a> {
    prefix: &'a str,
    decls: &'a Declarations,
}

impl Renamer<'_> {
    fn rename(&mut self, tree: &mut Tree, id: NodeId) {
        let mut kind = tree.take_kind(id);
        match &mut kind {
            NodeKind::FunctionDecl { name, .. } => {
                if self.decls.has_function(name) {
                    *name = format!("{}{name}", self.prefix);
                }
            }
            NodeKind::ClassDecl { name, parent, .. } => {
                if self.decls.has_class(name) {
                    *name = format!("{}{name}", self.prefix);
                }
                if let Some(p) = parent {
                    if self.decls.has_class(p) {
                        *p = format!("{}{p}", self.prefix);
                    }
                }
            }
            NodeKind::ConstDecl { name, .. } => {
                if self.decls.has_const(name) {
                    *name = format!("{}{name}", self.prefix);
                }
            }
            NodeKind::Call { callee, args } => {
                if let Callee::Named(name) = callee {
                    if name.eq_ignore_ascii_case("define") {
                        if let Some(&first) = args.first() {
                            if let NodeKind::Lit(Literal::String(const_name)) = tree.kind(first) {
                                if self.decls.has_const(const_name) {
                                    let renamed =
                                        format!("{}{const_name}", self.prefix);
                                    tree.set_kind(
                                        first,
                                        NodeKind::Lit(Literal::String(renamed)),
                                    );
                                }
                            }
                        }
                    } else if self.decls.has_function(name) {
                        *name = format!("{}{name}", self.prefix);
                    }
                }
            }
            NodeKind::New { class, .. } | NodeKind::StaticCall { class, .. } => {
                if self.decls.has_class(class) {
                    *class = format!("{}{class}", self.prefix);
                }
            }
            NodeKind::ConstFetch(name) => {
                if self.decls.has_const(name) {
                    *name = format!("{}{name}", self.prefix);
                }
            }
            _ => {}
        }
        for child in kind.children() {
            self.rename(tree, child);
        }
        tree.put_kind(id, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use phpfold_syntax::printer::print_program;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn inline(entry: &Path) -> (String, CollectingDiagnosticHandler) {
        let handler = CollectingDiagnosticHandler::new();
        let program = Inliner::new(&handler).inline_entry(entry).unwrap();
        (print_program(&program.tree, &program.roots), handler)
    }

    #[test]
    fn test_single_include_flattens() {
        let dir = TempDir::new().unwrap();
        write(&dir, "lib.php", "<?php function helper() { return 1; }");
        let entry = write(&dir, "main.php", "<?php require 'lib.php'; echo helper();");

        let (out, _) = inline(&entry);
        assert!(out.contains("function f1_helper()"), "{out}");
        assert!(out.contains("echo f1_helper();"), "{out}");
        assert!(!out.contains("require"), "{out}");
    }

    #[test]
    fn test_colliding_functions_get_distinct_prefixes() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "a.php",
            "<?php function f() { return 'a'; } echo f();",
        );
        write(
            &dir,
            "b.php",
            "<?php function f() { return 'b'; } echo f();",
        );
        let entry = write(&dir, "main.php", "<?php include 'a.php'; include 'b.php';");

        let (out, _) = inline(&entry);
        assert!(out.contains("function f1_f()"), "{out}");
        assert!(out.contains("function f2_f()"), "{out}");
        // Each file's own call sites resolve to its own definition.
        assert!(out.contains("echo f1_f();"), "{out}");
        assert!(out.contains("echo f2_f();"), "{out}");
    }

    #[test]
    fn test_entry_reference_resolved_by_global_pass() {
        let dir = TempDir::new().unwrap();
        write(&dir, "lib.php", "<?php function lib_fn() { return 2; }");
        let entry = write(
            &dir,
            "main.php",
            "<?php echo lib_fn(); require __DIR__ . '/lib.php';",
        );

        let (out, _) = inline(&entry);
        // The call preceded the include; the final rename still fixes it.
        assert!(out.contains("echo f1_lib_fn();"), "{out}");
    }

    #[test]
    fn test_require_once_included_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "lib.php", "<?php function once_fn() { return 1; }");
        let entry = write(
            &dir,
            "main.php",
            "<?php require_once 'lib.php'; require_once 'lib.php'; echo once_fn();",
        );

        let (out, _) = inline(&entry);
        assert_eq!(out.matches("function f1_once_fn").count(), 1, "{out}");
    }

    #[test]
    fn test_nested_includes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "inner.php", "<?php function deep() { return 3; }");
        write(
            &dir,
            "outer.php",
            "<?php require 'inner.php'; function shallow() { return deep(); }",
        );
        let entry = write(
            &dir,
            "main.php",
            "<?php require 'outer.php'; echo shallow();",
        );

        let (out, _) = inline(&entry);
        assert!(out.contains("function f2_deep()"), "{out}");
        assert!(out.contains("function f1_shallow()"), "{out}");
        assert!(out.contains("echo f1_shallow();"), "{out}");
        // outer.php's cross-file reference to deep() is fixed globally.
        assert!(out.contains("return f2_deep();"), "{out}");
    }

    #[test]
    fn test_dynamic_include_left_untouched() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "main.php", "<?php include $which; echo 'after';");

        let (out, _) = inline(&entry);
        assert!(out.contains("include $which;"), "{out}");
    }

    #[test]
    fn test_missing_file_warns_and_leaves_include() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "main.php", "<?php include 'nope.php'; echo 'after';");

        let (out, handler) = inline(&entry);
        assert!(out.contains("include 'nope.php';"), "{out}");
        assert!(!handler.diagnostics().is_empty());
    }

    #[test]
    fn test_parse_error_contributes_nothing() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.php", "<?php function {{{");
        let entry = write(&dir, "main.php", "<?php include 'broken.php'; echo 'ok';");

        let (out, handler) = inline(&entry);
        assert!(!out.contains("include"), "{out}");
        assert!(out.contains("echo 'ok';"), "{out}");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_classes_and_constants_prefixed() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "types.php",
            "<?php const LIMIT = 5; class Box { } function make() { return new Box(); }",
        );
        let entry = write(
            &dir,
            "main.php",
            "<?php require 'types.php'; $b = make(); echo LIMIT;",
        );

        let (out, _) = inline(&entry);
        assert!(out.contains("const f1_LIMIT = 5;"), "{out}");
        assert!(out.contains("class f1_Box"), "{out}");
        assert!(out.contains("return new f1_Box();"), "{out}");
        assert!(out.contains("echo f1_LIMIT;"), "{out}");
        assert!(out.contains("$b = f1_make();"), "{out}");
    }

    #[test]
    fn test_entry_declared_names_protected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "lib.php", "<?php function mine() { return 'lib'; }");
        let entry = write(
            &dir,
            "main.php",
            "<?php function mine() { return 'entry'; } require 'lib.php'; echo mine();",
        );

        let (out, _) = inline(&entry);
        // The entry's own definition wins; its call is not captured.
        assert!(out.contains("function mine()"), "{out}");
        assert!(out.contains("echo mine();"), "{out}");
        assert!(out.contains("function f1_mine()"), "{out}");
    }
}
