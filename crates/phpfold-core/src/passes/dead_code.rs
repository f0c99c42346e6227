use phpfold_syntax::tree::{AssignOp, Callee, Literal, NodeKind};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::scope::GLOBAL_SCOPE;
use crate::value::literal_truthy;

/// Dead code elimination:
///
/// - statements after return/break/continue/throw/exit are excised;
/// - `if`/`while` with literal conditions simplify to the taken branch;
/// - pure non-assignment expression statements are dropped;
/// - stores to variables never read in their scope are dropped when the
///   right side is pure;
/// - function and class declarations with no remaining references are
///   dropped (a string literal naming them keeps them alive).
pub struct DeadCodePass;

impl Pass for DeadCodePass {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn description(&self) -> &'static str {
        "Drops unreachable statements, dead stores, and unused declarations"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.strip_dead_code
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut changed = process_list(ctx.tree, ctx.roots, ctx.classifier);
        changed |= remove_dead_stores(ctx.tree, ctx.roots, ctx.classifier);
        changed |= remove_dead_declarations(ctx.tree, ctx.roots);
        Ok(changed)
    }
}

// ----------------------------------------------------------------------
// Unreachable code and literal branches
// ----------------------------------------------------------------------

fn process_list(tree: &mut Tree, list: &mut Vec<NodeId>, classifier: &Classifier) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < list.len() {
        let stmt = list[i];
        match tree.kind(stmt).clone() {
            NodeKind::If {
                cond,
                then_branch,
                mut elseifs,
                else_branch,
            } if tree.is_literal(cond) => {
                let truthy = tree
                    .literal(cond)
                    .map(literal_truthy)
                    .unwrap_or(false);
                if truthy {
                    let body = block_statements(tree, then_branch);
                    let advance = body.len();
                    list.splice(i..=i, body);
                    changed = true;
                    i += advance;
                } else if elseifs.is_empty() {
                    match else_branch {
                        Some(eb) => {
                            let body = block_statements(tree, eb);
                            let advance = body.len();
                            list.splice(i..=i, body);
                            i += advance;
                        }
                        None => {
                            list.remove(i);
                        }
                    }
                    changed = true;
                } else {
                    // Promote the first elseif; its condition may be
                    // literal too, so stay on this index.
                    let first = elseifs.remove(0);
                    tree.set_kind(
                        stmt,
                        NodeKind::If {
                            cond: first.cond,
                            then_branch: first.body,
                            elseifs,
                            else_branch,
                        },
                    );
                    changed = true;
                }
            }
            NodeKind::While { cond, .. }
                if tree
                    .literal(cond)
                    .map(|lit| !literal_truthy(lit))
                    .unwrap_or(false) =>
            {
                list.remove(i);
                changed = true;
            }
            NodeKind::ExprStmt(expr)
                if !matches!(tree.kind(expr), NodeKind::Assign { .. })
                    && classifier.classify(tree, expr).is_pure() =>
            {
                list.remove(i);
                changed = true;
            }
            kind if is_terminal(tree, &kind) => {
                if list.len() > i + 1 {
                    list.truncate(i + 1);
                    changed = true;
                }
                changed |= descend(tree, stmt, classifier);
                break;
            }
            _ => {
                changed |= descend(tree, stmt, classifier);
                i += 1;
            }
        }
    }
    changed
}

fn is_terminal(tree: &Tree, kind: &NodeKind) -> bool {
    match kind {
        NodeKind::Return(_) | NodeKind::Break(_) | NodeKind::Continue(_) | NodeKind::Throw(_) => {
            true
        }
        NodeKind::ExprStmt(expr) => matches!(tree.kind(*expr), NodeKind::Exit(_)),
        _ => false,
    }
}

fn block_statements(tree: &Tree, block: NodeId) -> Vec<NodeId> {
    match tree.kind(block) {
        NodeKind::Block(stmts) => stmts.clone(),
        _ => vec![block],
    }
}

/// Recurse into nested statement lists.
fn descend(tree: &mut Tree, id: NodeId, classifier: &Classifier) -> bool {
    let mut kind = tree.take_kind(id);
    let mut changed = false;
    match &mut kind {
        NodeKind::Block(stmts) => changed |= process_list(tree, stmts, classifier),
        NodeKind::Switch { cases, .. } => {
            for case in cases {
                changed |= process_list(tree, &mut case.body, classifier);
            }
        }
        _ => {}
    }
    for child in kind.children() {
        changed |= descend(tree, child, classifier);
    }
    tree.put_kind(id, kind);
    changed
}

// ----------------------------------------------------------------------
// Dead stores
// ----------------------------------------------------------------------

type ScopedName = (String, String);

fn remove_dead_stores(tree: &mut Tree, roots: &mut Vec<NodeId>, classifier: &Classifier) -> bool {
    let mut reads: FxHashMap<ScopedName, usize> = FxHashMap::default();
    let mut pinned: FxHashSet<ScopedName> = FxHashSet::default();
    for &root in roots.iter() {
        collect_reads(tree, root, GLOBAL_SCOPE, &mut reads, &mut pinned);
    }
    let mut remover = StoreRemover {
        classifier,
        reads,
        pinned,
        changed: false,
    };
    remover.sweep_list(tree, roots, GLOBAL_SCOPE);
    remover.changed
}

fn collect_reads(
    tree: &Tree,
    id: NodeId,
    scope: &str,
    reads: &mut FxHashMap<ScopedName, usize>,
    pinned: &mut FxHashSet<ScopedName>,
) {
    match tree.kind(id) {
        NodeKind::FunctionDecl { name, body, .. } => {
            let inner = function_scope(scope, name);
            collect_reads(tree, *body, &inner, reads, pinned);
        }
        NodeKind::ClassDecl { methods, .. } => {
            for &method in methods {
                collect_reads(tree, method, scope, reads, pinned);
            }
        }
        NodeKind::Assign { op, target, value } => {
            match tree.kind(*target) {
                NodeKind::Variable(name) => {
                    // A compound assignment reads its own target.
                    if *op != AssignOp::Assign {
                        *reads.entry((scope.to_string(), name.clone())).or_insert(0) += 1;
                    }
                }
                // Writing through an index or property reads the base.
                _ => collect_reads(tree, *target, scope, reads, pinned),
            }
            collect_reads(tree, *value, scope, reads, pinned);
        }
        NodeKind::Variable(name) => {
            *reads.entry((scope.to_string(), name.clone())).or_insert(0) += 1;
        }
        NodeKind::Global(names) => {
            // `global $x` binds the enclosing scope's name to the
            // global-scope variable, so the top-level store stays live
            // too.
            for name in names {
                pinned.insert((scope.to_string(), name.clone()));
                pinned.insert((GLOBAL_SCOPE.to_string(), name.clone()));
            }
        }
        _ => {
            for child in tree.children(id) {
                collect_reads(tree, child, scope, reads, pinned);
            }
        }
    }
}

fn function_scope(outer: &str, name: &str) -> String {
    format!("{outer}/fn:{}", name.to_ascii_lowercase())
}

struct StoreRemover<'a> {
    classifier: &'a Classifier,
    reads: FxHashMap<ScopedName, usize>,
    pinned: FxHashSet<ScopedName>,
    changed: bool,
}

impl StoreRemover<'_> {
    fn sweep_list(&mut self, tree: &mut Tree, list: &mut Vec<NodeId>, scope: &str) {
        let mut i = 0;
        while i < list.len() {
            let stmt = list[i];
            if self.is_dead_store(tree, stmt, scope) {
                list.remove(i);
                self.changed = true;
                continue;
            }
            self.sweep_node(tree, stmt, scope);
            i += 1;
        }
    }

    fn is_dead_store(&self, tree: &Tree, stmt: NodeId, scope: &str) -> bool {
        let NodeKind::ExprStmt(expr) = tree.kind(stmt) else {
            return false;
        };
        let NodeKind::Assign {
            op: AssignOp::Assign,
            target,
            value,
        } = tree.kind(*expr)
        else {
            return false;
        };
        let NodeKind::Variable(name) = tree.kind(*target) else {
            return false;
        };
        if self.classifier.is_superglobal(name) {
            return false;
        }
        let key = (scope.to_string(), name.clone());
        if self.pinned.contains(&key) || self.reads.get(&key).copied().unwrap_or(0) > 0 {
            return false;
        }
        self.classifier.classify(tree, *value).is_pure()
    }

    fn sweep_node(&mut self, tree: &mut Tree, id: NodeId, scope: &str) {
        let mut kind = tree.take_kind(id);
        match &mut kind {
            NodeKind::Block(stmts) => self.sweep_list(tree, stmts, scope),
            NodeKind::Switch { cases, .. } => {
                for case in cases {
                    self.sweep_list(tree, &mut case.body, scope);
                }
            }
            NodeKind::FunctionDecl { name, body, .. } => {
                let inner = function_scope(scope, name);
                self.sweep_node(tree, *body, &inner);
                tree.put_kind(id, kind);
                return;
            }
            _ => {}
        }
        for child in kind.children() {
            self.sweep_node(tree, child, scope);
        }
        tree.put_kind(id, kind);
    }
}

// ----------------------------------------------------------------------
// Unused declarations
// ----------------------------------------------------------------------

fn remove_dead_declarations(tree: &mut Tree, roots: &mut Vec<NodeId>) -> bool {
    let mut usage = UsageCounts::default();
    for &root in roots.iter() {
        count_usage(tree, root, &mut usage);
    }

    let mut changed = false;
    let mut i = 0;
    while i < roots.len() {
        let keep = match tree.kind(roots[i]) {
            NodeKind::FunctionDecl { name, .. } => {
                usage.has_dynamic_calls || usage.functions.contains(&name.to_ascii_lowercase())
            }
            NodeKind::ClassDecl { name, .. } => {
                usage.classes.contains(&name.to_ascii_lowercase())
            }
            NodeKind::ConstDecl { name, .. } => {
                usage.has_dynamic_const_lookup || usage.constants.contains(name)
            }
            NodeKind::ExprStmt(expr) => match define_const_name(tree, *expr) {
                Some(name) => usage.has_dynamic_const_lookup || usage.constants.contains(&name),
                None => true,
            },
            _ => true,
        };
        if keep {
            i += 1;
        } else {
            roots.remove(i);
            changed = true;
        }
    }
    changed
}

/// `define('NAME', <pure value>)` statement, returning the name.
fn define_const_name(tree: &Tree, expr: NodeId) -> Option<String> {
    let NodeKind::Call {
        callee: Callee::Named(name),
        args,
    } = tree.kind(expr)
    else {
        return None;
    };
    if !name.eq_ignore_ascii_case("define") || args.len() != 2 {
        return None;
    }
    if !tree.is_literal(args[1]) {
        return None;
    }
    match tree.kind(args[0]) {
        NodeKind::Lit(Literal::String(const_name)) => Some(const_name.clone()),
        _ => None,
    }
}

#[derive(Default)]
struct UsageCounts {
    functions: FxHashSet<String>,
    classes: FxHashSet<String>,
    constants: FxHashSet<String>,
    /// A dynamic callee anywhere makes function liveness undecidable.
    has_dynamic_calls: bool,
    /// `constant()` with a computed name keeps every constant alive.
    has_dynamic_const_lookup: bool,
}

fn count_usage(tree: &Tree, id: NodeId, usage: &mut UsageCounts) {
    match tree.kind(id) {
        NodeKind::Call { callee, args } => match callee {
            Callee::Named(name) => {
                usage.functions.insert(name.to_ascii_lowercase());
                if name.eq_ignore_ascii_case("constant")
                    && !args.first().map(|&a| tree.is_literal(a)).unwrap_or(false)
                {
                    usage.has_dynamic_const_lookup = true;
                }
                // A define's own name argument is a declaration, not a
                // use; count only the remaining arguments.
                if name.eq_ignore_ascii_case("define") && args.len() == 2 {
                    count_usage(tree, args[1], usage);
                    return;
                }
            }
            Callee::Dynamic(_) => usage.has_dynamic_calls = true,
        },
        NodeKind::ConstFetch(name) => {
            usage.constants.insert(name.clone());
        }
        NodeKind::New { class, .. } => {
            usage.classes.insert(class.to_ascii_lowercase());
        }
        NodeKind::StaticCall { class, .. } => {
            usage.classes.insert(class.to_ascii_lowercase());
        }
        NodeKind::ClassDecl { parent, .. } => {
            if let Some(p) = parent {
                usage.classes.insert(p.to_ascii_lowercase());
            }
        }
        // A name mentioned in a string may be a callback or lookup target.
        NodeKind::Lit(Literal::String(s)) => {
            let lower = s.to_ascii_lowercase();
            usage.functions.insert(lower.clone());
            usage.classes.insert(lower);
            usage.constants.insert(s.clone());
        }
        _ => {}
    }
    for child in tree.children(id) {
        count_usage(tree, child, usage);
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn cleaned(src: &str) -> String {
        run_single_pass(src, &mut DeadCodePass)
    }

    #[test]
    fn test_code_after_return_is_dropped() {
        assert_eq!(
            cleaned("<?php function f() { return 1; echo 'dead'; } f();"),
            "<?php\n\nfunction f() {\n    return 1;\n}\nf();\n"
        );
    }

    #[test]
    fn test_if_true_splices_body() {
        assert_eq!(
            cleaned("<?php if (true) { echo 'a'; } echo 'b';"),
            "<?php\n\necho 'a';\necho 'b';\n"
        );
    }

    #[test]
    fn test_if_false_takes_else() {
        assert_eq!(
            cleaned("<?php if (false) { echo 'a'; } else { echo 'b'; }"),
            "<?php\n\necho 'b';\n"
        );
    }

    #[test]
    fn test_if_false_promotes_elseif() {
        assert_eq!(
            cleaned("<?php if (false) { echo 'a'; } elseif ($c) { echo 'b'; }"),
            "<?php\n\nif ($c) {\n    echo 'b';\n}\n"
        );
    }

    #[test]
    fn test_while_false_removed() {
        assert_eq!(cleaned("<?php while (false) { echo 'x'; } echo 'y';"), "<?php\n\necho 'y';\n");
    }

    #[test]
    fn test_pure_expression_statement_dropped() {
        assert_eq!(cleaned("<?php 5 + 3; echo 'kept';"), "<?php\n\necho 'kept';\n");
    }

    #[test]
    fn test_dead_store_removed() {
        assert_eq!(
            cleaned("<?php $unused = 42; echo 'x';"),
            "<?php\n\necho 'x';\n"
        );
    }

    #[test]
    fn test_read_store_kept() {
        let out = cleaned("<?php $a = 42; echo $a;");
        assert!(out.contains("$a = 42;"), "{out}");
    }

    #[test]
    fn test_impure_store_kept() {
        let out = cleaned("<?php $r = rand();");
        assert!(out.contains("$r = rand();"), "{out}");
    }

    #[test]
    fn test_global_binding_keeps_top_level_store() {
        // The only read of $g is through `global $g` inside f(); the
        // top-level store must survive.
        let out = cleaned("<?php $g = 1; function f() { global $g; echo $g; } f();");
        assert!(out.contains("$g = 1;"), "{out}");
    }

    #[test]
    fn test_index_write_keeps_base_alive() {
        let out = cleaned("<?php $a = []; $a[0] = g();");
        assert!(out.contains("$a = [];"), "{out}");
    }

    #[test]
    fn test_unused_function_removed() {
        assert_eq!(cleaned("<?php function ghost() { return 1; } echo 'x';"), "<?php\n\necho 'x';\n");
    }

    #[test]
    fn test_called_function_kept() {
        let out = cleaned("<?php function used() { return 1; } echo used();");
        assert!(out.contains("function used()"), "{out}");
    }

    #[test]
    fn test_string_mention_keeps_function() {
        let out = cleaned("<?php function cb() { return 1; } $f = 'cb'; echo $f();");
        assert!(out.contains("function cb()"), "{out}");
    }

    #[test]
    fn test_unused_const_removed() {
        assert_eq!(cleaned("<?php const UNUSED = 1; echo 'x';"), "<?php\n\necho 'x';\n");
        assert_eq!(cleaned("<?php define('GONE', 1); echo 'x';"), "<?php\n\necho 'x';\n");
    }

    #[test]
    fn test_fetched_const_kept() {
        let out = cleaned("<?php const LIMIT = 9; echo LIMIT;");
        assert!(out.contains("const LIMIT = 9;"), "{out}");
    }

    #[test]
    fn test_dynamic_constant_lookup_keeps_consts() {
        let out = cleaned("<?php const MAYBE = 1; echo constant($name);");
        assert!(out.contains("const MAYBE = 1;"), "{out}");
    }

    #[test]
    fn test_parent_class_kept() {
        let out = cleaned("<?php class Base { } class Child extends Base { } $c = new Child(); echo get_class($c);");
        assert!(out.contains("class Base"), "{out}");
        assert!(out.contains("class Child"), "{out}");
    }
}
