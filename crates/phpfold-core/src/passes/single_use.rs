use phpfold_syntax::tree::{AssignOp, Callee, NodeKind};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::scope::GLOBAL_SCOPE;

/// Inlines a local variable that is written exactly once (a plain
/// assignment statement) and read exactly once: the read becomes a deep
/// clone of the right-hand side and the assignment disappears.
///
/// Guards, all required for the substitution to preserve semantics:
/// - the read comes after the write and is not nested inside the write's
///   own right-hand side (self-reference guard);
/// - the right-hand side is pure, so moving it past intervening
///   statements cannot reorder observable effects;
/// - every variable the right-hand side references is written at most
///   once, before the write (its value cannot change between the write
///   and the read);
/// - the read is not inside `isset`/`empty`, which observe the binding
///   rather than the value.
pub struct SingleUseInliningPass;

impl Pass for SingleUseInliningPass {
    fn name(&self) -> &'static str {
        "single-use-inlining"
    }

    fn description(&self) -> &'static str {
        "Inlines variables written once and read once"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.inline_single_use
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        // Parent links back the self-reference guard; earlier passes in
        // the round may have restructured the tree.
        ctx.tree.connect(ctx.roots);

        let mut scan = Scan::default();
        scan.walk_list(ctx.tree, ctx.roots, GLOBAL_SCOPE, false, ctx.classifier);

        let candidates = select_candidates(ctx.tree, &scan, ctx.classifier);
        if candidates.is_empty() {
            return Ok(false);
        }

        let write_stmts: FxHashSet<NodeId> = candidates.iter().map(|c| c.write_stmt).collect();
        let mut removed: FxHashSet<NodeId> = FxHashSet::default();
        let mut changed = false;
        for candidate in &candidates {
            // A read sitting inside another applied candidate's write
            // statement would be cloned away; defer it to the next round.
            if ancestor_in(ctx.tree, candidate.read, &write_stmts, candidate.write_stmt) {
                continue;
            }
            let clone = ctx.tree.deep_clone(candidate.rhs);
            let kind = ctx.tree.kind(clone).clone();
            ctx.tree.set_kind(candidate.read, kind);
            removed.insert(candidate.write_stmt);
            changed = true;
        }

        if !removed.is_empty() {
            remove_statements(ctx.tree, ctx.roots, &removed);
        }
        Ok(changed)
    }
}

#[derive(Debug)]
struct Candidate {
    write_stmt: NodeId,
    rhs: NodeId,
    read: NodeId,
}

#[derive(Debug, Clone)]
struct AssignRecord {
    stmt: NodeId,
    rhs: NodeId,
    order: usize,
}

#[derive(Debug, Clone)]
struct ReadRecord {
    node: NodeId,
    order: usize,
    banned: bool,
}

type ScopedName = (String, String);

#[derive(Default)]
struct Scan {
    order: usize,
    /// Every write event (assignments, foreach bindings, catch vars,
    /// params, possible by-ref arguments).
    writes: FxHashMap<ScopedName, Vec<usize>>,
    /// The statement-level plain assignments only.
    plain_assigns: FxHashMap<ScopedName, Vec<AssignRecord>>,
    reads: FxHashMap<ScopedName, Vec<ReadRecord>>,
    globals: FxHashSet<ScopedName>,
    /// Orders at which a non-pure-builtin call runs; such a call may
    /// rewrite any global-scope variable through `global`.
    call_barriers: Vec<usize>,
}

impl Scan {
    fn bump(&mut self) -> usize {
        self.order += 1;
        self.order
    }

    fn record_write(&mut self, scope: &str, name: &str) {
        let order = self.bump();
        self.writes
            .entry((scope.to_string(), name.to_string()))
            .or_default()
            .push(order);
    }

    fn walk_list(
        &mut self,
        tree: &Tree,
        stmts: &[NodeId],
        scope: &str,
        banned: bool,
        classifier: &Classifier,
    ) {
        for &stmt in stmts {
            self.walk_stmt(tree, stmt, scope, banned, classifier);
        }
    }

    fn walk_stmt(
        &mut self,
        tree: &Tree,
        id: NodeId,
        scope: &str,
        banned: bool,
        classifier: &Classifier,
    ) {
        match tree.kind(id) {
            NodeKind::ExprStmt(expr) => {
                if let NodeKind::Assign {
                    op: AssignOp::Assign,
                    target,
                    value,
                } = tree.kind(*expr)
                {
                    if let NodeKind::Variable(name) = tree.kind(*target) {
                        // Right side first: its reads happen before the write.
                        self.walk_expr(tree, *value, scope, banned, classifier);
                        let order = self.bump();
                        let key = (scope.to_string(), name.clone());
                        self.writes.entry(key.clone()).or_default().push(order);
                        self.plain_assigns.entry(key).or_default().push(AssignRecord {
                            stmt: id,
                            rhs: *value,
                            order,
                        });
                        return;
                    }
                }
                self.walk_expr(tree, *expr, scope, banned, classifier);
            }
            NodeKind::FunctionDecl { name, params, body } => {
                let inner = format!("{scope}/fn:{}", name.to_ascii_lowercase());
                for p in params {
                    self.record_write(&inner, &p.name);
                }
                self.walk_stmt(tree, *body, &inner, false, classifier);
            }
            NodeKind::ClassDecl { methods, .. } => {
                for &method in methods {
                    self.walk_stmt(tree, method, scope, banned, classifier);
                }
            }
            NodeKind::Foreach {
                subject,
                key_var,
                value_var,
                body,
                ..
            } => {
                self.walk_expr(tree, *subject, scope, banned, classifier);
                if let Some(k) = key_var {
                    self.record_write(scope, k);
                }
                self.record_write(scope, value_var);
                self.walk_stmt(tree, *body, scope, banned, classifier);
            }
            NodeKind::Try { body, catches, finally } => {
                self.walk_stmt(tree, *body, scope, banned, classifier);
                for c in catches {
                    if let Some(var) = &c.var {
                        self.record_write(scope, var);
                    }
                    self.walk_stmt(tree, c.body, scope, banned, classifier);
                }
                if let Some(f) = finally {
                    self.walk_stmt(tree, *f, scope, banned, classifier);
                }
            }
            NodeKind::Global(names) => {
                // `global $x` aliases the global-scope variable; its reads
                // are invisible to the per-scope counts, so the top-level
                // candidate must be disqualified as well.
                for name in names {
                    self.globals.insert((scope.to_string(), name.clone()));
                    self.globals
                        .insert((GLOBAL_SCOPE.to_string(), name.clone()));
                }
            }
            NodeKind::Block(stmts) => {
                let stmts = stmts.clone();
                self.walk_list(tree, &stmts, scope, banned, classifier);
            }
            _ if tree.kind(id).is_statement() => {
                for child in tree.children(id) {
                    self.walk_stmt(tree, child, scope, banned, classifier);
                }
            }
            _ => self.walk_expr(tree, id, scope, banned, classifier),
        }
    }

    fn walk_expr(
        &mut self,
        tree: &Tree,
        id: NodeId,
        scope: &str,
        banned: bool,
        classifier: &Classifier,
    ) {
        match tree.kind(id) {
            NodeKind::Variable(name) => {
                let order = self.bump();
                self.reads
                    .entry((scope.to_string(), name.clone()))
                    .or_default()
                    .push(ReadRecord {
                        node: id,
                        order,
                        banned,
                    });
            }
            NodeKind::Assign { op, target, value } => {
                self.walk_expr(tree, *value, scope, banned, classifier);
                match tree.kind(*target) {
                    NodeKind::Variable(name) => {
                        // A compound assignment also reads its target.
                        if *op != AssignOp::Assign {
                            let order = self.bump();
                            self.reads
                                .entry((scope.to_string(), name.clone()))
                                .or_default()
                                .push(ReadRecord {
                                    node: *target,
                                    order,
                                    banned: true,
                                });
                        }
                        self.record_write(scope, name);
                    }
                    _ => self.walk_expr(tree, *target, scope, banned, classifier),
                }
            }
            NodeKind::Isset(args) => {
                for &arg in args.clone().iter() {
                    self.walk_expr(tree, arg, scope, true, classifier);
                }
            }
            NodeKind::Empty(arg) => self.walk_expr(tree, *arg, scope, true, classifier),
            NodeKind::Call { callee, args } => {
                let pure_builtin = match callee {
                    Callee::Named(name) => classifier.is_pure_builtin(name),
                    Callee::Dynamic(_) => false,
                };
                if let Callee::Dynamic(e) = callee {
                    self.walk_expr(tree, *e, scope, banned, classifier);
                }
                for &arg in args.clone().iter() {
                    self.walk_expr(tree, arg, scope, banned, classifier);
                    // A bare variable handed to an unknown callee may bind
                    // by reference; treat it as written as well.
                    if !pure_builtin {
                        if let NodeKind::Variable(name) = tree.kind(arg) {
                            self.record_write(scope, name);
                        }
                    }
                }
                // The callee runs after its arguments are evaluated.
                if !pure_builtin {
                    let order = self.bump();
                    self.call_barriers.push(order);
                }
            }
            NodeKind::MethodCall { object, args, .. } => {
                self.walk_expr(tree, *object, scope, banned, classifier);
                for &arg in args.clone().iter() {
                    self.walk_expr(tree, arg, scope, banned, classifier);
                    if let NodeKind::Variable(name) = tree.kind(arg) {
                        self.record_write(scope, name);
                    }
                }
                let order = self.bump();
                self.call_barriers.push(order);
            }
            NodeKind::StaticCall { args, .. } | NodeKind::New { args, .. } => {
                for &arg in args.clone().iter() {
                    self.walk_expr(tree, arg, scope, banned, classifier);
                }
                let order = self.bump();
                self.call_barriers.push(order);
            }
            _ => {
                for child in tree.children(id) {
                    self.walk_expr(tree, child, scope, banned, classifier);
                }
            }
        }
    }
}

fn select_candidates(tree: &Tree, scan: &Scan, classifier: &Classifier) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (key, assigns) in &scan.plain_assigns {
        let (scope, name) = key;
        if classifier.is_superglobal(name) || scan.globals.contains(key) {
            continue;
        }
        let [assign] = assigns.as_slice() else {
            continue;
        };
        // The plain assignment must be the only write of any kind.
        if scan.writes.get(key).map(Vec::len).unwrap_or(0) != 1 {
            continue;
        }
        let reads = scan.reads.get(key).map(Vec::as_slice).unwrap_or(&[]);
        let [read] = reads else {
            continue;
        };
        if read.banned || read.order <= assign.order {
            continue;
        }
        // Self-reference guard: a read inside the write's own right-hand
        // side must not be inlined (`$x = $x + 1;`).
        if is_descendant(tree, read.node, assign.stmt) {
            continue;
        }
        if !classifier.classify(tree, assign.rhs).is_pure() {
            continue;
        }
        let mut rhs_vars = Vec::new();
        collect_variable_names(tree, assign.rhs, &mut rhs_vars);
        if !rhs_inputs_stable(&rhs_vars, scope, assign.order, scan) {
            continue;
        }
        // At global scope a call between the write and the read may
        // rewrite any variable the right-hand side reads (via `global`
        // in the callee), so the substitution cannot cross it.
        if scope == GLOBAL_SCOPE
            && !rhs_vars.is_empty()
            && scan
                .call_barriers
                .iter()
                .any(|&barrier| barrier > assign.order && barrier < read.order)
        {
            continue;
        }
        out.push(Candidate {
            write_stmt: assign.stmt,
            rhs: assign.rhs,
            read: read.node,
        });
    }
    out
}

/// Every variable the right-hand side reads must have all of its writes
/// strictly before the candidate assignment.
fn rhs_inputs_stable(rhs_vars: &[String], scope: &str, write_order: usize, scan: &Scan) -> bool {
    for name in rhs_vars {
        let key = (scope.to_string(), name.clone());
        let writes = scan.writes.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        if writes.len() > 1 || writes.iter().any(|&order| order >= write_order) {
            return false;
        }
    }
    true
}

fn collect_variable_names(tree: &Tree, id: NodeId, out: &mut Vec<String>) {
    if let NodeKind::Variable(name) = tree.kind(id) {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    for child in tree.children(id) {
        collect_variable_names(tree, child, out);
    }
}

fn is_descendant(tree: &Tree, node: NodeId, ancestor: NodeId) -> bool {
    let mut current = Some(node);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = tree.parent(id);
    }
    false
}

/// True when any ancestor of `node` is in `stmts`, other than `own`.
fn ancestor_in(tree: &Tree, node: NodeId, stmts: &FxHashSet<NodeId>, own: NodeId) -> bool {
    let mut current = tree.parent(node);
    while let Some(id) = current {
        if id != own && stmts.contains(&id) {
            return true;
        }
        current = tree.parent(id);
    }
    false
}

fn remove_statements(tree: &mut Tree, list: &mut Vec<NodeId>, doomed: &FxHashSet<NodeId>) {
    list.retain(|id| !doomed.contains(id));
    let snapshot = list.clone();
    for stmt in snapshot {
        remove_in_node(tree, stmt, doomed);
    }
}

fn remove_in_node(tree: &mut Tree, id: NodeId, doomed: &FxHashSet<NodeId>) {
    let mut kind = tree.take_kind(id);
    match &mut kind {
        NodeKind::Block(stmts) => {
            stmts.retain(|s| !doomed.contains(s));
        }
        NodeKind::Switch { cases, .. } => {
            for case in cases {
                case.body.retain(|s| !doomed.contains(s));
            }
        }
        _ => {}
    }
    for child in kind.children() {
        remove_in_node(tree, child, doomed);
    }
    tree.put_kind(id, kind);
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn inlined(src: &str) -> String {
        run_single_pass(src, &mut SingleUseInliningPass)
    }

    #[test]
    fn test_basic_inline() {
        assert_eq!(
            inlined("<?php $t = $a * 2; echo $t;"),
            "<?php\n\necho $a * 2;\n"
        );
    }

    #[test]
    fn test_self_reference_guard() {
        // `$x = $x + 1; echo $x;` must not be inlined.
        let out = inlined("<?php $x = $x + 1; echo $x;");
        assert_eq!(out, "<?php\n\n$x = $x + 1;\necho $x;\n");
    }

    #[test]
    fn test_two_reads_blocks_inline() {
        let out = inlined("<?php $t = $a; echo $t; echo $t;");
        assert!(out.contains("$t = $a;"), "{out}");
    }

    #[test]
    fn test_two_writes_blocks_inline() {
        let out = inlined("<?php $t = 1; $t = 2; echo $t;");
        assert!(out.contains("$t = 2;"), "{out}");
    }

    #[test]
    fn test_impure_rhs_blocks_inline() {
        let out = inlined("<?php $t = rand(); echo $t;");
        assert!(out.contains("$t = rand();"), "{out}");
    }

    #[test]
    fn test_rhs_input_reassigned_blocks_inline() {
        // $y changes between the write and the read.
        let out = inlined("<?php $t = $y + 1; $y = 9; echo $t;");
        assert!(out.contains("$t = $y + 1;"), "{out}");
    }

    #[test]
    fn test_read_in_isset_blocks_inline() {
        let out = inlined("<?php $t = 5; var_dump(isset($t));");
        assert!(out.contains("$t = 5;"), "{out}");
    }

    #[test]
    fn test_chain_inlines_over_rounds() {
        // One link per round; the fixed-point loop finishes the chain.
        let once = inlined("<?php $a = 5; $b = $a; echo $b;");
        let twice = inlined(&once);
        assert_eq!(twice, "<?php\n\necho 5;\n");
    }

    #[test]
    fn test_compound_assign_not_single_write() {
        let out = inlined("<?php $t = 1; $t += 2; echo $t;");
        assert!(out.contains("$t += 2;"), "{out}");
    }

    #[test]
    fn test_global_binding_blocks_inline() {
        let out =
            inlined("<?php $g = 5; echo $g; function f() { global $g; echo $g; } f();");
        assert!(out.contains("$g = 5;"), "{out}");
    }

    #[test]
    fn test_call_between_write_and_read_blocks_inline() {
        // mystery() may rewrite $y through `global`; moving the read of
        // $y past it would observe the new value.
        let out = inlined("<?php $t = $y; mystery(); echo $t;");
        assert!(out.contains("$t = $y;"), "{out}");

        // A variable-free right-hand side is unaffected by the call.
        let out = inlined("<?php $t = 5; mystery(); echo $t;");
        assert!(out.contains("echo 5;"), "{out}");
    }

    #[test]
    fn test_inline_into_nested_expression() {
        assert_eq!(
            inlined("<?php $half = $total / 2; $result = $half + 1;"),
            "<?php\n\n$result = $total / 2 + 1;\n"
        );
    }
}
