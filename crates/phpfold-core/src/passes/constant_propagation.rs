use phpfold_syntax::tree::{AssignOp, Callee, Literal, NodeKind};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::FxHashSet;

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::scope::{ScopeStore, GLOBAL_SCOPE};
use crate::value::literal_to_php_string;

/// Substitutes reads of variables that provably hold a scalar literal.
///
/// Facts live in the scope store and only along straight-line statement
/// sequences: any branching construct clears them, a function body starts
/// empty, and a variable declared `global` is never tracked. Known
/// `const`/`define` literals substitute into constant fetches the same
/// way.
pub struct ConstantPropagationPass;

impl Pass for ConstantPropagationPass {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn description(&self) -> &'static str {
        "Substitutes reads of variables holding scalar literals"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.propagate_constants
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        ctx.scopes.set_current_scope(GLOBAL_SCOPE);
        ctx.scopes.clear_vars();
        let mut propagator = Propagator {
            tree: ctx.tree,
            scopes: ctx.scopes,
            classifier: ctx.classifier,
            globals: FxHashSet::default(),
            changed: false,
        };
        let roots = ctx.roots.clone();
        propagator.walk_list(&roots);
        Ok(propagator.changed)
    }
}

struct Propagator<'a> {
    tree: &'a mut Tree,
    scopes: &'a mut ScopeStore,
    classifier: &'a Classifier,
    /// Variables declared `global` in the current scope; never tracked.
    globals: FxHashSet<String>,
    changed: bool,
}

impl Propagator<'_> {
    fn walk_list(&mut self, stmts: &[NodeId]) {
        for &stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_block(&mut self, block: NodeId) {
        if let NodeKind::Block(stmts) = self.tree.kind(block).clone() {
            self.walk_list(&stmts);
        }
    }

    fn walk_stmt(&mut self, id: NodeId) {
        match self.tree.kind(id).clone() {
            NodeKind::ExprStmt(expr) => self.walk_expr_stmt(expr),
            NodeKind::Echo(args) => {
                for arg in args {
                    self.subst(arg);
                }
            }
            NodeKind::Return(value) => {
                if let Some(v) = value {
                    self.subst(v);
                }
            }
            NodeKind::Throw(value) => self.subst(value),
            NodeKind::Block(stmts) => self.walk_list(&stmts),
            NodeKind::If {
                cond,
                then_branch,
                elseifs,
                else_branch,
            } => {
                // The condition still sees pre-branch facts; bodies do not.
                self.subst(cond);
                self.scopes.clear_vars();
                self.walk_block(then_branch);
                for ei in &elseifs {
                    self.scopes.clear_vars();
                    self.walk_block(ei.body);
                }
                if let Some(eb) = else_branch {
                    self.scopes.clear_vars();
                    self.walk_block(eb);
                }
                self.scopes.clear_vars();
            }
            NodeKind::While { body, .. } => {
                // Loop conditions re-evaluate after the body; no substitution.
                self.scopes.clear_vars();
                self.walk_block(body);
                self.scopes.clear_vars();
            }
            NodeKind::For { init, body, .. } => {
                for e in init {
                    self.subst(e);
                }
                self.scopes.clear_vars();
                self.walk_block(body);
                self.scopes.clear_vars();
            }
            NodeKind::Foreach { subject, body, .. } => {
                self.subst(subject);
                self.scopes.clear_vars();
                self.walk_block(body);
                self.scopes.clear_vars();
            }
            NodeKind::Switch { subject, cases } => {
                self.subst(subject);
                self.scopes.clear_vars();
                for case in &cases {
                    self.walk_list(&case.body);
                    self.scopes.clear_vars();
                }
            }
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                self.scopes.clear_vars();
                self.walk_block(body);
                for c in &catches {
                    self.scopes.clear_vars();
                    self.walk_block(c.body);
                }
                if let Some(f) = finally {
                    self.scopes.clear_vars();
                    self.walk_block(f);
                }
                self.scopes.clear_vars();
            }
            NodeKind::ConstDecl { name, value } => {
                self.subst(value);
                if self.tree.is_literal(value) {
                    self.scopes.set_global_const(&name, value);
                }
            }
            NodeKind::FunctionDecl { name, body, .. } => {
                self.walk_function_body(&format!("fn:{}", name.to_ascii_lowercase()), body);
            }
            NodeKind::ClassDecl { name, methods, .. } => {
                for method in methods {
                    if let NodeKind::FunctionDecl {
                        name: method_name,
                        body,
                        ..
                    } = self.tree.kind(method).clone()
                    {
                        self.walk_function_body(
                            &format!("method:{name}::{method_name}"),
                            body,
                        );
                    }
                }
            }
            NodeKind::Global(names) => {
                for name in names {
                    self.scopes.clear_var(&name);
                    self.globals.insert(name);
                }
            }
            NodeKind::Break(_) | NodeKind::Continue(_) | NodeKind::Separator => {}
            // Expression kinds in statement position and anything else:
            // substitute reads, change no facts.
            _ => self.subst(id),
        }
    }

    fn walk_function_body(&mut self, scope: &str, body: NodeId) {
        let outer_scope = self.scopes.current_scope().to_string();
        let outer_globals = std::mem::take(&mut self.globals);
        self.scopes.set_current_scope(scope);
        self.scopes.clear_vars();
        self.walk_block(body);
        self.scopes.set_current_scope(&outer_scope);
        self.globals = outer_globals;
    }

    fn walk_expr_stmt(&mut self, expr: NodeId) {
        if let NodeKind::Assign { op, target, value } = self.tree.kind(expr).clone() {
            if let NodeKind::Variable(name) = self.tree.kind(target).clone() {
                self.subst(value);
                if self.classifier.is_superglobal(&name) || self.globals.contains(&name) {
                    self.scopes.clear_var(&name);
                    return;
                }
                if op == AssignOp::Assign && self.tree.is_literal(value) {
                    self.scopes.set_var(self.tree, &name, value);
                } else {
                    self.scopes.clear_var(&name);
                }
                return;
            }
            // Index/property writes: the key and value are reads.
            self.subst(target);
            self.subst(value);
            return;
        }

        // define('NAME', <literal>) registers a global constant.
        if let NodeKind::Call {
            callee: Callee::Named(name),
            args,
        } = self.tree.kind(expr).clone()
        {
            if name.eq_ignore_ascii_case("define") && args.len() == 2 {
                for &arg in &args {
                    self.subst(arg);
                }
                if let (Some(Literal::String(const_name)), true) = (
                    self.tree.literal(args[0]).cloned(),
                    self.tree.is_literal(args[1]),
                ) {
                    if !matches!(const_name.to_ascii_lowercase().as_str(), "true" | "false" | "null")
                    {
                        self.scopes.set_global_const(&const_name, args[1]);
                    }
                }
                return;
            }
        }

        self.subst(expr);
    }

    /// Substitute tracked reads inside an expression.
    fn subst(&mut self, id: NodeId) {
        match self.tree.kind(id).clone() {
            NodeKind::Variable(name) => {
                if let Some(value) = self.scopes.get_var(&name) {
                    if let Some(lit) = self.tree.literal(value).cloned() {
                        self.tree.set_kind(id, NodeKind::Lit(lit));
                        self.changed = true;
                    }
                }
            }
            NodeKind::ConstFetch(name) => {
                if let Some(value) = self.scopes.get_const(&name) {
                    if let Some(lit) = self.tree.literal(value).cloned() {
                        self.tree.set_kind(id, NodeKind::Lit(lit));
                        self.changed = true;
                    }
                }
            }
            // `isset`/`empty` observe bindings, not values; substituting a
            // literal would change their meaning.
            NodeKind::Isset(_) | NodeKind::Empty(_) => {}
            NodeKind::Interp(parts) => {
                for part in parts {
                    if let NodeKind::Variable(name) = self.tree.kind(part).clone() {
                        if let Some(value) = self.scopes.get_var(&name) {
                            if let Some(text) = self
                                .tree
                                .literal(value)
                                .and_then(literal_to_php_string)
                            {
                                self.tree
                                    .set_kind(part, NodeKind::Lit(Literal::String(text)));
                                self.changed = true;
                            }
                        }
                    }
                }
            }
            // Nested assignment inside an expression: substitute the right
            // side, then drop the fact (conservative).
            NodeKind::Assign { target, value, .. } => {
                self.subst(value);
                if let NodeKind::Variable(name) = self.tree.kind(target) {
                    let name = name.clone();
                    self.scopes.clear_var(&name);
                } else {
                    self.subst(target);
                }
            }
            NodeKind::Call { callee, args } => {
                let safe = match &callee {
                    Callee::Named(name) => self.classifier.is_pure_builtin(name),
                    Callee::Dynamic(_) => false,
                };
                self.subst_call_args(&args, safe);
                if let Callee::Dynamic(e) = callee {
                    self.subst(e);
                }
                if !safe {
                    self.invalidate_after_call();
                }
            }
            NodeKind::MethodCall { object, args, .. } => {
                self.subst(object);
                self.subst_call_args(&args, false);
                self.invalidate_after_call();
            }
            NodeKind::StaticCall { args, .. } | NodeKind::New { args, .. } => {
                self.subst_call_args(&args, false);
                self.invalidate_after_call();
            }
            _ => {
                for child in self.tree.children(id) {
                    self.subst(child);
                }
            }
        }
    }

    /// At global scope, every tracked variable is a global the callee may
    /// rewrite through a `global` declaration, so an unknown call ends all
    /// facts. Function-local facts survive: a callee cannot reach the
    /// caller's locals except through by-ref arguments, handled below.
    fn invalidate_after_call(&mut self) {
        if self.scopes.current_scope() == GLOBAL_SCOPE {
            self.scopes.clear_vars();
        }
    }

    /// Arguments of calls to anything but a pure builtin may be by-ref
    /// parameters: a tracked variable there is neither substituted (a
    /// literal cannot bind by reference) nor trusted afterwards.
    fn subst_call_args(&mut self, args: &[NodeId], callee_is_pure_builtin: bool) {
        for &arg in args {
            if callee_is_pure_builtin {
                self.subst(arg);
                continue;
            }
            if let NodeKind::Variable(name) = self.tree.kind(arg) {
                let name = name.clone();
                self.scopes.clear_var(&name);
            } else {
                self.subst(arg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::run_single_pass;

    fn propagated(src: &str) -> String {
        run_single_pass(src, &mut ConstantPropagationPass)
    }

    #[test]
    fn test_straight_line_propagation() {
        assert_eq!(
            propagated("<?php $a = 5; echo $a;"),
            "<?php\n\n$a = 5;\necho 5;\n"
        );
    }

    #[test]
    fn test_reassignment_invalidates() {
        assert_eq!(
            propagated("<?php $a = 5; $a = $b; echo $a;"),
            "<?php\n\n$a = 5;\n$a = $b;\necho $a;\n"
        );
    }

    #[test]
    fn test_branch_clears_facts() {
        let out = propagated("<?php $a = 5; if ($c) { $a = 6; } echo $a;");
        assert!(out.ends_with("echo $a;\n"), "facts must not survive a branch: {out}");
    }

    #[test]
    fn test_condition_still_sees_facts() {
        let out = propagated("<?php $a = 5; if ($a > 1) { echo 'y'; }");
        assert!(out.contains("if (5 > 1)"), "{out}");
    }

    #[test]
    fn test_interpolation_substitutes_string_form() {
        assert_eq!(
            propagated("<?php $n = 3; echo \"got $n items\";"),
            "<?php\n\n$n = 3;\necho \"got 3 items\";\n"
        );
    }

    #[test]
    fn test_isset_not_substituted() {
        let out = propagated("<?php $a = 5; echo isset($a) ? 'y' : 'n';");
        assert!(out.contains("isset($a)"), "{out}");
    }

    #[test]
    fn test_const_and_define_propagate() {
        let out = propagated("<?php const LIMIT = 10; echo LIMIT; define('MODE', 'fast'); echo MODE;");
        assert!(out.contains("echo 10;"), "{out}");
        assert!(out.contains("echo 'fast';"), "{out}");
    }

    #[test]
    fn test_function_scope_is_isolated() {
        let out = propagated("<?php $a = 5; function f() { echo $a; } echo $a;");
        assert!(out.contains("function f() {\n    echo $a;\n}"), "{out}");
        assert!(out.ends_with("echo 5;\n"), "{out}");
    }

    #[test]
    fn test_unknown_call_blocks_possible_by_ref_arg() {
        let out = propagated("<?php $m = 1; mystery($m); echo $m;");
        assert!(out.contains("mystery($m)"), "{out}");
        assert!(out.ends_with("echo $m;\n"), "{out}");
    }

    #[test]
    fn test_unknown_call_ends_global_facts() {
        // mystery() may rewrite $a through a `global` declaration.
        let out = propagated("<?php $a = 5; mystery(); echo $a;");
        assert!(out.ends_with("echo $a;\n"), "{out}");
    }

    #[test]
    fn test_pure_builtin_args_substituted() {
        let out = propagated("<?php $s = 'abc'; echo strlen($s);");
        assert!(out.contains("strlen('abc')"), "{out}");
    }

    #[test]
    fn test_global_declared_never_tracked() {
        let out = propagated("<?php function f() { global $g; $g = 1; echo $g; }");
        assert!(out.contains("echo $g;"), "{out}");
    }
}
