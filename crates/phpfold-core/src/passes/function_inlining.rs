use phpfold_syntax::tree::{Callee, Literal, NodeKind};
use phpfold_syntax::{NodeId, Span, Tree};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::scope::{capture_function, FunctionInfo, ScopeStore};

/// Replaces calls to user-defined single-`return` functions with a clone
/// of the return expression, parameters substituted positionally:
/// argument by index, else the parameter default, else `null`.
///
/// Skipped when an argument is not provably pure (embedding it could
/// duplicate or drop its effects), when the body references anything but
/// its own parameters, when a parameter binds by reference, or when the
/// body calls the function itself. Definitions left without references
/// are removed later by dead-code elimination.
pub struct FunctionInliningPass;

impl Pass for FunctionInliningPass {
    fn name(&self) -> &'static str {
        "function-inlining"
    }

    fn description(&self) -> &'static str {
        "Inlines calls to single-return user functions"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.inline_functions
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        // Capture all top-level definitions first; calls may precede the
        // definition in source order.
        for &root in ctx.roots.iter() {
            if matches!(ctx.tree.kind(root), NodeKind::FunctionDecl { .. }) {
                if let Some(info) = capture_function(ctx.tree, root) {
                    ctx.scopes.set_function(info);
                }
            }
        }

        let mut changed = false;
        for &root in ctx.roots.iter() {
            changed |= walk(ctx.tree, root, ctx.scopes, ctx.classifier);
        }
        Ok(changed)
    }
}

fn walk(tree: &mut Tree, id: NodeId, scopes: &ScopeStore, classifier: &Classifier) -> bool {
    let mut changed = false;
    for child in tree.children(id) {
        changed |= walk(tree, child, scopes, classifier);
    }
    changed |= try_inline(tree, id, scopes, classifier);
    changed
}

fn try_inline(
    tree: &mut Tree,
    call: NodeId,
    scopes: &ScopeStore,
    classifier: &Classifier,
) -> bool {
    let NodeKind::Call {
        callee: Callee::Named(name),
        args,
    } = tree.kind(call)
    else {
        return false;
    };
    let Some(info) = scopes.get_function(name) else {
        return false;
    };
    let Some(ret_expr) = info.single_return else {
        return false;
    };
    let info: FunctionInfo = info.clone();
    let args = args.clone();

    if args.len() > info.params.len() {
        return false;
    }
    if info.params.iter().any(|p| p.by_ref) {
        return false;
    }
    if args
        .iter()
        .any(|&arg| !classifier.classify(tree, arg).is_pure())
    {
        return false;
    }
    if calls_function(tree, ret_expr, &info.name) {
        return false;
    }
    if !only_references_params(tree, ret_expr, &info) {
        return false;
    }

    // Positional substitution sources: argument, else default, else null.
    let mut sources: FxHashMap<String, NodeId> = FxHashMap::default();
    for (index, param) in info.params.iter().enumerate() {
        let source = match args.get(index) {
            Some(&arg) => arg,
            None => match param.default {
                Some(default) => default,
                None => tree.alloc(NodeKind::Lit(Literal::Null), Span::dummy()),
            },
        };
        sources.insert(param.name.clone(), source);
    }

    let body = tree.deep_clone(ret_expr);
    substitute_params(tree, body, &sources);
    trace!("inlined call to {}", info.name);
    tree.set_kind(call, tree.kind(body).clone());
    true
}

fn calls_function(tree: &Tree, id: NodeId, name: &str) -> bool {
    if let NodeKind::Call {
        callee: Callee::Named(callee),
        ..
    } = tree.kind(id)
    {
        if callee.eq_ignore_ascii_case(name) {
            return true;
        }
    }
    tree.children(id)
        .into_iter()
        .any(|child| calls_function(tree, child, name))
}

/// Every variable in the return expression must be one of the function's
/// own parameters; anything else (undefined locals, superglobals) would
/// capture the caller's bindings.
fn only_references_params(tree: &Tree, id: NodeId, info: &FunctionInfo) -> bool {
    if let NodeKind::Variable(name) = tree.kind(id) {
        return info.params.iter().any(|p| p.name == *name);
    }
    tree.children(id)
        .into_iter()
        .all(|child| only_references_params(tree, child, info))
}

fn substitute_params(tree: &mut Tree, id: NodeId, sources: &FxHashMap<String, NodeId>) {
    if let NodeKind::Variable(name) = tree.kind(id) {
        if let Some(&source) = sources.get(name) {
            // Fresh clone per reference; a parameter may appear several
            // times in the body.
            let clone = tree.deep_clone(source);
            tree.set_kind(id, tree.kind(clone).clone());
            return;
        }
    }
    for child in tree.children(id) {
        substitute_params(tree, child, sources);
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn inlined(src: &str) -> String {
        run_single_pass(src, &mut FunctionInliningPass)
    }

    #[test]
    fn test_basic_inline() {
        let out = inlined("<?php function add($a, $b) { return $a + $b; } echo add(2, 3);");
        assert!(out.contains("echo 2 + 3;"), "{out}");
    }

    #[test]
    fn test_missing_argument_uses_default_then_null() {
        let out = inlined("<?php function f($a, $b = 10) { return $a + $b; } echo f(1);");
        assert!(out.contains("echo 1 + 10;"), "{out}");

        let out = inlined("<?php function g($a, $b) { return $a ?? $b; } echo g(1);");
        assert!(out.contains("echo 1 ?? null;"), "{out}");
    }

    #[test]
    fn test_parameter_repeated_in_body() {
        let out = inlined("<?php function square($n) { return $n * $n; } echo square(4);");
        assert!(out.contains("echo 4 * 4;"), "{out}");
    }

    #[test]
    fn test_call_before_definition_inlines() {
        let out = inlined("<?php echo twice(3); function twice($n) { return $n * 2; }");
        assert!(out.contains("echo 3 * 2;"), "{out}");
    }

    #[test]
    fn test_impure_argument_blocks_inline() {
        let out = inlined("<?php function id($x) { return $x; } echo id(rand());");
        assert!(out.contains("id(rand())"), "{out}");
    }

    #[test]
    fn test_multi_statement_body_blocks_inline() {
        let out =
            inlined("<?php function f($x) { $y = $x + 1; return $y; } echo f(1);");
        assert!(out.contains("f(1)"), "{out}");
    }

    #[test]
    fn test_self_recursive_blocks_inline() {
        let out = inlined("<?php function r($n) { return $n < 1 ? 0 : r($n - 1); } echo r(3);");
        assert!(out.contains("echo r(3);"), "{out}");
    }

    #[test]
    fn test_free_variable_in_body_blocks_inline() {
        let out = inlined("<?php function f($x) { return $x + $hidden; } echo f(1);");
        assert!(out.contains("f(1)"), "{out}");
    }

    #[test]
    fn test_by_ref_parameter_blocks_inline() {
        let out = inlined("<?php function f(&$x) { return $x; } echo f($v);");
        assert!(out.contains("f($v)"), "{out}");
    }

    #[test]
    fn test_nested_calls_inline_inside_out() {
        let out = inlined(
            "<?php function inc($n) { return $n + 1; } echo inc(inc(1));",
        );
        assert!(out.contains("echo 1 + 1 + 1;"), "{out}");
    }

    #[test]
    fn test_case_insensitive_function_names() {
        let out = inlined("<?php function Add($a, $b) { return $a + $b; } echo ADD(1, 2);");
        assert!(out.contains("echo 1 + 2;"), "{out}");
    }
}
