use phpfold_syntax::tree::{AssignOp, BinaryOp, NodeKind};
use phpfold_syntax::{NodeId, Tree};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::errors::TransformError;
use crate::visitor::{traverse, VisitAction, Visitor};

/// Rewrites `if (isset($v)) { $x = $v; }` into `$x = $v ?? $x;`.
///
/// The two forms are observably equivalent for exactly this shape: a
/// single isset argument, a single-statement body doing a plain
/// assignment from that same expression, and no else branches. Anything
/// else is left alone.
pub struct IssetCoalescePass;

impl Pass for IssetCoalescePass {
    fn name(&self) -> &'static str {
        "isset-coalesce"
    }

    fn description(&self) -> &'static str {
        "Rewrites `if (isset($v)) { $x = $v; }` to `$x = $v ?? $x;`"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.rewrite_isset
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        Ok(traverse(ctx.tree, ctx.roots, &mut IssetRewriter))
    }
}

struct IssetRewriter;

impl Visitor for IssetRewriter {
    fn leave(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
        match try_rewrite(tree, id) {
            Some(replacement) => VisitAction::Replace(replacement),
            None => VisitAction::Keep,
        }
    }
}

/// Returns the replacement statement when the shape matches.
fn try_rewrite(tree: &mut Tree, id: NodeId) -> Option<NodeId> {
    let NodeKind::If {
        cond,
        then_branch,
        elseifs,
        else_branch,
    } = tree.kind(id)
    else {
        return None;
    };
    if !elseifs.is_empty() || else_branch.is_some() {
        return None;
    }
    let (cond, then_branch) = (*cond, *then_branch);

    let NodeKind::Isset(args) = tree.kind(cond) else {
        return None;
    };
    let [checked] = args[..] else {
        return None;
    };
    if !is_simple_access(tree, checked) {
        return None;
    }

    let NodeKind::Block(stmts) = tree.kind(then_branch) else {
        return None;
    };
    let [only_stmt] = stmts[..] else {
        return None;
    };
    let NodeKind::ExprStmt(assign) = tree.kind(only_stmt) else {
        return None;
    };
    let NodeKind::Assign {
        op: AssignOp::Assign,
        target,
        value,
    } = tree.kind(*assign).clone()
    else {
        return None;
    };
    if !is_simple_access(tree, target) || !tree.nodes_equal(value, checked) {
        return None;
    }

    let span = tree.span(id);
    let fallback = tree.deep_clone(target);
    let coalesce = tree.alloc(
        NodeKind::Binary {
            op: BinaryOp::Coalesce,
            lhs: value,
            rhs: fallback,
        },
        span,
    );
    let new_assign = tree.alloc(
        NodeKind::Assign {
            op: AssignOp::Assign,
            target,
            value: coalesce,
        },
        span,
    );
    Some(tree.alloc(NodeKind::ExprStmt(new_assign), span))
}

/// Variable, or an index/property chain over variables and literals; the
/// rewrite duplicates the target, so it must be side-effect free.
fn is_simple_access(tree: &Tree, id: NodeId) -> bool {
    match tree.kind(id) {
        NodeKind::Variable(_) => true,
        NodeKind::Index { array, index } => {
            is_simple_access(tree, *array)
                && index
                    .map(|i| is_simple_access(tree, i) || tree.is_literal(i))
                    .unwrap_or(false)
        }
        NodeKind::PropertyFetch { object, .. } => is_simple_access(tree, *object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn rewritten(src: &str) -> String {
        run_single_pass(src, &mut IssetCoalescePass)
    }

    #[test]
    fn test_basic_rewrite() {
        assert_eq!(
            rewritten("<?php if (isset($v)) { $x = $v; }"),
            "<?php\n\n$x = $v ?? $x;\n"
        );
    }

    #[test]
    fn test_array_access_rewrite() {
        assert_eq!(
            rewritten("<?php if (isset($data['k'])) { $x = $data['k']; }"),
            "<?php\n\n$x = $data['k'] ?? $x;\n"
        );
    }

    #[test]
    fn test_else_branch_blocks_rewrite() {
        let src = "<?php if (isset($v)) { $x = $v; } else { $x = 1; }";
        let out = rewritten(src);
        assert!(out.contains("isset($v)"), "{out}");
    }

    #[test]
    fn test_multi_statement_body_blocks_rewrite() {
        let src = "<?php if (isset($v)) { $x = $v; echo $x; }";
        let out = rewritten(src);
        assert!(out.contains("isset($v)"), "{out}");
    }

    #[test]
    fn test_different_expression_blocks_rewrite() {
        let src = "<?php if (isset($v)) { $x = $w; }";
        let out = rewritten(src);
        assert!(out.contains("isset($v)"), "{out}");
    }

    #[test]
    fn test_side_effect_body_blocks_rewrite() {
        let src = "<?php if (isset($v)) { $x = f($v); }";
        let out = rewritten(src);
        assert!(out.contains("isset($v)"), "{out}");
    }
}
