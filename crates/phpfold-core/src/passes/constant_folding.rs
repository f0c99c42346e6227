use phpfold_syntax::tree::{BinaryOp, Literal, NodeKind};
use phpfold_syntax::{NodeId, Tree};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::errors::TransformError;
use crate::value::{
    arithmetic, bitwise, compare, concat, literal_truthy, loose_equals, strict_equals, unary,
    Value,
};

/// Evaluates literal-only expressions at the tree level: arithmetic with
/// host numeric promotion, loose/strict comparisons, concatenation,
/// ternaries with literal conditions, and short-circuit operators whose
/// left side already decides the result. Division by zero is left
/// unfolded.
pub struct ConstantFoldingPass;

impl Pass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn description(&self) -> &'static str {
        "Evaluates literal-only expressions at the syntax level"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.fold_constants
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut changed = false;
        for &root in ctx.roots.iter() {
            changed |= fold(ctx.tree, root);
        }
        Ok(changed)
    }
}

/// Post-order fold; node ids are stable, only kinds are rewritten.
fn fold(tree: &mut Tree, id: NodeId) -> bool {
    let mut changed = false;
    for child in tree.children(id) {
        changed |= fold(tree, child);
    }
    changed |= fold_node(tree, id);
    changed
}

fn fold_node(tree: &mut Tree, id: NodeId) -> bool {
    match tree.kind(id).clone() {
        NodeKind::Binary { op, lhs, rhs } => fold_binary(tree, id, op, lhs, rhs),
        NodeKind::Unary { op, operand } => {
            let Some(lit) = tree.literal(operand).cloned() else {
                return false;
            };
            let Some(result) = unary(op, &Value::from_literal(&lit)) else {
                return false;
            };
            replace_with_value(tree, id, result)
        }
        NodeKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            let Some(lit) = tree.literal(cond).cloned() else {
                return false;
            };
            let taken = if literal_truthy(&lit) {
                match then_branch {
                    Some(t) => t,
                    // Short form keeps the condition value itself.
                    None => cond,
                }
            } else {
                else_branch
            };
            tree.set_kind(id, tree.kind(taken).clone());
            true
        }
        NodeKind::Interp(parts) => {
            let mut merged = String::new();
            for &part in &parts {
                match tree.literal(part) {
                    Some(lit) => match crate::value::literal_to_php_string(lit) {
                        Some(text) => merged.push_str(&text),
                        None => return false,
                    },
                    None => return false,
                }
            }
            tree.set_kind(id, NodeKind::Lit(Literal::String(merged)));
            true
        }
        _ => false,
    }
}

fn fold_binary(tree: &mut Tree, id: NodeId, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> bool {
    let left = tree.literal(lhs).cloned();
    let right = tree.literal(rhs).cloned();

    // Short-circuit operators fold on the left side alone: the right side
    // would never run, so dropping it is safe even when it has effects.
    if let Some(left_lit) = &left {
        match op {
            BinaryOp::And if !literal_truthy(left_lit) => {
                tree.set_kind(id, NodeKind::Lit(Literal::Bool(false)));
                return true;
            }
            BinaryOp::Or if literal_truthy(left_lit) => {
                tree.set_kind(id, NodeKind::Lit(Literal::Bool(true)));
                return true;
            }
            BinaryOp::Coalesce => {
                if matches!(left_lit, Literal::Null) {
                    tree.set_kind(id, tree.kind(rhs).clone());
                } else {
                    tree.set_kind(id, NodeKind::Lit(left_lit.clone()));
                }
                return true;
            }
            _ => {}
        }
    }

    let (Some(left_lit), Some(right_lit)) = (left, right) else {
        return false;
    };
    let (a, b) = (
        Value::from_literal(&left_lit),
        Value::from_literal(&right_lit),
    );

    let result = match op {
        BinaryOp::Add
        | BinaryOp::Sub
        | BinaryOp::Mul
        | BinaryOp::Div
        | BinaryOp::Mod
        | BinaryOp::Pow => arithmetic(op, &a, &b),
        BinaryOp::Concat => concat(&a, &b),
        BinaryOp::Equal => loose_equals(&a, &b).map(Value::Bool),
        BinaryOp::NotEqual => loose_equals(&a, &b).map(|v| Value::Bool(!v)),
        BinaryOp::Identical => Some(Value::Bool(strict_equals(&a, &b))),
        BinaryOp::NotIdentical => Some(Value::Bool(!strict_equals(&a, &b))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            compare(op, &a, &b).map(Value::Bool)
        }
        BinaryOp::And => Some(Value::Bool(a.truthy() && b.truthy())),
        BinaryOp::Or => Some(Value::Bool(a.truthy() || b.truthy())),
        BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::ShiftLeft
        | BinaryOp::ShiftRight => bitwise(op, &a, &b),
        BinaryOp::Coalesce => unreachable!("handled above"),
    };

    match result {
        Some(value) => replace_with_value(tree, id, value),
        None => false,
    }
}

fn replace_with_value(tree: &mut Tree, id: NodeId, value: Value) -> bool {
    match value.to_literal() {
        Some(lit) => {
            tree.set_kind(id, NodeKind::Lit(lit));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::run_single_pass;

    fn folded(src: &str) -> String {
        run_single_pass(src, &mut ConstantFoldingPass)
    }

    #[test]
    fn test_precedence_honored_at_tree_level() {
        assert_eq!(folded("<?php echo 2 + 3 * 4;"), "<?php\n\necho 14;\n");
    }

    #[test]
    fn test_bool_concat() {
        assert_eq!(folded("<?php echo true . 'x';"), "<?php\n\necho '1x';\n");
        assert_eq!(folded("<?php echo false . 'x';"), "<?php\n\necho 'x';\n");
    }

    #[test]
    fn test_division_by_zero_left_unfolded() {
        assert_eq!(folded("<?php echo 10 / 0;"), "<?php\n\necho 10 / 0;\n");
    }

    #[test]
    fn test_uneven_division_becomes_float() {
        assert_eq!(folded("<?php echo 7 / 2;"), "<?php\n\necho 3.5;\n");
        assert_eq!(folded("<?php echo 10 / 2;"), "<?php\n\necho 5;\n");
    }

    #[test]
    fn test_loose_vs_strict_comparison() {
        assert_eq!(folded("<?php $a = '5' == 5;"), "<?php\n\n$a = true;\n");
        assert_eq!(folded("<?php $a = '5' === 5;"), "<?php\n\n$a = false;\n");
    }

    #[test]
    fn test_ternary_with_literal_condition() {
        assert_eq!(folded("<?php $a = 1 ? 'y' : 'n';"), "<?php\n\n$a = 'y';\n");
        assert_eq!(folded("<?php $a = 0 ? 'y' : 'n';"), "<?php\n\n$a = 'n';\n");
        assert_eq!(folded("<?php $a = 'v' ?: 'n';"), "<?php\n\n$a = 'v';\n");
    }

    #[test]
    fn test_coalesce_folds_on_left_only() {
        assert_eq!(folded("<?php $a = null ?? $b;"), "<?php\n\n$a = $b;\n");
        assert_eq!(folded("<?php $a = 3 ?? $b;"), "<?php\n\n$a = 3;\n");
    }

    #[test]
    fn test_short_circuit_with_impure_right() {
        // `false && rand()` never runs rand(); folding it away is safe.
        assert_eq!(folded("<?php $a = false && rand();"), "<?php\n\n$a = false;\n");
        assert_eq!(folded("<?php $a = true || rand();"), "<?php\n\n$a = true;\n");
        // `true && rand()` must stay: the result depends on the right side.
        assert_eq!(
            folded("<?php $a = true && rand();"),
            "<?php\n\n$a = true && rand();\n"
        );
    }

    #[test]
    fn test_nested_folding_cascades() {
        assert_eq!(folded("<?php echo (2 + 3) * (4 - 1);"), "<?php\n\necho 15;\n");
    }

    #[test]
    fn test_interpolation_of_literals_collapses() {
        // After other passes replace variables with literals, the template
        // folds to one string.
        assert_eq!(
            folded("<?php echo 1 . 'a' . 2.5;"),
            "<?php\n\necho '1a2.5';\n"
        );
    }

    #[test]
    fn test_unary_folding() {
        assert_eq!(folded("<?php $a = !true;"), "<?php\n\n$a = false;\n");
        assert_eq!(folded("<?php $a = -(3 + 4);"), "<?php\n\n$a = -7;\n");
    }

    #[test]
    fn test_non_literal_operands_untouched() {
        assert_eq!(folded("<?php $a = $b + 1;"), "<?php\n\n$a = $b + 1;\n");
    }
}
