use phpfold_syntax::tree::{AssignOp, BinaryOp, NodeKind};
use phpfold_syntax::{NodeId, Span, Tree};
use rustc_hash::FxHashSet;

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;

/// Final-stage readability rewrite: ternary/coalesce subexpressions that
/// are buried inside a larger expression are hoisted, innermost first,
/// into fresh temporary assignments ahead of the statement.
///
/// An expression already sitting directly under an assignment, a
/// `return`, or a single-expression `echo` is at statement top level and
/// is never re-extracted, which makes the pass idempotent. Nothing is
/// hoisted out of a lazily-evaluated position (a ternary branch, the
/// right side of `&&`/`||`/`??`, a loop condition), and only pure
/// subexpressions move, so evaluation order stays observable-equivalent.
pub struct ReadabilityPass;

impl Pass for ReadabilityPass {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn description(&self) -> &'static str {
        "Hoists nested ternary/coalesce expressions into temporaries"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.extract_nested_ternaries
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut used_names = FxHashSet::default();
        for &root in ctx.roots.iter() {
            collect_names(ctx.tree, root, &mut used_names);
        }
        let mut extractor = Extractor {
            classifier: ctx.classifier,
            used_names,
            next_temp: 0,
            changed: false,
        };
        extractor.process_list(ctx.tree, ctx.roots);
        Ok(extractor.changed)
    }
}

fn collect_names(tree: &Tree, id: NodeId, names: &mut FxHashSet<String>) {
    if let NodeKind::Variable(name) = tree.kind(id) {
        names.insert(name.clone());
    }
    for child in tree.children(id) {
        collect_names(tree, child, names);
    }
}

struct Extractor<'a> {
    classifier: &'a Classifier,
    used_names: FxHashSet<String>,
    next_temp: usize,
    changed: bool,
}

impl Extractor<'_> {
    fn fresh_temp(&mut self) -> String {
        loop {
            let name = format!("tmp{}", self.next_temp);
            self.next_temp += 1;
            if self.used_names.insert(name.clone()) {
                return name;
            }
        }
    }

    fn process_list(&mut self, tree: &mut Tree, list: &mut Vec<NodeId>) {
        let mut i = 0;
        while i < list.len() {
            let stmt = list[i];
            // Innermost-first: hoist one candidate, then rescan the same
            // statement until none remain.
            while let Some(candidate) = find_candidate_in_stmt(tree, stmt, self.classifier) {
                let temp = self.fresh_temp();
                let span = tree.span(candidate);
                let moved = tree.alloc(tree.kind(candidate).clone(), span);
                let target = tree.alloc(NodeKind::Variable(temp.clone()), Span::dummy());
                let assign = tree.alloc(
                    NodeKind::Assign {
                        op: AssignOp::Assign,
                        target,
                        value: moved,
                    },
                    span,
                );
                let assign_stmt = tree.alloc(NodeKind::ExprStmt(assign), span);
                tree.set_kind(candidate, NodeKind::Variable(temp));
                list.insert(i, assign_stmt);
                i += 1;
                self.changed = true;
            }
            self.descend(tree, stmt);
            i += 1;
        }
    }

    fn descend(&mut self, tree: &mut Tree, id: NodeId) {
        let mut kind = tree.take_kind(id);
        match &mut kind {
            NodeKind::Block(stmts) => self.process_list(tree, stmts),
            NodeKind::Switch { cases, .. } => {
                for case in cases {
                    self.process_list(tree, &mut case.body);
                }
            }
            _ => {}
        }
        for child in kind.children() {
            self.descend(tree, child);
        }
        tree.put_kind(id, kind);
    }
}

/// Deepest nested ternary/coalesce eligible for hoisting out of `stmt`.
fn find_candidate_in_stmt(tree: &Tree, stmt: NodeId, classifier: &Classifier) -> Option<NodeId> {
    match tree.kind(stmt) {
        NodeKind::ExprStmt(expr) => find_in_expr(tree, *expr, true, false, classifier),
        NodeKind::Return(Some(value)) => find_in_expr(tree, *value, true, false, classifier),
        NodeKind::Echo(args) => match args[..] {
            [single] => find_in_expr(tree, single, true, false, classifier),
            _ => args
                .iter()
                .find_map(|&arg| find_in_expr(tree, arg, false, false, classifier)),
        },
        NodeKind::If { cond, .. } => find_in_expr(tree, *cond, false, false, classifier),
        NodeKind::Foreach { subject, .. } | NodeKind::Switch { subject, .. } => {
            find_in_expr(tree, *subject, false, false, classifier)
        }
        _ => None,
    }
}

fn find_in_expr(
    tree: &Tree,
    id: NodeId,
    top: bool,
    lazy: bool,
    classifier: &Classifier,
) -> Option<NodeId> {
    match tree.kind(id) {
        NodeKind::Assign { target, value, .. } => {
            find_in_expr(tree, *target, false, lazy, classifier)
                .or_else(|| find_in_expr(tree, *value, top, lazy, classifier))
        }
        NodeKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            if let Some(found) = find_in_expr(tree, *cond, false, lazy, classifier) {
                return Some(found);
            }
            if let Some(t) = then_branch {
                if let Some(found) = find_in_expr(tree, *t, false, true, classifier) {
                    return Some(found);
                }
            }
            if let Some(found) = find_in_expr(tree, *else_branch, false, true, classifier) {
                return Some(found);
            }
            eligible(tree, id, top, lazy, classifier)
        }
        NodeKind::Binary {
            op: BinaryOp::Coalesce,
            lhs,
            rhs,
        } => {
            if let Some(found) = find_in_expr(tree, *lhs, false, lazy, classifier) {
                return Some(found);
            }
            if let Some(found) = find_in_expr(tree, *rhs, false, true, classifier) {
                return Some(found);
            }
            eligible(tree, id, top, lazy, classifier)
        }
        NodeKind::Binary {
            op: BinaryOp::And | BinaryOp::Or,
            lhs,
            rhs,
        } => find_in_expr(tree, *lhs, false, lazy, classifier)
            .or_else(|| find_in_expr(tree, *rhs, false, true, classifier)),
        _ => {
            let children = tree.children(id);
            children
                .into_iter()
                .find_map(|child| find_in_expr(tree, child, false, lazy, classifier))
        }
    }
}

fn eligible(
    tree: &Tree,
    id: NodeId,
    top: bool,
    lazy: bool,
    classifier: &Classifier,
) -> Option<NodeId> {
    if top || lazy {
        return None;
    }
    if !classifier.classify(tree, id).is_pure() {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn extracted(src: &str) -> String {
        run_single_pass(src, &mut ReadabilityPass)
    }

    #[test]
    fn test_nested_ternary_hoisted() {
        assert_eq!(
            extracted("<?php echo strlen($a ? 'x' : 'yy');"),
            "<?php\n\n$tmp0 = $a ? 'x' : 'yy';\necho strlen($tmp0);\n"
        );
    }

    #[test]
    fn test_top_level_ternary_untouched() {
        assert_eq!(
            extracted("<?php $x = $a ? 1 : 2;"),
            "<?php\n\n$x = $a ? 1 : 2;\n"
        );
        assert_eq!(
            extracted("<?php return_value($a); echo $a ?? 'd';"),
            "<?php\n\nreturn_value($a);\necho $a ?? 'd';\n"
        );
    }

    #[test]
    fn test_idempotent() {
        let once = extracted("<?php echo strlen($a ? 'x' : 'yy');");
        let twice = extracted(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_innermost_first() {
        let out = extracted("<?php echo strlen(($a ?: 'd') . ($b ? 'x' : 'y'));");
        // Two temps, the left chain element extracted first.
        assert_eq!(
            out,
            "<?php\n\n$tmp0 = $a ?: 'd';\n$tmp1 = $b ? 'x' : 'y';\necho strlen($tmp0 . $tmp1);\n"
        );
    }

    #[test]
    fn test_lazy_position_not_hoisted() {
        // Hoisting the inner coalesce out of the else branch would force
        // its evaluation; it must stay.
        let out = extracted("<?php $x = $a ? 1 : ($b ?? 2);");
        assert_eq!(out, "<?php\n\n$x = $a ? 1 : ($b ?? 2);\n");
    }

    #[test]
    fn test_impure_subexpression_not_hoisted() {
        let out = extracted("<?php echo strlen($a ? rand() : 'x');");
        assert!(out.contains("strlen($a ? rand() : 'x')"), "{out}");
    }

    #[test]
    fn test_temp_names_avoid_collisions() {
        let out = extracted("<?php $tmp0 = 1; echo strlen($a ? 'x' : 'y');");
        assert!(out.contains("$tmp1 = $a ? 'x' : 'y';"), "{out}");
    }

    #[test]
    fn test_nested_inside_if_condition() {
        let out = extracted("<?php if ($a ?? false) { echo 1; }");
        assert_eq!(out, "<?php\n\n$tmp0 = $a ?? false;\nif ($tmp0) {\n    echo 1;\n}\n");
    }
}
