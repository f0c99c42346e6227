use phpfold_syntax::tree::NodeKind;
use phpfold_syntax::{NodeId, Span, Tree};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::visitor::{traverse, VisitAction, Visitor};

/// Final-stage formatting rewrite: runs of statements sharing an effect
/// kind are separated from the next run by a blank line (a separator
/// node), at top level and inside function bodies. Boundaries that are
/// already separated are left alone, so the pass is idempotent.
///
/// The top-level list is restructured in `after_traverse`, the one place
/// whole-list rewrites happen outside node-level replace/remove.
pub struct GroupingPass;

impl Pass for GroupingPass {
    fn name(&self) -> &'static str {
        "grouping"
    }

    fn description(&self) -> &'static str {
        "Separates runs of differing effect kinds with blank lines"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.group_statements
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut grouper = Grouper {
            classifier: ctx.classifier,
            changed: false,
        };
        traverse(ctx.tree, ctx.roots, &mut grouper);
        Ok(grouper.changed)
    }
}

struct Grouper<'a> {
    classifier: &'a Classifier,
    changed: bool,
}

impl Visitor for Grouper<'_> {
    fn enter(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
        if let NodeKind::FunctionDecl { body, .. } = tree.kind(id) {
            let body = *body;
            let mut kind = tree.take_kind(body);
            if let NodeKind::Block(stmts) = &mut kind {
                self.changed |= group_list(tree, stmts, self.classifier);
            }
            tree.put_kind(body, kind);
        }
        VisitAction::Keep
    }

    fn after_traverse(&mut self, tree: &mut Tree, roots: &mut Vec<NodeId>) -> bool {
        let changed = group_list(tree, roots, self.classifier);
        self.changed |= changed;
        changed
    }
}

fn group_list(tree: &mut Tree, list: &mut Vec<NodeId>, classifier: &Classifier) -> bool {
    let mut changed = false;
    let mut i = 1;
    while i < list.len() {
        let prev = list[i - 1];
        let current = list[i];
        if matches!(tree.kind(prev), NodeKind::Separator)
            || matches!(tree.kind(current), NodeKind::Separator)
        {
            i += 1;
            continue;
        }
        if classifier.classify(tree, prev) != classifier.classify(tree, current) {
            let separator = tree.alloc(NodeKind::Separator, Span::dummy());
            list.insert(i, separator);
            changed = true;
            i += 2;
        } else {
            i += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn grouped(src: &str) -> String {
        run_single_pass(src, &mut GroupingPass)
    }

    #[test]
    fn test_blank_line_between_differing_kinds() {
        assert_eq!(
            grouped("<?php $a = 1; $b = 2; echo $a; echo $b;"),
            "<?php\n\n$a = 1;\n$b = 2;\n\necho $a;\necho $b;\n"
        );
    }

    #[test]
    fn test_same_kind_run_not_separated() {
        assert_eq!(
            grouped("<?php $a = 1; $b = 2;"),
            "<?php\n\n$a = 1;\n$b = 2;\n"
        );
    }

    #[test]
    fn test_idempotent() {
        let once = grouped("<?php $a = 1; echo $a; $b = 2;");
        let twice = grouped(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_groups_inside_function_bodies() {
        let out = grouped("<?php function f() { $a = 1; echo $a; }");
        assert!(out.contains("$a = 1;\n\n    echo $a;"), "{out}");
    }
}
