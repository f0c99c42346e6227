use phpfold_syntax::{NodeId, Tree};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::errors::TransformError;
use crate::visitor::{traverse, VisitAction, Visitor};

/// Drops comment trivia from every reachable node.
pub struct StripCommentsPass;

impl Pass for StripCommentsPass {
    fn name(&self) -> &'static str {
        "strip-comments"
    }

    fn description(&self) -> &'static str {
        "Removes comment trivia from all nodes"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.strip_comments
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut stripper = CommentStripper { changed: false };
        traverse(ctx.tree, ctx.roots, &mut stripper);
        Ok(stripper.changed)
    }
}

struct CommentStripper {
    changed: bool,
}

impl Visitor for CommentStripper {
    fn enter(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
        if !tree.node(id).comments.is_empty() {
            tree.node_mut(id).comments.clear();
            self.changed = true;
        }
        VisitAction::Keep
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    #[test]
    fn test_comments_removed() {
        let output = run_single_pass(
            "<?php // gone\n$a = 1; /* also gone */ $b = 2;",
            &mut StripCommentsPass,
        );
        assert!(!output.contains("gone"), "{output}");
        assert!(output.contains("$a = 1;"), "{output}");
    }

    #[test]
    fn test_second_run_reports_no_change() {
        let output = run_single_pass("<?php # note\n$a = 1;", &mut StripCommentsPass);
        let again = run_single_pass(&output, &mut StripCommentsPass);
        assert_eq!(output, again);
    }
}
