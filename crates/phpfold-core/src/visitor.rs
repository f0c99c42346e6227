//! Generic depth-first traversal with enter/leave hooks.
//!
//! A traversal walks a node list depth-first: `enter(node)`, children,
//! `leave(node)`. Hooks reply with a [`VisitAction`]; removals and
//! replacements are applied immediately by the engine, so no pass ever
//! observes a dangling removal flag from a previous pass. Replacement
//! subtrees are not re-visited in the same traversal. Visitors compose by
//! chaining full traversals, one after another, never interleaved.

use phpfold_syntax::tree::NodeKind;
use phpfold_syntax::{NodeId, Tree};

/// Hook result. `Remove` only applies in list positions (a statement list,
/// argument list, interpolation parts); in a single-child slot it is a
/// no-op, and in an optional slot it clears the slot.
#[derive(Debug, Clone)]
pub enum VisitAction {
    Keep,
    /// Keep the node but do not descend into its children.
    Skip,
    Remove,
    Replace(NodeId),
    ReplaceMany(Vec<NodeId>),
}

pub trait Visitor {
    fn before_traverse(&mut self, _tree: &mut Tree, _roots: &mut Vec<NodeId>) {}

    fn enter(&mut self, _tree: &mut Tree, _id: NodeId) -> VisitAction {
        VisitAction::Keep
    }

    fn leave(&mut self, _tree: &mut Tree, _id: NodeId) -> VisitAction {
        VisitAction::Keep
    }

    /// The one place whole-list restructuring happens outside node-level
    /// replace/remove. Returns whether the list changed.
    fn after_traverse(&mut self, _tree: &mut Tree, _roots: &mut Vec<NodeId>) -> bool {
        false
    }
}

/// Run one visitor over a root list. Returns whether anything changed.
pub fn traverse(tree: &mut Tree, roots: &mut Vec<NodeId>, visitor: &mut dyn Visitor) -> bool {
    visitor.before_traverse(tree, roots);
    let mut changed = visit_list(tree, roots, visitor);
    changed |= visitor.after_traverse(tree, roots);
    changed
}

enum Outcome {
    Keep,
    Remove,
    Replace(Vec<NodeId>),
}

fn action_outcome(action: VisitAction) -> Option<Outcome> {
    match action {
        VisitAction::Keep | VisitAction::Skip => None,
        VisitAction::Remove => Some(Outcome::Remove),
        VisitAction::Replace(id) => Some(Outcome::Replace(vec![id])),
        VisitAction::ReplaceMany(ids) => Some(Outcome::Replace(ids)),
    }
}

fn visit_node(tree: &mut Tree, id: NodeId, visitor: &mut dyn Visitor) -> (Outcome, bool) {
    let enter_action = visitor.enter(tree, id);
    let descend = matches!(enter_action, VisitAction::Keep);
    if let Some(outcome) = action_outcome(enter_action) {
        return (outcome, true);
    }

    let mut changed = false;
    if descend {
        changed |= visit_children(tree, id, visitor);
    }

    match action_outcome(visitor.leave(tree, id)) {
        Some(outcome) => (outcome, true),
        None => (Outcome::Keep, changed),
    }
}

/// Walk a list position, applying removals and splices in place.
pub fn visit_list(tree: &mut Tree, list: &mut Vec<NodeId>, visitor: &mut dyn Visitor) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < list.len() {
        let (outcome, sub_changed) = visit_node(tree, list[i], visitor);
        changed |= sub_changed;
        match outcome {
            Outcome::Keep => i += 1,
            Outcome::Remove => {
                list.remove(i);
                changed = true;
            }
            Outcome::Replace(ids) => {
                let advance = ids.len();
                list.splice(i..=i, ids);
                changed = true;
                i += advance;
            }
        }
    }
    changed
}

fn visit_slot(tree: &mut Tree, slot: &mut NodeId, visitor: &mut dyn Visitor) -> bool {
    let (outcome, mut changed) = visit_node(tree, *slot, visitor);
    match outcome {
        Outcome::Replace(ids) if ids.len() == 1 => {
            *slot = ids[0];
            changed = true;
        }
        // Removing or multi-replacing a mandatory child has no meaning;
        // leave the node untouched (fail-soft).
        _ => {}
    }
    changed
}

fn visit_opt(tree: &mut Tree, slot: &mut Option<NodeId>, visitor: &mut dyn Visitor) -> bool {
    let Some(id) = *slot else {
        return false;
    };
    let (outcome, mut changed) = visit_node(tree, id, visitor);
    match outcome {
        Outcome::Remove => {
            *slot = None;
            changed = true;
        }
        Outcome::Replace(ids) if ids.len() == 1 => {
            *slot = Some(ids[0]);
            changed = true;
        }
        _ => {}
    }
    changed
}

/// Visit the children embedded in a node's kind. The kind is temporarily
/// taken out of the arena (leaving `Detached`) so hooks can borrow the
/// tree mutably while the engine holds the child slots. Consequence for
/// hook authors: while a node's subtree is being visited, that node's own
/// kind reads as `Detached`, so hooks must not inspect ancestor kinds
/// mid-traversal. Passes that need parent-chain inspection do a read-only
/// scan first and mutate in a second step.
fn visit_children(tree: &mut Tree, id: NodeId, visitor: &mut dyn Visitor) -> bool {
    let mut kind = tree.take_kind(id);
    let mut changed = false;
    match &mut kind {
        NodeKind::Block(stmts) | NodeKind::Echo(stmts) | NodeKind::Isset(stmts) => {
            changed |= visit_list(tree, stmts, visitor);
        }
        NodeKind::ExprStmt(e) | NodeKind::Throw(e) | NodeKind::Empty(e) => {
            changed |= visit_slot(tree, e, visitor);
        }
        NodeKind::If {
            cond,
            then_branch,
            elseifs,
            else_branch,
        } => {
            changed |= visit_slot(tree, cond, visitor);
            changed |= visit_slot(tree, then_branch, visitor);
            for ei in elseifs {
                changed |= visit_slot(tree, &mut ei.cond, visitor);
                changed |= visit_slot(tree, &mut ei.body, visitor);
            }
            changed |= visit_opt(tree, else_branch, visitor);
        }
        NodeKind::While { cond, body } => {
            changed |= visit_slot(tree, cond, visitor);
            changed |= visit_slot(tree, body, visitor);
        }
        NodeKind::For {
            init,
            cond,
            step,
            body,
        } => {
            changed |= visit_list(tree, init, visitor);
            changed |= visit_list(tree, cond, visitor);
            changed |= visit_list(tree, step, visitor);
            changed |= visit_slot(tree, body, visitor);
        }
        NodeKind::Foreach { subject, body, .. } => {
            changed |= visit_slot(tree, subject, visitor);
            changed |= visit_slot(tree, body, visitor);
        }
        NodeKind::Switch { subject, cases } => {
            changed |= visit_slot(tree, subject, visitor);
            for case in cases {
                changed |= visit_opt(tree, &mut case.test, visitor);
                changed |= visit_list(tree, &mut case.body, visitor);
            }
        }
        NodeKind::Return(value) | NodeKind::Exit(value) => {
            changed |= visit_opt(tree, value, visitor);
        }
        NodeKind::ConstDecl { value, .. } => {
            changed |= visit_slot(tree, value, visitor);
        }
        NodeKind::FunctionDecl { params, body, .. } => {
            for p in params {
                changed |= visit_opt(tree, &mut p.default, visitor);
            }
            changed |= visit_slot(tree, body, visitor);
        }
        NodeKind::ClassDecl {
            properties,
            methods,
            ..
        } => {
            for p in properties {
                changed |= visit_opt(tree, &mut p.default, visitor);
            }
            changed |= visit_list(tree, methods, visitor);
        }
        NodeKind::Try {
            body,
            catches,
            finally,
        } => {
            changed |= visit_slot(tree, body, visitor);
            for c in catches {
                changed |= visit_slot(tree, &mut c.body, visitor);
            }
            changed |= visit_opt(tree, finally, visitor);
        }
        NodeKind::Interp(parts) => {
            changed |= visit_list(tree, parts, visitor);
        }
        NodeKind::ArrayLit(items) => {
            for item in items {
                changed |= visit_opt(tree, &mut item.key, visitor);
                changed |= visit_slot(tree, &mut item.value, visitor);
            }
        }
        NodeKind::Binary { lhs, rhs, .. } => {
            changed |= visit_slot(tree, lhs, visitor);
            changed |= visit_slot(tree, rhs, visitor);
        }
        NodeKind::Unary { operand, .. } => {
            changed |= visit_slot(tree, operand, visitor);
        }
        NodeKind::Assign { target, value, .. } => {
            changed |= visit_slot(tree, target, visitor);
            changed |= visit_slot(tree, value, visitor);
        }
        NodeKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            changed |= visit_slot(tree, cond, visitor);
            changed |= visit_opt(tree, then_branch, visitor);
            changed |= visit_slot(tree, else_branch, visitor);
        }
        NodeKind::Call { callee, args } => {
            if let phpfold_syntax::tree::Callee::Dynamic(e) = callee {
                changed |= visit_slot(tree, e, visitor);
            }
            changed |= visit_list(tree, args, visitor);
        }
        NodeKind::MethodCall { object, args, .. } => {
            changed |= visit_slot(tree, object, visitor);
            changed |= visit_list(tree, args, visitor);
        }
        NodeKind::StaticCall { args, .. } | NodeKind::New { args, .. } => {
            changed |= visit_list(tree, args, visitor);
        }
        NodeKind::PropertyFetch { object, .. } => {
            changed |= visit_slot(tree, object, visitor);
        }
        NodeKind::Index { array, index } => {
            changed |= visit_slot(tree, array, visitor);
            changed |= visit_opt(tree, index, visitor);
        }
        NodeKind::Include { path, .. } => {
            changed |= visit_slot(tree, path, visitor);
        }
        NodeKind::Break(_)
        | NodeKind::Continue(_)
        | NodeKind::Global(_)
        | NodeKind::Separator
        | NodeKind::Variable(_)
        | NodeKind::Lit(_)
        | NodeKind::ConstFetch(_)
        | NodeKind::MagicDir
        | NodeKind::Detached => {}
    }
    tree.put_kind(id, kind);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;
    use phpfold_syntax::printer::print_program;
    use phpfold_syntax::tree::Literal;
    use phpfold_syntax::Span;

    /// Replaces every integer literal with 0.
    struct ZeroInts;

    impl Visitor for ZeroInts {
        fn leave(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
            match tree.kind(id) {
                NodeKind::Lit(Literal::Int(n)) if *n != 0 => {
                    let zero = tree.alloc(NodeKind::Lit(Literal::Int(0)), Span::dummy());
                    VisitAction::Replace(zero)
                }
                _ => VisitAction::Keep,
            }
        }
    }

    /// Removes echo statements.
    struct DropEchos;

    impl Visitor for DropEchos {
        fn enter(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
            match tree.kind(id) {
                NodeKind::Echo(_) => VisitAction::Remove,
                _ => VisitAction::Keep,
            }
        }
    }

    /// Skips function bodies entirely.
    struct SkipFunctions {
        visited_vars: usize,
    }

    impl Visitor for SkipFunctions {
        fn enter(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
            match tree.kind(id) {
                NodeKind::FunctionDecl { .. } => VisitAction::Skip,
                NodeKind::Variable(_) => {
                    self.visited_vars += 1;
                    VisitAction::Keep
                }
                _ => VisitAction::Keep,
            }
        }
    }

    #[test]
    fn test_replace_on_leave() {
        let mut program = parse("<?php $x = 1 + 2;").unwrap();
        let changed = traverse(&mut program.tree, &mut program.roots, &mut ZeroInts);
        assert!(changed);
        let out = print_program(&program.tree, &program.roots);
        assert_eq!(out, "<?php\n\n$x = 0 + 0;\n");
    }

    #[test]
    fn test_remove_from_statement_list() {
        let mut program = parse("<?php $a = 1; echo $a; $b = 2;").unwrap();
        let changed = traverse(&mut program.tree, &mut program.roots, &mut DropEchos);
        assert!(changed);
        assert_eq!(program.roots.len(), 2);
    }

    #[test]
    fn test_skip_prevents_descent() {
        let mut program = parse("<?php function f() { $inside = 1; } $outside = 2;").unwrap();
        let mut visitor = SkipFunctions { visited_vars: 0 };
        traverse(&mut program.tree, &mut program.roots, &mut visitor);
        assert_eq!(visitor.visited_vars, 1);
    }

    #[test]
    fn test_replace_many_splices() {
        struct SplitEcho;
        impl Visitor for SplitEcho {
            fn enter(&mut self, tree: &mut Tree, id: NodeId) -> VisitAction {
                if let NodeKind::Echo(args) = tree.kind(id).clone() {
                    if args.len() > 1 {
                        let span = tree.span(id);
                        let singles = args
                            .iter()
                            .map(|&a| tree.alloc(NodeKind::Echo(vec![a]), span))
                            .collect();
                        return VisitAction::ReplaceMany(singles);
                    }
                }
                VisitAction::Keep
            }
        }

        let mut program = parse("<?php echo 1, 2, 3;").unwrap();
        traverse(&mut program.tree, &mut program.roots, &mut SplitEcho);
        assert_eq!(program.roots.len(), 3);
        // Replacements are not re-visited, so single-arg echoes stay as-is.
        for &root in &program.roots {
            assert!(matches!(program.tree.kind(root), NodeKind::Echo(args) if args.len() == 1));
        }
    }

    #[test]
    fn test_remove_clears_optional_slot() {
        /// Finds the if-statement's else block up front, then removes it.
        #[derive(Default)]
        struct DropElse {
            target: Option<NodeId>,
        }
        impl Visitor for DropElse {
            fn before_traverse(&mut self, tree: &mut Tree, roots: &mut Vec<NodeId>) {
                for &root in roots.iter() {
                    if let NodeKind::If { else_branch, .. } = tree.kind(root) {
                        self.target = *else_branch;
                    }
                }
            }

            fn enter(&mut self, _tree: &mut Tree, id: NodeId) -> VisitAction {
                if Some(id) == self.target {
                    VisitAction::Remove
                } else {
                    VisitAction::Keep
                }
            }
        }

        let mut program = parse("<?php if ($a) { echo 1; } else { echo 2; }").unwrap();
        traverse(
            &mut program.tree,
            &mut program.roots,
            &mut DropElse::default(),
        );
        match program.tree.kind(program.roots[0]) {
            NodeKind::If { else_branch, .. } => assert!(else_branch.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_after_traverse_restructures_list() {
        struct AppendSeparator;
        impl Visitor for AppendSeparator {
            fn after_traverse(&mut self, tree: &mut Tree, roots: &mut Vec<NodeId>) -> bool {
                let sep = tree.alloc(NodeKind::Separator, Span::dummy());
                roots.push(sep);
                true
            }
        }

        let mut program = parse("<?php $a = 1;").unwrap();
        let changed = traverse(&mut program.tree, &mut program.roots, &mut AppendSeparator);
        assert!(changed);
        assert!(matches!(
            program.tree.kind(*program.roots.last().unwrap()),
            NodeKind::Separator
        ));
    }
}
