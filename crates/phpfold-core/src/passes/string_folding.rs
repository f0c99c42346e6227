use phpfold_syntax::tree::{BinaryOp, Literal, NodeKind};
use phpfold_syntax::{NodeId, Tree};

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::errors::TransformError;
use crate::value::literal_to_php_string;

/// Two string rewrites:
///
/// 1. Consecutive `echo` statements merge into one via concatenation.
/// 2. Concatenation chains of literals, plain variables, and existing
///    interpolated strings merge into a single interpolated string.
///
/// Both bail out unmodified the moment a chain element is anything else.
pub struct StringFoldingPass;

impl Pass for StringFoldingPass {
    fn name(&self) -> &'static str {
        "string-folding"
    }

    fn description(&self) -> &'static str {
        "Merges echo runs and concatenation chains"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.fold_strings
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut changed = merge_echo_runs(ctx.tree, ctx.roots);
        for &root in ctx.roots.iter() {
            changed |= walk_statements(ctx.tree, root);
        }
        for &root in ctx.roots.iter() {
            changed |= fold_interpolations(ctx.tree, root);
        }
        Ok(changed)
    }
}

// ----------------------------------------------------------------------
// Echo merging
// ----------------------------------------------------------------------

/// Recurse into every nested statement list and merge echo runs there.
fn walk_statements(tree: &mut Tree, id: NodeId) -> bool {
    let mut kind = tree.take_kind(id);
    let mut changed = false;
    match &mut kind {
        NodeKind::Block(stmts) => changed |= merge_echo_runs(tree, stmts),
        NodeKind::Switch { cases, .. } => {
            for case in cases {
                changed |= merge_echo_runs(tree, &mut case.body);
            }
        }
        _ => {}
    }
    for child in kind.children() {
        changed |= walk_statements(tree, child);
    }
    tree.put_kind(id, kind);
    changed
}

fn merge_echo_runs(tree: &mut Tree, list: &mut Vec<NodeId>) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i + 1 < list.len() {
        let both_echo = matches!(tree.kind(list[i]), NodeKind::Echo(_))
            && matches!(tree.kind(list[i + 1]), NodeKind::Echo(_));
        if !both_echo {
            i += 1;
            continue;
        }
        let NodeKind::Echo(first_args) = tree.kind(list[i]).clone() else {
            unreachable!();
        };
        let NodeKind::Echo(second_args) = tree.kind(list[i + 1]).clone() else {
            unreachable!();
        };
        let mut pieces = first_args;
        pieces.extend(second_args);
        let Some(merged) = concat_chain(tree, &pieces) else {
            i += 1;
            continue;
        };
        tree.set_kind(list[i], NodeKind::Echo(vec![merged]));
        list.remove(i + 1);
        changed = true;
        // Stay on the merged echo: a third one may follow.
    }
    changed
}

/// Left-associated concatenation over the pieces.
fn concat_chain(tree: &mut Tree, pieces: &[NodeId]) -> Option<NodeId> {
    let mut iter = pieces.iter();
    let mut acc = *iter.next()?;
    for &piece in iter {
        let span = tree.span(acc).merge(tree.span(piece));
        acc = tree.alloc(
            NodeKind::Binary {
                op: BinaryOp::Concat,
                lhs: acc,
                rhs: piece,
            },
            span,
        );
    }
    Some(acc)
}

// ----------------------------------------------------------------------
// Interpolation folding
// ----------------------------------------------------------------------

fn fold_interpolations(tree: &mut Tree, id: NodeId) -> bool {
    if try_fold_chain(tree, id) {
        return true;
    }
    let mut changed = false;
    for child in tree.children(id) {
        changed |= fold_interpolations(tree, child);
    }
    changed
}

enum Piece {
    Text(String),
    Var(NodeId),
}

fn try_fold_chain(tree: &mut Tree, id: NodeId) -> bool {
    if !matches!(
        tree.kind(id),
        NodeKind::Binary {
            op: BinaryOp::Concat,
            ..
        }
    ) {
        return false;
    }
    let mut pieces = Vec::new();
    if !collect_chain(tree, id, &mut pieces) {
        return false;
    }
    // A chain of nothing but literals belongs to constant folding.
    if !pieces.iter().any(|p| matches!(p, Piece::Var(_))) {
        return false;
    }

    let mut parts: Vec<NodeId> = Vec::new();
    let mut pending = String::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => pending.push_str(&text),
            Piece::Var(var) => {
                if !pending.is_empty() {
                    let lit = tree.alloc(
                        NodeKind::Lit(Literal::String(std::mem::take(&mut pending))),
                        tree.span(id),
                    );
                    parts.push(lit);
                }
                parts.push(var);
            }
        }
    }
    if !pending.is_empty() {
        let lit = tree.alloc(NodeKind::Lit(Literal::String(pending)), tree.span(id));
        parts.push(lit);
    }
    tree.set_kind(id, NodeKind::Interp(parts));
    true
}

/// Flatten a concat chain into text/variable pieces. False means the
/// chain contains something this pass does not handle.
fn collect_chain(tree: &Tree, id: NodeId, out: &mut Vec<Piece>) -> bool {
    match tree.kind(id) {
        NodeKind::Binary {
            op: BinaryOp::Concat,
            lhs,
            rhs,
        } => {
            let (lhs, rhs) = (*lhs, *rhs);
            collect_chain(tree, lhs, out) && collect_chain(tree, rhs, out)
        }
        NodeKind::Lit(lit) => match literal_to_php_string(lit) {
            Some(text) => {
                out.push(Piece::Text(text));
                true
            }
            None => false,
        },
        NodeKind::Variable(_) => {
            out.push(Piece::Var(id));
            true
        }
        NodeKind::Interp(parts) => {
            for &part in parts {
                match tree.kind(part) {
                    NodeKind::Lit(lit) => match literal_to_php_string(lit) {
                        Some(text) => out.push(Piece::Text(text)),
                        None => return false,
                    },
                    NodeKind::Variable(_) => out.push(Piece::Var(part)),
                    _ => return false,
                }
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn folded(src: &str) -> String {
        run_single_pass(src, &mut StringFoldingPass)
    }

    #[test]
    fn test_consecutive_echoes_merge() {
        assert_eq!(
            folded("<?php echo 'a'; echo $b; echo 'c';"),
            "<?php\n\necho \"a{$b}c\";\n"
        );
    }

    #[test]
    fn test_concat_chain_becomes_interpolation() {
        assert_eq!(
            folded("<?php $s = 'Hello ' . $name . '!';"),
            "<?php\n\n$s = \"Hello {$name}!\";\n"
        );
    }

    #[test]
    fn test_numeric_literals_convert() {
        assert_eq!(
            folded("<?php $s = $x . 5 . true;"),
            "<?php\n\n$s = \"{$x}51\";\n"
        );
    }

    #[test]
    fn test_existing_interpolation_splices() {
        assert_eq!(
            folded("<?php $s = \"a $b\" . '!';"),
            "<?php\n\n$s = \"a {$b}!\";\n"
        );
    }

    #[test]
    fn test_call_in_chain_bails_out() {
        assert_eq!(
            folded("<?php $s = 'a' . f() . $b;"),
            "<?php\n\n$s = 'a' . f() . $b;\n"
        );
    }

    #[test]
    fn test_all_literal_chain_left_to_constant_folding() {
        assert_eq!(
            folded("<?php $s = 'a' . 'b';"),
            "<?php\n\n$s = 'a' . 'b';\n"
        );
    }

    #[test]
    fn test_echo_merge_inside_function_body() {
        // Literal-only chains are left for constant folding to collapse.
        let out = folded("<?php function f() { echo 'x'; echo 'y'; }");
        assert!(out.contains("echo 'x' . 'y';"), "{out}");
    }

    #[test]
    fn test_non_adjacent_echoes_stay() {
        let out = folded("<?php echo 'a'; $x = 1; echo 'b';");
        assert!(out.contains("echo 'a';"), "{out}");
        assert!(out.contains("echo 'b';"), "{out}");
    }
}
