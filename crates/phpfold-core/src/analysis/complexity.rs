//! Cognitive and cyclomatic complexity, read-only walks.

use phpfold_syntax::tree::{BinaryOp, NodeKind};
use phpfold_syntax::{NodeId, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComplexityBand {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityBand {
    pub fn label(self) -> &'static str {
        match self {
            ComplexityBand::Simple => "simple",
            ComplexityBand::Moderate => "moderate",
            ComplexityBand::Complex => "complex",
            ComplexityBand::VeryComplex => "very_complex",
        }
    }
}

pub fn band(score: u32) -> ComplexityBand {
    match score {
        0..=5 => ComplexityBand::Simple,
        6..=10 => ComplexityBand::Moderate,
        11..=20 => ComplexityBand::Complex,
        _ => ComplexityBand::VeryComplex,
    }
}

/// Cognitive complexity: control structures cost one point per nesting
/// level entered (depth-cumulative), expression weights are flat:
/// +1 binary op, +1 logical op, +2 call, +1 array/property access,
/// +2 ternary.
pub fn cognitive_complexity(tree: &Tree, nodes: &[NodeId]) -> u32 {
    nodes.iter().map(|&id| cognitive_walk(tree, id, 0)).sum()
}

fn cognitive_walk(tree: &Tree, id: NodeId, depth: u32) -> u32 {
    let nesting_cost = depth + 1;
    match tree.kind(id) {
        NodeKind::If {
            cond,
            then_branch,
            elseifs,
            else_branch,
        } => {
            let mut score = nesting_cost + cognitive_walk(tree, *cond, depth);
            score += cognitive_walk(tree, *then_branch, depth + 1);
            for ei in elseifs {
                score += 1;
                score += cognitive_walk(tree, ei.cond, depth);
                score += cognitive_walk(tree, ei.body, depth + 1);
            }
            if let Some(eb) = else_branch {
                score += 1 + cognitive_walk(tree, *eb, depth + 1);
            }
            score
        }
        NodeKind::While { cond, body } => {
            nesting_cost + cognitive_walk(tree, *cond, depth) + cognitive_walk(tree, *body, depth + 1)
        }
        NodeKind::For {
            init,
            cond,
            step,
            body,
        } => {
            let mut score = nesting_cost;
            for &e in init.iter().chain(cond).chain(step) {
                score += cognitive_walk(tree, e, depth);
            }
            score + cognitive_walk(tree, *body, depth + 1)
        }
        NodeKind::Foreach { subject, body, .. } => {
            nesting_cost
                + cognitive_walk(tree, *subject, depth)
                + cognitive_walk(tree, *body, depth + 1)
        }
        NodeKind::Switch { subject, cases } => {
            let mut score = nesting_cost + cognitive_walk(tree, *subject, depth);
            for case in cases {
                score += 1;
                if let Some(test) = case.test {
                    score += cognitive_walk(tree, test, depth);
                }
                for &stmt in &case.body {
                    score += cognitive_walk(tree, stmt, depth + 1);
                }
            }
            score
        }
        NodeKind::Try {
            body,
            catches,
            finally,
        } => {
            let mut score = nesting_cost + cognitive_walk(tree, *body, depth + 1);
            for c in catches {
                score += 1 + cognitive_walk(tree, c.body, depth + 1);
            }
            if let Some(f) = finally {
                score += cognitive_walk(tree, *f, depth + 1);
            }
            score
        }
        NodeKind::FunctionDecl { body, .. } => cognitive_walk(tree, *body, depth),
        NodeKind::Ternary { .. } => {
            2 + sum_children(tree, id, depth)
        }
        // Logical operators score their single point here, not an extra
        // one on top of the generic binary-op weight.
        NodeKind::Binary { .. } => 1 + sum_children(tree, id, depth),
        NodeKind::Call { .. }
        | NodeKind::MethodCall { .. }
        | NodeKind::StaticCall { .. }
        | NodeKind::New { .. } => 2 + sum_children(tree, id, depth),
        NodeKind::Index { .. } | NodeKind::PropertyFetch { .. } => {
            1 + sum_children(tree, id, depth)
        }
        _ => sum_children(tree, id, depth),
    }
}

fn sum_children(tree: &Tree, id: NodeId, depth: u32) -> u32 {
    tree.children(id)
        .into_iter()
        .map(|child| cognitive_walk(tree, child, depth))
        .sum()
}

/// McCabe: 1 + decision points (if/elseif/loop/case/catch/ternary/
/// logical operator/null-coalesce).
pub fn cyclomatic_complexity(tree: &Tree, nodes: &[NodeId]) -> u32 {
    1 + nodes.iter().map(|&id| decisions(tree, id)).sum::<u32>()
}

fn decisions(tree: &Tree, id: NodeId) -> u32 {
    let own = match tree.kind(id) {
        NodeKind::If { elseifs, .. } => 1 + elseifs.len() as u32,
        NodeKind::While { .. } | NodeKind::For { .. } | NodeKind::Foreach { .. } => 1,
        NodeKind::Switch { cases, .. } => {
            cases.iter().filter(|c| c.test.is_some()).count() as u32
        }
        NodeKind::Try { catches, .. } => catches.len() as u32,
        NodeKind::Ternary { .. } => 1,
        NodeKind::Binary {
            op: BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce,
            ..
        } => 1,
        _ => 0,
    };
    own + tree
        .children(id)
        .into_iter()
        .map(|child| decisions(tree, child))
        .sum::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;

    fn cognitive(src: &str) -> u32 {
        let program = parse(src).unwrap();
        cognitive_complexity(&program.tree, &program.roots)
    }

    fn cyclomatic(src: &str) -> u32 {
        let program = parse(src).unwrap();
        cyclomatic_complexity(&program.tree, &program.roots)
    }

    #[test]
    fn test_straight_line_is_cheap() {
        assert_eq!(cyclomatic("<?php $a = 1; $b = 2;"), 1);
    }

    #[test]
    fn test_nesting_costs_more_than_sequence() {
        let nested = cognitive("<?php if ($a) { if ($b) { if ($c) { echo 1; } } }");
        let flat = cognitive("<?php if ($a) { echo 1; } if ($b) { echo 1; } if ($c) { echo 1; }");
        assert!(nested > flat, "nested={nested} flat={flat}");
    }

    #[test]
    fn test_cyclomatic_counts_decisions() {
        // if + elseif + ternary + && = 4 decisions.
        assert_eq!(
            cyclomatic(
                "<?php if ($a && $b) { echo 1; } elseif ($c) { echo $d ? 1 : 2; }"
            ),
            5
        );
    }

    #[test]
    fn test_switch_cases_count() {
        let score = cyclomatic(
            "<?php switch ($x) { case 1: echo 1; break; case 2: echo 2; break; default: echo 3; }",
        );
        // 1 + two non-default cases.
        assert_eq!(score, 3);
    }

    #[test]
    fn test_bands() {
        assert_eq!(band(3), ComplexityBand::Simple);
        assert_eq!(band(8), ComplexityBand::Moderate);
        assert_eq!(band(15), ComplexityBand::Complex);
        assert_eq!(band(40), ComplexityBand::VeryComplex);
    }
}
