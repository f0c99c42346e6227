//! Derived, read-only analysis artifacts: contiguous same-effect statement
//! runs, pure computations with their free/bound variables, extraction
//! candidates scored for an (external) refactoring layer, and structure
//! improvement notes. Nothing here mutates the tree.

use phpfold_syntax::tree::NodeKind;
use phpfold_syntax::{NodeId, Span, Tree};

use super::complexity::{band, cognitive_complexity, ComplexityBand};
use crate::effect::{Classifier, EffectKind};

/// Bonus applied to fully pure candidates in the priority formula.
const PURE_BONUS: i64 = 25;

#[derive(Debug, Clone)]
pub struct EffectGroup {
    pub kind: EffectKind,
    pub statements: Vec<NodeId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct PureComputation {
    pub statements: Vec<NodeId>,
    /// Variables read before any write inside the run (would become
    /// parameters).
    pub free_vars: Vec<String>,
    /// Variables written inside the run.
    pub bound_vars: Vec<String>,
    pub size: usize,
    pub complexity: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionCandidate {
    pub name_hint: String,
    pub params: Vec<String>,
    pub statements: Vec<NodeId>,
    pub size: usize,
    pub complexity: u32,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct StructureImprovement {
    pub span: Span,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct CandidateAnalysis {
    pub groups: Vec<EffectGroup>,
    pub pure_computations: Vec<PureComputation>,
    pub function_candidates: Vec<FunctionCandidate>,
    pub improvements: Vec<StructureImprovement>,
}

pub fn analyze(tree: &Tree, statements: &[NodeId], classifier: &Classifier) -> CandidateAnalysis {
    let mut analysis = CandidateAnalysis::default();
    analysis.groups = effect_groups(tree, statements, classifier);

    for group in &analysis.groups {
        if group.kind.is_pure() && group.statements.len() >= 2 {
            let computation = pure_computation(tree, &group.statements);
            let candidate = score_candidate(
                &computation,
                analysis.function_candidates.len(),
            );
            analysis.pure_computations.push(computation);
            analysis.function_candidates.push(candidate);
        }
    }
    // Highest priority first.
    analysis
        .function_candidates
        .sort_by_key(|c| std::cmp::Reverse(c.priority));

    analysis.improvements = improvements(tree, statements);
    analysis
}

/// Split a statement sequence into contiguous runs sharing an effect kind.
fn effect_groups(tree: &Tree, statements: &[NodeId], classifier: &Classifier) -> Vec<EffectGroup> {
    let mut groups: Vec<EffectGroup> = Vec::new();
    for &stmt in statements {
        if matches!(tree.kind(stmt), NodeKind::Separator) {
            continue;
        }
        let kind = classifier.classify(tree, stmt);
        let span = tree.span(stmt);
        match groups.last_mut() {
            Some(group) if group.kind == kind => {
                group.statements.push(stmt);
                group.span = group.span.merge(span);
            }
            _ => groups.push(EffectGroup {
                kind,
                statements: vec![stmt],
                span,
            }),
        }
    }
    groups
}

fn pure_computation(tree: &Tree, statements: &[NodeId]) -> PureComputation {
    let mut free_vars = Vec::new();
    let mut bound_vars = Vec::new();
    for &stmt in statements {
        scan_vars(tree, stmt, &mut free_vars, &mut bound_vars);
    }
    PureComputation {
        statements: statements.to_vec(),
        free_vars,
        bound_vars,
        size: statements.len(),
        complexity: cognitive_complexity(tree, statements),
    }
}

fn scan_vars(tree: &Tree, id: NodeId, free: &mut Vec<String>, bound: &mut Vec<String>) {
    match tree.kind(id) {
        NodeKind::Assign { target, value, .. } => {
            // Right side evaluates first.
            scan_vars(tree, *value, free, bound);
            match tree.kind(*target) {
                NodeKind::Variable(name) => {
                    if !bound.contains(name) {
                        bound.push(name.clone());
                    }
                }
                _ => scan_vars(tree, *target, free, bound),
            }
        }
        NodeKind::Variable(name) => {
            if !bound.contains(name) && !free.contains(name) {
                free.push(name.clone());
            }
        }
        _ => {
            for child in tree.children(id) {
                scan_vars(tree, child, free, bound);
            }
        }
    }
}

fn score_candidate(computation: &PureComputation, index: usize) -> FunctionCandidate {
    let size = computation.size as i64;
    let complexity = computation.complexity as i64;
    let param_count = computation.free_vars.len() as i64;
    FunctionCandidate {
        name_hint: format!("computed_{index}"),
        params: computation.free_vars.clone(),
        statements: computation.statements.clone(),
        size: computation.size,
        complexity: computation.complexity,
        priority: PURE_BONUS + size * 10 + complexity * 5 - param_count * 3,
    }
}

fn improvements(tree: &Tree, statements: &[NodeId]) -> Vec<StructureImprovement> {
    let mut out = Vec::new();
    for &stmt in statements {
        let score = cognitive_complexity(tree, &[stmt]);
        let stmt_band = band(score);
        if stmt_band >= ComplexityBand::Complex {
            out.push(StructureImprovement {
                span: tree.span(stmt),
                description: format!(
                    "{} statement has {} cognitive complexity {score}; consider splitting it",
                    tree.kind(stmt).name(),
                    stmt_band.label()
                ),
            });
        }
        if let NodeKind::FunctionDecl { name, body, .. } = tree.kind(stmt) {
            let body_score = cognitive_complexity(tree, &[*body]);
            if band(body_score) == ComplexityBand::VeryComplex {
                out.push(StructureImprovement {
                    span: tree.span(stmt),
                    description: format!(
                        "function {name} is very complex (cognitive {body_score})"
                    ),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;

    fn analyze_src(src: &str) -> (CandidateAnalysis, Tree) {
        let program = parse(src).unwrap();
        let classifier = Classifier::new();
        let analysis = analyze(&program.tree, &program.roots, &classifier);
        (analysis, program.tree)
    }

    #[test]
    fn test_groups_split_on_effect_change() {
        let (analysis, _) = analyze_src("<?php $a = 1; $b = 2; echo $a; echo $b; $c = 3;");
        let kinds: Vec<EffectKind> = analysis.groups.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![EffectKind::Pure, EffectKind::Io, EffectKind::Pure]
        );
        assert_eq!(analysis.groups[0].statements.len(), 2);
        assert_eq!(analysis.groups[1].statements.len(), 2);
    }

    #[test]
    fn test_pure_computation_free_and_bound() {
        let (analysis, _) = analyze_src("<?php $sum = $x + $y; $double = $sum * 2;");
        assert_eq!(analysis.pure_computations.len(), 1);
        let computation = &analysis.pure_computations[0];
        assert_eq!(computation.free_vars, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(
            computation.bound_vars,
            vec!["sum".to_string(), "double".to_string()]
        );
    }

    #[test]
    fn test_priority_formula() {
        let (analysis, _) = analyze_src("<?php $sum = $x + $y; $double = $sum * 2;");
        let candidate = &analysis.function_candidates[0];
        let expected = 25
            + candidate.size as i64 * 10
            + candidate.complexity as i64 * 5
            - candidate.params.len() as i64 * 3;
        assert_eq!(candidate.priority, expected);
    }

    #[test]
    fn test_single_statement_runs_are_not_candidates() {
        let (analysis, _) = analyze_src("<?php $a = 1; echo $a;");
        assert!(analysis.function_candidates.is_empty());
    }
}
