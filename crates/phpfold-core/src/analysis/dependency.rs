//! Dependency graph over side-effecting statements.
//!
//! Nodes are statements keyed by `(kind, start_offset, end_offset)`; an
//! edge A → B means A uses a variable defined by B. `can_reorder` holds
//! only when a node and its whole dependency cone are pure. The
//! topological sort is cycle-tolerant: nodes stuck in a cycle are skipped
//! from the order, but counted and logged so the truncation is observable.

use indexmap::IndexMap;
use phpfold_syntax::tree::NodeKind;
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::effect::{Classifier, EffectKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub kind: &'static str,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct DepNode {
    pub key: NodeKey,
    pub statement: NodeId,
    pub effect: EffectKind,
    pub defines: Vec<String>,
    pub uses: Vec<String>,
}

#[derive(Debug, Default)]
pub struct EffectDependencyGraph {
    nodes: IndexMap<NodeKey, DepNode>,
    /// key → keys it depends on.
    dependencies: FxHashMap<NodeKey, Vec<NodeKey>>,
}

impl EffectDependencyGraph {
    /// Build over a flat statement sequence (one scope).
    pub fn build(tree: &Tree, statements: &[NodeId], classifier: &Classifier) -> Self {
        let mut graph = EffectDependencyGraph::default();
        // Variable name → key of the statement that last defined it.
        let mut last_definition: FxHashMap<String, NodeKey> = FxHashMap::default();

        for &stmt in statements {
            if matches!(tree.kind(stmt), NodeKind::Separator) {
                continue;
            }
            let span = tree.span(stmt);
            let key = NodeKey {
                kind: tree.kind(stmt).name(),
                start: span.start,
                end: span.end,
            };
            let mut defines = Vec::new();
            let mut uses = Vec::new();
            collect_defs_uses(tree, stmt, &mut defines, &mut uses);

            let mut deps: Vec<NodeKey> = Vec::new();
            for used in &uses {
                if let Some(def_key) = last_definition.get(used) {
                    if *def_key != key && !deps.contains(def_key) {
                        deps.push(def_key.clone());
                    }
                }
            }

            for defined in &defines {
                last_definition.insert(defined.clone(), key.clone());
            }

            graph.dependencies.insert(key.clone(), deps);
            graph.nodes.insert(
                key.clone(),
                DepNode {
                    key,
                    statement: stmt,
                    effect: classifier.classify(tree, stmt),
                    defines,
                    uses,
                },
            );
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&DepNode> {
        self.nodes.get(key)
    }

    pub fn dependencies_of(&self, key: &NodeKey) -> &[NodeKey] {
        self.dependencies
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True iff the node and all of its transitive dependencies are pure.
    pub fn can_reorder(&self, key: &NodeKey) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![key.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            match self.nodes.get(&current) {
                Some(node) if node.effect.is_pure() => {
                    stack.extend(self.dependencies_of(&current).iter().cloned());
                }
                _ => return false,
            }
        }
        true
    }

    /// Dependencies-first order. Cyclic nodes are dropped from the result;
    /// the second value is how many were dropped (best-effort ordering,
    /// made observable rather than silent).
    pub fn topological_sort(&self) -> (Vec<NodeKey>, usize) {
        let mut in_degree: FxHashMap<&NodeKey, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<&NodeKey, Vec<&NodeKey>> = FxHashMap::default();
        for key in self.nodes.keys() {
            in_degree.entry(key).or_insert(0);
            for dep in self.dependencies_of(key) {
                if let Some((dep_key, _)) = self.nodes.get_key_value(dep) {
                    *in_degree.entry(key).or_insert(0) += 1;
                    dependents.entry(dep_key).or_default().push(key);
                }
            }
        }

        let mut ready: Vec<&NodeKey> = self
            .nodes
            .keys()
            .filter(|k| in_degree[*k] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(key) = ready.pop() {
            order.push(key.clone());
            for &dependent in dependents.get(key).map(Vec::as_slice).unwrap_or(&[]) {
                let degree = in_degree.get_mut(dependent).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }

        let skipped = self.nodes.len() - order.len();
        if skipped > 0 {
            debug!("topological sort skipped {skipped} node(s) involved in cycles");
        }
        (order, skipped)
    }
}

/// Variables a statement defines (assignment targets, foreach bindings)
/// and uses (every other variable read).
fn collect_defs_uses(tree: &Tree, id: NodeId, defines: &mut Vec<String>, uses: &mut Vec<String>) {
    match tree.kind(id) {
        NodeKind::Assign { target, value, .. } => {
            match tree.kind(*target) {
                NodeKind::Variable(name) => {
                    if !defines.contains(name) {
                        defines.push(name.clone());
                    }
                }
                // Writes through an index or property also read the base.
                _ => collect_defs_uses(tree, *target, defines, uses),
            }
            collect_defs_uses(tree, *value, defines, uses);
        }
        NodeKind::Foreach {
            subject,
            key_var,
            value_var,
            body,
            ..
        } => {
            collect_defs_uses(tree, *subject, defines, uses);
            if let Some(k) = key_var {
                if !defines.contains(k) {
                    defines.push(k.clone());
                }
            }
            if !defines.contains(value_var) {
                defines.push(value_var.clone());
            }
            collect_defs_uses(tree, *body, defines, uses);
        }
        NodeKind::Variable(name) => {
            if !uses.contains(name) {
                uses.push(name.clone());
            }
        }
        _ => {
            for child in tree.children(id) {
                collect_defs_uses(tree, child, defines, uses);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;

    fn build(src: &str) -> (EffectDependencyGraph, Vec<NodeKey>) {
        let program = parse(src).unwrap();
        let classifier = Classifier::new();
        let graph = EffectDependencyGraph::build(&program.tree, &program.roots, &classifier);
        let keys: Vec<NodeKey> = program
            .roots
            .iter()
            .map(|&id| {
                let span = program.tree.span(id);
                NodeKey {
                    kind: program.tree.kind(id).name(),
                    start: span.start,
                    end: span.end,
                }
            })
            .collect();
        (graph, keys)
    }

    #[test]
    fn test_uses_defined_by_edge() {
        let (graph, keys) = build("<?php $a = 1; $b = $a + 2;");
        assert_eq!(graph.dependencies_of(&keys[1]), &[keys[0].clone()]);
        assert!(graph.dependencies_of(&keys[0]).is_empty());
    }

    #[test]
    fn test_can_reorder_pure_chain() {
        let (graph, keys) = build("<?php $a = 1; $b = $a + 2; echo $b;");
        assert!(graph.can_reorder(&keys[0]));
        assert!(graph.can_reorder(&keys[1]));
        // echo is I/O.
        assert!(!graph.can_reorder(&keys[2]));
    }

    #[test]
    fn test_impure_dependency_blocks_reorder() {
        let (graph, keys) = build("<?php $a = rand(); $b = $a + 1;");
        assert!(!graph.can_reorder(&keys[1]));
    }

    #[test]
    fn test_topological_sort_dependencies_first() {
        let (graph, keys) = build("<?php $a = 1; $b = $a + 2; $c = $b * 3;");
        let (order, skipped) = graph.topological_sort();
        assert_eq!(skipped, 0);
        let pos =
            |k: &NodeKey| order.iter().position(|o| o == k).expect("in order");
        assert!(pos(&keys[0]) < pos(&keys[1]));
        assert!(pos(&keys[1]) < pos(&keys[2]));
    }

    #[test]
    fn test_redefinition_points_to_latest() {
        let (graph, keys) = build("<?php $a = 1; $a = 2; $b = $a;");
        assert_eq!(graph.dependencies_of(&keys[2]), &[keys[1].clone()]);
    }
}
