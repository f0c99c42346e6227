//! Read-only analysis layer: complexity metrics, the effect dependency
//! graph, and extraction candidates. Consumed for gating and reporting;
//! never mutates the tree.

pub mod candidates;
pub mod complexity;
pub mod dependency;

pub use candidates::{
    analyze, CandidateAnalysis, EffectGroup, FunctionCandidate, PureComputation,
    StructureImprovement,
};
pub use complexity::{band, cognitive_complexity, cyclomatic_complexity, ComplexityBand};
pub use dependency::{DepNode, EffectDependencyGraph, NodeKey};
