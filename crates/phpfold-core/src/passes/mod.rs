//! The rewrite-rule catalog.
//!
//! Each pass is one tree-to-tree rewrite applied over a full traversal;
//! the pipeline runs the round catalog in fixed order to a global fixed
//! point, then the final-stage passes once. Passes shape-check before
//! acting and no-op on anything they do not recognize; a pass returning
//! `Err` aborts the whole run, so errors are reserved for broken
//! invariants, never for unsupported input.

mod class_inlining;
mod constant_folding;
mod constant_propagation;
mod dead_code;
mod function_inlining;
mod grouping;
mod isset_coalesce;
mod pre_execute;
mod readability;
mod single_use;
mod string_folding;
mod strip_comments;

pub use class_inlining::ClassInliningPass;
pub use constant_folding::ConstantFoldingPass;
pub use constant_propagation::ConstantPropagationPass;
pub use dead_code::DeadCodePass;
pub use function_inlining::FunctionInliningPass;
pub use grouping::GroupingPass;
pub use isset_coalesce::IssetCoalescePass;
pub use pre_execute::PreExecutePass;
pub use readability::ReadabilityPass;
pub use single_use::SingleUseInliningPass;
pub use string_folding::StringFoldingPass;
pub use strip_comments::StripCommentsPass;

use phpfold_syntax::{NodeId, Tree};

use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::sandbox::Sandbox;
use crate::scope::ScopeStore;

/// Everything a pass may touch, passed by exclusive reference so runs
/// stay isolated.
pub struct PassContext<'a> {
    pub tree: &'a mut Tree,
    pub roots: &'a mut Vec<NodeId>,
    pub scopes: &'a mut ScopeStore,
    pub classifier: &'a Classifier,
    pub sandbox: &'a mut Sandbox,
    pub options: &'a OptimizerOptions,
}

pub trait Pass {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn enabled(&self, options: &OptimizerOptions) -> bool;
    /// Returns whether the tree changed.
    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError>;
}

/// Static registration table: pass id to metadata, built at compile time
/// rather than introspected at run time.
#[derive(Debug, Clone, Copy)]
pub struct PassDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const PASS_TABLE: &[PassDescriptor] = &[
    PassDescriptor {
        id: "strip-comments",
        name: "Comment stripping",
        description: "Removes comment trivia from all nodes",
    },
    PassDescriptor {
        id: "constant-propagation",
        name: "Constant propagation",
        description: "Substitutes reads of variables holding scalar literals",
    },
    PassDescriptor {
        id: "constant-folding",
        name: "Constant folding",
        description: "Evaluates literal-only expressions at the syntax level",
    },
    PassDescriptor {
        id: "constant-pre-execution",
        name: "Constant pre-execution",
        description: "Runs whitelisted pure calls on literal arguments in the sandbox",
    },
    PassDescriptor {
        id: "isset-coalesce",
        name: "Isset simplification",
        description: "Rewrites `if (isset($v)) { $x = $v; }` to `$x = $v ?? $x;`",
    },
    PassDescriptor {
        id: "single-use-inlining",
        name: "Single-use variable inlining",
        description: "Inlines variables written once and read once",
    },
    PassDescriptor {
        id: "function-inlining",
        name: "Function inlining",
        description: "Inlines calls to single-return user functions",
    },
    PassDescriptor {
        id: "class-inlining",
        name: "Class inlining",
        description: "Flattens simple instances into per-instance variables",
    },
    PassDescriptor {
        id: "string-folding",
        name: "String and echo folding",
        description: "Merges echo runs and concatenation chains",
    },
    PassDescriptor {
        id: "dead-code",
        name: "Dead code elimination",
        description: "Drops unreachable statements, dead stores, and unused declarations",
    },
    PassDescriptor {
        id: "readability",
        name: "Nested ternary extraction",
        description: "Hoists nested ternary/coalesce expressions into temporaries",
    },
    PassDescriptor {
        id: "grouping",
        name: "Statement grouping",
        description: "Separates runs of differing effect kinds with blank lines",
    },
];

pub fn descriptor(id: &str) -> Option<&'static PassDescriptor> {
    PASS_TABLE.iter().find(|d| d.id == id)
}

/// The fixed-point round catalog, in its fixed order.
pub fn round_passes() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(StripCommentsPass),
        Box::new(ConstantPropagationPass),
        Box::new(ConstantFoldingPass),
        Box::new(PreExecutePass),
        Box::new(IssetCoalescePass),
        Box::new(SingleUseInliningPass),
        Box::new(FunctionInliningPass),
        Box::new(ClassInliningPass),
        Box::new(StringFoldingPass),
        Box::new(DeadCodePass),
    ]
}

/// Final-stage passes, run once after the fixed point.
pub fn final_passes() -> Vec<Box<dyn Pass>> {
    vec![Box::new(ReadabilityPass), Box::new(GroupingPass)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pass_is_registered() {
        let options = OptimizerOptions::default();
        for pass in round_passes().iter().chain(final_passes().iter()) {
            let entry = descriptor(pass.name());
            assert!(entry.is_some(), "pass '{}' missing from PASS_TABLE", pass.name());
            assert!(pass.enabled(&options));
        }
    }

    #[test]
    fn test_round_order_is_stable() {
        let ids: Vec<&str> = round_passes().iter().map(|p| p.name()).collect();
        assert_eq!(
            ids,
            vec![
                "strip-comments",
                "constant-propagation",
                "constant-folding",
                "constant-pre-execution",
                "isset-coalesce",
                "single-use-inlining",
                "function-inlining",
                "class-inlining",
                "string-folding",
                "dead-code",
            ]
        );
    }
}
