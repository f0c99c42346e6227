//! phpfold core: the transformation pipeline.
//!
//! The syntax front-end (lexer, parser, tree model, printer) lives in
//! `phpfold-syntax`; this crate owns everything that rewrites the tree:
//! the effect classifier, the scope store, the visitor engine, the
//! include inliner, the pass catalog, the sandbox with its execution
//! cache, the analysis layer, and the fixed-point pipeline driver.

pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod effect;
pub mod errors;
pub mod inliner;
pub mod passes;
pub mod pipeline;
pub mod sandbox;
pub mod scope;
pub mod value;
pub mod visitor;

pub use config::{OptimizerConfig, OptimizerOptions, SandboxOptions};
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel, PassReport,
};
pub use effect::{Classifier, EffectKind};
pub use errors::TransformError;
pub use inliner::Inliner;
pub use passes::{Pass, PassContext, PassDescriptor, PASS_TABLE};
pub use pipeline::Pipeline;
pub use sandbox::{Sandbox, SandboxContext, SandboxError};
pub use scope::ScopeStore;
pub use visitor::{traverse, VisitAction, Visitor};
