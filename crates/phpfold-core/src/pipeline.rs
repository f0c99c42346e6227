//! The fixed-point driver.
//!
//! One run: flatten includes, then apply the round catalog in its fixed
//! order until a whole round reports no change or the round cap is hit,
//! then run the final-stage passes once and print. Hitting the cap is not
//! an error; it sets the observable `still_changing` flag and emits a
//! warning.

use std::path::Path;
use std::sync::Arc;

use phpfold_syntax::printer::print_program;
use phpfold_syntax::{parse, NodeId, Tree};
use tracing::{debug, info};

use crate::config::OptimizerConfig;
use crate::diagnostics::{DiagnosticHandler, PassReport};
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::inliner::Inliner;
use crate::passes::{final_passes, round_passes, Pass, PassContext};
use crate::sandbox::Sandbox;
use crate::scope::ScopeStore;

pub struct Pipeline {
    config: OptimizerConfig,
    handler: Arc<dyn DiagnosticHandler>,
    /// Set when the round cap was reached while passes were still
    /// reporting changes.
    pub still_changing: bool,
}

impl Pipeline {
    pub fn new(config: OptimizerConfig, handler: Arc<dyn DiagnosticHandler>) -> Self {
        Pipeline {
            config,
            handler,
            still_changing: false,
        }
    }

    /// Optimize an entry file from disk, resolving its static includes.
    pub fn run_file(&mut self, entry: &Path) -> Result<String, TransformError> {
        let mut inliner = Inliner::new(self.handler.as_ref());
        let mut program = inliner.inline_entry(entry)?;
        self.optimize(&mut program.tree, &mut program.roots)?;
        Ok(print_program(&program.tree, &program.roots))
    }

    /// Optimize source text directly (no include resolution).
    pub fn run_source(&mut self, source: &str) -> Result<String, TransformError> {
        let mut program = parse(source).map_err(|err| TransformError::EntryUnparseable {
            path: "<memory>".into(),
            message: err.to_string(),
        })?;
        self.optimize(&mut program.tree, &mut program.roots)?;
        Ok(print_program(&program.tree, &program.roots))
    }

    /// Run the fixed-point loop plus the final stage over an existing
    /// tree.
    pub fn optimize(
        &mut self,
        tree: &mut Tree,
        roots: &mut Vec<NodeId>,
    ) -> Result<(), TransformError> {
        let options = self.config.optimizer_options.clone();
        let classifier = Classifier::new();
        let mut scopes = ScopeStore::new();
        let mut sandbox = Sandbox::new(&options.sandbox);

        self.still_changing = false;
        let mut passes = round_passes();
        for round in 1..=options.max_rounds {
            // Parent/sibling links are derived; refresh them for every
            // round so passes can rely on them.
            tree.connect(roots);

            let mut round_changed = false;
            for pass in passes.iter_mut() {
                if !pass.enabled(&options) {
                    continue;
                }
                let mut ctx = PassContext {
                    tree,
                    roots,
                    scopes: &mut scopes,
                    classifier: &classifier,
                    sandbox: &mut sandbox,
                    options: &options,
                };
                let changed = pass.run(&mut ctx).map_err(|err| TransformError::Pass {
                    pass: pass.name(),
                    message: err.to_string(),
                })?;
                self.handler.report_pass(PassReport {
                    round,
                    pass: pass.name(),
                    changed,
                });
                round_changed |= changed;
            }

            debug!("round {round}: changed={round_changed}");
            if !round_changed {
                info!("fixed point reached after {round} round(s)");
                break;
            }
            if round == options.max_rounds {
                self.still_changing = true;
                self.handler.warning(
                    None,
                    &format!(
                        "pipeline still changing after {} rounds; output may not be fully reduced",
                        options.max_rounds
                    ),
                );
            }
        }

        tree.connect(roots);
        for mut pass in final_passes() {
            if !pass.enabled(&options) {
                continue;
            }
            let mut ctx = PassContext {
                tree,
                roots,
                scopes: &mut scopes,
                classifier: &classifier,
                sandbox: &mut sandbox,
                options: &options,
            };
            let changed = pass.run(&mut ctx).map_err(|err| TransformError::Pass {
                pass: pass.name(),
                message: err.to_string(),
            })?;
            self.handler.report_pass(PassReport {
                round: options.max_rounds + 1,
                pass: pass.name(),
                changed,
            });
        }

        let stats = sandbox.cache_stats();
        debug!(
            "sandbox cache: {} hits, {} misses, {} inserts, {} evictions",
            stats.hits, stats.misses, stats.inserts, stats.evictions
        );
        Ok(())
    }
}

/// Unit-test plumbing: run one pass over source text and print.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::config::OptimizerOptions;

    pub fn run_single_pass(source: &str, pass: &mut dyn Pass) -> String {
        let mut program = parse(source).expect("test source parses");
        let options = OptimizerOptions::default();
        let classifier = Classifier::new();
        let mut scopes = ScopeStore::new();
        let mut sandbox = Sandbox::new(&options.sandbox);
        program.tree.connect(&program.roots);
        let mut ctx = PassContext {
            tree: &mut program.tree,
            roots: &mut program.roots,
            scopes: &mut scopes,
            classifier: &classifier,
            sandbox: &mut sandbox,
            options: &options,
        };
        pass.run(&mut ctx).expect("pass runs");
        print_program(&program.tree, &program.roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            OptimizerConfig::default(),
            Arc::new(CollectingDiagnosticHandler::new()),
        )
    }

    #[test]
    fn test_literal_arithmetic_folds_through() {
        let mut p = pipeline();
        let out = p.run_source("<?php $a = 5; $b = 10; echo $a + $b;").unwrap();
        assert_eq!(out, "<?php\n\necho 15;\n");
        assert!(!p.still_changing);
    }

    #[test]
    fn test_unparseable_entry_is_fatal() {
        let mut p = pipeline();
        let err = p.run_source("<?php if (").unwrap_err();
        assert!(matches!(err, TransformError::EntryUnparseable { .. }));
    }

    #[test]
    fn test_reports_cover_each_round() {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let mut p = Pipeline::new(OptimizerConfig::default(), handler.clone());
        p.run_source("<?php echo 1 + 1;").unwrap();
        let reports = handler.pass_reports();
        assert!(reports.iter().any(|r| r.pass == "constant-folding" && r.changed));
        // The last full round reports no changes.
        let last_round = reports
            .iter()
            .filter(|r| r.pass == "constant-folding")
            .map(|r| r.round)
            .max()
            .unwrap();
        assert!(reports
            .iter()
            .filter(|r| r.round == last_round && r.pass != "readability" && r.pass != "grouping")
            .all(|r| !r.changed));
    }
}
