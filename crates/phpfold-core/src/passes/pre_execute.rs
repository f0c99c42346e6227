use phpfold_syntax::tree::{Callee, Literal, NodeKind};
use phpfold_syntax::{NodeId, Span, Tree};
use tracing::trace;

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::errors::TransformError;
use crate::sandbox::{Sandbox, SandboxContext};
use crate::value::{ArrayKey, Value};

/// Evaluates whitelisted pure calls whose arguments are already literal
/// (or arrays of literals) and replaces the call with its result. The
/// sandbox owns safety verification, the time cap, and memoization; a
/// refused or failed evaluation leaves the call untouched.
pub struct PreExecutePass;

impl Pass for PreExecutePass {
    fn name(&self) -> &'static str {
        "constant-pre-execution"
    }

    fn description(&self) -> &'static str {
        "Runs whitelisted pure calls on literal arguments in the sandbox"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.pre_execute
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut changed = false;
        let context = SandboxContext::new();
        for &root in ctx.roots.iter() {
            changed |= execute(ctx.tree, root, ctx.sandbox, &context);
        }
        Ok(changed)
    }
}

/// Post-order, so inner calls fold before the calls consuming them.
fn execute(tree: &mut Tree, id: NodeId, sandbox: &mut Sandbox, context: &SandboxContext) -> bool {
    let mut changed = false;
    for child in tree.children(id) {
        changed |= execute(tree, child, sandbox, context);
    }

    let name = match tree.kind(id) {
        NodeKind::Call {
            callee: Callee::Named(name),
            args,
        } if Sandbox::supports(name)
            && args.iter().all(|&arg| is_literal_like(tree, arg)) =>
        {
            name.clone()
        }
        _ => return changed,
    };

    let Some(value) = sandbox.evaluate(tree, id, context) else {
        return changed;
    };
    let Some(kind) = value_to_kind(tree, &value) else {
        return changed;
    };
    trace!("pre-executed {} into {:?}", name, value.type_name());
    tree.set_kind(id, kind);
    true
}

fn is_literal_like(tree: &Tree, id: NodeId) -> bool {
    match tree.kind(id) {
        NodeKind::Lit(_) => true,
        NodeKind::ArrayLit(items) => items.iter().all(|item| {
            item.key.map(|k| is_literal_like(tree, k)).unwrap_or(true)
                && is_literal_like(tree, item.value)
        }),
        _ => false,
    }
}

/// Turn a sandbox value back into tree form. Scalars become literals,
/// arrays become array literals with explicit keys.
fn value_to_kind(tree: &mut Tree, value: &Value) -> Option<NodeKind> {
    if let Some(lit) = value.to_literal() {
        return Some(NodeKind::Lit(lit));
    }
    let Value::Array(items) = value else {
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    let mut next_index: i64 = 0;
    for (key, item) in items {
        let item_kind = value_to_kind(tree, item)?;
        let value_id = tree.alloc(item_kind, Span::dummy());
        // Keys matching the running index stay implicit.
        let key_id = match key {
            ArrayKey::Int(i) if *i == next_index => {
                next_index += 1;
                None
            }
            ArrayKey::Int(i) => {
                next_index = i + 1;
                Some(tree.alloc(NodeKind::Lit(Literal::Int(*i)), Span::dummy()))
            }
            ArrayKey::Str(s) => Some(tree.alloc(
                NodeKind::Lit(Literal::String(s.clone())),
                Span::dummy(),
            )),
        };
        out.push(phpfold_syntax::tree::ArrayItem {
            key: key_id,
            value: value_id,
        });
    }
    Some(NodeKind::ArrayLit(out))
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn executed(src: &str) -> String {
        run_single_pass(src, &mut PreExecutePass)
    }

    #[test]
    fn test_pure_call_on_literals_folds() {
        assert_eq!(
            executed("<?php echo strtoupper('abc');"),
            "<?php\n\necho 'ABC';\n"
        );
        assert_eq!(executed("<?php echo strlen('hello');"), "<?php\n\necho 5;\n");
    }

    #[test]
    fn test_nested_calls_fold_inside_out() {
        assert_eq!(
            executed("<?php echo strlen(strtoupper('abc'));"),
            "<?php\n\necho 3;\n"
        );
    }

    #[test]
    fn test_non_literal_arguments_stay() {
        assert_eq!(
            executed("<?php echo strlen($s);"),
            "<?php\n\necho strlen($s);\n"
        );
    }

    #[test]
    fn test_unlisted_function_stays() {
        assert_eq!(
            executed("<?php echo file_get_contents('x');"),
            "<?php\n\necho file_get_contents('x');\n"
        );
    }

    #[test]
    fn test_array_result_materializes() {
        assert_eq!(
            executed("<?php $parts = explode('-', 'a-b');"),
            "<?php\n\n$parts = ['a', 'b'];\n"
        );
    }

    #[test]
    fn test_array_argument_folds() {
        assert_eq!(
            executed("<?php echo implode(',', ['a', 'b']);"),
            "<?php\n\necho 'a,b';\n"
        );
    }
}
