use std::sync::Arc;

use indoc::indoc;
use phpfold_core::{CollectingDiagnosticHandler, OptimizerConfig, Pipeline, TransformError};

fn optimize(source: &str) -> String {
    let mut pipeline = Pipeline::new(
        OptimizerConfig::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
    );
    pipeline.run_source(source).expect("pipeline succeeds")
}

// ============================================================================
// Semantic folding
// ============================================================================

#[test]
fn test_literal_arithmetic_folds_to_echo() {
    assert_eq!(optimize("<?php $a = 5; $b = 10; echo $a + $b;"), "<?php\n\necho 15;\n");
}

#[test]
fn test_operator_precedence_respected() {
    assert_eq!(optimize("<?php echo 2 + 3 * 4;"), "<?php\n\necho 14;\n");
}

#[test]
fn test_bool_concat_semantics() {
    assert_eq!(optimize("<?php echo true . 'x';"), "<?php\n\necho '1x';\n");
    assert_eq!(optimize("<?php echo false . 'x';"), "<?php\n\necho 'x';\n");
}

#[test]
fn test_division_by_zero_does_not_abort() {
    let out = optimize("<?php echo 10 / 0;");
    assert!(out.contains("10 / 0"), "{out}");
}

#[test]
fn test_string_concat_chain_folds() {
    assert_eq!(
        optimize("<?php $name = 'World'; echo 'Hello ' . $name . '!';"),
        "<?php\n\necho 'Hello World!';\n"
    );
}

#[test]
fn test_consecutive_echoes_collapse() {
    assert_eq!(optimize("<?php echo 'a'; echo 'b';"), "<?php\n\necho 'ab';\n");
}

#[test]
fn test_single_return_function_inlines_away() {
    assert_eq!(
        optimize("<?php function add($a, $b) { return $a + $b; } echo add(2, 3);"),
        "<?php\n\necho 5;\n"
    );
}

#[test]
fn test_pre_execution_folds_pure_builtin() {
    assert_eq!(
        optimize("<?php echo strtoupper('abc') . '!';"),
        "<?php\n\necho 'ABC!';\n"
    );
}

#[test]
fn test_isset_rewrites_to_coalesce() {
    let out = optimize("<?php $x = 'd'; if (isset($v)) { $x = $v; } echo $x;");
    assert!(out.contains("$x = $v ?? 'd';"), "{out}");
    assert!(!out.contains("isset"), "{out}");
}

#[test]
fn test_single_use_inlining_preserves_expression() {
    assert_eq!(
        optimize("<?php $t = $a * 2; echo $t;"),
        "<?php\n\necho $a * 2;\n"
    );
}

#[test]
fn test_self_reference_is_not_inlined() {
    let out = optimize("<?php $x = $x + 1; echo $x;");
    assert!(out.contains("$x = $x + 1;"), "{out}");
    assert!(out.contains("echo $x;"), "{out}");
}

#[test]
fn test_class_instance_flattens_completely() {
    let out = optimize(
        "<?php class Point { public $x; function __construct($x) { $this->x = $x; } function getX() { return $this->x; } } $p = new Point(4); echo $p->getX();",
    );
    assert_eq!(out, "<?php\n\necho 4;\n");
}

#[test]
fn test_impure_calls_survive() {
    let out = optimize("<?php $data = file_get_contents('config.json'); echo $data;");
    assert!(out.contains("file_get_contents('config.json')"), "{out}");
}

// ============================================================================
// Idempotence and convergence
// ============================================================================

#[test]
fn test_pipeline_is_idempotent_on_folded_output() {
    let sources = [
        "<?php $a = 5; $b = 10; echo $a + $b;",
        "<?php function add($a, $b) { return $a + $b; } echo add(2, 3);",
        "<?php $x = 'd'; if (isset($v)) { $x = $v; } echo $x;",
        "<?php echo strlen($a ? 'x' : 'yy');",
        "<?php $n = rand(); echo $n; echo $n;",
    ];
    for source in sources {
        let once = optimize(source);
        let twice = optimize(&once);
        assert_eq!(once, twice, "not idempotent for {source}");
    }
}

#[test]
fn test_readability_extraction_is_stable() {
    let out = optimize("<?php echo strlen($a ? 'x' : 'yy');");
    assert!(out.contains("$tmp0 = $a ? 'x' : 'yy';"), "{out}");
    assert!(out.contains("echo strlen($tmp0);"), "{out}");
    assert_eq!(optimize(&out), out);
}

#[test]
fn test_bounded_convergence_on_larger_program() {
    let source = indoc! {"
        <?php
        function base() { return 1; }
        function middle($n) { return $n + base(); }
        $a = 1;
        $b = $a + 1;
        $c = $b * 2;
        if ($c > 3) {
            echo middle($c);
        } else {
            echo 'small';
        }
        echo 'done';
    "};
    let mut pipeline = Pipeline::new(
        OptimizerConfig::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
    );
    let out = pipeline.run_source(source).unwrap();
    assert!(!pipeline.still_changing, "must converge inside the cap");
    // And the result itself is stable.
    assert_eq!(pipeline.run_source(&out).unwrap(), out);
}

#[test]
fn test_round_cap_is_respected() {
    let mut config = OptimizerConfig::default();
    config.optimizer_options.max_rounds = 1;
    let mut pipeline = Pipeline::new(config, Arc::new(CollectingDiagnosticHandler::new()));
    // One round is not enough to finish this chain, so the flag trips
    // instead of looping.
    let out = pipeline
        .run_source("<?php $a = 1; $b = $a + 1; $c = $b + 1; echo $c;")
        .unwrap();
    assert!(pipeline.still_changing);
    assert!(out.contains("echo"), "{out}");
}

// ============================================================================
// Degradation
// ============================================================================

#[test]
fn test_unparseable_source_is_the_only_fatal_case() {
    let mut pipeline = Pipeline::new(
        OptimizerConfig::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
    );
    let err = pipeline.run_source("<?php class {").unwrap_err();
    assert!(matches!(err, TransformError::EntryUnparseable { .. }));
}

#[test]
fn test_unknown_constructs_pass_through() {
    let source = "<?php $obj->mystery($arg); echo $obj->field; thing::stat();";
    let out = optimize(source);
    assert!(out.contains("$obj->mystery($arg);"), "{out}");
    assert!(out.contains("echo $obj->field;"), "{out}");
    assert!(out.contains("thing::stat();"), "{out}");
}

#[test]
fn test_comments_are_stripped_by_default() {
    let out = optimize("<?php // header comment\n$a = 1; /* inline */ echo $a;");
    assert!(!out.contains("header comment"), "{out}");
    assert!(!out.contains("inline"), "{out}");
}

#[test]
fn test_comments_kept_when_disabled() {
    let mut config = OptimizerConfig::default();
    config.optimizer_options.strip_comments = false;
    let mut pipeline = Pipeline::new(config, Arc::new(CollectingDiagnosticHandler::new()));
    let out = pipeline
        .run_source("<?php // keep me\nuntouchable();")
        .unwrap();
    assert!(out.contains("// keep me"), "{out}");
}
