//! Side-effect classification.
//!
//! Every node maps to one [`EffectKind`]; kinds form a join-semilattice
//! with `Pure` as the identity and `Mixed` absorbing. Passes use the
//! classifier to decide what is safe to fold, reorder, or delete, so every
//! rule here errs on the conservative side: anything whose effects cannot
//! be proven is `Mixed`.

use phpfold_syntax::tree::{Callee, NodeKind};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Pure,
    Io,
    Database,
    Http,
    GlobalState,
    ExternalState,
    NonDeterministic,
    Mixed,
}

impl EffectKind {
    /// Join of two kinds: `Pure` is the identity, equal kinds join to
    /// themselves, distinct non-pure kinds join to `Mixed`.
    pub fn combine(self, other: EffectKind) -> EffectKind {
        match (self, other) {
            (EffectKind::Pure, x) | (x, EffectKind::Pure) => x,
            (EffectKind::Mixed, _) | (_, EffectKind::Mixed) => EffectKind::Mixed,
            (a, b) if a == b => a,
            _ => EffectKind::Mixed,
        }
    }

    pub fn is_pure(self) -> bool {
        self == EffectKind::Pure
    }

    pub fn label(self) -> &'static str {
        match self {
            EffectKind::Pure => "pure",
            EffectKind::Io => "io",
            EffectKind::Database => "database",
            EffectKind::Http => "http",
            EffectKind::GlobalState => "global_state",
            EffectKind::ExternalState => "external_state",
            EffectKind::NonDeterministic => "non_deterministic",
            EffectKind::Mixed => "mixed",
        }
    }
}

const IO_FUNCTIONS: &[&str] = &[
    "print",
    "printf",
    "vprintf",
    "print_r",
    "var_dump",
    "var_export",
    "fopen",
    "fclose",
    "fread",
    "fwrite",
    "fgets",
    "fputs",
    "fflush",
    "file_get_contents",
    "file_put_contents",
    "file_exists",
    "readfile",
    "unlink",
    "mkdir",
    "rmdir",
    "rename",
    "copy",
    "scandir",
    "touch",
    "error_log",
];

const DATABASE_FUNCTIONS: &[&str] = &[
    "mysqli_connect",
    "mysqli_close",
    "mysqli_query",
    "mysqli_prepare",
    "mysqli_fetch_assoc",
    "mysqli_fetch_row",
    "mysql_connect",
    "mysql_query",
    "pg_connect",
    "pg_query",
    "pg_fetch_assoc",
    "sqlite_open",
    "sqlite_query",
];

const HTTP_FUNCTIONS: &[&str] = &[
    "curl_init",
    "curl_setopt",
    "curl_exec",
    "curl_close",
    "header",
    "setcookie",
    "setrawcookie",
    "http_response_code",
    "fsockopen",
    "get_headers",
    "stream_context_create",
];

const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &[
    "rand",
    "mt_rand",
    "srand",
    "mt_srand",
    "random_int",
    "random_bytes",
    "array_rand",
    "shuffle",
    "uniqid",
    "time",
    "microtime",
    "hrtime",
    "date",
    "getmypid",
    "memory_get_usage",
];

const GLOBAL_STATE_FUNCTIONS: &[&str] = &[
    "define",
    "ini_set",
    "putenv",
    "setlocale",
    "error_reporting",
    "set_error_handler",
    "set_exception_handler",
    "register_shutdown_function",
    "spl_autoload_register",
    "session_start",
    "session_destroy",
    "extract",
];

/// Builtins whose result depends only on their arguments.
const PURE_FUNCTIONS: &[&str] = &[
    "strlen",
    "strtoupper",
    "strtolower",
    "ucfirst",
    "lcfirst",
    "ucwords",
    "trim",
    "ltrim",
    "rtrim",
    "substr",
    "strpos",
    "strrpos",
    "str_contains",
    "str_starts_with",
    "str_ends_with",
    "str_replace",
    "str_repeat",
    "str_pad",
    "str_split",
    "strrev",
    "sprintf",
    "number_format",
    "implode",
    "join",
    "explode",
    "abs",
    "max",
    "min",
    "round",
    "floor",
    "ceil",
    "sqrt",
    "pow",
    "intdiv",
    "fmod",
    "intval",
    "floatval",
    "strval",
    "boolval",
    "is_int",
    "is_float",
    "is_string",
    "is_bool",
    "is_array",
    "is_null",
    "is_numeric",
    "count",
    "sizeof",
    "array_merge",
    "array_keys",
    "array_values",
    "array_sum",
    "array_product",
    "array_reverse",
    "array_slice",
    "array_unique",
    "array_flip",
    "array_search",
    "in_array",
    "range",
    "json_encode",
    "json_decode",
    "htmlspecialchars",
    "htmlentities",
    "nl2br",
    "addslashes",
    "stripslashes",
    "md5",
    "sha1",
    "crc32",
    "base64_encode",
    "base64_decode",
    "urlencode",
    "urldecode",
    "http_build_query",
    "gettype",
    "chr",
    "ord",
    "bin2hex",
    "hex2bin",
    "dechex",
    "hexdec",
    "decbin",
    "bindec",
];

const EVAL_CONSTRUCTS: &[&str] = &["eval", "create_function"];

const SUPERGLOBALS: &[&str] = &[
    "_GET", "_POST", "_SERVER", "_COOKIE", "_SESSION", "_ENV", "_FILES", "_REQUEST", "GLOBALS",
];

/// Per-run classifier; the category tables are built once.
pub struct Classifier {
    io: FxHashSet<&'static str>,
    database: FxHashSet<&'static str>,
    http: FxHashSet<&'static str>,
    non_deterministic: FxHashSet<&'static str>,
    global_state: FxHashSet<&'static str>,
    pure: FxHashSet<&'static str>,
    eval_like: FxHashSet<&'static str>,
    superglobals: FxHashSet<&'static str>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Classifier {
            io: IO_FUNCTIONS.iter().copied().collect(),
            database: DATABASE_FUNCTIONS.iter().copied().collect(),
            http: HTTP_FUNCTIONS.iter().copied().collect(),
            non_deterministic: NON_DETERMINISTIC_FUNCTIONS.iter().copied().collect(),
            global_state: GLOBAL_STATE_FUNCTIONS.iter().copied().collect(),
            pure: PURE_FUNCTIONS.iter().copied().collect(),
            eval_like: EVAL_CONSTRUCTS.iter().copied().collect(),
            superglobals: SUPERGLOBALS.iter().copied().collect(),
        }
    }

    pub fn is_pure_builtin(&self, name: &str) -> bool {
        self.pure.contains(name.to_ascii_lowercase().as_str())
    }

    pub fn is_superglobal(&self, name: &str) -> bool {
        self.superglobals.contains(name)
    }

    /// Category of a call by function name alone, before argument effects
    /// are folded in.
    pub fn classify_call_name(&self, name: &str) -> EffectKind {
        let lower = name.to_ascii_lowercase();
        let key = lower.as_str();
        if self.eval_like.contains(key) {
            EffectKind::GlobalState
        } else if self.io.contains(key) {
            EffectKind::Io
        } else if self.database.contains(key) {
            EffectKind::Database
        } else if self.http.contains(key) {
            EffectKind::Http
        } else if self.non_deterministic.contains(key) {
            EffectKind::NonDeterministic
        } else if self.global_state.contains(key) {
            EffectKind::GlobalState
        } else if self.pure.contains(key) {
            EffectKind::Pure
        } else {
            // Unknown callables cannot be proven pure.
            EffectKind::Mixed
        }
    }

    pub fn classify(&self, tree: &Tree, id: NodeId) -> EffectKind {
        match tree.kind(id) {
            // Statement wrappers delegate to the inner expression.
            NodeKind::ExprStmt(e) => self.classify(tree, *e),
            NodeKind::Return(value) | NodeKind::Exit(value) => {
                let inner = value
                    .map(|v| self.classify(tree, v))
                    .unwrap_or(EffectKind::Pure);
                match tree.kind(id) {
                    // Output primitives are I/O even with a pure payload.
                    NodeKind::Exit(_) => EffectKind::Io.combine(inner),
                    _ => inner,
                }
            }
            NodeKind::Echo(args) => {
                args.iter().fold(EffectKind::Io, |acc, &a| {
                    acc.combine(self.classify(tree, a))
                })
            }

            NodeKind::Include { .. } => EffectKind::Mixed,

            NodeKind::Call { callee, args } => {
                let base = match callee {
                    Callee::Named(name) => self.classify_call_name(name),
                    Callee::Dynamic(_) => EffectKind::Mixed,
                };
                self.combine_children(tree, base, args)
            }
            // Receivers are unknown; cannot prove purity of the target.
            NodeKind::MethodCall { .. } | NodeKind::StaticCall { .. } | NodeKind::New { .. } => {
                EffectKind::Mixed
            }

            NodeKind::Variable(name) => {
                if self.is_superglobal(name) {
                    EffectKind::ExternalState
                } else {
                    EffectKind::Pure
                }
            }

            NodeKind::Assign { target, value, .. } => {
                let source = self.classify(tree, *value);
                if self.targets_external_state(tree, *target) {
                    EffectKind::ExternalState.combine(source)
                } else {
                    self.classify(tree, *target).combine(source)
                }
            }

            NodeKind::Global(_) => EffectKind::GlobalState,
            NodeKind::ConstDecl { value, .. } => {
                EffectKind::GlobalState.combine(self.classify(tree, *value))
            }

            // Declarations only register symbols when executed.
            NodeKind::FunctionDecl { .. } | NodeKind::ClassDecl { .. } => EffectKind::Pure,

            NodeKind::Throw(_) => EffectKind::Mixed,
            NodeKind::Try { .. } => self.combine_composite(tree, id),

            NodeKind::Block(_)
            | NodeKind::If { .. }
            | NodeKind::While { .. }
            | NodeKind::For { .. }
            | NodeKind::Foreach { .. }
            | NodeKind::Switch { .. }
            | NodeKind::Binary { .. }
            | NodeKind::Unary { .. }
            | NodeKind::Ternary { .. }
            | NodeKind::Interp(_)
            | NodeKind::ArrayLit(_)
            | NodeKind::Isset(_)
            | NodeKind::Empty(_)
            | NodeKind::Index { .. }
            | NodeKind::PropertyFetch { .. } => self.combine_composite(tree, id),

            NodeKind::Lit(_)
            | NodeKind::ConstFetch(_)
            | NodeKind::MagicDir
            | NodeKind::Break(_)
            | NodeKind::Continue(_)
            | NodeKind::Separator
            | NodeKind::Detached => EffectKind::Pure,
        }
    }

    /// Left-fold of `combine` over a statement sequence, short-circuiting
    /// once the result can no longer change.
    pub fn classify_block(&self, tree: &Tree, nodes: &[NodeId]) -> EffectKind {
        let mut acc = EffectKind::Pure;
        for &id in nodes {
            acc = acc.combine(self.classify(tree, id));
            if acc == EffectKind::Mixed {
                break;
            }
        }
        acc
    }

    fn combine_composite(&self, tree: &Tree, id: NodeId) -> EffectKind {
        self.combine_children(tree, EffectKind::Pure, &tree.children(id))
    }

    fn combine_children(&self, tree: &Tree, base: EffectKind, children: &[NodeId]) -> EffectKind {
        let mut acc = base;
        for &child in children {
            if acc == EffectKind::Mixed {
                break;
            }
            acc = acc.combine(self.classify(tree, child));
        }
        acc
    }

    /// Assignment target rooted at a superglobal.
    fn targets_external_state(&self, tree: &Tree, id: NodeId) -> bool {
        match tree.kind(id) {
            NodeKind::Variable(name) => self.is_superglobal(name),
            NodeKind::Index { array, .. } => self.targets_external_state(tree, *array),
            NodeKind::PropertyFetch { object, .. } => self.targets_external_state(tree, *object),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;

    fn classify_first(src: &str) -> EffectKind {
        let program = parse(src).unwrap();
        Classifier::new().classify(&program.tree, program.roots[0])
    }

    #[test]
    fn test_lattice_identity_and_absorption() {
        use EffectKind::*;
        assert_eq!(Pure.combine(Pure), Pure);
        for kind in [Pure, Io, Database, Http, GlobalState, ExternalState, NonDeterministic, Mixed]
        {
            assert_eq!(kind.combine(Mixed), Mixed);
            assert_eq!(Mixed.combine(kind), Mixed);
            assert_eq!(Pure.combine(kind), kind);
            assert_eq!(kind.combine(Pure), kind);
            assert_eq!(kind.combine(kind), kind);
        }
    }

    #[test]
    fn test_lattice_commutative_associative() {
        use EffectKind::*;
        let kinds = [Pure, Io, Database, Http, GlobalState, ExternalState, NonDeterministic, Mixed];
        for &a in &kinds {
            for &b in &kinds {
                assert_eq!(a.combine(b), b.combine(a));
                for &c in &kinds {
                    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
                }
            }
        }
    }

    #[test]
    fn test_distinct_nonpure_kinds_mix() {
        assert_eq!(
            EffectKind::Io.combine(EffectKind::Database),
            EffectKind::Mixed
        );
    }

    #[test]
    fn test_echo_is_io() {
        assert_eq!(classify_first("<?php echo 1 + 2;"), EffectKind::Io);
    }

    #[test]
    fn test_pure_arithmetic() {
        assert_eq!(classify_first("<?php $x = 1 + 2;"), EffectKind::Pure);
    }

    #[test]
    fn test_call_tables() {
        assert_eq!(classify_first("<?php rand();"), EffectKind::NonDeterministic);
        assert_eq!(classify_first("<?php mysqli_query($c, $q);"), EffectKind::Database);
        assert_eq!(classify_first("<?php curl_exec($h);"), EffectKind::Http);
        assert_eq!(classify_first("<?php strlen('abc');"), EffectKind::Pure);
        assert_eq!(classify_first("<?php unknown_fn();"), EffectKind::Mixed);
    }

    #[test]
    fn test_eval_is_global_state() {
        assert_eq!(classify_first("<?php eval($code);"), EffectKind::GlobalState);
    }

    #[test]
    fn test_dynamic_call_is_mixed() {
        assert_eq!(classify_first("<?php $f();"), EffectKind::Mixed);
        assert_eq!(classify_first("<?php $obj->run();"), EffectKind::Mixed);
    }

    #[test]
    fn test_superglobal_read_is_external() {
        assert_eq!(classify_first("<?php $x = $_GET['id'];"), EffectKind::ExternalState);
    }

    #[test]
    fn test_superglobal_write_dominates() {
        assert_eq!(
            classify_first("<?php $_SESSION['user'] = 'anna';"),
            EffectKind::ExternalState
        );
    }

    #[test]
    fn test_pure_call_with_impure_argument() {
        assert_eq!(classify_first("<?php strlen(rand());"), EffectKind::Mixed);
    }

    #[test]
    fn test_include_is_mixed() {
        assert_eq!(classify_first("<?php include $path;"), EffectKind::Mixed);
    }

    #[test]
    fn test_composite_short_circuit() {
        // A mixed child poisons the whole statement.
        assert_eq!(
            classify_first("<?php if (unknown_fn()) { echo 1; }"),
            EffectKind::Mixed
        );
    }

    #[test]
    fn test_classify_block_folds() {
        let program = parse("<?php $a = 1; echo $a;").unwrap();
        let classifier = Classifier::new();
        assert_eq!(
            classifier.classify_block(&program.tree, &program.roots),
            EffectKind::Io
        );
    }
}
