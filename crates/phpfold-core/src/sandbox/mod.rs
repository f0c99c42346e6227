//! Restricted compile-time evaluator.
//!
//! The pre-execution pass hands this module expressions built from scalar
//! literals, context variables, and calls to a fixed table of pure
//! builtins. `verify` walks the expression first and rejects anything
//! outside that language (eval/include/exit/shell constructs, unknown
//! calls, assignments); evaluation then runs under a wall-clock deadline
//! with bounded allocation. Results are memoized in a bounded LRU cache;
//! errors and timeouts are never cached.

mod cache;

pub use cache::{CacheStats, ExecutionCache};

use std::time::{Duration, Instant};

use phpfold_syntax::printer::print_expression;
use phpfold_syntax::tree::{BinaryOp, Callee, Literal, NodeKind};
use phpfold_syntax::{NodeId, Tree};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::SandboxOptions;
use crate::value::{
    self, arithmetic, bitwise, compare, concat, loose_equals, normalize_array_key, strict_equals,
    ArrayKey, Value,
};

/// String bytes a single builtin call may produce.
const MAX_STRING_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// The expression contains a construct the sandbox refuses to touch.
    /// Callers treat this as "not evaluable", not as a user-facing error.
    #[error("unsafe construct: {0}")]
    Unsafe(String),

    #[error("evaluation failed: {0}")]
    Runtime(String),

    #[error("evaluation exceeded the time cap")]
    Timeout,
}

/// Flat name-to-value bindings passed into an evaluation. Only scalars and
/// arrays of scalars are accepted; anything else is dropped on insert.
#[derive(Debug, Default, Clone)]
pub struct SandboxContext {
    vars: FxHashMap<String, Value>,
}

impl SandboxContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        if context_safe(&value) {
            self.vars.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn cache_key(&self) -> String {
        let mut entries: Vec<(&String, &Value)> = self.vars.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .iter()
            .map(|(name, value)| format!("{name}={}", value.cache_key()))
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn context_safe(value: &Value) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .all(|(_, v)| !matches!(v, Value::Array(_))),
        _ => true,
    }
}

/// Constructs rejected by name even before the whitelist check.
const BLACKLIST: &[&str] = &[
    "eval",
    "create_function",
    "exec",
    "shell_exec",
    "system",
    "passthru",
    "proc_open",
    "popen",
    "assert",
    "unset",
];

pub struct Sandbox {
    cache: ExecutionCache,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(options: &SandboxOptions) -> Self {
        Sandbox {
            cache: ExecutionCache::new(options.cache_capacity),
            timeout: Duration::from_millis(options.timeout_ms),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Whether `name` is a builtin this sandbox can run.
    pub fn supports(name: &str) -> bool {
        builtin_supported(&name.to_ascii_lowercase())
    }

    /// Evaluate a node under the context. Typed errors distinguish safety
    /// rejections from runtime failures; both leave the node unmodified at
    /// the call site.
    pub fn execute(
        &mut self,
        tree: &Tree,
        id: NodeId,
        context: &SandboxContext,
    ) -> Result<Value, SandboxError> {
        let key = format!("{}|{}", print_expression(tree, id), context.cache_key());
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }
        self.verify(tree, id, context)?;
        let deadline = Instant::now() + self.timeout;
        let value = self.eval(tree, id, context, deadline)?;
        // Only successful results are cached; errors re-attempt next time.
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Convenience for passes: any failure becomes `None`.
    pub fn evaluate(&mut self, tree: &Tree, id: NodeId, context: &SandboxContext) -> Option<Value> {
        match self.execute(tree, id, context) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("sandbox refused {}: {err}", print_expression(tree, id));
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Safety verification
    // ------------------------------------------------------------------

    fn verify(
        &self,
        tree: &Tree,
        id: NodeId,
        context: &SandboxContext,
    ) -> Result<(), SandboxError> {
        match tree.kind(id) {
            NodeKind::Lit(_) | NodeKind::ConstFetch(_) | NodeKind::MagicDir => Ok(()),
            NodeKind::Variable(name) => {
                if context.get(name).is_some() {
                    Ok(())
                } else {
                    Err(SandboxError::Unsafe(format!("unbound variable ${name}")))
                }
            }
            NodeKind::Interp(parts) => {
                for &part in parts {
                    self.verify(tree, part, context)?;
                }
                Ok(())
            }
            NodeKind::ArrayLit(items) => {
                for item in items {
                    if let Some(key) = item.key {
                        self.verify(tree, key, context)?;
                    }
                    self.verify(tree, item.value, context)?;
                }
                Ok(())
            }
            NodeKind::Unary { operand, .. } => self.verify(tree, *operand, context),
            NodeKind::Binary { lhs, rhs, .. } => {
                self.verify(tree, *lhs, context)?;
                self.verify(tree, *rhs, context)
            }
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.verify(tree, *cond, context)?;
                if let Some(t) = then_branch {
                    self.verify(tree, *t, context)?;
                }
                self.verify(tree, *else_branch, context)
            }
            NodeKind::Index { array, index } => {
                self.verify(tree, *array, context)?;
                match index {
                    Some(i) => self.verify(tree, *i, context),
                    None => Err(SandboxError::Unsafe("array append in expression".into())),
                }
            }
            NodeKind::Isset(args) => {
                for &arg in args {
                    // isset may name unbound variables; only the shape is
                    // checked.
                    match tree.kind(arg) {
                        NodeKind::Variable(_) | NodeKind::Index { .. } => {}
                        _ => {
                            return Err(SandboxError::Unsafe(
                                "isset over a non-variable".into(),
                            ))
                        }
                    }
                }
                Ok(())
            }
            NodeKind::Empty(arg) => match tree.kind(*arg) {
                NodeKind::Variable(_) | NodeKind::Index { .. } => Ok(()),
                _ => Err(SandboxError::Unsafe("empty over a non-variable".into())),
            },
            NodeKind::Call { callee, args } => {
                let Callee::Named(name) = callee else {
                    return Err(SandboxError::Unsafe("dynamic call".into()));
                };
                let lower = name.to_ascii_lowercase();
                if BLACKLIST.contains(&lower.as_str()) {
                    return Err(SandboxError::Unsafe(format!("blacklisted call {name}")));
                }
                if !builtin_supported(&lower) {
                    return Err(SandboxError::Unsafe(format!("unsupported call {name}")));
                }
                for &arg in args {
                    self.verify(tree, arg, context)?;
                }
                Ok(())
            }
            NodeKind::Include { .. } => Err(SandboxError::Unsafe("include".into())),
            NodeKind::Exit(_) => Err(SandboxError::Unsafe("exit".into())),
            other => Err(SandboxError::Unsafe(format!(
                "disallowed construct {}",
                other.name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    fn eval(
        &self,
        tree: &Tree,
        id: NodeId,
        context: &SandboxContext,
        deadline: Instant,
    ) -> Result<Value, SandboxError> {
        if Instant::now() >= deadline {
            return Err(SandboxError::Timeout);
        }
        match tree.kind(id) {
            NodeKind::Lit(lit) => Ok(Value::from_literal(lit)),
            NodeKind::Variable(name) => context
                .get(name)
                .cloned()
                .ok_or_else(|| SandboxError::Runtime(format!("undefined variable ${name}"))),
            NodeKind::ConstFetch(name) => builtin_constant(name)
                .ok_or_else(|| SandboxError::Runtime(format!("unknown constant {name}"))),
            NodeKind::MagicDir => Err(SandboxError::Runtime(
                "__DIR__ has no value in the sandbox".into(),
            )),
            NodeKind::Interp(parts) => {
                let mut out = String::new();
                for &part in parts {
                    let piece = self.eval(tree, part, context, deadline)?;
                    let text = piece
                        .to_php_string()
                        .ok_or_else(|| SandboxError::Runtime("array in string".into()))?;
                    out.push_str(&text);
                    if out.len() > MAX_STRING_BYTES {
                        return Err(SandboxError::Runtime("string too large".into()));
                    }
                }
                Ok(Value::Str(out))
            }
            NodeKind::ArrayLit(items) => {
                let mut entries: Vec<(ArrayKey, Value)> = Vec::new();
                let mut next_index: i64 = 0;
                for item in items {
                    let value = self.eval(tree, item.value, context, deadline)?;
                    let key = match item.key {
                        Some(key_id) => {
                            let key_value = self.eval(tree, key_id, context, deadline)?;
                            let key = normalize_array_key(&key_value).ok_or_else(|| {
                                SandboxError::Runtime("invalid array key".into())
                            })?;
                            if let ArrayKey::Int(i) = key {
                                next_index = next_index.max(i + 1);
                            }
                            key
                        }
                        None => {
                            let key = ArrayKey::Int(next_index);
                            next_index += 1;
                            key
                        }
                    };
                    entries.retain(|(existing, _)| *existing != key);
                    entries.push((key, value));
                }
                Ok(Value::Array(entries))
            }
            NodeKind::Unary { op, operand } => {
                let operand = self.eval(tree, *operand, context, deadline)?;
                value::unary(*op, &operand)
                    .ok_or_else(|| SandboxError::Runtime("unsupported unary operand".into()))
            }
            NodeKind::Binary { op, lhs, rhs } => self.eval_binary(tree, *op, *lhs, *rhs, context, deadline),
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_value = self.eval(tree, *cond, context, deadline)?;
                if cond_value.truthy() {
                    match then_branch {
                        Some(t) => self.eval(tree, *t, context, deadline),
                        None => Ok(cond_value),
                    }
                } else {
                    self.eval(tree, *else_branch, context, deadline)
                }
            }
            NodeKind::Index { array, index } => {
                let array_value = self.eval(tree, *array, context, deadline)?;
                let index_id = index.ok_or_else(|| {
                    SandboxError::Runtime("array append in expression".into())
                })?;
                let key_value = self.eval(tree, index_id, context, deadline)?;
                let key = normalize_array_key(&key_value)
                    .ok_or_else(|| SandboxError::Runtime("invalid array key".into()))?;
                match array_value {
                    Value::Array(items) => Ok(items
                        .into_iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v)
                        .unwrap_or(Value::Null)),
                    Value::Str(s) => match key {
                        ArrayKey::Int(i) if i >= 0 && (i as usize) < s.len() => {
                            Ok(Value::Str(s[i as usize..i as usize + 1].to_string()))
                        }
                        _ => Ok(Value::Str(String::new())),
                    },
                    _ => Ok(Value::Null),
                }
            }
            NodeKind::Isset(args) => {
                for &arg in args {
                    if !self.eval_isset(tree, arg, context, deadline)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            NodeKind::Empty(arg) => {
                let set = self.eval_isset(tree, *arg, context, deadline)?;
                if !set {
                    return Ok(Value::Bool(true));
                }
                let value = self.eval(tree, *arg, context, deadline)?;
                Ok(Value::Bool(!value.truthy()))
            }
            NodeKind::Call { callee, args } => {
                let Callee::Named(name) = callee else {
                    return Err(SandboxError::Runtime("dynamic call".into()));
                };
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.eval(tree, arg, context, deadline)?);
                }
                call_builtin(&name.to_ascii_lowercase(), &values, deadline)
            }
            other => Err(SandboxError::Runtime(format!(
                "unsupported construct {}",
                other.name()
            ))),
        }
    }

    fn eval_binary(
        &self,
        tree: &Tree,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        context: &SandboxContext,
        deadline: Instant,
    ) -> Result<Value, SandboxError> {
        // Short-circuit forms evaluate the right side lazily.
        match op {
            BinaryOp::And => {
                let left = self.eval(tree, lhs, context, deadline)?;
                if !left.truthy() {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(tree, rhs, context, deadline)?;
                return Ok(Value::Bool(right.truthy()));
            }
            BinaryOp::Or => {
                let left = self.eval(tree, lhs, context, deadline)?;
                if left.truthy() {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(tree, rhs, context, deadline)?;
                return Ok(Value::Bool(right.truthy()));
            }
            BinaryOp::Coalesce => {
                let left = self.eval(tree, lhs, context, deadline)?;
                if !matches!(left, Value::Null) {
                    return Ok(left);
                }
                return self.eval(tree, rhs, context, deadline);
            }
            _ => {}
        }

        let left = self.eval(tree, lhs, context, deadline)?;
        let right = self.eval(tree, rhs, context, deadline)?;
        let unsupported = || SandboxError::Runtime("unsupported operands".into());
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
            | BinaryOp::Pow => arithmetic(op, &left, &right).ok_or_else(unsupported),
            BinaryOp::Concat => {
                let result = concat(&left, &right).ok_or_else(unsupported)?;
                if let Value::Str(s) = &result {
                    if s.len() > MAX_STRING_BYTES {
                        return Err(SandboxError::Runtime("string too large".into()));
                    }
                }
                Ok(result)
            }
            BinaryOp::Equal => loose_equals(&left, &right)
                .map(Value::Bool)
                .ok_or_else(unsupported),
            BinaryOp::NotEqual => loose_equals(&left, &right)
                .map(|b| Value::Bool(!b))
                .ok_or_else(unsupported),
            BinaryOp::Identical => Ok(Value::Bool(strict_equals(&left, &right))),
            BinaryOp::NotIdentical => Ok(Value::Bool(!strict_equals(&left, &right))),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                compare(op, &left, &right)
                    .map(Value::Bool)
                    .ok_or_else(unsupported)
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::ShiftLeft
            | BinaryOp::ShiftRight => bitwise(op, &left, &right).ok_or_else(unsupported),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!("handled above"),
        }
    }

    fn eval_isset(
        &self,
        tree: &Tree,
        id: NodeId,
        context: &SandboxContext,
        deadline: Instant,
    ) -> Result<bool, SandboxError> {
        match tree.kind(id) {
            NodeKind::Variable(name) => {
                Ok(!matches!(context.get(name), None | Some(Value::Null)))
            }
            NodeKind::Index { array, index } => {
                let Some(index_id) = index else {
                    return Ok(false);
                };
                let array_value = self.eval(tree, *array, context, deadline)?;
                let key_value = self.eval(tree, *index_id, context, deadline)?;
                let Some(key) = normalize_array_key(&key_value) else {
                    return Ok(false);
                };
                match array_value {
                    Value::Array(items) => Ok(items
                        .iter()
                        .any(|(k, v)| *k == key && !matches!(v, Value::Null))),
                    _ => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }
}

// ----------------------------------------------------------------------
// Builtin table
// ----------------------------------------------------------------------

fn builtin_constant(name: &str) -> Option<Value> {
    match name {
        "PHP_EOL" => Some(Value::Str("\n".to_string())),
        "PHP_INT_MAX" => Some(Value::Int(i64::MAX)),
        "PHP_INT_MIN" => Some(Value::Int(i64::MIN)),
        "PHP_INT_SIZE" => Some(Value::Int(8)),
        "PHP_FLOAT_EPSILON" => Some(Value::Float(f64::EPSILON)),
        "M_PI" => Some(Value::Float(std::f64::consts::PI)),
        "M_E" => Some(Value::Float(std::f64::consts::E)),
        _ => None,
    }
}

fn builtin_supported(name: &str) -> bool {
    matches!(
        name,
        "strlen"
            | "strtoupper"
            | "strtolower"
            | "ucfirst"
            | "lcfirst"
            | "trim"
            | "ltrim"
            | "rtrim"
            | "substr"
            | "strpos"
            | "str_contains"
            | "str_replace"
            | "str_repeat"
            | "strrev"
            | "sprintf"
            | "implode"
            | "join"
            | "explode"
            | "number_format"
            | "abs"
            | "max"
            | "min"
            | "round"
            | "floor"
            | "ceil"
            | "sqrt"
            | "pow"
            | "intdiv"
            | "intval"
            | "floatval"
            | "strval"
            | "boolval"
            | "count"
            | "sizeof"
            | "in_array"
            | "array_sum"
            | "array_keys"
            | "array_values"
            | "array_merge"
            | "chr"
            | "ord"
    )
}

fn arg(values: &[Value], index: usize) -> Result<&Value, SandboxError> {
    values
        .get(index)
        .ok_or_else(|| SandboxError::Runtime(format!("missing argument {index}")))
}

fn arg_str(values: &[Value], index: usize) -> Result<String, SandboxError> {
    arg(values, index)?
        .to_php_string()
        .ok_or_else(|| SandboxError::Runtime("expected string argument".into()))
}

fn arg_int(values: &[Value], index: usize) -> Result<i64, SandboxError> {
    match arg(values, index)? {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Null => Ok(0),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| SandboxError::Runtime("expected int argument".into())),
        Value::Array(_) => Err(SandboxError::Runtime("expected int argument".into())),
    }
}

fn arg_f64(values: &[Value], index: usize) -> Result<f64, SandboxError> {
    match arg(values, index)? {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        Value::Null => Ok(0.0),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| SandboxError::Runtime("expected float argument".into())),
        Value::Array(_) => Err(SandboxError::Runtime("expected float argument".into())),
    }
}

fn call_builtin(name: &str, values: &[Value], deadline: Instant) -> Result<Value, SandboxError> {
    if Instant::now() >= deadline {
        return Err(SandboxError::Timeout);
    }
    match name {
        "strlen" => Ok(Value::Int(arg_str(values, 0)?.len() as i64)),
        "strtoupper" => Ok(Value::Str(arg_str(values, 0)?.to_uppercase())),
        "strtolower" => Ok(Value::Str(arg_str(values, 0)?.to_lowercase())),
        "ucfirst" => {
            let s = arg_str(values, 0)?;
            let mut chars = s.chars();
            Ok(Value::Str(match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => s,
            }))
        }
        "lcfirst" => {
            let s = arg_str(values, 0)?;
            let mut chars = s.chars();
            Ok(Value::Str(match chars.next() {
                Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
                None => s,
            }))
        }
        "trim" => Ok(Value::Str(php_trim(&arg_str(values, 0)?, true, true))),
        "ltrim" => Ok(Value::Str(php_trim(&arg_str(values, 0)?, true, false))),
        "rtrim" => Ok(Value::Str(php_trim(&arg_str(values, 0)?, false, true))),
        "substr" => {
            let s = arg_str(values, 0)?;
            let len = s.len() as i64;
            let mut start = arg_int(values, 1)?;
            if start < 0 {
                start = (len + start).max(0);
            }
            let start = start.min(len) as usize;
            let take = match values.get(2) {
                Some(_) => {
                    let requested = arg_int(values, 2)?;
                    if requested < 0 {
                        ((len - start as i64) + requested).max(0) as usize
                    } else {
                        requested as usize
                    }
                }
                None => s.len() - start,
            };
            Ok(Value::Str(
                s.get(start..(start + take).min(s.len()))
                    .unwrap_or("")
                    .to_string(),
            ))
        }
        "strpos" => {
            let haystack = arg_str(values, 0)?;
            let needle = arg_str(values, 1)?;
            match haystack.find(&needle) {
                Some(pos) => Ok(Value::Int(pos as i64)),
                None => Ok(Value::Bool(false)),
            }
        }
        "str_contains" => {
            let haystack = arg_str(values, 0)?;
            let needle = arg_str(values, 1)?;
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        "str_replace" => {
            let search = arg_str(values, 0)?;
            let replace = arg_str(values, 1)?;
            let subject = arg_str(values, 2)?;
            let result = subject.replace(&search, &replace);
            if result.len() > MAX_STRING_BYTES {
                return Err(SandboxError::Runtime("string too large".into()));
            }
            Ok(Value::Str(result))
        }
        "str_repeat" => {
            let s = arg_str(values, 0)?;
            let times = arg_int(values, 1)?;
            if times < 0 {
                return Err(SandboxError::Runtime("negative repeat count".into()));
            }
            let total = s.len().saturating_mul(times as usize);
            if total > MAX_STRING_BYTES {
                return Err(SandboxError::Runtime("string too large".into()));
            }
            Ok(Value::Str(s.repeat(times as usize)))
        }
        "strrev" => Ok(Value::Str(arg_str(values, 0)?.chars().rev().collect())),
        "sprintf" => sprintf(values),
        "implode" | "join" => {
            // implode(glue, array) or implode(array)
            let (glue, items) = match (values.first(), values.get(1)) {
                (Some(Value::Array(items)), None) => (String::new(), items),
                (Some(_), Some(Value::Array(items))) => (arg_str(values, 0)?, items),
                _ => return Err(SandboxError::Runtime("implode expects an array".into())),
            };
            let mut pieces = Vec::with_capacity(items.len());
            for (_, v) in items {
                pieces.push(v.to_php_string().ok_or_else(|| {
                    SandboxError::Runtime("array element not stringable".into())
                })?);
            }
            let result = pieces.join(&glue);
            if result.len() > MAX_STRING_BYTES {
                return Err(SandboxError::Runtime("string too large".into()));
            }
            Ok(Value::Str(result))
        }
        "explode" => {
            let delim = arg_str(values, 0)?;
            let subject = arg_str(values, 1)?;
            if delim.is_empty() {
                return Err(SandboxError::Runtime("empty delimiter".into()));
            }
            Ok(Value::Array(
                subject
                    .split(&delim)
                    .enumerate()
                    .map(|(i, part)| (ArrayKey::Int(i as i64), Value::Str(part.to_string())))
                    .collect(),
            ))
        }
        "number_format" => {
            let number = arg_f64(values, 0)?;
            let decimals = match values.get(1) {
                Some(_) => arg_int(values, 1)?.clamp(0, 32) as usize,
                None => 0,
            };
            let formatted = format!("{number:.decimals$}");
            let (int_part, frac_part) = match formatted.split_once('.') {
                Some((i, f)) => (i.to_string(), Some(f.to_string())),
                None => (formatted, None),
            };
            let negative = int_part.starts_with('-');
            let digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
            let mut grouped = String::new();
            for (i, c) in digits.chars().enumerate() {
                if i > 0 && (digits.len() - i) % 3 == 0 {
                    grouped.push(',');
                }
                grouped.push(c);
            }
            let mut out = String::new();
            if negative {
                out.push('-');
            }
            out.push_str(&grouped);
            if let Some(frac) = frac_part {
                out.push('.');
                out.push_str(&frac);
            }
            Ok(Value::Str(out))
        }
        "abs" => match arg(values, 0)? {
            Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            _ => Ok(Value::Float(arg_f64(values, 0)?.abs())),
        },
        "max" | "min" => {
            let candidates: Vec<Value> = match values {
                [Value::Array(items)] => items.iter().map(|(_, v)| v.clone()).collect(),
                _ => values.to_vec(),
            };
            if candidates.is_empty() {
                return Err(SandboxError::Runtime("empty argument list".into()));
            }
            let mut best = candidates[0].clone();
            for candidate in &candidates[1..] {
                let is_greater = compare(BinaryOp::Greater, candidate, &best)
                    .ok_or_else(|| SandboxError::Runtime("uncomparable values".into()))?;
                let better = if name == "max" {
                    is_greater
                } else {
                    compare(BinaryOp::Less, candidate, &best)
                        .ok_or_else(|| SandboxError::Runtime("uncomparable values".into()))?
                };
                if better {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        "round" => {
            let number = arg_f64(values, 0)?;
            let precision = match values.get(1) {
                Some(_) => arg_int(values, 1)?.clamp(-32, 32),
                None => 0,
            };
            let factor = 10f64.powi(precision as i32);
            Ok(Value::Float((number * factor).round() / factor))
        }
        "floor" => Ok(Value::Float(arg_f64(values, 0)?.floor())),
        "ceil" => Ok(Value::Float(arg_f64(values, 0)?.ceil())),
        "sqrt" => Ok(Value::Float(arg_f64(values, 0)?.sqrt())),
        "pow" => arithmetic(BinaryOp::Pow, arg(values, 0)?, arg(values, 1)?)
            .ok_or_else(|| SandboxError::Runtime("invalid operands".into())),
        "intdiv" => {
            let a = arg_int(values, 0)?;
            let b = arg_int(values, 1)?;
            if b == 0 {
                return Err(SandboxError::Runtime("division by zero".into()));
            }
            Ok(Value::Int(a.wrapping_div(b)))
        }
        "intval" => match arg(values, 0)? {
            Value::Str(s) => Ok(Value::Int(leading_int(s))),
            other => {
                let f = match other {
                    Value::Float(f) => *f,
                    Value::Int(i) => return Ok(Value::Int(*i)),
                    Value::Bool(b) => return Ok(Value::Int(i64::from(*b))),
                    Value::Null => return Ok(Value::Int(0)),
                    _ => return Err(SandboxError::Runtime("cannot convert to int".into())),
                };
                Ok(Value::Int(f as i64))
            }
        },
        "floatval" => Ok(Value::Float(match arg(values, 0)? {
            Value::Str(s) => leading_float(s),
            _ => arg_f64(values, 0)?,
        })),
        "strval" => Ok(Value::Str(arg_str(values, 0)?)),
        "boolval" => Ok(Value::Bool(arg(values, 0)?.truthy())),
        "count" | "sizeof" => match arg(values, 0)? {
            Value::Array(items) => Ok(Value::Int(items.len() as i64)),
            Value::Null => Ok(Value::Int(0)),
            _ => Ok(Value::Int(1)),
        },
        "in_array" => {
            let needle = arg(values, 0)?;
            let Value::Array(items) = arg(values, 1)? else {
                return Err(SandboxError::Runtime("in_array expects an array".into()));
            };
            let strict = values
                .get(2)
                .map(|v| v.truthy())
                .unwrap_or(false);
            for (_, candidate) in items {
                let hit = if strict {
                    strict_equals(candidate, needle)
                } else {
                    loose_equals(candidate, needle).unwrap_or(false)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "array_sum" => {
            let Value::Array(items) = arg(values, 0)? else {
                return Err(SandboxError::Runtime("array_sum expects an array".into()));
            };
            let mut acc = Value::Int(0);
            for (_, v) in items {
                acc = arithmetic(BinaryOp::Add, &acc, v)
                    .ok_or_else(|| SandboxError::Runtime("non-numeric element".into()))?;
            }
            Ok(acc)
        }
        "array_keys" => {
            let Value::Array(items) = arg(values, 0)? else {
                return Err(SandboxError::Runtime("array_keys expects an array".into()));
            };
            Ok(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, (k, _))| {
                        let key_value = match k {
                            ArrayKey::Int(n) => Value::Int(*n),
                            ArrayKey::Str(s) => Value::Str(s.clone()),
                        };
                        (ArrayKey::Int(i as i64), key_value)
                    })
                    .collect(),
            ))
        }
        "array_values" => {
            let Value::Array(items) = arg(values, 0)? else {
                return Err(SandboxError::Runtime("array_values expects an array".into()));
            };
            Ok(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, (_, v))| (ArrayKey::Int(i as i64), v.clone()))
                    .collect(),
            ))
        }
        "array_merge" => {
            let mut merged: Vec<(ArrayKey, Value)> = Vec::new();
            let mut next_index: i64 = 0;
            for value in values {
                let Value::Array(items) = value else {
                    return Err(SandboxError::Runtime("array_merge expects arrays".into()));
                };
                for (key, v) in items {
                    match key {
                        ArrayKey::Int(_) => {
                            merged.push((ArrayKey::Int(next_index), v.clone()));
                            next_index += 1;
                        }
                        ArrayKey::Str(s) => {
                            merged.retain(|(k, _)| k != &ArrayKey::Str(s.clone()));
                            merged.push((ArrayKey::Str(s.clone()), v.clone()));
                        }
                    }
                }
            }
            Ok(Value::Array(merged))
        }
        "chr" => {
            let code = arg_int(values, 0)?.rem_euclid(256) as u32;
            Ok(Value::Str(
                char::from_u32(code).map(String::from).unwrap_or_default(),
            ))
        }
        "ord" => {
            let s = arg_str(values, 0)?;
            Ok(Value::Int(s.bytes().next().map(i64::from).unwrap_or(0)))
        }
        _ => Err(SandboxError::Runtime(format!("unknown builtin {name}"))),
    }
}

fn php_trim(s: &str, left: bool, right: bool) -> String {
    const TRIM_CHARS: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];
    let mut result = s;
    if left {
        result = result.trim_start_matches(TRIM_CHARS);
    }
    if right {
        result = result.trim_end_matches(TRIM_CHARS);
    }
    result.to_string()
}

fn leading_int(s: &str) -> i64 {
    let trimmed = s.trim_start();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    trimmed[..end].parse().unwrap_or(0)
}

fn leading_float(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

/// Minimal `sprintf`: `%s`, `%d`, `%f` (with optional precision), `%x`,
/// `%X`, `%%`. Anything fancier refuses.
fn sprintf(values: &[Value]) -> Result<Value, SandboxError> {
    let format = arg_str(values, 0)?;
    let mut out = String::new();
    let mut arg_index = 1;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while chars.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                digits.push(chars.next().unwrap());
            }
            precision = digits.parse().ok();
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                out.push_str(&arg_str(values, arg_index)?);
                arg_index += 1;
            }
            Some('d') => {
                out.push_str(&arg_int(values, arg_index)?.to_string());
                arg_index += 1;
            }
            Some('f') => {
                let number = arg_f64(values, arg_index)?;
                let precision = precision.unwrap_or(6);
                out.push_str(&format!("{number:.precision$}"));
                arg_index += 1;
            }
            Some('x') => {
                out.push_str(&format!("{:x}", arg_int(values, arg_index)?));
                arg_index += 1;
            }
            Some('X') => {
                out.push_str(&format!("{:X}", arg_int(values, arg_index)?));
                arg_index += 1;
            }
            other => {
                return Err(SandboxError::Runtime(format!(
                    "unsupported format directive {other:?}"
                )))
            }
        }
        if out.len() > MAX_STRING_BYTES {
            return Err(SandboxError::Runtime("string too large".into()));
        }
    }
    Ok(Value::Str(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpfold_syntax::parse;

    fn sandbox() -> Sandbox {
        Sandbox::new(&SandboxOptions::default())
    }

    fn eval_src(sandbox: &mut Sandbox, src: &str, context: &SandboxContext) -> Result<Value, SandboxError> {
        let program = parse(src).unwrap();
        let NodeKind::ExprStmt(expr) = program.tree.kind(program.roots[0]) else {
            panic!("expected expression statement");
        };
        sandbox.execute(&program.tree, *expr, context)
    }

    #[test]
    fn test_evaluates_pure_call_on_literals() {
        let mut sandbox = sandbox();
        let result = eval_src(&mut sandbox, "<?php strtoupper('abc');", &SandboxContext::new());
        assert_eq!(result, Ok(Value::Str("ABC".into())));
    }

    #[test]
    fn test_context_variables_bind() {
        let mut sandbox = sandbox();
        let mut context = SandboxContext::new();
        context.set("n", Value::Int(4));
        let result = eval_src(&mut sandbox, "<?php $n * 2 + 1;", &context);
        assert_eq!(result, Ok(Value::Int(9)));
    }

    #[test]
    fn test_rejects_unlisted_call() {
        let mut sandbox = sandbox();
        let result = eval_src(&mut sandbox, "<?php file_get_contents('/etc/passwd');", &SandboxContext::new());
        assert!(matches!(result, Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn test_rejects_eval_and_exit() {
        let mut sandbox = sandbox();
        assert!(matches!(
            eval_src(&mut sandbox, "<?php eval('1');", &SandboxContext::new()),
            Err(SandboxError::Unsafe(_))
        ));
        assert!(matches!(
            eval_src(&mut sandbox, "<?php exit(1);", &SandboxContext::new()),
            Err(SandboxError::Unsafe(_))
        ));
    }

    #[test]
    fn test_rejects_unbound_variable() {
        let mut sandbox = sandbox();
        let result = eval_src(&mut sandbox, "<?php $missing + 1;", &SandboxContext::new());
        assert!(matches!(result, Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn test_caches_successful_results() {
        let mut sandbox = sandbox();
        let context = SandboxContext::new();
        eval_src(&mut sandbox, "<?php strlen('hello');", &context).unwrap();
        eval_src(&mut sandbox, "<?php strlen('hello');", &context).unwrap();
        let stats = sandbox.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let mut sandbox = sandbox();
        let context = SandboxContext::new();
        let _ = eval_src(&mut sandbox, "<?php intdiv(1, 0);", &context);
        let _ = eval_src(&mut sandbox, "<?php intdiv(1, 0);", &context);
        assert_eq!(sandbox.cache_stats().inserts, 0);
    }

    #[test]
    fn test_timeout_produces_error_value() {
        let options = SandboxOptions {
            timeout_ms: 0,
            ..Default::default()
        };
        let mut sandbox = Sandbox::new(&options);
        let result = eval_src(&mut sandbox, "<?php 1 + 1;", &SandboxContext::new());
        assert_eq!(result, Err(SandboxError::Timeout));
    }

    #[test]
    fn test_allocation_cap() {
        let mut sandbox = sandbox();
        let result = eval_src(
            &mut sandbox,
            "<?php str_repeat('x', 99999999);",
            &SandboxContext::new(),
        );
        assert!(matches!(result, Err(SandboxError::Runtime(_))));
    }

    #[test]
    fn test_array_functions() {
        let mut sandbox = sandbox();
        let result = eval_src(
            &mut sandbox,
            "<?php array_sum([1, 2, 3]);",
            &SandboxContext::new(),
        );
        assert_eq!(result, Ok(Value::Int(6)));

        let result = eval_src(
            &mut sandbox,
            "<?php implode('-', ['a', 'b']);",
            &SandboxContext::new(),
        );
        assert_eq!(result, Ok(Value::Str("a-b".into())));
    }

    #[test]
    fn test_sprintf_subset() {
        let mut sandbox = sandbox();
        let result = eval_src(
            &mut sandbox,
            "<?php sprintf('%s is %d%%', 'load', 95);",
            &SandboxContext::new(),
        );
        assert_eq!(result, Ok(Value::Str("load is 95%".into())));
    }

    #[test]
    fn test_short_circuit_and_coalesce() {
        let mut sandbox = sandbox();
        let mut context = SandboxContext::new();
        context.set("x", Value::Null);
        let result = eval_src(&mut sandbox, "<?php $x ?? 'fallback';", &context);
        assert_eq!(result, Ok(Value::Str("fallback".into())));
    }

    #[test]
    fn test_nested_array_context_dropped() {
        let mut context = SandboxContext::new();
        context.set(
            "nested",
            Value::Array(vec![(
                ArrayKey::Int(0),
                Value::Array(vec![]),
            )]),
        );
        assert!(context.get("nested").is_none());
    }
}
