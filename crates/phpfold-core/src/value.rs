//! Host-language scalar semantics: truthiness, string conversion, numeric
//! promotion, loose vs strict comparison.
//!
//! Both the constant-folding pass and the sandbox evaluate through these
//! helpers, so compile-time results match what the program would print at
//! run time. Every function refuses (returns `None`) instead of guessing
//! when the host semantics are lossy or version-dependent; a refused fold
//! simply leaves the expression in the tree.

use phpfold_syntax::tree::{BinaryOp, Literal, UnaryOp};

/// Runtime value for the sandbox; literals are the scalar subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<(ArrayKey, Value)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

impl Value {
    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::Str(s.clone()),
        }
    }

    /// Scalar values map back to literals; arrays do not.
    pub fn to_literal(&self) -> Option<Literal> {
        match self {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Int(i) => Some(Literal::Int(*i)),
            Value::Float(f) => Some(Literal::Float(*f)),
            Value::Str(s) => Some(Literal::String(s.clone())),
            Value::Array(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::Array(items) => !items.is_empty(),
        }
    }

    /// Host string conversion; arrays refuse rather than producing the
    /// lossy `"Array"` form.
    pub fn to_php_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Bool(false) => Some(String::new()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(float_to_php_string(*f)),
            Value::Str(s) => Some(s.clone()),
            Value::Array(_) => None,
        }
    }

    /// Stable textual form used in sandbox cache keys.
    pub fn cache_key(&self) -> String {
        match self {
            Value::Null => "N".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{}", f.to_bits()),
            Value::Str(s) => format!("s:{}:{s}", s.len()),
            Value::Array(items) => {
                let inner: Vec<String> = items
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            ArrayKey::Int(i) => format!("i:{i}"),
                            ArrayKey::Str(s) => format!("s:{s}"),
                        };
                        format!("{key}=>{}", v.cache_key())
                    })
                    .collect();
                format!("a:[{}]", inner.join(","))
            }
        }
    }
}

pub fn literal_truthy(lit: &Literal) -> bool {
    Value::from_literal(lit).truthy()
}

pub fn literal_to_php_string(lit: &Literal) -> Option<String> {
    Value::from_literal(lit).to_php_string()
}

/// Host float formatting: whole floats print without a fraction, the
/// normal range prints with 14 significant digits (the default precision
/// ini), extremes use exponent notation.
pub fn float_to_php_string(v: f64) -> String {
    if v.is_nan() {
        return "NAN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }
    let abs = v.abs();
    if !(1e-5..1e15).contains(&abs) {
        // Exponent form like 1.0E+25.
        let formatted = format!("{v:E}");
        let (mantissa, exp) = formatted.split_once('E').unwrap_or((formatted.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        let exp_num: i32 = exp.parse().unwrap_or(0);
        return format!("{mantissa}E{}{}", if exp_num < 0 { "-" } else { "+" }, exp_num.abs());
    }
    // 14 significant digits, trailing zeros trimmed.
    let magnitude = abs.log10().floor() as i32;
    let decimals = (13 - magnitude).clamp(0, 17) as usize;
    let mut s = format!("{v:.decimals$}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Numeric interpretation for arithmetic. Non-numeric strings refuse
/// (the host would raise a TypeError there).
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Value) -> Option<Num> {
    match value {
        Value::Null => Some(Num::Int(0)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        Value::Str(s) => parse_numeric_string(s),
        Value::Array(_) => None,
    }
}

fn parse_numeric_string(s: &str) -> Option<Num> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Num::Int(i));
    }
    trimmed.parse::<f64>().ok().map(Num::Float)
}

pub fn is_numeric_string(s: &str) -> bool {
    parse_numeric_string(s).is_some()
}

fn num_to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// Binary arithmetic with host numeric promotion: int op int stays int
/// while exactly representable, otherwise the result widens to float.
/// Division by zero refuses.
pub fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let (a, b) = (as_number(lhs)?, as_number(rhs)?);
    match op {
        BinaryOp::Add => int_preserving(a, b, i64::checked_add, |x, y| x + y),
        BinaryOp::Sub => int_preserving(a, b, i64::checked_sub, |x, y| x - y),
        BinaryOp::Mul => int_preserving(a, b, i64::checked_mul, |x, y| x * y),
        BinaryOp::Div => {
            if num_to_f64(b) == 0.0 {
                return None;
            }
            if let (Num::Int(x), Num::Int(y)) = (a, b) {
                if x % y == 0 {
                    return Some(Value::Int(x / y));
                }
            }
            Some(Value::Float(num_to_f64(a) / num_to_f64(b)))
        }
        BinaryOp::Mod => {
            // `%` operates on integers in the host language.
            let (Num::Int(x), Num::Int(y)) = (a, b) else {
                return None;
            };
            if y == 0 {
                return None;
            }
            Some(Value::Int(x.wrapping_rem(y)))
        }
        BinaryOp::Pow => match (a, b) {
            (Num::Int(x), Num::Int(y)) if (0..=62).contains(&y) => {
                match x.checked_pow(y as u32) {
                    Some(v) => Some(Value::Int(v)),
                    None => Some(Value::Float((x as f64).powf(y as f64))),
                }
            }
            _ => Some(Value::Float(num_to_f64(a).powf(num_to_f64(b)))),
        },
        _ => None,
    }
}

fn int_preserving(
    a: Num,
    b: Num,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Option<Value> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(v) => Some(Value::Int(v)),
            // Overflow widens to float.
            None => Some(Value::Float(float_op(x as f64, y as f64))),
        },
        _ => Some(Value::Float(float_op(num_to_f64(a), num_to_f64(b)))),
    }
}

pub fn concat(lhs: &Value, rhs: &Value) -> Option<Value> {
    let mut out = lhs.to_php_string()?;
    out.push_str(&rhs.to_php_string()?);
    Some(Value::Str(out))
}

/// Loose equality (`==`), host version 8 semantics: numeric strings
/// compare numerically, a number against a non-numeric string compares as
/// strings, booleans coerce the other side.
pub fn loose_equals(lhs: &Value, rhs: &Value) -> Option<bool> {
    use Value::*;
    match (lhs, rhs) {
        (Bool(_), _) | (_, Bool(_)) => Some(lhs.truthy() == rhs.truthy()),
        (Null, Null) => Some(true),
        (Null, Str(s)) | (Str(s), Null) => Some(s.is_empty()),
        (Null, other) | (other, Null) => Some(!other.truthy()),
        (Int(_) | Float(_), Int(_) | Float(_)) => {
            Some(num_to_f64(as_number(lhs)?) == num_to_f64(as_number(rhs)?))
        }
        (Str(a), Str(b)) => match (parse_numeric_string(a), parse_numeric_string(b)) {
            (Some(x), Some(y)) => Some(num_to_f64(x) == num_to_f64(y)),
            _ => Some(a == b),
        },
        (Int(_) | Float(_), Str(s)) | (Str(s), Int(_) | Float(_)) => {
            match parse_numeric_string(s) {
                Some(_) => Some(num_to_f64(as_number(lhs)?) == num_to_f64(as_number(rhs)?)),
                None => {
                    let num_side = if matches!(lhs, Str(_)) { rhs } else { lhs };
                    Some(num_side.to_php_string()? == *s)
                }
            }
        }
        (Array(a), Array(b)) => {
            if a.len() != b.len() {
                return Some(false);
            }
            for (k, v) in a {
                let Some((_, other)) = b.iter().find(|(bk, _)| bk == k) else {
                    return Some(false);
                };
                if !loose_equals(v, other)? {
                    return Some(false);
                }
            }
            Some(true)
        }
        (Array(_), _) | (_, Array(_)) => Some(false),
    }
}

/// Strict equality (`===`): same type, same value. Int and float never
/// match each other.
pub fn strict_equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && strict_equals(va, vb))
        }
        _ => lhs == rhs && lhs.type_name() == rhs.type_name(),
    }
}

/// Relational comparison. Folds only the unambiguous cases: two numbers,
/// number against numeric string, or two strings (numeric pair compares
/// numerically, otherwise bytewise).
pub fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => match (parse_numeric_string(a), parse_numeric_string(b))
        {
            (Some(x), Some(y)) => num_to_f64(x).partial_cmp(&num_to_f64(y))?,
            _ => a.cmp(b),
        },
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            num_to_f64(as_number(lhs)?).partial_cmp(&num_to_f64(as_number(rhs)?))?
        }
        (Value::Int(_) | Value::Float(_), Value::Str(s))
        | (Value::Str(s), Value::Int(_) | Value::Float(_)) => {
            if !is_numeric_string(s) {
                return None;
            }
            num_to_f64(as_number(lhs)?).partial_cmp(&num_to_f64(as_number(rhs)?))?
        }
        _ => return None,
    };
    Some(match op {
        BinaryOp::Less => ordering == Ordering::Less,
        BinaryOp::LessEqual => ordering != Ordering::Greater,
        BinaryOp::Greater => ordering == Ordering::Greater,
        BinaryOp::GreaterEqual => ordering != Ordering::Less,
        _ => return None,
    })
}

pub fn unary(op: UnaryOp, value: &Value) -> Option<Value> {
    match op {
        UnaryOp::Not => Some(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match as_number(value)? {
            Num::Int(i) => match i.checked_neg() {
                Some(v) => Some(Value::Int(v)),
                None => Some(Value::Float(-(i as f64))),
            },
            Num::Float(f) => Some(Value::Float(-f)),
        },
        UnaryOp::Plus => match as_number(value)? {
            Num::Int(i) => Some(Value::Int(i)),
            Num::Float(f) => Some(Value::Float(f)),
        },
        UnaryOp::BitNot => match value {
            Value::Int(i) => Some(Value::Int(!i)),
            _ => None,
        },
    }
}

/// Bitwise and shift operators; integers only.
pub fn bitwise(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let (Value::Int(a), Value::Int(b)) = (lhs, rhs) else {
        return None;
    };
    let result = match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::ShiftLeft => {
            if !(0..64).contains(b) {
                return None;
            }
            a.checked_shl(*b as u32)?
        }
        BinaryOp::ShiftRight => {
            if !(0..64).contains(b) {
                return None;
            }
            a >> b
        }
        _ => return None,
    };
    Some(Value::Int(result))
}

/// Normalize an array key the way the host does: integer-like strings
/// become integer keys, bools and floats collapse to integers.
pub fn normalize_array_key(value: &Value) -> Option<ArrayKey> {
    match value {
        Value::Int(i) => Some(ArrayKey::Int(*i)),
        Value::Bool(b) => Some(ArrayKey::Int(i64::from(*b))),
        Value::Float(f) => Some(ArrayKey::Int(*f as i64)),
        Value::Null => Some(ArrayKey::Str(String::new())),
        Value::Str(s) => {
            if let Ok(i) = s.parse::<i64>() {
                if i.to_string() == *s {
                    return Some(ArrayKey::Int(i));
                }
            }
            Some(ArrayKey::Str(s.clone()))
        }
        Value::Array(_) => None,
    }
}
