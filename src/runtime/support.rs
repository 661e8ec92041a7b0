//! Runtime support library.
//!
//! Pure functions implementing the interpreter's dynamic typing rules. Every
//! arithmetic, comparison and coercion step of a compiled routine goes through
//! here, via the [`SUPPORT_LIBRARY`] binding table, so compiled and interpreted
//! scripts agree on every value.

use crate::lang::value::Value;
use std::cmp::Ordering;

static EMPTY: Value = Value::String(String::new());

// =============================================================================
// Casting
// =============================================================================

/// Parse a string the way the host language's `Number()` does.
///
/// Returns `NaN` for anything that is not a complete numeric literal. Blank
/// strings parse as `0`.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if trimmed.is_empty() {
        return 0.0;
    }

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return parse_radix(digits, radix);
        }
    }

    let (sign, body) = match trimmed.as_bytes()[0] {
        b'+' => (1.0, &trimmed[1..]),
        b'-' => (-1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };

    if body == "Infinity" {
        return sign * f64::INFINITY;
    }
    if !is_decimal_literal(body) {
        return f64::NAN;
    }

    body.parse::<f64>().map(|n| sign * n).unwrap_or(f64::NAN)
}

fn parse_radix(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut n = 0.0;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => n = n * radix as f64 + d as f64,
            None => return f64::NAN,
        }
    }
    n
}

/// `digits [. digits] [e [+-] digits]`, with at least one mantissa digit.
fn is_decimal_literal(body: &str) -> bool {
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut mantissa_digits = 0;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return false;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// Numeric value of `value`, with `NaN` collapsed to `0`.
pub fn to_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => *n,
        Value::Bool(b) => bool_number(*b),
        Value::String(s) => parse_number(s),
    };
    if n.is_nan() { 0.0 } else { n }
}

pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
    }
}

pub fn to_string(value: &Value) -> String {
    value.to_string()
}

fn bool_number(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// =============================================================================
// Comparison
// =============================================================================

/// The number a value compares as, or `None` when it must compare as text.
/// Only finite numbers qualify; `NaN` and the infinities compare by name.
fn comparable_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => *n,
        Value::Bool(b) => bool_number(*b),
        Value::String(s) => parse_number(s),
    };
    n.is_finite().then_some(n)
}

/// Reference comparator.
///
/// Numeric when both sides read as finite numbers (booleans as 1/0, blank
/// strings as 0), otherwise a case-insensitive comparison of the stringified values.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (comparable_number(a), comparable_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => {
            let x = to_string(a).to_lowercase();
            let y = to_string(b).to_lowercase();
            x.cmp(&y)
        }
    }
}

pub fn compare_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_finite() && y.is_finite() => x == y,
        (Value::String(x), Value::String(y)) if x == y => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => compare(a, b) == Ordering::Equal,
    }
}

pub fn compare_greater_than(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_finite() && y.is_finite() => x > y,
        _ => compare(a, b) == Ordering::Greater,
    }
}

pub fn compare_less_than(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_finite() && y.is_finite() => x < y,
        _ => compare(a, b) == Ordering::Less,
    }
}

// =============================================================================
// Arithmetic and text
// =============================================================================

/// Floored modulo: the result takes the sign of the divisor.
pub fn modulo(n: f64, m: f64) -> f64 {
    let mut result = n % m;
    if result / m < 0.0 {
        result += m;
    }
    result
}

/// Round half up.
pub fn round(n: f64) -> f64 {
    (n + 0.5).floor()
}

/// 1-based letter lookup; out of range gives the empty string.
pub fn letter_of(index: &Value, text: &Value) -> String {
    let position = to_number(index).floor() - 1.0;
    if position < 0.0 {
        return String::new();
    }
    to_string(text)
        .chars()
        .nth(position as usize)
        .map(String::from)
        .unwrap_or_default()
}

pub fn contains(haystack: &Value, needle: &Value) -> bool {
    to_string(haystack)
        .to_lowercase()
        .contains(&to_string(needle).to_lowercase())
}

// =============================================================================
// Binding table
// =============================================================================

pub type SupportFn = fn(&[Value]) -> Value;

/// A support function as generated code sees it: a name, a fixed arity and a
/// function pointer.
#[derive(Clone, Copy)]
pub struct SupportBinding {
    pub name: &'static str,
    pub arity: usize,
    pub func: SupportFn,
}

impl std::fmt::Debug for SupportBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupportBinding")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&EMPTY)
}

fn bind_compare_equal(args: &[Value]) -> Value {
    Value::Bool(compare_equal(arg(args, 0), arg(args, 1)))
}

fn bind_compare_greater_than(args: &[Value]) -> Value {
    Value::Bool(compare_greater_than(arg(args, 0), arg(args, 1)))
}

fn bind_compare_less_than(args: &[Value]) -> Value {
    Value::Bool(compare_less_than(arg(args, 0), arg(args, 1)))
}

fn bind_to_number(args: &[Value]) -> Value {
    Value::Number(to_number(arg(args, 0)))
}

fn bind_to_boolean(args: &[Value]) -> Value {
    Value::Bool(to_boolean(arg(args, 0)))
}

fn bind_to_string(args: &[Value]) -> Value {
    Value::String(to_string(arg(args, 0)))
}

fn bind_add(args: &[Value]) -> Value {
    Value::Number(to_number(arg(args, 0)) + to_number(arg(args, 1)))
}

fn bind_subtract(args: &[Value]) -> Value {
    Value::Number(to_number(arg(args, 0)) - to_number(arg(args, 1)))
}

fn bind_multiply(args: &[Value]) -> Value {
    Value::Number(to_number(arg(args, 0)) * to_number(arg(args, 1)))
}

fn bind_divide(args: &[Value]) -> Value {
    Value::Number(to_number(arg(args, 0)) / to_number(arg(args, 1)))
}

fn bind_modulo(args: &[Value]) -> Value {
    Value::Number(modulo(to_number(arg(args, 0)), to_number(arg(args, 1))))
}

fn bind_round(args: &[Value]) -> Value {
    Value::Number(round(to_number(arg(args, 0))))
}

fn bind_join(args: &[Value]) -> Value {
    Value::String(to_string(arg(args, 0)) + &to_string(arg(args, 1)))
}

fn bind_length(args: &[Value]) -> Value {
    Value::Number(to_string(arg(args, 0)).chars().count() as f64)
}

fn bind_letter_of(args: &[Value]) -> Value {
    Value::String(letter_of(arg(args, 0), arg(args, 1)))
}

fn bind_contains(args: &[Value]) -> Value {
    Value::Bool(contains(arg(args, 0), arg(args, 1)))
}

fn bind_not(args: &[Value]) -> Value {
    Value::Bool(!to_boolean(arg(args, 0)))
}

fn bind_and(args: &[Value]) -> Value {
    Value::Bool(to_boolean(arg(args, 0)) && to_boolean(arg(args, 1)))
}

fn bind_or(args: &[Value]) -> Value {
    Value::Bool(to_boolean(arg(args, 0)) || to_boolean(arg(args, 1)))
}

fn bind_repeat_count(args: &[Value]) -> Value {
    Value::Number(round(to_number(arg(args, 0))))
}

fn bind_wait_duration(args: &[Value]) -> Value {
    Value::Number((1000.0 * to_number(arg(args, 0))).max(0.0))
}

/// Every function generated code may import, by name.
pub const SUPPORT_LIBRARY: &[SupportBinding] = &[
    SupportBinding { name: "compare_equal", arity: 2, func: bind_compare_equal },
    SupportBinding { name: "compare_greater_than", arity: 2, func: bind_compare_greater_than },
    SupportBinding { name: "compare_less_than", arity: 2, func: bind_compare_less_than },
    SupportBinding { name: "to_number", arity: 1, func: bind_to_number },
    SupportBinding { name: "to_boolean", arity: 1, func: bind_to_boolean },
    SupportBinding { name: "to_string", arity: 1, func: bind_to_string },
    SupportBinding { name: "add", arity: 2, func: bind_add },
    SupportBinding { name: "subtract", arity: 2, func: bind_subtract },
    SupportBinding { name: "multiply", arity: 2, func: bind_multiply },
    SupportBinding { name: "divide", arity: 2, func: bind_divide },
    SupportBinding { name: "modulo", arity: 2, func: bind_modulo },
    SupportBinding { name: "round", arity: 1, func: bind_round },
    SupportBinding { name: "join", arity: 2, func: bind_join },
    SupportBinding { name: "length", arity: 1, func: bind_length },
    SupportBinding { name: "letter_of", arity: 2, func: bind_letter_of },
    SupportBinding { name: "contains", arity: 2, func: bind_contains },
    SupportBinding { name: "not", arity: 1, func: bind_not },
    SupportBinding { name: "and", arity: 2, func: bind_and },
    SupportBinding { name: "or", arity: 2, func: bind_or },
    SupportBinding { name: "repeat_count", arity: 1, func: bind_repeat_count },
    SupportBinding { name: "wait_duration", arity: 1, func: bind_wait_duration },
];

pub fn binding(name: &str) -> Option<&'static SupportBinding> {
    SUPPORT_LIBRARY.iter().find(|b| b.name == name)
}
