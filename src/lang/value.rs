use serde::{Deserialize, Serialize};

/// Runtime value flowing through compiled routines.
///
/// Blocks are dynamically typed: every input accepts any of these and the
/// support library decides how to coerce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// IEEE double, `NaN` and infinities included.
    Number(f64),

    /// UTF-8 string value.
    String(String),

    /// Result of a boolean reporter.
    Bool(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
        }
    }

    /// The empty string, which is what an absent input evaluates to.
    pub fn empty() -> Self {
        Value::String(String::new())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl std::fmt::Display for Value {
    /// Format a value the way the interpreter stringifies it.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Stringify a number with the interpreter's rules.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        // covers -0
        return "0".to_string();
    }

    let magnitude = n.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let raw = format!("{:e}", n);
        return match raw.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => raw,
        };
    }

    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_integers_have_no_fraction() {
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(-3.0).to_string(), "-3");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_display_special_numbers() {
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Number(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
    }

    #[test]
    fn test_display_exponent_form() {
        assert_eq!(Value::Number(1e21).to_string(), "1e+21");
        assert_eq!(Value::Number(1.5e-7).to_string(), "1.5e-7");
    }

    #[test]
    fn test_display_bool_and_string() {
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::from("Hello").to_string(), "Hello");
    }

    #[test]
    fn test_default_is_empty_string() {
        assert_eq!(Value::default(), Value::String(String::new()));
        assert_eq!(Value::default().type_name(), "string");
    }
}
