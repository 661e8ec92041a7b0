use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("runtime error: {message}{}", render_call_stack(.call_stack))]
pub struct RuntimeError {
    pub message: String,
    /// Innermost frame first.
    pub call_stack: Vec<String>,
}

fn render_call_stack(call_stack: &[String]) -> String {
    let mut out = String::new();
    if !call_stack.is_empty() {
        out.push_str("\n  call stack:");
        for (i, frame) in call_stack.iter().enumerate() {
            out.push_str(&format!("\n    {}: {}", i, frame));
        }
    }
    out
}

impl RuntimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        RuntimeError {
            message: msg.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

pub fn stack_underflow(routine: &str, pc: usize) -> RuntimeError {
    RuntimeError::new(format!("stack underflow in '{}' at pc={}", routine, pc))
}

pub fn type_error(expected: &str, got: &str) -> RuntimeError {
    RuntimeError::new(format!("type error: expected {}, got {}", expected, got))
}

pub fn call_depth_exceeded(max: usize) -> RuntimeError {
    RuntimeError::new(format!("maximum call depth exceeded ({})", max))
}

pub fn stack_limit_exceeded(max: usize) -> RuntimeError {
    RuntimeError::new(format!("stack size limit exceeded ({})", max))
}

pub fn step_limit_exceeded(max: usize) -> RuntimeError {
    RuntimeError::new(format!("execution step limit exceeded ({})", max))
}

pub fn unknown_variant(key: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::new(format!("procedure variant {} was never compiled", key))
}

pub fn pc_out_of_range(routine: &str, pc: usize) -> RuntimeError {
    RuntimeError::new(format!("pc={} out of range in '{}'", pc, routine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_stack() {
        let err = type_error("boolean", "number");
        assert_eq!(
            err.to_string(),
            "runtime error: type error: expected boolean, got number"
        );
    }

    #[test]
    fn test_display_with_stack() {
        let err = call_depth_exceeded(3)
            .with_context("\"f %s\" (number)")
            .with_context("script #0");
        let text = err.to_string();
        assert!(text.contains("call stack:"));
        assert!(text.contains("0: \"f %s\" (number)"));
        assert!(text.contains("1: script #0"));
    }
}
