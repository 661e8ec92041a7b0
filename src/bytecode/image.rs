use super::compile_error::CompileError;
use crate::bytecode::Op;
use crate::ir::shape::VariantKey;
use serde::{Deserialize, Serialize};

/// A generated routine before linking.
///
/// Everything the routine can reach is named here: support functions and host
/// primitives by symbolic import, procedure variants by key. The evaluator
/// resolves the names against the bindings it was given and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineImage {
    pub name: String,
    pub ops: Vec<Op>,
    pub support_imports: Vec<String>,
    pub host_imports: Vec<String>,
    pub procedures: Vec<VariantKey>,
    /// Local slots used for loop counters.
    pub locals: u16,
    pub arity: u16,
    pub warp: bool,
}

impl RoutineImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            support_imports: Vec::new(),
            host_imports: Vec::new(),
            procedures: Vec::new(),
            locals: 0,
            arity: 0,
            warp: false,
        }
    }

    /// Serialize to the form the evaluator loads.
    pub fn encode(&self) -> Result<RoutineSource, CompileError> {
        let bytes =
            postcard::to_allocvec(self).map_err(|e| CompileError::encode(&self.name, e))?;
        Ok(RoutineSource {
            name: self.name.clone(),
            bytes,
        })
    }
}

/// Encoded routine image: the generated "source" handed to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RoutineSource {
    pub fn decode(&self) -> Result<RoutineImage, postcard::Error> {
        postcard::from_bytes(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::shape::{Shape, Signature};
    use crate::lang::value::Value;

    #[test]
    fn test_image_survives_encoding() {
        let mut image = RoutineImage::new("script #0");
        image.ops = vec![
            Op::Push(Value::Number(2.5)),
            Op::CallSupport { import: 0, argc: 1 },
            Op::Drop,
            Op::Return,
        ];
        image.support_imports = vec!["round".to_string()];
        image.procedures = vec![VariantKey::new(
            "f %s",
            Signature::canonical(&[Shape::Number]),
            false,
        )];

        let source = image.encode().unwrap();
        assert_eq!(source.name, "script #0");
        assert_eq!(source.decode().unwrap(), image);
    }

    #[test]
    fn test_truncated_source_fails_to_decode() {
        let mut image = RoutineImage::new("r");
        image.ops = vec![Op::Push(Value::from("hello")), Op::Return];
        let mut source = image.encode().unwrap();
        source.bytes.truncate(3);
        assert!(source.decode().is_err());
    }
}
