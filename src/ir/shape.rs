use serde::{Deserialize, Serialize};

/// Static shape of an expression, as far as the generator can tell from the
/// block that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Shape {
    Boolean,
    Number,
    String,
    NumberOrString,
    Unknown,
}

impl Shape {
    /// Conservative widening used when keying procedure variants.
    ///
    /// Numbers and strings share one representation at a call boundary, so they
    /// collapse to `NumberOrString`. Booleans and unknowns stay apart.
    pub fn widen(self) -> Shape {
        match self {
            Shape::Number | Shape::String | Shape::NumberOrString => Shape::NumberOrString,
            other => other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Shape::Boolean => "boolean",
            Shape::Number => "number",
            Shape::String => "string",
            Shape::NumberOrString => "numeric-or-string",
            Shape::Unknown => "unknown-dynamic",
        }
    }

    pub fn is_boolean(self) -> bool {
        self == Shape::Boolean
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Argument shapes of one call site, after widening.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature(Vec<Shape>);

impl Signature {
    pub fn canonical(shapes: &[Shape]) -> Self {
        Signature(shapes.iter().map(|s| s.widen()).collect())
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, shape) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(shape.label())?;
        }
        Ok(())
    }
}

/// Identity of one procedure variant.
///
/// Two call sites share a variant exactly when their keys are equal, which is
/// why the signature is always canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub proccode: String,
    pub signature: Signature,
    /// Compiled for a warp context (declared warp, or called from warp code).
    pub warp: bool,
}

impl VariantKey {
    pub fn new(proccode: impl Into<String>, signature: Signature, warp: bool) -> Self {
        Self {
            proccode: proccode.into(),
            signature,
            warp,
        }
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.warp {
            write!(f, "warp ")?;
        }
        write!(f, "\"{}\" ({})", self.proccode, self.signature)
    }
}
