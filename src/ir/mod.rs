pub mod generate;
pub mod generate_error;
pub mod node;
pub mod shape;
pub mod variants;

pub use node::{Ir, IrExpr, IrScript, IrStmt};
pub use shape::{Shape, Signature, VariantKey};
