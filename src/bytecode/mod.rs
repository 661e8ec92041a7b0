pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod image;
pub mod op;
pub mod verify;

pub use image::{RoutineImage, RoutineSource};
pub use op::{Op, YieldKind};
