//! Compilation driver: IR generation, code generation, linking and the
//! per-script cache, behind one entry point.

pub mod config;
pub mod driver;


use crate::bytecode::compile_error::CompileError;
use crate::ir::generate_error::GenerationError;
use crate::runtime::sandbox::LinkError;
use thiserror::Error;

pub use config::CompilerConfig;
pub use driver::{CompiledThread, CompilerStats, Jit, StatsSnapshot};

/// Any failure while compiling a thread. None of them leave a cache entry
/// behind; the caller falls back to interpreting the script.
#[derive(Debug, Error)]
pub enum JitError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Link(#[from] LinkError),
}
