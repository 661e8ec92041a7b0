//! Just-in-time compiler for block-graph programs.
//!
//! A [`Thread`](lang::script::Thread) goes through IR generation
//! ([`ir::generate`]), one code generation per distinct script
//! ([`bytecode::compile`]) and the evaluator ([`runtime::sandbox`]), and comes
//! out as a [`CompiledThread`](jit::CompiledThread): a starting routine plus
//! the procedure variants it calls. The scheduler drives the result through
//! [`Execution::step`](runtime::vm::Execution::step).

pub mod bytecode;
pub mod ir;
pub mod jit;
pub mod lang;
pub mod runtime;

#[cfg(test)]
mod test_support;

pub use jit::{CompiledThread, CompilerConfig, Jit, JitError};
pub use lang::value::Value;
pub use runtime::host::{Capabilities, Host, HostOutcome, PendingId};
pub use runtime::vm::{Execution, StepOutcome, VmConfig, YieldKind};
