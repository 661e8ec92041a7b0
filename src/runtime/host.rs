//! The boundary between compiled routines and the rest of the runtime.
//!
//! A routine never touches sprites, variables or the clock directly. It goes
//! through [`Host`], which the scheduler implements on top of the reference
//! interpreter.

use crate::ir::shape::Shape;
use crate::lang::block::BlockId;
use crate::lang::value::Value;
use std::collections::BTreeSet;

/// Handle for a host call that has not completed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Ready(Value),
    /// Completes later; the caller re-polls every tick.
    Pending(PendingId),
}

pub trait Host {
    /// Run one block through the reference interpreter, with its inputs
    /// already evaluated.
    fn evaluate_block(&mut self, block: BlockId, opcode: &str, inputs: &[(String, Value)])
    -> Value;

    /// Invoke a host primitive the routine was linked against.
    fn call_primitive(&mut self, name: &str, args: &[Value]) -> HostOutcome;

    /// `Some` once the call behind `id` has completed.
    fn poll_pending(&mut self, id: PendingId) -> Option<Value>;

    fn variable(&self, name: &str) -> Value;

    fn set_variable(&mut self, name: &str, value: Value);

    /// Milliseconds on the scheduler's clock.
    fn now_ms(&self) -> f64;

    /// Whether the current tick's time budget is spent.
    fn deadline_elapsed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Statement,
    Reporter(Shape),
}

/// A host primitive the generator can call directly.
#[derive(Debug, Clone, Copy)]
pub struct Primitive {
    pub opcode: &'static str,
    /// Input slot names, in call order.
    pub inputs: &'static [&'static str],
    pub kind: PrimitiveKind,
}

const fn statement(opcode: &'static str, inputs: &'static [&'static str]) -> Primitive {
    Primitive {
        opcode,
        inputs,
        kind: PrimitiveKind::Statement,
    }
}

const fn reporter(opcode: &'static str, shape: Shape) -> Primitive {
    Primitive {
        opcode,
        inputs: &[],
        kind: PrimitiveKind::Reporter(shape),
    }
}

pub const PRIMITIVES: &[Primitive] = &[
    statement("motion_movesteps", &["STEPS"]),
    statement("motion_turnright", &["DEGREES"]),
    statement("motion_turnleft", &["DEGREES"]),
    statement("motion_gotoxy", &["X", "Y"]),
    statement("motion_changexby", &["DX"]),
    statement("motion_setx", &["X"]),
    statement("motion_changeyby", &["DY"]),
    statement("motion_sety", &["Y"]),
    statement("motion_pointindirection", &["DIRECTION"]),
    statement("looks_show", &[]),
    statement("looks_hide", &[]),
    statement("looks_say", &["MESSAGE"]),
    statement("looks_changesizeby", &["CHANGE"]),
    statement("looks_setsizeto", &["SIZE"]),
    statement("sensing_resettimer", &[]),
    reporter("motion_xposition", Shape::Number),
    reporter("motion_yposition", Shape::Number),
    reporter("motion_direction", Shape::Number),
    reporter("looks_size", Shape::Number),
    reporter("sensing_timer", Shape::Number),
    reporter("sensing_answer", Shape::String),
    // Hosts are free to answer with any value, so conditions keep coercing it
    reporter("sensing_mousedown", Shape::Unknown),
];

pub fn primitive(opcode: &str) -> Option<&'static Primitive> {
    PRIMITIVES.iter().find(|p| p.opcode == opcode)
}

/// Host primitive names a routine may be linked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    allowed: BTreeSet<String>,
}

impl Capabilities {
    /// Nothing but the support library.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every entry of [`PRIMITIVES`].
    pub fn standard() -> Self {
        Self {
            allowed: PRIMITIVES.iter().map(|p| p.opcode.to_string()).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.allowed.insert(name.into());
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.allowed.remove(name);
        self
    }

    pub fn allows(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }
}
