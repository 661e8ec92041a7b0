use crate::lang::block::BlockId;
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};

/// Why a routine handed control back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YieldKind {
    /// Let sibling threads run; resume later in the same tick.
    Soft,
    /// Resume on the next render frame.
    Frame,
    /// Waiting on a timer or a pending host call; re-checked every tick.
    Blocking,
}

// =============================================================================
// OP - Routine instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // literals
    Push(Value),

    // stack ops
    Drop,

    // slots
    LoadArg(u16),
    LoadLocal(u16),
    StoreLocal(u16),

    // ==========================================================================
    // Imports - resolved by the evaluator at link time
    // ==========================================================================
    /// Pop `argc` values, call support function `import`, push its result.
    CallSupport { import: u16, argc: u16 },

    /// Pop `argc` values, call host primitive `import`, push its result.
    /// A pending result suspends here until the host completes it.
    CallHost { import: u16, argc: u16 },

    /// Pop one value per input name and hand `block` to the interpreter.
    Escape {
        block: BlockId,
        opcode: String,
        inputs: Vec<String>,
    },

    // variables
    GetVariable(String),
    SetVariable(String),

    // ==========================================================================
    // Jump instructions for flat control flow
    // ==========================================================================
    /// Unconditional relative jump. Offset is added to current pc.
    /// Jump(1) falls through to the next instruction, Jump(-1) re-runs the
    /// previous one.
    Jump(i32),

    /// Pop bool from stack, jump if false. If true, continue to next instruction.
    JumpIfFalse(i32),

    /// Pop bool from stack, jump if true. If false, continue to next instruction.
    JumpIfTrue(i32),

    /// Loop counter: if local `counter` is at least 0.5, decrement it and fall
    /// through, otherwise jump by `exit`.
    Countdown { counter: u16, exit: i32 },

    // ==========================================================================
    // Suspension points
    // ==========================================================================
    Yield(YieldKind),

    /// Count one warp iteration in local `counter`; every `interval` iterations
    /// ask the host whether the tick deadline passed and soft-yield if so.
    CheckDeadline { counter: u16, interval: u32 },

    /// Pop a duration in milliseconds and start the frame timer.
    StartTimer,

    /// Block until the frame timer has run out.
    WaitTimer,

    // procedures
    CallProcedure { variant: u16, argc: u16 },

    Return,
}

impl Op {
    /// Relative jump offset carried by this op, if any.
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Op::Jump(offset) | Op::JumpIfFalse(offset) | Op::JumpIfTrue(offset) => Some(*offset),
            Op::Countdown { exit, .. } => Some(*exit),
            _ => None,
        }
    }
}
