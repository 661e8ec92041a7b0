use crate::bytecode::Op;
use crate::bytecode::image::RoutineImage;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("verify error in '{routine}': {message}")]
pub struct VerifyError {
    pub routine: String,
    pub message: String,
}

impl VerifyError {
    fn new(routine: &str, message: impl Into<String>) -> Self {
        Self {
            routine: routine.to_string(),
            message: message.into(),
        }
    }
}

/// Returns (pops, pushes) for an op.
fn effect(op: &Op) -> (usize, usize) {
    use Op::*;
    match op {
        Push(_) => (0, 1),
        Drop => (1, 0),

        LoadArg(_) | LoadLocal(_) => (0, 1),
        StoreLocal(_) => (1, 0),

        CallSupport { argc, .. } | CallHost { argc, .. } => (*argc as usize, 1),
        Escape { inputs, .. } => (inputs.len(), 1),

        GetVariable(_) => (0, 1),
        SetVariable(_) => (1, 0),

        Jump(_) => (0, 0),
        JumpIfFalse(_) | JumpIfTrue(_) => (1, 0),
        Countdown { .. } => (0, 0),

        Yield(_) | CheckDeadline { .. } | WaitTimer => (0, 0),
        StartTimer => (1, 0),

        CallProcedure { argc, .. } => (*argc as usize, 0),
        Return => (0, 0),
    }
}

/// Check stack effects with a given initial stack height.
///
/// NOTE: This is a linear scan that doesn't follow jump targets. Generated
/// code leaves the stack empty between statements, so every jump lands at a
/// point where the scan's height is also the real height.
pub fn check_ops_with_initial(
    routine: &str,
    ops: &[Op],
    initial_height: usize,
) -> Result<(), VerifyError> {
    let mut h = initial_height;

    for (pc, op) in ops.iter().enumerate() {
        let (pops, pushes) = effect(op);
        h = h.checked_sub(pops).ok_or_else(|| {
            VerifyError::new(
                routine,
                format!(
                    "stack underflow at pc={}, op={:?}, needed {} items",
                    pc, op, pops
                ),
            )
        })?;
        h += pushes;
    }

    Ok(())
}

/// Check stack effects starting from empty stack.
pub fn check_ops(routine: &str, ops: &[Op]) -> Result<(), VerifyError> {
    check_ops_with_initial(routine, ops, 0)
}

/// Structural checks on an image: every jump lands inside the routine, every
/// slot and import index exists, and the stack never underflows.
pub fn verify(image: &RoutineImage) -> Result<(), VerifyError> {
    let name = image.name.as_str();
    let len = image.ops.len();

    if !matches!(image.ops.last(), Some(Op::Return)) {
        return Err(VerifyError::new(name, "routine does not end with RETURN"));
    }

    for (pc, op) in image.ops.iter().enumerate() {
        if let Some(offset) = op.jump_offset() {
            let target = pc as i64 + offset as i64;
            if target < 0 || target >= len as i64 {
                return Err(VerifyError::new(
                    name,
                    format!("jump out of bounds: pc={}, offset={}, target={}", pc, offset, target),
                ));
            }
        }

        let slot_error = |what: &str, index: usize, limit: usize| {
            VerifyError::new(
                name,
                format!("{} index {} out of range ({}) at pc={}", what, index, limit, pc),
            )
        };

        match op {
            Op::LoadArg(i) if *i >= image.arity => {
                return Err(slot_error("argument", *i as usize, image.arity as usize));
            }
            Op::LoadLocal(i)
            | Op::StoreLocal(i)
            | Op::Countdown { counter: i, .. }
            | Op::CheckDeadline { counter: i, .. }
                if *i >= image.locals =>
            {
                return Err(slot_error("local", *i as usize, image.locals as usize));
            }
            Op::CheckDeadline { interval: 0, .. } => {
                return Err(VerifyError::new(
                    name,
                    format!("deadline check with zero interval at pc={}", pc),
                ));
            }
            Op::CallSupport { import, .. } if *import as usize >= image.support_imports.len() => {
                return Err(slot_error(
                    "support import",
                    *import as usize,
                    image.support_imports.len(),
                ));
            }
            Op::CallHost { import, .. } if *import as usize >= image.host_imports.len() => {
                return Err(slot_error(
                    "host import",
                    *import as usize,
                    image.host_imports.len(),
                ));
            }
            Op::CallProcedure { variant, .. } if *variant as usize >= image.procedures.len() => {
                return Err(slot_error(
                    "procedure",
                    *variant as usize,
                    image.procedures.len(),
                ));
            }
            _ => {}
        }
    }

    check_ops(name, &image.ops)
}
