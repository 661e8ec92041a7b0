use crate::bytecode::Op;
use crate::bytecode::image::RoutineImage;
use std::collections::HashMap;

/// Return disassembly of a routine image as a String
pub fn disassemble(image: &RoutineImage) -> String {
    let mut output = String::new();

    output.push_str("════════════════════════════════════════\n");
    output.push_str(&format!(
        " {}{}\n",
        image.name,
        if image.warp { " [warp]" } else { "" }
    ));
    output.push_str(&format!(
        " {} instructions, {} args, {} locals\n",
        image.ops.len(),
        image.arity,
        image.locals
    ));
    output.push_str("════════════════════════════════════════\n");

    output.push_str(&disassemble_ops(image, &image.ops));
    output
}

/// Disassemble ops, resolving import and procedure indices through `image`.
pub fn disassemble_ops(image: &RoutineImage, ops: &[Op]) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(ops);

    for (pc, op) in ops.iter().enumerate() {
        if jump_targets.contains(&pc) {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        output.push_str(&format!("{:04} ", pc));

        if jump_targets.contains(&pc) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }

        output.push_str(&format_op(image, op, pc));
        output.push('\n');
    }

    output
}

fn collect_jump_targets(ops: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();

    for (pc, op) in ops.iter().enumerate() {
        if let Some(offset) = op.jump_offset() {
            let target = (pc as i32 + offset) as usize;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

fn jump(name: &str, offset: i32, pc: usize) -> String {
    let target = (pc as i32 + offset) as usize;
    let direction = if offset < 0 { "↑" } else { "↓" };
    format!("{:<12}{:+} {} (→ {:04})", name, offset, direction, target)
}

fn import_name(table: &[String], index: u16) -> &str {
    table
        .get(index as usize)
        .map(String::as_str)
        .unwrap_or("<missing>")
}

fn format_op(image: &RoutineImage, op: &Op, pc: usize) -> String {
    match op {
        Op::Push(v) => format!("PUSH        {:?}", v),
        Op::Drop => "DROP".to_string(),

        Op::LoadArg(i) => format!("LOAD_ARG    {}", i),
        Op::LoadLocal(i) => format!("LOAD_LOCAL  {}", i),
        Op::StoreLocal(i) => format!("STORE_LOCAL {}", i),

        Op::CallSupport { import, argc } => format!(
            "CALL_SUPP   {}/{}",
            import_name(&image.support_imports, *import),
            argc
        ),
        Op::CallHost { import, argc } => format!(
            "CALL_HOST   {}/{}",
            import_name(&image.host_imports, *import),
            argc
        ),
        Op::Escape {
            block,
            opcode,
            inputs,
        } => format!("ESCAPE      {} {} ({})", opcode, block, inputs.join(", ")),

        Op::GetVariable(name) => format!("GET_VAR     \"{}\"", name),
        Op::SetVariable(name) => format!("SET_VAR     \"{}\"", name),

        Op::Jump(offset) => jump("JUMP", *offset, pc),
        Op::JumpIfFalse(offset) => jump("JUMP_FALSE", *offset, pc),
        Op::JumpIfTrue(offset) => jump("JUMP_TRUE", *offset, pc),
        Op::Countdown { counter, exit } => {
            format!("{} ; local {}", jump("COUNTDOWN", *exit, pc), counter)
        }

        Op::Yield(kind) => format!("YIELD       {:?}", kind).to_uppercase(),
        Op::CheckDeadline { counter, interval } => {
            format!("CHECK_DEADLINE every {} ; local {}", interval, counter)
        }
        Op::StartTimer => "START_TIMER ; ( ms -- )".to_string(),
        Op::WaitTimer => "WAIT_TIMER".to_string(),

        Op::CallProcedure { variant, argc } => match image.procedures.get(*variant as usize) {
            Some(key) => format!("CALL_PROC   {}/{}", key, argc),
            None => format!("CALL_PROC   <missing {}>/{}", variant, argc),
        },

        Op::Return => "RETURN".to_string(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Count ops by mnemonic.
pub fn op_counts(ops: &[Op]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for op in ops {
        *counts.entry(op_name(op)).or_insert(0) += 1;
    }
    counts
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Push(_) => "PUSH",
        Op::Drop => "DROP",
        Op::LoadArg(_) => "LOAD_ARG",
        Op::LoadLocal(_) => "LOAD_LOCAL",
        Op::StoreLocal(_) => "STORE_LOCAL",
        Op::CallSupport { .. } => "CALL_SUPP",
        Op::CallHost { .. } => "CALL_HOST",
        Op::Escape { .. } => "ESCAPE",
        Op::GetVariable(_) => "GET_VAR",
        Op::SetVariable(_) => "SET_VAR",
        Op::Jump(_) => "JUMP",
        Op::JumpIfFalse(_) => "JUMP_FALSE",
        Op::JumpIfTrue(_) => "JUMP_TRUE",
        Op::Countdown { .. } => "COUNTDOWN",
        Op::Yield(_) => "YIELD",
        Op::CheckDeadline { .. } => "CHECK_DEADLINE",
        Op::StartTimer => "START_TIMER",
        Op::WaitTimer => "WAIT_TIMER",
        Op::CallProcedure { .. } => "CALL_PROC",
        Op::Return => "RETURN",
    }
}
