use crate::bytecode::Op;
use crate::ir::shape::VariantKey;
use crate::lang::script::StopFlag;
use crate::lang::value::Value;
use crate::runtime::host::{Host, HostOutcome, PendingId};
use crate::runtime::runtime_error::{
    RuntimeError, call_depth_exceeded, pc_out_of_range, stack_limit_exceeded, stack_underflow,
    step_limit_exceeded, type_error, unknown_variant,
};
use crate::runtime::sandbox::CompiledRoutine;
use crate::runtime::support;
use std::collections::HashMap;
use std::sync::Arc;

pub use crate::bytecode::op::YieldKind;

#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack_size: 10_000,
        }
    }
}

/// Linked procedure variants of one compiled thread, by key.
pub type VariantTable = HashMap<VariantKey, Arc<CompiledRoutine>>;

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Suspended; call `step` again when the scheduler resumes the thread.
    Yielded(YieldKind),
    Finished,
    /// The thread's stop flag was observed.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    start: f64,
    duration: f64,
}

struct Frame {
    routine: Arc<CompiledRoutine>,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    args: Vec<Value>,
    timer: Option<Timer>,
    pending: Option<PendingId>,
}

impl Frame {
    fn new(routine: Arc<CompiledRoutine>, args: Vec<Value>) -> Self {
        let locals = vec![Value::Number(0.0); routine.locals() as usize];
        Self {
            routine,
            pc: 0,
            stack: Vec::new(),
            locals,
            args,
            timer: None,
            pending: None,
        }
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| stack_underflow(self.routine.name(), self.pc))
    }

    fn pop_n(&mut self, n: u16) -> Result<Vec<Value>, RuntimeError> {
        let n = n as usize;
        if self.stack.len() < n {
            return Err(stack_underflow(self.routine.name(), self.pc));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("boolean", other.type_name())),
        }
    }

    fn local(&mut self, index: u16) -> Result<&mut Value, RuntimeError> {
        let (routine, pc) = (&self.routine, self.pc);
        self.locals.get_mut(index as usize).ok_or_else(|| {
            RuntimeError::new(format!(
                "local {} out of range in '{}' at pc={}",
                index,
                routine.name(),
                pc
            ))
        })
    }

    fn jump(&mut self, offset: i32) -> Result<(), RuntimeError> {
        let new_pc = self.pc as i64 + offset as i64;
        if new_pc < 0 || new_pc as usize >= self.routine.ops().len() {
            return Err(RuntimeError::new(format!(
                "jump out of bounds: pc={}, offset={}, target={}",
                self.pc, offset, new_pc
            )));
        }
        self.pc = new_pc as usize;
        Ok(())
    }
}

/// What the instruction just executed asks of the dispatch loop.
enum Flow {
    Continue,
    Suspend(YieldKind),
    Finished,
    Stopped,
}

/// One resumable run of a compiled thread.
///
/// Every suspension point saves the pc of the frame it happened in, so
/// `step` always resumes exactly where the last call left off.
pub struct Execution {
    frames: Vec<Frame>,
    procedures: Arc<VariantTable>,
    stop: StopFlag,
    config: VmConfig,
    steps: usize,
    stopped: bool,
}

impl Execution {
    pub fn new(
        routine: Arc<CompiledRoutine>,
        procedures: Arc<VariantTable>,
        stop: StopFlag,
        config: VmConfig,
    ) -> Self {
        Self {
            frames: vec![Frame::new(routine, Vec::new())],
            procedures,
            stop,
            config,
            steps: 0,
            stopped: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of active procedure frames, the entry routine included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Run until the next suspension point, the end of the entry routine or a
    /// stop request.
    pub fn step(&mut self, host: &mut dyn Host) -> Result<StepOutcome, RuntimeError> {
        if self.stopped {
            return Ok(StepOutcome::Stopped);
        }
        if self.frames.is_empty() {
            return Ok(StepOutcome::Finished);
        }
        if self.stop.is_requested() {
            return Ok(self.halt());
        }

        match self.run(host) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self
                .frames
                .iter()
                .rev()
                .fold(e, |e, frame| e.with_context(frame.routine.name()))),
        }
    }

    fn halt(&mut self) -> StepOutcome {
        tracing::debug!(depth = self.frames.len(), "execution stopped");
        self.frames.clear();
        self.stopped = true;
        StepOutcome::Stopped
    }

    fn run(&mut self, host: &mut dyn Host) -> Result<StepOutcome, RuntimeError> {
        loop {
            self.check_limits()?;
            match self.exec_one(host)? {
                Flow::Continue => {}
                Flow::Suspend(kind) => return Ok(StepOutcome::Yielded(kind)),
                Flow::Finished => return Ok(StepOutcome::Finished),
                Flow::Stopped => return Ok(self.halt()),
            }
        }
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(step_limit_exceeded(max));
            }
        }

        let height = self.frames.last().map_or(0, |f| f.stack.len());
        if height > self.config.max_stack_size {
            return Err(stack_limit_exceeded(self.config.max_stack_size));
        }

        Ok(())
    }

    fn after_host_call(&self) -> Flow {
        if self.stop.is_requested() {
            Flow::Stopped
        } else {
            Flow::Continue
        }
    }

    fn exec_one(&mut self, host: &mut dyn Host) -> Result<Flow, RuntimeError> {
        let depth = self.frames.len();
        let Some(frame) = self.frames.last_mut() else {
            return Ok(Flow::Finished);
        };

        // A host call still in flight: re-poll it, never re-issue it.
        if let Some(id) = frame.pending {
            return match host.poll_pending(id) {
                Some(value) => {
                    frame.pending = None;
                    frame.stack.push(value);
                    frame.pc += 1;
                    Ok(self.after_host_call())
                }
                None => Ok(Flow::Suspend(YieldKind::Blocking)),
            };
        }

        let routine = Arc::clone(&frame.routine);
        let op = routine
            .ops()
            .get(frame.pc)
            .ok_or_else(|| pc_out_of_range(routine.name(), frame.pc))?;

        match op {
            Op::Push(v) => frame.stack.push(v.clone()),
            Op::Drop => {
                frame.pop()?;
            }

            Op::LoadArg(i) => {
                let value = frame.args.get(*i as usize).cloned().ok_or_else(|| {
                    RuntimeError::new(format!("argument {} out of range in '{}'", i, routine.name()))
                })?;
                frame.stack.push(value);
            }
            Op::LoadLocal(i) => {
                let value = frame.local(*i)?.clone();
                frame.stack.push(value);
            }
            Op::StoreLocal(i) => {
                let value = frame.pop()?;
                *frame.local(*i)? = value;
            }

            Op::CallSupport { import, argc } => {
                let binding = routine.support(*import).ok_or_else(|| {
                    RuntimeError::new(format!("support import {} is not linked", import))
                })?;
                let args = frame.pop_n(*argc)?;
                frame.stack.push((binding.func)(&args));
            }

            Op::CallHost { import, argc } => {
                let name = routine.host(*import).ok_or_else(|| {
                    RuntimeError::new(format!("host import {} is not linked", import))
                })?;
                let args = frame.pop_n(*argc)?;
                match host.call_primitive(name, &args) {
                    HostOutcome::Ready(value) => {
                        frame.stack.push(value);
                        frame.pc += 1;
                        return Ok(self.after_host_call());
                    }
                    HostOutcome::Pending(id) => {
                        // pc stays on the call until the result arrives
                        frame.pending = Some(id);
                        return Ok(Flow::Suspend(YieldKind::Blocking));
                    }
                }
            }

            Op::Escape {
                block,
                opcode,
                inputs,
            } => {
                let values = frame.pop_n(inputs.len() as u16)?;
                let named: Vec<(String, Value)> = inputs.iter().cloned().zip(values).collect();
                let value = host.evaluate_block(*block, opcode, &named);
                frame.stack.push(value);
                frame.pc += 1;
                return Ok(self.after_host_call());
            }

            Op::GetVariable(name) => frame.stack.push(host.variable(name)),
            Op::SetVariable(name) => {
                let value = frame.pop()?;
                host.set_variable(name, value);
            }

            Op::Jump(offset) => {
                frame.jump(*offset)?;
                return Ok(Flow::Continue);
            }
            Op::JumpIfFalse(offset) => {
                if !frame.pop_bool()? {
                    frame.jump(*offset)?;
                    return Ok(Flow::Continue);
                }
            }
            Op::JumpIfTrue(offset) => {
                if frame.pop_bool()? {
                    frame.jump(*offset)?;
                    return Ok(Flow::Continue);
                }
            }
            Op::Countdown { counter, exit } => {
                let remaining = match frame.local(*counter)? {
                    Value::Number(n) => n,
                    other => return Err(type_error("number", other.type_name())),
                };
                if *remaining >= 0.5 {
                    *remaining -= 1.0;
                } else {
                    frame.jump(*exit)?;
                    return Ok(Flow::Continue);
                }
            }

            Op::Yield(kind) => {
                frame.pc += 1;
                return Ok(Flow::Suspend(*kind));
            }
            Op::CheckDeadline { counter, interval } => {
                let slot = frame.local(*counter)?;
                let count = support::to_number(slot) + 1.0;
                if count >= *interval as f64 {
                    *slot = Value::Number(0.0);
                    if host.deadline_elapsed() {
                        frame.pc += 1;
                        return Ok(Flow::Suspend(YieldKind::Soft));
                    }
                } else {
                    *slot = Value::Number(count);
                }
            }
            Op::StartTimer => {
                let duration = support::to_number(&frame.pop()?);
                frame.timer = Some(Timer {
                    start: host.now_ms(),
                    duration,
                });
            }
            Op::WaitTimer => {
                if let Some(timer) = frame.timer {
                    if host.now_ms() - timer.start < timer.duration {
                        return Ok(Flow::Suspend(YieldKind::Blocking));
                    }
                    frame.timer = None;
                }
            }

            Op::CallProcedure { variant, argc } => {
                let key = routine.procedure(*variant).ok_or_else(|| {
                    RuntimeError::new(format!("procedure {} is not linked", variant))
                })?;
                let callee = self
                    .procedures
                    .get(key)
                    .cloned()
                    .ok_or_else(|| unknown_variant(key))?;
                if depth >= self.config.max_call_depth {
                    return Err(call_depth_exceeded(self.config.max_call_depth));
                }
                let args = frame.pop_n(*argc)?;
                frame.pc += 1;
                self.frames.push(Frame::new(callee, args));
                return Ok(Flow::Continue);
            }

            Op::Return => {
                self.frames.pop();
                if self.frames.is_empty() {
                    return Ok(Flow::Finished);
                }
                return Ok(Flow::Continue);
            }
        }

        frame.pc += 1;
        Ok(Flow::Continue)
    }
}
