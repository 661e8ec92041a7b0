//! Shared fixtures: project builders and a recording host that plays the part
//! of the scheduler and the reference interpreter.

use crate::lang::block::{Block, BlockArena, BlockId};
use crate::lang::script::{ProcedureDefinition, Script, Target, Thread};
use crate::lang::value::Value;
use crate::runtime::host::{Host, HostOutcome, PendingId};
use crate::runtime::vm::{Execution, StepOutcome, YieldKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Insert `event_whenflagclicked` followed by `body`; returns the hat.
pub fn flag_script(arena: &mut BlockArena, body: Vec<Block>) -> BlockId {
    let mut stack = vec![Block::new("event_whenflagclicked")];
    stack.extend(body);
    arena
        .insert_stack(stack)
        .expect("stack has at least the hat block")
}

pub fn thread_with(
    arena: BlockArena,
    top: Option<BlockId>,
    warp: bool,
    procedures: Vec<ProcedureDefinition>,
) -> Thread {
    let blocks = Arc::new(arena);
    let script = Arc::new(Script::new(Arc::clone(&blocks), top).with_warp(warp));
    let target = procedures
        .into_iter()
        .fold(Target::new("Sprite1", blocks), |t, def| t.with_procedure(def));
    Thread::new(script, Arc::new(target))
}

pub fn thread(arena: BlockArena, top: BlockId) -> Thread {
    thread_with(arena, Some(top), false, Vec::new())
}

pub fn number(n: f64) -> Value {
    Value::Number(n)
}

/// Recording host.
#[derive(Debug, Default)]
pub struct StubHost {
    pub now: f64,
    /// Clock advance applied after every yield by [`run`].
    pub frame_ms: f64,
    pub deadline_elapsed: bool,
    pub variables: HashMap<String, Value>,
    pub primitive_calls: Vec<(String, Vec<Value>)>,
    pub escapes: Vec<(BlockId, String, Vec<(String, Value)>)>,
    pub escape_result: Value,
    /// Primitives that complete asynchronously, after this many polls.
    pub slow_primitives: HashMap<String, u32>,
    pending: HashMap<u64, u32>,
    next_pending: u64,
    pub polls: u32,
    /// Request a stop on the given flag the first time this primitive runs.
    pub stop_on: HashSet<String>,
    pub stop_flag: Option<crate::lang::script::StopFlag>,
}

impl StubHost {
    pub fn new() -> Self {
        Self {
            frame_ms: 1000.0 / 30.0,
            ..Self::default()
        }
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.primitive_calls.iter().filter(|(n, _)| n == name).count()
    }
}

impl Host for StubHost {
    fn evaluate_block(
        &mut self,
        block: BlockId,
        opcode: &str,
        inputs: &[(String, Value)],
    ) -> Value {
        self.escapes
            .push((block, opcode.to_string(), inputs.to_vec()));
        self.escape_result.clone()
    }

    fn call_primitive(&mut self, name: &str, args: &[Value]) -> HostOutcome {
        self.primitive_calls.push((name.to_string(), args.to_vec()));
        if self.stop_on.contains(name) {
            if let Some(flag) = &self.stop_flag {
                flag.request();
            }
        }
        match self.slow_primitives.get(name) {
            Some(polls) => {
                let id = self.next_pending;
                self.next_pending += 1;
                self.pending.insert(id, *polls);
                HostOutcome::Pending(PendingId(id))
            }
            None => HostOutcome::Ready(Value::empty()),
        }
    }

    fn poll_pending(&mut self, id: PendingId) -> Option<Value> {
        self.polls += 1;
        let remaining = self.pending.get_mut(&id.0)?;
        if *remaining <= 1 {
            self.pending.remove(&id.0);
            Some(Value::from("done"))
        } else {
            *remaining -= 1;
            None
        }
    }

    fn variable(&self, name: &str) -> Value {
        self.variables.get(name).cloned().unwrap_or(Value::Number(0.0))
    }

    fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    fn now_ms(&self) -> f64 {
        self.now
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline_elapsed
    }
}

/// What a test scheduler saw while driving one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub yields: Vec<YieldKind>,
    pub outcome: StepOutcome,
}

impl Trace {
    pub fn yield_count(&self) -> usize {
        self.yields.len()
    }
}

/// Step `execution` until it finishes or stops, advancing the host clock by one
/// frame after every yield. Panics after `max_ticks` suspensions.
pub fn run(execution: &mut Execution, host: &mut StubHost, max_ticks: usize) -> Trace {
    let mut yields = Vec::new();
    loop {
        let outcome = execution.step(host).expect("execution should not fail");
        match outcome {
            StepOutcome::Yielded(kind) => {
                yields.push(kind);
                assert!(yields.len() <= max_ticks, "execution did not finish");
                host.now += host.frame_ms;
            }
            other => return Trace { yields, outcome: other },
        }
    }
}
