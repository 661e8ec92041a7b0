use super::generate_error::GenerationError;
use super::node::{
    BinaryOp, Ir, IrCall, IrEscape, IrExpr, IrLoop, IrScript, IrStmt, LoopKind, UnaryOp,
    contains_wait,
};
use super::shape::{Shape, Signature, VariantKey};
use super::variants::{VariantRequest, VariantResolver};
use crate::jit::config::CompilerConfig;
use crate::lang::block::{Block, BlockArena, BlockId, Input};
use crate::lang::script::{ParamKind, ProcedureDefinition, Script, Thread};
use crate::lang::value::{Value, format_number};
use crate::runtime::host::{PrimitiveKind, primitive};
use crate::runtime::support::parse_number;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Per-routine state while walking one script or procedure body.
struct ScriptContext {
    label: String,
    blocks: Arc<BlockArena>,
    warp: bool,
    definition: Option<Arc<ProcedureDefinition>>,
    arguments: Vec<Shape>,
    key: Option<VariantKey>,
    visited: HashSet<BlockId>,
}

/// Builds the IR of a thread: its entry script plus every procedure variant
/// reachable from it.
pub struct IrGenerator<'a> {
    thread: &'a Thread,
    config: &'a CompilerConfig,
    resolver: VariantResolver,
}

impl<'a> IrGenerator<'a> {
    pub fn new(thread: &'a Thread, config: &'a CompilerConfig) -> Self {
        Self {
            thread,
            config,
            resolver: VariantResolver::new(),
        }
    }

    pub fn generate(mut self) -> Result<Ir, GenerationError> {
        let entry = self.generate_entry()?;

        let mut procedures = BTreeMap::new();
        while let Some(request) = self.resolver.next_pending() {
            let key = request.key.clone();
            let variant = self.generate_variant(request)?;
            procedures.insert(key, variant);
        }

        tracing::debug!(
            script = %entry.label,
            statements = entry.stack.len(),
            variants = procedures.len(),
            "generated IR"
        );

        Ok(Ir { entry, procedures })
    }

    fn generate_entry(&mut self) -> Result<IrScript, GenerationError> {
        let script = Arc::clone(self.thread.script());
        let top = script
            .top()
            .ok_or_else(|| GenerationError::missing_root(script.label()))?;

        let mut ctx = ScriptContext {
            label: script.label().to_string(),
            blocks: Arc::clone(script.blocks()),
            warp: script.is_warp(),
            definition: None,
            arguments: Vec::new(),
            key: None,
            visited: HashSet::new(),
        };

        let stack = self.walk_stack(&mut ctx, Some(top))?;
        Ok(IrScript {
            script,
            label: ctx.label,
            warp: ctx.warp,
            arguments: Vec::new(),
            key: None,
            stack,
        })
    }

    fn generate_variant(&mut self, request: VariantRequest) -> Result<IrScript, GenerationError> {
        let VariantRequest { key, definition } = request;
        let blocks = Arc::clone(&self.thread.target().blocks);
        let script: Arc<Script> = definition.variant_script(&key, &blocks);

        let mut ctx = ScriptContext {
            label: key.to_string(),
            blocks,
            warp: key.warp,
            definition: Some(Arc::clone(&definition)),
            arguments: key.signature.shapes().to_vec(),
            key: Some(key.clone()),
            visited: HashSet::new(),
        };

        let stack = self.walk_stack(&mut ctx, definition.body)?;
        Ok(IrScript {
            script,
            label: ctx.label,
            warp: ctx.warp,
            arguments: ctx.arguments,
            key: Some(key),
            stack,
        })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn walk_stack(
        &mut self,
        ctx: &mut ScriptContext,
        first: Option<BlockId>,
    ) -> Result<Vec<IrStmt>, GenerationError> {
        let mut stmts = Vec::new();
        let mut cursor = first;

        while let Some(id) = cursor {
            let blocks = Arc::clone(&ctx.blocks);
            let block = visit(ctx, &blocks, id)?;
            if let Some(stmt) = self.statement(ctx, id, block)? {
                stmts.push(stmt);
            }
            cursor = block.next;
        }

        Ok(stmts)
    }

    fn substack(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
        name: &str,
    ) -> Result<Vec<IrStmt>, GenerationError> {
        match block.input(name) {
            Some(Input::Block(id)) => self.walk_stack(ctx, Some(*id)),
            _ => Ok(Vec::new()),
        }
    }

    fn statement(
        &mut self,
        ctx: &mut ScriptContext,
        id: BlockId,
        block: &Block,
    ) -> Result<Option<IrStmt>, GenerationError> {
        let stmt = match block.opcode.as_str() {
            op if is_hat(op) => return Ok(None),

            "control_repeat" => {
                let times = self.input(ctx, block, "TIMES")?;
                let body = self.substack(ctx, block, "SUBSTACK")?;
                IrStmt::Loop(self.make_loop(ctx, LoopKind::Repeat { times }, body))
            }
            "control_forever" => {
                let body = self.substack(ctx, block, "SUBSTACK")?;
                IrStmt::Loop(self.make_loop(ctx, LoopKind::Forever, body))
            }
            "control_repeat_until" => {
                let condition = self.condition(ctx, block, "CONDITION")?;
                let body = self.substack(ctx, block, "SUBSTACK")?;
                IrStmt::Loop(self.make_loop(ctx, LoopKind::Until { condition }, body))
            }
            "control_while" => {
                let condition = self.condition(ctx, block, "CONDITION")?;
                let body = self.substack(ctx, block, "SUBSTACK")?;
                IrStmt::Loop(self.make_loop(ctx, LoopKind::While { condition }, body))
            }
            "control_wait_until" => {
                let condition = self.condition(ctx, block, "CONDITION")?;
                IrStmt::Loop(self.make_loop(ctx, LoopKind::WaitUntil { condition }, Vec::new()))
            }
            "control_if" => IrStmt::If {
                condition: self.condition(ctx, block, "CONDITION")?,
                then_branch: self.substack(ctx, block, "SUBSTACK")?,
                else_branch: Vec::new(),
            },
            "control_if_else" => IrStmt::If {
                condition: self.condition(ctx, block, "CONDITION")?,
                then_branch: self.substack(ctx, block, "SUBSTACK")?,
                else_branch: self.substack(ctx, block, "SUBSTACK2")?,
            },
            "control_wait" => IrStmt::Wait {
                duration: self.input(ctx, block, "DURATION")?,
            },
            "control_stop" if block.field("STOP_OPTION") == Some("this script") => IrStmt::Return,

            "data_setvariableto" => IrStmt::SetVariable {
                name: block.field("VARIABLE").unwrap_or_default().to_string(),
                value: self.input(ctx, block, "VALUE")?,
            },
            "data_changevariableby" => IrStmt::ChangeVariable {
                name: block.field("VARIABLE").unwrap_or_default().to_string(),
                delta: self.input(ctx, block, "VALUE")?,
            },

            "procedures_call" => return self.call(ctx, block),

            op => match primitive(op) {
                Some(p) if p.kind == PrimitiveKind::Statement => {
                    let mut args = Vec::with_capacity(p.inputs.len());
                    for name in p.inputs {
                        args.push(self.input(ctx, block, name)?);
                    }
                    IrStmt::Host {
                        opcode: p.opcode.to_string(),
                        args,
                    }
                }
                _ => IrStmt::Escape(self.escape(ctx, id, block)?),
            },
        };
        Ok(Some(stmt))
    }

    fn make_loop(&self, ctx: &ScriptContext, kind: LoopKind, body: Vec<IrStmt>) -> IrLoop {
        let warp_safe = !matches!(kind, LoopKind::WaitUntil { .. }) && !contains_wait(&body);
        let check_interval = if ctx.warp && warp_safe {
            self.config.deadline_check_interval.max(1)
        } else {
            1
        };
        IrLoop {
            kind,
            body,
            warp_safe,
            check_interval,
        }
    }

    fn call(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
    ) -> Result<Option<IrStmt>, GenerationError> {
        let proccode = block
            .mutation
            .as_ref()
            .map(|m| m.proccode.as_str())
            .unwrap_or_default();

        let Some(definition) = self.thread.target().procedure(proccode).cloned() else {
            tracing::warn!(proccode, script = %ctx.label, "call to undefined procedure compiled as no-op");
            return Ok(None);
        };

        let mut args = Vec::with_capacity(definition.params.len());
        let mut shapes = Vec::with_capacity(definition.params.len());
        for param in &definition.params {
            let arg = match (block.input(&param.id), param.kind) {
                (None, ParamKind::Boolean) => IrExpr::constant(false),
                (None, ParamKind::StringNumber) => IrExpr::constant(""),
                _ => self.input(ctx, block, &param.id)?,
            };
            shapes.push(arg.shape());
            args.push(arg);
        }

        let key = VariantKey::new(
            definition.proccode.as_str(),
            Signature::canonical(&shapes),
            ctx.warp || definition.warp,
        );
        self.resolver.request(&key, &definition);

        let yield_before = !ctx.warp && ctx.key.as_ref() == Some(&key);
        Ok(Some(IrStmt::Call(IrCall {
            key,
            args,
            yield_before,
        })))
    }

    fn escape(
        &mut self,
        ctx: &mut ScriptContext,
        id: BlockId,
        block: &Block,
    ) -> Result<IrEscape, GenerationError> {
        tracing::debug!(opcode = %block.opcode, block = %id, script = %ctx.label, "interpreter escape");

        let mut inputs = Vec::new();
        for (name, input) in &block.inputs {
            if name.starts_with("SUBSTACK") {
                continue;
            }
            inputs.push((name.clone(), self.lower_input(ctx, input)?));
        }
        Ok(IrEscape {
            block: id,
            opcode: block.opcode.clone(),
            inputs,
        })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn lower_input(&mut self, ctx: &mut ScriptContext, input: &Input) -> Result<IrExpr, GenerationError> {
        match input {
            Input::Literal(value) => Ok(IrExpr::Constant(value.clone())),
            Input::Block(id) => self.reporter(ctx, *id),
        }
    }

    /// Value of an input slot; absent slots read as the empty string.
    fn input(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
        name: &str,
    ) -> Result<IrExpr, GenerationError> {
        match block.input(name) {
            Some(input) => self.lower_input(ctx, input),
            None => Ok(IrExpr::Constant(Value::empty())),
        }
    }

    /// Value of a boolean slot; absent slots read as `false`.
    fn condition(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
        name: &str,
    ) -> Result<IrExpr, GenerationError> {
        match block.input(name) {
            Some(input) => self.lower_input(ctx, input),
            None => Ok(IrExpr::constant(false)),
        }
    }

    fn binary(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
        op: BinaryOp,
        lhs: &str,
        rhs: &str,
    ) -> Result<IrExpr, GenerationError> {
        let lhs = self.input(ctx, block, lhs)?;
        let rhs = self.input(ctx, block, rhs)?;
        Ok(IrExpr::binary(op, lhs, rhs))
    }

    fn logical(
        &mut self,
        ctx: &mut ScriptContext,
        block: &Block,
        op: BinaryOp,
    ) -> Result<IrExpr, GenerationError> {
        let lhs = self.condition(ctx, block, "OPERAND1")?;
        let rhs = self.condition(ctx, block, "OPERAND2")?;
        Ok(IrExpr::binary(op, lhs, rhs))
    }

    fn reporter(&mut self, ctx: &mut ScriptContext, id: BlockId) -> Result<IrExpr, GenerationError> {
        let blocks = Arc::clone(&ctx.blocks);
        let block = visit(ctx, &blocks, id)?;

        let expr = match block.opcode.as_str() {
            "math_number" | "math_whole_number" | "math_positive_number" | "math_integer"
            | "math_angle" => shadow_number(block.field("NUM").unwrap_or_default()),
            "text" => IrExpr::constant(block.field("TEXT").unwrap_or_default()),

            "operator_add" => self.binary(ctx, block, BinaryOp::Add, "NUM1", "NUM2")?,
            "operator_subtract" => self.binary(ctx, block, BinaryOp::Subtract, "NUM1", "NUM2")?,
            "operator_multiply" => self.binary(ctx, block, BinaryOp::Multiply, "NUM1", "NUM2")?,
            "operator_divide" => self.binary(ctx, block, BinaryOp::Divide, "NUM1", "NUM2")?,
            "operator_mod" => self.binary(ctx, block, BinaryOp::Modulo, "NUM1", "NUM2")?,
            "operator_equals" => {
                self.binary(ctx, block, BinaryOp::Equals, "OPERAND1", "OPERAND2")?
            }
            "operator_gt" => {
                self.binary(ctx, block, BinaryOp::GreaterThan, "OPERAND1", "OPERAND2")?
            }
            "operator_lt" => self.binary(ctx, block, BinaryOp::LessThan, "OPERAND1", "OPERAND2")?,
            "operator_and" => self.logical(ctx, block, BinaryOp::And)?,
            "operator_or" => self.logical(ctx, block, BinaryOp::Or)?,
            "operator_not" => {
                let operand = self.condition(ctx, block, "OPERAND")?;
                IrExpr::unary(UnaryOp::Not, operand)
            }
            "operator_join" => self.binary(ctx, block, BinaryOp::Join, "STRING1", "STRING2")?,
            "operator_letter_of" => {
                self.binary(ctx, block, BinaryOp::LetterOf, "LETTER", "STRING")?
            }
            "operator_contains" => {
                self.binary(ctx, block, BinaryOp::Contains, "STRING1", "STRING2")?
            }
            "operator_length" => {
                let operand = self.input(ctx, block, "STRING")?;
                IrExpr::unary(UnaryOp::Length, operand)
            }
            "operator_round" => {
                let operand = self.input(ctx, block, "NUM")?;
                IrExpr::unary(UnaryOp::Round, operand)
            }

            "data_variable" => {
                IrExpr::Variable(block.field("VARIABLE").unwrap_or_default().to_string())
            }

            "argument_reporter_string_number" => argument(ctx, block, ParamKind::StringNumber),
            "argument_reporter_boolean" => argument(ctx, block, ParamKind::Boolean),

            op => match primitive(op) {
                Some(p) => match p.kind {
                    PrimitiveKind::Reporter(shape) => {
                        let mut args = Vec::with_capacity(p.inputs.len());
                        for name in p.inputs {
                            args.push(self.input(ctx, block, name)?);
                        }
                        IrExpr::Host {
                            opcode: p.opcode.to_string(),
                            args,
                            shape,
                        }
                    }
                    PrimitiveKind::Statement => IrExpr::Escape(self.escape(ctx, id, block)?),
                },
                None => IrExpr::Escape(self.escape(ctx, id, block)?),
            },
        };
        Ok(expr)
    }
}

/// Look up `id` and mark it visited in the current routine.
fn visit<'b>(
    ctx: &mut ScriptContext,
    blocks: &'b BlockArena,
    id: BlockId,
) -> Result<&'b Block, GenerationError> {
    let block = blocks
        .get(id)
        .ok_or_else(|| GenerationError::missing_block(&ctx.label, id))?;
    if !ctx.visited.insert(id) {
        return Err(GenerationError::cycle(&ctx.label, id));
    }
    Ok(block)
}

fn is_hat(opcode: &str) -> bool {
    opcode.starts_with("event_when")
        || opcode == "control_start_as_clone"
        || opcode == "procedures_definition"
}

/// Number shadows hold text; keep it as a number only when that is lossless.
fn shadow_number(text: &str) -> IrExpr {
    let n = parse_number(text);
    if !n.is_nan() && format_number(n) == text {
        IrExpr::constant(n)
    } else {
        IrExpr::constant(text)
    }
}

fn argument(ctx: &ScriptContext, block: &Block, kind: ParamKind) -> IrExpr {
    let name = block.field("VALUE").unwrap_or_default();
    let index = ctx
        .definition
        .as_ref()
        .and_then(|def| def.param_index(name))
        .and_then(|i| u16::try_from(i).ok().map(|index| (i, index)));

    match index {
        Some((i, index)) => IrExpr::Argument {
            index,
            shape: ctx.arguments.get(i).copied().unwrap_or(Shape::Unknown),
        },
        // Outside its definition an argument reporter reads as a default
        None => match kind {
            ParamKind::StringNumber => IrExpr::constant(0.0),
            ParamKind::Boolean => IrExpr::constant(false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flag_script, thread, thread_with};

    fn generate(thread: &Thread) -> Result<Ir, GenerationError> {
        IrGenerator::new(thread, &CompilerConfig::default()).generate()
    }

    fn call(proccode: &str, arg: Input) -> Block {
        Block::new("procedures_call")
            .with_proccode(proccode)
            .with_input("arg0", arg)
    }

    #[test]
    fn test_hat_is_skipped() {
        let mut arena = BlockArena::new();
        let hat = flag_script(
            &mut arena,
            vec![Block::new("motion_movesteps").with_literal("STEPS", 10.0)],
        );
        let ir = generate(&thread(arena, hat)).unwrap();

        assert_eq!(
            ir.entry.stack,
            vec![IrStmt::Host {
                opcode: "motion_movesteps".into(),
                args: vec![IrExpr::constant(10.0)],
            }]
        );
        assert!(ir.procedures.is_empty());
    }

    #[test]
    fn test_missing_root() {
        let t = thread_with(BlockArena::new(), None, false, Vec::new());
        assert!(matches!(
            generate(&t),
            Err(GenerationError::MissingRoot { .. })
        ));
    }

    #[test]
    fn test_dangling_next_is_reported() {
        let mut arena = BlockArena::new();
        let hat = arena.insert(Block::new("event_whenflagclicked").with_next(BlockId(42)));
        assert!(matches!(
            generate(&thread(arena, hat)),
            Err(GenerationError::MissingBlock { id: BlockId(42), .. })
        ));
    }

    #[test]
    fn test_next_into_visited_block_is_a_cycle() {
        let mut arena = BlockArena::new();
        let hat = flag_script(&mut arena, vec![Block::new("looks_show"), Block::new("looks_hide")]);
        let last = BlockId(2);
        arena.link(last, BlockId(1));

        match generate(&thread(arena, hat)) {
            Err(GenerationError::Cycle { id, .. }) => assert_eq!(id, BlockId(1)),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_opcode_becomes_escape() {
        let mut arena = BlockArena::new();
        let mystery = arena.insert(Block::new("pen_penDown"));
        let set = Block::new("data_setvariableto")
            .with_field("VARIABLE", "x")
            .with_block("VALUE", mystery);
        let hat = flag_script(&mut arena, vec![set]);

        let ir = generate(&thread(arena, hat)).unwrap();
        match &ir.entry.stack[0] {
            IrStmt::SetVariable { name, value } => {
                assert_eq!(name, "x");
                assert!(matches!(value, IrExpr::Escape(e) if e.opcode == "pen_penDown" && e.block == mystery));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_interpreter_only_block_escapes_with_inputs() {
        let mut arena = BlockArena::new();
        let glide = Block::new("motion_glidesecstoxy")
            .with_literal("SECS", 1.0)
            .with_literal("X", 0.0)
            .with_literal("Y", 5.0);
        let hat = flag_script(&mut arena, vec![glide]);

        let ir = generate(&thread(arena, hat)).unwrap();
        let IrStmt::Escape(escape) = &ir.entry.stack[0] else {
            panic!("expected escape");
        };
        let names: Vec<_> = escape.inputs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["SECS", "X", "Y"]);
    }

    #[test]
    fn test_loop_yield_policy_follows_warp() {
        let build = |warp: bool| {
            let mut arena = BlockArena::new();
            let body = arena.insert(Block::new("motion_movesteps").with_literal("STEPS", 10.0));
            let repeat = Block::new("control_repeat")
                .with_literal("TIMES", 3.0)
                .with_block("SUBSTACK", body);
            let hat = flag_script(&mut arena, vec![repeat]);
            thread_with(arena, Some(hat), warp, Vec::new())
        };

        let normal = generate(&build(false)).unwrap();
        let IrStmt::Loop(l) = &normal.entry.stack[0] else {
            panic!("expected loop");
        };
        assert!(l.warp_safe);
        assert_eq!(l.check_interval, 1);

        let warp = generate(&build(true)).unwrap();
        let IrStmt::Loop(l) = &warp.entry.stack[0] else {
            panic!("expected loop");
        };
        assert_eq!(l.check_interval, 16);
    }

    #[test]
    fn test_loop_with_wait_is_not_warp_safe() {
        let mut arena = BlockArena::new();
        let wait = arena.insert(Block::new("control_wait").with_literal("DURATION", 0.1));
        let forever = Block::new("control_forever").with_block("SUBSTACK", wait);
        let hat = flag_script(&mut arena, vec![forever]);

        let ir = generate(&thread_with(arena, Some(hat), true, Vec::new())).unwrap();
        let IrStmt::Loop(l) = &ir.entry.stack[0] else {
            panic!("expected loop");
        };
        assert!(!l.warp_safe);
        assert_eq!(l.check_interval, 1);
    }

    #[test]
    fn test_compatible_call_sites_share_a_variant() {
        let mut arena = BlockArena::new();
        let hat = flag_script(
            &mut arena,
            vec![
                call("f %s", Input::Literal(Value::Number(5.0))),
                call("f %s", Input::Literal(Value::from("hi"))),
            ],
        );
        let def = ProcedureDefinition::new("f %s", None).with_param("arg0", "v", ParamKind::StringNumber);

        let ir = generate(&thread_with(arena, Some(hat), false, vec![def])).unwrap();
        assert_eq!(ir.procedures.len(), 1);
    }

    #[test]
    fn test_incompatible_call_sites_split() {
        let mut arena = BlockArena::new();
        let lt = arena.insert(
            Block::new("operator_lt")
                .with_literal("OPERAND1", 1.0)
                .with_literal("OPERAND2", 2.0),
        );
        let hat = flag_script(
            &mut arena,
            vec![
                call("f %s", Input::Literal(Value::Number(5.0))),
                call("f %s", Input::Block(lt)),
            ],
        );
        let def = ProcedureDefinition::new("f %s", None).with_param("arg0", "v", ParamKind::StringNumber);

        let ir = generate(&thread_with(arena, Some(hat), false, vec![def])).unwrap();
        let signatures: Vec<_> = ir.procedures.keys().map(|k| k.signature.to_string()).collect();
        assert_eq!(signatures, vec!["boolean", "numeric-or-string"]);
    }

    #[test]
    fn test_argument_reporter_takes_call_site_shape() {
        let mut arena = BlockArena::new();
        let show = arena.insert(Block::new("looks_show"));
        let reporter =
            arena.insert(Block::new("argument_reporter_boolean").with_field("VALUE", "flag"));
        let body = arena.insert(
            Block::new("control_if")
                .with_block("CONDITION", reporter)
                .with_block("SUBSTACK", show),
        );
        let gt = arena.insert(
            Block::new("operator_gt")
                .with_literal("OPERAND1", 3.0)
                .with_literal("OPERAND2", 2.0),
        );
        let hat = flag_script(&mut arena, vec![call("check %b", Input::Block(gt))]);
        let def = ProcedureDefinition::new("check %b", Some(body))
            .with_param("arg0", "flag", ParamKind::Boolean);

        let ir = generate(&thread_with(arena, Some(hat), false, vec![def])).unwrap();
        let (key, variant) = ir.procedures.iter().next().unwrap();
        assert_eq!(key.signature.shapes(), &[Shape::Boolean]);
        match &variant.stack[0] {
            IrStmt::If { condition, .. } => assert_eq!(
                condition,
                &IrExpr::Argument {
                    index: 0,
                    shape: Shape::Boolean
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_direct_recursion_yields_outside_warp() {
        let mut arena = BlockArena::new();
        let recurse = arena.insert(call("loop %s", Input::Literal(Value::Number(1.0))));
        let hat = flag_script(&mut arena, vec![call("loop %s", Input::Literal(Value::Number(1.0)))]);
        let def = ProcedureDefinition::new("loop %s", Some(recurse))
            .with_param("arg0", "n", ParamKind::StringNumber);

        let ir = generate(&thread_with(arena, Some(hat), false, vec![def])).unwrap();
        let IrStmt::Call(outer) = &ir.entry.stack[0] else {
            panic!("expected call");
        };
        assert!(!outer.yield_before);

        let variant = ir.variant(&outer.key).unwrap();
        let IrStmt::Call(inner) = &variant.stack[0] else {
            panic!("expected call");
        };
        assert_eq!(inner.key, outer.key);
        assert!(inner.yield_before);
        assert_eq!(ir.procedures.len(), 1);
    }

    #[test]
    fn test_warp_context_is_inherited() {
        let mut arena = BlockArena::new();
        let hat = flag_script(&mut arena, vec![Block::new("procedures_call").with_proccode("go")]);
        let def = ProcedureDefinition::new("go", None);

        let ir = generate(&thread_with(arena, Some(hat), true, vec![def])).unwrap();
        let key = ir.procedures.keys().next().unwrap();
        assert!(key.warp);
    }

    #[test]
    fn test_undefined_procedure_is_a_no_op() {
        let mut arena = BlockArena::new();
        let hat = flag_script(
            &mut arena,
            vec![
                Block::new("procedures_call").with_proccode("nowhere"),
                Block::new("looks_show"),
            ],
        );

        let ir = generate(&thread(arena, hat)).unwrap();
        assert_eq!(ir.entry.stack.len(), 1);
        assert!(ir.procedures.is_empty());
    }

    #[test]
    fn test_missing_inputs_use_defaults() {
        let mut arena = BlockArena::new();
        let hat = flag_script(
            &mut arena,
            vec![Block::new("control_if"), Block::new("control_wait")],
        );

        let ir = generate(&thread(arena, hat)).unwrap();
        assert_eq!(
            ir.entry.stack[0],
            IrStmt::If {
                condition: IrExpr::constant(false),
                then_branch: vec![],
                else_branch: vec![],
            }
        );
        assert_eq!(
            ir.entry.stack[1],
            IrStmt::Wait {
                duration: IrExpr::Constant(Value::empty())
            }
        );
    }

    #[test]
    fn test_shadow_numbers() {
        assert_eq!(shadow_number("10"), IrExpr::constant(10.0));
        assert_eq!(shadow_number("0.5"), IrExpr::constant(0.5));
        assert_eq!(shadow_number("0x10"), IrExpr::constant("0x10"));
        assert_eq!(shadow_number(""), IrExpr::constant(""));
    }

    #[test]
    fn test_stop_this_script_returns() {
        let mut arena = BlockArena::new();
        let hat = flag_script(
            &mut arena,
            vec![
                Block::new("control_stop").with_field("STOP_OPTION", "this script"),
                Block::new("control_stop").with_field("STOP_OPTION", "all"),
            ],
        );

        let ir = generate(&thread(arena, hat)).unwrap();
        assert_eq!(ir.entry.stack[0], IrStmt::Return);
        assert!(matches!(ir.entry.stack[1], IrStmt::Escape(_)));
    }
}
