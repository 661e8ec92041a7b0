use crate::bytecode::compile_error::CompileError;
use crate::bytecode::image::RoutineImage;
use crate::bytecode::{Op, YieldKind};
use crate::ir::node::{Ir, IrCall, IrEscape, IrExpr, IrLoop, IrScript, IrStmt, LoopKind};
use crate::ir::shape::VariantKey;
use crate::jit::config::CompilerConfig;
use crate::lang::value::Value;

/// Lower one IR script (the entry or a single procedure variant) to a routine
/// image.
pub fn compile(
    script: &IrScript,
    ir: &Ir,
    config: &CompilerConfig,
) -> Result<RoutineImage, CompileError> {
    CodeGenerator::new(script, ir, config).compile(script)
}

pub struct CodeGenerator<'a> {
    /// Procedure map every call site is checked against
    ir: &'a Ir,
    config: &'a CompilerConfig,
    /// Output image
    image: RoutineImage,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(script: &IrScript, ir: &'a Ir, config: &'a CompilerConfig) -> Self {
        let mut image = RoutineImage::new(script.label.clone());
        image.warp = script.warp;
        Self { ir, config, image }
    }

    pub fn compile(mut self, script: &IrScript) -> Result<RoutineImage, CompileError> {
        self.image.arity = u16::try_from(script.arguments.len())
            .map_err(|_| CompileError::too_many("arguments", &self.image.name))?;

        self.compile_stmts(&script.stack)?;
        self.emit(Op::Return);

        tracing::debug!(
            routine = %self.image.name,
            ops = self.image.ops.len(),
            warp = self.image.warp,
            "generated routine"
        );
        Ok(self.image)
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn emit(&mut self, op: Op) -> usize {
        self.image.ops.push(op);
        self.image.ops.len() - 1
    }

    fn here(&self) -> usize {
        self.image.ops.len()
    }

    fn offset(&self, from: usize, to: usize) -> Result<i32, CompileError> {
        i32::try_from(to as i64 - from as i64)
            .map_err(|_| CompileError::too_many("instructions", &self.image.name))
    }

    /// Point the placeholder jump at `at` to the next instruction emitted.
    fn patch_to_here(&mut self, at: usize) -> Result<(), CompileError> {
        let offset = self.offset(at, self.here())?;
        match self.image.ops.get_mut(at) {
            Some(Op::Jump(o) | Op::JumpIfFalse(o) | Op::JumpIfTrue(o)) => *o = offset,
            Some(Op::Countdown { exit, .. }) => *exit = offset,
            other => {
                return Err(CompileError::internal(format!(
                    "cannot patch {:?} at pc={} as a jump",
                    other, at
                )));
            }
        }
        Ok(())
    }

    fn emit_jump_back(&mut self, target: usize) -> Result<(), CompileError> {
        let offset = self.offset(self.here(), target)?;
        self.emit(Op::Jump(offset));
        Ok(())
    }

    fn argc(&self, n: usize) -> Result<u16, CompileError> {
        u16::try_from(n).map_err(|_| CompileError::too_many("call arguments", &self.image.name))
    }

    fn call_support(&mut self, name: &str, argc: u16) -> Result<(), CompileError> {
        let import = intern(
            &mut self.image.support_imports,
            name,
            "support imports",
            &self.image.name,
        )?;
        self.emit(Op::CallSupport { import, argc });
        Ok(())
    }

    fn call_host(&mut self, name: &str, argc: u16) -> Result<(), CompileError> {
        let import = intern(
            &mut self.image.host_imports,
            name,
            "host imports",
            &self.image.name,
        )?;
        self.emit(Op::CallHost { import, argc });
        Ok(())
    }

    fn procedure_index(&mut self, key: &VariantKey) -> Result<u16, CompileError> {
        match self.image.procedures.iter().position(|k| k == key) {
            Some(i) => u16::try_from(i)
                .map_err(|_| CompileError::too_many("procedures", &self.image.name)),
            None => {
                let i = u16::try_from(self.image.procedures.len())
                    .map_err(|_| CompileError::too_many("procedures", &self.image.name))?;
                self.image.procedures.push(key.clone());
                Ok(i)
            }
        }
    }

    fn alloc_local(&mut self) -> Result<u16, CompileError> {
        let slot = self.image.locals;
        self.image.locals = slot
            .checked_add(1)
            .ok_or_else(|| CompileError::too_many("locals", &self.image.name))?;
        Ok(slot)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmts(&mut self, stmts: &[IrStmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &IrStmt) -> Result<(), CompileError> {
        match stmt {
            IrStmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                // Layout:
                //   <condition>
                //   JumpIfFalse(else)
                //   <then>
                //   Jump(end)          ; only with an else branch
                // else:
                //   <else>
                // end:
                self.compile_condition(condition)?;
                let skip_then = self.emit(Op::JumpIfFalse(0));
                self.compile_stmts(then_branch)?;

                if else_branch.is_empty() {
                    self.patch_to_here(skip_then)?;
                } else {
                    let skip_else = self.emit(Op::Jump(0));
                    self.patch_to_here(skip_then)?;
                    self.compile_stmts(else_branch)?;
                    self.patch_to_here(skip_else)?;
                }
            }

            IrStmt::Loop(l) => self.compile_loop(l)?,

            IrStmt::Call(call) => self.compile_call(call)?,

            IrStmt::SetVariable { name, value } => {
                self.compile_expr(value)?;
                self.emit(Op::SetVariable(name.clone()));
            }

            IrStmt::ChangeVariable { name, delta } => {
                self.emit(Op::GetVariable(name.clone()));
                self.compile_expr(delta)?;
                self.call_support("add", 2)?;
                self.emit(Op::SetVariable(name.clone()));
            }

            IrStmt::Wait { duration } => {
                self.compile_expr(duration)?;
                self.call_support("wait_duration", 1)?;
                self.emit(Op::StartTimer);
                self.emit(Op::Yield(YieldKind::Frame));
                self.emit(Op::WaitTimer);
            }

            IrStmt::Host { opcode, args } => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let argc = self.argc(args.len())?;
                self.call_host(opcode, argc)?;
                self.emit(Op::Drop);
            }

            IrStmt::Return => {
                self.emit(Op::Return);
            }

            IrStmt::Escape(escape) => {
                self.compile_escape(escape)?;
                self.emit(Op::Drop);
            }
        }
        Ok(())
    }

    /// Loop layout:
    ///
    /// ```text
    ///         <prologue>            ; repeat count / deadline counter
    /// top:    <exit test>           ; Countdown, JumpIfTrue or JumpIfFalse
    ///         <body>
    ///         Yield | CheckDeadline
    ///         Jump(top)
    /// exit:
    /// ```
    fn compile_loop(&mut self, l: &IrLoop) -> Result<(), CompileError> {
        let counter = match &l.kind {
            LoopKind::Repeat { times } => {
                self.compile_expr(times)?;
                self.call_support("repeat_count", 1)?;
                let slot = self.alloc_local()?;
                self.emit(Op::StoreLocal(slot));
                Some(slot)
            }
            _ => None,
        };

        let runs_warp = self.image.warp && l.warp_safe;
        let deadline = if runs_warp && self.config.warp_timer {
            let slot = self.alloc_local()?;
            self.emit(Op::Push(Value::Number(0.0)));
            self.emit(Op::StoreLocal(slot));
            Some(slot)
        } else {
            None
        };

        let top = self.here();
        let exit = match (&l.kind, counter) {
            (LoopKind::Repeat { .. }, Some(slot)) => {
                Some(self.emit(Op::Countdown {
                    counter: slot,
                    exit: 0,
                }))
            }
            (LoopKind::Until { condition }, _) | (LoopKind::WaitUntil { condition }, _) => {
                self.compile_condition(condition)?;
                Some(self.emit(Op::JumpIfTrue(0)))
            }
            (LoopKind::While { condition }, _) => {
                self.compile_condition(condition)?;
                Some(self.emit(Op::JumpIfFalse(0)))
            }
            (LoopKind::Forever, _) => None,
            (LoopKind::Repeat { .. }, None) => {
                return Err(CompileError::internal("repeat loop without a counter"));
            }
        };

        self.compile_stmts(&l.body)?;

        if runs_warp {
            if let Some(slot) = deadline {
                self.emit(Op::CheckDeadline {
                    counter: slot,
                    interval: l.check_interval.max(1),
                });
            }
        } else {
            self.emit(Op::Yield(YieldKind::Soft));
        }

        self.emit_jump_back(top)?;
        if let Some(at) = exit {
            self.patch_to_here(at)?;
        }
        Ok(())
    }

    fn compile_call(&mut self, call: &IrCall) -> Result<(), CompileError> {
        if self.ir.variant(&call.key).is_none() {
            return Err(CompileError::missing_variant(&self.image.name, &call.key));
        }

        if call.yield_before {
            self.emit(Op::Yield(YieldKind::Soft));
        }
        for arg in &call.args {
            self.compile_expr(arg)?;
        }

        let variant = self.procedure_index(&call.key)?;
        let argc = self.argc(call.args.len())?;
        self.emit(Op::CallProcedure { variant, argc });
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Evaluate `expr` and leave a boolean on the stack. Boolean-shaped
    /// expressions skip the coercion.
    fn compile_condition(&mut self, expr: &IrExpr) -> Result<(), CompileError> {
        self.compile_expr(expr)?;
        if !expr.shape().is_boolean() {
            self.call_support("to_boolean", 1)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &IrExpr) -> Result<(), CompileError> {
        match expr {
            IrExpr::Constant(value) => {
                self.emit(Op::Push(value.clone()));
            }
            IrExpr::Argument { index, .. } => {
                self.emit(Op::LoadArg(*index));
            }
            IrExpr::Variable(name) => {
                self.emit(Op::GetVariable(name.clone()));
            }
            IrExpr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.call_support(op.support_name(), 1)?;
            }
            IrExpr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.call_support(op.support_name(), 2)?;
            }
            IrExpr::Host { opcode, args, .. } => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let argc = self.argc(args.len())?;
                self.call_host(opcode, argc)?;
            }
            IrExpr::Escape(escape) => self.compile_escape(escape)?,
        }
        Ok(())
    }

    fn compile_escape(&mut self, escape: &IrEscape) -> Result<(), CompileError> {
        for (_, input) in &escape.inputs {
            self.compile_expr(input)?;
        }
        self.emit(Op::Escape {
            block: escape.block,
            opcode: escape.opcode.clone(),
            inputs: escape.inputs.iter().map(|(name, _)| name.clone()).collect(),
        });
        Ok(())
    }
}

/// Index of `name` in `table`, appending it if absent.
fn intern(
    table: &mut Vec<String>,
    name: &str,
    what: &'static str,
    routine: &str,
) -> Result<u16, CompileError> {
    let index = match table.iter().position(|n| n == name) {
        Some(i) => i,
        None => {
            table.push(name.to_string());
            table.len() - 1
        }
    };
    u16::try_from(index).map_err(|_| CompileError::too_many(what, routine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::verify::verify;
    use crate::ir::node::BinaryOp;
    use crate::ir::shape::{Shape, Signature};
    use crate::lang::block::{BlockArena, BlockId};
    use crate::lang::script::Script;
    use crate::runtime::host::{PrimitiveKind, primitive};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ir_script(stack: Vec<IrStmt>, warp: bool) -> IrScript {
        IrScript {
            script: Arc::new(Script::new(Arc::new(BlockArena::new()), None)),
            label: "test".to_string(),
            warp,
            arguments: Vec::new(),
            key: None,
            stack,
        }
    }

    fn compile_stack(stack: Vec<IrStmt>, warp: bool) -> Result<RoutineImage, CompileError> {
        let ir = Ir {
            entry: ir_script(stack, warp),
            procedures: BTreeMap::new(),
        };
        compile(&ir.entry, &ir, &CompilerConfig::default())
    }

    fn move_steps() -> IrStmt {
        IrStmt::Host {
            opcode: "motion_movesteps".into(),
            args: vec![IrExpr::constant(10.0)],
        }
    }

    fn repeat(times: f64, warp_safe: bool, check_interval: u32) -> IrStmt {
        IrStmt::Loop(IrLoop {
            kind: LoopKind::Repeat {
                times: IrExpr::constant(times),
            },
            body: vec![move_steps()],
            warp_safe,
            check_interval,
        })
    }

    #[test]
    fn test_repeat_structure_non_warp() {
        let image = compile_stack(vec![repeat(3.0, true, 1)], false).unwrap();

        assert_eq!(
            image.ops,
            vec![
                Op::Push(Value::Number(3.0)),
                Op::CallSupport { import: 0, argc: 1 },
                Op::StoreLocal(0),
                Op::Countdown { counter: 0, exit: 6 },
                Op::Push(Value::Number(10.0)),
                Op::CallHost { import: 0, argc: 1 },
                Op::Drop,
                Op::Yield(YieldKind::Soft),
                Op::Jump(-5),
                Op::Return,
            ]
        );
        assert_eq!(image.support_imports, vec!["repeat_count"]);
        assert_eq!(image.host_imports, vec!["motion_movesteps"]);
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_repeat_structure_warp_checks_deadline() {
        let image = compile_stack(vec![repeat(3.0, true, 8)], true).unwrap();

        assert!(image.warp);
        assert!(!image.ops.iter().any(|op| matches!(op, Op::Yield(_))));
        assert!(image.ops.contains(&Op::CheckDeadline {
            counter: 1,
            interval: 8
        }));
        assert_eq!(image.locals, 2);
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_warp_without_timer_has_no_checks() {
        let ir = Ir {
            entry: ir_script(vec![repeat(3.0, true, 8)], true),
            procedures: BTreeMap::new(),
        };
        let config = CompilerConfig::default().with_warp_timer(false);
        let image = compile(&ir.entry, &ir, &config).unwrap();

        assert!(!image.ops.iter().any(|op| matches!(op, Op::CheckDeadline { .. } | Op::Yield(_))));
    }

    #[test]
    fn test_unsafe_warp_loop_still_yields() {
        let image = compile_stack(vec![repeat(3.0, false, 1)], true).unwrap();
        assert!(image.ops.contains(&Op::Yield(YieldKind::Soft)));
    }

    #[test]
    fn test_if_else_offsets() {
        let image = compile_stack(
            vec![IrStmt::If {
                condition: IrExpr::constant(true),
                then_branch: vec![move_steps()],
                else_branch: vec![IrStmt::Return],
            }],
            false,
        )
        .unwrap();

        // Push(true), JumpIfFalse(5), Push, CallHost, Drop, Jump(2), Return, Return
        assert_eq!(image.ops[1], Op::JumpIfFalse(5));
        assert_eq!(image.ops[5], Op::Jump(2));
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_non_boolean_condition_is_coerced() {
        let image = compile_stack(
            vec![IrStmt::If {
                condition: IrExpr::Variable("flag".into()),
                then_branch: vec![],
                else_branch: vec![],
            }],
            false,
        )
        .unwrap();
        assert_eq!(image.support_imports, vec!["to_boolean"]);

        let image = compile_stack(
            vec![IrStmt::If {
                condition: IrExpr::binary(
                    BinaryOp::LessThan,
                    IrExpr::constant(1.0),
                    IrExpr::constant(2.0),
                ),
                then_branch: vec![],
                else_branch: vec![],
            }],
            false,
        )
        .unwrap();
        assert_eq!(image.support_imports, vec!["compare_less_than"]);
    }

    #[test]
    fn test_host_reporter_condition_is_coerced() {
        let shape = match primitive("sensing_mousedown").map(|p| p.kind) {
            Some(PrimitiveKind::Reporter(shape)) => shape,
            other => panic!("expected a reporter, got {:?}", other),
        };
        let image = compile_stack(
            vec![IrStmt::If {
                condition: IrExpr::Host {
                    opcode: "sensing_mousedown".into(),
                    args: vec![],
                    shape,
                },
                then_branch: vec![],
                else_branch: vec![],
            }],
            false,
        )
        .unwrap();
        assert_eq!(image.host_imports, vec!["sensing_mousedown"]);
        assert_eq!(image.support_imports, vec!["to_boolean"]);
    }

    #[test]
    fn test_boolean_argument_skips_coercion() {
        let image = compile_stack(
            vec![IrStmt::Loop(IrLoop {
                kind: LoopKind::While {
                    condition: IrExpr::Argument {
                        index: 0,
                        shape: Shape::Boolean,
                    },
                },
                body: vec![],
                warp_safe: true,
                check_interval: 1,
            })],
            false,
        )
        .unwrap();
        assert!(image.support_imports.is_empty());
    }

    #[test]
    fn test_missing_variant_is_fatal() {
        let key = VariantKey::new("ghost", Signature::canonical(&[]), false);
        let result = compile_stack(
            vec![IrStmt::Call(IrCall {
                key,
                args: vec![],
                yield_before: false,
            })],
            false,
        );
        assert!(matches!(result, Err(CompileError::MissingVariant { .. })));
    }

    #[test]
    fn test_call_lowering() {
        let key = VariantKey::new("f %s", Signature::canonical(&[Shape::Number]), false);
        let mut procedures = BTreeMap::new();
        procedures.insert(key.clone(), ir_script(vec![], false));
        let ir = Ir {
            entry: ir_script(
                vec![IrStmt::Call(IrCall {
                    key: key.clone(),
                    args: vec![IrExpr::constant(5.0)],
                    yield_before: true,
                })],
                false,
            ),
            procedures,
        };

        let image = compile(&ir.entry, &ir, &CompilerConfig::default()).unwrap();
        assert_eq!(
            image.ops,
            vec![
                Op::Yield(YieldKind::Soft),
                Op::Push(Value::Number(5.0)),
                Op::CallProcedure {
                    variant: 0,
                    argc: 1
                },
                Op::Return,
            ]
        );
        assert_eq!(image.procedures, vec![key]);
    }

    #[test]
    fn test_escape_lowering() {
        let escape = IrEscape {
            block: BlockId(7),
            opcode: "pen_setPenColorTo".into(),
            inputs: vec![("COLOR".into(), IrExpr::constant("#ff0000"))],
        };
        let image = compile_stack(vec![IrStmt::Escape(escape)], false).unwrap();
        assert_eq!(
            image.ops,
            vec![
                Op::Push(Value::from("#ff0000")),
                Op::Escape {
                    block: BlockId(7),
                    opcode: "pen_setPenColorTo".into(),
                    inputs: vec!["COLOR".into()],
                },
                Op::Drop,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_wait_lowering() {
        let image = compile_stack(
            vec![IrStmt::Wait {
                duration: IrExpr::constant(0.5),
            }],
            false,
        )
        .unwrap();
        assert_eq!(
            &image.ops[1..],
            &[
                Op::CallSupport { import: 0, argc: 1 },
                Op::StartTimer,
                Op::Yield(YieldKind::Frame),
                Op::WaitTimer,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_imports_are_interned() {
        let image = compile_stack(vec![move_steps(), move_steps()], false).unwrap();
        assert_eq!(image.host_imports.len(), 1);
    }
}
