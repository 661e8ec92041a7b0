use super::shape::{Shape, VariantKey};
use crate::lang::block::BlockId;
use crate::lang::script::Script;
use crate::lang::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Output of IR generation for one thread.
#[derive(Debug)]
pub struct Ir {
    pub entry: IrScript,
    /// Every procedure variant reachable from `entry`, transitively.
    pub procedures: BTreeMap<VariantKey, IrScript>,
}

impl Ir {
    pub fn variant(&self, key: &VariantKey) -> Option<&IrScript> {
        self.procedures.get(key)
    }
}

/// IR for one routine: the entry script or a single procedure variant.
#[derive(Debug)]
pub struct IrScript {
    /// Script object the compiled routine is cached on.
    pub script: Arc<Script>,
    pub label: String,
    pub warp: bool,
    /// Parameter shapes; empty for entry scripts.
    pub arguments: Vec<Shape>,
    /// Present only on procedure variants.
    pub key: Option<VariantKey>,
    pub stack: Vec<IrStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrStmt {
    If {
        condition: IrExpr,
        then_branch: Vec<IrStmt>,
        else_branch: Vec<IrStmt>,
    },
    Loop(IrLoop),
    Call(IrCall),
    SetVariable {
        name: String,
        value: IrExpr,
    },
    ChangeVariable {
        name: String,
        delta: IrExpr,
    },
    /// Suspend for `duration` seconds.
    Wait {
        duration: IrExpr,
    },
    /// Host primitive run for its side effect.
    Host {
        opcode: String,
        args: Vec<IrExpr>,
    },
    /// Stop this script (or return from the current procedure).
    Return,
    Escape(IrEscape),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopKind {
    Repeat { times: IrExpr },
    Forever,
    Until { condition: IrExpr },
    While { condition: IrExpr },
    /// Spin until the condition holds, yielding every check.
    WaitUntil { condition: IrExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrLoop {
    pub kind: LoopKind,
    pub body: Vec<IrStmt>,
    /// No explicit wait inside; the loop may run without yielding in warp code.
    pub warp_safe: bool,
    /// Iterations between forced cooperative checks. `1` yields every
    /// iteration.
    pub check_interval: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrCall {
    pub key: VariantKey,
    pub args: Vec<IrExpr>,
    /// Soft yield before entering the callee (direct recursion outside warp).
    pub yield_before: bool,
}

/// A block handed back to the interpreter, with its inputs already lowered.
#[derive(Debug, Clone, PartialEq)]
pub struct IrEscape {
    pub block: BlockId,
    pub opcode: String,
    pub inputs: Vec<(String, IrExpr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Round,
    Length,
}

impl UnaryOp {
    /// Support library function implementing this operator.
    pub fn support_name(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Round => "round",
            UnaryOp::Length => "length",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            UnaryOp::Not => Shape::Boolean,
            UnaryOp::Round | UnaryOp::Length => Shape::Number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    GreaterThan,
    LessThan,
    And,
    Or,
    Join,
    LetterOf,
    Contains,
}

impl BinaryOp {
    pub fn support_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Modulo => "modulo",
            BinaryOp::Equals => "compare_equal",
            BinaryOp::GreaterThan => "compare_greater_than",
            BinaryOp::LessThan => "compare_less_than",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Join => "join",
            BinaryOp::LetterOf => "letter_of",
            BinaryOp::Contains => "contains",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => Shape::Number,
            BinaryOp::Equals
            | BinaryOp::GreaterThan
            | BinaryOp::LessThan
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Contains => Shape::Boolean,
            BinaryOp::Join | BinaryOp::LetterOf => Shape::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    Constant(Value),
    Argument {
        index: u16,
        shape: Shape,
    },
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<IrExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<IrExpr>,
        rhs: Box<IrExpr>,
    },
    /// Host primitive reporter.
    Host {
        opcode: String,
        args: Vec<IrExpr>,
        shape: Shape,
    },
    Escape(IrEscape),
}

impl IrExpr {
    pub fn constant(value: impl Into<Value>) -> Self {
        IrExpr::Constant(value.into())
    }

    pub fn unary(op: UnaryOp, operand: IrExpr) -> Self {
        IrExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: IrExpr, rhs: IrExpr) -> Self {
        IrExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            IrExpr::Constant(Value::Number(_)) => Shape::Number,
            IrExpr::Constant(Value::String(_)) => Shape::String,
            IrExpr::Constant(Value::Bool(_)) => Shape::Boolean,
            IrExpr::Argument { shape, .. } => *shape,
            IrExpr::Variable(_) => Shape::Unknown,
            IrExpr::Unary { op, .. } => op.shape(),
            IrExpr::Binary { op, .. } => op.shape(),
            IrExpr::Host { shape, .. } => *shape,
            IrExpr::Escape(_) => Shape::Unknown,
        }
    }
}

/// True if `stmts` contain a wait, at any depth. Such code is never run
/// without yielding.
pub fn contains_wait(stmts: &[IrStmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        IrStmt::Wait { .. } => true,
        IrStmt::Loop(l) => matches!(l.kind, LoopKind::WaitUntil { .. }) || contains_wait(&l.body),
        IrStmt::If {
            then_branch,
            else_branch,
            ..
        } => contains_wait(then_branch) || contains_wait(else_branch),
        _ => false,
    })
}
