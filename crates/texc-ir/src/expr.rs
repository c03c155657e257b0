//! Expressions: pure values with no side effects.

use std::fmt;

use crate::arena::Handle;
use crate::types::Dtype;

/// A named, typed variable. Identity is its handle, not its name.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub dtype: Dtype,
    /// The canonical `Expression::Var` node referring to this variable.
    pub expr: Handle<Expression>,
}

/// An arithmetic operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// A comparison yielding int32 `1` or `0` per lane.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Applies the comparison. Any comparison involving NaN is false
    /// except `Ne`.
    pub fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

/// A built-in math function.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum IntrinsicOp {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Erf,
    Erfc,
    Sqrt,
    Rsqrt,
    Fabs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Frac,
    Lgamma,
    Fmod,
    Pow,
    Remainder,
    Rand,
}

impl IntrinsicOp {
    /// Every intrinsic, in declaration order.
    pub const ALL: [Self; 30] = [
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Asin,
        Self::Acos,
        Self::Atan,
        Self::Sinh,
        Self::Cosh,
        Self::Tanh,
        Self::Exp,
        Self::Expm1,
        Self::Log,
        Self::Log2,
        Self::Log10,
        Self::Log1p,
        Self::Erf,
        Self::Erfc,
        Self::Sqrt,
        Self::Rsqrt,
        Self::Fabs,
        Self::Ceil,
        Self::Floor,
        Self::Round,
        Self::Trunc,
        Self::Frac,
        Self::Lgamma,
        Self::Fmod,
        Self::Pow,
        Self::Remainder,
        Self::Rand,
    ];

    /// Number of arguments the intrinsic takes.
    pub fn arity(self) -> usize {
        match self {
            Self::Rand => 0,
            Self::Fmod | Self::Pow | Self::Remainder => 2,
            _ => 1,
        }
    }

    /// The printed (and C library stem) name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Exp => "exp",
            Self::Expm1 => "expm1",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Log10 => "log10",
            Self::Log1p => "log1p",
            Self::Erf => "erf",
            Self::Erfc => "erfc",
            Self::Sqrt => "sqrt",
            Self::Rsqrt => "rsqrt",
            Self::Fabs => "fabs",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Round => "round",
            Self::Trunc => "trunc",
            Self::Frac => "frac",
            Self::Lgamma => "lgamma",
            Self::Fmod => "fmod",
            Self::Pow => "pow",
            Self::Remainder => "remainder",
            Self::Rand => "rand",
        }
    }
}

impl fmt::Display for IntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An expression node. Every node has a [`Dtype`] recorded next to it in
/// the [`Ir`](crate::Ir).
#[derive(Clone, Debug)]
pub enum Expression {
    IntImm(i32),
    FloatImm(f32),
    Var(Handle<Variable>),
    Binary {
        op: BinaryOp,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
    },
    /// `propagate_nans` selects IEEE `maximum` (NaN wins) over `maxNum`
    /// (the non-NaN operand wins).
    Max {
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
        propagate_nans: bool,
    },
    Min {
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
        propagate_nans: bool,
    },
    CompareSelect {
        op: CompareOp,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
    },
    Cast {
        dtype: Dtype,
        value: Handle<Expression>,
    },
    Let {
        var: Handle<Variable>,
        value: Handle<Expression>,
        body: Handle<Expression>,
    },
    Ramp {
        base: Handle<Expression>,
        stride: Handle<Expression>,
        lanes: u32,
    },
    Broadcast {
        value: Handle<Expression>,
        lanes: u32,
    },
    /// Reads `base[index]` for every lane whose `mask` lane is non-zero.
    Load {
        base: Handle<Variable>,
        index: Handle<Expression>,
        mask: Handle<Expression>,
    },
    Intrinsic {
        op: IntrinsicOp,
        args: Vec<Handle<Expression>>,
    },
    /// A reference to another function's value at the given indices.
    Call {
        function: Handle<crate::Function>,
        args: Vec<Handle<Expression>>,
    },
}

impl Expression {
    /// Direct child expressions in evaluation order.
    pub fn operands(&self) -> Vec<Handle<Expression>> {
        match *self {
            Self::IntImm(_) | Self::FloatImm(_) | Self::Var(_) => Vec::new(),
            Self::Binary { lhs, rhs, .. }
            | Self::Max { lhs, rhs, .. }
            | Self::Min { lhs, rhs, .. }
            | Self::CompareSelect { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Cast { value, .. } | Self::Broadcast { value, .. } => vec![value],
            Self::Let { value, body, .. } => vec![value, body],
            Self::Ramp { base, stride, .. } => vec![base, stride],
            Self::Load { index, mask, .. } => vec![index, mask],
            Self::Intrinsic { ref args, .. } | Self::Call { ref args, .. } => args.clone(),
        }
    }
}
