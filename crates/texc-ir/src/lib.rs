//! Tensor-expression intermediate representation.
//!
//! Expressions live in a typed arena owned by one [`KernelScope`] per
//! build; statements are owned trees produced by lowering. Functions
//! ([`Tensor`]s) are index-parameterized bodies over a rectangular domain,
//! the unit the scheduler transforms.

pub mod arena;
mod display;
mod error;
mod expr;
mod func;
mod ir;
mod scope;
mod stmt;
mod types;
pub mod visit;

pub use arena::{Arena, Handle};
pub use display::{format_expr, format_stmt};
pub use error::IrError;
pub use expr::{BinaryOp, CompareOp, Expression, IntrinsicOp, Variable};
pub use func::{Buffer as BufferDecl, Function};
pub use ir::Ir;
pub use scope::{Buffer, DimArg, Expr, IntoExpr, KernelScope, Tensor, Var};
pub use stmt::{GpuAxis, LoopOptions, Statement};
pub use types::{Dtype, ScalarKind};
