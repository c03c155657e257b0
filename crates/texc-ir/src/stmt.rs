//! Statements: the loop-nest tree produced by lowering.

use std::fmt;

use crate::arena::Handle;
use crate::expr::{Expression, Variable};
use crate::types::Dtype;

/// One of the three GPU grid/block axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpuAxis {
    X,
    Y,
    Z,
}

impl GpuAxis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Position in a `[x, y, z]` triple.
    pub fn position(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

impl fmt::Display for GpuAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        })
    }
}

/// Loop metadata consumed by the GPU backend.
///
/// A loop is bound to at most one of a block index or a thread index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LoopOptions {
    pub gpu_block_index: Option<GpuAxis>,
    pub gpu_thread_index: Option<GpuAxis>,
}

impl LoopOptions {
    pub fn block(axis: GpuAxis) -> Self {
        Self {
            gpu_block_index: Some(axis),
            gpu_thread_index: None,
        }
    }

    pub fn thread(axis: GpuAxis) -> Self {
        Self {
            gpu_block_index: None,
            gpu_thread_index: Some(axis),
        }
    }

    /// Returns `true` if the loop carries no binding.
    pub fn is_default(&self) -> bool {
        self.gpu_block_index.is_none() && self.gpu_thread_index.is_none()
    }
}

impl fmt::Display for LoopOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(axis) = self.gpu_block_index {
            parts.push(format!("blockIdx.{axis}"));
        }
        if let Some(axis) = self.gpu_thread_index {
            parts.push(format!("threadIdx.{axis}"));
        }
        f.write_str(&parts.join(", "))
    }
}

/// A statement node. Statements form an owned tree; the expressions they
/// reference live in the [`Ir`](crate::Ir) arena.
#[derive(Clone, Debug)]
pub enum Statement {
    /// Writes `value` to `base[index]` for every lane whose mask is non-zero.
    Store {
        base: Handle<Variable>,
        index: Handle<Expression>,
        value: Handle<Expression>,
        mask: Handle<Expression>,
    },
    /// Runs `body` for `var` in `[start, stop)`.
    For {
        var: Handle<Variable>,
        start: Handle<Expression>,
        stop: Handle<Expression>,
        body: Box<Statement>,
        options: LoopOptions,
    },
    Block(Vec<Statement>),
    /// Scratch storage of `dims` elements of `dtype`, bound to `buffer`.
    Allocate {
        buffer: Handle<Variable>,
        dtype: Dtype,
        dims: Vec<Handle<Expression>>,
    },
    Free {
        buffer: Handle<Variable>,
    },
}

impl Statement {
    /// Expressions referenced directly by this statement (not its children).
    pub fn expressions(&self) -> Vec<Handle<Expression>> {
        match self {
            Self::Store {
                index, value, mask, ..
            } => vec![*index, *value, *mask],
            Self::For { start, stop, .. } => vec![*start, *stop],
            Self::Block(_) | Self::Free { .. } => Vec::new(),
            Self::Allocate { dims, .. } => dims.clone(),
        }
    }

    /// Visits this statement and every nested statement, parents first.
    pub fn for_each(&self, f: &mut dyn FnMut(&Statement)) {
        f(self);
        match self {
            Self::For { body, .. } => body.for_each(f),
            Self::Block(stmts) => {
                for stmt in stmts {
                    stmt.for_each(f);
                }
            }
            Self::Store { .. } | Self::Allocate { .. } | Self::Free { .. } => {}
        }
    }
}
