//! Grid and block extents recorded from GPU-bound loops.

use texc_backend_core::{CodegenError, Scalar};
use texc_backend_interp::evaluate_scalar;
use texc_ir::{Expression, Handle, Ir, Statement, Variable};

/// Launch dimensions, `x` first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: [u32; 3],
    pub block: [u32; 3],
}

/// Loop bounds bound to each `blockIdx`/`threadIdx` axis.
#[derive(Clone, Debug, Default)]
pub(crate) struct GpuExtents {
    blocks: [Vec<(Handle<Expression>, Handle<Expression>)>; 3],
    threads: [Vec<(Handle<Expression>, Handle<Expression>)>; 3],
}

impl GpuExtents {
    pub fn record(stmt: &Statement) -> Self {
        let mut extents = Self::default();
        stmt.for_each(&mut |s| {
            if let Statement::For {
                start,
                stop,
                options,
                ..
            } = *s
            {
                if let Some(axis) = options.gpu_block_index {
                    extents.blocks[axis.position()].push((start, stop));
                }
                if let Some(axis) = options.gpu_thread_index {
                    extents.threads[axis.position()].push((start, stop));
                }
            }
        });
        extents
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().chain(&self.threads).all(Vec::is_empty)
    }

    /// Evaluates every bound extent; an axis bound by several loops takes
    /// the largest one, unbound axes are 1.
    pub fn evaluate(
        &self,
        ir: &Ir,
        bindings: &[(Handle<Variable>, Scalar)],
    ) -> Result<LaunchDims, CodegenError> {
        let mut dims = LaunchDims {
            grid: [1; 3],
            block: [1; 3],
        };
        for (out, bounds) in dims
            .grid
            .iter_mut()
            .chain(dims.block.iter_mut())
            .zip(self.blocks.iter().chain(&self.threads))
        {
            for &(start, stop) in bounds {
                let extent = int(ir, stop, bindings)?.saturating_sub(int(ir, start, bindings)?);
                let extent = u32::try_from(extent).unwrap_or(0);
                *out = (*out).max(extent);
            }
        }
        Ok(dims)
    }
}

fn int(
    ir: &Ir,
    expr: Handle<Expression>,
    bindings: &[(Handle<Variable>, Scalar)],
) -> Result<i32, CodegenError> {
    match evaluate_scalar(ir, expr, bindings)? {
        Scalar::Int(v) => Ok(v),
        Scalar::Float(_) => Err(CodegenError::Internal(
            "GPU loop bound is not an integer".into(),
        )),
    }
}
