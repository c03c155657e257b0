//! Embeddable tensor-expression compiler.
//!
//! Array computations are defined symbolically in a [`KernelScope`],
//! transformed by a [`Schedule`] and lowered into one [`Statement`], which a
//! backend turns into something callable:
//!
//! ```ignore
//! let k = KernelScope::new();
//! let a = k.buffer("a", Dtype::FLOAT32, [64])?;
//! let b = k.compute("b", &[k.dim(64, "i")], |v| a.load([v[0]]) * 2.0f32)?;
//! let mut schedule = Schedule::new(&k, &[b])?;
//! schedule.split_with_mask(b.arg(0), 16, true)?;
//! let stmt = schedule.lower()?;
//! let params = vec![BufferArg::from(a), BufferArg::from(b)];
//! let codegen = create_codegen(
//!     BackendKind::NativeJit,
//!     k.freeze(),
//!     &stmt,
//!     params,
//!     &CodegenOptions::from_env(),
//! )?;
//! codegen.call(&[CallArg::input(&input), CallArg::buffer(&mut output)])?;
//! ```
//!
//! [`Kernel`] wraps the whole pipeline and picks the backend from where the
//! call's buffers live.

#![warn(missing_docs)]

mod kernel;

use std::sync::Arc;

pub use texc_backend_core::{
    BackendKind, BufferArg, CallArg, CodeGen, CodegenError, CodegenOptions, DataLocation,
    DeviceBuffer, HostBuffer, OptLevel, Scalar,
};
pub use texc_backend_cuda::{CudaCodeGen, LaunchDims};
pub use texc_backend_interp::SimpleIrEvaluator;
pub use texc_backend_native::{NativeCodeGen, compiler_available};
pub use texc_ir::{
    BinaryOp, CompareOp, Dtype, Expr, GpuAxis, IntrinsicOp, Ir, IrError, KernelScope,
    LoopOptions, ScalarKind, Statement, Tensor, Var,
};
pub use texc_sched::{Schedule, ScheduleError, SplitWithMask, SplitWithTail, TailLoop};

pub use kernel::{Kernel, KernelGraph, KernelOptions};

/// Errors from any stage of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid IR construction.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// A schedule transformation or lowering failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Code generation or a call failed.
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// A [`Kernel`] was called with data in a different location than the
    /// call that compiled it.
    #[error("kernel was compiled for the {compiled} backend but called with {requested} data")]
    InconsistentBackend {
        /// Backend chosen by the first call.
        compiled: BackendKind,
        /// Location of the offending call's buffers.
        requested: DataLocation,
    },

    /// One call mixed host and device buffers.
    #[error("buffer arguments mix host and device data")]
    MixedLocations,
}

/// Builds the code generator for `kind`.
///
/// `params` is the kernel's formal signature, in call order.
pub fn create_codegen(
    kind: BackendKind,
    ir: Arc<Ir>,
    stmt: &Statement,
    params: Vec<BufferArg>,
    opts: &CodegenOptions,
) -> Result<Box<dyn CodeGen>, CodegenError> {
    log::debug!("creating {kind} code generator");
    Ok(match kind {
        BackendKind::SimpleIrEval => Box::new(SimpleIrEvaluator::new(ir, stmt.clone(), params)),
        BackendKind::NativeJit => Box::new(NativeCodeGen::new(ir, stmt, params, opts)?),
        BackendKind::Cuda => Box::new(CudaCodeGen::new(ir, stmt, params, opts)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_returns_requested_backend() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [3]).unwrap();
        let b = k.compute("b", &[k.dim(3, "i")], |v| a.load([v[0]]) + 1).unwrap();
        let stmt = Schedule::new(&k, &[b]).unwrap().lower().unwrap();
        let params = vec![BufferArg::from(a), BufferArg::from(b)];
        let ir = k.freeze();

        let interp = create_codegen(
            BackendKind::SimpleIrEval,
            ir.clone(),
            &stmt,
            params.clone(),
            &CodegenOptions::default(),
        )
        .unwrap();
        assert_eq!(interp.kind(), BackendKind::SimpleIrEval);
        assert!(interp.source().is_none());
        let input = [1i32, 2, 3];
        let mut output = [0i32; 3];
        interp
            .call(&[CallArg::input(&input), CallArg::buffer(&mut output)])
            .unwrap();
        assert_eq!(output, [2, 3, 4]);

        let cuda = create_codegen(
            BackendKind::Cuda,
            ir,
            &stmt,
            params,
            &CodegenOptions::default(),
        )
        .unwrap();
        assert_eq!(cuda.kind(), BackendKind::Cuda);
        assert!(cuda.source().unwrap().contains("__global__"));
    }

    #[test]
    fn errors_convert_and_display() {
        let err: Error = ScheduleError::InvalidFactor(0).into();
        assert_eq!(err.to_string(), "split factor must be positive, got 0");
        let err = Error::InconsistentBackend {
            compiled: BackendKind::NativeJit,
            requested: DataLocation::Device,
        };
        assert_eq!(
            err.to_string(),
            "kernel was compiled for the native-jit backend but called with device data"
        );
    }
}
