//! CUDA source-generation backend.
//!
//! Loops bound to `blockIdx`/`threadIdx` by the scheduler become guarded
//! index bindings in the generated kernel; every other loop is emitted as a
//! serial loop inside each thread. Grid and block dimensions are evaluated
//! from the bound loop extents at call time, so one kernel serves every
//! shape its scalar parameters describe.
//!
//! Compilation through NVRTC and launching require the `cuda` feature.
//! The kernel is compiled once, on first call.

#[cfg(feature = "cuda")]
mod device;
mod launch;

use std::sync::Arc;

use log::{debug, warn};
use texc_backend_core::csource::{Dialect, emit_kernel};
use texc_backend_core::{
    BackendKind, BufferArg, CallArg, CodeGen, CodegenError, CodegenOptions, DataLocation,
    check_args,
};
use texc_backend_interp::check_extents;
use texc_ir::{Ir, Statement};

use launch::GpuExtents;
pub use launch::LaunchDims;

const ENTRY: &str = "texc_kernel";

/// A statement compiled to a CUDA kernel.
#[derive(Debug)]
pub struct CudaCodeGen {
    ir: Arc<Ir>,
    params: Vec<BufferArg>,
    source: String,
    extents: GpuExtents,
    #[cfg_attr(not(feature = "cuda"), allow(dead_code))]
    opts: CodegenOptions,
    #[cfg(feature = "cuda")]
    compiled: once_cell::sync::OnceCell<device::Compiled>,
}

impl CudaCodeGen {
    /// Generates the kernel source. Fails for IR the GPU path cannot
    /// express (`rand`, `Allocate`, `Free`).
    pub fn new(
        ir: Arc<Ir>,
        stmt: &Statement,
        params: Vec<BufferArg>,
        opts: &CodegenOptions,
    ) -> Result<Self, CodegenError> {
        let kernel = emit_kernel(&ir, stmt, &params, Dialect::Cuda, ENTRY)?;
        let extents = GpuExtents::record(stmt);
        if extents.is_empty() {
            warn!("cuda: no loop is bound to a GPU axis, the kernel runs on one thread");
        }
        debug!("cuda: generated {} byte(s) of source", kernel.source.len());
        Ok(Self {
            ir,
            params,
            source: kernel.source,
            extents,
            opts: opts.clone(),
            #[cfg(feature = "cuda")]
            compiled: once_cell::sync::OnceCell::new(),
        })
    }

    /// The generated CUDA C source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Grid and block dimensions a call with `args` would launch.
    pub fn launch_dims(&self, args: &[CallArg<'_>]) -> Result<LaunchDims, CodegenError> {
        let bindings: Vec<_> = self
            .params
            .iter()
            .zip(args)
            .filter_map(|(param, arg)| Some((param.var, arg.scalar()?)))
            .collect();
        self.extents.evaluate(&self.ir, &bindings)
    }
}

impl CodeGen for CudaCodeGen {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn buffer_args(&self) -> &[BufferArg] {
        &self.params
    }

    fn source(&self) -> Option<&str> {
        Some(&self.source)
    }

    fn call(&self, args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        check_args(&self.params, args, DataLocation::Device)?;
        check_extents(&self.ir, &self.params, args)?;
        let dims = self.launch_dims(args)?;
        self.launch(dims, args)
    }
}

impl CudaCodeGen {
    #[cfg(feature = "cuda")]
    fn launch(&self, dims: LaunchDims, args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        let compiled = self
            .compiled
            .get_or_try_init(|| device::Compiled::new(&self.source, ENTRY, &self.opts))?;
        compiled.launch(dims, args)
    }

    #[cfg(not(feature = "cuda"))]
    fn launch(&self, _dims: LaunchDims, _args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        Err(CodegenError::Unavailable(
            BackendKind::Cuda,
            "built without the `cuda` feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{Dtype, GpuAxis, IntrinsicOp, KernelScope, LoopOptions, ScalarKind};

    fn bound_loop(
        k: &KernelScope,
        var: texc_ir::Var<'_>,
        stop: texc_ir::Expr<'_>,
        options: LoopOptions,
        body: Statement,
    ) -> Statement {
        Statement::For {
            var: var.handle(),
            start: k.int(0).handle(),
            stop: stop.handle(),
            body: Box::new(body),
            options,
        }
    }

    fn scaled(k: &KernelScope) -> (Statement, Vec<BufferArg>) {
        let n = k.var("n", Dtype::INT32);
        let a = k.buffer("a", Dtype::FLOAT32, [n]).unwrap();
        let b = k.buffer("b", Dtype::FLOAT32, [n]).unwrap();
        let bx = k.var("i.outer", Dtype::INT32);
        let tx = k.var("i.inner", Dtype::INT32);
        let index = bx * 128 + tx;
        let guard = index.compare(texc_ir::CompareOp::Lt, n);
        let value = a.load_flat(index, guard).unwrap() * 2.0f32;
        let store = b.store_flat(index, value, guard).unwrap();
        let inner = bound_loop(k, tx, k.int(128), LoopOptions::thread(GpuAxis::X), store);
        let outer = bound_loop(
            k,
            bx,
            (n + 127) / 128,
            LoopOptions::block(GpuAxis::X),
            inner,
        );
        (outer, vec![a.into(), b.into(), n.into()])
    }

    #[test]
    fn generates_bound_indices() {
        let k = KernelScope::new();
        let (stmt, params) = scaled(&k);
        let codegen =
            CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default()).unwrap();
        let source = codegen.source();
        assert!(source.contains(
            "extern \"C\" __global__ void texc_kernel(float* a, float* b, int n) {"
        ));
        assert!(source.contains("int i_outer = 0 + (int)blockIdx.x;"));
        assert!(source.contains("if (i_outer < ((n + 127) / 128)) {"));
        assert!(source.contains("int i_inner = 0 + (int)threadIdx.x;"));
        assert!(source.contains("if (i_inner < 128) {"));
        assert!(!source.contains("for ("));
    }

    #[test]
    fn launch_dims_follow_scalar_arguments() {
        let k = KernelScope::new();
        let (stmt, params) = scaled(&k);
        let codegen =
            CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default()).unwrap();
        // SAFETY: the pointers are never dereferenced.
        let args = unsafe {
            [
                CallArg::device(0x1000, 300, ScalarKind::Float32),
                CallArg::device(0x2000, 300, ScalarKind::Float32),
                CallArg::Int(300),
            ]
        };
        let dims = codegen.launch_dims(&args).unwrap();
        assert_eq!(dims.grid, [3, 1, 1]);
        assert_eq!(dims.block, [128, 1, 1]);
    }

    #[test]
    fn empty_domain_still_launches_one_block() {
        let k = KernelScope::new();
        let (stmt, params) = scaled(&k);
        let codegen =
            CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default()).unwrap();
        // SAFETY: the pointers are never dereferenced.
        let args = unsafe {
            [
                CallArg::device(0x1000, 0, ScalarKind::Float32),
                CallArg::device(0x2000, 0, ScalarKind::Float32),
                CallArg::Int(0),
            ]
        };
        let dims = codegen.launch_dims(&args).unwrap();
        assert_eq!(dims.grid, [1, 1, 1]);
        assert_eq!(dims.block, [128, 1, 1]);
    }

    #[test]
    fn host_arguments_are_rejected() {
        let k = KernelScope::new();
        let (stmt, params) = scaled(&k);
        let codegen =
            CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default()).unwrap();
        let a = [0.0f32; 4];
        let mut b = [0.0f32; 4];
        let err = codegen
            .call(&[CallArg::input(&a), CallArg::buffer(&mut b), CallArg::Int(4)])
            .unwrap_err();
        assert!(matches!(err, CodegenError::ArgMismatch { index: 0, .. }));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn unavailable_without_feature() {
        let k = KernelScope::new();
        let (stmt, params) = scaled(&k);
        let codegen =
            CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default()).unwrap();
        // SAFETY: the call fails before any launch.
        let args = unsafe {
            [
                CallArg::device(0x1000, 4, ScalarKind::Float32),
                CallArg::device(0x2000, 4, ScalarKind::Float32),
                CallArg::Int(4),
            ]
        };
        let err = codegen.call(&args).unwrap_err();
        assert!(matches!(err, CodegenError::Unavailable(BackendKind::Cuda, _)));
    }

    #[test]
    fn rand_and_allocation_are_unsupported() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [1]).unwrap();
        let r = k.intrinsic(IntrinsicOp::Rand, &[]).unwrap();
        let stmt = a.store_flat(k.int(0), r, k.int(1)).unwrap();
        let params = vec![BufferArg::from(a)];
        let err = CudaCodeGen::new(k.freeze(), &stmt, params, &CodegenOptions::default())
            .unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported { backend: BackendKind::Cuda, .. }));

        let k = KernelScope::new();
        let tmp = k.buffer("tmp", Dtype::INT32, [4]).unwrap();
        let stmt = Statement::Allocate {
            buffer: tmp.data().handle(),
            dtype: Dtype::INT32,
            dims: vec![k.int(4).handle()],
        };
        let err = CudaCodeGen::new(k.freeze(), &stmt, Vec::new(), &CodegenOptions::default())
            .unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported { .. }));
    }
}
