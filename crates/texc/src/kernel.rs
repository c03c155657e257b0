//! A compiled-on-first-call kernel whose backend follows its arguments.

use std::fmt;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use texc_backend_core::{
    BackendKind, BufferArg, CallArg, CodeGen, CodegenOptions, DataLocation,
};
use texc_ir::{BinaryOp, Expr, KernelScope, Statement, Tensor};
use texc_sched::Schedule;

use crate::{Error, create_codegen};

/// Kernel-level configuration.
#[derive(Clone, Debug)]
pub struct KernelOptions {
    /// Backend for host-resident data. `NativeJit` falls back to the
    /// interpreter when no C compiler is available.
    pub host_backend: BackendKind,
    /// Threads per block for the flattened GPU loop.
    pub gpu_block_size: i32,
    /// Options forwarded to the code generator.
    pub codegen: CodegenOptions,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            host_backend: BackendKind::NativeJit,
            gpu_block_size: 1024,
            codegen: CodegenOptions::default(),
        }
    }
}

impl fmt::Display for KernelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KernelOptions {{ host_backend: {}, gpu_block_size: {}, codegen: {} }}",
            self.host_backend, self.gpu_block_size, self.codegen
        )
    }
}

/// What a kernel's build function produces: its inputs and outputs.
///
/// The call signature is `inputs` followed by one buffer per output.
/// Every other tensor reachable from the outputs is inlined.
#[derive(Debug)]
pub struct KernelGraph<'k> {
    /// Input buffers and scalar variables, in call order.
    pub inputs: Vec<BufferArg>,
    /// Output tensors, in call order.
    pub outputs: Vec<Tensor<'k>>,
}

impl<'k> KernelGraph<'k> {
    /// A graph with the given signature halves.
    pub fn new(inputs: Vec<BufferArg>, outputs: Vec<Tensor<'k>>) -> Self {
        Self { inputs, outputs }
    }
}

type BuildFn = dyn for<'k> Fn(&'k KernelScope) -> Result<KernelGraph<'k>, Error> + Send + Sync;

/// A tensor-expression kernel compiled on its first call.
///
/// The first call picks the backend from where its buffers live: host data
/// goes to [`KernelOptions::host_backend`], device data to CUDA. Later
/// calls must use the same location.
pub struct Kernel {
    build: Box<BuildFn>,
    options: KernelOptions,
    codegen: OnceCell<Box<dyn CodeGen>>,
}

impl Kernel {
    /// A kernel built by `build` with default options.
    pub fn new<F>(build: F) -> Self
    where
        F: for<'k> Fn(&'k KernelScope) -> Result<KernelGraph<'k>, Error> + Send + Sync + 'static,
    {
        Self::with_options(build, KernelOptions::default())
    }

    /// A kernel built by `build` with `options`.
    pub fn with_options<F>(build: F, options: KernelOptions) -> Self
    where
        F: for<'k> Fn(&'k KernelScope) -> Result<KernelGraph<'k>, Error> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            options,
            codegen: OnceCell::new(),
        }
    }

    /// The options the kernel was created with.
    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    /// The backend picked by the first call, if there was one.
    pub fn backend(&self) -> Option<BackendKind> {
        self.codegen.get().map(|c| c.kind())
    }

    /// The code generator built by the first call.
    pub fn codegen(&self) -> Option<&dyn CodeGen> {
        self.codegen.get().map(|c| &**c)
    }

    /// Runs the kernel, compiling it first if needed.
    pub fn call(&self, args: &[CallArg<'_>]) -> Result<(), Error> {
        let location = data_location(args)?;
        let codegen = self.codegen.get_or_try_init(|| self.compile(location))?;
        let compiled = codegen.kind();
        if compiled.location() != location {
            return Err(Error::InconsistentBackend {
                compiled,
                requested: location,
            });
        }
        codegen.call(args)?;
        Ok(())
    }

    fn compile(&self, location: DataLocation) -> Result<Box<dyn CodeGen>, Error> {
        let kind = match location {
            DataLocation::Device => BackendKind::Cuda,
            DataLocation::Host => self.host_backend()?,
        };
        debug!("kernel: compiling for {kind} ({})", self.options);
        let scope = KernelScope::new();
        let graph = (self.build)(&scope)?;
        let (stmt, params) = match kind {
            BackendKind::Cuda => lower_for_gpu(&scope, &graph, self.options.gpu_block_size)?,
            BackendKind::SimpleIrEval | BackendKind::NativeJit => lower_for_host(&scope, &graph)?,
        };
        Ok(create_codegen(
            kind,
            scope.freeze(),
            &stmt,
            params,
            &self.options.codegen,
        )?)
    }

    fn host_backend(&self) -> Result<BackendKind, Error> {
        match self.options.host_backend {
            BackendKind::NativeJit
                if !texc_backend_native::compiler_available(&self.options.codegen) =>
            {
                warn!(
                    "no C compiler at `{}`, falling back to the interpreter",
                    self.options.codegen.compiler_path().display()
                );
                Ok(BackendKind::SimpleIrEval)
            }
            BackendKind::Cuda => Err(Error::InconsistentBackend {
                compiled: BackendKind::Cuda,
                requested: DataLocation::Host,
            }),
            kind => Ok(kind),
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("options", &self.options)
            .field("codegen", &self.codegen.get())
            .finish_non_exhaustive()
    }
}

/// The location shared by every buffer argument; host when there are none.
fn data_location(args: &[CallArg<'_>]) -> Result<DataLocation, Error> {
    let mut locations = args.iter().filter_map(CallArg::location);
    let Some(first) = locations.next() else {
        return Ok(DataLocation::Host);
    };
    if locations.any(|l| l != first) {
        return Err(Error::MixedLocations);
    }
    Ok(first)
}

fn signature(graph: &KernelGraph<'_>, outputs: &[Tensor<'_>]) -> Vec<BufferArg> {
    let mut params = graph.inputs.clone();
    params.extend(outputs.iter().map(|&t| BufferArg::from(t)));
    params
}

fn inline_intermediates(schedule: &mut Schedule<'_>) -> Result<(), Error> {
    let outputs: Vec<_> = schedule.outputs().iter().map(|t| t.function()).collect();
    for tensor in schedule.tensors() {
        if !outputs.contains(&tensor.function()) {
            schedule.compute_inline(tensor)?;
        }
    }
    Ok(())
}

fn lower_for_host<'k>(
    scope: &'k KernelScope,
    graph: &KernelGraph<'k>,
) -> Result<(Statement, Vec<BufferArg>), Error> {
    let mut schedule = Schedule::new(scope, &graph.outputs)?;
    inline_intermediates(&mut schedule)?;
    let stmt = schedule.lower()?;
    Ok((stmt, signature(graph, &graph.outputs)))
}

/// Flattens every output to one dimension, inlines the originals and maps
/// the flat index onto `blockIdx.x * block_size + threadIdx.x`.
fn lower_for_gpu<'k>(
    scope: &'k KernelScope,
    graph: &KernelGraph<'k>,
    block_size: i32,
) -> Result<(Statement, Vec<BufferArg>), Error> {
    let flat = graph
        .outputs
        .iter()
        .map(|&t| flatten(scope, t))
        .collect::<Result<Vec<_>, _>>()?;
    let mut schedule = Schedule::new(scope, &flat)?;
    inline_intermediates(&mut schedule)?;
    for &tensor in &flat {
        let split = schedule.split_with_mask(tensor.arg(0), block_size, true)?;
        schedule.gpu_exec_config(&[split.outer], &[split.inner])?;
    }
    let stmt = schedule.lower()?;
    Ok((stmt, signature(graph, &flat)))
}

/// `<name>_flat[i]` reading `tensor` at the row-major unflattening of `i`.
fn flatten<'k>(scope: &'k KernelScope, tensor: Tensor<'k>) -> Result<Tensor<'k>, Error> {
    let dims: Vec<Expr<'k>> = (0..tensor.ndim()).map(|i| tensor.dim(i)).collect();
    let mut total: Option<Expr<'k>> = None;
    for &dim in &dims {
        total = Some(match total {
            Some(t) => t.try_binary(BinaryOp::Mul, dim)?,
            None => dim,
        });
    }
    let total = total.unwrap_or_else(|| scope.int(1));
    let name = format!("{}_flat", tensor.name());
    let flat = scope.try_compute(&name, &[scope.dim(total, "i")], |v| {
        let mut rest = v[0].expr();
        let mut indices = Vec::with_capacity(dims.len());
        for (axis, &dim) in dims.iter().enumerate().rev() {
            indices.push(if axis > 0 {
                rest.try_binary(BinaryOp::Mod, dim)?
            } else {
                rest
            });
            rest = rest.try_binary(BinaryOp::Div, dim)?;
        }
        indices.reverse();
        tensor.try_call(indices)
    })?;
    Ok(flat)
}
