//! NVRTC compilation and kernel launch.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cudarc::driver::{CudaDevice, CudaFunction, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::{CompileOptions, compile_ptx_with_opts};
use log::debug;
use once_cell::sync::Lazy;
use texc_backend_core::{CallArg, CodegenError, CodegenOptions};

use crate::LaunchDims;

static MODULES: AtomicUsize = AtomicUsize::new(0);

/// Arch strings handed to NVRTC, which wants them `'static`.
static ARCHES: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(Default::default);

/// Leaks each distinct arch string at most once.
fn intern_arch(arch: &str) -> &'static str {
    let mut arches = ARCHES.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(&known) = arches.get(arch) {
        return known;
    }
    let leaked: &'static str = Box::leak(arch.to_owned().into_boxed_str());
    arches.insert(leaked);
    leaked
}

/// A kernel loaded on a device.
#[derive(Debug)]
pub(crate) struct Compiled {
    device: Arc<CudaDevice>,
    function: CudaFunction,
}

impl Compiled {
    pub fn new(source: &str, entry: &'static str, opts: &CodegenOptions) -> Result<Self, CodegenError> {
        let device = CudaDevice::new(opts.device_ordinal)
            .map_err(|e| CodegenError::Device(format!("CUDA device creation failed: {e}")))?;
        let arch = opts.gpu_arch.as_deref().map(intern_arch);
        let compile_opts = CompileOptions {
            arch,
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(source, compile_opts)
            .map_err(|e| CodegenError::Compile(format!("NVRTC compilation failed: {e}")))?;

        let module = format!("texc_module_{}", MODULES.fetch_add(1, Ordering::Relaxed));
        device
            .load_ptx(ptx, &module, &[entry])
            .map_err(|e| CodegenError::Load(format!("PTX load failed: {e}")))?;
        let function = device
            .get_func(&module, entry)
            .ok_or_else(|| CodegenError::Load(format!("CUDA kernel `{entry}` not found")))?;
        debug!("cuda: loaded {module} on device {}", opts.device_ordinal);
        Ok(Self { device, function })
    }

    /// Launches with `dims` and waits for completion.
    pub fn launch(&self, dims: LaunchDims, args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        let mut words: Vec<u64> = args
            .iter()
            .map(|arg| match *arg {
                CallArg::Device(buffer) => buffer.ptr,
                CallArg::Int(v) => u64::from(v as u32),
                CallArg::Float(v) => u64::from(v.to_bits()),
                CallArg::Host(_) => 0,
            })
            .collect();
        let mut params: Vec<*mut c_void> = words
            .iter_mut()
            .map(|word| (word as *mut u64).cast::<c_void>())
            .collect();
        let cfg = LaunchConfig {
            grid_dim: (dims.grid[0], dims.grid[1], dims.grid[2]),
            block_dim: (dims.block[0], dims.block[1], dims.block[2]),
            shared_mem_bytes: 0,
        };
        // SAFETY: each parameter points at storage of the kernel's declared
        // parameter type (little-endian low word for 32-bit scalars), and
        // device buffers were checked against their extents.
        unsafe { self.function.clone().launch(cfg, &mut params[..]) }
            .map_err(|e| CodegenError::Device(format!("launch failed: {e}")))?;
        self.device
            .synchronize()
            .map_err(|e| CodegenError::Device(format!("synchronize failed: {e}")))
    }
}
