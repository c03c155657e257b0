//! Native JIT backend.
//!
//! The lowered statement is emitted as checked C, wrapped in a fixed
//! `void texc_kernel_wrapper(void** args, const long long* lens, texc_status* status)`
//! trampoline, compiled into a shared object by the system C compiler and
//! loaded in-process. Each element of `args` points at one argument: the
//! data of a buffer, or the storage of a scalar. `lens` holds the element
//! count of each buffer argument, and `status` receives the first fault.

mod compile;

use std::collections::HashSet;
use std::ffi::c_void;
use std::fmt::Write as _;
use std::sync::Arc;

use libloading::Library;
use log::debug;
use texc_backend_core::csource::{Dialect, FaultStatus, emit_kernel};
use texc_backend_core::{
    BackendKind, BufferArg, CallArg, CodeGen, CodegenError, CodegenOptions, DataLocation,
    check_args,
};
use texc_backend_interp::check_extents;
use texc_ir::{Handle, Ir, Statement, Variable};

pub use compile::compiler_available;

const ENTRY: &str = "texc_kernel";
const WRAPPER: &str = "texc_kernel_wrapper";

type Trampoline = unsafe extern "C" fn(*mut *mut c_void, *const i64, *mut FaultStatus);

/// A statement compiled to native code.
#[derive(Debug)]
pub struct NativeCodeGen {
    ir: Arc<Ir>,
    params: Vec<BufferArg>,
    source: String,
    buffer_names: Vec<String>,
    written: HashSet<Handle<Variable>>,
    entry: Trampoline,
    // Keeps `entry` valid; dropped before the directory holding it.
    _lib: Library,
    _dir: Option<tempfile::TempDir>,
}

impl NativeCodeGen {
    /// Emits, compiles and loads `stmt`.
    pub fn new(
        ir: Arc<Ir>,
        stmt: &Statement,
        params: Vec<BufferArg>,
        opts: &CodegenOptions,
    ) -> Result<Self, CodegenError> {
        let kernel = emit_kernel(&ir, stmt, &params, Dialect::C, ENTRY)?;
        let mut source = kernel.source;
        let _ = writeln!(
            source,
            "\nvoid {WRAPPER}(void** args, const long long* lens, texc_status* status) {{"
        );
        let unpacked: Vec<_> = params
            .iter()
            .zip(&kernel.param_types)
            .enumerate()
            .map(|(i, (param, ty))| {
                if param.is_buffer {
                    format!("({ty})args[{i}]")
                } else {
                    format!("*({ty}*)args[{i}]")
                }
            })
            .collect();
        let _ = writeln!(
            source,
            "    {ENTRY}({}, lens, status);\n}}",
            unpacked.join(", ")
        );

        let dir = tempfile::Builder::new().prefix("texc-").tempdir()?;
        let src_path = dir.path().join("kernel.c");
        let lib_path = dir.path().join(format!("libtexc_kernel{}", compile::lib_ext()));
        std::fs::write(&src_path, &source)?;
        compile::compile_c(&src_path, &lib_path, opts)?;

        // SAFETY: the library was just built from generated C with no
        // initializers.
        let lib = unsafe { Library::new(&lib_path) }
            .map_err(|err| CodegenError::Load(err.to_string()))?;
        // SAFETY: the wrapper is emitted above with exactly this signature.
        let entry = unsafe { lib.get::<Trampoline>(WRAPPER.as_bytes()).map(|symbol| *symbol) }
            .map_err(|err| CodegenError::Load(err.to_string()))?;

        let dir = if opts.keep_source {
            let kept = dir.keep();
            debug!("native: kept generated source in {}", kept.display());
            None
        } else {
            Some(dir)
        };

        let mut written = HashSet::new();
        stmt.for_each(&mut |s| {
            if let Statement::Store { base, .. } = *s {
                written.insert(base);
            }
        });

        debug!(
            "native: compiled {} byte(s) of C with {}",
            source.len(),
            opts.opt_level
        );
        Ok(Self {
            ir,
            params,
            source,
            buffer_names: kernel.buffer_names,
            written,
            entry,
            _lib: lib,
            _dir: dir,
        })
    }

    /// The generated C translation unit.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl CodeGen for NativeCodeGen {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeJit
    }

    fn buffer_args(&self) -> &[BufferArg] {
        &self.params
    }

    fn source(&self) -> Option<&str> {
        Some(&self.source)
    }

    fn call(&self, args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        check_args(&self.params, args, DataLocation::Host)?;
        check_extents(&self.ir, &self.params, args)?;

        let mut scalars: Vec<u32> = args
            .iter()
            .map(|arg| match *arg {
                CallArg::Int(v) => v as u32,
                CallArg::Float(v) => v.to_bits(),
                CallArg::Host(_) | CallArg::Device(_) => 0,
            })
            .collect();
        let lens: Vec<i64> = args
            .iter()
            .map(|arg| match arg {
                CallArg::Host(host) => i64::try_from(host.len()).unwrap_or(i64::MAX),
                _ => 0,
            })
            .collect();
        let slots = scalars.as_mut_ptr();
        let mut pointers = Vec::with_capacity(args.len());
        for (i, (param, arg)) in self.params.iter().zip(args).enumerate() {
            pointers.push(match arg {
                CallArg::Host(host) => {
                    if !host.is_writable() && self.written.contains(&param.var) {
                        return Err(CodegenError::ReadOnly(param.name.clone()));
                    }
                    host.as_ptr().cast::<c_void>()
                }
                // SAFETY: `i < scalars.len()`.
                _ => unsafe { slots.add(i) }.cast::<c_void>(),
            });
        }

        let mut status = FaultStatus::default();
        // SAFETY: arguments were checked against the parameter list, every
        // access is checked against `lens`, and read-only buffers are never
        // stored to.
        unsafe { (self.entry)(pointers.as_mut_ptr(), lens.as_ptr(), &mut status) };
        status.check(&self.buffer_names)
    }
}
