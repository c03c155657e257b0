#![warn(missing_docs)]
//! Code generator trait and call plumbing shared by every texc backend.
//!
//! A backend is constructed from a lowered [`Statement`], the frozen IR it
//! refers to and an ordered list of [`BufferArg`] parameters. It then
//! exposes [`CodeGen::call`], which takes one [`CallArg`] per parameter.
//! [`csource`] holds the C-family emitter used by the native and CUDA
//! backends.
//!
//! [`Statement`]: texc_ir::Statement

use std::fmt::{self, Debug};
use std::marker::PhantomData;

use texc_ir::{Buffer, Dtype, Expression, Handle, ScalarKind, Tensor, Var, Variable};

pub mod csource;
mod error;
mod names;
mod options;

pub use error::CodegenError;
pub use names::UniqueNameManager;
pub use options::{CodegenOptions, OptLevel};

/// The available code generators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Tree-walking interpreter.
    SimpleIrEval,
    /// C emission compiled by the system compiler and loaded in-process.
    NativeJit,
    /// CUDA C source compiled through NVRTC.
    Cuda,
}

impl BackendKind {
    /// Where this backend expects buffer arguments to live.
    pub fn location(self) -> DataLocation {
        match self {
            Self::SimpleIrEval | Self::NativeJit => DataLocation::Host,
            Self::Cuda => DataLocation::Device,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SimpleIrEval => "interpreter",
            Self::NativeJit => "native-jit",
            Self::Cuda => "cuda",
        })
    }
}

/// A code generator bound to one lowered statement.
pub trait CodeGen: Debug + Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// The formal parameters, in call order.
    fn buffer_args(&self) -> &[BufferArg];

    /// Runs the kernel once.
    ///
    /// Arguments are validated against [`buffer_args`](Self::buffer_args)
    /// before anything executes.
    fn call(&self, args: &[CallArg<'_>]) -> Result<(), CodegenError>;

    /// Generated source text, for backends that produce any.
    fn source(&self) -> Option<&str> {
        None
    }
}

/// A formal kernel parameter: a buffer or a scalar variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferArg {
    /// For buffers the handle-typed data variable, for scalars the
    /// variable itself.
    pub var: Handle<Variable>,
    /// Name used in diagnostics.
    pub name: String,
    /// Element dtype for buffers, value dtype for scalars.
    pub dtype: Dtype,
    /// `true` for buffers.
    pub is_buffer: bool,
    /// Declared extents of a buffer parameter; empty for scalars.
    pub dims: Vec<Handle<Expression>>,
}

impl BufferArg {
    /// Whether `arg` is an acceptable value for this parameter, ignoring
    /// where buffer data lives.
    fn accepts(&self, arg: &CallArg<'_>) -> bool {
        match arg {
            CallArg::Host(host) => self.is_buffer && host.kind == self.dtype.kind(),
            CallArg::Device(device) => self.is_buffer && device.kind == self.dtype.kind(),
            CallArg::Int(_) => !self.is_buffer && self.dtype == Dtype::INT32,
            CallArg::Float(_) => !self.is_buffer && self.dtype == Dtype::FLOAT32,
        }
    }

    fn expected(&self, location: DataLocation) -> String {
        if self.is_buffer {
            format!("{location} buffer of {}", self.dtype)
        } else {
            format!("{} scalar", self.dtype)
        }
    }
}

impl From<Buffer<'_>> for BufferArg {
    fn from(buffer: Buffer<'_>) -> Self {
        Self {
            var: buffer.data().handle(),
            name: buffer.name(),
            dtype: buffer.dtype(),
            is_buffer: true,
            dims: buffer.dims().into_iter().map(|d| d.handle()).collect(),
        }
    }
}

impl From<Tensor<'_>> for BufferArg {
    fn from(tensor: Tensor<'_>) -> Self {
        tensor.buffer().into()
    }
}

impl From<Var<'_>> for BufferArg {
    fn from(var: Var<'_>) -> Self {
        Self {
            var: var.handle(),
            name: var.name(),
            dtype: var.dtype(),
            is_buffer: false,
            dims: Vec::new(),
        }
    }
}

/// Where buffer data resides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataLocation {
    /// Host memory.
    Host,
    /// GPU device memory.
    Device,
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Device => "device",
        })
    }
}

/// Element types a host buffer can hold.
pub trait Element: Copy + sealed::Sealed {
    /// The matching scalar kind.
    const KIND: ScalarKind;
}

impl Element for i32 {
    const KIND: ScalarKind = ScalarKind::Int32;
}

impl Element for f32 {
    const KIND: ScalarKind = ScalarKind::Float32;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
}

/// A scalar value read from or written to a buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    /// An int32 value.
    Int(i32),
    /// A float32 value.
    Float(f32),
}

impl Scalar {
    /// The scalar kind of this value.
    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Int(_) => ScalarKind::Int32,
            Self::Float(_) => ScalarKind::Float32,
        }
    }
}

/// A host slice borrowed for the duration of one call.
#[derive(Clone, Copy, Debug)]
pub struct HostBuffer<'a> {
    ptr: *mut u8,
    len: usize,
    kind: ScalarKind,
    writable: bool,
    _marker: PhantomData<&'a mut [u8]>,
}

impl HostBuffer<'_> {
    /// Base address of the data.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element kind.
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    /// `false` for buffers passed through [`CallArg::input`].
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reads element `index`, or `None` when out of bounds.
    pub fn load(&self, index: usize) -> Option<Scalar> {
        if index >= self.len {
            return None;
        }
        // SAFETY: `index < len` and the pointer came from a live slice of
        // `kind` elements borrowed for `'a`.
        let value = unsafe {
            match self.kind {
                ScalarKind::Int32 => Scalar::Int(self.ptr.cast::<i32>().add(index).read()),
                _ => Scalar::Float(self.ptr.cast::<f32>().add(index).read()),
            }
        };
        Some(value)
    }

    /// Writes element `index`; returns `false` when out of bounds, read-only
    /// or of the wrong kind.
    pub fn store(&self, index: usize, value: Scalar) -> bool {
        if index >= self.len || !self.writable || value.kind() != self.kind {
            return false;
        }
        // SAFETY: as in `load`, and writable buffers come from `&mut [T]`.
        unsafe {
            match value {
                Scalar::Int(v) => self.ptr.cast::<i32>().add(index).write(v),
                Scalar::Float(v) => self.ptr.cast::<f32>().add(index).write(v),
            }
        }
        true
    }
}

/// A device allocation passed by address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    /// Device address.
    pub ptr: u64,
    /// Number of elements.
    pub len: usize,
    /// Element kind.
    pub kind: ScalarKind,
}

/// One runtime argument of a call.
#[derive(Clone, Copy, Debug)]
pub enum CallArg<'a> {
    /// Host-resident buffer data.
    Host(HostBuffer<'a>),
    /// Device-resident buffer data.
    Device(DeviceBuffer),
    /// An int32 scalar.
    Int(i32),
    /// A float32 scalar.
    Float(f32),
}

impl<'a> CallArg<'a> {
    /// A writable host buffer.
    pub fn buffer<T: Element>(data: &'a mut [T]) -> Self {
        Self::Host(HostBuffer {
            ptr: data.as_mut_ptr().cast(),
            len: data.len(),
            kind: T::KIND,
            writable: true,
            _marker: PhantomData,
        })
    }

    /// A read-only host buffer. Stores into it fail the call.
    pub fn input<T: Element>(data: &'a [T]) -> Self {
        Self::Host(HostBuffer {
            ptr: data.as_ptr().cast_mut().cast(),
            len: data.len(),
            kind: T::KIND,
            writable: false,
            _marker: PhantomData,
        })
    }

    /// A device buffer of `len` elements at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must address at least `len` elements of `kind` on the device
    /// the kernel runs on, valid for the duration of the call.
    pub unsafe fn device(ptr: u64, len: usize, kind: ScalarKind) -> Self {
        Self::Device(DeviceBuffer { ptr, len, kind })
    }

    /// Where the argument's data lives; `None` for scalars.
    pub fn location(&self) -> Option<DataLocation> {
        match self {
            Self::Host(_) => Some(DataLocation::Host),
            Self::Device(_) => Some(DataLocation::Device),
            Self::Int(_) | Self::Float(_) => None,
        }
    }

    /// Element count of a buffer argument; `None` for scalars.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Self::Host(host) => Some(host.len()),
            Self::Device(device) => Some(device.len),
            Self::Int(_) | Self::Float(_) => None,
        }
    }

    /// The value of a scalar argument.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Int(v) => Some(Scalar::Int(v)),
            Self::Float(v) => Some(Scalar::Float(v)),
            Self::Host(_) | Self::Device(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Host(host) => format!("host buffer of {}", host.kind),
            Self::Device(device) => format!("device buffer of {}", device.kind),
            Self::Int(_) => "int32 scalar".into(),
            Self::Float(_) => "float32 scalar".into(),
        }
    }
}

impl From<i32> for CallArg<'_> {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for CallArg<'_> {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

/// Checks count, kind, element dtype and data location of `args`.
pub fn check_args(
    params: &[BufferArg],
    args: &[CallArg<'_>],
    location: DataLocation,
) -> Result<(), CodegenError> {
    if params.len() != args.len() {
        return Err(CodegenError::ArgCount {
            expected: params.len(),
            found: args.len(),
        });
    }
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        let located = arg.location().is_none_or(|l| l == location);
        if !located || !param.accepts(arg) {
            return Err(CodegenError::ArgMismatch {
                index,
                name: param.name.clone(),
                expected: param.expected(location),
                found: arg.describe(),
            });
        }
    }
    Ok(())
}
