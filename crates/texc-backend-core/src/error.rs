//! Code generation and call errors.

use texc_ir::IrError;

use crate::BackendKind;

/// Errors raised while building a code generator or running a call.
///
/// None of these are transient; a failed call is not retried.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The call supplied the wrong number of arguments.
    #[error("expected {expected} argument(s), got {found}")]
    ArgCount {
        /// Number of parameters.
        expected: usize,
        /// Number of arguments passed.
        found: usize,
    },

    /// An argument does not fit its parameter.
    #[error("argument {index} (`{name}`): expected {expected}, got {found}")]
    ArgMismatch {
        /// Position of the argument.
        index: usize,
        /// Parameter name.
        name: String,
        /// What the parameter accepts.
        expected: String,
        /// What was passed.
        found: String,
    },

    /// The IR uses something this backend cannot express.
    #[error("{backend} backend does not support {what}")]
    Unsupported {
        /// The backend that rejected the construct.
        backend: BackendKind,
        /// The unsupported construct.
        what: String,
    },

    /// A load or store fell outside its buffer.
    #[error("index {index} out of bounds for `{buffer}` of length {len}")]
    OutOfBounds {
        /// Buffer name.
        buffer: String,
        /// Flat element index that was accessed.
        index: i64,
        /// Number of elements in the buffer.
        len: usize,
    },

    /// A buffer argument is smaller than its declared extents.
    #[error("buffer `{name}` holds {len} element(s) but its extents need {required}")]
    BufferTooSmall {
        /// Parameter name.
        name: String,
        /// Elements required by the declared extents.
        required: usize,
        /// Elements in the argument.
        len: usize,
    },

    /// A store targeted a buffer passed as read-only.
    #[error("store into read-only buffer `{0}`")]
    ReadOnly(String),

    /// An int32 division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,

    /// A variable was read outside of any binding.
    #[error("variable `{0}` is not bound")]
    Unbound(String),

    /// A malformed program reached the backend.
    #[error("internal error: {0}")]
    Internal(String),

    /// The generated module failed to compile.
    #[error("compilation failed: {0}")]
    Compile(String),

    /// The compiled module could not be loaded.
    #[error("failed to load compiled module: {0}")]
    Load(String),

    /// The backend cannot run in this build or on this machine.
    #[error("{0} backend is not available: {1}")]
    Unavailable(BackendKind, String),

    /// The device runtime reported a failure.
    #[error("device error: {0}")]
    Device(String),

    /// Filesystem failure while staging generated sources.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The IR was rejected while preparing code.
    #[error(transparent)]
    Ir(#[from] IrError),
}
