//! Error types for IR construction.

use crate::types::{Dtype, ScalarKind};

/// Errors reported while building IR nodes.
///
/// Construction is validated eagerly: the call that would create a
/// malformed node fails, nothing is deferred to lowering.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An intrinsic was given the wrong number of arguments.
    #[error("intrinsic `{name}` takes {expected} argument(s), got {found}")]
    IntrinsicArity {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// Operand dtypes are incompatible.
    #[error("dtype mismatch: expected {expected}, found {found}")]
    DtypeMismatch { expected: Dtype, found: Dtype },

    /// Operands disagree on their SIMD width.
    #[error("lane mismatch: {lhs} lanes vs {rhs} lanes")]
    LaneMismatch { lhs: u32, rhs: u32 },

    /// A lane count of zero, too large, or applied to a handle.
    #[error("invalid lane count {0}")]
    InvalidLanes(u32),

    /// The dtype has no storage size.
    #[error("scalar kind `{0}` has no byte size")]
    Unsized(ScalarKind),

    /// A load/store base variable is not a buffer handle.
    #[error("variable `{0}` is not a buffer handle")]
    NotABuffer(String),

    /// A handle-typed value used where a number is required.
    #[error("operand of kind `{0}` is not numeric")]
    NonNumeric(ScalarKind),

    /// A tensor was called with the wrong number of indices.
    #[error("`{name}` expects {expected} index argument(s), got {found}")]
    IndexArity {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A compute body is not a scalar number.
    #[error("body of `{name}` must be a scalar int32 or float32, found {found}")]
    InvalidBody { name: String, found: Dtype },

    /// An operand was built in a different kernel scope.
    #[error("operand `{0}` belongs to another kernel scope")]
    ForeignScope(String),
}
