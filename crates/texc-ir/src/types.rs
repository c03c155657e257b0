//! Scalar kinds and (possibly vectorized) data types.

use std::fmt;

use crate::error::IrError;

/// The element kind of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Placeholder for values whose type is not known yet.
    Uninitialized,
    /// An opaque buffer base address.
    Handle,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE-754 float.
    Float32,
}

impl ScalarKind {
    /// Size of one element in bytes, `None` for kinds without storage.
    pub fn size(self) -> Option<usize> {
        match self {
            Self::Int32 | Self::Float32 => Some(4),
            Self::Handle | Self::Uninitialized => None,
        }
    }

    /// Returns `true` for the numeric kinds.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int32 | Self::Float32)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Handle => "handle",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
        })
    }
}

/// A scalar kind together with a SIMD lane count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dtype {
    kind: ScalarKind,
    lanes: u16,
}

impl Dtype {
    /// Scalar 32-bit integer.
    pub const INT32: Self = Self::scalar(ScalarKind::Int32);
    /// Scalar 32-bit float.
    pub const FLOAT32: Self = Self::scalar(ScalarKind::Float32);
    /// Buffer base address.
    pub const HANDLE: Self = Self::scalar(ScalarKind::Handle);
    /// Not yet typed.
    pub const UNINITIALIZED: Self = Self::scalar(ScalarKind::Uninitialized);

    /// A single-lane dtype of the given kind.
    pub const fn scalar(kind: ScalarKind) -> Self {
        Self { kind, lanes: 1 }
    }

    /// A vector dtype. Fails for zero lanes or vectors of handles.
    pub fn vector(kind: ScalarKind, lanes: u32) -> Result<Self, IrError> {
        let lanes = u16::try_from(lanes)
            .ok()
            .filter(|&l| l >= 1)
            .ok_or(IrError::InvalidLanes(lanes))?;
        if lanes > 1 && !kind.is_numeric() {
            return Err(IrError::InvalidLanes(u32::from(lanes)));
        }
        Ok(Self { kind, lanes })
    }

    /// The element kind.
    pub fn kind(self) -> ScalarKind {
        self.kind
    }

    /// Number of SIMD lanes (1 for scalars).
    pub fn lanes(self) -> u32 {
        u32::from(self.lanes)
    }

    /// The single-lane dtype of the same kind.
    pub fn element(self) -> Self {
        Self::scalar(self.kind)
    }

    /// Same kind with a different lane count.
    pub fn with_lanes(self, lanes: u32) -> Result<Self, IrError> {
        Self::vector(self.kind, lanes)
    }

    /// Same lane count with a different kind.
    pub fn with_kind(self, kind: ScalarKind) -> Self {
        Self { kind, lanes: self.lanes }
    }

    /// `true` for float32 of any width.
    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float32
    }

    /// `true` for int32 of any width.
    pub fn is_int(self) -> bool {
        self.kind == ScalarKind::Int32
    }

    /// Total storage size: element size times lanes.
    pub fn byte_size(self) -> Result<usize, IrError> {
        self.kind
            .size()
            .map(|size| size * self.lanes as usize)
            .ok_or(IrError::Unsized(self.kind))
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}
