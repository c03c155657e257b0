//! Lane vectors produced by expression evaluation.

use smallvec::{SmallVec, smallvec};
use texc_backend_core::{CodegenError, Scalar};

pub(crate) type Lanes<T> = SmallVec<[T; 8]>;

/// One evaluated expression: a value per lane.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Int(Lanes<i32>),
    Float(Lanes<f32>),
}

impl Value {
    pub fn int(value: i32) -> Self {
        Self::Int(smallvec![value])
    }

    pub fn float(value: f32) -> Self {
        Self::Float(smallvec![value])
    }

    pub fn zeros_like(scalar: Scalar, lanes: usize) -> Self {
        match scalar {
            Scalar::Int(_) => Self::Int(smallvec![0; lanes]),
            Scalar::Float(_) => Self::Float(smallvec![0.0; lanes]),
        }
    }

    pub fn lanes(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    /// Lane `i`; a single-lane value answers for every lane.
    pub fn lane(&self, i: usize) -> Scalar {
        match self {
            Self::Int(v) => Scalar::Int(v[if v.len() == 1 { 0 } else { i }]),
            Self::Float(v) => Scalar::Float(v[if v.len() == 1 { 0 } else { i }]),
        }
    }

    pub fn set_lane(&mut self, i: usize, scalar: Scalar) {
        match (self, scalar) {
            (Self::Int(v), Scalar::Int(x)) => v[i] = x,
            (Self::Float(v), Scalar::Float(x)) => v[i] = x,
            // Kinds are checked when the IR is built.
            _ => {}
        }
    }

    pub fn ints(&self) -> Result<&[i32], CodegenError> {
        match self {
            Self::Int(v) => Ok(v),
            Self::Float(_) => Err(CodegenError::Internal("expected an int32 value".into())),
        }
    }

    pub fn floats(&self) -> Result<&[f32], CodegenError> {
        match self {
            Self::Float(v) => Ok(v),
            Self::Int(_) => Err(CodegenError::Internal("expected a float32 value".into())),
        }
    }

    /// The value of a single-lane int32 expression.
    pub fn scalar_int(&self) -> Result<i32, CodegenError> {
        match self.ints()? {
            [v] => Ok(*v),
            lanes => Err(CodegenError::Internal(format!(
                "expected a scalar, got {} lanes",
                lanes.len()
            ))),
        }
    }

    pub fn into_scalar(self) -> Result<Scalar, CodegenError> {
        if self.lanes() != 1 {
            return Err(CodegenError::Internal(format!(
                "expected a scalar, got {} lanes",
                self.lanes()
            )));
        }
        Ok(self.lane(0))
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Int(v) => Self::int(v),
            Scalar::Float(v) => Self::float(v),
        }
    }
}
