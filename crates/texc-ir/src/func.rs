//! Buffers and index-parameterized functions.

use crate::arena::Handle;
use crate::expr::{Expression, Variable};
use crate::types::Dtype;

/// A multi-dimensional storage descriptor.
///
/// A buffer never owns data; its handle-typed `data` variable is bound to
/// caller memory (or to scratch storage from an `Allocate`) at run time.
#[derive(Clone, Debug)]
pub struct Buffer {
    pub name: String,
    /// The base-address variable, of dtype `handle`.
    pub data: Handle<Variable>,
    /// Element dtype (always a scalar).
    pub dtype: Dtype,
    /// Extent of each dimension, outermost first.
    pub dims: Vec<Handle<Expression>>,
}

/// A body expression over a rectangular index domain.
///
/// Functions are the unit the scheduler splits and inlines. Each one owns
/// an output buffer named after it.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// One int32 index variable per dimension.
    pub args: Vec<Handle<Variable>>,
    /// Extent of each dimension, matching `args`.
    pub dims: Vec<Handle<Expression>>,
    pub body: Handle<Expression>,
    pub buffer: Handle<Buffer>,
}

impl Function {
    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.args.len()
    }
}
