//! Scope-bound handles for building kernels ergonomically.
//!
//! A [`KernelScope`] owns every node of one build. The handle types below
//! borrow the scope, so no node can outlive it, and dropping the scope
//! releases the whole build, on success and on error paths alike.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops;
use std::sync::Arc;

use crate::arena::Handle;
use crate::display::{format_expr, format_stmt};
use crate::error::IrError;
use crate::expr::{BinaryOp, CompareOp, Expression, IntrinsicOp, Variable};
use crate::func::{Buffer as BufferDecl, Function};
use crate::ir::Ir;
use crate::stmt::Statement;
use crate::types::Dtype;

/// The arena lifetime of one kernel build.
#[derive(Debug, Default)]
pub struct KernelScope {
    ir: RefCell<Ir>,
}

impl KernelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access to the node store.
    ///
    /// # Panics
    ///
    /// Panics if the store is currently borrowed mutably.
    pub fn ir(&self) -> Ref<'_, Ir> {
        self.ir.borrow()
    }

    /// Exclusive access to the node store.
    ///
    /// # Panics
    ///
    /// Panics if the store is currently borrowed.
    pub fn ir_mut(&self) -> RefMut<'_, Ir> {
        self.ir.borrow_mut()
    }

    /// An immutable snapshot of every node built so far, shareable across
    /// threads. Handles stay valid in the snapshot.
    pub fn freeze(&self) -> Arc<Ir> {
        Arc::new(self.ir().clone())
    }

    /// Wraps a raw handle.
    pub fn expr(&self, handle: Handle<Expression>) -> Expr<'_> {
        Expr {
            scope: self,
            handle,
        }
    }

    /// Wraps a raw variable handle.
    pub fn var_ref(&self, handle: Handle<Variable>) -> Var<'_> {
        Var {
            scope: self,
            handle,
        }
    }

    /// Wraps a raw function handle.
    pub fn tensor(&self, function: Handle<Function>) -> Tensor<'_> {
        Tensor {
            scope: self,
            function,
        }
    }

    pub fn int(&self, value: i32) -> Expr<'_> {
        let handle = self.ir_mut().int_imm(value);
        self.expr(handle)
    }

    pub fn float(&self, value: f32) -> Expr<'_> {
        let handle = self.ir_mut().float_imm(value);
        self.expr(handle)
    }

    /// A fresh variable. Scalar kernel parameters are declared this way.
    pub fn var(&self, name: &str, dtype: Dtype) -> Var<'_> {
        let handle = self.ir_mut().new_var(name, dtype);
        Var {
            scope: self,
            handle,
        }
    }

    /// Declares an input buffer with the given extents.
    pub fn buffer<'k, E: IntoExpr<'k>>(
        &'k self,
        name: &str,
        dtype: Dtype,
        dims: impl IntoIterator<Item = E>,
    ) -> Result<Buffer<'k>, IrError> {
        let dims = dims
            .into_iter()
            .map(|d| self.operand(d))
            .collect::<Result<Vec<_>, _>>()?;
        let handle = self.ir_mut().new_buffer(name, dtype, dims)?;
        Ok(Buffer {
            scope: self,
            handle,
        })
    }

    /// One dimension of a compute domain.
    pub fn dim<'k>(&'k self, extent: impl IntoExpr<'k>, name: &str) -> DimArg<'k> {
        DimArg {
            extent: extent.into_expr(self),
            name: name.to_owned(),
        }
    }

    /// Defines a function over `dims` by tracing `body` once with fresh
    /// index variables.
    pub fn compute<'k>(
        &'k self,
        name: &str,
        dims: &[DimArg<'k>],
        body: impl FnOnce(&[Var<'k>]) -> Expr<'k>,
    ) -> Result<Tensor<'k>, IrError> {
        self.try_compute(name, dims, |args| Ok(body(args)))
    }

    /// Like [`compute`](Self::compute) for bodies that can fail.
    pub fn try_compute<'k>(
        &'k self,
        name: &str,
        dims: &[DimArg<'k>],
        body: impl FnOnce(&[Var<'k>]) -> Result<Expr<'k>, IrError>,
    ) -> Result<Tensor<'k>, IrError> {
        let args: Vec<Var<'k>> = dims
            .iter()
            .map(|d| self.var(&d.name, Dtype::INT32))
            .collect();
        let value = self.own(body(&args)?)?;
        let extents = dims
            .iter()
            .map(|d| self.own(d.extent))
            .collect::<Result<Vec<_>, _>>()?;
        let function = self.ir_mut().new_function(
            name,
            args.iter().map(|a| a.handle).collect(),
            extents,
            value,
        )?;
        log::trace!("traced function `{name}` over {} dims", dims.len());
        Ok(Tensor {
            scope: self,
            function,
        })
    }

    /// A math intrinsic with arity validation.
    pub fn intrinsic<'k>(
        &'k self,
        op: IntrinsicOp,
        args: &[Expr<'k>],
    ) -> Result<Expr<'k>, IrError> {
        let args = args
            .iter()
            .map(|&a| self.own(a))
            .collect::<Result<Vec<_>, _>>()?;
        let handle = self.ir_mut().intrinsic(op, &args)?;
        Ok(self.expr(handle))
    }

    /// `(let var = value in body)`.
    pub fn let_in<'k>(
        &'k self,
        var: Var<'k>,
        value: Expr<'k>,
        body: Expr<'k>,
    ) -> Result<Expr<'k>, IrError> {
        if !std::ptr::eq(self, var.scope) {
            return Err(IrError::ForeignScope(var.name()));
        }
        let (value, body) = (self.own(value)?, self.own(body)?);
        let handle = self.ir_mut().let_in(var.handle, value, body)?;
        Ok(self.expr(handle))
    }

    pub fn ramp<'k>(
        &'k self,
        base: impl IntoExpr<'k>,
        stride: impl IntoExpr<'k>,
        lanes: u32,
    ) -> Result<Expr<'k>, IrError> {
        let base = self.operand(base)?;
        let stride = self.operand(stride)?;
        let handle = self.ir_mut().ramp(base, stride, lanes)?;
        Ok(self.expr(handle))
    }

    pub fn broadcast<'k>(&'k self, value: impl IntoExpr<'k>, lanes: u32) -> Result<Expr<'k>, IrError> {
        let value = self.operand(value)?;
        let handle = self.ir_mut().broadcast(value, lanes)?;
        Ok(self.expr(handle))
    }

    /// The handle of `expr`, if it was built in this scope.
    fn own(&self, expr: Expr<'_>) -> Result<Handle<Expression>, IrError> {
        if std::ptr::eq(self, expr.scope) {
            Ok(expr.handle)
        } else {
            Err(IrError::ForeignScope(expr.to_string()))
        }
    }

    fn operand<'k>(&'k self, value: impl IntoExpr<'k>) -> Result<Handle<Expression>, IrError> {
        self.own(value.into_expr(self))
    }

    /// Prints a statement tree built in this scope.
    pub fn format_stmt(&self, stmt: &Statement) -> String {
        format_stmt(&self.ir(), stmt)
    }
}

/// Anything usable as an expression operand.
pub trait IntoExpr<'k> {
    fn into_expr(self, scope: &'k KernelScope) -> Expr<'k>;
}

impl<'k> IntoExpr<'k> for Expr<'k> {
    fn into_expr(self, _scope: &'k KernelScope) -> Expr<'k> {
        self
    }
}

impl<'k> IntoExpr<'k> for Var<'k> {
    fn into_expr(self, _scope: &'k KernelScope) -> Expr<'k> {
        self.expr()
    }
}

impl<'k> IntoExpr<'k> for i32 {
    fn into_expr(self, scope: &'k KernelScope) -> Expr<'k> {
        scope.int(self)
    }
}

impl<'k> IntoExpr<'k> for f32 {
    fn into_expr(self, scope: &'k KernelScope) -> Expr<'k> {
        scope.float(self)
    }
}

/// A value-producing node of a [`KernelScope`].
#[derive(Clone, Copy)]
pub struct Expr<'k> {
    scope: &'k KernelScope,
    handle: Handle<Expression>,
}

impl<'k> Expr<'k> {
    pub fn handle(self) -> Handle<Expression> {
        self.handle
    }

    pub fn scope(self) -> &'k KernelScope {
        self.scope
    }

    pub fn dtype(self) -> Dtype {
        self.scope.ir().dtype(self.handle)
    }

    /// `true` if both handles name the same node.
    pub fn same_node(self, other: Expr<'_>) -> bool {
        std::ptr::eq(self.scope, other.scope) && self.handle == other.handle
    }

    pub fn try_binary(self, op: BinaryOp, rhs: impl IntoExpr<'k>) -> Result<Expr<'k>, IrError> {
        let rhs = self.scope.operand(rhs)?;
        let handle = self.scope.ir_mut().binary(op, self.handle, rhs)?;
        Ok(self.scope.expr(handle))
    }

    /// # Panics
    ///
    /// Panics if the operands have different lane counts or are not numeric.
    pub fn binary(self, op: BinaryOp, rhs: impl IntoExpr<'k>) -> Expr<'k> {
        self.try_binary(op, rhs)
            .unwrap_or_else(|e| panic!("invalid operands for `{}`: {e}", op.symbol()))
    }

    pub fn try_compare(self, op: CompareOp, rhs: impl IntoExpr<'k>) -> Result<Expr<'k>, IrError> {
        let rhs = self.scope.operand(rhs)?;
        let handle = self.scope.ir_mut().compare_select(op, self.handle, rhs)?;
        Ok(self.scope.expr(handle))
    }

    /// Per-lane comparison yielding int32 `1` or `0`.
    ///
    /// # Panics
    ///
    /// Panics on incompatible operands, like the arithmetic operators.
    pub fn compare(self, op: CompareOp, rhs: impl IntoExpr<'k>) -> Expr<'k> {
        self.try_compare(op, rhs)
            .unwrap_or_else(|e| panic!("invalid operands for `{}`: {e}", op.symbol()))
    }

    pub fn try_max(self, rhs: impl IntoExpr<'k>, propagate_nans: bool) -> Result<Expr<'k>, IrError> {
        let rhs = self.scope.operand(rhs)?;
        let handle = self.scope.ir_mut().max(self.handle, rhs, propagate_nans)?;
        Ok(self.scope.expr(handle))
    }

    pub fn try_min(self, rhs: impl IntoExpr<'k>, propagate_nans: bool) -> Result<Expr<'k>, IrError> {
        let rhs = self.scope.operand(rhs)?;
        let handle = self.scope.ir_mut().min(self.handle, rhs, propagate_nans)?;
        Ok(self.scope.expr(handle))
    }

    /// # Panics
    ///
    /// Panics on incompatible operands.
    pub fn max(self, rhs: impl IntoExpr<'k>, propagate_nans: bool) -> Expr<'k> {
        self.try_max(rhs, propagate_nans)
            .unwrap_or_else(|e| panic!("invalid operands for `Max`: {e}"))
    }

    /// # Panics
    ///
    /// Panics on incompatible operands.
    pub fn min(self, rhs: impl IntoExpr<'k>, propagate_nans: bool) -> Expr<'k> {
        self.try_min(rhs, propagate_nans)
            .unwrap_or_else(|e| panic!("invalid operands for `Min`: {e}"))
    }

    /// Explicit conversion to another numeric dtype of the same width.
    pub fn cast(self, dtype: Dtype) -> Result<Expr<'k>, IrError> {
        let handle = self.scope.ir_mut().cast(dtype, self.handle)?;
        Ok(self.scope.expr(handle))
    }

    /// Applies a one-argument intrinsic.
    ///
    /// # Panics
    ///
    /// Panics if `op` does not take exactly one argument or the operand is
    /// not numeric.
    pub fn apply(self, op: IntrinsicOp) -> Expr<'k> {
        self.scope
            .intrinsic(op, &[self])
            .unwrap_or_else(|e| panic!("invalid intrinsic call: {e}"))
    }

    pub fn pow(self, exponent: impl IntoExpr<'k>) -> Result<Expr<'k>, IrError> {
        let exponent = exponent.into_expr(self.scope);
        self.scope.intrinsic(IntrinsicOp::Pow, &[self, exponent])
    }
}

macro_rules! unary_intrinsics {
    ($($method:ident => $op:ident),* $(,)?) => {
        impl<'k> Expr<'k> {
            $(
                #[doc = concat!("`", stringify!($method), "(self)`.")]
                pub fn $method(self) -> Expr<'k> {
                    self.apply(IntrinsicOp::$op)
                }
            )*
        }
    };
}

unary_intrinsics! {
    sin => Sin,
    cos => Cos,
    tan => Tan,
    tanh => Tanh,
    exp => Exp,
    log => Log,
    sqrt => Sqrt,
    rsqrt => Rsqrt,
    abs => Fabs,
    floor => Floor,
    ceil => Ceil,
    erf => Erf,
}

impl fmt::Display for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_expr(&self.scope.ir(), self.handle))
    }
}

impl fmt::Debug for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr{:?}({self})", self.handle)
    }
}

/// A variable of a [`KernelScope`].
#[derive(Clone, Copy)]
pub struct Var<'k> {
    scope: &'k KernelScope,
    handle: Handle<Variable>,
}

impl<'k> Var<'k> {
    pub fn handle(self) -> Handle<Variable> {
        self.handle
    }

    pub fn scope(self) -> &'k KernelScope {
        self.scope
    }

    /// The variable's canonical expression.
    pub fn expr(self) -> Expr<'k> {
        let handle = self.scope.ir().var_expr(self.handle);
        self.scope.expr(handle)
    }

    pub fn name(self) -> String {
        self.scope.ir()[self.handle].name.clone()
    }

    pub fn dtype(self) -> Dtype {
        self.scope.ir()[self.handle].dtype
    }
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var{:?}({})", self.handle, self.name())
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:ident) => {
        impl<'k, R: IntoExpr<'k>> ops::$trait<R> for Expr<'k> {
            type Output = Expr<'k>;

            fn $method(self, rhs: R) -> Expr<'k> {
                self.binary(BinaryOp::$op, rhs)
            }
        }

        impl<'k, R: IntoExpr<'k>> ops::$trait<R> for Var<'k> {
            type Output = Expr<'k>;

            fn $method(self, rhs: R) -> Expr<'k> {
                self.expr().binary(BinaryOp::$op, rhs)
            }
        }

        impl<'k> ops::$trait<Expr<'k>> for i32 {
            type Output = Expr<'k>;

            fn $method(self, rhs: Expr<'k>) -> Expr<'k> {
                rhs.scope.int(self).binary(BinaryOp::$op, rhs)
            }
        }

        impl<'k> ops::$trait<Var<'k>> for i32 {
            type Output = Expr<'k>;

            fn $method(self, rhs: Var<'k>) -> Expr<'k> {
                rhs.scope.int(self).binary(BinaryOp::$op, rhs)
            }
        }

        impl<'k> ops::$trait<Expr<'k>> for f32 {
            type Output = Expr<'k>;

            fn $method(self, rhs: Expr<'k>) -> Expr<'k> {
                rhs.scope.float(self).binary(BinaryOp::$op, rhs)
            }
        }

        impl<'k> ops::$trait<Var<'k>> for f32 {
            type Output = Expr<'k>;

            fn $method(self, rhs: Var<'k>) -> Expr<'k> {
                rhs.scope.float(self).binary(BinaryOp::$op, rhs)
            }
        }
    };
}

binary_operator!(Add, add, Add);
binary_operator!(Sub, sub, Sub);
binary_operator!(Mul, mul, Mul);
binary_operator!(Div, div, Div);
binary_operator!(Rem, rem, Mod);

impl<'k> ops::Neg for Expr<'k> {
    type Output = Expr<'k>;

    fn neg(self) -> Expr<'k> {
        let zero = if self.dtype().is_float() {
            self.scope.float(0.0)
        } else {
            self.scope.int(0)
        };
        zero.binary(BinaryOp::Sub, self)
    }
}

/// `(extent, name)` describing one dimension of a compute domain.
#[derive(Clone, Debug)]
pub struct DimArg<'k> {
    pub extent: Expr<'k>,
    pub name: String,
}

/// A declared buffer of a [`KernelScope`].
#[derive(Clone, Copy)]
pub struct Buffer<'k> {
    scope: &'k KernelScope,
    handle: Handle<BufferDecl>,
}

impl<'k> Buffer<'k> {
    pub fn handle(self) -> Handle<BufferDecl> {
        self.handle
    }

    pub fn name(self) -> String {
        self.scope.ir()[self.handle].name.clone()
    }

    /// Element dtype.
    pub fn dtype(self) -> Dtype {
        self.scope.ir()[self.handle].dtype
    }

    /// The handle-typed base-address variable.
    pub fn data(self) -> Var<'k> {
        Var {
            scope: self.scope,
            handle: self.scope.ir()[self.handle].data,
        }
    }

    pub fn dims(self) -> Vec<Expr<'k>> {
        let dims = self.scope.ir()[self.handle].dims.clone();
        dims.into_iter().map(|d| self.scope.expr(d)).collect()
    }

    /// Loads the element at multi-dimensional `indices` (row-major).
    pub fn try_load<E: IntoExpr<'k>>(
        self,
        indices: impl IntoIterator<Item = E>,
    ) -> Result<Expr<'k>, IrError> {
        let indices = indices
            .into_iter()
            .map(|i| self.scope.operand(i))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ir = self.scope.ir_mut();
        let index = ir.flat_index(self.handle, &indices)?;
        let mask = ir.int_imm(1);
        let handle = ir.load(self.handle, index, mask)?;
        drop(ir);
        Ok(self.scope.expr(handle))
    }

    /// # Panics
    ///
    /// Panics if the index count differs from the buffer's rank or an index
    /// is not a scalar int32.
    pub fn load<E: IntoExpr<'k>>(self, indices: impl IntoIterator<Item = E>) -> Expr<'k> {
        self.try_load(indices)
            .unwrap_or_else(|e| panic!("invalid load: {e}"))
    }

    /// Loads at a precomputed flat (possibly vector) index.
    pub fn load_flat(self, index: Expr<'k>, mask: Expr<'k>) -> Result<Expr<'k>, IrError> {
        let (index, mask) = (self.scope.own(index)?, self.scope.own(mask)?);
        let handle = self.scope.ir_mut().load(self.handle, index, mask)?;
        Ok(self.scope.expr(handle))
    }

    /// Stores at a precomputed flat (possibly vector) index.
    pub fn store_flat(
        self,
        index: Expr<'k>,
        value: Expr<'k>,
        mask: Expr<'k>,
    ) -> Result<Statement, IrError> {
        let index = self.scope.own(index)?;
        let value = self.scope.own(value)?;
        let mask = self.scope.own(mask)?;
        self.scope.ir_mut().store(self.handle, index, value, mask)
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer{:?}({})", self.handle, self.name())
    }
}

/// A handle to a function of a [`KernelScope`].
#[derive(Clone, Copy)]
pub struct Tensor<'k> {
    scope: &'k KernelScope,
    function: Handle<Function>,
}

impl<'k> Tensor<'k> {
    pub fn function(self) -> Handle<Function> {
        self.function
    }

    pub fn scope(self) -> &'k KernelScope {
        self.scope
    }

    pub fn name(self) -> String {
        self.scope.ir()[self.function].name.clone()
    }

    pub fn ndim(self) -> usize {
        self.scope.ir()[self.function].ndim()
    }

    /// Output element dtype.
    pub fn dtype(self) -> Dtype {
        let ir = self.scope.ir();
        ir[ir[self.function].buffer].dtype
    }

    /// The index variable of dimension `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.ndim()`.
    pub fn arg(self, i: usize) -> Var<'k> {
        Var {
            scope: self.scope,
            handle: self.scope.ir()[self.function].args[i],
        }
    }

    pub fn args(self) -> Vec<Var<'k>> {
        (0..self.ndim()).map(|i| self.arg(i)).collect()
    }

    /// The extent of dimension `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.ndim()`.
    pub fn dim(self, i: usize) -> Expr<'k> {
        let handle = self.scope.ir()[self.function].dims[i];
        self.scope.expr(handle)
    }

    pub fn body(self) -> Expr<'k> {
        let handle = self.scope.ir()[self.function].body;
        self.scope.expr(handle)
    }

    /// The output buffer the function is materialized into.
    pub fn buffer(self) -> Buffer<'k> {
        Buffer {
            scope: self.scope,
            handle: self.scope.ir()[self.function].buffer,
        }
    }

    pub fn try_call<E: IntoExpr<'k>>(
        self,
        indices: impl IntoIterator<Item = E>,
    ) -> Result<Expr<'k>, IrError> {
        let indices = indices
            .into_iter()
            .map(|i| self.scope.operand(i))
            .collect::<Result<Vec<_>, _>>()?;
        let handle = self.scope.ir_mut().call(self.function, &indices)?;
        Ok(self.scope.expr(handle))
    }

    /// References this tensor's value at `indices`.
    ///
    /// # Panics
    ///
    /// Panics if the index count differs from the tensor's rank.
    pub fn call<E: IntoExpr<'k>>(self, indices: impl IntoIterator<Item = E>) -> Expr<'k> {
        self.try_call(indices)
            .unwrap_or_else(|e| panic!("invalid tensor call: {e}"))
    }
}

impl fmt::Debug for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{:?}({})", self.function, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_parenthesized_trees() {
        let k = KernelScope::new();
        let x = k.var("x", Dtype::INT32);
        let y = k.var("y", Dtype::INT32);
        let e = 1 + x * x + y * y;
        assert_eq!(e.to_string(), "((1 + (x * x)) + (y * y))");
        assert_eq!((x % 3).to_string(), "(x % 3)");
        assert_eq!((-x.expr()).to_string(), "(0 - x)");
    }

    #[test]
    fn mixing_int_and_float_casts_the_int() {
        let k = KernelScope::new();
        let x = k.var("x", Dtype::INT32);
        let e = x * 0.5f32;
        assert_eq!(e.dtype(), Dtype::FLOAT32);
        assert_eq!(e.to_string(), "(float32(x) * 0.5)");
    }

    #[test]
    fn compute_traces_body_once() {
        let k = KernelScope::new();
        let mut calls = 0;
        let t = k
            .compute("f", &[k.dim(4, "i"), k.dim(5, "j")], |v| {
                calls += 1;
                v[0] * v[1]
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.name(), "f");
        assert_eq!(t.arg(1).name(), "j");
        assert_eq!(t.dtype(), Dtype::INT32);
        assert_eq!(t.body().to_string(), "(i * j)");
    }

    #[test]
    fn call_and_load_render() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [3, 4]).unwrap();
        let t = k
            .compute("g", &[k.dim(3, "m"), k.dim(4, "n")], |v| a.load([v[0], v[1]]))
            .unwrap();
        assert_eq!(t.body().to_string(), "a[((m * 4) + (n * 1))]");
        let i = k.var("i", Dtype::INT32);
        assert_eq!(t.call([i.expr(), k.int(2)]).to_string(), "g(i, 2)");
        assert!(t.try_call([i]).is_err());
    }

    #[test]
    fn symbolic_extents_give_symbolic_strides() {
        let k = KernelScope::new();
        let m = k.var("m", Dtype::INT32);
        let n = k.var("n", Dtype::INT32);
        let a = k.buffer("a", Dtype::FLOAT32, [m, n]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let j = k.var("j", Dtype::INT32);
        assert_eq!(a.load([i, j]).to_string(), "a[((i * n) + (j * 1))]");
    }

    #[test]
    fn invalid_body_is_rejected() {
        let k = KernelScope::new();
        let r = k.try_compute("h", &[k.dim(4, "i")], |_| k.ramp(0, 1, 4));
        assert!(matches!(r, Err(IrError::InvalidBody { .. })));
    }

    #[test]
    fn intrinsic_helpers() {
        let k = KernelScope::new();
        let x = k.var("x", Dtype::FLOAT32);
        assert_eq!(x.expr().sin().to_string(), "sin(x)");
        assert_eq!(x.expr().pow(2.0f32).unwrap().to_string(), "pow(x, 2.0)");
        assert!(k.intrinsic(IntrinsicOp::Fmod, &[x.expr()]).is_err());
    }

    #[test]
    fn operands_from_another_scope_are_rejected() {
        let k1 = KernelScope::new();
        let k2 = KernelScope::new();
        let x = k1.var("x", Dtype::INT32);
        let y = k2.var("y", Dtype::INT32);
        assert!(matches!(
            x.expr().try_binary(BinaryOp::Add, y),
            Err(IrError::ForeignScope(name)) if name == "y"
        ));
        assert!(x.expr().try_max(y, false).is_err());
        assert!(k1.broadcast(y, 4).is_err());
        assert!(k1.buffer("a", Dtype::FLOAT32, [y]).is_err());

        let a = k1.buffer("a", Dtype::FLOAT32, [4]).unwrap();
        assert!(a.try_load([y]).is_err());
        assert!(a.store_flat(y.expr(), k1.float(1.0), k1.int(1)).is_err());
        let r = k1.compute("f", &[k1.dim(4, "i")], |_| k2.int(3));
        assert!(matches!(r, Err(IrError::ForeignScope(_))));
        let r = k1.compute("g", &[k1.dim(y, "i")], |v| v[0] + 1);
        assert!(matches!(r, Err(IrError::ForeignScope(_))));
    }

    #[test]
    fn frozen_snapshot_is_shareable() {
        let k = KernelScope::new();
        let e = k.int(1) + 2;
        let ir = k.freeze();
        let handle = e.handle();
        let printed = std::thread::spawn(move || format_expr(&ir, handle))
            .join()
            .unwrap();
        assert_eq!(printed, "(1 + 2)");
    }
}
