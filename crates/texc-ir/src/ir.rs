//! The node store of one kernel build, with validating constructors.

use std::ops::Index;

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::expr::{BinaryOp, CompareOp, Expression, IntrinsicOp, Variable};
use crate::func::{Buffer, Function};
use crate::stmt::Statement;
use crate::types::{Dtype, ScalarKind};

/// All IR nodes of one build.
///
/// Expressions are appended, never modified; every constructor validates
/// its operands and records the result dtype next to the node. Statements
/// are owned trees that reference expressions by handle.
#[derive(Clone, Debug, Default)]
pub struct Ir {
    expressions: Arena<Expression>,
    dtypes: Vec<Dtype>,
    variables: Arena<Variable>,
    buffers: Arena<Buffer>,
    functions: Arena<Function>,
}

impl Ir {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dtype of an expression.
    pub fn dtype(&self, expr: Handle<Expression>) -> Dtype {
        self.dtypes[expr.index()]
    }

    pub fn expressions(&self) -> &Arena<Expression> {
        &self.expressions
    }

    pub fn variables(&self) -> &Arena<Variable> {
        &self.variables
    }

    pub fn buffers(&self) -> &Arena<Buffer> {
        &self.buffers
    }

    pub fn functions(&self) -> &Arena<Function> {
        &self.functions
    }

    fn append(&mut self, expr: Expression, dtype: Dtype) -> Handle<Expression> {
        self.dtypes.push(dtype);
        self.expressions.append(expr)
    }

    pub fn int_imm(&mut self, value: i32) -> Handle<Expression> {
        self.append(Expression::IntImm(value), Dtype::INT32)
    }

    pub fn float_imm(&mut self, value: f32) -> Handle<Expression> {
        self.append(Expression::FloatImm(value), Dtype::FLOAT32)
    }

    /// Creates a fresh variable and its canonical `Var` expression.
    pub fn new_var(&mut self, name: impl Into<String>, dtype: Dtype) -> Handle<Variable> {
        let var = self.variables.next_handle();
        let expr = self.append(Expression::Var(var), dtype);
        self.variables.append(Variable {
            name: name.into(),
            dtype,
            expr,
        })
    }

    /// The canonical expression reading `var`.
    pub fn var_expr(&self, var: Handle<Variable>) -> Handle<Expression> {
        self.variables[var].expr
    }

    /// The value of an integer immediate.
    pub fn as_int(&self, expr: Handle<Expression>) -> Option<i32> {
        match self[expr] {
            Expression::IntImm(value) => Some(value),
            _ => None,
        }
    }

    /// `true` if `mask` enables every lane unconditionally.
    pub fn is_true_mask(&self, mask: Handle<Expression>) -> bool {
        match self[mask] {
            Expression::IntImm(1) => true,
            Expression::Broadcast { value, .. } => self.as_int(value) == Some(1),
            _ => false,
        }
    }

    fn numeric(&self, expr: Handle<Expression>) -> Result<Dtype, IrError> {
        let dtype = self.dtype(expr);
        if dtype.kind().is_numeric() {
            Ok(dtype)
        } else {
            Err(IrError::NonNumeric(dtype.kind()))
        }
    }

    fn scalar_int(&self, expr: Handle<Expression>) -> Result<(), IrError> {
        let found = self.dtype(expr);
        if found == Dtype::INT32 {
            Ok(())
        } else {
            Err(IrError::DtypeMismatch {
                expected: Dtype::INT32,
                found,
            })
        }
    }

    /// Brings two operands to a common dtype, casting an int32 side to
    /// float32 when the kinds differ.
    fn promote(
        &mut self,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
    ) -> Result<(Handle<Expression>, Handle<Expression>, Dtype), IrError> {
        let l = self.numeric(lhs)?;
        let r = self.numeric(rhs)?;
        if l.lanes() != r.lanes() {
            return Err(IrError::LaneMismatch {
                lhs: l.lanes(),
                rhs: r.lanes(),
            });
        }
        if l.kind() == r.kind() {
            return Ok((lhs, rhs, l));
        }
        let float = l.with_kind(ScalarKind::Float32);
        let lhs = if l.is_int() { self.cast(float, lhs)? } else { lhs };
        let rhs = if r.is_int() { self.cast(float, rhs)? } else { rhs };
        Ok((lhs, rhs, float))
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let (lhs, rhs, dtype) = self.promote(lhs, rhs)?;
        Ok(self.append(Expression::Binary { op, lhs, rhs }, dtype))
    }

    pub fn max(
        &mut self,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
        propagate_nans: bool,
    ) -> Result<Handle<Expression>, IrError> {
        let (lhs, rhs, dtype) = self.promote(lhs, rhs)?;
        Ok(self.append(
            Expression::Max {
                lhs,
                rhs,
                propagate_nans,
            },
            dtype,
        ))
    }

    pub fn min(
        &mut self,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
        propagate_nans: bool,
    ) -> Result<Handle<Expression>, IrError> {
        let (lhs, rhs, dtype) = self.promote(lhs, rhs)?;
        Ok(self.append(
            Expression::Min {
                lhs,
                rhs,
                propagate_nans,
            },
            dtype,
        ))
    }

    pub fn compare_select(
        &mut self,
        op: CompareOp,
        lhs: Handle<Expression>,
        rhs: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let (lhs, rhs, dtype) = self.promote(lhs, rhs)?;
        let result = dtype.with_kind(ScalarKind::Int32);
        Ok(self.append(Expression::CompareSelect { op, lhs, rhs }, result))
    }

    pub fn cast(
        &mut self,
        dtype: Dtype,
        value: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let found = self.numeric(value)?;
        if !dtype.kind().is_numeric() {
            return Err(IrError::NonNumeric(dtype.kind()));
        }
        if found.lanes() != dtype.lanes() {
            return Err(IrError::LaneMismatch {
                lhs: dtype.lanes(),
                rhs: found.lanes(),
            });
        }
        Ok(self.append(Expression::Cast { dtype, value }, dtype))
    }

    /// `(let var = value in body)`.
    pub fn let_in(
        &mut self,
        var: Handle<Variable>,
        value: Handle<Expression>,
        body: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let expected = self.variables[var].dtype;
        let found = self.dtype(value);
        if expected != found {
            return Err(IrError::DtypeMismatch { expected, found });
        }
        let dtype = self.dtype(body);
        Ok(self.append(Expression::Let { var, value, body }, dtype))
    }

    /// The vector `[base, base + stride, ..., base + (lanes - 1) * stride]`.
    pub fn ramp(
        &mut self,
        base: Handle<Expression>,
        stride: Handle<Expression>,
        lanes: u32,
    ) -> Result<Handle<Expression>, IrError> {
        let (base, stride, dtype) = self.promote(base, stride)?;
        if dtype.lanes() != 1 {
            return Err(IrError::InvalidLanes(dtype.lanes()));
        }
        let dtype = dtype.with_lanes(lanes)?;
        Ok(self.append(
            Expression::Ramp {
                base,
                stride,
                lanes,
            },
            dtype,
        ))
    }

    pub fn broadcast(
        &mut self,
        value: Handle<Expression>,
        lanes: u32,
    ) -> Result<Handle<Expression>, IrError> {
        let dtype = self.numeric(value)?;
        if dtype.lanes() != 1 {
            return Err(IrError::InvalidLanes(dtype.lanes()));
        }
        let dtype = dtype.with_lanes(lanes)?;
        Ok(self.append(Expression::Broadcast { value, lanes }, dtype))
    }

    /// Loads from a declared buffer at a flat index.
    pub fn load(
        &mut self,
        buffer: Handle<Buffer>,
        index: Handle<Expression>,
        mask: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let buf = &self.buffers[buffer];
        let (data, kind) = (buf.data, buf.dtype.kind());
        self.load_from(data, kind, index, mask)
    }

    /// Loads elements of kind `element` through a handle variable.
    pub fn load_from(
        &mut self,
        base: Handle<Variable>,
        element: ScalarKind,
        index: Handle<Expression>,
        mask: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let lanes = self.check_access(base, index, mask)?;
        let dtype = Dtype::vector(element, lanes)?;
        Ok(self.append(Expression::Load { base, index, mask }, dtype))
    }

    /// Validates a load/store address, returning its lane count.
    fn check_access(
        &self,
        base: Handle<Variable>,
        index: Handle<Expression>,
        mask: Handle<Expression>,
    ) -> Result<u32, IrError> {
        let var = &self.variables[base];
        if var.dtype != Dtype::HANDLE {
            return Err(IrError::NotABuffer(var.name.clone()));
        }
        let idx = self.dtype(index);
        if !idx.is_int() {
            return Err(IrError::DtypeMismatch {
                expected: idx.with_kind(ScalarKind::Int32),
                found: idx,
            });
        }
        let m = self.dtype(mask);
        if !m.is_int() {
            return Err(IrError::DtypeMismatch {
                expected: m.with_kind(ScalarKind::Int32),
                found: m,
            });
        }
        if idx.lanes() != m.lanes() {
            return Err(IrError::LaneMismatch {
                lhs: idx.lanes(),
                rhs: m.lanes(),
            });
        }
        Ok(idx.lanes())
    }

    /// A math intrinsic. Integer arguments are promoted to float32.
    pub fn intrinsic(
        &mut self,
        op: IntrinsicOp,
        args: &[Handle<Expression>],
    ) -> Result<Handle<Expression>, IrError> {
        if args.len() != op.arity() {
            return Err(IrError::IntrinsicArity {
                name: op.name(),
                expected: op.arity(),
                found: args.len(),
            });
        }
        let mut promoted = Vec::with_capacity(args.len());
        let mut dtype = Dtype::FLOAT32;
        for (i, &arg) in args.iter().enumerate() {
            let found = self.numeric(arg)?;
            if i > 0 && found.lanes() != dtype.lanes() {
                return Err(IrError::LaneMismatch {
                    lhs: dtype.lanes(),
                    rhs: found.lanes(),
                });
            }
            dtype = found.with_kind(ScalarKind::Float32);
            let arg = if found.is_int() {
                self.cast(dtype, arg)?
            } else {
                arg
            };
            promoted.push(arg);
        }
        Ok(self.append(
            Expression::Intrinsic {
                op,
                args: promoted,
            },
            dtype,
        ))
    }

    /// A reference to `function` at the given indices.
    pub fn call(
        &mut self,
        function: Handle<Function>,
        args: &[Handle<Expression>],
    ) -> Result<Handle<Expression>, IrError> {
        let func = &self.functions[function];
        if args.len() != func.ndim() {
            return Err(IrError::IndexArity {
                name: func.name.clone(),
                expected: func.ndim(),
                found: args.len(),
            });
        }
        for &arg in args {
            self.scalar_int(arg)?;
        }
        let dtype = self.buffers[func.buffer].dtype;
        Ok(self.append(
            Expression::Call {
                function,
                args: args.to_vec(),
            },
            dtype,
        ))
    }

    /// Declares a buffer whose data variable is named after it.
    pub fn new_buffer(
        &mut self,
        name: impl Into<String>,
        dtype: Dtype,
        dims: Vec<Handle<Expression>>,
    ) -> Result<Handle<Buffer>, IrError> {
        if !dtype.kind().is_numeric() || dtype.lanes() != 1 {
            return Err(IrError::DtypeMismatch {
                expected: Dtype::FLOAT32,
                found: dtype,
            });
        }
        for &dim in &dims {
            self.scalar_int(dim)?;
        }
        let name = name.into();
        let data = self.new_var(name.clone(), Dtype::HANDLE);
        Ok(self.buffers.append(Buffer {
            name,
            data,
            dtype,
            dims,
        }))
    }

    /// Records a function and its output buffer.
    pub fn new_function(
        &mut self,
        name: impl Into<String>,
        args: Vec<Handle<Variable>>,
        dims: Vec<Handle<Expression>>,
        body: Handle<Expression>,
    ) -> Result<Handle<Function>, IrError> {
        let name = name.into();
        let found = self.dtype(body);
        if !found.kind().is_numeric() || found.lanes() != 1 {
            return Err(IrError::InvalidBody { name, found });
        }
        if args.len() != dims.len() {
            return Err(IrError::IndexArity {
                name,
                expected: dims.len(),
                found: args.len(),
            });
        }
        let buffer = self.new_buffer(name.clone(), found, dims.clone())?;
        Ok(self.functions.append(Function {
            name,
            args,
            dims,
            body,
            buffer,
        }))
    }

    /// Row-major flattening of `indices` into `buffer`:
    /// `((i0 * s0) + (i1 * s1)) + ...` where `s_k` is the product of the
    /// trailing extents, folded to a constant when they are all constant.
    pub fn flat_index(
        &mut self,
        buffer: Handle<Buffer>,
        indices: &[Handle<Expression>],
    ) -> Result<Handle<Expression>, IrError> {
        let buf = &self.buffers[buffer];
        if indices.len() != buf.dims.len() {
            return Err(IrError::IndexArity {
                name: buf.name.clone(),
                expected: buf.dims.len(),
                found: indices.len(),
            });
        }
        let dims = buf.dims.clone();
        for &index in indices {
            self.scalar_int(index)?;
        }
        if indices.is_empty() {
            return Ok(self.int_imm(0));
        }

        // Strides from the innermost dimension outwards.
        let mut strides = vec![self.int_imm(1); dims.len()];
        let mut constant = Some(1i32);
        for k in (0..dims.len() - 1).rev() {
            let dim = dims[k + 1];
            constant = constant
                .zip(self.as_int(dim))
                .and_then(|(s, d)| s.checked_mul(d));
            strides[k] = match constant {
                Some(value) => self.int_imm(value),
                None if self.as_int(strides[k + 1]) == Some(1) => dim,
                None => self.binary(BinaryOp::Mul, dim, strides[k + 1])?,
            };
        }

        let mut flat = self.binary(BinaryOp::Mul, indices[0], strides[0])?;
        for k in 1..indices.len() {
            let term = self.binary(BinaryOp::Mul, indices[k], strides[k])?;
            flat = self.binary(BinaryOp::Add, flat, term)?;
        }
        Ok(flat)
    }

    /// Validates and builds a `Store` into `buffer`.
    pub fn store(
        &mut self,
        buffer: Handle<Buffer>,
        index: Handle<Expression>,
        value: Handle<Expression>,
        mask: Handle<Expression>,
    ) -> Result<Statement, IrError> {
        let buf = &self.buffers[buffer];
        let (base, element) = (buf.data, buf.dtype);
        let lanes = self.check_access(base, index, mask)?;
        let found = self.dtype(value);
        let expected = element.with_lanes(lanes)?;
        if found != expected {
            return Err(IrError::DtypeMismatch { expected, found });
        }
        Ok(Statement::Store {
            base,
            index,
            value,
            mask,
        })
    }

    /// Builds a node of the same kind as `old` over new children.
    pub(crate) fn rebuild(
        &mut self,
        old: Handle<Expression>,
        expr: Expression,
    ) -> Result<Handle<Expression>, IrError> {
        match expr {
            Expression::IntImm(value) => Ok(self.int_imm(value)),
            Expression::FloatImm(value) => Ok(self.float_imm(value)),
            Expression::Var(var) => Ok(self.var_expr(var)),
            Expression::Binary { op, lhs, rhs } => self.binary(op, lhs, rhs),
            Expression::Max {
                lhs,
                rhs,
                propagate_nans,
            } => self.max(lhs, rhs, propagate_nans),
            Expression::Min {
                lhs,
                rhs,
                propagate_nans,
            } => self.min(lhs, rhs, propagate_nans),
            Expression::CompareSelect { op, lhs, rhs } => self.compare_select(op, lhs, rhs),
            Expression::Cast { dtype, value } => self.cast(dtype, value),
            Expression::Let { var, value, body } => self.let_in(var, value, body),
            Expression::Ramp {
                base,
                stride,
                lanes,
            } => self.ramp(base, stride, lanes),
            Expression::Broadcast { value, lanes } => self.broadcast(value, lanes),
            Expression::Load { base, index, mask } => {
                let element = self.dtype(old).kind();
                self.load_from(base, element, index, mask)
            }
            Expression::Intrinsic { op, args } => self.intrinsic(op, &args),
            Expression::Call { function, args } => self.call(function, &args),
        }
    }
}

impl Index<Handle<Expression>> for Ir {
    type Output = Expression;

    fn index(&self, handle: Handle<Expression>) -> &Expression {
        &self.expressions[handle]
    }
}

impl Index<Handle<Variable>> for Ir {
    type Output = Variable;

    fn index(&self, handle: Handle<Variable>) -> &Variable {
        &self.variables[handle]
    }
}

impl Index<Handle<Buffer>> for Ir {
    type Output = Buffer;

    fn index(&self, handle: Handle<Buffer>) -> &Buffer {
        &self.buffers[handle]
    }
}

impl Index<Handle<Function>> for Ir {
    type Output = Function;

    fn index(&self, handle: Handle<Function>) -> &Function {
        &self.functions[handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_operands_promote_int_side() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let xe = ir.var_expr(x);
        let half = ir.float_imm(0.5);
        let sum = ir.binary(BinaryOp::Add, xe, half).unwrap();
        assert_eq!(ir.dtype(sum), Dtype::FLOAT32);
        let Expression::Binary { lhs, .. } = ir[sum] else {
            panic!("expected binary");
        };
        assert!(matches!(ir[lhs], Expression::Cast { .. }));
    }

    #[test]
    fn compare_select_yields_int() {
        let mut ir = Ir::new();
        let a = ir.float_imm(1.0);
        let b = ir.float_imm(2.0);
        let cmp = ir.compare_select(CompareOp::Lt, a, b).unwrap();
        assert_eq!(ir.dtype(cmp), Dtype::INT32);
    }

    #[test]
    fn intrinsic_arity_is_checked() {
        let mut ir = Ir::new();
        let a = ir.float_imm(1.0);
        let err = ir.intrinsic(IntrinsicOp::Pow, &[a]).unwrap_err();
        assert!(matches!(
            err,
            IrError::IntrinsicArity {
                name: "pow",
                expected: 2,
                found: 1
            }
        ));
        assert!(ir.intrinsic(IntrinsicOp::Rand, &[a]).is_err());
        assert!(ir.intrinsic(IntrinsicOp::Rand, &[]).is_ok());
    }

    #[test]
    fn load_requires_int_index_and_matching_mask() {
        let mut ir = Ir::new();
        let n = ir.int_imm(8);
        let buf = ir.new_buffer("a", Dtype::FLOAT32, vec![n]).unwrap();
        let fidx = ir.float_imm(0.0);
        let one = ir.int_imm(1);
        assert!(matches!(
            ir.load(buf, fidx, one),
            Err(IrError::DtypeMismatch { .. })
        ));

        let zero = ir.int_imm(0);
        let stride = ir.int_imm(1);
        let ramp = ir.ramp(zero, stride, 4).unwrap();
        assert!(matches!(
            ir.load(buf, ramp, one),
            Err(IrError::LaneMismatch { lhs: 4, rhs: 1 })
        ));
        let mask = ir.broadcast(one, 4).unwrap();
        let vec = ir.load(buf, ramp, mask).unwrap();
        assert_eq!(ir.dtype(vec).lanes(), 4);
        assert!(ir.is_true_mask(mask));
    }

    #[test]
    fn load_through_non_handle_fails() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let zero = ir.int_imm(0);
        let one = ir.int_imm(1);
        assert!(matches!(
            ir.load_from(x, ScalarKind::Float32, zero, one),
            Err(IrError::NotABuffer(name)) if name == "x"
        ));
    }

    #[test]
    fn flat_index_folds_constant_strides() {
        let mut ir = Ir::new();
        let dims = vec![ir.int_imm(4), ir.int_imm(5), ir.int_imm(6)];
        let buf = ir.new_buffer("b", Dtype::INT32, dims).unwrap();
        let i = ir.new_var("i", Dtype::INT32);
        let j = ir.new_var("j", Dtype::INT32);
        let k = ir.new_var("k", Dtype::INT32);
        let idx = [ir.var_expr(i), ir.var_expr(j), ir.var_expr(k)];
        let flat = ir.flat_index(buf, &idx).unwrap();
        assert_eq!(
            crate::format_expr(&ir, flat),
            "(((i * 30) + (j * 6)) + (k * 1))"
        );
    }

    #[test]
    fn store_checks_element_kind() {
        let mut ir = Ir::new();
        let n = ir.int_imm(2);
        let buf = ir.new_buffer("out", Dtype::INT32, vec![n]).unwrap();
        let zero = ir.int_imm(0);
        let one = ir.int_imm(1);
        let value = ir.float_imm(3.0);
        assert!(ir.store(buf, zero, value, one).is_err());
        assert!(ir.store(buf, zero, one, one).is_ok());
    }

    #[test]
    fn call_checks_index_count() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let n = ir.int_imm(3);
        let body = ir.var_expr(x);
        let f = ir.new_function("f", vec![x], vec![n], body).unwrap();
        let zero = ir.int_imm(0);
        assert!(ir.call(f, &[zero]).is_ok());
        assert!(matches!(
            ir.call(f, &[zero, zero]),
            Err(IrError::IndexArity { expected: 1, found: 2, .. })
        ));
    }
}
