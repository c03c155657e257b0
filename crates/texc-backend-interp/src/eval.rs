//! Recursive evaluation of expressions and statements.

use std::collections::HashMap;

use smallvec::smallvec;
use texc_backend_core::{CodegenError, HostBuffer, Scalar};
use texc_ir::{
    BinaryOp, Dtype, Expression, Handle, IntrinsicOp, Ir, ScalarKind, Statement, Variable,
};

use crate::value::{Lanes, Value};

/// Storage bound to a handle variable.
enum Slot<'a> {
    Arg(HostBuffer<'a>),
    Scratch(Value),
}

/// Variable and buffer bindings of one call.
pub(crate) struct Frame<'ir, 'a> {
    ir: &'ir Ir,
    vars: HashMap<Handle<Variable>, Value>,
    buffers: HashMap<Handle<Variable>, Slot<'a>>,
}

impl<'ir, 'a> Frame<'ir, 'a> {
    pub fn new(ir: &'ir Ir) -> Self {
        Self {
            ir,
            vars: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    pub fn bind_scalar(&mut self, var: Handle<Variable>, value: Scalar) {
        self.vars.insert(var, value.into());
    }

    pub fn bind_buffer(&mut self, var: Handle<Variable>, buffer: HostBuffer<'a>) {
        self.buffers.insert(var, Slot::Arg(buffer));
    }

    fn name(&self, var: Handle<Variable>) -> String {
        self.ir[var].name.clone()
    }

    fn read(&self, base: Handle<Variable>, index: i32) -> Result<Scalar, CodegenError> {
        let slot = self
            .buffers
            .get(&base)
            .ok_or_else(|| CodegenError::Unbound(self.name(base)))?;
        let out_of_bounds = |len| CodegenError::OutOfBounds {
            buffer: self.name(base),
            index: index.into(),
            len,
        };
        let Ok(i) = usize::try_from(index) else {
            return Err(out_of_bounds(slot_len(slot)));
        };
        match slot {
            Slot::Arg(host) => host.load(i).ok_or_else(|| out_of_bounds(host.len())),
            Slot::Scratch(data) if i < data.lanes() => Ok(data.lane(i)),
            Slot::Scratch(data) => Err(out_of_bounds(data.lanes())),
        }
    }

    fn write(
        &mut self,
        base: Handle<Variable>,
        index: i32,
        value: Scalar,
    ) -> Result<(), CodegenError> {
        let name = self.name(base);
        let slot = self
            .buffers
            .get_mut(&base)
            .ok_or_else(|| CodegenError::Unbound(name.clone()))?;
        let len = slot_len(slot);
        let i = match usize::try_from(index) {
            Ok(i) if i < len => i,
            _ => {
                return Err(CodegenError::OutOfBounds {
                    buffer: name,
                    index: index.into(),
                    len,
                });
            }
        };
        match slot {
            Slot::Arg(host) if !host.is_writable() => Err(CodegenError::ReadOnly(name)),
            Slot::Arg(host) => {
                if host.store(i, value) {
                    Ok(())
                } else {
                    Err(CodegenError::Internal(format!(
                        "cannot store {value:?} into `{name}`"
                    )))
                }
            }
            Slot::Scratch(data) => {
                data.set_lane(i, value);
                Ok(())
            }
        }
    }

    pub fn stmt(&mut self, stmt: &Statement) -> Result<(), CodegenError> {
        match *stmt {
            Statement::Store {
                base,
                index,
                value,
                mask,
            } => {
                // Index and value are only evaluated when some lane is live.
                let mask = self.expr(mask)?;
                let mask = mask.ints()?;
                if mask.iter().all(|&m| m == 0) {
                    return Ok(());
                }
                let index = self.expr(index)?;
                let value = self.expr(value)?;
                let indices = index.ints()?;
                for (lane, &i) in indices.iter().enumerate() {
                    if lane_enabled(mask, lane) {
                        self.write(base, i, value.lane(lane))?;
                    }
                }
            }
            Statement::For {
                var,
                start,
                stop,
                ref body,
                ..
            } => {
                let start = self.expr(start)?.scalar_int()?;
                let stop = self.expr(stop)?.scalar_int()?;
                let saved = self.vars.remove(&var);
                for i in start..stop {
                    self.vars.insert(var, Value::int(i));
                    self.stmt(body)?;
                }
                self.restore(var, saved);
            }
            Statement::Block(ref stmts) => {
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
            }
            Statement::Allocate {
                buffer,
                dtype,
                ref dims,
            } => {
                let mut len = 1usize;
                for &dim in dims {
                    let extent = self.expr(dim)?.scalar_int()?;
                    let extent = usize::try_from(extent).map_err(|_| {
                        CodegenError::Internal(format!(
                            "negative extent {extent} for `{}`",
                            self.name(buffer)
                        ))
                    })?;
                    len = len.saturating_mul(extent);
                }
                let data = match dtype.kind() {
                    ScalarKind::Int32 => Value::Int(smallvec![0; len]),
                    ScalarKind::Float32 => Value::Float(smallvec![0.0; len]),
                    kind => {
                        return Err(CodegenError::Internal(format!(
                            "cannot allocate elements of kind {kind}"
                        )));
                    }
                };
                self.buffers.insert(buffer, Slot::Scratch(data));
            }
            Statement::Free { buffer } => {
                if self.buffers.remove(&buffer).is_none() {
                    return Err(CodegenError::Internal(format!(
                        "free of unallocated buffer `{}`",
                        self.name(buffer)
                    )));
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, var: Handle<Variable>, saved: Option<Value>) {
        match saved {
            Some(value) => self.vars.insert(var, value),
            None => self.vars.remove(&var),
        };
    }

    pub fn expr(&mut self, expr: Handle<Expression>) -> Result<Value, CodegenError> {
        let ir = self.ir;
        let dtype = ir.dtype(expr);
        match ir[expr] {
            Expression::IntImm(value) => Ok(Value::int(value)),
            Expression::FloatImm(value) => Ok(Value::float(value)),
            Expression::Var(var) => {
                if ir[var].dtype == Dtype::HANDLE {
                    return Err(CodegenError::Internal(format!(
                        "buffer `{}` used as a value",
                        ir[var].name
                    )));
                }
                self.vars
                    .get(&var)
                    .cloned()
                    .ok_or_else(|| CodegenError::Unbound(self.name(var)))
            }
            Expression::Binary { op, lhs, rhs } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                binary(op, &a, &b)
            }
            Expression::Max {
                lhs,
                rhs,
                propagate_nans,
            } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => Ok(Value::Int(zip(x, y, |a, b| a.max(b)))),
                    _ => Ok(Value::Float(zip(a.floats()?, b.floats()?, |a, b| {
                        maximum(a, b, propagate_nans)
                    }))),
                }
            }
            Expression::Min {
                lhs,
                rhs,
                propagate_nans,
            } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => Ok(Value::Int(zip(x, y, |a, b| a.min(b)))),
                    _ => Ok(Value::Float(zip(a.floats()?, b.floats()?, |a, b| {
                        minimum(a, b, propagate_nans)
                    }))),
                }
            }
            Expression::CompareSelect { op, lhs, rhs } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                let out = match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => zip(x, y, |a, b| op.holds(a, b) as i32),
                    _ => zip(a.floats()?, b.floats()?, |a, b| op.holds(a, b) as i32),
                };
                Ok(Value::Int(out))
            }
            Expression::Cast { dtype, value } => {
                let value = self.expr(value)?;
                Ok(match (value, dtype.kind()) {
                    (Value::Int(v), ScalarKind::Float32) => {
                        Value::Float(v.iter().map(|&x| x as f32).collect())
                    }
                    (Value::Float(v), ScalarKind::Int32) => {
                        Value::Int(v.iter().map(|&x| x as i32).collect())
                    }
                    (value, _) => value,
                })
            }
            Expression::Let { var, value, body } => {
                let value = self.expr(value)?;
                let saved = self.vars.insert(var, value);
                let result = self.expr(body);
                self.restore(var, saved);
                result
            }
            Expression::Ramp {
                base,
                stride,
                lanes,
            } => {
                let base = self.expr(base)?;
                let stride = self.expr(stride)?;
                Ok(match (base, stride) {
                    (Value::Int(b), Value::Int(s)) => Value::Int(
                        (0..lanes as i32)
                            .map(|l| b[0].wrapping_add(l.wrapping_mul(s[0])))
                            .collect(),
                    ),
                    (b, s) => {
                        let (b, s) = (b.floats()?[0], s.floats()?[0]);
                        Value::Float((0..lanes).map(|l| b + l as f32 * s).collect())
                    }
                })
            }
            Expression::Broadcast { value, lanes } => {
                let value = self.expr(value)?.into_scalar()?;
                Ok(match value {
                    Scalar::Int(v) => Value::Int(smallvec![v; lanes as usize]),
                    Scalar::Float(v) => Value::Float(smallvec![v; lanes as usize]),
                })
            }
            Expression::Load { base, index, mask } => {
                let mask = self.expr(mask)?;
                let mask = mask.ints()?;
                let zero = match dtype.kind() {
                    ScalarKind::Int32 => Scalar::Int(0),
                    _ => Scalar::Float(0.0),
                };
                let lanes = dtype.lanes() as usize;
                if mask.iter().all(|&m| m == 0) {
                    return Ok(Value::zeros_like(zero, lanes));
                }
                let index = self.expr(index)?;
                let indices = index.ints()?;
                let mut out = Value::zeros_like(zero, indices.len());
                for (lane, &i) in indices.iter().enumerate() {
                    if lane_enabled(mask, lane) {
                        out.set_lane(lane, self.read(base, i)?);
                    }
                }
                Ok(out)
            }
            Expression::Intrinsic { op, ref args } => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.expr(arg)?);
                }
                let lanes = dtype.lanes() as usize;
                let mut out = Lanes::with_capacity(lanes);
                let mut operands = [0.0f32; 2];
                for lane in 0..lanes {
                    for (slot, value) in operands.iter_mut().zip(&values) {
                        let floats = value.floats()?;
                        *slot = floats[if floats.len() == 1 { 0 } else { lane }];
                    }
                    out.push(intrinsic(op, operands[0], operands[1]));
                }
                Ok(Value::Float(out))
            }
            Expression::Call { function, .. } => Err(CodegenError::Internal(format!(
                "call to `{}` survived lowering",
                ir[function].name
            ))),
        }
    }
}

fn slot_len(slot: &Slot<'_>) -> usize {
    match slot {
        Slot::Arg(host) => host.len(),
        Slot::Scratch(data) => data.lanes(),
    }
}

fn lane_enabled(mask: &[i32], lane: usize) -> bool {
    mask[if mask.len() == 1 { 0 } else { lane }] != 0
}

fn zip<T: Copy, U>(a: &[T], b: &[T], f: impl Fn(T, T) -> U) -> Lanes<U> {
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, CodegenError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let mut out = Lanes::with_capacity(x.len());
            for (&a, &b) in x.iter().zip(y) {
                out.push(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div if b == 0 => return Err(CodegenError::DivisionByZero),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Mod if b == 0 => return Err(CodegenError::DivisionByZero),
                    BinaryOp::Mod => a.wrapping_rem(b),
                });
            }
            Ok(Value::Int(out))
        }
        _ => Ok(Value::Float(zip(a.floats()?, b.floats()?, |a, b| match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
        }))),
    }
}

/// `maximum` when `propagate_nans`, otherwise `maxNum`.
pub(crate) fn maximum(a: f32, b: f32, propagate_nans: bool) -> f32 {
    if propagate_nans && (a.is_nan() || b.is_nan()) {
        return if a.is_nan() { a } else { b };
    }
    a.max(b)
}

/// `minimum` when `propagate_nans`, otherwise `minNum`.
pub(crate) fn minimum(a: f32, b: f32, propagate_nans: bool) -> f32 {
    if propagate_nans && (a.is_nan() || b.is_nan()) {
        return if a.is_nan() { a } else { b };
    }
    a.min(b)
}

fn intrinsic(op: IntrinsicOp, x: f32, y: f32) -> f32 {
    match op {
        IntrinsicOp::Sin => x.sin(),
        IntrinsicOp::Cos => x.cos(),
        IntrinsicOp::Tan => x.tan(),
        IntrinsicOp::Asin => x.asin(),
        IntrinsicOp::Acos => x.acos(),
        IntrinsicOp::Atan => x.atan(),
        IntrinsicOp::Sinh => x.sinh(),
        IntrinsicOp::Cosh => x.cosh(),
        IntrinsicOp::Tanh => x.tanh(),
        IntrinsicOp::Exp => x.exp(),
        IntrinsicOp::Expm1 => x.exp_m1(),
        IntrinsicOp::Log => x.ln(),
        IntrinsicOp::Log2 => x.log2(),
        IntrinsicOp::Log10 => x.log10(),
        IntrinsicOp::Log1p => x.ln_1p(),
        IntrinsicOp::Erf => libm::erff(x),
        IntrinsicOp::Erfc => libm::erfcf(x),
        IntrinsicOp::Sqrt => x.sqrt(),
        IntrinsicOp::Rsqrt => 1.0 / x.sqrt(),
        IntrinsicOp::Fabs => x.abs(),
        IntrinsicOp::Ceil => x.ceil(),
        IntrinsicOp::Floor => x.floor(),
        IntrinsicOp::Round => x.round(),
        IntrinsicOp::Trunc => x.trunc(),
        IntrinsicOp::Frac => x - x.trunc(),
        IntrinsicOp::Lgamma => libm::lgammaf(x),
        IntrinsicOp::Fmod => x % y,
        IntrinsicOp::Pow => x.powf(y),
        IntrinsicOp::Remainder => libm::remainderf(x, y),
        IntrinsicOp::Rand => rand::random::<f32>(),
    }
}
