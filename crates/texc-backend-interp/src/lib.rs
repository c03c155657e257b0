//! Tree-walking interpreter backend.
//!
//! [`SimpleIrEvaluator`] evaluates a lowered statement directly against the
//! caller's buffers. Every load and store is bounds-checked, which makes it
//! the reference the other backends are compared against.

mod eval;
mod value;

use std::sync::Arc;

use log::debug;
use texc_backend_core::{
    BackendKind, BufferArg, CallArg, CodeGen, CodegenError, DataLocation, Scalar, check_args,
};
use texc_ir::{Expression, Handle, Ir, Statement, Variable};

use eval::Frame;

/// Interprets a lowered statement.
#[derive(Debug)]
pub struct SimpleIrEvaluator {
    ir: Arc<Ir>,
    stmt: Statement,
    params: Vec<BufferArg>,
}

impl SimpleIrEvaluator {
    pub fn new(ir: Arc<Ir>, stmt: Statement, params: Vec<BufferArg>) -> Self {
        debug!("interpreter: {} parameter(s)", params.len());
        Self { ir, stmt, params }
    }

    /// The statement being interpreted.
    pub fn stmt(&self) -> &Statement {
        &self.stmt
    }
}

impl CodeGen for SimpleIrEvaluator {
    fn kind(&self) -> BackendKind {
        BackendKind::SimpleIrEval
    }

    fn buffer_args(&self) -> &[BufferArg] {
        &self.params
    }

    fn call(&self, args: &[CallArg<'_>]) -> Result<(), CodegenError> {
        check_args(&self.params, args, DataLocation::Host)?;
        let mut frame = Frame::new(&self.ir);
        for (param, arg) in self.params.iter().zip(args) {
            match *arg {
                CallArg::Host(buffer) => frame.bind_buffer(param.var, buffer),
                CallArg::Int(v) => frame.bind_scalar(param.var, Scalar::Int(v)),
                CallArg::Float(v) => frame.bind_scalar(param.var, Scalar::Float(v)),
                CallArg::Device(_) => {
                    return Err(CodegenError::Internal(
                        "device argument reached the interpreter".into(),
                    ));
                }
            }
        }
        frame.stmt(&self.stmt)
    }
}

/// Checks that every buffer argument holds at least as many elements as
/// its declared extents require, evaluated against the call's scalars.
///
/// Backends without per-access bounds checks run this before executing.
pub fn check_extents(
    ir: &Ir,
    params: &[BufferArg],
    args: &[CallArg<'_>],
) -> Result<(), CodegenError> {
    let bindings: Vec<_> = params
        .iter()
        .zip(args)
        .filter_map(|(param, arg)| Some((param.var, arg.scalar()?)))
        .collect();
    for (param, arg) in params.iter().zip(args) {
        let Some(len) = arg.element_count() else {
            continue;
        };
        let mut required = 1usize;
        for &dim in &param.dims {
            let extent = match evaluate_scalar(ir, dim, &bindings)? {
                Scalar::Int(v) => usize::try_from(v).unwrap_or(0),
                Scalar::Float(_) => {
                    return Err(CodegenError::Internal(format!(
                        "extent of `{}` is not an integer",
                        param.name
                    )));
                }
            };
            required = required.saturating_mul(extent);
        }
        if len < required {
            return Err(CodegenError::BufferTooSmall {
                name: param.name.clone(),
                required,
                len,
            });
        }
    }
    Ok(())
}

/// Evaluates a scalar expression with the given variable bindings.
///
/// Loads are not allowed since no buffers are bound.
pub fn evaluate_scalar(
    ir: &Ir,
    expr: Handle<Expression>,
    bindings: &[(Handle<Variable>, Scalar)],
) -> Result<Scalar, CodegenError> {
    let mut frame = Frame::new(ir);
    for &(var, value) in bindings {
        frame.bind_scalar(var, value);
    }
    frame.expr(expr)?.into_scalar()
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{CompareOp, Dtype, GpuAxis, KernelScope, LoopOptions};

    fn for_loop(
        k: &KernelScope,
        var: texc_ir::Var<'_>,
        stop: i32,
        body: Statement,
    ) -> Statement {
        Statement::For {
            var: var.handle(),
            start: k.int(0).handle(),
            stop: k.int(stop).handle(),
            body: Box::new(body),
            options: LoopOptions::default(),
        }
    }

    #[test]
    fn copies_and_scales() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [4]).unwrap();
        let b = k.buffer("b", Dtype::FLOAT32, [4]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let store = b
            .store_flat(i.expr(), a.load([i]) * 3.0f32, k.int(1))
            .unwrap();
        let stmt = for_loop(&k, i, 4, store);
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into(), b.into()]);

        let input = [1.0f32, 2.0, 3.0, 4.0];
        let mut output = [0.0f32; 4];
        eval.call(&[CallArg::input(&input), CallArg::buffer(&mut output)])
            .unwrap();
        assert_eq!(output, [3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [4]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let store = a.store_flat(i.expr(), i.expr(), k.int(1)).unwrap();
        let stmt = for_loop(&k, i, 5, store);
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into()]);

        let mut data = [0i32; 4];
        let err = eval.call(&[CallArg::buffer(&mut data)]).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::OutOfBounds { index: 4, len: 4, .. }
        ));
    }

    #[test]
    fn masked_lanes_are_skipped() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [4]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let guard = i.expr().compare(CompareOp::Lt, 4);
        let value = a.load_flat(i.expr(), guard).unwrap() + 10;
        let store = a.store_flat(i.expr(), value, guard).unwrap();
        let stmt = for_loop(&k, i, 8, store);
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into()]);

        let mut data = [1i32, 2, 3, 4];
        eval.call(&[CallArg::buffer(&mut data)]).unwrap();
        assert_eq!(data, [11, 12, 13, 14]);
    }

    #[test]
    fn read_only_input_rejected() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [2]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let store = a.store_flat(i.expr(), k.int(0), k.int(1)).unwrap();
        let stmt = for_loop(&k, i, 2, store);
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into()]);

        let data = [5i32, 6];
        let err = eval.call(&[CallArg::input(&data)]).unwrap_err();
        assert!(matches!(err, CodegenError::ReadOnly(name) if name == "a"));
    }

    #[test]
    fn vector_store_with_ramp() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [8]).unwrap();
        let ramp = k.ramp(2, 1, 4).unwrap();
        let value = k.broadcast(1.5f32, 4).unwrap();
        let mask = k.broadcast(1, 4).unwrap();
        let stmt = a.store_flat(ramp, value, mask).unwrap();
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into()]);

        let mut data = [0.0f32; 8];
        eval.call(&[CallArg::buffer(&mut data)]).unwrap();
        assert_eq!(data, [0.0, 0.0, 1.5, 1.5, 1.5, 1.5, 0.0, 0.0]);
    }

    #[test]
    fn scratch_buffers() {
        let k = KernelScope::new();
        let tmp = k.buffer("tmp", Dtype::INT32, [3]).unwrap();
        let out = k.buffer("out", Dtype::INT32, [3]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let fill = tmp.store_flat(i.expr(), i.expr() * 2, k.int(1)).unwrap();
        let copy = out
            .store_flat(i.expr(), tmp.load([i]) + 1, k.int(1))
            .unwrap();
        let dims = vec![k.int(3).handle()];
        let stmt = Statement::Block(vec![
            Statement::Allocate {
                buffer: tmp.data().handle(),
                dtype: Dtype::INT32,
                dims,
            },
            for_loop(&k, i, 3, fill),
            for_loop(&k, i, 3, copy),
            Statement::Free {
                buffer: tmp.data().handle(),
            },
        ]);
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![out.into()]);

        let mut data = [0i32; 3];
        eval.call(&[CallArg::buffer(&mut data)]).unwrap();
        assert_eq!(data, [1, 3, 5]);
    }

    #[test]
    fn gpu_options_do_not_change_cpu_semantics() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [3]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let store = a.store_flat(i.expr(), i.expr() + 1, k.int(1)).unwrap();
        let mut stmt = for_loop(&k, i, 3, store);
        if let Statement::For { options, .. } = &mut stmt {
            *options = LoopOptions::block(GpuAxis::X);
        }
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into()]);

        let mut data = [0i32; 3];
        eval.call(&[CallArg::buffer(&mut data)]).unwrap();
        assert_eq!(data, [1, 2, 3]);
    }

    #[test]
    fn scalar_parameters_and_division_by_zero() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [1]).unwrap();
        let d = k.var("d", Dtype::INT32);
        let stmt = a.store_flat(k.int(0), k.int(12) / d, k.int(1)).unwrap();
        let eval = SimpleIrEvaluator::new(k.freeze(), stmt, vec![a.into(), d.into()]);

        let mut data = [0i32];
        eval.call(&[CallArg::buffer(&mut data), CallArg::Int(4)])
            .unwrap();
        assert_eq!(data, [3]);
        let err = eval
            .call(&[CallArg::buffer(&mut data), CallArg::Int(0)])
            .unwrap_err();
        assert!(matches!(err, CodegenError::DivisionByZero));
    }

    #[test]
    fn evaluates_scalar_extents() {
        let k = KernelScope::new();
        let n = k.var("n", Dtype::INT32);
        let extent = (n + 7) / 8;
        let ir = k.ir();
        let value = evaluate_scalar(&ir, extent.handle(), &[(n.handle(), Scalar::Int(17))]);
        assert_eq!(value.unwrap(), Scalar::Int(3));
        let unbound = evaluate_scalar(&ir, extent.handle(), &[]);
        assert!(matches!(unbound, Err(CodegenError::Unbound(name)) if name == "n"));
    }

    #[test]
    fn extents_checked_against_scalars() {
        let k = KernelScope::new();
        let n = k.var("n", Dtype::INT32);
        let a = k.buffer("a", Dtype::FLOAT32, [n.expr(), k.int(2)]).unwrap();
        let params = vec![BufferArg::from(a), BufferArg::from(n)];
        let ir = k.ir();
        let data = [0.0f32; 6];
        assert!(check_extents(&ir, &params, &[CallArg::input(&data), CallArg::Int(3)]).is_ok());
        let err = check_extents(&ir, &params, &[CallArg::input(&data), CallArg::Int(4)]).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::BufferTooSmall { required: 8, len: 6, .. }
        ));
    }
}
