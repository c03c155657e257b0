//! Lowering of scheduled loop trees into one statement.

use std::cell::RefCell;
use std::collections::HashMap;

use texc_ir::visit::{Rewriter, substitute};
use texc_ir::{BinaryOp, Expression, Function, Handle, Ir, IrError, Statement};

use crate::nest::{ComputeNode, LoopNode};

/// Resolves `Call` nodes: inlined callees are substituted, materialized
/// ones become loads from their buffers.
pub(crate) struct CallExpander<'a> {
    inlined: &'a [Handle<Function>],
    expanded: RefCell<HashMap<Handle<Expression>, Handle<Expression>>>,
}

impl<'a> CallExpander<'a> {
    pub fn new(inlined: &'a [Handle<Function>]) -> Self {
        Self {
            inlined,
            expanded: RefCell::default(),
        }
    }

    /// `expr` with every call resolved.
    pub fn expand(
        &self,
        ir: &mut Ir,
        expr: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        if let Some(&done) = self.expanded.borrow().get(&expr) {
            return Ok(done);
        }
        let mut rewriter = Rewriter::new(|ir, e| {
            let Expression::Call { function, ref args } = ir[e] else {
                return Ok(None);
            };
            let args = args.clone();
            let mut resolved = Vec::with_capacity(args.len());
            for arg in args {
                resolved.push(self.expand(ir, arg)?);
            }
            self.resolve(ir, function, &resolved).map(Some)
        });
        let result = rewriter.expr(ir, expr)?;
        self.expanded.borrow_mut().insert(expr, result);
        Ok(result)
    }

    fn resolve(
        &self,
        ir: &mut Ir,
        function: Handle<Function>,
        args: &[Handle<Expression>],
    ) -> Result<Handle<Expression>, IrError> {
        let func = ir[function].clone();
        if self.inlined.contains(&function) {
            let body = self.expand(ir, func.body)?;
            let bindings: Vec<_> = func.args.iter().copied().zip(args.iter().copied()).collect();
            substitute(ir, body, &bindings)
        } else {
            let index = ir.flat_index(func.buffer, args)?;
            let one = ir.int_imm(1);
            ir.load(func.buffer, index, one)
        }
    }
}

/// Lowers sibling loop nodes to statements.
pub(crate) fn lower_nodes(
    ir: &mut Ir,
    nodes: &[LoopNode],
    calls: &CallExpander<'_>,
) -> Result<Vec<Statement>, IrError> {
    let mut stmts = Vec::with_capacity(nodes.len());
    for node in nodes {
        stmts.push(match node {
            LoopNode::For(axis) => {
                let mut body = lower_nodes(ir, &axis.body, calls)?;
                let body = if body.len() == 1 {
                    body.remove(0)
                } else {
                    Statement::Block(body)
                };
                Statement::For {
                    var: axis.var,
                    start: axis.start,
                    stop: axis.stop,
                    body: Box::new(body),
                    options: axis.options,
                }
            }
            LoopNode::Compute(compute) => lower_compute(ir, compute, calls)?,
        });
    }
    Ok(stmts)
}

fn lower_compute(
    ir: &mut Ir,
    compute: &ComputeNode,
    calls: &CallExpander<'_>,
) -> Result<Statement, IrError> {
    let func = ir[compute.function].clone();
    let body = calls.expand(ir, func.body)?;
    let bindings: Vec<_> = func
        .args
        .iter()
        .copied()
        .zip(compute.indices.iter().copied())
        .collect();
    let mut value = substitute(ir, body, &bindings)?;
    let index = ir.flat_index(func.buffer, &compute.indices)?;

    let mask = match compute.masks.split_first() {
        None => ir.int_imm(1),
        Some((&first, rest)) => {
            let mut mask = first;
            for &m in rest {
                mask = ir.binary(BinaryOp::Mul, mask, m)?;
            }
            value = guard_loads(ir, value, mask)?;
            mask
        }
    };
    ir.store(func.buffer, index, value, mask)
}

/// Adds `guard` to the mask of every load reachable from `expr`.
pub(crate) fn guard_loads(
    ir: &mut Ir,
    expr: Handle<Expression>,
    guard: Handle<Expression>,
) -> Result<Handle<Expression>, IrError> {
    let mut rewriter = Rewriter::new(|ir, e| {
        let Expression::Load { base, index, mask } = ir[e] else {
            return Ok(None);
        };
        let element = ir.dtype(e).kind();
        let index = guard_loads(ir, index, guard)?;
        let lanes = ir.dtype(index).lanes();
        let lane_guard = if lanes > 1 {
            ir.broadcast(guard, lanes)?
        } else {
            guard
        };
        let mask = if ir.is_true_mask(mask) {
            lane_guard
        } else {
            ir.binary(BinaryOp::Mul, mask, lane_guard)?
        };
        ir.load_from(base, element, index, mask).map(Some)
    });
    rewriter.expr(ir, expr)
}
