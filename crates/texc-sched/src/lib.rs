//! Loop scheduling and lowering for tensor expressions.
//!
//! A [`Schedule`] collects every function reachable from a set of output
//! tensors and gives each one a loop nest. Transformations ([`split_with_tail`],
//! [`split_with_mask`], [`compute_inline`], [`gpu_exec_config`]) rewrite
//! those nests; [`lower`] turns the result into a single [`Statement`].
//!
//! [`split_with_tail`]: Schedule::split_with_tail
//! [`split_with_mask`]: Schedule::split_with_mask
//! [`compute_inline`]: Schedule::compute_inline
//! [`gpu_exec_config`]: Schedule::gpu_exec_config
//! [`lower`]: Schedule::lower

mod error;
mod lower;
mod nest;

pub use error::ScheduleError;

use std::collections::HashMap;

use texc_ir::visit::walk_expr;
use texc_ir::{
    BinaryOp, CompareOp, Dtype, Expr, Expression, Function, GpuAxis, Handle, Ir, KernelScope,
    Statement, Tensor, Var, Variable,
};

use crate::lower::{CallExpander, lower_nodes};
use crate::nest::{
    FunctionNest, LoopAxis, LoopNode, add_mask, freshen_loop_vars, substitute_nodes,
};

/// Loops produced by [`Schedule::split_with_tail`].
#[derive(Clone, Copy, Debug)]
pub struct SplitWithTail<'k> {
    pub outer: Var<'k>,
    pub inner: Var<'k>,
    /// The residual loop variable, `None` when the factor divides a
    /// constant extent.
    pub tail: Option<Var<'k>>,
    pub tail_op: Option<TailLoop<'k>>,
}

/// The residual loop of a tail split: iterations
/// `offset .. offset + extent` of the original range.
#[derive(Clone, Copy, Debug)]
pub struct TailLoop<'k> {
    pub var: Var<'k>,
    pub offset: Expr<'k>,
    pub extent: Expr<'k>,
}

/// Loops produced by [`Schedule::split_with_mask`].
#[derive(Clone, Copy, Debug)]
pub struct SplitWithMask<'k> {
    pub outer: Var<'k>,
    pub inner: Var<'k>,
}

/// Scheduling state for the functions needed by a set of outputs.
#[derive(Debug)]
pub struct Schedule<'k> {
    scope: &'k KernelScope,
    outputs: Vec<Handle<Function>>,
    /// Producers before consumers.
    nests: Vec<FunctionNest>,
    inlined: Vec<Handle<Function>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl<'k> Schedule<'k> {
    /// Collects the functions reachable from `outputs`, producers first.
    pub fn new(scope: &'k KernelScope, outputs: &[Tensor<'k>]) -> Result<Self, ScheduleError> {
        for t in outputs {
            if !std::ptr::eq(t.scope(), scope) {
                return Err(ScheduleError::ForeignTensor(t.name()));
            }
        }
        let roots: Vec<_> = outputs.iter().map(|t| t.function()).collect();
        let order = {
            let ir = scope.ir();
            let mut marks = HashMap::new();
            let mut order = Vec::new();
            for &root in &roots {
                visit(&ir, root, &mut marks, &mut order)?;
            }
            order
        };
        let mut ir = scope.ir_mut();
        let nests = order
            .into_iter()
            .map(|f| FunctionNest::new(&mut ir, f))
            .collect();
        Ok(Self {
            scope,
            outputs: roots,
            nests,
            inlined: Vec::new(),
        })
    }

    pub fn scope(&self) -> &'k KernelScope {
        self.scope
    }

    /// The output tensors, in the order given.
    pub fn outputs(&self) -> Vec<Tensor<'k>> {
        self.outputs.iter().map(|&f| self.scope.tensor(f)).collect()
    }

    /// Every scheduled tensor, producers first.
    pub fn tensors(&self) -> Vec<Tensor<'k>> {
        self.nests
            .iter()
            .map(|n| self.scope.tensor(n.function))
            .collect()
    }

    /// Whether `tensor` has been marked for inlining.
    pub fn is_inlined(&self, tensor: Tensor<'k>) -> bool {
        std::ptr::eq(tensor.scope(), self.scope) && self.inlined.contains(&tensor.function())
    }

    /// The loop variables of `tensor`'s current nest, outermost first.
    pub fn loop_vars(&self, tensor: Tensor<'k>) -> Result<Vec<Var<'k>>, ScheduleError> {
        self.check_scope(tensor)?;
        let nest = self
            .nests
            .iter()
            .find(|n| n.function == tensor.function())
            .ok_or_else(|| ScheduleError::UnknownTensor(tensor.name()))?;
        Ok(nest
            .loop_vars()
            .into_iter()
            .map(|v| self.scope.var_ref(v))
            .collect())
    }

    fn check_scope(&self, tensor: Tensor<'k>) -> Result<(), ScheduleError> {
        if std::ptr::eq(tensor.scope(), self.scope) {
            Ok(())
        } else {
            Err(ScheduleError::ForeignTensor(tensor.name()))
        }
    }

    fn locate(&self, var: Var<'k>) -> Result<(usize, Vec<usize>), ScheduleError> {
        if !std::ptr::eq(var.scope(), self.scope) {
            return Err(ScheduleError::UnknownAxis(var.name()));
        }
        self.nests
            .iter()
            .enumerate()
            .find_map(|(i, nest)| nest.find(var.handle()).map(|path| (i, path)))
            .ok_or_else(|| ScheduleError::UnknownAxis(var.name()))
    }

    /// Removes the loop over `var` from its nest, returning it together
    /// with where it was.
    fn take_axis(
        &mut self,
        var: Var<'k>,
        factor: i32,
    ) -> Result<(usize, Vec<usize>, LoopAxis), ScheduleError> {
        if factor < 1 {
            return Err(ScheduleError::InvalidFactor(factor));
        }
        let (nest, path) = self.locate(var)?;
        let unknown = || ScheduleError::UnknownAxis(var.name());
        let &slot = path.last().ok_or_else(unknown)?;
        let siblings = self.nests[nest].container_mut(&path).ok_or_else(unknown)?;
        match siblings.remove(slot) {
            LoopNode::For(axis) => Ok((nest, path, axis)),
            LoopNode::Compute(_) => Err(unknown()),
        }
    }

    fn put_back(&mut self, nest: usize, path: &[usize], nodes: Vec<LoopNode>) {
        let slot = path.last().copied().unwrap_or(0);
        if let Some(siblings) = self.nests[nest].container_mut(path) {
            siblings.splice(slot..slot, nodes);
        }
    }

    /// Splits the loop over `var` into `outer × factor` iterations plus a
    /// residual loop covering the last `extent mod factor` iterations.
    ///
    /// With `inner_first` the outer loop encloses the inner one; otherwise
    /// the two are interchanged. The tail loop is inserted right after the
    /// main nest in the enclosing block. Loops nested inside the tail get
    /// fresh variables named `<var>.tail`, so they can be scheduled on their
    /// own.
    pub fn split_with_tail(
        &mut self,
        var: Var<'k>,
        factor: i32,
        inner_first: bool,
    ) -> Result<SplitWithTail<'k>, ScheduleError> {
        let (nest, path, axis) = self.take_axis(var, factor)?;
        let mut ir = self.scope.ir_mut();
        let name = ir[axis.var].name.clone();
        let extent = extent(&mut ir, axis.start, axis.stop)?;
        let f = ir.int_imm(factor);
        let (outer_extent, tail_extent) = match ir.as_int(extent) {
            Some(n) => {
                let outer = ir.int_imm(n / factor);
                let tail = (n % factor != 0).then_some(n % factor);
                (outer, tail.map(|t| ir.int_imm(t)))
            }
            None => (
                ir.binary(BinaryOp::Div, extent, f)?,
                Some(ir.binary(BinaryOp::Mod, extent, f)?),
            ),
        };

        let outer = ir.new_var(format!("{name}.outer"), Dtype::INT32);
        let inner = ir.new_var(format!("{name}.inner"), Dtype::INT32);
        let index = blocked_index(&mut ir, outer, inner, f, axis.start)?;
        let mut body = axis.body.clone();
        substitute_nodes(&mut ir, &mut body, axis.var, index)?;
        let zero = ir.int_imm(0);
        let mut nodes = vec![split_pair(
            (outer, outer_extent),
            (inner, f),
            zero,
            body,
            inner_first,
            &axis,
        )];

        let mut tail = None;
        if let Some(tail_extent) = tail_extent {
            let tail_var = ir.new_var(format!("{name}.tail"), Dtype::INT32);
            let offset = ir.binary(BinaryOp::Mul, outer_extent, f)?;
            let tv = ir.var_expr(tail_var);
            let mut index = ir.binary(BinaryOp::Add, tv, offset)?;
            if ir.as_int(axis.start) != Some(0) {
                index = ir.binary(BinaryOp::Add, index, axis.start)?;
            }
            let mut body = axis.body;
            substitute_nodes(&mut ir, &mut body, axis.var, index)?;
            freshen_loop_vars(&mut ir, &mut body, ".tail")?;
            nodes.push(LoopNode::For(LoopAxis {
                var: tail_var,
                start: zero,
                stop: tail_extent,
                options: Default::default(),
                body,
            }));
            tail = Some((tail_var, offset, tail_extent));
        }
        drop(ir);
        self.put_back(nest, &path, nodes);

        log::debug!(
            "split `{name}` by {factor} with {}",
            if tail.is_some() { "tail" } else { "no tail" }
        );
        let scope = self.scope;
        Ok(SplitWithTail {
            outer: scope.var_ref(outer),
            inner: scope.var_ref(inner),
            tail: tail.map(|(v, _, _)| scope.var_ref(v)),
            tail_op: tail.map(|(v, offset, extent)| TailLoop {
                var: scope.var_ref(v),
                offset: scope.expr(offset),
                extent: scope.expr(extent),
            }),
        })
    }

    /// Splits the loop over `var` into `ceil(extent / factor) × factor`
    /// iterations; out-of-range iterations are masked off at every load
    /// and store below the loop.
    pub fn split_with_mask(
        &mut self,
        var: Var<'k>,
        factor: i32,
        inner_first: bool,
    ) -> Result<SplitWithMask<'k>, ScheduleError> {
        let (nest, path, axis) = self.take_axis(var, factor)?;
        let mut ir = self.scope.ir_mut();
        let name = ir[axis.var].name.clone();
        let extent = extent(&mut ir, axis.start, axis.stop)?;
        let f = ir.int_imm(factor);
        let (outer_extent, divisible) = match ir.as_int(extent) {
            Some(n) => (ir.int_imm((n + factor - 1) / factor), n % factor == 0),
            None => {
                let bias = ir.int_imm(factor - 1);
                let rounded = ir.binary(BinaryOp::Add, extent, bias)?;
                (ir.binary(BinaryOp::Div, rounded, f)?, false)
            }
        };

        let outer = ir.new_var(format!("{name}.outer"), Dtype::INT32);
        let inner = ir.new_var(format!("{name}.inner"), Dtype::INT32);
        let index = blocked_index(&mut ir, outer, inner, f, axis.start)?;
        let mut body = axis.body.clone();
        substitute_nodes(&mut ir, &mut body, axis.var, index)?;
        if !divisible {
            let in_range = ir.compare_select(CompareOp::Lt, index, axis.stop)?;
            add_mask(&mut body, in_range);
        }
        let zero = ir.int_imm(0);
        let node = split_pair(
            (outer, outer_extent),
            (inner, f),
            zero,
            body,
            inner_first,
            &axis,
        );
        drop(ir);
        self.put_back(nest, &path, vec![node]);

        log::debug!("split `{name}` by {factor} with mask (divisible: {divisible})");
        Ok(SplitWithMask {
            outer: self.scope.var_ref(outer),
            inner: self.scope.var_ref(inner),
        })
    }

    /// Marks an intermediate tensor for substitution at its call sites.
    /// Calling it again for the same tensor has no further effect.
    pub fn compute_inline(&mut self, tensor: Tensor<'k>) -> Result<(), ScheduleError> {
        self.check_scope(tensor)?;
        let function = tensor.function();
        let Some(nest) = self.nests.iter().find(|n| n.function == function) else {
            return Err(ScheduleError::UnknownTensor(tensor.name()));
        };
        if self.outputs.contains(&function) {
            return Err(ScheduleError::InlineOutput(tensor.name()));
        }
        if self.inlined.contains(&function) {
            return Ok(());
        }
        if nest.is_transformed(&self.scope.ir()) {
            log::warn!(
                "inlining `{}` discards its loop transformations",
                tensor.name()
            );
        }
        self.inlined.push(function);
        Ok(())
    }

    /// Binds loops to GPU block and thread indices (`x`, `y`, `z` in
    /// order). CPU semantics are unchanged.
    pub fn gpu_exec_config(
        &mut self,
        block_vars: &[Var<'k>],
        thread_vars: &[Var<'k>],
    ) -> Result<(), ScheduleError> {
        for (kind, vars) in [("block", block_vars), ("thread", thread_vars)] {
            if vars.len() > GpuAxis::ALL.len() {
                return Err(ScheduleError::TooManyGpuAxes {
                    kind,
                    found: vars.len(),
                });
            }
        }
        let bindings = block_vars
            .iter()
            .zip(GpuAxis::ALL)
            .map(|(&v, axis)| (v, true, axis))
            .chain(
                thread_vars
                    .iter()
                    .zip(GpuAxis::ALL)
                    .map(|(&v, axis)| (v, false, axis)),
            );
        for (var, is_block, gpu_axis) in bindings {
            let (nest, path) = self.locate(var)?;
            let axis = self.nests[nest]
                .axis_mut(&path)
                .ok_or_else(|| ScheduleError::UnknownAxis(var.name()))?;
            if is_block {
                axis.options.gpu_block_index = Some(gpu_axis);
            } else {
                axis.options.gpu_thread_index = Some(gpu_axis);
            }
        }
        Ok(())
    }

    /// Produces the statement computing every output: `Allocate`s for
    /// materialized intermediates, the loop nests in producer-first order,
    /// then the matching `Free`s in reverse.
    pub fn lower(&self) -> Result<Statement, ScheduleError> {
        let mut ir = self.scope.ir_mut();
        let calls = CallExpander::new(&self.inlined);
        let mut allocs = Vec::new();
        let mut loops = Vec::new();
        let mut frees = Vec::new();
        for nest in &self.nests {
            if self.inlined.contains(&nest.function) {
                continue;
            }
            loops.extend(lower_nodes(&mut ir, &nest.nodes, &calls)?);
            if !self.outputs.contains(&nest.function) {
                let buffer = &ir[ir[nest.function].buffer];
                allocs.push(Statement::Allocate {
                    buffer: buffer.data,
                    dtype: buffer.dtype,
                    dims: buffer.dims.clone(),
                });
                frees.push(Statement::Free {
                    buffer: buffer.data,
                });
            }
        }
        frees.reverse();
        log::debug!(
            "lowered {} function(s), {} materialized intermediate(s), {} inlined",
            self.nests.len() - self.inlined.len(),
            allocs.len(),
            self.inlined.len()
        );
        allocs.extend(loops);
        allocs.extend(frees);
        Ok(Statement::Block(allocs))
    }
}

/// Post-order DFS over `Call` edges with cycle detection.
fn visit(
    ir: &Ir,
    function: Handle<Function>,
    marks: &mut HashMap<Handle<Function>, Mark>,
    order: &mut Vec<Handle<Function>>,
) -> Result<(), ScheduleError> {
    match marks.get(&function) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => return Err(ScheduleError::Cycle(ir[function].name.clone())),
        None => {}
    }
    marks.insert(function, Mark::Visiting);
    let mut callees = Vec::new();
    walk_expr(ir, ir[function].body, &mut |e| {
        if let Expression::Call { function: callee, .. } = ir[e] {
            if !callees.contains(&callee) {
                callees.push(callee);
            }
        }
    });
    for callee in callees {
        visit(ir, callee, marks, order)?;
    }
    marks.insert(function, Mark::Done);
    order.push(function);
    Ok(())
}

/// `stop - start`, folded when both are constant.
fn extent(
    ir: &mut Ir,
    start: Handle<Expression>,
    stop: Handle<Expression>,
) -> Result<Handle<Expression>, texc_ir::IrError> {
    match (ir.as_int(start), ir.as_int(stop)) {
        (Some(0), _) => Ok(stop),
        (Some(a), Some(b)) => Ok(ir.int_imm(b - a)),
        _ => ir.binary(BinaryOp::Sub, stop, start),
    }
}

/// `((outer * factor) + inner)`, offset by a non-zero `start`.
fn blocked_index(
    ir: &mut Ir,
    outer: Handle<Variable>,
    inner: Handle<Variable>,
    factor: Handle<Expression>,
    start: Handle<Expression>,
) -> Result<Handle<Expression>, texc_ir::IrError> {
    let (o, i) = (ir.var_expr(outer), ir.var_expr(inner));
    let scaled = ir.binary(BinaryOp::Mul, o, factor)?;
    let index = ir.binary(BinaryOp::Add, scaled, i)?;
    if ir.as_int(start) == Some(0) {
        Ok(index)
    } else {
        ir.binary(BinaryOp::Add, index, start)
    }
}

fn split_pair(
    (outer, outer_extent): (Handle<Variable>, Handle<Expression>),
    (inner, factor): (Handle<Variable>, Handle<Expression>),
    zero: Handle<Expression>,
    body: Vec<LoopNode>,
    inner_first: bool,
    original: &LoopAxis,
) -> LoopNode {
    let ((first, first_stop), (second, second_stop)) = if inner_first {
        ((outer, outer_extent), (inner, factor))
    } else {
        ((inner, factor), (outer, outer_extent))
    };
    let nested = LoopNode::For(LoopAxis {
        var: second,
        start: zero,
        stop: second_stop,
        options: Default::default(),
        body,
    });
    LoopNode::For(LoopAxis {
        var: first,
        start: zero,
        stop: first_stop,
        options: original.options,
        body: vec![nested],
    })
}
