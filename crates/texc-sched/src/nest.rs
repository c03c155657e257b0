//! Per-function loop trees manipulated by the scheduler.

use texc_ir::visit::substituter;
use texc_ir::{Expression, Function, Handle, Ir, IrError, LoopOptions, Variable};

#[derive(Clone, Debug)]
pub(crate) enum LoopNode {
    For(LoopAxis),
    Compute(ComputeNode),
}

#[derive(Clone, Debug)]
pub(crate) struct LoopAxis {
    pub var: Handle<Variable>,
    pub start: Handle<Expression>,
    pub stop: Handle<Expression>,
    pub options: LoopOptions,
    pub body: Vec<LoopNode>,
}

/// Stores the function's value at `indices`, guarded by the product of
/// `masks`.
#[derive(Clone, Debug)]
pub(crate) struct ComputeNode {
    pub function: Handle<Function>,
    pub indices: Vec<Handle<Expression>>,
    pub masks: Vec<Handle<Expression>>,
}

/// The loop tree of one function.
#[derive(Clone, Debug)]
pub(crate) struct FunctionNest {
    pub function: Handle<Function>,
    pub nodes: Vec<LoopNode>,
}

impl FunctionNest {
    /// One loop per dimension, outermost first, around a single compute
    /// node. The function's own index variables serve as loop variables.
    pub fn new(ir: &mut Ir, function: Handle<Function>) -> Self {
        let func = ir[function].clone();
        let indices = func.args.iter().map(|&a| ir.var_expr(a)).collect();
        let mut nodes = vec![LoopNode::Compute(ComputeNode {
            function,
            indices,
            masks: Vec::new(),
        })];
        let zero = ir.int_imm(0);
        for (&var, &stop) in func.args.iter().zip(&func.dims).rev() {
            nodes = vec![LoopNode::For(LoopAxis {
                var,
                start: zero,
                stop,
                options: LoopOptions::default(),
                body: nodes,
            })];
        }
        Self { function, nodes }
    }

    /// The child-index path to the loop over `var`.
    pub fn find(&self, var: Handle<Variable>) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        find_path(&self.nodes, var, &mut path).then_some(path)
    }

    /// The sibling list holding the node at `path`.
    pub fn container_mut(&mut self, path: &[usize]) -> Option<&mut Vec<LoopNode>> {
        let (_, parents) = path.split_last()?;
        let mut current = &mut self.nodes;
        for &i in parents {
            current = match current.get_mut(i)? {
                LoopNode::For(axis) => &mut axis.body,
                LoopNode::Compute(_) => return None,
            };
        }
        Some(current)
    }

    /// The loop at `path`.
    pub fn axis_mut(&mut self, path: &[usize]) -> Option<&mut LoopAxis> {
        let &last = path.last()?;
        match self.container_mut(path)?.get_mut(last)? {
            LoopNode::For(axis) => Some(axis),
            LoopNode::Compute(_) => None,
        }
    }

    /// Loop variables in pre-order.
    pub fn loop_vars(&self) -> Vec<Handle<Variable>> {
        let mut vars = Vec::new();
        collect_vars(&self.nodes, &mut vars);
        vars
    }

    /// `true` once any loop has been split or bound.
    pub fn is_transformed(&self, ir: &Ir) -> bool {
        let func = &ir[self.function];
        self.loop_vars() != func.args || has_masks_or_options(&self.nodes)
    }
}

fn find_path(nodes: &[LoopNode], var: Handle<Variable>, path: &mut Vec<usize>) -> bool {
    for (i, node) in nodes.iter().enumerate() {
        if let LoopNode::For(axis) = node {
            path.push(i);
            if axis.var == var || find_path(&axis.body, var, path) {
                return true;
            }
            path.pop();
        }
    }
    false
}

fn collect_vars(nodes: &[LoopNode], vars: &mut Vec<Handle<Variable>>) {
    for node in nodes {
        if let LoopNode::For(axis) = node {
            vars.push(axis.var);
            collect_vars(&axis.body, vars);
        }
    }
}

fn has_masks_or_options(nodes: &[LoopNode]) -> bool {
    nodes.iter().any(|node| match node {
        LoopNode::For(axis) => !axis.options.is_default() || has_masks_or_options(&axis.body),
        LoopNode::Compute(compute) => !compute.masks.is_empty(),
    })
}

/// Replaces reads of `var` in every bound, index and mask below `nodes`.
pub(crate) fn substitute_nodes(
    ir: &mut Ir,
    nodes: &mut [LoopNode],
    var: Handle<Variable>,
    value: Handle<Expression>,
) -> Result<(), IrError> {
    let bindings = [(var, value)];
    let mut rewriter = substituter(&bindings);
    let mut pending: Vec<&mut LoopNode> = nodes.iter_mut().collect();
    while let Some(node) = pending.pop() {
        match node {
            LoopNode::For(axis) => {
                axis.start = rewriter.expr(ir, axis.start)?;
                axis.stop = rewriter.expr(ir, axis.stop)?;
                pending.extend(axis.body.iter_mut());
            }
            LoopNode::Compute(compute) => {
                for index in &mut compute.indices {
                    *index = rewriter.expr(ir, *index)?;
                }
                for mask in &mut compute.masks {
                    *mask = rewriter.expr(ir, *mask)?;
                }
            }
        }
    }
    Ok(())
}

/// Gives every loop below `nodes` a fresh variable named `<name><suffix>`.
pub(crate) fn freshen_loop_vars(
    ir: &mut Ir,
    nodes: &mut [LoopNode],
    suffix: &str,
) -> Result<(), IrError> {
    for node in nodes.iter_mut() {
        if let LoopNode::For(axis) = node {
            let name = format!("{}{suffix}", ir[axis.var].name);
            let dtype = ir[axis.var].dtype;
            let fresh = ir.new_var(name, dtype);
            let value = ir.var_expr(fresh);
            substitute_nodes(ir, &mut axis.body, axis.var, value)?;
            axis.var = fresh;
            freshen_loop_vars(ir, &mut axis.body, suffix)?;
        }
    }
    Ok(())
}

/// Adds `condition` to the guards of every compute node below `nodes`.
pub(crate) fn add_mask(nodes: &mut [LoopNode], condition: Handle<Expression>) {
    for node in nodes {
        match node {
            LoopNode::For(axis) => add_mask(&mut axis.body, condition),
            LoopNode::Compute(compute) => compute.masks.push(condition),
        }
    }
}
