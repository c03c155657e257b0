//! Traversal and non-destructive rewriting.
//!
//! Dispatch is an exhaustive `match` over the node enums, so adding a node
//! kind fails to compile until every traversal handles it.

use std::collections::{HashMap, HashSet};

use crate::arena::Handle;
use crate::error::IrError;
use crate::expr::{Expression, Variable};
use crate::ir::Ir;
use crate::stmt::Statement;

/// Visits every expression reachable from `root` once, children first.
pub fn walk_expr(ir: &Ir, root: Handle<Expression>, f: &mut dyn FnMut(Handle<Expression>)) {
    let mut seen = HashSet::new();
    walk_inner(ir, root, &mut seen, f);
}

fn walk_inner(
    ir: &Ir,
    expr: Handle<Expression>,
    seen: &mut HashSet<Handle<Expression>>,
    f: &mut dyn FnMut(Handle<Expression>),
) {
    if !seen.insert(expr) {
        return;
    }
    for child in ir[expr].operands() {
        walk_inner(ir, child, seen, f);
    }
    f(expr);
}

/// Visits every expression referenced from a statement tree.
pub fn walk_stmt(ir: &Ir, stmt: &Statement, f: &mut dyn FnMut(Handle<Expression>)) {
    let mut seen = HashSet::new();
    stmt.for_each(&mut |s| {
        for expr in s.expressions() {
            walk_inner(ir, expr, &mut seen, &mut *f);
        }
    });
}

/// A rewrite callback: return `Some(replacement)` to replace a node
/// (its children are not visited), `None` to descend into it.
pub type RewriteFn<'a> =
    dyn FnMut(&mut Ir, Handle<Expression>) -> Result<Option<Handle<Expression>>, IrError> + 'a;

/// Rewrites expression DAGs, memoizing so that shared subexpressions stay
/// shared and unchanged subtrees keep their identity.
pub struct Rewriter<'a> {
    callback: Box<RewriteFn<'a>>,
    memo: HashMap<Handle<Expression>, Handle<Expression>>,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        callback: impl FnMut(&mut Ir, Handle<Expression>) -> Result<Option<Handle<Expression>>, IrError>
        + 'a,
    ) -> Self {
        Self {
            callback: Box::new(callback),
            memo: HashMap::new(),
        }
    }

    /// Rewrites one expression.
    pub fn expr(
        &mut self,
        ir: &mut Ir,
        expr: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        if let Some(&done) = self.memo.get(&expr) {
            return Ok(done);
        }
        let result = match (self.callback)(ir, expr)? {
            Some(replacement) => replacement,
            None => self.children(ir, expr)?,
        };
        self.memo.insert(expr, result);
        Ok(result)
    }

    fn children(
        &mut self,
        ir: &mut Ir,
        expr: Handle<Expression>,
    ) -> Result<Handle<Expression>, IrError> {
        let node = ir[expr].clone();
        let operands = node.operands();
        if operands.is_empty() {
            return Ok(expr);
        }
        let mut rewritten = Vec::with_capacity(operands.len());
        for &child in &operands {
            rewritten.push(self.expr(ir, child)?);
        }
        if rewritten == operands {
            return Ok(expr);
        }
        let mut it = rewritten.into_iter();
        let mut next = || it.next().unwrap_or(expr);
        let node = match node {
            Expression::IntImm(_) | Expression::FloatImm(_) | Expression::Var(_) => node,
            Expression::Binary { op, .. } => Expression::Binary {
                op,
                lhs: next(),
                rhs: next(),
            },
            Expression::Max { propagate_nans, .. } => Expression::Max {
                lhs: next(),
                rhs: next(),
                propagate_nans,
            },
            Expression::Min { propagate_nans, .. } => Expression::Min {
                lhs: next(),
                rhs: next(),
                propagate_nans,
            },
            Expression::CompareSelect { op, .. } => Expression::CompareSelect {
                op,
                lhs: next(),
                rhs: next(),
            },
            Expression::Cast { dtype, .. } => Expression::Cast {
                dtype,
                value: next(),
            },
            Expression::Let { var, .. } => Expression::Let {
                var,
                value: next(),
                body: next(),
            },
            Expression::Ramp { lanes, .. } => Expression::Ramp {
                base: next(),
                stride: next(),
                lanes,
            },
            Expression::Broadcast { lanes, .. } => Expression::Broadcast {
                value: next(),
                lanes,
            },
            Expression::Load { base, .. } => Expression::Load {
                base,
                index: next(),
                mask: next(),
            },
            Expression::Intrinsic { op, args } => Expression::Intrinsic {
                op,
                args: args.iter().map(|_| next()).collect(),
            },
            Expression::Call { function, args } => Expression::Call {
                function,
                args: args.iter().map(|_| next()).collect(),
            },
        };
        ir.rebuild(expr, node)
    }

    /// Rewrites every expression referenced by a statement tree.
    pub fn stmt(&mut self, ir: &mut Ir, stmt: &Statement) -> Result<Statement, IrError> {
        Ok(match stmt {
            Statement::Store {
                base,
                index,
                value,
                mask,
            } => Statement::Store {
                base: *base,
                index: self.expr(ir, *index)?,
                value: self.expr(ir, *value)?,
                mask: self.expr(ir, *mask)?,
            },
            Statement::For {
                var,
                start,
                stop,
                body,
                options,
            } => Statement::For {
                var: *var,
                start: self.expr(ir, *start)?,
                stop: self.expr(ir, *stop)?,
                body: Box::new(self.stmt(ir, body)?),
                options: *options,
            },
            Statement::Block(stmts) => Statement::Block(
                stmts
                    .iter()
                    .map(|s| self.stmt(ir, s))
                    .collect::<Result<_, _>>()?,
            ),
            Statement::Allocate {
                buffer,
                dtype,
                dims,
            } => Statement::Allocate {
                buffer: *buffer,
                dtype: *dtype,
                dims: dims
                    .iter()
                    .map(|&d| self.expr(ir, d))
                    .collect::<Result<_, _>>()?,
            },
            Statement::Free { buffer } => Statement::Free { buffer: *buffer },
        })
    }
}

/// Replaces every read of the given variables.
pub fn substitute(
    ir: &mut Ir,
    expr: Handle<Expression>,
    bindings: &[(Handle<Variable>, Handle<Expression>)],
) -> Result<Handle<Expression>, IrError> {
    if bindings.is_empty() {
        return Ok(expr);
    }
    substituter(bindings).expr(ir, expr)
}

/// A [`Rewriter`] replacing variable reads according to `bindings`.
pub fn substituter<'a>(bindings: &'a [(Handle<Variable>, Handle<Expression>)]) -> Rewriter<'a> {
    Rewriter::new(move |ir, e| {
        Ok(match ir[e] {
            Expression::Var(var) => bindings
                .iter()
                .find(|(v, _)| *v == var)
                .map(|&(_, replacement)| replacement),
            _ => None,
        })
    })
}

/// Returns `true` if `expr` reads `var`.
pub fn uses_var(ir: &Ir, expr: Handle<Expression>, var: Handle<Variable>) -> bool {
    let mut found = false;
    walk_expr(ir, expr, &mut |e| {
        if matches!(ir[e], Expression::Var(v) if v == var) {
            found = true;
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::format_expr;
    use crate::expr::BinaryOp;
    use crate::types::Dtype;

    #[test]
    fn substitute_replaces_reads() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let y = ir.new_var("y", Dtype::INT32);
        let (xe, ye) = (ir.var_expr(x), ir.var_expr(y));
        let sum = ir.binary(BinaryOp::Add, xe, ye).unwrap();
        let seven = ir.int_imm(7);
        let out = substitute(&mut ir, sum, &[(x, seven)]).unwrap();
        assert_eq!(format_expr(&ir, out), "(7 + y)");
        assert_eq!(format_expr(&ir, sum), "(x + y)");
    }

    #[test]
    fn unchanged_subtree_keeps_identity() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let y = ir.new_var("y", Dtype::INT32);
        let (xe, ye) = (ir.var_expr(x), ir.var_expr(y));
        let prod = ir.binary(BinaryOp::Mul, ye, ye).unwrap();
        let z = ir.new_var("z", Dtype::INT32);
        let ze = ir.var_expr(z);
        let out = substitute(&mut ir, prod, &[(x, ze)]).unwrap();
        assert_eq!(out, prod);
        let before = ir.expressions().len();
        let sum = ir.binary(BinaryOp::Add, xe, prod).unwrap();
        let out = substitute(&mut ir, sum, &[(x, ze)]).unwrap();
        let Expression::Binary { rhs, .. } = ir[out] else {
            panic!("expected binary");
        };
        assert_eq!(rhs, prod);
        assert!(ir.expressions().len() > before);
    }

    #[test]
    fn shared_nodes_rewritten_once() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let xe = ir.var_expr(x);
        let one = ir.int_imm(1);
        let inc = ir.binary(BinaryOp::Add, xe, one).unwrap();
        let sq = ir.binary(BinaryOp::Mul, inc, inc).unwrap();
        let two = ir.int_imm(2);
        let out = substitute(&mut ir, sq, &[(x, two)]).unwrap();
        let Expression::Binary { lhs, rhs, .. } = ir[out] else {
            panic!("expected binary");
        };
        assert_eq!(lhs, rhs);
        assert_eq!(format_expr(&ir, out), "((2 + 1) * (2 + 1))");
    }

    #[test]
    fn uses_var_finds_nested_reads() {
        let mut ir = Ir::new();
        let x = ir.new_var("x", Dtype::INT32);
        let y = ir.new_var("y", Dtype::INT32);
        let xe = ir.var_expr(x);
        let one = ir.int_imm(1);
        let e = ir.binary(BinaryOp::Sub, xe, one).unwrap();
        assert!(uses_var(&ir, e, x));
        assert!(!uses_var(&ir, e, y));
    }
}
