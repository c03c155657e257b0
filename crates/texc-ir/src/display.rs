//! Canonical text form of expressions and statements.
//!
//! Every binary operation is parenthesized; the output depends only on
//! the node graph, so two trees that print identically are treated as
//! observably equal by the tests.

use crate::arena::Handle;
use crate::expr::Expression;
use crate::ir::Ir;
use crate::stmt::Statement;

/// Renders an expression.
pub fn format_expr(ir: &Ir, expr: Handle<Expression>) -> String {
    let mut out = String::new();
    write_expr(ir, expr, &mut out);
    out
}

/// Renders a statement tree.
pub fn format_stmt(ir: &Ir, stmt: &Statement) -> String {
    let mut out = String::new();
    write_stmt(ir, stmt, &mut out);
    out
}

fn write_list(ir: &Ir, exprs: &[Handle<Expression>], out: &mut String) {
    for (i, &e) in exprs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(ir, e, out);
    }
}

fn write_expr(ir: &Ir, expr: Handle<Expression>, out: &mut String) {
    match ir[expr] {
        Expression::IntImm(value) => out.push_str(&value.to_string()),
        Expression::FloatImm(value) => out.push_str(&format!("{value:?}")),
        Expression::Var(var) => out.push_str(&ir[var].name),
        Expression::Binary { op, lhs, rhs } => {
            out.push('(');
            write_expr(ir, lhs, out);
            out.push_str(&format!(" {} ", op.symbol()));
            write_expr(ir, rhs, out);
            out.push(')');
        }
        Expression::Max {
            lhs,
            rhs,
            propagate_nans,
        }
        | Expression::Min {
            lhs,
            rhs,
            propagate_nans,
        } => {
            let name = if matches!(ir[expr], Expression::Max { .. }) {
                "Max"
            } else {
                "Min"
            };
            out.push_str(name);
            out.push('(');
            write_expr(ir, lhs, out);
            out.push_str(", ");
            write_expr(ir, rhs, out);
            out.push_str(&format!(", {})", u8::from(propagate_nans)));
        }
        Expression::CompareSelect { op, lhs, rhs } => {
            out.push('(');
            write_expr(ir, lhs, out);
            out.push_str(op.symbol());
            write_expr(ir, rhs, out);
            out.push(')');
        }
        Expression::Cast { dtype, value } => {
            out.push_str(&format!("{dtype}("));
            write_expr(ir, value, out);
            out.push(')');
        }
        Expression::Let { var, value, body } => {
            out.push_str(&format!("(let {} = ", ir[var].name));
            write_expr(ir, value, out);
            out.push_str(" in ");
            write_expr(ir, body, out);
            out.push(')');
        }
        Expression::Ramp {
            base,
            stride,
            lanes,
        } => {
            out.push_str("Ramp(");
            write_expr(ir, base, out);
            out.push_str(", ");
            write_expr(ir, stride, out);
            out.push_str(&format!(", {lanes})"));
        }
        Expression::Broadcast { value, lanes } => {
            out.push_str("Broadcast(");
            write_expr(ir, value, out);
            out.push_str(&format!(", {lanes})"));
        }
        Expression::Load { base, index, mask } => {
            out.push_str(&ir[base].name);
            write_access(ir, index, mask, out);
        }
        Expression::Intrinsic { op, ref args } => {
            out.push_str(op.name());
            out.push('(');
            write_list(ir, args, out);
            out.push(')');
        }
        Expression::Call { function, ref args } => {
            out.push_str(&ir[function].name);
            out.push('(');
            write_list(ir, args, out);
            out.push(')');
        }
    }
}

fn write_access(ir: &Ir, index: Handle<Expression>, mask: Handle<Expression>, out: &mut String) {
    out.push('[');
    write_expr(ir, index, out);
    if !ir.is_true_mask(mask) {
        out.push_str(", mask=");
        write_expr(ir, mask, out);
    }
    out.push(']');
}

fn write_stmt(ir: &Ir, stmt: &Statement, out: &mut String) {
    match stmt {
        Statement::Store {
            base,
            index,
            value,
            mask,
        } => {
            out.push_str(&ir[*base].name);
            write_access(ir, *index, *mask, out);
            out.push_str(" = ");
            write_expr(ir, *value, out);
            out.push(';');
        }
        Statement::For {
            var,
            start,
            stop,
            body,
            options,
        } => {
            let name = &ir[*var].name;
            out.push_str(&format!("for (int {name} = "));
            write_expr(ir, *start, out);
            out.push_str(&format!("; {name} < "));
            write_expr(ir, *stop, out);
            out.push_str(&format!("; {name}++) {{"));
            if !options.is_default() {
                out.push_str(&format!(" // {options}"));
            }
            out.push('\n');
            write_stmt(ir, body, out);
            out.push_str("\n}");
        }
        Statement::Block(stmts) => {
            for stmt in stmts {
                write_stmt(ir, stmt, out);
                out.push('\n');
            }
        }
        Statement::Allocate {
            buffer,
            dtype,
            dims,
        } => {
            out.push_str(&format!("Allocate({}, {dtype}, {{", ir[*buffer].name));
            write_list(ir, dims, out);
            out.push_str("});");
        }
        Statement::Free { buffer } => {
            out.push_str(&format!("Free({});", ir[*buffer].name));
        }
    }
}
