//! Static dependency extraction over the syntax tree.
//!
//! These helpers compute the names an element binds and the names it
//! references; both the type checker and the workflow scheduler order
//! work by the edges they induce.

use std::collections::HashSet;

use sluice_syntax::SourcePosition;
use sluice_syntax::ast::Expr;
use sluice_syntax::ast::ExprKind;
use sluice_syntax::ast::StringPart;
use sluice_syntax::ast::WorkflowElement;

/// Gets the dotted name of an identifier/member-access chain, if the
/// expression is one.
pub fn dotted_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::Access(base, member) => dotted_name(base).map(|b| format!("{b}.{member}")),
        _ => None,
    }
}

/// Collects the free variable heads referenced by an expression.
pub fn free_vars(expr: &Expr, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            out.insert(name.clone());
        }
        ExprKind::Access(base, _) => free_vars(base, out),
        ExprKind::Index(base, index) => {
            free_vars(base, out);
            free_vars(index, out);
        }
        ExprKind::Unary(_, operand) => free_vars(operand, out),
        ExprKind::Binary(_, lhs, rhs) => {
            free_vars(lhs, out);
            free_vars(rhs, out);
        }
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            free_vars(cond, out);
            free_vars(then, out);
            free_vars(otherwise, out);
        }
        ExprKind::Apply(_, args) => {
            for arg in args {
                free_vars(arg, out);
            }
        }
        ExprKind::Array(items) => {
            for item in items {
                free_vars(item, out);
            }
        }
        ExprKind::Pair(left, right) => {
            free_vars(left, out);
            free_vars(right, out);
        }
        ExprKind::Map(entries) => {
            for (k, v) in entries {
                free_vars(k, out);
                free_vars(v, out);
            }
        }
        ExprKind::Object(members) | ExprKind::Struct(_, members) => {
            for (_, value) in members {
                free_vars(value, out);
            }
        }
        ExprKind::String(parts) => {
            for part in parts {
                if let StringPart::Placeholder(placeholder) = part {
                    free_vars(&placeholder.expr, out);
                }
            }
        }
        ExprKind::Boolean(_) | ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::None => {}
    }
}

/// Gets the names an element binds in its enclosing scope.
pub fn element_names(element: &WorkflowElement) -> Vec<String> {
    match element {
        WorkflowElement::Decl(decl) => vec![decl.name.clone()],
        WorkflowElement::Call(call) => vec![call.name().to_string()],
        WorkflowElement::Scatter(scatter) => scatter
            .body
            .iter()
            .flat_map(element_names)
            .filter(|n| *n != scatter.variable)
            .collect(),
        WorkflowElement::Conditional(conditional) => {
            conditional.body.iter().flat_map(element_names).collect()
        }
    }
}

/// Gets the position of an element for diagnostics.
pub fn element_pos(element: &WorkflowElement) -> &SourcePosition {
    match element {
        WorkflowElement::Decl(decl) => &decl.pos,
        WorkflowElement::Call(call) => &call.pos,
        WorkflowElement::Scatter(scatter) => &scatter.pos,
        WorkflowElement::Conditional(conditional) => &conditional.pos,
    }
}

/// Gets the names an element depends on from its enclosing scope.
pub fn element_deps(element: &WorkflowElement) -> HashSet<String> {
    let mut deps = HashSet::new();
    match element {
        WorkflowElement::Decl(decl) => {
            if let Some(expr) = &decl.expr {
                free_vars(expr, &mut deps);
            }
        }
        WorkflowElement::Call(call) => {
            for (_, expr) in &call.inputs {
                free_vars(expr, &mut deps);
            }

            deps.extend(call.afters.iter().cloned());
        }
        WorkflowElement::Scatter(scatter) => {
            free_vars(&scatter.expr, &mut deps);
            let inner: HashSet<String> = scatter.body.iter().flat_map(element_names).collect();
            for e in &scatter.body {
                for dep in element_deps(e) {
                    if !inner.contains(&dep) && dep != scatter.variable {
                        deps.insert(dep);
                    }
                }
            }
        }
        WorkflowElement::Conditional(conditional) => {
            free_vars(&conditional.expr, &mut deps);
            let inner: HashSet<String> = conditional.body.iter().flat_map(element_names).collect();
            for e in &conditional.body {
                for dep in element_deps(e) {
                    if !inner.contains(&dep) {
                        deps.insert(dep);
                    }
                }
            }
        }
    }

    deps
}
