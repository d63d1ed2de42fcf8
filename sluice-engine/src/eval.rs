//! Evaluation of pure expressions.
//!
//! Evaluation is total for well-typed expressions: it produces a value of
//! the inferred type or one of the defined evaluation errors. `&&`, `||`,
//! and `if` short-circuit; only the taken branch of a conditional is
//! evaluated.

use std::path::Path;

use indexmap::IndexMap;
use sluice_analysis::Bindings;
use sluice_analysis::Document;
use sluice_analysis::deps::dotted_name;
use sluice_analysis::types::StructMembers;
use sluice_analysis::types::Type;
use sluice_syntax::SourcePosition;
use sluice_syntax::WdlVersion;
use sluice_syntax::ast::BinaryOp;
use sluice_syntax::ast::Expr;
use sluice_syntax::ast::ExprKind;
use sluice_syntax::ast::Placeholder;
use sluice_syntax::ast::StringPart;
use sluice_syntax::ast::UnaryOp;

use crate::error::RunError;
use crate::error::RunResult;
use crate::stdlib;
use crate::value::Array;
use crate::value::CoercionError;
use crate::value::Map;
use crate::value::Pair;
use crate::value::StructValue;
use crate::value::Value;

/// The context an expression is evaluated within.
pub trait EvaluationContext {
    /// Gets the effective WDL version.
    fn version(&self) -> WdlVersion;

    /// Resolves a (possibly dotted) name to a value.
    fn resolve_name(&self, name: &str) -> Option<Value>;

    /// Determines if any binding lives inside the given namespace.
    fn has_namespace(&self, name: &str) -> bool;

    /// Resolves a struct type name to its member types.
    fn struct_members(&self, name: &str) -> Option<StructMembers>;

    /// Gets the current working directory for relative paths and `glob`.
    fn work_dir(&self) -> &Path;

    /// Gets the directory for files created by `write_*` functions.
    fn temp_dir(&self) -> &Path;

    /// Gets the task's captured standard output, when evaluating task
    /// outputs.
    fn stdout(&self) -> Option<Value> {
        None
    }

    /// Gets the task's captured standard error, when evaluating task
    /// outputs.
    fn stderr(&self) -> Option<Value> {
        None
    }
}

/// A straightforward [`EvaluationContext`] over an environment and a
/// document.
pub struct EvalContext<'a> {
    /// The document providing struct types and the version.
    pub document: &'a Document,
    /// The name environment.
    pub env: &'a Bindings<Value>,
    /// The working directory.
    pub work_dir: &'a Path,
    /// The temp directory for `write_*` outputs.
    pub temp_dir: &'a Path,
    /// The captured stdout, when evaluating task outputs.
    pub stdout: Option<Value>,
    /// The captured stderr, when evaluating task outputs.
    pub stderr: Option<Value>,
}

impl EvaluationContext for EvalContext<'_> {
    fn version(&self) -> WdlVersion {
        self.document.version()
    }

    fn resolve_name(&self, name: &str) -> Option<Value> {
        self.env.resolve(name).cloned()
    }

    fn has_namespace(&self, name: &str) -> bool {
        self.env.has_namespace(name)
    }

    fn struct_members(&self, name: &str) -> Option<StructMembers> {
        self.document.structs().get(name).cloned()
    }

    fn work_dir(&self) -> &Path {
        self.work_dir
    }

    fn temp_dir(&self) -> &Path {
        self.temp_dir
    }

    fn stdout(&self) -> Option<Value> {
        self.stdout.clone()
    }

    fn stderr(&self) -> Option<Value> {
        self.stderr.clone()
    }
}

/// Evaluates expressions within an [`EvaluationContext`].
pub struct ExprEvaluator<'a> {
    /// The evaluation context.
    context: &'a dyn EvaluationContext,
}

impl<'a> ExprEvaluator<'a> {
    /// Creates a new evaluator over the given context.
    pub fn new(context: &'a dyn EvaluationContext) -> Self {
        Self { context }
    }

    /// Gets the evaluation context.
    pub fn context(&self) -> &dyn EvaluationContext {
        self.context
    }

    /// Evaluates an expression.
    pub fn evaluate(&self, expr: &Expr) -> RunResult<Value> {
        match &expr.kind {
            ExprKind::Boolean(v) => Ok(Value::Boolean(*v)),
            ExprKind::Int(v) => Ok(Value::Int(*v)),
            ExprKind::Float(v) => Ok(Value::float(*v)),
            ExprKind::None => Ok(Value::Null),
            ExprKind::String(parts) => Ok(Value::string(self.interpolate(parts)?)),
            ExprKind::Array(items) => {
                let values: Vec<Value> = items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<RunResult<_>>()?;
                let types: Vec<Type> = values.iter().map(Value::ty).collect();
                let item_ty = Type::unify(types.iter(), false).unwrap_or_else(Type::any);
                Ok(Value::Array(Array::new(item_ty, values)))
            }
            ExprKind::Pair(left, right) => Ok(Value::Pair(Pair::new(
                self.evaluate(left)?,
                self.evaluate(right)?,
            ))),
            ExprKind::Map(entries) => {
                let mut evaluated = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    evaluated.push((self.evaluate(k)?, self.evaluate(v)?));
                }

                let key_types: Vec<Type> = evaluated.iter().map(|(k, _)| k.ty()).collect();
                let value_types: Vec<Type> = evaluated.iter().map(|(_, v)| v.ty()).collect();
                Ok(Value::Map(Map::new(
                    Type::unify(key_types.iter(), false).unwrap_or_else(Type::any),
                    Type::unify(value_types.iter(), false).unwrap_or_else(Type::any),
                    evaluated,
                )))
            }
            ExprKind::Object(members) => {
                let mut values = IndexMap::new();
                for (name, value) in members {
                    values.insert(name.clone(), self.evaluate(value)?);
                }

                let member_types = values.iter().map(|(k, v)| (k.clone(), v.ty())).collect();
                Ok(Value::Struct(StructValue::new(
                    Type::object(member_types),
                    values,
                )))
            }
            ExprKind::Struct(name, members) => {
                let struct_members = self.context.struct_members(name).ok_or_else(|| {
                    RunError::eval(format!("unknown struct type `{name}`"), &expr.pos)
                })?;

                let ty = Type::struct_instance(name.clone(), struct_members.clone());
                let mut values = IndexMap::new();
                for (member, value) in members {
                    let target = struct_members.get(member).ok_or_else(|| {
                        RunError::eval(
                            format!("`{member}` is not a member of struct `{name}`"),
                            &value.pos,
                        )
                    })?;
                    values.insert(
                        member.clone(),
                        self.coerced(self.evaluate(value)?, target, &value.pos)?,
                    );
                }

                for (member, target) in struct_members.iter() {
                    if !values.contains_key(member) {
                        if !target.is_optional() {
                            return Err(RunError::eval(
                                format!("missing member `{member}` of struct `{name}`"),
                                &expr.pos,
                            ));
                        }

                        values.insert(member.clone(), Value::Null);
                    }
                }

                Ok(Value::Struct(StructValue::new(ty, values)))
            }
            ExprKind::Ident(name) => self.context.resolve_name(name).ok_or_else(|| {
                RunError::eval(format!("unknown identifier `{name}`"), &expr.pos)
            }),
            ExprKind::Access(base, member) => {
                // A dotted chain may name a binding directly (a call output)
                if let Some(name) = dotted_name(expr) {
                    if let Some(value) = self.context.resolve_name(&name) {
                        return Ok(value);
                    }
                }

                let base_value = self.evaluate(base)?;
                match &base_value {
                    Value::Null => Err(RunError::NullValue {
                        pos: base.pos.clone(),
                    }),
                    Value::Pair(pair) => match member.as_str() {
                        "left" => Ok(pair.left().clone()),
                        "right" => Ok(pair.right().clone()),
                        _ => Err(RunError::eval(
                            format!("pair has no member named `{member}`"),
                            &expr.pos,
                        )),
                    },
                    Value::Struct(value) => value.get(member).cloned().ok_or_else(|| {
                        RunError::eval(
                            format!("value has no member named `{member}`"),
                            &expr.pos,
                        )
                    }),
                    _ => Err(RunError::eval(
                        format!(
                            "cannot access member `{member}` of a value of type `{ty}`",
                            ty = base_value.ty()
                        ),
                        &expr.pos,
                    )),
                }
            }
            ExprKind::Index(base, index) => {
                let base_value = self.evaluate(base)?;
                let index_value = self.evaluate(index)?;
                match &base_value {
                    Value::Null => Err(RunError::NullValue {
                        pos: base.pos.clone(),
                    }),
                    Value::Array(array) => {
                        let i = index_value.as_int().ok_or_else(|| {
                            RunError::eval("array index must be an integer", &index.pos)
                        })?;

                        if i < 0 || i as usize >= array.len() {
                            return Err(RunError::out_of_bounds(
                                format!(
                                    "array index {i} is out of bounds for an array of length \
                                     {len}",
                                    len = array.len()
                                ),
                                &index.pos,
                            ));
                        }

                        Ok(array.as_slice()[i as usize].clone())
                    }
                    Value::Map(map) => {
                        let key = self
                            .coerced(index_value, map.key_ty(), &index.pos)?;
                        map.get(&key).cloned().ok_or_else(|| {
                            RunError::eval(
                                format!("map does not contain an entry for key {key}"),
                                &index.pos,
                            )
                        })
                    }
                    _ => Err(RunError::eval(
                        format!(
                            "cannot subscript a value of type `{ty}`",
                            ty = base_value.ty()
                        ),
                        &base.pos,
                    )),
                }
            }
            ExprKind::Unary(op, operand) => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => match value {
                        Value::Boolean(v) => Ok(Value::Boolean(!v)),
                        _ => Err(RunError::eval("`!` requires a Boolean operand", &operand.pos)),
                    },
                    UnaryOp::Negate => match value {
                        Value::Int(v) => v
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| RunError::eval("integer overflow", &expr.pos)),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        _ => Err(RunError::eval("`-` requires a numeric operand", &operand.pos)),
                    },
                }
            }
            ExprKind::Binary(op, lhs, rhs) => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let left = self.evaluate(lhs)?.as_boolean().ok_or_else(|| {
                        RunError::eval(format!("`{op}` requires Boolean operands"), &lhs.pos)
                    })?;

                    // Short-circuit: the right operand is evaluated only
                    // when the left does not decide the result
                    match (op, left) {
                        (BinaryOp::And, false) => Ok(Value::Boolean(false)),
                        (BinaryOp::Or, true) => Ok(Value::Boolean(true)),
                        _ => {
                            let right = self.evaluate(rhs)?.as_boolean().ok_or_else(|| {
                                RunError::eval(
                                    format!("`{op}` requires Boolean operands"),
                                    &rhs.pos,
                                )
                            })?;
                            Ok(Value::Boolean(right))
                        }
                    }
                }
                _ => {
                    let left = self.evaluate(lhs)?;
                    let right = self.evaluate(rhs)?;
                    apply_binary(*op, left, right, &expr.pos)
                }
            },
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let condition = self.evaluate(cond)?.as_boolean().ok_or_else(|| {
                    RunError::eval("`if` condition must be a Boolean", &cond.pos)
                })?;

                // Only the taken branch is evaluated
                if condition {
                    self.evaluate(then)
                } else {
                    self.evaluate(otherwise)
                }
            }
            ExprKind::Apply(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push((self.evaluate(arg)?, &arg.pos));
                }

                stdlib::call(
                    name,
                    &stdlib::CallContext {
                        name,
                        args: &values,
                        pos: &expr.pos,
                        context: self.context,
                    },
                )
            }
        }
    }

    /// Evaluates an expression and coerces the result to the given type.
    pub fn evaluate_coerced(&self, expr: &Expr, target: &Type) -> RunResult<Value> {
        let value = self.evaluate(expr)?;
        self.coerced(value, target, &expr.pos)
    }

    /// Coerces a value, mapping coercion failures to evaluation errors at
    /// the given position.
    pub fn coerced(&self, value: Value, target: &Type, pos: &SourcePosition) -> RunResult<Value> {
        value.coerce(target).map_err(|e| match e {
            CoercionError::NullValue => RunError::NullValue { pos: pos.clone() },
            other => RunError::eval(other.to_string(), pos),
        })
    }

    /// Interpolates a sequence of string parts into text.
    pub fn interpolate(&self, parts: &[StringPart]) -> RunResult<String> {
        let mut text = String::new();
        for part in parts {
            match part {
                StringPart::Literal { text: t, .. } => text.push_str(t),
                StringPart::Placeholder(placeholder) => {
                    text.push_str(&self.placeholder_text(placeholder)?);
                }
            }
        }

        Ok(text)
    }

    /// Renders a placeholder into text, applying its option clauses.
    pub fn placeholder_text(&self, placeholder: &Placeholder) -> RunResult<String> {
        let value = self.evaluate(&placeholder.expr)?;
        let options = &placeholder.options;
        let pos = &placeholder.expr.pos;

        if value.is_null() {
            return Ok(options.default.clone().unwrap_or_default());
        }

        if let Some(sep) = &options.sep {
            let array = value.as_array().ok_or_else(|| {
                RunError::eval("the `sep` option requires an array value", pos)
            })?;

            let mut rendered = Vec::with_capacity(array.len());
            for item in array.as_slice() {
                if item.is_null() {
                    rendered.push(options.default.clone().unwrap_or_default());
                    continue;
                }

                rendered.push(item.as_display_string().ok_or_else(|| {
                    RunError::eval(
                        format!(
                            "cannot interpolate a value of type `{ty}`",
                            ty = item.ty()
                        ),
                        pos,
                    )
                })?);
            }

            return Ok(rendered.join(sep));
        }

        if let (Some(true_value), Some(false_value)) =
            (&options.true_value, &options.false_value)
        {
            if let Value::Boolean(v) = value {
                return Ok(if v {
                    true_value.clone()
                } else {
                    false_value.clone()
                });
            }

            return Err(RunError::eval(
                "the `true`/`false` options require a Boolean value",
                pos,
            ));
        }

        value.as_display_string().ok_or_else(|| {
            RunError::eval(
                format!("cannot interpolate a value of type `{ty}`", ty = value.ty()),
                pos,
            )
        })
    }
}

/// Applies a non-short-circuiting binary operator to evaluated operands.
fn apply_binary(op: BinaryOp, left: Value, right: Value, pos: &SourcePosition) -> RunResult<Value> {
    /// Determines if a value is string-like for concatenation.
    fn stringish(value: &Value) -> bool {
        matches!(
            value,
            Value::String(_) | Value::File(_) | Value::Directory(_)
        )
    }

    // String concatenation with a null operand propagates the null, so
    // placeholders such as `~{"--flag=" + maybe}` render empty
    if op == BinaryOp::Add && (left.is_null() || right.is_null()) {
        if stringish(&left) || stringish(&right) {
            return Ok(Value::Null);
        }

        return Err(RunError::NullValue { pos: pos.clone() });
    }

    match op {
        BinaryOp::Add if stringish(&left) || stringish(&right) => {
            let l = left.as_display_string().ok_or_else(|| {
                RunError::eval(
                    format!("cannot concatenate a value of type `{ty}`", ty = left.ty()),
                    pos,
                )
            })?;
            let r = right.as_display_string().ok_or_else(|| {
                RunError::eval(
                    format!("cannot concatenate a value of type `{ty}`", ty = right.ty()),
                    pos,
                )
            })?;

            // File + String produces a File path
            if matches!(left, Value::File(_)) {
                Ok(Value::file(format!("{l}{r}")))
            } else {
                Ok(Value::string(format!("{l}{r}")))
            }
        }
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Remainder => match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => {
                let result = match op {
                    BinaryOp::Add => l.checked_add(*r),
                    BinaryOp::Subtract => l.checked_sub(*r),
                    BinaryOp::Multiply => l.checked_mul(*r),
                    BinaryOp::Divide => {
                        if *r == 0 {
                            return Err(RunError::eval("division by zero", pos));
                        }

                        l.checked_div(*r)
                    }
                    BinaryOp::Remainder => {
                        if *r == 0 {
                            return Err(RunError::eval("division by zero", pos));
                        }

                        l.checked_rem(*r)
                    }
                    _ => unreachable!("arithmetic operators are matched above"),
                };

                result
                    .map(Value::Int)
                    .ok_or_else(|| RunError::eval("integer overflow", pos))
            }
            _ => {
                let l = numeric_operand(&left, pos)?;
                let r = numeric_operand(&right, pos)?;
                let result = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Subtract => l - r,
                    BinaryOp::Multiply => l * r,
                    BinaryOp::Divide => {
                        if r == 0.0 {
                            return Err(RunError::eval("division by zero", pos));
                        }

                        l / r
                    }
                    BinaryOp::Remainder => {
                        if r == 0.0 {
                            return Err(RunError::eval("division by zero", pos));
                        }

                        l % r
                    }
                    _ => unreachable!("arithmetic operators are matched above"),
                };

                Ok(Value::float(result))
            }
        },
        BinaryOp::Equal => Ok(Value::Boolean(values_equal(&left, &right))),
        BinaryOp::NotEqual => Ok(Value::Boolean(!values_equal(&left, &right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (&left, &right) {
                (Value::Int(l), Value::Int(r)) => l.partial_cmp(r),
                (Value::String(l), Value::String(r)) => l.partial_cmp(r),
                (Value::Boolean(l), Value::Boolean(r)) => l.partial_cmp(r),
                _ => {
                    let l = numeric_operand(&left, pos)?;
                    let r = numeric_operand(&right, pos)?;
                    l.partial_cmp(&r)
                }
            };

            let ordering = ordering
                .ok_or_else(|| RunError::eval("operands cannot be compared", pos))?;
            let result = match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                BinaryOp::GreaterEqual => ordering.is_ge(),
                _ => unreachable!("comparison operators are matched above"),
            };

            Ok(Value::Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => {
            unreachable!("logical operators short-circuit in the evaluator")
        }
    }
}

/// Gets a numeric operand as a float.
fn numeric_operand(value: &Value, pos: &SourcePosition) -> RunResult<f64> {
    match value {
        Value::Int(v) => Ok(*v as f64),
        Value::Float(v) => Ok(v.0),
        Value::Null => Err(RunError::NullValue { pos: pos.clone() }),
        _ => Err(RunError::eval(
            format!("expected a numeric operand, but found type `{ty}`", ty = value.ty()),
            pos,
        )),
    }
}

/// Evaluates a set of declarations forming one scope, honoring their
/// static dependency order.
///
/// Names already bound in the environment (provided inputs) are kept as-is;
/// unbound declarations evaluate their initializers, and unbound optional
/// declarations without initializers bind null. An unbound required
/// declaration is an input error.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_decls(
    decls: &[&sluice_syntax::ast::Decl],
    document: &Document,
    env: Bindings<Value>,
    work_dir: &Path,
    temp_dir: &Path,
    stdout: Option<Value>,
    stderr: Option<Value>,
) -> RunResult<Bindings<Value>> {
    use std::collections::HashSet;

    let mut env = env;
    let mut pending: Vec<&sluice_syntax::ast::Decl> = decls
        .iter()
        .copied()
        .filter(|d| !env.has_binding(&d.name))
        .collect();

    while !pending.is_empty() {
        let pending_names: HashSet<&str> = pending.iter().map(|d| d.name.as_str()).collect();
        let mut progressed = false;

        let mut remaining = Vec::with_capacity(pending.len());
        for decl in pending {
            let mut deps = HashSet::new();
            if let Some(expr) = &decl.expr {
                sluice_analysis::deps::free_vars(expr, &mut deps);
            }

            let blocked = deps.iter().any(|dep| {
                let head = dep.split('.').next().unwrap_or(dep);
                pending_names.contains(head) && head != decl.name
            });
            if blocked {
                remaining.push(decl);
                continue;
            }

            let ty = document.type_of(decl.id);
            let value = match &decl.expr {
                Some(expr) => {
                    let context = EvalContext {
                        document,
                        env: &env,
                        work_dir,
                        temp_dir,
                        stdout: stdout.clone(),
                        stderr: stderr.clone(),
                    };
                    let value = ExprEvaluator::new(&context).evaluate(expr)?;

                    // A runtime shape mismatch at an assignment (possible
                    // only for indeterminately-typed values, e.g. from
                    // `read_json`) is an input error
                    value.coerce(ty).map_err(|e| match e {
                        CoercionError::NullValue => RunError::NullValue {
                            pos: expr.pos.clone(),
                        },
                        other => RunError::input(format!(
                            "value assigned to `{name}` is invalid: {other}",
                            name = decl.name
                        )),
                    })?
                }
                None if ty.is_optional() => Value::Null,
                None => {
                    return Err(RunError::input(format!(
                        "missing required input `{name}`",
                        name = decl.name
                    )));
                }
            };

            env = env.bind(decl.name.clone(), value);
            progressed = true;
        }

        pending = remaining;
        assert!(
            progressed || pending.is_empty(),
            "declaration dependencies should be acyclic after checking"
        );
    }

    Ok(env)
}

/// Deep structural equality with numeric promotion.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(l), Value::Float(r)) => *l as f64 == r.0,
        (Value::Float(l), Value::Int(r)) => l.0 == *r as f64,
        _ => left == right,
    }
}

