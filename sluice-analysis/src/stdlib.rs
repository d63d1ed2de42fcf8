//! Type signatures of the WDL standard library.
//!
//! The table drives static inference of function application; the engine
//! crate supplies the matching implementations. Dispatch is arity-first,
//! then a left-to-right coercion compatibility check over the overloads,
//! with ties broken by the overload matching more argument types exactly.

use std::collections::HashMap;
use std::sync::LazyLock;

use sluice_syntax::Diagnostic;
use sluice_syntax::SourcePosition;
use sluice_syntax::WdlVersion;

use crate::diagnostics::incompatible_operand;
use crate::diagnostics::not_an_array;
use crate::diagnostics::static_type_mismatch;
use crate::types::Type;

/// A typed argument at a function call site.
#[derive(Debug, Clone)]
pub struct TypedArg {
    /// The inferred type of the argument.
    pub ty: Type,
    /// The position of the argument expression.
    pub pos: SourcePosition,
}

/// The context available when inferring a function application.
pub struct InferContext<'a> {
    /// The name of the function being applied.
    pub name: &'a str,
    /// The typed arguments of the application.
    pub args: &'a [TypedArg],
    /// The position of the call site.
    pub pos: &'a SourcePosition,
    /// Whether optional/nonempty quantifiers are checked strictly.
    pub check_quant: bool,
}

/// The inference callback of a standard library function.
type InferFn = fn(&InferContext<'_>) -> Result<Type, Diagnostic>;

/// A standard library function signature entry.
pub struct StdFunction {
    /// The minimum WDL version providing the function.
    min_version: WdlVersion,
    /// The inference callback.
    infer: InferFn,
}

impl StdFunction {
    /// Gets the minimum WDL version providing the function.
    pub fn min_version(&self) -> WdlVersion {
        self.min_version
    }

    /// Infers the return type of an application of the function.
    pub fn infer(&self, context: &InferContext<'_>) -> Result<Type, Diagnostic> {
        (self.infer)(context)
    }
}

/// Looks up a standard library function by name.
pub fn function(name: &str) -> Option<&'static StdFunction> {
    STDLIB.get(name)
}

/// Checks the arity of an application.
fn expect_arity(context: &InferContext<'_>, min: usize, max: usize) -> Result<(), Diagnostic> {
    let n = context.args.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };

        return Err(incompatible_operand(
            format!(
                "function `{name}` expects {expected} argument(s), but {n} were provided",
                name = context.name
            ),
            context.pos,
        ));
    }

    Ok(())
}

/// Requires an argument to be an array, returning its item type.
fn array_item(context: &InferContext<'_>, index: usize) -> Result<Type, Diagnostic> {
    match &context.args[index].ty {
        Type::Array { item, .. } => Ok((**item).clone()),
        Type::Any { .. } => Ok(Type::any()),
        ty => Err(not_an_array(ty, &context.args[index].pos)),
    }
}

/// Requires an argument to coerce to the given type.
fn coerce_arg(context: &InferContext<'_>, index: usize, target: &Type) -> Result<(), Diagnostic> {
    let arg = &context.args[index];
    if !arg.ty.coerces(target, context.check_quant) {
        return Err(incompatible_operand(
            format!(
                "argument {n} of function `{name}` must be coercible to `{target}`, but found \
                 `{ty}`",
                n = index + 1,
                name = context.name,
                ty = arg.ty
            ),
            &arg.pos,
        ));
    }

    Ok(())
}

/// Dispatches over concrete overloads.
///
/// Overloads are filtered by arity, then by left-to-right coercion of every
/// argument; among the matches the overload with the most exactly-matching
/// argument types wins, earliest first on a tie.
fn dispatch(
    context: &InferContext<'_>,
    overloads: &[(&[Type], Type)],
) -> Result<Type, Diagnostic> {
    let mut best: Option<(usize, &Type)> = None;

    for (params, ret) in overloads {
        if params.len() != context.args.len() {
            continue;
        }

        let coercible = params
            .iter()
            .zip(context.args)
            .all(|(param, arg)| arg.ty.coerces(param, context.check_quant));
        if !coercible {
            continue;
        }

        let exact = params
            .iter()
            .zip(context.args)
            .filter(|(param, arg)| arg.ty == **param)
            .count();
        if best.map(|(e, _)| exact > e).unwrap_or(true) {
            best = Some((exact, ret));
        }
    }

    match best {
        Some((_, ret)) => Ok(ret.clone()),
        None => {
            let types = context
                .args
                .iter()
                .map(|a| format!("`{ty}`", ty = a.ty))
                .collect::<Vec<_>>()
                .join(", ");

            Err(incompatible_operand(
                format!(
                    "no overload of function `{name}` accepts ({types})",
                    name = context.name
                ),
                context.pos,
            ))
        }
    }
}

/// The standard library signature table.
static STDLIB: LazyLock<HashMap<&'static str, StdFunction>> = LazyLock::new(|| {
    /// Shorthand for a table entry.
    fn entry(min_version: WdlVersion, infer: InferFn) -> StdFunction {
        StdFunction { min_version, infer }
    }

    HashMap::from_iter([
        (
            "floor",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::float()], Type::int())])
            }),
        ),
        (
            "ceil",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::float()], Type::int())])
            }),
        ),
        (
            "round",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::float()], Type::int())])
            }),
        ),
        (
            "min",
            entry(WdlVersion::OneOne, |ctx| {
                dispatch(
                    ctx,
                    &[
                        (&[Type::int(), Type::int()], Type::int()),
                        (&[Type::int(), Type::float()], Type::float()),
                        (&[Type::float(), Type::int()], Type::float()),
                        (&[Type::float(), Type::float()], Type::float()),
                    ],
                )
            }),
        ),
        (
            "max",
            entry(WdlVersion::OneOne, |ctx| {
                dispatch(
                    ctx,
                    &[
                        (&[Type::int(), Type::int()], Type::int()),
                        (&[Type::int(), Type::float()], Type::float()),
                        (&[Type::float(), Type::int()], Type::float()),
                        (&[Type::float(), Type::float()], Type::float()),
                    ],
                )
            }),
        ),
        (
            "sub",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[(
                        &[Type::string(), Type::string(), Type::string()],
                        Type::string(),
                    )],
                )
            }),
        ),
        (
            "basename",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[
                        (&[Type::string()], Type::string()),
                        (&[Type::string(), Type::string()], Type::string()),
                    ],
                )
            }),
        ),
        (
            "size",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 2)?;

                /// Determines if a type can carry a file path for sizing.
                fn file_bearing(ty: &Type) -> bool {
                    matches!(
                        ty,
                        Type::File { .. }
                            | Type::Directory { .. }
                            | Type::String { .. }
                            | Type::Any { .. }
                    )
                }

                // The operand must be a file (or a path coercible to one),
                // or an array of them
                let operand = &ctx.args[0].ty;
                let accepted = match operand {
                    Type::Array { item, .. } => file_bearing(item),
                    ty => file_bearing(ty),
                };
                if !accepted {
                    let expected = match operand {
                        Type::Array { .. } => {
                            Type::array(Type::file().with_optional(true))
                        }
                        _ => Type::file().with_optional(true),
                    };
                    return Err(static_type_mismatch(
                        &expected,
                        operand,
                        &ctx.args[0].pos,
                    ));
                }

                // The unit must be a literal string, not merely
                // string-coercible (a second file is a mistake, not a unit)
                if ctx.args.len() == 2 {
                    let unit = &ctx.args[1].ty;
                    if !matches!(unit, Type::String { .. } | Type::Any { .. }) {
                        return Err(static_type_mismatch(
                            &Type::string(),
                            unit,
                            &ctx.args[1].pos,
                        ));
                    }
                }

                Ok(Type::float())
            }),
        ),
        (
            "stdout",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 0, 0)?;
                Ok(Type::file())
            }),
        ),
        (
            "stderr",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 0, 0)?;
                Ok(Type::file())
            }),
        ),
        (
            "glob",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::string()], Type::array(Type::file()))])
            }),
        ),
        (
            "range",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::int()], Type::array(Type::int()))])
            }),
        ),
        (
            "length",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                array_item(ctx, 0)?;
                Ok(Type::int())
            }),
        ),
        (
            "flatten",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let outer = array_item(ctx, 0)?;
                match outer {
                    Type::Array { item, .. } => Ok(Type::array(*item)),
                    Type::Any { .. } => Ok(Type::array(Type::any())),
                    ty => Err(not_an_array(&ty, &ctx.args[0].pos)),
                }
            }),
        ),
        (
            "select_first",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let item = array_item(ctx, 0)?;
                Ok(item.require())
            }),
        ),
        (
            "select_all",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let item = array_item(ctx, 0)?;
                Ok(Type::array(item.require()))
            }),
        ),
        (
            "defined",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                Ok(Type::boolean())
            }),
        ),
        (
            "prefix",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 2, 2)?;
                coerce_arg(ctx, 0, &Type::string())?;
                let item = array_item(ctx, 1)?;
                coerce_item_to_string(ctx, 1, &item)?;
                Ok(Type::array(Type::string()))
            }),
        ),
        (
            "suffix",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 2, 2)?;
                coerce_arg(ctx, 0, &Type::string())?;
                let item = array_item(ctx, 1)?;
                coerce_item_to_string(ctx, 1, &item)?;
                Ok(Type::array(Type::string()))
            }),
        ),
        (
            "quote",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let item = array_item(ctx, 0)?;
                coerce_item_to_string(ctx, 0, &item)?;
                Ok(Type::array(Type::string()))
            }),
        ),
        (
            "squote",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let item = array_item(ctx, 0)?;
                coerce_item_to_string(ctx, 0, &item)?;
                Ok(Type::array(Type::string()))
            }),
        ),
        (
            "sep",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 2, 2)?;
                coerce_arg(ctx, 0, &Type::string())?;
                let item = array_item(ctx, 1)?;
                coerce_item_to_string(ctx, 1, &item)?;
                Ok(Type::string())
            }),
        ),
        (
            "zip",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 2, 2)?;
                let left = array_item(ctx, 0)?;
                let right = array_item(ctx, 1)?;
                Ok(Type::array(Type::pair(left, right)))
            }),
        ),
        (
            "cross",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 2, 2)?;
                let left = array_item(ctx, 0)?;
                let right = array_item(ctx, 1)?;
                Ok(Type::array(Type::pair(left, right)))
            }),
        ),
        (
            "unzip",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                match array_item(ctx, 0)? {
                    Type::Pair { left, right, .. } => {
                        Ok(Type::pair(Type::array(*left), Type::array(*right)))
                    }
                    Type::Any { .. } => {
                        Ok(Type::pair(Type::array(Type::any()), Type::array(Type::any())))
                    }
                    ty => Err(incompatible_operand(
                        format!("`unzip` expects an array of pairs, but found `Array[{ty}]`"),
                        &ctx.args[0].pos,
                    )),
                }
            }),
        ),
        (
            "transpose",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                let outer = array_item(ctx, 0)?;
                match outer {
                    Type::Array { .. } | Type::Any { .. } => Ok(ctx.args[0].ty.clone()),
                    ty => Err(not_an_array(&ty, &ctx.args[0].pos)),
                }
            }),
        ),
        (
            "keys",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                match &ctx.args[0].ty {
                    Type::Map { key, .. } => Ok(Type::array((**key).clone())),
                    ty => Err(incompatible_operand(
                        format!("`keys` expects a map, but found `{ty}`"),
                        &ctx.args[0].pos,
                    )),
                }
            }),
        ),
        (
            "as_map",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                match array_item(ctx, 0)? {
                    Type::Pair { left, right, .. } => Ok(Type::map(*left, *right)),
                    Type::Any { .. } => Ok(Type::map(Type::any(), Type::any())),
                    ty => Err(incompatible_operand(
                        format!("`as_map` expects an array of pairs, but found `Array[{ty}]`"),
                        &ctx.args[0].pos,
                    )),
                }
            }),
        ),
        (
            "as_pairs",
            entry(WdlVersion::OneOne, |ctx| {
                expect_arity(ctx, 1, 1)?;
                match &ctx.args[0].ty {
                    Type::Map { key, value, .. } => {
                        Ok(Type::array(Type::pair((**key).clone(), (**value).clone())))
                    }
                    ty => Err(incompatible_operand(
                        format!("`as_pairs` expects a map, but found `{ty}`"),
                        &ctx.args[0].pos,
                    )),
                }
            }),
        ),
        (
            "read_lines",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::array(Type::string()))])
            }),
        ),
        (
            "read_tsv",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[(&[Type::file()], Type::array(Type::array(Type::string())))],
                )
            }),
        ),
        (
            "read_map",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[(&[Type::file()], Type::map(Type::string(), Type::string()))],
                )
            }),
        ),
        (
            "read_json",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::any())])
            }),
        ),
        (
            "read_string",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::string())])
            }),
        ),
        (
            "read_int",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::int())])
            }),
        ),
        (
            "read_float",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::float())])
            }),
        ),
        (
            "read_boolean",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::file()], Type::boolean())])
            }),
        ),
        (
            "write_lines",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(ctx, &[(&[Type::array(Type::string())], Type::file())])
            }),
        ),
        (
            "write_tsv",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[(&[Type::array(Type::array(Type::string()))], Type::file())],
                )
            }),
        ),
        (
            "write_map",
            entry(WdlVersion::DraftTwo, |ctx| {
                dispatch(
                    ctx,
                    &[(&[Type::map(Type::string(), Type::string())], Type::file())],
                )
            }),
        ),
        (
            "write_json",
            entry(WdlVersion::DraftTwo, |ctx| {
                expect_arity(ctx, 1, 1)?;
                Ok(Type::file())
            }),
        ),
    ])
});

/// Requires an array item type to be coercible to `String`.
fn coerce_item_to_string(
    context: &InferContext<'_>,
    index: usize,
    item: &Type,
) -> Result<(), Diagnostic> {
    if !item.coerces(&Type::string(), context.check_quant) {
        return Err(incompatible_operand(
            format!(
                "items of argument {n} of function `{name}` must be coercible to `String`, but \
                 found `{item}`",
                n = index + 1,
                name = context.name,
            ),
            &context.args[index].pos,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use sluice_syntax::SourcePosition;

    use super::*;

    /// Builds an inference context over the given argument types.
    fn args(types: &[Type]) -> Vec<TypedArg> {
        types
            .iter()
            .map(|ty| TypedArg {
                ty: ty.clone(),
                pos: SourcePosition::unknown(),
            })
            .collect()
    }

    /// Infers an application of `name` over the argument types.
    fn infer(name: &str, types: &[Type]) -> Result<Type, Diagnostic> {
        let pos = SourcePosition::unknown();
        let args = args(types);
        function(name)
            .expect("function should exist")
            .infer(&InferContext {
                name,
                args: &args,
                pos: &pos,
                check_quant: true,
            })
    }

    #[test]
    fn arithmetic_overloads() {
        assert_eq!(infer("min", &[Type::int(), Type::int()]).unwrap(), Type::int());
        assert_eq!(
            infer("max", &[Type::int(), Type::float()]).unwrap(),
            Type::float()
        );

        let err = infer("min", &[Type::int(), Type::boolean()]).unwrap_err();
        assert_eq!(err.kind(), "IncompatibleOperand");
    }

    #[test]
    fn generic_arrays() {
        assert_eq!(
            infer("length", &[Type::array(Type::file())]).unwrap(),
            Type::int()
        );
        assert_eq!(
            infer(
                "select_first",
                &[Type::array(Type::int().with_optional(true))]
            )
            .unwrap(),
            Type::int()
        );
        assert_eq!(
            infer(
                "zip",
                &[Type::array(Type::int()), Type::array(Type::string())]
            )
            .unwrap(),
            Type::array(Type::pair(Type::int(), Type::string()))
        );

        let err = infer("length", &[Type::int()]).unwrap_err();
        assert_eq!(err.kind(), "NotAnArray");
    }

    #[test]
    fn size_operand_shapes() {
        // Files, paths, optional files, and arrays of them are accepted
        assert_eq!(infer("size", &[Type::file()]).unwrap(), Type::float());
        assert_eq!(infer("size", &[Type::string()]).unwrap(), Type::float());
        assert_eq!(
            infer("size", &[Type::file().with_optional(true)]).unwrap(),
            Type::float()
        );
        assert_eq!(
            infer("size", &[Type::array(Type::file()), Type::string()]).unwrap(),
            Type::float()
        );

        // Non-file operands are rejected, scalar or array
        assert_eq!(
            infer("size", &[Type::int()]).unwrap_err().kind(),
            "StaticTypeMismatch"
        );
        assert_eq!(
            infer("size", &[Type::array(Type::int())]).unwrap_err().kind(),
            "StaticTypeMismatch"
        );

        // A second file is not a unit, even though File coerces to String
        assert_eq!(
            infer("size", &[Type::file(), Type::file()]).unwrap_err().kind(),
            "StaticTypeMismatch"
        );
        assert_eq!(
            infer("size", &[Type::file(), Type::array(Type::file())])
                .unwrap_err()
                .kind(),
            "StaticTypeMismatch"
        );
    }

    #[test]
    fn string_coercion_in_signatures() {
        // A File argument satisfies a String parameter
        assert_eq!(
            infer("sub", &[Type::file(), Type::string(), Type::string()]).unwrap(),
            Type::string()
        );
        // A String argument satisfies a File parameter
        assert_eq!(
            infer("read_lines", &[Type::string()]).unwrap(),
            Type::array(Type::string())
        );
    }

    #[test]
    fn version_gating() {
        assert_eq!(function("keys").unwrap().min_version(), WdlVersion::OneOne);
        assert_eq!(
            function("range").unwrap().min_version(),
            WdlVersion::DraftTwo
        );
        assert!(function("nonexistent").is_none());
    }
}
