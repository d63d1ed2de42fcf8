//! Constructors for the diagnostics produced by static analysis.

use sluice_syntax::Diagnostic;
use sluice_syntax::SourcePosition;

use crate::types::Type;

/// Creates an "unknown identifier" diagnostic.
pub fn unknown_identifier(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error("UnknownIdentifier", format!("unknown identifier `{name}`"))
        .with_highlight(pos.clone())
}

/// Creates an "unknown namespace" diagnostic.
pub fn unknown_namespace(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "UnknownIdentifier",
        format!("unknown import namespace `{name}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "no such task or workflow" diagnostic for a call target.
pub fn unknown_call_target(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "UnknownIdentifier",
        format!("no task or workflow named `{name}` is available to call"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "no such function" diagnostic.
pub fn no_such_function(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error("NoSuchFunction", format!("no such function `{name}`"))
        .with_highlight(pos.clone())
}

/// Creates a "no such member" diagnostic.
pub fn no_such_member(ty: &Type, member: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "NoSuchMember",
        format!("type `{ty}` has no member named `{member}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "not an array" diagnostic.
pub fn not_an_array(ty: &Type, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "NotAnArray",
        format!("expected an array, but found type `{ty}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "no such input" diagnostic for a call binding.
pub fn no_such_input(target: &str, input: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "NoSuchInput",
        format!("`{target}` has no input named `{input}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "static type mismatch" diagnostic.
pub fn static_type_mismatch(expected: &Type, actual: &Type, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "StaticTypeMismatch",
        format!("expected type `{expected}`, but found type `{actual}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates an "incompatible operand" diagnostic.
pub fn incompatible_operand(message: impl Into<String>, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error("IncompatibleOperand", message).with_highlight(pos.clone())
}

/// Creates an "indeterminate type" diagnostic.
pub fn indeterminate_type(message: impl Into<String>, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error("IndeterminateType", message).with_highlight(pos.clone())
}

/// Creates an "invalid type" diagnostic.
pub fn invalid_type(message: impl Into<String>, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error("InvalidType", message).with_highlight(pos.clone())
}

/// Creates a "multiple definitions" diagnostic.
pub fn multiple_definitions(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "MultipleDefinitions",
        format!("multiple definitions of `{name}` in the same scope"),
    )
    .with_highlight(pos.clone())
}

/// Creates a "circular dependencies" diagnostic.
pub fn circular_dependencies(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "CircularDependencies",
        format!("circular dependencies involving `{name}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates an "uncallable workflow" diagnostic.
pub fn uncallable_workflow(name: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "UncallableWorkflow",
        format!(
            "workflow `{name}` is not callable because one of its calls is missing required \
             inputs"
        ),
    )
    .with_highlight(pos.clone())
}

/// Creates a "circular import" diagnostic.
pub fn circular_import(uri: &str, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "CircularDependencies",
        format!("circular import of `{uri}`"),
    )
    .with_highlight(pos.clone())
}

/// Creates an "import failure" diagnostic.
pub fn import_failed(uri: &str, reason: impl std::fmt::Display, pos: &SourcePosition) -> Diagnostic {
    Diagnostic::error(
        "SyntaxError",
        format!("failed to import `{uri}`: {reason}"),
    )
    .with_highlight(pos.clone())
}
