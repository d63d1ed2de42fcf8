//! Lexing, parsing, and syntax trees for Workflow Description Language (WDL)
//! documents.
//!
//! The entry point is [`parse_document`], which selects a grammar from the
//! document's `version` statement and produces an untyped [`ast::Document`]
//! annotated with source positions.

pub mod ast;
mod diagnostic;
pub mod lexer;
mod parser;
mod version;

pub use diagnostic::Diagnostic;
pub use diagnostic::Diagnostics;
pub use diagnostic::Label;
pub use diagnostic::Severity;
pub use diagnostic::SourcePosition;
pub use diagnostic::Span;
pub use parser::parse_document;
pub use version::WdlVersion;

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::ast::*;
    use crate::parse_document;
    use crate::WdlVersion;

    /// Parses a document, panicking on syntax errors.
    fn parse(source: &str) -> Document {
        parse_document(source, "test.wdl", "/test.wdl").expect("document should parse")
    }

    #[test]
    fn version_selection() {
        assert_eq!(parse("version 1.0").version, WdlVersion::One);
        assert_eq!(parse("version 1.1").version, WdlVersion::OneOne);
        assert_eq!(parse("version development").version, WdlVersion::Development);
        assert_eq!(parse("# a comment\nversion 1.1").version, WdlVersion::OneOne);
        assert_eq!(parse("").version, WdlVersion::DraftTwo);

        let err = parse_document("version 2.5", "test.wdl", "/test.wdl").unwrap_err();
        assert_eq!(err.message(), "unsupported WDL version `2.5`");
    }

    #[test]
    fn operator_precedence() {
        let doc = parse("version 1.0\nworkflow w { Int x = 1 + 6 / 3 * 4 }");
        let workflow = doc.workflow.expect("document should have a workflow");
        let WorkflowElement::Decl(decl) = &workflow.body[0] else {
            panic!("expected a declaration");
        };

        // 1 + ((6 / 3) * 4)
        let ExprKind::Binary(BinaryOp::Add, lhs, rhs) =
            &decl.expr.as_ref().expect("decl should be bound").kind
        else {
            panic!("expected an addition at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Int(1)));
        let ExprKind::Binary(BinaryOp::Multiply, div, four) = &rhs.kind else {
            panic!("expected a multiplication on the right");
        };
        assert!(matches!(four.kind, ExprKind::Int(4)));
        assert!(matches!(
            div.kind,
            ExprKind::Binary(BinaryOp::Divide, _, _)
        ));
    }

    #[test]
    fn string_placeholders() {
        let doc = parse(r#"version 1.0
workflow w {
  Float pi = 3.14159
  String s = "pi = ~{pi}!"
}"#);
        let workflow = doc.workflow.unwrap();
        let WorkflowElement::Decl(decl) = &workflow.body[1] else {
            panic!("expected a declaration");
        };
        let ExprKind::String(parts) = &decl.expr.as_ref().unwrap().kind else {
            panic!("expected a string literal");
        };

        assert_eq!(parts.len(), 3);
        assert!(
            matches!(&parts[0], StringPart::Literal { text, .. } if text == "pi = ")
        );
        assert!(matches!(&parts[1], StringPart::Placeholder(_)));
        assert!(matches!(&parts[2], StringPart::Literal { text, .. } if text == "!"));
    }

    #[test]
    fn tilde_placeholders_are_version_gated() {
        // In draft-2, `~{` has no meaning inside a string
        let doc = parse(r#"workflow w { String s = "a~{b}c" }"#);
        let workflow = doc.workflow.unwrap();
        let WorkflowElement::Decl(decl) = &workflow.body[0] else {
            panic!("expected a declaration");
        };
        let ExprKind::String(parts) = &decl.expr.as_ref().unwrap().kind else {
            panic!("expected a string literal");
        };
        assert_eq!(parts.len(), 1);
        assert!(
            matches!(&parts[0], StringPart::Literal { text, .. } if text == "a~{b}c")
        );
    }

    #[test]
    fn placeholder_options() {
        let doc = parse(r#"version 1.0
task t {
  input { Array[Int] xs }
  command <<<
    echo ~{sep=', ' xs}
  >>>
}"#);
        let task = &doc.tasks[0];
        let placeholder = task
            .command
            .parts
            .iter()
            .find_map(|p| match p {
                StringPart::Placeholder(p) => Some(p),
                _ => None,
            })
            .expect("command should contain a placeholder");

        assert_eq!(placeholder.options.sep.as_deref(), Some(", "));
        assert!(matches!(&placeholder.expr.kind, ExprKind::Ident(n) if n == "xs"));
    }

    #[test]
    fn heredoc_ignores_dollar_placeholders() {
        let doc = parse("version 1.0\ntask t { command <<< echo ${HOME} >>> }");
        let task = &doc.tasks[0];
        assert!(task.command.heredoc);
        assert_eq!(task.command.parts.len(), 1);
        assert!(matches!(
            &task.command.parts[0],
            StringPart::Literal { text, .. } if text.contains("${HOME}")
        ));
    }

    #[test]
    fn curly_command_placeholders() {
        let doc = parse("task t { command { echo ${x} } }");
        let task = &doc.tasks[0];
        assert!(!task.command.heredoc);
        assert!(task
            .command
            .parts
            .iter()
            .any(|p| matches!(p, StringPart::Placeholder(_))));
    }

    #[test]
    fn invalid_escape_is_rejected() {
        let err = parse_document(
            r#"version 1.0
workflow w { String s = "a\qb" }"#,
            "test.wdl",
            "/test.wdl",
        )
        .unwrap_err();
        assert_eq!(err.message(), "invalid escape sequence `\\q`");
    }

    #[test]
    fn escapes() {
        let doc = parse(r#"version 1.0
workflow w { String s = "a\tb\x41B\101" }"#);
        let workflow = doc.workflow.unwrap();
        let WorkflowElement::Decl(decl) = &workflow.body[0] else {
            panic!("expected a declaration");
        };
        let ExprKind::String(parts) = &decl.expr.as_ref().unwrap().kind else {
            panic!("expected a string literal");
        };
        assert!(
            matches!(&parts[0], StringPart::Literal { text, .. } if text == "a\tbABA")
        );
    }

    #[test]
    fn calls_scatters_conditionals() {
        let doc = parse(
            r#"version 1.1
workflow w {
  input { Int n }
  scatter (i in range(n)) {
    call lib.align as a after setup { input: index = i, n }
  }
  if (n > 1) {
    Int big = n * 2
  }
  output { Array[Int] out = a.result }
}"#,
        );
        let workflow = doc.workflow.unwrap();
        assert_eq!(workflow.body.len(), 2);

        let WorkflowElement::Scatter(scatter) = &workflow.body[0] else {
            panic!("expected a scatter");
        };
        assert_eq!(scatter.variable, "i");
        let WorkflowElement::Call(call) = &scatter.body[0] else {
            panic!("expected a call");
        };
        assert_eq!(call.target, ["lib", "align"]);
        assert_eq!(call.alias.as_deref(), Some("a"));
        assert_eq!(call.name(), "a");
        assert_eq!(call.afters, ["setup"]);
        assert_eq!(call.inputs.len(), 2);
        assert_eq!(call.inputs[1].0, "n");

        let WorkflowElement::Conditional(conditional) = &workflow.body[1] else {
            panic!("expected a conditional");
        };
        assert!(matches!(
            conditional.expr.kind,
            ExprKind::Binary(BinaryOp::Greater, _, _)
        ));

        assert_eq!(workflow.outputs.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn types() {
        let doc = parse(
            "version 1.0\nworkflow w { input { Array[Map[String, Int]]+ m\n Int? x\n Ref r } }",
        );
        let workflow = doc.workflow.unwrap();
        let inputs = workflow.inputs.as_ref().unwrap();

        let m = &inputs[0];
        assert!(m.ty.nonempty);
        assert!(!m.ty.optional);
        assert!(matches!(&m.ty.kind, TypeExprKind::Array(_)));

        let x = &inputs[1];
        assert!(x.ty.optional);
        assert!(matches!(x.ty.kind, TypeExprKind::Int));

        let r = &inputs[2];
        assert!(matches!(&r.ty.kind, TypeExprKind::Named(n) if n == "Ref"));
    }

    #[test]
    fn struct_definitions_and_imports() {
        let doc = parse(
            r#"version 1.0
import "lib/tools.wdl" as tools alias Sample as LibSample
struct Sample {
  String name
  Array[File] reads
}"#,
        );
        assert_eq!(doc.imports.len(), 1);
        assert_eq!(doc.imports[0].uri, "lib/tools.wdl");
        assert_eq!(doc.imports[0].effective_namespace(), "tools");
        assert_eq!(
            doc.imports[0].aliases,
            [("Sample".to_string(), "LibSample".to_string())]
        );

        assert_eq!(doc.structs.len(), 1);
        assert_eq!(doc.structs[0].name, "Sample");
        assert_eq!(doc.structs[0].members.len(), 2);
    }

    #[test]
    fn default_namespace_from_uri() {
        let doc = parse("version 1.0\nimport \"sub/dir/helpers.wdl\"");
        assert_eq!(doc.imports[0].effective_namespace(), "helpers");
    }

    #[test]
    fn nested_string_in_placeholder() {
        let doc = parse(
            r#"version 1.0
workflow w { String s = "~{if false then '~{1}' else 'e'}" }"#,
        );
        let workflow = doc.workflow.unwrap();
        let WorkflowElement::Decl(decl) = &workflow.body[0] else {
            panic!("expected a declaration");
        };
        let ExprKind::String(parts) = &decl.expr.as_ref().unwrap().kind else {
            panic!("expected a string literal");
        };
        assert_eq!(parts.len(), 1);
        let StringPart::Placeholder(p) = &parts[0] else {
            panic!("expected a placeholder");
        };
        assert!(matches!(p.expr.kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn positions_are_one_based() {
        let doc = parse("version 1.0\ntask t { command <<<>>> }");
        assert_eq!(doc.tasks[0].pos.line(), 2);
        assert_eq!(doc.tasks[0].pos.column(), 1);
    }
}
