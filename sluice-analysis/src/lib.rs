//! Static analysis of Workflow Description Language (WDL) documents.
//!
//! This crate provides the semantic half of the front end: the type
//! lattice, persistent environments, import resolution, and the type
//! checker that assigns a type to every expression of a parsed document.
//!
//! The entry points are [`load_document`] (from disk, resolving imports)
//! and [`analyze_source`] (from memory).

mod check;
pub mod deps;
mod diagnostics;
mod document;
mod env;
mod lint;
pub mod stdlib;
pub mod types;

pub use diagnostics::*;
pub use document::CallTypes;
pub use document::Document;
pub use document::Signature;
pub use document::analyze_source;
pub use document::load_document;
pub use env::Binding;
pub use env::Bindings;
pub use lint::LintRule;
pub use lint::Linter;

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use sluice_syntax::Diagnostics;

    use crate::analyze_source;
    use crate::types::Type;

    /// Analyzes a source string with strict quantifier checking.
    fn analyze(source: &str) -> Result<std::sync::Arc<crate::Document>, Diagnostics> {
        analyze_source(source, "test.wdl", "/test.wdl", true)
    }

    /// Gets the kind of the first diagnostic of an analysis failure.
    fn first_error_kind(source: &str) -> &'static str {
        let errors = analyze(source).expect_err("analysis should fail");
        let kind = errors.iter().next().expect("should have an error").kind();
        kind
    }

    #[test]
    fn arithmetic_types() {
        let doc = analyze("version 1.0\nworkflow w { Int x = 1 + 6 / 3 * 4 }").unwrap();
        let workflow = doc.workflow().unwrap();
        let sluice_syntax::ast::WorkflowElement::Decl(decl) = &workflow.body[0] else {
            panic!("expected a declaration");
        };
        assert_eq!(
            doc.type_of(decl.expr.as_ref().unwrap().id),
            &Type::int()
        );
    }

    #[test]
    fn incompatible_function_operands() {
        assert_eq!(
            first_error_kind("version 1.1\nworkflow w { Int x = min(max(0, 1), true) }"),
            "IncompatibleOperand"
        );
    }

    #[test]
    fn strict_quantifier_checking() {
        let source = "version 1.0\nworkflow w {\n  Int? x = 0\n  Int y = x\n}";
        assert_eq!(first_error_kind(source), "StaticTypeMismatch");

        // The relaxation permits the optional mismatch
        analyze_source(source, "test.wdl", "/test.wdl", false)
            .expect("analysis should succeed with check_quant disabled");
    }

    #[test]
    fn unknown_identifier() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w { Int x = nope }"),
            "UnknownIdentifier"
        );
    }

    #[test]
    fn no_such_function() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w { Int x = nonsense(1) }"),
            "NoSuchFunction"
        );

        // `keys` exists only in 1.1+
        assert_eq!(
            first_error_kind(
                "version 1.0\nworkflow w { Array[String] x = keys({'a': 1}) }"
            ),
            "NoSuchFunction"
        );
    }

    #[test]
    fn multiple_definitions() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w {\n  Int x = 1\n  Int x = 2\n}"),
            "MultipleDefinitions"
        );
    }

    #[test]
    fn circular_dependencies() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w {\n  Int x = y\n  Int y = x\n}"),
            "CircularDependencies"
        );
    }

    #[test]
    fn forward_references_are_ordered() {
        analyze("version 1.0\nworkflow w {\n  Int y = x + 1\n  Int x = 1\n}")
            .expect("forward reference should be accepted");
    }

    #[test]
    fn scatter_promotes_to_array() {
        let doc = analyze(
            "version 1.0\nworkflow w {\n  input { Int n }\n  scatter (i in range(n)) { Int sq = \
             i * i }\n  output { Array[Int] sqs = sq }\n}",
        )
        .unwrap();

        let signature = doc.workflow_signature().unwrap();
        assert_eq!(
            signature.outputs.get("sqs"),
            Some(&Type::array(Type::int()))
        );
    }

    #[test]
    fn conditional_promotes_to_optional() {
        let doc = analyze(
            "version 1.0\nworkflow w {\n  if (true) { Int a = 1 }\n  if (false) { Int b = 2 }\n  \
             output { Array[Int] vals = select_all([a, b]) }\n}",
        )
        .unwrap();

        let signature = doc.workflow_signature().unwrap();
        assert_eq!(
            signature.outputs.get("vals"),
            Some(&Type::array(Type::int()))
        );
    }

    #[test]
    fn conditional_requires_boolean() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w { if (1) { Int a = 1 } }"),
            "StaticTypeMismatch"
        );
    }

    #[test]
    fn scatter_requires_array() {
        assert_eq!(
            first_error_kind("version 1.0\nworkflow w { scatter (i in 5) { Int x = i } }"),
            "NotAnArray"
        );
    }

    #[test]
    fn task_signatures() {
        let doc = analyze(
            "version 1.0\ntask t {\n  input {\n    Int n\n    String tag = \"x\"\n    File? \
             extra\n  }\n  command <<< echo ~{n} >>>\n  output { String out = read_string(stdout()) \
             }\n}",
        )
        .unwrap();

        let signature = doc.task_signature("t").unwrap();
        assert_eq!(signature.required, ["n"]);
        assert_eq!(signature.inputs.len(), 3);
        assert_eq!(signature.outputs.get("out"), Some(&Type::string()));
    }

    #[test]
    fn calls_and_uncallable_workflows() {
        let doc = analyze(
            "version 1.0\ntask t {\n  input { Int n }\n  command <<< >>>\n  output { Int out = n \
             }\n}\nworkflow w {\n  call t\n  output { Int x = t.out }\n}",
        )
        .unwrap();

        // The call is legal but incomplete, so `w` is uncallable
        assert!(doc.workflow_uncallable());

        let doc = analyze(
            "version 1.0\ntask t {\n  input { Int n }\n  command <<< >>>\n  output { Int out = n \
             }\n}\nworkflow w {\n  call t { input: n = 1 }\n  output { Int x = t.out }\n}",
        )
        .unwrap();
        assert!(!doc.workflow_uncallable());
    }

    #[test]
    fn call_input_errors() {
        assert_eq!(
            first_error_kind(
                "version 1.0\ntask t {\n  input { Int n }\n  command <<< >>>\n}\nworkflow w {\n  \
                 call t { input: bogus = 1 }\n}"
            ),
            "NoSuchInput"
        );

        assert_eq!(
            first_error_kind(
                "version 1.0\ntask t {\n  input { Int n }\n  command <<< >>>\n}\nworkflow w {\n  \
                 call t { input: n = \"str\" }\n}"
            ),
            "StaticTypeMismatch"
        );
    }

    #[test]
    fn struct_cycles_rejected() {
        assert_eq!(
            first_error_kind("version 1.0\nstruct A { A again }"),
            "CircularDependencies"
        );
        assert_eq!(
            first_error_kind("version 1.0\nstruct A { B b }\nstruct B { A a }"),
            "CircularDependencies"
        );
    }

    #[test]
    fn struct_member_access() {
        let doc = analyze(
            "version 1.0\nstruct Sample { String name\n Int count }\nworkflow w {\n  input { \
             Sample s }\n  output { String n = s.name }\n}",
        )
        .unwrap();

        assert_eq!(
            doc.workflow_signature().unwrap().outputs.get("n"),
            Some(&Type::string())
        );
    }

    #[test]
    fn no_such_member() {
        assert_eq!(
            first_error_kind(
                "version 1.0\nstruct Sample { String name }\nworkflow w {\n  input { Sample s \
                 }\n  output { String n = s.nope }\n}"
            ),
            "NoSuchMember"
        );
    }

    #[test]
    fn imports_resolve_and_cycles_fail() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib.wdl");
        std::fs::write(
            &lib,
            "version 1.0\ntask inc {\n  input { Int n }\n  command <<< >>>\n  output { Int out = \
             n + 1 }\n}",
        )
        .unwrap();

        let main = dir.path().join("main.wdl");
        std::fs::write(
            &main,
            "version 1.0\nimport \"lib.wdl\"\nworkflow w {\n  call lib.inc { input: n = 1 }\n  \
             output { Int out = inc.out }\n}",
        )
        .unwrap();

        let doc = crate::load_document(main.to_str().unwrap(), true).unwrap();
        assert_eq!(
            doc.workflow_signature().unwrap().outputs.get("out"),
            Some(&Type::int())
        );

        // A pair of mutually-importing documents is rejected
        let a = dir.path().join("a.wdl");
        let b = dir.path().join("b.wdl");
        std::fs::write(&a, "version 1.0\nimport \"b.wdl\"").unwrap();
        std::fs::write(&b, "version 1.0\nimport \"a.wdl\"").unwrap();
        let errors = crate::load_document(a.to_str().unwrap(), true).unwrap_err();
        assert!(errors.iter().any(|d| d.kind() == "CircularDependencies"));
    }

    #[test]
    fn multiple_errors_accumulate() {
        let errors = analyze(
            "version 1.0\nworkflow w {\n  Int x = nope\n  Int y = alsonope\n}",
        )
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn empty_array_unifies() {
        analyze(
            "version 1.0\nworkflow w {\n  Array[File] files = []\n  Array[Int] ints = [1, 2]\n}",
        )
        .expect("empty array literal should coerce to any array type");
    }

    #[test]
    fn nonempty_quantifier() {
        // A possibly-empty array does not satisfy Array[T]+
        assert_eq!(
            first_error_kind(
                "version 1.0\nworkflow w {\n  input { Array[Int] xs }\n  Array[Int]+ ys = xs\n}"
            ),
            "StaticTypeMismatch"
        );

        // ... but a nonempty literal does
        analyze("version 1.0\nworkflow w { Array[Int]+ ys = [1] }")
            .expect("nonempty literal should satisfy Array[Int]+");
    }
}
