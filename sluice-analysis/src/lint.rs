//! The lint framework.
//!
//! Lint rules are user-supplied checks producing warning diagnostics over a
//! checked document. This module provides the registration and invocation
//! machinery only; rules themselves live with the embedding application.

use sluice_syntax::Diagnostics;

use crate::document::Document;

/// A lint rule over a checked document.
pub trait LintRule: Send + Sync {
    /// Gets the stable identifier of the rule (e.g. `snake_case`).
    fn id(&self) -> &'static str;

    /// Gets a one-line description of what the rule reports.
    fn description(&self) -> &'static str;

    /// Checks the document, pushing warning diagnostics for findings.
    fn check(&self, document: &Document, diagnostics: &mut Diagnostics);
}

/// An ordered registry of lint rules.
#[derive(Default)]
pub struct Linter {
    /// The registered rules, in registration order.
    rules: Vec<Box<dyn LintRule>>,
}

impl Linter {
    /// Creates an empty linter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule.
    ///
    /// A rule with an id already registered replaces the earlier one.
    pub fn register(&mut self, rule: Box<dyn LintRule>) {
        self.rules.retain(|r| r.id() != rule.id());
        self.rules.push(rule);
    }

    /// Iterates the registered rules.
    pub fn rules(&self) -> impl Iterator<Item = &dyn LintRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Runs every registered rule over a document and its imports,
    /// returning the accumulated warnings.
    pub fn lint(&self, document: &Document) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        self.lint_into(document, &mut diagnostics);
        diagnostics.sort();
        diagnostics
    }

    /// Lints one document (and recursively its imports) into a collection.
    fn lint_into(&self, document: &Document, diagnostics: &mut Diagnostics) {
        for rule in &self.rules {
            rule.check(document, diagnostics);
        }

        for (_, imported) in document.imports() {
            self.lint_into(imported, diagnostics);
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use sluice_syntax::Diagnostic;

    use super::*;
    use crate::analyze_source;

    /// A rule flagging tasks without a `runtime` section.
    struct MissingRuntime;

    impl LintRule for MissingRuntime {
        fn id(&self) -> &'static str {
            "missing_runtime"
        }

        fn description(&self) -> &'static str {
            "tasks should declare a runtime section"
        }

        fn check(&self, document: &Document, diagnostics: &mut Diagnostics) {
            for task in &document.ast().tasks {
                if task.runtime.is_empty() {
                    diagnostics.push(
                        Diagnostic::warning(
                            "Lint",
                            format!(
                                "task `{name}` has no runtime section",
                                name = task.name
                            ),
                        )
                        .with_highlight(task.pos.clone()),
                    );
                }
            }
        }
    }

    #[test]
    fn rules_run_and_report() {
        let document = analyze_source(
            "version 1.0\ntask bare {\n  command <<< >>>\n}\ntask pinned {\n  command <<< >>>\n  \
             runtime { docker: \"ubuntu:24.04\" }\n}",
            "test.wdl",
            "/test.wdl",
            true,
        )
        .unwrap();

        let mut linter = Linter::new();
        linter.register(Box::new(MissingRuntime));

        let warnings = linter.lint(&document);
        assert_eq!(warnings.len(), 1);
        let warning = warnings.iter().next().unwrap();
        assert!(warning.message().contains("`bare`"));

        // Warnings do not fail the result
        assert!(warnings.into_result().is_ok());
    }

    #[test]
    fn reregistration_replaces() {
        let mut linter = Linter::new();
        linter.register(Box::new(MissingRuntime));
        linter.register(Box::new(MissingRuntime));
        assert_eq!(linter.rules().count(), 1);
    }
}
