//! Definition of source positions and diagnostics displayed to users.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Represents a half-open span of source text in byte offsets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    /// The start of the span.
    start: usize,
    /// The end of the span.
    end: usize,
}

impl Span {
    /// Creates a new span from the given start and length.
    pub const fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// Gets the start of the span.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Gets the noninclusive end of the span.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Gets the length of the span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Determines if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{start}..{end}", start = self.start, end = self.end)
    }
}

impl From<logos::Span> for Span {
    fn from(value: logos::Span) -> Self {
        Self::new(value.start, value.len())
    }
}

/// Represents the position of a syntax element within a source document.
///
/// Lines and columns are 1-based; the end position is inclusive of the last
/// line and exclusive of the end column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    /// The URI of the document as it was requested (possibly relative).
    uri: Arc<str>,
    /// The absolute form of the document's URI or path.
    abspath: Arc<str>,
    /// The starting line.
    line: u32,
    /// The starting column.
    column: u32,
    /// The ending line.
    end_line: u32,
    /// The ending column.
    end_column: u32,
}

impl SourcePosition {
    /// Creates a new source position.
    pub fn new(
        uri: Arc<str>,
        abspath: Arc<str>,
        line: u32,
        column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        Self {
            uri,
            abspath,
            line,
            column,
            end_line,
            end_column,
        }
    }

    /// Creates a position that refers to no particular source location.
    ///
    /// Used for values synthesized by the engine rather than parsed from a
    /// document.
    pub fn unknown() -> Self {
        Self::new("".into(), "".into(), 0, 0, 0, 0)
    }

    /// Gets the URI of the document containing the position.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Gets the absolute path of the document containing the position.
    pub fn abspath(&self) -> &str {
        &self.abspath
    }

    /// Gets the starting line (1-based).
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Gets the starting column (1-based).
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Gets the ending line (1-based).
    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    /// Gets the ending column (1-based, exclusive).
    pub fn end_column(&self) -> u32 {
        self.end_column
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            return write!(f, "(unknown)");
        }

        write!(
            f,
            "{uri}:{line}:{column}",
            uri = self.uri,
            line = self.line,
            column = self.column
        )
    }
}

impl PartialOrd for SourcePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourcePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (&*self.abspath, self.line, self.column).cmp(&(
            &*other.abspath,
            other.line,
            other.column,
        ))
    }
}

/// Represents the severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum Severity {
    /// The diagnostic is displayed as an error.
    Error,
    /// The diagnostic is displayed as a warning.
    Warning,
    /// The diagnostic is displayed as a note.
    Note,
}

/// Represents a label attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// The message of the label.
    message: String,
    /// The position the label refers to.
    pos: SourcePosition,
}

impl Label {
    /// Creates a new label with the given message and position.
    pub fn new(message: impl Into<String>, pos: SourcePosition) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }

    /// Gets the message of the label.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the position of the label.
    pub fn pos(&self) -> &SourcePosition {
        &self.pos
    }
}

/// Represents a diagnostic to display to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    severity: Severity,
    /// The classification of the diagnostic (e.g. `SyntaxError`).
    kind: &'static str,
    /// The diagnostic message.
    message: String,
    /// The labels of the diagnostic; the first label is primary.
    labels: Vec<Label>,
}

impl Diagnostic {
    /// Creates a new error diagnostic of the given kind.
    pub fn error(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// Creates a new warning diagnostic of the given kind.
    pub fn warning(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// Adds a highlight of the given position without a message.
    pub fn with_highlight(self, pos: SourcePosition) -> Self {
        self.with_label("", pos)
    }

    /// Adds a label to the diagnostic.
    pub fn with_label(mut self, message: impl Into<String>, pos: SourcePosition) -> Self {
        self.labels.push(Label::new(message, pos));
        self
    }

    /// Gets the severity of the diagnostic.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Gets the classification of the diagnostic.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Gets the message of the diagnostic.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the labels of the diagnostic.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Gets the primary position of the diagnostic, if one was attached.
    pub fn pos(&self) -> Option<&SourcePosition> {
        self.labels.first().map(Label::pos)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind}: {message}", kind = self.kind, message = self.message)?;
        if let Some(pos) = self.pos() {
            write!(f, " at {pos}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// A collection of diagnostics produced by a static pass.
///
/// Static passes accumulate as many diagnostics as they can before failing;
/// the collection is non-empty whenever it is returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// The accumulated diagnostics.
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection holding a single diagnostic.
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
        }
    }

    /// Adds a diagnostic to the collection.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Appends another collection to this one.
    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Determines if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Gets the number of diagnostics in the collection.
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Iterates over the diagnostics in the collection.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Sorts the diagnostics by source position for stable reporting.
    pub fn sort(&mut self) {
        self.diagnostics
            .sort_by(|a, b| a.pos().cmp(&b.pos()).then_with(|| a.message.cmp(&b.message)));
    }

    /// Converts the collection into an error result.
    ///
    /// Returns `Ok(())` when no error-severity diagnostic was accumulated.
    pub fn into_result(mut self) -> Result<(), Diagnostics> {
        if self.diagnostics.iter().any(|d| d.severity == Severity::Error) {
            self.sort();
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(value: Diagnostic) -> Self {
        Self::single(value)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostics.len() > 1 {
            writeln!(
                f,
                "MultipleValidationErrors: {n} errors",
                n = self.diagnostics.len()
            )?;
        }

        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }

            write!(f, "{diagnostic}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
