//! Abstract syntax tree for WDL documents.
//!
//! The tree is untyped; the analysis crate assigns a semantic type to every
//! expression and declaration through the [`NodeId`]s carried by the nodes.
//! Every node records the [`SourcePosition`] it was parsed from.

use std::fmt;

use crate::SourcePosition;
use crate::WdlVersion;

/// Identifies an AST node within a single document.
///
/// Ids are assigned densely by the parser in parse order; analysis results
/// are keyed by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{id}", id = self.0)
    }
}

/// Represents a parsed WDL document.
#[derive(Debug)]
pub struct Document {
    /// The position of the document (its first token).
    pub pos: SourcePosition,
    /// The effective grammar version of the document.
    pub version: WdlVersion,
    /// The import statements of the document.
    pub imports: Vec<Import>,
    /// The struct type definitions of the document.
    pub structs: Vec<StructDef>,
    /// The tasks of the document, in source order.
    pub tasks: Vec<Task>,
    /// The workflow of the document, if present.
    pub workflow: Option<Workflow>,
}

impl Document {
    /// Gets a task of the document by name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Represents an import statement.
#[derive(Debug)]
pub struct Import {
    /// The position of the statement.
    pub pos: SourcePosition,
    /// The URI of the imported document, relative to the importer.
    pub uri: String,
    /// The explicit `as` namespace, if one was written.
    ///
    /// When absent, the namespace is derived from the URI basename.
    pub namespace: Option<String>,
    /// Struct aliases (`alias Original as Renamed`).
    pub aliases: Vec<(String, String)>,
}

impl Import {
    /// Gets the effective namespace of the import.
    ///
    /// This is the explicit alias when present, or the basename of the URI
    /// with any `.wdl` suffix removed.
    pub fn effective_namespace(&self) -> String {
        match &self.namespace {
            Some(ns) => ns.clone(),
            None => {
                let base = self.uri.rsplit('/').next().unwrap_or(&self.uri);
                base.strip_suffix(".wdl").unwrap_or(base).to_string()
            }
        }
    }
}

/// Represents a struct type definition.
#[derive(Debug)]
pub struct StructDef {
    /// The position of the definition.
    pub pos: SourcePosition,
    /// The name of the struct type.
    pub name: String,
    /// The members of the struct, in source order.
    pub members: Vec<(String, TypeExpr)>,
}

/// Represents the syntax of a type annotation.
#[derive(Debug)]
pub struct TypeExpr {
    /// The position of the annotation.
    pub pos: SourcePosition,
    /// The base type.
    pub kind: TypeExprKind,
    /// Whether the `?` quantifier was written.
    pub optional: bool,
    /// Whether the `+` quantifier was written (arrays only).
    pub nonempty: bool,
}

/// Represents the base of a type annotation.
#[derive(Debug)]
pub enum TypeExprKind {
    /// The `Boolean` type.
    Boolean,
    /// The `Int` type.
    Int,
    /// The `Float` type.
    Float,
    /// The `String` type.
    String,
    /// The `File` type.
    File,
    /// The `Directory` type.
    Directory,
    /// The `Object` type.
    Object,
    /// An `Array[T]` type.
    Array(Box<TypeExpr>),
    /// A `Map[K, V]` type.
    Map(Box<TypeExpr>, Box<TypeExpr>),
    /// A `Pair[L, R]` type.
    Pair(Box<TypeExpr>, Box<TypeExpr>),
    /// A named (struct) type.
    Named(String),
}

/// Represents a value declaration.
///
/// Declarations appear as task/workflow inputs, private declarations, and
/// outputs; an input declaration without an expression is unbound.
#[derive(Debug)]
pub struct Decl {
    /// The id of the declaration.
    pub id: NodeId,
    /// The position of the declaration.
    pub pos: SourcePosition,
    /// The declared type.
    pub ty: TypeExpr,
    /// The declared name.
    pub name: String,
    /// The initializer expression, if any.
    pub expr: Option<Expr>,
}

/// Represents a task definition.
#[derive(Debug)]
pub struct Task {
    /// The position of the definition.
    pub pos: SourcePosition,
    /// The name of the task.
    pub name: String,
    /// The declarations of the `input` section.
    ///
    /// `None` when the task has no input section (draft-2 documents, where
    /// every top-level declaration is a potential input).
    pub inputs: Option<Vec<Decl>>,
    /// The private declarations of the task body.
    pub postinputs: Vec<Decl>,
    /// The command template.
    pub command: Command,
    /// The declarations of the `output` section.
    pub outputs: Vec<Decl>,
    /// The `runtime` section entries, in source order.
    pub runtime: Vec<(String, Expr)>,
    /// The `meta` section.
    pub meta: Vec<(String, MetaValue)>,
    /// The `parameter_meta` section.
    pub parameter_meta: Vec<(String, MetaValue)>,
}

/// Represents a task command template.
#[derive(Debug)]
pub struct Command {
    /// The position of the command section.
    pub pos: SourcePosition,
    /// The literal chunks and placeholders of the template.
    pub parts: Vec<StringPart>,
    /// Whether the command was delimited by `<<< >>>`.
    pub heredoc: bool,
}

/// Represents a workflow definition.
#[derive(Debug)]
pub struct Workflow {
    /// The position of the definition.
    pub pos: SourcePosition,
    /// The name of the workflow.
    pub name: String,
    /// The declarations of the `input` section.
    ///
    /// `None` when the workflow has no input section (draft-2).
    pub inputs: Option<Vec<Decl>>,
    /// The body elements, in source order.
    pub body: Vec<WorkflowElement>,
    /// The declarations of the `output` section.
    ///
    /// `None` when the workflow has no output section, in which case every
    /// name in scope at the end of the body is an effective output.
    pub outputs: Option<Vec<Decl>>,
    /// The `meta` section.
    pub meta: Vec<(String, MetaValue)>,
    /// The `parameter_meta` section.
    pub parameter_meta: Vec<(String, MetaValue)>,
}

/// Represents an element of a workflow (or section) body.
#[derive(Debug)]
pub enum WorkflowElement {
    /// A value declaration.
    Decl(Decl),
    /// A call statement.
    Call(Call),
    /// A scatter section.
    Scatter(Scatter),
    /// A conditional section.
    Conditional(Conditional),
}

/// Represents a call statement.
#[derive(Debug)]
pub struct Call {
    /// The id of the call.
    pub id: NodeId,
    /// The position of the statement.
    pub pos: SourcePosition,
    /// The dotted target of the call (e.g. `["lib", "align"]`).
    pub target: Vec<String>,
    /// The explicit `as` alias, if one was written.
    pub alias: Option<String>,
    /// The bound inputs of the call.
    pub inputs: Vec<(String, Expr)>,
    /// The names of `after` dependencies (1.1+).
    pub afters: Vec<String>,
}

impl Call {
    /// Gets the name the call binds in its enclosing scope.
    pub fn name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.target.last().expect("call target is never empty"),
        }
    }
}

/// Represents a scatter section.
#[derive(Debug)]
pub struct Scatter {
    /// The id of the section.
    pub id: NodeId,
    /// The position of the section.
    pub pos: SourcePosition,
    /// The name of the iteration variable.
    pub variable: String,
    /// The iteratee expression.
    pub expr: Expr,
    /// The body elements of the section.
    pub body: Vec<WorkflowElement>,
}

/// Represents a conditional section.
#[derive(Debug)]
pub struct Conditional {
    /// The id of the section.
    pub id: NodeId,
    /// The position of the section.
    pub pos: SourcePosition,
    /// The condition expression.
    pub expr: Expr,
    /// The body elements of the section.
    pub body: Vec<WorkflowElement>,
}

/// Represents a value in a `meta` or `parameter_meta` section.
#[derive(Debug)]
pub enum MetaValue {
    /// The `null` literal.
    Null,
    /// A boolean literal.
    Boolean(bool),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A string literal (placeholders are not permitted here).
    String(String),
    /// An array of meta values.
    Array(Vec<MetaValue>),
    /// An object of meta values.
    Object(Vec<(String, MetaValue)>),
}

/// Represents an expression.
#[derive(Debug)]
pub struct Expr {
    /// The id of the expression.
    pub id: NodeId,
    /// The position of the expression.
    pub pos: SourcePosition,
    /// The kind of the expression.
    pub kind: ExprKind,
}

/// Represents the kind of an expression.
#[derive(Debug)]
pub enum ExprKind {
    /// A boolean literal.
    Boolean(bool),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// The `None` literal (1.1+).
    None,
    /// A string literal with embedded placeholders.
    String(Vec<StringPart>),
    /// An array literal.
    Array(Vec<Expr>),
    /// A pair literal.
    Pair(Box<Expr>, Box<Expr>),
    /// A map literal.
    Map(Vec<(Expr, Expr)>),
    /// An `object { ... }` literal.
    Object(Vec<(String, Expr)>),
    /// A struct literal (`Name { ... }`, 1.2+).
    Struct(String, Vec<(String, Expr)>),
    /// A name reference.
    Ident(String),
    /// A member access (`expr.member`).
    Access(Box<Expr>, String),
    /// A subscript (`expr[index]`).
    Index(Box<Expr>, Box<Expr>),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// An `if ... then ... else ...` expression.
    Conditional {
        /// The condition expression.
        cond: Box<Expr>,
        /// The expression evaluated when the condition is true.
        then: Box<Expr>,
        /// The expression evaluated when the condition is false.
        otherwise: Box<Expr>,
    },
    /// A function application.
    Apply(String, Vec<Expr>),
}

/// Represents a unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (`!`).
    Not,
    /// Arithmetic negation (`-`).
    Negate,
}

/// Represents a binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition or string concatenation (`+`).
    Add,
    /// Subtraction (`-`).
    Subtract,
    /// Multiplication (`*`).
    Multiply,
    /// Division (`/`).
    Divide,
    /// Remainder (`%`).
    Remainder,
    /// Equality (`==`).
    Equal,
    /// Inequality (`!=`).
    NotEqual,
    /// Less-than (`<`).
    Less,
    /// Less-than-or-equal (`<=`).
    LessEqual,
    /// Greater-than (`>`).
    Greater,
    /// Greater-than-or-equal (`>=`).
    GreaterEqual,
    /// Logical conjunction (`&&`); short-circuits.
    And,
    /// Logical disjunction (`||`); short-circuits.
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
        };

        write!(f, "{s}")
    }
}

/// Represents a part of a string literal or command template.
#[derive(Debug)]
pub enum StringPart {
    /// A literal chunk of text (escapes already processed).
    Literal {
        /// The position of the chunk.
        pos: SourcePosition,
        /// The text of the chunk.
        text: String,
    },
    /// An embedded placeholder.
    Placeholder(Placeholder),
}

/// Represents a placeholder embedded in a string or command.
#[derive(Debug)]
pub struct Placeholder {
    /// The position of the placeholder.
    pub pos: SourcePosition,
    /// The placeholder expression.
    pub expr: Expr,
    /// The option clauses of the placeholder.
    pub options: PlaceholderOptions,
}

/// Represents the option clauses a placeholder may carry.
#[derive(Debug, Default)]
pub struct PlaceholderOptions {
    /// The `sep='...'` option for joining arrays.
    pub sep: Option<String>,
    /// The `true='...'` option for rendering a true boolean.
    pub true_value: Option<String>,
    /// The `false='...'` option for rendering a false boolean.
    pub false_value: Option<String>,
    /// The `default='...'` option substituted for a null value.
    pub default: Option<String>,
}

impl PlaceholderOptions {
    /// Determines if no options were written.
    pub fn is_empty(&self) -> bool {
        self.sep.is_none()
            && self.true_value.is_none()
            && self.false_value.is_none()
            && self.default.is_none()
    }
}
