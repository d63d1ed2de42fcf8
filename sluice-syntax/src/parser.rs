//! Recursive-descent parser for WDL documents.
//!
//! The grammar is selected by the document's `version` statement; the parser
//! produces an untyped [`Document`] tree annotated with source positions.
//! String literals and command blocks are scanned in a raw-text mode that
//! switches back to token mode inside placeholders.

use std::sync::Arc;

use line_index::LineIndex;
use line_index::TextSize;

use crate::Diagnostic;
use crate::SourcePosition;
use crate::Span;
use crate::WdlVersion;
use crate::ast::*;
use crate::lexer::Lexed;
use crate::lexer::Token;
use crate::lexer::TokenStream;

/// Parses a WDL document from source text.
///
/// `uri` is the document's URI as requested; `abspath` its absolute form.
/// Parsing stops at the first syntax error.
pub fn parse_document(source: &str, uri: &str, abspath: &str) -> Result<Document, Diagnostic> {
    Parser::new(source, uri, abspath).parse()
}

/// The parser state over a single document.
struct Parser<'a> {
    /// The token stream over the source.
    stream: TokenStream<'a>,
    /// The line index used to map byte offsets to line/column positions.
    index: LineIndex,
    /// The URI of the document.
    uri: Arc<str>,
    /// The absolute path of the document.
    abspath: Arc<str>,
    /// The effective grammar version.
    version: WdlVersion,
    /// The next node id to assign.
    counter: u32,
    /// The span of the most recently consumed token.
    last_span: Span,
}

impl<'a> Parser<'a> {
    /// Creates a new parser over the given source.
    fn new(source: &'a str, uri: &str, abspath: &str) -> Self {
        Self {
            stream: TokenStream::new(source),
            index: LineIndex::new(source),
            uri: uri.into(),
            abspath: abspath.into(),
            version: WdlVersion::DraftTwo,
            counter: 0,
            last_span: Span::new(0, 0),
        }
    }

    /// Parses the document.
    fn parse(mut self) -> Result<Document, Diagnostic> {
        self.version = self.parse_version()?;

        let pos = self.position(0, 0);
        let mut imports = Vec::new();
        let mut structs = Vec::new();
        let mut tasks = Vec::new();
        let mut workflow: Option<Workflow> = None;

        while let Some(lexed) = self.peek() {
            match self.keyword_of(lexed) {
                Some("import") => imports.push(self.parse_import()?),
                Some("struct") => structs.push(self.parse_struct()?),
                Some("task") => tasks.push(self.parse_task()?),
                Some("workflow") => {
                    let parsed = self.parse_workflow()?;
                    if workflow.is_some() {
                        return Err(self.error_span(
                            "a document may contain at most one workflow",
                            self.last_span,
                        ));
                    }

                    workflow = Some(parsed);
                }
                _ => {
                    return Err(self.unexpected(
                        "`import`, `struct`, `task`, or `workflow`",
                        Some(lexed),
                    ));
                }
            }
        }

        Ok(Document {
            pos,
            version: self.version,
            imports,
            structs,
            tasks,
            workflow,
        })
    }

    /// Parses the optional `version` statement at the start of the document.
    fn parse_version(&mut self) -> Result<WdlVersion, Diagnostic> {
        match self.peek() {
            Some(lexed) if self.keyword_of(lexed) == Some("version") => {
                self.advance();
                let (_, span) = self.advance().ok_or_else(|| {
                    self.error_span("expected a version after `version`", self.last_span)
                })?;

                let mut text = self.stream.text(span).to_string();

                // `draft-2` lexes as three tokens
                if text == "draft" {
                    if self.eat_token(Token::Minus).is_some() {
                        if let Some((Ok(Token::Integer), span)) = self.peek() {
                            self.advance();
                            text.push('-');
                            text.push_str(self.stream.text(span));
                        }
                    }
                }

                text.parse().map_err(|()| {
                    self.error_span(format!("unsupported WDL version `{text}`"), span)
                })
            }
            _ => Ok(WdlVersion::DraftTwo),
        }
    }

    /// Parses an `import` statement.
    fn parse_import(&mut self) -> Result<Import, Diagnostic> {
        let start = self.expect_keyword("import")?;
        let uri = self.parse_static_string("import URI")?;

        let namespace = if self.eat_keyword("as").is_some() {
            Some(self.expect_ident("a namespace identifier")?.0)
        } else {
            None
        };

        let mut aliases = Vec::new();
        while self.eat_keyword("alias").is_some() {
            let original = self.expect_ident("a struct type name")?.0;
            self.expect_keyword("as")?;
            let renamed = self.expect_ident("a struct type name")?.0;
            aliases.push((original, renamed));
        }

        Ok(Import {
            pos: self.range_position(start),
            uri,
            namespace,
            aliases,
        })
    }

    /// Parses a `struct` definition.
    fn parse_struct(&mut self) -> Result<StructDef, Diagnostic> {
        let start = self.expect_keyword("struct")?;
        let (name, _) = self.expect_ident("a struct type name")?;
        self.expect(Token::LBrace, "`{` to open the struct body")?;

        let mut members = Vec::new();
        while self.eat_token(Token::RBrace).is_none() {
            let ty = self.parse_type()?;
            let (member, _) = self.expect_ident("a struct member name")?;
            members.push((member, ty));
        }

        Ok(StructDef {
            pos: self.range_position(start),
            name,
            members,
        })
    }

    /// Parses a `task` definition.
    fn parse_task(&mut self) -> Result<Task, Diagnostic> {
        let start = self.expect_keyword("task")?;
        let (name, _) = self.expect_ident("a task name")?;
        self.expect(Token::LBrace, "`{` to open the task body")?;

        let mut inputs = None;
        let mut postinputs = Vec::new();
        let mut command = None;
        let mut outputs = Vec::new();
        let mut runtime = Vec::new();
        let mut meta = Vec::new();
        let mut parameter_meta = Vec::new();

        loop {
            let Some(lexed) = self.peek() else {
                return Err(self.error_span("unterminated task body", self.last_span));
            };

            match self.keyword_of(lexed) {
                _ if lexed.0 == Ok(Token::RBrace) => {
                    self.advance();
                    break;
                }
                Some("input") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    inputs = Some(self.parse_decl_section()?);
                }
                Some("command") => command = Some(self.parse_command()?),
                Some("output") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    outputs = self.parse_decl_section()?;
                }
                Some("runtime") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    runtime = self.parse_runtime_section()?;
                }
                Some("meta") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    meta = self.parse_meta_section()?;
                }
                Some("parameter_meta") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    parameter_meta = self.parse_meta_section()?;
                }
                _ => postinputs.push(self.parse_decl()?),
            }
        }

        let command = command
            .ok_or_else(|| self.error_span(format!("task `{name}` has no command section"), start))?;

        Ok(Task {
            pos: self.range_position(start),
            name,
            inputs,
            postinputs,
            command,
            outputs,
            runtime,
            meta,
            parameter_meta,
        })
    }

    /// Parses a `workflow` definition.
    fn parse_workflow(&mut self) -> Result<Workflow, Diagnostic> {
        let start = self.expect_keyword("workflow")?;
        let (name, _) = self.expect_ident("a workflow name")?;
        self.expect(Token::LBrace, "`{` to open the workflow body")?;

        let mut inputs = None;
        let mut body = Vec::new();
        let mut outputs = None;
        let mut meta = Vec::new();
        let mut parameter_meta = Vec::new();

        loop {
            let Some(lexed) = self.peek() else {
                return Err(self.error_span("unterminated workflow body", self.last_span));
            };

            match self.keyword_of(lexed) {
                _ if lexed.0 == Ok(Token::RBrace) => {
                    self.advance();
                    break;
                }
                Some("input") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    inputs = Some(self.parse_decl_section()?);
                }
                Some("output") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    outputs = Some(self.parse_decl_section()?);
                }
                Some("meta") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    meta = self.parse_meta_section()?;
                }
                Some("parameter_meta") if self.peek2_is(Token::LBrace) => {
                    self.advance();
                    parameter_meta = self.parse_meta_section()?;
                }
                _ => body.push(self.parse_workflow_element()?),
            }
        }

        Ok(Workflow {
            pos: self.range_position(start),
            name,
            inputs,
            body,
            outputs,
            meta,
            parameter_meta,
        })
    }

    /// Parses a single element of a workflow or section body.
    fn parse_workflow_element(&mut self) -> Result<WorkflowElement, Diagnostic> {
        let Some(lexed) = self.peek() else {
            return Err(self.error_span("unterminated section body", self.last_span));
        };

        match self.keyword_of(lexed) {
            Some("call") => Ok(WorkflowElement::Call(self.parse_call()?)),
            Some("scatter") => Ok(WorkflowElement::Scatter(self.parse_scatter()?)),
            Some("if") => Ok(WorkflowElement::Conditional(self.parse_conditional()?)),
            _ => Ok(WorkflowElement::Decl(self.parse_decl()?)),
        }
    }

    /// Parses a `call` statement.
    fn parse_call(&mut self) -> Result<Call, Diagnostic> {
        let start = self.expect_keyword("call")?;
        let id = self.node_id();

        let mut target = vec![self.expect_ident("a task or workflow name")?.0];
        while self.eat_token(Token::Dot).is_some() {
            target.push(self.expect_ident("a name after `.`")?.0);
        }

        let alias = if self.eat_keyword("as").is_some() {
            Some(self.expect_ident("an alias identifier")?.0)
        } else {
            None
        };

        let mut afters = Vec::new();
        while self.at_keyword("after") {
            let span = self.last_span;
            if !self.version.has_after_clauses() {
                return Err(self.error_span(
                    format!(
                        "`after` clauses require WDL version 1.1 or later (document is {version})",
                        version = self.version
                    ),
                    span,
                ));
            }

            self.advance();
            afters.push(self.expect_ident("a name after `after`")?.0);
        }

        let mut inputs = Vec::new();
        if self.eat_token(Token::LBrace).is_some() {
            // The `input:` prefix is optional in later versions
            if self.at_keyword("input") && self.peek2_is(Token::Colon) {
                self.advance();
                self.advance();
            }

            loop {
                if self.eat_token(Token::RBrace).is_some() {
                    break;
                }

                let (name, span) = self.expect_ident("an input name")?;
                if self.eat_token(Token::Assign).is_some() {
                    inputs.push((name, self.parse_expr()?));
                } else {
                    // Shorthand `x` binds the name `x` from the enclosing scope
                    let id = self.node_id();
                    inputs.push((
                        name.clone(),
                        Expr {
                            id,
                            pos: self.span_position(span),
                            kind: ExprKind::Ident(name),
                        },
                    ));
                }

                if self.eat_token(Token::Comma).is_none() {
                    self.expect(Token::RBrace, "`,` or `}` in call inputs")?;
                    break;
                }
            }
        }

        Ok(Call {
            id,
            pos: self.range_position(start),
            target,
            alias,
            inputs,
            afters,
        })
    }

    /// Parses a `scatter` section.
    fn parse_scatter(&mut self) -> Result<Scatter, Diagnostic> {
        let start = self.expect_keyword("scatter")?;
        let id = self.node_id();
        self.expect(Token::LParen, "`(` after `scatter`")?;
        let (variable, _) = self.expect_ident("a scatter variable name")?;
        self.expect_keyword("in")?;
        let expr = self.parse_expr()?;
        self.expect(Token::RParen, "`)` to close the scatter header")?;
        let body = self.parse_section_body()?;

        Ok(Scatter {
            id,
            pos: self.range_position(start),
            variable,
            expr,
            body,
        })
    }

    /// Parses a conditional (`if`) section.
    fn parse_conditional(&mut self) -> Result<Conditional, Diagnostic> {
        let start = self.expect_keyword("if")?;
        let id = self.node_id();
        self.expect(Token::LParen, "`(` after `if`")?;
        let expr = self.parse_expr()?;
        self.expect(Token::RParen, "`)` to close the condition")?;
        let body = self.parse_section_body()?;

        Ok(Conditional {
            id,
            pos: self.range_position(start),
            expr,
            body,
        })
    }

    /// Parses a braced list of workflow elements.
    fn parse_section_body(&mut self) -> Result<Vec<WorkflowElement>, Diagnostic> {
        self.expect(Token::LBrace, "`{` to open the section body")?;
        let mut body = Vec::new();
        while self.eat_token(Token::RBrace).is_none() {
            if self.peek().is_none() {
                return Err(self.error_span("unterminated section body", self.last_span));
            }

            body.push(self.parse_workflow_element()?);
        }

        Ok(body)
    }

    /// Parses a braced list of declarations (`input`/`output` sections).
    fn parse_decl_section(&mut self) -> Result<Vec<Decl>, Diagnostic> {
        self.expect(Token::LBrace, "`{` to open the section")?;
        let mut decls = Vec::new();
        while self.eat_token(Token::RBrace).is_none() {
            if self.peek().is_none() {
                return Err(self.error_span("unterminated section", self.last_span));
            }

            decls.push(self.parse_decl()?);
        }

        Ok(decls)
    }

    /// Parses a value declaration.
    fn parse_decl(&mut self) -> Result<Decl, Diagnostic> {
        let start = match self.peek() {
            Some((_, span)) => span,
            None => return Err(self.error_span("expected a declaration", self.last_span)),
        };

        let id = self.node_id();
        let ty = self.parse_type()?;
        let (name, _) = self.expect_ident("a declaration name")?;
        let expr = if self.eat_token(Token::Assign).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Decl {
            id,
            pos: self.range_position(start),
            ty,
            name,
            expr,
        })
    }

    /// Parses a `runtime` section body.
    fn parse_runtime_section(&mut self) -> Result<Vec<(String, Expr)>, Diagnostic> {
        self.expect(Token::LBrace, "`{` to open the runtime section")?;
        let mut entries = Vec::new();
        while self.eat_token(Token::RBrace).is_none() {
            let (key, _) = self.expect_ident("a runtime key")?;
            self.expect(Token::Colon, "`:` after the runtime key")?;
            entries.push((key, self.parse_expr()?));
        }

        Ok(entries)
    }

    /// Parses a `meta` or `parameter_meta` section body.
    fn parse_meta_section(&mut self) -> Result<Vec<(String, MetaValue)>, Diagnostic> {
        self.expect(Token::LBrace, "`{` to open the meta section")?;
        let mut entries = Vec::new();
        while self.eat_token(Token::RBrace).is_none() {
            let (key, _) = self.expect_ident("a meta key")?;
            self.expect(Token::Colon, "`:` after the meta key")?;
            entries.push((key, self.parse_meta_value()?));
        }

        Ok(entries)
    }

    /// Parses a meta value (a literal without placeholders).
    fn parse_meta_value(&mut self) -> Result<MetaValue, Diagnostic> {
        let Some(lexed) = self.peek() else {
            return Err(self.error_span("expected a meta value", self.last_span));
        };

        match lexed.0 {
            Ok(Token::Ident) => {
                let text = self.stream.text(lexed.1);
                match text {
                    "null" => {
                        self.advance();
                        Ok(MetaValue::Null)
                    }
                    "true" => {
                        self.advance();
                        Ok(MetaValue::Boolean(true))
                    }
                    "false" => {
                        self.advance();
                        Ok(MetaValue::Boolean(false))
                    }
                    _ => Err(self.unexpected("a meta value", Some(lexed))),
                }
            }
            Ok(Token::Integer | Token::HexInteger) => {
                self.advance();
                Ok(MetaValue::Int(self.integer_value(lexed.1)?))
            }
            Ok(Token::Float) => {
                self.advance();
                Ok(MetaValue::Float(self.float_value(lexed.1)?))
            }
            Ok(Token::Minus) => {
                self.advance();
                match self.parse_meta_value()? {
                    MetaValue::Int(v) => Ok(MetaValue::Int(-v)),
                    MetaValue::Float(v) => Ok(MetaValue::Float(-v)),
                    _ => Err(self.error_span("expected a number after `-`", self.last_span)),
                }
            }
            Ok(Token::DoubleQuote | Token::SingleQuote) => {
                Ok(MetaValue::String(self.parse_static_string("meta string")?))
            }
            Ok(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    if self.eat_token(Token::RBracket).is_some() {
                        break;
                    }

                    items.push(self.parse_meta_value()?);
                    if self.eat_token(Token::Comma).is_none() {
                        self.expect(Token::RBracket, "`,` or `]` in a meta array")?;
                        break;
                    }
                }

                Ok(MetaValue::Array(items))
            }
            Ok(Token::LBrace) => {
                self.advance();
                let mut entries = Vec::new();
                loop {
                    if self.eat_token(Token::RBrace).is_some() {
                        break;
                    }

                    let (key, _) = self.expect_ident("a meta key")?;
                    self.expect(Token::Colon, "`:` after the meta key")?;
                    entries.push((key, self.parse_meta_value()?));
                    if self.eat_token(Token::Comma).is_none() {
                        self.expect(Token::RBrace, "`,` or `}` in a meta object")?;
                        break;
                    }
                }

                Ok(MetaValue::Object(entries))
            }
            _ => Err(self.unexpected("a meta value", Some(lexed))),
        }
    }

    /// Parses a type annotation.
    fn parse_type(&mut self) -> Result<TypeExpr, Diagnostic> {
        let (name, start) = self.expect_ident("a type name")?;

        let kind = match name.as_str() {
            "Boolean" => TypeExprKind::Boolean,
            "Int" => TypeExprKind::Int,
            "Float" => TypeExprKind::Float,
            "String" => TypeExprKind::String,
            "File" => TypeExprKind::File,
            "Directory" => TypeExprKind::Directory,
            "Object" => TypeExprKind::Object,
            "Array" => {
                self.expect(Token::LBracket, "`[` after `Array`")?;
                let item = self.parse_type()?;
                self.expect(Token::RBracket, "`]` to close the item type")?;
                TypeExprKind::Array(Box::new(item))
            }
            "Map" => {
                self.expect(Token::LBracket, "`[` after `Map`")?;
                let key = self.parse_type()?;
                self.expect(Token::Comma, "`,` between key and value types")?;
                let value = self.parse_type()?;
                self.expect(Token::RBracket, "`]` to close the value type")?;
                TypeExprKind::Map(Box::new(key), Box::new(value))
            }
            "Pair" => {
                self.expect(Token::LBracket, "`[` after `Pair`")?;
                let left = self.parse_type()?;
                self.expect(Token::Comma, "`,` between pair types")?;
                let right = self.parse_type()?;
                self.expect(Token::RBracket, "`]` to close the pair type")?;
                TypeExprKind::Pair(Box::new(left), Box::new(right))
            }
            _ => TypeExprKind::Named(name),
        };

        let mut optional = false;
        let mut nonempty = false;
        loop {
            if !optional && self.eat_token(Token::Question).is_some() {
                optional = true;
            } else if !nonempty
                && matches!(kind, TypeExprKind::Array(_))
                && !optional
                && self.eat_token(Token::Plus).is_some()
            {
                nonempty = true;
            } else {
                break;
            }
        }

        Ok(TypeExpr {
            pos: self.range_position(start),
            kind,
            optional,
            nonempty,
        })
    }

    /// Parses a command section.
    fn parse_command(&mut self) -> Result<Command, Diagnostic> {
        let start = self.expect_keyword("command")?;

        match self.advance() {
            Some((Ok(Token::HeredocOpen), _)) => {
                let parts = self.scan_command_parts(true)?;
                Ok(Command {
                    pos: self.range_position(start),
                    parts,
                    heredoc: true,
                })
            }
            Some((Ok(Token::LBrace), _)) => {
                let parts = self.scan_command_parts(false)?;
                Ok(Command {
                    pos: self.range_position(start),
                    parts,
                    heredoc: false,
                })
            }
            other => Err(self.unexpected("`<<<` or `{` to open the command", other)),
        }
    }

    /// Scans the raw interior of a command block.
    ///
    /// In heredoc commands only `~{...}` is a placeholder; in curly commands
    /// `${...}` always is, and `~{...}` is when the version supports it.
    fn scan_command_parts(&mut self, heredoc: bool) -> Result<Vec<StringPart>, Diagnostic> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chunk_start = self.stream.offset();
        let mut depth = 1usize;

        loop {
            let offset = self.stream.offset();
            let terminated = if heredoc {
                self.stream.at(">>>")
            } else {
                self.stream.at("}") && depth == 1
            };

            if terminated {
                if !text.is_empty() {
                    parts.push(StringPart::Literal {
                        pos: self.position(chunk_start, offset),
                        text: std::mem::take(&mut text),
                    });
                }

                self.stream.bump(if heredoc { 3 } else { 1 });
                // Re-sync the token span so `range_position` covers the close
                self.last_span = Span::new(self.stream.offset(), 0);
                return Ok(parts);
            }

            let tilde = self.stream.at("~{");
            if (tilde && (heredoc || self.version.has_tilde_placeholders()))
                || (!heredoc && self.stream.at("${"))
            {
                if !text.is_empty() {
                    parts.push(StringPart::Literal {
                        pos: self.position(chunk_start, offset),
                        text: std::mem::take(&mut text),
                    });
                }

                parts.push(StringPart::Placeholder(self.scan_placeholder()?));
                chunk_start = self.stream.offset();
                continue;
            }

            match self.stream.peek_char() {
                None => {
                    return Err(self.error_offsets(offset, offset, "unterminated command block"));
                }
                Some(c) => {
                    if !heredoc {
                        if c == '{' {
                            depth += 1;
                        } else if c == '}' {
                            depth -= 1;
                        }
                    }

                    text.push(c);
                    self.stream.bump(c.len_utf8());
                }
            }
        }
    }

    /// Scans the interior of a quoted string after its opening quote.
    fn scan_string(&mut self, quote: char) -> Result<Vec<StringPart>, Diagnostic> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chunk_start = self.stream.offset();

        loop {
            let offset = self.stream.offset();

            if self.stream.at("${")
                || (self.stream.at("~{") && self.version.has_tilde_placeholders())
            {
                if !text.is_empty() {
                    parts.push(StringPart::Literal {
                        pos: self.position(chunk_start, offset),
                        text: std::mem::take(&mut text),
                    });
                }

                parts.push(StringPart::Placeholder(self.scan_placeholder()?));
                chunk_start = self.stream.offset();
                continue;
            }

            match self.stream.peek_char() {
                None => {
                    return Err(self.error_offsets(offset, offset, "unterminated string literal"));
                }
                Some(c) if c == quote => {
                    if !text.is_empty() {
                        parts.push(StringPart::Literal {
                            pos: self.position(chunk_start, offset),
                            text: std::mem::take(&mut text),
                        });
                    }

                    self.stream.bump(1);
                    self.last_span = Span::new(self.stream.offset(), 0);
                    return Ok(parts);
                }
                Some('\n') => {
                    return Err(self.error_offsets(offset, offset, "unterminated string literal"));
                }
                Some('\\') => {
                    self.stream.bump(1);
                    self.scan_escape(&mut text, offset)?;
                }
                Some(c) => {
                    text.push(c);
                    self.stream.bump(c.len_utf8());
                }
            }
        }
    }

    /// Scans a single escape sequence after its backslash.
    fn scan_escape(&mut self, text: &mut String, start: usize) -> Result<(), Diagnostic> {
        let c = self
            .stream
            .peek_char()
            .ok_or_else(|| self.error_offsets(start, start + 1, "unterminated escape sequence"))?;
        self.stream.bump(c.len_utf8());

        match c {
            'n' => text.push('\n'),
            't' => text.push('\t'),
            'r' => text.push('\r'),
            '\\' => text.push('\\'),
            '\'' => text.push('\''),
            '"' => text.push('"'),
            '~' => text.push('~'),
            '$' => text.push('$'),
            'x' | 'X' => {
                let value = self.scan_escape_digits(start, 2, 2, 16)?;
                text.push(char::from_u32(value).ok_or_else(|| {
                    self.error_offsets(start, self.stream.offset(), "invalid hex escape sequence")
                })?);
            }
            'u' => {
                let value = self.scan_escape_digits(start, 4, 4, 16)?;
                text.push(char::from_u32(value).ok_or_else(|| {
                    self.error_offsets(
                        start,
                        self.stream.offset(),
                        "invalid unicode escape sequence",
                    )
                })?);
            }
            '0'..='7' => {
                let mut value = c as u32 - '0' as u32;
                let mut count = 1;
                while count < 3 {
                    match self.stream.peek_char() {
                        Some(d @ '0'..='7') => {
                            value = value * 8 + (d as u32 - '0' as u32);
                            self.stream.bump(1);
                            count += 1;
                        }
                        _ => break,
                    }
                }

                text.push(char::from_u32(value).ok_or_else(|| {
                    self.error_offsets(start, self.stream.offset(), "invalid octal escape sequence")
                })?);
            }
            _ => {
                return Err(self.error_offsets(
                    start,
                    self.stream.offset(),
                    format!("invalid escape sequence `\\{c}`"),
                ));
            }
        }

        Ok(())
    }

    /// Scans a fixed-width run of digits for an escape sequence.
    fn scan_escape_digits(
        &mut self,
        start: usize,
        min: usize,
        max: usize,
        radix: u32,
    ) -> Result<u32, Diagnostic> {
        let mut value: u32 = 0;
        let mut count = 0;
        while count < max {
            match self.stream.peek_char().and_then(|c| c.to_digit(radix)) {
                Some(d) => {
                    value = value * radix + d;
                    self.stream.bump(1);
                    count += 1;
                }
                None => break,
            }
        }

        if count < min {
            return Err(self.error_offsets(
                start,
                self.stream.offset(),
                "invalid escape sequence: too few digits",
            ));
        }

        Ok(value)
    }

    /// Scans a placeholder at the raw-text cursor (positioned at `${` or
    /// `~{`).
    fn scan_placeholder(&mut self) -> Result<Placeholder, Diagnostic> {
        let start = self.stream.offset();
        self.stream.bump(2);

        let options = self.parse_placeholder_options()?;
        let expr = self.parse_expr()?;
        self.expect(Token::RBrace, "`}` to close the placeholder")?;
        let end = self.last_span.end();

        Ok(Placeholder {
            pos: self.position(start, end),
            expr,
            options,
        })
    }

    /// Parses the option clauses at the start of a placeholder.
    fn parse_placeholder_options(&mut self) -> Result<PlaceholderOptions, Diagnostic> {
        let mut options = PlaceholderOptions::default();

        loop {
            let key = match (self.peek(), self.stream.peek2()) {
                (Some((Ok(Token::Ident), span)), Some((Ok(Token::Assign), _))) => {
                    match self.stream.text(span) {
                        key @ ("sep" | "true" | "false" | "default") => key.to_string(),
                        _ => break,
                    }
                }
                _ => break,
            };

            let key_span = self.peek().expect("key was peeked").1;
            self.advance();
            self.advance();
            let value = self.parse_static_string("placeholder option value")?;

            let slot = match key.as_str() {
                "sep" => &mut options.sep,
                "true" => &mut options.true_value,
                "false" => &mut options.false_value,
                "default" => &mut options.default,
                _ => unreachable!("option keys are filtered above"),
            };

            if slot.is_some() {
                return Err(
                    self.error_span(format!("duplicate placeholder option `{key}`"), key_span)
                );
            }

            *slot = Some(value);
        }

        Ok(options)
    }

    /// Parses a string literal that must not contain placeholders, returning
    /// its unescaped text.
    fn parse_static_string(&mut self, what: &str) -> Result<String, Diagnostic> {
        let quote = match self.advance() {
            Some((Ok(Token::DoubleQuote), _)) => '"',
            Some((Ok(Token::SingleQuote), _)) => '\'',
            other => return Err(self.unexpected(&format!("a string for {what}"), other)),
        };

        let parts = self.scan_string(quote)?;
        let mut text = String::new();
        for part in parts {
            match part {
                StringPart::Literal { text: t, .. } => text.push_str(&t),
                StringPart::Placeholder(p) => {
                    return Err(Diagnostic::error(
                        "SyntaxError",
                        format!("placeholders are not permitted in {what}"),
                    )
                    .with_highlight(p.pos));
                }
            }
        }

        Ok(text)
    }

    /// Parses an expression.
    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        if self.at_keyword("if") {
            let start = self.last_span;
            let id = self.node_id();
            self.advance();
            let cond = self.parse_expr()?;
            self.expect_keyword("then")?;
            let then = self.parse_expr()?;
            self.expect_keyword("else")?;
            let otherwise = self.parse_expr()?;

            return Ok(Expr {
                id,
                pos: self.range_position(start),
                kind: ExprKind::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
            });
        }

        self.parse_binary(0)
    }

    /// Gets the binding power of a binary operator token, if it is one.
    fn binary_op(token: Token) -> Option<(BinaryOp, u8)> {
        match token {
            Token::OrOr => Some((BinaryOp::Or, 1)),
            Token::AndAnd => Some((BinaryOp::And, 2)),
            Token::EqEq => Some((BinaryOp::Equal, 3)),
            Token::NotEq => Some((BinaryOp::NotEqual, 3)),
            Token::Less => Some((BinaryOp::Less, 4)),
            Token::LessEq => Some((BinaryOp::LessEqual, 4)),
            Token::Greater => Some((BinaryOp::Greater, 4)),
            Token::GreaterEq => Some((BinaryOp::GreaterEqual, 4)),
            Token::Plus => Some((BinaryOp::Add, 5)),
            Token::Minus => Some((BinaryOp::Subtract, 5)),
            Token::Star => Some((BinaryOp::Multiply, 6)),
            Token::Slash => Some((BinaryOp::Divide, 6)),
            Token::Percent => Some((BinaryOp::Remainder, 6)),
            _ => None,
        }
    }

    /// Parses a left-associative binary expression with precedence climbing.
    fn parse_binary(&mut self, min_power: u8) -> Result<Expr, Diagnostic> {
        let start = match self.peek() {
            Some((_, span)) => span,
            None => return Err(self.error_span("expected an expression", self.last_span)),
        };

        let mut lhs = self.parse_unary()?;

        while let Some((Ok(token), _)) = self.peek() {
            let Some((op, power)) = Self::binary_op(token) else {
                break;
            };

            if power < min_power {
                break;
            }

            self.advance();
            let rhs = self.parse_binary(power + 1)?;
            let id = self.node_id();
            lhs = Expr {
                id,
                pos: self.range_position(start),
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            };
        }

        Ok(lhs)
    }

    /// Parses a unary expression.
    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        match self.peek() {
            Some((Ok(Token::Bang), span)) => {
                self.advance();
                let id = self.node_id();
                let operand = self.parse_unary()?;
                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::Unary(UnaryOp::Not, Box::new(operand)),
                })
            }
            Some((Ok(Token::Minus), span)) => {
                self.advance();
                let id = self.node_id();
                let operand = self.parse_unary()?;
                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::Unary(UnaryOp::Negate, Box::new(operand)),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    /// Parses postfix member accesses and subscripts.
    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let start = match self.peek() {
            Some((_, span)) => span,
            None => return Err(self.error_span("expected an expression", self.last_span)),
        };

        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Some((Ok(Token::Dot), _)) => {
                    self.advance();
                    let (member, _) = self.expect_ident("a member name after `.`")?;
                    let id = self.node_id();
                    expr = Expr {
                        id,
                        pos: self.range_position(start),
                        kind: ExprKind::Access(Box::new(expr), member),
                    };
                }
                Some((Ok(Token::LBracket), _)) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "`]` to close the subscript")?;
                    let id = self.node_id();
                    expr = Expr {
                        id,
                        pos: self.range_position(start),
                        kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Parses a primary expression.
    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let Some(lexed) = self.peek() else {
            return Err(self.error_span("expected an expression", self.last_span));
        };
        let (token, span) = lexed;

        match token {
            Ok(Token::Integer | Token::HexInteger) => {
                self.advance();
                let value = self.integer_value(span)?;
                Ok(self.literal(span, ExprKind::Int(value)))
            }
            Ok(Token::Float) => {
                self.advance();
                let value = self.float_value(span)?;
                Ok(self.literal(span, ExprKind::Float(value)))
            }
            Ok(Token::DoubleQuote) => {
                self.advance();
                let id = self.node_id();
                let parts = self.scan_string('"')?;
                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::String(parts),
                })
            }
            Ok(Token::SingleQuote) => {
                self.advance();
                let id = self.node_id();
                let parts = self.scan_string('\'')?;
                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::String(parts),
                })
            }
            Ok(Token::LParen) => {
                self.advance();
                let first = self.parse_expr()?;
                if self.eat_token(Token::Comma).is_some() {
                    let id = self.node_id();
                    let second = self.parse_expr()?;
                    self.expect(Token::RParen, "`)` to close the pair literal")?;
                    Ok(Expr {
                        id,
                        pos: self.range_position(span),
                        kind: ExprKind::Pair(Box::new(first), Box::new(second)),
                    })
                } else {
                    self.expect(Token::RParen, "`)` to close the expression")?;
                    Ok(first)
                }
            }
            Ok(Token::LBracket) => {
                self.advance();
                let id = self.node_id();
                let mut items = Vec::new();
                loop {
                    if self.eat_token(Token::RBracket).is_some() {
                        break;
                    }

                    items.push(self.parse_expr()?);
                    if self.eat_token(Token::Comma).is_none() {
                        self.expect(Token::RBracket, "`,` or `]` in the array literal")?;
                        break;
                    }
                }

                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::Array(items),
                })
            }
            Ok(Token::LBrace) => {
                self.advance();
                let id = self.node_id();
                let mut entries = Vec::new();
                loop {
                    if self.eat_token(Token::RBrace).is_some() {
                        break;
                    }

                    let key = self.parse_expr()?;
                    self.expect(Token::Colon, "`:` after the map key")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if self.eat_token(Token::Comma).is_none() {
                        self.expect(Token::RBrace, "`,` or `}` in the map literal")?;
                        break;
                    }
                }

                Ok(Expr {
                    id,
                    pos: self.range_position(span),
                    kind: ExprKind::Map(entries),
                })
            }
            Ok(Token::Ident) => {
                let text = self.stream.text(span).to_string();
                match text.as_str() {
                    "true" => {
                        self.advance();
                        Ok(self.literal(span, ExprKind::Boolean(true)))
                    }
                    "false" => {
                        self.advance();
                        Ok(self.literal(span, ExprKind::Boolean(false)))
                    }
                    "None" if self.version.has_none_literal() => {
                        self.advance();
                        Ok(self.literal(span, ExprKind::None))
                    }
                    "object" if self.peek2_is(Token::LBrace) => {
                        self.advance();
                        self.advance();
                        let id = self.node_id();
                        let members = self.parse_member_literal()?;
                        Ok(Expr {
                            id,
                            pos: self.range_position(span),
                            kind: ExprKind::Object(members),
                        })
                    }
                    "if" => self.parse_expr(),
                    _ => {
                        self.advance();
                        if self.at_token(Token::LParen) {
                            self.advance();
                            let id = self.node_id();
                            let mut args = Vec::new();
                            loop {
                                if self.eat_token(Token::RParen).is_some() {
                                    break;
                                }

                                args.push(self.parse_expr()?);
                                if self.eat_token(Token::Comma).is_none() {
                                    self.expect(Token::RParen, "`,` or `)` in the argument list")?;
                                    break;
                                }
                            }

                            Ok(Expr {
                                id,
                                pos: self.range_position(span),
                                kind: ExprKind::Apply(text, args),
                            })
                        } else if self.version >= WdlVersion::Development
                            && text.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                            && self.at_token(Token::LBrace)
                        {
                            self.advance();
                            let id = self.node_id();
                            let members = self.parse_member_literal()?;
                            Ok(Expr {
                                id,
                                pos: self.range_position(span),
                                kind: ExprKind::Struct(text, members),
                            })
                        } else {
                            Ok(self.literal(span, ExprKind::Ident(text)))
                        }
                    }
                }
            }
            _ => Err(self.unexpected("an expression", Some(lexed))),
        }
    }

    /// Parses the member list of an `object`/struct literal after its `{`.
    fn parse_member_literal(&mut self) -> Result<Vec<(String, Expr)>, Diagnostic> {
        let mut members = Vec::new();
        loop {
            if self.eat_token(Token::RBrace).is_some() {
                break;
            }

            let (name, _) = self.expect_ident("a member name")?;
            self.expect(Token::Colon, "`:` after the member name")?;
            members.push((name, self.parse_expr()?));
            if self.eat_token(Token::Comma).is_none() {
                self.expect(Token::RBrace, "`,` or `}` in the member list")?;
                break;
            }
        }

        Ok(members)
    }

    /// Parses the integer value of a numeric token.
    fn integer_value(&self, span: Span) -> Result<i64, Diagnostic> {
        let text = self.stream.text(span);
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else {
            text.parse()
        };

        parsed.map_err(|_| {
            self.error_span(
                format!(
                    "literal integer exceeds the range for a 64-bit signed integer \
                     ({min}..={max})",
                    min = i64::MIN,
                    max = i64::MAX
                ),
                span,
            )
        })
    }

    /// Parses the float value of a numeric token.
    fn float_value(&self, span: Span) -> Result<f64, Diagnostic> {
        let text = self.stream.text(span);
        text.parse()
            .map_err(|_| self.error_span(format!("invalid float literal `{text}`"), span))
    }

    /// Wraps a literal expression kind with the position of its single token.
    fn literal(&mut self, span: Span, kind: ExprKind) -> Expr {
        Expr {
            id: self.node_id(),
            pos: self.span_position(span),
            kind,
        }
    }

    /// Allocates the next node id.
    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.counter);
        self.counter += 1;
        id
    }

    /// Consumes and returns the next token, recording its span.
    fn advance(&mut self) -> Option<Lexed> {
        let next = self.stream.next();
        if let Some((_, span)) = next {
            self.last_span = span;
        }

        next
    }

    /// Peeks at the next token.
    fn peek(&mut self) -> Option<Lexed> {
        self.stream.peek()
    }

    /// Determines if the token after the next one is the given token.
    fn peek2_is(&mut self, token: Token) -> bool {
        matches!(self.stream.peek2(), Some((Ok(t), _)) if t == token)
    }

    /// Determines if the next token is the given token.
    fn at_token(&mut self, token: Token) -> bool {
        matches!(self.peek(), Some((Ok(t), _)) if t == token)
    }

    /// Determines if the next token is an identifier with the given text.
    ///
    /// On a match, `last_span` is updated to the keyword's span for error
    /// reporting convenience.
    fn at_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some((Ok(Token::Ident), span)) if self.stream.text(span) == keyword => {
                self.last_span = span;
                true
            }
            _ => false,
        }
    }

    /// Gets the keyword text of a lexed identifier token.
    fn keyword_of(&self, lexed: Lexed) -> Option<&'a str> {
        match lexed {
            (Ok(Token::Ident), span) => Some(self.stream.text(span)),
            _ => None,
        }
    }

    /// Consumes the next token if it is the given token.
    fn eat_token(&mut self, token: Token) -> Option<Span> {
        if self.at_token(token) {
            self.advance().map(|(_, span)| span)
        } else {
            None
        }
    }

    /// Consumes the next token if it is an identifier with the given text.
    fn eat_keyword(&mut self, keyword: &str) -> Option<Span> {
        if self.at_keyword(keyword) {
            self.advance().map(|(_, span)| span)
        } else {
            None
        }
    }

    /// Consumes the next token, requiring it to be the given token.
    fn expect(&mut self, token: Token, what: &str) -> Result<Span, Diagnostic> {
        match self.peek() {
            Some((Ok(t), span)) if t == token => {
                self.advance();
                Ok(span)
            }
            other => Err(self.unexpected(what, other)),
        }
    }

    /// Consumes the next token, requiring it to be an identifier with the
    /// given text.
    fn expect_keyword(&mut self, keyword: &str) -> Result<Span, Diagnostic> {
        match self.eat_keyword(keyword) {
            Some(span) => Ok(span),
            None => {
                let found = self.peek();
                Err(self.unexpected(&format!("`{keyword}`"), found))
            }
        }
    }

    /// Consumes the next token, requiring it to be an identifier, and returns
    /// its text.
    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), Diagnostic> {
        match self.peek() {
            Some((Ok(Token::Ident), span)) => {
                self.advance();
                Ok((self.stream.text(span).to_string(), span))
            }
            other => Err(self.unexpected(what, other)),
        }
    }

    /// Creates a syntax error diagnostic for an unexpected token.
    fn unexpected(&mut self, what: &str, found: Option<Lexed>) -> Diagnostic {
        match found {
            Some((Ok(_), span)) => self.error_span(
                format!(
                    "expected {what}, but found `{text}`",
                    text = self.stream.text(span)
                ),
                span,
            ),
            Some((Err(()), span)) => self.error_span(
                format!(
                    "unrecognized character sequence `{text}`",
                    text = self.stream.text(span)
                ),
                span,
            ),
            None => self.error_span(format!("expected {what}, but reached the end of the document"), self.last_span),
        }
    }

    /// Creates a syntax error diagnostic highlighting a token span.
    fn error_span(&self, message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic::error("SyntaxError", message).with_highlight(self.span_position(span))
    }

    /// Creates a syntax error diagnostic highlighting a byte offset range.
    fn error_offsets(&self, start: usize, end: usize, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error("SyntaxError", message).with_highlight(self.position(start, end))
    }

    /// Builds a source position from byte offsets.
    fn position(&self, start: usize, end: usize) -> SourcePosition {
        let start_lc = self.index.line_col(TextSize::from(start as u32));
        let end_lc = self.index.line_col(TextSize::from(end as u32));
        SourcePosition::new(
            self.uri.clone(),
            self.abspath.clone(),
            start_lc.line + 1,
            start_lc.col + 1,
            end_lc.line + 1,
            end_lc.col + 1,
        )
    }

    /// Builds a source position covering a single token span.
    fn span_position(&self, span: Span) -> SourcePosition {
        self.position(span.start(), span.end())
    }

    /// Builds a source position from a starting span through the most
    /// recently consumed token.
    fn range_position(&self, start: Span) -> SourcePosition {
        self.position(start.start(), self.last_span.end())
    }
}
