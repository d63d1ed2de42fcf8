//! Lexical analysis of WDL source text.
//!
//! The token set covers the "normal" lexing mode only; the interiors of
//! string literals and command blocks are scanned by the parser through the
//! cursor methods on [`TokenStream`], because placeholders switch back and
//! forth between raw text and expression tokens.

use logos::Logos;

use crate::Span;

/// Represents a token recognized in the normal lexing mode.
///
/// Keywords are not distinguished from identifiers here; the parser matches
/// on the token's text instead, as most WDL keywords are contextual.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    /// An identifier or contextual keyword.
    #[regex(r"[a-zA-Z][a-zA-Z0-9_]*")]
    Ident,

    /// A hexadecimal integer literal.
    #[regex(r"0[xX][0-9a-fA-F]+")]
    HexInteger,

    /// A decimal integer literal.
    #[regex(r"[0-9]+")]
    Integer,

    /// A float literal (decimal point and/or exponent).
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    Float,

    /// The `+` operator.
    #[token("+")]
    Plus,
    /// The `-` operator.
    #[token("-")]
    Minus,
    /// The `*` operator.
    #[token("*")]
    Star,
    /// The `/` operator.
    #[token("/")]
    Slash,
    /// The `%` operator.
    #[token("%")]
    Percent,
    /// The `!` operator.
    #[token("!")]
    Bang,
    /// The `==` operator.
    #[token("==")]
    EqEq,
    /// The `!=` operator.
    #[token("!=")]
    NotEq,
    /// The `<=` operator.
    #[token("<=")]
    LessEq,
    /// The `>=` operator.
    #[token(">=")]
    GreaterEq,
    /// The `<` operator.
    #[token("<")]
    Less,
    /// The `>` operator.
    #[token(">")]
    Greater,
    /// The `&&` operator.
    #[token("&&")]
    AndAnd,
    /// The `||` operator.
    #[token("||")]
    OrOr,
    /// The `=` token.
    #[token("=")]
    Assign,
    /// The `(` token.
    #[token("(")]
    LParen,
    /// The `)` token.
    #[token(")")]
    RParen,
    /// The `[` token.
    #[token("[")]
    LBracket,
    /// The `]` token.
    #[token("]")]
    RBracket,
    /// The `{` token.
    #[token("{")]
    LBrace,
    /// The `}` token.
    #[token("}")]
    RBrace,
    /// The `,` token.
    #[token(",")]
    Comma,
    /// The `.` token.
    #[token(".")]
    Dot,
    /// The `:` token.
    #[token(":")]
    Colon,
    /// The `?` token.
    #[token("?")]
    Question,
    /// The `<<<` token opening a heredoc command block.
    #[token("<<<")]
    HeredocOpen,
    /// The `"` token opening or closing a double-quoted string.
    #[token("\"")]
    DoubleQuote,
    /// The `'` token opening or closing a single-quoted string.
    #[token("'")]
    SingleQuote,
}

/// The result of lexing a single token.
///
/// `Err` marks a character sequence that no token pattern matched.
pub type Lexed = (Result<Token, ()>, Span);

/// A stream of tokens over a source string with two tokens of lookahead and
/// raw-text cursor access for the parser's modal scanning.
pub struct TokenStream<'a> {
    /// The source text being lexed.
    source: &'a str,
    /// The underlying lexer.
    lexer: logos::Lexer<'a, Token>,
    /// The lookahead buffer (at most two tokens).
    peeked: Vec<Option<Lexed>>,
}

impl<'a> TokenStream<'a> {
    /// Creates a new token stream over the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Token::lexer(source),
            peeked: Vec::new(),
        }
    }

    /// Gets the source text of the stream.
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Gets the text of the given span.
    pub fn text(&self, span: Span) -> &'a str {
        &self.source[span.start()..span.end()]
    }

    /// Peeks at the next token without consuming it.
    pub fn peek(&mut self) -> Option<Lexed> {
        self.peek_nth(0)
    }

    /// Peeks at the token after the next one without consuming anything.
    pub fn peek2(&mut self) -> Option<Lexed> {
        self.peek_nth(1)
    }

    /// Peeks `n` tokens ahead (0 is the next token).
    fn peek_nth(&mut self, n: usize) -> Option<Lexed> {
        while self.peeked.len() <= n {
            let next = self.lexer.next().map(|r| (r, Span::from(self.lexer.span())));
            self.peeked.push(next);
        }

        self.peeked[n]
    }

    /// Consumes and returns the next token.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Lexed> {
        if self.peeked.is_empty() {
            self.lexer.next().map(|r| (r, Span::from(self.lexer.span())))
        } else {
            self.peeked.remove(0)
        }
    }

    /// Gets the current byte offset of the raw-text cursor.
    ///
    /// Must not be called with pending lookahead, as the underlying lexer
    /// has already advanced past the peeked tokens.
    pub fn offset(&self) -> usize {
        debug_assert!(self.peeked.is_empty(), "cursor used with pending lookahead");
        self.source.len() - self.lexer.remainder().len()
    }

    /// Peeks at the next character of raw text.
    pub fn peek_char(&self) -> Option<char> {
        debug_assert!(self.peeked.is_empty(), "cursor used with pending lookahead");
        self.lexer.remainder().chars().next()
    }

    /// Determines if the raw text at the cursor starts with the given prefix.
    pub fn at(&self, prefix: &str) -> bool {
        debug_assert!(self.peeked.is_empty(), "cursor used with pending lookahead");
        self.lexer.remainder().starts_with(prefix)
    }

    /// Advances the raw-text cursor by the given number of bytes.
    pub fn bump(&mut self, n: usize) {
        debug_assert!(self.peeked.is_empty(), "cursor used with pending lookahead");
        self.lexer.bump(n);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Lexes the source into a list of `(token, text)` pairs.
    fn lex(source: &str) -> Vec<(Result<Token, ()>, &str)> {
        let mut stream = TokenStream::new(source);
        let mut tokens = Vec::new();
        while let Some((token, span)) = stream.next() {
            tokens.push((token, &source[span.start()..span.end()]));
        }

        tokens
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex("0 42 0x2A 3.14 1e6 2.5e-3 .5"),
            vec![
                (Ok(Token::Integer), "0"),
                (Ok(Token::Integer), "42"),
                (Ok(Token::HexInteger), "0x2A"),
                (Ok(Token::Float), "3.14"),
                (Ok(Token::Float), "1e6"),
                (Ok(Token::Float), "2.5e-3"),
                (Ok(Token::Float), ".5"),
            ]
        );
    }

    #[test]
    fn operators_maximal_munch() {
        assert_eq!(
            lex("a<=b==c&&!d"),
            vec![
                (Ok(Token::Ident), "a"),
                (Ok(Token::LessEq), "<="),
                (Ok(Token::Ident), "b"),
                (Ok(Token::EqEq), "=="),
                (Ok(Token::Ident), "c"),
                (Ok(Token::AndAnd), "&&"),
                (Ok(Token::Bang), "!"),
                (Ok(Token::Ident), "d"),
            ]
        );
    }

    #[test]
    fn comments_skipped() {
        assert_eq!(
            lex("x # a comment\ny"),
            vec![(Ok(Token::Ident), "x"), (Ok(Token::Ident), "y")]
        );
    }

    #[test]
    fn heredoc_open() {
        assert_eq!(
            lex("command <<<"),
            vec![(Ok(Token::Ident), "command"), (Ok(Token::HeredocOpen), "<<<")]
        );
    }

    #[test]
    fn raw_cursor() {
        let mut stream = TokenStream::new("a \"rest");
        assert_eq!(stream.next().map(|(t, _)| t), Some(Ok(Token::Ident)));
        assert_eq!(stream.next().map(|(t, _)| t), Some(Ok(Token::DoubleQuote)));
        assert!(stream.at("rest"));
        assert_eq!(stream.peek_char(), Some('r'));
        stream.bump(4);
        assert_eq!(stream.offset(), 7);
    }
}
