//! ALang source parsing.
//!
//! Parsing happens in two passes. The tokenizer (built from nom combinators)
//! turns source text into parentheses, string literals and bare atoms while
//! skipping whitespace and `;;` comments. The reader then consumes tokens
//! recursively, opening a list on `(` and closing it on the matching `)`, so
//! strings containing parentheses and arbitrarily nested forms come out intact.

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::char,
    combinator::{recognize, value},
    error::ErrorKind,
    sequence::pair,
};

use crate::MAX_PARSE_DEPTH;
use crate::ast::{Expr, NumberType, is_valid_symbol};
use crate::{Error, ParseError, ParseErrorKind};

/// Parser settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Skip `;;` comments running to end of line
    pub handle_comments: bool,
    /// Maximum list nesting depth
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind<'a> {
    Open,
    Close,
    Str(String),
    Atom(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
struct Token<'a> {
    kind: TokenKind<'a>,
    /// Byte offset of the token's first character
    offset: usize,
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | ';')
}

/// `;;` up to (not including) the end of line
fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag(";;"), take_till(|c| c == '\n'))).parse(input)
}

fn open_paren(input: &str) -> IResult<&str, TokenKind<'_>> {
    value(TokenKind::Open, char('(')).parse(input)
}

fn close_paren(input: &str) -> IResult<&str, TokenKind<'_>> {
    value(TokenKind::Close, char(')')).parse(input)
}

fn atom(input: &str) -> IResult<&str, TokenKind<'_>> {
    let (rest, text) = take_while1(is_atom_char).parse(input)?;
    Ok((rest, TokenKind::Atom(text)))
}

/// Parse a string literal
///
/// Failures are reported as `nom::Err::Failure` so the tokenizer does not try
/// other token kinds: an unterminated string points at its opening quote
/// (`ErrorKind::Char`), a bad escape at its backslash (`ErrorKind::Escaped`).
fn string_literal(input: &str) -> IResult<&str, TokenKind<'_>> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), TokenKind::Str(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            remaining,
                            ErrorKind::Escaped,
                        )));
                    }
                    // Backslash at end of input
                    None => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            input,
                            ErrorKind::Char,
                        )));
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

fn skip_trivia(mut input: &str, handle_comments: bool) -> &str {
    loop {
        let trimmed = input.trim_start();
        if handle_comments && let Ok((rest, _)) = comment(trimmed) {
            input = rest;
            continue;
        }
        return trimmed;
    }
}

/// Convert a nom tokenizer error into a positioned parse error
fn token_error(source: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len().saturating_sub(e.input.len());
            let found = e.input.chars().next().map(String::from);
            let (kind, message) = match e.code {
                ErrorKind::Char => (
                    ParseErrorKind::Incomplete,
                    format!("Unterminated string literal starting at offset {offset}"),
                ),
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid escape sequence at offset {offset}"),
                ),
                _ => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Unexpected character at offset {offset}"),
                ),
            };
            ParseError::with_context_and_found(kind, message, source, offset, found).into()
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input").into()
        }
    }
}

fn tokenize(source: &str, config: ParseConfig) -> Result<Vec<Token<'_>>, Error> {
    let mut tokens = Vec::new();
    let mut rest = source;

    loop {
        rest = skip_trivia(rest, config.handle_comments);
        if rest.is_empty() {
            return Ok(tokens);
        }
        let offset = source.len() - rest.len();

        let result = match rest.chars().next() {
            Some('(') => open_paren(rest),
            Some(')') => close_paren(rest),
            Some('"') => string_literal(rest),
            _ => atom(rest),
        };

        match result {
            Ok((next, kind)) => {
                tokens.push(Token { kind, offset });
                rest = next;
            }
            Err(e) => return Err(token_error(source, e)),
        }
    }
}

/// Recursive-descent reader over a token stream
struct Reader<'s> {
    source: &'s str,
    tokens: Vec<Token<'s>>,
    pos: usize,
    max_depth: usize,
}

impl Reader<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(
        &self,
        kind: ParseErrorKind,
        message: String,
        offset: usize,
        found: Option<String>,
    ) -> Error {
        ParseError::with_context_and_found(kind, message, self.source, offset, found).into()
    }

    fn read_form(&mut self, depth: usize) -> Result<Expr, Error> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error(
                ParseErrorKind::Incomplete,
                "Unexpected end of input".into(),
                self.source.len(),
                None,
            ));
        };
        self.pos += 1;

        match token.kind {
            TokenKind::Open => self.read_list(token.offset, depth + 1),
            TokenKind::Close => Err(self.error(
                ParseErrorKind::InvalidSyntax,
                format!("Unexpected ')' at offset {}", token.offset),
                token.offset,
                Some(")".into()),
            )),
            TokenKind::Str(text) => Ok(Expr::String(text)),
            TokenKind::Atom(text) => self.read_atom(text, token.offset),
        }
    }

    fn read_list(&mut self, open_offset: usize, depth: usize) -> Result<Expr, Error> {
        if depth > self.max_depth {
            return Err(self.error(
                ParseErrorKind::TooDeeplyNested,
                format!("Expression too deeply nested (max depth: {})", self.max_depth),
                open_offset,
                Some("(".into()),
            ));
        }

        let mut elements = Vec::new();
        loop {
            match self.tokens.get(self.pos) {
                None => {
                    return Err(self.error(
                        ParseErrorKind::Incomplete,
                        format!("Unclosed '(' opened at offset {open_offset}"),
                        open_offset,
                        Some("(".into()),
                    ));
                }
                Some(Token {
                    kind: TokenKind::Close,
                    ..
                }) => {
                    self.pos += 1;
                    return Ok(Expr::List(elements));
                }
                Some(_) => elements.push(self.read_form(depth)?),
            }
        }
    }

    fn read_atom(&self, text: &str, offset: usize) -> Result<Expr, Error> {
        if let Ok(n) = text.parse::<NumberType>() {
            return Ok(Expr::Number(n));
        }

        let looks_numeric = text.starts_with(|c: char| c.is_ascii_digit())
            || (text.starts_with('-') && text[1..].starts_with(|c: char| c.is_ascii_digit()));
        if looks_numeric {
            return Err(self.error(
                ParseErrorKind::InvalidSyntax,
                format!("Invalid number literal '{text}'"),
                offset,
                Some(text.to_owned()),
            ));
        }

        if is_valid_symbol(text) {
            Ok(Expr::Symbol(text.to_owned()))
        } else {
            Err(self.error(
                ParseErrorKind::InvalidSyntax,
                format!("Invalid symbol '{text}'"),
                offset,
                Some(text.to_owned()),
            ))
        }
    }
}

/// Parse every top-level form in `source`
pub fn parse_program(source: &str) -> Result<Vec<Expr>, Error> {
    parse_program_with_config(source, ParseConfig::default())
}

/// Parse every top-level form in `source` with explicit settings
pub fn parse_program_with_config(source: &str, config: ParseConfig) -> Result<Vec<Expr>, Error> {
    let tokens = tokenize(source, config)?;
    let mut reader = Reader {
        source,
        tokens,
        pos: 0,
        max_depth: config.max_depth,
    };

    let mut forms = Vec::new();
    while !reader.at_end() {
        forms.push(reader.read_form(0)?);
    }
    Ok(forms)
}

/// Parse exactly one form
pub fn parse_expr(source: &str) -> Result<Expr, Error> {
    let mut forms = parse_program(source)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        0 => Err(ParseError::with_context(
            ParseErrorKind::Incomplete,
            "Expected an expression",
            source,
            source.len(),
        )
        .into()),
        n => Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Expected one expression, found {n}"),
            source,
            0,
        )
        .into()),
    }
}
