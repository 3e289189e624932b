//! This module defines the syntax tree produced by the parser. The main enum,
//! [`Expr`], covers the four shapes ALang source can take: symbols, string
//! literals, integer literals and parenthesized lists. Lists are the only
//! compound form; their head names the operator. Display output is valid ALang
//! source, so a printed expression parses back to the same tree.
//!
//! Ergonomic helpers such as [`sym`], [`string`], [`num`] and [`list`] are
//! provided for building trees in tests.

/// Type alias for number values in the interpreter
pub type NumberType = i64;

/// Allowed non-alphanumeric characters in symbol names
/// `.` separates state path segments, the rest are common in operator names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$.:";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// A node of the ALang syntax tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Bare identifier: operator names, parameters, state paths
    Symbol(String),
    /// Quoted text with escapes already resolved
    String(String),
    /// Integer literal
    Number(NumberType),
    /// Parenthesized form
    List(Vec<Expr>),
}

impl Expr {
    /// The operator name if this is a list headed by a symbol
    pub fn head_symbol(&self) -> Option<&str> {
        match self {
            Expr::List(elements) => match elements.first() {
                Some(Expr::Symbol(name)) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// The elements after the head if this is a non-empty list
    pub fn tail(&self) -> &[Expr] {
        match self {
            Expr::List(elements) if !elements.is_empty() => &elements[1..],
            _ => &[],
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Expr::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Helper function for creating symbols
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Expr {
    Expr::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating string literals
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn string<S: AsRef<str>>(text: S) -> Expr {
    Expr::String(text.as_ref().to_owned())
}

/// Helper function for creating number literals
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn num(n: NumberType) -> Expr {
    Expr::Number(n)
}

/// Helper function for creating list forms
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn list<const N: usize>(elements: [Expr; N]) -> Expr {
    Expr::List(elements.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_validation() {
        let cases = [
            ("SEQ", true),
            ("proj.title", true),
            ("sys.current_mode", true),
            ("commandName", true),
            ("-", true),
            ("a-b?", true),
            ("", false),
            ("1abc", false),
            ("-5x", false),
            ("has space", false),
            ("semi;colon", false),
            ("quote\"d", false),
        ];

        for (name, expected) in cases {
            assert_eq!(is_valid_symbol(name), expected, "symbol {name:?}");
        }
    }

    #[test]
    fn test_display_is_valid_source() {
        let expr = list([
            sym("SET_STATE"),
            sym("a.b"),
            string("(x) \"quoted\"\n"),
            num(-3),
            list([]),
        ]);
        assert_eq!(
            expr.to_string(),
            r#"(SET_STATE a.b "(x) \"quoted\"\n" -3 ())"#
        );
    }

    #[test]
    fn test_head_and_tail() {
        let expr = list([sym("IF"), sym("x"), num(1)]);
        assert_eq!(expr.head_symbol(), Some("IF"));
        assert_eq!(expr.tail(), &[sym("x"), num(1)]);

        let headless = list([string("IF"), num(1)]);
        assert_eq!(headless.head_symbol(), None);
        assert_eq!(list([]).tail(), &[] as &[Expr]);
        assert_eq!(sym("x").as_symbol(), Some("x"));
        assert_eq!(num(1).as_symbol(), None);
    }
}
