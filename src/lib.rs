//! ALang - turn-based procedure interpreter
//!
//! This crate interprets ALang, a small Lisp-like language for describing how a
//! conversational system reacts to commands. A program is a list of procedure
//! definitions built from special forms and primitives that read and write a
//! hierarchical state store and buffer tagged output lines:
//!
//! ```text
//! ;; Greets the user and remembers that it did
//! (DEFINE_PROCEDURE OnSystemInit ()
//!     (SEQ
//!         (SET_STATE sys.current_mode "IDLE")
//!         (OUTPUT_TO_USER_BUFFER "AI_PROVIDE_DATA" "Ready." NIL)
//!         (FLUSH_USER_OUTPUT_BUFFER)))
//! ```
//!
//! A host loads the program once and then drives it one turn at a time:
//!
//! ```
//! use alang::engine::Engine;
//! use alang::value::Value;
//!
//! let source = r#"
//!     (DEFINE_PROCEDURE OnSystemInit () (OUTPUT_TO_USER_BUFFER "AI_PROVIDE_DATA" "Ready." NIL))
//! "#;
//! let mut engine = Engine::load_program(source).unwrap();
//! let output = engine.invoke_procedure("OnSystemInit", Value::Absent).unwrap();
//! assert_eq!(output, "[AI_PROVIDE_DATA] Ready.");
//! ```
//!
//! ## Explicit Semantics
//!
//! - Values have explicit kinds (absent, boolean, number, string, list, map) with
//!   defined truthiness and equality rather than incidental string comparison
//! - Procedure parameters live in call frames, so nested calls never clobber
//!   each other's arguments
//! - State persists across turns for the lifetime of the [`engine::Engine`]
//! - Unknown primitives produce a buffered warning instead of aborting the turn
//!
//! ## Modules
//!
//! - `parser`: tokenizer and recursive-descent reader for ALang source
//! - `registry`: procedure definitions extracted from a parsed program
//! - `state`: hierarchical state store addressed by dotted paths
//! - `output`: turn-scoped tagged output buffer
//! - `builtinops`: the primitive table and built-in operations
//! - `evaluator`: expression evaluation and special forms
//! - `engine`: the session facade tying everything together
//! - `json`: conversion between runtime values and JSON (feature `json`)

use std::fmt;

use crate::builtinops::Arity;

/// Maximum parsing depth to prevent stack overflow on pathological input
/// This limits how deeply lists may be nested in program source
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum evaluation depth to prevent stack overflow in recursive evaluation
/// Set higher than parse depth to allow for nested procedure calls
pub const MAX_EVAL_DEPTH: usize = 256;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, stray parentheses, bad escapes)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete expression where exactly one was expected
    TrailingContent,
    /// Valid syntax in a host format (such as JSON) that ALang values cannot represent
    Unsupported,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the source where the problem was detected
    pub offset: usize,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        offset: usize,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            offset,
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no source position
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, 0, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        Self::with_context_and_found(kind, message, input, error_offset, None)
    }

    /// Create a ParseError with context and found token
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Offsets are byte positions; the snippet is cut on character boundaries
        let char_offset = input.get(..error_offset).map_or(0, |p| p.chars().count());
        let context_start = char_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        // Replace newlines with visible markers for better error display
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, error_offset, Some(display_context), found)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed program source (fatal at load)
    ParseError(ParseError),
    /// Two `DEFINE_PROCEDURE` forms share a name (fatal at load)
    DuplicateProcedure(String),
    /// A `DEFINE_PROCEDURE` form is malformed (fatal at load)
    InvalidDefinition(String),
    /// A procedure was invoked or called that the program never defined
    ProcedureNotFound(String),
    StateKeyNotFound(String),
    /// An intermediate path segment holds a non-map value
    StatePathConflict(String),
    InvalidStatePath(String),
    KeyNotFound(String),
    IndexOutOfRange {
        index: i64,
        len: usize,
    },
    TypeError(String),
    EvalError(String),
    ArityError {
        operation: String,
        expected: Arity,
        got: usize,
    },
}

impl Error {
    /// Create an ArityError for the named operation
    pub fn arity_error(operation: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            operation: operation.into(),
            expected,
            got,
        }
    }

    /// Whether this error aborts `Engine::load_program` rather than a single turn
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Error::ParseError(_) | Error::DuplicateProcedure(_) | Error::InvalidDefinition(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError at offset {}: {}", e.offset, e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::DuplicateProcedure(name) => {
                write!(f, "Duplicate procedure definition: '{name}'")
            }
            Error::InvalidDefinition(msg) => write!(f, "Invalid procedure definition: {msg}"),
            Error::ProcedureNotFound(name) => write!(f, "Procedure '{name}' not found."),
            Error::StateKeyNotFound(path) => write!(f, "State key not found: {path}"),
            Error::StatePathConflict(path) => {
                write!(f, "State path conflict: '{path}' holds a non-map value")
            }
            Error::InvalidStatePath(path) => write!(f, "Invalid state path: '{path}'"),
            Error::KeyNotFound(key) => write!(f, "Key not found: {key}"),
            Error::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} out of range for list of length {len}")
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::ArityError {
                operation,
                expected,
                got,
            } => write!(
                f,
                "ArityError: {operation} expects {expected} arguments, got {got}"
            ),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

pub mod ast;
pub mod builtinops;
pub mod engine;
pub mod evaluator;
pub mod output;
pub mod parser;
pub mod registry;
pub mod state;
pub mod value;

#[cfg(feature = "json")]
pub mod json;
