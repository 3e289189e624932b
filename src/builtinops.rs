//! Built-in operations registry.
//!
//! Every operator an ALang program can name lives in one closed table, built
//! once per process and shared by every engine. Each entry records how many
//! arguments it takes and how those arguments are evaluated:
//!
//! ```text
//! (SET_STATE proj.title "Bridge")           ; primitive, literal path + eager value
//! (STRING_CONCAT "OK, " (GET_STATE a.b))    ; primitive, eager arguments
//! (IF (EQ x "HELP") (CALL_PROCEDURE Help))  ; special form, lazy arguments
//! ```
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: receive already-evaluated arguments, left to right
//! - **Special Forms**: receive unevaluated sub-expressions and decide what to
//!   evaluate (`SEQ`, `IF`, `LET`, `CALL_PROCEDURE`); implemented in the
//!   evaluator module
//!
//! Names missing from the table are not errors: the evaluator buffers a warning
//! and carries on, so one unimplemented primitive never ends a session.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the [`PrimitiveFn`] signature
//! 2. **Add a `BuiltinOp`** to the table with its arity and argument policy
//! 3. **Add tests** covering edge cases and error conditions

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{Expr, NumberType};
use crate::evaluator::{Environment, Evaluator, eval_call_procedure, eval_if, eval_let, eval_seq};
use crate::state::StateStore;
use crate::value::Value;

/// Signature of an eager primitive: evaluated arguments, the running evaluator
/// (for state and output access) and the caller's scope
pub type PrimitiveFn = fn(Vec<Value>, &mut Evaluator<'_>, &Environment<'_>) -> Result<Value, Error>;

/// Signature of a special form: unevaluated arguments, the running evaluator,
/// the caller's scope and the current evaluation depth
pub type SpecialFormFn =
    fn(&[Expr], &mut Evaluator<'_>, &Environment<'_>, usize) -> Result<Value, Error>;

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(&self, operation: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(operation, *self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "between {min} and {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// How the arguments of an eager primitive are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Every argument is evaluated
    Eager,
    /// A bare symbol in first position is the state path itself, e.g.
    /// `(SET_STATE proj.title x)`; any other first argument is evaluated
    LiteralPath,
}

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    Function(PrimitiveFn),
    SpecialForm(SpecialFormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The name programs use for this operation
    pub id: &'static str,
    pub op_kind: OpKind,
    pub arity: Arity,
    pub arg_policy: ArgPolicy,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(self.id, arg_count)
    }
}

/// Closed registry of built-in operations, keyed by name
#[derive(Debug)]
pub struct PrimitiveTable {
    ops: Vec<BuiltinOp>,
    index: HashMap<&'static str, usize>,
}

impl PrimitiveTable {
    fn new(ops: Vec<BuiltinOp>) -> Self {
        let index = ops.iter().enumerate().map(|(i, op)| (op.id, i)).collect();
        PrimitiveTable { ops, index }
    }

    /// The table of ALang built-ins
    pub fn standard() -> &'static PrimitiveTable {
        &BUILTIN_OPS
    }

    pub fn find(&self, id: &str) -> Option<&BuiltinOp> {
        self.index.get(id).map(|&i| &self.ops[i])
    }

    pub fn ops(&self) -> &[BuiltinOp] {
        &self.ops
    }
}

//
// Argument helpers
//

fn fixed_args<const N: usize>(operation: &str, args: Vec<Value>) -> Result<[Value; N], Error> {
    <[Value; N]>::try_from(args)
        .map_err(|args| Error::arity_error(operation, Arity::Exact(N), args.len()))
}

fn text_arg(operation: &str, what: &str, value: &Value) -> Result<String, Error> {
    value
        .to_text()
        .map_err(|_| Error::TypeError(format!("{operation} requires text for {what}, got {value}")))
}

fn string_arg(operation: &str, what: &str, value: Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "{operation} requires a string {what}, got {}",
            other.kind_name()
        ))),
    }
}

//
// Builtin Function Implementations
//

fn builtin_set_state(
    args: Vec<Value>,
    ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    let [path, value] = fixed_args("SET_STATE", args)?;
    let path = string_arg("SET_STATE", "path", path)?;
    ev.state_mut().set(&path, value)?;
    Ok(Value::Absent)
}

/// `LET` bindings and parameters named like the path shadow the state entry
fn builtin_get_state(
    args: Vec<Value>,
    ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
) -> Result<Value, Error> {
    let [path] = fixed_args("GET_STATE", args)?;
    let path = string_arg("GET_STATE", "path", path)?;
    match env.get(&path) {
        Some(bound) => Ok(bound.clone()),
        None => ev.state().get(&path).cloned(),
    }
}

/// `(MAP_GET_VALUE key)` reads the current command context,
/// `(MAP_GET_VALUE map key)` reads an explicit map
fn builtin_map_get_value(
    args: Vec<Value>,
    _ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
) -> Result<Value, Error> {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(key), None, None) => {
            let key = string_arg("MAP_GET_VALUE", "key", key)?;
            StateStore::get_nested(env.command_context(), &key).cloned()
        }
        (Some(map), Some(key), None) => {
            let key = string_arg("MAP_GET_VALUE", "key", key)?;
            StateStore::get_nested(&map, &key).cloned()
        }
        _ => Err(Error::arity_error(
            "MAP_GET_VALUE",
            Arity::Range(1, 2),
            count,
        )),
    }
}

fn builtin_list_get_item(
    args: Vec<Value>,
    _ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    let [list, index] = fixed_args("LIST_GET_ITEM", args)?;
    let Value::List(items) = list else {
        return Err(Error::TypeError(format!(
            "LIST_GET_ITEM requires a list, got {}",
            list.kind_name()
        )));
    };
    let index = NumberType::try_from(index)?;
    let len = items.len();

    usize::try_from(index)
        .ok()
        .and_then(|i| items.into_iter().nth(i))
        .ok_or(Error::IndexOutOfRange { index, len })
}

/// `(OUTPUT_TO_USER_BUFFER tag message [metadata])`, metadata is ignored
fn builtin_output_to_user_buffer(
    args: Vec<Value>,
    ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    let (Some(tag), Some(message)) = (args.first(), args.get(1)) else {
        return Err(Error::arity_error(
            "OUTPUT_TO_USER_BUFFER",
            Arity::Range(2, 3),
            args.len(),
        ));
    };
    let tag = text_arg("OUTPUT_TO_USER_BUFFER", "the tag", tag)?;
    let message = text_arg("OUTPUT_TO_USER_BUFFER", "the message", message)?;
    ev.output_mut().append(tag, message);
    Ok(Value::Absent)
}

fn builtin_flush_user_output_buffer(
    _args: Vec<Value>,
    ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    Ok(Value::String(ev.flush_output()))
}

/// `(ACKNOWLEDGE_AND_LOG log_tag log_message category [content])`
///
/// The log tag and message go to the tracing log; the user sees one
/// `[category] content` line, with content defaulting to the log message.
fn builtin_acknowledge_and_log(
    args: Vec<Value>,
    ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    const OP: &str = "ACKNOWLEDGE_AND_LOG";
    let texts = args
        .iter()
        .enumerate()
        .map(|(i, value)| text_arg(OP, &format!("argument {}", i + 1), value))
        .collect::<Result<Vec<String>, Error>>()?;

    let (log_tag, log_message, category, content) = match texts.as_slice() {
        [tag, message, category] => (tag, message, category, message),
        [tag, message, category, content] => (tag, message, category, content),
        _ => return Err(Error::arity_error(OP, Arity::Range(3, 4), texts.len())),
    };

    tracing::info!(
        target: "alang::acknowledge",
        tag = %log_tag,
        message = %log_message,
        category = %category,
        "acknowledged"
    );
    ev.output_mut().append(category.clone(), content.clone());
    Ok(Value::Absent)
}

fn builtin_string_concat(
    args: Vec<Value>,
    _ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    args.iter()
        .map(|value| text_arg("STRING_CONCAT", "every argument", value))
        .collect::<Result<String, Error>>()
        .map(Value::String)
}

fn builtin_eq(
    args: Vec<Value>,
    _ev: &mut Evaluator<'_>,
    _env: &Environment<'_>,
) -> Result<Value, Error> {
    let [first, second] = fixed_args("EQ", args)?;
    Ok(Value::Bool(first.loosely_equals(&second)))
}

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection of `BuiltinOp` values for
/// ease of auditing, indexed by name once at initialization via a `LazyLock`.
static BUILTIN_OPS: LazyLock<PrimitiveTable> = LazyLock::new(|| {
    fn function(id: &'static str, arity: Arity, arg_policy: ArgPolicy, f: PrimitiveFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(f),
            arity,
            arg_policy,
        }
    }

    fn special_form(id: &'static str, arity: Arity, f: SpecialFormFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(f),
            arity,
            arg_policy: ArgPolicy::Eager,
        }
    }

    PrimitiveTable::new(vec![
        // Control flow
        special_form("SEQ", Arity::Any, eval_seq),
        special_form("IF", Arity::Range(2, 3), eval_if),
        special_form("LET", Arity::AtLeast(1), eval_let),
        special_form("CALL_PROCEDURE", Arity::AtLeast(1), eval_call_procedure),
        // State
        function("SET_STATE", Arity::Exact(2), ArgPolicy::LiteralPath, builtin_set_state),
        function("GET_STATE", Arity::Exact(1), ArgPolicy::LiteralPath, builtin_get_state),
        function("MAP_GET_VALUE", Arity::Range(1, 2), ArgPolicy::Eager, builtin_map_get_value),
        function("LIST_GET_ITEM", Arity::Exact(2), ArgPolicy::Eager, builtin_list_get_item),
        // Output
        function(
            "OUTPUT_TO_USER_BUFFER",
            Arity::Range(2, 3),
            ArgPolicy::Eager,
            builtin_output_to_user_buffer,
        ),
        function(
            "FLUSH_USER_OUTPUT_BUFFER",
            Arity::Exact(0),
            ArgPolicy::Eager,
            builtin_flush_user_output_buffer,
        ),
        function(
            "ACKNOWLEDGE_AND_LOG",
            Arity::Range(3, 4),
            ArgPolicy::Eager,
            builtin_acknowledge_and_log,
        ),
        // Text and comparison
        function("STRING_CONCAT", Arity::Any, ArgPolicy::Eager, builtin_string_concat),
        function("EQ", Arity::Exact(2), ArgPolicy::Eager, builtin_eq),
    ])
});
