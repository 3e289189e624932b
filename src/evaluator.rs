//! Expression evaluation and the ALang special forms.
//!
//! An [`Evaluator`] lives for one piece of work (a turn, or an ad-hoc
//! expression) and borrows everything it touches from the owning engine: the
//! procedure registry, the primitive table, the state store and the output
//! buffer. Scopes are [`Environment`] chains borrowed from the caller, so a
//! procedure call or `LET` never copies its parent scope.

use std::collections::HashMap;

use crate::Error;
use crate::ast::Expr;
use crate::builtinops::{ArgPolicy, Arity, BuiltinOp, OpKind, PrimitiveTable};
use crate::output::OutputBuffer;
use crate::registry::ProcedureRegistry;
use crate::state::StateStore;
use crate::value::Value;

/// Reserved symbol evaluating to [`Value::Absent`]
pub const NIL: &str = "NIL";
/// Reserved symbol evaluating to `Value::Bool(true)`
pub const TRUE: &str = "TRUE";
/// Reserved symbol evaluating to `Value::Bool(false)`
pub const FALSE: &str = "FALSE";

/// Head symbol of the binding form, walked specially by [`visit_forms`]
pub const LET: &str = "LET";
/// Head symbol of a procedure call
pub const CALL_PROCEDURE: &str = "CALL_PROCEDURE";

static ABSENT: Value = Value::Absent;

/// Lexical scope: procedure parameters and `LET` bindings
///
/// Every procedure call starts a fresh root scope carrying the call's command
/// context; `LET` scopes chain to their parent and share its context.
#[derive(Debug, Default)]
pub struct Environment<'p> {
    bindings: HashMap<String, Value>,
    parent: Option<&'p Environment<'p>>,
    command_context: Option<Value>,
}

impl<'p> Environment<'p> {
    /// Top-level scope with no bindings and no command context
    pub fn new() -> Self {
        Environment::default()
    }

    /// Root scope of a procedure call
    pub fn for_call(command_context: Value) -> Self {
        Environment {
            bindings: HashMap::new(),
            parent: None,
            command_context: Some(command_context),
        }
    }

    pub fn with_parent(parent: &'p Environment<'p>) -> Self {
        Environment {
            bindings: HashMap::new(),
            parent: Some(parent),
            command_context: None,
        }
    }

    pub fn define(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.parent.and_then(|parent| parent.get(name)))
    }

    /// The value `(MAP_GET_VALUE key)` reads from, Absent outside any call
    pub fn command_context(&self) -> &Value {
        match (&self.command_context, self.parent) {
            (Some(context), _) => context,
            (None, Some(parent)) => parent.command_context(),
            (None, None) => &ABSENT,
        }
    }
}

pub struct Evaluator<'a> {
    registry: &'a ProcedureRegistry,
    primitives: &'a PrimitiveTable,
    state: &'a mut StateStore,
    output: &'a mut OutputBuffer,
    /// Every chunk produced by `FLUSH_USER_OUTPUT_BUFFER`, in order
    flushed: Vec<String>,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        registry: &'a ProcedureRegistry,
        primitives: &'a PrimitiveTable,
        state: &'a mut StateStore,
        output: &'a mut OutputBuffer,
        max_depth: usize,
    ) -> Self {
        Evaluator {
            registry,
            primitives,
            state,
            output,
            flushed: Vec::new(),
            max_depth,
        }
    }

    /// Evaluate an expression (public API)
    pub fn eval(&mut self, expr: &Expr, env: &Environment<'_>) -> Result<Value, Error> {
        self.eval_with_depth_tracking(expr, env, 0)
    }

    /// Consume the evaluator, returning the chunks flushed while it ran
    pub fn into_flushed(self) -> Vec<String> {
        self.flushed
    }

    /// Evaluate an expression with depth tracking to prevent stack overflow
    pub(crate) fn eval_with_depth_tracking(
        &mut self,
        expr: &Expr,
        env: &Environment<'_>,
        depth: usize,
    ) -> Result<Value, Error> {
        self.check_depth(depth)?;
        match expr {
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Symbol(name) => self.resolve_symbol(name, env),
            Expr::List(elements) => self
                .eval_list(elements, env, depth)
                .map_err(|err| add_context(err, expr)),
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), Error> {
        if depth >= self.max_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.max_depth
            )));
        }
        Ok(())
    }

    /// Symbols resolve as reserved words, then scope bindings, then a dotted
    /// path into a bound map, then a state path
    fn resolve_symbol(&self, name: &str, env: &Environment<'_>) -> Result<Value, Error> {
        match name {
            NIL => return Ok(Value::Absent),
            TRUE => return Ok(Value::Bool(true)),
            FALSE => return Ok(Value::Bool(false)),
            _ => {}
        }

        if let Some(value) = env.get(name) {
            return Ok(value.clone());
        }

        if let Some((head, rest)) = name.split_once('.')
            && let Some(root) = env.get(head)
        {
            let mut current = root;
            for key in rest.split('.') {
                current = StateStore::get_nested(current, key)?;
            }
            return Ok(current.clone());
        }

        self.state.get(name).cloned()
    }

    fn eval_list(
        &mut self,
        elements: &[Expr],
        env: &Environment<'_>,
        depth: usize,
    ) -> Result<Value, Error> {
        match elements {
            [] => Err(Error::EvalError("Cannot evaluate empty list".to_owned())),

            [Expr::Symbol(name), arg_exprs @ ..] => {
                let primitives = self.primitives;
                let Some(op) = primitives.find(name) else {
                    return Ok(self.unknown_primitive(name));
                };
                op.validate_arity(arg_exprs.len())?;

                match op.op_kind {
                    OpKind::SpecialForm(special_form) => special_form(arg_exprs, self, env, depth),
                    OpKind::Function(func) => {
                        let args = self.eval_args(op, arg_exprs, env, depth)?;
                        func(args, self, env)
                    }
                }
            }

            [head, ..] => Err(Error::TypeError(format!(
                "operator must be a symbol, got {head}"
            ))),
        }
    }

    /// Evaluate the arguments of an eager primitive, left to right
    fn eval_args(
        &mut self,
        op: &BuiltinOp,
        arg_exprs: &[Expr],
        env: &Environment<'_>,
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        arg_exprs
            .iter()
            .enumerate()
            .map(|(i, arg)| match (op.arg_policy, i, arg) {
                (ArgPolicy::LiteralPath, 0, Expr::Symbol(path)) => Ok(Value::String(path.clone())),
                _ => self.eval_with_depth_tracking(arg, env, depth + 1),
            })
            .collect()
    }

    /// An operator missing from the primitive table: warn, buffer a notice
    /// for the user and carry on without evaluating its arguments
    fn unknown_primitive(&mut self, name: &str) -> Value {
        tracing::warn!(primitive = name, "primitive not implemented");
        self.output
            .append("WARNING", format!("Primitive '{name}' not implemented."));
        Value::Absent
    }

    /// Call a procedure by name with already-evaluated arguments
    ///
    /// Parameters are bound positionally in a fresh frame; missing arguments
    /// are Absent and surplus ones are an arity error. The first argument is
    /// the frame's command context. Returns the last chunk the body flushed,
    /// or Absent if it flushed nothing.
    pub fn call_procedure(
        &mut self,
        name: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, Error> {
        self.check_depth(depth)?;
        let registry = self.registry;
        let procedure = registry.lookup(name)?;

        let params = &procedure.params;
        if !params.is_empty() && args.len() > params.len() {
            return Err(Error::arity_error(
                name,
                Arity::Range(0, params.len()),
                args.len(),
            ));
        }

        tracing::trace!(procedure = name, depth, "calling procedure");

        let mut frame = Environment::for_call(args.first().cloned().unwrap_or_default());
        let mut args = args.into_iter();
        for param in params {
            frame.define(param.clone(), args.next().unwrap_or_default());
        }

        let flushes_before = self.flushed.len();
        for statement in &procedure.body {
            self.eval_with_depth_tracking(statement, &frame, depth + 1)
                .map_err(|err| match err {
                    Error::EvalError(msg) => Error::EvalError(format!("{msg}\n  In procedure: {name}")),
                    Error::TypeError(msg) => Error::TypeError(format!("{msg}\n  In procedure: {name}")),
                    other => other,
                })?;
        }

        Ok(self.flushed[flushes_before..]
            .last()
            .cloned()
            .map_or(Value::Absent, Value::String))
    }

    pub(crate) fn state(&self) -> &StateStore {
        self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut StateStore {
        self.state
    }

    pub(crate) fn output_mut(&mut self) -> &mut OutputBuffer {
        self.output
    }

    /// Drain the output buffer, remembering the chunk for the turn result
    pub(crate) fn flush_output(&mut self) -> String {
        let chunk = self.output.flush();
        self.flushed.push(chunk.clone());
        chunk
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Expr) -> Error {
    let context = format!("while evaluating: {expr}");
    match error {
        Error::EvalError(msg) => Error::EvalError(format!("{msg}\n  Context: {context}")),
        Error::TypeError(msg) => Error::TypeError(format!("{msg}\n  Context: {context}")),
        // Lookup, state and arity errors already name what went wrong
        other => other,
    }
}

/// Call `visit` with the head symbol and arguments of every operator form
/// inside `expr`, outermost first
///
/// `LET` binding pairs are not operator forms; only their value expressions
/// are walked.
pub(crate) fn visit_forms(expr: &Expr, visit: &mut dyn FnMut(&str, &[Expr])) {
    let Expr::List(elements) = expr else {
        return;
    };

    match elements.as_slice() {
        [Expr::Symbol(head), args @ ..] => {
            visit(head, args);
            if head == LET
                && let [Expr::List(bindings), body @ ..] = args
            {
                for binding in bindings {
                    if let Expr::List(pair) = binding {
                        for value_expr in pair.iter().skip(1) {
                            visit_forms(value_expr, visit);
                        }
                    }
                }
                for statement in body {
                    visit_forms(statement, visit);
                }
            } else {
                for arg in args {
                    visit_forms(arg, visit);
                }
            }
        }
        _ => {
            for element in elements {
                visit_forms(element, visit);
            }
        }
    }
}

//
// Special forms
//

/// `(SEQ e1 e2 ...)`: evaluate in order, yielding the last value
pub(crate) fn eval_seq(
    args: &[Expr],
    ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let mut result = Value::Absent;
    for expr in args {
        result = ev.eval_with_depth_tracking(expr, env, depth + 1)?;
    }
    Ok(result)
}

/// `(IF condition then [else])`, the untaken branch is never evaluated
pub(crate) fn eval_if(
    args: &[Expr],
    ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let (condition_expr, then_expr, else_expr) = match args {
        [condition, then] => (condition, then, None),
        [condition, then, otherwise] => (condition, then, Some(otherwise)),
        _ => return Err(Error::arity_error("IF", Arity::Range(2, 3), args.len())),
    };

    if ev
        .eval_with_depth_tracking(condition_expr, env, depth + 1)?
        .is_truthy()
    {
        ev.eval_with_depth_tracking(then_expr, env, depth + 1)
    } else if let Some(else_expr) = else_expr {
        ev.eval_with_depth_tracking(else_expr, env, depth + 1)
    } else {
        Ok(Value::Absent)
    }
}

/// `(LET ((name expr) ...) body ...)`
///
/// Bindings are evaluated in order, each seeing the ones before it; the body
/// runs as an implicit `SEQ` in the extended scope.
pub(crate) fn eval_let(
    args: &[Expr],
    ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let [bindings_expr, body @ ..] = args else {
        return Err(Error::arity_error(LET, Arity::AtLeast(1), 0));
    };
    let Expr::List(bindings) = bindings_expr else {
        return Err(Error::TypeError(format!(
            "LET bindings must be a list, got {bindings_expr}"
        )));
    };

    let mut scope = Environment::with_parent(env);
    for binding in bindings {
        match binding {
            Expr::List(pair) => match pair.as_slice() {
                [Expr::Symbol(name), value_expr] => {
                    let value = ev.eval_with_depth_tracking(value_expr, &scope, depth + 1)?;
                    scope.define(name.clone(), value);
                }
                _ => {
                    return Err(Error::TypeError(format!(
                        "LET binding must be (name expression), got {binding}"
                    )));
                }
            },
            _ => {
                return Err(Error::TypeError(format!(
                    "LET binding must be (name expression), got {binding}"
                )));
            }
        }
    }

    eval_seq(body, ev, &scope, depth)
}

/// `(CALL_PROCEDURE name arg ...)`
///
/// A bare symbol names the procedure literally; any other name expression
/// must evaluate to a string. Calling an undefined procedure buffers an
/// `[ERROR]` line and yields the error text instead of failing the caller.
pub(crate) fn eval_call_procedure(
    args: &[Expr],
    ev: &mut Evaluator<'_>,
    env: &Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let [name_expr, arg_exprs @ ..] = args else {
        return Err(Error::arity_error(CALL_PROCEDURE, Arity::AtLeast(1), 0));
    };

    let name = match name_expr {
        Expr::Symbol(name) => name.clone(),
        other => String::try_from(ev.eval_with_depth_tracking(other, env, depth + 1)?)?,
    };

    // A missing callee is reported to the caller, which carries on
    if let Err(err) = ev.registry.lookup(&name) {
        tracing::warn!(procedure = %name, "call to undefined procedure");
        ev.output.append("ERROR", err.to_string());
        return Ok(Value::String(format!("ERROR: {err}")));
    }

    let values = arg_exprs
        .iter()
        .map(|arg| ev.eval_with_depth_tracking(arg, env, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;

    ev.call_procedure(&name, values, depth + 1)
}
