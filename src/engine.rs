//! The session facade.
//!
//! An [`Engine`] owns one loaded program together with the session state and
//! output buffer it drives. Hosts call [`Engine::init`] once after loading and
//! then one of the turn methods per user input:
//!
//! - [`Engine::invoke_procedure`] returns the turn's output or the first error
//! - [`Engine::run_turn`] never fails; errors become an `ERROR:` line
//! - [`Engine::dispatch`] wraps a classified command and runs the dispatcher
//!
//! Each turn drains the output buffer, so no output leaks into the next turn.

use std::collections::BTreeSet;

use crate::ast::Expr;
use crate::builtinops::PrimitiveTable;
use crate::evaluator::{CALL_PROCEDURE, Environment, Evaluator, visit_forms};
use crate::output::OutputBuffer;
use crate::parser::{ParseConfig, parse_program_with_config};
use crate::registry::ProcedureRegistry;
use crate::state::StateStore;
use crate::value::Value;
use crate::{Error, MAX_EVAL_DEPTH};

/// Procedure run once after loading
pub const INIT_PROCEDURE: &str = "OnSystemInit";

/// Procedure receiving classified `{command, args}` maps
pub const DISPATCH_PROCEDURE: &str = "DispatchUserCommand";

/// State path mirroring the argument of the current turn
pub const DEFAULT_CONTEXT_PATH: &str = "session.parsed_command_details";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub parse: ParseConfig,
    pub max_eval_depth: usize,
    /// Where each turn's argument is recorded in state, `None` to skip
    pub context_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parse: ParseConfig::default(),
            max_eval_depth: MAX_EVAL_DEPTH,
            context_path: Some(DEFAULT_CONTEXT_PATH.to_owned()),
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    registry: ProcedureRegistry,
    primitives: &'static PrimitiveTable,
    state: StateStore,
    output: OutputBuffer,
    config: EngineConfig,
    unknown_primitives: Vec<String>,
}

impl Engine {
    /// Parse `source` and register its procedures with the default configuration
    pub fn load_program(source: &str) -> Result<Engine, Error> {
        Self::load_program_with_config(source, EngineConfig::default())
    }

    pub fn load_program_with_config(source: &str, config: EngineConfig) -> Result<Engine, Error> {
        let forms = parse_program_with_config(source, config.parse)?;
        let registry = ProcedureRegistry::build(&forms)?;
        let primitives = PrimitiveTable::standard();
        let unknown_primitives = check_program(&registry, primitives);

        tracing::info!(
            procedures = registry.len(),
            unknown_primitives = unknown_primitives.len(),
            "loaded program"
        );

        Ok(Engine {
            registry,
            primitives,
            state: StateStore::new(),
            output: OutputBuffer::new(),
            config,
            unknown_primitives,
        })
    }

    /// Run `OnSystemInit`
    pub fn init(&mut self) -> Result<String, Error> {
        self.invoke_procedure(INIT_PROCEDURE, Value::Absent)
    }

    /// Run one turn: call procedure `name` with `args` and collect its output
    ///
    /// A non-Absent `args` becomes the procedure's single argument and is
    /// recorded in state at the configured context path. On error the
    /// turn's pending output is dropped; state written before the error stays.
    pub fn invoke_procedure(&mut self, name: &str, args: Value) -> Result<String, Error> {
        let (output, result) = self.execute_turn(name, args);
        result.map(|()| output).inspect_err(|err| {
            tracing::warn!(procedure = name, error = %err, "turn failed");
        })
    }

    /// Like [`Engine::invoke_procedure`] but renders errors into the output
    ///
    /// Output produced before the error is kept, followed by `ERROR: <message>`.
    pub fn run_turn(&mut self, name: &str, args: Value) -> String {
        let (output, result) = self.execute_turn(name, args);
        match result {
            Ok(()) => output,
            Err(err) => {
                tracing::warn!(procedure = name, error = %err, "turn failed");
                if output.is_empty() {
                    format!("ERROR: {err}")
                } else {
                    format!("{output}\nERROR: {err}")
                }
            }
        }
    }

    /// Hand a classified command to `DispatchUserCommand`
    pub fn dispatch<I, S>(&mut self, command: &str, args: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invoke_procedure(DISPATCH_PROCEDURE, Value::command(command, args))
    }

    fn execute_turn(&mut self, name: &str, args: Value) -> (String, Result<(), Error>) {
        tracing::debug!(procedure = name, "invoking procedure");

        // An unknown procedure must not touch state
        if let Err(err) = self.registry.lookup(name) {
            return (self.output.flush(), Err(err));
        }

        let recorded = match &self.config.context_path {
            Some(path) if !args.is_absent() => self.state.set(path, args.clone()),
            _ => Ok(()),
        };
        let call_args = if args.is_absent() { Vec::new() } else { vec![args] };

        let mut evaluator = Evaluator::new(
            &self.registry,
            self.primitives,
            &mut self.state,
            &mut self.output,
            self.config.max_eval_depth,
        );
        let result = recorded.and_then(|()| evaluator.call_procedure(name, call_args, 0).map(drop));

        let mut chunks = evaluator.into_flushed();
        chunks.push(self.output.flush());
        let output = chunks
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        (output, result)
    }

    /// Parse and evaluate `source` against the session, returning the value
    /// of the last form
    ///
    /// Buffered output stays in the buffer for [`Engine::flush_output`].
    pub fn evaluate(&mut self, source: &str) -> Result<Value, Error> {
        let forms = parse_program_with_config(source, self.config.parse)?;
        let mut evaluator = Evaluator::new(
            &self.registry,
            self.primitives,
            &mut self.state,
            &mut self.output,
            self.config.max_eval_depth,
        );

        let env = Environment::new();
        let mut result = Value::Absent;
        for form in &forms {
            result = evaluator.eval(form, &env)?;
        }
        Ok(result)
    }

    pub fn flush_output(&mut self) -> String {
        self.output.flush()
    }

    pub fn get_state(&self, path: &str) -> Result<&Value, Error> {
        self.state.get(path)
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.registry
    }

    /// Operators named in the program that are neither special forms nor primitives
    pub fn unknown_primitives(&self) -> &[String] {
        &self.unknown_primitives
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `json` and run it as the argument of procedure `name`
    #[cfg(feature = "json")]
    pub fn invoke_procedure_json(&mut self, name: &str, json: &str) -> Result<String, Error> {
        let args = crate::json::parse_value(json)?;
        self.invoke_procedure(name, args)
    }
}

/// Walk every procedure body, returning the unknown operators in sorted order
///
/// `CALL_PROCEDURE` targets named literally but never defined are logged.
fn check_program(registry: &ProcedureRegistry, primitives: &PrimitiveTable) -> Vec<String> {
    let mut unknown = BTreeSet::new();

    for name in registry.names() {
        let Some(procedure) = registry.get(name) else {
            continue;
        };
        for statement in &procedure.body {
            visit_forms(statement, &mut |head, args| {
                if primitives.find(head).is_none() {
                    unknown.insert(head.to_owned());
                } else if head == CALL_PROCEDURE
                    && let Some(Expr::Symbol(target) | Expr::String(target)) = args.first()
                    && !registry.contains(target)
                {
                    tracing::warn!(caller = name, target = %target, "call to undefined procedure");
                }
            });
        }
    }

    for op in &unknown {
        tracing::warn!(primitive = %op, "program uses a primitive that is not implemented");
    }
    unknown.into_iter().collect()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
        (DEFINE_PROCEDURE OnSystemInit ()
            (SEQ
                (SET_STATE sys.current_mode "IDLE")
                (OUTPUT_TO_USER_BUFFER "AI_PROVIDE_DATA" "Ready." NIL)
                (FLUSH_USER_OUTPUT_BUFFER)))
        (DEFINE_PROCEDURE DispatchUserCommand (details)
            (IF (EQ (MAP_GET_VALUE details "command") "ECHO")
                (OUTPUT_TO_USER_BUFFER "AI_ECHO" (LIST_GET_ITEM (MAP_GET_VALUE "args") 0) NIL)
                (OUTPUT_TO_USER_BUFFER "AI_ERROR" "unknown" NIL)))
        (DEFINE_PROCEDURE TwoChunks ()
            (SEQ
                (OUTPUT_TO_USER_BUFFER "A" "first" NIL)
                (FLUSH_USER_OUTPUT_BUFFER)
                (FLUSH_USER_OUTPUT_BUFFER)
                (OUTPUT_TO_USER_BUFFER "B" "second" NIL)))
        (DEFINE_PROCEDURE FailsLate ()
            (SEQ
                (SET_STATE progress.step "before")
                (OUTPUT_TO_USER_BUFFER "A" "partial" NIL)
                (LIST_GET_ITEM (GET_STATE progress.step) 0)))
        (DEFINE_PROCEDURE Sloppy ()
            (SEQ (MYSTERY_OP 1) (LET ((x (OTHER_OP))) (CALL_PROCEDURE Nowhere x))))
    "#;

    fn engine() -> Engine {
        Engine::load_program(PROGRAM).unwrap()
    }

    #[test]
    fn test_load_and_init() {
        let mut engine = engine();
        assert_eq!(engine.procedures().len(), 5);
        assert_eq!(engine.init().unwrap(), "[AI_PROVIDE_DATA] Ready.");
        assert_eq!(engine.get_state("sys.current_mode").unwrap(), &Value::from("IDLE"));
    }

    #[test]
    fn test_unknown_primitives_collected_at_load() {
        let engine = engine();
        assert_eq!(engine.unknown_primitives(), ["MYSTERY_OP", "OTHER_OP"]);
    }

    #[test]
    fn test_dispatch_records_context_and_binds_argument() {
        let mut engine = engine();
        assert_eq!(engine.dispatch("ECHO", ["hello"]).unwrap(), "[AI_ECHO] hello");
        assert_eq!(
            engine.get_state("session.parsed_command_details.command").unwrap(),
            &Value::from("ECHO")
        );
        assert_eq!(engine.dispatch("OTHER", ["x"]).unwrap(), "[AI_ERROR] unknown");
    }

    #[test]
    fn test_context_path_can_be_disabled() {
        let config = EngineConfig {
            context_path: None,
            ..EngineConfig::default()
        };
        let mut engine = Engine::load_program_with_config(PROGRAM, config).unwrap();
        engine.dispatch("ECHO", ["hello"]).unwrap();
        assert!(engine.state().is_empty());
    }

    #[test]
    fn test_turn_output_joins_non_empty_chunks() {
        let mut engine = engine();
        assert_eq!(
            engine.invoke_procedure("TwoChunks", Value::Absent).unwrap(),
            "[A] first\n[B] second"
        );
        assert_eq!(engine.flush_output(), "");
    }

    #[test]
    fn test_errors_discard_pending_output_but_keep_state() {
        let mut engine = engine();
        let err = engine.invoke_procedure("FailsLate", Value::Absent).unwrap_err();
        assert!(matches!(err, Error::TypeError(_)), "{err:?}");
        assert_eq!(engine.get_state("progress.step").unwrap(), &Value::from("before"));
        assert_eq!(engine.flush_output(), "");

        let rendered = engine.run_turn("FailsLate", Value::Absent);
        assert!(rendered.starts_with("[A] partial\nERROR: Type error: LIST_GET_ITEM requires a list"));
    }

    #[test]
    fn test_unknown_procedure() {
        let mut engine = engine();
        assert_eq!(
            engine.invoke_procedure("NoSuchProc", Value::from("x")),
            Err(Error::ProcedureNotFound("NoSuchProc".into()))
        );
        // The argument was never recorded
        assert!(engine.state().is_empty());
        assert_eq!(
            engine.run_turn("NoSuchProc", Value::Absent),
            "ERROR: Procedure 'NoSuchProc' not found."
        );
    }

    #[test]
    fn test_unknown_primitive_at_runtime() {
        let mut engine = engine();
        let output = engine.invoke_procedure("Sloppy", Value::Absent).unwrap();
        assert_eq!(
            output,
            "[WARNING] Primitive 'MYSTERY_OP' not implemented.\n\
             [WARNING] Primitive 'OTHER_OP' not implemented.\n\
             [ERROR] Procedure 'Nowhere' not found."
        );
    }

    #[test]
    fn test_nested_call_to_undefined_procedure_continues_turn() {
        let source = r#"
            (DEFINE_PROCEDURE Turn ()
                (SEQ
                    (OUTPUT_TO_USER_BUFFER "T" "before" NIL)
                    (FLUSH_USER_OUTPUT_BUFFER)
                    (SET_STATE turn.result (CALL_PROCEDURE Missing))
                    (OUTPUT_TO_USER_BUFFER "T" "after" NIL)
                    (FLUSH_USER_OUTPUT_BUFFER)))
        "#;
        let mut engine = Engine::load_program(source).unwrap();

        assert_eq!(
            engine.invoke_procedure("Turn", Value::Absent).unwrap(),
            "[T] before\n[ERROR] Procedure 'Missing' not found.\n[T] after"
        );
        assert_eq!(
            engine.get_state("turn.result").unwrap(),
            &Value::from("ERROR: Procedure 'Missing' not found.")
        );
        assert_eq!(
            engine.run_turn("Turn", Value::Absent),
            "[T] before\n[ERROR] Procedure 'Missing' not found.\n[T] after"
        );

        // Only the top-level procedure name is a hard error
        assert_eq!(
            engine.invoke_procedure("Missing", Value::Absent),
            Err(Error::ProcedureNotFound("Missing".into()))
        );
    }

    #[test]
    fn test_evaluate_leaves_output_buffered() {
        let mut engine = engine();
        let value = engine
            .evaluate(r#"(SET_STATE a.b "(x)") (OUTPUT_TO_USER_BUFFER "T" "m" NIL) (GET_STATE a.b)"#)
            .unwrap();
        assert_eq!(value, Value::from("(x)"));
        assert_eq!(engine.flush_output(), "[T] m");
        assert!(engine.evaluate("(SEQ").is_err());
    }

    #[test]
    fn test_load_errors() {
        let cases = [
            "(DEFINE_PROCEDURE A ()) (DEFINE_PROCEDURE A ())",
            "(DEFINE_PROCEDURE A ()",
            "(DEFINE_PROCEDURE 1 ())",
        ];
        for source in cases {
            let err = Engine::load_program(source).unwrap_err();
            assert!(err.is_load_error(), "{source}: {err:?}");
        }
    }

    #[test]
    fn test_eval_depth_is_configurable() {
        let config = EngineConfig {
            max_eval_depth: 4,
            ..EngineConfig::default()
        };
        let mut engine = Engine::load_program_with_config("", config).unwrap();
        assert!(engine.evaluate("(SEQ (SEQ))").is_ok());
        let err = engine.evaluate("(SEQ (SEQ (SEQ (SEQ (SEQ)))))").unwrap_err();
        assert!(err.to_string().contains("depth"), "{err}");
    }
}
