//! End-to-end turns against the bundled Autologos program.

#![expect(clippy::unwrap_used)] // test code OK

use alang::Error;
use alang::engine::Engine;
use alang::value::Value;

const CORE_PROGRAM: &str = include_str!("../programs/autologos_core.alang");

const HELP_TEXT: &str = "[AI_PROVIDE_DATA] Commands: START <description>, HELP";

fn started_engine() -> Engine {
    let mut engine = Engine::load_program(CORE_PROGRAM).unwrap();
    engine.init().unwrap();
    engine
}

#[test]
fn test_program_loads_cleanly() {
    let engine = Engine::load_program(CORE_PROGRAM).unwrap();
    assert_eq!(
        engine.procedures().names(),
        vec![
            "DispatchUserCommand",
            "HandleHelpCommand",
            "HandleStartCommand",
            "HandleUnknownCommand",
            "OnSystemInit",
            "OnUserInput",
            "OutputGeneralHelp",
        ]
    );
    assert!(engine.unknown_primitives().is_empty());
}

#[test]
fn test_system_init() {
    let mut engine = Engine::load_program(CORE_PROGRAM).unwrap();
    assert_eq!(engine.init().unwrap(), HELP_TEXT);
    assert_eq!(engine.get_state("sys.current_mode").unwrap(), &Value::from("IDLE"));
}

#[test]
fn test_command_turns() {
    type Turn = (&'static str, Vec<&'static str>, &'static str);
    let turns: Vec<Turn> = vec![
        ("HELP", vec![], HELP_TEXT),
        (
            "START",
            vec!["Build a bridge"],
            "[AI_ACKNOWLEDGE_INTENT] OK, starting project: Build a bridge",
        ),
        ("UNKNOWN", vec!["dance"], "[AI_ERROR] Sorry, I did not understand that command."),
        // Commands the dispatcher has no branch for produce nothing
        ("FLY", vec![], ""),
        ("HELP", vec!["extra"], HELP_TEXT),
    ];

    let mut engine = started_engine();
    for (i, (command, args, expected)) in turns.into_iter().enumerate() {
        let output = engine.dispatch(command, args).unwrap();
        assert_eq!(output, expected, "turn #{} ({command})", i + 1);
    }
}

#[test]
fn test_start_records_project_title() {
    let mut engine = started_engine();
    engine.dispatch("START", ["Build a bridge"]).unwrap();
    assert_eq!(
        engine.get_state("proj.title").unwrap(),
        &Value::from("Build a bridge")
    );
    assert_eq!(
        engine
            .get_state("session.parsed_command_details.command")
            .unwrap(),
        &Value::from("START")
    );

    // State persists across turns and later writes replace earlier ones
    engine.dispatch("HELP", Vec::<String>::new()).unwrap();
    engine.dispatch("START", ["Paint the fence"]).unwrap();
    assert_eq!(
        engine.get_state("proj.title").unwrap(),
        &Value::from("Paint the fence")
    );
}

#[test]
fn test_start_without_description_fails_the_turn() {
    let mut engine = started_engine();
    let err = engine.dispatch("START", Vec::<String>::new()).unwrap_err();
    assert_eq!(err, Error::IndexOutOfRange { index: 0, len: 0 });
    assert!(engine.get_state("proj.title").is_err());

    // The session keeps working afterwards
    assert_eq!(engine.dispatch("HELP", Vec::<String>::new()).unwrap(), HELP_TEXT);
}

#[test]
fn test_on_user_input_forwards_to_dispatcher() {
    let mut engine = started_engine();
    let output = engine
        .invoke_procedure("OnUserInput", Value::command("UNKNOWN", ["?"]))
        .unwrap();
    assert_eq!(output, "[AI_ERROR] Sorry, I did not understand that command.");
}

#[test]
fn test_unknown_procedure_is_recoverable() {
    let mut engine = started_engine();
    assert_eq!(
        engine.invoke_procedure("NoSuchProc", Value::Absent),
        Err(Error::ProcedureNotFound("NoSuchProc".into()))
    );
    assert_eq!(
        engine.run_turn("NoSuchProc", Value::Absent),
        "ERROR: Procedure 'NoSuchProc' not found."
    );
    assert_eq!(engine.dispatch("HELP", Vec::<String>::new()).unwrap(), HELP_TEXT);
}

#[test]
fn test_duplicate_definition_is_a_load_error() {
    let source = format!(
        "{CORE_PROGRAM}\n(DEFINE_PROCEDURE OutputGeneralHelp () (OUTPUT_TO_USER_BUFFER \"X\" \"y\" NIL))"
    );
    assert_eq!(
        Engine::load_program(&source).unwrap_err(),
        Error::DuplicateProcedure("OutputGeneralHelp".into())
    );
}

#[test]
fn test_parentheses_inside_strings() {
    let mut engine = started_engine();
    engine
        .evaluate(r#"(SEQ (SET_STATE a.b "(x)") (SET_STATE a.c "2"))"#)
        .unwrap();
    assert_eq!(engine.get_state("a.b").unwrap(), &Value::from("(x)"));
    assert_eq!(engine.get_state("a.c").unwrap(), &Value::from("2"));
}

#[test]
fn test_flush_twice_is_empty() {
    let mut engine = started_engine();
    let value = engine
        .evaluate(
            r#"(SEQ (CALL_PROCEDURE OutputGeneralHelp) (FLUSH_USER_OUTPUT_BUFFER) (FLUSH_USER_OUTPUT_BUFFER))"#,
        )
        .unwrap();
    assert_eq!(value, Value::from(""));
    assert_eq!(engine.flush_output(), "");
}

#[test]
fn test_mutual_recursion_keeps_frames_separate() {
    let source = r#"
        (DEFINE_PROCEDURE Countdown (label next)
            (SEQ
                (OUTPUT_TO_USER_BUFFER label "enter" NIL)
                (IF next (CALL_PROCEDURE Countdown next NIL))
                (OUTPUT_TO_USER_BUFFER label "leave" NIL)))
        (DEFINE_PROCEDURE Forever (n) (CALL_PROCEDURE Again n))
        (DEFINE_PROCEDURE Again (n) (CALL_PROCEDURE Forever n))
    "#;
    let mut engine = Engine::load_program(source).unwrap();

    let output = engine
        .evaluate(r#"(CALL_PROCEDURE Countdown "outer" "inner")"#)
        .map(|_| engine.flush_output())
        .unwrap();
    assert_eq!(
        output,
        "[outer] enter\n[inner] enter\n[inner] leave\n[outer] leave"
    );

    let err = engine.run_turn("Forever", Value::from(1));
    assert!(err.starts_with("ERROR: EvaluationError: Evaluation depth limit exceeded"), "{err}");
}

#[cfg(feature = "json")]
#[test]
fn test_json_turn_and_state_dump() {
    let mut engine = started_engine();
    let output = engine
        .invoke_procedure_json(
            "DispatchUserCommand",
            r#"{"command": "START", "args": ["Build a bridge"]}"#,
        )
        .unwrap();
    assert_eq!(output, "[AI_ACKNOWLEDGE_INTENT] OK, starting project: Build a bridge");

    let dump = serde_json::Value::from(&engine.state().snapshot());
    assert_eq!(dump["proj"]["title"], "Build a bridge");
    assert_eq!(dump["sys"]["current_mode"], "IDLE");
}
