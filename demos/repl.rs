use alang::engine::Engine;
use alang::value::Value;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

const CORE_PROGRAM: &str = include_str!("../programs/autologos_core.alang");

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The console encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Map raw input to the `{command, args}` map the dispatcher expects
fn classify(line: &str) -> Value {
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match word.to_ascii_lowercase().as_str() {
        "help" => Value::command("HELP", Vec::<String>::new()),
        "start" if !rest.is_empty() => Value::command("START", [rest]),
        _ => Value::command("UNKNOWN", [line]),
    }
}

fn run_repl() {
    let mut engine = match Engine::load_program(CORE_PROGRAM) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Could not load the core program:\n{e}");
            process::exit(1);
        }
    };

    println!("Autologos console");
    println!("Type `help`, `start <description>`, or :help for console commands.");
    println!();
    print_output(&engine.run_turn("OnSystemInit", Value::Absent));

    let mut rl = DefaultEditor::new().expect("Could not initialize the line editor");

    loop {
        match rl.readline("autologos> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":state" => {
                        print_state(&engine);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                if let Some(form) = line.strip_prefix(":eval") {
                    match engine.evaluate(form.trim()) {
                        Ok(value) => {
                            print_output(&engine.flush_output());
                            println!("{value}");
                        }
                        Err(e) => println!("Error: {e}"),
                    }
                    continue;
                }

                let details = classify(line);
                print_output(&engine.run_turn("DispatchUserCommand", details));
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_output(output: &str) {
    if !output.is_empty() {
        println!("{output}");
    }
}

fn print_state(engine: &Engine) {
    let dump = serde_json::Value::from(&engine.state().snapshot());
    match serde_json::to_string_pretty(&dump) {
        Ok(text) => println!("{text}"),
        Err(e) => println!("Error: {e}"),
    }
}

fn print_help() {
    println!("Console commands:");
    println!("  :help          - Show this help message");
    println!("  :state         - Dump the session state as JSON");
    println!("  :eval <forms>  - Evaluate ALang forms against the session");
    println!("  :quit          - Exit the console");
    println!("  :exit          - Exit the console");
    println!("  Ctrl+C         - Exit the console");
    println!();
    println!("Anything else is classified and sent to DispatchUserCommand:");
    println!("  help               -> HELP");
    println!("  start <text>       -> START with <text> as the only argument");
    println!("  anything else      -> UNKNOWN");
    println!();
    println!("Examples:");
    println!("  start Build a bridge");
    println!("  :eval (GET_STATE proj.title)");
    println!();
}
