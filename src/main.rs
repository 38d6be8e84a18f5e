// File: src/main.rs
//
// A thin smoke-test CLI: `run <file>` parses, checks, compiles and drives a
// script through the actor runtime, printing its result or a colored
// diagnostic. Not a REPL, not the host API surface — that lives in
// `engine.rs`; this binary exists only so the crate stays runnable for
// manual checks.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser as ClapParser, Subcommand};

#[derive(ClapParser)]
#[command(name = "scriptactor", about = "An embeddable actor-scripting engine", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file to completion under the actor runtime.
    Run { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file } => run(&file),
    }
}

fn run(file: &PathBuf) {
    let source = match fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read '{}': {}", file.display(), e);
            std::process::exit(1);
        }
    };

    let globals = scriptactor::builtins::create_default_globals();

    let ast = match scriptactor::parser::parse_source(&source) {
        Ok(ast) => ast,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = scriptactor::checker::check(&ast) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    let (routine, code_map) = match scriptactor::compiler::compile_program(&ast) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let (result, error) = scriptactor::engine::blocking_exec(Rc::new(routine), globals, code_map);
    if let Some(err) = error {
        eprintln!("{}", err);
        std::process::exit(1);
    }
    if let Some(value) = result {
        println!("{}", value.to_display_string());
    }
}
