// File: src/engine.rs
//
// The host-facing API (spec §6): `evaluate`/`evaluate_compiled` run source or
// an already-compiled routine to completion outside the actor runtime;
// `blocking_exec` runs one under it. `create_default_globals`/`add_native`
// are re-exported from `builtins.rs` since that is where the primitive
// dispatch table actually lives.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::checker;
use crate::compiler::compile_program;
use crate::errors::EngineError;
use crate::parser::parse_source;
use crate::position::CodeMap;
use crate::value::Value;
use crate::vm::Vm;

pub use crate::builtins::{add_native, create_default_globals};

/// Parses, checks, compiles and runs `source` to completion (spec §6
/// `evaluate`). `module_path`, when given, seeds the directory a top-level
/// `import "..."` inside `source` resolves relative paths against — exactly
/// as if `source` were itself a module loaded from that path.
pub fn evaluate(source: &str, globals: Value, module_path: Option<&Path>) -> Result<Value, EngineError> {
    let ast = parse_source(source)?;
    checker::check(&ast)?;
    let (routine, code_map) = compile_program(&ast)?;
    evaluate_compiled_with_dir(Rc::new(routine), code_map, globals, module_path.map(dir_of))
}

/// Runs an already-compiled routine to completion (spec §6 `evaluate_compiled`).
pub fn evaluate_compiled(routine: Rc<crate::bytecode::Routine>, code_map: CodeMap, globals: Value) -> Result<Value, EngineError> {
    evaluate_compiled_with_dir(routine, code_map, globals, None)
}

fn evaluate_compiled_with_dir(
    routine: Rc<crate::bytecode::Routine>,
    code_map: CodeMap,
    globals: Value,
    module_dir: Option<PathBuf>,
) -> Result<Value, EngineError> {
    let mut vm = Vm::new(globals.clone(), code_map);
    if let Some(dir) = module_dir {
        vm.set_module_context(Default::default(), Some(dir), globals);
    }
    vm.run(routine)
}

fn dir_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Runs `routine` under the actor runtime, draining the message queue until
/// empty (spec §6 `blocking_exec`). Delegates to `actor::blocking_exec`,
/// which owns the root-actor bootstrap.
pub fn blocking_exec(routine: Rc<crate::bytecode::Routine>, globals: Value, code_map: CodeMap) -> (Option<Value>, Option<EngineError>) {
    crate::actor::blocking_exec(routine, globals, code_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_runs_arithmetic_to_completion() {
        let result = evaluate("var x=1; x=x+2; x", create_default_globals(), None).unwrap();
        assert_eq!(result.to_number(), 3.0);
    }

    #[test]
    fn evaluate_runs_a_function_call() {
        let result = evaluate("function f(a,b){return a*b} f(6,7)", create_default_globals(), None).unwrap();
        assert_eq!(result.to_number(), 42.0);
    }

    #[test]
    fn evaluate_builds_a_string_with_a_for_loop() {
        let result = evaluate("var s=''; for(var i=0;i<3;i=i+1) s=s+i; s", create_default_globals(), None).unwrap();
        assert_eq!(result.to_display_string(), "012");
    }

    #[test]
    fn evaluate_reads_object_fields_both_ways() {
        let result = evaluate("var o={a:1,b:2}; o.a+o['b']", create_default_globals(), None).unwrap();
        assert_eq!(result.to_number(), 3.0);
    }

    #[test]
    fn evaluate_grows_and_indexes_an_array() {
        let result = evaluate("var a=[10,20,30]; a.length=5; a[4]=99; a.length+a[4]", create_default_globals(), None).unwrap();
        assert_eq!(result.to_number(), 104.0);
    }

    #[test]
    fn evaluate_calls_a_class_method() {
        let result = evaluate("class C(x){ get(){return this.x} } new C(7).get()", create_default_globals(), None).unwrap();
        assert_eq!(result.to_number(), 7.0);
    }

    #[test]
    fn evaluate_rejects_this_as_a_declared_variable() {
        let err = evaluate("var this=1", create_default_globals(), None).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::SemanticError);
    }

    #[test]
    fn blocking_exec_runs_an_actor_start_handler() {
        let ast = parse_source("actor A(){ input @start(){ return 9 } } new A()").unwrap();
        checker::check(&ast).unwrap();
        let (routine, code_map) = compile_program(&ast).unwrap();
        let (result, error) = blocking_exec(Rc::new(routine), create_default_globals(), code_map);
        assert_eq!(result.unwrap().to_number(), 9.0);
        assert!(error.is_none());
    }
}
